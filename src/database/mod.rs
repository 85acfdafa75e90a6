pub mod connector;

pub use connector::{connect, connect_with_settings, redact_url, DB};
