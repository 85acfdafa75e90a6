pub mod api;
pub mod app_state;
pub mod config;
pub mod database;
pub mod errors;
pub mod middleware;
pub mod pipeline;
pub mod server;
pub mod supervisor;

pub use server::Application;
