pub mod extract;
pub mod routes;

pub use routes::{not_found, Resource, RouteGroup, RouteTable};
