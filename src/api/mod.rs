pub mod status_routes;

pub use status_routes::bind_status_server;
