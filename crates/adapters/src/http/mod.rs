pub mod error;
pub mod health_handler;
pub mod metrics_handler;
pub mod middleware;
pub mod proc_handler;
pub mod router;
pub mod server;
pub mod state;
pub mod status_handler;
pub mod tunables_handler;
