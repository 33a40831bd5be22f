pub mod auth_provider;
pub mod connection_table;
pub mod memory_info;
pub mod metrics_port;
pub mod protocol_timeout;
pub mod route_classifier;
