pub mod connections;
pub mod protocol_timeouts;
