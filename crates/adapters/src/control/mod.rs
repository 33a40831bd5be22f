//! Unix-socket transport for the binary control protocol.

pub mod client;
pub mod io;
pub mod server;
