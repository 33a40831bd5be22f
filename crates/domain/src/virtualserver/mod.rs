pub mod dest;
pub mod entity;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod service;
