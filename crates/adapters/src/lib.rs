#![deny(unsafe_code)]

pub mod auth;
pub mod control;
pub mod http;
pub mod scheduler;
pub mod tables;
