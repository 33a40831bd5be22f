#![forbid(unsafe_code)]

pub mod auth;
pub mod common;
pub mod defense;
pub mod stats;
pub mod syncd;
pub mod timeout;
pub mod tunables;
pub mod virtualserver;
