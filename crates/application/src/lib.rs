#![forbid(unsafe_code)]

pub mod control_service_impl;
pub mod defense_service_impl;
pub mod estimator_service_impl;
pub mod report;
