pub mod entity;
pub mod estimator;
