#![forbid(unsafe_code)]

#[cfg(feature = "config")]
pub mod config;
#[cfg(feature = "context")]
pub mod context;
#[cfg(feature = "logging")]
pub mod logging;
#[cfg(feature = "rmq")]
pub mod rmq;
#[cfg(feature = "signal")]
pub mod signal;
