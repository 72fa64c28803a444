// RTMCTL -- RUNTIME RESOURCE MANAGER
// DECIDES OPERATING POINTS (FREQUENCY, GOVERNOR, CORE ASSIGNMENT) FOR
// REGISTERED WORKLOADS SO THEIR MONITORS STAY INSIDE DECLARED BOUNDS.
//
// LIBRARY CRATE: REGISTRY, ENGINES, CONTROL LOOP, SESSION.
// THE BINARY (main.rs) ONLY BOOTSTRAPS A SESSION.

#[doc(hidden)]
pub use tracing as __tracing;

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__tracing::info!($($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::__tracing::warn!($($arg)*) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::__tracing::debug!($($arg)*) };
}

pub mod types;
pub mod error;
pub mod tuning;
pub mod registry;
pub mod model;
pub mod regression;
pub mod qlearn;
pub mod device;
pub mod event;
pub mod session;
pub mod control;
pub mod sim;
