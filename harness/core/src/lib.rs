pub mod controller;
pub mod convergence;
pub mod emulation;
pub mod experiment;
pub mod forwarding;
pub mod processes;
pub mod topology;

pub use ride_harness_config::adjust_timeout;

/// Boxed error used at trait-object seams where callers only log and move on.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;
