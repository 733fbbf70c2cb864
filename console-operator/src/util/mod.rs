use std::time::Duration;
pub mod labels;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod patch;
#[cfg(feature = "metrics")]
pub mod server;
pub mod time;

pub(crate) mod colors;

mod error;

pub use error::*;

/// The default interval for requeuing a Console that is waiting on an
/// external condition (pod not yet observed, authorisation pending).
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Name of the kubernetes resource manager.
pub(crate) const MANAGER_NAME: &str = "console-operator";
