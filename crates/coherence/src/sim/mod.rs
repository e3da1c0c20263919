//! Simulation: platform assembly, port bundles, cycle scheduling.

/// The platform and its cycle scheduler.
pub mod platform;
/// Channel port bundles handed to components each cycle.
pub mod ports;

pub use platform::Platform;
