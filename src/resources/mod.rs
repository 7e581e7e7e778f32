//! Resource sampling and admission policy.

mod monitor;
mod probe;

pub use monitor::{ResourceHealth, ResourceMonitor, Violation};
pub use probe::{ProcProbe, ResourceProbe, ResourceSample, StaticProbe};
