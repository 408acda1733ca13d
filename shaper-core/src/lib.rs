//! Shaping control plane and telemetry engine.
//!
//! Converts a declarative [`ShapingConfig`] into the ordered set of kernel
//! queueing objects that realize it (through the external `tc` utility),
//! guaranteeing idempotent convergence and safe teardown, and keeps live
//! views of interface throughput and DHCP client presence.

pub mod command;
pub mod config;
pub mod dhcp;
pub mod net;
pub mod plan;
pub mod probe;
pub mod shaper;
pub mod telemetry;

pub use command::{Executor, SystemExecutor};
pub use config::ShapingConfig;
pub use plan::QueueingPlan;
pub use shaper::{ShapingError, ShapingPlanner};
