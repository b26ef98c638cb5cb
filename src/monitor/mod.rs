//! Inventory threshold monitor

pub mod model;
pub mod scheduler;
pub mod service;

pub use model::{InventoryFlag, InventoryThresholds, SweepQuery, SweepReport};
pub use scheduler::start_monitor_scheduler;
pub use service::{evaluate, InventoryMonitor};
