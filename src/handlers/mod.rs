//! API handlers for the BeanVault backend

pub mod batch;
pub mod health;
pub mod monitor;
pub mod redemption;
pub mod verification;

pub use batch::*;
pub use health::health_check;
pub use monitor::*;
pub use redemption::*;
pub use verification::*;
