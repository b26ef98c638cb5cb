//! Redemption domain module

pub mod model;
pub mod repository;
pub mod service;

pub use model::{AdvanceRedemptionRequest, CreateRedemptionRequest, ListRedemptionsQuery, RedemptionRequest, RedemptionStatus};
pub use repository::{InMemoryRedemptionRepository, PgRedemptionRepository, RedemptionRepository};
pub use service::RedemptionService;
