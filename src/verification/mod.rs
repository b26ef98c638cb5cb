//! Oracle-backed batch verification

pub mod model;
pub mod oracle;
pub mod service;

pub use model::{
    interpolate_progress, FailureReason, RequestState, VerificationKind, VerificationRequest,
    VerificationResult,
};
pub use oracle::{HttpOracleClient, OracleClient, OracleError, OracleStatus};
pub use service::{PollPolicy, VerificationHandle, VerificationOrchestrator};
