//! Batch registry client: batch records, mint and burn on the token ledger

pub mod ledger;
pub mod model;
pub mod service;

pub use ledger::{Ledger, LedgerError, SimulatedLedger};
pub use model::{
    BalanceView, Capability, CoffeeBatch, DeclaredFields, LedgerReceipt, MintAuthorization, MintSource,
    NewBatchRecord, VerificationStatus, VerificationUpdate,
};
pub use service::BatchRegistry;
