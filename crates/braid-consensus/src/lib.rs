//! The main-chain engine (spec C6): MC selection, the stability test,
//! stabilization batches, and commission payouts.

pub mod commissions;
pub mod engine;
pub mod mc;
pub mod stabilize;
pub mod stability;

pub use engine::{MainChainEngine, McUpdate};
pub use stabilize::{StabilizationReport, StabilizedStep};
