//! Catchup and witness-proof synchronization (spec C7): lets a lagging node
//! jump its stable frontier forward without replaying the whole DAG, and
//! lets a peer stream ball hashes ahead of the units that justify them.

pub mod chain;
pub mod hashtree;
pub mod proof;
pub mod recalc;

pub use chain::{build_response, CatchupRequest, CatchupResponse};
pub use hashtree::{confirm_unit, produce_hash_tree, receive_batch, HashTreeEntry};
pub use proof::{preliminary_witness_scan, validate_chain, WitnessProofOutcome};
pub use recalc::recalc_commissions;
