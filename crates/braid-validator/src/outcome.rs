//! The outcome shapes a validation attempt resolves to (§4.5).

use braid_core::error::BraidError;
use braid_core::types::UnitId;
use braid_dag::{Output, UnitDerived};

/// What `Accepted` actually wrote, for the caller to log or relay without
/// re-reading storage.
#[derive(Debug, Clone)]
pub struct SideEffects {
    pub unit_id: UnitId,
    pub derived: UnitDerived,
    pub new_outputs: Vec<Output>,
    /// Sibling units whose `sequence` flipped to `temp-bad` during conflict
    /// detection (phase 8), in the same atomic step as this admission.
    pub siblings_marked_temp_bad: Vec<UnitId>,
}

/// The five terminal shapes of `UnitValidator::validate` (§4.5).
#[derive(Debug)]
pub enum ValidationOutcome {
    Accepted(SideEffects),
    Rejected(BraidError),
    NeedParents(Vec<UnitId>),
    NeedHashTree,
    /// `(reason, retry_ok)` — a recoverable condition, not a verdict on the unit.
    Transient(String, bool),
}
