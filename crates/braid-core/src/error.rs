use thiserror::Error;

/// The full error taxonomy of §7. Each variant is either peer-attributable
/// (non-retriable), transient (caller may retry), or a control-flow signal
/// (`ParentUnknown`/`HashTreeMissing`) that the validator converts into a
/// `NeedParents`/`NeedHashTree` outcome rather than propagating as a failure.
#[derive(Debug, Error)]
pub enum BraidError {
    // ── Shape / hashing ──────────────────────────────────────────────────────
    #[error("malformed unit: {0}")]
    Malformed(String),

    #[error("serialization would produce an empty container or non-finite number: {0}")]
    MalformedSerialization(String),

    #[error("recursion depth exceeds D_MAX={max}")]
    NestingTooDeep { max: usize },

    // ── Script / definition layer (C4) ───────────────────────────────────────
    #[error("definition malformed: {0}")]
    DefinitionMalformed(String),

    #[error("reference operator not allowed under bNoReferences")]
    ReferenceNotAllowed,

    #[error("evaluation complexity exceeded (cap={cap})")]
    ComplexityExceeded { cap: u32 },

    #[error("inner address has no resolvable definition: {0}")]
    UnresolvedInnerAddress(String),

    #[error("definition evaluated to false")]
    EvaluatedFalse,

    // ── Validator control-flow signals (not failures) ────────────────────────
    #[error("unknown parent units")]
    ParentUnknown(Vec<String>),

    #[error("hash tree missing for this MCI range")]
    HashTreeMissing,

    // ── Conflict / payment layer ─────────────────────────────────────────────
    #[error("conflict with sibling unit: {0}")]
    Conflict(String),

    #[error("double spend on output ({unit}, {message_index}, {output_index})")]
    DoubleSpend {
        unit: String,
        message_index: u32,
        output_index: u32,
    },

    #[error("insufficient inputs: need {need}, have {have}")]
    InsufficientInputs { need: u64, have: u64 },

    #[error("asset policy violation: {0}")]
    AssetPolicyViolation(String),

    // ── Catchup / stability ───────────────────────────────────────────────────
    #[error("last-ball view changed mid-validation; retry")]
    LastBallStaleOrAdvanced,

    #[error("transient error: {0}")]
    Transient(String),

    #[error("fatal invariant violation: {0}")]
    Fatal(String),

    // ── Storage / serialization wrappers ──────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

impl BraidError {
    /// True for errors a peer caused, as opposed to node-internal failures.
    pub fn is_peer_attributable(&self) -> bool {
        matches!(
            self,
            BraidError::Malformed(_)
                | BraidError::MalformedSerialization(_)
                | BraidError::NestingTooDeep { .. }
                | BraidError::DefinitionMalformed(_)
                | BraidError::ReferenceNotAllowed
                | BraidError::ComplexityExceeded { .. }
                | BraidError::UnresolvedInnerAddress(_)
                | BraidError::EvaluatedFalse
                | BraidError::DoubleSpend { .. }
                | BraidError::InsufficientInputs { .. }
                | BraidError::AssetPolicyViolation(_)
        )
    }

    /// True for errors where the caller may retry without backing off the peer.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BraidError::LastBallStaleOrAdvanced | BraidError::Transient(_)
        )
    }
}
