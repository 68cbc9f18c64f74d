//! ─── Protocol constants ─────────────────────────────────────────────────────
//!
//! Consensus and DAG-shape limits, named after their role in the protocol so
//! the rest of the workspace shares one vocabulary for them.

// ── DAG shape limits (§3.1) ───────────────────────────────────────────────────

/// Maximum number of parent units referenced by a single unit.
pub const P_MAX: usize = 16;

/// Maximum number of authors on a single unit.
pub const A_MAX: usize = 16;

/// Maximum number of messages on a single unit.
pub const M_MAX: usize = 128;

/// Number of protocol witnesses.
pub const WITNESS_COUNT: usize = 12;

/// Majority-of-witnesses threshold used by `witnessed_level` and the
/// preliminary witness-proof scan: 7 of 12, the protocol's literal
/// majority rather than `ceil(2*12/3) = 8` — see DESIGN.md.
pub const MAJORITY_WITNESSES: usize = 7;

// ── Canonical serialization (§4.1) ────────────────────────────────────────────

/// Maximum recursion depth for canonical serialization and definition trees.
pub const D_MAX: usize = 100;

// ── Script/definition evaluator (§4.4) ────────────────────────────────────────

/// Maximum cumulative complexity score for one `evaluate` call.
pub const C_MAX: u32 = 100;

/// Maximum number of unit-reading sub-expressions in one `evaluate` call.
pub const Q_MAX: u32 = 20;

// ── Unit validator (§4.5) ─────────────────────────────────────────────────────

/// Maximum serialized unit size in bytes. Overridable via `MAX_UNIT_LENGTH`.
pub const S_MAX: usize = 5_000_000;

/// Bound on the conflicting-unit scan during conflict detection (phase 8).
pub const N_CONF: usize = 1_000;

// ── Main-chain engine (§4.6) ──────────────────────────────────────────────────

/// Skiplist stride: MCIs divisible by this value carry an extra skiplist ball.
pub const S_STEP: u64 = 10;

// ── Catchup & witness proof (§4.7) ────────────────────────────────────────────

/// Maximum length of a proof-chain-of-balls response, in MCIs.
pub const L_CHAIN: u64 = 1_000_000;

/// Hash-tree batch commit size (balls per storage transaction).
pub const B_BALLS: usize = 100;

/// Maximum pending hash-tree entries held in memory at once.
pub const B_MAX: usize = 10_000;

/// Batch size for incremental headers-commission recalculation after catchup.
pub const B_COMM: u64 = 1_000;

/// Maximum size of a single AA response payload, in bytes.
pub const R_MAX: usize = 4_000;

/// Maximum `addresses` array length accepted by a light-history request.
pub const MAX_HISTORY_ADDRESSES: usize = 100;

// ── Concurrency & timeouts (§5, §8) ───────────────────────────────────────────

/// Deadlock-watchdog threshold, in seconds, for any named lock (§4.8).
pub const T_LOCK_SECS: u64 = 120;

/// Per-storage-query timeout, in seconds.
pub const T_Q_SECS: u64 = 60;

/// Outer budget for serving one peer request, in seconds.
pub const T_PEER_SECS: u64 = 300;

// ── Environment variable names (§6.4) ─────────────────────────────────────────

pub const ENV_MAX_UNIT_LENGTH: &str = "MAX_UNIT_LENGTH";
pub const ENV_MAX_COMPLEXITY: &str = "MAX_COMPLEXITY";
pub const ENV_STORAGE_BACKEND: &str = "STORAGE_BACKEND";
