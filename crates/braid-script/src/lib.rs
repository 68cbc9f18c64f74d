//! Definition/script evaluator: statically validates definition trees and
//! deterministically evaluates them against a unit's authentifiers and a
//! read-only view of state at its `last_ball_mci` horizon.

pub mod definition;
pub mod eval;

pub use definition::{validate_definition, Comparison, Definition, Filter};
pub use eval::{evaluate, Budget, EvalContext};
