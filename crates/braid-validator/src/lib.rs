//! The unit validator (spec C5): turns a parsed unit into an admission
//! decision by running it through the ordered phases of §4.5.1 against a
//! storage-backed view of chain state.

pub mod context;
pub mod outcome;
pub mod validator;

pub use context::UnitEvalContext;
pub use outcome::{SideEffects, ValidationOutcome};
pub use validator::UnitValidator;
