pub mod constants;
pub mod error;
pub mod types;

pub use constants::*;
pub use error::BraidError;
pub use types::*;
