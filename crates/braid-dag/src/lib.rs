pub mod queries;
pub mod unit;

pub use queries::{determine_best_parent, determine_if_included, level, limci, witnessed_level, GraphView};
pub use unit::{Asset, Author, Ball, Input, Message, MessagePayload, Output, Unit, UnitDerived};
