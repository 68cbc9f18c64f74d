pub mod cache;
pub mod db;
pub mod engine;

pub use db::StateDb;
pub use engine::{StagedUnitWrite, StaticProps, StorageEngine};
