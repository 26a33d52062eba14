//! Port definitions (hexagonal architecture)
//!
//! The migration engine depends only on these traits, never on a concrete
//! database driver.

mod store;

pub use store::{QueryResult, SchemaStore, StoreTransaction};
