//! Aggregation pipelines
//!
//! A query is an ordered list of [`Stage`] values run by one [`Executor`].
//! Stages consume the stream emitted by their predecessor; `Facet` is the
//! only branching construct.
//!
//! # Example
//! ```
//! use engagedb::pipeline::{Stage, SortKey};
//! use engagedb::store::{Collection, DocumentStore, Filter, MemoryStore};
//!
//! let store = MemoryStore::new();
//! let stages = vec![
//!     Stage::Match(Filter::new().eq("video", "v1")),
//!     Stage::Sort(vec![SortKey::desc("createdAt")]),
//!     Stage::Limit(10),
//! ];
//! let comments = store.run_pipeline(Collection::Comments, &stages).unwrap();
//! assert!(comments.is_empty());
//! ```

mod types;
mod parser;
mod eval;
mod explain;

pub use types::*;
pub use parser::*;
pub use eval::*;
pub use explain::*;
