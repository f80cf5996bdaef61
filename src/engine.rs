//! Engine facade
//!
//! `Engine` owns a store and the engine configuration. It holds no other
//! state: every operation is a transformation over store reads and writes.
//! Operations are implemented in their own modules (`relation::toggle`,
//! `stats`, `listing`, `content`) as `impl` blocks on this type.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::pipeline::{Explained, Stage};
use crate::store::{Collection, Document, DocumentStore};

pub struct Engine<S: DocumentStore> {
    pub(crate) store: S,
    pub(crate) config: EngineConfig,
}

impl<S: DocumentStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Engine { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run an ad hoc pipeline
    pub fn aggregate(&self, collection: Collection, stages: &[Stage]) -> Result<Vec<Document>> {
        self.store.run_pipeline(collection, stages)
    }

    /// Run an ad hoc pipeline in explain mode
    pub fn explain(&self, collection: Collection, stages: &[Stage]) -> Result<Explained> {
        self.store.explain(collection, stages)
    }
}
