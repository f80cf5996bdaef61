//! Explain mode: per-stage counts and timings
//!
//! Only top-level stages are profiled; facet branches and lookup
//! sub-pipelines are reported as part of their parent stage.

use std::time::Instant;

use serde::Serialize;

use crate::error::Result;
use crate::pipeline::eval::Executor;
use crate::pipeline::types::Stage;
use crate::store::{Collection, Document};

/// A single step in pipeline execution
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProfile {
    /// Step number (1-based)
    pub step: usize,
    /// Stage name, e.g. "$lookup"
    pub stage: String,
    pub input_count: usize,
    pub output_count: usize,
    pub elapsed_micros: u64,
}

/// Pipeline output together with its profile
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Explained {
    pub documents: Vec<Document>,
    pub profile: Vec<StageProfile>,
    pub total_micros: u64,
}

impl<'a> Executor<'a> {
    /// Execute while recording what every stage did
    pub fn explain(&self, collection: Collection, stages: &[Stage]) -> Result<Explained> {
        let started = Instant::now();
        let mut current = self.initial_input(collection, stages)?;
        let mut profile = Vec::with_capacity(stages.len());

        for (i, stage) in stages.iter().enumerate() {
            let step_started = Instant::now();
            let input_count = current.len();
            current = self.apply(stage, current)?;

            profile.push(StageProfile {
                step: i + 1,
                stage: stage.name().to_string(),
                input_count,
                output_count: current.len(),
                elapsed_micros: step_started.elapsed().as_micros() as u64,
            });

            if input_count > 0 && current.is_empty() {
                tracing::warn!(step = i + 1, stage = stage.name(), "stage emptied the stream");
            }
        }

        Ok(Explained {
            documents: current,
            profile,
            total_micros: started.elapsed().as_micros() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore};
    use serde_json::json;

    fn obj(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_explain_reports_each_stage() {
        let store = MemoryStore::new();
        for views in [5, 10, 15] {
            store
                .create(Collection::Videos, obj(json!({"owner": "c1", "views": views})))
                .unwrap();
        }

        let stages = vec![
            Stage::Match(crate::store::Filter::new().eq("owner", "c1")),
            Stage::Skip(1),
            Stage::Limit(1),
        ];

        let explained = store.explain(Collection::Videos, &stages).unwrap();
        assert_eq!(explained.documents.len(), 1);
        assert_eq!(explained.profile.len(), 3);
        assert_eq!(explained.profile[0].stage, "$match");
        assert_eq!(explained.profile[0].input_count, 3);
        assert_eq!(explained.profile[1].output_count, 2);
        assert_eq!(explained.profile[2].output_count, 1);
    }

    #[test]
    fn test_explain_flags_dropped_stream() {
        let store = MemoryStore::new();
        store
            .create(Collection::Users, obj(json!({"_id": "c1"})))
            .unwrap();

        // Non-preserving unwind over an empty join drops the record
        let stages = vec![
            Stage::lookup(Collection::Videos, "_id", "owner", "videos"),
            Stage::unwind("videos"),
        ];
        let explained = store.explain(Collection::Users, &stages).unwrap();
        assert!(explained.documents.is_empty());
        assert_eq!(explained.profile[1].input_count, 1);
        assert_eq!(explained.profile[1].output_count, 0);
    }
}
