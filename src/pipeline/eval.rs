//! Pipeline executor
//!
//! Interprets a stage list against a [`CollectionSource`]. Each collection is
//! read at most once per executor, so one execution sees one consistent view
//! of every collection it touches.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use serde_json::Value;

use crate::error::{EngageError, Result};
use crate::pipeline::types::*;
use crate::store::value::{compare_values, get_path, remove_path, resolve, set_path, value_key, Total};
use crate::store::{Collection, CollectionSource, Document, ID_FIELD};

/// Equality index over one field of a foreign collection
struct ForeignIndex {
    docs: Arc<Vec<Document>>,
    by_key: HashMap<String, Vec<usize>>,
}

impl ForeignIndex {
    fn build(docs: Arc<Vec<Document>>, field: &str) -> Self {
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, doc) in docs.iter().enumerate() {
            match resolve(doc, field) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    for item in items {
                        by_key.entry(value_key(&item)).or_default().push(idx);
                    }
                }
                Some(value) => by_key.entry(value_key(&value)).or_default().push(idx),
            }
        }
        ForeignIndex { docs, by_key }
    }

    /// Foreign documents equal to the local value (any element, for arrays)
    fn matching(&self, local: Option<Value>) -> Vec<Document> {
        let positions: BTreeSet<usize> = match local {
            None | Some(Value::Null) => BTreeSet::new(),
            Some(Value::Array(items)) => items
                .iter()
                .flat_map(|item| self.by_key.get(&value_key(item)).into_iter().flatten().copied())
                .collect(),
            Some(value) => self
                .by_key
                .get(&value_key(&value))
                .into_iter()
                .flatten()
                .copied()
                .collect(),
        };
        positions.into_iter().map(|i| self.docs[i].clone()).collect()
    }
}

/// Pipeline executor
pub struct Executor<'a> {
    source: &'a dyn CollectionSource,
    scans: Mutex<HashMap<Collection, Arc<Vec<Document>>>>,
    indexes: Mutex<HashMap<(Collection, String), Arc<ForeignIndex>>>,
}

fn poisoned<T>(_: T) -> EngageError {
    EngageError::Internal("executor cache lock poisoned".into())
}

impl<'a> Executor<'a> {
    pub fn new(source: &'a dyn CollectionSource) -> Self {
        Executor {
            source,
            scans: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    /// Run `stages` over the documents of `collection`
    pub fn execute(&self, collection: Collection, stages: &[Stage]) -> Result<Vec<Document>> {
        let input = self.initial_input(collection, stages)?;
        self.execute_on(input, stages)
    }

    /// Run `stages` over an explicit input stream
    pub fn execute_on(&self, input: Vec<Document>, stages: &[Stage]) -> Result<Vec<Document>> {
        let mut current = input;
        for stage in stages {
            let before = current.len();
            current = self.apply(stage, current)?;
            tracing::debug!(stage = stage.name(), input = before, output = current.len(), "pipeline stage");
        }
        Ok(current)
    }

    /// A leading `$documents` stage replaces the collection, so skip the scan
    pub(crate) fn initial_input(&self, collection: Collection, stages: &[Stage]) -> Result<Vec<Document>> {
        match stages.first() {
            Some(Stage::Documents(_)) => Ok(Vec::new()),
            _ => Ok(self.scan(collection)?.as_ref().clone()),
        }
    }

    fn scan(&self, collection: Collection) -> Result<Arc<Vec<Document>>> {
        let mut scans = self.scans.lock().map_err(poisoned)?;
        if let Some(docs) = scans.get(&collection) {
            return Ok(Arc::clone(docs));
        }
        let docs = Arc::new(self.source.scan(collection)?);
        scans.insert(collection, Arc::clone(&docs));
        Ok(docs)
    }

    fn index(&self, collection: Collection, field: &str) -> Result<Arc<ForeignIndex>> {
        let mut indexes = self.indexes.lock().map_err(poisoned)?;
        let key = (collection, field.to_string());
        if let Some(index) = indexes.get(&key) {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(ForeignIndex::build(self.scan(collection)?, field));
        indexes.insert(key, Arc::clone(&index));
        Ok(index)
    }

    /// Apply a single stage to a stream
    pub(crate) fn apply(&self, stage: &Stage, input: Vec<Document>) -> Result<Vec<Document>> {
        match stage {
            Stage::Documents(docs) => Ok(docs.clone()),
            Stage::Match(filter) => Ok(input.into_iter().filter(|d| filter.matches(d)).collect()),
            Stage::Lookup(spec) => self.lookup(spec, input),
            Stage::Group(spec) => Ok(group(spec, input)),
            Stage::Facet(branches) => self.facet(branches, input),
            Stage::Project(fields) => project(fields, input),
            Stage::AddFields(fields) => Ok(add_fields(fields, input)),
            Stage::Unwind { path, preserve_empty } => Ok(unwind(path, *preserve_empty, input)),
            Stage::ReplaceRoot(expr) => input.iter().map(|doc| replace_root(expr, doc)).collect(),
            Stage::Sort(keys) => Ok(sort(keys, input)),
            Stage::Skip(n) => Ok(input.into_iter().skip(*n).collect()),
            Stage::Limit(n) => Ok(input.into_iter().take(*n).collect()),
            Stage::Count(field) => count(field, input),
        }
    }

    fn lookup(&self, spec: &Lookup, input: Vec<Document>) -> Result<Vec<Document>> {
        let index = self.index(spec.from, &spec.foreign_field)?;

        input
            .into_iter()
            .map(|mut doc| {
                let matched = index.matching(resolve(&doc, &spec.local_field));
                let joined = if spec.pipeline.is_empty() {
                    matched
                } else {
                    self.execute_on(matched, &spec.pipeline)?
                };
                doc.insert(
                    spec.as_field.clone(),
                    Value::Array(joined.into_iter().map(Value::Object).collect()),
                );
                Ok(doc)
            })
            .collect()
    }

    /// Every branch sees the full input; output is a single document
    fn facet(&self, branches: &[(String, Vec<Stage>)], input: Vec<Document>) -> Result<Vec<Document>> {
        if branches.is_empty() {
            return Err(EngageError::Pipeline("$facet requires at least one branch".into()));
        }

        let results: Vec<(String, Vec<Document>)> = branches
            .par_iter()
            .map(|(name, stages)| {
                self.execute_on(input.clone(), stages)
                    .map(|docs| (name.clone(), docs))
            })
            .collect::<Result<_>>()?;

        let mut out = Document::new();
        for (name, docs) in results {
            out.insert(name, Value::Array(docs.into_iter().map(Value::Object).collect()));
        }
        Ok(vec![out])
    }
}

// ============================================================================
// Expressions
// ============================================================================

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(_) => true,
    }
}

/// Evaluate an expression; `None` means the value is missing
pub fn eval_expr(expr: &Expr, doc: &Document) -> Option<Value> {
    match expr {
        Expr::Field(path) => resolve(doc, path),
        Expr::Literal(value) => Some(value.clone()),
        Expr::Size(inner) => {
            let len = match eval_expr(inner, doc) {
                Some(Value::Array(items)) => items.len(),
                _ => 0,
            };
            Some(Value::from(len as u64))
        }
        Expr::Sum(inner) => {
            let total = eval_expr(inner, doc)
                .map(|v| Total::default().add_all(&v))
                .unwrap_or_default();
            Some(total.into_value())
        }
        Expr::IfNull(inner, default) => match eval_expr(inner, doc) {
            None | Some(Value::Null) => eval_expr(default, doc),
            value => value,
        },
        Expr::Not(inner) => Some(Value::Bool(!truthy(eval_expr(inner, doc).as_ref()))),
        Expr::First(inner) => match eval_expr(inner, doc) {
            Some(Value::Array(items)) => items.into_iter().next(),
            value => value,
        },
    }
}

// ============================================================================
// Stateless stages
// ============================================================================

enum AccState {
    Sum(Total),
    Count(u64),
    First(Option<Value>),
    Push(Vec<Value>),
}

impl AccState {
    fn new(acc: &Accumulator) -> Self {
        match acc {
            Accumulator::Sum(_) => AccState::Sum(Total::default()),
            Accumulator::Count => AccState::Count(0),
            Accumulator::First(_) => AccState::First(None),
            Accumulator::Push(_) => AccState::Push(Vec::new()),
        }
    }

    fn feed(&mut self, acc: &Accumulator, doc: &Document) {
        match (self, acc) {
            (AccState::Sum(total), Accumulator::Sum(expr)) => {
                if let Some(value) = eval_expr(expr, doc) {
                    *total = total.add(&value);
                }
            }
            (AccState::Count(n), Accumulator::Count) => *n += 1,
            (AccState::First(slot), Accumulator::First(expr)) => {
                if slot.is_none() {
                    *slot = Some(eval_expr(expr, doc).unwrap_or(Value::Null));
                }
            }
            (AccState::Push(items), Accumulator::Push(expr)) => {
                if let Some(value) = eval_expr(expr, doc) {
                    items.push(value);
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> Value {
        match self {
            AccState::Sum(total) => total.into_value(),
            AccState::Count(n) => Value::from(n),
            AccState::First(slot) => slot.unwrap_or(Value::Null),
            AccState::Push(items) => Value::Array(items),
        }
    }
}

/// Groups come out in order of first appearance
fn group(spec: &Group, input: Vec<Document>) -> Vec<Document> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Value, Vec<AccState>)> = HashMap::new();

    for doc in &input {
        let key = eval_expr(&spec.key, doc).unwrap_or(Value::Null);
        let hash = value_key(&key);
        let (_, states) = groups.entry(hash.clone()).or_insert_with(|| {
            order.push(hash);
            (key, spec.accumulators.iter().map(|(_, acc)| AccState::new(acc)).collect())
        });
        for (state, (_, acc)) in states.iter_mut().zip(&spec.accumulators) {
            state.feed(acc, doc);
        }
    }

    order
        .into_iter()
        .filter_map(|hash| groups.remove(&hash))
        .map(|(key, states)| {
            let mut out = Document::new();
            out.insert(ID_FIELD.to_string(), key);
            for (state, (name, _)) in states.into_iter().zip(&spec.accumulators) {
                out.insert(name.clone(), state.finish());
            }
            out
        })
        .collect()
}

fn project(fields: &[(String, Projection)], input: Vec<Document>) -> Result<Vec<Document>> {
    let inclusion = fields
        .iter()
        .any(|(name, p)| name != ID_FIELD && !matches!(p, Projection::Exclude));

    if inclusion {
        if let Some((name, _)) = fields
            .iter()
            .find(|(name, p)| name != ID_FIELD && matches!(p, Projection::Exclude))
        {
            return Err(EngageError::Pipeline(format!(
                "$project cannot exclude '{}' in inclusion mode",
                name
            )));
        }
    }

    let id_excluded = fields
        .iter()
        .any(|(name, p)| name == ID_FIELD && matches!(p, Projection::Exclude));

    Ok(input
        .into_iter()
        .map(|doc| {
            if !inclusion {
                let mut out = doc;
                for (name, _) in fields {
                    out.remove(name);
                }
                return out;
            }

            let mut out = Document::new();
            if !id_excluded {
                if let Some(id) = doc.get(ID_FIELD) {
                    out.insert(ID_FIELD.to_string(), id.clone());
                }
            }
            for (name, projection) in fields {
                let value = match projection {
                    Projection::Include => resolve(&doc, name),
                    Projection::Computed(expr) => eval_expr(expr, &doc),
                    Projection::Exclude => None,
                };
                if let Some(value) = value {
                    out.insert(name.clone(), value);
                }
            }
            out
        })
        .collect())
}

/// All expressions see the document as it was before this stage
fn add_fields(fields: &[(String, Expr)], input: Vec<Document>) -> Vec<Document> {
    input
        .into_iter()
        .map(|mut doc| {
            let computed: Vec<(String, Value)> = fields
                .iter()
                .filter_map(|(name, expr)| eval_expr(expr, &doc).map(|v| (name.clone(), v)))
                .collect();
            doc.extend(computed);
            doc
        })
        .collect()
}

fn unwind(path: &str, preserve_empty: bool, input: Vec<Document>) -> Vec<Document> {
    let mut out = Vec::with_capacity(input.len());

    for doc in input {
        match get_path(&doc, path) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut expanded = doc.clone();
                    set_path(&mut expanded, path, item.clone());
                    out.push(expanded);
                }
            }
            Some(Value::Array(_)) | None => {
                if preserve_empty {
                    let mut kept = doc;
                    remove_path(&mut kept, path);
                    out.push(kept);
                }
            }
            Some(Value::Null) => {
                if preserve_empty {
                    out.push(doc);
                }
            }
            // A scalar behaves like a one-element array
            Some(_) => out.push(doc),
        }
    }

    out
}

fn replace_root(expr: &Expr, doc: &Document) -> Result<Document> {
    match eval_expr(expr, doc) {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(EngageError::Pipeline(format!(
            "$replaceRoot expects a document, got {}",
            other
        ))),
        None => Err(EngageError::Pipeline(
            "$replaceRoot expression resolved to a missing value".into(),
        )),
    }
}

/// Stable sort by the keys in order
fn sort(keys: &[SortKey], input: Vec<Document>) -> Vec<Document> {
    let mut keyed: Vec<(Vec<Value>, Document)> = input
        .into_iter()
        .map(|doc| {
            let values = keys
                .iter()
                .map(|k| resolve(&doc, &k.field).unwrap_or(Value::Null))
                .collect();
            (values, doc)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, key) in keys.iter().enumerate() {
            let ord = compare_values(&a[i], &b[i]);
            let ord = match key.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord.is_ne() {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });

    keyed.into_iter().map(|(_, doc)| doc).collect()
}

/// Emits nothing for an empty stream
fn count(field: &str, input: Vec<Document>) -> Result<Vec<Document>> {
    if field.is_empty() || field.starts_with('$') || field.contains('.') {
        return Err(EngageError::Pipeline(format!("invalid $count field '{}'", field)));
    }
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Document::new();
    out.insert(field.to_string(), Value::from(input.len() as u64));
    Ok(vec![out])
}
