//! Document predicates and update operators

use serde_json::Value;

use super::value::{compare_values, resolve, values_equal};
use super::Document;
use crate::error::{EngageError, Result};

/// Condition applied to one field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Exists(bool),
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => eq_matches(field, expected),
            Condition::Ne(expected) => !eq_matches(field, expected),
            Condition::In(options) => options.iter().any(|o| eq_matches(field, o)),
            Condition::Exists(wanted) => field.is_some() == *wanted,
            Condition::Gt(bound) => range_matches(field, bound, |o| o.is_gt()),
            Condition::Gte(bound) => range_matches(field, bound, |o| o.is_ge()),
            Condition::Lt(bound) => range_matches(field, bound, |o| o.is_lt()),
            Condition::Lte(bound) => range_matches(field, bound, |o| o.is_le()),
        }
    }
}

fn eq_matches(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(value) => {
            if values_equal(value, expected) {
                return true;
            }
            match value {
                Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
                _ => false,
            }
        }
    }
}

fn range_matches(field: Option<&Value>, bound: &Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    let same_bracket = |v: &Value| std::mem::discriminant(v) == std::mem::discriminant(bound);
    match field {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| same_bracket(item) && accept(compare_values(item, bound))),
        Some(value) => same_bracket(value) && accept(compare_values(value, bound)),
        None => false,
    }
}

/// Conjunction of field conditions with an optional text search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Condition)>,
    text: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a single document by `_id`
    pub fn by_id(id: impl Into<String>) -> Self {
        let id: String = id.into();
        Self::new().eq("_id", id)
    }

    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push((field.into(), condition));
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Eq(value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Ne(value.into()))
    }

    pub fn exists(self, field: impl Into<String>, wanted: bool) -> Self {
        self.with(field, Condition::Exists(wanted))
    }

    pub fn is_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.with(field, Condition::In(values))
    }

    /// Case-insensitive term search over top-level string fields
    pub fn text(mut self, query: impl Into<String>) -> Self {
        self.text = Some(query.into());
        self
    }

    pub fn clauses(&self) -> &[(String, Condition)] {
        &self.clauses
    }

    pub fn text_query(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.text.is_none()
    }

    /// Equality value for `field`, if the filter pins one
    pub fn pinned(&self, field: &str) -> Option<&Value> {
        self.clauses.iter().find_map(|(f, c)| match c {
            Condition::Eq(v) if f == field => Some(v),
            _ => None,
        })
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let fields_ok = self.clauses.iter().all(|(field, condition)| {
            let value = resolve(doc, field);
            condition.matches(value.as_ref())
        });
        fields_ok && self.text.as_deref().map_or(true, |q| text_matches(doc, q))
    }
}

fn text_matches(doc: &Document, query: &str) -> bool {
    let terms: Vec<String> = query.split_whitespace().map(|t| t.to_lowercase()).collect();
    if terms.is_empty() {
        return true;
    }
    doc.values().any(|value| match value {
        Value::String(s) => {
            let haystack = s.to_lowercase();
            terms.iter().any(|t| haystack.contains(t.as_str()))
        }
        _ => false,
    })
}

/// Single update operator
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    Inc(String, i64),
    /// Boolean negation; a missing field becomes `true`
    Toggle(String),
    AddToSet(String, Value),
    Pull(String, Value),
}

impl UpdateOp {
    fn field(&self) -> &str {
        match self {
            UpdateOp::Set(f, _)
            | UpdateOp::Unset(f)
            | UpdateOp::Inc(f, _)
            | UpdateOp::Toggle(f)
            | UpdateOp::AddToSet(f, _)
            | UpdateOp::Pull(f, _) => f,
        }
    }
}

/// Ordered list of update operators applied to one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(field.into()));
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.ops.push(UpdateOp::Inc(field.into(), by));
        self
    }

    pub fn toggle(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Toggle(field.into()));
        self
    }

    pub fn add_to_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::AddToSet(field.into(), value.into()));
        self
    }

    pub fn pull(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Pull(field.into(), value.into()));
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Check the operators before touching any document
    pub fn validate(&self) -> Result<()> {
        if self.ops.is_empty() {
            return Err(EngageError::validation("update has no operators"));
        }
        for op in &self.ops {
            let field = op.field();
            if field.is_empty() {
                return Err(EngageError::validation("update field name is empty"));
            }
            if field == "_id" {
                return Err(EngageError::validation("_id is immutable"));
            }
        }
        Ok(())
    }

    /// Apply all operators in order. The document is left untouched on error.
    pub fn apply(&self, doc: &Document) -> Result<Document> {
        self.validate()?;
        let mut next = doc.clone();

        for op in &self.ops {
            match op {
                UpdateOp::Set(field, value) => {
                    next.insert(field.clone(), value.clone());
                }
                UpdateOp::Unset(field) => {
                    next.remove(field);
                }
                UpdateOp::Inc(field, by) => {
                    let value = match next.get(field) {
                        None | Some(Value::Null) => Value::from(*by),
                        Some(Value::Number(n)) => match n.as_i64() {
                            Some(i) => Value::from(i.saturating_add(*by)),
                            None => Value::from(n.as_f64().unwrap_or(0.0) + *by as f64),
                        },
                        Some(_) => {
                            return Err(EngageError::validation(format!(
                                "cannot increment non-numeric field '{}'",
                                field
                            )))
                        }
                    };
                    next.insert(field.clone(), value);
                }
                UpdateOp::Toggle(field) => {
                    let value = match next.get(field) {
                        None | Some(Value::Null) => true,
                        Some(Value::Bool(b)) => !b,
                        Some(_) => {
                            return Err(EngageError::validation(format!(
                                "cannot toggle non-boolean field '{}'",
                                field
                            )))
                        }
                    };
                    next.insert(field.clone(), Value::Bool(value));
                }
                UpdateOp::AddToSet(field, value) => {
                    let slot = next.entry(field.clone()).or_insert(Value::Null);
                    if slot.is_null() {
                        *slot = Value::Array(Vec::new());
                    }
                    match slot {
                        Value::Array(items) => {
                            if !items.iter().any(|item| values_equal(item, value)) {
                                items.push(value.clone());
                            }
                        }
                        _ => {
                            return Err(EngageError::validation(format!(
                                "field '{}' is not an array",
                                field
                            )))
                        }
                    }
                }
                UpdateOp::Pull(field, value) => {
                    if let Some(Value::Array(items)) = next.get_mut(field) {
                        items.retain(|item| !values_equal(item, value));
                    }
                }
            }
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_eq_and_exists() {
        let like = doc(json!({"_id": "1", "likedBy": "u1", "video": "v1"}));

        assert!(Filter::new().eq("video", "v1").matches(&like));
        assert!(!Filter::new().eq("video", "v2").matches(&like));
        assert!(Filter::new().exists("video", true).exists("tweet", false).matches(&like));
        assert!(Filter::new().matches(&like));
    }

    #[test]
    fn test_eq_matches_array_element() {
        let playlist = doc(json!({"videos": ["v1", "v2"]}));
        assert!(Filter::new().eq("videos", "v2").matches(&playlist));
        assert!(!Filter::new().eq("videos", "v3").matches(&playlist));
    }

    #[test]
    fn test_eq_null_matches_missing() {
        let d = doc(json!({"a": 1}));
        assert!(Filter::new().eq("b", Value::Null).matches(&d));
        assert!(Filter::new().ne("b", 1).matches(&d));
    }

    #[test]
    fn test_range_respects_type_bracket() {
        let d = doc(json!({"views": 100, "title": "zzz"}));
        assert!(Filter::new().with("views", Condition::Gte(json!(100))).matches(&d));
        assert!(!Filter::new().with("views", Condition::Gt(json!(100))).matches(&d));
        // A string is never "less than" a number bound
        assert!(!Filter::new().with("title", Condition::Lt(json!(5))).matches(&d));
    }

    #[test]
    fn test_in() {
        let d = doc(json!({"targetKind": "tweet"}));
        let f = Filter::new().is_in("targetKind", vec![json!("video"), json!("tweet")]);
        assert!(f.matches(&d));
    }

    #[test]
    fn test_text_search() {
        let d = doc(json!({"title": "Rust Ownership Explained", "description": "borrowck", "views": 1}));
        assert!(Filter::new().text("ownership").matches(&d));
        assert!(Filter::new().text("python BORROWCK").matches(&d));
        assert!(!Filter::new().text("python").matches(&d));
    }

    #[test]
    fn test_pinned() {
        let f = Filter::new().eq("likedBy", "u1").exists("video", true);
        assert_eq!(f.pinned("likedBy"), Some(&json!("u1")));
        assert_eq!(f.pinned("video"), None);
    }

    #[test]
    fn test_update_operators() {
        let video = doc(json!({"_id": "v1", "views": 10, "isPublished": true}));
        let next = Update::new()
            .inc("views", 1)
            .toggle("isPublished")
            .set("title", "new")
            .apply(&video)
            .unwrap();

        assert_eq!(next["views"], json!(11));
        assert_eq!(next["isPublished"], json!(false));
        assert_eq!(next["title"], json!("new"));
        // Input untouched
        assert_eq!(video["views"], json!(10));
    }

    #[test]
    fn test_add_to_set_and_pull() {
        let playlist = doc(json!({"_id": "p1"}));
        let once = Update::new().add_to_set("videos", "v1").apply(&playlist).unwrap();
        let twice = Update::new().add_to_set("videos", "v1").apply(&once).unwrap();
        assert_eq!(twice["videos"], json!(["v1"]));

        let pulled = Update::new().pull("videos", "v1").apply(&twice).unwrap();
        assert_eq!(pulled["videos"], json!([]));
    }

    #[test]
    fn test_update_rejects_id_and_bad_types() {
        let d = doc(json!({"_id": "x", "title": "t"}));
        assert!(Update::new().set("_id", "y").apply(&d).is_err());
        assert!(Update::new().inc("title", 1).apply(&d).is_err());
        assert!(Update::new().toggle("title").apply(&d).is_err());
        assert!(Update::new().apply(&d).is_err());
    }
}
