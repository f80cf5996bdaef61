//! Value helpers shared by filters and the pipeline executor
//!
//! Field paths are dot-separated. A path that crosses an array yields the
//! array of values found in its (object) elements.

use std::cmp::Ordering;

use serde_json::Value;

use super::Document;

/// Resolve a dotted path inside a document
pub fn resolve(doc: &Document, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let (head, rest) = segments.split_first()?;
    doc.get(*head).and_then(|v| resolve_segments(v, rest))
}

/// Resolve a dotted path inside an arbitrary value
pub fn resolve_value(value: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    resolve_segments(value, &segments)
}

fn resolve_segments(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Value::Object(map) => map.get(*head).and_then(|v| resolve_segments(v, rest)),
        Value::Array(items) => {
            let collected = items
                .iter()
                .filter(|item| item.is_object())
                .filter_map(|item| resolve_segments(item, segments))
                .collect();
            Some(Value::Array(collected))
        }
        _ => None,
    }
}

/// Borrow the value at a dotted path, following objects only
pub fn get_path<'d>(doc: &'d Document, path: &str) -> Option<&'d Value> {
    let mut segments = path.split('.');
    let first = doc.get(segments.next()?)?;
    segments.try_fold(first, |value, segment| value.as_object()?.get(segment))
}

fn parent_mut<'d, 'p>(doc: &'d mut Document, path: &'p str) -> Option<(&'d mut Document, &'p str)> {
    let Some((parent, leaf)) = path.rsplit_once('.') else {
        return Some((doc, path));
    };
    let mut segments = parent.split('.');
    let first = doc.get_mut(segments.next()?)?;
    let map = segments
        .try_fold(first, |value, segment| value.as_object_mut()?.get_mut(segment))?
        .as_object_mut()?;
    Some((map, leaf))
}

/// Replace the value at a dotted path. Missing parents are left alone.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    if let Some((map, leaf)) = parent_mut(doc, path) {
        map.insert(leaf.to_string(), value);
    }
}

/// Remove the value at a dotted path
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    let (map, leaf) = parent_mut(doc, path)?;
    map.remove(leaf)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values: null < number < string < object < array < bool
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Null, Value::Null) => Ordering::Equal,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Equality with numeric normalization (1 == 1.0)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Canonical string form used as a hash key for equality joins
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => format!("s:{}", s),
        Value::Number(n) => format!("n:{}", n.as_f64().unwrap_or(0.0)),
        other => format!("j:{}", other),
    }
}

/// Numeric accumulator that stays integral until a float is seen
#[derive(Debug, Clone, Copy)]
pub(crate) enum Total {
    Int(i64),
    Float(f64),
}

impl Default for Total {
    fn default() -> Self {
        Total::Int(0)
    }
}

impl Total {
    pub fn add(self, value: &Value) -> Total {
        let Value::Number(n) = value else {
            return self;
        };
        match (self, n.as_i64()) {
            (Total::Int(acc), Some(i)) => match acc.checked_add(i) {
                Some(sum) => Total::Int(sum),
                None => Total::Float(acc as f64 + i as f64),
            },
            (Total::Int(acc), None) => Total::Float(acc as f64 + n.as_f64().unwrap_or(0.0)),
            (Total::Float(acc), _) => Total::Float(acc + n.as_f64().unwrap_or(0.0)),
        }
    }

    /// Add a scalar, or every element of an array
    pub fn add_all(self, value: &Value) -> Total {
        match value {
            Value::Array(items) => items.iter().fold(self, |acc, v| acc.add(v)),
            other => self.add(other),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Total::Int(i) => Value::from(i),
            Total::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
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
    fn test_resolve_nested() {
        let d = doc(json!({"a": {"b": {"c": 3}}}));
        assert_eq!(resolve(&d, "a.b.c"), Some(json!(3)));
        assert_eq!(resolve(&d, "a.x"), None);
    }

    #[test]
    fn test_resolve_through_array() {
        let d = doc(json!({"videos": [{"views": 100}, {"views": 50}, {"title": "no views"}]}));
        assert_eq!(resolve(&d, "videos.views"), Some(json!([100, 50])));
    }

    #[test]
    fn test_resolve_empty_array() {
        let d = doc(json!({"videos": []}));
        assert_eq!(resolve(&d, "videos.views"), Some(json!([])));
    }

    #[test]
    fn test_nested_path_edits() {
        let mut d = doc(json!({"a": {"b": [1, 2]}, "c": 1}));
        assert_eq!(get_path(&d, "a.b"), Some(&json!([1, 2])));
        assert_eq!(get_path(&d, "c.x"), None);

        set_path(&mut d, "a.b", json!(1));
        assert_eq!(d["a"], json!({"b": 1}));
        // No parent object to write into
        set_path(&mut d, "x.y", json!(2));
        assert!(!d.contains_key("x"));

        assert_eq!(remove_path(&mut d, "a.b"), Some(json!(1)));
        assert_eq!(d["a"], json!({}));
        assert_eq!(remove_path(&mut d, "c"), Some(json!(1)));
    }

    #[test]
    fn test_compare_across_types() {
        assert_eq!(compare_values(&json!(null), &json!(1)), Ordering::Less);
        assert_eq!(compare_values(&json!(5), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }

    #[test]
    fn test_numeric_equality() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
        assert_eq!(value_key(&json!(1)), value_key(&json!(1.0)));
    }

    #[test]
    fn test_total_stays_integral() {
        let total = Total::default().add_all(&json!([3, 5]));
        assert_eq!(total.into_value(), json!(8));

        let mixed = Total::default().add(&json!(1)).add(&json!(0.5));
        assert_eq!(mixed.into_value(), json!(1.5));

        // Non-numeric values are ignored
        let skipped = Total::default().add(&json!("x")).add(&json!(null));
        assert_eq!(skipped.into_value(), json!(0));
    }
}
