//! Parser for aggregation documents
//!
//! Accepts the JSON shape used by document databases:
//!
//! ```text
//! [
//!   { "$match": { "video": "abc" } },
//!   { "$facet": {
//!       "totalCount": [ { "$count": "total" } ],
//!       "items": [ { "$skip": 10 }, { "$limit": 10 } ]
//!   } }
//! ]
//! ```

use serde_json::{Map, Value};

use crate::error::{EngageError, Result};
use crate::pipeline::types::*;
use crate::store::{Collection, Condition, Document, Filter};

fn invalid(msg: impl Into<String>) -> EngageError {
    EngageError::Validation(msg.into())
}

/// Parse a whole pipeline (a JSON array of single-key stage objects)
pub fn parse_pipeline(value: &Value) -> Result<Vec<Stage>> {
    let stages = value
        .as_array()
        .ok_or_else(|| invalid("pipeline must be an array of stages"))?;
    stages.iter().map(parse_stage).collect()
}

/// Parse one `{ "$op": spec }` object
pub fn parse_stage(value: &Value) -> Result<Stage> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("stage must be an object"))?;
    if obj.len() != 1 {
        return Err(invalid(format!("stage must have exactly one operator, found {}", obj.len())));
    }
    let (op, spec) = obj
        .iter()
        .next()
        .ok_or_else(|| invalid("empty stage"))?;

    match op.as_str() {
        "$documents" => parse_documents(spec),
        "$match" => Ok(Stage::Match(parse_filter(spec)?)),
        "$lookup" => parse_lookup(spec),
        "$group" => parse_group(spec),
        "$facet" => parse_facet(spec),
        "$project" => parse_project(spec),
        "$addFields" | "$set" => {
            let fields = as_object(spec, op)?
                .iter()
                .map(|(name, expr)| Ok((name.clone(), parse_expr(expr)?)))
                .collect::<Result<_>>()?;
            Ok(Stage::AddFields(fields))
        }
        "$unwind" => parse_unwind(spec),
        "$replaceRoot" => {
            let new_root = as_object(spec, op)?
                .get("newRoot")
                .ok_or_else(|| invalid("$replaceRoot requires newRoot"))?;
            Ok(Stage::ReplaceRoot(parse_expr(new_root)?))
        }
        "$sort" => parse_sort(spec),
        "$skip" => Ok(Stage::Skip(as_count(spec, op)?)),
        "$limit" => Ok(Stage::Limit(as_count(spec, op)?)),
        "$count" => {
            let field = spec
                .as_str()
                .ok_or_else(|| invalid("$count expects a field name"))?;
            Ok(Stage::count(field))
        }
        other => Err(invalid(format!("unsupported stage '{}'", other))),
    }
}

fn as_object<'v>(value: &'v Value, op: &str) -> Result<&'v Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| invalid(format!("{} expects an object", op)))
}

fn as_count(value: &Value, op: &str) -> Result<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| invalid(format!("{} expects a non-negative integer", op)))
}

fn as_str_field<'v>(obj: &'v Map<String, Value>, key: &str, op: &str) -> Result<&'v str> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("{} requires string field '{}'", op, key)))
}

/// `"$field"` -> field path
fn field_ref(value: &Value) -> Option<&str> {
    value.as_str().and_then(|s| s.strip_prefix('$'))
}

fn parse_documents(spec: &Value) -> Result<Stage> {
    let docs = spec
        .as_array()
        .ok_or_else(|| invalid("$documents expects an array"))?
        .iter()
        .map(|d| {
            d.as_object()
                .cloned()
                .ok_or_else(|| invalid("$documents entries must be objects"))
        })
        .collect::<Result<Vec<Document>>>()?;
    Ok(Stage::Documents(docs))
}

fn parse_lookup(spec: &Value) -> Result<Stage> {
    let obj = as_object(spec, "$lookup")?;
    let from: Collection = as_str_field(obj, "from", "$lookup")?.parse()?;
    let pipeline = match obj.get("pipeline") {
        Some(p) => parse_pipeline(p)?,
        None => Vec::new(),
    };
    Ok(Stage::lookup_with(
        from,
        as_str_field(obj, "localField", "$lookup")?,
        as_str_field(obj, "foreignField", "$lookup")?,
        as_str_field(obj, "as", "$lookup")?,
        pipeline,
    ))
}

fn parse_group(spec: &Value) -> Result<Stage> {
    let obj = as_object(spec, "$group")?;
    let key = obj
        .get("_id")
        .ok_or_else(|| invalid("$group requires _id"))?;

    let mut accumulators = Vec::new();
    for (name, acc) in obj.iter().filter(|(k, _)| k.as_str() != "_id") {
        let acc_obj = as_object(acc, "accumulator")?;
        let (op, arg) = acc_obj
            .iter()
            .next()
            .filter(|_| acc_obj.len() == 1)
            .ok_or_else(|| invalid(format!("accumulator '{}' needs exactly one operator", name)))?;
        let parsed = match op.as_str() {
            "$sum" => Accumulator::Sum(parse_expr(arg)?),
            "$count" => Accumulator::Count,
            "$first" => Accumulator::First(parse_expr(arg)?),
            "$push" => Accumulator::Push(parse_expr(arg)?),
            other => return Err(invalid(format!("unsupported accumulator '{}'", other))),
        };
        accumulators.push((name.clone(), parsed));
    }

    Ok(Stage::Group(Group { key: parse_expr(key)?, accumulators }))
}

fn parse_facet(spec: &Value) -> Result<Stage> {
    let branches = as_object(spec, "$facet")?
        .iter()
        .map(|(name, stages)| Ok((name.clone(), parse_pipeline(stages)?)))
        .collect::<Result<Vec<_>>>()?;
    if branches.is_empty() {
        return Err(invalid("$facet requires at least one branch"));
    }
    Ok(Stage::Facet(branches))
}

fn parse_project(spec: &Value) -> Result<Stage> {
    let fields = as_object(spec, "$project")?
        .iter()
        .map(|(name, p)| {
            let projection = match p {
                Value::Bool(true) => Projection::Include,
                Value::Bool(false) => Projection::Exclude,
                Value::Number(n) if n.as_f64() == Some(0.0) => Projection::Exclude,
                Value::Number(_) => Projection::Include,
                other => Projection::Computed(parse_expr(other)?),
            };
            Ok((name.clone(), projection))
        })
        .collect::<Result<_>>()?;
    Ok(Stage::Project(fields))
}

fn parse_unwind(spec: &Value) -> Result<Stage> {
    let (path, preserve_empty) = match spec {
        Value::String(_) => (field_ref(spec), false),
        Value::Object(obj) => (
            obj.get("path").and_then(field_ref),
            obj.get("preserveNullAndEmptyArrays")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        _ => (None, false),
    };
    let path = path.ok_or_else(|| invalid("$unwind path must be a '$field' reference"))?;
    Ok(Stage::Unwind { path: path.to_string(), preserve_empty })
}

fn parse_sort(spec: &Value) -> Result<Stage> {
    let keys = as_object(spec, "$sort")?
        .iter()
        .map(|(field, dir)| match dir.as_i64() {
            Some(1) => Ok(SortKey::asc(field)),
            Some(-1) => Ok(SortKey::desc(field)),
            _ => Err(invalid(format!("sort direction for '{}' must be 1 or -1", field))),
        })
        .collect::<Result<Vec<_>>>()?;
    if keys.is_empty() {
        return Err(invalid("$sort requires at least one key"));
    }
    Ok(Stage::Sort(keys))
}

/// Parse an expression
///
/// Strings starting with `$` are field paths; single-key objects whose key
/// is a known operator are operator calls; anything else is a literal.
pub fn parse_expr(value: &Value) -> Result<Expr> {
    if let Some(path) = field_ref(value) {
        return Ok(Expr::field(path));
    }

    let Some(obj) = value.as_object() else {
        return Ok(Expr::Literal(value.clone()));
    };
    let Some((op, arg)) = obj.iter().next().filter(|_| obj.len() == 1) else {
        return Ok(Expr::Literal(value.clone()));
    };

    match op.as_str() {
        "$size" => Ok(Expr::size(parse_expr(arg)?)),
        "$sum" => Ok(Expr::sum(parse_expr(arg)?)),
        "$not" => Ok(Expr::not(parse_expr(unwrap_single(arg))?)),
        "$first" => Ok(Expr::first(parse_expr(arg)?)),
        "$ifNull" => {
            let args = arg
                .as_array()
                .filter(|a| a.len() == 2)
                .ok_or_else(|| invalid("$ifNull expects [expr, default]"))?;
            Ok(Expr::if_null(parse_expr(&args[0])?, parse_expr(&args[1])?))
        }
        "$literal" => Ok(Expr::Literal(arg.clone())),
        other if other.starts_with('$') => Err(invalid(format!("unsupported operator '{}'", other))),
        _ => Ok(Expr::Literal(value.clone())),
    }
}

/// `{"$not": ["$x"]}` and `{"$not": "$x"}` are equivalent
fn unwrap_single(arg: &Value) -> &Value {
    match arg {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}

/// Parse a match filter
pub fn parse_filter(value: &Value) -> Result<Filter> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("filter must be an object"))?;
    let mut filter = Filter::new();

    for (field, spec) in obj {
        if field == "$text" {
            let search = spec
                .get("$search")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("$text requires $search"))?;
            filter = filter.text(search);
            continue;
        }
        if field.starts_with('$') {
            return Err(invalid(format!("unsupported filter operator '{}'", field)));
        }

        match spec {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                for (op, arg) in ops {
                    filter = filter.with(field.clone(), parse_condition(op, arg)?);
                }
            }
            other => filter = filter.with(field.clone(), Condition::Eq(other.clone())),
        }
    }

    Ok(filter)
}

fn parse_condition(op: &str, arg: &Value) -> Result<Condition> {
    Ok(match op {
        "$eq" => Condition::Eq(arg.clone()),
        "$ne" => Condition::Ne(arg.clone()),
        "$gt" => Condition::Gt(arg.clone()),
        "$gte" => Condition::Gte(arg.clone()),
        "$lt" => Condition::Lt(arg.clone()),
        "$lte" => Condition::Lte(arg.clone()),
        "$in" => Condition::In(
            arg.as_array()
                .cloned()
                .ok_or_else(|| invalid("$in expects an array"))?,
        ),
        "$exists" => Condition::Exists(
            arg.as_bool()
                .ok_or_else(|| invalid("$exists expects a boolean"))?,
        ),
        other => return Err(invalid(format!("unsupported condition '{}'", other))),
    })
}
