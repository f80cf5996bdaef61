//! Core pipeline types: Expr, Accumulator, Projection, Stage

use serde_json::Value;

use crate::store::{Collection, Document, Filter};

/// A computed value over the current document
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Field path, e.g. `videos.views`
    Field(String),
    /// Constant value
    Literal(Value),
    /// Length of an array (0 for anything else)
    Size(Box<Expr>),
    /// Sum of an array's numeric elements, or the value itself if numeric
    Sum(Box<Expr>),
    /// First expression unless it is null or missing
    IfNull(Box<Expr>, Box<Expr>),
    /// Boolean negation (null and missing count as false)
    Not(Box<Expr>),
    /// First element of an array
    First(Box<Expr>),
}

impl Expr {
    pub fn field(path: &str) -> Self {
        Expr::Field(path.to_string())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn size(inner: Expr) -> Self {
        Expr::Size(Box::new(inner))
    }

    pub fn sum(inner: Expr) -> Self {
        Expr::Sum(Box::new(inner))
    }

    pub fn if_null(inner: Expr, default: Expr) -> Self {
        Expr::IfNull(Box::new(inner), Box::new(default))
    }

    pub fn not(inner: Expr) -> Self {
        Expr::Not(Box::new(inner))
    }

    pub fn first(inner: Expr) -> Self {
        Expr::First(Box::new(inner))
    }
}

/// Group accumulator
#[derive(Clone, Debug, PartialEq)]
pub enum Accumulator {
    Sum(Expr),
    Count,
    First(Expr),
    Push(Expr),
}

/// Field specification inside a Project stage
#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    Include,
    Exclude,
    Computed(Expr),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        SortKey { field: field.to_string(), direction: SortDirection::Ascending }
    }

    pub fn desc(field: &str) -> Self {
        SortKey { field: field.to_string(), direction: SortDirection::Descending }
    }
}

/// Left-outer join against another collection
#[derive(Clone, Debug, PartialEq)]
pub struct Lookup {
    pub from: Collection,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
    /// Run on each document's matched set
    pub pipeline: Vec<Stage>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub key: Expr,
    pub accumulators: Vec<(String, Accumulator)>,
}

/// One step of a pipeline
#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    /// Replace the stream with literal documents
    Documents(Vec<Document>),
    Match(Filter),
    Lookup(Lookup),
    Group(Group),
    /// Named branches, each run against the same input
    Facet(Vec<(String, Vec<Stage>)>),
    Project(Vec<(String, Projection)>),
    AddFields(Vec<(String, Expr)>),
    Unwind { path: String, preserve_empty: bool },
    ReplaceRoot(Expr),
    Sort(Vec<SortKey>),
    Skip(usize),
    Limit(usize),
    Count(String),
}

impl Stage {
    pub fn lookup(from: Collection, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        Stage::Lookup(Lookup {
            from,
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
            pipeline: Vec::new(),
        })
    }

    /// Lookup whose matched set is refined by `pipeline`
    pub fn lookup_with(
        from: Collection,
        local_field: &str,
        foreign_field: &str,
        as_field: &str,
        pipeline: Vec<Stage>,
    ) -> Self {
        Stage::Lookup(Lookup {
            from,
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
            pipeline,
        })
    }

    /// Unwind that drops documents whose array is empty or missing
    pub fn unwind(path: &str) -> Self {
        Stage::Unwind { path: path.to_string(), preserve_empty: false }
    }

    /// Unwind that keeps documents whose array is empty or missing
    pub fn unwind_preserving(path: &str) -> Self {
        Stage::Unwind { path: path.to_string(), preserve_empty: true }
    }

    pub fn group(key: Expr, accumulators: Vec<(&str, Accumulator)>) -> Self {
        Stage::Group(Group {
            key,
            accumulators: accumulators
                .into_iter()
                .map(|(name, acc)| (name.to_string(), acc))
                .collect(),
        })
    }

    pub fn facet(branches: Vec<(&str, Vec<Stage>)>) -> Self {
        Stage::Facet(
            branches
                .into_iter()
                .map(|(name, stages)| (name.to_string(), stages))
                .collect(),
        )
    }

    pub fn project(fields: Vec<(&str, Projection)>) -> Self {
        Stage::Project(fields.into_iter().map(|(f, p)| (f.to_string(), p)).collect())
    }

    pub fn add_fields(fields: Vec<(&str, Expr)>) -> Self {
        Stage::AddFields(fields.into_iter().map(|(f, e)| (f.to_string(), e)).collect())
    }

    pub fn replace_root(path: &str) -> Self {
        Stage::ReplaceRoot(Expr::field(path))
    }

    pub fn count(field: &str) -> Self {
        Stage::Count(field.to_string())
    }

    /// Stage name as used in aggregation documents
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Documents(_) => "$documents",
            Stage::Match(_) => "$match",
            Stage::Lookup(_) => "$lookup",
            Stage::Group(_) => "$group",
            Stage::Facet(_) => "$facet",
            Stage::Project(_) => "$project",
            Stage::AddFields(_) => "$addFields",
            Stage::Unwind { .. } => "$unwind",
            Stage::ReplaceRoot(_) => "$replaceRoot",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Count(_) => "$count",
        }
    }
}
