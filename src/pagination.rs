//! Pagination planner
//!
//! Turns a 1-based page number and a page size into a skip/limit window.

use serde::{Deserialize, Serialize};

use crate::error::{EngageError, Result};
use crate::pipeline::Stage;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// Requested page, as received from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    DEFAULT_PAGE
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest { page: DEFAULT_PAGE, page_size: DEFAULT_PAGE_SIZE }
    }
}

/// Leading integer of a query value, the way lenient query parsers read
/// "2", " 3 " or "4abc"
fn parse_lenient(raw: &str) -> Option<i64> {
    let s = raw.trim();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64) -> Self {
        PageRequest { page, page_size }
    }

    /// Build from raw query strings. Absent or non-numeric values fall back
    /// to the defaults; zero and negative numbers are kept so that
    /// [`PageRequest::plan`] rejects them.
    pub fn from_query(page: Option<&str>, limit: Option<&str>) -> Self {
        PageRequest {
            page: page.and_then(parse_lenient).unwrap_or(DEFAULT_PAGE),
            page_size: limit.and_then(parse_lenient).unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }

    pub fn plan(&self) -> Result<Window> {
        plan(self.page, self.page_size)
    }
}

/// Skip/limit window over a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub offset: usize,
    pub count: usize,
}

impl Window {
    /// `[Skip(offset), Limit(count)]`
    pub fn stages(&self) -> Vec<Stage> {
        vec![Stage::Skip(self.offset), Stage::Limit(self.count)]
    }
}

/// `offset = (page - 1) * page_size`, `count = page_size`
pub fn plan(page: i64, page_size: i64) -> Result<Window> {
    if page < 1 {
        return Err(EngageError::validation(format!("page must be >= 1, got {}", page)));
    }
    if page_size < 1 {
        return Err(EngageError::validation(format!("page size must be >= 1, got {}", page_size)));
    }

    let count = usize::try_from(page_size)
        .map_err(|_| EngageError::validation("page size out of range"))?;
    let offset = usize::try_from(page - 1)
        .ok()
        .and_then(|p| p.checked_mul(count))
        .ok_or_else(|| EngageError::validation("page offset out of range"))?;

    Ok(Window { offset, count })
}
