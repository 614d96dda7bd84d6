//! Selector extraction and tag matching.
//!
//! A [`SelectorSet`] is the conjunction of the filters of one element query.
//! Matching is tag-only: geometry and set-membership filters are always
//! considered satisfied against a bare tag mapping.

use std::collections::HashMap;

use super::ast::{ElementQuery, Filter, Query, Statement, StatementKind};
use crate::error::{Error, Result};

/// Ordered filters of one element query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorSet<'a> {
    filters: &'a [Filter],
}

/// Result of evaluating one filter against a tag mapping.
enum Outcome {
    Matched(Vec<String>),
    Failed,
    /// Geometry or set-membership filter; no bearing on tags.
    NotApplicable,
}

impl<'a> SelectorSet<'a> {
    pub fn new(filters: &'a [Filter]) -> Self {
        SelectorSet { filters }
    }

    pub fn filters(&self) -> &'a [Filter] {
        self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Literal tag keys referenced, in order of first appearance.
    pub fn keys(&self) -> Vec<&'a str> {
        let mut keys: Vec<&str> = Vec::new();
        for key in self.filters.iter().filter_map(Filter::key) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Evaluate against `tags`. `None` means at least one filter failed;
    /// `Some(keys)` lists, in filter order, the keys of the tag filters that
    /// matched. A set without tag filters matches with no keys.
    pub fn matches(&self, tags: &HashMap<String, String>) -> Option<Vec<String>> {
        let mut matched = Vec::new();
        for filter in self.filters {
            match evaluate(filter, tags) {
                Outcome::Matched(keys) => matched.extend(keys),
                Outcome::Failed => return None,
                Outcome::NotApplicable => {}
            }
        }
        Some(matched)
    }

    pub fn is_match(&self, tags: &HashMap<String, String>) -> bool {
        self.matches(tags).is_some()
    }

    pub fn to_overpass(&self) -> String {
        self.to_string()
    }
}

fn evaluate(filter: &Filter, tags: &HashMap<String, String>) -> Outcome {
    let single = |ok: bool, key: &str| {
        if ok {
            Outcome::Matched(vec![key.to_string()])
        } else {
            Outcome::Failed
        }
    };

    match filter {
        Filter::TagExists { key } => single(tags.contains_key(key), key),
        Filter::TagNotExists { key } => single(!tags.contains_key(key), key),
        Filter::TagEquals { key, value } => single(tags.get(key) == Some(value), key),
        Filter::TagNotEquals { key, value } => single(tags.get(key) != Some(value), key),
        Filter::TagRegex { key, pattern } => single(
            tags.get(key).is_some_and(|actual| pattern.is_match(actual)),
            key,
        ),
        Filter::TagNotRegex { key, pattern } => single(
            !tags.get(key).is_some_and(|actual| pattern.is_match(actual)),
            key,
        ),
        Filter::KeyRegex { key, value } => {
            let mut keys: Vec<String> = tags
                .iter()
                .filter(|(k, v)| key.is_match(k) && value.is_match(v))
                .map(|(k, _)| k.clone())
                .collect();
            if keys.is_empty() {
                return Outcome::Failed;
            }
            keys.sort();
            Outcome::Matched(keys)
        }
        Filter::BoundingBox(_)
        | Filter::Around { .. }
        | Filter::Polygon { .. }
        | Filter::IdList { .. }
        | Filter::SetFilter { .. }
        | Filter::Area { .. } => Outcome::NotApplicable,
    }
}

/// Depth-first, document-order walk collecting element queries.
fn collect_element_queries<'a>(statements: &'a [Statement], out: &mut Vec<&'a ElementQuery>) {
    for statement in statements {
        collect_from(statement, out);
    }
}

fn collect_from<'a>(statement: &'a Statement, out: &mut Vec<&'a ElementQuery>) {
    match &statement.kind {
        StatementKind::ElementQuery(query) => out.push(query),
        StatementKind::Union { body } => collect_element_queries(body, out),
        StatementKind::Difference {
            minuend,
            subtrahend,
        } => {
            collect_from(minuend, out);
            collect_from(subtrahend, out);
        }
        StatementKind::SetAssignment { source, .. } => collect_from(source, out),
        StatementKind::ForEach(block) | StatementKind::Complete(block) => {
            collect_element_queries(&block.body, out)
        }
        StatementKind::Recurse { .. }
        | StatementKind::SetReference { .. }
        | StatementKind::Out(_) => {}
    }
}

impl Query {
    /// Every element query in document order, nested ones included.
    pub fn element_queries(&self) -> Vec<&ElementQuery> {
        let mut out = Vec::new();
        collect_element_queries(&self.statements, &mut out);
        out
    }

    /// Selectors of the first element query in document order.
    pub fn first_selectors(&self) -> Result<SelectorSet<'_>> {
        self.element_queries()
            .into_iter()
            .next()
            .map(|q| SelectorSet::new(&q.filters))
            .ok_or(Error::NotFound)
    }

    /// One selector set per element query, in document order, without
    /// deduplication.
    pub fn all_selectors(&self) -> Vec<SelectorSet<'_>> {
        self.element_queries()
            .into_iter()
            .map(|q| SelectorSet::new(&q.filters))
            .collect()
    }
}
