//! Named-set bookkeeping.
//!
//! Statements never point at each other; set references are resolved by
//! name against this index, built in one document-order pass.

use std::collections::{BTreeMap, HashSet};

use super::ast::{AroundCenter, DEFAULT_SET, Filter, Query, Statement, StatementKind};

/// Maps each set name to the top-level statements that bind it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetIndex {
    bindings: BTreeMap<String, Vec<usize>>,
    unresolved: Vec<String>,
}

impl SetIndex {
    pub fn build(query: &Query) -> Self {
        let mut index = SetIndex::default();
        let mut bound = HashSet::new();
        for (position, statement) in query.statements.iter().enumerate() {
            index.visit(statement, position, DEFAULT_SET, &mut bound);
        }
        index
    }

    /// Indices of the top-level statements binding `name`, in order.
    pub fn bindings(&self, name: &str) -> &[usize] {
        self.bindings.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Top-level statement holding the last binding of `name`.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.bindings(name).last().copied()
    }

    /// Names read before any statement bound them, in first-use order.
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    fn bind(&mut self, name: &str, position: usize, bound: &mut HashSet<String>) {
        bound.insert(name.to_string());
        let positions = self.bindings.entry(name.to_string()).or_default();
        if positions.last() != Some(&position) {
            positions.push(position);
        }
    }

    fn read(&mut self, name: &str, bound: &HashSet<String>) {
        if !bound.contains(name) && !self.unresolved.iter().any(|n| n == name) {
            self.unresolved.push(name.to_string());
        }
    }

    fn read_input(&mut self, input: &Option<String>, bound: &HashSet<String>) {
        self.read(input.as_deref().unwrap_or(DEFAULT_SET), bound);
    }

    fn visit(
        &mut self,
        statement: &Statement,
        position: usize,
        target: &str,
        bound: &mut HashSet<String>,
    ) {
        match &statement.kind {
            StatementKind::ElementQuery(query) => {
                for filter in &query.filters {
                    if let Some(name) = referenced_set(filter) {
                        self.read(name, bound);
                    }
                }
                self.bind(target, position, bound);
            }
            StatementKind::Union { body } => {
                for child in body {
                    self.visit(child, position, DEFAULT_SET, bound);
                }
                self.bind(target, position, bound);
            }
            StatementKind::Difference {
                minuend,
                subtrahend,
            } => {
                self.visit(minuend, position, DEFAULT_SET, bound);
                self.visit(subtrahend, position, DEFAULT_SET, bound);
                self.bind(target, position, bound);
            }
            StatementKind::Recurse { input, .. } => {
                self.read_input(input, bound);
                self.bind(target, position, bound);
            }
            StatementKind::SetAssignment { name, source } => {
                self.visit(source, position, name, bound);
            }
            StatementKind::SetReference { name } => {
                self.read(name, bound);
                self.bind(target, position, bound);
            }
            StatementKind::Out(out) => self.read_input(&out.input, bound),
            StatementKind::ForEach(block) | StatementKind::Complete(block) => {
                self.read_input(&block.input, bound);
                let var = block.name.as_deref().unwrap_or(DEFAULT_SET);
                self.bind(var, position, bound);
                for child in &block.body {
                    self.visit(child, position, DEFAULT_SET, bound);
                }
            }
        }
    }
}

/// Set read by a filter, if any.
pub(crate) fn referenced_set(filter: &Filter) -> Option<&str> {
    match filter {
        Filter::SetFilter { name } | Filter::Area { name } => Some(name),
        Filter::Around {
            center: AroundCenter::Set(name),
            ..
        } => Some(name),
        _ => None,
    }
}

impl Query {
    pub fn set_index(&self) -> SetIndex {
        SetIndex::build(self)
    }
}
