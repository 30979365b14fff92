//! Declarative tree queries: a root subject, the edges to descend, and how
//! far, with attribute filters applied during traversal.
//!
//! A declaration is normalized into a per-predicate rule table before
//! execution: collecting an edge always follows it one hop, and
//! `upto_depth(n)` on the collection allows `n` further recursions through
//! that predicate. The root-level `upto_depth` is the budget for edges not
//! collected explicitly. Rules apply wherever their predicate occurs in the
//! graph, regardless of the parent's kind.

use std::collections::{HashMap, HashSet};

use crate::engine::Context;
use crate::error::{CrudError, Result};
use crate::model::is_reserved_predicate;

mod exec;
mod result;

pub use result::QueryResult;

/// A tree query rooted at one subject.
pub struct Query {
    kind: String,
    id: String,
    depth: u32,
    collects: Vec<Collect>,
}

/// One collected edge: its recursion depth, filters, and nested collections.
pub struct Collect {
    predicate: String,
    depth: Option<u32>,
    filter_out: Vec<String>,
    collects: Vec<Collect>,
}

impl Query {
    pub fn new(kind: &str, id: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            id: id.to_owned(),
            depth: 0,
            collects: Vec::new(),
        }
    }

    /// Default depth for edges without their own collection rule.
    /// `upto_depth(0)` (the default) returns only the root.
    pub fn upto_depth(&mut self, depth: u32) -> &mut Self {
        self.depth = depth;
        self
    }

    /// Declares an edge to descend during traversal.
    pub fn collect(&mut self, predicate: &str) -> &mut Collect {
        self.collects.push(Collect::new(predicate));
        self.collects.last_mut().expect("just pushed")
    }

    /// Runs the traversal and materializes the view tree.
    pub fn run(&self, ctx: &Context) -> Result<QueryResult> {
        let plan = self.normalize()?;
        exec::run(&plan, ctx)
    }

    fn normalize(&self) -> Result<Plan> {
        if self.kind.is_empty() || self.id.is_empty() {
            return Err(CrudError::Validation(
                "query root needs a non-empty kind and id".into(),
            ));
        }
        let mut rules = HashMap::new();
        collect_rules(&self.collects, self.depth, &mut rules)?;
        Ok(Plan {
            kind: self.kind.clone(),
            id: self.id.clone(),
            default_hops: self.depth,
            rules,
        })
    }
}

impl Collect {
    fn new(predicate: &str) -> Self {
        Self {
            predicate: predicate.to_owned(),
            depth: None,
            filter_out: Vec::new(),
            collects: Vec::new(),
        }
    }

    /// Allows `depth` recursions through this predicate beyond the first
    /// hop the collection itself grants.
    pub fn upto_depth(&mut self, depth: u32) -> &mut Self {
        self.depth = Some(depth);
        self
    }

    /// Omits entities whose latest value of `predicate` is truthy, without
    /// descending into them.
    pub fn filter_out(&mut self, predicate: &str) -> &mut Self {
        self.filter_out.push(predicate.to_owned());
        self
    }

    /// Declares a nested collection.
    pub fn collect(&mut self, predicate: &str) -> &mut Collect {
        self.collects.push(Collect::new(predicate));
        self.collects.last_mut().expect("just pushed")
    }
}

/// Normalized traversal spec.
#[derive(Debug)]
pub(crate) struct Plan {
    pub kind: String,
    pub id: String,
    /// Hop budget for predicates without a collection rule.
    pub default_hops: u32,
    pub rules: HashMap<String, EdgeRule>,
}

#[derive(Debug)]
pub(crate) struct EdgeRule {
    /// Maximum hops through this predicate: one for the collection itself
    /// plus its declared depth.
    pub hops: u32,
    pub filter_out: HashSet<String>,
}

fn collect_rules(
    collects: &[Collect],
    default_depth: u32,
    rules: &mut HashMap<String, EdgeRule>,
) -> Result<()> {
    for collect in collects {
        if collect.predicate.is_empty() {
            return Err(CrudError::Validation("collected predicate is empty".into()));
        }
        if is_reserved_predicate(&collect.predicate) {
            return Err(CrudError::Validation(format!(
                "cannot collect reserved predicate {}",
                collect.predicate
            )));
        }
        for filter in &collect.filter_out {
            if filter.is_empty() {
                return Err(CrudError::Validation("filter predicate is empty".into()));
            }
        }
        let hops = collect.depth.unwrap_or(default_depth).saturating_add(1);
        let entry = rules
            .entry(collect.predicate.clone())
            .or_insert_with(|| EdgeRule {
                hops: 0,
                filter_out: HashSet::new(),
            });
        entry.hops = entry.hops.max(hops);
        entry.filter_out.extend(collect.filter_out.iter().cloned());
        collect_rules(&collect.collects, default_depth, rules)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_grants_one_hop_plus_declared_depth() {
        let mut q = Query::new("User", "uid_a");
        q.collect("Post");
        q.collect("Comment").upto_depth(10).filter_out("censored");
        let plan = q.normalize().expect("normalize");
        assert_eq!(plan.default_hops, 0);
        assert_eq!(plan.rules["Post"].hops, 1);
        assert_eq!(plan.rules["Comment"].hops, 11);
        assert!(plan.rules["Comment"].filter_out.contains("censored"));
    }

    #[test]
    fn duplicate_collections_merge() {
        let mut q = Query::new("User", "uid_a");
        q.collect("Comment").upto_depth(2).filter_out("censored");
        q.collect("Comment").upto_depth(5).filter_out("flagged");
        let plan = q.normalize().expect("normalize");
        assert_eq!(plan.rules["Comment"].hops, 6);
        assert!(plan.rules["Comment"].filter_out.contains("censored"));
        assert!(plan.rules["Comment"].filter_out.contains("flagged"));
    }

    #[test]
    fn nested_collections_flatten_into_the_rule_table() {
        let mut q = Query::new("User", "uid_a");
        q.collect("Post").collect("Like").upto_depth(3);
        let plan = q.normalize().expect("normalize");
        assert_eq!(plan.rules["Post"].hops, 1);
        assert_eq!(plan.rules["Like"].hops, 4);
    }

    #[test]
    fn reserved_collections_are_rejected() {
        let mut q = Query::new("User", "uid_a");
        q.collect("_deleted_");
        let err = q.normalize().expect_err("reserved");
        assert!(matches!(err, CrudError::Validation(_)));
    }
}
