//! Write builder: a grouped mutation batch rooted at one subject.
//!
//! The builder tree is an arena of staged nodes indexed by integer; handles
//! ([`NodeRef`]) borrow the batch mutably, so builders cannot be shared
//! across threads. Staging problems (reserved or empty predicates) are
//! deferred and surfaced by `execute`, keeping the fluent chain tidy.

use crate::engine::Context;
use crate::error::{CrudError, Result};
use crate::id;
use crate::model::{is_reserved_predicate, Record, Value, DELETED_PREDICATE};

/// Opens a batch rooted at `(kind, id)` in append-or-create mode.
pub fn get(kind: &str, id: &str) -> Batch {
    Batch::new(kind, id, false)
}

/// Opens a batch that asserts the root is new; `execute` fails with
/// [`CrudError::Collision`] if the subject already has mutations.
pub fn create(kind: &str, id: &str) -> Batch {
    Batch::new(kind, id, true)
}

struct StagedNode {
    kind: String,
    id: String,
    source: Option<String>,
    parent: Option<usize>,
    sets: Vec<(String, Value)>,
    children: Vec<usize>,
    deleted: bool,
}

/// A pending commit batch: the root subject plus any minted child subtree.
/// Mutable until `execute`, discarded afterwards.
pub struct Batch {
    nodes: Vec<StagedNode>,
    assert_new: bool,
    staging_error: Option<String>,
}

impl Batch {
    fn new(kind: &str, id: &str, assert_new: bool) -> Self {
        let mut batch = Self {
            nodes: vec![StagedNode {
                kind: kind.to_owned(),
                id: id.to_owned(),
                source: None,
                parent: None,
                sets: Vec::new(),
                children: Vec::new(),
                deleted: false,
            }],
            assert_new,
            staging_error: None,
        };
        if kind.is_empty() || id.is_empty() {
            batch.fail("root subject needs a non-empty kind and id");
        }
        batch
    }

    /// Handle to the root node.
    pub fn root(&mut self) -> NodeRef<'_> {
        NodeRef { batch: self, idx: 0 }
    }

    /// Root subject id.
    pub fn id(&self) -> &str {
        &self.nodes[0].id
    }

    /// Sets the commit source for the root subtree.
    pub fn set_source(&mut self, source: &str) -> &mut Self {
        self.nodes[0].source = Some(source.to_owned());
        self
    }

    /// Stages a scalar mutation on the root; the last staged value per
    /// predicate wins at commit.
    pub fn set(&mut self, predicate: &str, value: impl Into<Value>) -> &mut Self {
        self.stage_set(0, predicate, value.into());
        self
    }

    /// Mints a child subject and stages the object-ref edge on the root.
    /// The child kind is the predicate.
    pub fn add_child(&mut self, predicate: &str) -> NodeRef<'_> {
        let idx = self.stage_child(0, predicate);
        NodeRef { batch: self, idx }
    }

    /// Stages a tombstone for the root subject.
    pub fn mark_deleted(&mut self) -> &mut Self {
        self.nodes[0].deleted = true;
        self
    }

    /// Validates the batch, flattens it depth-first, and commits it through
    /// the engine as one atomic adapter batch.
    pub fn execute(&self, ctx: &Context) -> Result<()> {
        ctx.check_deadline()?;
        if let Some(problem) = &self.staging_error {
            return Err(CrudError::Validation(problem.clone()));
        }
        let records = self.flatten()?;
        if records.is_empty() {
            return Err(CrudError::Validation("batch stages no mutations".into()));
        }
        if self.assert_new && !ctx.store().is_new(&self.nodes[0].kind, &self.nodes[0].id)? {
            return Err(CrudError::Collision {
                kind: self.nodes[0].kind.clone(),
                id: self.nodes[0].id.clone(),
            });
        }
        ctx.commit_batch(records)
    }

    fn fail(&mut self, problem: &str) {
        if self.staging_error.is_none() {
            self.staging_error = Some(problem.to_owned());
        }
    }

    fn stage_set(&mut self, idx: usize, predicate: &str, value: Value) {
        if predicate.is_empty() {
            self.fail("predicate must be non-empty");
            return;
        }
        if is_reserved_predicate(predicate) {
            self.fail("predicates starting with '_' are reserved");
            return;
        }
        let node = &mut self.nodes[idx];
        match node.sets.iter_mut().find(|(name, _)| name == predicate) {
            Some(slot) => slot.1 = value,
            None => node.sets.push((predicate.to_owned(), value)),
        }
    }

    fn stage_child(&mut self, parent: usize, predicate: &str) -> usize {
        if predicate.is_empty() {
            self.fail("child predicate must be non-empty");
        } else if is_reserved_predicate(predicate) {
            self.fail("predicates starting with '_' are reserved");
        }
        let idx = self.nodes.len();
        self.nodes.push(StagedNode {
            kind: predicate.to_owned(),
            id: id::mint(predicate),
            source: None,
            parent: Some(parent),
            sets: Vec::new(),
            children: Vec::new(),
            deleted: false,
        });
        self.nodes[parent].children.push(idx);
        idx
    }

    /// Source of a node, inherited from the nearest ancestor that set one.
    fn effective_source(&self, idx: usize) -> Option<&str> {
        let mut cursor = Some(idx);
        while let Some(i) = cursor {
            let node = &self.nodes[i];
            if let Some(source) = node.source.as_deref() {
                return Some(source);
            }
            cursor = node.parent;
        }
        None
    }

    /// Depth-first flatten: a node's scalars, its tombstone, then per child
    /// the edge record followed by the child subtree. `nanotime` and `seq`
    /// are stamped by the engine at commit.
    fn flatten(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        self.flatten_node(0, &mut records)?;
        Ok(records)
    }

    fn flatten_node(&self, idx: usize, out: &mut Vec<Record>) -> Result<()> {
        let node = &self.nodes[idx];
        let source = self
            .effective_source(idx)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CrudError::Validation(format!(
                    "subject {}/{} has no source; call set_source before execute",
                    node.kind, node.id
                ))
            })?;

        for (predicate, value) in &node.sets {
            out.push(self.record(node, predicate, value.clone(), source));
        }
        if node.deleted {
            out.push(self.record(node, DELETED_PREDICATE, Value::Tombstone, source));
        }
        for &child in &node.children {
            let child_node = &self.nodes[child];
            let edge = Value::Ref {
                kind: child_node.kind.clone(),
                id: child_node.id.clone(),
            };
            out.push(self.record(node, &child_node.kind, edge, source));
            self.flatten_node(child, out)?;
        }
        Ok(())
    }

    fn record(&self, node: &StagedNode, predicate: &str, value: Value, source: &str) -> Record {
        Record {
            subject_kind: node.kind.clone(),
            subject_id: node.id.clone(),
            predicate: predicate.to_owned(),
            value,
            source: source.to_owned(),
            nanotime: 0,
            seq: 0,
        }
    }
}

/// Mutable handle to one staged node of a [`Batch`].
pub struct NodeRef<'a> {
    batch: &'a mut Batch,
    idx: usize,
}

impl<'a> NodeRef<'a> {
    /// Minted (or caller-supplied, at the root) subject id of this node.
    pub fn id(&self) -> &str {
        &self.batch.nodes[self.idx].id
    }

    pub fn kind(&self) -> &str {
        &self.batch.nodes[self.idx].kind
    }

    /// Stages a scalar mutation; the last staged value per predicate wins.
    pub fn set(self, predicate: &str, value: impl Into<Value>) -> Self {
        self.batch.stage_set(self.idx, predicate, value.into());
        self
    }

    /// Overrides the inherited source for this subtree.
    pub fn set_source(self, source: &str) -> Self {
        self.batch.nodes[self.idx].source = Some(source.to_owned());
        self
    }

    /// Mints a child subject under this node and returns its handle.
    pub fn add_child(self, predicate: &str) -> NodeRef<'a> {
        let idx = self.batch.stage_child(self.idx, predicate);
        NodeRef {
            batch: self.batch,
            idx,
        }
    }

    /// Stages a tombstone for this subject.
    pub fn mark_deleted(self) -> Self {
        self.batch.nodes[self.idx].deleted = true;
        self
    }

    /// Commits the whole batch this node belongs to.
    pub fn execute(self, ctx: &Context) -> Result<()> {
        self.batch.execute(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Context;
    use crate::store::MemStore;

    #[test]
    fn restaging_a_predicate_keeps_the_last_value() {
        let mut batch = get("Post", "post_a");
        batch.set_source("uid_a").set("body", "first").set("body", "second");
        let records = batch.flatten().expect("flatten");
        let bodies: Vec<_> = records.iter().filter(|r| r.predicate == "body").collect();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].value, Value::Str("second".into()));
    }

    #[test]
    fn children_inherit_source_unless_overridden() {
        let mut batch = get("User", "uid_a");
        batch.set_source("uid_a");
        batch.add_child("Post").set("body", "hi");
        batch.add_child("Post").set_source("uid_b").set("body", "yo");
        let records = batch.flatten().expect("flatten");
        let sources: Vec<_> = records
            .iter()
            .filter(|r| r.subject_kind == "Post" && r.predicate == "body")
            .map(|r| r.source.as_str())
            .collect();
        assert_eq!(sources, vec!["uid_a", "uid_b"]);
    }

    #[test]
    fn missing_source_is_a_validation_error() {
        let ctx = Context::new(MemStore::new());
        let mut batch = get("User", "uid_a");
        batch.set("name", "nameless");
        let err = batch.execute(&ctx).expect_err("no source");
        assert!(matches!(err, CrudError::Validation(_)));
    }

    #[test]
    fn empty_source_is_a_validation_error() {
        let ctx = Context::new(MemStore::new());
        let mut batch = get("User", "uid_a");
        batch.set_source("").set("name", "nameless");
        let err = batch.execute(&ctx).expect_err("empty source");
        assert!(matches!(err, CrudError::Validation(_)));
    }

    #[test]
    fn reserved_predicates_are_rejected_at_execute() {
        let ctx = Context::new(MemStore::new());
        let mut batch = get("User", "uid_a");
        batch.set_source("uid_a").set("_deleted_", true);
        let err = batch.execute(&ctx).expect_err("reserved predicate");
        assert!(matches!(err, CrudError::Validation(_)));
    }

    fn apply_defaults(node: NodeRef<'_>) -> NodeRef<'_> {
        node.set("visibility", "public")
    }

    #[test]
    fn root_handle_feeds_node_level_helpers() {
        let mut batch = get("Post", "post_a");
        batch.set_source("uid_a");
        apply_defaults(batch.root());
        apply_defaults(batch.add_child("Comment").set("body", "hi"));
        let records = batch.flatten().expect("flatten");
        assert!(records
            .iter()
            .any(|r| r.subject_kind == "Post" && r.predicate == "visibility"));
        assert!(records
            .iter()
            .any(|r| r.subject_kind == "Comment" && r.predicate == "visibility"));
    }

    #[test]
    fn two_children_on_one_predicate_emit_two_edges() {
        let mut batch = get("Post", "post_a");
        batch.set_source("uid_a");
        batch.add_child("Like").set("thumb", 1);
        batch.add_child("Like").set("thumb", 1);
        let records = batch.flatten().expect("flatten");
        let edges: Vec<_> = records
            .iter()
            .filter(|r| r.subject_kind == "Post" && matches!(r.value, Value::Ref { .. }))
            .collect();
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn flatten_emits_edge_before_child_records() {
        let mut batch = get("User", "uid_a");
        batch.set_source("uid_a");
        batch.add_child("Post").set("body", "hello");
        let records = batch.flatten().expect("flatten");
        let edge_at = records
            .iter()
            .position(|r| matches!(r.value, Value::Ref { .. }))
            .expect("edge present");
        let body_at = records
            .iter()
            .position(|r| r.predicate == "body")
            .expect("body present");
        assert!(edge_at < body_at);
    }
}
