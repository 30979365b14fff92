//! Breadth-first traversal executor.
//!
//! The work queue is processed level by level so entity reads for one BFS
//! level stay grouped (backends that pipeline benefit; correctness does
//! not depend on it). Each item carries its remaining per-predicate hop
//! budgets; the log imposes no acyclicity, the budgets alone make the
//! traversal total.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::engine::Context;
use crate::error::{CrudError, Result};
use crate::model::Value;
use crate::query::{Plan, QueryResult};

struct WorkItem {
    kind: String,
    id: String,
    /// Arena slot of the parent plus the predicate that reached this item;
    /// `None` for the root.
    parent: Option<(usize, String)>,
    /// Remaining hops per collected predicate, decremented along the branch.
    budgets: HashMap<String, u32>,
    /// Remaining hops for non-collected predicates.
    default_remaining: u32,
}

struct BuiltNode {
    kind: String,
    id: String,
    scalars: BTreeMap<String, Value>,
    parent: Option<(usize, String)>,
}

pub(crate) fn run(plan: &Plan, ctx: &Context) -> Result<QueryResult> {
    let root_budgets: HashMap<String, u32> = plan
        .rules
        .iter()
        .map(|(predicate, rule)| (predicate.clone(), rule.hops))
        .collect();

    let mut arena: Vec<BuiltNode> = Vec::new();
    let mut frontier = vec![WorkItem {
        kind: plan.kind.clone(),
        id: plan.id.clone(),
        parent: None,
        budgets: root_budgets,
        default_remaining: plan.default_hops,
    }];

    let mut level = 0usize;
    while !frontier.is_empty() {
        ctx.check_deadline()?;
        trace!(level, width = frontier.len(), "expanding traversal level");
        let mut next = Vec::new();
        for item in frontier.drain(..) {
            let entity = ctx.read_entity(&item.kind, &item.id)?;
            if !entity.exists() || entity.deleted {
                // The edge that led here stays invisible in the view; the
                // root case is caught below.
                continue;
            }
            if let Some((_, via)) = &item.parent {
                if let Some(rule) = plan.rules.get(via) {
                    let censored = rule
                        .filter_out
                        .iter()
                        .any(|p| entity.scalar(p).is_some_and(Value::is_truthy));
                    if censored {
                        continue;
                    }
                }
            }

            let idx = arena.len();
            arena.push(BuiltNode {
                kind: entity.kind.clone(),
                id: entity.id.clone(),
                scalars: entity
                    .scalars
                    .iter()
                    .map(|(predicate, cell)| (predicate.clone(), cell.value.clone()))
                    .collect(),
                parent: item.parent.clone(),
            });

            for edge in &entity.children {
                let child = match item.budgets.get(&edge.predicate) {
                    Some(&0) => continue,
                    Some(&remaining) => {
                        let mut budgets = item.budgets.clone();
                        budgets.insert(edge.predicate.clone(), remaining - 1);
                        WorkItem {
                            kind: edge.kind.clone(),
                            id: edge.id.clone(),
                            parent: Some((idx, edge.predicate.clone())),
                            budgets,
                            default_remaining: item.default_remaining,
                        }
                    }
                    None => {
                        if item.default_remaining == 0 {
                            continue;
                        }
                        WorkItem {
                            kind: edge.kind.clone(),
                            id: edge.id.clone(),
                            parent: Some((idx, edge.predicate.clone())),
                            budgets: item.budgets.clone(),
                            default_remaining: item.default_remaining - 1,
                        }
                    }
                };
                next.push(child);
            }
        }
        frontier = next;
        level += 1;
    }

    if arena.is_empty() {
        return Err(CrudError::NotFound("query root"));
    }
    Ok(assemble(arena))
}

/// Stitches the flat arena back into a tree. Children were appended in BFS
/// order, which preserves each parent's edge commit order.
fn assemble(arena: Vec<BuiltNode>) -> QueryResult {
    let mut kids: HashMap<usize, Vec<(String, usize)>> = HashMap::new();
    for (idx, node) in arena.iter().enumerate() {
        if let Some((parent, predicate)) = &node.parent {
            kids.entry(*parent)
                .or_default()
                .push((predicate.clone(), idx));
        }
    }
    let mut slots: Vec<Option<BuiltNode>> = arena.into_iter().map(Some).collect();
    build(&mut slots, &kids, 0)
}

fn build(
    slots: &mut Vec<Option<BuiltNode>>,
    kids: &HashMap<usize, Vec<(String, usize)>>,
    idx: usize,
) -> QueryResult {
    let node = slots[idx].take().expect("arena slot visited once");
    let mut result = QueryResult {
        kind: node.kind,
        id: node.id,
        scalars: node.scalars,
        children: BTreeMap::new(),
    };
    if let Some(entries) = kids.get(&idx) {
        for (predicate, child_idx) in entries {
            let child = build(slots, kids, *child_idx);
            result
                .children
                .entry(predicate.clone())
                .or_default()
                .push(child);
        }
    }
    result
}
