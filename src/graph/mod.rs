//! Prerequisite graph for skills.
//!
//! The graph is loaded once from a [`GraphSource`](crate::store::GraphSource),
//! validated, and then shared read-only across requests. Nodes live in an
//! arena (`Vec<SkillNode>`) and edges are integer-indexed adjacency lists,
//! so there are no reference cycles to manage and cycle detection falls out
//! of a topological sort. A detected cycle or dangling edge endpoint aborts
//! construction; no unlock state can be defined on a malformed graph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Identifier for a skill node. Stable across graph reloads.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SkillId(pub i64);

impl std::fmt::Display for SkillId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A skill in the prerequisite graph. Immutable after graph construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillNode {
    pub id: SkillId,
    pub canonical_name: String,
    /// Domain/category grouping (e.g. "backend", "devops")
    pub domain: Option<String>,
    /// Alternate names this skill is known by
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Confidence half-life override in days; engine default applies if unset
    #[serde(default)]
    pub decay_half_life_days: Option<u32>,
}

/// A directed prerequisite edge: `to` requires `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrereqEdge {
    pub from: SkillId,
    pub to: SkillId,
}

/// Immutable prerequisite graph: node arena plus integer-indexed adjacency.
///
/// Construction validates acyclicity; all queries are read-only and the
/// instance is shared across concurrent readers without locking.
#[derive(Debug, Clone)]
pub struct SkillGraph {
    nodes: Vec<SkillNode>,
    index: HashMap<SkillId, usize>,
    /// prereqs[i] = arena indices of skills node i directly requires
    prereqs: Vec<Vec<u32>>,
    /// dependents[i] = arena indices of skills that directly require node i
    dependents: Vec<Vec<u32>>,
    topo_order: Vec<u32>,
}

impl SkillGraph {
    /// Build a graph from nodes and edges.
    ///
    /// Fails with a structural error on duplicate node ids, edges whose
    /// endpoints are not in `nodes`, self-edges, or any directed cycle.
    pub fn build(nodes: Vec<SkillNode>, edges: &[PrereqEdge]) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id, i).is_some() {
                return Err(EngineError::GraphDuplicateNode(node.id));
            }
        }

        let mut prereqs = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];
        for edge in edges {
            let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
                return Err(EngineError::GraphUnknownEndpoint {
                    from: edge.from,
                    to: edge.to,
                });
            };
            if from == to {
                return Err(EngineError::GraphCycle {
                    cycle: vec![edge.from, edge.to],
                });
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                prereqs[to].push(from as u32);
                dependents[from].push(to as u32);
            }
        }

        // Deterministic adjacency order regardless of edge input order
        for list in prereqs.iter_mut().chain(dependents.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let topo_order = topological_sort(&nodes, &prereqs, &dependents)?;

        Ok(Self {
            nodes,
            index,
            prereqs,
            dependents,
            topo_order,
        })
    }

    /// Number of skills in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: SkillId) -> bool {
        self.index.contains_key(&id)
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: SkillId) -> Option<&SkillNode> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    /// All nodes in prerequisite-respecting (topological) order.
    pub fn nodes_topological(&self) -> impl Iterator<Item = &SkillNode> {
        self.topo_order.iter().map(|&i| &self.nodes[i as usize])
    }

    /// Direct prerequisites of a skill. Empty for unknown ids.
    pub fn prerequisites_of(&self, id: SkillId) -> impl Iterator<Item = SkillId> + '_ {
        self.adjacent(&self.prereqs, id)
    }

    /// Skills that directly require this skill. Empty for unknown ids.
    pub fn dependents_of(&self, id: SkillId) -> impl Iterator<Item = SkillId> + '_ {
        self.adjacent(&self.dependents, id)
    }

    /// Resolve a name or alias to a skill id (exact, case-insensitive).
    #[must_use]
    pub fn resolve_name(&self, name: &str) -> Option<SkillId> {
        let lowered = name.to_lowercase();
        self.nodes
            .iter()
            .find(|n| {
                n.canonical_name.to_lowercase() == lowered
                    || n.aliases.iter().any(|a| a.to_lowercase() == lowered)
            })
            .map(|n| n.id)
    }

    fn adjacent<'a>(
        &'a self,
        lists: &'a [Vec<u32>],
        id: SkillId,
    ) -> impl Iterator<Item = SkillId> + 'a {
        self.index
            .get(&id)
            .map(|&i| lists[i].as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&i| self.nodes[i as usize].id)
    }
}

/// Kahn's algorithm. Returns the topological order, or the members of one
/// cycle (sorted, for stable error output) if the graph is cyclic.
fn topological_sort(
    nodes: &[SkillNode],
    prereqs: &[Vec<u32>],
    dependents: &[Vec<u32>],
) -> Result<Vec<u32>> {
    let mut in_degree: Vec<usize> = prereqs.iter().map(Vec::len).collect();
    let mut queue: Vec<u32> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| u32::try_from(i).unwrap_or(u32::MAX))
        .collect();
    queue.sort_unstable();

    let mut order = Vec::with_capacity(nodes.len());
    let mut cursor = 0;
    while cursor < queue.len() {
        let node = queue[cursor];
        cursor += 1;
        order.push(node);

        for &dep in &dependents[node as usize] {
            in_degree[dep as usize] -= 1;
            if in_degree[dep as usize] == 0 {
                queue.push(dep);
            }
        }
    }

    if order.len() < nodes.len() {
        let mut cycle: Vec<SkillId> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d > 0)
            .map(|(i, _)| nodes[i].id)
            .collect();
        cycle.sort_unstable();
        return Err(EngineError::GraphCycle { cycle });
    }

    Ok(order)
}
