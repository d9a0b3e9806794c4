//! # Execution Plan Module / 执行计划模块
//!
//! Computes, for every leaf of a frozen runner tree, the leaves that must
//! finish before it may start, and serves ready leaves to the dispatch loop.
//!
//! Dependencies come from three sources:
//! - sequential siblinghood under `Sequential` groups,
//! - named sequential groups that link nodes regardless of tree position,
//! - inheritance through `Parallel` ancestors.
//!
//! "Finish of a group" expands recursively: a sequential group finishes with
//! its last non-empty child, a parallel group with all of its children.
//!
//! Entries are scored by the number of distinct leaves that transitively wait
//! on them and served highest score first, so long chains start early.
//!
//! 为冻结运行树的每个叶子计算在其开始前必须完成的叶子集合，并向调度循环提供就绪的叶子。

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::core::error::{Result, SchedulerError};
use crate::core::mode::EffectiveMode;
use crate::core::tree::{NodeId, RunStatus, RunnerTree};

/// One leaf of the plan.
/// 计划中的一个叶子条目。
#[derive(Debug, Clone)]
pub struct ExecutionPlanEntry {
    leaf: NodeId,
    dependencies: Vec<NodeId>,
    dependent_count: usize,
    started: bool,
}

impl ExecutionPlanEntry {
    pub fn leaf(&self) -> NodeId {
        self.leaf
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    pub fn dependent_count(&self) -> usize {
        self.dependent_count
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

/// Human-readable description of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanLine {
    pub leaf: String,
    pub score: usize,
    pub depends_on: Vec<String>,
}

/// The dependency graph plus the readiness-polling API.
pub struct ExecutionPlan {
    tree: Arc<RunnerTree>,
    entries: Mutex<Vec<ExecutionPlanEntry>>,
}

impl ExecutionPlan {
    /// Builds the plan and freezes the tree.
    ///
    /// # Errors
    /// Returns [`SchedulerError::CyclicDependency`] when the dependencies form
    /// a cycle, naming every leaf on it.
    pub fn build(tree: Arc<RunnerTree>) -> Result<Self> {
        tree.freeze();
        let mut resolver = DependencyResolver::new(&tree);
        let leaves = tree.leaves();
        let mut entries: Vec<ExecutionPlanEntry> = leaves
            .iter()
            .map(|leaf| ExecutionPlanEntry {
                leaf: *leaf,
                dependencies: resolver.dependencies(*leaf).into_iter().collect(),
                dependent_count: 0,
                started: false,
            })
            .collect();

        score(&tree, &mut entries)?;
        // Stable: equal scores keep depth-first order.
        entries.sort_by(|a, b| b.dependent_count.cmp(&a.dependent_count));

        debug!(
            leaves = entries.len(),
            sequential_groups = resolver.sequential_groups,
            "execution plan built"
        );
        Ok(Self {
            tree,
            entries: Mutex::new(entries),
        })
    }

    pub fn tree(&self) -> &Arc<RunnerTree> {
        &self.tree
    }

    /// `true` once every entry has been removed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Claims the first not-yet-started entry whose dependencies have all
    /// finished. `None` only means nothing is ready right now.
    ///
    /// 认领第一个依赖已全部完成且尚未开始的条目。返回 `None` 仅表示当前没有就绪的条目。
    pub fn next_executable_leaf(&self) -> Option<NodeId> {
        let mut entries = self.entries.lock();
        let entry = entries.iter_mut().find(|entry| {
            !entry.started
                && entry
                    .dependencies
                    .iter()
                    .all(|dep| self.tree.node(*dep).status() == RunStatus::Finished)
        })?;
        entry.started = true;
        Some(entry.leaf)
    }

    /// Drops the entry of a finished leaf. Returns `false`, and changes
    /// nothing, when the leaf is not in the plan.
    pub fn remove_finished_leaf(&self, leaf: NodeId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|entry| entry.leaf == leaf) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Dependencies of a leaf still in the plan.
    pub fn dependencies_of(&self, leaf: NodeId) -> Option<Vec<NodeId>> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.leaf == leaf)
            .map(|entry| entry.dependencies.clone())
    }

    /// Copy of the remaining entries, in serving order.
    pub fn entries(&self) -> Vec<ExecutionPlanEntry> {
        self.entries.lock().clone()
    }

    pub fn describe(&self) -> Vec<PlanLine> {
        self.entries
            .lock()
            .iter()
            .map(|entry| PlanLine {
                leaf: self.tree.path(entry.leaf),
                score: entry.dependent_count,
                depends_on: entry
                    .dependencies
                    .iter()
                    .map(|dep| self.tree.path(*dep))
                    .collect(),
            })
            .collect()
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("entries", &self.len())
            .finish()
    }
}

struct DependencyResolver<'a> {
    tree: &'a RunnerTree,
    /// Named-sequential-group member -> preceding member.
    predecessor: HashMap<NodeId, NodeId>,
    /// Node -> index among its siblings.
    position: HashMap<NodeId, usize>,
    sequential_groups: usize,
    memo: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl<'a> DependencyResolver<'a> {
    fn new(tree: &'a RunnerTree) -> Self {
        let mut groups: BTreeMap<&str, Vec<(i64, NodeId)>> = BTreeMap::new();
        let mut position = HashMap::new();
        for id in tree.preorder() {
            for (index, child) in tree.node(id).children().iter().enumerate() {
                position.insert(*child, index);
            }
            let attributes = tree.node(id).attributes();
            if let Some(name) = attributes.sequential_group.as_deref() {
                groups
                    .entry(name)
                    .or_default()
                    .push((attributes.sequential_index.unwrap_or(-1), id));
            }
        }

        let mut predecessor = HashMap::new();
        for members in groups.values_mut() {
            members.sort_by_key(|(index, _)| *index);
            for pair in members.windows(2) {
                predecessor.insert(pair[1].1, pair[0].1);
            }
        }

        Self {
            tree,
            predecessor,
            position,
            sequential_groups: groups.len(),
            memo: HashMap::new(),
        }
    }

    /// Leaves that must finish before `node` may start.
    fn dependencies(&mut self, node: NodeId) -> BTreeSet<NodeId> {
        if let Some(cached) = self.memo.get(&node) {
            return cached.clone();
        }
        let mut deps = BTreeSet::new();
        if let Some(previous) = self.predecessor.get(&node).copied() {
            deps.extend(self.finish_of(previous));
        }
        if let Some(parent) = self.tree.node(node).parent() {
            match self.tree.effective_mode(parent) {
                EffectiveMode::Parallel => deps.extend(self.dependencies(parent)),
                EffectiveMode::Sequential => match self.preceding_sibling(parent, node) {
                    Some(sibling) => deps.extend(self.finish_of(sibling)),
                    None => deps.extend(self.dependencies(parent)),
                },
            }
        }
        self.memo.insert(node, deps.clone());
        deps
    }

    /// Leaves whose completion marks the completion of `node`.
    fn finish_of(&self, node: NodeId) -> BTreeSet<NodeId> {
        let n = self.tree.node(node);
        if n.is_leaf() {
            return BTreeSet::from([node]);
        }
        match self.tree.effective_mode(node) {
            EffectiveMode::Sequential => n
                .children()
                .iter()
                .rev()
                .find(|child| self.tree.has_leaves(**child))
                .map(|last| self.finish_of(*last))
                .unwrap_or_default(),
            EffectiveMode::Parallel => n
                .children()
                .iter()
                .flat_map(|child| self.finish_of(*child))
                .collect(),
        }
    }

    /// Nearest non-empty sibling declared before `node`.
    fn preceding_sibling(&self, parent: NodeId, node: NodeId) -> Option<NodeId> {
        let children = self.tree.node(parent).children();
        let position = *self.position.get(&node)?;
        children[..position]
            .iter()
            .rev()
            .find(|sibling| self.tree.has_leaves(**sibling))
            .copied()
    }
}

/// Sets every entry's `dependent_count` to the number of distinct entries
/// that transitively depend on it, rejecting cycles.
///
/// Entries are ordered topologically first; dependent sets are then merged
/// from the last entry to the first as bitsets. A set is dropped as soon as
/// every dependency of its entry has absorbed it, so a long chain keeps only
/// a couple of sets alive.
fn score(tree: &RunnerTree, entries: &mut [ExecutionPlanEntry]) -> Result<()> {
    let index: HashMap<NodeId, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| (entry.leaf, i))
        .collect();
    let depends_on: Vec<Vec<usize>> = entries
        .iter()
        .map(|entry| {
            entry
                .dependencies
                .iter()
                .filter_map(|dep| index.get(dep).copied())
                .collect()
        })
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for (entry, deps) in depends_on.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(entry);
        }
    }

    let order = topological_order(&depends_on, &dependents).map_err(|cycle| {
        SchedulerError::CyclicDependency {
            path: cycle
                .into_iter()
                .map(|i| tree.path(entries[i].leaf))
                .collect(),
        }
    })?;

    let words = entries.len().div_ceil(64);
    let mut reach: Vec<Option<Vec<u64>>> = vec![None; entries.len()];
    let mut unconsumed: Vec<usize> = depends_on.iter().map(Vec::len).collect();
    for &entry in order.iter().rev() {
        let mut set = vec![0u64; words];
        for &dependent in &dependents[entry] {
            set[dependent / 64] |= 1u64 << (dependent % 64);
            if let Some(inherited) = &reach[dependent] {
                for (word, bits) in set.iter_mut().zip(inherited) {
                    *word |= bits;
                }
            }
            unconsumed[dependent] -= 1;
            if unconsumed[dependent] == 0 {
                reach[dependent] = None;
            }
        }
        let count = set.iter().map(|word| word.count_ones() as usize).sum();
        entries[entry].dependent_count = count;
        // Sets with nothing in them add nothing when merged.
        if unconsumed[entry] > 0 && count > 0 {
            reach[entry] = Some(set);
        }
    }
    Ok(())
}

/// Kahn's algorithm over "depends on" edges: dependencies come first. On a
/// cycle, returns one cycle path whose first and last element coincide.
fn topological_order(
    depends_on: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut waiting: Vec<usize> = depends_on.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..depends_on.len()).filter(|i| waiting[*i] == 0).collect();
    let mut order = Vec::with_capacity(depends_on.len());
    while let Some(entry) = ready.pop_front() {
        order.push(entry);
        for &dependent in &dependents[entry] {
            waiting[dependent] -= 1;
            if waiting[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }
    if order.len() == depends_on.len() {
        return Ok(order);
    }

    // Every leftover entry waits on another leftover entry; following those
    // edges from any of them must revisit one.
    let mut on_path = vec![false; depends_on.len()];
    let mut path = Vec::new();
    let mut current = (0..depends_on.len()).find(|i| waiting[*i] > 0).unwrap_or_default();
    while !on_path[current] {
        on_path[current] = true;
        path.push(current);
        current = depends_on[current]
            .iter()
            .copied()
            .find(|dep| waiting[*dep] > 0)
            .unwrap_or(current);
    }
    let start = path.iter().position(|i| *i == current).unwrap_or_default();
    let mut cycle = path.split_off(start);
    cycle.push(current);
    Err(cycle)
}
