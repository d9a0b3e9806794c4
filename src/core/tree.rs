//! # Runner Tree Module / 运行树模块
//!
//! Arena-backed tree of runner groups and leaves. Nodes refer to each other
//! by [`NodeId`]; the parent link is an index into the same arena, so there
//! are no reference cycles to tear down.
//!
//! The shape is built single-threaded through `&mut RunnerTree` and frozen
//! before execution. Once frozen the tree is shared behind an `Arc`, and only
//! the per-node run status (an atomic) still changes.
//!
//! 基于 arena 的运行组和叶子树。节点通过 [`NodeId`] 相互引用；父链接是同一 arena 的索引。
//! 树在执行前被冻结，之后只有每个节点的运行状态（原子变量）会改变。

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{Result, SchedulerError};
use crate::core::invoker::TestInvoker;
use crate::core::log::{CaseId, LogRegistry, SuiteId};
use crate::core::mode::{self, EffectiveMode, ExecutionMode};

/// Index of a node in its [`RunnerTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Run status of a node: `Waiting -> Running -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunStatus {
    Waiting = 0,
    Running = 1,
    Finished = 2,
}

impl RunStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunStatus::Waiting,
            1 => RunStatus::Running,
            _ => RunStatus::Finished,
        }
    }
}

/// Cross-cutting metadata attached to a node.
/// 附加到节点上的横切元数据。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    /// Failures of an ignored leaf are reported as `Ignored`.
    #[serde(default)]
    pub ignore: bool,
    /// Name of the named sequential group this node belongs to.
    #[serde(default)]
    pub sequential_group: Option<String>,
    /// Position inside the named sequential group; missing sorts first.
    #[serde(default)]
    pub sequential_index: Option<i64>,
}

impl Attributes {
    pub fn ignored() -> Self {
        Self {
            ignore: true,
            ..Self::default()
        }
    }

    pub fn sequential(name: impl Into<String>, index: i64) -> Self {
        Self {
            sequential_group: Some(name.into()),
            sequential_index: Some(index),
            ..Self::default()
        }
    }
}

pub enum NodeKind {
    Group {
        children: Vec<NodeId>,
        suite: SuiteId,
    },
    Leaf {
        invoker: Arc<dyn TestInvoker>,
        id: u64,
        case: CaseId,
    },
}

/// A group or leaf of the runner tree.
/// 运行树中的组或叶子。
pub struct RunnerNode {
    name: String,
    parent: Option<NodeId>,
    mode: ExecutionMode,
    attributes: Attributes,
    kind: NodeKind,
    status: AtomicU8,
}

impl RunnerNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group { .. })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// Children of a group; empty for leaves.
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Group { children, .. } => children,
            NodeKind::Leaf { .. } => &[],
        }
    }

    pub fn invoker(&self) -> Option<&Arc<dyn TestInvoker>> {
        match &self.kind {
            NodeKind::Leaf { invoker, .. } => Some(invoker),
            NodeKind::Group { .. } => None,
        }
    }

    /// The unique id assigned to a leaf at creation.
    pub fn leaf_id(&self) -> Option<u64> {
        match &self.kind {
            NodeKind::Leaf { id, .. } => Some(*id),
            NodeKind::Group { .. } => None,
        }
    }

    pub fn suite(&self) -> Option<SuiteId> {
        match &self.kind {
            NodeKind::Group { suite, .. } => Some(*suite),
            NodeKind::Leaf { .. } => None,
        }
    }

    pub fn case(&self) -> Option<CaseId> {
        match &self.kind {
            NodeKind::Leaf { case, .. } => Some(*case),
            NodeKind::Group { .. } => None,
        }
    }

    pub fn status(&self) -> RunStatus {
        RunStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: RunStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

impl fmt::Debug for RunnerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerNode")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("mode", &self.mode)
            .field("leaf", &self.is_leaf())
            .field("children", &self.children())
            .field("status", &self.status())
            .finish()
    }
}

type Comparator = dyn Fn(&RunnerNode, &RunnerNode) -> CmpOrdering + Send + Sync;

/// How children are ordered inside their group.
#[derive(Clone, Default)]
pub enum NodeOrdering {
    /// Insertion order.
    #[default]
    Declared,
    /// Sorted by name; equal names keep insertion order.
    ByName,
    Custom(Arc<Comparator>),
}

impl NodeOrdering {
    fn compare(&self, a: &RunnerNode, b: &RunnerNode) -> Option<CmpOrdering> {
        match self {
            NodeOrdering::Declared => None,
            NodeOrdering::ByName => Some(a.name.cmp(&b.name)),
            NodeOrdering::Custom(cmp) => Some(cmp(a, b)),
        }
    }
}

impl fmt::Debug for NodeOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOrdering::Declared => write!(f, "Declared"),
            NodeOrdering::ByName => write!(f, "ByName"),
            NodeOrdering::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// The runner tree and its factory operations.
/// 运行树及其工厂操作。
pub struct RunnerTree {
    nodes: Vec<RunnerNode>,
    root: Option<NodeId>,
    ordering: NodeOrdering,
    /// The default mode is `Sequential` when set; adjustable until frozen.
    sequential_default: AtomicBool,
    next_leaf_id: u64,
    frozen: AtomicBool,
    log: Arc<LogRegistry>,
}

impl RunnerTree {
    pub fn new(log: Arc<LogRegistry>) -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            ordering: NodeOrdering::Declared,
            sequential_default: AtomicBool::new(EffectiveMode::default() == EffectiveMode::Sequential),
            next_leaf_id: 0,
            frozen: AtomicBool::new(false),
            log,
        }
    }

    pub fn with_ordering(mut self, ordering: NodeOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Mode applied when neither a node nor any ancestor is explicit.
    pub fn with_default_mode(self, mode: EffectiveMode) -> Self {
        self.store_default_mode(mode);
        self
    }

    pub fn default_mode(&self) -> EffectiveMode {
        if self.sequential_default.load(Ordering::Acquire) {
            EffectiveMode::Sequential
        } else {
            EffectiveMode::Parallel
        }
    }

    /// Changes the default mode of a shared tree. Once the tree is frozen
    /// only the current mode is accepted.
    pub fn set_default_mode(&self, mode: EffectiveMode) -> Result<()> {
        if self.is_frozen() && self.default_mode() != mode {
            return Err(SchedulerError::TreeFrozen(format!("default mode '{mode}'")));
        }
        self.store_default_mode(mode);
        Ok(())
    }

    fn store_default_mode(&self, mode: EffectiveMode) {
        self.sequential_default
            .store(mode == EffectiveMode::Sequential, Ordering::Release);
    }

    pub fn log(&self) -> &Arc<LogRegistry> {
        &self.log
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&RunnerNode> {
        self.nodes.get(id.0)
    }

    /// Returns the node for an id handed out by this tree.
    ///
    /// # Panics
    /// Panics if `id` belongs to another tree.
    pub fn node(&self, id: NodeId) -> &RunnerNode {
        &self.nodes[id.0]
    }

    fn lookup(&self, id: NodeId) -> Result<&RunnerNode> {
        self.get(id).ok_or(SchedulerError::UnknownNode(id.0))
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Freezes the shape of the tree. Idempotent.
    pub fn freeze(&self) {
        if !self.frozen.swap(true, Ordering::AcqRel) {
            debug!(nodes = self.nodes.len(), "runner tree frozen");
        }
    }

    fn ensure_open(&self, name: &str) -> Result<()> {
        if self.is_frozen() {
            return Err(SchedulerError::TreeFrozen(name.to_string()));
        }
        Ok(())
    }

    fn group_suite(&self, id: NodeId) -> Result<SuiteId> {
        let node = self.lookup(id)?;
        node.suite()
            .ok_or_else(|| SchedulerError::NotAGroup(node.name.clone()))
    }

    /// Creates a group. Without a parent the group becomes the tree root,
    /// which may happen only once.
    pub fn create_group(
        &mut self,
        name: &str,
        mode: ExecutionMode,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        self.ensure_open(name)?;
        match parent {
            None => {
                if let Some(root) = self.root {
                    return Err(SchedulerError::RootAlreadySet {
                        existing: self.node(root).name.clone(),
                    });
                }
                let suite = self.log.suite(name, None)?;
                let id = self.push(name, None, mode, suite_kind(suite));
                self.root = Some(id);
                Ok(id)
            }
            Some(parent) => {
                let parent_suite = self.group_suite(parent)?;
                let suite = self.log.suite(name, Some(parent_suite))?;
                let id = self.push(name, None, mode, suite_kind(suite));
                self.link(id, parent)?;
                Ok(id)
            }
        }
    }

    /// Creates a group that is attached later with [`RunnerTree::attach`].
    pub fn create_detached_group(&mut self, name: &str, mode: ExecutionMode) -> Result<NodeId> {
        self.ensure_open(name)?;
        let suite = self.log.suite(name, None)?;
        Ok(self.push(name, None, mode, suite_kind(suite)))
    }

    /// Attaches a parentless node below `parent`. A node's parent is set
    /// exactly once; the root can never be attached, and neither can a node
    /// below itself or one of its descendants.
    pub fn attach(&mut self, node: NodeId, parent: NodeId) -> Result<()> {
        let child = self.lookup(node)?;
        self.ensure_open(&child.name)?;
        if self.root == Some(node) {
            return Err(SchedulerError::RootCannotBeAttached(child.name.clone()));
        }
        let parent_suite = self.group_suite(parent)?;
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == node {
                return Err(SchedulerError::AttachCycle {
                    node: child.name.clone(),
                    parent: self.node(parent).name.clone(),
                });
            }
            cursor = self.node(id).parent;
        }
        if let Some(suite) = child.suite() {
            self.log.adopt(suite, parent_suite)?;
        }
        self.link(node, parent)
    }

    /// Adds a leaf to `parent`.
    pub fn add_leaf(
        &mut self,
        invoker: Arc<dyn TestInvoker>,
        name: &str,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        self.ensure_open(name)?;
        let parent = parent.ok_or_else(|| SchedulerError::MissingParent(name.to_string()))?;
        let suite = self.group_suite(parent)?;
        let case = self.log.case(name, suite)?;
        self.log.set_test_class(case, invoker.test_class())?;
        let id = self.next_leaf_id;
        self.next_leaf_id += 1;
        let node = self.push(
            name,
            None,
            ExecutionMode::Inherited,
            NodeKind::Leaf { invoker, id, case },
        );
        self.link(node, parent)?;
        Ok(node)
    }

    /// Replaces the attributes of a node.
    pub fn set_attributes(&mut self, node: NodeId, attributes: Attributes) -> Result<()> {
        let name = self.lookup(node)?.name.clone();
        self.ensure_open(&name)?;
        if let Some(case) = self.node(node).case() {
            self.log.set_ignored(case, attributes.ignore)?;
        }
        self.nodes[node.0].attributes = attributes;
        Ok(())
    }

    fn push(&mut self, name: &str, parent: Option<NodeId>, mode: ExecutionMode, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(RunnerNode {
            name: name.to_string(),
            parent,
            mode,
            attributes: Attributes::default(),
            kind,
            status: AtomicU8::new(RunStatus::Waiting as u8),
        });
        id
    }

    fn link(&mut self, node: NodeId, parent: NodeId) -> Result<()> {
        let child = self.lookup(node)?;
        if let Some(existing) = child.parent {
            return Err(SchedulerError::AlreadyAttached {
                node: child.name.clone(),
                parent: self.node(existing).name.clone(),
            });
        }
        let parent_node = self.lookup(parent)?;
        if !parent_node.is_group() {
            return Err(SchedulerError::NotAGroup(parent_node.name.clone()));
        }
        let siblings = parent_node.children();
        let position = match self.ordering {
            NodeOrdering::Declared => siblings.len(),
            _ => siblings
                .iter()
                .position(|sibling| {
                    self.ordering.compare(self.node(*sibling), self.node(node))
                        == Some(CmpOrdering::Greater)
                })
                .unwrap_or(siblings.len()),
        };
        if let NodeKind::Group { children, .. } = &mut self.nodes[parent.0].kind {
            children.insert(position, node);
        }
        self.nodes[node.0].parent = Some(parent);
        Ok(())
    }

    /// Ancestors of `node`, innermost first.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.node(node).parent, move |id| self.node(*id).parent)
    }

    /// The resolved mode of `node`, following `Inherited` upward.
    pub fn effective_mode(&self, node: NodeId) -> EffectiveMode {
        let chain = std::iter::once(node)
            .chain(self.ancestors(node))
            .map(|id| self.node(id).mode);
        mode::resolve(chain, self.default_mode())
    }

    /// Whether the subtree of `node` contains at least one leaf.
    pub fn has_leaves(&self, node: NodeId) -> bool {
        let n = self.node(node);
        n.is_leaf() || n.children().iter().any(|child| self.has_leaves(*child))
    }

    /// Every node reachable from the root, depth-first pre-order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        if let Some(root) = self.root {
            self.collect(root, &mut out);
        }
        out
    }

    fn collect(&self, node: NodeId, out: &mut Vec<NodeId>) {
        out.push(node);
        for child in self.node(node).children() {
            self.collect(*child, out);
        }
    }

    /// Every leaf reachable from the root, depth-first.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.node(*id).is_leaf())
            .collect()
    }

    /// Slash-separated path of names from the root to `node`.
    pub fn path(&self, node: NodeId) -> String {
        let mut names: Vec<&str> = self.ancestors(node).map(|id| self.node(id).name()).collect();
        names.reverse();
        names.push(self.node(node).name());
        names.join("/")
    }
}

fn suite_kind(suite: SuiteId) -> NodeKind {
    NodeKind::Group {
        children: Vec::new(),
        suite,
    }
}

impl fmt::Debug for RunnerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerTree")
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("ordering", &self.ordering)
            .field("default_mode", &self.default_mode())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}
