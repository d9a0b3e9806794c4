//! # Run File Module / 运行文件模块
//!
//! Loads a runner tree from a TOML run file:
//!
//! ```toml
//! parallelism = 4
//! strategy = "plan"
//!
//! [root]
//! name = "all"
//! mode = "sequential"
//!
//! [[root.children]]
//! name = "migrate"
//! command = "./migrate.sh"
//! sequential_group = "db"
//! sequential_index = 1
//! ```
//!
//! A node with a `command` is a leaf; any other node is a group.
//!
//! 从 TOML 运行文件加载运行树。带有 `command` 的节点是叶子，其他节点是组。

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::log::LogRegistry;
use crate::core::mode::{EffectiveMode, ExecutionMode};
use crate::core::tree::{Attributes, NodeId, RunnerTree};
use crate::infra::command::CommandInvoker;
use crate::scheduler::config::Strategy;

/// The whole run file.
/// 整个运行文件。
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunFile {
    /// Overrides the pool size provider.
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    /// Mode of groups with no explicit mode anywhere up their chain.
    #[serde(default)]
    pub default_mode: Option<EffectiveMode>,
    /// Directory commands run in, relative to the run file.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    pub root: NodeSpec,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// A group or a leaf of the run file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Leaf(LeafSpec),
    Group(GroupSpec),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LeafSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub ignore: bool,
    #[serde(default)]
    pub sequential_group: Option<String>,
    #[serde(default)]
    pub sequential_index: Option<i64>,
    /// The command passes when it exits non-zero.
    #[serde(default)]
    pub expect_failure: bool,
    /// Reported test class; defaults to `command`.
    #[serde(default)]
    pub class: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub sequential_group: Option<String>,
    #[serde(default)]
    pub sequential_index: Option<i64>,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn name(&self) -> &str {
        match self {
            NodeSpec::Leaf(leaf) => &leaf.name,
            NodeSpec::Group(group) => &group.name,
        }
    }
}

/// Reads and parses a run file. Commands will run relative to the file's
/// directory.
pub fn load_run_file(path: &Path) -> Result<RunFile> {
    let path = fs::canonicalize(path)
        .with_context(|| format!("Failed to read run file: {}", path.display()))?;
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read run file: {}", path.display()))?;
    let mut run_file = parse_run_file(&content)
        .with_context(|| format!("Failed to parse run file: {}", path.display()))?;
    run_file.base_dir = path.parent().map(Path::to_path_buf);
    Ok(run_file)
}

pub fn parse_run_file(content: &str) -> Result<RunFile> {
    let run_file: RunFile = toml::from_str(content)?;
    if let NodeSpec::Leaf(leaf) = &run_file.root {
        bail!("the root node '{}' must be a group, not a command", leaf.name);
    }
    Ok(run_file)
}

impl RunFile {
    /// Directory commands run in, if any.
    pub fn command_dir(&self) -> Option<PathBuf> {
        match (&self.base_dir, &self.working_dir) {
            (Some(base), Some(dir)) => Some(base.join(dir)),
            (Some(base), None) => Some(base.clone()),
            (None, dir) => dir.clone(),
        }
    }

    /// Builds the runner tree, with a fresh aggregation registry, for this
    /// file. `default_mode` applies when the file sets none.
    pub fn build_tree(&self, default_mode: EffectiveMode) -> Result<RunnerTree> {
        let mode = self.default_mode.unwrap_or(default_mode);
        let mut tree = RunnerTree::new(Arc::new(LogRegistry::new())).with_default_mode(mode);
        let command_dir = self.command_dir();
        add_node(&mut tree, &self.root, None, command_dir.as_deref())?;
        Ok(tree)
    }
}

fn add_node(
    tree: &mut RunnerTree,
    spec: &NodeSpec,
    parent: Option<NodeId>,
    command_dir: Option<&Path>,
) -> Result<NodeId> {
    match spec {
        NodeSpec::Group(group) => {
            let id = tree
                .create_group(&group.name, group.mode, parent)
                .with_context(|| format!("Failed to create group '{}'", group.name))?;
            if group.sequential_group.is_some() {
                tree.set_attributes(
                    id,
                    Attributes {
                        ignore: false,
                        sequential_group: group.sequential_group.clone(),
                        sequential_index: group.sequential_index,
                    },
                )?;
            }
            for child in &group.children {
                add_node(tree, child, Some(id), command_dir)?;
            }
            Ok(id)
        }
        NodeSpec::Leaf(leaf) => {
            let mut invoker =
                CommandInvoker::new(&leaf.command).expecting_failure(leaf.expect_failure);
            if let Some(dir) = command_dir {
                invoker = invoker.with_working_dir(dir);
            }
            if let Some(class) = &leaf.class {
                invoker = invoker.with_class(class);
            }
            let id = tree
                .add_leaf(Arc::new(invoker), &leaf.name, parent)
                .with_context(|| format!("Failed to add leaf '{}'", leaf.name))?;
            tree.set_attributes(
                id,
                Attributes {
                    ignore: leaf.ignore,
                    sequential_group: leaf.sequential_group.clone(),
                    sequential_index: leaf.sequential_index,
                },
            )?;
            Ok(id)
        }
    }
}
