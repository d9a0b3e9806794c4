//! # Execution Mode Module / 执行模式模块
//!
//! Declared and effective execution modes of runner nodes. A node declared
//! `Inherited` takes the mode of its nearest explicit ancestor; when no
//! ancestor is explicit the process-wide default applies. Resolution is lazy,
//! so it always reflects where a node is attached at traversal time.
//!
//! 运行节点的声明模式和有效模式。声明为 `Inherited` 的节点采用最近的显式祖先的模式；
//! 若没有显式祖先，则使用进程级默认值。解析是惰性的。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mode declared on a group or leaf.
/// 在组或叶子上声明的模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Children may run concurrently.
    Parallel,
    /// Children run one after another, in declared order.
    Sequential,
    /// Follow the nearest explicit ancestor.
    #[default]
    Inherited,
}

/// A resolved mode, never `Inherited`.
/// 解析后的模式，绝不是 `Inherited`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveMode {
    #[default]
    Parallel,
    Sequential,
}

impl ExecutionMode {
    /// Returns the explicit mode, if any.
    pub fn explicit(self) -> Option<EffectiveMode> {
        match self {
            ExecutionMode::Parallel => Some(EffectiveMode::Parallel),
            ExecutionMode::Sequential => Some(EffectiveMode::Sequential),
            ExecutionMode::Inherited => None,
        }
    }
}

impl From<EffectiveMode> for ExecutionMode {
    fn from(mode: EffectiveMode) -> Self {
        match mode {
            EffectiveMode::Parallel => ExecutionMode::Parallel,
            EffectiveMode::Sequential => ExecutionMode::Sequential,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Inherited => write!(f, "inherited"),
        }
    }
}

impl fmt::Display for EffectiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ExecutionMode::from(*self).fmt(f)
    }
}

/// Resolves a chain of declared modes, innermost first, against a default.
///
/// The first explicit mode wins. An empty or all-`Inherited` chain yields
/// `default`.
pub fn resolve<I>(chain: I, default: EffectiveMode) -> EffectiveMode
where
    I: IntoIterator<Item = ExecutionMode>,
{
    chain
        .into_iter()
        .find_map(ExecutionMode::explicit)
        .unwrap_or(default)
}
