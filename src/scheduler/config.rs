//! # Scheduler Configuration / 调度器配置
//!
//! Settings for one scheduler run and the pool-size providers that feed them.
//!
//! 单次调度运行的设置，以及为其提供线程池大小的提供者。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::core::mode::EffectiveMode;

/// Environment variable read by [`EnvPoolSize`].
pub const POOL_SIZE_ENV: &str = "SUITE_SCHEDULER_POOL_SIZE";

/// Which execution strategy drives the run.
/// 驱动运行的执行策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Plan-driven bounded pool.
    #[default]
    Plan,
    /// Recursive tree walk.
    Walk,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Plan => write!(f, "plan"),
            Strategy::Walk => write!(f, "walk"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plan" => Ok(Strategy::Plan),
            "walk" => Ok(Strategy::Walk),
            other => Err(format!("unknown strategy '{other}' (expected 'plan' or 'walk')")),
        }
    }
}

/// Supplies the worker-pool size.
pub trait PoolSizeProvider: Send + Sync {
    fn pool_size(&self) -> usize;
}

/// A fixed pool size. Zero is clamped to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPoolSize(pub usize);

impl PoolSizeProvider for FixedPoolSize {
    fn pool_size(&self) -> usize {
        self.0.max(1)
    }
}

/// Reads the pool size from an environment variable, falling back to the
/// number of logical CPUs when it is unset or unparsable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvPoolSize {
    var: String,
}

impl EnvPoolSize {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvPoolSize {
    fn default() -> Self {
        Self::new(POOL_SIZE_ENV)
    }
}

impl PoolSizeProvider for EnvPoolSize {
    fn pool_size(&self) -> usize {
        std::env::var(&self.var)
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or_else(num_cpus::get)
            .max(1)
    }
}

/// Settings of one scheduler run.
/// 单次调度运行的设置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of leaves executing at once.
    pub parallelism: usize,
    pub strategy: Strategy,
    /// Mode of groups whose whole ancestor chain is `Inherited`. When set,
    /// it replaces the tree's own default before the run starts.
    pub default_mode: Option<EffectiveMode>,
    /// Fallback wake-up of the dispatch loop when no completion arrives.
    pub poll_interval: Duration,
    /// How long outstanding tasks get to wind down after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_provider(&EnvPoolSize::default())
    }
}

impl SchedulerConfig {
    pub fn from_provider(provider: &dyn PoolSizeProvider) -> Self {
        Self {
            parallelism: provider.pool_size().max(1),
            strategy: Strategy::default(),
            default_mode: None,
            poll_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_default_mode(mut self, mode: EffectiveMode) -> Self {
        self.default_mode = Some(mode);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
