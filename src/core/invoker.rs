//! # Invoker Module / 调用器模块
//!
//! The unit of work behind every runner leaf. Invocations may block (UI
//! automation, network I/O) and always run on a dedicated blocking thread,
//! never on the dispatch loop.
//!
//! 每个运行叶子背后的工作单元。调用可能阻塞，总是在专用的阻塞线程上运行。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::core::error::Result;
use crate::core::listener::{ListenerRegistry, RunEvent};
use crate::core::log::{CaseId, FailureKind, LogRegistry, StepGroupId, StepStatus};
use crate::core::tree::NodeId;

/// A single executable test.
/// 单个可执行的测试。
pub trait TestInvoker: Send + Sync {
    /// Runs the test. Returning an error marks the leaf as failed; the
    /// scheduler keeps going either way.
    fn invoke(&self, ctx: &InvocationContext) -> anyhow::Result<()>;

    /// Name of the class or module the test belongs to, for reporting.
    fn test_class(&self) -> &str;
}

/// Raised by invokers for an assertion failure, as opposed to an unexpected
/// error. Any other error type is classified as [`FailureKind::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure(pub String);

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assertion failed: {}", self.0)
    }
}

impl std::error::Error for AssertionFailure {}

/// A classified invocation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn from_error(error: &anyhow::Error) -> Self {
        let kind = if error.downcast_ref::<AssertionFailure>().is_some() {
            FailureKind::Failed
        } else {
            FailureKind::Error
        };
        Self {
            kind,
            message: format!("{error:#}"),
        }
    }

    /// Builds a failure from the payload of a panicking invocation.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "invoker panicked".to_string());
        Self {
            kind: FailureKind::Error,
            message: format!("panicked: {message}"),
        }
    }

    pub(crate) fn into_parts(self) -> (FailureKind, String) {
        (self.kind, self.message)
    }
}

/// Handed to [`TestInvoker::invoke`]; gives the invocation access to its
/// aggregation record so it can report step groups and steps.
#[derive(Clone)]
pub struct InvocationContext {
    leaf: NodeId,
    name: String,
    case: CaseId,
    log: Arc<LogRegistry>,
    listeners: Arc<ListenerRegistry>,
}

/// A step group opened through an [`InvocationContext`].
#[derive(Debug, Clone)]
pub struct StepGroupHandle {
    id: StepGroupId,
    name: String,
}

impl InvocationContext {
    pub(crate) fn new(
        leaf: NodeId,
        name: String,
        case: CaseId,
        log: Arc<LogRegistry>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            leaf,
            name,
            case,
            log,
            listeners,
        }
    }

    pub fn leaf(&self) -> NodeId {
        self.leaf
    }

    pub fn leaf_name(&self) -> &str {
        &self.name
    }

    pub fn case(&self) -> CaseId {
        self.case
    }

    /// Opens a new step group on the case.
    pub fn step_group(&self, name: &str) -> Result<StepGroupHandle> {
        let id = self.log.add_step_group(self.case, name)?;
        self.listeners.fire(&RunEvent::NewTestStepGroup {
            case: self.case,
            name: name.to_string(),
        });
        Ok(StepGroupHandle {
            id,
            name: name.to_string(),
        })
    }

    /// Records a step inside `group`.
    pub fn step(
        &self,
        group: &StepGroupHandle,
        name: &str,
        status: StepStatus,
        message: Option<String>,
    ) -> Result<()> {
        self.log.add_step(group.id, name, status, message)?;
        self.listeners.fire(&RunEvent::NewTestStep {
            case: self.case,
            group: group.name.clone(),
            name: name.to_string(),
            status,
        });
        Ok(())
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("leaf", &self.leaf)
            .field("name", &self.name)
            .field("case", &self.case)
            .finish_non_exhaustive()
    }
}

/// An invoker backed by a closure.
pub struct FnInvoker<F> {
    class: String,
    f: F,
}

impl<F> FnInvoker<F>
where
    F: Fn(&InvocationContext) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(class: impl Into<String>, f: F) -> Self {
        Self {
            class: class.into(),
            f,
        }
    }
}

impl<F> TestInvoker for FnInvoker<F>
where
    F: Fn(&InvocationContext) -> anyhow::Result<()> + Send + Sync,
{
    fn invoke(&self, ctx: &InvocationContext) -> anyhow::Result<()> {
        (self.f)(ctx)
    }

    fn test_class(&self) -> &str {
        &self.class
    }
}
