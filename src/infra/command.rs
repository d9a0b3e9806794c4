//! # Command Invoker / 命令调用器
//!
//! A [`TestInvoker`] that runs a shell command. The command line is expanded
//! (`~`, `$VAR`) and split like a POSIX shell would, then executed directly
//! without a shell. A non-zero exit status is an assertion failure.
//!
//! 运行 shell 命令的调用器。命令行先展开再按 POSIX shell 规则拆分，然后直接执行。
//! 非零退出状态被视为断言失败。

use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::process::Command;

use crate::core::invoker::{AssertionFailure, InvocationContext, TestInvoker};
use crate::core::log::{FailureKind, StepStatus};

/// Lines of output kept in the step message.
const OUTPUT_TAIL_LINES: usize = 50;

/// Step group recording the command and its output.
pub const COMMAND_STEP_GROUP: &str = "command";

#[derive(Debug, Clone)]
pub struct CommandInvoker {
    command: String,
    working_dir: Option<PathBuf>,
    expect_failure: bool,
    class: String,
}

impl CommandInvoker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            expect_failure: false,
            class: "command".to_string(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Inverts the verdict: the command is expected to exit non-zero.
    pub fn expecting_failure(mut self, expect_failure: bool) -> Self {
        self.expect_failure = expect_failure;
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Expands and splits the command line into program and arguments.
    pub fn parse(&self) -> Result<Vec<String>> {
        let expanded = shellexpand::full(&self.command)
            .with_context(|| format!("Failed to expand command: {}", self.command))?
            .to_string();
        let parts = shlex::split(&expanded)
            .ok_or_else(|| anyhow!("Failed to parse command: {expanded}"))?;
        if parts.is_empty() {
            return Err(anyhow!("Empty command after parsing."));
        }
        Ok(parts)
    }
}

impl TestInvoker for CommandInvoker {
    fn invoke(&self, ctx: &InvocationContext) -> Result<()> {
        let parts = self.parse()?;
        let mut cmd = Command::new(&parts[0]);
        cmd.args(&parts[1..]);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to spawn '{}'", parts[0]))?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let tail = tail_lines(&combined, OUTPUT_TAIL_LINES);

        let passed = output.status.success() != self.expect_failure;
        let verdict = if passed {
            None
        } else if self.expect_failure {
            Some(format!("'{}' was expected to fail but succeeded", self.command))
        } else {
            Some(format!("'{}' exited with {}", self.command, output.status))
        };

        let group = ctx.step_group(COMMAND_STEP_GROUP)?;
        let status = match verdict {
            None => StepStatus::Passed,
            Some(_) => StepStatus::Failed(FailureKind::Failed),
        };
        let message = (!tail.is_empty()).then(|| tail.clone());
        ctx.step(&group, &self.command, status, message)?;

        match verdict {
            None => Ok(()),
            Some(reason) if tail.is_empty() => Err(AssertionFailure(reason).into()),
            Some(reason) => Err(AssertionFailure(format!("{reason}\n{tail}")).into()),
        }
    }

    fn test_class(&self) -> &str {
        &self.class
    }
}

fn tail_lines(output: &str, count: usize) -> String {
    let lines: Vec<&str> = output.trim_end().lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
