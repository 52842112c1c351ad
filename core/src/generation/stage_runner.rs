use crate::prelude::{StageError, StageResult};
use async_trait::async_trait;
use log::{debug, warn};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// One external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Value following `flag` in the argument list.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs one pipeline tool to completion.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> StageResult<ToolOutput>;
}

/// Spawns tools as child processes and waits for them unconditionally.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand) -> StageResult<ToolOutput> {
        debug!("running {command}");
        let mut child = Command::new(&command.program);
        child
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            child.current_dir(cwd);
        }

        let output = child.output().await.map_err(|source| StageError::Spawn {
            command: command.to_string(),
            source,
        })?;
        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(StageError::Execution {
                command: command.to_string(),
                exit_code: output.status.code(),
                stderr: result.stderr.trim().to_string(),
            });
        }
        if !result.stderr.trim().is_empty() {
            warn!("{} reported: {}", command.program, result.stderr.trim());
        }
        Ok(result)
    }
}
