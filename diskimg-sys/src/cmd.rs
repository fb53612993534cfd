// SPDX-License-Identifier: GPL-3.0-only

//! External command execution
//!
//! Every host mutation goes through a [`CommandRunner`]. Production code uses
//! [`SystemRunner`]; tests substitute a scripted host.

use std::fmt;
use std::process::Command;

use tracing::debug;

use crate::config::{Tool, ToolPaths};
use crate::error::{Result, SysError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

pub fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

pub trait CommandRunner {
    /// Run `program` with `args`; a non-zero exit is [`SysError::CommandFailed`]
    /// carrying the captured stderr.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutcome>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutcome> {
        let rendered = render(program, args);
        debug!(command = %rendered, "running");

        let output =
            Command::new(program)
                .args(args)
                .output()
                .map_err(|error| SysError::CommandFailed {
                    command: rendered.clone(),
                    stderr: error.to_string(),
                })?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(SysError::CommandFailed {
                command: rendered,
                stderr: format!("{} ({})", stderr.trim(), output.status),
            });
        }

        Ok(CommandOutcome {
            command: rendered,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }
}

/// A runner paired with the configured tool names
#[derive(Clone, Copy)]
pub struct Shell<'a> {
    runner: &'a dyn CommandRunner,
    tools: &'a ToolPaths,
}

impl<'a> Shell<'a> {
    pub fn new(runner: &'a dyn CommandRunner, tools: &'a ToolPaths) -> Self {
        Self { runner, tools }
    }

    pub fn run(&self, tool: Tool, args: &[&str]) -> Result<CommandOutcome> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        self.runner.run(self.tools.program(tool), &args)
    }
}

impl fmt::Debug for Shell<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell").field("tools", self.tools).finish()
    }
}
