//! Shell hook execution for interface lifecycle events
//!
//! Hooks are user-supplied command lines run around activation and
//! teardown. Every `%i` in a command is replaced by the interface name
//! before the command is handed to `sh -ce`.

use std::io::{self, Write};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Placeholder replaced by the interface name
pub const IFACE_PLACEHOLDER: &str = "%i";

/// Executes hook commands
pub trait HookRunner {
    /// Run `command` for interface `iface`, feeding `stdin` to the process
    /// when given. Fails with the captured output on non-zero exit.
    fn run(&self, command: &str, iface: &str, stdin: Option<&str>) -> Result<()>;
}

impl<T: HookRunner + ?Sized> HookRunner for &T {
    fn run(&self, command: &str, iface: &str, stdin: Option<&str>) -> Result<()> {
        (**self).run(command, iface, stdin)
    }
}

/// Replace every `%i` in `command` with `iface`
pub fn substitute(command: &str, iface: &str) -> String {
    command.replace(IFACE_PLACEHOLDER, iface)
}

/// Run each command in order, stopping at the first failure
pub fn run_all<H: HookRunner>(runner: &H, commands: &[String], iface: &str) -> Result<()> {
    for command in commands {
        runner.run(command, iface, None)?;
    }
    Ok(())
}

/// Runs hooks through `/bin/sh -ce`
#[derive(Debug, Clone, Default)]
pub struct ShellHookRunner;

impl ShellHookRunner {
    pub fn new() -> Self {
        Self
    }
}

impl HookRunner for ShellHookRunner {
    fn run(&self, command: &str, iface: &str, stdin: Option<&str>) -> Result<()> {
        let script = substitute(command, iface);
        let shown = format!("sh -ce {}", script);
        log::info!("Running hook: {}", shown);

        let mut child = Command::new("/bin/sh")
            .arg("-ce")
            .arg(&script)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            // A hook may exit without reading its input; its status decides.
            match pipe.write_all(input.as_bytes()) {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }

        let output = child.wait_with_output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            log::error!(
                "Hook failed with exit code {}: {}",
                output.status.code().unwrap_or(-1),
                combined.trim()
            );
            return Err(Error::Hook {
                command: shown,
                output: combined,
            });
        }

        if !combined.trim().is_empty() {
            log::debug!("Hook output: {}", combined.trim());
        }

        Ok(())
    }
}
