//! Post-install smoke test.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::CheckError;
use crate::formula::TestCommand;

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Output kept in an `ExpectationFailed` error.
const MAX_REPORTED_OUTPUT: usize = 4096;

/// Result of a passing smoke test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

/// Runs a formula's test command against its install path.
#[derive(Debug, Clone)]
pub struct PostInstallChecker {
    default_timeout: Duration,
}

impl Default for PostInstallChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl PostInstallChecker {
    pub fn new() -> Self {
        Self {
            default_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    /// Timeout for test commands that do not set `timeout_secs`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `test` and require its combined output to contain the expected text.
    ///
    /// The exit status is reported but does not decide the outcome.
    pub async fn check(
        &self,
        install_path: &Path,
        test: &TestCommand,
        cancel: &CancellationToken,
    ) -> Result<CheckOutput, CheckError> {
        let mut argv = test.command.iter().map(|arg| expand(arg, install_path));
        let program = argv.next().ok_or(CheckError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(CheckError::EmptyCommand);
        }
        let args: Vec<String> = argv.collect();
        let program = resolve_program(install_path, Path::new(&program))?;

        let timeout = test
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        log::debug!("Running {} {:?} (timeout {:?})", program.display(), args, timeout);

        if cancel.is_cancelled() {
            return Err(CheckError::Cancelled);
        }

        let child = Command::new(&program)
            .args(&args)
            .current_dir(install_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CheckError::Spawn {
                program: program.clone(),
                source,
            })?;

        // Dropping the `wait_with_output` future kills the child.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CheckError::Cancelled),
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(source)) => return Err(CheckError::Spawn { program: program.clone(), source }),
                Err(_) => return Err(CheckError::Timeout(timeout)),
            },
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let status = output.status.code();
        if !output.status.success() {
            log::warn!("{} exited with {:?}", program.display(), status);
        }

        if !combined.contains(&test.expect) {
            return Err(CheckError::ExpectationFailed {
                expected: test.expect.clone(),
                output: truncate(&combined, MAX_REPORTED_OUTPUT),
            });
        }

        Ok(CheckOutput {
            status,
            output: combined,
        })
    }
}

/// Expand `${prefix}` and `${bin}`; other variables are left as written.
fn expand(arg: &str, install_path: &Path) -> String {
    let prefix = install_path.to_string_lossy().into_owned();
    let bin = install_path.join("bin").to_string_lossy().into_owned();

    shellexpand::env_with_context_no_errors(arg, |var: &str| match var {
        "prefix" => Some(prefix.clone()),
        "bin" => Some(bin.clone()),
        _ => None,
    })
    .into_owned()
}

/// The program must exist inside the install path once symlinks are resolved.
fn resolve_program(install_path: &Path, program: &Path) -> Result<PathBuf, CheckError> {
    let candidate = if program.is_absolute() {
        program.to_path_buf()
    } else {
        install_path.join(program)
    };

    let outside = || CheckError::ProgramOutsidePrefix {
        program: candidate.clone(),
    };

    let root = install_path.canonicalize().map_err(|_| outside())?;
    let resolved = candidate.canonicalize().map_err(|_| outside())?;
    if !resolved.starts_with(&root) || !resolved.is_file() {
        return Err(outside());
    }
    Ok(resolved)
}

fn truncate(output: &str, max: usize) -> String {
    if output.len() <= max {
        return output.to_string();
    }
    let mut end = max;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes truncated)", &output[..end], output.len() - end)
}
