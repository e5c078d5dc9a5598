/// Sandbox capability - bounded, isolated execution of untrusted code.
///
/// The judge only ever talks to this trait. The production implementation
/// backs it with `docker exec` against a pooled worker container
/// (`docker.rs`); tests substitute a scripted fake that returns
/// deterministic outcomes. The classifier never sees transport details,
/// only `ExecOutput`.
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Mount point of the shared work volume inside every worker container.
/// The judge writes submission directories under the host side of this
/// mount; workers see them here.
pub const WORK_MOUNT: &str = "/work";

/// Canonical stdin file inside a submission directory. Written by the judge
/// before each run, redirected into the program so stdin is fully delivered
/// and closed before output is read.
pub const INPUT_FILENAME: &str = "input.txt";

/// Exit code reported when the in-container wrapper stops the program with
/// SIGTERM, and when it has to escalate to SIGKILL.
pub const EXIT_TIMEOUT_TERM: i64 = 124;
pub const EXIT_TIMEOUT_KILL: i64 = 137;

/// The closed set of supported languages. Each variant carries its canonical
/// source filename, an optional compile step and a run command; there is no
/// open registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Go,
    Python,
}

impl Language {
    pub fn parse(s: &str) -> Option<Language> {
        match s {
            "go" => Some(Language::Go),
            "python" => Some(Language::Python),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Python => "python",
        }
    }

    pub fn source_filename(&self) -> &'static str {
        match self {
            Language::Go => "main.go",
            Language::Python => "main.py",
        }
    }

    /// Shell line for the compile phase, or `None` for interpreted
    /// languages. `dir_name` is the submission directory under the work
    /// mount.
    pub fn compile_command(&self, dir_name: &str) -> Option<String> {
        match self {
            Language::Go => Some(format!(
                "cd {WORK_MOUNT}/{dir_name} && go build -o main main.go"
            )),
            Language::Python => None,
        }
    }

    /// Shell line for one test-case run. The in-container `timeout` wrapper
    /// enforces the wall-clock ceiling: exit 124 when SIGTERM is honored,
    /// 137 after the SIGKILL escalation.
    pub fn run_command(&self, dir_name: &str, timeout: Duration) -> String {
        let secs = timeout.as_secs().max(1);
        let program = match self {
            Language::Go => "./main".to_string(),
            Language::Python => "python3 main.py".to_string(),
        };
        format!("cd {WORK_MOUNT}/{dir_name} && timeout -k 1 {secs}s {program} < {INPUT_FILENAME}")
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Demultiplexed result of one exec inside a worker. stdout and stderr are
/// separate buffers; the classifier never works from interleaved frames.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub wall_time: Duration,
}

impl ExecOutput {
    pub fn timed_out(&self) -> bool {
        self.exit_code == EXIT_TIMEOUT_TERM || self.exit_code == EXIT_TIMEOUT_KILL
    }

    /// stderr, falling back to stdout - the user-visible diagnostic channel.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("docker api error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("exec finished without an exit code")]
    MissingExitCode,
    #[error("exec did not finish within {0:?}")]
    HungExec(Duration),
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
}

/// The two operations the judge needs from an isolated environment. Both run
/// inside the worker identified by `worker_id`, against the submission
/// directory `dir_name` on the shared work volume.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn compile(
        &self,
        worker_id: &str,
        lang: Language,
        dir_name: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError>;

    async fn execute(
        &self,
        worker_id: &str,
        lang: Language,
        dir_name: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError>;
}
