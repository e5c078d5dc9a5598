/// Judge engine - turns one `SubmissionEvent` into exactly one
/// `ResultEvent`.
///
/// Every failure mode is encoded as a verdict; nothing escapes past
/// `judge`. The engine holds one worker lease for the whole cycle, runs the
/// compile phase (when the language has one) and then the test cases in
/// order, short-circuiting on the first non-accepted outcome. The submission
/// directory is removed and the worker released on every exit path.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use arbiter_common::events::{ResultEvent, SubmissionEvent};
use arbiter_common::types::{TestCase, Verdict};

use crate::pool::{WorkerLease, WorkerPool, DEAD_AFTER_FAILURES};
use crate::problems::TestCaseSource;
use crate::sandbox::{ExecOutput, Language, Sandbox, SandboxError, INPUT_FILENAME};

/// Ceiling on the compile phase.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(120);

/// Slack added to the per-submission deadline on top of the phase budgets.
const DEADLINE_SLACK: Duration = Duration::from_secs(5);

/// Cap on the compiler diagnostic carried in a CE verdict.
const MAX_COMPILE_DIAGNOSTIC_BYTES: usize = 8 * 1024;

pub struct JudgeEngine {
    sandbox: Arc<dyn Sandbox>,
    problems: Arc<dyn TestCaseSource>,
    pool: Arc<WorkerPool>,
    work_root: PathBuf,
    run_timeout: Duration,
    compile_timeout: Duration,
}

impl JudgeEngine {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        problems: Arc<dyn TestCaseSource>,
        pool: Arc<WorkerPool>,
        work_root: PathBuf,
        run_timeout: Duration,
        compile_timeout: Duration,
    ) -> Self {
        Self {
            sandbox,
            problems,
            pool,
            work_root,
            run_timeout,
            compile_timeout,
        }
    }

    /// Judge one submission. Infallible by design: transport and
    /// infrastructure faults come back as `RE` verdicts.
    pub async fn judge(&self, event: &SubmissionEvent, cancel: &CancellationToken) -> ResultEvent {
        let sid = event.submission_id;
        info!(submission_id = %sid, language = %event.language, "Started judging submission");

        let verdict = self.judge_inner(event, cancel).await;

        info!(submission_id = %sid, status = %verdict.status, "Finished judging submission");
        verdict
    }

    async fn judge_inner(
        &self,
        event: &SubmissionEvent,
        cancel: &CancellationToken,
    ) -> ResultEvent {
        let sid = event.submission_id;

        let mut lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ResultEvent::new(sid, Verdict::RuntimeError, "cancelled");
            }
            leased = self.pool.lease() => match leased {
                Ok(lease) => lease,
                Err(_) => return ResultEvent::new(sid, Verdict::RuntimeError, "sandbox unavailable"),
            },
        };

        let Some(lang) = Language::parse(&event.language) else {
            return ResultEvent::new(sid, Verdict::RuntimeError, "Unsupported language");
        };

        let cases = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ResultEvent::new(sid, Verdict::RuntimeError, "cancelled");
            }
            fetched = self.problems.test_cases(event.problem_id) => match fetched {
                Ok(cases) => cases,
                Err(e) => {
                    return ResultEvent::new(
                        sid,
                        Verdict::RuntimeError,
                        format!("Failed to get test cases: {e}"),
                    );
                }
            },
        };

        if cases.is_empty() {
            return ResultEvent::new(sid, Verdict::Accepted, "No test cases found");
        }

        let dir_name = format!("sub-{}", Uuid::new_v4());
        let dir = self.work_root.join(&dir_name);
        if let Err(e) = materialize_source(&dir, lang, &event.code).await {
            warn!(submission_id = %sid, error = %e, "Failed to materialize submission");
            return ResultEvent::new(sid, Verdict::RuntimeError, "Failed to write code to file");
        }

        let deadline =
            self.compile_timeout + self.run_timeout * cases.len() as u32 + DEADLINE_SLACK;

        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                ResultEvent::new(sid, Verdict::RuntimeError, "cancelled")
            }
            phases = tokio::time::timeout(
                deadline,
                self.run_phases(&mut lease, lang, &dir_name, &dir, &cases, sid),
            ) => match phases {
                Ok(verdict) => verdict,
                Err(_) => ResultEvent::new(sid, Verdict::RuntimeError, "cancelled"),
            },
        };

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            warn!(submission_id = %sid, dir = %dir.display(), error = %e, "Failed to remove submission dir");
        }

        verdict
    }

    async fn run_phases(
        &self,
        lease: &mut WorkerLease,
        lang: Language,
        dir_name: &str,
        dir: &Path,
        cases: &[TestCase],
        sid: Uuid,
    ) -> ResultEvent {
        if lang.compile_command(dir_name).is_some() {
            match self
                .sandbox
                .compile(lease.worker_id(), lang, dir_name, self.compile_timeout)
                .await
            {
                Ok(output) if output.exit_code == 0 => lease.record_exec_success(),
                Ok(output) => {
                    lease.record_exec_success();
                    let mut diagnostic = output.diagnostic().to_string();
                    truncate_on_char_boundary(&mut diagnostic, MAX_COMPILE_DIAGNOSTIC_BYTES);
                    return ResultEvent::new(
                        sid,
                        Verdict::CompilationError,
                        format!("Compilation Error: {diagnostic}"),
                    );
                }
                // A hung compiler folds into CE, same as any other overrun
                // of the compile budget.
                Err(SandboxError::HungExec(_)) => {
                    return ResultEvent::new(
                        sid,
                        Verdict::CompilationError,
                        "Compilation Error: compiler timed out",
                    );
                }
                Err(e) => return exec_failure(lease, sid, e),
            }
        }

        for (index, case) in cases.iter().enumerate() {
            if let Err(e) = tokio::fs::write(dir.join(INPUT_FILENAME), &case.input).await {
                warn!(submission_id = %sid, error = %e, "Failed to write test input");
                return ResultEvent::new(sid, Verdict::RuntimeError, "Failed to write test input");
            }

            let output = match self
                .sandbox
                .execute(lease.worker_id(), lang, dir_name, self.run_timeout)
                .await
            {
                Ok(output) => {
                    lease.record_exec_success();
                    output
                }
                Err(SandboxError::HungExec(_)) => {
                    return ResultEvent::new(sid, Verdict::TimeLimitExceeded, "Time Limit Exceeded");
                }
                Err(e) => return exec_failure(lease, sid, e),
            };

            if let Some((verdict, message)) = classify_case(&output, case) {
                info!(submission_id = %sid, test_case = index + 1, status = %verdict, "Test case failed");
                return ResultEvent::new(sid, verdict, message);
            }
        }

        ResultEvent::new(sid, Verdict::Accepted, "All tests passed")
    }
}

/// Classify one run-phase exec against its test case. `None` means the case
/// passed and judging continues.
fn classify_case(output: &ExecOutput, case: &TestCase) -> Option<(Verdict, String)> {
    if output.timed_out() {
        return Some((Verdict::TimeLimitExceeded, "Time Limit Exceeded".to_string()));
    }

    if output.exit_code != 0 {
        return Some((
            Verdict::RuntimeError,
            format!(
                "Runtime Error (Exit Code: {})\n{}",
                output.exit_code,
                output.diagnostic()
            ),
        ));
    }

    if output.stdout.trim() != case.expected_output.trim() {
        return Some((
            Verdict::WrongAnswer,
            format!(
                "Wrong Answer.\nExpected:\n{}\nGot:\n{}",
                case.expected_output, output.stdout
            ),
        ));
    }

    None
}

fn exec_failure(lease: &mut WorkerLease, sid: Uuid, err: SandboxError) -> ResultEvent {
    let failures = lease.record_exec_failure();
    if failures >= DEAD_AFTER_FAILURES {
        ResultEvent::new(sid, Verdict::RuntimeError, "sandbox unavailable")
    } else {
        ResultEvent::new(
            sid,
            Verdict::RuntimeError,
            format!("Failed to execute in sandbox: {err}"),
        )
    }
}

async fn materialize_source(dir: &Path, lang: Language, code: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(lang.source_filename()), code).await
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
