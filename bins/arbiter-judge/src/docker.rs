/// Docker-backed sandbox - real isolated execution via long-lived worker
/// containers.
///
/// **Isolation per worker container:**
/// - Network disabled
/// - 128 MiB memory, half a core CPU share
/// - Writable filesystem only on the bind-mounted work volume
///
/// Workers idle on `sleep infinity`; every compile and run is a `docker
/// exec` against the leased worker, with stdout/stderr demultiplexed from
/// the framed attach stream before anything reaches the classifier.
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::container::LogOutput;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pool::WorkerRuntime;
use crate::sandbox::{ExecOutput, Language, Sandbox, SandboxError, WORK_MOUNT};

/// Resource ceilings enforced on every worker container.
const WORKER_MEMORY_BYTES: i64 = 128 * 1024 * 1024;
const WORKER_NANO_CPUS: i64 = 500_000_000; // half a core

/// Grace added on top of the in-container `timeout` wrapper before the
/// host-side backstop fires.
const EXEC_GRACE: Duration = Duration::from_secs(5);

pub struct DockerSandbox {
    docker: Docker,
    image: String,
    host_work_root: PathBuf,
}

impl DockerSandbox {
    pub fn new(image: &str, host_work_root: &Path) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            image: image.to_string(),
            host_work_root: host_work_root.to_path_buf(),
        })
    }

    /// Pull the runtime image unless it is already present. Idempotent.
    pub async fn ensure_image(&self) -> Result<(), SandboxError> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Runtime image present");
            return Ok(());
        }

        info!(image = %self.image, "Pulling runtime image");
        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress?;
        }

        info!(image = %self.image, "Runtime image ready");
        Ok(())
    }

    /// Run one shell line inside a worker and collect demuxed output. The
    /// host-side timeout is a backstop; within it the in-container wrapper
    /// is expected to have reported 124/137 already.
    async fn exec_sh(
        &self,
        worker_id: &str,
        line: String,
        deadline: Duration,
    ) -> Result<ExecOutput, SandboxError> {
        let exec_config = CreateExecOptions {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), line]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.docker.create_exec(worker_id, exec_config).await?;
        let started = Instant::now();

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let collect = async {
            let mut stdout = String::new();
            let mut stderr = String::new();

            match self.docker.start_exec(&exec.id, Some(start_config)).await? {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(frame) = output.next().await {
                        match frame? {
                            LogOutput::StdOut { message } => {
                                stdout.push_str(&String::from_utf8_lossy(&message));
                            }
                            LogOutput::StdErr { message } => {
                                stderr.push_str(&String::from_utf8_lossy(&message));
                            }
                            _ => {}
                        }
                    }
                }
                StartExecResults::Detached => {}
            }

            Ok::<(String, String), SandboxError>((stdout, stderr))
        };

        let (stdout, stderr) = match tokio::time::timeout(deadline, collect).await {
            Ok(result) => result?,
            Err(_) => return Err(SandboxError::HungExec(deadline)),
        };

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.ok_or(SandboxError::MissingExitCode)?;

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
            wall_time: started.elapsed(),
        })
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn compile(
        &self,
        worker_id: &str,
        lang: Language,
        dir_name: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError> {
        let Some(line) = lang.compile_command(dir_name) else {
            // Interpreted language: nothing to do.
            return Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                wall_time: Duration::ZERO,
            });
        };

        debug!(worker_id, %lang, dir_name, "Compiling submission");
        self.exec_sh(worker_id, line, timeout).await
    }

    async fn execute(
        &self,
        worker_id: &str,
        lang: Language,
        dir_name: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError> {
        let line = lang.run_command(dir_name, timeout);
        debug!(worker_id, %lang, dir_name, "Running test case");
        self.exec_sh(worker_id, line, timeout + EXEC_GRACE).await
    }
}

#[async_trait]
impl WorkerRuntime for DockerSandbox {
    async fn create_worker(&self) -> Result<String, SandboxError> {
        let name = format!("arbiter-worker-{}", Uuid::new_v4());
        let bind = format!("{}:{}", self.host_work_root.display(), WORK_MOUNT);

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            network_disabled: Some(true),
            working_dir: Some(WORK_MOUNT.to_string()),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(WORKER_MEMORY_BYTES),
                nano_cpus: Some(WORKER_NANO_CPUS),
                binds: Some(vec![bind]),
                readonly_rootfs: Some(false), // compilers need scratch space outside the work mount
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await?;

        info!(worker_id = %container.id, "Worker container started");
        Ok(container.id)
    }

    async fn remove_worker(&self, worker_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(worker_id, Some(options)).await {
            warn!(worker_id, error = %e, "Failed to remove worker container");
        }
    }
}
