mod config;
mod docker;
mod judge;
mod pool;
mod problems;
mod sandbox;

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use arbiter_common::bus;
use arbiter_common::events::SubmissionEvent;

use crate::config::JudgeConfig;
use crate::docker::DockerSandbox;
use crate::judge::{JudgeEngine, DEFAULT_COMPILE_TIMEOUT};
use crate::pool::WorkerPool;
use crate::problems::ProblemClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Judge worker booting...");

    let cfg = JudgeConfig::from_env();

    let client = redis::Client::open(cfg.broker.url.as_str())?;
    let mut bus_conn = ConnectionManager::new(client.clone()).await?;
    // Dedicated connection for the blocking group reads, so verdict
    // publishes and acks never queue behind an in-flight XREADGROUP BLOCK.
    let consume_conn = ConnectionManager::new(client).await?;

    bus::ensure_group(&mut bus_conn, &cfg.broker.submission_topic, &cfg.group_id).await?;
    info!(
        broker = %cfg.broker.url,
        topic = %cfg.broker.submission_topic,
        group = %cfg.group_id,
        "Connected to broker"
    );

    tokio::fs::create_dir_all(&cfg.host_temp_path).await?;

    let docker = Arc::new(DockerSandbox::new(&cfg.runtime_image, &cfg.host_temp_path)?);
    docker.ensure_image().await?;

    let pool = WorkerPool::start(docker.clone(), cfg.worker_count).await?;
    let problems = Arc::new(ProblemClient::new(&cfg.problem_service_addr));
    let engine = Arc::new(JudgeEngine::new(
        docker,
        problems,
        pool.clone(),
        cfg.host_temp_path.clone(),
        cfg.run_timeout,
        DEFAULT_COMPILE_TIMEOUT,
    ));

    let cancel = CancellationToken::new();

    let shutdown = async {
        if signal::ctrl_c().await.is_err() {
            error!("Failed to install CTRL+C handler");
        }
        warn!("Shutdown signal received - cancelling in-flight judging");
    };

    tokio::select! {
        result = consume_submissions(engine, consume_conn, bus_conn, &cfg, cancel.clone()) => result?,
        _ = shutdown => cancel.cancel(),
    }

    pool.shutdown().await;
    info!("Judge worker shutdown complete");
    Ok(())
}

/// Drain the submissions topic: one consumer task fetches batches, each
/// message is judged on its own task gated by a semaphore sized to the
/// worker pool. The entry is acked only after the verdict publish succeeds,
/// so a crash between judging and publishing redelivers the submission.
async fn consume_submissions(
    engine: Arc<JudgeEngine>,
    mut consume_conn: ConnectionManager,
    bus_conn: ConnectionManager,
    cfg: &JudgeConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let semaphore = Arc::new(Semaphore::new(cfg.worker_count));

    info!(consumer = %cfg.consumer_name, "Submission consumer started");

    // Walk our own pending backlog first: entries judged before a crash but
    // never acked get re-judged before any new work.
    let mut cursor = bus::BACKLOG_START.to_string();

    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            batch = bus::read_group(
                &mut consume_conn,
                &cfg.broker.submission_topic,
                &cfg.group_id,
                &cfg.consumer_name,
                &cursor,
                10,
                5000,
            ) => batch,
        };

        let messages = match batch {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Broker read error");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        if cursor != bus::NEW_MESSAGES {
            match messages.last() {
                Some(last) => cursor = last.id.clone(),
                None => {
                    info!("Pending backlog drained, switching to new messages");
                    cursor = bus::NEW_MESSAGES.to_string();
                    continue;
                }
            }
        }

        for message in messages {
            let permit = semaphore.clone().acquire_owned().await?;
            let engine = engine.clone();
            let mut conn = bus_conn.clone();
            let submission_topic = cfg.broker.submission_topic.clone();
            let result_topic = cfg.broker.result_topic.clone();
            let group = cfg.group_id.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _permit = permit;

                let event: SubmissionEvent = match message.decode() {
                    Ok(event) => event,
                    Err(e) => {
                        // An undecodable payload can never succeed; ack it
                        // so it does not redeliver forever.
                        warn!(entry_id = %message.id, error = %e, "Skipping undecodable submission event");
                        if let Err(e) =
                            bus::ack(&mut conn, &submission_topic, &group, &message.id).await
                        {
                            error!(entry_id = %message.id, error = %e, "Failed to ack bad event");
                        }
                        return;
                    }
                };

                let verdict = engine.judge(&event, &cancel).await;

                match bus::publish(&mut conn, &result_topic, &verdict).await {
                    Ok(_) => {
                        if let Err(e) =
                            bus::ack(&mut conn, &submission_topic, &group, &message.id).await
                        {
                            error!(
                                submission_id = %event.submission_id,
                                error = %e,
                                "Verdict published but ack failed; expect a duplicate verdict"
                            );
                        }
                    }
                    Err(e) => {
                        // Leave the entry pending: redelivery will re-judge
                        // and re-publish.
                        error!(
                            submission_id = %event.submission_id,
                            error = %e,
                            "Failed to publish verdict"
                        );
                    }
                }
            });
        }
    }
}
