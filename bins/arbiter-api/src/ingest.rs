/// Result ingestion - folds judge verdicts back into the database.
///
/// Fetch, process, then ack. A processing failure leaves the entry pending
/// so the broker redelivers it; because the status update is monotone and
/// invalidation idempotent, redelivery of an already-applied verdict is
/// harmless.
use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::{error, info, warn};

use arbiter_common::bus;
use arbiter_common::events::ResultEvent;

use crate::store::SubmissionStore;

const MAX_BACKOFF_SECS: u64 = 30;

pub async fn consume_results(
    store: SubmissionStore,
    mut conn: ConnectionManager,
    topic: String,
    group: String,
    consumer: String,
) {
    info!(%topic, %group, %consumer, "Result consumer started");

    let mut consecutive_failures: u32 = 0;
    // Re-read this consumer's pending entries first (crash recovery), then
    // follow new messages.
    let mut cursor = bus::BACKLOG_START.to_string();

    loop {
        let batch = bus::read_group(&mut conn, &topic, &group, &consumer, &cursor, 10, 5000).await;

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
            let event: ResultEvent = match message.decode() {
                Ok(event) => event,
                Err(e) => {
                    warn!(entry_id = %message.id, error = %e, "Skipping undecodable result event");
                    if let Err(e) = bus::ack(&mut conn, &topic, &group, &message.id).await {
                        error!(entry_id = %message.id, error = %e, "Failed to ack bad event");
                    }
                    continue;
                }
            };

            match store.apply_result(&event).await {
                Ok(()) => {
                    consecutive_failures = 0;
                    if let Err(e) = bus::ack(&mut conn, &topic, &group, &message.id).await {
                        error!(
                            submission_id = %event.submission_id,
                            error = %e,
                            "Processed result but ack failed; expect a redelivery"
                        );
                    }
                }
                Err(e) => {
                    // No ack: the entry stays pending for redelivery.
                    error!(
                        submission_id = %event.submission_id,
                        error = %e,
                        "Failed to process result"
                    );
                    consecutive_failures = consecutive_failures.saturating_add(1);

                    if consecutive_failures >= 3 {
                        let backoff_secs =
                            (2_u64.pow(consecutive_failures - 3)).min(MAX_BACKOFF_SECS);
                        warn!(
                            consecutive_failures,
                            backoff_secs, "Multiple processing failures, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    }
                }
            }
        }
    }
}
