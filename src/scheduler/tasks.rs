use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::poller::{ChannelPoller, PollOutcome};
use crate::scheduler::Scheduler;

/// Register the source channel poll as a repeated job.
pub async fn register_poll_task(
    scheduler: &Scheduler,
    poller: Arc<ChannelPoller>,
    interval: Duration,
) -> anyhow::Result<()> {
    scheduler
        .add_repeated_job(interval, "poll-source-channel", move || {
            let poller = poller.clone();
            async move {
                let outcome = poller.poll_once().await;
                log_outcome(&poller, outcome).await;
            }
            .boxed()
        })
        .await
}

async fn log_outcome(poller: &ChannelPoller, outcome: PollOutcome) {
    match outcome {
        PollOutcome::Completed(report) if report.fetched == 0 => {
            debug!("Poll cycle found nothing new");
        }
        PollOutcome::Completed(report) => {
            let watermark = poller
                .watermark()
                .await
                .map(|ts| ts.to_string())
                .unwrap_or_default();
            info!(
                "Poll cycle: fetched={} relayed={} skipped={} failed={} watermark={}",
                report.fetched, report.relayed, report.skipped, report.failed, watermark
            );
        }
        // Already logged by the poller; the next tick retries from the same watermark.
        PollOutcome::FetchFailed(e) => debug!("Poll cycle aborted: {}", e),
        PollOutcome::Overlapped => warn!("Poll tick skipped, previous cycle still running"),
    }
}
