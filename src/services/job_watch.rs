//! Follows a generation job to completion, over the realtime channel when it
//! is up and by polling the REST API when it is not.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::services::api::ApiClient;
use crate::services::job_progress::{JobCallbacks, JobProgressTracker, JobView};
use crate::services::realtime::RealtimeClient;

/// Floor for the polling interval. `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct JobWatcher {
    api: ApiClient,
    realtime: Arc<RealtimeClient>,
    poll_interval: Duration,
}

impl JobWatcher {
    pub fn new(api: ApiClient, realtime: Arc<RealtimeClient>, poll_interval: Duration) -> Self {
        Self {
            api,
            realtime,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Waits until the job settles, calling `on_update` for every change of
    /// its view. Returns the final view.
    pub async fn watch<F>(&self, job_id: Uuid, mut on_update: F) -> Result<JobView>
    where
        F: FnMut(&JobView),
    {
        let tracker =
            JobProgressTracker::attach(&self.realtime, job_id, None, JobCallbacks::default());
        let mut view_rx = tracker.watch();

        // A job may have settled before the subscription existed
        self.poll_once(&tracker).await?;

        let mut state_rx = self.realtime.watch_state();
        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        let mut last: Option<JobView> = None;
        loop {
            let view = view_rx.borrow_and_update().clone();
            if last.as_ref() != Some(&view) {
                on_update(&view);
            }
            if view.is_settled() {
                info!(%job_id, "Stopped watching settled job");
                return Ok(view);
            }
            last = Some(view);

            tokio::select! {
                changed = view_rx.changed() => {
                    if changed.is_err() {
                        return Ok(tracker.view());
                    }
                }
                // Re-evaluates whether polling is needed
                _ = state_rx.changed() => {}
                _ = poll.tick(), if !self.realtime.is_connected() => {
                    debug!(%job_id, "Realtime channel down, polling job");
                    self.poll_once(&tracker).await?;
                }
            }
        }
    }

    /// Transient failures are logged and retried on the next tick. Auth
    /// failures end the watch.
    async fn poll_once(&self, tracker: &JobProgressTracker) -> Result<()> {
        match self.api.get_job(tracker.job_id()).await {
            Ok(job) => tracker.apply_snapshot(&job),
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => warn!(job_id = %tracker.job_id(), "Polling job failed: {}", e),
        }
        Ok(())
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        info!(%job_id, "Cancelling generation job");
        self.api.cancel_job(job_id).await
    }
}
