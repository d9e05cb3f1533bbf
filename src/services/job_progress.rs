//! Mirrors one generation job's realtime frames into an observable view.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{GenerationJob, JobStatus, MessageKind, RealtimeMessage};
use crate::services::realtime::{RealtimeClient, Subscription};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobProgress {
    /// Clamped to `0.0..=100.0`
    pub percent: f32,
    pub stage: Option<String>,
    /// Seconds
    pub estimated_time_remaining: Option<u32>,
}

/// What the job's view should render.
#[derive(Debug, Clone, PartialEq)]
pub enum JobView {
    Running(JobProgress),
    Completed,
    Failed { error: String },
    Cancelled,
}

impl JobView {
    pub fn is_settled(&self) -> bool {
        !matches!(self, JobView::Running(_))
    }
}

type CompleteCallback = Box<dyn Fn(Uuid) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(Uuid, &str) + Send + Sync>;

#[derive(Default)]
pub struct JobCallbacks {
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl JobCallbacks {
    pub fn on_complete(mut self, f: impl Fn(Uuid) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(Uuid, &str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

struct Shared {
    job_id: Uuid,
    view: watch::Sender<JobView>,
    callbacks: JobCallbacks,
}

impl Shared {
    fn progress(&self, percent: f32, stage: Option<String>, remaining: Option<u32>) {
        self.view.send_if_modified(|view| match view {
            JobView::Running(progress) => {
                progress.percent = percent.clamp(0.0, 100.0);
                if stage.is_some() {
                    progress.stage = stage;
                }
                progress.estimated_time_remaining = remaining;
                true
            }
            // Settled jobs only move again through retry()
            _ => false,
        });
    }

    /// Moves a running job to `next`. Settled jobs only move again through
    /// retry().
    fn settle(&self, next: JobView) -> bool {
        self.view.send_if_modified(|view| {
            if view.is_settled() {
                return false;
            }
            *view = next;
            true
        })
    }

    fn complete(&self) {
        if self.settle(JobView::Completed) {
            info!(job_id = %self.job_id, "Generation job completed");
            if let Some(on_complete) = &self.callbacks.on_complete {
                on_complete(self.job_id);
            }
        }
    }

    fn fail(&self, error: &str) {
        let failed = JobView::Failed {
            error: error.to_string(),
        };
        if self.settle(failed) {
            warn!(job_id = %self.job_id, "Generation job failed: {}", error);
            if let Some(on_error) = &self.callbacks.on_error {
                on_error(self.job_id, error);
            }
        }
    }

    fn cancel(&self) {
        if self.settle(JobView::Cancelled) {
            info!(job_id = %self.job_id, "Generation job cancelled");
        }
    }

    fn handle(&self, message: &RealtimeMessage) {
        if message.job_id() != Some(self.job_id) {
            return;
        }

        match message {
            RealtimeMessage::JobProgress {
                progress,
                stage,
                estimated_time_remaining,
                ..
            } => self.progress(*progress, stage.clone(), *estimated_time_remaining),
            RealtimeMessage::JobCompleted { .. } => self.complete(),
            RealtimeMessage::JobFailed { error, .. } => self.fail(error),
            _ => {}
        }
    }
}

/// Live progress for one job. Holds its three subscriptions until dropped.
pub struct JobProgressTracker {
    shared: Arc<Shared>,
    _subscriptions: Vec<Subscription>,
}

impl JobProgressTracker {
    pub fn attach(
        client: &RealtimeClient,
        job_id: Uuid,
        initial: Option<JobProgress>,
        callbacks: JobCallbacks,
    ) -> Self {
        let (view, _) = watch::channel(JobView::Running(initial.unwrap_or_default()));
        let shared = Arc::new(Shared {
            job_id,
            view,
            callbacks,
        });

        let subscriptions = [
            MessageKind::JobProgress,
            MessageKind::JobCompleted,
            MessageKind::JobFailed,
        ]
        .into_iter()
        .map(|kind| {
            let shared = shared.clone();
            client.subscribe(kind, move |message| shared.handle(message))
        })
        .collect();

        debug!(%job_id, "Tracking generation job");
        Self {
            shared,
            _subscriptions: subscriptions,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.shared.job_id
    }

    pub fn view(&self) -> JobView {
        self.shared.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<JobView> {
        self.shared.view.subscribe()
    }

    /// Mirrors a polled job record into the view.
    pub fn apply_snapshot(&self, job: &GenerationJob) {
        if job.id != self.shared.job_id {
            return;
        }

        match job.status {
            JobStatus::Completed => self.shared.complete(),
            JobStatus::Failed => self.shared.fail(
                job.error_message
                    .as_deref()
                    .unwrap_or("Generation failed"),
            ),
            JobStatus::Cancelled => self.shared.cancel(),
            JobStatus::Queued | JobStatus::Pending | JobStatus::InProgress => self.shared.progress(
                job.progress.unwrap_or(0.0),
                job.stage.clone(),
                job.estimated_time_remaining,
            ),
        }
    }

    /// Puts a settled job back into the running state, for an explicit retry.
    pub fn retry(&self) {
        info!(job_id = %self.shared.job_id, "Retrying generation job");
        self.shared
            .view
            .send_replace(JobView::Running(JobProgress::default()));
    }

    /// Stops listening. Same as dropping the tracker.
    pub fn detach(self) {}
}
