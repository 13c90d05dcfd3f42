//! Repeating status checks for the active job.
//!
//! A [`PollingHandle`] owns the background task. The first check runs
//! immediately, later ones every `interval`. The task stops by itself after
//! reporting a terminal status or a fetch error, and is cancelled when the
//! handle is cancelled or dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::controller::Event;
use crate::models::job::JobId;
use crate::services::job_service::JobService;

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: Option<u32>,
}

/// Ownership token for the one running poll loop.
pub struct PollingHandle {
    job_id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollingHandle {
    pub(crate) fn start<S>(
        service: Arc<S>,
        job_id: JobId,
        settings: PollSettings,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self
    where
        S: JobService + ?Sized + 'static,
    {
        let cancel = CancellationToken::new();

        let task = tokio::spawn(poll_loop(
            service,
            job_id.clone(),
            settings,
            events,
            cancel.clone(),
        ));

        tracing::debug!(job_id = %job_id, interval_ms = settings.interval.as_millis() as u64, "Polling started");

        Self { job_id, cancel, task }
    }

    /// Stop polling. A fetch already in flight is abandoned.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(job_id = %self.job_id, "Polling stopped");
        }
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn poll_loop<S>(
    service: Arc<S>,
    job_id: JobId,
    settings: PollSettings,
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) where
    S: JobService + ?Sized,
{
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Some(max) = settings.max_polls {
            if polls >= max {
                tracing::warn!(job_id = %job_id, polls, "Poll limit reached");
                let _ = events.send(Event::PollLimitReached {
                    job_id: job_id.clone(),
                    polls,
                });
                break;
            }
        }
        polls += 1;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = service.fetch_status(&job_id) => outcome,
        };

        let stop = match &outcome {
            Ok(payload) => payload.is_terminal(),
            Err(_) => true,
        };

        tracing::trace!(job_id = %job_id, poll = polls, stop, "Status fetched");

        if events
            .send(Event::Status {
                job_id: job_id.clone(),
                outcome,
            })
            .is_err()
            || stop
        {
            break;
        }
    }
}
