//! Active provisioning jobs, keyed by template id.

use crate::events::{ProvisionEvent, ProvisionPhase};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Provision,
    Recreate,
    Finalize,
    /// Deletion or a stack edit holding the slot so no job can start underneath it.
    Maintenance,
}

/// What a running job is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub template_id: String,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
    /// Latest `Progress` event, if the job has reported one.
    pub latest: Option<ProvisionEvent>,
}

struct ActiveJob {
    progress: JobProgress,
    tx: broadcast::Sender<ProvisionEvent>,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<String, ActiveJob>,
    errors: HashMap<String, String>,
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the job slot for `template_id`. `None` if a job already holds it.
    pub fn try_begin(&self, template_id: &str, kind: JobKind) -> Option<JobReporter> {
        let mut state = self.lock();
        if state.active.contains_key(template_id) {
            return None;
        }

        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        state.active.insert(
            template_id.to_string(),
            ActiveJob {
                progress: JobProgress {
                    template_id: template_id.to_string(),
                    kind,
                    started_at: Utc::now(),
                    latest: None,
                },
                tx,
            },
        );
        state.errors.remove(template_id);
        debug!(template_id, ?kind, "job slot claimed");

        Some(JobReporter {
            registry: self.clone(),
            template_id: template_id.to_string(),
            finished: false,
        })
    }

    pub fn is_active(&self, template_id: &str) -> bool {
        self.lock().active.contains_key(template_id)
    }

    pub fn progress(&self, template_id: &str) -> Option<JobProgress> {
        self.lock()
            .active
            .get(template_id)
            .map(|job| job.progress.clone())
    }

    /// Message of the last job for this template that ended in error.
    pub fn last_error(&self, template_id: &str) -> Option<String> {
        self.lock().errors.get(template_id).cloned()
    }

    pub fn active_jobs(&self) -> Vec<JobProgress> {
        let mut jobs: Vec<_> = self
            .lock()
            .active
            .values()
            .map(|job| job.progress.clone())
            .collect();
        jobs.sort_by(|a, b| a.template_id.cmp(&b.template_id));
        jobs
    }

    /// Follow the running job for `template_id`: the latest progress snapshot
    /// first, then live events up to and including the terminal one.
    pub fn watch(&self, template_id: &str) -> Option<BoxStream<'static, ProvisionEvent>> {
        let state = self.lock();
        let job = state.active.get(template_id)?;
        let latest = job.progress.latest.clone();
        let rx = job.tx.subscribe();

        let live = BroadcastStream::new(rx).filter_map(|item| async move { item.ok() });
        Some(stream::iter(latest).chain(live).boxed())
    }

    fn report_progress(&self, template_id: &str, phase: ProvisionPhase, step: usize, total: usize, message: String) {
        self.report(
            template_id,
            ProvisionEvent::Progress {
                phase,
                step,
                total,
                message,
            },
        );
    }

    fn report(&self, template_id: &str, event: ProvisionEvent) {
        let mut state = self.lock();
        if let Some(job) = state.active.get_mut(template_id) {
            job.progress.latest = Some(event.clone());
            let _ = job.tx.send(event);
        }
    }

    fn finish(&self, template_id: &str, event: ProvisionEvent) {
        let mut state = self.lock();
        let Some(job) = state.active.remove(template_id) else {
            return;
        };
        match &event {
            ProvisionEvent::Error { message } => {
                state.errors.insert(template_id.to_string(), message.clone());
            }
            _ => {
                state.errors.remove(template_id);
            }
        }
        // Dropping the sender afterwards ends every watcher's stream.
        let _ = job.tx.send(event);
    }

    fn release(&self, template_id: &str) {
        self.lock().active.remove(template_id);
    }
}

/// Handle a job uses to report events. Holding it holds the job slot.
///
/// Ending the job goes through [`JobReporter::complete`] or
/// [`JobReporter::fail`]. A reporter dropped without either (the task
/// panicked or returned early) emits an `Error` so watchers always see a
/// terminal event.
pub struct JobReporter {
    registry: JobRegistry,
    template_id: String,
    finished: bool,
}

impl JobReporter {
    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    /// A progress-only handle for the task doing the work. It cannot end the
    /// job, so the slot stays held until this reporter is finished.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            registry: self.registry.clone(),
            template_id: self.template_id.clone(),
        }
    }

    pub fn progress(&self, phase: ProvisionPhase, step: usize, total: usize, message: impl Into<String>) {
        self.registry
            .report_progress(&self.template_id, phase, step, total, message.into());
    }

    pub fn complete(mut self, status: yard_core::TemplateStatus) {
        self.finished = true;
        self.registry
            .finish(&self.template_id, ProvisionEvent::Complete { status });
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.finished = true;
        self.registry.finish(
            &self.template_id,
            ProvisionEvent::Error {
                message: message.into(),
            },
        );
    }

    /// Give the slot back without emitting anything. Only for a job that
    /// turned out not to be startable.
    pub fn discard(mut self) {
        self.finished = true;
        self.registry.release(&self.template_id);
    }
}

/// Reports progress for a job without holding its slot.
#[derive(Clone)]
pub struct JobHandle {
    registry: JobRegistry,
    template_id: String,
}

impl JobHandle {
    pub fn progress(&self, phase: ProvisionPhase, step: usize, total: usize, message: impl Into<String>) {
        self.registry
            .report_progress(&self.template_id, phase, step, total, message.into());
    }
}

impl Drop for JobReporter {
    fn drop(&mut self) {
        if !self.finished {
            warn!(template_id = %self.template_id, "provisioning job ended without a result");
            self.registry.finish(
                &self.template_id,
                ProvisionEvent::Error {
                    message: "provisioning job aborted".to_string(),
                },
            );
        }
    }
}
