use crate::types::TrainingSummary;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded { summary: TrainingSummary },
    Failed { error: String },
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Succeeded { .. } | JobState::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded { .. } => "succeeded",
            JobState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJob {
    pub job_id: Uuid,
    pub row_count: usize,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub state: JobState,
}

/// Finished jobs kept for polling when no retention is configured.
pub const DEFAULT_JOB_RETENTION: usize = 100;

#[derive(Debug, Default)]
struct Jobs {
    by_id: HashMap<Uuid, TrainingJob>,
    // oldest first
    finished: VecDeque<Uuid>,
}

/// In-memory record of submitted training jobs, polled by clients waiting
/// for a background training run to complete.
///
/// Queued and running jobs are always kept. Only the most recent `retention`
/// finished jobs are; older ones are evicted as new jobs finish.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<Jobs>,
    retention: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_JOB_RETENTION)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            jobs: RwLock::new(Jobs::default()),
            retention,
        }
    }

    pub fn submit(&self, row_count: usize) -> TrainingJob {
        let job = TrainingJob {
            job_id: Uuid::new_v4(),
            row_count,
            submitted_at: Utc::now(),
            finished_at: None,
            state: JobState::Queued,
        };
        self.jobs.write().by_id.insert(job.job_id, job.clone());
        job
    }

    pub fn get(&self, job_id: &Uuid) -> Option<TrainingJob> {
        self.jobs.read().by_id.get(job_id).cloned()
    }

    pub fn mark_running(&self, job_id: &Uuid) {
        self.transition(job_id, JobState::Running);
    }

    pub fn complete(&self, job_id: &Uuid, summary: TrainingSummary) {
        self.transition(job_id, JobState::Succeeded { summary });
    }

    pub fn fail(&self, job_id: &Uuid, error: String) {
        self.transition(job_id, JobState::Failed { error });
    }

    /// Number of jobs currently tracked, finished or not.
    pub fn len(&self) -> usize {
        self.jobs.read().by_id.len()
    }

    fn transition(&self, job_id: &Uuid, state: JobState) {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.by_id.get_mut(job_id) else {
            return;
        };
        if job.state.is_finished() {
            return;
        }

        let finished = state.is_finished();
        if finished {
            job.finished_at = Some(Utc::now());
        }
        job.state = state;

        if finished {
            jobs.finished.push_back(*job_id);
            while jobs.finished.len() > self.retention {
                if let Some(evicted) = jobs.finished.pop_front() {
                    jobs.by_id.remove(&evicted);
                    debug!("Evicted finished training job {}", evicted);
                }
            }
        }
    }
}
