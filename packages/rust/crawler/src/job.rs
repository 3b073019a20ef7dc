//! Lifecycle record of a single crawl run.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle state of an [`ImportJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One logical crawl run, owned by the crawler that executes it.
#[derive(Debug, Clone)]
pub struct ImportJob {
    /// Time-sortable run identifier.
    pub id: Uuid,
    pub state: JobState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Requests handed to the transport.
    pub dispatched: u64,
    /// Requests whose response (or failure) came back.
    pub completed: u64,
}

impl ImportJob {
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            state: JobState::Idle,
            started_at: None,
            finished_at: None,
            dispatched: 0,
            completed: 0,
        }
    }

    pub fn start(&mut self) {
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self) {
        self.finish(JobState::Succeeded);
    }

    pub fn fail(&mut self) {
        self.finish(JobState::Failed);
    }

    fn finish(&mut self, state: JobState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration of the run, if it has finished.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

impl Default for ImportJob {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let mut job = ImportJob::new();
        assert_eq!(job.state, JobState::Idle);
        assert!(job.elapsed().is_none());

        job.start();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at.is_some());

        job.fail();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.elapsed().is_some_and(|d| d >= chrono::Duration::zero()));
        assert_eq!(job.state.to_string(), "failed");
    }
}
