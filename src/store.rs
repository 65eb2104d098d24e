use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::attempt::{AttemptRecord, AttemptStatus, AttemptUpdate};
use crate::models::exam::ExamContent;

/// User-facing notices the engine emits; rendering them (toast, snackbar,
/// whatever) is the host's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Time ran out; the attempt will auto-submit after the grace delay.
    TimeExpired,
    /// A persistence call failed; the attempt continues unsaved.
    ProgressNotSaved,
    AttemptResumed,
    AttemptAbandoned,
}

/// Resolves exam identifiers to validated content.
#[async_trait]
pub trait ExamSource: Send + Sync {
    async fn load_exam(&self, exam_id: &str) -> anyhow::Result<Option<ExamContent>>;
}

/// Answers whether a persistent user identity is present. `None` puts the
/// engine in local-only mode for the whole attempt.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn current_user(&self) -> Option<String>;
}

/// The hosted attempt store. All calls are best-effort from the engine's
/// point of view: failures are reported, never propagated into the attempt
/// flow.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn create(&self, record: &AttemptRecord) -> anyhow::Result<Uuid>;

    /// Idempotent upsert of the populated fields only.
    async fn update(&self, attempt_id: Uuid, update: &AttemptUpdate) -> anyhow::Result<()>;

    async fn fetch_in_progress(&self, exam_id: &str) -> anyhow::Result<Option<AttemptRecord>>;
}

pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Drops every notice; for hosts (and tests) that don't surface them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotices;

impl NoticeSink for NullNotices {
    fn notify(&self, _notice: Notice) {}
}

/// Identity resolver with a fixed answer, for hosts that resolve the session
/// up front and for tests.
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub Option<String>);

#[async_trait]
impl IdentityResolver for FixedIdentity {
    async fn current_user(&self) -> Option<String> {
        self.0.clone()
    }
}

/// In-memory reference implementation of [`ExamSource`] and [`AttemptStore`].
/// Backs the integration tests and serves hosts that run without a hosted
/// backend.
#[derive(Default)]
pub struct MemoryStore {
    exams: Mutex<HashMap<String, ExamContent>>,
    attempts: Mutex<HashMap<Uuid, AttemptRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_exam(&self, content: ExamContent) {
        self.exams
            .lock()
            .expect("exam map poisoned")
            .insert(content.exam_id.clone(), content);
    }

    pub fn insert_attempt(&self, record: AttemptRecord) {
        self.attempts
            .lock()
            .expect("attempt map poisoned")
            .insert(record.id, record);
    }

    pub fn get_attempt(&self, attempt_id: Uuid) -> Option<AttemptRecord> {
        self.attempts
            .lock()
            .expect("attempt map poisoned")
            .get(&attempt_id)
            .cloned()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().expect("attempt map poisoned").len()
    }
}

#[async_trait]
impl ExamSource for MemoryStore {
    async fn load_exam(&self, exam_id: &str) -> anyhow::Result<Option<ExamContent>> {
        Ok(self
            .exams
            .lock()
            .expect("exam map poisoned")
            .get(exam_id)
            .cloned())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn create(&self, record: &AttemptRecord) -> anyhow::Result<Uuid> {
        self.attempts
            .lock()
            .expect("attempt map poisoned")
            .insert(record.id, record.clone());
        Ok(record.id)
    }

    async fn update(&self, attempt_id: Uuid, update: &AttemptUpdate) -> anyhow::Result<()> {
        let mut attempts = self.attempts.lock().expect("attempt map poisoned");
        let record = attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| anyhow::anyhow!("attempt {} not found", attempt_id))?;

        if let Some(answers) = &update.user_answers {
            record.user_answers = answers.clone();
        }
        if let Some(index) = update.current_block_index {
            record.current_block_index = index;
        }
        if let Some(remaining) = update.remaining_seconds {
            record.remaining_seconds = remaining;
        }
        if let Some(times) = &update.block_time_spent {
            record.block_time_spent = times.clone();
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(scores) = &update.block_scores {
            record.block_scores = Some(scores.clone());
        }
        if let Some(total) = update.total_score {
            record.total_score = Some(total);
        }
        if let Some(max) = update.max_score {
            record.max_score = Some(max);
        }
        if let Some(pct) = update.percentage {
            record.percentage = Some(pct);
        }
        if let Some(at) = update.completed_at {
            record.completed_at = Some(at);
        }

        Ok(())
    }

    async fn fetch_in_progress(&self, exam_id: &str) -> anyhow::Result<Option<AttemptRecord>> {
        Ok(self
            .attempts
            .lock()
            .expect("attempt map poisoned")
            .values()
            .find(|a| a.exam_id == exam_id && a.status == AttemptStatus::InProgress)
            .cloned())
    }
}
