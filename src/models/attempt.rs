use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::answer::AnswerSheet;
use crate::models::exam::ExamContent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Abandoned,
}

/// Computed once per block at submission time, immutable thereafter.
/// `max_score` is always the block's question count, regardless of the
/// non-negative floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockScore {
    pub block_id: String,
    pub score: i32,
    pub max_score: i32,
    #[serde(default)]
    pub time_spent_seconds: i64,
}

/// The persisted shape of one attempt, as the external store sees it. The
/// exam content is snapshotted at start so a completed attempt stays
/// reviewable against the content it was actually taken with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub exam_id: String,
    pub user_id: Option<String>,
    pub exam_data: ExamContent,
    pub user_answers: AnswerSheet,
    pub current_block_index: usize,
    pub remaining_seconds: u32,
    pub total_seconds: u32,
    #[serde(default)]
    pub block_time_spent: BTreeMap<String, i64>,
    pub status: AttemptStatus,
    pub block_scores: Option<Vec<BlockScore>>,
    pub total_score: Option<i32>,
    pub max_score: Option<i32>,
    pub percentage: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update for [`crate::store::AttemptStore::update`]; only the
/// populated fields are written, and writing the same update twice must leave
/// the stored attempt unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptUpdate {
    pub user_answers: Option<AnswerSheet>,
    pub current_block_index: Option<usize>,
    pub remaining_seconds: Option<u32>,
    pub block_time_spent: Option<BTreeMap<String, i64>>,
    pub status: Option<AttemptStatus>,
    pub block_scores: Option<Vec<BlockScore>>,
    pub total_score: Option<i32>,
    pub max_score: Option<i32>,
    pub percentage: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Handoff payload for the results view once an attempt completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamResult {
    pub attempt_id: Option<Uuid>,
    pub block_scores: Vec<BlockScore>,
    pub total_score: i32,
    pub max_score: i32,
    pub percentage: f64,
    pub final_answers: AnswerSheet,
    pub content: ExamContent,
}

/// Best percentage across a user's completed attempts, for the course
/// history view. `None` when nothing has been completed yet.
pub fn best_percentage(attempts: &[AttemptRecord]) -> Option<f64> {
    attempts
        .iter()
        .filter(|a| a.status == AttemptStatus::Completed)
        .filter_map(|a| a.percentage)
        .fold(None, |best, p| match best {
            Some(b) if b >= p => Some(b),
            _ => Some(p),
        })
}
