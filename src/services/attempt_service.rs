use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::answer::AnswerSheet;
use crate::models::attempt::{AttemptRecord, AttemptStatus, AttemptUpdate, ExamResult};
use crate::models::exam::{ExamBlock, ExamContent};
use crate::services::scoring_service::ScoringService;
use crate::store::{AttemptStore, ExamSource, IdentityResolver, Notice, NoticeSink};
use crate::timer::{CountdownTimer, TimerTick};
use crate::utils::time::{elapsed_seconds, Clock};

/// Resolved once when the attempt begins and never re-checked mid-attempt:
/// either the user has a persistent identity and progress syncs to the store,
/// or everything stays local and is discarded on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    Synced,
    LocalOnly,
}

#[derive(Debug, Clone)]
enum Phase {
    NotStarted,
    /// A prior in-progress attempt for this exam was found; the user decides
    /// between `resume` and `start_fresh`.
    Resuming(Box<AttemptRecord>),
    Running,
    Completed,
    Abandoned,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::NotStarted => "not_started",
            Phase::Resuming(_) => "resuming",
            Phase::Running => "running",
            Phase::Completed => "completed",
            Phase::Abandoned => "abandoned",
        }
    }
}

/// Outcome of one countdown tick, surfaced to the driving event loop.
#[derive(Debug)]
pub enum TickOutcome {
    Running { remaining_seconds: u32 },
    /// Time ran out; the attempt auto-submits in `auto_submit_in` ticks.
    Expired { auto_submit_in: u32 },
    AutoSubmitted(Box<ExamResult>),
    /// The attempt is no longer running; the tick did nothing.
    Idle,
}

/// The engine's external collaborators. UI, auth, and the hosted store live
/// behind these; the engine owns no ambient session state.
pub struct Collaborators {
    pub exam_source: Arc<dyn ExamSource>,
    pub store: Arc<dyn AttemptStore>,
    pub identity: Arc<dyn IdentityResolver>,
    pub notices: Arc<dyn NoticeSink>,
    pub clock: Arc<dyn Clock>,
}

/// The attempt state machine of record: NotStarted → Running → Completed,
/// with Abandoned reachable via explicit cancellation and Resuming entered
/// when a prior in-progress attempt is found at `begin`.
///
/// Persistence is best-effort throughout. A failed store call degrades the
/// attempt to unsaved progress with a warning notice; it never blocks a
/// local transition, and a failed completion write never blocks the result
/// handoff.
pub struct AttemptService {
    content: ExamContent,
    config: EngineConfig,
    deps: Collaborators,
    phase: Phase,
    mode: PersistenceMode,
    user_id: Option<String>,
    attempt_id: Option<Uuid>,
    answers: AnswerSheet,
    current_block_index: usize,
    timer: CountdownTimer,
    block_time_spent: BTreeMap<String, i64>,
    block_entered_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
    grace_remaining: Option<u32>,
    ticks_since_save: u32,
}

impl std::fmt::Debug for AttemptService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptService")
            .field("phase", &self.phase)
            .field("mode", &self.mode)
            .field("user_id", &self.user_id)
            .field("attempt_id", &self.attempt_id)
            .field("current_block_index", &self.current_block_index)
            .finish_non_exhaustive()
    }
}

impl AttemptService {
    /// Entry point for one exam: loads and validates the content, resolves
    /// the identity into a persistence mode, and checks the store for a
    /// resumable prior attempt. A store failure here degrades to "no prior
    /// attempt" rather than blocking the exam.
    pub async fn begin(
        exam_id: &str,
        deps: Collaborators,
        config: EngineConfig,
    ) -> Result<Self> {
        let content = deps
            .exam_source
            .load_exam(exam_id)
            .await?
            .ok_or_else(|| Error::ExamNotFound(exam_id.to_string()))?
            .validated()?;

        let user_id = deps.identity.current_user().await;
        let mode = if user_id.is_some() {
            PersistenceMode::Synced
        } else {
            PersistenceMode::LocalOnly
        };

        let prior = if mode == PersistenceMode::Synced {
            match deps.store.fetch_in_progress(exam_id).await {
                Ok(prior) => prior,
                Err(e) => {
                    warn!(exam_id, error = %e, "prior-attempt lookup failed, starting clean");
                    None
                }
            }
        } else {
            None
        };

        let phase = match prior {
            Some(p) if p.status == AttemptStatus::InProgress => Phase::Resuming(Box::new(p)),
            _ => Phase::NotStarted,
        };

        let now = deps.clock.now();
        Ok(Self {
            content,
            config,
            deps,
            phase,
            mode,
            user_id,
            attempt_id: None,
            answers: AnswerSheet::new(),
            current_block_index: 0,
            timer: CountdownTimer::new(),
            block_time_spent: BTreeMap::new(),
            block_entered_at: now,
            started_at: now,
            grace_remaining: None,
            ticks_since_save: 0,
        })
    }

    /// Starts a fresh attempt with the confirmed duration. Rejects a zero
    /// duration before any state changes.
    pub async fn configure_and_start(&mut self, total_seconds: u32) -> Result<()> {
        if !matches!(self.phase, Phase::NotStarted) {
            return Err(Error::InvalidTransition {
                phase: self.phase.name(),
                action: "start",
            });
        }
        if total_seconds == 0 {
            return Err(Error::InvalidDuration);
        }

        let now = self.deps.clock.now();
        self.answers = AnswerSheet::new();
        self.current_block_index = 0;
        self.block_time_spent.clear();
        self.timer.start(total_seconds)?;
        self.block_entered_at = now;
        self.started_at = now;
        self.grace_remaining = None;
        self.ticks_since_save = 0;
        self.phase = Phase::Running;

        if self.mode == PersistenceMode::Synced {
            let record = self.snapshot_record();
            match self.deps.store.create(&record).await {
                Ok(id) => {
                    self.attempt_id = Some(id);
                    info!(attempt_id = %id, exam_id = %self.content.exam_id, "exam attempt created");
                }
                Err(e) => {
                    warn!(exam_id = %self.content.exam_id, error = %e,
                        "failed to create attempt record, continuing unsaved");
                    self.deps.notices.notify(Notice::ProgressNotSaved);
                }
            }
        }

        Ok(())
    }

    /// Continues the prior in-progress attempt found at `begin`, with
    /// optional bonus seconds on top of the saved remaining time. Fails with
    /// `ResumeMismatch` when the saved snapshot no longer lines up with the
    /// current content; the caller then falls back to `start_fresh`.
    pub async fn resume(&mut self, extra_seconds: u32) -> Result<()> {
        let prior = match &self.phase {
            Phase::Resuming(prior) => prior.as_ref().clone(),
            _ => {
                return Err(Error::InvalidTransition {
                    phase: self.phase.name(),
                    action: "resume",
                })
            }
        };

        check_resume_consistency(&self.content, &prior)?;
        self.timer.restore(
            prior.remaining_seconds.saturating_add(extra_seconds),
            prior.total_seconds.saturating_add(extra_seconds),
        )?;

        self.attempt_id = Some(prior.id);
        self.answers = prior.user_answers.clone();
        self.current_block_index = prior.current_block_index;
        self.block_time_spent = prior.block_time_spent.clone();
        self.started_at = prior.started_at;
        self.block_entered_at = self.deps.clock.now();
        self.grace_remaining = None;
        self.ticks_since_save = 0;
        self.phase = Phase::Running;

        info!(attempt_id = %prior.id, exam_id = %self.content.exam_id,
            remaining = self.timer.remaining(), "exam attempt resumed");
        self.deps.notices.notify(Notice::AttemptResumed);

        let update = self.progress_update();
        self.save(update).await;
        Ok(())
    }

    /// Declines the prior attempt: marks it abandoned in the store and drops
    /// back to NotStarted so `configure_and_start` can run.
    pub async fn start_fresh(&mut self) -> Result<()> {
        let prior = match &self.phase {
            Phase::Resuming(prior) => prior.as_ref().clone(),
            _ => {
                return Err(Error::InvalidTransition {
                    phase: self.phase.name(),
                    action: "start_fresh",
                })
            }
        };

        if self.mode == PersistenceMode::Synced {
            let update = AttemptUpdate {
                status: Some(AttemptStatus::Abandoned),
                ..Default::default()
            };
            if let Err(e) = self.deps.store.update(prior.id, &update).await {
                warn!(attempt_id = %prior.id, error = %e, "failed to abandon prior attempt");
                self.deps.notices.notify(Notice::ProgressNotSaved);
            }
        }

        self.phase = Phase::NotStarted;
        Ok(())
    }

    /// Whole-set replacement of one question's selection, followed by an
    /// immediate best-effort save.
    pub async fn answer_question(
        &mut self,
        question_id: &str,
        selected_options: BTreeSet<usize>,
    ) -> Result<()> {
        self.require_running("answer a question")?;
        if self.content.find_question(question_id).is_none() {
            return Err(Error::UnknownQuestion(question_id.to_string()));
        }

        self.answers.set_answer(question_id, selected_options);
        let update = self.progress_update();
        self.save(update).await;
        Ok(())
    }

    /// Resets one question to unanswered.
    pub async fn clear_answer(&mut self, question_id: &str) -> Result<()> {
        self.require_running("clear an answer")?;
        if self.content.find_question(question_id).is_none() {
            return Err(Error::UnknownQuestion(question_id.to_string()));
        }

        self.answers.clear(question_id);
        let update = self.progress_update();
        self.save(update).await;
        Ok(())
    }

    pub async fn advance_block(&mut self) -> Result<()> {
        self.require_running("advance a block")?;
        if self.current_block_index + 1 >= self.content.blocks.len() {
            return Err(Error::BlockOutOfRange(self.current_block_index + 1));
        }

        self.record_block_time();
        self.current_block_index += 1;
        let update = self.progress_update();
        self.save(update).await;
        Ok(())
    }

    /// Answers on the block being left stay in place; earlier blocks can be
    /// revisited and changed until submission.
    pub async fn retreat_block(&mut self) -> Result<()> {
        self.require_running("retreat a block")?;
        let Some(target) = self.current_block_index.checked_sub(1) else {
            return Err(Error::BlockOutOfRange(0));
        };

        self.record_block_time();
        self.current_block_index = target;
        let update = self.progress_update();
        self.save(update).await;
        Ok(())
    }

    /// One-way transition to Abandoned. Partial answers are persisted for a
    /// synced user; a local-only attempt is simply discarded.
    pub async fn cancel(&mut self) -> Result<()> {
        self.require_running("cancel")?;

        self.record_block_time();
        let update = AttemptUpdate {
            status: Some(AttemptStatus::Abandoned),
            ..self.progress_update()
        };
        self.save(update).await;
        self.phase = Phase::Abandoned;

        info!(exam_id = %self.content.exam_id, "exam attempt abandoned");
        self.deps.notices.notify(Notice::AttemptAbandoned);
        Ok(())
    }

    /// Final scoring over the current answers. The result is computed and
    /// returned regardless of whether the completion write succeeds.
    pub async fn submit(&mut self) -> Result<ExamResult> {
        self.require_running("submit")?;

        self.record_block_time();
        let summary = ScoringService::score(&self.content, &self.answers, &self.block_time_spent);
        let completed_at = self.deps.clock.now();

        let update = AttemptUpdate {
            status: Some(AttemptStatus::Completed),
            block_scores: Some(summary.block_scores.clone()),
            total_score: Some(summary.total_score),
            max_score: Some(summary.max_score),
            percentage: Some(summary.percentage),
            completed_at: Some(completed_at),
            ..self.progress_update()
        };
        self.save(update).await;
        self.phase = Phase::Completed;

        info!(exam_id = %self.content.exam_id, total_score = summary.total_score,
            max_score = summary.max_score, "exam attempt submitted");

        Ok(ExamResult {
            attempt_id: self.attempt_id,
            block_scores: summary.block_scores,
            total_score: summary.total_score,
            max_score: summary.max_score,
            percentage: summary.percentage,
            final_answers: self.answers.clone(),
            content: self.content.clone(),
        })
    }

    /// Drives the countdown; the host calls this once per second while the
    /// attempt runs. On expiry the `TimeExpired` notice fires and, after the
    /// configured grace delay, the attempt submits itself exactly once.
    /// Every `autosave_interval_secs` ticks a safety-net save goes out in
    /// case an immediate save was missed.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if !matches!(self.phase, Phase::Running) {
            return Ok(TickOutcome::Idle);
        }

        if let Some(grace) = self.grace_remaining {
            if grace <= 1 {
                self.grace_remaining = None;
                let result = self.submit().await?;
                return Ok(TickOutcome::AutoSubmitted(Box::new(result)));
            }
            self.grace_remaining = Some(grace - 1);
            return Ok(TickOutcome::Expired {
                auto_submit_in: grace - 1,
            });
        }

        match self.timer.tick() {
            TimerTick::Running(remaining) => {
                self.ticks_since_save += 1;
                if self.ticks_since_save >= self.config.autosave_interval_secs.max(1) {
                    self.ticks_since_save = 0;
                    let update = self.progress_update();
                    self.save(update).await;
                }
                Ok(TickOutcome::Running {
                    remaining_seconds: remaining,
                })
            }
            TimerTick::Expired => {
                self.deps.notices.notify(Notice::TimeExpired);
                if self.config.expiry_grace_secs == 0 {
                    let result = self.submit().await?;
                    return Ok(TickOutcome::AutoSubmitted(Box::new(result)));
                }
                self.grace_remaining = Some(self.config.expiry_grace_secs);
                Ok(TickOutcome::Expired {
                    auto_submit_in: self.config.expiry_grace_secs,
                })
            }
            TimerTick::Spent => Ok(TickOutcome::Idle),
        }
    }

    pub fn has_prior_attempt(&self) -> bool {
        matches!(self.phase, Phase::Resuming(_))
    }

    pub fn prior_attempt(&self) -> Option<&AttemptRecord> {
        match &self.phase {
            Phase::Resuming(prior) => Some(prior),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.phase, Phase::Completed)
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self.phase, Phase::Abandoned)
    }

    pub fn mode(&self) -> PersistenceMode {
        self.mode
    }

    pub fn attempt_id(&self) -> Option<Uuid> {
        self.attempt_id
    }

    pub fn content(&self) -> &ExamContent {
        &self.content
    }

    pub fn current_block_index(&self) -> usize {
        self.current_block_index
    }

    pub fn current_block(&self) -> Option<&ExamBlock> {
        self.content.block(self.current_block_index)
    }

    pub fn answers(&self) -> &AnswerSheet {
        &self.answers
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.timer.remaining()
    }

    pub fn total_seconds(&self) -> u32 {
        self.timer.total()
    }

    pub fn block_time_spent(&self) -> &BTreeMap<String, i64> {
        &self.block_time_spent
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn require_running(&self, action: &'static str) -> Result<()> {
        if matches!(self.phase, Phase::Running) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                phase: self.phase.name(),
                action,
            })
        }
    }

    /// Wall-clock seconds since the current block was entered, folded into
    /// the accounting at every navigation/terminal event. Exact regardless
    /// of tick timing.
    fn record_block_time(&mut self) {
        let now = self.deps.clock.now();
        let spent = elapsed_seconds(self.block_entered_at, now);
        if let Some(block) = self.content.block(self.current_block_index) {
            *self.block_time_spent.entry(block.id.clone()).or_insert(0) += spent;
        }
        self.block_entered_at = now;
    }

    fn progress_update(&self) -> AttemptUpdate {
        AttemptUpdate {
            user_answers: Some(self.answers.clone()),
            current_block_index: Some(self.current_block_index),
            remaining_seconds: Some(self.timer.remaining()),
            block_time_spent: Some(self.block_time_spent.clone()),
            ..Default::default()
        }
    }

    fn snapshot_record(&self) -> AttemptRecord {
        AttemptRecord {
            id: Uuid::new_v4(),
            exam_id: self.content.exam_id.clone(),
            user_id: self.user_id.clone(),
            exam_data: self.content.clone(),
            user_answers: self.answers.clone(),
            current_block_index: self.current_block_index,
            remaining_seconds: self.timer.remaining(),
            total_seconds: self.timer.total(),
            block_time_spent: self.block_time_spent.clone(),
            status: AttemptStatus::InProgress,
            block_scores: None,
            total_score: None,
            max_score: None,
            percentage: None,
            started_at: self.started_at,
            completed_at: None,
        }
    }

    /// Best-effort upsert of the attempt. Local-only attempts skip the store
    /// entirely; a synced attempt whose create failed earlier retries it here
    /// so the next autosave has a record to land on.
    async fn save(&mut self, update: AttemptUpdate) {
        if self.mode == PersistenceMode::LocalOnly {
            return;
        }

        if self.attempt_id.is_none() {
            let record = self.snapshot_record();
            match self.deps.store.create(&record).await {
                Ok(id) => {
                    self.attempt_id = Some(id);
                    info!(attempt_id = %id, "attempt record created on retry");
                }
                Err(e) => {
                    warn!(exam_id = %self.content.exam_id, error = %e,
                        "failed to create attempt record, progress not saved");
                    self.deps.notices.notify(Notice::ProgressNotSaved);
                    return;
                }
            }
        }

        if let Some(id) = self.attempt_id {
            if let Err(e) = self.deps.store.update(id, &update).await {
                warn!(attempt_id = %id, error = %e, "failed to save exam progress");
                self.deps.notices.notify(Notice::ProgressNotSaved);
            }
        }
    }
}

/// A saved attempt may only be resumed onto content it still matches; a
/// silent mis-mapping of answers would corrupt scoring.
fn check_resume_consistency(content: &ExamContent, prior: &AttemptRecord) -> Result<()> {
    if prior.exam_id != content.exam_id {
        return Err(Error::ResumeMismatch(format!(
            "attempt belongs to exam {}, not {}",
            prior.exam_id, content.exam_id
        )));
    }
    if prior.status != AttemptStatus::InProgress {
        return Err(Error::ResumeMismatch(format!(
            "attempt is {:?}, not in progress",
            prior.status
        )));
    }
    if prior.exam_data.blocks.len() != content.blocks.len() {
        return Err(Error::ResumeMismatch(
            "block count changed since the attempt was saved".to_string(),
        ));
    }
    for (saved, current) in prior.exam_data.blocks.iter().zip(&content.blocks) {
        if saved.id != current.id {
            return Err(Error::ResumeMismatch(format!(
                "block {} no longer matches the saved attempt",
                current.id
            )));
        }
        if saved.questions.len() != current.questions.len() {
            return Err(Error::ResumeMismatch(format!(
                "question count changed in block {}",
                current.id
            )));
        }
    }
    if prior.current_block_index >= content.blocks.len() {
        return Err(Error::ResumeMismatch(format!(
            "saved block index {} is out of range",
            prior.current_block_index
        )));
    }
    for answer in prior.user_answers.iter() {
        let Some(question) = content.find_question(&answer.question_id) else {
            return Err(Error::ResumeMismatch(format!(
                "answered question {} no longer exists",
                answer.question_id
            )));
        };
        if answer
            .selected_options
            .iter()
            .any(|&idx| idx >= question.options.len())
        {
            return Err(Error::ResumeMismatch(format!(
                "answer to question {} references a removed option",
                answer.question_id
            )));
        }
    }

    Ok(())
}
