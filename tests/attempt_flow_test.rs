use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use exam_engine::config::EngineConfig;
use exam_engine::error::Error;
use exam_engine::models::attempt::{AttemptRecord, AttemptStatus, AttemptUpdate};
use exam_engine::models::exam::{ExamBlock, ExamContent, Question};
use exam_engine::services::attempt_service::{
    AttemptService, Collaborators, PersistenceMode, TickOutcome,
};
use exam_engine::store::{
    AttemptStore, FixedIdentity, MemoryStore, Notice, NoticeSink,
};
use exam_engine::utils::time::Clock;

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn new() -> Arc<Self> {
        let start = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        Arc::new(Self(Mutex::new(start)))
    }

    fn advance(&self, seconds: i64) {
        let mut now = self.0.lock().unwrap();
        *now += chrono::Duration::seconds(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Default)]
struct CollectingNotices(Mutex<Vec<Notice>>);

impl CollectingNotices {
    fn count(&self, notice: Notice) -> usize {
        self.0.lock().unwrap().iter().filter(|n| **n == notice).count()
    }
}

impl NoticeSink for CollectingNotices {
    fn notify(&self, notice: Notice) {
        self.0.lock().unwrap().push(notice);
    }
}

fn question(id: &str, option_count: usize, correct: &[usize]) -> Question {
    Question {
        id: id.to_string(),
        text: format!("Question {}", id),
        options: (0..option_count).map(|i| format!("Option {}", i)).collect(),
        correct_answers: correct.to_vec(),
        multiple_correct: correct.len() > 1,
    }
}

fn sample_content() -> ExamContent {
    ExamContent {
        exam_id: "exam-1".to_string(),
        title: "Sample Exam".to_string(),
        blocks: vec![
            ExamBlock {
                id: "b1".to_string(),
                title: "Block 1".to_string(),
                background_info: "Background".to_string(),
                can_be_negative: false,
                questions: vec![question("q1", 3, &[0]), question("q2", 3, &[1])],
            },
            ExamBlock {
                id: "b2".to_string(),
                title: "Block 2".to_string(),
                background_info: String::new(),
                can_be_negative: true,
                questions: vec![question("q3", 3, &[2]), question("q4", 4, &[0, 2])],
            },
        ],
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    notices: Arc<CollectingNotices>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert_exam(sample_content());
        Self {
            store,
            clock: ManualClock::new(),
            notices: Arc::new(CollectingNotices::default()),
        }
    }

    fn collaborators(&self, user: Option<&str>) -> Collaborators {
        Collaborators {
            exam_source: self.store.clone(),
            store: self.store.clone(),
            identity: Arc::new(FixedIdentity(user.map(str::to_string))),
            notices: self.notices.clone(),
            clock: self.clock.clone(),
        }
    }

    fn config(&self) -> EngineConfig {
        EngineConfig {
            autosave_interval_secs: 30,
            expiry_grace_secs: 3,
        }
    }
}

fn selection(options: &[usize]) -> BTreeSet<usize> {
    options.iter().copied().collect()
}

#[tokio::test]
async fn full_flow_scores_and_persists_the_attempt() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), h.config())
        .await
        .expect("begin");

    assert!(!svc.has_prior_attempt());
    assert_eq!(svc.mode(), PersistenceMode::Synced);
    assert_eq!(svc.user_id(), Some("user-1"));
    assert_eq!(svc.content().blocks.len(), 2);

    svc.configure_and_start(600).await.expect("start");
    assert!(svc.is_running());
    let attempt_id = svc.attempt_id().expect("attempt id");

    svc.answer_question("q1", selection(&[0])).await.expect("q1");
    svc.answer_question("q2", selection(&[0])).await.expect("q2");
    svc.advance_block().await.expect("advance");
    assert_eq!(svc.current_block_index(), 1);
    assert_eq!(svc.current_block().map(|b| b.id.as_str()), Some("b2"));

    // revisit the first block; earlier answers must survive
    svc.retreat_block().await.expect("retreat");
    assert!(svc.answers().get_answer("q1").is_some());
    svc.advance_block().await.expect("advance again");

    svc.answer_question("q3", selection(&[2])).await.expect("q3");
    svc.answer_question("q4", selection(&[0, 2])).await.expect("q4");

    let result = svc.submit().await.expect("submit");
    assert!(svc.is_completed());

    // b1: one exact, one wrong -> raw 0
    assert_eq!(result.block_scores[0].score, 0);
    // b2: both exact -> 2
    assert_eq!(result.block_scores[1].score, 2);
    assert_eq!(result.total_score, 2);
    assert_eq!(result.max_score, 4);
    assert_eq!(result.attempt_id, Some(attempt_id));

    let record = h.store.get_attempt(attempt_id).expect("stored record");
    assert_eq!(record.status, AttemptStatus::Completed);
    assert_eq!(record.total_score, Some(2));
    assert_eq!(record.max_score, Some(4));
    assert!(record.completed_at.is_some());
    assert_eq!(record.user_answers, result.final_answers);
}

#[tokio::test]
async fn operations_outside_running_are_rejected() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), h.config())
        .await
        .expect("begin");

    assert!(matches!(
        svc.answer_question("q1", selection(&[0])).await,
        Err(Error::InvalidTransition { .. })
    ));
    assert!(matches!(
        svc.advance_block().await,
        Err(Error::InvalidTransition { .. })
    ));
    assert!(matches!(svc.submit().await, Err(Error::InvalidTransition { .. })));
    assert!(matches!(svc.cancel().await, Err(Error::InvalidTransition { .. })));
    assert!(matches!(
        svc.resume(0).await,
        Err(Error::InvalidTransition { .. })
    ));

    svc.configure_and_start(600).await.expect("start");
    let result = svc.submit().await.expect("submit");
    assert_eq!(result.total_score, 0);
    assert!(matches!(svc.submit().await, Err(Error::InvalidTransition { .. })));
}

#[tokio::test]
async fn zero_duration_is_rejected_without_a_state_change() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), h.config())
        .await
        .expect("begin");

    assert!(matches!(
        svc.configure_and_start(0).await,
        Err(Error::InvalidDuration)
    ));
    assert!(!svc.is_running());
    assert_eq!(h.store.attempt_count(), 0);

    svc.configure_and_start(60).await.expect("start after rejection");
    assert!(svc.is_running());
}

#[tokio::test]
async fn navigation_is_bounds_checked_and_unknown_questions_rejected() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), h.config())
        .await
        .expect("begin");
    svc.configure_and_start(600).await.expect("start");

    assert!(matches!(
        svc.retreat_block().await,
        Err(Error::BlockOutOfRange(0))
    ));
    svc.advance_block().await.expect("advance");
    assert!(matches!(
        svc.advance_block().await,
        Err(Error::BlockOutOfRange(2))
    ));
    assert!(matches!(
        svc.answer_question("nope", selection(&[0])).await,
        Err(Error::UnknownQuestion(_))
    ));
}

#[tokio::test]
async fn block_time_is_accounted_by_wall_clock_at_navigation_events() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), h.config())
        .await
        .expect("begin");
    svc.configure_and_start(600).await.expect("start");

    h.clock.advance(30);
    svc.advance_block().await.expect("advance");
    h.clock.advance(45);
    svc.retreat_block().await.expect("retreat");
    h.clock.advance(10);

    let result = svc.submit().await.expect("submit");
    assert_eq!(result.block_scores[0].time_spent_seconds, 40);
    assert_eq!(result.block_scores[1].time_spent_seconds, 45);
}

#[tokio::test]
async fn expiry_notifies_then_auto_submits_exactly_once() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), h.config())
        .await
        .expect("begin");
    svc.configure_and_start(2).await.expect("start");
    let attempt_id = svc.attempt_id().expect("attempt id");

    assert!(matches!(
        svc.tick().await.expect("tick"),
        TickOutcome::Running { remaining_seconds: 1 }
    ));
    assert!(matches!(
        svc.tick().await.expect("tick"),
        TickOutcome::Expired { auto_submit_in: 3 }
    ));
    assert_eq!(h.notices.count(Notice::TimeExpired), 1);

    assert!(matches!(
        svc.tick().await.expect("tick"),
        TickOutcome::Expired { auto_submit_in: 2 }
    ));
    assert!(matches!(
        svc.tick().await.expect("tick"),
        TickOutcome::Expired { auto_submit_in: 1 }
    ));

    let outcome = svc.tick().await.expect("tick");
    let TickOutcome::AutoSubmitted(result) = outcome else {
        panic!("expected auto-submit, got {:?}", outcome);
    };
    assert_eq!(result.max_score, 4);
    assert!(svc.is_completed());

    // late ticks after submission do nothing
    assert!(matches!(svc.tick().await.expect("tick"), TickOutcome::Idle));
    assert!(matches!(svc.tick().await.expect("tick"), TickOutcome::Idle));
    assert_eq!(h.notices.count(Notice::TimeExpired), 1);

    let record = h.store.get_attempt(attempt_id).expect("stored record");
    assert_eq!(record.status, AttemptStatus::Completed);
}

#[tokio::test]
async fn safety_net_autosave_runs_on_the_configured_interval() {
    let h = Harness::new();
    let config = EngineConfig {
        autosave_interval_secs: 2,
        expiry_grace_secs: 3,
    };
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), config)
        .await
        .expect("begin");
    svc.configure_and_start(100).await.expect("start");
    let attempt_id = svc.attempt_id().expect("attempt id");

    svc.tick().await.expect("tick");
    let record = h.store.get_attempt(attempt_id).expect("record");
    assert_eq!(record.remaining_seconds, 100); // not yet saved

    svc.tick().await.expect("tick");
    let record = h.store.get_attempt(attempt_id).expect("record");
    assert_eq!(record.remaining_seconds, 98);
}

#[tokio::test]
async fn cancel_abandons_the_attempt_with_partial_answers() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), h.config())
        .await
        .expect("begin");
    svc.configure_and_start(600).await.expect("start");
    let attempt_id = svc.attempt_id().expect("attempt id");

    svc.answer_question("q1", selection(&[0])).await.expect("answer");
    svc.cancel().await.expect("cancel");
    assert!(svc.is_abandoned());
    assert_eq!(h.notices.count(Notice::AttemptAbandoned), 1);

    let record = h.store.get_attempt(attempt_id).expect("record");
    assert_eq!(record.status, AttemptStatus::Abandoned);
    assert!(record.user_answers.get_answer("q1").is_some());

    // no way back from abandoned
    assert!(matches!(svc.submit().await, Err(Error::InvalidTransition { .. })));
    assert!(matches!(svc.tick().await.expect("tick"), TickOutcome::Idle));
}

#[tokio::test]
async fn anonymous_user_runs_local_only_and_discards_progress() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(None), h.config())
        .await
        .expect("begin");
    assert_eq!(svc.mode(), PersistenceMode::LocalOnly);

    svc.configure_and_start(600).await.expect("start");
    svc.answer_question("q1", selection(&[0])).await.expect("answer");
    svc.advance_block().await.expect("advance");
    let result = svc.submit().await.expect("submit");

    assert_eq!(result.attempt_id, None);
    assert_eq!(result.block_scores[0].score, 1);
    assert_eq!(h.store.attempt_count(), 0);
    assert_eq!(h.notices.count(Notice::ProgressNotSaved), 0);
}

#[tokio::test]
async fn clearing_an_answer_returns_it_to_unanswered() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), h.config())
        .await
        .expect("begin");
    svc.configure_and_start(600).await.expect("start");

    svc.answer_question("q1", selection(&[0])).await.expect("answer");
    assert!(svc.answers().get_answer("q1").is_some());
    svc.clear_answer("q1").await.expect("clear");
    assert!(svc.answers().get_answer("q1").is_none());

    let result = svc.submit().await.expect("submit");
    assert_eq!(result.total_score, 0);
}

#[tokio::test]
async fn repeated_update_is_idempotent() {
    let h = Harness::new();
    let mut svc = AttemptService::begin("exam-1", h.collaborators(Some("user-1")), h.config())
        .await
        .expect("begin");
    svc.configure_and_start(600).await.expect("start");
    svc.answer_question("q1", selection(&[0])).await.expect("answer");
    let attempt_id = svc.attempt_id().expect("attempt id");

    let update = AttemptUpdate {
        current_block_index: Some(1),
        remaining_seconds: Some(500),
        ..Default::default()
    };
    h.store.update(attempt_id, &update).await.expect("first update");
    let after_first = h.store.get_attempt(attempt_id).expect("record");
    h.store.update(attempt_id, &update).await.expect("second update");
    let after_second = h.store.get_attempt(attempt_id).expect("record");

    assert_eq!(after_first, after_second);
}

mockall::mock! {
    FlakyStore {}

    #[async_trait::async_trait]
    impl AttemptStore for FlakyStore {
        async fn create(&self, record: &AttemptRecord) -> anyhow::Result<Uuid>;
        async fn update(&self, attempt_id: Uuid, update: &AttemptUpdate) -> anyhow::Result<()>;
        async fn fetch_in_progress(&self, exam_id: &str) -> anyhow::Result<Option<AttemptRecord>>;
    }
}

#[tokio::test]
async fn persistence_failures_never_block_the_attempt() {
    let h = Harness::new();

    let mut store = MockFlakyStore::new();
    store
        .expect_fetch_in_progress()
        .returning(|_| Ok(None));
    store
        .expect_create()
        .returning(|_| Err(anyhow::anyhow!("backend unreachable")));
    store
        .expect_update()
        .returning(|_, _| Err(anyhow::anyhow!("backend unreachable")));

    let collaborators = Collaborators {
        exam_source: h.store.clone(),
        store: Arc::new(store),
        identity: Arc::new(FixedIdentity(Some("user-1".to_string()))),
        notices: h.notices.clone(),
        clock: h.clock.clone(),
    };

    let mut svc = AttemptService::begin("exam-1", collaborators, h.config())
        .await
        .expect("begin");
    svc.configure_and_start(600).await.expect("start despite create failure");
    assert!(svc.is_running());
    assert!(svc.attempt_id().is_none());

    svc.answer_question("q1", selection(&[0])).await.expect("answer");
    svc.advance_block().await.expect("advance");

    let result = svc.submit().await.expect("submit despite update failure");
    assert!(svc.is_completed());
    assert_eq!(result.block_scores[0].score, 1);
    assert!(h.notices.count(Notice::ProgressNotSaved) >= 2);
}

#[test]
fn config_defaults_apply_without_env_overrides() {
    let config = EngineConfig::from_env().expect("config");
    assert_eq!(config.autosave_interval_secs, 30);
    assert_eq!(config.expiry_grace_secs, 5);
}

#[tokio::test]
async fn unknown_exam_is_a_blocking_error() {
    let h = Harness::new();
    let err = AttemptService::begin("missing", h.collaborators(Some("user-1")), h.config())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExamNotFound(_)));
}
