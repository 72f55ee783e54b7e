//! The campaign state machine.
//!
//! One runner per app session owns all mutable run state; there are no
//! module-level globals. Control is cooperative: pause/abort flags are
//! checked before each contact and at 250 ms granularity inside every wait,
//! and an in-flight delivery is never interrupted. A failing contact is
//! logged, counted and skipped — a bulk send must survive bad numbers.

use crate::campaign::contacts::ContactEntry;
use crate::campaign::media::MediaPayload;
use crate::campaign::pacing::PacingPolicy;
use crate::campaign::template;
use crate::database::{queries, Database};
use crate::wa::SendError;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

const CONTROL_TICK: Duration = Duration::from_millis(250);
const RATE_LIMIT_DEFER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub entries: Vec<ContactEntry>,
    pub message: String,
    pub media: Option<MediaPayload>,
    pub delay: DelayRange,
}

/// Snapshot persisted after every contact. Written for observability and
/// post-mortem only; nothing resumes from it automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub entries: Vec<ContactEntry>,
    pub message: String,
    pub cursor: usize,
    pub status: RunStatus,
    pub started_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactOutcome {
    pub number: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    pub status: RunStatus,
    pub total: usize,
    pub cursor: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub current: Option<String>,
    pub outcomes: Vec<ContactOutcome>,
}

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("uma campanha já está em execução")]
    AlreadyRunning,
    #[error("a lista de contatos está vazia")]
    NoContacts,
    #[error("mensagem e mídia vazias; nada para enviar")]
    EmptyMessage,
    #[error("mídia excede o limite de 16 MB ({size} bytes)")]
    MediaTooLarge { size: usize },
    #[error("mídia inválida: {0}")]
    MediaInvalid(String),
}

/// Delivery seam between the state machine and the DOM automation.
#[async_trait]
pub trait CampaignDispatcher: Send + Sync {
    /// Deliver one rendered message to one contact; the marker string is
    /// recorded in the per-contact outcome log.
    async fn deliver(&self, entry: &ContactEntry, message: &str) -> Result<String, SendError>;
}

#[derive(Default)]
struct ProgressState {
    status: RunStatus,
    total: usize,
    cursor: usize,
    attempted: usize,
    succeeded: usize,
    failed: usize,
    current: Option<String>,
    outcomes: Vec<ContactOutcome>,
}

struct RunnerShared {
    paused: AtomicBool,
    abort: AtomicBool,
    active: AtomicBool,
    progress: Mutex<ProgressState>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct CampaignRunner {
    shared: Arc<RunnerShared>,
}

impl Default for CampaignRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CampaignRunner {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                paused: AtomicBool::new(false),
                abort: AtomicBool::new(false),
                active: AtomicBool::new(false),
                progress: Mutex::new(ProgressState::default()),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> RunProgress {
        let p = self.shared.progress.lock().unwrap();
        RunProgress {
            status: p.status,
            total: p.total,
            cursor: p.cursor,
            attempted: p.attempted,
            succeeded: p.succeeded,
            failed: p.failed,
            current: p.current.clone(),
            outcomes: p.outcomes.clone(),
        }
    }

    /// Request a pause. Takes effect at the next cooperative checkpoint;
    /// the contact currently in flight still completes.
    pub fn pause(&self) {
        if !self.is_active() {
            return;
        }
        self.shared.paused.store(true, Ordering::SeqCst);
        let mut p = self.shared.progress.lock().unwrap();
        if p.status == RunStatus::Running {
            p.status = RunStatus::Paused;
        }
        info!("[campaign] pause requested");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        let mut p = self.shared.progress.lock().unwrap();
        if p.status == RunStatus::Paused {
            p.status = RunStatus::Running;
        }
        info!("[campaign] resumed");
    }

    /// Request an abort. The run finishes the in-flight contact, then
    /// transitions to Aborted.
    pub fn stop(&self) {
        self.shared.abort.store(true, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
        info!("[campaign] stop requested");
    }

    /// Validate and launch a run. Rejected while another run is active.
    pub fn start(
        &self,
        spec: CampaignSpec,
        dispatcher: Arc<dyn CampaignDispatcher>,
        db: Arc<Database>,
        pacing: Arc<Mutex<PacingPolicy>>,
    ) -> Result<(), CampaignError> {
        validate_spec(&spec)?;

        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CampaignError::AlreadyRunning);
        }

        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.abort.store(false, Ordering::SeqCst);
        {
            let mut p = self.shared.progress.lock().unwrap();
            *p = ProgressState {
                status: RunStatus::Running,
                total: spec.entries.len(),
                ..ProgressState::default()
            };
        }

        let started_at = chrono::Utc::now().to_rfc3339();
        persist_snapshot(&db, &spec, 0, RunStatus::Running, &started_at);

        let shared = self.shared.clone();
        let handle = tokio::spawn(run_loop(shared, spec, dispatcher, db, pacing, started_at));
        *self.shared.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Await the active run, if any. Used by tests and the shutdown path.
    pub async fn wait(&self) {
        let handle = self.shared.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn validate_spec(spec: &CampaignSpec) -> Result<(), CampaignError> {
    if spec.entries.is_empty() {
        return Err(CampaignError::NoContacts);
    }
    if spec.message.trim().is_empty() && spec.media.is_none() {
        return Err(CampaignError::EmptyMessage);
    }
    if let Some(media) = &spec.media {
        media.validate()?;
    }
    Ok(())
}

async fn run_loop(
    shared: Arc<RunnerShared>,
    spec: CampaignSpec,
    dispatcher: Arc<dyn CampaignDispatcher>,
    db: Arc<Database>,
    pacing: Arc<Mutex<PacingPolicy>>,
    started_at: String,
) {
    let total = spec.entries.len();
    info!("[campaign] run started: {} contacts", total);

    'contacts: for (idx, entry) in spec.entries.iter().enumerate() {
        if !pause_gate(&shared).await {
            break;
        }

        // Hourly cap reached: defer, don't fail the contact.
        loop {
            let allowed = pacing.lock().unwrap().check_rate_limit();
            if allowed {
                break;
            }
            warn!("[campaign] hourly send cap reached, deferring before contact {}", idx + 1);
            if !interruptible_sleep(&shared, RATE_LIMIT_DEFER).await {
                break 'contacts;
            }
        }

        {
            let mut p = shared.progress.lock().unwrap();
            p.current = Some(entry.number.clone());
        }

        let message = template::render(&spec.message, entry);
        info!("[campaign] contact {}/{}: {}", idx + 1, total, entry.number);

        let outcome = match dispatcher.deliver(entry, &message).await {
            Ok(marker) => {
                pacing.lock().unwrap().record_sent();
                ContactOutcome {
                    number: entry.number.clone(),
                    ok: true,
                    detail: marker,
                }
            }
            Err(e) => {
                warn!("[campaign] contact {} failed: {}", entry.number, e);
                ContactOutcome {
                    number: entry.number.clone(),
                    ok: false,
                    detail: e.to_string(),
                }
            }
        };

        let status_now = {
            let mut p = shared.progress.lock().unwrap();
            p.attempted += 1;
            if outcome.ok {
                p.succeeded += 1;
            } else {
                p.failed += 1;
            }
            p.cursor = idx + 1;
            p.current = None;
            p.outcomes.push(outcome);
            p.status
        };

        persist_snapshot(&db, &spec, idx + 1, status_now, &started_at);

        if idx + 1 < total {
            let long_pause = pacing.lock().unwrap().maybe_long_pause();
            if let Some(pause) = long_pause {
                info!("[campaign] long pause: {}s", pause.as_secs());
                if !interruptible_sleep(&shared, pause).await {
                    break;
                }
            }
            let delay = pacing
                .lock()
                .unwrap()
                .random_delay(spec.delay.min_secs, spec.delay.max_secs);
            if !interruptible_sleep(&shared, delay).await {
                break;
            }
        }
    }

    let aborted = shared.abort.load(Ordering::SeqCst);
    let final_status = if aborted {
        RunStatus::Aborted
    } else {
        RunStatus::Completed
    };

    let (attempted, succeeded, failed, outcomes_json) = {
        let mut p = shared.progress.lock().unwrap();
        p.status = final_status;
        p.current = None;
        (
            p.attempted,
            p.succeeded,
            p.failed,
            serde_json::to_string(&p.outcomes).unwrap_or_default(),
        )
    };

    finish_run(
        &db,
        &started_at,
        final_status,
        total,
        succeeded,
        failed,
        &outcomes_json,
    );

    info!(
        "[campaign] run {}: attempted={} sent={} failed={}",
        final_status.as_str(),
        attempted,
        succeeded,
        failed
    );

    shared.active.store(false, Ordering::SeqCst);
}

/// Block while paused; returns false once an abort is observed.
async fn pause_gate(shared: &Arc<RunnerShared>) -> bool {
    loop {
        if shared.abort.load(Ordering::SeqCst) {
            return false;
        }
        if !shared.paused.load(Ordering::SeqCst) {
            return true;
        }
        {
            let mut p = shared.progress.lock().unwrap();
            if p.status == RunStatus::Running {
                p.status = RunStatus::Paused;
            }
        }
        tokio::time::sleep(CONTROL_TICK).await;
    }
}

/// Sleep in control-tick chunks so pause and abort bite mid-wait.
/// Returns false once an abort is observed.
async fn interruptible_sleep(shared: &Arc<RunnerShared>, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if shared.abort.load(Ordering::SeqCst) {
            return false;
        }
        if shared.paused.load(Ordering::SeqCst) && !pause_gate(shared).await {
            return false;
        }
        let chunk = remaining.min(CONTROL_TICK);
        tokio::time::sleep(chunk).await;
        remaining = remaining.saturating_sub(chunk);
    }
    true
}

fn persist_snapshot(
    db: &Database,
    spec: &CampaignSpec,
    cursor: usize,
    status: RunStatus,
    started_at: &str,
) {
    let snapshot = RunSnapshot {
        entries: spec.entries.clone(),
        message: spec.message.clone(),
        cursor,
        status,
        started_at: started_at.to_string(),
    };
    let payload = match serde_json::to_string(&snapshot) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("[campaign] snapshot serialization failed: {}", e);
            return;
        }
    };
    match db.conn.lock() {
        Ok(conn) => {
            if let Err(e) = queries::save_run_snapshot(&conn, &payload) {
                warn!("[campaign] snapshot persist failed: {}", e);
            }
        }
        Err(e) => warn!("[campaign] database lock poisoned: {}", e),
    }
}

fn finish_run(
    db: &Database,
    started_at: &str,
    status: RunStatus,
    total: usize,
    sent: usize,
    failed: usize,
    detail: &str,
) {
    match db.conn.lock() {
        Ok(conn) => {
            if let Err(e) = queries::clear_run_snapshot(&conn) {
                warn!("[campaign] snapshot clear failed: {}", e);
            }
            if let Err(e) = queries::insert_campaign_record(
                &conn,
                started_at,
                status.as_str(),
                total as i64,
                sent as i64,
                failed as i64,
                Some(detail),
            ) {
                warn!("[campaign] history record failed: {}", e);
            }
        }
        Err(e) => warn!("[campaign] database lock poisoned: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::contacts::parse_contact_list;
    use crate::campaign::pacing::PacingConfig;
    use std::collections::HashSet;

    struct ScriptedDispatcher {
        fail: HashSet<String>,
        delay: Duration,
        delivered: Mutex<Vec<String>>,
    }

    impl ScriptedDispatcher {
        fn new(fail: &[&str], delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                fail: fail.iter().map(|n| n.to_string()).collect(),
                delay: Duration::from_millis(delay_ms),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CampaignDispatcher for ScriptedDispatcher {
        async fn deliver(&self, entry: &ContactEntry, message: &str) -> Result<String, SendError> {
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.contains(&entry.number) {
                return Err(SendError::ChatOpenFailed);
            }
            self.delivered
                .lock()
                .unwrap()
                .push(format!("{}|{}", entry.number, message));
            Ok("text_sent".to_string())
        }
    }

    fn quiet_pacing() -> Arc<Mutex<PacingPolicy>> {
        Arc::new(Mutex::new(PacingPolicy::new(PacingConfig {
            hourly_cap: 10_000,
            long_pause_chance: 0.0,
            ..PacingConfig::default()
        })))
    }

    fn spec(list: &str, message: &str) -> CampaignSpec {
        CampaignSpec {
            entries: parse_contact_list(list),
            message: message.to_string(),
            media: None,
            delay: DelayRange {
                min_secs: 0,
                max_secs: 0,
            },
        }
    }

    fn test_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    #[tokio::test]
    async fn failing_contact_does_not_halt_the_run() {
        let runner = CampaignRunner::new();
        let dispatcher = ScriptedDispatcher::new(&["+5511999990002"], 0);
        let db = test_db();

        runner
            .start(
                spec(
                    "+5511999990001,Ana\n+5511999990002\n+5511999990003,Caio",
                    "Olá {{nome}}, código {{numero}}",
                ),
                dispatcher.clone(),
                db.clone(),
                quiet_pacing(),
            )
            .unwrap();
        runner.wait().await;

        let progress = runner.progress();
        assert_eq!(progress.status, RunStatus::Completed);
        assert_eq!(progress.attempted, 3);
        assert_eq!(progress.succeeded, 2);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.cursor, 3);
        assert!(!progress.outcomes[1].ok);

        let delivered = dispatcher.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert_eq!(
            delivered[0],
            "+5511999990001|Olá Ana, código +5511999990001"
        );
        assert_eq!(delivered[1], "+5511999990003|Olá Caio, código +5511999990003");
    }

    #[tokio::test]
    async fn snapshot_cleared_and_history_written_on_completion() {
        let runner = CampaignRunner::new();
        let db = test_db();
        runner
            .start(
                spec("+5511999990001\n+5511999990002", "oi"),
                ScriptedDispatcher::new(&[], 0),
                db.clone(),
                quiet_pacing(),
            )
            .unwrap();
        runner.wait().await;

        let conn = db.conn.lock().unwrap();
        assert!(queries::load_run_snapshot(&conn).unwrap().is_none());
        let history = queries::get_campaign_history(&conn).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "completed");
        assert_eq!(history[0].total, 2);
        assert_eq!(history[0].sent, 2);
        assert_eq!(history[0].failed, 0);
    }

    #[tokio::test]
    async fn snapshot_is_written_after_each_contact_while_running() {
        let runner = CampaignRunner::new();
        let db = test_db();
        let list = "+5511999990001\n+5511999990002\n+5511999990003\n+5511999990004\n+5511999990005";
        runner
            .start(
                spec(list, "oi"),
                ScriptedDispatcher::new(&[], 100),
                db.clone(),
                quiet_pacing(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        let snapshot: RunSnapshot = {
            let conn = db.conn.lock().unwrap();
            let raw = queries::load_run_snapshot(&conn).unwrap().unwrap();
            serde_json::from_str(&raw).unwrap()
        };
        assert!(snapshot.cursor >= 1);
        assert_eq!(snapshot.entries.len(), 5);
        assert_eq!(snapshot.message, "oi");
        assert_eq!(snapshot.status, RunStatus::Running);

        runner.wait().await;
        let conn = db.conn.lock().unwrap();
        assert!(queries::load_run_snapshot(&conn).unwrap().is_none());
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let runner = CampaignRunner::new();
        let db = test_db();
        runner
            .start(
                spec("+5511999990001\n+5511999990002", "oi"),
                ScriptedDispatcher::new(&[], 150),
                db.clone(),
                quiet_pacing(),
            )
            .unwrap();

        let err = runner
            .start(
                spec("+5511999990009", "oi"),
                ScriptedDispatcher::new(&[], 0),
                db,
                quiet_pacing(),
            )
            .unwrap_err();
        assert!(matches!(err, CampaignError::AlreadyRunning));
        runner.wait().await;
        assert!(!runner.is_active());
    }

    #[tokio::test]
    async fn pause_halts_cursor_until_resume() {
        let runner = CampaignRunner::new();
        let db = test_db();
        let list = "+5511999990001\n+5511999990002\n+5511999990003\n+5511999990004\n+5511999990005";
        runner
            .start(
                spec(list, "oi"),
                ScriptedDispatcher::new(&[], 50),
                db,
                quiet_pacing(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(75)).await;
        runner.pause();
        // The in-flight contact may still finish; give it room to settle.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let frozen = runner.progress();
        assert_eq!(frozen.status, RunStatus::Paused);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let still = runner.progress();
        assert_eq!(still.cursor, frozen.cursor, "cursor advanced while paused");
        assert!(still.cursor < 5);

        runner.resume();
        runner.wait().await;
        let done = runner.progress();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.attempted, 5);
    }

    #[tokio::test]
    async fn stop_aborts_instead_of_completing() {
        let runner = CampaignRunner::new();
        let db = test_db();
        let list = (1..=10)
            .map(|i| format!("+55119999900{:02}", i))
            .collect::<Vec<_>>()
            .join("\n");
        runner
            .start(
                spec(&list, "oi"),
                ScriptedDispatcher::new(&[], 50),
                db.clone(),
                quiet_pacing(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        runner.stop();
        runner.wait().await;

        let progress = runner.progress();
        assert_eq!(progress.status, RunStatus::Aborted);
        assert!(progress.attempted < 10);
        assert!(!runner.is_active());

        let conn = db.conn.lock().unwrap();
        assert!(queries::load_run_snapshot(&conn).unwrap().is_none());
        assert_eq!(
            queries::get_campaign_history(&conn).unwrap()[0].status,
            "aborted"
        );
    }

    #[tokio::test]
    async fn exhausted_rate_limit_defers_sends_until_stopped() {
        let runner = CampaignRunner::new();
        let db = test_db();
        let pacing = Arc::new(Mutex::new(PacingPolicy::new(PacingConfig {
            hourly_cap: 0,
            long_pause_chance: 0.0,
            ..PacingConfig::default()
        })));
        let dispatcher = ScriptedDispatcher::new(&[], 0);

        runner
            .start(spec("+5511999990001", "oi"), dispatcher.clone(), db, pacing)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runner.progress().attempted, 0);
        assert!(dispatcher.delivered.lock().unwrap().is_empty());

        runner.stop();
        runner.wait().await;
        assert_eq!(runner.progress().status, RunStatus::Aborted);
    }

    #[tokio::test]
    async fn start_validation_rejects_bad_specs() {
        let runner = CampaignRunner::new();
        let db = test_db();

        let err = runner
            .start(
                spec("", "oi"),
                ScriptedDispatcher::new(&[], 0),
                db.clone(),
                quiet_pacing(),
            )
            .unwrap_err();
        assert!(matches!(err, CampaignError::NoContacts));

        let err = runner
            .start(
                spec("+5511999990001", "   "),
                ScriptedDispatcher::new(&[], 0),
                db.clone(),
                quiet_pacing(),
            )
            .unwrap_err();
        assert!(matches!(err, CampaignError::EmptyMessage));

        // A rejected start must leave the runner available.
        runner
            .start(
                spec("+5511999990001", "oi"),
                ScriptedDispatcher::new(&[], 0),
                db,
                quiet_pacing(),
            )
            .unwrap();
        runner.wait().await;
        assert_eq!(runner.progress().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn media_only_campaign_is_valid_and_empty_media_is_not() {
        use crate::campaign::media::MediaPayload;

        let entries = parse_contact_list("+5511999990001");
        let media_spec = CampaignSpec {
            entries: entries.clone(),
            message: String::new(),
            media: Some(MediaPayload {
                name: "oferta.png".into(),
                mime: "image/png".into(),
                data_base64: "aGVsbG8=".into(),
            }),
            delay: DelayRange {
                min_secs: 0,
                max_secs: 0,
            },
        };
        assert!(validate_spec(&media_spec).is_ok());

        let bad = CampaignSpec {
            entries,
            message: String::new(),
            media: Some(MediaPayload {
                name: "oferta.png".into(),
                mime: "image/png".into(),
                data_base64: "***".into(),
            }),
            delay: DelayRange {
                min_secs: 0,
                max_secs: 0,
            },
        };
        assert!(matches!(
            validate_spec(&bad),
            Err(CampaignError::MediaInvalid(_))
        ));
    }
}
