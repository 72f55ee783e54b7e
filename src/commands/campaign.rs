use crate::browser::{automation, chrome};
use crate::campaign::contacts::{self, ContactEntry};
use crate::campaign::media::MediaPayload;
use crate::campaign::pacing::PacingPolicy;
use crate::campaign::runner::{
    CampaignRunner, CampaignSpec, DelayRange, RunProgress, RunSnapshot,
};
use crate::campaign::template;
use crate::database::{queries, Database};
use crate::wa::{self, WaDispatcher};
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tauri::State;

const CHROME_READY_TIMEOUT_SECS: u64 = 30;
const WA_READY_TIMEOUT_SECS: u64 = 30;

pub type SharedPacing = Arc<Mutex<PacingPolicy>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignInput {
    pub account_id: i64,
    pub contact_list: String,
    pub message: String,
    pub media: Option<MediaPayload>,
    pub delay_min_secs: u64,
    pub delay_max_secs: u64,
    #[serde(default)]
    pub stealth_typing: bool,
}

#[derive(Debug, Serialize)]
pub struct CampaignPreview {
    pub total: usize,
    pub entries: Vec<ContactEntry>,
    pub sample_messages: Vec<String>,
    pub media_bytes: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct GroupSendReport {
    pub ok: bool,
    pub sent: usize,
    pub failed: Vec<String>,
}

/// Parse and validate a campaign without touching the browser, returning
/// what would be sent. Backs the confirmation step before a run.
#[tauri::command]
pub fn preview_campaign(input: CampaignInput) -> Result<CampaignPreview, String> {
    let entries = contacts::parse_contact_list(&input.contact_list);
    if entries.is_empty() {
        return Err("A lista de contatos está vazia.".into());
    }
    let media_bytes = match &input.media {
        Some(media) => Some(media.validate().map_err(|e| e.to_string())?),
        None => None,
    };
    let sample_messages = entries
        .iter()
        .take(3)
        .map(|entry| template::render(&input.message, entry))
        .collect();

    Ok(CampaignPreview {
        total: entries.len(),
        entries,
        sample_messages,
        media_bytes,
    })
}

#[tauri::command]
pub async fn start_campaign(
    db: State<'_, Arc<Database>>,
    runner: State<'_, CampaignRunner>,
    pacing: State<'_, SharedPacing>,
    input: CampaignInput,
) -> Result<RunProgress, String> {
    launch_campaign(
        db.inner().clone(),
        runner.inner().clone(),
        pacing.inner().clone(),
        input,
    )
    .await?;
    Ok(runner.progress())
}

/// Shared between `start_campaign` and the scheduled-execution path.
async fn launch_campaign(
    db: Arc<Database>,
    runner: CampaignRunner,
    pacing: SharedPacing,
    input: CampaignInput,
) -> Result<(), String> {
    if runner.is_active() {
        return Err("Uma campanha já está em execução.".into());
    }

    let entries = contacts::parse_contact_list(&input.contact_list);
    let spec = CampaignSpec {
        entries,
        message: input.message.clone(),
        media: input.media.clone(),
        delay: DelayRange {
            min_secs: input.delay_min_secs,
            max_secs: input.delay_max_secs,
        },
    };

    // Validate before paying for a Chrome launch. The runner re-validates
    // before flipping its active flag.
    if spec.entries.is_empty() {
        return Err("A lista de contatos está vazia.".into());
    }
    if spec.message.trim().is_empty() && spec.media.is_none() {
        return Err("Mensagem e mídia vazias; nada para enviar.".into());
    }
    let media = match &input.media {
        Some(payload) => {
            payload.validate().map_err(|e| e.to_string())?;
            Some(payload.materialize().map_err(|e| e.to_string())?)
        }
        None => None,
    };

    let (browser, page) = connect_account(&db, input.account_id).await?;
    let dispatcher = Arc::new(WaDispatcher::new(browser, page, media, input.stealth_typing));

    runner
        .start(spec, dispatcher, db, pacing)
        .map_err(|e| e.to_string())
}

/// Bring up (or reuse) the account's Chrome, attach over CDP and make sure
/// WhatsApp Web is logged in and interactive.
async fn connect_account(db: &Database, account_id: i64) -> Result<(Browser, Page), String> {
    let account = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        queries::get_account(&conn, account_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Conta {} não encontrada", account_id))?
    };

    let chrome_path = chrome::detect_chrome().map_err(|e| e.to_string())?;
    let profile_dir = std::path::PathBuf::from(&account.chrome_profile_dir);

    let session = chrome::prepare_session(&chrome_path, &profile_dir, wa::WEB_URL)
        .await
        .map_err(|e| e.to_string())?;
    info!(
        "[campaign] chrome session {} on port {}",
        session.mode.as_str(),
        session.port
    );

    let port = chrome::wait_until_ready(&session, &profile_dir, CHROME_READY_TIMEOUT_SECS)
        .await
        .map_err(|e| e.to_string())?;

    let (browser, page) = automation::connect(port, "web.whatsapp.com")
        .await
        .map_err(|e| e.to_string())?;

    wa::ensure_ready(&page, WA_READY_TIMEOUT_SECS)
        .await
        .map_err(|e| e.to_string())?;

    if let Ok(conn) = db.conn.lock() {
        if let Err(e) = queries::update_account_login_status(&conn, account_id, true) {
            warn!("[campaign] login status update failed: {}", e);
        }
    }

    Ok((browser, page))
}

#[tauri::command]
pub fn pause_campaign(runner: State<'_, CampaignRunner>) -> Result<RunProgress, String> {
    if !runner.is_active() {
        return Err("Nenhuma campanha em execução.".into());
    }
    runner.pause();
    Ok(runner.progress())
}

#[tauri::command]
pub fn resume_campaign(runner: State<'_, CampaignRunner>) -> Result<RunProgress, String> {
    if !runner.is_active() {
        return Err("Nenhuma campanha em execução.".into());
    }
    runner.resume();
    Ok(runner.progress())
}

#[tauri::command]
pub fn stop_campaign(runner: State<'_, CampaignRunner>) -> Result<RunProgress, String> {
    if !runner.is_active() {
        return Err("Nenhuma campanha em execução.".into());
    }
    runner.stop();
    Ok(runner.progress())
}

#[tauri::command]
pub fn campaign_progress(runner: State<'_, CampaignRunner>) -> RunProgress {
    runner.progress()
}

#[tauri::command]
pub fn get_campaign_history(
    db: State<'_, Arc<Database>>,
) -> Result<Vec<queries::CampaignRecord>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    queries::get_campaign_history(&conn).map_err(|e| e.to_string())
}

/// Read the persisted snapshot of the active (or interrupted) run, if any.
#[tauri::command]
pub fn inspect_run_snapshot(
    db: State<'_, Arc<Database>>,
) -> Result<Option<RunSnapshot>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let payload = queries::load_run_snapshot(&conn).map_err(|e| e.to_string())?;
    match payload {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| e.to_string()),
        None => Ok(None),
    }
}

/// Direct group send: one message to an ad-hoc list of numbers, no
/// campaign bookkeeping. Reports `{ok, sent}` plus per-number failures.
#[tauri::command]
pub async fn send_to_contacts(
    db: State<'_, Arc<Database>>,
    pacing: State<'_, SharedPacing>,
    account_id: i64,
    numbers: Vec<String>,
    message: String,
) -> Result<GroupSendReport, String> {
    if numbers.is_empty() {
        return Err("Nenhum número informado.".into());
    }
    if message.trim().is_empty() {
        return Err("A mensagem está vazia.".into());
    }

    let (browser, page) = connect_account(&db, account_id).await?;
    let dispatcher = WaDispatcher::new(browser, page, None, false);

    let mut sent = 0usize;
    let mut failed = Vec::new();

    for (idx, raw) in numbers.iter().enumerate() {
        let allowed = {
            let mut guard = pacing.lock().map_err(|e| e.to_string())?;
            guard.check_rate_limit()
        };
        if !allowed {
            return Err(
                "RATE_LIMIT_EXCEEDED: limite de envios por hora atingido; aguarde antes de \
                enviar novamente."
                    .into(),
            );
        }

        let entry = ContactEntry::new(raw.clone(), None);
        let rendered = template::render(&message, &entry);
        match crate::campaign::runner::CampaignDispatcher::deliver(&dispatcher, &entry, &rendered)
            .await
        {
            Ok(marker) => {
                sent += 1;
                if let Ok(mut guard) = pacing.lock() {
                    guard.record_sent();
                }
                info!("[group-send] {} ok ({})", entry.number, marker);
            }
            Err(e) => {
                warn!("[group-send] {} failed: {}", entry.number, e);
                failed.push(format!("{}: {}", entry.number, e));
            }
        }

        if idx + 1 < numbers.len() {
            let delay = {
                let guard = pacing.lock().map_err(|e| e.to_string())?;
                guard.random_delay(2, 6)
            };
            tokio::time::sleep(delay).await;
        }
    }

    Ok(GroupSendReport {
        ok: failed.is_empty(),
        sent,
        failed,
    })
}

/// Store a campaign for a later, externally-triggered execution.
#[tauri::command]
pub fn schedule_campaign(
    db: State<'_, Arc<Database>>,
    input: CampaignInput,
    scheduled_at: String,
) -> Result<queries::ScheduledCampaign, String> {
    let entries = contacts::parse_contact_list(&input.contact_list);
    if entries.is_empty() {
        return Err("A lista de contatos está vazia.".into());
    }
    if let Some(media) = &input.media {
        media.validate().map_err(|e| e.to_string())?;
    }

    let payload = serde_json::to_string(&input).map_err(|e| e.to_string())?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let id = queries::insert_scheduled_campaign(&conn, input.account_id, &payload, &scheduled_at)
        .map_err(|e| e.to_string())?;
    queries::get_scheduled_campaign(&conn, id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "Falha ao gravar o agendamento.".into())
}

#[tauri::command]
pub fn get_scheduled_campaigns(
    db: State<'_, Arc<Database>>,
) -> Result<Vec<queries::ScheduledCampaign>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    queries::get_scheduled_campaigns(&conn).map_err(|e| e.to_string())
}

/// "Execute this campaign now": invoked by the outside scheduler when a
/// stored campaign's time arrives.
#[tauri::command]
pub async fn execute_scheduled_campaign(
    db: State<'_, Arc<Database>>,
    runner: State<'_, CampaignRunner>,
    pacing: State<'_, SharedPacing>,
    scheduled_id: i64,
) -> Result<RunProgress, String> {
    let row = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        queries::get_scheduled_campaign(&conn, scheduled_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Agendamento {} não encontrado", scheduled_id))?
    };

    let input: CampaignInput = serde_json::from_str(&row.payload).map_err(|e| e.to_string())?;
    launch_campaign(
        db.inner().clone(),
        runner.inner().clone(),
        pacing.inner().clone(),
        input,
    )
    .await?;

    {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        if let Err(e) = queries::update_scheduled_status(&conn, scheduled_id, "dispatched") {
            warn!("[campaign] scheduled status update failed: {}", e);
        }
    }

    Ok(runner.progress())
}
