//! WhatsApp Web automation surface.

pub mod anchors;
pub mod attacher;
pub mod composer;
pub mod navigator;

use crate::browser::automation::{self, poll_until};
use crate::campaign::contacts::ContactEntry;
use crate::campaign::media::TempMedia;
use crate::campaign::runner::CampaignDispatcher;
use anchors::Anchor;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use log::info;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub const WEB_URL: &str = "https://web.whatsapp.com";

const READY_POLL_INTERVAL_MS: u64 = 500;
const POST_NAVIGATE_WAIT_MS: u64 = 2000;

#[derive(Debug, Clone, Serialize)]
pub struct SurfaceInfo {
    pub id: String,
    pub name: String,
    pub login_url: String,
}

pub fn surface_info() -> SurfaceInfo {
    SurfaceInfo {
        id: "whatsapp".into(),
        name: "WhatsApp Web".into(),
        login_url: WEB_URL.into(),
    }
}

/// Per-contact failure taxonomy. All of these are non-fatal to a campaign
/// run; the runner records them and moves on.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    #[error("composer not found")]
    ComposerNotFound,
    #[error("search box not found")]
    SearchBoxNotFound,
    #[error("attach button not found")]
    AttachButtonNotFound,
    #[error("file input not found")]
    FileInputNotFound,
    #[error("send button not found")]
    SendButtonNotFound,
    #[error("message is empty")]
    EmptyMessage,
    #[error("chat did not open within the attempt budget")]
    ChatOpenFailed,
    #[error("media preview did not appear in time")]
    PreviewTimeout,
    #[error("no insertion strategy could be confirmed")]
    InsertionFailed,
    #[error("number too short after stripping formatting: {0}")]
    InvalidNumber(String),
    #[error("dom automation error: {0}")]
    Dom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppReadiness {
    Ready,
    QrPending,
    Loading,
}

pub async fn probe_readiness(page: &Page) -> AppReadiness {
    if anchors::resolve(page, Anchor::SearchBox).await.is_some() {
        return AppReadiness::Ready;
    }
    if anchors::resolve(page, Anchor::QrCanvas).await.is_some() {
        return AppReadiness::QrPending;
    }
    AppReadiness::Loading
}

/// Navigate to WhatsApp Web if needed and wait for a logged-in UI.
pub async fn ensure_ready(page: &Page, timeout_secs: u64) -> Result<()> {
    let url = automation::current_url(page).await;
    if !url.contains("web.whatsapp.com") {
        info!("[wa] navigating to {} (was {})", WEB_URL, url);
        page.goto(WEB_URL).await?;
        tokio::time::sleep(Duration::from_millis(POST_NAVIGATE_WAIT_MS)).await;
    }

    let attempts = ((timeout_secs * 1000) / READY_POLL_INTERVAL_MS).max(1) as u32;
    let ready = poll_until(
        Duration::from_millis(READY_POLL_INTERVAL_MS),
        attempts,
        move || async move {
            match probe_readiness(page).await {
                AppReadiness::Ready => Some(()),
                _ => None,
            }
        },
    )
    .await;

    if ready.is_some() {
        info!("[wa] interface ready");
        return Ok(());
    }

    match probe_readiness(page).await {
        AppReadiness::QrPending => bail!(
            "LOGIN_REQUIRED: esta conta ainda não está conectada. Escaneie o QR code no \
            WhatsApp do celular (Aparelhos conectados) e tente novamente."
        ),
        _ => bail!(
            "TARGET_PAGE_NOT_READY: o WhatsApp Web não carregou em {} segundos. \
            Verifique a conexão e tente de novo.",
            timeout_secs
        ),
    }
}

/// The real delivery path: navigate, compose (or attach), send.
pub struct WaDispatcher {
    // Keeps the CDP connection alive for the lifetime of the run.
    _browser: Browser,
    page: Page,
    media: Option<TempMedia>,
    stealth_typing: bool,
}

impl WaDispatcher {
    pub fn new(browser: Browser, page: Page, media: Option<TempMedia>, stealth_typing: bool) -> Self {
        Self {
            _browser: browser,
            page,
            media,
            stealth_typing,
        }
    }
}

#[async_trait]
impl CampaignDispatcher for WaDispatcher {
    async fn deliver(&self, entry: &ContactEntry, message: &str) -> Result<String, SendError> {
        let open = navigator::open_chat(&self.page, &entry.number).await?;
        let validation = open.validation.as_str();

        if let Some(media) = &self.media {
            let caption = Some(message).filter(|m| !m.trim().is_empty());
            let report = attacher::attach_and_send(&self.page, &media.path, caption).await?;
            return Ok(format!("media_sent;{};{}", validation, report.caption_marker));
        }

        let insert = if self.stealth_typing {
            composer::type_stealthy_into_composer(&self.page, message).await?
        } else {
            composer::insert_text(&self.page, message).await?
        };
        composer::click_send(&self.page).await?;

        Ok(format!(
            "text_sent;insert={};verified={};{}",
            insert.strategy.as_str(),
            insert.verified,
            validation
        ))
    }
}
