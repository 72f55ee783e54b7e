//! Attach-file flow: open the attach menu, feed the hidden file input over
//! CDP, wait for the preview dialog, caption, send.
//!
//! The attach affordance is the most volatile piece of the host UI, hence
//! the wide selector fan in [`Anchor::AttachButton`]. The preview wait is
//! the longest bounded poll in the crate (~15 s) because large media takes
//! a while to thumbnail.

use crate::browser::automation;
use crate::wa::anchors::{self, Anchor};
use crate::wa::{composer, SendError};
use chromiumoxide::page::Page;
use log::{info, warn};
use std::path::Path;
use std::time::Duration;

const ATTACH_RESOLVE_ATTEMPTS: u32 = 5;
const FILE_INPUT_ATTEMPTS: u32 = 10;
const PREVIEW_ATTEMPTS: u32 = 50;
const POLL_INTERVAL_MS: u64 = 300;
const CAPTION_RESOLVE_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct AttachReport {
    pub caption_marker: String,
}

/// Attach the file at `media_path` to the open chat and send it, with an
/// optional caption. Each stage fails with its own error kind so the
/// campaign log shows where the flow died.
pub async fn attach_and_send(
    page: &Page,
    media_path: &Path,
    caption: Option<&str>,
) -> Result<AttachReport, SendError> {
    let interval = Duration::from_millis(POLL_INTERVAL_MS);

    info!("[attacher] step 1: opening attach menu");
    anchors::resolve_with_retry(page, Anchor::AttachButton, interval, ATTACH_RESOLVE_ATTEMPTS)
        .await
        .ok_or(SendError::AttachButtonNotFound)?;
    automation::click_first_visible(page, Anchor::AttachButton.candidates())
        .await
        .map_err(|_| SendError::AttachButtonNotFound)?;

    info!("[attacher] step 2: waiting for file input");
    let input_sel =
        anchors::resolve_present_with_retry(page, Anchor::FileInput, interval, FILE_INPUT_ATTEMPTS)
            .await
            .ok_or(SendError::FileInputNotFound)?;

    info!("[attacher] step 3: assigning file {}", media_path.display());
    automation::set_file_input(page, &input_sel, &media_path.to_string_lossy())
        .await
        .map_err(|e| SendError::Dom(e.to_string()))?;
    let dispatch_marker = automation::dispatch_change_and_input(page, &input_sel).await;
    info!("[attacher] events dispatched: {}", dispatch_marker);

    info!("[attacher] step 4: waiting for preview dialog");
    anchors::resolve_with_retry(page, Anchor::DialogSendButton, interval, PREVIEW_ATTEMPTS)
        .await
        .ok_or(SendError::PreviewTimeout)?;

    let caption_marker = match caption.map(str::trim).filter(|c| !c.is_empty()) {
        Some(text) => fill_caption(page, text).await,
        None => "caption:skipped".to_string(),
    };

    info!("[attacher] step 5: sending ({})", caption_marker);
    automation::click_first_visible(page, Anchor::DialogSendButton.candidates())
        .await
        .map_err(|_| SendError::Dom("dialog send button vanished before click".into()))?;

    Ok(AttachReport { caption_marker })
}

/// Caption problems degrade the marker, never the send: the media is
/// already staged and failing the whole contact over a caption would lose
/// more than it protects.
async fn fill_caption(page: &Page, text: &str) -> String {
    let interval = Duration::from_millis(POLL_INTERVAL_MS);
    let Some(caption_sel) =
        anchors::resolve_with_retry(page, Anchor::DialogCaptionBox, interval, CAPTION_RESOLVE_ATTEMPTS)
            .await
    else {
        warn!("[attacher] caption box not found, sending without caption");
        return "caption:box_missing".to_string();
    };

    match composer::insert_into(page, &caption_sel, text).await {
        Ok(report) => format!(
            "caption:{}:verified={}",
            report.strategy.as_str(),
            report.verified
        ),
        Err(e) => {
            warn!("[attacher] caption fill failed: {}", e);
            format!("caption:failed:{}", e)
        }
    }
}
