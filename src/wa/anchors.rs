//! Logical anchors over the WhatsApp Web DOM.
//!
//! The host markup changes across releases without notice, so every anchor
//! resolves through an ordered candidate list: current markup first, legacy
//! fallbacks last. Resolution filters for elements that are attached and
//! actually rendered (non-zero bounding box) and returns the selector that
//! matched, or nothing — absence is the caller's decision to escalate.

use crate::browser::automation::{self, poll_until};
use chromiumoxide::page::Page;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    SearchBox,
    Composer,
    SendButton,
    AttachButton,
    FileInput,
    MediaDialog,
    DialogSendButton,
    DialogCaptionBox,
    ChatHeader,
    SearchResultRow,
    QrCanvas,
}

impl Anchor {
    pub fn label(self) -> &'static str {
        match self {
            Self::SearchBox => "search_box",
            Self::Composer => "composer",
            Self::SendButton => "send_button",
            Self::AttachButton => "attach_button",
            Self::FileInput => "file_input",
            Self::MediaDialog => "media_dialog",
            Self::DialogSendButton => "dialog_send_button",
            Self::DialogCaptionBox => "dialog_caption_box",
            Self::ChatHeader => "chat_header",
            Self::SearchResultRow => "search_result_row",
            Self::QrCanvas => "qr_canvas",
        }
    }

    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Self::SearchBox => &[
                "div[contenteditable='true'][data-tab='3']",
                "#side div[contenteditable='true'][role='textbox']",
                "div[title='Search input textbox']",
                "#side div[contenteditable='true']",
                "label[data-testid='chatlist-search'] div[contenteditable='true']",
            ],
            Self::Composer => &[
                "#main div[contenteditable='true'][data-tab='10']",
                "#main footer div[contenteditable='true'][role='textbox']",
                "div[contenteditable='true'][data-lexical-editor='true'][data-tab='10']",
                "#main div[contenteditable='true'][data-tab='6']",
                "#main footer div[contenteditable='true']",
                "footer .copyable-text[contenteditable='true']",
            ],
            Self::SendButton => &[
                "#main footer button[aria-label='Send']",
                "#main footer button[aria-label='Enviar']",
                "#main span[data-icon='wds-ic-send-filled']",
                "#main span[data-icon='send']",
                "button[data-testid='compose-btn-send']",
            ],
            Self::AttachButton => &[
                "#main footer button[title='Attach']",
                "#main footer button[aria-label='Attach']",
                "#main footer button[aria-label='Anexar']",
                "span[data-icon='plus-rounded']",
                "span[data-icon='plus']",
                "span[data-icon='attach-menu-plus']",
                "span[data-icon='clip']",
                "div[title='Anexar']",
            ],
            Self::FileInput => &[
                "input[type='file'][accept*='*']",
                "li input[type='file']",
                "input[type='file']",
            ],
            Self::MediaDialog => &[
                "div[role='dialog']",
                "div[data-animate-modal-body='true']",
                ".overlay [role='dialog']",
            ],
            Self::DialogSendButton => &[
                "div[role='dialog'] span[data-icon='wds-ic-send-filled']",
                "div[role='dialog'] span[data-icon='send']",
                "div[role='dialog'] div[aria-label='Send']",
                "div[role='dialog'] div[aria-label='Enviar']",
                "span[data-icon='send-light']",
                "div[data-animate-modal-body='true'] span[data-icon='send']",
            ],
            Self::DialogCaptionBox => &[
                "div[role='dialog'] div[contenteditable='true'][data-tab='10']",
                "div[role='dialog'] div[contenteditable='true'][role='textbox']",
                "div[aria-label='Add a caption'] div[contenteditable='true']",
                "div[aria-label='Adicione uma legenda'] div[contenteditable='true']",
                "div[role='dialog'] div[contenteditable='true']",
            ],
            Self::ChatHeader => &[
                "#main header span[dir='auto'][title]",
                "#main header div[role='button'] span[title]",
                "#main header span.copyable-text",
                "#main header [data-testid='conversation-info-header-chat-title']",
            ],
            Self::SearchResultRow => &[
                "#pane-side div[role='listitem']",
                "#pane-side [data-testid='cell-frame-container']",
                "#pane-side div[tabindex='-1'][role='row']",
                "#pane-side ._ak72",
            ],
            Self::QrCanvas => &[
                "canvas[aria-label='Scan me!']",
                "canvas[aria-label='Scan this QR code to link a device!']",
                "div[data-ref] canvas",
            ],
        }
    }
}

/// Resolve an anchor to the first candidate selector with a visible,
/// attached match. Returns `None` rather than erroring; markup churn is an
/// expected condition, not an exception.
pub async fn resolve(page: &Page, anchor: Anchor) -> Option<String> {
    for selector in anchor.candidates() {
        let js = format!(
            r#"
            (function() {{
                let nodes = [];
                try {{
                    nodes = document.querySelectorAll('{}');
                }} catch (_) {{
                    return false;
                }}
                for (const el of nodes) {{
                    if (!el.isConnected) continue;
                    const rect = el.getBoundingClientRect();
                    if (rect && rect.width > 0 && rect.height > 0) return true;
                }}
                return false;
            }})()
            "#,
            automation::js_quote(selector)
        );
        if automation::eval_bool(page, &js).await {
            return Some((*selector).to_string());
        }
    }
    None
}

/// Like [`resolve`] but only requires the node to be attached. File inputs
/// are deliberately rendered invisible by the host, so the bounding-box
/// filter would never admit them.
pub async fn resolve_present(page: &Page, anchor: Anchor) -> Option<String> {
    for selector in anchor.candidates() {
        if automation::selector_match_count(page, selector).await > 0 {
            return Some((*selector).to_string());
        }
    }
    None
}

pub async fn resolve_present_with_retry(
    page: &Page,
    anchor: Anchor,
    interval: Duration,
    max_attempts: u32,
) -> Option<String> {
    poll_until(interval, max_attempts, move || async move {
        resolve_present(page, anchor).await
    })
    .await
}

/// Bounded-retry resolution for anchors that appear asynchronously
/// (after a click, after a dialog opens).
pub async fn resolve_with_retry(
    page: &Page,
    anchor: Anchor,
    interval: Duration,
    max_attempts: u32,
) -> Option<String> {
    poll_until(interval, max_attempts, move || async move {
        resolve(page, anchor).await
    })
    .await
}
