//! Text insertion into WhatsApp Web's contenteditable boxes.
//!
//! Strategies are tried in order and each one is confirmed by reading the
//! element text back, except the direct-assignment last resort: when even
//! that read-back fails the report carries `verified: false` so callers can
//! log the send as best-effort instead of a confirmed success.

use crate::browser::automation;
use crate::wa::anchors::{self, Anchor};
use crate::wa::SendError;
use chromiumoxide::page::Page;
use log::{debug, warn};
use rand::Rng;
use std::time::Duration;

const RESOLVE_INTERVAL_MS: u64 = 300;
const RESOLVE_ATTEMPTS: u32 = 5;
const STEALTH_CHAR_DELAY_MS: (u64, u64) = (30, 120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStrategy {
    EditorCommand,
    ClipboardPaste,
    DirectAssign,
    CharByChar,
}

impl InsertStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EditorCommand => "editor_command",
            Self::ClipboardPaste => "clipboard_paste",
            Self::DirectAssign => "direct_assign",
            Self::CharByChar => "char_by_char",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InsertReport {
    pub strategy: InsertStrategy,
    pub verified: bool,
}

/// Insert `text` into the main chat composer.
pub async fn insert_text(page: &Page, text: &str) -> Result<InsertReport, SendError> {
    if text.trim().is_empty() {
        return Err(SendError::EmptyMessage);
    }
    let selector = anchors::resolve_with_retry(
        page,
        Anchor::Composer,
        Duration::from_millis(RESOLVE_INTERVAL_MS),
        RESOLVE_ATTEMPTS,
    )
    .await
    .ok_or(SendError::ComposerNotFound)?;

    insert_into(page, &selector, text).await
}

/// Insert `text` into an arbitrary contenteditable element (composer,
/// search box, caption box) through the strategy cascade.
pub async fn insert_into(page: &Page, selector: &str, text: &str) -> Result<InsertReport, SendError> {
    if text.trim().is_empty() {
        return Err(SendError::EmptyMessage);
    }

    let mut diagnostics: Vec<String> = Vec::new();

    let marker = editor_command_insert(page, selector, text).await;
    diagnostics.push(format!("A:{}", marker));
    if marker != "no_el" && verify_inserted(page, selector, text).await {
        debug!("[composer] inserted via editor command into {}", selector);
        return Ok(InsertReport {
            strategy: InsertStrategy::EditorCommand,
            verified: true,
        });
    }

    let marker = clipboard_paste_insert(page, selector, text).await;
    diagnostics.push(format!("B:{}", marker));
    if marker != "no_el" && verify_inserted(page, selector, text).await {
        debug!("[composer] inserted via synthetic paste into {}", selector);
        return Ok(InsertReport {
            strategy: InsertStrategy::ClipboardPaste,
            verified: true,
        });
    }

    let marker = direct_assign_insert(page, selector, text).await;
    diagnostics.push(format!("C:{}", marker));
    if marker == "assigned" {
        // Last resort: the assignment itself cannot fail, but the host app
        // may ignore content not produced by an editing command.
        let verified = verify_inserted(page, selector, text).await;
        if !verified {
            warn!(
                "[composer] direct assignment unverified on {} ({})",
                selector,
                diagnostics.join(" | ")
            );
        }
        return Ok(InsertReport {
            strategy: InsertStrategy::DirectAssign,
            verified,
        });
    }

    warn!(
        "[composer] all insertion strategies exhausted on {}: {}",
        selector,
        diagnostics.join(" | ")
    );
    Err(SendError::InsertionFailed)
}

/// Stealth variant: one character at a time with randomized gaps, like a
/// person typing. No final verification; best-effort by design.
pub async fn type_stealthy(page: &Page, selector: &str, text: &str) -> Result<InsertReport, SendError> {
    if text.trim().is_empty() {
        return Err(SendError::EmptyMessage);
    }
    let focus_marker = focus_and_clear(page, selector).await;
    if focus_marker == "no_el" {
        return Err(SendError::InsertionFailed);
    }

    for ch in text.chars() {
        let js = format!(
            r#"
            (function() {{
                const el = document.querySelector('{}');
                if (!el) return 'no_el';
                el.focus();
                document.execCommand('insertText', false, '{}');
                return 'ok';
            }})()
            "#,
            automation::js_quote(selector),
            automation::js_quote(&ch.to_string())
        );
        automation::eval_string(page, &js).await;
        let delay = {
            let mut rng = rand::rng();
            rng.random_range(STEALTH_CHAR_DELAY_MS.0..=STEALTH_CHAR_DELAY_MS.1)
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    Ok(InsertReport {
        strategy: InsertStrategy::CharByChar,
        verified: false,
    })
}

/// Stealth-type into the main composer.
pub async fn type_stealthy_into_composer(page: &Page, text: &str) -> Result<InsertReport, SendError> {
    let selector = anchors::resolve_with_retry(
        page,
        Anchor::Composer,
        Duration::from_millis(RESOLVE_INTERVAL_MS),
        RESOLVE_ATTEMPTS,
    )
    .await
    .ok_or(SendError::ComposerNotFound)?;
    type_stealthy(page, &selector, text).await
}

/// Click the composer's send button.
pub async fn click_send(page: &Page) -> Result<(), SendError> {
    anchors::resolve_with_retry(
        page,
        Anchor::SendButton,
        Duration::from_millis(RESOLVE_INTERVAL_MS),
        RESOLVE_ATTEMPTS,
    )
    .await
    .ok_or(SendError::SendButtonNotFound)?;

    automation::click_first_visible(page, Anchor::SendButton.candidates())
        .await
        .map_err(|_| SendError::SendButtonNotFound)?;
    Ok(())
}

/// Select-all + delete on the element. Returns a marker, never errors;
/// callers decide whether a failed clear matters.
pub async fn clear_element(page: &Page, selector: &str) -> String {
    focus_and_clear(page, selector).await
}

async fn focus_and_clear(page: &Page, selector: &str) -> String {
    let js = format!(
        r#"
        (function() {{
            const el = document.querySelector('{}');
            if (!el) return 'no_el';
            el.focus();
            document.execCommand('selectAll', false, null);
            document.execCommand('delete', false, null);
            el.dispatchEvent(new InputEvent('input', {{ bubbles: true }}));
            return 'cleared';
        }})()
        "#,
        automation::js_quote(selector)
    );
    automation::eval_string(page, &js).await
}

async fn editor_command_insert(page: &Page, selector: &str, text: &str) -> String {
    let js = format!(
        r#"
        (function() {{
            const el = document.querySelector('{}');
            if (!el) return 'no_el';
            el.focus();
            document.execCommand('selectAll', false, null);
            document.execCommand('delete', false, null);
            const ok = document.execCommand('insertText', false, '{}');
            el.dispatchEvent(new InputEvent('input', {{ bubbles: true }}));
            return ok ? 'done' : 'refused';
        }})()
        "#,
        automation::js_quote(selector),
        automation::js_quote(text)
    );
    automation::eval_string(page, &js).await
}

async fn clipboard_paste_insert(page: &Page, selector: &str, text: &str) -> String {
    let js = format!(
        r#"
        (function() {{
            const el = document.querySelector('{}');
            if (!el) return 'no_el';
            el.focus();
            document.execCommand('selectAll', false, null);
            document.execCommand('delete', false, null);
            const dt = new DataTransfer();
            dt.setData('text/plain', '{}');
            el.dispatchEvent(new ClipboardEvent('paste', {{
                clipboardData: dt,
                bubbles: true,
                cancelable: true
            }}));
            return 'pasted';
        }})()
        "#,
        automation::js_quote(selector),
        automation::js_quote(text)
    );
    automation::eval_string(page, &js).await
}

async fn direct_assign_insert(page: &Page, selector: &str, text: &str) -> String {
    let js = format!(
        r#"
        (function() {{
            const el = document.querySelector('{}');
            if (!el) return 'no_el';
            el.focus();
            el.textContent = '{}';
            el.dispatchEvent(new InputEvent('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return 'assigned';
        }})()
        "#,
        automation::js_quote(selector),
        automation::js_quote(text)
    );
    automation::eval_string(page, &js).await
}

async fn verify_inserted(page: &Page, selector: &str, want: &str) -> bool {
    let js = format!(
        r#"
        (function() {{
            const el = document.querySelector('{}');
            if (!el) return '';
            return (el.innerText || el.textContent || '');
        }})()
        "#,
        automation::js_quote(selector)
    );
    let got = automation::eval_string(page, &js).await;
    text_matches(&got, want)
}

/// Exact or prefix match between the element's text and the inserted text.
fn text_matches(got: &str, want: &str) -> bool {
    let got = got.trim();
    let want = want.trim();
    if want.is_empty() {
        return false;
    }
    got == want || got.starts_with(want)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_labels_are_stable() {
        assert_eq!(InsertStrategy::EditorCommand.as_str(), "editor_command");
        assert_eq!(InsertStrategy::ClipboardPaste.as_str(), "clipboard_paste");
        assert_eq!(InsertStrategy::DirectAssign.as_str(), "direct_assign");
        assert_eq!(InsertStrategy::CharByChar.as_str(), "char_by_char");
    }

    #[test]
    fn text_match_accepts_exact_and_prefix() {
        assert!(text_matches("olá mundo", "olá mundo"));
        assert!(text_matches("olá mundo\u{a0}extra", "olá mundo"));
        assert!(text_matches("  padded  ", "padded"));
    }

    #[test]
    fn text_match_rejects_mismatch_and_empty() {
        assert!(!text_matches("something else", "olá"));
        assert!(!text_matches("", "olá"));
        assert!(!text_matches("anything", ""));
    }
}
