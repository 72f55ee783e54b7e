//! Search-driven chat opening with header validation.
//!
//! Suffix matching (6 digits to pick a result row, 8 to validate the open
//! chat, both tried bidirectionally) absorbs country-code formatting drift
//! between the input list and what the host renders. It is a heuristic;
//! when the header never matches but the composer is live, the chat is
//! accepted with an explicit `AssumedAfterRetries` outcome so callers can
//! tell a confirmed match from a liveness fallback.

use crate::browser::automation::{self, poll_until};
use crate::wa::anchors::{self, Anchor};
use crate::wa::{composer, SendError};
use chromiumoxide::page::Page;
use log::{info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const MIN_TARGET_DIGITS: usize = 8;
const RESULTS_RENDER_WAIT_MS: u64 = 2000;
const POST_CLICK_WAIT_MS: u64 = 300;
const ROW_SUFFIX_DIGITS: usize = 6;
const HEADER_SUFFIX_DIGITS: usize = 8;
const SEARCH_RESOLVE_ATTEMPTS: u32 = 5;
const VALIDATE_INTERVAL_MS: u64 = 300;
const VALIDATE_MAX_ATTEMPTS: u32 = 20;
const VALIDATE_ACCEPT_AFTER: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatValidation {
    /// Header shared a digit suffix with the target number.
    Confirmed,
    /// Composer is live but the header never matched within the attempt
    /// budget (saved contacts and groups often hide the number).
    AssumedAfterRetries,
}

impl ChatValidation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "header:confirmed",
            Self::AssumedAfterRetries => "header:assumed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOpen {
    pub validation: ChatValidation,
    pub row_marker: String,
}

pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Whether two digit strings share an `n`-digit suffix, tried both ways so
/// the shorter rendering can still anchor the comparison.
pub fn shares_digit_suffix(a: &str, b: &str, n: usize) -> bool {
    let a = digits_only(a);
    let b = digits_only(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let tail = |s: &str| -> String {
        let start = s.len().saturating_sub(n);
        s[start..].to_string()
    };
    let ta = tail(&a);
    let tb = tail(&b);
    ta.ends_with(&tb) || tb.ends_with(&ta)
}

/// Open the conversation for a phone number through the host's search box.
pub async fn open_chat(page: &Page, number: &str) -> Result<ChatOpen, SendError> {
    let target = digits_only(number);
    if target.len() < MIN_TARGET_DIGITS {
        return Err(SendError::InvalidNumber(number.to_string()));
    }

    let search_sel = anchors::resolve_with_retry(
        page,
        Anchor::SearchBox,
        Duration::from_millis(VALIDATE_INTERVAL_MS),
        SEARCH_RESOLVE_ATTEMPTS,
    )
    .await
    .ok_or(SendError::SearchBoxNotFound)?;

    info!("[navigator] searching for ...{}", tail_for_log(&target));
    composer::clear_element(page, &search_sel).await;
    composer::insert_into(page, &search_sel, &target)
        .await
        .map_err(|_| SendError::ChatOpenFailed)?;

    tokio::time::sleep(Duration::from_millis(RESULTS_RENDER_WAIT_MS)).await;

    let row_marker = choose_result_row(page, &target).await;
    if row_marker == "row:none" {
        let _ = composer::clear_element(page, &search_sel).await;
        warn!("[navigator] no result rows for ...{}", tail_for_log(&target));
        return Err(SendError::ChatOpenFailed);
    }
    info!("[navigator] picked result {}", row_marker);

    tokio::time::sleep(Duration::from_millis(POST_CLICK_WAIT_MS)).await;

    // Leaving stale text in the search box poisons the next lookup, but a
    // failed clear is not worth failing the contact over.
    if composer::clear_element(page, &search_sel).await == "no_el" {
        warn!("[navigator] could not clear search box after opening chat");
    }

    let attempt = AtomicU32::new(0u32);
    let attempt_ref = &attempt;
    let target_ref: &str = target.as_str();
    let outcome = poll_until(
        Duration::from_millis(VALIDATE_INTERVAL_MS),
        VALIDATE_MAX_ATTEMPTS,
        move || async move {
            let n = attempt_ref.load(Ordering::Relaxed) + 1;
            attempt_ref.store(n, Ordering::Relaxed);
            anchors::resolve(page, Anchor::Composer).await?;
            let header = header_text(page).await;
            if !header.is_empty() && shares_digit_suffix(&header, target_ref, HEADER_SUFFIX_DIGITS) {
                return Some(ChatValidation::Confirmed);
            }
            if n >= VALIDATE_ACCEPT_AFTER {
                return Some(ChatValidation::AssumedAfterRetries);
            }
            None
        },
    )
    .await;

    match outcome {
        Some(validation) => {
            if validation == ChatValidation::AssumedAfterRetries {
                warn!(
                    "[navigator] header never matched ...{}; accepting open chat after {} attempts",
                    tail_for_log(&target),
                    attempt.load(Ordering::Relaxed)
                );
            }
            Ok(ChatOpen {
                validation,
                row_marker,
            })
        }
        None => Err(SendError::ChatOpenFailed),
    }
}

/// Click the result row whose text shares a 6-digit suffix with the target,
/// falling back to the first visible row. Markers: `row:suffix:<i>`,
/// `row:first`, `row:none`.
async fn choose_result_row(page: &Page, target_digits: &str) -> String {
    let suffix_start = target_digits.len().saturating_sub(ROW_SUFFIX_DIGITS);
    let suffix = &target_digits[suffix_start..];
    let selectors = js_selector_array(Anchor::SearchResultRow.candidates());
    let js = format!(
        r#"
        (function() {{
            const suffix = '{}';
            const selectors = [{}];
            for (const sel of selectors) {{
                let nodes = [];
                try {{
                    nodes = Array.from(document.querySelectorAll(sel));
                }} catch (_) {{
                    continue;
                }}
                const visible = nodes.filter(el => {{
                    const r = el.getBoundingClientRect();
                    return r && r.width > 0 && r.height > 0;
                }});
                if (visible.length === 0) continue;
                for (let i = 0; i < visible.length; i++) {{
                    const digits = (visible[i].innerText || '').replace(/\D+/g, '');
                    if (suffix && digits.includes(suffix)) {{
                        visible[i].click();
                        return 'row:suffix:' + i;
                    }}
                }}
                visible[0].click();
                return 'row:first';
            }}
            return 'row:none';
        }})()
        "#,
        automation::js_quote(suffix),
        selectors
    );
    automation::eval_string(page, &js).await
}

async fn header_text(page: &Page) -> String {
    let selectors = js_selector_array(Anchor::ChatHeader.candidates());
    let js = format!(
        r#"
        (function() {{
            const selectors = [{}];
            for (const sel of selectors) {{
                let nodes = [];
                try {{
                    nodes = document.querySelectorAll(sel);
                }} catch (_) {{
                    continue;
                }}
                for (const el of nodes) {{
                    const r = el.getBoundingClientRect();
                    if (!r || r.width === 0 || r.height === 0) continue;
                    const text = el.getAttribute('title') || el.innerText || '';
                    if (text.trim()) return text;
                }}
            }}
            return '';
        }})()
        "#,
        selectors
    );
    automation::eval_string(page, &js).await
}

fn js_selector_array(selectors: &[&str]) -> String {
    selectors
        .iter()
        .map(|sel| format!("'{}'", automation::js_quote(sel)))
        .collect::<Vec<_>>()
        .join(",")
}

fn tail_for_log(digits: &str) -> &str {
    let start = digits.len().saturating_sub(4);
    &digits[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digits_only_strips_formatting() {
        assert_eq!(digits_only("+55 (11) 99999-0001"), "5511999990001");
        assert_eq!(digits_only("abc"), "");
    }

    #[test]
    fn suffix_match_same_number_different_country_rendering() {
        // Input list carries the country code, the header does not.
        assert!(shares_digit_suffix("+5511999990001", "(11) 99999-0001", 8));
        // And the other way around.
        assert!(shares_digit_suffix("11 99999-0001", "+55 11 99999-0001", 8));
    }

    #[test]
    fn suffix_match_handles_short_header() {
        assert!(shares_digit_suffix("5511999990001", "990001", 8));
    }

    #[test]
    fn suffix_match_rejects_different_numbers() {
        assert!(!shares_digit_suffix("+5511999990001", "+5511999990002", 8));
        assert!(!shares_digit_suffix("", "5511999990001", 8));
        assert!(!shares_digit_suffix("Grupo da Família", "5511999990001", 8));
    }

    #[test]
    fn validation_markers_are_distinct() {
        assert_ne!(
            ChatValidation::Confirmed.as_str(),
            ChatValidation::AssumedAfterRetries.as_str()
        );
    }
}
