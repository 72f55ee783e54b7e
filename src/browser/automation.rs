use anyhow::{bail, Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::dom::{
    GetDocumentParams, QuerySelectorParams, SetFileInputFilesParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use log::{debug, info};
use std::future::Future;
use std::time::Duration;

/// Connect to a running Chrome instance via CDP and pick the most relevant
/// page target (one already on `prefer_url_fragment` when available).
pub async fn connect(port: u16, prefer_url_fragment: &str) -> Result<(Browser, Page)> {
    let debug_url = format!("http://127.0.0.1:{}", port);

    let (browser, mut handler) = Browser::connect(debug_url)
        .await
        .context(format!("Failed to connect to Chrome on port {}", port))?;

    // Drain CDP events for the lifetime of the connection.
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                debug!("[cdp] handler error: {err}");
            }
        }
    });

    let pages = browser.pages().await.context("Failed to list pages")?;
    if pages.is_empty() {
        bail!("No pages found in Chrome on port {}", port);
    }

    let mut chosen = None;
    for page in &pages {
        let url = eval_string(page, "window.location.href").await;
        if url.contains(prefer_url_fragment) {
            chosen = Some(page.clone());
            break;
        }
    }
    let page = chosen.unwrap_or_else(|| pages[0].clone());

    info!("[cdp] connected on port {}", port);
    Ok((browser, page))
}

/// Escape a Rust string for embedding inside a single-quoted JS literal.
pub fn js_quote(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\r', "")
        .replace('\n', "\\n")
}

pub async fn eval_string(page: &Page, js: &str) -> String {
    page.evaluate(js)
        .await
        .map(|v| v.into_value::<String>().unwrap_or_default())
        .unwrap_or_default()
}

pub async fn eval_bool(page: &Page, js: &str) -> bool {
    page.evaluate(js)
        .await
        .map(|v| v.into_value::<bool>().unwrap_or(false))
        .unwrap_or(false)
}

pub async fn eval_i64(page: &Page, js: &str) -> i64 {
    page.evaluate(js)
        .await
        .map(|v| v.into_value::<i64>().unwrap_or(0))
        .unwrap_or(0)
}

/// Poll `probe` every `interval` until it yields a value or `max_attempts`
/// is exhausted. Every DOM wait in the crate goes through here, so the
/// worst case is always `max_attempts * interval`, never an open loop.
pub async fn poll_until<T, F, Fut>(interval: Duration, max_attempts: u32, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..max_attempts {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if attempt + 1 < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    None
}

pub async fn current_url(page: &Page) -> String {
    eval_string(page, "window.location.href").await
}

/// How many nodes the selector currently matches (-1 on a bad selector).
pub async fn selector_match_count(page: &Page, selector: &str) -> i64 {
    let js = format!(
        r#"
        (function() {{
            try {{
                return document.querySelectorAll('{}').length;
            }} catch (_) {{
                return -1;
            }}
        }})()
        "#,
        js_quote(selector)
    );
    eval_i64(page, &js).await
}

/// Click the first visible element matching any of the selectors.
/// Returns the selector that was clicked.
pub async fn click_first_visible(page: &Page, selectors: &[&str]) -> Result<String> {
    for selector in selectors {
        let js = format!(
            r#"
            (function() {{
                let nodes = [];
                try {{
                    nodes = document.querySelectorAll('{}');
                }} catch (_) {{
                    return 'bad_selector';
                }}
                for (const el of nodes) {{
                    const rect = el.getBoundingClientRect();
                    if (!rect || rect.width === 0 || rect.height === 0) continue;
                    const target = el.closest('button, [role="button"], a, label') || el;
                    target.click();
                    return 'clicked';
                }}
                return 'none';
            }})()
            "#,
            js_quote(selector)
        );
        let marker = eval_string(page, &js).await;
        if marker == "clicked" {
            return Ok((*selector).to_string());
        }
    }
    bail!("No visible element to click among {} selectors", selectors.len())
}

/// Assign a local file to a file input through `DOM.setFileInputFiles`.
pub async fn set_file_input(page: &Page, selector: &str, file_path: &str) -> Result<()> {
    let doc = page
        .execute(GetDocumentParams::builder().depth(0).build())
        .await
        .context("Failed to get document root")?;

    let root_node_id = doc.result.root.node_id;

    let query = QuerySelectorParams::new(root_node_id, selector);
    let query_result = page
        .execute(query)
        .await
        .context(format!("Failed to query selector {}", selector))?;

    let node_id = query_result.result.node_id;

    let mut set_files = SetFileInputFilesParams::new(vec![file_path.to_string()]);
    set_files.node_id = Some(node_id);
    page.execute(set_files)
        .await
        .context("Failed to set file input via CDP")?;

    info!("[cdp] file assigned to {}: {}", selector, file_path);
    Ok(())
}

/// Dispatch `change` AND `input` on the element; some host releases only
/// react to one of the two.
pub async fn dispatch_change_and_input(page: &Page, selector: &str) -> String {
    let js = format!(
        r#"
        (function() {{
            const el = document.querySelector('{}');
            if (!el) return 'not_found';
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return 'dispatched:files=' + (el.files ? el.files.length : 0);
        }})()
        "#,
        js_quote(selector)
    );
    eval_string(page, &js).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[test]
    fn js_quote_escapes_quotes_and_newlines() {
        assert_eq!(js_quote("it's"), "it\\'s");
        assert_eq!(js_quote("a\nb"), "a\\nb");
        assert_eq!(js_quote("back\\slash"), "back\\\\slash");
        assert_eq!(js_quote("cr\r\nlf"), "cr\\nlf");
    }

    #[tokio::test]
    async fn poll_until_returns_first_hit() {
        let calls = AtomicU32::new(0);
        let result = poll_until(Duration::from_millis(1), 10, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n == 3 { Some(n) } else { None } }
        })
        .await;
        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_until_is_bounded() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result: Option<u32> = poll_until(Duration::from_millis(5), 4, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 4 attempts with 3 sleeps in between; generous upper bound.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn poll_until_zero_attempts_never_probes() {
        let calls = AtomicU32::new(0);
        let result: Option<()> = poll_until(Duration::from_millis(1), 0, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Some(()) }
        })
        .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
