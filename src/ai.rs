//! Opaque "generate text from prompt" boundary. The campaign path never
//! depends on this; failures surface to the caller and stop there.

use crate::database::{queries, Database};
use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub const SETTING_ENDPOINT: &str = "ai_endpoint";
pub const SETTING_API_KEY: &str = "ai_api_key";
pub const SETTING_MODEL: &str = "ai_model";

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

pub fn config_from_settings(db: &Database) -> Result<AiConfig> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| anyhow::anyhow!("database lock poisoned: {e}"))?;
    let endpoint = queries::get_setting(&conn, SETTING_ENDPOINT)?
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    let api_key = queries::get_setting(&conn, SETTING_API_KEY)?.unwrap_or_default();
    let model =
        queries::get_setting(&conn, SETTING_MODEL)?.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    Ok(AiConfig {
        endpoint,
        api_key,
        model,
    })
}

/// One chat-completion round trip; returns the plain completion text.
pub async fn generate_text(config: &AiConfig, prompt: &str) -> Result<String> {
    if prompt.trim().is_empty() {
        bail!("O prompt está vazio.");
    }

    let body = json!({
        "model": config.model,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": 0.7,
    });

    let client = reqwest::Client::new();
    let mut request = client.post(&config.endpoint).json(&body);
    if !config.api_key.is_empty() {
        request = request.bearer_auth(&config.api_key);
    }

    let response = request.send().await.context("AI request failed")?;
    let status = response.status();
    let value: Value = response.json().await.context("AI response is not JSON")?;

    if !status.is_success() {
        bail!("AI endpoint returned {}: {}", status, value);
    }

    extract_completion(&value).context("AI response carried no completion text")
}

fn extract_completion(value: &Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_completion_from_chat_response() {
        let value = json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Olá!  " } }]
        });
        assert_eq!(extract_completion(&value).as_deref(), Some("Olá!"));
    }

    #[test]
    fn rejects_malformed_or_empty_responses() {
        assert!(extract_completion(&json!({})).is_none());
        assert!(extract_completion(&json!({ "choices": [] })).is_none());
        let blank = json!({ "choices": [{ "message": { "content": "   " } }] });
        assert!(extract_completion(&blank).is_none());
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let db = Database::in_memory().unwrap();
        let config = config_from_settings(&db).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(config.api_key.is_empty());

        {
            let conn = db.conn.lock().unwrap();
            queries::set_setting(&conn, SETTING_MODEL, "llama-3.1-70b").unwrap();
        }
        let config = config_from_settings(&db).unwrap();
        assert_eq!(config.model, "llama-3.1-70b");
    }
}
