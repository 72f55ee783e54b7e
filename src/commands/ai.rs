use crate::ai;
use crate::database::{queries, Database};
use std::sync::Arc;
use tauri::State;

/// Keys the frontend is allowed to touch through the settings commands.
const ALLOWED_SETTINGS: &[&str] = &[ai::SETTING_ENDPOINT, ai::SETTING_API_KEY, ai::SETTING_MODEL];

#[tauri::command]
pub async fn generate_message(
    db: State<'_, Arc<Database>>,
    prompt: String,
) -> Result<String, String> {
    let config = ai::config_from_settings(&db).map_err(|e| e.to_string())?;
    ai::generate_text(&config, &prompt)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_app_setting(db: State<'_, Arc<Database>>, key: String) -> Result<Option<String>, String> {
    if !ALLOWED_SETTINGS.contains(&key.as_str()) {
        return Err(format!("Configuração desconhecida: {}", key));
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    queries::get_setting(&conn, &key).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn set_app_setting(
    db: State<'_, Arc<Database>>,
    key: String,
    value: String,
) -> Result<(), String> {
    if !ALLOWED_SETTINGS.contains(&key.as_str()) {
        return Err(format!("Configuração desconhecida: {}", key));
    }
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    queries::set_setting(&conn, &key, &value).map_err(|e| e.to_string())
}
