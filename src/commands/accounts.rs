use crate::browser::chrome;
use crate::database::{queries, Database};
use crate::wa;
use std::sync::Arc;
use tauri::State;

#[tauri::command]
pub fn get_accounts(db: State<'_, Arc<Database>>) -> Result<Vec<queries::Account>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    queries::get_all_accounts(&conn).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn add_account(
    db: State<'_, Arc<Database>>,
    display_name: String,
) -> Result<queries::Account, String> {
    let index = chrome::next_profile_index().map_err(|e| e.to_string())?;
    let profile_dir = chrome::create_profile_dir(index).map_err(|e| e.to_string())?;
    let profile_dir_str = profile_dir.to_string_lossy().to_string();

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let name = if display_name.trim().is_empty() {
        format!("Conta WhatsApp {}", index)
    } else {
        display_name
    };
    let id = queries::insert_account(&conn, &name, &profile_dir_str).map_err(|e| e.to_string())?;

    Ok(queries::Account {
        id,
        display_name: name,
        chrome_profile_dir: profile_dir_str,
        is_logged_in: false,
        last_checked_at: None,
        created_at: chrono::Utc::now().to_rfc3339(),
    })
}

#[tauri::command]
pub fn delete_account(db: State<'_, Arc<Database>>, account_id: i64) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let profile_dir = queries::delete_account(&conn, account_id).map_err(|e| e.to_string())?;

    let profile_path = std::path::PathBuf::from(&profile_dir);
    if let Err(e) = chrome::delete_profile(&profile_path) {
        log::warn!("Failed to delete Chrome profile {}: {}", profile_dir, e);
    }

    Ok(())
}

#[tauri::command]
pub fn update_account_name(
    db: State<'_, Arc<Database>>,
    account_id: i64,
    display_name: String,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    queries::update_account_display_name(&conn, account_id, &display_name).map_err(|e| e.to_string())
}

/// Open WhatsApp Web in the account's Chrome profile so the user can link
/// the device (scan the QR code).
#[tauri::command]
pub fn open_login(db: State<'_, Arc<Database>>, account_id: i64) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let account = queries::get_account(&conn, account_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Conta {} não encontrada", account_id))?;

    let chrome_path = chrome::detect_chrome().map_err(|e| e.to_string())?;
    let profile_dir = std::path::PathBuf::from(&account.chrome_profile_dir);
    chrome::launch_with_debug(&chrome_path, &profile_dir, wa::WEB_URL).map_err(|e| e.to_string())?;

    Ok(())
}

#[tauri::command]
pub fn update_login_status(
    db: State<'_, Arc<Database>>,
    account_id: i64,
    is_logged_in: bool,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    queries::update_account_login_status(&conn, account_id, is_logged_in).map_err(|e| e.to_string())
}
