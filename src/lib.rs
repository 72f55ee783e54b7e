mod ai;
mod browser;
mod campaign;
mod commands;
mod database;
mod wa;

use campaign::pacing::{PacingConfig, PacingPolicy};
use campaign::runner::CampaignRunner;
use database::Database;
use std::sync::{Arc, Mutex};
use tauri::Manager;

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    env_logger::init();

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let app_data_dir = app
                .path()
                .app_data_dir()
                .expect("Failed to get app data dir");
            let db = Database::new(&app_data_dir).expect("Failed to initialize database");
            app.manage(Arc::new(db));

            // One runner and one pacing window per app session; every
            // command and run borrows these instead of module globals.
            app.manage(CampaignRunner::new());
            app.manage(Arc::new(Mutex::new(PacingPolicy::new(
                PacingConfig::default(),
            ))));

            log::info!(
                "zap-campaigner initialized. DB at: {}",
                app_data_dir.display()
            );
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Chrome
            commands::chrome::detect_chrome,
            commands::chrome::get_surface_info,
            // Accounts
            commands::accounts::get_accounts,
            commands::accounts::add_account,
            commands::accounts::delete_account,
            commands::accounts::update_account_name,
            commands::accounts::open_login,
            commands::accounts::update_login_status,
            // Campaigns
            commands::campaign::preview_campaign,
            commands::campaign::start_campaign,
            commands::campaign::pause_campaign,
            commands::campaign::resume_campaign,
            commands::campaign::stop_campaign,
            commands::campaign::campaign_progress,
            commands::campaign::get_campaign_history,
            commands::campaign::inspect_run_snapshot,
            commands::campaign::send_to_contacts,
            commands::campaign::schedule_campaign,
            commands::campaign::get_scheduled_campaigns,
            commands::campaign::execute_scheduled_campaign,
            // AI assist + settings
            commands::ai::generate_message,
            commands::ai::get_app_setting,
            commands::ai::set_app_setting,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application")
}
