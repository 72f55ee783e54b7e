use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Single well-known key for the active run snapshot.
pub const ACTIVE_RUN_KEY: &str = "active_run";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub display_name: String,
    pub chrome_profile_dir: String,
    pub is_logged_in: bool,
    pub last_checked_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: String,
    pub status: String,
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledCampaign {
    pub id: i64,
    pub account_id: i64,
    pub payload: String,
    pub scheduled_at: String,
    pub status: String,
    pub created_at: String,
}

// ========== Accounts ==========

pub fn insert_account(conn: &Connection, display_name: &str, chrome_profile_dir: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO accounts (display_name, chrome_profile_dir) VALUES (?1, ?2)",
        params![display_name, chrome_profile_dir],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_all_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, display_name, chrome_profile_dir, is_logged_in, last_checked_at, created_at \
         FROM accounts ORDER BY created_at DESC",
    )?;
    let accounts = stmt
        .query_map([], |row| {
            Ok(Account {
                id: row.get(0)?,
                display_name: row.get(1)?,
                chrome_profile_dir: row.get(2)?,
                is_logged_in: row.get(3)?,
                last_checked_at: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(accounts)
}

pub fn get_account(conn: &Connection, id: i64) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            "SELECT id, display_name, chrome_profile_dir, is_logged_in, last_checked_at, created_at \
             FROM accounts WHERE id = ?1",
            params![id],
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    chrome_profile_dir: row.get(2)?,
                    is_logged_in: row.get(3)?,
                    last_checked_at: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(account)
}

pub fn update_account_login_status(conn: &Connection, id: i64, is_logged_in: bool) -> Result<()> {
    conn.execute(
        "UPDATE accounts SET is_logged_in = ?1, last_checked_at = datetime('now') WHERE id = ?2",
        params![is_logged_in, id],
    )?;
    Ok(())
}

pub fn update_account_display_name(conn: &Connection, id: i64, display_name: &str) -> Result<()> {
    conn.execute(
        "UPDATE accounts SET display_name = ?1 WHERE id = ?2",
        params![display_name, id],
    )?;
    Ok(())
}

pub fn delete_account(conn: &Connection, id: i64) -> Result<String> {
    // Profile dir is needed afterwards for filesystem cleanup.
    let profile_dir: String = conn.query_row(
        "SELECT chrome_profile_dir FROM accounts WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
    Ok(profile_dir)
}

// ========== Active run snapshot ==========

pub fn save_run_snapshot(conn: &Connection, payload: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO campaign_state (key, payload, updated_at) VALUES (?1, ?2, datetime('now')) \
         ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        params![ACTIVE_RUN_KEY, payload],
    )?;
    Ok(())
}

pub fn load_run_snapshot(conn: &Connection) -> Result<Option<String>> {
    let payload = conn
        .query_row(
            "SELECT payload FROM campaign_state WHERE key = ?1",
            params![ACTIVE_RUN_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(payload)
}

pub fn clear_run_snapshot(conn: &Connection) -> Result<()> {
    conn.execute(
        "DELETE FROM campaign_state WHERE key = ?1",
        params![ACTIVE_RUN_KEY],
    )?;
    Ok(())
}

// ========== Run history ==========

pub fn insert_campaign_record(
    conn: &Connection,
    started_at: &str,
    status: &str,
    total: i64,
    sent: i64,
    failed: i64,
    detail: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO campaign_history (started_at, status, total, sent, failed, detail) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![started_at, status, total, sent, failed, detail],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_campaign_history(conn: &Connection) -> Result<Vec<CampaignRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, started_at, finished_at, status, total, sent, failed, detail \
         FROM campaign_history ORDER BY id DESC",
    )?;
    let records = stmt
        .query_map([], |row| {
            Ok(CampaignRecord {
                id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                status: row.get(3)?,
                total: row.get(4)?,
                sent: row.get(5)?,
                failed: row.get(6)?,
                detail: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

// ========== Scheduled campaigns ==========

pub fn insert_scheduled_campaign(
    conn: &Connection,
    account_id: i64,
    payload: &str,
    scheduled_at: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO scheduled_campaigns (account_id, payload, scheduled_at) VALUES (?1, ?2, ?3)",
        params![account_id, payload, scheduled_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_scheduled_campaigns(conn: &Connection) -> Result<Vec<ScheduledCampaign>> {
    let mut stmt = conn.prepare(
        "SELECT id, account_id, payload, scheduled_at, status, created_at \
         FROM scheduled_campaigns ORDER BY scheduled_at ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ScheduledCampaign {
                id: row.get(0)?,
                account_id: row.get(1)?,
                payload: row.get(2)?,
                scheduled_at: row.get(3)?,
                status: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_scheduled_campaign(conn: &Connection, id: i64) -> Result<Option<ScheduledCampaign>> {
    let row = conn
        .query_row(
            "SELECT id, account_id, payload, scheduled_at, status, created_at \
             FROM scheduled_campaigns WHERE id = ?1",
            params![id],
            |row| {
                Ok(ScheduledCampaign {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    payload: row.get(2)?,
                    scheduled_at: row.get(3)?,
                    status: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn update_scheduled_status(conn: &Connection, id: i64, status: &str) -> Result<()> {
    conn.execute(
        "UPDATE scheduled_campaigns SET status = ?1 WHERE id = ?2",
        params![status, id],
    )?;
    Ok(())
}

// ========== Settings ==========

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn db() -> Database {
        Database::in_memory().unwrap()
    }

    #[test]
    fn account_roundtrip() {
        let db = db();
        let conn = db.conn.lock().unwrap();
        let id = insert_account(&conn, "Conta 1", "/tmp/profiles/wa-1").unwrap();
        let account = get_account(&conn, id).unwrap().unwrap();
        assert_eq!(account.display_name, "Conta 1");
        assert!(!account.is_logged_in);

        update_account_login_status(&conn, id, true).unwrap();
        let account = get_account(&conn, id).unwrap().unwrap();
        assert!(account.is_logged_in);
        assert!(account.last_checked_at.is_some());

        let profile = delete_account(&conn, id).unwrap();
        assert_eq!(profile, "/tmp/profiles/wa-1");
        assert!(get_account(&conn, id).unwrap().is_none());
    }

    #[test]
    fn run_snapshot_is_single_keyed_and_overwritten() {
        let db = db();
        let conn = db.conn.lock().unwrap();
        assert!(load_run_snapshot(&conn).unwrap().is_none());

        save_run_snapshot(&conn, "{\"cursor\":1}").unwrap();
        save_run_snapshot(&conn, "{\"cursor\":2}").unwrap();
        assert_eq!(
            load_run_snapshot(&conn).unwrap().as_deref(),
            Some("{\"cursor\":2}")
        );

        clear_run_snapshot(&conn).unwrap();
        assert!(load_run_snapshot(&conn).unwrap().is_none());
    }

    #[test]
    fn campaign_history_records_summaries() {
        let db = db();
        let conn = db.conn.lock().unwrap();
        insert_campaign_record(&conn, "2026-08-07T10:00:00Z", "completed", 3, 2, 1, None).unwrap();
        let history = get_campaign_history(&conn).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "completed");
        assert_eq!(history[0].sent, 2);
    }

    #[test]
    fn scheduled_campaign_status_flow() {
        let db = db();
        let conn = db.conn.lock().unwrap();
        let account = insert_account(&conn, "Conta", "/tmp/p").unwrap();
        let id =
            insert_scheduled_campaign(&conn, account, "{}", "2026-08-08T09:00:00Z").unwrap();
        assert_eq!(get_scheduled_campaigns(&conn).unwrap()[0].status, "pending");

        update_scheduled_status(&conn, id, "dispatched").unwrap();
        let row = get_scheduled_campaign(&conn, id).unwrap().unwrap();
        assert_eq!(row.status, "dispatched");
    }

    #[test]
    fn settings_upsert() {
        let db = db();
        let conn = db.conn.lock().unwrap();
        assert!(get_setting(&conn, "ai_model").unwrap().is_none());
        set_setting(&conn, "ai_model", "gpt-4o-mini").unwrap();
        set_setting(&conn, "ai_model", "llama-3.1").unwrap();
        assert_eq!(
            get_setting(&conn, "ai_model").unwrap().as_deref(),
            Some("llama-3.1")
        );
    }
}
