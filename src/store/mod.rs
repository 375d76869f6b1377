//! Embedded relational store: accounts, tasks, users and the per-task file
//! manifest. A single connection behind a lock, WAL journaling and a busy
//! timeout to cope with the scanner's concurrent writers.

mod manifest;

pub use manifest::{ManifestRow, ITERATE_PAGE_SIZE, MERGE_BATCH_SIZE};

use crate::auth;
use crate::error::StoreError;
use crate::models::{Account, Task, User};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    username       TEXT NOT NULL UNIQUE,
    password_hash  TEXT NOT NULL,
    token_version  INTEGER NOT NULL DEFAULT 1,
    webhook_url    TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS accounts (
    id                         INTEGER PRIMARY KEY AUTOINCREMENT,
    name                       TEXT NOT NULL UNIQUE,
    kind                       TEXT NOT NULL DEFAULT 'opendrive',
    client_id                  TEXT NOT NULL DEFAULT '',
    client_secret              TEXT NOT NULL DEFAULT '',
    base_url                   TEXT NOT NULL DEFAULT '',
    static_token               TEXT NOT NULL DEFAULT '',
    username                   TEXT NOT NULL DEFAULT '',
    password                   TEXT NOT NULL DEFAULT '',
    pointer_base               TEXT NOT NULL DEFAULT '',
    listing_cache_ttl_minutes  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tasks (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    name               TEXT NOT NULL UNIQUE,
    account_id         INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    source_folder      TEXT NOT NULL,
    local_path         TEXT NOT NULL,
    cron               TEXT NOT NULL,
    enabled            INTEGER NOT NULL DEFAULT 1,
    overwrite          INTEGER NOT NULL DEFAULT 0,
    sync_delete        INTEGER NOT NULL DEFAULT 0,
    encode_path        INTEGER NOT NULL DEFAULT 0,
    stream_extensions  TEXT NOT NULL DEFAULT 'mp4,mkv,ts,iso',
    meta_extensions    TEXT NOT NULL DEFAULT 'jpg,jpeg,png,webp,srt,ass,sub',
    threads            INTEGER NOT NULL DEFAULT 4
);

CREATE TABLE IF NOT EXISTS task_files (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id    INTEGER NOT NULL,
    file_path  TEXT NOT NULL,
    UNIQUE(task_id, file_path)
);

CREATE INDEX IF NOT EXISTS idx_task_files_task ON task_files(task_id, id);
"#;

/// Handle to the embedded store. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_admin()?;
        Ok(store)
    }

    /// Create the default admin/admin user when no user exists yet.
    fn ensure_admin(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        if count == 0 {
            log::info!("No users found, creating default admin/admin...");
            match auth::hash_password("admin") {
                Ok(hash) => {
                    conn.execute(
                        "INSERT INTO users (username, password_hash) VALUES (?1, ?2)",
                        params!["admin", hash],
                    )?;
                }
                Err(e) => log::error!("Failed to hash default admin password: {}", e),
            }
        }
        Ok(())
    }

    // ============ Users ============

    pub fn user_by_username(&self, username: &str) -> Result<User, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, token_version, webhook_url
             FROM users WHERE username = ?1",
            params![username],
            row_to_user,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    /// The first (admin) user; notification settings hang off this record.
    pub fn first_user(&self) -> Result<User, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password_hash, token_version, webhook_url
             FROM users ORDER BY id ASC LIMIT 1",
            [],
            row_to_user,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn update_user(&self, user: &User) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE users SET username = ?1, password_hash = ?2, token_version = ?3,
             webhook_url = ?4 WHERE id = ?5",
            params![
                user.username,
                user.password_hash,
                user.token_version,
                user.webhook_url,
                user.id
            ],
        )?;
        Ok(())
    }

    // ============ Accounts ============

    pub fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts ORDER BY id ASC",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_account)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn account(&self, id: i64) -> Result<Account, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
            params![id],
            row_to_account,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn create_account(&self, account: &Account) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO accounts (name, kind, client_id, client_secret, base_url,
             static_token, username, password, pointer_base, listing_cache_ttl_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                account.name,
                account.kind,
                account.client_id,
                account.client_secret,
                account.base_url,
                account.static_token,
                account.username,
                account.password,
                account.pointer_base,
                account.listing_cache_ttl_minutes
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_account(&self, account: &Account) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE accounts SET name = ?1, kind = ?2, client_id = ?3, client_secret = ?4,
             base_url = ?5, static_token = ?6, username = ?7, password = ?8,
             pointer_base = ?9, listing_cache_ttl_minutes = ?10 WHERE id = ?11",
            params![
                account.name,
                account.kind,
                account.client_id,
                account.client_secret,
                account.base_url,
                account.static_token,
                account.username,
                account.password,
                account.pointer_base,
                account.listing_cache_ttl_minutes,
                account.id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete an account; owning tasks go with it via the foreign key.
    pub fn delete_account(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn tasks_for_account(&self, account_id: i64) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE account_id = ?1 ORDER BY id ASC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![account_id], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ============ Tasks ============

    pub fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks ORDER BY id DESC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn enabled_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE enabled = 1 ORDER BY id ASC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn task(&self, id: i64) -> Result<Task, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            params![id],
            row_to_task,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    pub fn create_task(&self, task: &Task) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tasks (name, account_id, source_folder, local_path, cron, enabled,
             overwrite, sync_delete, encode_path, stream_extensions, meta_extensions, threads)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                task.name,
                task.account_id,
                task.source_folder,
                task.local_path,
                task.cron,
                task.enabled,
                task.overwrite,
                task.sync_delete,
                task.encode_path,
                task.stream_extensions,
                task.meta_extensions,
                task.threads
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE tasks SET name = ?1, account_id = ?2, source_folder = ?3, local_path = ?4,
             cron = ?5, enabled = ?6, overwrite = ?7, sync_delete = ?8, encode_path = ?9,
             stream_extensions = ?10, meta_extensions = ?11, threads = ?12 WHERE id = ?13",
            params![
                task.name,
                task.account_id,
                task.source_folder,
                task.local_path,
                task.cron,
                task.enabled,
                task.overwrite,
                task.sync_delete,
                task.encode_path,
                task.stream_extensions,
                task.meta_extensions,
                task.threads,
                task.id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn delete_task(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub(crate) fn lock_conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

const ACCOUNT_COLUMNS: &str = "id, name, kind, client_id, client_secret, base_url, \
     static_token, username, password, pointer_base, listing_cache_ttl_minutes";

const TASK_COLUMNS: &str = "id, name, account_id, source_folder, local_path, cron, enabled, \
     overwrite, sync_delete, encode_path, stream_extensions, meta_extensions, threads";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        token_version: row.get(3)?,
        webhook_url: row.get(4)?,
    })
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        client_id: row.get(3)?,
        client_secret: row.get(4)?,
        base_url: row.get(5)?,
        static_token: row.get(6)?,
        username: row.get(7)?,
        password: row.get(8)?,
        pointer_base: row.get(9)?,
        listing_cache_ttl_minutes: row.get(10)?,
    })
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        account_id: row.get(2)?,
        source_folder: row.get(3)?,
        local_path: row.get(4)?,
        cron: row.get(5)?,
        enabled: row.get(6)?,
        overwrite: row.get(7)?,
        sync_delete: row.get(8)?,
        encode_path: row.get(9)?,
        stream_extensions: row.get(10)?,
        meta_extensions: row.get(11)?,
        threads: row.get(12)?,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::{default_meta_extensions, default_stream_extensions};

    pub fn sample_account(name: &str, kind: &str) -> Account {
        Account {
            id: 0,
            name: name.to_string(),
            kind: kind.to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            base_url: "http://shelf.local:5244".to_string(),
            static_token: String::new(),
            username: String::new(),
            password: String::new(),
            pointer_base: String::new(),
            listing_cache_ttl_minutes: 0,
        }
    }

    pub fn sample_task(name: &str, account_id: i64) -> Task {
        Task {
            id: 0,
            name: name.to_string(),
            account_id,
            source_folder: "/media".to_string(),
            local_path: "/tmp/out".to_string(),
            cron: "0 0 3 * * *".to_string(),
            enabled: true,
            overwrite: false,
            sync_delete: false,
            encode_path: false,
            stream_extensions: default_stream_extensions(),
            meta_extensions: default_meta_extensions(),
            threads: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::ACCOUNT_KIND_OPENDRIVE;

    #[test]
    fn test_default_admin_created() {
        let store = Store::open_in_memory().unwrap();
        let admin = store.user_by_username("admin").unwrap();
        assert_eq!(admin.token_version, 1);
        assert!(auth::verify_password("admin", &admin.password_hash));
    }

    #[test]
    fn test_account_crud() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .create_account(&sample_account("pan", ACCOUNT_KIND_OPENDRIVE))
            .unwrap();

        let mut account = store.account(id).unwrap();
        assert_eq!(account.name, "pan");

        account.pointer_base = "http://media.lan:12398/".to_string();
        store.update_account(&account).unwrap();
        assert_eq!(
            store.account(id).unwrap().pointer_base,
            "http://media.lan:12398/"
        );

        store.delete_account(id).unwrap();
        assert!(matches!(store.account(id), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_task_cascade_on_account_delete() {
        let store = Store::open_in_memory().unwrap();
        let account_id = store
            .create_account(&sample_account("pan", ACCOUNT_KIND_OPENDRIVE))
            .unwrap();
        let task_id = store.create_task(&sample_task("shows", account_id)).unwrap();
        assert!(store.task(task_id).is_ok());

        store.delete_account(account_id).unwrap();
        assert!(matches!(store.task(task_id), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_enabled_tasks_filter() {
        let store = Store::open_in_memory().unwrap();
        let account_id = store
            .create_account(&sample_account("pan", ACCOUNT_KIND_OPENDRIVE))
            .unwrap();
        let mut disabled = sample_task("off", account_id);
        disabled.enabled = false;
        store.create_task(&disabled).unwrap();
        store.create_task(&sample_task("on", account_id)).unwrap();

        let enabled = store.enabled_tasks().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "on");
    }

    #[test]
    fn test_unique_task_name() {
        let store = Store::open_in_memory().unwrap();
        let account_id = store
            .create_account(&sample_account("pan", ACCOUNT_KIND_OPENDRIVE))
            .unwrap();
        store.create_task(&sample_task("shows", account_id)).unwrap();
        assert!(store.create_task(&sample_task("shows", account_id)).is_err());
    }
}
