//! Manifest operations: the durable set of local paths a task's last
//! successful run claimed as its output.

use super::Store;
use crate::error::StoreError;
use rusqlite::params;

/// Manifest inserts are committed in transactions of this many rows.
pub const MERGE_BATCH_SIZE: usize = 500;

/// Keyset-paged iteration reads this many rows at a time.
pub const ITERATE_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ManifestRow {
    pub id: i64,
    pub file_path: String,
}

impl Store {
    /// Bulk-insert `(task_id, path)` rows, ignoring pairs that already exist.
    pub fn merge_manifest(&self, task_id: i64, paths: &[String]) -> Result<(), StoreError> {
        let mut conn = self.lock_conn();
        for chunk in paths.chunks(MERGE_BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO task_files (task_id, file_path) VALUES (?1, ?2)",
                )?;
                for path in chunk {
                    stmt.execute(params![task_id, path])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// One page of a task's manifest in ascending-id order, keyset by the
    /// last id seen (`after_id = 0` for the first page).
    pub fn manifest_page(
        &self,
        task_id: i64,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<ManifestRow>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, file_path FROM task_files
             WHERE task_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![task_id, after_id, limit as i64], |row| {
            Ok(ManifestRow {
                id: row.get(0)?,
                file_path: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Bulk-delete manifest rows by primary key.
    pub fn delete_manifest_ids(&self, ids: &[i64]) -> Result<(), StoreError> {
        let mut conn = self.lock_conn();
        for chunk in ids.chunks(MERGE_BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached("DELETE FROM task_files WHERE id = ?1")?;
                for id in chunk {
                    stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Drop the whole manifest of a task (task deletion).
    pub fn delete_manifest_for_task(&self, task_id: i64) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        conn.execute("DELETE FROM task_files WHERE task_id = ?1", params![task_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let paths = vec!["/out/a.strm".to_string(), "/out/b.strm".to_string()];
        store.merge_manifest(1, &paths).unwrap();
        store.merge_manifest(1, &paths).unwrap();

        let rows = store.manifest_page(1, 0, 10).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_keyset_iteration_order() {
        let store = Store::open_in_memory().unwrap();
        let paths: Vec<String> = (0..25).map(|i| format!("/out/file{:02}.strm", i)).collect();
        store.merge_manifest(7, &paths).unwrap();

        let mut seen = Vec::new();
        let mut after_id = 0;
        loop {
            let page = store.manifest_page(7, after_id, 10).unwrap();
            if page.is_empty() {
                break;
            }
            for row in &page {
                assert!(row.id > after_id);
                after_id = row.id;
                seen.push(row.file_path.clone());
            }
        }
        assert_eq!(seen.len(), 25);
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
    }

    #[test]
    fn test_delete_by_ids_and_task_scoping() {
        let store = Store::open_in_memory().unwrap();
        store
            .merge_manifest(1, &["/out/a.strm".to_string(), "/out/b.strm".to_string()])
            .unwrap();
        store.merge_manifest(2, &["/elsewhere/c.strm".to_string()]).unwrap();

        let rows = store.manifest_page(1, 0, 10).unwrap();
        let stale: Vec<i64> = rows
            .iter()
            .filter(|r| r.file_path.ends_with("b.strm"))
            .map(|r| r.id)
            .collect();
        store.delete_manifest_ids(&stale).unwrap();

        let remaining = store.manifest_page(1, 0, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].file_path, "/out/a.strm");
        assert_eq!(store.manifest_page(2, 0, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_all_for_task() {
        let store = Store::open_in_memory().unwrap();
        store
            .merge_manifest(1, &["/out/a.strm".to_string(), "/out/b.strm".to_string()])
            .unwrap();
        store.delete_manifest_for_task(1).unwrap();
        assert!(store.manifest_page(1, 0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_merge_large_batch() {
        let store = Store::open_in_memory().unwrap();
        let paths: Vec<String> = (0..1203).map(|i| format!("/out/e{:04}.strm", i)).collect();
        store.merge_manifest(3, &paths).unwrap();

        let mut total = 0;
        let mut after_id = 0;
        loop {
            let page = store
                .manifest_page(3, after_id, ITERATE_PAGE_SIZE)
                .unwrap();
            if page.is_empty() {
                break;
            }
            total += page.len();
            after_id = page.last().map(|r| r.id).unwrap_or(after_id);
        }
        assert_eq!(total, 1203);
    }
}
