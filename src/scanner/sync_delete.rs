//! Post-run reconciliation: prune local artifacts whose remote origin is
//! gone, then sweep empty directories. Runs only after a non-cancelled
//! completion of a task that enables it.

use super::ScanContext;
use crate::store::ITERATE_PAGE_SIZE;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub(crate) fn run(ctx: &ScanContext) {
    log::info!("task '{}': sync-delete started", ctx.task.name);
    prune_manifest(ctx);
    sweep_empty_dirs(&ctx.dest, &ctx.task.name);
    log::info!("task '{}': sync-delete finished", ctx.task.name);
}

/// Stream the manifest in keyset pages; every row whose path the current
/// run did not claim is removed from disk ("already absent" counts as
/// removed) and its row is deleted.
fn prune_manifest(ctx: &ScanContext) {
    let mut after_id = 0;
    let mut removed = 0usize;
    loop {
        let rows = match ctx.store.manifest_page(ctx.task.id, after_id, ITERATE_PAGE_SIZE) {
            Ok(rows) => rows,
            Err(err) => {
                log::error!(
                    "task '{}': reading manifest page failed: {}",
                    ctx.task.name,
                    err
                );
                return;
            }
        };
        if rows.is_empty() {
            break;
        }

        let mut stale_ids = Vec::new();
        for row in &rows {
            after_id = row.id;
            let path = Path::new(&row.file_path);
            if ctx.tracker.contains(path) {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => {
                    removed += 1;
                    log::debug!("task '{}': removed orphan {:?}", ctx.task.name, path);
                    stale_ids.push(row.id);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    stale_ids.push(row.id);
                }
                Err(err) => {
                    // Row kept; the next sync-delete run retries.
                    log::error!(
                        "task '{}': removing orphan {:?} failed: {}",
                        ctx.task.name,
                        path,
                        err
                    );
                }
            }
        }

        if !stale_ids.is_empty() {
            if let Err(err) = ctx.store.delete_manifest_ids(&stale_ids) {
                log::error!(
                    "task '{}': deleting manifest rows failed: {}",
                    ctx.task.name,
                    err
                );
            }
        }

        if rows.len() < ITERATE_PAGE_SIZE {
            break;
        }
    }
    if removed > 0 {
        log::info!("task '{}': removed {} orphaned files", ctx.task.name, removed);
    }
}

/// Remove directories under the destination root that ended up empty.
/// Deepest-first ordering (path length descending) lets a parent that only
/// contained an empty subtree go in the same sweep. The root itself is
/// never removed.
fn sweep_empty_dirs(root: &Path, task_name: &str) {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();

    dirs.sort_by(|a, b| b.as_os_str().len().cmp(&a.as_os_str().len()));

    for dir in dirs {
        let is_empty = match std::fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => continue,
        };
        if !is_empty {
            continue;
        }
        match std::fs::remove_dir(&dir) {
            Ok(()) => log::debug!("task '{}': removed empty directory {:?}", task_name, dir),
            Err(err) => log::warn!(
                "task '{}': removing empty directory {:?} failed: {}",
                task_name,
                dir,
                err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ACCOUNT_KIND_FSLIST;
    use crate::providers::mock::MockProvider;
    use crate::scanner::tests::test_context;
    use crate::store::test_support;
    use std::fs;

    fn context_with_dest(dest: &Path) -> std::sync::Arc<ScanContext> {
        let mut account = test_support::sample_account("acct", ACCOUNT_KIND_FSLIST);
        account.id = 3;
        let mut task = test_support::sample_task("shows", 3);
        task.id = 31;
        task.sync_delete = true;
        task.local_path = dest.to_string_lossy().into_owned();
        test_context(MockProvider::new(), task, account)
    }

    #[tokio::test]
    async fn test_prune_removes_only_unclaimed_paths() {
        let dest = tempfile::tempdir().unwrap();
        let a = dest.path().join("a.strm");
        let b = dest.path().join("b.strm");
        fs::write(&a, "keep").unwrap();
        fs::write(&b, "orphan").unwrap();

        let ctx = context_with_dest(dest.path());
        // Prior manifest claims a and b; this run only re-claimed a and
        // produced a new c.
        ctx.store
            .merge_manifest(
                31,
                &[
                    a.to_string_lossy().into_owned(),
                    b.to_string_lossy().into_owned(),
                ],
            )
            .unwrap();
        ctx.tracker.insert(&a);
        let c = dest.path().join("c.strm");
        fs::write(&c, "new").unwrap();
        ctx.tracker.insert(&c);
        ctx.store
            .merge_manifest(31, &[c.to_string_lossy().into_owned()])
            .unwrap();

        run(&ctx);

        assert!(a.exists());
        assert!(!b.exists());
        assert!(c.exists());

        let remaining: Vec<String> = ctx
            .store
            .manifest_page(31, 0, 100)
            .unwrap()
            .into_iter()
            .map(|row| row.file_path)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&a.to_string_lossy().into_owned()));
        assert!(remaining.contains(&c.to_string_lossy().into_owned()));
    }

    #[tokio::test]
    async fn test_prune_tolerates_already_absent_files() {
        let dest = tempfile::tempdir().unwrap();
        let ghost = dest.path().join("ghost.strm");

        let ctx = context_with_dest(dest.path());
        ctx.store
            .merge_manifest(31, &[ghost.to_string_lossy().into_owned()])
            .unwrap();

        run(&ctx);

        // The missing file still loses its manifest row.
        assert!(ctx.store.manifest_page(31, 0, 100).unwrap().is_empty());
    }

    #[test]
    fn test_sweep_removes_nested_empty_dirs_deepest_first() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("a/b/c")).unwrap();
        fs::write(root.path().join("a/keep.strm"), "x").unwrap();

        sweep_empty_dirs(root.path(), "test");

        // c was empty; b only contained c, so both go in one sweep. a still
        // holds a file and the root is never touched.
        assert!(!root.path().join("a/b/c").exists());
        assert!(!root.path().join("a/b").exists());
        assert!(root.path().join("a").exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_sweep_removes_chain_up_to_root_but_not_root() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("a/b/c")).unwrap();

        sweep_empty_dirs(root.path(), "test");

        assert!(!root.path().join("a").exists());
        assert!(root.path().exists());
    }

    #[tokio::test]
    async fn test_end_to_end_reconciliation() {
        // Prior run produced a and b; upstream b disappeared and c arrived.
        let dest = tempfile::tempdir().unwrap();
        let a = dest.path().join("a.strm");
        let b = dest.path().join("old/b.strm");
        fs::create_dir_all(b.parent().unwrap()).unwrap();
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let ctx = context_with_dest(dest.path());
        ctx.store
            .merge_manifest(
                31,
                &[
                    a.to_string_lossy().into_owned(),
                    b.to_string_lossy().into_owned(),
                ],
            )
            .unwrap();
        ctx.tracker.insert(&a);

        run(&ctx);

        assert!(a.exists());
        assert!(!b.exists());
        // b's directory became empty and was swept.
        assert!(!dest.path().join("old").exists());
    }
}
