//! Concurrent recursive scan engine.
//!
//! A run walks the remote tree under three limits: a worker-pool semaphore
//! sized by the task's thread count, a shared request-rate ticker of period
//! `1s / threads`, and a cancellation token raced at every suspension
//! point. File entries funnel into the materializer; on a non-cancelled
//! completion the run's tracker is merged into the manifest and, when the
//! task asks for it, sync-delete reconciles the local tree.

pub mod materialize;
pub mod sync_delete;
pub mod tracker;

use crate::models::{parse_extensions, Account, RemoteEntry, Task};
use crate::notify::Notifier;
use crate::providers::Provider;
use crate::scheduler::RunStates;
use crate::signer::UrlSigner;
use crate::store::Store;
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracker::FileTracker;

/// Everything a scan run needs from the rest of the daemon.
#[derive(Clone)]
pub struct ScanDeps {
    pub store: Store,
    pub signer: Arc<UrlSigner>,
    pub notifier: Notifier,
    pub run_states: Arc<RunStates>,
}

/// Shared state of one running scan.
pub(crate) struct ScanContext {
    pub task: Task,
    pub account: Account,
    pub provider: Provider,
    pub cancel: CancellationToken,
    pub tracker: FileTracker,
    pub semaphore: Arc<Semaphore>,
    pub limiter: AsyncMutex<Interval>,
    pub stream_exts: HashSet<String>,
    pub meta_exts: HashSet<String>,
    pub dest: PathBuf,
    pub signer: Arc<UrlSigner>,
    pub store: Store,
    pub notifier: Notifier,
    pub http: reqwest::Client,
}

/// Execute one scan run for `task`. Owns the task's run-state slot and
/// releases it on return, whatever the outcome.
pub async fn run_scan_task(deps: ScanDeps, task: Task, cancel: CancellationToken) {
    let task_id = task.id;
    let task_name = task.name.clone();
    launch(deps.clone(), task, cancel).await;
    deps.run_states.release(task_id);
    log::info!("task '{}': run slot released", task_name);
}

async fn launch(deps: ScanDeps, task: Task, cancel: CancellationToken) {
    let account = match deps.store.account(task.account_id) {
        Ok(account) => account,
        Err(err) => {
            log::error!(
                "task '{}': launch failed, owning account {} not found: {}",
                task.name,
                task.account_id,
                err
            );
            deps.notifier.notify(
                "Task launch failed",
                &format!("Task '{}' could not load its cloud account", task.name),
            );
            return;
        }
    };

    let provider = match Provider::from_account(&account) {
        Ok(provider) => provider,
        Err(err) => {
            log::error!("task '{}': launch failed: {}", task.name, err);
            deps.notifier.notify(
                "Task launch failed",
                &format!("Task '{}': {}", task.name, err),
            );
            return;
        }
    };

    let ctx = build_context(deps, task, account, provider, cancel);
    execute(ctx).await;
}

pub(crate) fn build_context(
    deps: ScanDeps,
    task: Task,
    account: Account,
    provider: Provider,
    cancel: CancellationToken,
) -> Arc<ScanContext> {
    let threads = task.clamped_threads();
    let mut ticker = interval(Duration::from_secs_f64(1.0 / threads as f64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stream_exts = parse_extensions(&task.stream_extensions);
    let meta_exts = parse_extensions(&task.meta_extensions);
    let dest = PathBuf::from(&task.local_path);

    Arc::new(ScanContext {
        account,
        provider,
        cancel,
        tracker: FileTracker::new(),
        semaphore: Arc::new(Semaphore::new(threads)),
        limiter: AsyncMutex::new(ticker),
        stream_exts,
        meta_exts,
        dest,
        signer: deps.signer,
        store: deps.store,
        notifier: deps.notifier,
        http: reqwest::Client::new(),
        task,
    })
}

/// The walk plus the completion discipline: merge and sync-delete happen
/// only when the run was not cancelled.
pub(crate) async fn execute(ctx: Arc<ScanContext>) {
    log::info!(
        "task '{}': starting scan (account '{}', {} workers)",
        ctx.task.name,
        ctx.account.name,
        ctx.task.clamped_threads()
    );
    ctx.notifier.notify(
        "Task started",
        &format!("Task '{}' has started scanning", ctx.task.name),
    );

    let root = ctx.provider.normalize_root(&ctx.task.source_folder);
    walk_directory(ctx.clone(), root, String::new()).await;

    if ctx.cancel.is_cancelled() {
        log::warn!("task '{}': manually stopped", ctx.task.name);
        ctx.notifier.notify(
            "Task stopped",
            &format!("Task '{}' was stopped before finishing", ctx.task.name),
        );
        return;
    }

    let paths = ctx.tracker.snapshot();
    log::info!(
        "task '{}': scan finished, merging {} paths into the manifest",
        ctx.task.name,
        paths.len()
    );
    if let Err(err) = ctx.store.merge_manifest(ctx.task.id, &paths) {
        log::error!("task '{}': manifest merge failed: {}", ctx.task.name, err);
        ctx.notifier.notify(
            "Manifest merge failed",
            &format!("Task '{}' finished but its manifest was not updated: {}", ctx.task.name, err),
        );
        return;
    }

    if ctx.task.sync_delete {
        sync_delete::run(&ctx);
    }

    log::info!("task '{}': completed", ctx.task.name);
    ctx.notifier.notify(
        "Task completed",
        &format!("Task '{}' finished successfully", ctx.task.name),
    );
}

/// Recursively walk one remote directory. The semaphore permit covers the
/// listing phase and is released before descendants are awaited, so deep
/// trees cannot starve the pool.
fn walk_directory(
    ctx: Arc<ScanContext>,
    folder: String,
    rel: String,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if ctx.cancel.is_cancelled() {
            return;
        }

        let entries = {
            let _permit = match acquire_worker(&ctx).await {
                Some(permit) => permit,
                None => return,
            };
            match list_all_pages(&ctx, &folder).await {
                Some(entries) => entries,
                None => return,
            }
        };

        let mut children = JoinSet::new();
        for entry in entries {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if entry.name.contains('/') || entry.name == "." || entry.name == ".." {
                log::warn!(
                    "task '{}': skipping entry with unsafe name '{}'",
                    ctx.task.name,
                    entry.name
                );
                continue;
            }
            let entry_rel = if rel.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", rel, entry.name)
            };
            if entry.is_dir {
                children.spawn(walk_directory(ctx.clone(), entry.id.clone(), entry_rel));
            } else {
                let ctx = ctx.clone();
                children.spawn(async move { file_action(ctx, entry, entry_rel).await });
            }
        }

        // Drain every descendant, in-flight ones included after a cancel.
        while children.join_next().await.is_some() {}
    })
}

/// Page through one directory listing. `None` means the run was cancelled
/// or the listing failed; the subtree is abandoned and the run continues.
async fn list_all_pages(ctx: &ScanContext, folder: &str) -> Option<Vec<RemoteEntry>> {
    let mut entries = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        if !wait_for_tick(ctx).await {
            return None;
        }
        let page = tokio::select! {
            _ = ctx.cancel.cancelled() => return None,
            result = ctx.provider.list_page(folder, cursor.as_deref()) => result,
        };
        match page {
            Ok(page) => {
                entries.extend(page.entries);
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            Err(err) => {
                log::error!(
                    "task '{}': listing '{}' failed: {}",
                    ctx.task.name,
                    folder,
                    err
                );
                return None;
            }
        }
    }
    Some(entries)
}

async fn file_action(ctx: Arc<ScanContext>, entry: RemoteEntry, rel: String) {
    let _permit = match acquire_worker(&ctx).await {
        Some(permit) => permit,
        None => return,
    };
    if !wait_for_tick(&ctx).await {
        return;
    }
    materialize::process_file(&ctx, &entry, &rel).await;
}

/// Acquire a worker-pool permit, racing the run context.
async fn acquire_worker(ctx: &ScanContext) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        permit = ctx.semaphore.clone().acquire_owned() => permit.ok(),
    }
}

/// Block on the run's shared request-rate ticker, racing the run context.
async fn wait_for_tick(ctx: &ScanContext) -> bool {
    tokio::select! {
        _ = ctx.cancel.cancelled() => false,
        _ = async {
            ctx.limiter.lock().await.tick().await;
        } => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ListPage, ACCOUNT_KIND_FSLIST};
    use crate::providers::mock::{dir, file, MockProvider};
    use crate::store::test_support;
    use std::sync::atomic::Ordering;

    pub(crate) fn test_deps(store: Store) -> ScanDeps {
        ScanDeps {
            store: store.clone(),
            signer: Arc::new(UrlSigner::new(vec![1u8; 32])),
            notifier: Notifier::new(store),
            run_states: Arc::new(RunStates::new()),
        }
    }

    pub(crate) fn test_context(
        mock: MockProvider,
        task: Task,
        account: Account,
    ) -> Arc<ScanContext> {
        let store = Store::open_in_memory().unwrap();
        build_context(
            test_deps(store),
            task,
            account,
            Provider::Mock(mock),
            CancellationToken::new(),
        )
    }

    fn fslist_account() -> Account {
        let mut account = test_support::sample_account("shelf", ACCOUNT_KIND_FSLIST);
        account.id = 3;
        account
    }

    fn task_for(dest: &std::path::Path) -> Task {
        let mut task = test_support::sample_task("shows", 3);
        task.id = 11;
        task.local_path = dest.to_string_lossy().into_owned();
        task.source_folder = "/media".to_string();
        task.threads = 8;
        task
    }

    #[tokio::test]
    async fn test_walk_materializes_nested_tree() {
        let dest = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        mock.add_dir(
            "/media",
            vec![dir("/media/show", "show"), file("/media/movie.mkv", "movie.mkv")],
        );
        mock.add_dir(
            "/media/show",
            vec![
                file("/media/show/ep01.mkv", "ep01.mkv"),
                file("/media/show/notes.txt", "notes.txt"),
            ],
        );

        let ctx = test_context(mock, task_for(dest.path()), fslist_account());
        execute(ctx.clone()).await;

        assert!(dest.path().join("movie.strm").is_file());
        assert!(dest.path().join("show/ep01.strm").is_file());
        // Not in the stream or meta sets: ignored entirely.
        assert!(!dest.path().join("show/notes.txt").exists());
        assert_eq!(ctx.tracker.len(), 2);

        // A non-cancelled run merges its tracker into the manifest.
        let manifest = ctx.store.manifest_page(11, 0, 100).unwrap();
        assert_eq!(manifest.len(), 2);
    }

    #[tokio::test]
    async fn test_pagination_follows_cursor_until_sentinel() {
        let dest = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        mock.add_page(
            "/media",
            "",
            ListPage {
                entries: vec![file("/media/a.mkv", "a.mkv")],
                next_cursor: Some("7".to_string()),
            },
        );
        mock.add_page(
            "/media",
            "7",
            ListPage {
                entries: vec![file("/media/b.mkv", "b.mkv")],
                next_cursor: None,
            },
        );

        let ctx = test_context(mock, task_for(dest.path()), fslist_account());
        execute(ctx.clone()).await;

        if let Provider::Mock(mock) = &ctx.provider {
            assert_eq!(mock.list_calls.load(Ordering::SeqCst), 2);
        }
        assert!(dest.path().join("a.strm").is_file());
        assert!(dest.path().join("b.strm").is_file());
    }

    #[tokio::test]
    async fn test_cancelled_run_merges_nothing() {
        let dest = tempfile::tempdir().unwrap();
        let mut mock = MockProvider::new();
        mock.list_delay = Some(Duration::from_millis(200));
        mock.add_dir("/media", vec![file("/media/a.mkv", "a.mkv")]);

        let ctx = test_context(mock, task_for(dest.path()), fslist_account());
        let run = tokio::spawn(execute(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel.cancel();
        run.await.unwrap();

        assert!(ctx.store.manifest_page(11, 0, 100).unwrap().is_empty());
        assert!(!dest.path().join("a.strm").exists());
    }

    #[tokio::test]
    async fn test_cancel_before_start_writes_nothing() {
        let dest = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        mock.add_dir("/media", vec![file("/media/a.mkv", "a.mkv")]);

        let ctx = test_context(mock, task_for(dest.path()), fslist_account());
        ctx.cancel.cancel();
        execute(ctx.clone()).await;

        if let Provider::Mock(mock) = &ctx.provider {
            assert_eq!(mock.list_calls.load(Ordering::SeqCst), 0);
        }
        assert!(ctx.tracker.is_empty());
        assert!(ctx.store.manifest_page(11, 0, 100).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_confined_to_subtree() {
        let dest = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        // "/media/broken" has no page registered, so its listing errors.
        mock.add_dir(
            "/media",
            vec![dir("/media/broken", "broken"), file("/media/ok.mkv", "ok.mkv")],
        );

        let ctx = test_context(mock, task_for(dest.path()), fslist_account());
        execute(ctx.clone()).await;

        // The healthy sibling is still materialized and the run completes.
        assert!(dest.path().join("ok.strm").is_file());
        assert_eq!(ctx.store.manifest_page(11, 0, 100).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_walk_terminates_on_finite_tree() {
        let dest = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        mock.add_dir("/media", vec![dir("/media/a", "a")]);
        mock.add_dir("/media/a", vec![dir("/media/a/b", "b")]);
        mock.add_dir("/media/a/b", vec![file("/media/a/b/deep.mkv", "deep.mkv")]);

        let mut task = task_for(dest.path());
        task.threads = 1;
        let ctx = test_context(mock, task, fslist_account());
        execute(ctx.clone()).await;

        assert!(dest.path().join("a/b/deep.strm").is_file());
    }

    #[tokio::test]
    async fn test_unsafe_entry_names_skipped() {
        let dest = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        mock.add_dir(
            "/media",
            vec![file("/media/..", ".."), file("/media/fine.mkv", "fine.mkv")],
        );

        let ctx = test_context(mock, task_for(dest.path()), fslist_account());
        execute(ctx.clone()).await;

        assert_eq!(ctx.tracker.len(), 1);
        assert!(dest.path().join("fine.strm").is_file());
    }
}
