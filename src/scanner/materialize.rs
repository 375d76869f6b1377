//! Turns one remote file entry into a local artifact: a `.strm` pointer
//! file for stream extensions, a verbatim download for meta extensions,
//! nothing for anything else. Target paths are claimed in the run tracker
//! before any existence check so that skipped files stay protected from
//! sync-delete.

use super::ScanContext;
use crate::models::{Account, RemoteEntry, ACCOUNT_KIND_FSLIST};
use crate::providers::USER_AGENT;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Extension of emitted pointer files.
pub const POINTER_EXTENSION: &str = "strm";

/// Pointer URLs fall back to the loopback bind when the account leaves its
/// pointer base empty.
pub const DEFAULT_POINTER_BASE: &str = "http://127.0.0.1:12398";

/// Modes of emitted artifacts: world-readable so a separate media-server
/// process can follow the shadow tree.
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FileKind {
    Stream,
    Meta,
    Ignored,
}

pub(crate) fn classify(
    name: &str,
    stream_exts: &HashSet<String>,
    meta_exts: &HashSet<String>,
) -> FileKind {
    let ext = extension_of(name);
    if stream_exts.contains(&ext) {
        FileKind::Stream
    } else if meta_exts.contains(&ext) {
        FileKind::Meta
    } else {
        FileKind::Ignored
    }
}

fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

/// Handle one file entry; `rel` is its cloud-relative path including the
/// file name, `/`-separated.
pub(crate) async fn process_file(ctx: &ScanContext, entry: &RemoteEntry, rel: &str) {
    if ctx.cancel.is_cancelled() {
        return;
    }
    match classify(&entry.name, &ctx.stream_exts, &ctx.meta_exts) {
        FileKind::Stream => write_pointer_file(ctx, entry, rel).await,
        FileKind::Meta => download_meta_file(ctx, entry, rel).await,
        FileKind::Ignored => {}
    }
}

// ============ Pointer files ============

async fn write_pointer_file(ctx: &ScanContext, entry: &RemoteEntry, rel: &str) {
    let pointer_rel = replace_extension(rel, POINTER_EXTENSION);
    let local_path = local_target(&ctx.dest, &pointer_rel);

    // Claim the path first; an existing file skipped below must still be
    // protected from sync-delete.
    ctx.tracker.insert(&local_path);

    if !ctx.task.overwrite && local_path.exists() {
        return;
    }

    let url = pointer_url(ctx, entry, rel);

    if let Some(parent) = local_path.parent() {
        if let Err(err) = create_dirs_with_mode(parent).await {
            log::error!(
                "task '{}': creating directory {:?} failed: {}",
                ctx.task.name,
                parent,
                err
            );
            return;
        }
    }

    if let Err(err) = write_atomic(&local_path, url.as_bytes()).await {
        log::error!(
            "task '{}': writing pointer file {:?} failed: {}",
            ctx.task.name,
            local_path,
            err
        );
        return;
    }
    log::debug!("task '{}': created pointer file {:?}", ctx.task.name, local_path);
}

/// The URL written into a pointer file. Signed form when the task requests
/// it, otherwise the plain per-provider form.
pub(crate) fn pointer_url(ctx: &ScanContext, entry: &RemoteEntry, rel: &str) -> String {
    let base = pointer_base(&ctx.account);
    let display = encode_path_segments(rel);

    if ctx.task.encode_path {
        let sign = ctx.signer.sign(ctx.account.id, &entry.id);
        format!("{}/api/v1/stream/s{}?sign={}", base, display, sign)
    } else if ctx.account.kind == ACCOUNT_KIND_FSLIST {
        let identity = encode_path_segments(&entry.id);
        format!("{}/api/v1/stream/s/{}{}", base, ctx.account.id, identity)
    } else {
        format!(
            "{}/api/v1/stream/s/{}/{}{}",
            base, ctx.account.id, entry.id, display
        )
    }
}

pub(crate) fn pointer_base(account: &Account) -> String {
    let base = account.pointer_base.trim();
    if base.is_empty() {
        DEFAULT_POINTER_BASE.to_string()
    } else {
        base.trim_end_matches('/').to_string()
    }
}

/// Percent-encode a `/`-separated path segment by segment, returning it
/// with a leading slash.
pub(crate) fn encode_path_segments(path: &str) -> String {
    let mut encoded = String::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        encoded.push('/');
        encoded.push_str(&urlencoding::encode(segment));
    }
    encoded
}

// ============ Meta files ============

async fn download_meta_file(ctx: &ScanContext, entry: &RemoteEntry, rel: &str) {
    let local_path = local_target(&ctx.dest, rel);
    ctx.tracker.insert(&local_path);

    if !ctx.task.overwrite && local_path.exists() {
        return;
    }

    let url = match ctx.provider.resolve_download(&entry.id).await {
        Ok(url) => url,
        Err(err) => {
            log::error!(
                "task '{}': resolving download for '{}' failed: {}",
                ctx.task.name,
                entry.name,
                err
            );
            return;
        }
    };

    if let Some(parent) = local_path.parent() {
        if let Err(err) = create_dirs_with_mode(parent).await {
            log::error!(
                "task '{}': creating directory {:?} failed: {}",
                ctx.task.name,
                parent,
                err
            );
            return;
        }
    }

    match fetch_to_file(&ctx.http, &url, &local_path).await {
        Ok(()) => log::debug!("task '{}': downloaded meta file {:?}", ctx.task.name, local_path),
        Err(err) => log::error!(
            "task '{}': downloading meta file '{}' failed: {}",
            ctx.task.name,
            entry.name,
            err
        ),
    }
}

/// Stream a download into a temp sibling, then rename it into place so a
/// concurrent reader of the local tree never observes a partial file.
async fn fetch_to_file(
    http: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<(), String> {
    let mut response = http
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(|e| format!("request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("server answered {}", status));
    }

    let tmp = temp_sibling(path);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| format!("creating {:?} failed: {}", tmp, e))?;

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = file.write_all(&chunk).await {
                    drop(file);
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(format!("writing {:?} failed: {}", tmp, e));
                }
            }
            Ok(None) => break,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(format!("download stream failed: {}", e));
            }
        }
    }

    file.flush().await.map_err(|e| format!("flush failed: {}", e))?;
    drop(file);
    apply_file_mode(&tmp)
        .await
        .map_err(|e| format!("setting mode on {:?} failed: {}", tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| format!("renaming into {:?} failed: {}", path, e))
}

// ============ Path helpers ============

/// Join a `/`-separated cloud-relative path under the destination root.
pub(crate) fn local_target(dest: &Path, rel: &str) -> PathBuf {
    let mut path = dest.to_path_buf();
    for segment in rel.split('/').filter(|segment| !segment.is_empty()) {
        path.push(segment);
    }
    path
}

/// Swap the extension of the last path segment (`show/ep01.mkv` →
/// `show/ep01.strm`).
pub(crate) fn replace_extension(rel: &str, new_ext: &str) -> String {
    let (dir, name) = match rel.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, rel),
    };
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    match dir {
        Some(dir) => format!("{}/{}.{}", dir, stem, new_ext),
        None => format!("{}.{}", stem, new_ext),
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = temp_sibling(path);
    tokio::fs::write(&tmp, contents).await?;
    apply_file_mode(&tmp).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Create any missing directories on the way to `path` and stamp them with
/// the directory mode. A plain mkdir mode is filtered by the umask;
/// chmodding the created levels is not.
async fn create_dirs_with_mode(path: &Path) -> std::io::Result<()> {
    let mut missing = Vec::new();
    let mut current = path.to_path_buf();
    while !current.exists() {
        missing.push(current.clone());
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent.to_path_buf(),
            _ => break,
        }
    }

    tokio::fs::create_dir_all(path).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for dir in missing.iter().rev() {
            tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(DIR_MODE)).await?;
        }
    }
    #[cfg(not(unix))]
    drop(missing);
    Ok(())
}

#[cfg(unix)]
async fn apply_file_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE)).await
}

#[cfg(not(unix))]
async fn apply_file_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}
