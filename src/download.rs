//! Fetching completed order archives to local storage.
use futures_util::stream::{self, StreamExt, TryStreamExt};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::order::OrderHandle;
use crate::provider::{ArchiveSource, RemoteArchive};

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Downloaded,
    Skipped,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DownloadResult {
    pub order_id: String,
    /// Final path of the archive; `None` when no archive could be named.
    pub local_path: Option<PathBuf>,
    pub status: DownloadStatus,
    pub bytes: u64,
    pub error: Option<DownloadError>,
}

impl DownloadResult {
    fn failed(order_id: &str, local_path: Option<PathBuf>, error: DownloadError) -> Self {
        Self {
            order_id: order_id.to_string(),
            local_path,
            status: DownloadStatus::Failed,
            bytes: 0,
            error: Some(error),
        }
    }
}

/// Byte progress for one archive.
#[derive(Debug)]
pub struct Progress<'a> {
    pub order_id: &'a str,
    pub file_name: &'a str,
    pub delta: u64,
    pub total: Option<u64>,
}

pub type ProgressCallback = Arc<dyn Fn(&Progress<'_>) + Send + Sync>;

#[derive(Clone)]
pub struct DownloadOptions {
    pub destination: PathBuf,
    pub concurrency: usize,
    pub overwrite: bool,
    pub progress: Option<ProgressCallback>,
}

impl DownloadOptions {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            concurrency: DEFAULT_CONCURRENCY,
            overwrite: false,
            progress: None,
        }
    }
}

struct ArchiveTask<'a> {
    index: usize,
    order_id: &'a str,
    archive: &'a RemoteArchive,
    file_name: String,
}

/// Downloads every archive of every ready order with at most
/// `options.concurrency` transfers in flight. Results follow handle order,
/// then archive order.
pub async fn download(
    source: &impl ArchiveSource,
    handles: &[OrderHandle],
    options: &DownloadOptions,
) -> Vec<DownloadResult> {
    let mut results: Vec<(usize, DownloadResult)> = vec![];
    let mut tasks = vec![];

    for handle in handles {
        let index = results.len() + tasks.len();
        if !handle.state.is_downloadable() {
            warn!(order_id = %handle.order_id, state = %handle.state, "Skipping order that is not ready");
            let error = DownloadError::OrderNotReady {
                order_id: handle.order_id.clone(),
                state: handle.state,
            };
            results.push((index, DownloadResult::failed(&handle.order_id, None, error)));
            continue;
        }
        if handle.result_urls.is_empty() {
            let error = DownloadError::NoArchives(handle.order_id.clone());
            results.push((index, DownloadResult::failed(&handle.order_id, None, error)));
            continue;
        }
        let file_names = archive_file_names(&handle.order_id, &handle.result_urls);
        for (archive, file_name) in handle.result_urls.iter().zip(file_names) {
            tasks.push(ArchiveTask {
                index: results.len() + tasks.len(),
                order_id: &handle.order_id,
                archive,
                file_name,
            });
        }
    }

    info!(archives = tasks.len(), "Downloading archives");

    let fetched = stream::iter(tasks)
        .map(|task| async move {
            let result = fetch_archive(source, &task, options).await;
            (task.index, result)
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    results.extend(fetched);
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

/// Makes a remote identifier usable as a single path component.
pub fn path_component(value: &str) -> Option<String> {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| {
        Regex::new(r"[^A-Za-z0-9._-]+").expect("Regex pattern should always compile")
    });
    let component = re.replace_all(value.trim(), "_");
    if component.is_empty() || component.chars().all(|c| c == '.') {
        return None;
    }
    Some(component.into_owned())
}

/// Local file name for an archive: the basename of its listed name, or a
/// name derived from the order id and archive index.
pub fn archive_file_name(order_id: &str, archive: &RemoteArchive, archive_index: usize) -> String {
    archive
        .name
        .as_deref()
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .and_then(path_component)
        .unwrap_or_else(|| format!("{}-{archive_index}.zip", order_dir_name(order_id)))
}

/// File names for every archive of one order. Names that repeat within the
/// order get the archive index appended to the stem, so each archive has its
/// own path and the mapping is the same on every run.
pub fn archive_file_names(order_id: &str, archives: &[RemoteArchive]) -> Vec<String> {
    let names: Vec<String> = archives
        .iter()
        .enumerate()
        .map(|(index, archive)| archive_file_name(order_id, archive, index))
        .collect();

    let mut used = HashSet::new();
    let mut unique = Vec::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        let repeated = names.iter().filter(|n| *n == name).count() > 1;
        let mut candidate = if repeated {
            indexed_name(name, index)
        } else {
            name.clone()
        };
        while !used.insert(candidate.clone()) {
            candidate = indexed_name(&candidate, index);
        }
        unique.push(candidate);
    }
    unique
}

fn indexed_name(name: &str, index: usize) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{index}{}", &name[..dot], &name[dot..]),
        _ => format!("{name}-{index}"),
    }
}

fn order_dir_name(order_id: &str) -> String {
    path_component(order_id).unwrap_or_else(|| "order".to_string())
}

async fn fetch_archive(
    source: &impl ArchiveSource,
    task: &ArchiveTask<'_>,
    options: &DownloadOptions,
) -> DownloadResult {
    let order_dir = options.destination.join(order_dir_name(task.order_id));
    let file_name = &task.file_name;
    let target = order_dir.join(file_name);

    match try_download(source, task, options, &order_dir, file_name, &target).await {
        Ok(outcome) => outcome,
        Err(error) => {
            warn!(order_id = %task.order_id, file = %file_name, error = %error, "Archive download failed");
            DownloadResult::failed(task.order_id, Some(target), error)
        }
    }
}

async fn try_download(
    source: &impl ArchiveSource,
    task: &ArchiveTask<'_>,
    options: &DownloadOptions,
    order_dir: &Path,
    file_name: &str,
    target: &Path,
) -> Result<DownloadResult, DownloadError> {
    let skipped = || DownloadResult {
        order_id: task.order_id.to_string(),
        local_path: Some(target.to_path_buf()),
        status: DownloadStatus::Skipped,
        bytes: 0,
        error: None,
    };

    if target.exists() && !options.overwrite {
        debug!(path = %target.display(), "Output file already exists");
        return Ok(skipped());
    }

    fs::create_dir_all(order_dir)?;

    let mut response = source
        .fetch(task.archive)
        .await
        .map_err(DownloadError::Transfer)?;
    let expected = task.archive.filesize.or(response.content_length);

    // Unique per transfer so concurrent downloads never share a partial file.
    let mut partial = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".partial")
        .tempfile_in(order_dir)?;

    let mut byte_count = 0_u64;
    while let Some(bytes) = response
        .body
        .try_next()
        .await
        .map_err(DownloadError::Transfer)?
    {
        let bytes_len = bytes.len() as u64;
        partial.write_all(&bytes)?;
        byte_count += bytes_len;
        if let Some(progress) = &options.progress {
            progress(&Progress {
                order_id: task.order_id,
                file_name,
                delta: bytes_len,
                total: expected,
            });
        }
    }
    partial.as_file().sync_all()?;

    if let Some(expected) = expected {
        if expected != byte_count {
            return Err(DownloadError::Incomplete {
                expected,
                received: byte_count,
            });
        }
    }

    if options.overwrite {
        partial.persist(target).map_err(|e| DownloadError::from(e.error))?;
    } else if let Err(e) = partial.persist_noclobber(target) {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            // Another transfer finished the same file first.
            return Ok(skipped());
        }
        return Err(e.error.into());
    }

    info!(order_id = %task.order_id, path = %target.display(), bytes = byte_count, "Download complete");
    Ok(DownloadResult {
        order_id: task.order_id.to_string(),
        local_path: Some(target.to_path_buf()),
        status: DownloadStatus::Downloaded,
        bytes: byte_count,
        error: None,
    })
}
