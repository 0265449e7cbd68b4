#![forbid(unsafe_code)]

//! `mirror fetch`: refresh synced playlists from the remote source.
//!
//! Listings are downloaded concurrently, merged one playlist at a time in
//! display order, and thumbnails for videos still lacking one are fetched
//! afterwards as best-effort side work. Nothing is written to disk here; the
//! caller saves once the report comes back.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use tracing::{info, warn};

use crate::error::ArchiveError;
use crate::project::Project;
use crate::reconcile::{self, MergeReport};
use crate::remote::{RemoteSource, RemoteVideo, ThumbnailBytes};
use crate::video::thumbnail_data_uri;
use crate::workers::run_bounded;

#[derive(Debug, Default)]
pub struct FetchReport {
    pub merged: Vec<MergeReport>,
    /// Playlists whose listing could not be downloaded: (label, error).
    pub failed: Vec<(String, String)>,
    pub thumbnails: usize,
    /// Thumbnail fetches that failed: (video id, error). Retried next fetch.
    pub thumbnail_failures: Vec<(String, String)>,
}

impl FetchReport {
    pub fn created(&self) -> usize {
        self.merged.iter().map(|merge| merge.created.len()).sum()
    }

    pub fn inserted(&self) -> usize {
        self.merged.iter().map(|merge| merge.inserted.len()).sum()
    }

    /// Turns listing failures into an error once the successful part has
    /// been saved.
    pub fn ensure_complete(&self) -> Result<()> {
        match self.failed.as_slice() {
            [] => Ok(()),
            [(label, err)] => bail!("fetching playlist {label} failed: {err}"),
            failed => {
                let labels: Vec<&str> = failed.iter().map(|(label, _)| label.as_str()).collect();
                bail!("fetching {} playlists failed: {}", failed.len(), labels.join(", "))
            }
        }
    }
}

struct Target {
    id: String,
    label: String,
    source_id: String,
}

/// Fetches and merges `selection` (any playlist reference), or every playlist
/// with a remote source when `None`.
pub async fn fetch_playlists(
    project: &mut Project,
    remote: Arc<dyn RemoteSource>,
    selection: Option<&str>,
) -> Result<FetchReport> {
    let targets = select_targets(project, selection)?;
    let mut report = FetchReport::default();
    if targets.is_empty() {
        info!("no playlist has a remote source");
        return Ok(report);
    }

    info!("fetching {} playlist(s)", targets.len());
    let listings = run_bounded(project.settings.workers.playlists, targets, |target| {
        let remote = remote.clone();
        async move {
            let source_id = target.source_id.clone();
            let listing = tokio::task::spawn_blocking(move || remote.playlist_items(&source_id))
                .await
                .map_err(|err| anyhow!("listing task failed: {err}"))
                .and_then(|result| result);
            (target, listing)
        }
    })
    .await;

    let mut fetched: Vec<RemoteVideo> = Vec::new();
    for (target, listing) in listings {
        match listing {
            Ok(items) => {
                let merge = reconcile::merge_remote(
                    &mut project.catalog,
                    &mut project.playlists,
                    &target.id,
                    &items,
                )?;
                info!(
                    "{}: {} remote item(s), {} new to the playlist",
                    target.label,
                    items.len(),
                    merge.inserted.len()
                );
                report.merged.push(merge);
                fetched.extend(items.into_iter().filter(|item| !item.unavailable));
            }
            Err(err) => {
                warn!("fetching {} failed: {err:#}", target.label);
                report.failed.push((target.label, format!("{err:#}")));
            }
        }
    }

    fetch_thumbnails(project, remote, fetched, &mut report).await;
    Ok(report)
}

fn select_targets(project: &Project, selection: Option<&str>) -> Result<Vec<Target>> {
    let target = |id: &str, label: &str, source: &str| Target {
        id: id.to_string(),
        label: label.to_string(),
        source_id: source.to_string(),
    };
    match selection {
        Some(reference) => {
            let playlist = project.playlist(reference)?;
            let Some(source) = playlist.source_id.as_deref() else {
                return Err(ArchiveError::NoSource(playlist.label.clone()).into());
            };
            Ok(vec![target(&playlist.id, &playlist.label, source)])
        }
        None => Ok(project
            .playlists
            .iter()
            .filter_map(|playlist| {
                let source = playlist.source_id.as_deref()?;
                Some(target(&playlist.id, &playlist.label, source))
            })
            .collect()),
    }
}

/// Downloads a thumbnail for every fetched video whose record still has none.
/// Results are applied after the whole batch joins.
async fn fetch_thumbnails(
    project: &mut Project,
    remote: Arc<dyn RemoteSource>,
    fetched: Vec<RemoteVideo>,
    report: &mut FetchReport,
) {
    let mut queued = BTreeSet::new();
    let mut jobs = Vec::new();
    for item in fetched {
        let needs_thumbnail = project
            .catalog
            .get(&item.video_id)
            .is_some_and(|video| video.thumbnail.is_none());
        if !needs_thumbnail || !queued.insert(item.video_id.clone()) {
            continue;
        }
        if let Some(url) = item.best_thumbnail() {
            jobs.push((item.video_id.clone(), url.to_string()));
        }
    }
    if jobs.is_empty() {
        return;
    }

    let results = run_bounded(project.settings.workers.videos, jobs, |(video_id, url)| {
        let remote = remote.clone();
        async move {
            let fetch_url = url.clone();
            let bytes = tokio::task::spawn_blocking(move || remote.thumbnail(&fetch_url))
                .await
                .map_err(|err| anyhow!("thumbnail task failed: {err}"))
                .and_then(|result| result);
            (video_id, url, bytes)
        }
    })
    .await;

    for (video_id, url, bytes) in results {
        match bytes {
            Ok(payload) => {
                if let Some(video) = project.catalog.get_mut(&video_id) {
                    let mime = thumbnail_mime(&payload, &url);
                    video.thumbnail = Some(thumbnail_data_uri(&mime, &payload.bytes));
                    report.thumbnails += 1;
                }
            }
            Err(err) => {
                warn!("thumbnail for {video_id} failed: {err:#}");
                report.thumbnail_failures.push((video_id, format!("{err:#}")));
            }
        }
    }
}

fn thumbnail_mime(payload: &ThumbnailBytes, url: &str) -> String {
    payload.content_type.clone().unwrap_or_else(|| {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        mime_guess::from_path(path)
            .first()
            .filter(|mime| mime.type_().as_str() == "image")
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| "image/jpeg".to_string())
    })
}
