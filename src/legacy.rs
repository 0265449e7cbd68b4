#![forbid(unsafe_code)]

//! Imports a folder of previously downloaded media (yt-dlp style, with
//! `<name>.info.json` sidecars) into the project.
//!
//! Sidecars are parsed and files are moved concurrently; the catalog and
//! playlist are only touched afterwards, from this module's sequential apply
//! step.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::playlist::Position;
use crate::project::Project;
use crate::pull::is_caption;
use crate::video::{Video, thumbnail_data_uri, watch_url};
use crate::workers::run_bounded;

const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "flv", "m4v", "m4a", "mp3", "opus", "ogg",
];
const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Subset of yt-dlp's `info.json` used to rebuild a catalog record.
#[derive(Debug, Clone, Deserialize)]
struct InfoJson {
    id: String,
    title: Option<String>,
    fulltitle: Option<String>,
    description: Option<String>,
    channel_id: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    upload_date: Option<String>,
    webpage_url: Option<String>,
}

impl InfoJson {
    fn into_video(self) -> Video {
        let label = self
            .fulltitle
            .or(self.title)
            .unwrap_or_else(|| self.id.clone());
        let mut video = Video::new(self.id, label);
        video.description = self.description.unwrap_or_default();
        video.channel = self.channel_id.unwrap_or_default();
        video.channel_name = self.channel.or(self.uploader).unwrap_or_default();
        video.published_at = self.upload_date.as_deref().and_then(parse_upload_date);
        video.source_url = self
            .webpage_url
            .filter(|url| *url != watch_url(&video.id));
        video
    }
}

/// A media file found in the legacy folder together with its companions.
#[derive(Debug, Clone)]
struct Candidate {
    media: PathBuf,
    info: PathBuf,
    captions: Vec<PathBuf>,
    thumbnail: Option<PathBuf>,
}

#[derive(Debug)]
struct Planned {
    video: Video,
    candidate: Candidate,
}

#[derive(Debug)]
struct Moved {
    media: PathBuf,
    captions: Vec<PathBuf>,
    thumbnail: Option<(String, Vec<u8>)>,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<String>,
    /// Ids already complete in the project or seen twice in the folder.
    pub skipped: Vec<String>,
    /// Files left in place: (path, reason).
    pub failed: Vec<(PathBuf, String)>,
}

/// Imports every media file under `dir`. When `playlist` is given, imported
/// videos that are not yet members are appended to it.
pub async fn import_legacy(
    project: &mut Project,
    dir: &Path,
    playlist: Option<&str>,
) -> Result<ImportReport> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let playlist_id = playlist
        .map(|reference| project.playlist_id(reference))
        .transpose()?;
    let workers = project.settings.workers.videos;
    let mut report = ImportReport::default();

    let candidates = scan(dir)?;
    info!("found {} media file(s) in {}", candidates.len(), dir.display());

    let parsed = run_bounded(workers, candidates, |candidate| async move {
        let info_path = candidate.info.clone();
        let info = tokio::task::spawn_blocking(move || read_info(&info_path))
            .await
            .map_err(|err| anyhow!("parse task failed: {err}"))
            .and_then(|result| result);
        (candidate, info)
    })
    .await;

    let media_dir = project.media_dir();
    let mut seen = BTreeSet::new();
    let mut planned = Vec::new();
    for (candidate, info) in parsed {
        let info = match info {
            Ok(info) => info,
            Err(err) => {
                warn!("skipping {}: {err:#}", candidate.media.display());
                report.failed.push((candidate.media, format!("{err:#}")));
                continue;
            }
        };
        let already_complete = project
            .catalog
            .get(&info.id)
            .is_some_and(Video::is_complete);
        if already_complete || !seen.insert(info.id.clone()) {
            debug!("skipping {} ({})", candidate.media.display(), info.id);
            report.skipped.push(info.id);
            continue;
        }
        planned.push(Planned {
            video: info.into_video(),
            candidate,
        });
    }

    let moved = run_bounded(workers, planned, |plan| {
        let media_dir = media_dir.clone();
        async move {
            let candidate = plan.candidate.clone();
            let id = plan.video.id.clone();
            let result =
                tokio::task::spawn_blocking(move || move_into(&id, &candidate, &media_dir))
                    .await
                    .map_err(|err| anyhow!("move task failed: {err}"))
                    .and_then(|result| result);
            (plan, result)
        }
    })
    .await;

    for (plan, result) in moved {
        let Planned { video, candidate } = plan;
        let applied = result.and_then(|moved| apply(project, video, moved, playlist_id.as_deref()));
        match applied {
            Ok(id) => report.imported.push(id),
            Err(err) => {
                warn!("importing {} failed: {err:#}", candidate.media.display());
                report.failed.push((candidate.media, format!("{err:#}")));
            }
        }
    }

    info!(
        "imported {} video(s), skipped {}, {} failed",
        report.imported.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}

fn apply(project: &mut Project, video: Video, moved: Moved, playlist_id: Option<&str>) -> Result<String> {
    let id = video.id.clone();
    project.add_video(video);
    project.attach_files(&id, &moved.media, &moved.captions)?;
    if let Some((mime, bytes)) = moved.thumbnail
        && let Some(record) = project.catalog.get_mut(&id)
        && record.thumbnail.is_none()
    {
        record.thumbnail = Some(thumbnail_data_uri(&mime, &bytes));
    }
    if let Some(playlist_id) = playlist_id
        && !project.playlists.get(playlist_id).is_some_and(|p| p.contains(&id))
    {
        project.playlists.insert(playlist_id, &id, Position::Last)?;
    }
    Ok(id)
}

/// Lists media files with a sibling `.info.json`; files without one are
/// still returned so the missing sidecar gets reported.
fn scan(dir: &Path) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !has_extension(path, MEDIA_EXTENSIONS) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(OsStr::to_str) else {
            continue;
        };
        let parent = path.parent().unwrap_or(dir);
        let mut captions = Vec::new();
        let mut thumbnail = None;
        let prefix = format!("{stem}.");
        for sibling in fs::read_dir(parent).with_context(|| format!("listing {}", parent.display()))? {
            let sibling = sibling?.path();
            let Some(name) = sibling.file_name().and_then(OsStr::to_str) else {
                continue;
            };
            if sibling == path || !name.starts_with(&prefix) {
                continue;
            }
            if is_caption(&sibling) {
                captions.push(sibling);
            } else if has_extension(&sibling, THUMBNAIL_EXTENSIONS) && name.len() > prefix.len() {
                let rest = &name[prefix.len()..];
                if !rest.contains('.') {
                    thumbnail = Some(sibling);
                }
            }
        }
        captions.sort();
        candidates.push(Candidate {
            media: path.to_path_buf(),
            info: parent.join(format!("{stem}.info.json")),
            captions,
            thumbnail,
        });
    }
    Ok(candidates)
}

fn read_info(path: &Path) -> Result<InfoJson> {
    if !path.is_file() {
        bail!("missing {}", path.display());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let info: InfoJson =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    if info.id.trim().is_empty() {
        bail!("{} has an empty id", path.display());
    }
    if !is_file_safe_id(&info.id) {
        bail!("{} has an id that is not a plain file name: {:?}", path.display(), info.id);
    }
    Ok(info)
}

/// Media files are named after the id, so it must stay one path segment.
fn is_file_safe_id(id: &str) -> bool {
    let mut components = Path::new(id).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !id.contains(['/', '\\'])
        && !id.starts_with('.')
}

/// Moves the media file and captions to `media_dir`, renamed after `id`.
fn move_into(id: &str, candidate: &Candidate, media_dir: &Path) -> Result<Moved> {
    fs::create_dir_all(media_dir).with_context(|| format!("creating {}", media_dir.display()))?;
    let stem = candidate
        .media
        .file_stem()
        .and_then(OsStr::to_str)
        .ok_or_else(|| anyhow!("{} has no usable name", candidate.media.display()))?;

    let extension = candidate
        .media
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or("bin");
    let media = media_dir.join(format!("{id}.{extension}"));
    move_file(&candidate.media, &media)?;

    let mut captions = Vec::with_capacity(candidate.captions.len());
    for caption in &candidate.captions {
        let name = caption
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or_default();
        let suffix = name.strip_prefix(stem).unwrap_or(name);
        let target = media_dir.join(format!("{id}{suffix}"));
        match move_file(caption, &target) {
            Ok(()) => captions.push(target),
            Err(err) => warn!("keeping caption {} in place: {err:#}", caption.display()),
        }
    }

    let thumbnail = candidate.thumbnail.as_ref().and_then(|path| {
        let bytes = fs::read(path).ok()?;
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Some((mime, bytes))
    });

    Ok(Moved {
        media,
        captions,
        thumbnail,
    })
}

/// Renames `from` to `to`, copying across filesystems. Never overwrites.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        bail!("{} already exists", to.display());
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
    fs::remove_file(from).with_context(|| format!("removing {}", from.display()))?;
    Ok(())
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| extensions.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Converts yt-dlp's `YYYYMMDD` upload date to midnight UTC.
fn parse_upload_date(value: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_legacy(dir: &Path, stem: &str, id: &str) -> Result<()> {
        fs::write(dir.join(format!("{stem}.mkv")), b"media")?;
        fs::write(
            dir.join(format!("{stem}.info.json")),
            format!(
                r#"{{"id": "{id}", "title": "Short", "fulltitle": "Full {id}",
                    "channel": "Chan", "channel_id": "UC9", "upload_date": "20200131",
                    "webpage_url": "https://www.youtube.com/watch?v={id}"}}"#
            ),
        )?;
        fs::write(dir.join(format!("{stem}.en.vtt")), b"WEBVTT")?;
        fs::write(dir.join(format!("{stem}.webp")), b"RIFF")?;
        Ok(())
    }

    #[test]
    fn upload_date_parsing() {
        let parsed = parse_upload_date("20240102").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-02T00:00:00+00:00");
        assert!(parse_upload_date("2024").is_none());
        assert!(parse_upload_date("20241340").is_none());
    }

    #[test]
    fn file_safe_ids() {
        assert!(is_file_safe_id("dQw4w9WgXcQ"));
        assert!(is_file_safe_id("-abc_123"));
        for bad in ["../escape", "a/b", "a\\b", "..", ".", ".hidden", "/abs"] {
            assert!(!is_file_safe_id(bad), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn rejects_ids_that_leave_the_media_folder() -> Result<()> {
        let project_dir = tempdir()?;
        let legacy = tempdir()?;
        write_legacy(legacy.path(), "sneaky", "../escape")?;

        let mut project = Project::init(project_dir.path())?;
        let report = import_legacy(&mut project, legacy.path(), None).await?;

        assert!(report.imported.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(legacy.path().join("sneaky.mkv").exists());
        assert!(!project_dir.path().join("escape.mkv").exists());
        assert_eq!(project.catalog.len(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn imports_media_with_sidecars() -> Result<()> {
        let project_dir = tempdir()?;
        let legacy = tempdir()?;
        let nested = legacy.path().join("old");
        fs::create_dir_all(&nested)?;
        write_legacy(&nested, "Some title [abc123]", "abc123")?;
        fs::write(legacy.path().join("orphan.mp4"), b"no sidecar")?;

        let mut project = Project::init(project_dir.path())?;
        project.add_playlist("Imported", None)?;
        let report = import_legacy(&mut project, legacy.path(), Some("Imported")).await?;

        assert_eq!(report.imported, vec!["abc123".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(legacy.path().join("orphan.mp4").exists());

        let video = project.video("abc123")?;
        assert_eq!(video.label, "Full abc123");
        assert_eq!(video.channel_name, "Chan");
        assert!(video.source_url.is_none());
        assert_eq!(video.file_ref.as_deref(), Some("media/abc123.mkv"));
        assert_eq!(
            video.caption_refs.as_deref(),
            Some(&["media/abc123.en.vtt".to_string()][..])
        );
        assert!(
            video
                .thumbnail
                .as_deref()
                .is_some_and(|uri| uri.starts_with("data:image/webp;base64,"))
        );
        assert!(project.media_dir().join("abc123.mkv").exists());
        assert!(!nested.join("Some title [abc123].mkv").exists());
        assert_eq!(project.playlist("Imported")?.videos(), ["abc123"]);
        Ok(())
    }

    #[tokio::test]
    async fn complete_videos_and_duplicates_are_skipped() -> Result<()> {
        let project_dir = tempdir()?;
        let legacy = tempdir()?;
        write_legacy(legacy.path(), "first", "dup")?;
        write_legacy(legacy.path(), "second", "dup")?;

        let mut project = Project::init(project_dir.path())?;
        let report = import_legacy(&mut project, legacy.path(), None).await?;
        assert_eq!(report.imported, vec!["dup".to_string()]);
        assert_eq!(report.skipped, vec!["dup".to_string()]);
        assert!(legacy.path().join("second.mkv").exists());

        let again = import_legacy(&mut project, legacy.path(), None).await?;
        assert!(again.imported.is_empty());
        assert_eq!(again.skipped, vec!["dup".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn existing_metadata_record_is_completed() -> Result<()> {
        let project_dir = tempdir()?;
        let legacy = tempdir()?;
        write_legacy(legacy.path(), "clip", "known")?;

        let mut project = Project::init(project_dir.path())?;
        project.add_video(Video::new("known", "Fetched title"));
        let report = import_legacy(&mut project, legacy.path(), None).await?;
        assert_eq!(report.imported, vec!["known".to_string()]);
        let video = project.video("known")?;
        assert_eq!(video.label, "Fetched title");
        assert!(video.is_complete());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_playlist_fails_before_touching_files() -> Result<()> {
        let project_dir = tempdir()?;
        let legacy = tempdir()?;
        write_legacy(legacy.path(), "clip", "x")?;
        let mut project = Project::init(project_dir.path())?;
        assert!(import_legacy(&mut project, legacy.path(), Some("Nope")).await.is_err());
        assert!(legacy.path().join("clip.mkv").exists());
        Ok(())
    }
}
