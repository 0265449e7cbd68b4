#![forbid(unsafe_code)]

//! `mirror pull`: download media (and captions) for videos without a file.
//!
//! Downloads run concurrently through a [`MediaFetcher`]; each worker only
//! produces files on disk. The resulting paths are recorded on the catalog
//! sequentially after every worker has finished.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

use crate::project::Project;
use crate::settings::DownloadSettings;
use crate::workers::run_bounded;

const CAPTION_EXTENSIONS: &[&str] = &["vtt", "srt", "ass", "ttml", "srv1", "srv2", "srv3"];
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp", ".info.json"];

/// Files produced for one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub media: PathBuf,
    pub captions: Vec<PathBuf>,
}

/// Produces local files for a video. Implementations block; callers run them
/// on the blocking pool.
pub trait MediaFetcher: Send + Sync {
    fn fetch(&self, video_id: &str, url: &str, dest: &Path) -> Result<Downloaded>;
}

/// Downloads through a `yt-dlp` compatible program.
#[derive(Debug, Clone)]
pub struct YtDlp {
    settings: DownloadSettings,
}

impl YtDlp {
    pub fn new(settings: DownloadSettings) -> Self {
        Self { settings }
    }

    /// Fails early when the downloader binary cannot be started.
    pub fn ensure_available(&self) -> Result<()> {
        ensure_program_available(&self.settings.program)
    }

    fn command(&self, video_id: &str, url: &str, dest: &Path) -> Command {
        let mut command = Command::new(&self.settings.program);
        command
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("-f")
            .arg(&self.settings.format)
            .arg("-o")
            .arg(dest.join(format!("{video_id}.%(ext)s")));
        if !self.settings.captions.is_empty() {
            command
                .arg("--write-subs")
                .arg("--sub-langs")
                .arg(self.settings.captions.join(","))
                .arg("--sub-format")
                .arg("vtt/best");
        }
        command.arg(url);
        command
    }
}

impl MediaFetcher for YtDlp {
    fn fetch(&self, video_id: &str, url: &str, dest: &Path) -> Result<Downloaded> {
        fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;
        let output = self
            .command(video_id, url, dest)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("running {}", self.settings.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("no output").trim();
            bail!("{} exited with {}: {reason}", self.settings.program, output.status);
        }
        collect_outputs(video_id, dest)
    }
}

pub fn ensure_program_available(name: &str) -> Result<()> {
    let status = Command::new(name)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!("{} is installed but returned a failure status", name),
        Err(err) => bail!("{} is not installed or not in PATH: {}", name, err),
    }
}

/// Finds the finished files named `<video_id>.*` in `dir`.
pub fn collect_outputs(video_id: &str, dir: &Path) -> Result<Downloaded> {
    let prefix = format!("{video_id}.");
    let mut media = Vec::new();
    let mut captions = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(OsStr::to_str) else {
            continue;
        };
        if !path.is_file()
            || !name.starts_with(&prefix)
            || PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        {
            continue;
        }
        if is_caption(&path) {
            captions.push(path);
        } else {
            media.push(path);
        }
    }
    media.sort();
    captions.sort();
    let media = media
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no media file for {video_id} in {}", dir.display()))?;
    Ok(Downloaded { media, captions })
}

pub fn is_caption(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| CAPTION_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

#[derive(Debug, Default)]
pub struct PullReport {
    pub pulled: Vec<String>,
    /// (video id, error); the video stays incomplete for a later pull.
    pub failed: Vec<(String, String)>,
}

/// Pulls every incomplete video, or only the members of `selection`.
pub async fn pull_missing(
    project: &mut Project,
    fetcher: Arc<dyn MediaFetcher>,
    selection: Option<&str>,
) -> Result<PullReport> {
    let wanted: Vec<(String, String)> = match selection {
        Some(reference) => {
            let playlist = project.playlist(reference)?;
            playlist
                .videos()
                .iter()
                .filter_map(|id| project.catalog.get(id))
                .filter(|video| !video.is_complete())
                .map(|video| (video.id.clone(), video.url()))
                .collect()
        }
        None => project
            .missing()
            .into_iter()
            .map(|video| (video.id.clone(), video.url()))
            .collect(),
    };

    let mut report = PullReport::default();
    if wanted.is_empty() {
        info!("nothing to pull");
        return Ok(report);
    }
    info!("pulling {} video(s)", wanted.len());

    let dest = project.media_dir();
    let results = run_bounded(project.settings.workers.videos, wanted, |(video_id, url)| {
        let fetcher = fetcher.clone();
        let dest = dest.clone();
        async move {
            let id = video_id.clone();
            let downloaded = tokio::task::spawn_blocking(move || fetcher.fetch(&id, &url, &dest))
                .await
                .map_err(|err| anyhow!("download task failed: {err}"))
                .and_then(|result| result);
            (video_id, downloaded)
        }
    })
    .await;

    for (video_id, downloaded) in results {
        let recorded = downloaded.and_then(|files| {
            project.attach_files(&video_id, &files.media, &files.captions)
        });
        match recorded {
            Ok(()) => {
                debug!("pulled {video_id}");
                report.pulled.push(video_id);
            }
            Err(err) => {
                warn!("pulling {video_id} failed: {err:#}");
                report.failed.push((video_id, format!("{err:#}")));
            }
        }
    }
    info!(
        "pulled {} video(s), {} failed",
        report.pulled.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::Position;
    use crate::video::Video;
    use tempfile::tempdir;

    struct FakeFetcher;

    impl MediaFetcher for FakeFetcher {
        fn fetch(&self, video_id: &str, _url: &str, dest: &Path) -> Result<Downloaded> {
            if video_id.starts_with("broken") {
                bail!("HTTP Error 403: Forbidden");
            }
            fs::create_dir_all(dest)?;
            fs::write(dest.join(format!("{video_id}.webm")), b"media")?;
            fs::write(dest.join(format!("{video_id}.en.vtt")), b"WEBVTT")?;
            collect_outputs(video_id, dest)
        }
    }

    #[test]
    fn collect_outputs_skips_partials_and_other_videos() -> Result<()> {
        let dir = tempdir()?;
        for name in [
            "abc.mp4",
            "abc.en.vtt",
            "abc.de.srt",
            "abc.mp4.part",
            "abc.info.json",
            "abcd.mp4",
        ] {
            fs::write(dir.path().join(name), b"x")?;
        }
        let downloaded = collect_outputs("abc", dir.path())?;
        assert_eq!(downloaded.media, dir.path().join("abc.mp4"));
        assert_eq!(
            downloaded.captions,
            vec![dir.path().join("abc.de.srt"), dir.path().join("abc.en.vtt")]
        );
        assert!(collect_outputs("zzz", dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn caption_detection() {
        assert!(is_caption(Path::new("a.en.vtt")));
        assert!(is_caption(Path::new("a.SRT")));
        assert!(!is_caption(Path::new("a.mkv")));
    }

    #[test]
    fn command_line_for_captions() {
        let ytdlp = YtDlp::new(DownloadSettings::default());
        let command = ytdlp.command("abc", "https://www.youtube.com/watch?v=abc", Path::new("/m"));
        let args: Vec<String> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"--write-subs".to_string()));
        assert!(args.contains(&"/m/abc.%(ext)s".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://www.youtube.com/watch?v=abc"));

        let silent = YtDlp::new(DownloadSettings {
            captions: Vec::new(),
            ..DownloadSettings::default()
        });
        let command = silent.command("abc", "u", Path::new("/m"));
        assert!(!command.get_args().any(|arg| arg == "--write-subs"));
    }

    #[tokio::test]
    async fn pull_records_files_and_keeps_failures_missing() -> Result<()> {
        let dir = tempdir()?;
        let mut project = Project::init(dir.path())?;
        project.add_video(Video::new("good", "Good"));
        project.add_video(Video::new("broken1", "Broken"));

        let report = pull_missing(&mut project, Arc::new(FakeFetcher), None).await?;
        assert_eq!(report.pulled, vec!["good".to_string()]);
        assert_eq!(report.failed.len(), 1);

        let good = project.video("good")?;
        assert_eq!(good.file_ref.as_deref(), Some("media/good.webm"));
        assert_eq!(
            good.caption_refs.as_deref(),
            Some(&["media/good.en.vtt".to_string()][..])
        );
        assert!(!project.video("broken1")?.is_complete());

        let again = pull_missing(&mut project, Arc::new(FakeFetcher), None).await?;
        assert!(again.pulled.is_empty());
        assert_eq!(again.failed.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn pull_limited_to_one_playlist() -> Result<()> {
        let dir = tempdir()?;
        let mut project = Project::init(dir.path())?;
        project.add_video(Video::new("in", "In"));
        project.add_video(Video::new("out", "Out"));
        project.add_playlist("Mix", None)?;
        project.insert_video("Mix", "in", Position::Last)?;

        let report = pull_missing(&mut project, Arc::new(FakeFetcher), Some("Mix")).await?;
        assert_eq!(report.pulled, vec!["in".to_string()]);
        assert!(!project.video("out")?.is_complete());
        Ok(())
    }
}
