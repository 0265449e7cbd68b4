#![forbid(unsafe_code)]

//! Operator CLI: manages playlists and videos of one mirror project, syncs
//! them from the remote source and pulls media.
//!
//! Every command loads the project, runs to completion and saves once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use newtube_mirror::config::{
    API_KEY_VAR, DEFAULT_ENV_PATH, RuntimeConfig, RuntimeOverrides, resolve_runtime_config,
    upsert_env_value,
};
use newtube_mirror::error::ArchiveError;
use newtube_mirror::fetch::fetch_playlists;
use newtube_mirror::legacy::import_legacy;
use newtube_mirror::playlist::{Playlist, Position};
use newtube_mirror::project::{Project, VideoUpdate};
use newtube_mirror::pull::{YtDlp, pull_missing};
use newtube_mirror::remote::{RemoteSource, YouTubeClient};
use newtube_mirror::security::ensure_not_root;
use newtube_mirror::video::Video;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Local mirror of remote video playlists.
#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project root (defaults to MIRROR_ROOT from the environment or .env)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Env file to read settings from
    #[arg(long, global = true, default_value = DEFAULT_ENV_PATH)]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the project layout
    Init {
        /// Store this YouTube Data API key in the env file
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Summarize the catalog
    Status,

    /// Manage playlists
    #[command(subcommand)]
    Playlist(PlaylistCommand),

    /// Manage videos
    #[command(subcommand)]
    Video(VideoCommand),

    /// Merge remote playlist listings into the project
    Fetch {
        /// Playlist (index, id or label); all synced playlists when omitted
        playlist: Option<String>,
    },

    /// Download media for videos without a file
    Pull {
        /// Restrict to the members of this playlist
        playlist: Option<String>,
    },

    /// Inspect or delete videos that belong to no playlist
    #[command(subcommand)]
    Orphans(OrphansCommand),

    /// Import a folder of previously downloaded media
    Import {
        dir: PathBuf,

        /// Append imported videos to this playlist
        #[arg(short, long)]
        playlist: Option<String>,
    },

    /// Rewrite every project file from the loaded state
    Save,
}

#[derive(Subcommand, Debug)]
enum PlaylistCommand {
    /// List playlists with their display index
    List,

    /// Show one playlist with its annotations
    Show { playlist: String },

    /// Create an empty playlist
    Add {
        label: String,

        /// Remote playlist id or URL to sync from
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Delete a playlist (videos stay in the catalog)
    Delete { playlist: String },

    /// Change a playlist's label (and file name)
    Rename { playlist: String, label: String },

    /// Set or clear the remote source
    Source {
        playlist: String,

        /// Remote playlist id or URL; clears the source when omitted
        source: Option<String>,
    },

    /// Attach an annotation before a video
    Label {
        playlist: String,

        /// 1-based video number the annotation precedes (one past the end
        /// for a trailing annotation)
        before: usize,

        text: String,
    },
}

#[derive(Subcommand, Debug)]
enum VideoCommand {
    /// List videos in the catalog
    List {
        /// Only videos whose media has not been pulled
        #[arg(long)]
        missing: bool,
    },

    /// Look up a video on the remote source and add it to the catalog
    Add {
        id: String,

        /// Also append it to this playlist
        #[arg(short, long)]
        playlist: Option<String>,
    },

    /// Insert a catalog video into a playlist
    Insert {
        playlist: String,
        video: String,
        #[command(flatten)]
        position: PositionArgs,
    },

    /// Remove a video from a playlist
    Remove { playlist: String, video: String },

    /// Move a video within a playlist
    Move {
        playlist: String,
        video: String,
        #[command(flatten)]
        position: PositionArgs,
    },

    /// Edit a video's metadata
    Update {
        id: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "clear_source_url")]
        source_url: Option<String>,
        #[arg(long)]
        clear_source_url: bool,
    },

    /// Delete a video everywhere, including its files
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum OrphansCommand {
    List,
    Delete,
}

#[derive(Args, Debug, Default)]
struct PositionArgs {
    /// Put the video first
    #[arg(long, conflicts_with_all = ["after", "at"])]
    first: bool,

    /// Put the video right after this member
    #[arg(long, conflicts_with = "at")]
    after: Option<String>,

    /// 1-based position
    #[arg(long)]
    at: Option<usize>,
}

impl PositionArgs {
    fn to_position(&self) -> Result<Position> {
        if self.first {
            return Ok(Position::First);
        }
        if let Some(after) = &self.after {
            return Ok(Position::After(after.clone()));
        }
        match self.at {
            Some(0) => bail!("--at is 1-based"),
            Some(at) => Ok(Position::Index(at - 1)),
            None => Ok(Position::Last),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    ensure_not_root("mirror")?;
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let config = resolve_runtime_config(RuntimeOverrides {
        archive_root: cli.root.clone(),
        env_path: Some(cli.env_file.clone()),
        ..RuntimeOverrides::default()
    })?;

    let open = || Project::open(&config.archive_root);
    match cli.command {
        Commands::Init { api_key } => {
            init(&config, cli.root.is_some(), &cli.env_file, api_key.as_deref())
        }
        Commands::Status => {
            print_status(&open()?);
            Ok(())
        }
        Commands::Playlist(command) => {
            let mut project = open()?;
            if playlist_command(&mut project, command)? {
                project.save()?;
            }
            Ok(())
        }
        Commands::Video(command) => {
            let mut project = open()?;
            if video_command(&mut project, &config, command).await? {
                project.save()?;
            }
            Ok(())
        }
        Commands::Fetch { playlist } => {
            let mut project = open()?;
            let remote = remote_client(&project, &config)?;
            let report = fetch_playlists(&mut project, remote, playlist.as_deref()).await?;
            project.save()?;
            println!(
                "Fetched {} playlist(s): {} new video(s), {} placed, {} thumbnail(s).",
                report.merged.len(),
                report.created(),
                report.inserted(),
                report.thumbnails
            );
            for merge in &report.merged {
                for id in &merge.unavailable {
                    println!("  Warning: {id} is unavailable and was skipped");
                }
            }
            for (id, err) in &report.thumbnail_failures {
                println!("  Warning: no thumbnail for {id}: {err}");
            }
            report.ensure_complete()
        }
        Commands::Pull { playlist } => {
            let mut project = open()?;
            let fetcher = YtDlp::new(project.settings.download.clone());
            fetcher.ensure_available()?;
            let report = pull_missing(&mut project, Arc::new(fetcher), playlist.as_deref()).await?;
            project.save()?;
            println!("Pulled {} video(s).", report.pulled.len());
            for (id, err) in &report.failed {
                eprintln!("  Failed {id}: {err}");
            }
            Ok(())
        }
        Commands::Orphans(OrphansCommand::List) => {
            for video in open()?.orphans() {
                println!("{} {}", video.id, video.display_label());
            }
            Ok(())
        }
        Commands::Orphans(OrphansCommand::Delete) => {
            let mut project = open()?;
            let deleted = project.delete_orphans()?;
            println!("Deleted {} orphan video(s).", deleted.len());
            project.save()
        }
        Commands::Import { dir, playlist } => {
            let mut project = open()?;
            let report = import_legacy(&mut project, &dir, playlist.as_deref()).await?;
            project.save()?;
            println!(
                "Imported {} video(s), skipped {}.",
                report.imported.len(),
                report.skipped.len()
            );
            for (path, err) in &report.failed {
                eprintln!("  Failed {}: {err}", path.display());
            }
            Ok(())
        }
        Commands::Save => {
            info!("rewriting project files");
            open()?.save()
        }
    }
}

fn init(
    config: &RuntimeConfig,
    root_given: bool,
    env_file: &Path,
    api_key: Option<&str>,
) -> Result<()> {
    let root = &config.archive_root;
    let project = Project::init(root)?;
    if root_given {
        let absolute = std::path::absolute(root).unwrap_or_else(|_| root.clone());
        upsert_env_value(env_file, "MIRROR_ROOT", &absolute.to_string_lossy())?;
    }
    if let Some(key) = api_key {
        upsert_env_value(env_file, API_KEY_VAR, key)?;
        println!("Stored {API_KEY_VAR} in {}", env_file.display());
    }
    println!("Project ready at {}", project.root().display());
    Ok(())
}

fn remote_client(project: &Project, config: &RuntimeConfig) -> Result<Arc<dyn RemoteSource>> {
    let key = config.api_key.clone().ok_or(ArchiveError::MissingApiKey)?;
    let http = &project.settings.http;
    Ok(Arc::new(YouTubeClient::new(
        key,
        http.timeout(),
        http.max_thumbnail_bytes,
    )))
}

/// Runs a playlist subcommand; returns whether the project changed.
fn playlist_command(project: &mut Project, command: PlaylistCommand) -> Result<bool> {
    match command {
        PlaylistCommand::List => {
            for (index, playlist) in project.playlists.iter().enumerate() {
                println!("{}", playlist_line(index + 1, playlist));
            }
            return Ok(false);
        }
        PlaylistCommand::Show { playlist } => {
            let playlist = project.playlist(&playlist)?;
            print_playlist(project, playlist);
            return Ok(false);
        }
        PlaylistCommand::Add { label, source } => {
            let id = project.add_playlist(&label, source.as_deref())?;
            println!("Added playlist {label} ({id})");
        }
        PlaylistCommand::Delete { playlist } => {
            let removed = project.delete_playlist(&playlist)?;
            println!("Deleted playlist {}", removed.label);
        }
        PlaylistCommand::Rename { playlist, label } => project.rename_playlist(&playlist, &label)?,
        PlaylistCommand::Source { playlist, source } => {
            project.set_playlist_source(&playlist, source.as_deref())?
        }
        PlaylistCommand::Label {
            playlist,
            before,
            text,
        } => {
            let id = project.playlist_id(&playlist)?;
            let len = project.playlist(&id)?.len();
            if before == 0 || before > len + 1 {
                return Err(ArchiveError::PositionOutOfRange {
                    playlist,
                    position: before,
                    len,
                }
                .into());
            }
            project.playlists.annotate(&id, before - 1, &text)?;
        }
    }
    Ok(true)
}

async fn video_command(
    project: &mut Project,
    config: &RuntimeConfig,
    command: VideoCommand,
) -> Result<bool> {
    match command {
        VideoCommand::List { missing } => {
            let videos: Vec<&Video> = if missing {
                project.missing()
            } else {
                project.catalog.iter().collect()
            };
            for video in videos {
                let marker = if video.is_complete() { ' ' } else { '*' };
                println!("{marker} {} {}", video.id, video.display_label());
            }
            return Ok(false);
        }
        VideoCommand::Add { id, playlist } => {
            if !project.catalog.contains(&id) {
                let video = if config.api_key.is_some() {
                    let remote = remote_client(project, config)?;
                    let lookup_id = id.clone();
                    let found = tokio::task::spawn_blocking(move || remote.video(&lookup_id))
                        .await
                        .context("lookup task failed")??;
                    let remote_video =
                        found.ok_or_else(|| ArchiveError::VideoNotFound(id.clone()))?;
                    Video::from_remote(&remote_video)
                } else {
                    warn!("no API key configured; adding {id} without metadata");
                    Video::new(id.clone(), id.clone())
                };
                println!("Added {} {}", video.id, video.display_label());
                project.add_video(video);
            }
            if let Some(playlist) = playlist {
                let index = project.insert_video(&playlist, &id, Position::Last)?;
                println!("Placed at position {}", index + 1);
            }
        }
        VideoCommand::Insert {
            playlist,
            video,
            position,
        } => {
            let index = project.insert_video(&playlist, &video, position.to_position()?)?;
            println!("Placed at position {}", index + 1);
        }
        VideoCommand::Remove { playlist, video } => {
            project.remove_video(&playlist, &video)?;
        }
        VideoCommand::Move {
            playlist,
            video,
            position,
        } => {
            let index = project.move_video(&playlist, &video, position.to_position()?)?;
            println!("Moved to position {}", index + 1);
        }
        VideoCommand::Update {
            id,
            label,
            description,
            source_url,
            clear_source_url,
        } => {
            let source_url = if clear_source_url {
                Some(None)
            } else {
                source_url.map(Some)
            };
            project.update_video(
                &id,
                VideoUpdate {
                    label,
                    description,
                    source_url,
                },
            )?;
        }
        VideoCommand::Delete { id } => {
            let removed = project.delete_video(&id)?;
            println!("Deleted {} {}", removed.id, removed.display_label());
        }
    }
    Ok(true)
}

fn playlist_line(index: usize, playlist: &Playlist) -> String {
    match &playlist.source_id {
        Some(source) => format!(
            "{index:>3}. {} ({} videos, synced from {source})",
            playlist.label,
            playlist.len()
        ),
        None => format!("{index:>3}. {} ({} videos)", playlist.label, playlist.len()),
    }
}

fn print_playlist(project: &Project, playlist: &Playlist) {
    println!("{} [{}]", playlist.label, playlist.id);
    let labels = playlist.labels();
    for (index, video_id) in playlist.videos().iter().enumerate() {
        if let Some(text) = labels.get(&index) {
            for line in text.lines() {
                println!("     > {line}");
            }
        }
        let (marker, title) = match project.catalog.get(video_id) {
            Some(video) => (if video.is_complete() { ' ' } else { '*' }, video.display_label()),
            None => ('?', String::new()),
        };
        println!("{marker}{:>3}. {video_id} {title}", index + 1);
    }
    for (_, text) in labels.range(playlist.len()..) {
        for line in text.lines() {
            println!("     > {line}");
        }
    }
}

fn print_status(project: &Project) {
    let status = project.status();
    println!("Project: {}", display_root(project.root()));
    println!("Playlists: {}", status.playlists);
    println!(
        "Videos: {} ({} pulled, {} missing, {} orphaned)",
        status.videos, status.complete, status.missing, status.orphans
    );
}

fn display_root(root: &Path) -> String {
    root.canonicalize()
        .unwrap_or_else(|_| root.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use tempfile::tempdir;

    #[test]
    fn parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "mirror", "--root", "/archive", "video", "insert", "Mix", "abc", "--after", "xyz",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/archive")));
        let Commands::Video(VideoCommand::Insert { position, .. }) = cli.command else {
            panic!("unexpected command: {:?}", cli.command);
        };
        assert_eq!(position.to_position().unwrap(), Position::After("xyz".into()));
    }

    #[test]
    fn position_flags_conflict() {
        assert!(
            Cli::try_parse_from(["mirror", "video", "move", "Mix", "a", "--first", "--at", "2"])
                .is_err()
        );
    }

    #[test]
    fn position_defaults_and_one_based_index() {
        assert_eq!(PositionArgs::default().to_position().unwrap(), Position::Last);
        let at = PositionArgs {
            at: Some(1),
            ..PositionArgs::default()
        };
        assert_eq!(at.to_position().unwrap(), Position::Index(0));
        let zero = PositionArgs {
            at: Some(0),
            ..PositionArgs::default()
        };
        assert!(zero.to_position().is_err());
    }

    #[test]
    fn fetch_accepts_optional_playlist() {
        let cli = Cli::try_parse_from(["mirror", "fetch"]).unwrap();
        assert!(matches!(cli.command, Commands::Fetch { playlist: None }));
        let cli = Cli::try_parse_from(["mirror", "fetch", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Fetch { playlist: Some(ref p) } if p == "2"));
    }

    #[tokio::test]
    async fn init_then_edit_playlists() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("archive");
        let env_file = dir.path().join(".env");
        let base = |args: &[&str]| {
            let mut full = vec![
                "mirror".to_string(),
                "--root".to_string(),
                root.to_string_lossy().into_owned(),
                "--env-file".to_string(),
                env_file.to_string_lossy().into_owned(),
            ];
            full.extend(args.iter().map(|arg| arg.to_string()));
            Cli::try_parse_from(full).unwrap()
        };

        run(base(&["init", "--api-key", "k3y"])).await?;
        let env = std::fs::read_to_string(&env_file)?;
        assert!(env.contains("YOUTUBE_API_KEY=\"k3y\""));
        assert!(env.contains("MIRROR_ROOT="));

        run(base(&["playlist", "add", "Mix"])).await?;
        run(base(&["playlist", "label", "1", "1", "Intro"])).await?;
        let err = run(base(&["playlist", "add", "Mix"])).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::DuplicateLabel(_))
        ));

        let project = Project::open(&root)?;
        let playlist = project.playlist("Mix")?;
        assert_eq!(playlist.labels().get(&0).map(String::as_str), Some("Intro"));
        Ok(())
    }

    #[tokio::test]
    async fn only_init_runs_without_a_project() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("archive");
        let env_file = dir.path().join(".env");
        let args = |command: &str| {
            Cli::try_parse_from([
                OsStr::new("mirror"),
                OsStr::new("--root"),
                root.as_os_str(),
                OsStr::new("--env-file"),
                env_file.as_os_str(),
                OsStr::new(command),
            ])
            .unwrap()
        };

        for command in ["status", "save"] {
            let err = run(args(command)).await.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<ArchiveError>(),
                Some(ArchiveError::NotAProject(_))
            ));
        }
        run(args("init")).await?;
        run(args("status")).await?;
        assert!(Project::is_project(&root));
        Ok(())
    }
}
