#![forbid(unsafe_code)]

//! A loaded archive: catalog, playlists and the files backing them.
//!
//! Every operation takes the project explicitly; nothing is looked up through
//! process-wide state, so several projects can live side by side in one
//! process (the tests rely on this).

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::codec;
use crate::error::ArchiveError;
use crate::playlist::{Playlist, PlaylistStore, Position};
use crate::settings::{ProjectSettings, SETTINGS_FILE};
use crate::video::Video;

pub const CATALOG_FILE: &str = "videos.json";
pub const PLAYLISTS_SUBDIR: &str = "playlists";
pub const MEDIA_SUBDIR: &str = "media";
pub const PLAYLIST_EXT: &str = "txt";

/// Metadata fields an operator may edit by hand.
#[derive(Debug, Clone, Default)]
pub struct VideoUpdate {
    pub label: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` clears the override.
    pub source_url: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub videos: usize,
    pub complete: usize,
    pub missing: usize,
    pub orphans: usize,
    pub playlists: usize,
}

#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    pub settings: ProjectSettings,
    pub catalog: Catalog,
    pub playlists: PlaylistStore,
    /// Playlist files written (or read) by the last load/save; anything in
    /// here that is not rewritten on the next save gets deleted.
    tracked_files: BTreeSet<PathBuf>,
}

impl Project {
    pub fn is_project(root: &Path) -> bool {
        root.join(SETTINGS_FILE).is_file() || root.join(CATALOG_FILE).is_file()
    }

    /// Creates the directory layout and default settings, then loads it.
    pub fn init(root: &Path) -> Result<Self> {
        for dir in [root.join(PLAYLISTS_SUBDIR), root.join(MEDIA_SUBDIR)] {
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        if !root.join(SETTINGS_FILE).exists() {
            ProjectSettings::default().save(root)?;
        }
        if !root.join(CATALOG_FILE).exists() {
            codec::write_catalog(&root.join(CATALOG_FILE), &Catalog::new())?;
        }
        info!("initialized project at {}", root.display());
        Self::open(root)
    }

    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_ids(root, |_| None)
    }

    /// Loads the same root again. Playlist files that still lack an `id = `
    /// line keep the id this instance gave them, so a reader that never
    /// saves hands out stable ids.
    pub fn reload(&self) -> Result<Self> {
        Self::open_with_ids(&self.root, |label| {
            self.playlists
                .get_by_label(label)
                .map(|playlist| playlist.id.clone())
        })
    }

    fn open_with_ids(root: &Path, known_id: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if !Self::is_project(root) {
            return Err(ArchiveError::NotAProject(root.to_path_buf()).into());
        }
        let settings = ProjectSettings::load(root)?;
        let catalog = codec::read_catalog(&root.join(CATALOG_FILE))?;

        let playlists_dir = root.join(PLAYLISTS_SUBDIR);
        let mut files = Vec::new();
        if playlists_dir.is_dir() {
            for entry in fs::read_dir(&playlists_dir)
                .with_context(|| format!("listing {}", playlists_dir.display()))?
            {
                let path = entry?.path();
                if path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(PLAYLIST_EXT)
                {
                    files.push(path);
                }
            }
        }
        files.sort();

        let mut playlists = Vec::with_capacity(files.len());
        for path in &files {
            let label = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .with_context(|| format!("{} is not a UTF-8 file name", path.display()))?;
            let content =
                fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            playlists.push(codec::parse_playlist_with(label, path, &content, &catalog, || {
                known_id(label).unwrap_or_else(codec::generate_playlist_id)
            })?);
        }
        let playlists = PlaylistStore::from_playlists(playlists)?;

        debug!(
            videos = catalog.len(),
            playlists = playlists.len(),
            "loaded project {}",
            root.display()
        );
        Ok(Self {
            root: root.to_path_buf(),
            settings,
            catalog,
            playlists,
            tracked_files: files.into_iter().collect(),
        })
    }

    /// Rewrites the catalog and every playlist file from memory, then deletes
    /// playlist files left over from renamed or deleted playlists.
    pub fn save(&mut self) -> Result<()> {
        codec::write_catalog(&self.root.join(CATALOG_FILE), &self.catalog)?;

        let mut written = BTreeSet::new();
        for playlist in self.playlists.iter() {
            let path = self.playlist_path(&playlist.label);
            let rendered = codec::render_playlist(playlist, &self.catalog);
            codec::write_atomic(&path, rendered.as_bytes())?;
            written.insert(path);
        }
        for stale in self.tracked_files.difference(&written) {
            remove_if_exists(stale)?;
            debug!("removed stale playlist file {}", stale.display());
        }
        self.tracked_files = written;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn media_dir(&self) -> PathBuf {
        self.root.join(MEDIA_SUBDIR)
    }

    pub fn playlist_path(&self, label: &str) -> PathBuf {
        self.root
            .join(PLAYLISTS_SUBDIR)
            .join(format!("{label}.{PLAYLIST_EXT}"))
    }

    /// Absolute path of a project-relative file reference.
    pub fn resolve_file(&self, file_ref: &str) -> PathBuf {
        self.root.join(file_ref)
    }

    /// Project-relative, `/`-separated form of a path inside the project.
    pub fn relative_ref(&self, path: &Path) -> Result<String> {
        let relative = path
            .strip_prefix(&self.root)
            .with_context(|| format!("{} is outside the project", path.display()))?;
        Ok(relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    /// Resolves a playlist reference (1-based index, id or label) to its id.
    pub fn playlist_id(&self, reference: &str) -> Result<String> {
        Ok(self.playlists.resolve(reference)?.id.clone())
    }

    pub fn playlist(&self, reference: &str) -> Result<&Playlist> {
        self.playlists.resolve(reference)
    }

    pub fn video(&self, id: &str) -> Result<&Video> {
        self.catalog
            .get(id)
            .ok_or_else(|| ArchiveError::VideoNotFound(id.to_string()).into())
    }

    pub fn add_playlist(&mut self, label: &str, source: Option<&str>) -> Result<String> {
        let source_id = source
            .map(codec::normalize_source)
            .filter(|value| !value.is_empty());
        let playlist = Playlist::new(codec::generate_playlist_id(), label, source_id);
        let id = playlist.id.clone();
        self.playlists.add(playlist)?;
        info!("added playlist {label}");
        Ok(id)
    }

    /// Drops the playlist and its memberships; the videos stay in the catalog.
    pub fn delete_playlist(&mut self, reference: &str) -> Result<Playlist> {
        let id = self.playlist_id(reference)?;
        let removed = self.playlists.delete(&id)?;
        info!("deleted playlist {}", removed.label);
        Ok(removed)
    }

    pub fn rename_playlist(&mut self, reference: &str, label: &str) -> Result<()> {
        let id = self.playlist_id(reference)?;
        self.playlists.rename(&id, label)
    }

    pub fn set_playlist_source(&mut self, reference: &str, source: Option<&str>) -> Result<()> {
        let id = self.playlist_id(reference)?;
        let source_id = source
            .map(codec::normalize_source)
            .filter(|value| !value.is_empty());
        self.playlists.set_source(&id, source_id)
    }

    /// Adds `video` unless a record with the same id exists; returns whether
    /// it was added.
    pub fn add_video(&mut self, video: Video) -> bool {
        if self.catalog.contains(&video.id) {
            return false;
        }
        self.catalog.add(video);
        true
    }

    pub fn update_video(&mut self, id: &str, update: VideoUpdate) -> Result<()> {
        let video = self
            .catalog
            .get_mut(id)
            .ok_or_else(|| ArchiveError::VideoNotFound(id.to_string()))?;
        if let Some(label) = update.label {
            video.label = label;
        }
        if let Some(description) = update.description {
            video.description = description;
        }
        if let Some(source_url) = update.source_url {
            video.source_url = source_url.filter(|url| !url.trim().is_empty());
        }
        Ok(())
    }

    /// Records pulled files (absolute paths inside the project).
    pub fn attach_files(&mut self, id: &str, media: &Path, captions: &[PathBuf]) -> Result<()> {
        let file_ref = self.relative_ref(media)?;
        let caption_refs = captions
            .iter()
            .map(|path| self.relative_ref(path))
            .collect::<Result<Vec<_>>>()?;
        let video = self
            .catalog
            .get_mut(id)
            .ok_or_else(|| ArchiveError::VideoNotFound(id.to_string()))?;
        video.file_ref = Some(file_ref);
        video.caption_refs = (!caption_refs.is_empty()).then_some(caption_refs);
        Ok(())
    }

    pub fn insert_video(&mut self, reference: &str, video_id: &str, position: Position) -> Result<usize> {
        self.video(video_id)?;
        let id = self.playlist_id(reference)?;
        self.playlists.insert(&id, video_id, position)
    }

    /// Removes a member, returning the index it occupied.
    pub fn remove_video(&mut self, reference: &str, video_id: &str) -> Result<usize> {
        let id = self.playlist_id(reference)?;
        match self.playlists.remove(&id, video_id)? {
            Some(index) => Ok(index),
            None => Err(ArchiveError::VideoNotInPlaylist {
                video: video_id.to_string(),
                playlist: reference.to_string(),
            }
            .into()),
        }
    }

    /// Moves a member to a new position (remove, then insert). The original
    /// position is restored when the target cannot be resolved.
    pub fn move_video(&mut self, reference: &str, video_id: &str, position: Position) -> Result<usize> {
        let id = self.playlist_id(reference)?;
        let Some(original) = self.playlists.remove(&id, video_id)? else {
            return Err(ArchiveError::VideoNotInPlaylist {
                video: video_id.to_string(),
                playlist: reference.to_string(),
            }
            .into());
        };
        match self.playlists.insert(&id, video_id, position) {
            Ok(index) => Ok(index),
            Err(err) => {
                self.playlists.insert_at(&id, video_id, original)?;
                Err(err)
            }
        }
    }

    /// Detaches the video from every playlist, deletes its files, then drops
    /// the catalog record.
    pub fn delete_video(&mut self, id: &str) -> Result<Video> {
        self.video(id)?;
        let containing: Vec<String> = self
            .playlists
            .membership()
            .playlists_containing(id)
            .into_iter()
            .collect();
        for playlist_id in containing {
            self.playlists.remove(&playlist_id, id)?;
        }
        self.delete_files(id)?;
        self.catalog
            .delete(id)
            .ok_or_else(|| ArchiveError::VideoNotFound(id.to_string()).into())
    }

    pub fn orphans(&self) -> Vec<&Video> {
        self.catalog
            .iter()
            .filter(|video| self.playlists.is_orphan(&video.id))
            .collect()
    }

    /// Deletes every video no playlist references, including its files.
    pub fn delete_orphans(&mut self) -> Result<Vec<String>> {
        let orphans: Vec<String> = self.orphans().iter().map(|video| video.id.clone()).collect();
        for id in &orphans {
            self.delete_files(id)?;
            self.catalog.delete(id);
        }
        if !orphans.is_empty() {
            info!("deleted {} orphan video(s)", orphans.len());
        }
        Ok(orphans)
    }

    pub fn missing(&self) -> Vec<&Video> {
        self.catalog.missing().collect()
    }

    pub fn status(&self) -> Status {
        let videos = self.catalog.len();
        let missing = self.catalog.missing().count();
        Status {
            videos,
            complete: videos - missing,
            missing,
            orphans: self.orphans().len(),
            playlists: self.playlists.len(),
        }
    }

    /// Removes the media and caption files of `id` and clears the references.
    fn delete_files(&mut self, id: &str) -> Result<()> {
        let Some(video) = self.catalog.get(id) else {
            bail!("video {id} vanished while deleting its files");
        };
        for file_ref in video.file_refs() {
            let path = self.resolve_file(file_ref);
            if !path.starts_with(&self.root) || file_ref.split('/').any(|part| part == "..") {
                warn!("refusing to delete {} outside the project", path.display());
                continue;
            }
            remove_if_exists(&path)?;
        }
        if let Some(video) = self.catalog.get_mut(id) {
            video.file_ref = None;
            video.caption_refs = None;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("deleting {}", path.display())),
    }
}
