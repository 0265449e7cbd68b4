#![forbid(unsafe_code)]

//! Ordered playlists and the store that owns them.
//!
//! Every change to a playlist's video list goes through [`PlaylistStore`] so
//! the membership index and the label annotations move together with it.
//! There is no move primitive: moving a video is a remove followed by an
//! insert at the new position.

use std::sync::OnceLock;

use anyhow::{Result, bail};

use crate::error::ArchiveError;
use crate::labels::{self, Labels};
use crate::membership::MembershipIndex;

#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    /// Stable handle used by the web UI; survives label changes.
    pub id: String,
    /// Remote playlist to sync from, `None` for hand-curated lists.
    pub source_id: Option<String>,
    /// Display name, doubling as the file name on disk.
    pub label: String,
    pub(crate) videos: Vec<String>,
    pub(crate) labels: Labels,
}

impl Playlist {
    pub fn new(id: impl Into<String>, label: impl Into<String>, source_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            source_id,
            label: label.into(),
            videos: Vec::new(),
            labels: Labels::new(),
        }
    }

    pub fn videos(&self) -> &[String] {
        &self.videos
    }

    /// Annotations keyed by the index of the video they precede.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    pub fn index_of(&self, video_id: &str) -> Option<usize> {
        self.videos.iter().position(|id| id == video_id)
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.index_of(video_id).is_some()
    }

    fn insert_at(&mut self, video_id: &str, position: usize) {
        assert!(
            !self.contains(video_id),
            "video {video_id} inserted twice into playlist {}",
            self.id
        );
        assert!(position <= self.videos.len(), "insert position out of bounds");
        self.videos.insert(position, video_id.to_string());
        labels::shift_for_insert(&mut self.labels, position);
    }

    fn remove(&mut self, video_id: &str) -> Option<usize> {
        let position = self.index_of(video_id)?;
        self.videos.remove(position);
        labels::shift_for_remove(&mut self.labels, position);
        Some(position)
    }
}

/// Where to put a video inside a playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    First,
    Last,
    /// Zero-based index; `len` means append.
    Index(usize),
    /// Immediately after the given video, which must already be a member.
    After(String),
}

/// Rejects labels that cannot double as a file name.
pub fn validate_label(label: &str) -> Result<()> {
    let reason = if label.trim().is_empty() {
        Some("must not be empty")
    } else if label.trim() != label {
        Some("must not start or end with whitespace")
    } else if label.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if label.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else if label.starts_with('.') {
        Some("must not start with a dot")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ArchiveError::InvalidLabel {
            label: label.to_string(),
            reason,
        }
        .into()),
        None => Ok(()),
    }
}

/// Owns every playlist plus the lazily built membership index.
#[derive(Debug, Default)]
pub struct PlaylistStore {
    playlists: Vec<Playlist>,
    membership: OnceLock<MembershipIndex>,
}

impl PlaylistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from freshly loaded playlists, rejecting duplicate
    /// labels or ids.
    pub fn from_playlists(playlists: impl IntoIterator<Item = Playlist>) -> Result<Self> {
        let mut store = Self::new();
        for playlist in playlists {
            store.add(playlist)?;
        }
        Ok(store)
    }

    /// Playlists in display order (sorted by label).
    pub fn iter(&self) -> impl Iterator<Item = &Playlist> {
        self.playlists.iter()
    }

    pub fn len(&self) -> usize {
        self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|playlist| playlist.id == id)
    }

    pub fn get_by_label(&self, label: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|playlist| playlist.label == label)
    }

    /// Looks up a playlist by its 1-based display index.
    pub fn get_by_index(&self, index: usize) -> Result<&Playlist> {
        index
            .checked_sub(1)
            .and_then(|zero_based| self.playlists.get(zero_based))
            .ok_or_else(|| {
                ArchiveError::PlaylistIndexOutOfRange {
                    index,
                    count: self.playlists.len(),
                }
                .into()
            })
    }

    /// Resolves a user-supplied reference: exact id, exact label, then
    /// 1-based index.
    pub fn resolve(&self, reference: &str) -> Result<&Playlist> {
        if let Some(playlist) = self.get(reference).or_else(|| self.get_by_label(reference)) {
            return Ok(playlist);
        }
        match reference.parse::<usize>() {
            Ok(index) => self.get_by_index(index),
            Err(_) => Err(ArchiveError::PlaylistNotFound(reference.to_string()).into()),
        }
    }

    pub fn add(&mut self, playlist: Playlist) -> Result<()> {
        validate_label(&playlist.label)?;
        if self.get_by_label(&playlist.label).is_some() {
            return Err(ArchiveError::DuplicateLabel(playlist.label).into());
        }
        if let Some(existing) = self.get(&playlist.id) {
            bail!(
                "playlists {:?} and {:?} share the id {}",
                existing.label,
                playlist.label,
                playlist.id
            );
        }
        if let Some(index) = self.membership.get_mut() {
            for video_id in &playlist.videos {
                index.add(video_id, &playlist.id);
            }
        }
        self.playlists.push(playlist);
        self.sort();
        Ok(())
    }

    /// Detaches every video (keeping the index in step) and drops the playlist.
    pub fn delete(&mut self, id: &str) -> Result<Playlist> {
        let video_ids = self.require(id)?.videos.clone();
        for video_id in video_ids {
            self.remove(id, &video_id)?;
        }
        let position = self.position(id)?;
        Ok(self.playlists.remove(position))
    }

    pub fn rename(&mut self, id: &str, label: &str) -> Result<()> {
        validate_label(label)?;
        if let Some(existing) = self.get_by_label(label)
            && existing.id != id
        {
            return Err(ArchiveError::DuplicateLabel(label.to_string()).into());
        }
        let position = self.position(id)?;
        self.playlists[position].label = label.to_string();
        self.sort();
        Ok(())
    }

    pub fn set_source(&mut self, id: &str, source_id: Option<String>) -> Result<()> {
        let position = self.position(id)?;
        self.playlists[position].source_id = source_id;
        Ok(())
    }

    /// Inserts `video_id` and returns the zero-based index it landed at.
    pub fn insert(&mut self, playlist_id: &str, video_id: &str, position: Position) -> Result<usize> {
        let playlist = self.require(playlist_id)?;
        if playlist.contains(video_id) {
            return Err(ArchiveError::AlreadyInPlaylist {
                video: video_id.to_string(),
                playlist: playlist.label.clone(),
            }
            .into());
        }
        let index = match position {
            Position::First => 0,
            Position::Last => playlist.len(),
            Position::Index(index) if index <= playlist.len() => index,
            Position::Index(index) => {
                return Err(ArchiveError::PositionOutOfRange {
                    playlist: playlist.label.clone(),
                    position: index,
                    len: playlist.len(),
                }
                .into());
            }
            Position::After(reference) => {
                let Some(anchor) = playlist.index_of(&reference) else {
                    return Err(ArchiveError::VideoNotInPlaylist {
                        video: reference,
                        playlist: playlist.label.clone(),
                    }
                    .into());
                };
                anchor + 1
            }
        };
        self.insert_at(playlist_id, video_id, index)?;
        Ok(index)
    }

    pub fn append(&mut self, playlist_id: &str, video_id: &str) -> Result<usize> {
        self.insert(playlist_id, video_id, Position::Last)
    }

    /// Raw positional insert; shifts labels and updates the membership index.
    ///
    /// # Panics
    ///
    /// Panics when the video is already a member or `index` is past the end.
    pub fn insert_at(&mut self, playlist_id: &str, video_id: &str, index: usize) -> Result<()> {
        let position = self.position(playlist_id)?;
        self.playlists[position].insert_at(video_id, index);
        if let Some(membership) = self.membership.get_mut() {
            membership.add(video_id, playlist_id);
        }
        Ok(())
    }

    /// Removes `video_id`, returning the index it occupied or `None` when it
    /// was not a member.
    pub fn remove(&mut self, playlist_id: &str, video_id: &str) -> Result<Option<usize>> {
        let position = self.position(playlist_id)?;
        let removed = self.playlists[position].remove(video_id);
        if removed.is_some()
            && let Some(membership) = self.membership.get_mut()
        {
            membership.discard(video_id, playlist_id);
        }
        Ok(removed)
    }

    /// Appends `text` to the annotation before `index`.
    pub fn annotate(&mut self, playlist_id: &str, index: usize, text: &str) -> Result<()> {
        let position = self.position(playlist_id)?;
        labels::attach(&mut self.playlists[position].labels, index, text);
        Ok(())
    }

    pub fn membership(&self) -> &MembershipIndex {
        self.membership
            .get_or_init(|| MembershipIndex::build(&self.playlists))
    }

    pub fn is_orphan(&self, video_id: &str) -> bool {
        self.membership().is_orphan(video_id)
    }

    pub fn playlists_containing(&self, video_id: &str) -> Vec<&Playlist> {
        self.membership()
            .playlists_containing(video_id)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Forces the next membership query to rescan every playlist.
    pub fn invalidate_membership(&mut self) {
        self.membership.take();
    }

    fn require(&self, id: &str) -> Result<&Playlist> {
        self.get(id)
            .ok_or_else(|| ArchiveError::PlaylistNotFound(id.to_string()).into())
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.playlists
            .iter()
            .position(|playlist| playlist.id == id)
            .ok_or_else(|| ArchiveError::PlaylistNotFound(id.to_string()).into())
    }

    fn sort(&mut self) {
        self.playlists.sort_by(|a, b| a.label.cmp(&b.label));
    }
}
