#![forbid(unsafe_code)]

//! User-facing failures. Every variant aborts the current command but leaves
//! the loaded project usable; callers can `downcast_ref::<ArchiveError>()` on
//! the `anyhow::Error` to tell them apart from I/O or transport failures.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{0} is not a mirror project (run `mirror init` first)")]
    NotAProject(PathBuf),

    #[error("playlist not found: {0}")]
    PlaylistNotFound(String),

    #[error("playlist index {index} out of range (1..={count})")]
    PlaylistIndexOutOfRange { index: usize, count: usize },

    #[error("video not found: {0}")]
    VideoNotFound(String),

    #[error("video {video} is not in playlist {playlist}")]
    VideoNotInPlaylist { video: String, playlist: String },

    #[error("video {video} is already in playlist {playlist}")]
    AlreadyInPlaylist { video: String, playlist: String },

    #[error("a playlist labelled {0:?} already exists")]
    DuplicateLabel(String),

    #[error("invalid playlist label {label:?}: {reason}")]
    InvalidLabel { label: String, reason: &'static str },

    #[error("{}:{line}: {reason}", file.display())]
    MalformedPlaylist {
        file: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{}:{line}: unknown video id {id}", file.display())]
    UnknownVideo {
        file: PathBuf,
        line: usize,
        id: String,
    },

    #[error("position {position} is past the end of playlist {playlist} ({len} videos)")]
    PositionOutOfRange {
        playlist: String,
        position: usize,
        len: usize,
    },

    #[error("playlist {0} has no remote source to fetch from")]
    NoSource(String),

    #[error("YOUTUBE_API_KEY is not configured")]
    MissingApiKey,
}
