#![forbid(unsafe_code)]

//! Local mirror of remote video playlists: a deduplicated video catalog,
//! label-annotated playlists kept in plain text files, and the fetch/pull
//! machinery that keeps them in sync with the remote source.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod labels;
pub mod legacy;
pub mod membership;
pub mod playlist;
pub mod project;
pub mod pull;
pub mod reconcile;
pub mod remote;
pub mod security;
pub mod settings;
pub mod video;
pub mod workers;
