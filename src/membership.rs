#![forbid(unsafe_code)]

//! Reverse index from video id to the ids of the playlists containing it.

use std::collections::{BTreeSet, HashMap};

use crate::playlist::Playlist;

#[derive(Debug, Clone, Default)]
pub struct MembershipIndex {
    entries: HashMap<String, BTreeSet<String>>,
}

impl MembershipIndex {
    /// Scans every playlist once.
    pub fn build<'a>(playlists: impl IntoIterator<Item = &'a Playlist>) -> Self {
        let mut index = Self::default();
        for playlist in playlists {
            for video_id in &playlist.videos {
                index.add(video_id, &playlist.id);
            }
        }
        index
    }

    pub fn add(&mut self, video_id: &str, playlist_id: &str) {
        self.entries
            .entry(video_id.to_string())
            .or_default()
            .insert(playlist_id.to_string());
    }

    pub fn discard(&mut self, video_id: &str, playlist_id: &str) {
        if let Some(playlists) = self.entries.get_mut(video_id) {
            playlists.remove(playlist_id);
            if playlists.is_empty() {
                self.entries.remove(video_id);
            }
        }
    }

    pub fn is_orphan(&self, video_id: &str) -> bool {
        self.entries
            .get(video_id)
            .is_none_or(|playlists| playlists.is_empty())
    }

    pub fn playlists_containing(&self, video_id: &str) -> BTreeSet<String> {
        self.entries.get(video_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playlist(id: &str, videos: &[&str]) -> Playlist {
        let mut playlist = Playlist::new(id, format!("label-{id}"), None);
        playlist.videos = videos.iter().map(|v| v.to_string()).collect();
        playlist
    }

    #[test]
    fn build_indexes_every_pair() {
        let lists = [playlist("p1", &["a", "b"]), playlist("p2", &["b"])];
        let index = MembershipIndex::build(&lists);
        assert_eq!(
            index.playlists_containing("b"),
            BTreeSet::from(["p1".to_string(), "p2".to_string()])
        );
        assert!(!index.is_orphan("a"));
        assert!(index.is_orphan("c"));
    }

    #[test]
    fn orphan_only_after_last_discard() {
        let mut index = MembershipIndex::default();
        index.add("v", "p1");
        index.add("v", "p2");
        index.discard("v", "p1");
        assert!(!index.is_orphan("v"));
        index.discard("v", "p2");
        assert!(index.is_orphan("v"));
    }
}
