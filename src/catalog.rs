#![forbid(unsafe_code)]

//! Deduplicated set of every known video, keyed by video id.
//!
//! The catalog enforces no referential integrity toward playlists; callers
//! detach a video from every playlist (see `Project::delete_video`) before
//! removing it here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::video::Video;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    videos: BTreeMap<String, Video>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Video> {
        self.videos.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Video> {
        self.videos.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.videos.contains_key(id)
    }

    /// Inserts a brand-new record.
    ///
    /// # Panics
    ///
    /// Panics when `video.id` is already present: callers must consult
    /// [`Catalog::get`] to decide between adding and reusing.
    pub fn add(&mut self, video: Video) {
        assert!(
            !self.videos.contains_key(&video.id),
            "video {} is already in the catalog",
            video.id
        );
        self.videos.insert(video.id.clone(), video);
    }

    pub fn delete(&mut self, id: &str) -> Option<Video> {
        self.videos.remove(id)
    }

    /// Every video, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Video> {
        self.videos.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.videos.keys().map(String::as_str)
    }

    /// Videos whose media file has not been pulled yet.
    pub fn missing(&self) -> impl Iterator<Item = &Video> {
        self.iter().filter(|video| !video.is_complete())
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_get_delete() {
        let mut catalog = Catalog::new();
        catalog.add(Video::new("b", "Bee"));
        catalog.add(Video::new("a", "Ay"));

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("a").map(|v| v.label.as_str()), Some("Ay"));
        assert!(catalog.get("zzz").is_none());
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["a", "b"]);

        let removed = catalog.delete("a").expect("removed");
        assert_eq!(removed.id, "a");
        assert!(catalog.delete("a").is_none());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    #[should_panic(expected = "already in the catalog")]
    fn double_add_is_a_bug() {
        let mut catalog = Catalog::new();
        catalog.add(Video::new("a", "one"));
        catalog.add(Video::new("a", "two"));
    }

    #[test]
    fn missing_filters_complete_videos() {
        let mut catalog = Catalog::new();
        let mut done = Video::new("done", "Done");
        done.file_ref = Some("media/done.mp4".into());
        catalog.add(done);
        catalog.add(Video::new("todo", "Todo"));

        let missing: Vec<_> = catalog.missing().map(|v| v.id.as_str()).collect();
        assert_eq!(missing, vec!["todo"]);
    }

    #[test]
    fn serializes_as_object_keyed_by_id() {
        let mut catalog = Catalog::new();
        catalog.add(Video::new("k1", "one"));
        let json = serde_json::to_value(&catalog).unwrap();
        assert_eq!(json["k1"]["label"], "one");
        let back: Catalog = serde_json::from_value(json).unwrap();
        assert_eq!(back, catalog);
    }
}
