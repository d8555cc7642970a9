use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

/// A single photo or video attached to a tweet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Snowflake id of the media, also used as the file stem
    pub id: String,
    pub url: Url,
    pub kind: MediaKind,
}

impl MediaDescriptor {
    pub fn new(id: impl Into<String>, url: Url, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            url,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    pub url: Url,
}

/// A search result as produced by a [`crate::search::SearchSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub is_retweet: bool,
    #[serde(default)]
    pub photos: Vec<MediaRef>,
    #[serde(default)]
    pub videos: Vec<MediaRef>,
}

impl Tweet {
    /// Photos first, then videos, each in posted order.
    pub fn media(&self) -> impl Iterator<Item = MediaDescriptor> + '_ {
        let photos = self
            .photos
            .iter()
            .map(|p| MediaDescriptor::new(p.id.clone(), p.url.clone(), MediaKind::Photo));
        let videos = self
            .videos
            .iter()
            .map(|v| MediaDescriptor::new(v.id.clone(), v.url.clone(), MediaKind::Video));
        photos.chain(videos)
    }
}
