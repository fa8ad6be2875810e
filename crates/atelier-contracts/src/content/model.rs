use serde::{Deserialize, Serialize};

/// One catalog entry. Supplied at startup and never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub price: String,
    pub category: String,
    pub image: String,
    #[serde(default)]
    pub detail_images: Vec<String>,
    pub description: String,
}

/// Editorial image + story tile. Descriptions keep their embedded line breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeritageEntry {
    pub image: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyObject {
    pub title: String,
    pub subtitle: String,
    pub description: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    EmbeddedStream { video_id: String },
}

impl MediaKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::EmbeddedStream { .. } => "embedded_stream",
        }
    }
}

/// A media reference whose kind was decided when it entered the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub uri: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn classify(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let kind = classify_media(&uri);
        Self { uri, kind }
    }

    pub fn is_inline_image(&self) -> bool {
        self.kind == MediaKind::Image && self.uri.starts_with("data:image/")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeroContent {
    pub heading: String,
    pub media: MediaRef,
}

/// Most recent speculative image plus the transient fields of its generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DreamArtifact {
    pub image: Option<String>,
    pub prompt: String,
    pub loading: bool,
    pub status: String,
}

/// Everything the content store owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentState {
    pub products: Vec<Product>,
    pub hero: HeroContent,
    pub heritage: Vec<HeritageEntry>,
    pub weekly: WeeklyObject,
    pub dream: DreamArtifact,
}

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mov", ".m4v"];
const YOUTUBE_ID_LEN: usize = 11;

/// Decides what kind of media a reference points at.
///
/// Embedded streams are recognized from YouTube link shapes, inline media from
/// the data URI mime prefix, and remote files from their extension. Anything
/// else is treated as a still image.
pub fn classify_media(uri: &str) -> MediaKind {
    let trimmed = uri.trim();
    if let Some(video_id) = youtube_video_id(trimmed) {
        return MediaKind::EmbeddedStream { video_id };
    }
    if trimmed.starts_with("data:video/") {
        return MediaKind::Video;
    }
    if trimmed.starts_with("data:") {
        return MediaKind::Image;
    }
    let path = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return MediaKind::Video;
    }
    MediaKind::Image
}

pub fn youtube_video_id(uri: &str) -> Option<String> {
    if let Some((_, tail)) = uri.split_once("youtu.be/") {
        return take_video_id(tail);
    }
    let (_, tail) = uri.split_once("youtube.com/")?;
    for prefix in ["embed/", "v/", "e/", "shorts/", "live/"] {
        if let Some(rest) = tail.strip_prefix(prefix) {
            return take_video_id(rest);
        }
    }
    let (_, query) = tail.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("v="))
        .and_then(take_video_id)
}

fn take_video_id(raw: &str) -> Option<String> {
    let candidate: String = raw
        .chars()
        .take_while(|ch| !matches!(ch, '"' | '&' | '?' | '/' | '#') && !ch.is_whitespace())
        .collect();
    if candidate.chars().count() < YOUTUBE_ID_LEN {
        return None;
    }
    Some(candidate.chars().take(YOUTUBE_ID_LEN).collect())
}

#[cfg(test)]
mod tests {
    use super::{classify_media, youtube_video_id, MediaKind, MediaRef};

    #[test]
    fn youtube_links_become_embedded_streams() {
        for link in [
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ?autoplay=1",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
        ] {
            assert_eq!(
                classify_media(link),
                MediaKind::EmbeddedStream {
                    video_id: "dQw4w9WgXcQ".to_string()
                },
                "{link}"
            );
        }
    }

    #[test]
    fn short_ids_are_not_streams() {
        assert_eq!(youtube_video_id("https://youtu.be/abc"), None);
        assert_eq!(classify_media("https://youtu.be/abc"), MediaKind::Image);
    }

    #[test]
    fn inline_and_remote_media_classification() {
        assert_eq!(classify_media("data:video/mp4;base64,AAAA"), MediaKind::Video);
        assert_eq!(classify_media("data:image/png;base64,AAAA"), MediaKind::Image);
        assert_eq!(
            classify_media("https://cdn.example.com/film.MP4?sig=1"),
            MediaKind::Video
        );
        assert_eq!(
            classify_media("https://cdn.example.com/still.webp"),
            MediaKind::Image
        );
        assert_eq!(classify_media("assets/hero/atelier-film.mp4"), MediaKind::Video);
    }

    #[test]
    fn inline_image_detection_requires_data_uri() {
        assert!(MediaRef::classify("data:image/jpeg;base64,AAAA").is_inline_image());
        assert!(!MediaRef::classify("https://cdn.example.com/still.jpg").is_inline_image());
        assert!(!MediaRef::classify("data:video/mp4;base64,AAAA").is_inline_image());
    }
}
