mod catalog;
mod model;
mod snapshot;

pub use catalog::{
    default_content, default_heritage, default_hero, default_products, default_weekly_object,
    DEFAULT_HERO_HEADING, DEFAULT_HERO_VIDEO, DEFAULT_WEEKLY_IMAGE, HERITAGE_TILE_COUNT,
};
pub use model::{
    classify_media, youtube_video_id, ContentState, DreamArtifact, HeritageEntry, HeroContent,
    MediaKind, MediaRef, Product, WeeklyObject,
};
pub use snapshot::{decode_snapshot, DecodedSnapshot, PersistedSnapshot, STORAGE_KEY};
