use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::catalog::{
    default_content, default_products, DEFAULT_HERO_HEADING, DEFAULT_HERO_VIDEO,
    HERITAGE_TILE_COUNT,
};
use super::model::{ContentState, HeritageEntry, MediaRef, Product, WeeklyObject};

/// Versioned slot key. A change to the snapshot shape must bump the suffix so
/// older payloads are never read into the new shape.
pub const STORAGE_KEY: &str = "atelier_snapshot_v1";

/// Serialized form of the editable content.
///
/// The hero media kind is not stored; it is re-derived once when the snapshot
/// is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub products: Vec<Product>,
    pub hero_heading: String,
    pub hero_video: String,
    pub heritage_data: Vec<HeritageEntry>,
    pub weekly_object: WeeklyObject,
    pub dream_image: Option<String>,
}

impl PersistedSnapshot {
    pub fn capture(state: &ContentState) -> Self {
        Self {
            products: state.products.clone(),
            hero_heading: state.hero.heading.clone(),
            hero_video: state.hero.media.uri.clone(),
            heritage_data: state.heritage.clone(),
            weekly_object: state.weekly.clone(),
            dream_image: state.dream.image.clone(),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSnapshot {
    pub state: ContentState,
    /// The raw value was not a JSON object; `state` is the full default.
    pub malformed: bool,
    /// Recognized fields that were absent or unusable and took their default.
    pub defaulted: Vec<&'static str>,
}

/// Merges a persisted payload into the built-in defaults, field by field.
///
/// Products always come from the built-in catalog. Malformed JSON yields the
/// full default state rather than a partial recovery.
pub fn decode_snapshot(raw: &str) -> DecodedSnapshot {
    let mut state = default_content();
    let parsed = serde_json::from_str::<Value>(raw).ok();
    let Some(obj) = parsed.as_ref().and_then(Value::as_object) else {
        return DecodedSnapshot {
            state,
            malformed: true,
            defaulted: Vec::new(),
        };
    };

    let mut defaulted = Vec::new();
    state.products = default_products();

    match non_empty_str(obj, "heroHeading") {
        Some(heading) => state.hero.heading = heading,
        None => {
            state.hero.heading = DEFAULT_HERO_HEADING.to_string();
            defaulted.push("heroHeading");
        }
    }
    match non_empty_str(obj, "heroVideo") {
        Some(uri) => state.hero.media = MediaRef::classify(uri),
        None => {
            state.hero.media = MediaRef::classify(DEFAULT_HERO_VIDEO);
            defaulted.push("heroVideo");
        }
    }

    let heritage = obj
        .get("heritageData")
        .cloned()
        .and_then(|value| serde_json::from_value::<Vec<HeritageEntry>>(value).ok())
        .filter(|entries| entries.len() == HERITAGE_TILE_COUNT);
    match heritage {
        Some(entries) => state.heritage = entries,
        None => defaulted.push("heritageData"),
    }

    match obj
        .get("weeklyObject")
        .cloned()
        .and_then(|value| serde_json::from_value::<WeeklyObject>(value).ok())
    {
        Some(weekly) => state.weekly = weekly,
        None => defaulted.push("weeklyObject"),
    }

    // `null` is how an absent dream is written, so it is not a fallback.
    match obj.get("dreamImage") {
        Some(Value::String(image)) if !image.is_empty() => {
            state.dream.image = Some(image.clone());
        }
        Some(Value::Null) => state.dream.image = None,
        _ => defaulted.push("dreamImage"),
    }

    DecodedSnapshot {
        state,
        malformed: false,
        defaulted,
    }
}

fn non_empty_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
