//! Built-in content the atelier ships with. Every field of the persisted
//! snapshot falls back to one of these when it is absent or unusable.

use super::model::{
    ContentState, DreamArtifact, HeritageEntry, HeroContent, MediaRef, Product, WeeklyObject,
};

pub const HERITAGE_TILE_COUNT: usize = 4;

pub const DEFAULT_HERO_HEADING: &str = "Small luxuries,\na beautiful journey";
pub const DEFAULT_HERO_VIDEO: &str = "assets/hero/atelier-film.mp4";
pub const DEFAULT_WEEKLY_IMAGE: &str = "assets/weekly/moon-jar.png";

struct ProductSeed {
    id: &'static str,
    name: &'static str,
    subtitle: &'static str,
    price: &'static str,
    category: &'static str,
    image: &'static str,
    detail_images: &'static [&'static str],
    description: &'static str,
}

const PRODUCT_SEEDS: &[ProductSeed] = &[
    ProductSeed {
        id: "p1_red_amulet",
        name: "The Red Amulet : 2026 Edition",
        subtitle: "A guardian stone for the year of the red horse",
        price: "₩ 98,000",
        category: "Jewelry",
        image: "assets/products/red-amulet.jpg",
        detail_images: &[
            "assets/products/red-amulet-detail-1.jpg",
            "assets/products/red-amulet-detail-2.jpg",
        ],
        description: "An amulet made for a year of momentum. Red stone, hand-knotted cord, and the quiet promise of protection close to the heart.",
    },
    ProductSeed {
        id: "p2_shadow_panther",
        name: "The Shadow Panther",
        subtitle: "Black onyx panther bracelet",
        price: "₩115,000",
        category: "Jewelry",
        image: "assets/products/shadow-panther.png",
        detail_images: &[
            "assets/products/shadow-panther-detail-1.png",
            "assets/products/shadow-panther-detail-2.jpg",
        ],
        description: "Deep, polished onyx that keeps its light in the dark. A bracelet for conviction that does not waver.",
    },
    ProductSeed {
        id: "p3_violet_ritual",
        name: "The Violet Revival Ritual",
        subtitle: "Revitalizing purple serum set",
        price: "₩165,000",
        category: "Skincare",
        image: "assets/products/violet-ritual.jpg",
        detail_images: &[
            "assets/products/violet-ritual-package.png",
            "assets/products/violet-ritual-vanity.jpg",
        ],
        description: "A violet drop that works slowly and deeply, returning elasticity and a clear glow to tired skin.",
    },
    ProductSeed {
        id: "p4_mulberry_water",
        name: "Mulberry Cream Water",
        subtitle: "Clear, weightless purification",
        price: "₩49,000",
        category: "Skincare",
        image: "assets/products/mulberry-water.jpg",
        detail_images: &[
            "assets/products/mulberry-water.jpg",
            "assets/products/mulberry-water-detail-1.jpg",
            "assets/products/mulberry-water-detail-2.jpg",
        ],
        description: "Mulberry leaf extract and a protective cream layer in one bottle. Fewer steps, the same care.",
    },
    ProductSeed {
        id: "p5_sapporo_dawn",
        name: "Scent of Silence : Sapporo Dawn",
        subtitle: "Eau de parfum, 50ml",
        price: "₩ 235,000",
        category: "Parfum",
        image: "assets/products/sapporo-dawn.jpg",
        detail_images: &[
            "assets/products/sapporo-dawn-detail-1.jpg",
            "assets/products/sapporo-dawn-detail-2.jpg",
        ],
        description: "Five in the morning, snow muffling every sound. The coldest, cleanest air of the day, kept in glass.",
    },
    ProductSeed {
        id: "p6_realm_of_nuku",
        name: "The Realm : The First Manifestation",
        subtitle: "Original silk scarf, the imagined garden",
        price: "₩ 298,000",
        category: "Silk Scarf",
        image: "assets/products/realm-scarf.jpg",
        detail_images: &[
            "assets/products/realm-scarf-horse.jpg",
            "assets/products/realm-scarf-drawing.png",
        ],
        description: "The first step of an imagined garden into the real world: a red horse at play, printed on heavy silk.",
    },
];

const HERITAGE_SEEDS: [(&str, &str, &str); HERITAGE_TILE_COUNT] = [
    (
        "assets/heritage/cold-space.jpg",
        "Cold space, warm gaze",
        "In the silence of a still corridor, a single red presence holds the eye.\n\nBetween composure and passion, an energy worn closest to the heart.",
    ),
    (
        "assets/heritage/layers-of-stillness.png",
        "Layers of stillness",
        "A wordless promise runs between stacked textures.\nWe often find true nobility\ninside the most perfect imperfection.",
    ),
    (
        "assets/heritage/refined-immersion.png",
        "A record of refined immersion",
        "Countless lines gather into one curve, hundreds of doubts into one taste.\n\nBehind every finished piece sits the fiercest, quietest part of making.",
    ),
    (
        "assets/heritage/projection-of-essence.png",
        "Projection of essence",
        "What shows only after everything unnecessary is gone.\nThe objects that mirror us\noffer the deepest comfort in the lowest voice.",
    ),
];

pub fn default_products() -> Vec<Product> {
    PRODUCT_SEEDS
        .iter()
        .map(|seed| Product {
            id: seed.id.to_string(),
            name: seed.name.to_string(),
            subtitle: Some(seed.subtitle.to_string()),
            price: seed.price.to_string(),
            category: seed.category.to_string(),
            image: seed.image.to_string(),
            detail_images: seed
                .detail_images
                .iter()
                .map(|item| (*item).to_string())
                .collect(),
            description: seed.description.to_string(),
        })
        .collect()
}

pub fn default_heritage() -> Vec<HeritageEntry> {
    HERITAGE_SEEDS
        .iter()
        .map(|(image, title, description)| HeritageEntry {
            image: (*image).to_string(),
            title: (*title).to_string(),
            description: (*description).to_string(),
        })
        .collect()
}

pub fn default_weekly_object() -> WeeklyObject {
    WeeklyObject {
        title: "Moon Jar".to_string(),
        subtitle: "White Porcelain".to_string(),
        description: "\"The beauty of being filled by emptiness.\nA pure white curve with every artifice removed\nspeaks for the way we choose to live.\"".to_string(),
        image: DEFAULT_WEEKLY_IMAGE.to_string(),
    }
}

pub fn default_hero() -> HeroContent {
    HeroContent {
        heading: DEFAULT_HERO_HEADING.to_string(),
        media: MediaRef::classify(DEFAULT_HERO_VIDEO),
    }
}

pub fn default_content() -> ContentState {
    ContentState {
        products: default_products(),
        hero: default_hero(),
        heritage: default_heritage(),
        weekly: default_weekly_object(),
        dream: DreamArtifact::default(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{default_content, HERITAGE_TILE_COUNT};
    use crate::content::MediaKind;

    #[test]
    fn defaults_have_fixed_heritage_and_unique_products() {
        let content = default_content();
        assert_eq!(content.heritage.len(), HERITAGE_TILE_COUNT);
        let ids: HashSet<&str> = content.products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids.len(), content.products.len());
        assert_eq!(content.hero.media.kind, MediaKind::Video);
        assert!(content.dream.image.is_none());
        assert!(content.hero.heading.contains('\n'));
    }
}
