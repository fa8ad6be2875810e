use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use atelier_contracts::content::{classify_media, MediaKind};
use atelier_contracts::events::{payload, EventWriter};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use serde_json::json;

pub const DEFAULT_MAX_EDGE: u32 = 1200;
pub const DEFAULT_JPEG_QUALITY: u8 = 50;

/// Shrinks inline images so a snapshot of them fits the storage quota.
///
/// Video and embedded-stream references, remote URLs and anything that fails
/// to decode come back unchanged.
#[derive(Debug, Clone)]
pub struct MediaNormalizer {
    max_edge: u32,
    quality: u8,
    events: Option<EventWriter>,
}

impl Default for MediaNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaNormalizer {
    pub fn new() -> Self {
        Self {
            max_edge: DEFAULT_MAX_EDGE,
            quality: DEFAULT_JPEG_QUALITY,
            events: None,
        }
    }

    pub fn with_limits(max_edge: u32, quality: u8) -> Self {
        Self {
            max_edge: max_edge.max(1),
            quality: quality.clamp(1, 100),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_edge(&self) -> u32 {
        self.max_edge
    }

    pub fn normalize(&self, input: &str) -> String {
        if matches!(
            classify_media(input),
            MediaKind::Video | MediaKind::EmbeddedStream { .. }
        ) {
            return input.to_string();
        }
        let Some((mime, bytes)) = parse_data_uri(input) else {
            return input.to_string();
        };

        match self.reencode(&bytes) {
            Ok(encoded) => {
                if let Some(events) = self.events.as_ref() {
                    let _ = events.emit(
                        "media_normalized",
                        payload(json!({
                            "from_mime": mime,
                            "from_width": encoded.source.0,
                            "from_height": encoded.source.1,
                            "width": encoded.target.0,
                            "height": encoded.target.1,
                            "bytes_in": bytes.len(),
                            "bytes_out": encoded.bytes.len(),
                        })),
                    );
                }
                data_uri("image/jpeg", &encoded.bytes)
            }
            Err(err) => {
                if let Some(events) = self.events.as_ref() {
                    let _ = events.emit(
                        "media_normalize_fallback",
                        payload(json!({
                            "from_mime": mime,
                            "bytes_in": bytes.len(),
                            "error": format!("{err:#}"),
                        })),
                    );
                }
                input.to_string()
            }
        }
    }

    /// Reads a local file the way a file picker would, then normalizes it.
    pub fn normalize_file(&self, path: &Path) -> Result<String> {
        Ok(self.normalize(&file_to_data_uri(path)?))
    }

    fn reencode(&self, bytes: &[u8]) -> Result<Reencoded> {
        let decoded = image::load_from_memory(bytes).context("image decode failed")?;
        let (width, height) = decoded.dimensions();
        let (target_w, target_h) = target_dimensions(width, height, self.max_edge);

        let flattened = DynamicImage::ImageRgb8(flatten_onto_white(&decoded));
        let resized = if (target_w, target_h) == (width, height) {
            flattened
        } else {
            flattened.resize_exact(target_w, target_h, FilterType::Triangle)
        };

        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        encoder
            .encode_image(&resized)
            .context("jpeg encode failed")?;
        Ok(Reencoded {
            bytes: out,
            source: (width, height),
            target: (target_w, target_h),
        })
    }
}

struct Reencoded {
    bytes: Vec<u8>,
    source: (u32, u32),
    target: (u32, u32),
}

/// Scales `(width, height)` so the longer edge is at most `max_edge`.
/// Never upscales; rounds to the nearest pixel and keeps both edges >= 1.
pub fn target_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }
    let scale = |edge: u32, longer: u32| -> u32 {
        ((f64::from(edge) * f64::from(max_edge) / f64::from(longer)).round() as u32).max(1)
    };
    if width >= height {
        (max_edge, scale(height, width))
    } else {
        (scale(width, height), max_edge)
    }
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

/// Splits a base64 `data:` URI into its mime type and payload bytes.
pub fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.trim().strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = BASE64.decode(data.trim().as_bytes()).ok()?;
    Some((mime.to_string(), bytes))
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

pub fn file_to_data_uri(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(data_uri(mime_for_path(path), &bytes))
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// File extension for a mime type, used when writing generated media to disk.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use anyhow::Result;
    use atelier_contracts::events::EventWriter;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
    use tempfile::tempdir;

    use super::{data_uri, parse_data_uri, target_dimensions, MediaNormalizer};

    fn png_data_uri(width: u32, height: u32) -> Result<String> {
        let image = RgbaImage::from_pixel(width, height, Rgba([200, 40, 10, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(data_uri("image/png", &bytes))
    }

    fn decoded_dims(uri: &str) -> Result<(u32, u32)> {
        let (mime, bytes) = parse_data_uri(uri).ok_or_else(|| anyhow::anyhow!("not a data uri"))?;
        assert_eq!(mime, "image/jpeg");
        Ok(image::load_from_memory(&bytes)?.dimensions())
    }

    #[test]
    fn target_dimensions_bounds_longer_edge_and_keeps_aspect() {
        assert_eq!(target_dimensions(2400, 1600, 1200), (1200, 800));
        assert_eq!(target_dimensions(1000, 3000, 1200), (400, 1200));
        assert_eq!(target_dimensions(800, 600, 1200), (800, 600));
        assert_eq!(target_dimensions(1201, 1201, 1200), (1200, 1200));
        assert_eq!(target_dimensions(5000, 3, 1200), (1200, 1));
    }

    #[test]
    fn large_image_is_bounded_and_reencoded_as_jpeg() -> Result<()> {
        let input = png_data_uri(300, 150)?;
        let out = MediaNormalizer::with_limits(120, 50).normalize(&input);
        assert!(out.starts_with("data:image/jpeg;base64,"));
        assert_eq!(decoded_dims(&out)?, (120, 60));
        Ok(())
    }

    #[test]
    fn small_image_is_not_upscaled() -> Result<()> {
        let input = png_data_uri(40, 90)?;
        let out = MediaNormalizer::new().normalize(&input);
        assert_eq!(decoded_dims(&out)?, (40, 90));
        Ok(())
    }

    #[test]
    fn video_and_stream_references_pass_through() {
        let normalizer = MediaNormalizer::new();
        for input in [
            "data:video/mp4;base64,AAAA",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://cdn.example.com/film.webm",
            "assets/hero/atelier-film.mp4",
        ] {
            assert_eq!(normalizer.normalize(input), input);
        }
    }

    #[test]
    fn remote_urls_are_never_fetched() {
        let url = "https://cdn.example.com/look.png";
        assert_eq!(MediaNormalizer::new().normalize(url), url);
    }

    #[test]
    fn undecodable_image_falls_back_and_logs() -> Result<()> {
        let dir = tempdir()?;
        let events = EventWriter::new(dir.path().join("events.jsonl"), "media-test");
        let input = data_uri("image/png", b"definitely not a png");
        let out = MediaNormalizer::new().with_events(events).normalize(&input);
        assert_eq!(out, input);
        let log = std::fs::read_to_string(dir.path().join("events.jsonl"))?;
        assert!(log.contains("\"type\":\"media_normalize_fallback\""));
        Ok(())
    }

    #[test]
    fn normalize_file_reads_through_a_data_uri() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("tile.png");
        let image = RgbaImage::from_pixel(64, 32, Rgba([0, 0, 0, 255]));
        DynamicImage::ImageRgba8(image).save(&path)?;
        let out = MediaNormalizer::with_limits(32, 50).normalize_file(&path)?;
        assert_eq!(decoded_dims(&out)?, (32, 16));
        Ok(())
    }
}
