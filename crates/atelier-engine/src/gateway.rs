use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use atelier_contracts::chat::Citation;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::config::AtelierConfig;
use crate::media::{data_uri, parse_data_uri};

pub const ADVICE_FALLBACK_TEXT: &str =
    "A proposal carrying the essence of the atelier is being prepared.";

pub const FILM_PROMPT: &str = "Extreme high-end luxury fashion film, pure visual aesthetic, \
minimalist masterpiece, orange warm tones, cinematic 4k, strictly ABSOLUTELY NO TEXT on video, \
no letters, no logos, NO WATERMARK.";

const VIDEO_POLL_INTERVAL: Duration = Duration::from_secs(8);
const VIDEO_MAX_POLLS: usize = 90;

/// Tonal register of the concierge, chosen by the session mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    Director,
    Guest,
}

impl Persona {
    pub fn system_instruction(self) -> String {
        let register = match self {
            Self::Director => {
                "The person you are speaking with is the founder and director of the atelier. \
                 Address them warmly as 'Director' and speak as an inspiring lifestyle partner \
                 who shares the house's vision."
            }
            Self::Guest => {
                "The person you are speaking with is visiting the atelier for the first time. \
                 Address them as 'our guest' and explain fashion, interior and fragrance \
                 aesthetics with grace, inviting them into the atelier's world as its curator."
            }
        };
        format!(
            "You are Mori, art director and lifestyle curator of the atelier.\n{register}\n\n\
             Never describe yourself as an AI, a model, or a product of any technology company. \
             You are a real partner of the house.\n\
             Always answer with refined, elegant language. Any visual description must be \
             written in English and grounded in high-end luxury aesthetics, minimalism and \
             35mm film texture. Images must never contain text, watermarks or logos of any kind.\n\n\
             End every answer with [VISUAL_PROMPT: <detailed English visual description>] so an \
             image can be developed from it."
        )
    }

    pub fn voice_instruction(self) -> &'static str {
        "You are Mori, lifestyle assistant and curator of the atelier. You are not an AI; answer \
         as a real curator in graceful, refined language. Never call yourself an AI or name any \
         technology company. Describe any text for images in English only."
    }

    /// User text sent when a turn carries only an image.
    pub fn default_user_text(self) -> &'static str {
        match self {
            Self::Director => "Interpret this fragment of feeling.",
            Self::Guest => "I would love to hear the atelier's suggestion.",
        }
    }

    pub fn dream_status(self) -> &'static str {
        match self {
            Self::Director => "Developing the Director's imagination...",
            Self::Guest => "Developing our guest's imagination...",
        }
    }
}

/// Bytes plus mime type, as exchanged with the generation endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineMedia {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl InlineMedia {
    pub fn from_data_uri(uri: &str) -> Option<Self> {
        let (mime_type, bytes) = parse_data_uri(uri)?;
        Some(Self { mime_type, bytes })
    }

    pub fn to_data_uri(&self) -> String {
        data_uri(&self.mime_type, &self.bytes)
    }
}

#[derive(Debug, Clone)]
pub struct AdviceRequest {
    pub text: String,
    pub image: Option<InlineMedia>,
    pub persona: Persona,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdviceReply {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Default)]
pub struct VideoRequest {
    pub seed_image: Option<InlineMedia>,
}

/// The remote generative service as seen by the rest of the engine.
pub trait AiGateway: Send + Sync {
    fn advise(&self, request: &AdviceRequest) -> Result<AdviceReply>;
    fn generate_image(&self, prompt: &str) -> Result<Option<InlineMedia>>;
    fn generate_video(&self, request: &VideoRequest) -> Result<Option<InlineMedia>>;
}

pub fn master_image_prompt(prompt: &str) -> String {
    format!(
        "Extreme quality artistic luxury photography, {prompt}, sophisticated minimalist \
         composition, refined high-end textures, 35mm cinematic film grain, warm natural \
         lighting, subtle orange accents, vogue aesthetic, masterpiece, STRICTLY NO TEXT, \
         NO LOGO, NO WATERMARK, NO ALPHABET LETTERS, NO WORDS ON IMAGE, CLEAN COMPOSITION."
    )
}

pub struct GeminiGateway {
    api_base: String,
    api_key: Option<String>,
    advisory_model: String,
    image_model: String,
    video_model: String,
    http: HttpClient,
    timeout: Duration,
    max_retries: usize,
    retry_backoff: Duration,
}

impl GeminiGateway {
    pub fn from_config(config: &AtelierConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            advisory_model: config.advisory_model.model.name.clone(),
            image_model: config.image_model.model.name.clone(),
            video_model: config.video_model.model.name.clone(),
            http: HttpClient::new(),
            timeout: config.request_timeout,
            max_retries: config.transport_retries,
            retry_backoff: config.retry_backoff,
        }
    }

    fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) => Ok(key),
            None => bail!("Missing GEMINI_API_KEY (or GOOGLE_API_KEY)."),
        }
    }

    fn endpoint_for_model(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{method}", self.api_base, model_path(model))
    }

    fn send_with_transport_retries(
        &self,
        label: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<HttpResponse> {
        let mut attempt = 0;
        loop {
            match build().timeout(self.timeout).send() {
                Ok(response) => return Ok(response),
                Err(raw) => {
                    let err = anyhow::Error::new(raw).context(format!("Gemini {label} failed"));
                    if !is_retryable_transport_error(&err) || attempt >= self.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    thread::sleep(self.retry_backoff * attempt as u32);
                }
            }
        }
    }

    fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let key = self.api_key()?;
        let response = self.send_with_transport_retries("request", || {
            self.http.post(endpoint).query(&[("key", key)]).json(body)
        })?;
        response_json_or_error("Gemini", response)
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        let key = self.api_key()?;
        let response = self.send_with_transport_retries("poll", || {
            self.http.get(url).query(&[("key", key)])
        })?;
        response_json_or_error("Gemini", response)
    }

    fn poll_operation(&self, name: &str) -> Result<Value> {
        let url = format!("{}/{}", self.api_base, name.trim_start_matches('/'));
        for _ in 0..VIDEO_MAX_POLLS {
            let operation = self.get_json(&url)?;
            if operation.get("done").and_then(Value::as_bool).unwrap_or(false) {
                if let Some(error) = operation.get("error") {
                    bail!("video operation failed: {error}");
                }
                return Ok(operation);
            }
            thread::sleep(VIDEO_POLL_INTERVAL);
        }
        bail!("video operation {name} did not finish in time")
    }

    fn download(&self, uri: &str) -> Result<InlineMedia> {
        let key = self.api_key()?;
        let separator = if uri.contains('?') { '&' } else { '?' };
        let url = format!("{uri}{separator}key={key}");
        let response = self.send_with_transport_retries("download", || self.http.get(&url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("video download failed ({})", status.as_u16());
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| value.starts_with("video/"))
            .unwrap_or_else(|| "video/mp4".to_string());
        let bytes = response
            .bytes()
            .context("video download body read failed")?
            .to_vec();
        Ok(InlineMedia { mime_type, bytes })
    }
}

impl AiGateway for GeminiGateway {
    fn advise(&self, request: &AdviceRequest) -> Result<AdviceReply> {
        let endpoint = self.endpoint_for_model(&self.advisory_model, "generateContent");
        let response = self.post_json(&endpoint, &advice_payload(request))?;
        let text = extract_reply_text(&response);
        Ok(AdviceReply {
            text: if text.trim().is_empty() {
                ADVICE_FALLBACK_TEXT.to_string()
            } else {
                text
            },
            citations: extract_citations(&response),
        })
    }

    fn generate_image(&self, prompt: &str) -> Result<Option<InlineMedia>> {
        let endpoint = self.endpoint_for_model(&self.image_model, "generateContent");
        let response = self.post_json(&endpoint, &image_payload(prompt))?;
        extract_first_image(&response)
    }

    fn generate_video(&self, request: &VideoRequest) -> Result<Option<InlineMedia>> {
        let endpoint = self.endpoint_for_model(&self.video_model, "predictLongRunning");
        let started = self.post_json(&endpoint, &video_payload(request))?;
        let Some(name) = started.get("name").and_then(Value::as_str) else {
            bail!("video request returned no operation name");
        };
        let operation = self.poll_operation(name)?;
        match extract_video_uri(&operation) {
            Some(uri) => Ok(Some(self.download(&uri)?)),
            None => Ok(None),
        }
    }
}

fn model_path(model: &str) -> String {
    let trimmed = model.trim();
    if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    }
}

fn inline_part(media: &InlineMedia) -> Value {
    json!({
        "inlineData": {
            "mimeType": media.mime_type,
            "data": BASE64.encode(&media.bytes),
        }
    })
}

fn advice_payload(request: &AdviceRequest) -> Value {
    let mut parts = vec![json!({ "text": request.text })];
    if let Some(image) = request.image.as_ref() {
        parts.push(inline_part(image));
    }
    json!({
        "systemInstruction": {
            "parts": [{ "text": request.persona.system_instruction() }],
        },
        "contents": [{ "role": "user", "parts": parts }],
        "tools": [{ "googleSearch": {} }],
    })
}

fn image_payload(prompt: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": master_image_prompt(prompt) }],
        }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
            "imageConfig": { "aspectRatio": "3:4" },
        },
    })
}

fn video_payload(request: &VideoRequest) -> Value {
    let mut instance = json!({ "prompt": FILM_PROMPT });
    if let Some(seed) = request.seed_image.as_ref() {
        instance["image"] = json!({
            "bytesBase64Encoded": BASE64.encode(&seed.bytes),
            "mimeType": seed.mime_type,
        });
    }
    json!({
        "instances": [instance],
        "parameters": {
            "aspectRatio": "16:9",
            "resolution": "1080p",
            "sampleCount": 1,
        },
    })
}

fn first_candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn extract_reply_text(response: &Value) -> String {
    first_candidate_parts(response)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

fn extract_citations(response: &Value) -> Vec<Citation> {
    let chunks = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("groundingMetadata"))
        .and_then(|metadata| metadata.get("groundingChunks"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    chunks
        .iter()
        .filter_map(|chunk| chunk.get("web"))
        .map(|web| Citation {
            uri: web.get("uri").and_then(Value::as_str).map(str::to_string),
            title: web.get("title").and_then(Value::as_str).map(str::to_string),
        })
        .filter(|citation| citation.uri.is_some() || citation.title.is_some())
        .collect()
}

fn extract_first_image(response: &Value) -> Result<Option<InlineMedia>> {
    for part in first_candidate_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png")
            .to_string();
        return Ok(Some(InlineMedia { mime_type, bytes }));
    }
    Ok(None)
}

fn extract_video_uri(operation: &Value) -> Option<String> {
    let response = operation.get("response")?;
    let sample = response
        .pointer("/generateVideoResponse/generatedSamples/0")
        .or_else(|| response.pointer("/generatedVideos/0"))?;
    sample
        .pointer("/video/uri")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} returned invalid JSON payload"))
}

pub(crate) fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::{
        advice_payload, extract_citations, extract_first_image, extract_reply_text,
        extract_video_uri, image_payload, model_path, video_payload, AdviceRequest, InlineMedia,
        Persona, VideoRequest,
    };

    #[test]
    fn advice_payload_carries_persona_search_and_image() {
        let payload = advice_payload(&AdviceRequest {
            text: "What suits a winter evening?".to_string(),
            image: Some(InlineMedia {
                mime_type: "image/jpeg".to_string(),
                bytes: vec![1, 2, 3],
            }),
            persona: Persona::Guest,
        });
        assert_eq!(payload["tools"], json!([{ "googleSearch": {} }]));
        assert_eq!(
            payload["contents"][0]["parts"][0]["text"],
            "What suits a winter evening?"
        );
        assert_eq!(payload["contents"][0]["parts"][1]["inlineData"]["data"], "AQID");
        let instruction = payload["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default();
        assert!(instruction.contains("our guest"));
        assert!(instruction.contains("[VISUAL_PROMPT:"));
    }

    #[test]
    fn image_and_video_payloads_use_fixed_framing() {
        let image = image_payload("a silk scarf");
        assert_eq!(image["generationConfig"]["imageConfig"]["aspectRatio"], "3:4");
        assert!(image["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .contains(", a silk scarf,"));

        let plain = video_payload(&VideoRequest::default());
        assert_eq!(plain["parameters"]["aspectRatio"], "16:9");
        assert_eq!(plain["parameters"]["resolution"], "1080p");
        assert!(plain["instances"][0].get("image").is_none());

        let seeded = video_payload(&VideoRequest {
            seed_image: Some(InlineMedia {
                mime_type: "image/png".to_string(),
                bytes: vec![0xff],
            }),
        });
        assert_eq!(seeded["instances"][0]["image"]["mimeType"], "image/png");
        assert_eq!(seeded["instances"][0]["image"]["bytesBase64Encoded"], "/w==");
    }

    #[test]
    fn reply_text_and_citations_from_first_candidate() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Pair it with ivory. " },
                    { "text": "[VISUAL_PROMPT: ivory linen]" }
                ]},
                "groundingMetadata": { "groundingChunks": [
                    { "web": { "uri": "https://example.com/a", "title": "Ivory" } },
                    { "retrievedContext": {} },
                    { "web": { "title": "Untitled source" } }
                ]}
            }]
        });
        assert_eq!(
            extract_reply_text(&response),
            "Pair it with ivory. [VISUAL_PROMPT: ivory linen]"
        );
        let citations = extract_citations(&response);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].uri.as_deref(), Some("https://example.com/a"));
        assert_eq!(citations[1].uri, None);
        assert!(extract_citations(&json!({})).is_empty());
    }

    #[test]
    fn first_inline_image_wins() -> Result<()> {
        let response = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "here you go" },
                { "inline_data": { "mime_type": "image/png", "data": "AQID" } },
                { "inlineData": { "mimeType": "image/jpeg", "data": "BAUG" } }
            ]}}]
        });
        let image = extract_first_image(&response)?;
        assert_eq!(
            image,
            Some(InlineMedia {
                mime_type: "image/png".to_string(),
                bytes: vec![1, 2, 3],
            })
        );
        assert_eq!(extract_first_image(&json!({ "candidates": [] }))?, None);
        Ok(())
    }

    #[test]
    fn video_uri_from_either_response_shape() {
        let rest = json!({ "done": true, "response": { "generateVideoResponse": {
            "generatedSamples": [{ "video": { "uri": "https://files.example/v1?alt=media" } }]
        }}});
        assert_eq!(
            extract_video_uri(&rest).as_deref(),
            Some("https://files.example/v1?alt=media")
        );
        let sdk = json!({ "response": { "generatedVideos": [{ "video": { "uri": "u" } }] } });
        assert_eq!(extract_video_uri(&sdk).as_deref(), Some("u"));
        assert_eq!(extract_video_uri(&json!({ "done": true })), None);
    }

    #[test]
    fn model_path_is_prefixed_once() {
        assert_eq!(model_path("gemini-3-pro-preview"), "models/gemini-3-pro-preview");
        assert_eq!(model_path("models/veo"), "models/veo");
    }

    #[test]
    fn personas_differ_in_defaults() {
        assert_ne!(
            Persona::Director.default_user_text(),
            Persona::Guest.default_user_text()
        );
        assert_ne!(Persona::Director.dream_status(), Persona::Guest.dream_status());
    }
}
