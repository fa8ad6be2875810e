//! Gemini Live (BidiGenerateContent) over a blocking websocket.

use std::collections::VecDeque;
use std::io;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::Request;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect as websocket_connect, Message as WsMessage, WebSocket};

use crate::voice::{
    InboundEvent, VoiceConnector, VoiceError, VoiceSessionConfig, VoiceTransport, INPUT_MIME,
};

const SETUP_TIMEOUT: Duration = Duration::from_secs(15);
const LIVE_SERVICE_PATH: &str = "GenerativeService.BidiGenerateContent";

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

pub struct GeminiLiveConnector {
    api_base: String,
    api_key: Option<String>,
}

impl GeminiLiveConnector {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key,
        }
    }
}

impl VoiceConnector for GeminiLiveConnector {
    fn connect(&self, config: &VoiceSessionConfig) -> Result<Box<dyn VoiceTransport>, VoiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(VoiceError::connection(
                "Missing GEMINI_API_KEY (or GOOGLE_API_KEY).",
            ));
        };
        let request = build_live_websocket_request(&self.api_base, api_key)
            .map_err(|err| VoiceError::connection(format!("{err:#}")))?;
        let (mut ws, _response) = websocket_connect(request)
            .map_err(|err| VoiceError::connection(format!("live connect failed: {err}")))?;

        set_socket_read_timeout(&mut ws, Some(SETUP_TIMEOUT));
        send_json(&mut ws, &setup_message(config))
            .map_err(|err| VoiceError::connection(format!("{err:#}")))?;
        wait_for_setup_complete(&mut ws)
            .map_err(|err| VoiceError::connection(format!("{err:#}")))?;

        Ok(Box::new(GeminiLiveTransport {
            ws,
            pending: VecDeque::new(),
            read_timeout: None,
            closed: false,
        }))
    }
}

struct GeminiLiveTransport {
    ws: Socket,
    pending: VecDeque<InboundEvent>,
    read_timeout: Option<Duration>,
    closed: bool,
}

impl VoiceTransport for GeminiLiveTransport {
    fn send_audio(&mut self, data_base64: &str) -> Result<(), VoiceError> {
        send_json(&mut self.ws, &audio_message(data_base64))
            .map_err(|err| VoiceError::transport(format!("{err:#}")))
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<InboundEvent>, VoiceError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.closed {
            return Ok(Some(InboundEvent::Closed));
        }
        if self.read_timeout != Some(timeout) {
            set_socket_read_timeout(&mut self.ws, Some(timeout));
            self.read_timeout = Some(timeout);
        }

        let message = match self.ws.read() {
            Ok(message) => message,
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                return Ok(None);
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                self.closed = true;
                return Ok(Some(InboundEvent::Closed));
            }
            Err(err) => return Err(VoiceError::transport(format!("live read failed: {err}"))),
        };

        let raw = match message {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).to_string(),
            WsMessage::Close(_) => {
                self.closed = true;
                return Ok(Some(InboundEvent::Closed));
            }
            _ => return Ok(None),
        };
        let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
            return Ok(None);
        };
        self.pending.extend(parse_server_message(&parsed));
        Ok(self.pending.pop_front())
    }

    fn close(&mut self) {
        if !self.closed {
            let _ = self.ws.close(None);
            let _ = self.ws.flush();
            self.closed = true;
        }
    }
}

pub fn live_ws_url(api_base: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(api_base).context("invalid GEMINI_API_BASE")?;
    let version = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
        .unwrap_or("v1beta")
        .to_string();
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => bail!("unsupported GEMINI_API_BASE scheme '{other}'"),
    };
    if url.set_scheme(scheme).is_err() {
        bail!("failed to derive websocket scheme from {api_base}");
    }
    url.set_path(&format!(
        "/ws/google.ai.generativelanguage.{version}.{LIVE_SERVICE_PATH}"
    ));
    url.set_query(None);
    Ok(url.to_string())
}

fn build_live_websocket_request(api_base: &str, api_key: &str) -> Result<Request<()>> {
    let mut url = reqwest::Url::parse(&live_ws_url(api_base)?).context("invalid live url")?;
    url.query_pairs_mut().append_pair("key", api_key);
    url.as_str()
        .into_client_request()
        .context("invalid live websocket request")
}

pub fn setup_message(config: &VoiceSessionConfig) -> Value {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };
    json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice_name },
                    },
                },
            },
            "systemInstruction": {
                "parts": [{ "text": config.system_instruction }],
            },
            "outputAudioTranscription": {},
        }
    })
}

pub fn audio_message(data_base64: &str) -> Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [{ "mimeType": INPUT_MIME, "data": data_base64 }],
        }
    })
}

/// Splits one server message into events, in the order transcript, audio,
/// turn completion.
pub fn parse_server_message(message: &Value) -> Vec<InboundEvent> {
    let mut events = Vec::new();
    if message.get("goAway").is_some() {
        events.push(InboundEvent::Closed);
        return events;
    }
    let Some(content) = message.get("serverContent") else {
        return events;
    };
    if let Some(text) = content
        .pointer("/outputTranscription/text")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
    {
        events.push(InboundEvent::Transcript(text.to_string()));
    }
    let parts = content
        .pointer("/modelTurn/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for part in parts {
        if let Some(data) = part
            .get("inlineData")
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .filter(|data| !data.is_empty())
        {
            events.push(InboundEvent::Audio(data.to_string()));
        }
    }
    if content
        .get("turnComplete")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        events.push(InboundEvent::TurnComplete);
    }
    events
}

fn wait_for_setup_complete(ws: &mut Socket) -> Result<()> {
    let started = Instant::now();
    while started.elapsed() < SETUP_TIMEOUT {
        let raw = match ws.read().context("live setup read failed")? {
            WsMessage::Text(text) => text.to_string(),
            WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).to_string(),
            WsMessage::Close(frame) => bail!("live session closed during setup: {frame:?}"),
            _ => continue,
        };
        let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        if parsed.get("setupComplete").is_some() {
            return Ok(());
        }
        if let Some(error) = parsed.get("error") {
            bail!("live setup rejected: {error}");
        }
    }
    bail!("live setup timed out")
}

fn send_json(ws: &mut Socket, value: &Value) -> Result<()> {
    let raw = serde_json::to_string(value).context("failed to serialize live payload")?;
    ws.send(WsMessage::Text(raw.into()))
        .context("failed to send live payload")
}

fn set_socket_read_timeout(ws: &mut Socket, timeout: Option<Duration>) {
    match ws.get_mut() {
        MaybeTlsStream::Plain(stream) => {
            let _ = stream.set_read_timeout(timeout);
        }
        MaybeTlsStream::Rustls(stream) => {
            let _ = stream.get_mut().set_read_timeout(timeout);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;

    use super::{audio_message, live_ws_url, parse_server_message, setup_message};
    use crate::voice::{InboundEvent, VoiceSessionConfig};

    #[test]
    fn ws_url_follows_api_base() -> Result<()> {
        assert_eq!(
            live_ws_url("https://generativelanguage.googleapis.com/v1beta")?,
            "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
        );
        assert!(live_ws_url("http://localhost:8080/v1alpha")?.starts_with("ws://localhost:8080/ws/"));
        assert!(live_ws_url("ftp://nope").is_err());
        Ok(())
    }

    #[test]
    fn setup_requests_audio_voice_and_transcription() {
        let setup = setup_message(&VoiceSessionConfig {
            model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            voice_name: "Zephyr".to_string(),
            system_instruction: "be gracious".to_string(),
        });
        assert_eq!(
            setup["setup"]["model"],
            "models/gemini-2.5-flash-native-audio-preview-12-2025"
        );
        assert_eq!(setup["setup"]["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(setup["setup"]["outputAudioTranscription"], json!({}));
    }

    #[test]
    fn audio_chunks_carry_input_mime() {
        let message = audio_message("AAAA");
        assert_eq!(
            message["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
    }

    #[test]
    fn server_content_splits_into_ordered_events() {
        let events = parse_server_message(&json!({
            "serverContent": {
                "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAA=" } }] },
                "outputTranscription": { "text": "Good evening" },
                "turnComplete": true
            }
        }));
        assert_eq!(
            events,
            vec![
                InboundEvent::Transcript("Good evening".to_string()),
                InboundEvent::Audio("AAA=".to_string()),
                InboundEvent::TurnComplete,
            ]
        );
        assert!(parse_server_message(&json!({ "setupComplete": {} })).is_empty());
        assert_eq!(
            parse_server_message(&json!({ "goAway": { "timeLeft": "1s" } })),
            vec![InboundEvent::Closed]
        );
    }
}
