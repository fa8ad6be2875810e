use std::collections::HashSet;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use atelier_contracts::chat::{parse_reply, ConciergeMessage, MessageId, Transcript};
use atelier_contracts::events::{payload, EventWriter};
use serde_json::json;

use crate::editing::Mode;
use crate::gateway::{AdviceRequest, AiGateway, InlineMedia};
use crate::voice::{
    AudioOutput, Microphone, VoiceConnector, VoiceError, VoiceSession, VoiceSessionConfig,
    VoiceUpdate, DEFAULT_VOICE_NAME,
};

pub const ADVICE_FAILURE_TEXT: &str =
    "A sensing disturbance occurred. Let me gather myself and answer again shortly.";

struct VisualCompletion {
    message_id: MessageId,
    result: Result<Option<InlineMedia>, String>,
}

/// One conversation with the concierge: typed turns, the image follow-ups
/// they trigger, and an optional live voice session.
pub struct ConciergeSession {
    gateway: Arc<dyn AiGateway>,
    transcript: Transcript,
    visual_tx: mpsc::Sender<VisualCompletion>,
    visual_rx: mpsc::Receiver<VisualCompletion>,
    pending_visuals: HashSet<MessageId>,
    voice: VoiceSession,
    events: Option<EventWriter>,
}

impl ConciergeSession {
    pub fn new(gateway: Arc<dyn AiGateway>) -> Self {
        let (visual_tx, visual_rx) = mpsc::channel();
        Self {
            gateway,
            transcript: Transcript::new(),
            visual_tx,
            visual_rx,
            pending_visuals: HashSet::new(),
            voice: VoiceSession::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.voice = VoiceSession::new().with_events(events.clone());
        self.events = Some(events);
        self
    }

    pub fn messages(&self) -> &[ConciergeMessage] {
        self.transcript.messages()
    }

    pub fn message(&self, id: MessageId) -> Option<&ConciergeMessage> {
        self.transcript.get(id)
    }

    pub fn pending_visuals(&self) -> usize {
        self.pending_visuals.len()
    }

    /// Sends one typed turn and returns the id of the assistant reply.
    ///
    /// Advisory failures become a fallback reply rather than an error; only
    /// turns that cannot be sent at all are rejected. The advisory call blocks
    /// while holding `&mut self`, so no second turn can start until the first
    /// reply is in the transcript.
    pub fn send_turn(&mut self, text: &str, image: Option<String>, mode: Mode) -> Result<MessageId> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            bail!("nothing to send");
        }
        if self.voice.is_active() {
            bail!("typed turns are disabled while the voice session is live");
        }
        let attachment = match image.as_deref() {
            Some(uri) => match InlineMedia::from_data_uri(uri) {
                Some(media) => Some(media),
                None => bail!("attached image must be an inline data URI"),
            },
            None => None,
        };

        let persona = mode.persona();
        let user_text = if text.is_empty() {
            persona.default_user_text().to_string()
        } else {
            text.to_string()
        };
        self.transcript
            .push(ConciergeMessage::user(user_text.clone(), image));

        self.emit(
            "advice_dispatched",
            json!({
                "mode": mode.as_str(),
                "chars": user_text.chars().count(),
                "has_image": attachment.is_some(),
            }),
        );
        let request = AdviceRequest {
            text: user_text,
            image: attachment,
            persona,
        };
        let reply = self.gateway.advise(&request);

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                self.emit("advice_failed", json!({ "error": format!("{err:#}") }));
                return Ok(self
                    .transcript
                    .push(ConciergeMessage::assistant(ADVICE_FAILURE_TEXT)));
            }
        };

        let parsed = parse_reply(&reply.text);
        let mut message = ConciergeMessage::assistant(parsed.text);
        message.sources = reply.citations;
        message.generating_visual = parsed.visual_prompt.is_some();
        let id = self.transcript.push(message);
        if let Some(prompt) = parsed.visual_prompt {
            self.request_visual(id, prompt);
        }
        Ok(id)
    }

    fn request_visual(&mut self, message_id: MessageId, prompt: String) {
        self.emit(
            "visual_requested",
            json!({ "message_id": message_id.to_string(), "prompt": prompt }),
        );
        let gateway = Arc::clone(&self.gateway);
        let tx = self.visual_tx.clone();
        let spawned = thread::Builder::new()
            .name("atelier-visual".to_string())
            .spawn(move || {
                let result = gateway
                    .generate_image(&prompt)
                    .map_err(|err| format!("{err:#}"));
                let _ = tx.send(VisualCompletion { message_id, result });
            });
        match spawned {
            Ok(_) => {
                self.pending_visuals.insert(message_id);
            }
            Err(err) => self.apply_visual(VisualCompletion {
                message_id,
                result: Err(format!("visual thread spawn failed: {err}")),
            }),
        }
    }

    /// Applies every finished visual without waiting. Returns how many landed.
    pub fn poll_visuals(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.visual_rx.try_recv() {
            self.apply_visual(completion);
            applied += 1;
        }
        applied
    }

    /// Waits until every requested visual has finished or `timeout` passes.
    pub fn wait_for_visuals(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut applied = 0;
        while !self.pending_visuals.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.visual_rx.recv_timeout(remaining) {
                Ok(completion) => {
                    self.apply_visual(completion);
                    applied += 1;
                }
                Err(_) => break,
            }
        }
        applied
    }

    fn apply_visual(&mut self, completion: VisualCompletion) {
        self.pending_visuals.remove(&completion.message_id);
        let Some(message) = self.transcript.get_mut(completion.message_id) else {
            return;
        };
        message.generating_visual = false;
        let id = completion.message_id.to_string();
        match completion.result {
            Ok(Some(media)) => {
                let uri = media.to_data_uri();
                let bytes = media.bytes.len();
                message.generated_image = Some(uri);
                self.emit("visual_ready", json!({ "message_id": id, "bytes": bytes }));
            }
            Ok(None) => {
                self.emit(
                    "visual_failed",
                    json!({ "message_id": id, "error": "no image returned" }),
                );
            }
            Err(error) => {
                self.emit("visual_failed", json!({ "message_id": id, "error": error }));
            }
        }
    }

    pub fn start_voice(
        &mut self,
        connector: &dyn VoiceConnector,
        microphone: &dyn Microphone,
        output: Box<dyn AudioOutput>,
        mode: Mode,
        model: &str,
    ) -> Result<(), VoiceError> {
        let config = VoiceSessionConfig {
            model: model.to_string(),
            voice_name: DEFAULT_VOICE_NAME.to_string(),
            system_instruction: mode.persona().voice_instruction().to_string(),
        };
        self.voice.start(connector, microphone, output, &config)
    }

    pub fn stop_voice(&mut self) {
        self.voice.stop();
    }

    pub fn voice_active(&self) -> bool {
        self.voice.is_active()
    }

    pub fn live_transcript(&self) -> &str {
        self.voice.live_transcript()
    }

    /// Commits finished spoken turns as assistant messages and returns their
    /// ids, plus the error that ended the session, if any.
    pub fn pump_voice(&mut self) -> (Vec<MessageId>, Option<VoiceError>) {
        let mut committed = Vec::new();
        let mut failure = None;
        for update in self.voice.poll() {
            match update {
                VoiceUpdate::TurnComplete(text) => {
                    committed.push(self.transcript.push(ConciergeMessage::assistant(text)));
                }
                VoiceUpdate::Closed(err) => failure = err,
                VoiceUpdate::Transcript(_) => {}
            }
        }
        (committed, failure)
    }

    fn emit(&self, event_type: &str, body: serde_json::Value) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.emit(event_type, payload(body));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::{anyhow, Result};
    use atelier_contracts::chat::{Citation, Role};

    use super::{ConciergeSession, ADVICE_FAILURE_TEXT};
    use crate::editing::Mode;
    use crate::gateway::{AdviceReply, AdviceRequest, AiGateway, InlineMedia, VideoRequest};
    use crate::voice::fakes::{FakeConnector, FakeMicrophone, FakeOutput};
    use crate::voice::InboundEvent;

    #[derive(Default)]
    struct ScriptedGateway {
        fail_advice: bool,
        seen: Mutex<Vec<AdviceRequest>>,
        gates: Mutex<HashMap<String, mpsc::Receiver<()>>>,
    }

    impl ScriptedGateway {
        fn gate(&self, prompt: &str) -> mpsc::Sender<()> {
            let (tx, rx) = mpsc::channel();
            if let Ok(mut gates) = self.gates.lock() {
                gates.insert(prompt.to_string(), rx);
            }
            tx
        }
    }

    impl AiGateway for ScriptedGateway {
        fn advise(&self, request: &AdviceRequest) -> Result<AdviceReply> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            if self.fail_advice {
                return Err(anyhow!("advisory service unavailable"));
            }
            Ok(AdviceReply {
                text: format!("Try {0}. [VISUAL_PROMPT: {0}]", request.text),
                citations: vec![Citation {
                    uri: Some("https://example.com".to_string()),
                    title: Some("Example".to_string()),
                }],
            })
        }

        fn generate_image(&self, prompt: &str) -> Result<Option<InlineMedia>> {
            let gate = self.gates.lock().ok().and_then(|mut gates| gates.remove(prompt));
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            Ok(Some(InlineMedia {
                mime_type: "image/png".to_string(),
                bytes: prompt.as_bytes().to_vec(),
            }))
        }

        fn generate_video(&self, _request: &VideoRequest) -> Result<Option<InlineMedia>> {
            Ok(None)
        }
    }

    #[test]
    fn reply_is_stripped_and_visual_follows() -> Result<()> {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut session = ConciergeSession::new(gateway.clone());
        let id = session.send_turn("ivory linen", None, Mode::Director)?;

        let reply = session.message(id).ok_or_else(|| anyhow!("missing reply"))?;
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.text, "Try ivory linen.");
        assert_eq!(reply.sources.len(), 1);
        assert!(reply.generating_visual);

        session.wait_for_visuals(Duration::from_secs(5));
        let reply = session.message(id).ok_or_else(|| anyhow!("missing reply"))?;
        assert!(!reply.generating_visual);
        assert!(reply
            .generated_image
            .as_deref()
            .is_some_and(|uri| uri.starts_with("data:image/png;base64,")));
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0].role, Role::User);
        Ok(())
    }

    #[test]
    fn visuals_land_on_their_own_message_in_any_order() -> Result<()> {
        let gateway = Arc::new(ScriptedGateway::default());
        let release_first = gateway.gate("first");
        let release_second = gateway.gate("second");
        let mut session = ConciergeSession::new(gateway.clone());

        let first = session.send_turn("first", None, Mode::Guest)?;
        let second = session.send_turn("second", None, Mode::Guest)?;
        release_second.send(()).map_err(|_| anyhow!("gate closed"))?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while session.message(second).map(|m| m.generating_visual) == Some(true)
            && Instant::now() < deadline
        {
            session.poll_visuals();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            session.message(second).and_then(|m| m.generated_image.clone()),
            Some(InlineMedia {
                mime_type: "image/png".to_string(),
                bytes: b"second".to_vec(),
            }
            .to_data_uri())
        );
        assert_eq!(session.message(first).map(|m| m.generating_visual), Some(true));

        release_first.send(()).map_err(|_| anyhow!("gate closed"))?;
        session.wait_for_visuals(Duration::from_secs(5));
        assert_eq!(
            session.message(first).and_then(|m| m.generated_image.clone()),
            Some(InlineMedia {
                mime_type: "image/png".to_string(),
                bytes: b"first".to_vec(),
            }
            .to_data_uri())
        );
        assert_eq!(session.pending_visuals(), 0);
        Ok(())
    }

    #[test]
    fn advisory_failure_becomes_fallback_reply() -> Result<()> {
        let gateway = Arc::new(ScriptedGateway {
            fail_advice: true,
            ..ScriptedGateway::default()
        });
        let mut session = ConciergeSession::new(gateway);
        let id = session.send_turn("hello", None, Mode::Guest)?;
        let reply = session.message(id).ok_or_else(|| anyhow!("missing reply"))?;
        assert_eq!(reply.text, ADVICE_FAILURE_TEXT);
        assert!(!reply.generating_visual);
        assert_eq!(session.pending_visuals(), 0);
        Ok(())
    }

    #[test]
    fn each_reply_is_recorded_before_the_next_turn() -> Result<()> {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut session = ConciergeSession::new(gateway.clone());
        let first = session.send_turn("wool", None, Mode::Guest)?;
        let second = session.send_turn("silk", None, Mode::Guest)?;

        let roles: Vec<Role> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(session.messages()[1].id, first);
        assert_eq!(session.messages()[3].id, second);
        assert_eq!(gateway.seen.lock().map(|seen| seen.len()).ok(), Some(2));
        session.wait_for_visuals(Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn image_only_turn_uses_persona_default_text() -> Result<()> {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut session = ConciergeSession::new(gateway.clone());
        assert!(session.send_turn("   ", None, Mode::Director).is_err());
        assert!(session
            .send_turn("", Some("https://x/y.png".to_string()), Mode::Director)
            .is_err());
        assert!(session.messages().is_empty());

        session.send_turn("", Some("data:image/jpeg;base64,AQID".to_string()), Mode::Guest)?;
        let seen = gateway.seen.lock().map_err(|_| anyhow!("poisoned"))?;
        assert_eq!(seen[0].text, "I would love to hear the atelier's suggestion.");
        assert_eq!(seen[0].image.as_ref().map(|m| m.bytes.clone()), Some(vec![1, 2, 3]));
        assert_eq!(
            session.messages()[0].image.as_deref(),
            Some("data:image/jpeg;base64,AQID")
        );
        Ok(())
    }

    #[test]
    fn spoken_turns_are_committed_and_block_typing() -> Result<()> {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut session = ConciergeSession::new(gateway);
        let connector = FakeConnector::scripted(vec![
            InboundEvent::Transcript("Welcome ".to_string()),
            InboundEvent::Transcript("back.".to_string()),
            InboundEvent::TurnComplete,
        ]);
        session
            .start_voice(
                &connector,
                &FakeMicrophone::default(),
                Box::new(FakeOutput::default()),
                Mode::Director,
                "gemini-2.5-flash-native-audio-preview-12-2025",
            )
            .map_err(|err| anyhow!(err))?;
        assert!(session.send_turn("typed", None, Mode::Director).is_err());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut committed = Vec::new();
        while committed.is_empty() && Instant::now() < deadline {
            committed = session.pump_voice().0;
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(committed.len(), 1);
        assert_eq!(
            session.message(committed[0]).map(|m| m.text.as_str()),
            Some("Welcome back.")
        );

        session.stop_voice();
        session.stop_voice();
        assert!(!session.voice_active());
        session.send_turn("typed", None, Mode::Director)?;
        Ok(())
    }
}
