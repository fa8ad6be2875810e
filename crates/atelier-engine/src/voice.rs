use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use atelier_contracts::events::{payload, EventWriter};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;

pub const INPUT_SAMPLE_RATE: u32 = 16_000;
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const CAPTURE_CHUNK_SAMPLES: usize = 4096;
pub const PLAYBACK_QUEUE_DEPTH: usize = 64;
pub const INPUT_MIME: &str = "audio/pcm;rate=16000";
pub const DEFAULT_VOICE_NAME: &str = "Zephyr";

const RECV_TIMEOUT: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Connecting,
    Open,
    Closing,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VoiceErrorKind {
    Microphone,
    Connection,
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceError {
    pub kind: VoiceErrorKind,
    pub message: String,
}

impl VoiceError {
    pub fn microphone(message: impl Into<String>) -> Self {
        Self {
            kind: VoiceErrorKind::Microphone,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: VoiceErrorKind::Connection,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: VoiceErrorKind::Transport,
            message: message.into(),
        }
    }
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for VoiceError {}

/// Parameters of one live conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSessionConfig {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
}

/// What the remote side can send during a live conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Fragment of the spoken reply's transcript.
    Transcript(String),
    TurnComplete,
    /// Base64 PCM16 little-endian mono audio at [`OUTPUT_SAMPLE_RATE`].
    Audio(String),
    Closed,
}

pub trait VoiceTransport: Send {
    /// Sends one base64 PCM16 chunk tagged with [`INPUT_MIME`].
    fn send_audio(&mut self, data_base64: &str) -> Result<(), VoiceError>;
    /// Waits up to `timeout` for the next inbound event.
    fn recv(&mut self, timeout: Duration) -> Result<Option<InboundEvent>, VoiceError>;
    fn close(&mut self);
}

pub trait VoiceConnector {
    fn connect(&self, config: &VoiceSessionConfig) -> Result<Box<dyn VoiceTransport>, VoiceError>;
}

pub trait Microphone {
    fn open(&self, sample_rate: u32, chunk_samples: usize) -> anyhow::Result<Box<dyn CaptureStream>>;
}

pub trait CaptureStream: Send {
    /// Next captured chunk, or `None` when nothing is ready yet.
    fn poll(&mut self) -> anyhow::Result<Option<Vec<f32>>>;
    fn release(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate.max(1))
    }
}

pub trait AudioOutput: Send {
    /// Current position of the output clock, in seconds.
    fn now(&self) -> f64;
    fn play(&mut self, frame: &AudioFrame, start_at: f64) -> anyhow::Result<()>;
    /// Silences every frame scheduled so far.
    fn stop_all(&mut self);
    fn close(&mut self);
}

/// Queues frames back to back on the output clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackScheduler {
    next_start: f64,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns when a frame of `duration` should start, given the clock is at `now`.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start = self.next_start.max(now);
        self.next_start = start + duration;
        start
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn reset(&mut self) {
        self.next_start = 0.0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceUpdate {
    /// Transcript of the reply so far in the current turn.
    Transcript(String),
    /// The finished turn's transcript, committed once.
    TurnComplete(String),
    /// The session ended on its own; carries the cause when it was an error.
    Closed(Option<VoiceError>),
}

pub fn encode_pcm16(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(bytes)
}

pub fn decode_pcm16(data_base64: &str) -> anyhow::Result<Vec<f32>> {
    let bytes = BASE64.decode(data_base64.trim().as_bytes())?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// A live, full-duplex spoken conversation.
///
/// Capture and the network run on one worker thread; decoded reply audio goes
/// through a bounded queue to a playback thread that owns the output. Stopping
/// joins both, so after [`VoiceSession::stop`] returns nothing is audible and the
/// microphone is released.
pub struct VoiceSession {
    state: VoiceState,
    stop_flag: Option<Arc<AtomicBool>>,
    worker: Option<thread::JoinHandle<()>>,
    playback: Option<thread::JoinHandle<()>>,
    updates: Option<mpsc::Receiver<VoiceUpdate>>,
    live_transcript: String,
    events: Option<EventWriter>,
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceSession {
    pub fn new() -> Self {
        Self {
            state: VoiceState::Idle,
            stop_flag: None,
            worker: None,
            playback: None,
            updates: None,
            live_transcript: String::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != VoiceState::Idle
    }

    pub fn live_transcript(&self) -> &str {
        &self.live_transcript
    }

    pub fn start(
        &mut self,
        connector: &dyn VoiceConnector,
        microphone: &dyn Microphone,
        mut output: Box<dyn AudioOutput>,
        config: &VoiceSessionConfig,
    ) -> Result<(), VoiceError> {
        if self.state == VoiceState::Open {
            return Ok(());
        }
        if self.state != VoiceState::Idle {
            return Err(VoiceError::connection("voice session is busy"));
        }
        self.state = VoiceState::Connecting;
        self.emit("voice_connecting", json!({ "model": config.model }));

        let mut capture = match microphone.open(INPUT_SAMPLE_RATE, CAPTURE_CHUNK_SAMPLES) {
            Ok(capture) => capture,
            Err(err) => {
                output.close();
                return Err(self.fail(VoiceError::microphone(format!(
                    "microphone unavailable: {err:#}"
                ))));
            }
        };
        let transport = match connector.connect(config) {
            Ok(transport) => transport,
            Err(err) => {
                capture.release();
                output.close();
                return Err(self.fail(err));
            }
        };

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (audio_tx, audio_rx) = mpsc::sync_channel::<AudioFrame>(PLAYBACK_QUEUE_DEPTH);
        let (update_tx, update_rx) = mpsc::channel();

        let playback_stop = Arc::clone(&stop_flag);
        let playback = thread::Builder::new()
            .name("atelier-voice-playback".to_string())
            .spawn(move || run_playback(output, audio_rx, playback_stop));
        let playback = match playback {
            Ok(handle) => handle,
            Err(err) => {
                capture.release();
                let mut transport = transport;
                transport.close();
                return Err(self.fail(VoiceError::connection(format!(
                    "playback thread spawn failed: {err}"
                ))));
            }
        };

        let worker = VoiceWorker::new(
            transport,
            capture,
            audio_tx,
            update_tx,
            Arc::clone(&stop_flag),
        );
        let worker = match thread::Builder::new()
            .name("atelier-voice-worker".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                // The unspawned closure has been dropped, and the worker with
                // it, so the transport and capture are already released.
                stop_flag.store(true, Ordering::SeqCst);
                let _ = playback.join();
                return Err(self.fail(VoiceError::connection(format!(
                    "voice thread spawn failed: {err}"
                ))));
            }
        };

        self.stop_flag = Some(stop_flag);
        self.worker = Some(worker);
        self.playback = Some(playback);
        self.updates = Some(update_rx);
        self.live_transcript.clear();
        self.state = VoiceState::Open;
        self.emit("voice_started", json!({ "model": config.model }));
        Ok(())
    }

    /// Drains pending updates. A remote close or transport failure returns the
    /// session to `Idle` here.
    pub fn poll(&mut self) -> Vec<VoiceUpdate> {
        let Some(updates) = self.updates.as_ref() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut closed: Option<Option<VoiceError>> = None;
        while let Ok(update) = updates.try_recv() {
            match &update {
                VoiceUpdate::Transcript(text) => self.live_transcript = text.clone(),
                VoiceUpdate::TurnComplete(text) => {
                    self.live_transcript.clear();
                    self.emit("voice_turn_complete", json!({ "chars": text.chars().count() }));
                }
                VoiceUpdate::Closed(err) => closed = Some(err.clone()),
            }
            out.push(update);
        }
        if let Some(err) = closed {
            if let Some(err) = err.as_ref() {
                self.emit(
                    "voice_failed",
                    json!({ "kind": format!("{:?}", err.kind), "error": err.message }),
                );
            }
            self.shutdown();
        }
        out
    }

    /// Ends the conversation. Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        if self.state == VoiceState::Idle {
            return;
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.state = VoiceState::Closing;
        if let Some(flag) = self.stop_flag.take() {
            flag.store(true, Ordering::SeqCst);
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.playback.take() {
            let _ = handle.join();
        }
        self.updates = None;
        self.live_transcript.clear();
        self.state = VoiceState::Idle;
        self.emit("voice_stopped", json!({}));
    }

    fn fail(&mut self, err: VoiceError) -> VoiceError {
        self.state = VoiceState::Idle;
        self.emit(
            "voice_failed",
            json!({ "kind": format!("{:?}", err.kind), "error": err.message }),
        );
        err
    }

    fn emit(&self, event_type: &str, body: serde_json::Value) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.emit(event_type, payload(body));
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns the live devices. They are released exactly once, by `run` or, if the
/// worker never ran, on drop.
struct VoiceWorker {
    transport: Box<dyn VoiceTransport>,
    capture: Box<dyn CaptureStream>,
    audio_tx: Option<mpsc::SyncSender<AudioFrame>>,
    updates: mpsc::Sender<VoiceUpdate>,
    stop_flag: Arc<AtomicBool>,
    released: bool,
}

impl VoiceWorker {
    fn new(
        transport: Box<dyn VoiceTransport>,
        capture: Box<dyn CaptureStream>,
        audio_tx: mpsc::SyncSender<AudioFrame>,
        updates: mpsc::Sender<VoiceUpdate>,
        stop_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            capture,
            audio_tx: Some(audio_tx),
            updates,
            stop_flag,
            released: false,
        }
    }

    fn run(mut self) {
        let outcome = self.run_inner();
        self.release_devices();
        // Dropping the sender lets the playback thread drain and exit.
        self.audio_tx = None;
        match outcome {
            Ok(true) => {
                let _ = self.updates.send(VoiceUpdate::Closed(None));
            }
            Ok(false) => {}
            Err(err) => {
                let _ = self.updates.send(VoiceUpdate::Closed(Some(err)));
            }
        }
    }

    fn release_devices(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.transport.close();
        self.capture.release();
    }

    /// Returns `Ok(true)` when the remote side ended the session.
    fn run_inner(&mut self) -> Result<bool, VoiceError> {
        let mut transcript = String::new();
        while !self.stop_flag.load(Ordering::SeqCst) {
            loop {
                match self.capture.poll() {
                    Ok(Some(chunk)) => self.transport.send_audio(&encode_pcm16(&chunk))?,
                    Ok(None) => break,
                    Err(err) => {
                        return Err(VoiceError::microphone(format!("capture failed: {err:#}")))
                    }
                }
            }

            match self.transport.recv(RECV_TIMEOUT)? {
                Some(InboundEvent::Transcript(fragment)) => {
                    transcript.push_str(&fragment);
                    let _ = self.updates.send(VoiceUpdate::Transcript(transcript.clone()));
                }
                Some(InboundEvent::TurnComplete) => {
                    let text = std::mem::take(&mut transcript);
                    if !text.trim().is_empty() {
                        let _ = self.updates.send(VoiceUpdate::TurnComplete(text));
                    }
                }
                Some(InboundEvent::Audio(data)) => {
                    let samples = decode_pcm16(&data).map_err(|err| {
                        VoiceError::transport(format!("audio decode failed: {err:#}"))
                    })?;
                    if samples.is_empty() {
                        continue;
                    }
                    let frame = AudioFrame {
                        samples,
                        sample_rate: OUTPUT_SAMPLE_RATE,
                    };
                    let delivered = self
                        .audio_tx
                        .as_ref()
                        .is_some_and(|tx| tx.send(frame).is_ok());
                    if !delivered {
                        return Err(VoiceError::transport("playback stopped unexpectedly"));
                    }
                }
                Some(InboundEvent::Closed) => return Ok(true),
                None => {}
            }
        }
        Ok(false)
    }
}

impl Drop for VoiceWorker {
    fn drop(&mut self) {
        self.release_devices();
    }
}

fn run_playback(
    mut output: Box<dyn AudioOutput>,
    frames: mpsc::Receiver<AudioFrame>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut scheduler = PlaybackScheduler::new();
    for frame in frames {
        if stop_flag.load(Ordering::SeqCst) {
            continue;
        }
        let start = scheduler.schedule(output.now(), frame.duration_secs());
        if output.play(&frame, start).is_err() {
            break;
        }
    }
    output.stop_all();
    output.close();
    scheduler.reset();
}
