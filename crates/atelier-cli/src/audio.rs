//! Raw PCM file stand-ins for the microphone and speaker, so a voice session
//! can run headless: capture replays a signed 16-bit little-endian mono file
//! at the capture rate, and playback appends reply audio to another file.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use atelier_engine::voice::{AudioFrame, AudioOutput, CaptureStream, Microphone};

pub struct PcmFileMicrophone {
    path: PathBuf,
}

impl PcmFileMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Microphone for PcmFileMicrophone {
    fn open(&self, sample_rate: u32, chunk_samples: usize) -> Result<Box<dyn CaptureStream>> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        let chunk_samples = chunk_samples.max(1);
        Ok(Box::new(PcmFileCapture {
            samples: pcm16_to_samples(&bytes),
            cursor: 0,
            chunk_samples,
            chunk_duration: Duration::from_secs_f64(
                chunk_samples as f64 / f64::from(sample_rate.max(1)),
            ),
            next_due: Instant::now(),
        }))
    }
}

struct PcmFileCapture {
    samples: Vec<f32>,
    cursor: usize,
    chunk_samples: usize,
    chunk_duration: Duration,
    next_due: Instant,
}

impl CaptureStream for PcmFileCapture {
    fn poll(&mut self) -> Result<Option<Vec<f32>>> {
        if self.cursor >= self.samples.len() || Instant::now() < self.next_due {
            return Ok(None);
        }
        let end = (self.cursor + self.chunk_samples).min(self.samples.len());
        let chunk = self.samples[self.cursor..end].to_vec();
        self.cursor = end;
        self.next_due += self.chunk_duration;
        Ok(Some(chunk))
    }

    fn release(&mut self) {
        self.cursor = self.samples.len();
    }
}

/// Writes reply audio to a PCM file as the output clock reaches it.
///
/// Frames wait in `pending` until their scheduled time has passed, so
/// `stop_all` can drop whatever has not been heard yet; the frame playing at
/// that moment is cut at the clock position. Gaps between frames are padded
/// with silence so the file lines up with the clock.
pub struct PcmFileOutput {
    writer: Option<BufWriter<File>>,
    started: Instant,
    skew: f64,
    written_until: f64,
    pending: VecDeque<Scheduled>,
}

struct Scheduled {
    start: f64,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Scheduled {
    fn end(&self) -> f64 {
        self.start + self.samples.len() as f64 / f64::from(self.sample_rate.max(1))
    }

    fn samples_before(&self, at: f64) -> usize {
        let elapsed = (at - self.start).max(0.0);
        ((elapsed * f64::from(self.sample_rate)).floor() as usize).min(self.samples.len())
    }
}

impl PcmFileOutput {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file =
            File::create(path).with_context(|| format!("failed creating {}", path.display()))?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            started: Instant::now(),
            skew: 0.0,
            written_until: 0.0,
            pending: VecDeque::new(),
        })
    }

    #[cfg(test)]
    fn advance(&mut self, secs: f64) {
        self.skew += secs;
    }

    fn write_frame(&mut self, frame: &Scheduled, samples: usize) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            anyhow::bail!("audio output is closed");
        };
        let gap = frame.start - self.written_until;
        if gap > 0.0 {
            let silence = (gap * f64::from(frame.sample_rate)).round() as usize;
            writer.write_all(&vec![0u8; silence * 2])?;
        }
        writer.write_all(&samples_to_pcm16(&frame.samples[..samples]))?;
        self.written_until = frame.start.max(self.written_until)
            + samples as f64 / f64::from(frame.sample_rate.max(1));
        Ok(())
    }

    /// Writes every frame that has finished playing by `now`.
    fn drain_heard(&mut self, now: f64) -> Result<()> {
        while self.pending.front().is_some_and(|frame| frame.end() <= now) {
            if let Some(frame) = self.pending.pop_front() {
                let len = frame.samples.len();
                self.write_frame(&frame, len)?;
            }
        }
        Ok(())
    }
}

impl AudioOutput for PcmFileOutput {
    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64() + self.skew
    }

    fn play(&mut self, frame: &AudioFrame, start_at: f64) -> Result<()> {
        if self.writer.is_none() {
            anyhow::bail!("audio output is closed");
        }
        self.pending.push_back(Scheduled {
            start: start_at,
            samples: frame.samples.clone(),
            sample_rate: frame.sample_rate,
        });
        self.drain_heard(self.now())
    }

    fn stop_all(&mut self) {
        let now = self.now();
        let _ = self.drain_heard(now);
        while let Some(frame) = self.pending.pop_front() {
            let heard = frame.samples_before(now);
            if heard > 0 {
                let _ = self.write_frame(&frame, heard);
            }
        }
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }

    fn close(&mut self) {
        self.stop_all();
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

fn pcm16_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
