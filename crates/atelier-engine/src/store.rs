use std::fmt;

use anyhow::{bail, Result};
use atelier_contracts::content::{
    decode_snapshot, default_content, ContentState, HeritageEntry, MediaRef, PersistedSnapshot,
    WeeklyObject, STORAGE_KEY,
};
use atelier_contracts::events::{payload, EventWriter};
use atelier_contracts::storage::SlotStore;
use serde_json::json;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrateOutcome {
    /// A snapshot was found; `defaulted` lists fields that fell back.
    Restored { defaulted: Vec<&'static str> },
    FirstRun,
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotHydrated,
    EntryGateShown,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotHydrated => write!(f, "content has not been hydrated"),
            Self::EntryGateShown => write!(f, "entry gate is still shown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Written { bytes: usize, fingerprint: String },
    Skipped(SkipReason),
    Failed(String),
}

impl PersistOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Full-value replacement of one top-level field, or one heritage entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentMutation {
    HeroHeading(String),
    HeroMedia(String),
    Heritage { index: usize, entry: HeritageEntry },
    WeeklyObject(WeeklyObject),
    DreamImage(Option<String>),
}

impl ContentMutation {
    fn field(&self) -> &'static str {
        match self {
            Self::HeroHeading(_) => "heroHeading",
            Self::HeroMedia(_) => "heroVideo",
            Self::Heritage { .. } => "heritageData",
            Self::WeeklyObject(_) => "weeklyObject",
            Self::DreamImage(_) => "dreamImage",
        }
    }
}

/// Single owner of the editable content.
///
/// Nothing is written back until the store has been hydrated and the entry
/// gate dismissed, so a first paint can never overwrite saved content with
/// defaults. After that every mutation rewrites the whole snapshot.
pub struct ContentStore<S: SlotStore> {
    slot: S,
    events: Option<EventWriter>,
    state: ContentState,
    hydrated: bool,
    entry_gate_shown: bool,
}

impl<S: SlotStore> ContentStore<S> {
    pub fn new(slot: S) -> Self {
        Self {
            slot,
            events: None,
            state: default_content(),
            hydrated: false,
            entry_gate_shown: true,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &ContentState {
        &self.state
    }

    pub fn snapshot(&self) -> PersistedSnapshot {
        PersistedSnapshot::capture(&self.state)
    }

    pub fn slot(&self) -> &S {
        &self.slot
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn entry_gate_shown(&self) -> bool {
        self.entry_gate_shown
    }

    pub fn hydrate(&mut self) -> Result<HydrateOutcome> {
        if self.hydrated {
            bail!("content store is already hydrated");
        }
        let raw = match self.slot.get(STORAGE_KEY) {
            Ok(raw) => raw,
            Err(err) => {
                self.emit(
                    "persist_failed",
                    json!({ "stage": "read", "error": format!("{err:#}") }),
                );
                None
            }
        };

        let outcome = match raw {
            None => {
                self.state = default_content();
                HydrateOutcome::FirstRun
            }
            Some(raw) => {
                let decoded = decode_snapshot(&raw);
                self.state = decoded.state;
                if decoded.malformed {
                    HydrateOutcome::Malformed
                } else {
                    HydrateOutcome::Restored {
                        defaulted: decoded.defaulted,
                    }
                }
            }
        };
        self.hydrated = true;

        let (label, defaulted) = match &outcome {
            HydrateOutcome::Restored { defaulted } => ("restored", defaulted.clone()),
            HydrateOutcome::FirstRun => ("first_run", Vec::new()),
            HydrateOutcome::Malformed => ("malformed", Vec::new()),
        };
        self.emit(
            "content_hydrated",
            json!({
                "outcome": label,
                "defaulted": defaulted,
                "hero_media": self.state.hero.media.kind.label(),
            }),
        );
        Ok(outcome)
    }

    pub fn dismiss_entry_gate(&mut self) -> PersistOutcome {
        self.entry_gate_shown = false;
        self.persist()
    }

    pub fn mutate(&mut self, mutation: ContentMutation) -> Result<PersistOutcome> {
        let field = mutation.field();
        let mut index = None;
        match mutation {
            ContentMutation::HeroHeading(heading) => self.state.hero.heading = heading,
            ContentMutation::HeroMedia(uri) => self.state.hero.media = MediaRef::classify(uri),
            ContentMutation::Heritage { index: at, entry } => {
                let count = self.state.heritage.len();
                let Some(slot) = self.state.heritage.get_mut(at) else {
                    bail!("heritage index {at} out of range (0..{count})");
                };
                *slot = entry;
                index = Some(at);
            }
            ContentMutation::WeeklyObject(weekly) => self.state.weekly = weekly,
            ContentMutation::DreamImage(image) => self.state.dream.image = image,
        }
        self.emit("content_mutated", json!({ "field": field, "index": index }));
        Ok(self.persist())
    }

    /// Updates the transient dream fields. These are never persisted.
    pub fn set_dream_progress(&mut self, prompt: &str, loading: bool, status: &str) {
        self.state.dream.prompt = prompt.to_string();
        self.state.dream.loading = loading;
        self.state.dream.status = status.to_string();
    }

    pub fn persist(&mut self) -> PersistOutcome {
        if !self.hydrated {
            return PersistOutcome::Skipped(SkipReason::NotHydrated);
        }
        if self.entry_gate_shown {
            return PersistOutcome::Skipped(SkipReason::EntryGateShown);
        }

        let encoded = match self.snapshot().to_json() {
            Ok(encoded) => encoded,
            Err(err) => return self.persist_failed(&err),
        };
        if let Err(err) = self.slot.set(STORAGE_KEY, &encoded) {
            return self.persist_failed(&err);
        }

        let fingerprint = hex::encode(Sha256::digest(encoded.as_bytes()));
        self.emit(
            "content_persisted",
            json!({ "bytes": encoded.len(), "fingerprint": fingerprint }),
        );
        PersistOutcome::Written {
            bytes: encoded.len(),
            fingerprint,
        }
    }

    fn persist_failed(&self, err: &anyhow::Error) -> PersistOutcome {
        let message = format!("{err:#}");
        self.emit(
            "persist_failed",
            json!({ "stage": "write", "error": message }),
        );
        PersistOutcome::Failed(message)
    }

    fn emit(&self, event_type: &str, body: serde_json::Value) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.emit(event_type, payload(body));
        }
    }
}
