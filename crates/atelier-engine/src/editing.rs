use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use atelier_contracts::content::{ContentState, HeritageEntry, WeeklyObject};
use atelier_contracts::events::{payload, EventWriter};
use atelier_contracts::storage::SlotStore;
use serde_json::json;
use similar::TextDiff;

use crate::gateway::{AiGateway, InlineMedia, Persona, VideoRequest};
use crate::media::{extension_for_mime, MediaNormalizer};
use crate::store::{ContentMutation, ContentStore, PersistOutcome};

pub const TOAST_DURATION: Duration = Duration::from_secs(3);

pub const FILM_IN_PROGRESS: &str = "Mori is developing a new atmosphere for the atelier...";
pub const FILM_DELAYED: &str = "Development delayed. Please try again shortly.";

const TOAST_HERITAGE_IMAGE: &str = "The heritage has been recorded.";
const TOAST_HERITAGE_TEXT: &str = "The story has been newly inscribed.";
const TOAST_WEEKLY_IMAGE: &str = "The masterpiece has been newly developed.";
const TOAST_WEEKLY_URL: &str = "The image has been applied.";
const TOAST_DREAM_CREATED: &str = "A masterpiece has been born.";
const TOAST_DREAM_FAILED: &str = "Development error.";
const TOAST_ARCHIVED: &str = "The masterpiece has been archived.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Director,
    Guest,
}

impl Mode {
    pub fn persona(self) -> Persona {
        match self {
            Self::Director => Persona::Director,
            Self::Guest => Persona::Guest,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "director" => Some(Self::Director),
            "guest" => Some(Self::Guest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Director => "director",
            Self::Guest => "guest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailView {
    Product(String),
    Heritage(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub message: String,
    pub shown_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeritageDraft {
    pub index: usize,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The stored media reference.
    Created(String),
    /// The service answered without any media.
    Empty,
    Failed(String),
}

/// Interaction state layered over the content store: mode, in-progress edits,
/// the open detail view and lightbox, and the transient toast.
pub struct EditingController {
    mode: Mode,
    saving: bool,
    upload_target: Option<usize>,
    draft: Option<HeritageDraft>,
    detail: Option<DetailView>,
    lightbox: Option<String>,
    toast: Option<Toast>,
    film_running: bool,
    film_status: Option<String>,
    events: Option<EventWriter>,
}

impl EditingController {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            saving: false,
            upload_target: None,
            draft: None,
            detail: None,
            lightbox: None,
            toast: None,
            film_running: false,
            film_status: None,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub fn upload_target(&self) -> Option<usize> {
        self.upload_target
    }

    pub fn draft(&self) -> Option<&HeritageDraft> {
        self.draft.as_ref()
    }

    pub fn detail(&self) -> Option<&DetailView> {
        self.detail.as_ref()
    }

    pub fn lightbox(&self) -> Option<&str> {
        self.lightbox.as_deref()
    }

    pub fn film_status(&self) -> Option<&str> {
        self.film_status.as_deref()
    }

    pub fn enter_atelier<S: SlotStore>(&mut self, store: &mut ContentStore<S>) -> PersistOutcome {
        store.dismiss_entry_gate()
    }

    pub fn show_toast(&mut self, message: &str) {
        self.show_toast_at(message, Instant::now());
    }

    /// Replaces whatever toast is showing.
    pub fn show_toast_at(&mut self, message: &str, now: Instant) {
        self.toast = Some(Toast {
            message: message.to_string(),
            shown_at: now,
        });
        self.emit("toast_shown", json!({ "message": message }));
    }

    pub fn visible_toast(&self, now: Instant) -> Option<&str> {
        self.toast
            .as_ref()
            .filter(|toast| now.saturating_duration_since(toast.shown_at) < TOAST_DURATION)
            .map(|toast| toast.message.as_str())
    }

    pub fn begin_heritage_upload(&mut self, index: usize, state: &ContentState) -> Result<()> {
        self.require_director()?;
        check_heritage_index(state, index)?;
        self.upload_target = Some(index);
        Ok(())
    }

    pub fn cancel_heritage_upload(&mut self) {
        self.upload_target = None;
    }

    pub fn complete_heritage_upload<S: SlotStore>(
        &mut self,
        store: &mut ContentStore<S>,
        normalizer: &MediaNormalizer,
        raw: &str,
    ) -> Result<PersistOutcome> {
        self.require_director()?;
        let Some(index) = self.upload_target else {
            bail!("no heritage tile is awaiting an image");
        };
        let outcome = self.while_saving(|| {
            let mut entry = heritage_entry(store.state(), index)?;
            entry.image = normalizer.normalize(raw);
            store.mutate(ContentMutation::Heritage { index, entry })
        })?;
        self.upload_target = None;
        self.show_toast(TOAST_HERITAGE_IMAGE);
        Ok(outcome)
    }

    pub fn begin_heritage_text_edit(&mut self, index: usize, state: &ContentState) -> Result<()> {
        self.require_director()?;
        let entry = heritage_entry(state, index)?;
        self.draft = Some(HeritageDraft {
            index,
            title: entry.title,
            description: entry.description,
        });
        Ok(())
    }

    pub fn update_heritage_draft(&mut self, title: &str, description: &str) -> Result<()> {
        let Some(draft) = self.draft.as_mut() else {
            bail!("no heritage story is being edited");
        };
        draft.title = title.to_string();
        draft.description = description.to_string();
        Ok(())
    }

    pub fn cancel_heritage_text_edit(&mut self) {
        self.draft = None;
    }

    pub fn save_heritage_text_edit<S: SlotStore>(
        &mut self,
        store: &mut ContentStore<S>,
    ) -> Result<PersistOutcome> {
        self.require_director()?;
        let Some(draft) = self.draft.clone() else {
            bail!("no heritage story is being edited");
        };
        let previous = heritage_entry(store.state(), draft.index)?;
        let diff = TextDiff::from_lines(previous.description.as_str(), draft.description.as_str())
            .unified_diff()
            .header("before", "after")
            .to_string();
        let entry = HeritageEntry {
            image: previous.image.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
        };
        let outcome = store.mutate(ContentMutation::Heritage {
            index: draft.index,
            entry,
        })?;
        self.emit(
            "heritage_text_revised",
            json!({
                "index": draft.index,
                "title_changed": previous.title != draft.title,
                "diff": diff,
            }),
        );
        self.draft = None;
        self.show_toast(TOAST_HERITAGE_TEXT);
        Ok(outcome)
    }

    pub fn upload_weekly_image<S: SlotStore>(
        &mut self,
        store: &mut ContentStore<S>,
        normalizer: &MediaNormalizer,
        raw: &str,
    ) -> Result<PersistOutcome> {
        self.require_director()?;
        let outcome = self.while_saving(|| {
            let weekly = WeeklyObject {
                image: normalizer.normalize(raw),
                ..store.state().weekly.clone()
            };
            store.mutate(ContentMutation::WeeklyObject(weekly))
        })?;
        self.show_toast(TOAST_WEEKLY_IMAGE);
        Ok(outcome)
    }

    /// Points the weekly object at a remote image. Blank input is ignored.
    pub fn set_weekly_image_url<S: SlotStore>(
        &mut self,
        store: &mut ContentStore<S>,
        url: &str,
    ) -> Result<Option<PersistOutcome>> {
        self.require_director()?;
        let url = url.trim();
        if url.is_empty() {
            return Ok(None);
        }
        let weekly = WeeklyObject {
            image: url.to_string(),
            ..store.state().weekly.clone()
        };
        let outcome = store.mutate(ContentMutation::WeeklyObject(weekly))?;
        self.show_toast(TOAST_WEEKLY_URL);
        Ok(Some(outcome))
    }

    pub fn edit_hero_heading<S: SlotStore>(
        &mut self,
        store: &mut ContentStore<S>,
        heading: &str,
    ) -> Result<PersistOutcome> {
        self.require_director()?;
        store.mutate(ContentMutation::HeroHeading(heading.to_string()))
    }

    pub fn set_hero_media<S: SlotStore>(
        &mut self,
        store: &mut ContentStore<S>,
        normalizer: &MediaNormalizer,
        raw: &str,
    ) -> Result<PersistOutcome> {
        self.require_director()?;
        self.while_saving(|| store.mutate(ContentMutation::HeroMedia(normalizer.normalize(raw))))
    }

    pub fn open_product_detail(&mut self, state: &ContentState, id: &str) -> Result<()> {
        if !state.products.iter().any(|product| product.id == id) {
            bail!("unknown product '{id}'");
        }
        self.detail = Some(DetailView::Product(id.to_string()));
        Ok(())
    }

    pub fn open_heritage_detail(&mut self, state: &ContentState, index: usize) -> Result<()> {
        check_heritage_index(state, index)?;
        self.detail = Some(DetailView::Heritage(index));
        Ok(())
    }

    pub fn close_detail(&mut self) {
        self.detail = None;
    }

    pub fn open_lightbox(&mut self, uri: &str) {
        self.lightbox = Some(uri.to_string());
    }

    pub fn close_lightbox(&mut self) {
        self.lightbox = None;
    }

    pub fn generate_dream<S: SlotStore>(
        &mut self,
        store: &mut ContentStore<S>,
        gateway: &dyn AiGateway,
        normalizer: &MediaNormalizer,
        prompt: &str,
    ) -> Result<GenerationOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            bail!("dream prompt is empty");
        }
        if store.state().dream.loading {
            bail!("a dream is already being developed");
        }
        store.set_dream_progress(prompt, true, self.mode.persona().dream_status());

        let outcome = match gateway.generate_image(prompt) {
            Ok(Some(image)) => {
                let stored = normalizer.normalize(&image.to_data_uri());
                match store.mutate(ContentMutation::DreamImage(Some(stored.clone()))) {
                    Ok(_) => {
                        self.emit(
                            "dream_created",
                            json!({ "prompt": prompt, "bytes": stored.len() }),
                        );
                        self.show_toast(TOAST_DREAM_CREATED);
                        GenerationOutcome::Created(stored)
                    }
                    Err(err) => self.dream_failed(prompt, &err),
                }
            }
            Ok(None) => GenerationOutcome::Empty,
            Err(err) => self.dream_failed(prompt, &err),
        };

        store.set_dream_progress("", false, "");
        Ok(outcome)
    }

    /// Replaces the hero media with a generated film, optionally seeded with
    /// the current hero image when that image is inline.
    pub fn develop_hero_film<S: SlotStore>(
        &mut self,
        store: &mut ContentStore<S>,
        gateway: &dyn AiGateway,
        use_current_image: bool,
    ) -> Result<GenerationOutcome> {
        self.require_director()?;
        if self.film_running {
            bail!("a hero film is already being developed");
        }
        let hero = &store.state().hero.media;
        let seed_image = if use_current_image && hero.is_inline_image() {
            InlineMedia::from_data_uri(&hero.uri)
        } else {
            None
        };
        self.emit(
            "film_requested",
            json!({ "seeded": seed_image.is_some() }),
        );
        self.film_running = true;
        self.film_status = Some(FILM_IN_PROGRESS.to_string());

        let result = gateway
            .generate_video(&VideoRequest { seed_image })
            .and_then(|video| match video {
                Some(video) => {
                    let uri = video.to_data_uri();
                    store.mutate(ContentMutation::HeroMedia(uri.clone()))?;
                    Ok(Some((uri, video.mime_type)))
                }
                None => Ok(None),
            });
        self.film_running = false;

        Ok(match result {
            Ok(Some((uri, mime_type))) => {
                self.film_status = None;
                self.emit(
                    "film_ready",
                    json!({ "mime_type": mime_type, "bytes": uri.len() }),
                );
                GenerationOutcome::Created(uri)
            }
            Ok(None) => {
                self.film_status = None;
                GenerationOutcome::Empty
            }
            Err(err) => {
                let message = format!("{err:#}");
                self.film_status = Some(FILM_DELAYED.to_string());
                self.emit("film_failed", json!({ "error": message }));
                GenerationOutcome::Failed(message)
            }
        })
    }

    /// Writes an inline image or film to `dir` and returns the written path.
    pub fn archive_media(&mut self, uri: &str, dir: &Path, stem: &str) -> Result<PathBuf> {
        let Some(media) = InlineMedia::from_data_uri(uri) else {
            bail!("only inline media can be archived");
        };
        fs::create_dir_all(dir).with_context(|| format!("failed creating {}", dir.display()))?;
        let path = dir.join(format!("{stem}.{}", extension_for_mime(&media.mime_type)));
        fs::write(&path, &media.bytes)
            .with_context(|| format!("failed writing {}", path.display()))?;
        self.show_toast(TOAST_ARCHIVED);
        Ok(path)
    }

    fn dream_failed(&mut self, prompt: &str, err: &anyhow::Error) -> GenerationOutcome {
        let message = format!("{err:#}");
        self.emit(
            "dream_failed",
            json!({ "prompt": prompt, "error": message }),
        );
        self.show_toast(TOAST_DREAM_FAILED);
        GenerationOutcome::Failed(message)
    }

    fn while_saving<T>(&mut self, work: impl FnOnce() -> Result<T>) -> Result<T> {
        self.saving = true;
        let result = work();
        self.saving = false;
        result
    }

    fn require_director(&self) -> Result<()> {
        if self.mode != Mode::Director {
            bail!("editing requires director mode");
        }
        Ok(())
    }

    fn emit(&self, event_type: &str, body: serde_json::Value) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.emit(event_type, payload(body));
        }
    }
}

fn check_heritage_index(state: &ContentState, index: usize) -> Result<()> {
    if index >= state.heritage.len() {
        bail!(
            "heritage index {index} out of range (0..{})",
            state.heritage.len()
        );
    }
    Ok(())
}

fn heritage_entry(state: &ContentState, index: usize) -> Result<HeritageEntry> {
    check_heritage_index(state, index)?;
    Ok(state.heritage[index].clone())
}
