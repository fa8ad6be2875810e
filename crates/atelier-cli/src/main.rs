mod audio;

use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use atelier_contracts::chat::{parse_command, ChatCommand, ConciergeMessage, CHAT_HELP_COMMANDS};
use atelier_contracts::content::ContentState;
use atelier_contracts::events::{payload, EventWriter};
use atelier_contracts::storage::FileSlotStore;
use atelier_engine::concierge::ConciergeSession;
use atelier_engine::config::AtelierConfig;
use atelier_engine::editing::{EditingController, GenerationOutcome, Mode};
use atelier_engine::gateway::{AiGateway, GeminiGateway};
use atelier_engine::live::GeminiLiveConnector;
use atelier_engine::media::{file_to_data_uri, MediaNormalizer};
use atelier_engine::store::{ContentStore, HydrateOutcome, PersistOutcome};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use uuid::Uuid;

use crate::audio::{PcmFileMicrophone, PcmFileOutput};

const VISUAL_DRAIN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Atelier content editor and concierge")]
struct Cli {
    /// Directory holding the persisted content slot and the event log.
    #[arg(long, global = true, default_value = ".atelier")]
    state_dir: PathBuf,
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the current content.
    Show,
    Hero(HeroArgs),
    HeritageImage(HeritageImageArgs),
    HeritageText(HeritageTextArgs),
    WeeklyImage(WeeklyImageArgs),
    Dream(DreamArgs),
    Film(FilmArgs),
    Archive(ArchiveArgs),
    Chat(ChatArgs),
}

#[derive(Debug, Args)]
struct HeroArgs {
    #[arg(long)]
    heading: Option<String>,
    /// Image or video file, or a remote/embedded-stream URL.
    #[arg(long)]
    media: Option<String>,
}

#[derive(Debug, Args)]
struct HeritageImageArgs {
    #[arg(long)]
    index: usize,
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct HeritageTextArgs {
    #[arg(long)]
    index: usize,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Args)]
struct WeeklyImageArgs {
    #[arg(long, conflicts_with = "url")]
    file: Option<PathBuf>,
    #[arg(long)]
    url: Option<String>,
}

#[derive(Debug, Args)]
struct DreamArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    guest: bool,
    /// Also archive the dream image into this directory.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct FilmArgs {
    /// Seed the film with the current hero image when it is inline.
    #[arg(long)]
    from_image: bool,
}

#[derive(Debug, Args)]
struct ArchiveArgs {
    /// `dream` or `hero`.
    #[arg(long, default_value = "dream")]
    what: String,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[arg(long)]
    guest: bool,
    /// Archive generated visuals into this directory.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Raw s16le mono PCM replayed as the microphone for /voice_start.
    #[arg(long)]
    voice_input: Option<PathBuf>,
    /// Where reply audio is written as raw s16le mono PCM.
    #[arg(long)]
    voice_output: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut atelier = Atelier::open(&cli)?;
    match cli.command {
        Command::Show => {
            println!("API: {}", atelier.config.api_key_status().message);
            print_content(atelier.store.state(), atelier.store.entry_gate_shown());
            Ok(0)
        }
        Command::Hero(args) => atelier.run_hero(args),
        Command::HeritageImage(args) => atelier.run_heritage_image(args),
        Command::HeritageText(args) => atelier.run_heritage_text(args),
        Command::WeeklyImage(args) => atelier.run_weekly_image(args),
        Command::Dream(args) => atelier.run_dream(args),
        Command::Film(args) => atelier.run_film(args),
        Command::Archive(args) => atelier.run_archive(args),
        Command::Chat(args) => {
            atelier.run_chat(args)?;
            Ok(0)
        }
    }
}

struct Atelier {
    config: AtelierConfig,
    events: EventWriter,
    store: ContentStore<FileSlotStore>,
    editor: EditingController,
    normalizer: MediaNormalizer,
}

impl Atelier {
    fn open(cli: &Cli) -> Result<Self> {
        let config = AtelierConfig::from_env(cli.env_file.as_deref())?;
        std::fs::create_dir_all(&cli.state_dir)
            .with_context(|| format!("failed creating {}", cli.state_dir.display()))?;
        let events_path = cli
            .events
            .clone()
            .unwrap_or_else(|| cli.state_dir.join("events.jsonl"));
        let events = EventWriter::new(events_path, Uuid::new_v4().to_string());
        config.log_status(&events);

        let slot = FileSlotStore::new(cli.state_dir.join("slots.json"))
            .with_quota(config.storage_quota_bytes);
        let mut store = ContentStore::new(slot).with_events(events.clone());
        match store.hydrate()? {
            HydrateOutcome::Restored { defaulted } if !defaulted.is_empty() => {
                eprintln!("Saved content was partial; defaults used for {}", defaulted.join(", "));
            }
            HydrateOutcome::Malformed => {
                eprintln!("Saved content could not be read; starting from defaults.");
            }
            _ => {}
        }

        Ok(Self {
            config,
            editor: EditingController::new(Mode::Director).with_events(events.clone()),
            normalizer: MediaNormalizer::new().with_events(events.clone()),
            events,
            store,
        })
    }

    fn gateway(&self) -> Result<Arc<dyn AiGateway>> {
        let status = self.config.api_key_status();
        if !status.available {
            bail!("{}", status.message);
        }
        Ok(Arc::new(GeminiGateway::from_config(&self.config)))
    }

    /// Editing commands act on an entered atelier; writes are held back until
    /// the entry gate is dismissed.
    fn enter(&mut self) {
        self.editor.enter_atelier(&mut self.store);
    }

    fn run_hero(&mut self, args: HeroArgs) -> Result<i32> {
        if args.heading.is_none() && args.media.is_none() {
            bail!("hero requires --heading and/or --media");
        }
        self.enter();
        if let Some(heading) = args.heading.as_deref() {
            report_persist(self.editor.edit_hero_heading(&mut self.store, heading)?)?;
        }
        if let Some(media) = args.media.as_deref() {
            let raw = media_argument(media)?;
            report_persist(
                self.editor
                    .set_hero_media(&mut self.store, &self.normalizer, &raw)?,
            )?;
            println!("Hero media is now {}", self.store.state().hero.media.kind.label());
        }
        Ok(0)
    }

    fn run_heritage_image(&mut self, args: HeritageImageArgs) -> Result<i32> {
        self.enter();
        self.editor
            .begin_heritage_upload(args.index, self.store.state())?;
        let raw = file_to_data_uri(&args.file)?;
        let outcome =
            self.editor
                .complete_heritage_upload(&mut self.store, &self.normalizer, &raw)?;
        report_persist(outcome)?;
        Ok(0)
    }

    fn run_heritage_text(&mut self, args: HeritageTextArgs) -> Result<i32> {
        self.enter();
        self.editor
            .begin_heritage_text_edit(args.index, self.store.state())?;
        let Some(draft) = self.editor.draft().cloned() else {
            bail!("heritage story could not be opened");
        };
        let title = args.title.unwrap_or(draft.title);
        // Shells pass "\n" literally; stories keep real line breaks.
        let description = args
            .description
            .map(|text| text.replace("\\n", "\n"))
            .unwrap_or(draft.description);
        self.editor.update_heritage_draft(&title, &description)?;
        report_persist(self.editor.save_heritage_text_edit(&mut self.store)?)?;
        Ok(0)
    }

    fn run_weekly_image(&mut self, args: WeeklyImageArgs) -> Result<i32> {
        self.enter();
        match (args.file, args.url) {
            (Some(file), _) => {
                let raw = file_to_data_uri(&file)?;
                report_persist(self.editor.upload_weekly_image(
                    &mut self.store,
                    &self.normalizer,
                    &raw,
                )?)?;
            }
            (None, Some(url)) => match self.editor.set_weekly_image_url(&mut self.store, &url)? {
                Some(outcome) => report_persist(outcome)?,
                None => println!("Empty URL; weekly image unchanged."),
            },
            (None, None) => bail!("weekly-image requires --file or --url"),
        }
        Ok(0)
    }

    fn run_dream(&mut self, args: DreamArgs) -> Result<i32> {
        let gateway = self.gateway()?;
        self.enter();
        if args.guest {
            self.editor.set_mode(Mode::Guest);
        }
        println!("{}", self.editor.mode().persona().dream_status());
        let outcome = self.editor.generate_dream(
            &mut self.store,
            gateway.as_ref(),
            &self.normalizer,
            &args.prompt,
        )?;
        self.print_toast();
        match outcome {
            GenerationOutcome::Created(uri) => {
                if let Some(dir) = args.out.as_deref() {
                    let path = self.editor.archive_media(&uri, dir, &archive_stem("dream"))?;
                    println!("Dream archived to {}", path.display());
                }
                Ok(0)
            }
            GenerationOutcome::Empty => {
                println!("No image came back for this dream.");
                Ok(2)
            }
            GenerationOutcome::Failed(_) => Ok(1),
        }
    }

    fn run_film(&mut self, args: FilmArgs) -> Result<i32> {
        let gateway = self.gateway()?;
        self.enter();
        println!("{}", atelier_engine::editing::FILM_IN_PROGRESS);
        let outcome =
            self.editor
                .develop_hero_film(&mut self.store, gateway.as_ref(), args.from_image)?;
        match outcome {
            GenerationOutcome::Created(_) => {
                println!("Hero film replaced ({}).", self.store.state().hero.media.kind.label());
                Ok(0)
            }
            GenerationOutcome::Empty => {
                println!("No film came back.");
                Ok(2)
            }
            GenerationOutcome::Failed(err) => {
                if let Some(status) = self.editor.film_status() {
                    println!("{status}");
                }
                eprintln!("{err}");
                Ok(1)
            }
        }
    }

    fn run_archive(&mut self, args: ArchiveArgs) -> Result<i32> {
        let state = self.store.state();
        let uri = match args.what.trim().to_ascii_lowercase().as_str() {
            "dream" => match state.dream.image.clone() {
                Some(uri) => uri,
                None => bail!("there is no dream image to archive"),
            },
            "hero" => state.hero.media.uri.clone(),
            other => bail!("unknown archive target '{other}' (expected dream or hero)"),
        };
        let path = self
            .editor
            .archive_media(&uri, &args.out, &archive_stem(&args.what))?;
        self.print_toast();
        println!("{}", path.display());
        Ok(0)
    }

    fn run_chat(&mut self, args: ChatArgs) -> Result<()> {
        let gateway = self.gateway()?;
        self.enter();
        let mut mode = if args.guest { Mode::Guest } else { Mode::Director };
        self.editor.set_mode(mode);
        let mut session = ConciergeSession::new(Arc::clone(&gateway)).with_events(self.events.clone());
        let connector = GeminiLiveConnector::new(
            self.config.api_base.clone(),
            self.config.api_key.clone(),
        );
        let mut attachment: Option<String> = None;

        println!("Atelier concierge ({}). Type /help for commands.", mode.as_str());
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            self.drain_concierge(&mut session, args.out.as_deref());
            print!("> ");
            io::stdout().flush()?;

            line.clear();
            let read = match stdin.read_line(&mut line) {
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                break;
            }

            match parse_command(line.trim_end_matches(['\n', '\r'])) {
                ChatCommand::Noop => {
                    if session.voice_active() && !session.live_transcript().is_empty() {
                        println!("… {}", session.live_transcript());
                    }
                }
                ChatCommand::Help => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
                ChatCommand::Quit => break,
                ChatCommand::Attach(path) => {
                    if path.is_empty() {
                        println!("/attach requires a path");
                        continue;
                    }
                    match self.normalizer.normalize_file(Path::new(&path)) {
                        Ok(uri) => {
                            attachment = Some(uri);
                            println!("Attached {path}");
                        }
                        Err(err) => println!("Attach failed: {err:#}"),
                    }
                }
                ChatCommand::Detach => {
                    attachment = None;
                    println!("Attachment cleared.");
                }
                ChatCommand::Mode(raw) => match Mode::parse(&raw) {
                    Some(next) => {
                        mode = next;
                        self.editor.set_mode(mode);
                        println!("Mode set to {}", mode.as_str());
                    }
                    None => println!("Unknown mode '{raw}' (expected director or guest)"),
                },
                ChatCommand::VoiceStart => {
                    let Some(input) = args.voice_input.as_deref() else {
                        println!("Voice needs a microphone; pass --voice-input PCM.");
                        continue;
                    };
                    let output_path = args
                        .voice_output
                        .clone()
                        .unwrap_or_else(|| PathBuf::from("voice-reply.pcm"));
                    let output = match PcmFileOutput::create(&output_path) {
                        Ok(output) => output,
                        Err(err) => {
                            println!("Voice output unavailable: {err:#}");
                            continue;
                        }
                    };
                    match session.start_voice(
                        &connector,
                        &PcmFileMicrophone::new(input),
                        Box::new(output),
                        mode,
                        &self.config.voice_model.model.name,
                    ) {
                        Ok(()) => println!("Voice session live. /voice_stop to end."),
                        Err(err) => println!("Voice failed: {err}"),
                    }
                }
                ChatCommand::VoiceStop => {
                    session.stop_voice();
                    println!("Voice session ended.");
                }
                ChatCommand::Dream(prompt) => {
                    let outcome = self.editor.generate_dream(
                        &mut self.store,
                        gateway.as_ref(),
                        &self.normalizer,
                        &prompt,
                    );
                    match outcome {
                        Ok(GenerationOutcome::Created(_)) => self.print_toast(),
                        Ok(GenerationOutcome::Empty) => println!("No image came back."),
                        Ok(GenerationOutcome::Failed(_)) => self.print_toast(),
                        Err(err) => println!("Dream failed: {err:#}"),
                    }
                }
                ChatCommand::Say(text) => {
                    match session.send_turn(&text, attachment.take(), mode) {
                        Ok(id) => {
                            if let Some(reply) = session.message(id) {
                                print_reply(reply);
                            }
                        }
                        Err(err) => println!("Not sent: {err:#}"),
                    }
                }
                ChatCommand::Unknown { command, .. } => {
                    println!("Unknown command: /{command}");
                }
            }
        }

        session.stop_voice();
        if session.pending_visuals() > 0 {
            println!("Waiting for {} visual(s)...", session.pending_visuals());
            session.wait_for_visuals(VISUAL_DRAIN_TIMEOUT);
            self.drain_concierge(&mut session, args.out.as_deref());
        }
        let _ = self.events.emit(
            "chat_closed",
            payload(json!({ "messages": session.messages().len() })),
        );
        Ok(())
    }

    /// Prints finished visuals and committed spoken turns.
    fn drain_concierge(&mut self, session: &mut ConciergeSession, out: Option<&Path>) {
        let before: Vec<bool> = session
            .messages()
            .iter()
            .map(|message| message.generated_image.is_some())
            .collect();
        session.poll_visuals();
        let ready: Vec<String> = session
            .messages()
            .iter()
            .enumerate()
            .filter(|(idx, message)| {
                message.generated_image.is_some() && !before.get(*idx).copied().unwrap_or(false)
            })
            .filter_map(|(_, message)| message.generated_image.clone())
            .collect();
        for uri in ready {
            match out {
                Some(dir) => match self.editor.archive_media(&uri, dir, &archive_stem("visual")) {
                    Ok(path) => println!("[visual] {}", path.display()),
                    Err(err) => println!("[visual] archive failed: {err:#}"),
                },
                None => println!("[visual] ready ({} bytes inline)", uri.len()),
            }
        }

        let (spoken, failure) = session.pump_voice();
        for id in spoken {
            if let Some(message) = session.message(id) {
                println!("[voice] {}", message.text);
            }
        }
        if let Some(err) = failure {
            println!("[voice] session ended: {err}");
        }
    }

    fn print_toast(&self) {
        if let Some(message) = self.editor.visible_toast(std::time::Instant::now()) {
            println!("{message}");
        }
    }
}

fn media_argument(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.contains("://") || trimmed.starts_with("data:") {
        return Ok(trimmed.to_string());
    }
    file_to_data_uri(Path::new(trimmed))
}

fn archive_stem(kind: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("atelier-{kind}-{}", &id[..8])
}

fn report_persist(outcome: PersistOutcome) -> Result<()> {
    match outcome {
        PersistOutcome::Written { bytes, .. } => {
            println!("Saved ({bytes} bytes).");
            Ok(())
        }
        PersistOutcome::Skipped(reason) => {
            println!("Not saved: {reason}.");
            Ok(())
        }
        PersistOutcome::Failed(err) => bail!("save failed: {err}"),
    }
}

fn print_reply(reply: &ConciergeMessage) {
    println!("{}", reply.text);
    for source in &reply.sources {
        match (source.title.as_deref(), source.uri.as_deref()) {
            (Some(title), Some(uri)) => println!("  source: {title} <{uri}>"),
            (None, Some(uri)) => println!("  source: {uri}"),
            (Some(title), None) => println!("  source: {title}"),
            (None, None) => {}
        }
    }
    if reply.generating_visual {
        println!("  (developing a visual...)");
    }
}

fn print_content(state: &ContentState, entry_gate_shown: bool) {
    if entry_gate_shown {
        println!("[entry gate]");
    }
    println!("Hero: {}", state.hero.heading.replace('\n', " / "));
    println!(
        "  media: {} {}",
        state.hero.media.kind.label(),
        preview(&state.hero.media.uri)
    );
    println!("Heritage:");
    for (idx, entry) in state.heritage.iter().enumerate() {
        println!("  [{idx}] {} ({})", entry.title, preview(&entry.image));
    }
    println!(
        "Weekly: {} | {} ({})",
        state.weekly.title,
        state.weekly.subtitle,
        preview(&state.weekly.image)
    );
    match state.dream.image.as_deref() {
        Some(uri) => println!("Dream: {}", preview(uri)),
        None => println!("Dream: none"),
    }
    println!("Products:");
    for product in &state.products {
        println!("  {} {} {}", product.id, product.name, product.price);
    }
}

/// Short form of a media reference; inline data is summarized by size.
fn preview(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix("data:") {
        let mime = rest.split([';', ',']).next().unwrap_or_default();
        return format!("inline {mime}, {} bytes", uri.len());
    }
    if uri.chars().count() > 72 {
        let head: String = uri.chars().take(69).collect();
        return format!("{head}...");
    }
    uri.to_string()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{archive_stem, media_argument, preview, Cli, Command};

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from([
            "atelier",
            "dream",
            "--prompt",
            "a moon jar",
            "--guest",
            "--state-dir",
            "/tmp/atelier",
        ]);
        assert_eq!(cli.state_dir.to_string_lossy(), "/tmp/atelier");
        match cli.command {
            Command::Dream(args) => {
                assert_eq!(args.prompt, "a moon jar");
                assert!(args.guest);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn weekly_image_file_and_url_conflict() {
        let parsed = Cli::try_parse_from([
            "atelier",
            "weekly-image",
            "--file",
            "a.png",
            "--url",
            "https://x/y.png",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn urls_pass_through_and_files_are_read() {
        assert_eq!(
            media_argument(" https://youtu.be/dQw4w9WgXcQ ").unwrap(),
            "https://youtu.be/dQw4w9WgXcQ"
        );
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("clip.mp4");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();
        let uri = media_argument(path.to_str().unwrap()).unwrap();
        assert!(uri.starts_with("data:video/mp4;base64,"));
        assert!(media_argument("/definitely/missing.png").is_err());
    }

    #[test]
    fn preview_summarizes_inline_media() {
        assert_eq!(preview("data:image/jpeg;base64,AAAA"), "inline image/jpeg, 27 bytes");
        assert_eq!(preview("https://a/b.jpg"), "https://a/b.jpg");
        assert!(preview(&"x".repeat(100)).ends_with("..."));
    }

    #[test]
    fn archive_stems_are_unique() {
        let first = archive_stem("dream");
        assert!(first.starts_with("atelier-dream-"));
        assert_ne!(first, archive_stem("dream"));
    }
}
