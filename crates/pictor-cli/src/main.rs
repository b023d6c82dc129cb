use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use pictor_contracts::config::{
    redact_credential, ConfigStore, Configuration, GenerationMode, ImageSize, InjectedSecrets,
    Quality, Style,
};
use pictor_contracts::events::{ActivityEvent, ActivityLog};
use pictor_contracts::history::{ImageHistory, ImageRecord, ImageSource};
use pictor_contracts::queue::PromptQueue;
use pictor_contracts::storage::{FileStore, LocalStore};
use pictor_contracts::usage::UsageCounter;
use pictor_engine::{
    truncate_text, DisplayRect, GenerationInputs, Generator, HttpTransport, MaskEditor,
    PointerPosition, StatusLine, Tool, Transport, DEFAULT_TIMEOUT,
};
use serde_json::json;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_STORAGE_QUOTA: usize = 5 * 1024 * 1024;

#[derive(Debug, Parser)]
#[command(name = "pictor", version, about = "Azure OpenAI image generation client")]
struct Cli {
    /// Directory holding saved settings, history and the activity log.
    #[arg(long, global = true, env = "PICTOR_DATA_DIR", default_value = ".pictor")]
    data_dir: PathBuf,
    #[arg(long, global = true, env = "PICTOR_STORAGE_QUOTA", default_value_t = DEFAULT_STORAGE_QUOTA)]
    storage_quota_bytes: usize,
    #[arg(long, global = true, env = "PICTOR_HTTP_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,
    #[arg(long, global = true, default_value_t = 1000)]
    batch_delay_ms: u64,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show, change or check the saved configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate images for one prompt.
    Generate(GenerateArgs),
    /// Manage the prompt queue.
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Generate every queued prompt in order.
    Batch(BatchArgs),
    /// Browse previously generated images.
    #[command(subcommand)]
    Gallery(GalleryCommand),
    /// Print the number of images generated so far.
    Usage,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    Set(ConfigOverrides),
    Validate(ConfigOverrides),
}

#[derive(Debug, Subcommand)]
enum QueueCommand {
    Add {
        #[arg(required = true)]
        prompts: Vec<String>,
    },
    List,
    Remove {
        index: usize,
    },
    Clear,
}

#[derive(Debug, Subcommand)]
enum GalleryCommand {
    List,
    /// Print a stored prompt verbatim.
    Prompt { index: usize },
    Download {
        index: usize,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Delete every stored gallery image.
    Clear,
}

/// Field overrides, applied on top of the saved configuration.
#[derive(Debug, Clone, Default, Args)]
struct ConfigOverrides {
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    deployment: Option<String>,
    #[arg(long)]
    api_version: Option<String>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    size: Option<ImageSize>,
    #[arg(long)]
    quality: Option<Quality>,
    #[arg(long)]
    style: Option<Style>,
    #[arg(long)]
    custom_style: Option<String>,
    #[arg(short = 'n', long = "count")]
    n: Option<u32>,
    #[arg(long)]
    mode: Option<GenerationMode>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut Configuration) {
        if let Some(value) = &self.endpoint {
            config.endpoint = value.clone();
        }
        if let Some(value) = &self.api_key {
            config.credential = value.clone();
        }
        if let Some(value) = &self.deployment {
            config.deployment = value.clone();
        }
        if let Some(value) = &self.api_version {
            config.api_version = value.clone();
        }
        if let Some(value) = &self.prompt {
            config.prompt = value.clone();
        }
        if let Some(value) = self.size {
            config.size = value;
        }
        if let Some(value) = self.quality {
            config.quality = value;
        }
        if let Some(value) = self.style {
            config.style = value;
        }
        if let Some(value) = &self.custom_style {
            config.custom_style = value.clone();
        }
        if let Some(value) = self.n {
            config.n = value;
        }
        if let Some(value) = self.mode {
            config.mode = value;
        }
    }
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    overrides: ConfigOverrides,
    /// Reference image for image-with-reference mode.
    #[arg(long)]
    reference: Option<PathBuf>,
    #[command(flatten)]
    mask: MaskArgs,
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[command(flatten)]
    overrides: ConfigOverrides,
    #[arg(long)]
    reference: Option<PathBuf>,
    #[command(flatten)]
    mask: MaskArgs,
}

#[derive(Debug, Default, Args)]
struct MaskArgs {
    /// Base image to edit.
    #[arg(long, conflicts_with = "from_history")]
    image: Option<PathBuf>,
    /// Re-edit a gallery image (index as shown by `gallery list`).
    #[arg(long)]
    from_history: Option<usize>,
    /// Stroke as `x,y;x,y;...`, prefix `erase:` for the eraser. Repeatable.
    #[arg(long = "stroke")]
    strokes: Vec<String>,
    #[arg(long)]
    brush_size: Option<u32>,
    /// Displayed surface size `WxH`; stroke points are in this space.
    #[arg(long)]
    display: Option<String>,
    /// Also write the extracted mask to this file.
    #[arg(long)]
    mask_out: Option<PathBuf>,
    /// Also write the base image with the painted strokes on top.
    #[arg(long)]
    preview_out: Option<PathBuf>,
}

struct Session {
    store: LocalStore,
    config: ConfigStore,
    activity: ActivityLog,
    timeout: Duration,
    batch_delay: Duration,
}

impl Session {
    fn open(cli: &Cli) -> Self {
        let store = LocalStore::new(FileStore::with_quota(
            cli.data_dir.join("storage.json"),
            cli.storage_quota_bytes,
        ));
        let config = ConfigStore::open(store.clone(), &InjectedSecrets::from_env());
        Self {
            activity: ActivityLog::new(cli.data_dir.join("activity.jsonl")),
            store,
            config,
            timeout: Duration::from_secs(cli.timeout_secs.max(1)),
            batch_delay: Duration::from_millis(cli.batch_delay_ms),
        }
    }

    fn configuration(&self, overrides: &ConfigOverrides) -> Configuration {
        let mut config = self.config.current();
        overrides.apply(&mut config);
        config
    }

    fn transport(&self) -> Result<HttpTransport> {
        HttpTransport::new(self.timeout)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("pictor error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut session = Session::open(&cli);
    debug!(data_dir = %cli.data_dir.display(), "session opened");

    match cli.command {
        Command::Config(command) => run_config(&mut session, command),
        Command::Generate(args) => run_generate(&session, args),
        Command::Queue(command) => run_queue(&session, command),
        Command::Batch(args) => run_batch(&session, args),
        Command::Gallery(command) => run_gallery(&session, command),
        Command::Usage => {
            println!("{}", UsageCounter::load(session.store.clone()).total());
            Ok(0)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_config(session: &mut Session, command: ConfigCommand) -> Result<i32> {
    match command {
        ConfigCommand::Show => {
            let config = session.config.current();
            let mut shown = serde_json::to_value(&config)?;
            shown["apiKey"] = json!(redact_credential(&config.credential));
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(0)
        }
        ConfigCommand::Set(overrides) => {
            let config = session.configuration(&overrides);
            session
                .config
                .save(&config)
                .context("failed to save configuration")?;
            if let Err(err) = session.activity.emit(&ActivityEvent::ConfigSaved {
                deployment: config.deployment.clone(),
            }) {
                warn!(error = %err, "failed to write activity event");
            }
            println!("Configuration saved successfully!");
            Ok(0)
        }
        ConfigCommand::Validate(overrides) => {
            let config = session.configuration(&overrides).normalized();
            match session.config.validate(&config) {
                Ok(()) => {
                    println!("Configuration is valid");
                    Ok(0)
                }
                Err(err) => {
                    println!("{err}");
                    Ok(1)
                }
            }
        }
    }
}

fn run_generate(session: &Session, args: GenerateArgs) -> Result<i32> {
    let transport = session.transport()?;
    let mut config = session.configuration(&args.overrides);
    let editor = prepare_editor(session, &transport, &args.mask, &mut config)?;
    let reference = read_optional(args.reference.as_deref())?;

    let mut history = ImageHistory::load(session.store.clone());
    let mut usage = UsageCounter::load(session.store.clone());
    let mut generator = Generator::new(&transport, &mut history, &mut usage)
        .with_activity_log(&session.activity);
    let inputs = GenerationInputs {
        reference_image: reference.as_deref(),
        editor: editor.as_ref(),
    };
    let outcome = generator.generate_once(&config, inputs);

    let status = match &outcome {
        Ok(done) => {
            print_records(&done.records);
            StatusLine::generated(done.count)
        }
        Err(err) => StatusLine::error(err),
    };
    Ok(report(&status))
}

fn run_batch(session: &Session, args: BatchArgs) -> Result<i32> {
    let transport = session.transport()?;
    let mut config = session.configuration(&args.overrides);
    let editor = prepare_editor(session, &transport, &args.mask, &mut config)?;
    let reference = read_optional(args.reference.as_deref())?;

    let mut queue = PromptQueue::load(session.store.clone());
    let mut history = ImageHistory::load(session.store.clone());
    let mut usage = UsageCounter::load(session.store.clone());
    let mut generator = Generator::new(&transport, &mut history, &mut usage)
        .with_activity_log(&session.activity)
        .with_batch_delay(session.batch_delay);
    let inputs = GenerationInputs {
        reference_image: reference.as_deref(),
        editor: editor.as_ref(),
    };

    let status = generator.run_batch(&config, &mut queue, inputs);
    Ok(report(&status))
}

fn run_queue(session: &Session, command: QueueCommand) -> Result<i32> {
    let mut queue = PromptQueue::load(session.store.clone());
    match command {
        QueueCommand::Add { prompts } => {
            let mut rejected = 0;
            for prompt in &prompts {
                if !queue.enqueue(prompt) {
                    rejected += 1;
                }
            }
            println!("{} prompt(s) in queue", queue.len());
            if rejected > 0 {
                println!(
                    "Error: {rejected} prompt(s) not added (empty, or queue holds {} max)",
                    queue.capacity()
                );
                return Ok(1);
            }
        }
        QueueCommand::List => {
            for (idx, prompt) in queue.entries().iter().enumerate() {
                println!("{idx}\t{prompt}");
            }
        }
        QueueCommand::Remove { index } => match queue.remove_at(index) {
            Some(prompt) => println!("removed: {prompt}"),
            None => {
                println!("Error: no queued prompt at index {index}");
                return Ok(1);
            }
        },
        QueueCommand::Clear => {
            queue.clear();
            println!("queue cleared");
        }
    }
    Ok(0)
}

fn run_gallery(session: &Session, command: GalleryCommand) -> Result<i32> {
    let mut history = ImageHistory::load(session.store.clone());
    match command {
        GalleryCommand::List => {
            for card in history.gallery() {
                let source = if card.source_url.is_empty() {
                    "(blocked source)".to_string()
                } else {
                    truncate_text(&card.source_url, 80)
                };
                println!(
                    "{}\t{}\t{}\t{}",
                    card.index, card.download_name, source, card.prompt
                );
            }
        }
        GalleryCommand::Prompt { index } => {
            let record = history_record(&history, index)?;
            println!("{}", record.prompt);
        }
        GalleryCommand::Download { index, out } => {
            let transport = session.transport()?;
            let card = history
                .gallery()
                .into_iter()
                .nth(index)
                .with_context(|| format!("no gallery image at index {index}"))?;
            let record = history_record(&history, index)?;
            if card.source_url.is_empty() {
                bail!("gallery image {index} has an unsupported source");
            }
            let bytes = image_bytes(&transport, &record.source)?;
            fs::create_dir_all(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            let path = out.join(&card.download_name);
            fs::write(&path, bytes).with_context(|| format!("failed writing {}", path.display()))?;
            println!("{}", path.display());
        }
        GalleryCommand::Clear => {
            let removed = history.len();
            history.clear().context("failed to clear gallery")?;
            println!("removed {removed} image(s)");
        }
    }
    Ok(0)
}

/// Builds the mask editor for edit mode. Re-editing a history image switches
/// the configuration into edit mode.
fn prepare_editor(
    session: &Session,
    transport: &dyn Transport,
    args: &MaskArgs,
    config: &mut Configuration,
) -> Result<Option<MaskEditor>> {
    let base = if let Some(index) = args.from_history {
        let history = ImageHistory::load(session.store.clone());
        let record = history_record(&history, index)?;
        config.mode = GenerationMode::ImageEdit;
        Some(image_bytes(transport, &record.source)?)
    } else {
        read_optional(args.image.as_deref())?
    };
    let Some(base) = base else {
        return Ok(None);
    };

    let mut editor = MaskEditor::new();
    editor
        .setup_canvas(&base)
        .context("failed to load base image into mask editor")?;
    if let Some(raw) = &args.display {
        editor.set_display_rect(Some(parse_display(raw)?));
    }
    if let Some(size) = args.brush_size {
        editor.set_brush_size(size);
    }
    for raw in &args.strokes {
        let (tool, points) = parse_stroke(raw)?;
        editor.set_tool(tool);
        let mut points = points.into_iter();
        if let Some(first) = points.next() {
            editor.start_stroke(first);
        }
        for point in points {
            editor.continue_stroke(point);
        }
        editor.end_stroke();
    }
    write_editor_outputs(&editor, args)?;
    Ok(Some(editor))
}

fn write_editor_outputs(editor: &MaskEditor, args: &MaskArgs) -> Result<()> {
    if let Some(path) = &args.mask_out {
        let mask = editor.extract_mask().context("failed to extract mask")?;
        fs::write(path, mask).with_context(|| format!("failed writing {}", path.display()))?;
    }
    if let Some(path) = &args.preview_out {
        let preview = editor.extract_preview().context("failed to render preview")?;
        fs::write(path, preview).with_context(|| format!("failed writing {}", path.display()))?;
    }
    Ok(())
}

fn history_record(history: &ImageHistory, index: usize) -> Result<&ImageRecord> {
    history
        .newest_first(index)
        .with_context(|| format!("no gallery image at index {index}"))
}

fn image_bytes(transport: &dyn Transport, source: &ImageSource) -> Result<Vec<u8>> {
    match source {
        ImageSource::Inline { b64_json } => BASE64
            .decode(b64_json.as_bytes())
            .context("stored image base64 decode failed"),
        ImageSource::Url { url } => transport.fetch(url),
    }
}

fn read_optional(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    path.map(|path| fs::read(path).with_context(|| format!("failed reading {}", path.display())))
        .transpose()
}

/// `WxH` in display pixels.
fn parse_display(raw: &str) -> Result<DisplayRect> {
    let (width, height) = raw
        .trim()
        .split_once(['x', 'X'])
        .with_context(|| format!("display size '{raw}' must look like WxH"))?;
    let width: f32 = width.trim().parse().context("invalid display width")?;
    let height: f32 = height.trim().parse().context("invalid display height")?;
    if width <= 0.0 || height <= 0.0 {
        bail!("display size must be positive");
    }
    Ok(DisplayRect {
        left: 0.0,
        top: 0.0,
        width,
        height,
    })
}

fn parse_stroke(raw: &str) -> Result<(Tool, Vec<PointerPosition>)> {
    let (tool, path) = match raw.trim().split_once(':') {
        Some((prefix, rest)) => (
            prefix.parse::<Tool>().map_err(anyhow::Error::msg)?,
            rest,
        ),
        None => (Tool::Brush, raw),
    };
    let points = path
        .split(';')
        .map(str::trim)
        .filter(|point| !point.is_empty())
        .map(|point| {
            let (x, y) = point
                .split_once(',')
                .with_context(|| format!("stroke point '{point}' must look like x,y"))?;
            Ok(PointerPosition::new(
                x.trim().parse().with_context(|| format!("bad x in '{point}'"))?,
                y.trim().parse().with_context(|| format!("bad y in '{point}'"))?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    if points.is_empty() {
        bail!("stroke '{raw}' has no points");
    }
    Ok((tool, points))
}

fn print_records(records: &[ImageRecord]) {
    for record in records {
        let shown = match &record.source {
            ImageSource::Url { url } => url.clone(),
            ImageSource::Inline { b64_json } => format!("inline image ({} base64 chars)", b64_json.len()),
        };
        println!("{shown}");
    }
}

fn report(status: &StatusLine) -> i32 {
    println!("{status}");
    if status.is_error() {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stroke_parses_points_and_tool() -> anyhow::Result<()> {
        let (tool, points) = parse_stroke("10,20; 30.5,40")?;
        assert_eq!(tool, Tool::Brush);
        assert_eq!(
            points,
            vec![PointerPosition::new(10.0, 20.0), PointerPosition::new(30.5, 40.0)]
        );

        let (tool, points) = parse_stroke("erase:1,1")?;
        assert_eq!(tool, Tool::Eraser);
        assert_eq!(points.len(), 1);

        assert!(parse_stroke("spray:1,1").is_err());
        assert!(parse_stroke("1;2").is_err());
        assert!(parse_stroke("erase:").is_err());
        Ok(())
    }

    #[test]
    fn display_size_parses() -> anyhow::Result<()> {
        let rect = parse_display("512x256")?;
        assert_eq!((rect.width, rect.height), (512.0, 256.0));
        assert!(parse_display("512").is_err());
        assert!(parse_display("0x10").is_err());
        Ok(())
    }

    #[test]
    fn overrides_apply_only_given_fields() {
        let mut config = Configuration::default();
        config.prompt = "keep me".to_string();
        let overrides = ConfigOverrides {
            style: Some(Style::Anime),
            n: Some(3),
            mode: Some(GenerationMode::ImageEdit),
            ..ConfigOverrides::default()
        };
        overrides.apply(&mut config);
        assert_eq!(config.prompt, "keep me");
        assert_eq!(config.style, Style::Anime);
        assert_eq!(config.n, 3);
        assert_eq!(config.mode, GenerationMode::ImageEdit);
    }

    #[test]
    fn generate_flags_parse() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "pictor",
            "generate",
            "--prompt",
            "a fox",
            "--style",
            "oil-painting",
            "--size",
            "1792x1024",
            "-n",
            "2",
            "--stroke",
            "1,1;5,5",
            "--stroke",
            "erase:2,2",
        ])?;
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.overrides.style, Some(Style::OilPainting));
        assert_eq!(args.overrides.size, Some(ImageSize::WideLandscape));
        assert_eq!(args.overrides.n, Some(2));
        assert_eq!(args.mask.strokes.len(), 2);
        Ok(())
    }

    #[test]
    fn timeout_defaults_to_engine_timeout() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["pictor", "usage"])?;
        assert_eq!(cli.timeout_secs, DEFAULT_TIMEOUT.as_secs());

        let cli = Cli::try_parse_from(["pictor", "gallery", "clear"])?;
        assert!(matches!(cli.command, Command::Gallery(GalleryCommand::Clear)));
        Ok(())
    }

    #[test]
    fn editor_outputs_are_written() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut editor = MaskEditor::new();
        editor.setup_canvas_image(image::RgbaImage::from_pixel(16, 16, image::Rgba([0, 0, 0, 255])));
        let (tool, points) = parse_stroke("2,8;14,8")?;
        editor.set_tool(tool);
        editor.start_stroke(points[0]);
        editor.continue_stroke(points[1]);
        editor.end_stroke();

        let args = MaskArgs {
            mask_out: Some(dir.path().join("mask.png")),
            preview_out: Some(dir.path().join("preview.png")),
            ..MaskArgs::default()
        };
        write_editor_outputs(&editor, &args)?;

        let preview = image::open(dir.path().join("preview.png"))?.to_rgba8();
        assert_eq!(preview.dimensions(), (16, 16));
        assert_ne!(*preview.get_pixel(8, 8), image::Rgba([0, 0, 0, 255]));
        assert!(dir.path().join("mask.png").exists());
        Ok(())
    }

    #[test]
    fn inline_history_images_decode_without_network() -> anyhow::Result<()> {
        struct Offline;
        impl Transport for Offline {
            fn send(
                &self,
                _request: &pictor_engine::ImageRequest,
            ) -> anyhow::Result<pictor_engine::HttpReply> {
                bail!("offline")
            }
            fn fetch(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
                bail!("offline")
            }
        }

        let bytes = image_bytes(
            &Offline,
            &ImageSource::Inline {
                b64_json: BASE64.encode(b"png"),
            },
        )?;
        assert_eq!(bytes, b"png");
        assert!(image_bytes(
            &Offline,
            &ImageSource::Url {
                url: "https://img.example/1.png".to_string()
            }
        )
        .is_err());
        Ok(())
    }
}
