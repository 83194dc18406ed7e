use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use banner_contracts::catalog::SizeSelection;
use banner_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use banner_contracts::items::{GenerationItem, ItemState};
use banner_engine::conversation::HistorySync;
use banner_engine::export::write_gallery;
use banner_engine::{backend_for, BackendConfig, BatchReport, Studio, StudioError};
use clap::{Args, Parser, Subcommand};

const DEFAULT_PLATFORM: &str = "Facebook";
const EDIT_WAIT: Duration = Duration::from_secs(180);

#[derive(Debug, Parser)]
#[command(name = "banner-rs", version, about = "Iterative banner generation studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: plain text is a brief, `/help` lists commands.
    Chat(ChatArgs),
    /// One batch for one brief, then wait for previews.
    Generate(GenerateArgs),
    /// Print the platform size catalog.
    Sizes(SessionArgs),
    /// Print the conversation of the stored session.
    History(SessionArgs),
    /// Forget the stored session's conversation and start a new session.
    Clear(SessionArgs),
    /// Write an HTML gallery for a run directory.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "http")]
    backend: String,
    #[arg(long)]
    api_base: Option<String>,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long, default_value = DEFAULT_PLATFORM)]
    platform: String,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    brief: String,
    #[arg(long, default_value = DEFAULT_PLATFORM)]
    platform: String,
    /// Comma-separated size names; defaults to the platform's first size.
    #[arg(long, value_delimiter = ',')]
    sizes: Vec<String>,
    /// Also render and save every generated template at full size.
    #[arg(long)]
    download: bool,
    #[arg(long, default_value_t = 120)]
    wait_s: u64,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long)]
    run: PathBuf,
    #[arg(long)]
    out: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("banner-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => run_chat(args),
        Command::Generate(args) => run_generate(args),
        Command::Sizes(args) => run_sizes(args),
        Command::History(args) => run_history(args),
        Command::Clear(args) => run_clear(args),
        Command::Export(args) => run_export(args),
    }
}

fn open_studio(args: &SessionArgs) -> Result<Studio> {
    let config = BackendConfig::resolve(args.api_base.as_deref());
    let backend = backend_for(&args.backend, config)?;
    Studio::open(&args.out, backend).context("failed to open session")
}

fn run_chat(args: ChatArgs) -> Result<i32> {
    let mut studio = open_studio(&args.session)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "Banner studio started (session {}). Type /help for commands.",
        studio.session_id()
    )?;
    print_history_sync(&mut stdout, &studio.load_history()?)?;
    let selection = initial_selection(&mut studio, &args.platform, &mut stdout)?;
    chat_loop(&mut studio, selection, stdin.lock(), &mut stdout)?;
    studio.finish()?;
    Ok(0)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut studio = open_studio(&args.session)?;
    let mut stdout = io::stdout();
    if let HistorySync::Unavailable(message) = studio.load_history()? {
        eprintln!("History unavailable: {message}");
    }
    let selection = if args.sizes.is_empty() {
        SizeSelection::for_platform(studio.catalog()?, &args.platform)
    } else {
        SizeSelection::new(args.platform.clone(), args.sizes.clone())
    };

    let report = studio.generate_batch(&args.brief, &selection)?;
    print_report(&mut stdout, &report)?;
    let remaining = studio.wait_for_previews(Duration::from_secs(args.wait_s))?;
    if remaining > 0 {
        writeln!(stdout, "{remaining} preview(s) still rendering, not waiting further")?;
    }
    print_items(&mut stdout, studio.items())?;

    if args.download {
        let exportable: Vec<String> = studio
            .items()
            .iter()
            .filter(|item| item.can_export())
            .map(|item| item.id().to_string())
            .collect();
        for item_id in exportable {
            match studio.export_artifact(&item_id) {
                Ok(artifact) => writeln!(stdout, "Saved {}", artifact.path.display())?,
                Err(err) => writeln!(stdout, "Download failed for {item_id}: {err}")?,
            }
        }
    }
    studio.finish()?;
    Ok(if report.succeeded() == 0 { 1 } else { 0 })
}

fn run_sizes(args: SessionArgs) -> Result<i32> {
    let mut studio = open_studio(&args)?;
    let selection = SizeSelection::new(DEFAULT_PLATFORM, Vec::new());
    print_catalog(&mut studio, &selection, &mut io::stdout())?;
    Ok(0)
}

fn run_history(args: SessionArgs) -> Result<i32> {
    let mut studio = open_studio(&args)?;
    let mut stdout = io::stdout();
    writeln!(stdout, "Session {}", studio.session_id())?;
    print_history_sync(&mut stdout, &studio.load_history()?)?;
    print_history(&studio, &mut stdout)?;
    Ok(0)
}

fn run_clear(args: SessionArgs) -> Result<i32> {
    let mut studio = open_studio(&args)?;
    let previous = studio.session_id().clone();
    let next = studio.clear_history()?;
    println!("Cleared session {previous}; new session {next}");
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let cards = write_gallery(&args.run, &args.out)?;
    println!("Exported {cards} item(s) to {}", args.out.display());
    Ok(0)
}

/// The platform's first size, or an empty selection if the catalog is down.
fn initial_selection<W: Write>(
    studio: &mut Studio,
    platform: &str,
    out: &mut W,
) -> Result<SizeSelection> {
    match studio.catalog() {
        Ok(catalog) => Ok(SizeSelection::for_platform(catalog, platform)),
        Err(err) => {
            writeln!(out, "Size catalog unavailable: {err}")?;
            Ok(SizeSelection::new(platform, Vec::new()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn chat_loop<R: BufRead, W: Write>(
    studio: &mut Studio,
    mut selection: SizeSelection,
    mut input: R,
    out: &mut W,
) -> Result<()> {
    let mut line = String::new();
    loop {
        let applied = studio.pump()?;
        if applied > 0 {
            writeln!(out, "{applied} background update(s) applied")?;
        }
        write!(out, "> ")?;
        out.flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if handle_intent(studio, &mut selection, &intent, out)? == Flow::Quit {
            break;
        }
    }
    Ok(())
}

/// Studio errors are shown to the user; only local I/O failures end the loop.
fn handle_intent<W: Write>(
    studio: &mut Studio,
    selection: &mut SizeSelection,
    intent: &Intent,
    out: &mut W,
) -> Result<Flow> {
    match intent.action.as_str() {
        "noop" => {}
        "quit" => return Ok(Flow::Quit),
        "help" => writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?,
        "generate" => {
            let brief = intent.prompt.as_deref().unwrap_or_default();
            match studio.generate_batch(brief, selection) {
                Ok(report) => print_report(out, &report)?,
                Err(err) => report_error(out, &err)?,
            }
        }
        "set_platform" => {
            let Some(platform) = intent.text_arg("platform") else {
                writeln!(out, "/platform requires a platform name")?;
                return Ok(Flow::Continue);
            };
            match studio.catalog() {
                Ok(catalog) if catalog.platforms().any(|known| known == platform) => {
                    selection.switch_platform(catalog, platform);
                    print_selection(out, selection)?;
                }
                Ok(catalog) => {
                    let known: Vec<&str> = catalog.platforms().collect();
                    writeln!(
                        out,
                        "Unknown platform '{platform}'. Available: {}",
                        known.join(", ")
                    )?;
                }
                Err(err) => report_error(out, &err)?,
            }
        }
        "toggle_size" => {
            let Some(size) = intent.text_arg("size") else {
                writeln!(out, "/toggle requires a size name")?;
                return Ok(Flow::Continue);
            };
            selection.toggle(size);
            print_selection(out, selection)?;
        }
        "set_sizes" => {
            let names = intent
                .command_args
                .get("sizes")
                .and_then(|value| value.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|value| value.as_str().map(str::to_string))
                        .collect::<Vec<String>>()
                })
                .unwrap_or_default();
            selection.set(names);
            print_selection(out, selection)?;
        }
        "catalog" => print_catalog(studio, selection, out)?,
        "list" => print_items(out, studio.items())?,
        "show_item" => {
            if let Some(item) = item_for(studio, intent, out)? {
                print_item_detail(out, &item)?;
            }
        }
        "cancel_edit" => {
            if let Some(item) = item_for(studio, intent, out)? {
                match studio.cancel_edit(item.id()) {
                    Ok(()) => writeln!(out, "Edit cancelled for {}", item.id())?,
                    Err(err) => report_error(out, &err)?,
                }
            }
        }
        "retry_preview" => {
            if let Some(item) = item_for(studio, intent, out)? {
                match studio.retry_preview(item.id()) {
                    Ok(version) => {
                        writeln!(out, "Preview requested for {} v{version}", item.id())?
                    }
                    Err(err) => report_error(out, &err)?,
                }
            }
        }
        "download" => {
            if let Some(item) = item_for(studio, intent, out)? {
                match studio.export_artifact(item.id()) {
                    Ok(artifact) => writeln!(out, "Saved {}", artifact.path.display())?,
                    Err(err) => report_error(out, &err)?,
                }
            }
        }
        "edit" => {
            if let Some(item) = item_for(studio, intent, out)? {
                let instruction = intent.text_arg("instruction").unwrap_or_default();
                match studio.apply_edit(item.id(), instruction, EDIT_WAIT) {
                    Ok(updated) => match updated.last_error() {
                        Some(message) if updated.state() == ItemState::EditFailed => {
                            writeln!(out, "Edit failed for {}: {message}", updated.id())?
                        }
                        _ => writeln!(
                            out,
                            "Updated {} to v{} ({})",
                            updated.id(),
                            updated.template_version(),
                            updated.state()
                        )?,
                    },
                    Err(err) => report_error(out, &err)?,
                }
            }
        }
        "history" => print_history(studio, out)?,
        "clear_history" => match studio.clear_history() {
            Ok(session_id) => writeln!(out, "History cleared. New session {session_id}")?,
            Err(err) => report_error(out, &err)?,
        },
        "wait_previews" => {
            let remaining = studio.wait_for_previews(EDIT_WAIT)?;
            writeln!(out, "{remaining} preview(s) still rendering")?;
        }
        "show_error" => match studio.last_error() {
            Some(message) => writeln!(out, "Last error: {message}")?,
            None => writeln!(out, "No error")?,
        },
        "dismiss_error" => {
            studio.dismiss_error();
            writeln!(out, "Error dismissed")?;
        }
        _ => {
            let command = intent.text_arg("command").unwrap_or("?");
            writeln!(out, "Unknown command /{command}. Type /help for commands.")?;
        }
    }
    Ok(Flow::Continue)
}

fn item_for<W: Write>(
    studio: &Studio,
    intent: &Intent,
    out: &mut W,
) -> Result<Option<GenerationItem>> {
    let item = intent
        .item_position()
        .and_then(|position| studio.item_at(position))
        .cloned();
    if item.is_none() {
        writeln!(out, "No item at that position (see /list)")?;
    }
    Ok(item)
}

fn report_error<W: Write>(out: &mut W, err: &StudioError) -> io::Result<()> {
    writeln!(out, "Error: {err}")
}

fn print_selection<W: Write>(out: &mut W, selection: &SizeSelection) -> io::Result<()> {
    if selection.is_empty() {
        writeln!(out, "{}: no sizes selected", selection.platform())
    } else {
        writeln!(
            out,
            "{}: {}",
            selection.platform(),
            selection.names().join(", ")
        )
    }
}

fn print_catalog<W: Write>(
    studio: &mut Studio,
    selection: &SizeSelection,
    out: &mut W,
) -> Result<()> {
    let catalog = match studio.catalog() {
        Ok(catalog) => catalog,
        Err(err) => {
            report_error(out, &err)?;
            return Ok(());
        }
    };
    for platform in catalog.platforms() {
        writeln!(out, "{platform}")?;
        for size in catalog.sizes(platform) {
            let mark = if platform == selection.platform() && selection.contains(&size.name) {
                "*"
            } else {
                " "
            };
            writeln!(out, "  {mark} {} ({}x{})", size.name, size.width, size.height)?;
        }
    }
    Ok(())
}

fn print_report<W: Write>(out: &mut W, report: &BatchReport) -> io::Result<()> {
    writeln!(
        out,
        "Batch {}: {} generated, {} failed",
        report.batch_id,
        report.succeeded(),
        report.failed()
    )?;
    print_items(out, &report.items)
}

fn print_items<W: Write>(out: &mut W, items: &[GenerationItem]) -> io::Result<()> {
    if items.is_empty() {
        return writeln!(out, "No items yet. Type a brief to generate.");
    }
    for (idx, item) in items.iter().enumerate() {
        let dims = item.dimensions();
        write!(
            out,
            "{:>2}. {} {} ({}x{}) {} v{}",
            idx + 1,
            item.platform(),
            item.size(),
            dims.width,
            dims.height,
            item.state(),
            item.template_version()
        )?;
        if let Some(preview) = item.preview() {
            write!(out, " preview={}", preview.path.display())?;
        }
        if let Some(message) = item.last_error() {
            write!(out, " error=\"{message}\"")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn print_item_detail<W: Write>(out: &mut W, item: &GenerationItem) -> io::Result<()> {
    print_items(out, std::slice::from_ref(item))?;
    writeln!(out, "{}", item.template())
}

fn print_history<W: Write>(studio: &Studio, out: &mut W) -> io::Result<()> {
    let history = studio.history();
    if history.is_empty() {
        return writeln!(out, "No conversation yet.");
    }
    for entry in history {
        writeln!(out, "[{}] you: {}", entry.created_at, entry.user_message)?;
        writeln!(out, "    studio: {}", entry.ai_response)?;
    }
    Ok(())
}

fn print_history_sync<W: Write>(out: &mut W, sync: &HistorySync) -> io::Result<()> {
    match sync {
        HistorySync::Loaded(0) => Ok(()),
        HistorySync::Loaded(count) => writeln!(out, "Loaded {count} earlier message(s)."),
        HistorySync::Unavailable(message) => writeln!(out, "History unavailable: {message}"),
    }
}
