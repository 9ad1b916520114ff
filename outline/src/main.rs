use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use flexi_logger::{Logger, LoggerHandle};
use log::{debug, info};
use outline::core::Node;
use outline::dates::{
    DateError, DateRange, DateSeparator, DateShape, FormatOptions, format_range_with,
};
use outline::format::reformat;
use outline::projectors::event_projector::{self, ProjectOptions, ProjectedEvent};
use outline::{convert, parse_all, parse_payload};

const LOG_ENV: &str = "OUTLINE_LOG";
const OUTLINE_EXTENSION: &str = "taskpaper";

#[derive(Debug, Parser)]
#[command(
    name = "outline",
    about = "TaskPaper-style outline tooling built on the outline crate",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse outline files and print their structure.
    Parse(ParseArgs),

    /// Rewrite outline files with canonical tab indentation.
    Format(FormatArgs),

    /// List dated entries as calendar events.
    Events(EventsArgs),

    /// Validate a date payload and print it in a chosen shape.
    Date(DateArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Outline files or directories containing outline files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
    /// Print the per-line nodes without folding them into a tree.
    #[arg(long)]
    flat: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Outline files or directories to format.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct EventsArgs {
    /// Outline files or directories to scan for `@due` entries.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Inclusive start date filter (YYYY-MM-DD).
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Inclusive end date filter (YYYY-MM-DD).
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Keep entries already tagged `@done`.
    #[arg(long)]
    include_done: bool,
    /// Emit JSON instead of a human-readable list.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct DateArgs {
    /// Payload text, e.g. "2024-11-30 11:30-23:30".
    payload: String,
    /// Output shape. Defaults to the shape of the input.
    #[arg(long, value_enum)]
    shape: Option<ShapeArg>,
    /// Word placed between the two halves of a range.
    #[arg(long, value_enum, default_value_t = SeparatorArg::Compact)]
    separator: SeparatorArg,
    /// Omit the spaces around the separator.
    #[arg(long)]
    no_spaces: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ShapeArg {
    Date,
    DateTime,
    DateTimeEndTime,
    DateTimeDateTime,
}

impl From<ShapeArg> for DateShape {
    fn from(arg: ShapeArg) -> Self {
        match arg {
            ShapeArg::Date => DateShape::Date,
            ShapeArg::DateTime => DateShape::DateTime,
            ShapeArg::DateTimeEndTime => DateShape::DateTimeEndTime,
            ShapeArg::DateTimeDateTime => DateShape::DateTimeDateTime,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SeparatorArg {
    Compact,
    Extended,
    GrammarExtended,
}

impl From<SeparatorArg> for DateSeparator {
    fn from(arg: SeparatorArg) -> Self {
        match arg {
            SeparatorArg::Compact => DateSeparator::Compact,
            SeparatorArg::Extended => DateSeparator::Extended,
            SeparatorArg::GrammarExtended => DateSeparator::GrammarExtended,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(cli.verbose)?;
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Format(args) => handle_format(args),
        Commands::Events(args) => handle_events(args),
        Commands::Date(args) => handle_date(args),
    }
}

/// Log to stderr. `OUTLINE_LOG` takes a full flexi_logger spec and wins over `--verbose`.
fn init_logging(verbose: bool) -> Result<LoggerHandle> {
    let spec = std::env::var(LOG_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| if verbose { "debug" } else { "warn" }.to_string());
    Logger::try_with_str(&spec)
        .with_context(|| format!("invalid log spec {:?}", spec))?
        .log_to_stderr()
        .format(flexi_logger::default_format)
        .start()
        .context("starting logger")
}

fn read_outline(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {:?}", path))
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs { inputs, json, flat } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no outline files found in the provided inputs");
    }

    let mut parsed = Vec::new();
    for path in expanded {
        debug!("parsing {:?}", path);
        let text = read_outline(&path)?;
        let nodes = if flat { parse_all(&text) } else { convert(&text) };
        parsed.push((path, nodes));
    }

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            nodes: &'a [Node],
        }

        let payload: Vec<JsonOutput<'_>> = parsed
            .iter()
            .map(|(path, nodes)| JsonOutput {
                path: path.display().to_string(),
                nodes,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, (path, nodes)) in parsed.iter().enumerate() {
            if parsed.len() > 1 {
                println!("== {} ==", path.display());
            }
            println!("{:#?}", nodes);
            if parsed.len() > 1 && idx + 1 < parsed.len() {
                println!();
            }
        }
    }
    Ok(())
}

fn handle_format(args: FormatArgs) -> Result<()> {
    let FormatArgs { inputs, in_place } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no outline files found in the provided inputs");
    }
    let many = expanded.len() > 1;

    for (idx, path) in expanded.iter().enumerate() {
        debug!("formatting {:?}", path);
        let formatted = reformat(&read_outline(path)?);

        if in_place {
            fs::write(path, with_final_newline(formatted).as_bytes())
                .with_context(|| format!("writing {:?}", path))?;
            info!("rewrote {:?}", path);
        } else {
            if idx > 0 {
                println!();
            }
            if many {
                println!("== {} ==", path.display());
            }
            print!("{}", with_final_newline(formatted));
        }
    }
    Ok(())
}

fn with_final_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

fn handle_events(args: EventsArgs) -> Result<()> {
    let EventsArgs {
        inputs,
        from,
        to,
        include_done,
        json,
    } = args;

    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no outline files found in the provided inputs");
    }

    let opts = ProjectOptions { include_done };
    let mut events = Vec::new();
    for path in expanded {
        debug!("collecting events from {:?}", path);
        let forest = convert(&read_outline(&path)?);
        events.extend(event_projector::project_forest_with_options(&forest, opts));
    }

    events.retain(|event| in_window(event, from, to));
    events.sort_by_key(|event| event.params.start);

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
    } else {
        for event in &events {
            println!("{}", describe_event(event));
        }
    }
    Ok(())
}

fn in_window(event: &ProjectedEvent, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    let day = event.params.start.date();
    from.is_none_or(|from| day >= from) && to.is_none_or(|to| day <= to)
}

fn describe_event(event: &ProjectedEvent) -> String {
    let params = &event.params;
    let when = match params.end {
        Some(end) => format!(
            "{} -> {}",
            params.date_format.render(params.start),
            params.date_format.render(end)
        ),
        None => params.date_format.render(params.start),
    };
    format!("{}  {}", when, event.context_path.join(" > "))
}

fn handle_date(args: DateArgs) -> Result<()> {
    let opts = FormatOptions {
        separator: args.separator.into(),
        with_spaces: !args.no_spaces,
    };
    let rendered = render_payload(&args.payload, args.shape.map(DateShape::from), opts)
        .with_context(|| format!("payload {:?}", args.payload))?;
    println!("{}", rendered);
    Ok(())
}

/// Parse and re-render a payload. Without an explicit shape, instants keep their input
/// shape and spans use the end-time form when they fit in one day.
fn render_payload(
    payload: &str,
    shape: Option<DateShape>,
    opts: FormatOptions,
) -> Result<String, DateError> {
    let range = parse_payload(payload)?;
    if let Some(shape) = shape {
        return format_range_with(&range, shape, opts);
    }
    match range {
        DateRange::Instant(_) => {
            let shape = DateShape::detect(payload).unwrap_or(DateShape::DateTime);
            format_range_with(&range, shape, opts)
        }
        DateRange::Span { .. } => format_range_with(&range, DateShape::DateTimeEndTime, opts)
            .or_else(|_| format_range_with(&range, DateShape::DateTimeDateTime, opts)),
    }
}

/// Resolve inputs to outline files. Directories are walked depth first in name order;
/// each file is listed once, in the order it is first reached.
fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        if canonical.is_file() && !has_outline_extension(&canonical) {
            anyhow::bail!("{:?} is not a .{} file", canonical, OUTLINE_EXTENSION);
        }
        walk_outlines(&canonical, &mut found, &mut seen)?;
    }
    Ok(found)
}

fn has_outline_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == OUTLINE_EXTENSION)
}

fn walk_outlines(
    path: &Path,
    found: &mut Vec<PathBuf>,
    seen: &mut HashSet<PathBuf>,
) -> Result<()> {
    let meta =
        fs::symlink_metadata(path).with_context(|| format!("reading metadata for {:?}", path))?;
    if meta.is_dir() {
        debug!("scanning directory {:?}", path);
        let mut entries = fs::read_dir(path)
            .with_context(|| format!("listing {:?}", path))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort();
        for entry in entries {
            walk_outlines(&entry, found, seen)?;
        }
    } else if meta.is_file() && has_outline_extension(path) && seen.insert(path.to_path_buf()) {
        debug!("adding outline file {:?}", path);
        found.push(path.to_path_buf());
    }
    Ok(())
}
