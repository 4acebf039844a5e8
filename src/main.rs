use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use heatline::{
    ColorMode, Config, DocumentId, GUTTER_NAME, MemorySurface, ProcessLauncher, SessionController,
    SessionEvent, SessionStatus, Surface, emit_report, parse_report,
};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;

mod cli_logger;

use cli_logger::{AnnotationRow, CliLogger, DocumentReport, ShowReport};

#[derive(Debug, Parser)]
#[command(name = "heatline", version, about = "Per-line profiling annotations for source files")]
struct Cli {
    /// Machine-readable output.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    no_color: bool,
    #[arg(long, global = true, default_value = "heatline.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open FILEs, profile the active one, and print every file's annotations.
    Show {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// File to profile (default: the first FILE).
        #[arg(long)]
        active: Option<PathBuf>,
        #[arg(long)]
        color_selection: Option<ColorMode>,
        #[arg(long)]
        profile_format: Option<String>,
    },
    /// Parse a captured profiler stdout payload.
    Parse { payload: PathBuf },
    /// Act as the profiler: convert `stats.prof` into a framed report on stdout.
    Emit {
        target: PathBuf,
        #[arg(default_value = "3")]
        color_mode: ColorMode,
        #[arg(default_value = heatline::DEFAULT_PROFILE_FORMAT)]
        format_template: String,
    },
    /// Print the effective configuration.
    Config,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let logger = CliLogger::new(cli.json, cli.no_color);
    match run(cli, &logger) {
        Ok(code) => code,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::from(2)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HEATLINE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli, logger: &CliLogger) -> Result<ExitCode> {
    match cli.command {
        Command::Show {
            files,
            active,
            color_selection,
            profile_format,
        } => {
            let mut config = Config::load_optional(&cli.config);
            if let Some(mode) = color_selection {
                config.color_selection = mode;
            }
            if let Some(format) = profile_format {
                config.profile_format = format;
            }
            show(config, logger, &files, active.as_ref())
        }

        Command::Parse { payload } => {
            let raw = std::fs::read_to_string(&payload)
                .with_context(|| format!("failed to read {}", payload.display()))?;
            let model = parse_report(&raw)?;
            logger.print_serialized(&model)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Emit {
            target,
            color_mode,
            format_template,
        } => {
            println!("{}", emit_report(&target, color_mode, &format_template)?);
            Ok(ExitCode::SUCCESS)
        }

        Command::Config => {
            logger.print_serialized(&Config::load_optional(&cli.config))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn show(
    config: Config,
    logger: &CliLogger,
    files: &[PathBuf],
    active: Option<&PathBuf>,
) -> Result<ExitCode> {
    let (tx, rx) = mpsc::channel();
    let launcher = ProcessLauncher::new(config.profiler.clone(), tx);
    let mut controller = SessionController::new(config, launcher);
    let mut surface = MemorySurface::new();
    controller.activate(&mut surface);

    let active = active.map(std::path::absolute).transpose()?;
    let mut active_doc: Option<DocumentId> = None;
    for file in files {
        let path = std::path::absolute(file)
            .with_context(|| format!("failed to resolve {}", file.display()))?;
        let path_str = path.to_string_lossy().into_owned();
        let doc = surface.open(Some(path_str.as_str()));
        if active_doc.is_none() || active.as_ref() == Some(&path) {
            active_doc = Some(doc);
        }
    }
    if let Some(active) = &active
        && !files.iter().any(|f| std::path::absolute(f).ok().as_ref() == Some(active))
    {
        bail!("--active {} is not one of the opened files", active.display());
    }
    surface.set_active(active_doc);
    for event in surface.drain_events() {
        controller.handle_event(&mut surface, SessionEvent::Document(event));
    }

    controller.handle_event(&mut surface, SessionEvent::Toggle);
    while controller.status() == SessionStatus::Running {
        let event = rx
            .recv()
            .context("profiler worker stopped without reporting")?;
        controller.handle_event(&mut surface, SessionEvent::Process(event));
    }

    for warning in surface.warnings() {
        logger.print_warning(warning);
    }

    let report = ShowReport {
        status: controller.status(),
        error: controller.last_error().cloned(),
        documents: surface
            .open_documents()
            .into_iter()
            .map(|doc| document_report(&surface, doc))
            .collect(),
    };
    logger.print_show(&report)?;

    controller.handle_event(&mut surface, SessionEvent::Teardown);
    Ok(match report.status {
        SessionStatus::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn document_report(surface: &MemorySurface, doc: DocumentId) -> DocumentReport {
    let width_hint = surface.document(doc).and_then(|d| {
        d.gutters
            .iter()
            .find(|g| g.name == GUTTER_NAME)
            .map(|g| g.width_hint.clone())
    });
    DocumentReport {
        path: surface.document_path(doc).unwrap_or_default(),
        width_hint,
        annotations: surface
            .markers_in(doc, GUTTER_NAME)
            .into_iter()
            .map(|m| AnnotationRow {
                line_index: m.range.line,
                text: m.annotation.text.clone(),
                color: m.annotation.background.map(|g| g.color),
                background: m.annotation.background.map(|g| g.css()),
            })
            .collect(),
    }
}
