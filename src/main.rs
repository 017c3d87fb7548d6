use std::fs;
use std::io::Stdout;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::info;
use tracing::level_filters::LevelFilter;

mod app;
mod config;
mod database;
mod dates;
mod export;
mod jobs;
mod logging;
mod models;
mod redmine;
mod reporting;
mod rounding;
mod sync;
mod timer;
mod ui;

use app::App;
use config::{CONFIG_FILE, ConfigStore, DATABASE_FILE, default_data_dir};
use database::{Database, EntryFilter};
use dates::{DateRange, parse_date};
use logging::{CLI_PREFIX, TUI_PREFIX, enable_logging};

#[derive(Parser, Debug)]
#[command(name = "zeiterfassung", version)]
#[command(about = "Stopwatch time tracking with Redmine sync", long_about = None)]
struct Cli {
    #[arg(long, help = "Data directory. Defaults to the platform data directory")]
    data_dir: Option<PathBuf>,
    #[arg(long = "log-level", help = "Log filter level, overrides RUST_LOG")]
    log_level: Option<LevelFilter>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Pull your Redmine time entries into the local store")]
    Sync,
    #[command(about = "Compare local bookings with Redmine tickets")]
    Check,
    #[command(about = "Export entries to an xlsx file")]
    Export {
        #[arg(help = "Target file. Defaults to the configured export path")]
        path: Option<PathBuf>,
        #[arg(long, value_parser = parse_date, requires = "to", help = "First day (YYYY-MM-DD)")]
        from: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date, requires = "from", help = "Last day (YYYY-MM-DD)")]
        to: Option<NaiveDate>,
        #[arg(long, help = "Only entries of this project")]
        project: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    match cli.command {
        None => {
            enable_logging(TUI_PREFIX, &data_dir, cli.log_level, false)?;
            run_tui(&data_dir)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(command) => {
            enable_logging(CLI_PREFIX, &data_dir, cli.log_level, true)?;
            run_command(command, &data_dir)
        }
    }
}

fn run_command(command: Command, data_dir: &Path) -> Result<ExitCode> {
    let mut store = ConfigStore::load(data_dir.join(CONFIG_FILE))?;
    let db = Database::open(&data_dir.join(DATABASE_FILE))?;

    match command {
        Command::Sync => {
            let client = sync::client(&store.config().redmine, None)?;
            let report = sync::pull_time_entries(&client, &db, store.config())?;
            let mut merged = 0;
            store.update(|config| merged = config.merge_catalog(&report.projects, &report.work_packages))?;
            println!("{}", report.summary());
            if merged > 0 {
                println!("Added {merged} projects and work packages to the catalog.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let client = sync::client(&store.config().redmine, None)?;
            let report = sync::verify(&client, &db, store.config())?;
            for line in report.lines() {
                println!("{line}");
            }
            Ok(if report.is_consistent() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Export {
            path,
            from,
            to,
            project,
        } => {
            let range = match from.zip(to) {
                Some((start, end)) => Some(DateRange::from_bounds(start, end).map_err(anyhow::Error::msg)?),
                None => None,
            };
            let filter = EntryFilter {
                range,
                project,
                work_packages: Vec::new(),
            };
            let path = path.unwrap_or_else(|| store.config().export_path(data_dir));
            let rows = export::export_entries(&db, &filter, store.config(), &path)?;
            match range {
                Some(range) => println!("Exported {rows} entries ({}) to {}", range.label(), path.display()),
                None => println!("Exported {rows} entries to {}", path.display()),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_tui(data_dir: &Path) -> Result<()> {
    let mut app = App::open(data_dir)?;
    info!(data_dir = %data_dir.display(), "starting");

    let mut stdout = std::io::stdout();
    enable_raw_mode()?;
    stdout.execute(EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = run_loop(&mut terminal, &mut app);

    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    info!("stopped");
    result
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    loop {
        app.tick();

        terminal.draw(|frame| ui::draw(frame, app))?;

        if app.should_quit {
            return Ok(());
        }

        if event::poll(Duration::from_millis(120))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key_event(key);
                }
            }
        }
    }
}
