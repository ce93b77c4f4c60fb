mod cache;
mod client;
mod codes;
mod config;
mod csv_source;
mod data;
mod error;
mod fetch;
mod map_draw;
mod metrics;
mod params;
mod providers;
mod resolver;
mod rows;
mod rpc;
mod scale;
mod server;
mod state;
mod topology;
mod ui;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyEvent, KeyEventKind, MouseButton, MouseEvent,
        MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use csv_source::CsvTable;
use data::RowSet;
use resolver::{Resolution, Resolver};
use state::{AppState, Source};

const LOG_FILE: &str = "stratify.log";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "stratify.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON API and the static topology files
    Serve,
    /// Browse indicators on a terminal choropleth
    Browse {
        /// Read rows from a World Bank bulk CSV instead of the API
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
    },
    /// Report how map features reconcile to ISO3 codes
    Resolve {
        /// Rows used for name matching (World Bank bulk CSV)
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
        /// Print every feature's resolution as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Browse { .. } => {
            let file = File::create(LOG_FILE).with_context(|| format!("Failed to create {LOG_FILE}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::from_default_env())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        _ => tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init(),
    }

    let config = AppConfig::load(&cli.config)?;
    let runtime = Runtime::new().context("Failed to start async runtime")?;

    match cli.command {
        Commands::Serve => runtime.block_on(server::start_server(config)),
        Commands::Browse { csv } => browse(&runtime, config, csv.as_deref()),
        Commands::Resolve { csv, json } => resolve(&runtime, &config, csv.as_deref(), json),
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("stratify/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

fn browse(runtime: &Runtime, config: AppConfig, csv: Option<&Path>) -> Result<()> {
    let http = http_client()?;
    let source = match csv {
        Some(path) => Source::Csv(Arc::new(CsvTable::load(path)?)),
        None => Source::Api(client::ApiClient::new(http.clone(), &config.browse.api_url)),
    };

    let topo = &config.topology;
    let (features, topo_error) = match runtime.block_on(topology::load(&topo.source, topo.object.as_deref(), &http)) {
        Ok(features) => (features, None),
        Err(e) => {
            warn!("topology unavailable: {e:#}");
            (Vec::new(), Some(format!("Map unavailable: {e:#}")))
        }
    };

    let mut state = AppState::new(features, &config, source, runtime.handle().clone());
    if topo_error.is_some() {
        state.map_error = topo_error;
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut state);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    result
}

fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, state: &mut AppState) -> Result<()> {
    loop {
        state.drain();
        terminal.draw(|f| ui::draw(f, state))?;

        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(KeyEvent { code, kind: KeyEventKind::Press, .. }) => {
                    if state.handle_input(code) {
                        return Ok(());
                    }
                }
                Event::Mouse(MouseEvent { kind: MouseEventKind::Down(MouseButton::Left), column, row, .. }) => {
                    state.click_map(column, row);
                }
                _ => {}
            }
        }
    }
}

fn resolve(runtime: &Runtime, config: &AppConfig, csv: Option<&Path>, json: bool) -> Result<()> {
    let http = http_client()?;
    let topo = &config.topology;
    let features = runtime.block_on(topology::load(&topo.source, topo.object.as_deref(), &http))?;
    let rows = match csv {
        Some(path) => {
            let table = CsvTable::load(path)?;
            RowSet::new(table.latest_year().map(|y| table.rows_for_year(y)).unwrap_or_default())
        }
        None => RowSet::default(),
    };

    let resolved = Resolver::from_config(&config.resolver).reconcile(&features, &rows);
    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    let mut unresolved = Vec::new();
    let (mut coded, mut duplicates) = (0, 0);
    for rf in &resolved {
        match &rf.resolution {
            Resolution::Code { .. } => coded += 1,
            Resolution::Duplicate { .. } => duplicates += 1,
            Resolution::Unresolved => unresolved.push(rf.index),
        }
    }
    info!(features = features.len(), coded, duplicates, unresolved = unresolved.len(), "reconciled");
    println!("{} features: {coded} resolved, {duplicates} dropped as duplicates, {} unresolved",
        features.len(), unresolved.len());
    for i in unresolved {
        let name = features[i].display_name().unwrap_or_else(|| format!("feature #{i}"));
        println!("  unresolved: {name}");
    }
    Ok(())
}
