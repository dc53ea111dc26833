use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use patent_harvest::config::{
    config_search_paths, find_config_file, load_config, Config, LogFormat, TOKEN_ENV_VAR,
};
use patent_harvest::harvest::{HarvestError, HarvestOutcome, Harvester};
use patent_harvest::models::{DateType, SearchField, SearchFilters};
use patent_harvest::sources::{ApiToken, LensSource};
use patent_harvest::ui::{self, ExportProgress, Status};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Patent Harvest - Bulk retrieval of patent search results into CSV
#[derive(Parser, Debug)]
#[command(name = "patent-harvest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search the Lens.org patent API and export flattened results to CSV", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (can be used multiple times for more verbosity: -v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (overrides the config file)
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormatArg>,

    /// Lens API bearer token
    #[arg(long, global = true, env = TOKEN_ENV_VAR, hide_env_values = true)]
    token: Option<String>,

    /// Search endpoint URL (overrides the config file)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormatArg {
    Plain,
    Json,
}

/// Fields free text can be matched against
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FieldArg {
    Title,
    Abstract,
    Claim,
}

impl From<FieldArg> for SearchField {
    fn from(arg: FieldArg) -> Self {
        match arg {
            FieldArg::Title => SearchField::Title,
            FieldArg::Abstract => SearchField::Abstract,
            FieldArg::Claim => SearchField::Claim,
        }
    }
}

/// Date the year range applies to
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum DateTypeArg {
    Application,
    Grant,
}

/// Search filters shared by every query command
#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// Free text; words are OR-ed, wrap phrases in double quotes, AND/OR/NOT act as operators
    #[arg(long, short = 't')]
    text: Option<String>,

    /// Fields the free text is matched against (repeatable)
    #[arg(long = "field", value_enum, default_values_t = [FieldArg::Title, FieldArg::Abstract])]
    fields: Vec<FieldArg>,

    /// Applicant name
    #[arg(long, short = 'a')]
    applicant: Option<String>,

    /// Space-separated IPC/CPC classification codes
    #[arg(long, short = 'c')]
    classification: Option<String>,

    /// Which date the year range applies to
    #[arg(long, value_enum, default_value_t = DateTypeArg::Application)]
    date_type: DateTypeArg,

    /// First year of the range (inclusive)
    #[arg(long)]
    start_year: Option<String>,

    /// Last year of the range (inclusive)
    #[arg(long)]
    end_year: Option<String>,

    /// Only granted patents
    #[arg(long)]
    granted: bool,

    /// Raw query expression, used instead of every other filter
    #[arg(
        long,
        conflicts_with_all = ["text", "applicant", "classification", "start_year", "end_year", "granted"]
    )]
    raw: Option<String>,
}

impl FilterArgs {
    fn to_filters(&self) -> SearchFilters {
        if let Some(raw) = &self.raw {
            return SearchFilters::raw(raw.clone());
        }

        let date_type = match self.date_type {
            DateTypeArg::Application => DateType::Application,
            DateTypeArg::Grant => DateType::Grant,
        };
        let mut filters = SearchFilters::new()
            .text(self.text.clone().unwrap_or_default())
            .search_fields(self.fields.iter().copied().map(SearchField::from).collect())
            .applicant(self.applicant.clone().unwrap_or_default())
            .classification(self.classification.clone().unwrap_or_default())
            .years(
                date_type,
                self.start_year.clone().unwrap_or_default(),
                self.end_year.clone().unwrap_or_default(),
            );
        if self.granted {
            filters = filters.granted_only();
        }
        filters
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Count matching patents without retrieving them
    Count {
        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Show the first page of matching patents
    Preview {
        #[command(flatten)]
        filters: FilterArgs,

        /// Number of records to show
        #[arg(long, short = 'n', default_value_t = 10)]
        size: usize,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Retrieve all matching patents into a CSV file
    Export {
        #[command(flatten)]
        filters: FilterArgs,

        /// Output file (default: a new file in the temp directory)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Maximum number of records to write
        #[arg(long)]
        max_records: Option<u64>,

        /// Records per page
        #[arg(long)]
        page_size: Option<usize>,

        /// Leave the raw_json column empty
        #[arg(long)]
        no_raw_json: bool,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// List config file locations
    Path,
    /// Write a default configuration file
    Init {
        /// Target file (default: ./patent-harvest.toml)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(cli: &Cli, config: &Config) {
    let log_level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = if cli.quiet { "error" } else { log_level };

    let format = match cli.log_format {
        Some(LogFormatArg::Json) => LogFormat::Json,
        Some(LogFormatArg::Plain) => LogFormat::Plain,
        None => config.logging.format,
    };
    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("patent_harvest={}", env_filter)),
        ))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .init();
}

fn build_harvester(cli: &Cli, config: &Config) -> Result<Harvester> {
    let token = cli
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| config.api_token())
        .with_context(|| format!("No API token; set {} or pass --token", TOKEN_ENV_VAR))?;

    let endpoint = cli.endpoint.as_deref().unwrap_or(&config.api.endpoint);
    let source = LensSource::with_endpoint(ApiToken::new(token), endpoint, config.request_timeout())
        .context("Failed to create Lens client")?;

    Ok(Harvester::new(Arc::new(source), config.retrieval.to_settings()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(find_config_file);
    let config = load_config(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load config from environment".to_string(),
    })?;

    init_tracing(&cli, &config);
    if let Some(path) = &config_path {
        tracing::info!("Using config file: {}", path.display());
    }

    match &cli.command {
        Commands::Count { filters } => {
            let harvester = build_harvester(&cli, &config)?;
            let query = filters.to_filters().build();
            let total = harvester.count(&query).await?;

            if cli.quiet {
                println!("{}", total);
            } else {
                ui::print_status(
                    Status::Search,
                    &format!("{} matching patents", ui::format_number(total)),
                );
            }
        }

        Commands::Preview {
            filters,
            size,
            json,
        } => {
            let harvester = build_harvester(&cli, &config)?;
            let query = filters.to_filters().build();
            let preview = harvester.preview(&query, *size).await?;

            if *json {
                let rows: Vec<_> = preview
                    .rows
                    .into_iter()
                    .map(|row| row.without_raw_json())
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                ui::print_section(&format!(
                    "{} matching patents, showing {}",
                    ui::format_number(preview.total_hits),
                    preview.rows.len()
                ));
                for (i, row) in preview.rows.iter().enumerate() {
                    ui::print_row(i, row);
                }
            }
        }

        Commands::Export {
            filters,
            output,
            max_records,
            page_size,
            no_raw_json,
        } => {
            let mut run_config = config.clone();
            if let Some(max) = max_records {
                run_config.retrieval.record_ceiling = *max;
            }
            if let Some(size) = page_size {
                if *size == 0 {
                    bail!("--page-size must be at least 1");
                }
                run_config.retrieval.page_size = *size;
            }
            if *no_raw_json {
                run_config.retrieval.include_raw_json = false;
            }

            let harvester = build_harvester(&cli, &run_config)?;
            let cancel = harvester.cancel_flag().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping after the current page");
                    cancel.cancel();
                }
            });

            let query = filters.to_filters().build();
            let mut progress = ExportProgress::new(cli.quiet);
            let result = harvester
                .export(query, output.as_deref(), &mut progress)
                .await;
            progress.finish();

            match result {
                Ok(HarvestOutcome::Completed(report)) => {
                    if cli.quiet {
                        println!("{}", report.path.display());
                    } else {
                        ui::print_report(&report);
                    }
                }
                Ok(HarvestOutcome::NoResults { total_hits }) => {
                    ui::print_status(
                        Status::Warning,
                        &format!("No records retrieved ({} hits reported)", total_hits),
                    );
                }
                Err(HarvestError::Cancelled { records_processed }) => {
                    ui::print_status(
                        Status::Error,
                        &format!(
                            "Cancelled after {} records; partial output removed",
                            ui::format_number(records_processed)
                        ),
                    );
                    std::process::exit(130);
                }
                Err(err) => return Err(err).context("Export failed"),
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", config.to_toml()?);
            }
            ConfigCommands::Path => {
                for path in config_search_paths() {
                    let marker = if path.is_file() { "found" } else { "missing" };
                    println!("{} ({})", path.display(), marker);
                }
            }
            ConfigCommands::Init { path, force } => {
                let path = path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("patent-harvest.toml"));
                if path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
                Config::default()
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                ui::print_status(Status::Success, &format!("Wrote {}", path.display()));
            }
        },
    }

    Ok(())
}
