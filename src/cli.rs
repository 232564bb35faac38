//! Command-line surface: argument parsing, settings resolution, logging
//! setup and dispatch to the API modules.
//!
//! Results (export file paths, listings) go to stdout. Logs go to stderr.

use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::ApiCredentials;
use crate::client::CbcClient;
use crate::config::Config;
use crate::environment::Environment;
use crate::error::{CbcError, Result};
use crate::export::{ExportFormat, Table, output_path, write_json, write_table};
use crate::flatten::Flattener;
use crate::poll::PollConfig;
use crate::watchlists::DisableOutcome;
use crate::{
    alerts, api_keys, asset_groups, audit_log, devices, investigate, live_query, live_response,
    sensor_kits, usb_devices, watchlists,
};

const REPCLI_STATUS: &str = "c:\\program files\\confer\\repcli.exe status";

#[derive(Parser, Debug)]
#[command(name = "cbc-export", version)]
#[command(about = "Query Carbon Black Cloud and export the results to CSV, XLSX or JSON")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Environment whose base URL to use.
    #[arg(short = 'e', long, global = true, value_enum)]
    pub environment: Option<Environment>,

    /// Org key (Settings > API Access > API Keys).
    #[arg(short = 'o', long, global = true)]
    pub org_key: Option<String>,

    /// Numeric org id. Required by audit-log, api-keys and sensor-kits.
    #[arg(long, global = true)]
    pub org_id: Option<String>,

    #[arg(short = 'i', long, global = true)]
    pub api_id: Option<String>,

    /// API secret key. Prefer the CBC_API_SECRET environment variable so
    /// the secret stays out of process listings and shell history.
    #[arg(short = 's', long, global = true, env = "CBC_API_SECRET", hide_env_values = true)]
    pub api_secret: Option<String>,

    /// Path to config TOML. If omitted, uses ./cbc-export.toml if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory export files are written to.
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Do not append a timestamp to export file names.
    #[arg(long, global = true)]
    pub no_timestamp: bool,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export the device inventory.
    Devices {
        #[arg(long, value_enum, default_value_t)]
        format: ExportFormat,
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// Export alerts (v7).
    Alerts {
        #[arg(long, value_enum, default_value_t)]
        format: ExportFormat,
        #[arg(long, default_value_t = 1)]
        min_severity: u8,
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// Run a process search and export the matches.
    Processes {
        /// Search query, e.g. `process_name:powershell.exe`.
        #[arg(short = 'q', long)]
        query: String,
        /// Relative time window.
        #[arg(long, default_value = "-30d", allow_hyphen_values = true)]
        window: String,
        /// Skip the per-process command line lookup.
        #[arg(long)]
        no_cmdline: bool,
        #[arg(long, value_enum, default_value_t)]
        format: ExportFormat,
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// Export the observations attached to an alert.
    Observations {
        #[arg(short = 'a', long)]
        alert_id: String,
        #[arg(long, default_value = "-180d", allow_hyphen_values = true)]
        window: String,
        #[arg(long, value_enum, default_value_t)]
        format: ExportFormat,
    },
    /// Export the audit log in 5-day windows.
    AuditLog {
        /// Days of history to export.
        #[arg(short = 'd', long)]
        days: u32,
        #[arg(long, default_value_t = audit_log::AUDIT_CHUNK_DAYS)]
        chunk_days: u32,
    },
    /// Watchlist export and expiry.
    Watchlists {
        #[command(subcommand)]
        action: WatchlistAction,
    },
    /// Export USB devices and the endpoints they were seen on (XLSX).
    UsbDevices,
    /// Export API keys and their usage stats.
    ApiKeys {
        #[arg(long, value_enum, default_value_t)]
        format: ExportFormat,
    },
    /// List or create asset groups.
    AssetGroups {
        #[command(subcommand)]
        action: AssetGroupAction,
    },
    /// Live Response sessions.
    LiveResponse {
        #[command(subcommand)]
        action: LiveResponseAction,
    },
    /// Compare two Live Query runs.
    Differential {
        #[arg(long)]
        newer_run_id: String,
        #[arg(long)]
        older_run_id: Option<String>,
        #[arg(long)]
        count_only: bool,
    },
    /// List published sensor kits.
    SensorKits {
        #[arg(long, default_value = "ENDPOINT")]
        deployment_type: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum WatchlistAction {
    /// One sheet per watchlist with report contents.
    Export,
    /// Disable watchlists whose description date has passed.
    DisableExpired,
}

#[derive(Subcommand, Debug)]
pub enum AssetGroupAction {
    List {
        /// Also write the groups to a file.
        #[arg(long)]
        export: bool,
        #[arg(long, value_enum, default_value_t)]
        format: ExportFormat,
    },
    /// Create a device group from a file of hostnames, one per line.
    Create {
        #[arg(short = 'g', long)]
        name: String,
        #[arg(short = 'f', long)]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum LiveResponseAction {
    /// Open a session and print its id.
    Start {
        #[arg(short = 'd', long)]
        device_id: i64,
    },
    /// Close a session.
    Close {
        #[arg(long)]
        session_id: String,
    },
    /// Run a command, fetch its output file, close the session.
    Run {
        #[arg(short = 'd', long)]
        device_id: i64,
        #[arg(long, default_value = REPCLI_STATUS)]
        command: String,
        /// Output path on the device. Defaults to c:\windows\temp\repcli-{device}.txt.
        #[arg(long)]
        output_file: Option<String>,
    },
}

impl Command {
    /// Services that reject requests without `X-Org`.
    fn needs_org_header(&self) -> bool {
        matches!(
            self,
            Command::Watchlists { .. }
                | Command::Observations { .. }
                | Command::Differential { .. }
                | Command::SensorKits { .. }
        )
    }
}

/// Connection and output settings after merging flags over config.
#[derive(Debug)]
pub struct Settings {
    pub environment: Option<Environment>,
    pub base_url: Option<String>,
    pub org_key: Option<String>,
    pub org_id: Option<String>,
    pub api_id: Option<String>,
    api_secret: Option<String>,
    pub org_header: bool,
    pub output_dir: PathBuf,
    pub timestamp: bool,
    pub poll: PollConfig,
}

impl Settings {
    pub fn resolve(args: &Args, cfg: &Config) -> Result<Self> {
        let conn = &cfg.connection;
        let environment = match (args.environment, conn.environment.as_deref()) {
            (Some(env), _) => Some(env),
            (None, Some(code)) => Some(code.parse()?),
            (None, None) => None,
        };
        Ok(Settings {
            environment,
            base_url: conn.base_url.clone(),
            org_key: args.org_key.clone().or_else(|| conn.org_key.clone()),
            org_id: args.org_id.clone().or_else(|| conn.org_id.clone()),
            api_id: args.api_id.clone().or_else(|| conn.api_id.clone()),
            api_secret: args.api_secret.clone(),
            org_header: conn.org_header || args.cmd.needs_org_header(),
            output_dir: args
                .output_dir
                .clone()
                .unwrap_or_else(|| cfg.export.output_dir.clone()),
            timestamp: cfg.export.timestamp && !args.no_timestamp,
            poll: cfg.poll.to_poll_config()?,
        })
    }

    pub fn client(&self) -> Result<CbcClient> {
        let api_id = require(self.api_id.as_deref(), "api id (-i/--api-id)")?;
        let secret = require(self.api_secret.as_deref(), "api secret (-s or CBC_API_SECRET)")?;
        let org_key = require(self.org_key.as_deref(), "org key (-o/--org-key)")?;
        let credentials = ApiCredentials::new(api_id, secret)?;

        let client = match (&self.base_url, self.environment) {
            (Some(url), _) => CbcClient::with_base_url(url, org_key, credentials)?,
            (None, Some(env)) => CbcClient::new(env, org_key, credentials)?,
            (None, None) => return Err(missing("environment (-e/--environment)")),
        };
        Ok(client.with_org_header(self.org_header))
    }

    pub fn org_id(&self) -> Result<&str> {
        require(self.org_id.as_deref(), "org id (--org-id)")
    }

    fn output(&self, stem: &str, format: ExportFormat) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let ts = self.timestamp.then(|| Local::now().naive_local());
        Ok(output_path(&self.output_dir, stem, format, ts))
    }
}

fn missing(what: &str) -> CbcError {
    CbcError::Config(format!("missing {what}"))
}

fn require<'a>(value: Option<&'a str>, what: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing(what))
}

pub fn init_logging(args: &Args, cfg: &Config) -> Result<()> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let layer = if args.log_json || cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| CbcError::Config(format!("failed to init logging: {e}")))
}

/// Loads config, sets up logging and runs the command.
pub async fn run(args: Args) -> Result<()> {
    let cfg = Config::resolve(args.config.as_deref())?;
    init_logging(&args, &cfg)?;
    let settings = Settings::resolve(&args, &cfg)?;
    dispatch(&args.cmd, &settings).await
}

pub async fn dispatch(cmd: &Command, settings: &Settings) -> Result<()> {
    let client = settings.client()?;

    match cmd {
        Command::Devices { format, max_rows } => {
            let found = devices::search_all_devices(
                &client,
                &devices::export_devices_request(),
                max_rows.unwrap_or(usize::MAX),
            )
            .await?;
            export_records(settings, "devices", *format, &to_records(&found)?, |_| {})
        }
        Command::Alerts {
            format,
            min_severity,
            max_rows,
        } => {
            let found = alerts::search_all_alerts(
                &client,
                &alerts::export_alerts_request(*min_severity),
                max_rows.unwrap_or(usize::MAX),
            )
            .await?;
            export_records(settings, "alerts", *format, &to_records(&found)?, |_| {})
        }
        Command::Processes {
            query,
            window,
            no_cmdline,
            format,
            max_rows,
        } => {
            let request = investigate::process_search_request(query, window);
            let mut found = investigate::search_processes(
                &client,
                &request,
                max_rows.unwrap_or(usize::MAX),
                &settings.poll,
            )
            .await?;
            if !no_cmdline {
                investigate::enrich_process_cmdlines(&client, &mut found, &settings.poll).await?;
            }
            export_records(settings, "processes", *format, &to_records(&found)?, |t| {
                t.select(investigate::PROCESS_EXPORT_COLUMNS)
            })
        }
        Command::Observations {
            alert_id,
            window,
            format,
        } => {
            let request = investigate::observations_for_alert_request(alert_id, window);
            let found =
                investigate::search_observations(&client, &request, usize::MAX, &settings.poll)
                    .await?;
            let stem = format!("observations-{alert_id}");
            export_records(settings, &stem, *format, &to_records(&found)?, |_| {})
        }
        Command::AuditLog { days, chunk_days } => {
            let entries = audit_log::export_audit_log(
                &client,
                settings.org_id()?,
                *days,
                *chunk_days,
                Utc::now(),
            )
            .await?;
            let path = settings.output("audit_log", ExportFormat::Json)?;
            write_json(&entries, &path)?;
            report(&path);
            Ok(())
        }
        Command::Watchlists { action } => match action {
            WatchlistAction::Export => {
                let mut workbook = watchlists::export_watchlists(&client).await?;
                let path = settings.output("watchlists", ExportFormat::Xlsx)?;
                workbook.save(&path)?;
                report(&path);
                Ok(())
            }
            WatchlistAction::DisableExpired => {
                let today = Local::now().date_naive();
                let outcomes = watchlists::disable_expired(&client, today).await?;
                for o in &outcomes {
                    println!("{}\t{}\t{}", o.id, o.name, describe_outcome(&o.outcome));
                }
                let failed = outcomes
                    .iter()
                    .filter(|o| matches!(o.outcome, DisableOutcome::Failed { .. }))
                    .count();
                if failed > 0 {
                    warn!(failed, "some watchlists could not be disabled");
                }
                Ok(())
            }
        },
        Command::UsbDevices => {
            let mut workbook = usb_devices::export_usb_devices(&client).await?;
            let path = settings.output("usb-devices", ExportFormat::Xlsx)?;
            workbook.save(&path)?;
            report(&path);
            Ok(())
        }
        Command::ApiKeys { format } => {
            let entries = api_keys::find_api_keys(&client, settings.org_id()?).await?;
            let table = api_keys::api_key_table(&entries)?;
            let path = settings.output("apikeys", *format)?;
            write_table(&table, *format, &path, "API keys")?;
            report(&path);
            Ok(())
        }
        Command::AssetGroups { action } => match action {
            AssetGroupAction::List { export, format } => {
                let list = asset_groups::list_asset_groups(&client).await?;
                println!("Total asset groups found: {}", list.num_found);
                for g in &list.results {
                    println!("{}\t{}", g.id, g.name);
                }
                if *export {
                    export_records(settings, "assetGroups", *format, &to_records(&list.results)?, |_| {})?;
                }
                Ok(())
            }
            AssetGroupAction::Create { name, file } => {
                let hostnames = std::fs::read_to_string(file)?;
                let query = asset_groups::hostname_query(&hostnames)?;
                let group = asset_groups::NewAssetGroup::devices(name, query);
                let created = asset_groups::create_asset_group(&client, &group).await?;
                println!("{}", created.id);
                Ok(())
            }
        },
        Command::LiveResponse { action } => match action {
            LiveResponseAction::Start { device_id } => {
                let session = live_response::start_session(&client, *device_id, &settings.poll).await?;
                println!("{}", session.id);
                Ok(())
            }
            LiveResponseAction::Close { session_id } => {
                live_response::close_session(&client, session_id).await
            }
            LiveResponseAction::Run {
                device_id,
                command,
                output_file,
            } => {
                let remote = output_file
                    .clone()
                    .unwrap_or_else(|| format!("c:\\windows\\temp\\repcli-{device_id}.txt"));
                let out = live_response::run_and_collect(
                    &client,
                    *device_id,
                    command,
                    &remote,
                    &settings.poll,
                )
                .await?;
                std::fs::create_dir_all(&settings.output_dir)?;
                let path = settings.output_dir.join(format!("repcli-{device_id}.txt"));
                std::fs::write(&path, &out.content)?;
                report(&path);
                Ok(())
            }
        },
        Command::Differential {
            newer_run_id,
            older_run_id,
            count_only,
        } => {
            let diff = live_query::differential_search(
                &client,
                newer_run_id,
                older_run_id.as_deref(),
                *count_only,
            )
            .await?;
            info!(num_found = diff.num_found, "differential results");
            println!("{}", serde_json::to_string_pretty(&diff.results)?);
            Ok(())
        }
        Command::SensorKits { deployment_type } => {
            let kits =
                sensor_kits::published_sensor_kits(&client, settings.org_id()?, deployment_type)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&kits)?);
            Ok(())
        }
    }
}

fn to_records<T: Serialize>(items: &[T]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(CbcError::from))
        .collect()
}

/// JSON keeps the records as returned; CSV and XLSX get a flattened table
/// that `shape` may trim or rearrange.
fn export_records(
    settings: &Settings,
    stem: &str,
    format: ExportFormat,
    records: &[Value],
    shape: impl FnOnce(&mut Table),
) -> Result<()> {
    let path = settings.output(stem, format)?;
    if format == ExportFormat::Json {
        write_json(records, &path)?;
    } else {
        let mut table = Table::from_records(records, &Flattener::default())?;
        shape(&mut table);
        write_table(&table, format, &path, stem)?;
    }
    info!(rows = records.len(), "export complete");
    report(&path);
    Ok(())
}

fn report(path: &Path) {
    println!("{}", path.display());
}

fn describe_outcome(outcome: &DisableOutcome) -> String {
    match outcome {
        DisableOutcome::NoExpiry => "no expiration date".to_string(),
        DisableOutcome::NotExpired { expires } => format!("expires {expires}, left enabled"),
        DisableOutcome::AlreadyDisabled { expires } => format!("expired {expires}, already disabled"),
        DisableOutcome::Disabled { expires } => format!("expired {expires}, disabled"),
        DisableOutcome::Failed { expires, error } => format!("expired {expires}, update failed: {error}"),
    }
}
