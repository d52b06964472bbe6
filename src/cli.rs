///
/// This module implements the CLI for ddd-export: command parsing, session setup and
/// user-visible output. Selection rules and the export pipeline live in
/// [`ddd-export-core`]; this module only wires concrete collaborators into them.
///
/// ## Commands
/// - `vehicles`: list (and search) vehicles visible to the account
/// - `files`: list tachograph files matching a date for one vehicle
/// - `export`: archive one vehicle's files for a date, write it locally or mail it
/// - `auto`: unattended run over every vehicle for yesterday (or `--date`)
/// - `automation`: show or update per-user automation records
///
/// [`ddd-export-core`]: ../../ddd-export-core/
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use ddd_export_core::catalog::VehicleCatalog;
use ddd_export_core::contract::{AutomationStore, SessionToken, UserAutomationRecord};
use ddd_export_core::export::{
    list_files_or_empty, Delivery, ExportOutcome, ExportPipeline, ExportReport, ExportSettings,
    FileSelection,
};
use tracing::Instrument;

use crate::load_config::{load_config, AppConfig};
use crate::mailer::{SmtpNotifier, SmtpSettings};
use crate::user_store::{enabled_records, upsert_record, JsonFileStore};
use crate::wialon::WialonClient;

/// CLI for ddd-export: fetch, bundle and mail tachograph files.
#[derive(Parser)]
#[clap(
    name = "ddd-export",
    version,
    about = "List, archive and mail tachograph (DDD) files from a Wialon account"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Existing session id; when absent the TOKEN environment variable is used to log in
    #[clap(long, global = true)]
    pub sid: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List vehicles visible to the account
    Vehicles {
        /// Case-insensitive filter over registration and name
        #[clap(long)]
        search: Option<String>,
        /// Prefer vehicles created by this login name
        #[clap(long)]
        owner: Option<String>,
    },
    /// List tachograph files of one vehicle for a date
    Files {
        #[clap(long)]
        vehicle: i64,
        /// Target date (YYYY-MM-DD), defaults to today
        #[clap(long)]
        date: Option<NaiveDate>,
    },
    /// Archive one vehicle's files for a date
    Export {
        #[clap(long)]
        vehicle: i64,
        /// Target date (YYYY-MM-DD), defaults to today
        #[clap(long)]
        date: Option<NaiveDate>,
        /// Only these files (repeatable); defaults to every file for the date
        #[clap(long = "file")]
        files: Vec<String>,
        /// Where to write the archive; defaults to `{registration}_{date}.zip`
        #[clap(long)]
        out: Option<PathBuf>,
        /// Mail the archive instead of writing it
        #[clap(long)]
        email: bool,
        /// Comma-separated recipients; defaults to RECIPIENTS
        #[clap(long)]
        recipients: Option<String>,
    },
    /// Unattended run: every vehicle, yesterday's files, mailed
    Auto {
        /// Target date (YYYY-MM-DD), defaults to yesterday
        #[clap(long)]
        date: Option<NaiveDate>,
        /// Run once per enabled record of the automation store instead of TOKEN/RECIPIENTS
        #[clap(long)]
        users: bool,
    },
    /// Per-user automation records
    Automation {
        #[clap(subcommand)]
        action: AutomationAction,
    },
}

#[derive(Subcommand)]
pub enum AutomationAction {
    /// Show the record of a user
    Show {
        #[clap(long)]
        user: String,
    },
    /// Create or update the record of a user
    Set {
        #[clap(long)]
        user: String,
        #[clap(long)]
        token: Option<String>,
        #[clap(long)]
        recipients: Option<String>,
        #[clap(long)]
        enabled: Option<bool>,
    },
}

async fn connect(config: &AppConfig, sid: Option<&str>) -> Result<WialonClient> {
    let client = match sid {
        Some(sid) => WialonClient::with_session(
            &config.api.base_url,
            SessionToken::new(sid),
            config.api.timeouts.clone(),
        )?,
        None => {
            let token = config.require_token()?;
            WialonClient::login(&config.api.base_url, &token, config.api.timeouts.clone()).await?
        }
    };
    Ok(client)
}

async fn resolve_owner(
    catalog: &VehicleCatalog<'_, WialonClient>,
    owner: Option<&str>,
) -> Result<Option<i64>> {
    match owner {
        Some(name) => {
            let id = catalog.resolve_user(name).await?;
            if id.is_none() {
                tracing::warn!(user = name, "Owner not found, listing all vehicles");
            }
            Ok(id)
        }
        None => Ok(None),
    }
}

fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => "(unset)".to_string(),
        n if n <= 4 => "****".to_string(),
        n => format!(
            "{}...{}",
            chars[..2].iter().collect::<String>(),
            chars[n - 2..].iter().collect::<String>()
        ),
    }
}

/// A local `export` never sends mail, so it gets a notifier without credentials.
fn notifier_for(config: &AppConfig, email: bool) -> Result<SmtpNotifier> {
    let settings = if email {
        config.smtp_settings()?
    } else {
        SmtpSettings {
            host: config.smtp.host.clone(),
            port: config.smtp.port,
            user: String::new(),
            password: String::new(),
        }
    };
    Ok(SmtpNotifier::new(settings))
}

fn write_archive(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write archive {}", path.display()))
}

fn print_report(report: &ExportReport) {
    println!("Export for {} complete.", report.date);
    for v in &report.vehicles {
        let detail = match &v.result {
            Ok(outcome) => outcome
                .archive()
                .map(|a| format!("{} ({} files, sha256 {})", a.file_name, a.entries.len(), a.sha256_hex()))
                .unwrap_or_default(),
            Err(e) => e.to_string(),
        };
        println!("  {:<6} {:<12} {:<12} {}", v.vehicle.id, v.vehicle.label(), v.state(), detail);
        if let Ok(ExportOutcome::MailFailed { error, .. }) = &v.result {
            println!("         mail error: {error}");
        }
    }
}

async fn run_headless(
    config: &AppConfig,
    client: &WialonClient,
    notifier: &SmtpNotifier,
    owner: Option<i64>,
    date: NaiveDate,
    recipients: String,
) -> Result<ExportReport> {
    let catalog = VehicleCatalog::new(client, config.export.cache_ttl());
    let settings = ExportSettings {
        matcher: config.export.matcher(),
        owner,
        concurrency: config.export.concurrency,
    };
    let pipeline = ExportPipeline::new(&catalog, client, notifier, settings);
    let selection = FileSelection::MatchingDate {
        fallback_recent: config.export.fallback_recent,
    };
    let report = pipeline
        .export_all(date, &selection, &Delivery::Email { recipients })
        .await?;
    Ok(report)
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");
    let config = load_config(cli.config.as_deref())?;
    let sid = cli.sid.as_deref();
    let basis = config.export.date_basis;

    match cli.command {
        Commands::Vehicles { search, owner } => {
            let client = connect(&config, sid).await?;
            let catalog = VehicleCatalog::new(&client, config.export.cache_ttl());
            let owner_name = owner.as_deref().or(config.export.owner.as_deref());
            let owner = resolve_owner(&catalog, owner_name).await?;
            let vehicles = match search.as_deref() {
                Some(needle) => catalog.search(owner, needle).await?,
                None => catalog.list_vehicles(owner).await?,
            };
            if vehicles.is_empty() {
                println!("No vehicles found.");
            }
            for v in &vehicles {
                println!("{:<8} {:<12} {}", v.id, v.registration_number, v.name);
            }
            Ok(())
        }
        Commands::Files { vehicle, date } => {
            let date = date.unwrap_or_else(|| basis.today());
            let client = connect(&config, sid).await?;
            let listing = list_files_or_empty(&client, vehicle).await?;
            let files = config.export.matcher().select(&listing, date);
            println!("Vehicle {vehicle} on {} ({} files)", date.format("%d.%m.%Y"), files.len());
            for f in &files {
                println!("  {}", f.name);
            }
            Ok(())
        }
        Commands::Export {
            vehicle,
            date,
            files,
            out,
            email,
            recipients,
        } => {
            let date = date.unwrap_or_else(|| basis.today());
            let client = connect(&config, sid).await?;
            let catalog = VehicleCatalog::new(&client, config.export.cache_ttl());
            let owner = resolve_owner(&catalog, config.export.owner.as_deref()).await?;
            let notifier = notifier_for(&config, email)?;
            let delivery = if email {
                let recipients = match recipients {
                    Some(r) => r,
                    None => config.require_recipients()?,
                };
                Delivery::Email { recipients }
            } else {
                Delivery::LocalDownload
            };
            let selection = if files.is_empty() {
                FileSelection::MatchingDate {
                    fallback_recent: None,
                }
            } else {
                FileSelection::Named(files)
            };
            let settings = ExportSettings {
                matcher: config.export.matcher(),
                owner,
                concurrency: 1,
            };
            let pipeline = ExportPipeline::new(&catalog, &client, &notifier, settings);
            let outcome = pipeline
                .export_vehicle(vehicle, date, &selection, &delivery)
                .await?;

            match outcome {
                ExportOutcome::NoFiles => {
                    println!("No files for vehicle {vehicle} on {}.", date.format("%d.%m.%Y"));
                    Ok(())
                }
                ExportOutcome::Ready(archive) => {
                    let path = out.unwrap_or_else(|| PathBuf::from(&archive.file_name));
                    write_archive(&path, &archive.bytes)?;
                    println!("Wrote {} ({} files) to {}", archive.file_name, archive.entries.len(), path.display());
                    Ok(())
                }
                ExportOutcome::Sent(archive) => {
                    println!("Sent {} ({} files).", archive.file_name, archive.entries.len());
                    Ok(())
                }
                ExportOutcome::MailFailed { archive, error } => {
                    let path = out.unwrap_or_else(|| PathBuf::from(&archive.file_name));
                    write_archive(&path, &archive.bytes)?;
                    println!("Mail failed; archive kept at {}", path.display());
                    Err(anyhow::Error::new(error).context("Mail delivery failed"))
                }
            }
        }
        Commands::Auto { date, users } => {
            config.validate_headless(!users)?;
            let date = date.unwrap_or_else(|| basis.yesterday());
            let notifier = SmtpNotifier::new(config.smtp_settings()?);
            let run_id = uuid::Uuid::new_v4();
            let span = tracing::info_span!("auto", %run_id, %date);

            async {
                let mut failures = 0usize;
                if users {
                    let store = JsonFileStore::new(&config.store.path);
                    for (user_id, record) in enabled_records(&store)? {
                        if record.token.is_empty() || record.recipients.is_empty() {
                            tracing::warn!(user_id = %user_id, "Enabled record lacks token or recipients, skipping");
                            failures += 1;
                            continue;
                        }
                        let client = match WialonClient::login(
                            &config.api.base_url,
                            &record.token,
                            config.api.timeouts.clone(),
                        )
                        .await
                        {
                            Ok(c) => c,
                            Err(e) => {
                                tracing::error!(user_id = %user_id, error = %e, "Login failed for automation record");
                                failures += 1;
                                continue;
                            }
                        };
                        let owner = user_id.parse::<i64>().ok();
                        match run_headless(&config, &client, &notifier, owner, date, record.recipients.clone()).await {
                            Ok(report) => {
                                println!("User {user_id}:");
                                print_report(&report);
                                failures += report.failures();
                            }
                            Err(e) => {
                                tracing::error!(user_id = %user_id, error = %e, "Automation run failed");
                                failures += 1;
                            }
                        }
                    }
                } else {
                    let client = connect(&config, sid).await?;
                    let owner = {
                        let catalog = VehicleCatalog::new(&client, config.export.cache_ttl());
                        resolve_owner(&catalog, config.export.owner.as_deref()).await?
                    };
                    let report =
                        run_headless(&config, &client, &notifier, owner, date, config.require_recipients()?).await?;
                    print_report(&report);
                    failures += report.failures();
                }

                if failures > 0 {
                    anyhow::bail!("{failures} export(s) failed");
                }
                Ok(())
            }
            .instrument(span)
            .await
        }
        Commands::Automation { action } => {
            let store = JsonFileStore::new(&config.store.path);
            let client = connect(&config, sid).await?;
            let catalog = VehicleCatalog::new(&client, config.export.cache_ttl());
            let user_name = match &action {
                AutomationAction::Show { user } | AutomationAction::Set { user, .. } => user.clone(),
            };
            let user_id = catalog
                .resolve_user(&user_name)
                .await?
                .with_context(|| format!("User {user_name:?} not found"))?
                .to_string();
            let records = store.load()?;
            let current = records.get(&user_id).cloned().unwrap_or_default();

            match action {
                AutomationAction::Show { .. } => {
                    println!("User {user_name} ({user_id})");
                    println!("  enabled:    {}", current.enabled);
                    println!("  recipients: {}", current.recipients);
                    println!("  token:      {}", mask(&current.token));
                    Ok(())
                }
                AutomationAction::Set {
                    token,
                    recipients,
                    enabled,
                    ..
                } => {
                    let record = UserAutomationRecord {
                        token: token.map(|t| t.trim().to_string()).unwrap_or(current.token),
                        recipients: recipients
                            .map(|r| r.trim().to_string())
                            .unwrap_or(current.recipients),
                        enabled: enabled.unwrap_or(current.enabled),
                    };
                    upsert_record(&store, &user_id, record)?;
                    println!("Saved automation record for {user_name} ({user_id}).");
                    Ok(())
                }
            }
        }
    }
}
