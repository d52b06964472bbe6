//! High-level pipeline: orchestrates list → select → download → archive → deliver per vehicle.
//!
//! This module provides the orchestration for exporting tachograph files. For each
//! vehicle it:
//!   - Lists the remote tachograph folder via [`RemoteDirectory`]
//!   - Selects the files for the target date with [`DateMatcher`]
//!   - Downloads every selected file, aborting on the first failure
//!   - Builds one zip archive and either hands it back or mails it via [`Notifier`]
//!
//! # Major Types
//! - [`ExportPipeline`]: borrows the collaborators and the run settings
//! - [`ExportOutcome`]: terminal state of one vehicle's export
//! - [`ExportReport`]: per-vehicle results of a multi-vehicle run
//!
//! # Error Handling
//! A listing or download failure aborts only the current vehicle; nothing partial is
//! ever delivered. A missing remote folder counts as an empty listing. A failed mail
//! is reported as [`ExportOutcome::MailFailed`] and keeps the built archive so the
//! caller can deliver it another way. Nothing is retried.

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{error, info, info_span, warn, Instrument};

use crate::archive::{self, BuiltArchive};
use crate::catalog::VehicleCatalog;
use crate::contract::{ArchiveEntry, Notifier, RemoteDirectory, RemoteFileRecord, Vehicle, VehicleSource};
use crate::date_match::{most_recent, DateMatcher};
use crate::error::{ExportError, MailError, RemoteError};
use crate::notify;

/// Which files of the listing make up the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSelection {
    /// Every file matching the target date. When nothing matches and
    /// `fallback_recent` is set, that many of the newest files instead.
    MatchingDate { fallback_recent: Option<usize> },
    /// Operator-picked names, kept only if they match the target date.
    Named(Vec<String>),
}

/// What to do with a built archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    LocalDownload,
    Email { recipients: String },
}

/// Run-wide knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub matcher: DateMatcher,
    /// Restrict the catalog to vehicles created by this user id.
    pub owner: Option<i64>,
    /// Vehicles processed at once by [`ExportPipeline::export_all`].
    pub concurrency: usize,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            matcher: DateMatcher::default(),
            owner: None,
            concurrency: 1,
        }
    }
}

/// Terminal state of one vehicle's export.
#[derive(Debug)]
pub enum ExportOutcome {
    NoFiles,
    Ready(BuiltArchive),
    Sent(BuiltArchive),
    MailFailed { archive: BuiltArchive, error: MailError },
}

impl ExportOutcome {
    pub fn archive(&self) -> Option<&BuiltArchive> {
        match self {
            ExportOutcome::NoFiles => None,
            ExportOutcome::Ready(a) | ExportOutcome::Sent(a) => Some(a),
            ExportOutcome::MailFailed { archive, .. } => Some(archive),
        }
    }

    pub fn state(&self) -> &'static str {
        match self {
            ExportOutcome::NoFiles => "no-files",
            ExportOutcome::Ready(_) => "ready",
            ExportOutcome::Sent(_) => "sent",
            ExportOutcome::MailFailed { .. } => "mail-failed",
        }
    }
}

#[derive(Debug)]
pub struct VehicleReport {
    pub vehicle: Vehicle,
    pub result: Result<ExportOutcome, ExportError>,
}

impl VehicleReport {
    pub fn state(&self) -> &'static str {
        match &self.result {
            Ok(outcome) => outcome.state(),
            Err(_) => "failed",
        }
    }

    /// True when the vehicle did not reach its intended terminal state.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.result,
            Err(_) | Ok(ExportOutcome::MailFailed { .. })
        )
    }
}

#[derive(Debug)]
pub struct ExportReport {
    pub date: NaiveDate,
    pub vehicles: Vec<VehicleReport>,
}

impl ExportReport {
    pub fn failures(&self) -> usize {
        self.vehicles.iter().filter(|v| v.is_failure()).count()
    }
}

/// List the vehicle's folder, treating a missing folder as empty.
pub async fn list_files_or_empty<D>(directory: &D, vehicle_id: i64) -> Result<Vec<RemoteFileRecord>, RemoteError>
where
    D: RemoteDirectory + ?Sized,
{
    match directory.list_files(vehicle_id).await {
        Err(RemoteError::FolderNotFound) => {
            info!(vehicle_id, "No tachograph folder, treating as empty");
            Ok(Vec::new())
        }
        other => other,
    }
}

pub struct ExportPipeline<'a, S, D, N> {
    catalog: &'a VehicleCatalog<'a, S>,
    directory: &'a D,
    notifier: &'a N,
    settings: ExportSettings,
}

impl<'a, S, D, N> ExportPipeline<'a, S, D, N>
where
    S: VehicleSource,
    D: RemoteDirectory,
    N: Notifier,
{
    pub fn new(
        catalog: &'a VehicleCatalog<'a, S>,
        directory: &'a D,
        notifier: &'a N,
        settings: ExportSettings,
    ) -> Self {
        Self {
            catalog,
            directory,
            notifier,
            settings,
        }
    }

    /// Files of `vehicle_id` that belong to `date`, newest first.
    pub async fn matching_files(&self, vehicle_id: i64, date: NaiveDate) -> Result<Vec<RemoteFileRecord>, ExportError> {
        let listing = list_files_or_empty(self.directory, vehicle_id)
            .await
            .map_err(ExportError::ListFiles)?;
        Ok(self.settings.matcher.select(&listing, date))
    }

    /// Export one operator-selected vehicle.
    pub async fn export_vehicle(
        &self,
        vehicle_id: i64,
        date: NaiveDate,
        selection: &FileSelection,
        delivery: &Delivery,
    ) -> Result<ExportOutcome, ExportError> {
        let vehicle = self
            .catalog
            .find_vehicle(self.settings.owner, vehicle_id)
            .await
            .map_err(ExportError::ListVehicles)?
            .ok_or(ExportError::VehicleNotFound(vehicle_id))?;
        self.process_vehicle(&vehicle, date, selection, delivery).await
    }

    /// Export every vehicle in the catalog. A failing vehicle does not stop the others.
    pub async fn export_all(
        &self,
        date: NaiveDate,
        selection: &FileSelection,
        delivery: &Delivery,
    ) -> Result<ExportReport, ExportError> {
        let vehicles = self
            .catalog
            .list_vehicles(self.settings.owner)
            .await
            .map_err(ExportError::ListVehicles)?;
        info!(count = vehicles.len(), %date, "Starting export for all vehicles");

        let reports: Vec<VehicleReport> = stream::iter(vehicles)
            .map(|vehicle| async move {
                let result = self.process_vehicle(&vehicle, date, selection, delivery).await;
                if let Err(e) = &result {
                    error!(vehicle_id = vehicle.id, error = %e, "Vehicle export aborted");
                }
                VehicleReport { vehicle, result }
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        Ok(ExportReport {
            date,
            vehicles: reports,
        })
    }

    /// Run the per-vehicle state machine for an already resolved vehicle.
    pub async fn process_vehicle(
        &self,
        vehicle: &Vehicle,
        date: NaiveDate,
        selection: &FileSelection,
        delivery: &Delivery,
    ) -> Result<ExportOutcome, ExportError> {
        let span = info_span!("export", vehicle_id = vehicle.id, vehicle = %vehicle.label(), %date);
        async move {
            let listing = list_files_or_empty(self.directory, vehicle.id)
                .await
                .map_err(ExportError::ListFiles)?;
            let selected = self.select(&listing, date, selection);
            if selected.is_empty() {
                info!(listed = listing.len(), "No files for target date");
                return Ok(ExportOutcome::NoFiles);
            }
            info!(listed = listing.len(), selected = selected.len(), "Selected files");

            let mut entries = Vec::with_capacity(selected.len());
            for file in &selected {
                let content = self
                    .directory
                    .fetch_file(vehicle.id, &file.name)
                    .await
                    .map_err(|source| {
                        error!(file = %file.name, error = %source, "Download failed, abandoning archive");
                        ExportError::Download {
                            file: file.name.clone(),
                            source,
                        }
                    })?;
                entries.push(ArchiveEntry {
                    name: file.name.clone(),
                    content,
                });
            }

            let bytes = archive::build(&entries)?;
            let built = BuiltArchive {
                file_name: notify::attachment_name(vehicle, date),
                entries: entries.into_iter().map(|e| e.name).collect(),
                bytes,
            };
            info!(archive = %built.file_name, entries = built.entries.len(), size = built.bytes.len(), "Archive built");

            match delivery {
                Delivery::LocalDownload => Ok(ExportOutcome::Ready(built)),
                Delivery::Email { recipients } => {
                    let mail = notify::compose(vehicle, date, recipients, &built);
                    match self.notifier.send(&mail).await {
                        Ok(()) => {
                            info!(recipients = %recipients, "Archive mailed");
                            Ok(ExportOutcome::Sent(built))
                        }
                        Err(error) => {
                            warn!(error = %error, "Mail delivery failed, archive retained");
                            Ok(ExportOutcome::MailFailed { archive: built, error })
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    fn select(&self, listing: &[RemoteFileRecord], date: NaiveDate, selection: &FileSelection) -> Vec<RemoteFileRecord> {
        let matching = self.settings.matcher.select(listing, date);
        match selection {
            FileSelection::MatchingDate { fallback_recent } => match fallback_recent {
                Some(n) if matching.is_empty() => {
                    info!(limit = n, "No date match, falling back to most recent files");
                    most_recent(listing, *n)
                }
                _ => matching,
            },
            FileSelection::Named(names) => {
                let kept: Vec<RemoteFileRecord> = matching
                    .into_iter()
                    .filter(|f| names.iter().any(|n| n == &f.name))
                    .collect();
                let dropped = dropped_names(names, &kept);
                if !dropped.is_empty() {
                    warn!(?dropped, %date, "Named files missing from listing or not dated on target day");
                }
                kept
            }
        }
    }
}

/// Requested names that did not survive selection, in request order.
pub fn dropped_names<'n>(requested: &'n [String], kept: &[RemoteFileRecord]) -> Vec<&'n str> {
    requested
        .iter()
        .filter(|n| !kept.iter().any(|f| &f.name == *n))
        .map(String::as_str)
        .collect()
}
