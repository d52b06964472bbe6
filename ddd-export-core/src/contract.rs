//! # contract: data model and collaborator interfaces
//!
//! This module defines the plain data types that flow through the export
//! pipeline and the traits behind which every external collaborator sits:
//!
//! - [`VehicleSource`]: catalog queries against the telematics API
//! - [`RemoteDirectory`]: listing and fetching files in a vehicle's remote folder
//! - [`Notifier`]: delivering a built archive by mail
//! - [`AutomationStore`]: the flat per-user automation record store
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall` so the pipeline can be driven
//!   deterministically in tests (`test-export-mocks` feature, on by default).
//!
//! ## Adding New Collaborators
//! - Implement the trait against your backend.
//! - Map every upstream failure into the typed errors of [`crate::error`];
//!   the pipeline relies on [`RemoteError::FolderNotFound`] being distinct.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::{MailError, RemoteError, StoreError};

/// Remote folder holding downloadable tachograph files for each vehicle.
pub const TACHOGRAPH_FOLDER: &str = "tachograph/";

/// Session identifier issued by the telematics API.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(len={})", self.0.len())
    }
}

/// A vehicle (telematics "unit") visible to the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vehicle {
    pub id: i64,
    pub name: String,
    /// Registration plate; empty when the unit has none recorded.
    pub registration_number: String,
}

impl Vehicle {
    /// Label used in archive names and mail subjects.
    pub fn label(&self) -> &str {
        if self.registration_number.is_empty() {
            &self.name
        } else {
            &self.registration_number
        }
    }

    /// Case-insensitive match of `needle` against registration and name.
    pub fn matches_search(&self, needle: &str) -> bool {
        let haystack = format!("{}{}", self.registration_number, self.name).to_lowercase();
        haystack.contains(&needle.to_lowercase())
    }
}

/// One file in a vehicle's remote tachograph folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFileRecord {
    pub name: String,
    /// Creation time in epoch seconds, if the API reported one.
    pub created: Option<i64>,
    /// Modification time in epoch seconds, if the API reported one.
    pub modified: Option<i64>,
}

impl RemoteFileRecord {
    /// Sort key used for "newest first" ordering.
    pub fn recency(&self) -> i64 {
        self.modified.or(self.created).unwrap_or(0)
    }
}

/// Catalog query narrowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleFilter {
    /// Every vehicle visible to the account.
    All,
    /// Only vehicles whose creator property equals this user id.
    CreatedBy(i64),
}

/// A downloaded file ready to be archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub content: Vec<u8>,
}

/// A composed mail carrying one zip attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub subject: String,
    /// Comma-separated recipient addresses.
    pub recipients: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
}

/// Per-user automation settings, keyed by resolved user id in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAutomationRecord {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub recipients: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Trait for catalog lookups against the telematics API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait VehicleSource: Send + Sync {
    /// Search vehicles visible to the session, narrowed by `filter`.
    async fn search_vehicles(&self, filter: VehicleFilter) -> Result<Vec<Vehicle>, RemoteError>;

    /// Resolve a login name to its user id, if such a user exists.
    async fn find_user_id(&self, user_name: &str) -> Result<Option<i64>, RemoteError>;
}

/// Trait for the fixed remote folder attached to each vehicle.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// List the vehicle's tachograph folder.
    ///
    /// Returns [`RemoteError::FolderNotFound`] when the folder does not exist.
    async fn list_files(&self, vehicle_id: i64) -> Result<Vec<RemoteFileRecord>, RemoteError>;

    /// Download one file's raw bytes. No retry is performed.
    async fn fetch_file(&self, vehicle_id: i64, file_name: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Trait for delivering a built archive. One transport session per call.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

/// Flat key-value store of automation records, loaded and saved wholesale.
///
/// Concurrent writers are last-write-wins.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait AutomationStore: Send + Sync {
    fn load(&self) -> Result<BTreeMap<String, UserAutomationRecord>, StoreError>;

    fn save(&self, records: &BTreeMap<String, UserAutomationRecord>) -> Result<(), StoreError>;
}
