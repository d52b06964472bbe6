#![doc = "Wialon remote API client: bridges the core catalog and directory contracts to the telematics HTTP endpoint."]
//
//! # Wialon Integration (CLI <-> Core)
//!
//! This module provides [`WialonClient`], the concrete implementation of
//! [`VehicleSource`] and [`RemoteDirectory`] used by the CLI. Every call is a
//! form-encoded request against `{base_url}/wialon/ajax.html` carrying a
//! `svc` name, a JSON `params` document and the session id.
//!
//! - Construct with [`WialonClient::login`] (long-lived token) or
//!   [`WialonClient::with_session`] (an existing `sid`).
//! - Each call class has its own timeout; a timeout surfaces as
//!   [`RemoteError::Transport`] and is never retried here.
//! - Structured `{"error": n}` replies become [`RemoteError::Api`], except the
//!   missing-folder code on file listings, which is [`RemoteError::FolderNotFound`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ddd_export_core::contract::{
    RemoteDirectory, RemoteFileRecord, SessionToken, Vehicle, VehicleFilter, VehicleSource,
    TACHOGRAPH_FOLDER,
};
use ddd_export_core::error::RemoteError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_BASE_URL: &str = "https://hst-api.wialon.com";
pub const AJAX_PATH: &str = "/wialon/ajax.html";

/// Error code returned by `file/list` when the folder does not exist.
pub const FOLDER_NOT_FOUND_CODE: i64 = 4;

/// File storage classifier for unit files.
const STORAGE_TYPE: i64 = 2;

/// Base item data plus custom properties (`prp`).
const UNIT_FLAGS: i64 = 0x1 | 0x2;

/// Per-call-class request timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiTimeouts {
    pub login_secs: u64,
    pub search_secs: u64,
    pub list_secs: u64,
    pub fetch_secs: u64,
}

impl Default for ApiTimeouts {
    fn default() -> Self {
        Self {
            login_secs: 10,
            search_secs: 15,
            list_secs: 15,
            fetch_secs: 30,
        }
    }
}

fn describe_error(code: i64) -> &'static str {
    match code {
        1 => "invalid session",
        2 => "invalid service name",
        3 => "invalid result",
        4 => "invalid input",
        5 => "error performing request",
        6 => "unknown error",
        7 => "access denied",
        8 => "invalid user name or password",
        9 => "authorization server is unavailable",
        _ => "remote api error",
    }
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Transport(e.to_string())
}

/// Error code of a `{"error": n}` body. Binary file payloads never parse as one.
fn body_error_code(bytes: &[u8]) -> Option<i64> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(obj)) => obj.get("error").and_then(Value::as_i64),
        _ => None,
    }
}

/// Split a structured error reply from a successful one.
fn decode<T: DeserializeOwned>(svc: &str, body: &str) -> Result<T, RemoteError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| RemoteError::Decode(format!("{svc}: {e}")))?;
    if let Some(code) = value.get("error").and_then(Value::as_i64) {
        if code != 0 {
            return Err(RemoteError::Api {
                code,
                message: describe_error(code).to_string(),
            });
        }
    }
    serde_json::from_value(value).map_err(|e| RemoteError::Decode(format!("{svc}: {e}")))
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    eid: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchReply {
    Wrapped {
        #[serde(default)]
        items: Vec<RawItem>,
    },
    Bare(Vec<RawItem>),
}

impl SearchReply {
    fn into_items(self) -> Vec<RawItem> {
        match self {
            SearchReply::Wrapped { items } | SearchReply::Bare(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: i64,
    #[serde(default)]
    nm: Option<String>,
    #[serde(default)]
    prp: HashMap<String, Value>,
}

impl From<RawItem> for Vehicle {
    fn from(raw: RawItem) -> Self {
        let registration_number = raw
            .prp
            .get("reg_number")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Vehicle {
            id: raw.id,
            name: raw.nm.unwrap_or_else(|| "Unknown".to_string()),
            registration_number,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFile {
    n: String,
    #[serde(default)]
    ct: Option<i64>,
    #[serde(default)]
    mt: Option<i64>,
}

impl From<RawFile> for RemoteFileRecord {
    fn from(raw: RawFile) -> Self {
        RemoteFileRecord {
            name: raw.n,
            created: raw.ct,
            modified: raw.mt,
        }
    }
}

pub struct WialonClient {
    http: Client,
    endpoint: String,
    session: SessionToken,
    timeouts: ApiTimeouts,
}

impl WialonClient {
    /// Use a session id handed over by the platform (e.g. an app launch `sid`).
    pub fn with_session(base_url: &str, session: SessionToken, timeouts: ApiTimeouts) -> Result<Self, RemoteError> {
        let http = Client::builder().build().map_err(transport)?;
        let endpoint = format!("{}{}", base_url.trim_end_matches('/'), AJAX_PATH);
        tracing::info!(endpoint = %endpoint, "Initialized WialonClient with existing session");
        Ok(Self {
            http,
            endpoint,
            session,
            timeouts,
        })
    }

    /// Exchange a long-lived API token for a session.
    pub async fn login(base_url: &str, token: &str, timeouts: ApiTimeouts) -> Result<Self, RemoteError> {
        let http = Client::builder().build().map_err(transport)?;
        let endpoint = format!("{}{}", base_url.trim_end_matches('/'), AJAX_PATH);
        let params = json!({ "token": token }).to_string();

        let resp = http
            .post(&endpoint)
            .form(&[("svc", "token/login"), ("params", params.as_str())])
            .timeout(Duration::from_secs(timeouts.login_secs))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, endpoint = %endpoint, "Login request failed");
                transport(e)
            })?;
        let body = Self::read_text(resp).await?;
        let reply: LoginReply = decode("token/login", &body).map_err(|e| {
            tracing::error!(error = %e, "Login rejected");
            e
        })?;

        tracing::info!(endpoint = %endpoint, "Logged in with API token");
        Ok(Self {
            http,
            endpoint,
            session: SessionToken::new(reply.eid),
            timeouts,
        })
    }

    pub fn session(&self) -> &SessionToken {
        &self.session
    }

    async fn read_text(resp: reqwest::Response) -> Result<String, RemoteError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Api {
                code: i64::from(status.as_u16()),
                message: format!("http status {status}"),
            });
        }
        resp.text().await.map_err(transport)
    }

    async fn call<T: DeserializeOwned>(&self, svc: &str, params: Value, timeout_secs: u64) -> Result<T, RemoteError> {
        let params = params.to_string();
        tracing::debug!(svc, params = %params, "Calling remote API");
        let resp = self
            .http
            .post(&self.endpoint)
            .form(&[
                ("svc", svc),
                ("params", params.as_str()),
                ("sid", self.session.as_str()),
            ])
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(svc, error = ?e, "Remote API request failed");
                transport(e)
            })?;
        let body = Self::read_text(resp).await?;
        decode(svc, &body)
    }

    async fn search_items(&self, items_type: &str, prop_name: &str, mask: &str, flags: i64) -> Result<Vec<RawItem>, RemoteError> {
        let params = json!({
            "spec": {
                "itemsType": items_type,
                "propName": prop_name,
                "propValueMask": mask,
                "sortType": "sys_name",
            },
            "force": 1,
            "flags": flags,
            "from": 0,
            "to": 0,
        });
        let reply: SearchReply = self
            .call("core/search_items", params, self.timeouts.search_secs)
            .await?;
        Ok(reply.into_items())
    }
}

#[async_trait]
impl VehicleSource for WialonClient {
    async fn search_vehicles(&self, filter: VehicleFilter) -> Result<Vec<Vehicle>, RemoteError> {
        let (prop_name, mask) = match filter {
            VehicleFilter::All => ("sys_name", "*".to_string()),
            VehicleFilter::CreatedBy(user_id) => ("sys_user_creator", user_id.to_string()),
        };
        let items = self.search_items("avl_unit", prop_name, &mask, UNIT_FLAGS).await?;
        tracing::info!(?filter, count = items.len(), "Fetched vehicles");
        Ok(items.into_iter().map(Vehicle::from).collect())
    }

    async fn find_user_id(&self, user_name: &str) -> Result<Option<i64>, RemoteError> {
        let items = self.search_items("avl_user", "sys_name", user_name, 0x1).await?;
        Ok(items.first().map(|u| u.id))
    }
}

#[async_trait]
impl RemoteDirectory for WialonClient {
    async fn list_files(&self, vehicle_id: i64) -> Result<Vec<RemoteFileRecord>, RemoteError> {
        let params = json!({
            "itemId": vehicle_id,
            "storageType": STORAGE_TYPE,
            "path": TACHOGRAPH_FOLDER,
            "mask": "*",
            "recursive": false,
            "fullPath": false,
        });
        match self
            .call::<Vec<RawFile>>("file/list", params, self.timeouts.list_secs)
            .await
        {
            Ok(files) => {
                tracing::info!(vehicle_id, count = files.len(), "Listed remote files");
                Ok(files.into_iter().map(RemoteFileRecord::from).collect())
            }
            Err(RemoteError::Api { code, .. }) if code == FOLDER_NOT_FOUND_CODE => {
                Err(RemoteError::FolderNotFound)
            }
            Err(e) => {
                tracing::error!(vehicle_id, error = %e, "Listing remote files failed");
                Err(e)
            }
        }
    }

    async fn fetch_file(&self, vehicle_id: i64, file_name: &str) -> Result<Vec<u8>, RemoteError> {
        let params = json!({
            "itemId": vehicle_id,
            "storageType": STORAGE_TYPE,
            "path": format!("{TACHOGRAPH_FOLDER}{file_name}"),
        })
        .to_string();
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("svc", "file/get"),
                ("params", params.as_str()),
                ("sid", self.session.as_str()),
            ])
            .timeout(Duration::from_secs(self.timeouts.fetch_secs))
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Api {
                code: i64::from(status.as_u16()),
                message: format!("http status {status} fetching {file_name}"),
            });
        }
        let bytes = resp.bytes().await.map_err(transport)?;

        // file/get answers errors as a JSON body with a 200 status, whatever the content type.
        if let Some(code) = body_error_code(&bytes) {
            tracing::error!(vehicle_id, file = file_name, code, "Remote file fetch rejected");
            return Err(RemoteError::Api {
                code,
                message: describe_error(code).to_string(),
            });
        }

        tracing::info!(vehicle_id, file = file_name, size = bytes.len(), "Fetched remote file");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_maps_structured_error() {
        let err = decode::<Vec<Value>>("file/list", r#"{"error":7}"#).unwrap_err();
        assert_eq!(
            err,
            RemoteError::Api {
                code: 7,
                message: "access denied".into()
            }
        );
    }

    #[test]
    fn body_error_code_ignores_binary_payloads() {
        assert_eq!(body_error_code(br#"{"error":7}"#), Some(7));
        assert_eq!(body_error_code(&[0x76, 0x01, 0x00, 0xff]), None);
        assert_eq!(body_error_code(br#"{"n":"a.ddd"}"#), None);
    }

    #[test]
    fn vehicle_defaults_missing_fields() {
        let raw: RawItem = serde_json::from_str(r#"{"id":5}"#).unwrap();
        let v = Vehicle::from(raw);
        assert_eq!(v.name, "Unknown");
        assert_eq!(v.registration_number, "");
    }
}
