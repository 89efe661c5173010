//! Typed views of the router rows the dashboard mirrors.
//!
//! Raw replies are string maps; everything past this module works with these
//! records instead. Empty values are normalized to `None` so that a row read
//! back after a write compares equal to what was written.

use serde::{Deserialize, Serialize};

use crate::api::Row;
use crate::error::ApiError;

/// A router collection that can be listed, created and updated by `.id`.
pub trait RemoteEntity: Sized + Send + Sync + Clone + PartialEq {
    /// Menu path, e.g. `/ppp/secret`.
    const MENU: &'static str;
    /// Short name used in reports and logs.
    const KIND: &'static str;

    /// Optional attributes. An empty value clears them on `set` and is left
    /// out of `add`.
    const CLEARABLE: &'static [&'static str];

    fn from_row(row: &Row) -> Result<Self, ApiError>;

    /// Writable attributes, in the order they are sent. Every attribute is
    /// always present so that `set` overwrites the whole row.
    fn params(&self) -> Vec<(&'static str, String)>;

    fn remote_key(&self) -> Option<&str>;

    fn name(&self) -> &str;
}

fn required(row: &Row, kind: &str, key: &str) -> Result<String, ApiError> {
    row.get_non_empty(key)
        .map(str::to_string)
        .ok_or_else(|| ApiError::Protocol(format!("{kind} row is missing '{key}'")))
}

fn optional(row: &Row, key: &str) -> Option<String> {
    row.get_non_empty(key).map(str::to_string)
}

fn flag(row: &Row, key: &str) -> bool {
    matches!(row.get(key), Some("true") | Some("yes"))
}

fn yes_no(value: bool) -> String {
    let word = if value { "yes" } else { "no" };
    word.to_string()
}

/// A subscriber account (`/ppp/secret`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSecret {
    pub remote_key: Option<String>,
    pub name: String,
    pub password: String,
    pub service: String,
    pub profile: String,
    pub remote_address: Option<String>,
    pub disabled: bool,
    pub comment: Option<String>,
}

impl RemoteEntity for RemoteSecret {
    const MENU: &'static str = "/ppp/secret";
    const KIND: &'static str = "secret";
    const CLEARABLE: &'static [&'static str] = &["remote-address", "comment"];

    fn from_row(row: &Row) -> Result<Self, ApiError> {
        Ok(Self {
            remote_key: Some(required(row, Self::KIND, ".id")?),
            name: required(row, Self::KIND, "name")?,
            password: row.get("password").unwrap_or_default().to_string(),
            service: row.get_non_empty("service").unwrap_or("any").to_string(),
            profile: row.get_non_empty("profile").unwrap_or("default").to_string(),
            remote_address: optional(row, "remote-address"),
            disabled: flag(row, "disabled"),
            comment: optional(row, "comment"),
        })
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("password", self.password.clone()),
            ("service", self.service.clone()),
            ("profile", self.profile.clone()),
            ("remote-address", self.remote_address.clone().unwrap_or_default()),
            ("disabled", yes_no(self.disabled)),
            ("comment", self.comment.clone().unwrap_or_default()),
        ]
    }

    fn remote_key(&self) -> Option<&str> {
        self.remote_key.as_deref()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A service tier (`/ppp/profile`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServiceProfile {
    pub remote_key: Option<String>,
    pub name: String,
    pub rate_limit: Option<String>,
    pub local_address: Option<String>,
    pub remote_pool: Option<String>,
    pub comment: Option<String>,
}

impl RemoteEntity for RemoteServiceProfile {
    const MENU: &'static str = "/ppp/profile";
    const KIND: &'static str = "profile";
    const CLEARABLE: &'static [&'static str] =
        &["rate-limit", "local-address", "remote-address", "comment"];

    fn from_row(row: &Row) -> Result<Self, ApiError> {
        Ok(Self {
            remote_key: Some(required(row, Self::KIND, ".id")?),
            name: required(row, Self::KIND, "name")?,
            rate_limit: optional(row, "rate-limit"),
            local_address: optional(row, "local-address"),
            remote_pool: optional(row, "remote-address"),
            comment: optional(row, "comment"),
        })
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("rate-limit", self.rate_limit.clone().unwrap_or_default()),
            ("local-address", self.local_address.clone().unwrap_or_default()),
            ("remote-address", self.remote_pool.clone().unwrap_or_default()),
            ("comment", self.comment.clone().unwrap_or_default()),
        ]
    }

    fn remote_key(&self) -> Option<&str> {
        self.remote_key.as_deref()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Identity and platform details reported by the diagnostics API stage and
/// by connection tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterIdentity {
    pub name: String,
    pub version: Option<String>,
    pub board_name: Option<String>,
    pub platform: Option<String>,
    pub uptime: Option<String>,
}

impl RouterIdentity {
    pub fn from_rows(identity: Option<&Row>, resource: Option<&Row>) -> Result<Self, ApiError> {
        let name = identity
            .and_then(|row| row.get_non_empty("name"))
            .ok_or_else(|| ApiError::Protocol("identity reply has no name".to_string()))?
            .to_string();
        Ok(Self {
            name,
            version: resource.and_then(|row| optional(row, "version")),
            board_name: resource.and_then(|row| optional(row, "board-name")),
            platform: resource.and_then(|row| optional(row, "platform")),
            uptime: resource.and_then(|row| optional(row, "uptime")),
        })
    }
}
