//! cbc-export: a Carbon Black Cloud REST API client and exporter.
//!
//! Authenticates with an API id/secret pair (`X-Auth-Token: secret/id`),
//! runs searches, polls asynchronous jobs to completion, splits long
//! date ranges into windows, and writes the results as CSV, XLSX or JSON.
//!
//! # Modules
//!
//! Plumbing:
//!
//! - [`environment`]: environment codes and base URLs.
//! - [`auth`]: API credentials and the auth header.
//! - [`client`]: authenticated HTTP wrapper.
//! - [`error`]: typed error hierarchy (`CbcError`).
//! - [`poll`]: bounded job polling.
//! - [`chunk`]: date-range windows for long exports.
//! - [`search`]: search bodies, result pages and pagination.
//! - [`flatten`]: nested JSON to flat columns.
//! - [`export`]: CSV / XLSX / JSON writers.
//! - [`config`]: optional TOML config.
//! - [`cli`]: argument parsing and dispatch.
//!
//! API families: [`devices`], [`alerts`], [`investigate`], [`audit_log`],
//! [`watchlists`], [`live_response`], [`usb_devices`], [`api_keys`],
//! [`asset_groups`], [`live_query`], [`sensor_kits`].
//!
//! # Quick Start
//!
//! ```ignore
//! use cbc_export::auth::ApiCredentials;
//! use cbc_export::client::CbcClient;
//! use cbc_export::environment::Environment;
//! use cbc_export::devices::{export_devices_request, search_all_devices};
//!
//! let creds = ApiCredentials::new("API_ID", &secret)?;
//! let client = CbcClient::new(Environment::Prod05, "ORGKEY", creds)?;
//! let devices = search_all_devices(&client, &export_devices_request(), usize::MAX).await?;
//! ```

pub mod alerts;
pub mod api_keys;
pub mod asset_groups;
pub mod audit_log;
pub mod auth;
pub mod chunk;
pub mod cli;
pub mod client;
pub mod config;
pub mod devices;
pub mod environment;
pub mod error;
pub mod export;
pub mod flatten;
pub mod investigate;
pub mod live_query;
pub mod live_response;
pub mod poll;
pub mod search;
pub mod sensor_kits;
pub mod usb_devices;
pub mod watchlists;
