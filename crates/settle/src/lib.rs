//! # Settle
//!
//! Settle is a library of AWS resource adapters. Each adapter maps a typed,
//! declarative definition of one cloud resource onto the service API that
//! owns it, and knows how to create, read, update and delete that resource.
//!
//! Most AWS APIs are eventually consistent: a `CreateWorkspace` call returns
//! long before the workspace is usable. Every adapter therefore leans on one
//! shared mechanism, the [`waiter::Waiter`], which polls a status function
//! until the remote resource settles into a target status, times out, or
//! reports a terminal failure.
//!
//! ## Concepts
//!
//! - **Finder**: reads a resource by identifier and normalizes any "not
//!   found" response into [`Error::NotFound`].
//! - **Status function**: wraps a finder, reporting `(object, status)` or
//!   "no status yet" when the resource can't be found.
//! - **Waiter**: drives the poll loop over a status function with pending
//!   and target status sets.
//! - **Resource adapter**: an implementation of [`Resource`] for one cloud
//!   resource type. See the [`aws`] module.
//! - **Store**: a directory of JSON state files recording applied
//!   resources. The [`store::Store`] decides whether a definition needs to
//!   be created, refreshed, updated or replaced, and runs the adapter.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), settle::Error> {
//! use settle::{aws, config::ProviderConfig, store::Store};
//!
//! let config = ProviderConfig::from_path("settle.toml")?;
//! let client = aws::AwsClient::from_config(&config).await;
//! let store = Store::new(&config.state_dir, client);
//! let workspace = store
//!     .resource(
//!         "metrics",
//!         aws::amp::Workspace {
//!             alias: Some("metrics".into()),
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! log::info!("prometheus endpoint: {:?}", workspace.prometheus_endpoint);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Settle exposes one error enum [`Error`]. Functions that can fail return
//! a `Result` with this [`Error`]. Not-found conditions are always checked
//! through [`Error::is_not_found`], never by matching on service specific
//! exception types.
use std::{future::Future, time::Duration};

use snafu::prelude::*;

pub use settle_derive::HasChanges;

// Lets `#[derive(HasChanges)]` refer to `settle::` from inside this crate.
extern crate self as settle;

pub mod arn;
pub mod aws;
pub mod config;
pub mod finder;
pub mod retry;
pub mod store;
pub mod tags;
pub mod waiter;

/// Top-level error enum that encompasses all errors.
#[derive(snafu::Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{error}{}", cause_chain(error)))]
    Other { error: anyhow::Error },

    #[snafu(display("couldn't find resource: {message}"))]
    NotFound { message: String },

    #[snafu(display("empty result: {what}"))]
    EmptyResult { what: String },

    #[snafu(display("too many results: wanted 1, got {count} ({what})"))]
    TooManyResults { what: String, count: usize },

    #[snafu(display("{message}"))]
    Api {
        code: Option<String>,
        message: String,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[snafu(display(
        "timeout while waiting for state to become '{}' (last state: '{}', timeout: {}){}",
        expected.join(", "),
        last_status.as_deref().unwrap_or_default(),
        humantime::format_duration(*timeout),
        reason_suffix(reason),
    ))]
    Timeout {
        timeout: Duration,
        last_status: Option<String>,
        expected: Vec<String>,
        reason: Option<String>,
    },

    #[snafu(display(
        "unexpected state '{status}', wanted target '{}'{}",
        expected.join(", "),
        reason_suffix(reason),
    ))]
    UnexpectedState {
        status: String,
        expected: Vec<String>,
        reason: Option<String>,
    },

    #[snafu(display("waiting cancelled while the last state was '{}'",
                    last_status.as_deref().unwrap_or_default()))]
    Cancelled { last_status: Option<String> },

    #[snafu(display("invalid waiter configuration: {reason}"))]
    InvalidWaiter { reason: String },

    #[snafu(display("unexpected format for ID ({id}), expected {expected}"))]
    MalformedId { id: String, expected: String },

    #[snafu(display("parsing ARN ({arn}): {reason}"))]
    MalformedArn { arn: String, reason: String },

    #[snafu(display("building request: {source}"))]
    Build {
        source: aws_smithy_types::error::operation::BuildError,
    },

    #[snafu(display("{action} {resource} ({id}): {source}"))]
    Action {
        action: Action,
        resource: &'static str,
        id: String,
        source: Box<Error>,
    },

    #[snafu(display("Could not read store file '{path:?}': {source}"))]
    StoreFileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not delete store file '{path:?}': {source}"))]
    StoreFileDelete {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not scan store directory '{path:?}': {source}"))]
    ScanStoreDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not serialize stored '{name}': {source}"))]
    Serialize {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Could not deserialize stored '{name}': {source}"))]
    Deserialize {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Stored '{name}' is a {found}, not a {expected}"))]
    StoredType {
        name: String,
        found: String,
        expected: &'static str,
    },

    #[snafu(display("Could not create store directory {path:?}: {source}"))]
    CreateStoreDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not move {from:?} into place at {path:?}: {source}"))]
    RenameFile {
        from: std::path::PathBuf,
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not write file {path:?}: {source}"))]
    WriteFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not read config file {path:?}: {source}"))]
    ConfigRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not parse config file {path:?}: {source}"))]
    ConfigParse {
        path: std::path::PathBuf,
        source: toml::de::Error,
    },
}

/// The causes below an anyhow error, one per line. Empty when there are
/// none.
fn cause_chain(error: &anyhow::Error) -> String {
    let causes = error
        .chain()
        .skip(1)
        .map(|e| format!("{e}"))
        .collect::<Vec<_>>();
    if causes.is_empty() {
        return String::new();
    }
    format!(":\n{}", causes.join("\n -> "))
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_ref()
        .map(|r| format!(". last error: {r}"))
        .unwrap_or_default()
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other { error }
    }
}

impl From<aws_smithy_types::error::operation::BuildError> for Error {
    fn from(source: aws_smithy_types::error::operation::BuildError) -> Self {
        Error::Build { source }
    }
}

impl Error {
    /// Returns true if this error means the remote resource does not exist.
    ///
    /// Looks through [`Error::Action`] context.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Action { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The service error code, if this error came from an AWS API call.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Api { code, .. } => code.as_deref(),
            Error::Action { source, .. } => source.code(),
            _ => None,
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.code() == Some(code)
    }

    /// Wrap this error with the action, resource name and identifier it
    /// occurred under, eg "creating Prometheus Workspace (ws-123): ...".
    pub fn during(self, action: Action, resource: &'static str, id: impl Into<String>) -> Self {
        Error::Action {
            action,
            resource,
            id: id.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// A lifecycle operation on a remote resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Create => "creating",
            Action::Read => "reading",
            Action::Update => "updating",
            Action::Delete => "deleting",
        })
    }
}

/// Fields that differ between two definitions of a resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Changes {
    changed: Vec<&'static str>,
    replace: Vec<&'static str>,
}

impl core::fmt::Display for Changes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.changed.join(", "))
    }
}

impl Changes {
    /// Record a changed field. A `force_new` field can't be updated in place.
    pub fn push(&mut self, field: &'static str, force_new: bool) {
        self.changed.push(field);
        if force_new {
            self.replace.push(field);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changed.contains(&field)
    }

    /// Returns true if any changed field requires replacing the resource.
    pub fn requires_replace(&self) -> bool {
        !self.replace.is_empty()
    }

    /// Names of the changed fields that force a replacement.
    pub fn replacing(&self) -> &[&'static str] {
        &self.replace
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.changed
    }
}

/// Detects changes between a definition and a previous one.
///
/// Usually derived. Fields marked `#[settle(force_new)]` require
/// replacement, fields marked `#[settle(ignore)]` are skipped.
pub trait HasChanges {
    fn changes(&self, previous: &Self) -> Changes;
}

/// Per-operation timeouts of a resource.
///
/// Unset values fall back to the adapter's defaults. Ignored by change
/// detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Timeouts {
    #[serde(default, with = "config::duration_opt", skip_serializing_if = "Option::is_none")]
    pub create: Option<Duration>,
    #[serde(default, with = "config::duration_opt", skip_serializing_if = "Option::is_none")]
    pub update: Option<Duration>,
    #[serde(default, with = "config::duration_opt", skip_serializing_if = "Option::is_none")]
    pub delete: Option<Duration>,
}

impl Timeouts {
    pub fn create_or(&self, default: Duration) -> Duration {
        self.create.unwrap_or(default)
    }

    pub fn update_or(&self, default: Duration) -> Duration {
        self.update.unwrap_or(default)
    }

    pub fn delete_or(&self, default: Duration) -> Duration {
        self.delete.unwrap_or(default)
    }
}

/// A cloud resource managed through a provider API.
///
/// `Self` is the local definition, written in code. [`Resource::Output`]
/// is the remote state: identifiers and computed attributes that are only
/// known after the resource exists.
pub trait Resource:
    core::fmt::Debug
    + Clone
    + PartialEq
    + HasChanges
    + serde::Serialize
    + serde::de::DeserializeOwned
    + 'static
{
    /// Type of the platform client.
    ///
    /// For example [`aws::AwsClient`] in the case of amazon web services.
    type Provider;

    /// The remote state of this resource.
    type Output: core::fmt::Debug
        + Clone
        + PartialEq
        + serde::Serialize
        + serde::de::DeserializeOwned
        + 'static;

    /// Human readable resource name used in diagnostics,
    /// eg "Prometheus Workspace".
    const NAME: &'static str;

    /// The identifier used to read, update and delete the remote resource.
    fn id(remote: &Self::Output) -> String;

    /// Issues the create call and returns the identifier of the new
    /// resource.
    ///
    /// Anything that can fail after the remote resource exists belongs in
    /// [`Resource::wait_created`], so the store can record the identifier
    /// first.
    fn create(&self, provider: &Self::Provider) -> impl Future<Output = Result<String>>;

    /// Waits for a newly created resource to settle, then applies the
    /// settings that can only be set once it exists.
    ///
    /// Does nothing by default.
    fn wait_created(
        &self,
        _provider: &Self::Provider,
        _id: &str,
    ) -> impl Future<Output = Result<()>> {
        async { Ok(()) }
    }

    /// Reads the current remote state of the resource identified by `id`.
    ///
    /// Errs with [`Error::NotFound`] if the resource is gone.
    fn read(
        &self,
        provider: &Self::Provider,
        id: &str,
    ) -> impl Future<Output = Result<Self::Output>>;

    /// Updates the resource in place.
    ///
    /// Independent parts are updated one after another. If a later part
    /// fails the earlier ones stay applied and the error is returned; the
    /// next apply reconciles the rest.
    ///
    /// The default implementation errs, which suits resources whose fields
    /// are all `force_new`.
    fn update(
        &self,
        _provider: &Self::Provider,
        _previous_local: &Self,
        _previous_remote: &Self::Output,
    ) -> impl Future<Output = Result<Self::Output>> {
        async {
            Err(anyhow::anyhow!(
                "{} does not support in-place updates, mark the changed fields `force_new`",
                Self::NAME
            )
            .into())
        }
    }

    /// Deletes the resource and waits until it is gone.
    ///
    /// A resource that is already gone is not an error.
    fn delete(
        &self,
        provider: &Self::Provider,
        remote: &Self::Output,
    ) -> impl Future<Output = Result<()>>;
}
