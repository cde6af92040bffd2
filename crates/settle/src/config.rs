//! Provider configuration.
//!
//! ```toml
//! region = "us-west-2"
//! profile = "infra"
//! max_attempts = 5
//! state_dir = "state"
//!
//! [default_tags]
//! team = "observability"
//! ```
use std::path::{Path, PathBuf};

use snafu::prelude::*;

use crate::{tags::Tags, ConfigParseSnafu, ConfigReadSnafu, Result};

fn default_state_dir() -> PathBuf {
    PathBuf::from(".settle")
}

/// Settings shared by every resource of one provider.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Overrides the region from the environment or profile.
    #[serde(default)]
    pub region: Option<String>,
    /// Named profile from the shared AWS config files.
    #[serde(default)]
    pub profile: Option<String>,
    /// Maximum attempts of the SDK's standard retry strategy.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Directory holding the state files.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Tags applied to every taggable resource.
    #[serde(default)]
    pub default_tags: Tags,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            max_attempts: None,
            state_dir: default_state_dir(),
            default_tags: Tags::new(),
        }
    }
}

impl ProviderConfig {
    /// Reads the configuration from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("reading provider config from {path:?}");
        let contents = std::fs::read_to_string(path).context(ConfigReadSnafu { path })?;
        let config = toml::from_str(&contents).context(ConfigParseSnafu { path })?;
        Ok(config)
    }
}

/// Serde helpers for optional human readable durations, eg `"20m"` or
/// `"1h 30m"`.
pub mod duration_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_str(&humantime::format_duration(*duration).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let Some(s) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        humantime::parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}
