//! mirra.toml configuration model

use std::time::Duration;

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

mod duration {
    use humantime::format_duration;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(|e| D::Error::custom(format!("invalid duration: {}", e)))
    }
}

mod one_or_many {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        })
    }
}

/// Complete mirra.toml configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the local storage
    pub storage: Utf8PathBuf,

    /// Upstream registries keyed by name
    #[serde(default)]
    pub uplinks: IndexMap<String, UplinkConfig>,

    /// Package access rules, in declaration order
    #[serde(default)]
    pub packages: IndexMap<String, PackageRule>,
}

/// One upstream registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkConfig {
    /// Base URL of the registry
    pub url: String,

    /// Persist fetched tarballs in local storage
    #[serde(default = "default_cache")]
    pub cache: bool,

    /// Per-request timeout
    #[serde(default = "default_timeout", with = "duration")]
    pub timeout: Duration,

    /// How long fetched metadata is considered fresh
    #[serde(default = "default_maxage", with = "duration")]
    pub maxage: Duration,

    /// Consecutive failures before the uplink is considered offline (0 disables)
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,

    /// How long an offline uplink is skipped
    #[serde(default = "default_fail_timeout", with = "duration")]
    pub fail_timeout: Duration,

    /// Transport retries per metadata request
    #[serde(default = "default_retries")]
    pub retries: u32,
}

/// Access rule for packages matching a glob pattern
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackageRule {
    /// Who may read matching packages
    #[serde(default, deserialize_with = "one_or_many::deserialize")]
    pub access: Vec<String>,

    /// Who may publish matching packages
    #[serde(default, deserialize_with = "one_or_many::deserialize")]
    pub publish: Vec<String>,

    /// Uplinks eligible to proxy matching packages, in preference order
    #[serde(default, deserialize_with = "one_or_many::deserialize")]
    pub proxy: Vec<String>,
}

fn default_cache() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_maxage() -> Duration {
    Duration::from_secs(120)
}

fn default_max_fails() -> u32 {
    2
}

fn default_fail_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_retries() -> u32 {
    2
}

impl UplinkConfig {
    /// Uplink with default settings for the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cache: default_cache(),
            timeout: default_timeout(),
            maxage: default_maxage(),
            max_fails: default_max_fails(),
            fail_timeout: default_fail_timeout(),
            retries: default_retries(),
        }
    }
}

impl PackageRule {
    /// Rule that proxies to the given uplinks
    pub fn proxied(uplinks: &[&str]) -> Self {
        Self {
            access: vec!["$all".to_string()],
            publish: vec!["$authenticated".to_string()],
            proxy: uplinks.iter().map(|u| u.to_string()).collect(),
        }
    }
}

impl Config {
    /// Configuration with no uplinks and no package rules
    pub fn new(storage: impl Into<Utf8PathBuf>) -> Self {
        Self {
            storage: storage.into(),
            uplinks: IndexMap::new(),
            packages: IndexMap::new(),
        }
    }

    /// Add an uplink
    pub fn with_uplink(mut self, name: impl Into<String>, uplink: UplinkConfig) -> Self {
        self.uplinks.insert(name.into(), uplink);
        self
    }

    /// Append a package rule
    pub fn with_package(mut self, pattern: impl Into<String>, rule: PackageRule) -> Self {
        self.packages.insert(pattern.into(), rule);
        self
    }
}
