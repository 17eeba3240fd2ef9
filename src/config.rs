//! Engine Configuration
//!
//! Loaded from YAML (or built in code) once at startup and immutable after
//! the engine is constructed.
//!
//! ```yaml
//! namespace: tiles
//! mode: relay
//! ttl:
//!   streets: 60
//!   satellite: 3600
//!   default: 300
//! stale: 600
//! high_water_mark: 1000
//! cluster_nodes:
//!   - redis://10.0.0.1:6379
//!   - redis://10.0.0.2:6379
//! ```

use std::fmt;
use std::path::Path;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;

use crate::envelope::DEFAULT_STATUS_FIELDS;
use crate::error::{Error, Result};
use crate::expiry::{Discriminator, DEFAULT_EXPIRY_SECONDS};

/// Largest accepted TTL or stale value, in seconds.
pub const MAX_EXPIRY_SECONDS: u64 = i32::MAX as u64;

/// Default virtual nodes per store node on the hash ring.
pub const DEFAULT_RING_REPLICAS: usize = 160;

// =============================================================================
// Mode
// =============================================================================

/// Caching strategy, fixed for the engine's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Store first; upstream on miss, then write through
    #[serde(alias = "readthrough")]
    Passthrough,
    /// Store and upstream concurrently; first answer wins
    Race,
    /// Stale-while-revalidate
    #[default]
    Relay,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::Passthrough => write!(f, "passthrough"),
            CacheMode::Race => write!(f, "race"),
            CacheMode::Relay => write!(f, "relay"),
        }
    }
}

impl std::str::FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "passthrough" | "readthrough" => Ok(CacheMode::Passthrough),
            "race" => Ok(CacheMode::Race),
            "relay" => Ok(CacheMode::Relay),
            other => Err(Error::Config(format!("Invalid cache mode {}", other))),
        }
    }
}

// =============================================================================
// Expiry Setting
// =============================================================================

/// A TTL or stale-window setting: one number, or ordered pattern rules.
///
/// Accepted shapes:
///
/// - `300`
/// - `{ streets: 1, satellite: 3, default: 60 }` (order preserved)
/// - `[{ pattern: "streets", value: 1 }, { pattern: "satellite", value: 3 }]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpirySetting {
    Seconds(u64),
    Rules {
        rules: Vec<(String, u64)>,
        default: Option<u64>,
    },
}

impl Default for ExpirySetting {
    fn default() -> Self {
        ExpirySetting::Seconds(DEFAULT_EXPIRY_SECONDS)
    }
}

impl ExpirySetting {
    pub fn seconds(seconds: u64) -> Self {
        ExpirySetting::Seconds(seconds)
    }

    pub fn rules<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        ExpirySetting::Rules {
            rules: rules.into_iter().map(|(p, v)| (p.into(), v)).collect(),
            default: None,
        }
    }

    /// Set the value used when no rule matches. A single value has no
    /// rules, so the default replaces it.
    pub fn with_default(self, seconds: u64) -> Self {
        match self {
            ExpirySetting::Seconds(_) => ExpirySetting::Rules {
                rules: Vec::new(),
                default: Some(seconds),
            },
            ExpirySetting::Rules { rules, .. } => ExpirySetting::Rules {
                rules,
                default: Some(seconds),
            },
        }
    }

    /// Every number in the setting, rules first.
    pub fn values(&self) -> impl Iterator<Item = u64> + '_ {
        let (rules, default): (&[(String, u64)], Option<u64>) = match self {
            ExpirySetting::Seconds(s) => (&[][..], Some(*s)),
            ExpirySetting::Rules { rules, default } => (rules, *default),
        };
        rules.iter().map(|(_, v)| *v).chain(default)
    }
}

#[derive(Deserialize)]
struct RuleEntry {
    pattern: String,
    value: u64,
}

struct ExpirySettingVisitor;

impl<'de> Visitor<'de> for ExpirySettingVisitor {
    type Value = ExpirySetting;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number of seconds, a map of pattern to seconds, or a list of rules")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<ExpirySetting, E> {
        Ok(ExpirySetting::Seconds(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<ExpirySetting, E> {
        u64::try_from(v)
            .map(ExpirySetting::Seconds)
            .map_err(|_| E::custom(format!("expiry must not be negative, got {}", v)))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<ExpirySetting, A::Error> {
        let mut rules = Vec::new();
        let mut default = None;
        while let Some((pattern, value)) = map.next_entry::<String, u64>()? {
            if pattern == "default" {
                default = Some(value);
            } else {
                rules.push((pattern, value));
            }
        }
        Ok(ExpirySetting::Rules { rules, default })
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<ExpirySetting, A::Error> {
        let mut rules = Vec::new();
        while let Some(entry) = seq.next_element::<RuleEntry>()? {
            rules.push((entry.pattern, entry.value));
        }
        Ok(ExpirySetting::Rules {
            rules,
            default: None,
        })
    }
}

impl<'de> Deserialize<'de> for ExpirySetting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ExpirySettingVisitor)
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

fn default_namespace() -> String {
    "cache".to_string()
}

fn default_status_fields() -> Vec<String> {
    DEFAULT_STATUS_FIELDS.iter().map(|f| f.to_string()).collect()
}

fn default_ring_replicas() -> usize {
    DEFAULT_RING_REPLICAS
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Key prefix identifying this engine's entries in a shared store
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Caching strategy
    pub mode: CacheMode,

    /// Time a stored entry is considered fresh
    pub ttl: ExpirySetting,

    /// Extra time a relay entry is kept (and served) after it goes stale
    pub stale: ExpirySetting,

    /// Backpressure threshold; the store client's own threshold when unset
    pub high_water_mark: Option<usize>,

    /// Error attributes inspected for a status code, in order
    #[serde(default = "default_status_fields")]
    pub status_fields: Vec<String>,

    /// What expiry patterns are matched against
    pub discriminator: Discriminator,

    /// Single store address
    pub redis_url: Option<String>,

    /// Store addresses; non-empty enables the cluster router
    pub cluster_nodes: Vec<String>,

    /// Virtual nodes per store node on the hash ring
    #[serde(default = "default_ring_replicas")]
    pub ring_replicas: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            mode: CacheMode::default(),
            ttl: ExpirySetting::default(),
            stale: ExpirySetting::default(),
            high_water_mark: None,
            status_fields: default_status_fields(),
            discriminator: Discriminator::default(),
            redis_url: None,
            cluster_nodes: Vec::new(),
            ring_replicas: DEFAULT_RING_REPLICAS,
        }
    }
}

impl EngineConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_ttl(mut self, ttl: ExpirySetting) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_stale(mut self, stale: ExpirySetting) -> Self {
        self.stale = stale;
        self
    }

    pub fn with_high_water_mark(mut self, limit: usize) -> Self {
        self.high_water_mark = Some(limit);
        self
    }

    pub fn with_status_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.status_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_discriminator(mut self, discriminator: Discriminator) -> Self {
        self.discriminator = discriminator;
        self
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("No namespace provided".to_string()));
        }
        if self.ttl == ExpirySetting::Seconds(0) {
            return Err(Error::Config("ttl must be greater than zero".to_string()));
        }
        for (name, setting) in [("ttl", &self.ttl), ("stale", &self.stale)] {
            if let Some(value) = setting.values().find(|v| *v > MAX_EXPIRY_SECONDS) {
                return Err(Error::Config(format!(
                    "{} of {}s exceeds the maximum of {}s",
                    name, value, MAX_EXPIRY_SECONDS
                )));
            }
        }
        if self.status_fields.is_empty() {
            return Err(Error::Config(
                "At least one status field is required".to_string(),
            ));
        }
        if !self.cluster_nodes.is_empty() && self.ring_replicas == 0 {
            return Err(Error::Config(
                "ring_replicas must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.namespace, "cache");
        assert_eq!(config.mode, CacheMode::Relay);
        assert_eq!(config.ttl, ExpirySetting::Seconds(300));
        assert_eq!(config.stale, ExpirySetting::Seconds(300));
        assert_eq!(config.status_fields, vec!["status", "statusCode", "code"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_scalar_expiry() {
        let config = EngineConfig::from_yaml_str("ttl: 500\nstale: 1000\n").unwrap();
        assert_eq!(config.ttl, ExpirySetting::Seconds(500));
        assert_eq!(config.stale, ExpirySetting::Seconds(1000));
    }

    #[test]
    fn test_map_expiry_keeps_order_and_default() {
        let yaml = "ttl:\n  satellite: 3\n  streets: 1\n  default: 60\n";
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.ttl,
            ExpirySetting::Rules {
                rules: vec![("satellite".into(), 3), ("streets".into(), 1)],
                default: Some(60),
            }
        );
    }

    #[test]
    fn test_list_expiry() {
        let yaml = r#"
stale:
  - pattern: "^a\\."
    value: 5
  - pattern: "b"
    value: 6
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.stale,
            ExpirySetting::Rules {
                rules: vec![("^a\\.".into(), 5), ("b".into(), 6)],
                default: None,
            }
        );
    }

    #[test]
    fn test_negative_expiry_rejected() {
        assert!(EngineConfig::from_yaml_str("ttl: -5").is_err());
    }

    #[test]
    fn test_modes() {
        let config = EngineConfig::from_yaml_str("mode: race").unwrap();
        assert_eq!(config.mode, CacheMode::Race);

        let config = EngineConfig::from_yaml_str("mode: readthrough").unwrap();
        assert_eq!(config.mode, CacheMode::Passthrough);

        assert!(EngineConfig::from_yaml_str("mode: bogus").is_err());
        assert_eq!("RELAY".parse::<CacheMode>().unwrap(), CacheMode::Relay);
        assert_matches!("nope".parse::<CacheMode>(), Err(Error::Config(_)));
    }

    #[test]
    fn test_validation() {
        let config = EngineConfig::default().with_namespace("");
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = EngineConfig::default().with_ttl(ExpirySetting::seconds(0));
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = EngineConfig::default().with_status_fields(Vec::<String>::new());
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_expiry_upper_bound() {
        let config = EngineConfig::default().with_ttl(ExpirySetting::seconds(MAX_EXPIRY_SECONDS));
        assert!(config.validate().is_ok());

        let config = EngineConfig::default().with_ttl(ExpirySetting::seconds(u64::MAX / 2));
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = EngineConfig::default()
            .with_stale(ExpirySetting::rules([("streets", 1)]).with_default(MAX_EXPIRY_SECONDS + 1));
        assert_matches!(config.validate(), Err(Error::Config(_)));

        assert!(EngineConfig::from_yaml_str("stale:\n  streets: 18446744073709551615\n").is_err());
    }

    #[test]
    fn test_with_default_on_single_value() {
        let setting = ExpirySetting::seconds(5).with_default(9);
        assert_eq!(
            setting,
            ExpirySetting::Rules {
                rules: Vec::new(),
                default: Some(9),
            }
        );
        assert_eq!(setting.values().collect::<Vec<_>>(), vec![9]);

        let setting = ExpirySetting::rules([("a", 1), ("b", 2)]).with_default(3);
        assert_eq!(setting.values().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
namespace: tiles
mode: passthrough
high_water_mark: 50
status_fields: [statusCode]
discriminator: resource
cluster_nodes:
  - redis://10.0.0.1:6379
  - redis://10.0.0.2:6379
ring_replicas: 40
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.namespace, "tiles");
        assert_eq!(config.mode, CacheMode::Passthrough);
        assert_eq!(config.high_water_mark, Some(50));
        assert_eq!(config.status_fields, vec!["statusCode"]);
        assert_eq!(config.discriminator, Discriminator::Resource);
        assert_eq!(config.cluster_nodes.len(), 2);
        assert_eq!(config.ring_replicas, 40);
    }
}
