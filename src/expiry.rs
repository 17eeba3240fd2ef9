//! Key & Expiry Resolver
//!
//! Derives the store key for a resource and picks its TTL and stale window
//! from ordered pattern rules. Resolution never fails: when no rule matches
//! the configured default applies, and without a default a fixed 300s.

use std::borrow::Cow;

use regex::Regex;
use serde::Deserialize;
use tracing::trace;

use crate::config::ExpirySetting;
use crate::error::{Error, Result};

/// Fallback when neither a rule nor a default applies.
pub const DEFAULT_EXPIRY_SECONDS: u64 = 300;

/// Which part of the resource id expiry patterns are matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discriminator {
    /// Host of the resource id when it parses as a URL, else the whole id
    #[default]
    Hostname,
    /// The whole resource id
    Resource,
}

impl Discriminator {
    pub fn extract<'a>(&self, resource_id: &'a str) -> Cow<'a, str> {
        match self {
            Discriminator::Resource => Cow::Borrowed(resource_id),
            Discriminator::Hostname => match url::Url::parse(resource_id) {
                Ok(url) => match url.host_str() {
                    Some(host) => Cow::Owned(host.to_string()),
                    None => Cow::Borrowed(resource_id),
                },
                Err(_) => Cow::Borrowed(resource_id),
            },
        }
    }
}

/// One `(pattern, seconds)` pair.
#[derive(Debug, Clone)]
pub struct ExpiryRule {
    pattern: Regex,
    value: u64,
}

impl ExpiryRule {
    pub fn new(pattern: &str, value: u64) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern, value })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    fn matches(&self, discriminator: &str) -> bool {
        self.pattern.is_match(discriminator)
    }
}

/// Ordered rule set. First match wins.
#[derive(Debug, Clone)]
pub struct ExpiryRules {
    rules: Vec<ExpiryRule>,
    default: Option<u64>,
}

impl Default for ExpiryRules {
    fn default() -> Self {
        Self::fixed(DEFAULT_EXPIRY_SECONDS)
    }
}

impl ExpiryRules {
    /// A single value for everything.
    pub fn fixed(seconds: u64) -> Self {
        Self {
            rules: Vec::new(),
            default: Some(seconds),
        }
    }

    pub fn new(rules: Vec<ExpiryRule>, default: Option<u64>) -> Self {
        Self { rules, default }
    }

    /// Compile a configured setting.
    pub fn from_setting(setting: &ExpirySetting) -> Result<Self> {
        match setting {
            ExpirySetting::Seconds(seconds) => Ok(Self::fixed(*seconds)),
            ExpirySetting::Rules { rules, default } => {
                let compiled = rules
                    .iter()
                    .map(|(pattern, value)| ExpiryRule::new(pattern, *value))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::new(compiled, *default))
            }
        }
    }

    pub fn rules(&self) -> &[ExpiryRule] {
        &self.rules
    }

    pub fn resolve(&self, discriminator: &str) -> u64 {
        self.rules
            .iter()
            .find(|rule| rule.matches(discriminator))
            .map(|rule| rule.value)
            .or(self.default)
            .unwrap_or(DEFAULT_EXPIRY_SECONDS)
    }
}

/// Key plus both durations for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub key: String,
    pub ttl: u64,
    pub stale: u64,
}

/// Resolves keys and expiry windows for resource ids.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    namespace: String,
    ttl: ExpiryRules,
    stale: ExpiryRules,
    discriminator: Discriminator,
}

impl KeyResolver {
    pub fn new(
        namespace: impl Into<String>,
        ttl: ExpiryRules,
        stale: ExpiryRules,
        discriminator: Discriminator,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            ttl,
            stale,
            discriminator,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, resource_id: &str) -> String {
        format!("{}-{}", self.namespace, resource_id)
    }

    pub fn resolve(&self, resource_id: &str) -> Resolution {
        let discriminator = self.discriminator.extract(resource_id);
        let resolution = Resolution {
            key: self.key(resource_id),
            ttl: self.ttl.resolve(&discriminator),
            stale: self.stale.resolve(&discriminator),
        };
        trace!(
            key = %resolution.key,
            ttl = resolution.ttl,
            stale = resolution.stale,
            "Resolved expiry"
        );
        resolution
    }
}

// =============================================================================
// Tests
// =============================================================================
