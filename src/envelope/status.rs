//! Status extraction for upstream errors
//!
//! Only "forbidden" and "not found" are worth caching: both are stable
//! answers about the resource itself. Anything else (timeouts, 5xx, errors
//! without a status) may succeed on the next attempt and must not be stored.

use crate::domain::ports::{FetchResult, SourceError};

/// Field names inspected when no explicit list is configured.
pub const DEFAULT_STATUS_FIELDS: [&str; 3] = ["status", "statusCode", "code"];

/// Upstream error statuses that may be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheableStatus {
    Forbidden,
    NotFound,
}

impl CacheableStatus {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            403 => Some(CacheableStatus::Forbidden),
            404 => Some(CacheableStatus::NotFound),
            _ => None,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            CacheableStatus::Forbidden => 403,
            CacheableStatus::NotFound => 404,
        }
    }

    /// Compact 3-byte store form.
    pub fn marker(&self) -> &'static [u8] {
        match self {
            CacheableStatus::Forbidden => b"403",
            CacheableStatus::NotFound => b"404",
        }
    }

    /// Parse the compact store form.
    pub fn from_marker(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"403" => Some(CacheableStatus::Forbidden),
            b"404" => Some(CacheableStatus::NotFound),
            _ => None,
        }
    }
}

impl std::fmt::Display for CacheableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Reads a status code out of a [`SourceError`] by trying a list of
/// attribute names in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusExtractor {
    fields: Vec<String>,
}

impl Default for StatusExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_FIELDS.iter().map(|f| f.to_string()))
    }
}

impl StatusExtractor {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// First status found, cacheable or not.
    pub fn status(&self, err: &SourceError) -> Option<u16> {
        self.fields.iter().find_map(|f| err.status_in(f))
    }

    /// Cacheable status carried by any of the configured fields.
    pub fn cacheable(&self, err: &SourceError) -> Option<CacheableStatus> {
        self.fields
            .iter()
            .filter_map(|f| err.status_in(f))
            .find_map(CacheableStatus::from_code)
    }

    /// Whether a fetch outcome may be written to the store.
    pub fn is_cacheable(&self, result: &FetchResult) -> bool {
        match result {
            Ok(_) => true,
            Err(err) => self.cacheable(err).is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Response;

    #[test]
    fn test_only_403_and_404_are_cacheable() {
        assert_eq!(CacheableStatus::from_code(403), Some(CacheableStatus::Forbidden));
        assert_eq!(CacheableStatus::from_code(404), Some(CacheableStatus::NotFound));
        assert_eq!(CacheableStatus::from_code(500), None);
        assert_eq!(CacheableStatus::from_code(410), None);
    }

    #[test]
    fn test_marker_round_trip() {
        for status in [CacheableStatus::Forbidden, CacheableStatus::NotFound] {
            assert_eq!(CacheableStatus::from_marker(status.marker()), Some(status));
        }
        assert_eq!(CacheableStatus::from_marker(b"500"), None);
    }

    #[test]
    fn test_extractor_checks_every_field() {
        let extractor = StatusExtractor::default();

        let by_status = SourceError::new("a").with_status("status", 404);
        let by_code = SourceError::new("b").with_status("code", 403);
        let by_status_code = SourceError::new("c").with_status("statusCode", 404);
        let fatal = SourceError::new("d").with_status("statusCode", 500);
        let nocode = SourceError::new("e");

        assert_eq!(extractor.cacheable(&by_status), Some(CacheableStatus::NotFound));
        assert_eq!(extractor.cacheable(&by_code), Some(CacheableStatus::Forbidden));
        assert_eq!(
            extractor.cacheable(&by_status_code),
            Some(CacheableStatus::NotFound)
        );
        assert_eq!(extractor.cacheable(&fatal), None);
        assert_eq!(extractor.status(&fatal), Some(500));
        assert_eq!(extractor.cacheable(&nocode), None);
    }

    #[test]
    fn test_custom_fields_ignore_others() {
        let extractor = StatusExtractor::new(["http_status"]);
        let err = SourceError::new("x").with_status("status", 404);
        assert_eq!(extractor.cacheable(&err), None);

        let err = SourceError::new("x").with_status("http_status", 404);
        assert_eq!(extractor.cacheable(&err), Some(CacheableStatus::NotFound));
    }

    #[test]
    fn test_is_cacheable() {
        let extractor = StatusExtractor::default();
        assert!(extractor.is_cacheable(&Ok(Response::new("ok"))));
        assert!(extractor.is_cacheable(&Err(SourceError::new("x").with_status("status", 403))));
        assert!(!extractor.is_cacheable(&Err(SourceError::new("x"))));
    }
}
