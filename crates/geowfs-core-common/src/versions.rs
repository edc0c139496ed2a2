//! Protocol version registry.
//!
//! This module provides a static table of the WFS protocol versions the driver speaks, with
//! the support status of each feature area (reading, transactions, server-side paging, joins)
//! per version. It is what `geowfs versions` prints.

/// Support status for a specific feature area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportStatus {
    /// The feature is fully supported and implemented.
    Supported,
    /// The feature is not supported in this protocol version.
    NotSupported,
    /// Supported only when the server advertises it in its capabilities.
    ServerDependent,
}

impl SupportStatus {
    /// Returns `true` if the feature is unconditionally supported.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        matches!(self, SupportStatus::Supported)
    }

    /// Returns `true` if the feature may be available (i.e., not explicitly unsupported).
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self, SupportStatus::NotSupported)
    }

    /// Returns the string representation of this support status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            SupportStatus::Supported => "Supported",
            SupportStatus::NotSupported => "Not Supported",
            SupportStatus::ServerDependent => "If advertised",
        }
    }
}

/// Feature areas of one protocol version.
#[derive(Debug, Clone, Copy)]
pub struct VersionCapabilities {
    /// `GetFeature` reading.
    pub read: SupportStatus,
    /// WFS-T Insert/Update/Delete.
    pub transactions: SupportStatus,
    /// `STARTINDEX`/`COUNT` paging.
    pub paging: SupportStatus,
    /// `RESULTTYPE=hits` counting.
    pub hits: SupportStatus,
    /// `TYPENAMES=(A,B)` join queries.
    pub joins: SupportStatus,
}

/// One WFS protocol version.
#[derive(Debug, Clone)]
pub struct ProtocolVersion {
    /// Version string as sent in `VERSION=`.
    pub version: &'static str,
    /// Filter encoding used with this version.
    pub filter_encoding: &'static str,
    /// Feature areas supported by this version.
    pub capabilities: VersionCapabilities,
}

impl ProtocolVersion {
    /// Creates a new version definition.
    #[must_use]
    pub const fn new(
        version: &'static str,
        filter_encoding: &'static str,
        capabilities: VersionCapabilities,
    ) -> Self {
        Self {
            version,
            filter_encoding,
            capabilities,
        }
    }
}

const VERSIONS: &[ProtocolVersion] = &[
    ProtocolVersion::new(
        "1.0.0",
        "OGC Filter 1.0",
        VersionCapabilities {
            read: SupportStatus::Supported,
            transactions: SupportStatus::ServerDependent,
            paging: SupportStatus::NotSupported,
            hits: SupportStatus::NotSupported,
            joins: SupportStatus::NotSupported,
        },
    ),
    ProtocolVersion::new(
        "1.1.0",
        "OGC Filter 1.1",
        VersionCapabilities {
            read: SupportStatus::Supported,
            transactions: SupportStatus::ServerDependent,
            paging: SupportStatus::NotSupported,
            hits: SupportStatus::ServerDependent,
            joins: SupportStatus::NotSupported,
        },
    ),
    ProtocolVersion::new(
        "2.0.0",
        "FES 2.0",
        VersionCapabilities {
            read: SupportStatus::Supported,
            transactions: SupportStatus::ServerDependent,
            paging: SupportStatus::ServerDependent,
            hits: SupportStatus::Supported,
            joins: SupportStatus::ServerDependent,
        },
    ),
];

/// Returns all protocol versions known to the driver, oldest first.
#[must_use]
pub fn supported_versions() -> &'static [ProtocolVersion] {
    VERSIONS
}

/// Looks a version up by its version string.
#[must_use]
pub fn find_version(version: &str) -> Option<&'static ProtocolVersion> {
    VERSIONS.iter().find(|v| v.version == version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_versions_oldest_first() {
        let versions: Vec<_> = supported_versions().iter().map(|v| v.version).collect();
        assert_eq!(versions, vec!["1.0.0", "1.1.0", "2.0.0"]);
    }

    #[test]
    fn joins_only_in_2_0() {
        assert!(!find_version("1.1.0").unwrap().capabilities.joins.is_available());
        assert!(find_version("2.0.0").unwrap().capabilities.joins.is_available());
        assert!(find_version("3.0.0").is_none());
    }

    #[test]
    fn status_strings() {
        assert_eq!(SupportStatus::Supported.as_str(), "Supported");
        assert_eq!(SupportStatus::NotSupported.as_str(), "Not Supported");
        assert!(SupportStatus::Supported.is_supported());
        assert!(!SupportStatus::ServerDependent.is_supported());
    }
}
