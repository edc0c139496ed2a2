//! Driver configuration.
//!
//! Two sources feed the driver: ambient configuration keys ([`WfsConfig`], usually read from
//! the process environment) and per-open overrides ([`OpenOptions`]). Both are resolved once,
//! when a datasource is opened, into [`ResolvedOptions`]. Nothing downstream reads
//! configuration on its own.

use std::collections::HashMap;

use crate::error::{ConfigError, Result};

/// Configuration keys understood by [`WfsConfig`].
pub const CONFIG_KEYS: &[&str] = &[
    "OGR_WFS_USE_STREAMING",
    "OGR_WFS_PAGING_ALLOWED",
    "OGR_WFS_PAGE_SIZE",
    "OGR_WFS_TRUST_CAPABILITIES_BOUNDS",
    "OGR_WFS_LOAD_MULTIPLE_LAYER_DEFN",
    "GML_EXPOSE_GML_ID",
];

/// Parses a boolean option value.
///
/// Accepts YES/NO, ON/OFF, TRUE/FALSE and 1/0, case-insensitively.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidOption`] for any other value.
pub fn parse_bool(option: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_uppercase().as_str() {
        "YES" | "ON" | "TRUE" | "1" => Ok(true),
        "NO" | "OFF" | "FALSE" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidOption {
            option: option.to_string(),
            message: format!("'{value}' is not a boolean"),
        }
        .into()),
    }
}

fn parse_count(option: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidOption {
            option: option.to_string(),
            message: format!("'{value}' is not a positive integer"),
        }
        .into()),
    }
}

/// Typed snapshot of the ambient configuration keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WfsConfig {
    /// `OGR_WFS_USE_STREAMING`
    pub use_streaming: bool,
    /// `OGR_WFS_PAGING_ALLOWED`; `None` follows the server capabilities.
    pub paging_allowed: Option<bool>,
    /// `OGR_WFS_PAGE_SIZE`
    pub page_size: Option<u64>,
    /// `OGR_WFS_TRUST_CAPABILITIES_BOUNDS`
    pub trust_capabilities_bounds: bool,
    /// `OGR_WFS_LOAD_MULTIPLE_LAYER_DEFN`
    pub load_multiple_layer_defn: bool,
    /// `GML_EXPOSE_GML_ID`
    pub expose_gml_id: bool,
}

impl Default for WfsConfig {
    fn default() -> Self {
        Self {
            use_streaming: true,
            paging_allowed: None,
            page_size: None,
            trust_capabilities_bounds: false,
            load_multiple_layer_defn: true,
            expose_gml_id: true,
        }
    }
}

impl WfsConfig {
    /// Builds a configuration from key/value pairs. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a known key has an unparseable value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "OGR_WFS_USE_STREAMING" => config.use_streaming = parse_bool(key, value)?,
                "OGR_WFS_PAGING_ALLOWED" => config.paging_allowed = Some(parse_bool(key, value)?),
                "OGR_WFS_PAGE_SIZE" => config.page_size = Some(parse_count(key, value)?),
                "OGR_WFS_TRUST_CAPABILITIES_BOUNDS" => {
                    config.trust_capabilities_bounds = parse_bool(key, value)?;
                },
                "OGR_WFS_LOAD_MULTIPLE_LAYER_DEFN" => {
                    config.load_multiple_layer_defn = parse_bool(key, value)?;
                },
                "GML_EXPOSE_GML_ID" => config.expose_gml_id = parse_bool(key, value)?,
                _ => {},
            }
        }
        Ok(config)
    }

    /// Reads the configuration keys from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a variable has an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::from_pairs(
            CONFIG_KEYS
                .iter()
                .filter_map(|key| std::env::var(key).ok().map(|value| (*key, value))),
        )
    }
}

/// Per-open overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Endpoint URL, when the connection string is not one.
    pub url: Option<String>,
    /// `TRUST_CAPABILITIES_BOUNDS`
    pub trust_capabilities_bounds: Option<bool>,
    /// `EXPOSE_GML_ID`
    pub expose_gml_id: Option<bool>,
    /// `MAXFEATURES`
    pub max_features: Option<u64>,
    /// `PAGING_ALLOWED`
    pub paging_allowed: Option<bool>,
    /// `PAGE_SIZE`
    pub page_size: Option<u64>,
    /// `OUTPUTFORMAT`
    pub output_format: Option<String>,
    /// Open for WFS-T.
    pub update: bool,
}

impl OpenOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `KEY=VALUE` strings as passed on a command line.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for malformed entries, unknown keys or bad values.
    pub fn from_key_values<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        for entry in entries {
            let entry = entry.as_ref();
            let Some((key, value)) = entry.split_once('=') else {
                return Err(ConfigError::InvalidOption {
                    option: entry.to_string(),
                    message: "expected KEY=VALUE".to_string(),
                }
                .into());
            };
            let key = key.trim().to_ascii_uppercase();
            match key.as_str() {
                "URL" => options.url = Some(value.to_string()),
                "TRUST_CAPABILITIES_BOUNDS" => {
                    options.trust_capabilities_bounds = Some(parse_bool(&key, value)?);
                },
                "EXPOSE_GML_ID" => options.expose_gml_id = Some(parse_bool(&key, value)?),
                "MAXFEATURES" => options.max_features = Some(parse_count(&key, value)?),
                "PAGING_ALLOWED" => options.paging_allowed = Some(parse_bool(&key, value)?),
                "PAGE_SIZE" => options.page_size = Some(parse_count(&key, value)?),
                "OUTPUTFORMAT" => options.output_format = Some(value.to_string()),
                "UPDATE" => options.update = parse_bool(&key, value)?,
                _ => {
                    return Err(ConfigError::InvalidOption {
                        option: key,
                        message: "unknown open option".to_string(),
                    }
                    .into());
                },
            }
        }
        Ok(options)
    }

    /// Sets `EXPOSE_GML_ID`.
    #[must_use]
    pub fn with_expose_gml_id(mut self, expose: bool) -> Self {
        self.expose_gml_id = Some(expose);
        self
    }

    /// Sets `TRUST_CAPABILITIES_BOUNDS`.
    #[must_use]
    pub fn with_trust_capabilities_bounds(mut self, trust: bool) -> Self {
        self.trust_capabilities_bounds = Some(trust);
        self
    }

    /// Sets `MAXFEATURES`.
    #[must_use]
    pub fn with_max_features(mut self, max_features: u64) -> Self {
        self.max_features = Some(max_features);
        self
    }

    /// Sets `PAGE_SIZE` and enables paging.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self.paging_allowed = Some(true);
        self
    }

    /// Opens in update mode.
    #[must_use]
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }
}

/// Options that shape layer schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Whether the `gml_id` identity field is exposed.
    pub expose_gml_id: bool,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            expose_gml_id: true,
        }
    }
}

/// Fully resolved options of one datasource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    /// Decode responses with the streaming decoder.
    pub use_streaming: bool,
    /// Paging override; `None` follows the server.
    pub paging_allowed: Option<bool>,
    /// Page size override.
    pub page_size: Option<u64>,
    /// Trust capability bounding boxes for extents.
    pub trust_capabilities_bounds: bool,
    /// Describe all layers in one request.
    pub load_multiple_layer_defn: bool,
    /// Cap on the number of features returned.
    pub max_features: Option<u64>,
    /// Output format requested from the server.
    pub output_format: Option<String>,
    /// Open for WFS-T.
    pub update: bool,
    /// Schema-shaping options.
    pub schema: SchemaOptions,
}

impl ResolvedOptions {
    /// Resolves ambient configuration and open options; open options win.
    #[must_use]
    pub fn resolve(config: &WfsConfig, options: &OpenOptions) -> Self {
        Self {
            use_streaming: config.use_streaming,
            paging_allowed: options.paging_allowed.or(config.paging_allowed),
            page_size: options.page_size.or(config.page_size),
            trust_capabilities_bounds: options
                .trust_capabilities_bounds
                .unwrap_or(config.trust_capabilities_bounds),
            load_multiple_layer_defn: config.load_multiple_layer_defn,
            max_features: options.max_features,
            output_format: options.output_format.clone(),
            update: options.update,
            schema: SchemaOptions {
                expose_gml_id: options.expose_gml_id.unwrap_or(config.expose_gml_id),
            },
        }
    }
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        Self::resolve(&WfsConfig::default(), &OpenOptions::default())
    }
}

/// Collects `KEY=VALUE` pairs into a map, as used by tests and the CLI.
#[must_use]
pub fn pairs_to_map<'a>(pairs: &[(&'a str, &'a str)]) -> HashMap<&'a str, &'a str> {
    pairs.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booleans() {
        assert!(parse_bool("X", "yes").unwrap());
        assert!(parse_bool("X", "ON").unwrap());
        assert!(!parse_bool("X", "false").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn config_from_pairs() {
        let config = WfsConfig::from_pairs(pairs_to_map(&[
            ("OGR_WFS_PAGING_ALLOWED", "ON"),
            ("OGR_WFS_PAGE_SIZE", "2"),
            ("OGR_WFS_USE_STREAMING", "NO"),
            ("SOMETHING_ELSE", "x"),
        ]))
        .unwrap();
        assert_eq!(config.paging_allowed, Some(true));
        assert_eq!(config.page_size, Some(2));
        assert!(!config.use_streaming);
        assert!(config.expose_gml_id);
    }

    #[test]
    fn bad_page_size_is_an_error() {
        assert!(WfsConfig::from_pairs([("OGR_WFS_PAGE_SIZE", "zero")]).is_err());
        assert!(WfsConfig::from_pairs([("OGR_WFS_PAGE_SIZE", "0")]).is_err());
    }

    #[test]
    fn open_option_overrides_ambient_flag() {
        let config = WfsConfig::from_pairs([("GML_EXPOSE_GML_ID", "YES")]).unwrap();
        let options = OpenOptions::new().with_expose_gml_id(false);
        assert!(!ResolvedOptions::resolve(&config, &options).schema.expose_gml_id);

        let config = WfsConfig::from_pairs([("GML_EXPOSE_GML_ID", "NO")]).unwrap();
        let options = OpenOptions::new().with_expose_gml_id(true);
        assert!(ResolvedOptions::resolve(&config, &options).schema.expose_gml_id);

        assert!(
            !ResolvedOptions::resolve(&config, &OpenOptions::new())
                .schema
                .expose_gml_id
        );
    }

    #[test]
    fn open_options_from_key_values() {
        let options =
            OpenOptions::from_key_values(["EXPOSE_GML_ID=NO", "maxfeatures=10", "UPDATE=YES"])
                .unwrap();
        assert_eq!(options.expose_gml_id, Some(false));
        assert_eq!(options.max_features, Some(10));
        assert!(options.update);

        assert!(OpenOptions::from_key_values(["NOPE"]).is_err());
        assert!(OpenOptions::from_key_values(["COLOR=red"]).is_err());
    }
}
