//! Error types for WFS driver operations.
//!
//! Errors are structured with `thiserror`. The root [`WfsError`] delegates its display to one
//! of several domain enums, so callers can match on the failing area while still getting the
//! exact human-readable messages servers and scripts grep for.

use geowfs_core_common::TransportError;
use thiserror::Error;
use wfs_shared::FeatureFormatError;

/// Longest server body echoed back in an error message.
const MAX_ECHOED_BODY: usize = 1000;

/// Main error type for WFS operations.
#[derive(Debug, Error)]
pub enum WfsError {
    /// The transport could not deliver a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A server response could not be used.
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// An attribute or spatial filter could not be translated.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// A SQL statement or layer lookup failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A WFS-T operation failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// An option or configuration value is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The description file could not be read or written.
    #[error("Cannot access description file '{path}': {source}")]
    DescriptionFile {
        /// File path
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while interpreting a server response.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The server answered with an empty body.
    #[error("Empty content returned by server")]
    EmptyResponse,

    /// The body is not well-formed XML.
    #[error("Invalid XML content : {}. {detail}", echo(content))]
    InvalidXml {
        /// Parser diagnostic
        detail: String,
        /// Full response body
        content: String,
    },

    /// The body is not valid JSON.
    #[error("Invalid JSON content : {source}")]
    InvalidJson {
        /// Decoder error
        #[source]
        source: FeatureFormatError,
    },

    /// A feature payload was malformed.
    #[error("Invalid feature content : {source}")]
    InvalidFeatures {
        /// Decoder error
        #[source]
        source: FeatureFormatError,
    },

    /// The server returned an exception report.
    #[error("Error returned by server : {}", echo(content))]
    ServerException {
        /// Full exception body
        content: String,
    },

    /// An expected root element is missing.
    #[error("Cannot find <{element}>")]
    MissingRootElement {
        /// Local name of the element
        element: String,
    },

    /// The capabilities document lists no feature types.
    #[error("Cannot find <FeatureTypeList>")]
    MissingFeatureTypeList,

    /// A GetFeature response has no feature collection root.
    #[error("Cannot find <FeatureCollection>")]
    MissingFeatureCollection,

    /// A DescribeFeatureType response has no XML schema.
    #[error("Cannot find <schema>")]
    MissingSchemaRoot,

    /// The schema does not describe the requested layer.
    #[error("Cannot find definition of layer {layer} in schema")]
    MissingLayerDefinition {
        /// Layer name
        layer: String,
    },

    /// Neither an advertised endpoint nor a request URL is available.
    #[error("Cannot find base URL")]
    MissingBaseUrl,

    /// A hits response carries no count.
    #[error("Cannot find numberMatched or numberOfFeatures attribute")]
    MissingNumberOfFeatures,

    /// A count attribute is present but not a number.
    #[error("Invalid feature count '{value}'")]
    InvalidNumberOfFeatures {
        /// Raw attribute value
        value: String,
    },
}

/// Errors raised while translating a predicate into an OGC filter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    /// The SQL expression could not be parsed.
    #[error("SQL Expression Parsing Error: {message}")]
    Parse {
        /// Parser diagnostic
        message: String,
    },

    /// A spatial function got the wrong number of arguments.
    #[error("Wrong number of arguments for {function}")]
    WrongArgumentCount {
        /// Function name
        function: String,
    },

    /// A spatial function argument has the wrong type.
    #[error("Wrong field type for argument {index} of {function}")]
    WrongArgumentType {
        /// Function name
        function: String,
        /// 1-based argument position
        index: usize,
    },

    /// A spatial function argument has an unusable value.
    #[error("Wrong value for argument {index} of {function}")]
    WrongArgumentValue {
        /// Function name
        function: String,
        /// 1-based argument position
        index: usize,
    },

    /// The predicate uses an operator the server does not advertise.
    ///
    /// Callers evaluate the predicate client-side when they see this.
    #[error("Operator {operator} is not supported by the server")]
    UnsupportedFilterOperator {
        /// Operator name
        operator: String,
    },

    /// The predicate references a column the layer does not have.
    #[error("Column {column} cannot be used in a server-side filter")]
    UnknownColumn {
        /// Column name
        column: String,
    },

    /// The predicate cannot be expressed as an OGC filter at all.
    #[error("Expression cannot be translated into an OGC filter: {expression}")]
    Untranslatable {
        /// Offending expression
        expression: String,
    },
}

/// Errors raised by `execute_sql` and layer lookups.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No layer has this name.
    #[error("Unknown layer '{name}'")]
    UnknownLayer {
        /// Requested layer name
        name: String,
    },

    /// A DELETE statement lacks a WHERE clause.
    #[error("WHERE clause missing")]
    WhereClauseMissing,

    /// The WHERE clause of a join cannot be sent to the server.
    #[error("Unsupported WHERE clause")]
    UnsupportedWhereClause,

    /// The join condition is not a single equality between two columns.
    #[error("Unsupported JOIN clause")]
    UnsupportedJoinClause,

    /// A SELECT item is not a plain column (or supported CAST).
    #[error("Only column names supported in column selection")]
    UnsupportedColumnExpression,

    /// The statement is not one the driver handles.
    #[error("Unsupported SQL statement: {statement}")]
    UnsupportedStatement {
        /// Statement text
        statement: String,
    },

    /// The server does not advertise join support.
    #[error("Server does not support joins")]
    JoinsNotSupported,

    /// The layer has no geometry or no features to compute an extent from.
    #[error("Cannot compute extent of layer {layer}")]
    NoExtent {
        /// Layer name
        layer: String,
    },

    /// The requested SRS is not in the layer's supported list.
    #[error("SRS {srs} is not supported by layer {layer}")]
    UnsupportedSrs {
        /// Requested SRS
        srs: String,
        /// Layer name
        layer: String,
    },
}

/// Errors raised by WFS-T operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The datasource was not opened for update, or the server lacks Transaction.
    #[error("Layer {layer} is not opened in update mode")]
    NotUpdatable {
        /// Layer name
        layer: String,
    },

    /// An update needs the identity field.
    #[error("Cannot update a feature when gml_id field is not set")]
    IdentityRequired,

    /// An insert must not carry an identity.
    #[error("Cannot insert a feature when gml_id field is already set")]
    IdentityAlreadySet,

    /// The response root is not a transaction response.
    #[error("Cannot find <TransactionResponse>")]
    MissingTransactionResponse,

    /// The summary count disagrees with the number of inserted features.
    #[error("Only {inserted} features were inserted whereas {expected} where expected")]
    InsertCountMismatch {
        /// Count reported by the server
        inserted: u64,
        /// Number of features sent
        expected: u64,
    },

    /// The response has no insert results.
    #[error("Cannot find node InsertResults")]
    MissingInsertResults,

    /// The insert results hold the wrong number of features.
    #[error("Inconsistent InsertResults: did not get expected FID count")]
    InconsistentInsertResults,

    /// An insert result carries no identifier.
    #[error("Cannot find fid")]
    MissingFid,

    /// The server reported a failed transaction.
    #[error("Transaction failed: {message}")]
    Failed {
        /// Server message
        message: String,
    },

    /// `start_transaction` called twice.
    #[error("StartTransaction() has already been called")]
    AlreadyInTransaction,

    /// Commit or rollback without a transaction.
    #[error("StartTransaction() has not yet been called")]
    NoActiveTransaction,

    /// No feature has the requested id.
    #[error("Cannot find feature {fid}")]
    FeatureNotFound {
        /// Requested feature id
        fid: i64,
    },
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid option value
    #[error("Invalid {option} option: {message}")]
    InvalidOption {
        /// The option name
        option: String,
        /// Why it's invalid
        message: String,
    },

    /// The connection string cannot be interpreted.
    #[error("Invalid connection string '{connection}'")]
    InvalidConnection {
        /// The connection string
        connection: String,
    },
}

/// Type alias for Results using [`WfsError`].
pub type Result<T> = std::result::Result<T, WfsError>;

fn echo(content: &str) -> &str {
    if content.len() <= MAX_ECHOED_BODY {
        return content;
    }
    let mut end = MAX_ECHOED_BODY;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

impl WfsError {
    /// Get a user-friendly error message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(e) => format!("Request failed: {e}"),
            Self::Response(e) => format!("Unusable server response: {e}"),
            Self::Filter(e) => format!("Filter error: {e}"),
            Self::Query(e) => format!("Query error: {e}"),
            Self::Transaction(e) => format!("Transaction error: {e}"),
            Self::Config(e) => format!("Configuration error: {e}"),
            Self::DescriptionFile { .. } => self.to_string(),
        }
    }

    /// Get recovery suggestions if available.
    #[must_use]
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::Transport(TransportError::NotFound { .. }) => {
                Some("Check that the endpoint URL is correct.".to_string())
            },
            Self::Response(ResponseError::ServerException { .. }) => {
                Some("Inspect the exception report returned by the server.".to_string())
            },
            Self::Filter(FilterError::Parse { .. }) | Self::Query(QueryError::UnsupportedStatement { .. }) => {
                Some("Check the SQL syntax of the expression.".to_string())
            },
            Self::Query(QueryError::UnknownLayer { .. }) => {
                Some("Run 'geowfs layers' to list the layers of the endpoint.".to_string())
            },
            Self::Transaction(TransactionError::NotUpdatable { .. }) => {
                Some("Open the datasource in update mode against a WFS-T server.".to_string())
            },
            _ => None,
        }
    }

    /// Check if this error is potentially recoverable.
    ///
    /// Response and transport failures only abort the current operation; the datasource stays
    /// usable.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::DescriptionFile { .. })
    }

    /// Returns `true` when a filter should be evaluated client-side instead.
    #[must_use]
    pub fn is_filter_fallback(&self) -> bool {
        matches!(
            self,
            Self::Filter(
                FilterError::UnsupportedFilterOperator { .. }
                    | FilterError::UnknownColumn { .. }
                    | FilterError::Untranslatable { .. }
            )
        )
    }
}

/// Extension trait attaching the requested URL to decoding failures.
pub trait ResponseContextExt<T> {
    /// Logs the URL a decoding failure relates to and converts the error.
    ///
    /// # Errors
    ///
    /// Returns the converted error when `self` is an error.
    fn with_url_context(self, url: &str) -> Result<T>;
}

impl<T, E> ResponseContextExt<T> for std::result::Result<T, E>
where
    E: Into<WfsError>,
{
    fn with_url_context(self, url: &str) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            log::debug!("request {url} failed: {err}");
            err
        })
    }
}
