//! WFS-T: transaction documents, response reconciliation and the per-layer state machine.
//!
//! Outside an explicit transaction every mutation is sent as its own `Transaction` request.
//! Between [`TransactionEngine::start`] and [`TransactionEngine::commit`] mutations are
//! validated locally and queued, then flushed as a single document.

use std::fmt::Write as _;

use geowfs_core_common::{FetchRequest, Fetcher};
use log::{debug, info};

use crate::capabilities::WfsVersion;
use crate::error::{ResponseError, Result, TransactionError};
use crate::feature::{Feature, fid_from_id};
use crate::gml::{GmlProfile, GmlWriter};
use crate::schema::{GML_ID, LayerSchema};
use crate::xml::{XmlElement, escape_attr, escape_text, local_name, parse_document};

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Continuation indent of the `wfs:Transaction` attributes.
const INDENT: &str = "                 ";

/// Namespaces and schema location of one protocol version.
struct Dialect {
    wfs: &'static str,
    gml: &'static str,
    filter_prefix: &'static str,
    filter: &'static str,
    wfs_schema: &'static str,
}

fn dialect(version: WfsVersion) -> Dialect {
    match version {
        WfsVersion::V1_0_0 => Dialect {
            wfs: "http://www.opengis.net/wfs",
            gml: "http://www.opengis.net/gml",
            filter_prefix: "ogc",
            filter: "http://www.opengis.net/ogc",
            wfs_schema: "http://schemas.opengis.net/wfs/1.0.0/WFS-transaction.xsd",
        },
        WfsVersion::V1_1_0 => Dialect {
            wfs: "http://www.opengis.net/wfs",
            gml: "http://www.opengis.net/gml",
            filter_prefix: "ogc",
            filter: "http://www.opengis.net/ogc",
            wfs_schema: "http://schemas.opengis.net/wfs/1.1.0/wfs.xsd",
        },
        WfsVersion::V2_0_0 => Dialect {
            wfs: "http://www.opengis.net/wfs/2.0",
            gml: "http://www.opengis.net/gml/3.2",
            filter_prefix: "fes",
            filter: "http://www.opengis.net/fes/2.0",
            wfs_schema: "http://schemas.opengis.net/wfs/2.0/wfs.xsd",
        },
    }
}

/// Layer a transaction applies to.
#[derive(Debug, Clone)]
pub struct TransactionTarget<'a> {
    pub version: WfsVersion,
    /// Advertised layer name.
    pub layer_name: &'a str,
    /// Namespace bound to the `feature:` prefix.
    pub namespace_uri: &'a str,
    /// `DescribeFeatureType` URL placed in `xsi:schemaLocation`.
    pub describe_url: &'a str,
    /// Endpoint the document is POSTed to.
    pub endpoint: &'a str,
    pub schema: &'a LayerSchema,
    /// `srsName` written on geometries.
    pub srs_name: Option<&'a str>,
    /// Whether geometries are written `y x`.
    pub lat_long_order: bool,
}

impl TransactionTarget<'_> {
    fn local_name(&self) -> &str {
        local_name(self.layer_name)
    }

    fn gml_writer(&self) -> GmlWriter {
        let profile = if self.version == WfsVersion::V1_0_0 {
            GmlProfile::Gml2
        } else {
            GmlProfile::Gml3
        };
        GmlWriter::new(profile)
            .with_srs_name(self.srs_name)
            .with_swapped_axes(self.lat_long_order)
    }
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOp {
    Insert(Feature),
    Update(Feature),
    /// Delete with a ready-made filter body.
    Delete { filter: String },
}

/// Filter body deleting a single feature by server identifier.
#[must_use]
pub fn delete_by_id_filter(version: WfsVersion, gml_id: &str) -> String {
    let id = escape_attr(gml_id);
    if version.is_2_0() {
        format!("<fes:ResourceId rid=\"{id}\"/>\n")
    } else {
        format!("<ogc:FeatureId fid=\"{id}\"/>\n")
    }
}

/// Renders a complete `Transaction` document. Consecutive inserts share one `wfs:Insert`.
#[must_use]
pub fn render_transaction(target: &TransactionTarget<'_>, operations: &[TransactionOp]) -> String {
    let dialect = dialect(target.version);
    let mut out = String::new();
    let ns = escape_attr(target.namespace_uri);
    let describe = escape_attr(target.describe_url);
    let _ = writeln!(out, "<?xml version=\"1.0\"?>");
    let _ = writeln!(out, "<wfs:Transaction xmlns:wfs=\"{}\"", dialect.wfs);
    let _ = writeln!(out, "{INDENT}xmlns:xsi=\"{XSI_NAMESPACE}\"");
    let _ = writeln!(out, "{INDENT}service=\"WFS\" version=\"{}\"", target.version.as_str());
    let _ = writeln!(out, "{INDENT}xmlns:gml=\"{}\"", dialect.gml);
    let _ = writeln!(out, "{INDENT}xmlns:{}=\"{}\"", dialect.filter_prefix, dialect.filter);
    let _ = writeln!(
        out,
        "{INDENT}xsi:schemaLocation=\"{} {} {ns} {describe}\">",
        dialect.wfs, dialect.wfs_schema
    );

    let mut gml = target.gml_writer();
    let mut in_insert = false;
    for operation in operations {
        let is_insert = matches!(operation, TransactionOp::Insert(_));
        if in_insert && !is_insert {
            out.push_str("  </wfs:Insert>\n");
        }
        if is_insert && !in_insert {
            out.push_str("  <wfs:Insert>\n");
        }
        in_insert = is_insert;
        match operation {
            TransactionOp::Insert(feature) => render_insert(target, &mut gml, feature, &mut out),
            TransactionOp::Update(feature) => {
                render_update(target, &dialect, &mut gml, feature, &mut out);
            },
            TransactionOp::Delete { filter } => render_delete(target, &dialect, filter, &mut out),
        }
    }
    if in_insert {
        out.push_str("  </wfs:Insert>\n");
    }
    out.push_str("</wfs:Transaction>\n");
    out
}

fn render_insert(target: &TransactionTarget<'_>, gml: &mut GmlWriter, feature: &Feature, out: &mut String) {
    let local = target.local_name();
    let _ = writeln!(
        out,
        "    <feature:{local} xmlns:feature=\"{}\">",
        escape_attr(target.namespace_uri)
    );
    for field in target.schema.declared_fields() {
        let Some(text) = feature.field(&field.name).and_then(|value| value.to_text()) else {
            continue;
        };
        let _ = writeln!(
            out,
            "      <feature:{name}>{}</feature:{name}>",
            escape_text(&text),
            name = field.name
        );
    }
    if let Some(name) = target.schema.geometry_name() {
        if let Some(geometry) = feature.geometry_named(name).or_else(|| feature.geometry()) {
            let _ = writeln!(out, "      <feature:{name}>{}</feature:{name}>", gml.write(geometry));
        }
    }
    let _ = writeln!(out, "    </feature:{local}>");
}

fn property(dialect: &Dialect, name: &str, value: Option<&str>, out: &mut String) {
    let name_tag = if dialect.filter_prefix == "fes" {
        "wfs:ValueReference"
    } else {
        "wfs:Name"
    };
    let _ = writeln!(out, "    <wfs:Property>\n      <{name_tag}>{name}</{name_tag}>");
    if let Some(value) = value {
        let _ = writeln!(out, "      <wfs:Value>{value}</wfs:Value>");
    }
    out.push_str("    </wfs:Property>\n");
}

fn render_update(
    target: &TransactionTarget<'_>,
    dialect: &Dialect,
    gml: &mut GmlWriter,
    feature: &Feature,
    out: &mut String,
) {
    let _ = writeln!(
        out,
        "  <wfs:Update typeName=\"feature:{}\" xmlns:feature=\"{}\">",
        target.local_name(),
        escape_attr(target.namespace_uri)
    );
    if let Some(name) = target.schema.geometry_name() {
        let value = feature
            .geometry_named(name)
            .or_else(|| feature.geometry())
            .map(|geometry| gml.write(geometry));
        property(dialect, name, value.as_deref(), out);
    }
    for field in target.schema.declared_fields() {
        let value = feature
            .field(&field.name)
            .and_then(|value| value.to_text())
            .map(|text| escape_text(&text).into_owned());
        property(dialect, &field.name, value.as_deref(), out);
    }

    let id = escape_attr(feature.gml_id().unwrap_or_default());
    let fp = dialect.filter_prefix;
    let selector = match target.version {
        WfsVersion::V1_0_0 => format!("<ogc:FeatureId fid=\"{id}\"/>"),
        WfsVersion::V1_1_0 => format!("<ogc:GmlObjectId gml:id=\"{id}\"/>"),
        WfsVersion::V2_0_0 => format!("<fes:ResourceId rid=\"{id}\"/>"),
    };
    let _ = write!(
        out,
        "    <{fp}:Filter>\n      {selector}\n    </{fp}:Filter>\n  </wfs:Update>\n"
    );
}

fn render_delete(target: &TransactionTarget<'_>, dialect: &Dialect, filter: &str, out: &mut String) {
    let fp = dialect.filter_prefix;
    let _ = write!(
        out,
        "  <wfs:Delete xmlns:feature=\"{}\" typeName=\"feature:{}\">\n    <{fp}:Filter>\n{filter}    </{fp}:Filter>\n  </wfs:Delete>\n",
        escape_attr(target.namespace_uri),
        target.local_name()
    );
}

/// Checks the root of a transaction response.
///
/// # Errors
///
/// Returns [`ResponseError::EmptyResponse`], [`ResponseError::InvalidXml`] or
/// [`ResponseError::ServerException`] for unusable bodies, and
/// [`TransactionError::MissingTransactionResponse`] for any other root.
pub fn parse_transaction_response(body: &[u8]) -> Result<XmlElement> {
    let document = parse_document(body)?;
    match document.local_name() {
        "TransactionResponse" | "WFS_TransactionResponse" => Ok(document),
        "ServiceExceptionReport" | "ExceptionReport" => Err(ResponseError::ServerException {
            content: String::from_utf8_lossy(body).into_owned(),
        }
        .into()),
        _ => Err(TransactionError::MissingTransactionResponse.into()),
    }
}

/// Fails when a WFS 1.0 response reports a failed status.
fn check_status(document: &XmlElement) -> Result<()> {
    let Some(result) = document.child("TransactionResult") else {
        return Ok(());
    };
    let failed = result
        .child("Status")
        .is_some_and(|status| status.child("FAILED").is_some());
    if failed {
        return Err(TransactionError::Failed {
            message: result.child_text("Message").unwrap_or_default().trim().to_string(),
        }
        .into());
    }
    Ok(())
}

fn feature_id(element: &XmlElement) -> Result<String> {
    let id_element = element
        .child("FeatureId")
        .or_else(|| element.child("ResourceId"))
        .ok_or(TransactionError::MissingFid)?;
    id_element
        .attr("fid")
        .or_else(|| id_element.attr("rid"))
        .map(str::to_string)
        .ok_or_else(|| TransactionError::MissingFid.into())
}

/// Reads the identifiers of `expected` inserted features, in request order.
///
/// With `check_summary`, `TransactionSummary/@totalInserted` must equal `expected`; a missing
/// summary counts as zero.
///
/// # Errors
///
/// Returns the [`TransactionError`] describing the first inconsistency found.
pub fn inserted_ids(document: &XmlElement, expected: usize, check_summary: bool) -> Result<Vec<String>> {
    check_status(document)?;

    // WFS 1.0: one InsertResult per insert, each holding FeatureId elements
    if document.local_name() == "WFS_TransactionResponse" {
        let ids = document
            .children_named("InsertResult")
            .flat_map(|result| result.children_named("FeatureId"))
            .map(|id| {
                id.attr("fid")
                    .map(str::to_string)
                    .ok_or_else(|| TransactionError::MissingFid.into())
            })
            .collect::<Result<Vec<_>>>()?;
        if ids.is_empty() {
            return Err(TransactionError::MissingInsertResults.into());
        }
        if ids.len() != expected {
            return Err(TransactionError::InconsistentInsertResults.into());
        }
        return Ok(ids);
    }

    if check_summary {
        let inserted = document
            .child("TransactionSummary")
            .and_then(|summary| summary.attr("totalInserted"))
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0);
        if inserted != expected as u64 {
            return Err(TransactionError::InsertCountMismatch {
                inserted,
                expected: expected as u64,
            }
            .into());
        }
    }

    let results = document
        .child("InsertResults")
        .ok_or(TransactionError::MissingInsertResults)?;
    let features: Vec<&XmlElement> = results.children_named("Feature").collect();
    if features.len() != expected {
        return Err(TransactionError::InconsistentInsertResults.into());
    }
    features.into_iter().map(feature_id).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Ready,
    InTransaction,
}

/// Transaction state of one layer.
#[derive(Debug, Default)]
pub struct TransactionEngine {
    pending: Option<Vec<TransactionOp>>,
    last_inserted_ids: Vec<String>,
}

impl TransactionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        if self.pending.is_some() {
            TransactionState::InTransaction
        } else {
            TransactionState::Ready
        }
    }

    /// Identifiers returned by the last successful insert or commit.
    #[must_use]
    pub fn last_inserted_ids(&self) -> &[String] {
        &self.last_inserted_ids
    }

    /// Number of queued operations.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, Vec::len)
    }

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::AlreadyInTransaction`] when one is already open.
    pub fn start(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Err(TransactionError::AlreadyInTransaction.into());
        }
        self.pending = Some(Vec::new());
        Ok(())
    }

    /// Discards the queued operations.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NoActiveTransaction`] outside a transaction.
    pub fn rollback(&mut self) -> Result<()> {
        let discarded = self
            .pending
            .take()
            .ok_or(TransactionError::NoActiveTransaction)?;
        debug!("rollback discards {} operations", discarded.len());
        Ok(())
    }

    /// Inserts `feature`, or queues it inside a transaction.
    ///
    /// An immediate insert stores the returned identifier in the feature: its `fid` becomes
    /// the numeric suffix and `gml_id` the full identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::IdentityAlreadySet`] when `gml_id` is set, and transport,
    /// response or reconciliation errors of the request.
    pub fn insert(
        &mut self,
        target: &TransactionTarget<'_>,
        fetcher: &dyn Fetcher,
        feature: &mut Feature,
    ) -> Result<()> {
        if feature.gml_id().is_some_and(|id| !id.is_empty()) {
            return Err(TransactionError::IdentityAlreadySet.into());
        }
        if let Some(pending) = self.pending.as_mut() {
            pending.push(TransactionOp::Insert(feature.clone()));
            return Ok(());
        }

        let document = send(target, fetcher, &[TransactionOp::Insert(feature.clone())])?;
        let ids = inserted_ids(&document, 1, false)?;
        if let Some(id) = ids.first() {
            feature.fid = fid_from_id(id);
            if target.schema.exposes_gml_id() {
                feature.set_field(GML_ID, id.clone());
            }
        }
        self.last_inserted_ids = ids;
        Ok(())
    }

    /// Updates the feature identified by its `gml_id`, or queues the update.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::IdentityRequired`] when `gml_id` is not set, and transport
    /// or response errors of the request.
    pub fn update(
        &mut self,
        target: &TransactionTarget<'_>,
        fetcher: &dyn Fetcher,
        feature: &Feature,
    ) -> Result<()> {
        if feature.gml_id().is_none_or(str::is_empty) {
            return Err(TransactionError::IdentityRequired.into());
        }
        self.submit(target, fetcher, TransactionOp::Update(feature.clone()))
    }

    /// Deletes the features matched by `filter`, or queues the delete.
    ///
    /// # Errors
    ///
    /// Returns transport or response errors of the request.
    pub fn delete(
        &mut self,
        target: &TransactionTarget<'_>,
        fetcher: &dyn Fetcher,
        filter: String,
    ) -> Result<()> {
        self.submit(target, fetcher, TransactionOp::Delete { filter })
    }

    fn submit(
        &mut self,
        target: &TransactionTarget<'_>,
        fetcher: &dyn Fetcher,
        operation: TransactionOp,
    ) -> Result<()> {
        match self.pending.as_mut() {
            Some(pending) => pending.push(operation),
            None => {
                send(target, fetcher, &[operation])?;
            },
        }
        Ok(())
    }

    /// Flushes the queued operations as one request and closes the transaction.
    ///
    /// The transaction is closed even when the request fails. An empty transaction sends
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NoActiveTransaction`] outside a transaction, and transport,
    /// response or reconciliation errors of the request.
    pub fn commit(&mut self, target: &TransactionTarget<'_>, fetcher: &dyn Fetcher) -> Result<()> {
        let operations = self
            .pending
            .take()
            .ok_or(TransactionError::NoActiveTransaction)?;
        if operations.is_empty() {
            return Ok(());
        }
        let inserts = operations
            .iter()
            .filter(|op| matches!(op, TransactionOp::Insert(_)))
            .count();

        let document = send(target, fetcher, &operations)?;
        if inserts > 0 {
            self.last_inserted_ids = inserted_ids(&document, inserts, true)?;
        } else {
            check_status(&document)?;
        }
        info!(
            "committed {} operations on {} ({inserts} inserts)",
            operations.len(),
            target.layer_name
        );
        Ok(())
    }
}

fn send(
    target: &TransactionTarget<'_>,
    fetcher: &dyn Fetcher,
    operations: &[TransactionOp],
) -> Result<XmlElement> {
    let document = render_transaction(target, operations);
    debug!("POST {} ({} operations)", target.endpoint, operations.len());
    let response = fetcher.fetch(&FetchRequest::post(target.endpoint, document))?;
    let root = parse_transaction_response(&response.body)?;
    check_status(&root)?;
    Ok(root)
}
