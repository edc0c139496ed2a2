//! Opening a WFS endpoint and the datasource-level entry points.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use geowfs_core_common::{FetchRequest, Fetcher};
use log::{debug, info, warn};
use percent_encoding::percent_decode_str;

use crate::capabilities::{Capabilities, CapabilitiesSnapshot, LayerCapability, WfsVersion};
use crate::config::{OpenOptions, ResolvedOptions, SchemaOptions, WfsConfig};
use crate::context::DatasourceContext;
use crate::description::DescriptionFile;
use crate::error::{ConfigError, QueryError, ResponseContextExt, Result};
use crate::feature::Feature;
use crate::filter::{
    DeleteStatement, Expr, SelectItem, SelectStatement, SqlStatement, parse_statement,
};
use crate::join::JoinLayer;
use crate::layer::{FeatureSource, GEOMETRY_FIELD_TOKEN, MemoryLayer, WfsLayer};
use crate::request::{SortKey, capabilities_url, endpoint_base};
use crate::schema::{FieldDescriptor, FieldType, GML_ID, LayerSchema, SchemaCache};
use crate::url::{add_kvp, encode_value, get_param};
use crate::xml::to_pretty_string;

/// Connection-string prefix selecting this driver.
pub const CONNECTION_PREFIX: &str = "WFS:";

/// Pseudo column listing the ids created by the last insert or commit.
pub const LAST_INSERTED_FIDS: &str = "_LAST_INSERTED_FIDS_";

/// An opened WFS endpoint.
pub struct WfsDataSource {
    ctx: Arc<DatasourceContext>,
    layers: Vec<WfsLayer>,
    description_path: Option<PathBuf>,
}

/// Strips the driver prefix, if any.
#[must_use]
pub fn strip_connection_prefix(connection: &str) -> &str {
    match connection.get(..CONNECTION_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(CONNECTION_PREFIX) => {
            &connection[CONNECTION_PREFIX.len()..]
        },
        _ => connection,
    }
}

fn decoded(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Type names a user URL restricts the datasource to.
fn url_type_names(url: &str) -> Vec<String> {
    get_param(url, "TYPENAMES")
        .or_else(|| get_param(url, "TYPENAME"))
        .map(|value| {
            decoded(&value)
                .trim_matches(|c| c == '(' || c == ')')
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn fetch_capabilities(fetcher: &dyn Fetcher, url: &str) -> Result<Capabilities> {
    let request_url = capabilities_url(url);
    debug!("GET {request_url}");
    let response = fetcher.fetch(&FetchRequest::get(&request_url))?;
    Ok(Capabilities::parse(&response.body, Some(&endpoint_base(url)))
        .with_url_context(&request_url)?)
}

fn layer_matches(layer: &LayerCapability, name: &str) -> bool {
    layer.name == name || layer.local_name() == name
}

impl WfsDataSource {
    /// Opens `connection`: an endpoint URL, optionally prefixed with `WFS:`, or the path of a
    /// description file.
    ///
    /// `TYPENAME` in the URL restricts the exposed layers and `MAXFEATURES` caps every read
    /// unless the open options set their own cap.
    ///
    /// # Errors
    ///
    /// Returns transport and response errors of the `GetCapabilities` request, and
    /// [`ConfigError::InvalidConnection`] for a description file that records neither an URL
    /// nor a capabilities document.
    pub fn open(
        connection: &str,
        fetcher: Arc<dyn Fetcher>,
        config: &WfsConfig,
        options: OpenOptions,
    ) -> Result<Self> {
        let connection = strip_connection_prefix(connection.trim());
        let mut description = if DescriptionFile::detect(connection) {
            Some(DescriptionFile::load(connection)?)
        } else {
            None
        };

        let url = options
            .url
            .clone()
            .or_else(|| description.as_ref().and_then(DescriptionFile::url))
            .or_else(|| description.is_none().then(|| connection.to_string()));

        let recorded = description
            .as_ref()
            .and_then(DescriptionFile::capabilities)
            .cloned();
        let capabilities = match (recorded, &url) {
            (Some(document), url) => {
                debug!("capabilities read from description file {connection}");
                let raw = to_pretty_string(&document);
                let request_url = url.as_deref().map(endpoint_base);
                Capabilities::from_document(document, raw, request_url.as_deref())?
            },
            (None, Some(url)) => {
                let capabilities = fetch_capabilities(fetcher.as_ref(), url)?;
                if let Some(description) = description.as_mut() {
                    description.set_capabilities(&capabilities.document);
                    if let Err(err) = description.save() {
                        warn!("{err}");
                    }
                }
                capabilities
            },
            (None, None) => {
                return Err(ConfigError::InvalidConnection {
                    connection: connection.to_string(),
                }
                .into());
            },
        };

        let user_url = url.unwrap_or_default();
        let mut options = options;
        if options.max_features.is_none() {
            options.max_features = get_param(&user_url, "MAXFEATURES")
                .and_then(|value| value.trim().parse().ok());
        }
        // a format given in the URL is sent back with its original spelling
        let base_url = match (&options.output_format, get_param(&user_url, "OUTPUTFORMAT")) {
            (Some(format), _) => add_kvp(&capabilities.base_url, "OUTPUTFORMAT", &encode_value(format)),
            (None, Some(raw)) => {
                options.output_format = Some(decoded(&raw));
                add_kvp(&capabilities.base_url, "OUTPUTFORMAT", &raw)
            },
            (None, None) => capabilities.base_url.clone(),
        };
        let resolved = ResolvedOptions::resolve(config, &options);

        let restriction = url_type_names(&user_url);
        let exposed: Vec<LayerCapability> = capabilities
            .layers
            .iter()
            .filter(|layer| {
                restriction.is_empty() || restriction.iter().any(|name| layer_matches(layer, name))
            })
            .cloned()
            .collect();
        if !restriction.is_empty() && exposed.is_empty() {
            warn!("none of the requested type names {restriction:?} is advertised");
        }

        info!(
            "opened WFS {} endpoint {} with {} layers",
            capabilities.version,
            base_url,
            exposed.len()
        );

        let description_path = description.as_ref().map(|d| d.path().to_path_buf());
        let ctx = Arc::new(DatasourceContext {
            fetcher,
            capabilities: Arc::new(capabilities),
            options: resolved,
            base_url,
            schemas: SchemaCache::new(),
            description: Mutex::new(description),
            layer_names: exposed.iter().map(|layer| layer.name.clone()).collect(),
        });
        let layers = exposed
            .into_iter()
            .map(|layer| WfsLayer::new(Arc::clone(&ctx), layer))
            .collect();

        Ok(Self {
            ctx,
            layers,
            description_path,
        })
    }

    #[must_use]
    pub fn capabilities(&self) -> &CapabilitiesSnapshot {
        &self.ctx.capabilities
    }

    #[must_use]
    pub fn version(&self) -> WfsVersion {
        self.ctx.capabilities.version
    }

    /// Endpoint requests are built from.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.ctx.base_url
    }

    /// Description file the datasource was opened from.
    #[must_use]
    pub fn description_path(&self) -> Option<&PathBuf> {
        self.description_path.as_ref()
    }

    /// Service metadata.
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.ctx.capabilities.metadata()
    }

    /// The raw capabilities document.
    #[must_use]
    pub fn capabilities_xml(&self) -> &str {
        &self.ctx.capabilities.raw
    }

    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> impl Iterator<Item = &WfsLayer> {
        self.layers.iter()
    }

    pub fn layer(&mut self, index: usize) -> Option<&mut WfsLayer> {
        self.layers.get_mut(index)
    }

    fn layer_index(&self, name: &str) -> Option<usize> {
        if let Some(index) = self.layers.iter().position(|layer| layer.name() == name) {
            return Some(index);
        }
        let mut candidates = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.capability().local_name() == name);
        match (candidates.next(), candidates.next()) {
            (Some((index, _)), None) => Some(index),
            _ => None,
        }
    }

    /// Layer named `name`, or whose unprefixed name is `name` when that is unambiguous.
    pub fn layer_by_name(&mut self, name: &str) -> Option<&mut WfsLayer> {
        let index = self.layer_index(name)?;
        self.layers.get_mut(index)
    }

    fn require_layer(&self, name: &str) -> Result<usize> {
        self.layer_index(name).ok_or_else(|| {
            QueryError::UnknownLayer {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Runs a statement against the endpoint.
    ///
    /// SELECT statements return a result set: single-layer selects push their WHERE, ORDER BY
    /// and column list to the server, joins become `TYPENAMES=(A,B)` queries and
    /// `SELECT _LAST_INSERTED_FIDS_ FROM layer` lists the ids of the last insert. DELETE
    /// statements are sent as a transaction and return `None`.
    ///
    /// # Errors
    ///
    /// Returns parse errors, [`QueryError`] for statements that cannot be mapped onto WFS
    /// requests, and the errors of the requests issued.
    pub fn execute_sql(&mut self, sql: &str) -> Result<Option<Box<dyn FeatureSource>>> {
        debug!("execute_sql: {sql}");
        match parse_statement(sql)? {
            SqlStatement::Delete(delete) => {
                self.execute_delete(&delete)?;
                Ok(None)
            },
            SqlStatement::Select(select) => self.execute_select(&select).map(Some),
        }
    }

    fn execute_delete(&mut self, delete: &DeleteStatement) -> Result<()> {
        let index = self.require_layer(&delete.layer)?;
        let condition = delete
            .condition
            .as_deref()
            .filter(|condition| !condition.is_empty())
            .ok_or(QueryError::WhereClauseMissing)?;
        let layer = &mut self.layers[index];
        let body = layer.translate_predicate(condition)?;
        layer.delete_matching(body)
    }

    fn execute_select(&mut self, select: &SelectStatement) -> Result<Box<dyn FeatureSource>> {
        if is_last_inserted_query(select) {
            return self.last_inserted(&select.from.name);
        }
        if !select.joins.is_empty() {
            let mut layers = Vec::with_capacity(select.joins.len() + 1);
            for table in std::iter::once(&select.from).chain(select.joins.iter().map(|j| &j.table)) {
                let index = self.require_layer(&table.name)?;
                layers.push(self.layers[index].capability().clone());
            }
            let join = JoinLayer::new(Arc::clone(&self.ctx), select, layers)?;
            return Ok(Box::new(join));
        }
        self.single_layer_select(select)
    }

    fn last_inserted(&self, name: &str) -> Result<Box<dyn FeatureSource>> {
        let index = self.require_layer(name)?;
        let layer = &self.layers[index];
        let schema = LayerSchema::new(
            vec![FieldDescriptor::new(GML_ID, FieldType::String)],
            None,
            SchemaOptions {
                expose_gml_id: false,
            },
        );
        let features = layer
            .last_inserted_ids()
            .iter()
            .zip(1..)
            .map(|(id, fid)| {
                let mut feature = Feature::new().with_field(GML_ID, id.as_str());
                feature.fid = Some(fid);
                feature
            })
            .collect();
        Ok(Box::new(MemoryLayer::new(layer.name().to_string(), schema, features)))
    }

    fn single_layer_select(&mut self, select: &SelectStatement) -> Result<Box<dyn FeatureSource>> {
        if select.distinct {
            return Err(QueryError::UnsupportedStatement {
                statement: "SELECT DISTINCT on a single layer".to_string(),
            }
            .into());
        }
        let index = self.require_layer(&select.from.name)?;
        let capability = self.layers[index].capability().clone();
        let mut layer = WfsLayer::new(Arc::clone(&self.ctx), capability);

        let selected = selected_columns(&select.projection)?;
        if let Some(selected) = selected {
            let schema = layer.schema();
            let mut ignored: Vec<&str> = schema
                .declared_fields()
                .map(|field| field.name.as_str())
                .filter(|name| !selected.iter().any(|column| column == name))
                .collect();
            let geometry_selected = schema
                .geometry_name()
                .is_some_and(|geometry| selected.iter().any(|column| column == geometry));
            if !geometry_selected {
                ignored.push(GEOMETRY_FIELD_TOKEN);
            }
            layer.set_ignored_fields(&ignored);
        }
        if let Some(selection) = &select.selection {
            layer.apply_attribute_expr(selection.clone())?;
        }
        if !select.order_by.is_empty() {
            layer.set_order_by(
                select
                    .order_by
                    .iter()
                    .map(|item| SortKey::new(item.column.name.clone(), item.ascending))
                    .collect(),
            );
        }
        Ok(Box::new(layer))
    }

    /// Flushes the description file to disk.
    ///
    /// # Errors
    ///
    /// Returns [`crate::WfsError::DescriptionFile`] when the file cannot be written.
    pub fn flush_description(&self) -> Result<()> {
        let guard = self
            .ctx
            .description
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(description) => description.save(),
            None => Ok(()),
        }
    }
}

fn is_last_inserted_query(select: &SelectStatement) -> bool {
    match select.projection.as_slice() {
        [SelectItem::Expr {
            expr: Expr::Column(column),
            ..
        }] => column.name.eq_ignore_ascii_case(LAST_INSERTED_FIDS),
        _ => false,
    }
}

/// Column names of an explicit projection, `None` for `*`.
fn selected_columns(projection: &[SelectItem]) -> Result<Option<Vec<String>>> {
    let mut columns = Vec::new();
    for item in projection {
        match item {
            SelectItem::Wildcard | SelectItem::QualifiedWildcard(_) => return Ok(None),
            SelectItem::Expr {
                expr: Expr::Column(column),
                alias: None,
            } => columns.push(column.name.clone()),
            SelectItem::Expr { .. } => {
                return Err(QueryError::UnsupportedColumnExpression.into());
            },
        }
    }
    Ok(Some(columns))
}
