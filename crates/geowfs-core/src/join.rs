//! Join queries: `TYPENAMES=(A,B)` requests and the composite records built from their
//! `wfs:Tuple` results.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use log::{debug, warn};

use crate::capabilities::LayerCapability;
use crate::config::SchemaOptions;
use crate::context::DatasourceContext;
use crate::decoder::{DecodedFeature, DecodedRecord, ResponseDecoder, open_decoder, parse_hits};
use crate::error::{QueryError, ResponseContextExt, Result};
use crate::feature::{Feature, FieldValue};
use crate::filter::{
    CastType, ColumnKind, ColumnRef, ColumnResolver, CompareOp, Expr, ResolvedColumn, SelectItem,
    SelectStatement, TableRef, TranslateContext, evaluate_value, filter_document, translate,
};
use crate::geometry::to_wkt;
use crate::layer::FeatureSource;
use crate::paging::{self, PagingController, PagingMode};
use crate::request::{GetFeatureParams, SortKey, get_feature_url};
use crate::schema::{
    FieldDescriptor, FieldType, GML_ID, GeometryFieldDescriptor, GeometryType, LayerSchema,
};
use crate::srs::Srs;
use crate::xml::local_name;

/// A layer taking part in a join, under the name the statement uses for it.
#[derive(Debug, Clone)]
struct JoinTable {
    table: TableRef,
    layer: LayerCapability,
    schema: Arc<LayerSchema>,
}

impl JoinTable {
    fn reference(&self) -> &str {
        self.table.reference_name()
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{name}", self.reference())
    }

    fn has_column(&self, name: &str) -> bool {
        self.schema.field(name).is_some() || self.schema.geometry_name() == Some(name)
    }
}

/// Resolves `table.column` references to `layer/column` property paths.
struct JoinColumns<'a> {
    tables: &'a [JoinTable],
}

impl JoinColumns<'_> {
    fn locate(&self, column: &ColumnRef) -> Option<(usize, String)> {
        if let Some((qualifier, name)) = column.split_dotted() {
            let found = self
                .tables
                .iter()
                .position(|table| table.table.matches(&qualifier) && table.has_column(&name));
            if let Some(idx) = found {
                return Some((idx, name));
            }
        }
        let mut owners = self
            .tables
            .iter()
            .enumerate()
            .filter(|(_, table)| table.has_column(&column.name));
        match (owners.next(), owners.next()) {
            (Some((idx, _)), None) => Some((idx, column.name.clone())),
            _ => None,
        }
    }
}

impl ColumnResolver for JoinColumns<'_> {
    fn resolve(&self, column: &ColumnRef) -> Option<ResolvedColumn> {
        let (idx, name) = self.locate(column)?;
        let table = &self.tables[idx];
        let kind = if table.schema.geometry_name() == Some(name.as_str()) {
            ColumnKind::Geometry
        } else {
            ColumnKind::Attribute(table.schema.field(&name)?.field_type)
        };
        Some(ResolvedColumn {
            reference: format!("{}/{name}", table.layer.name),
            kind,
        })
    }
}

#[derive(Debug, Clone)]
enum Projection {
    Field { qualified: String },
    Geometry { qualified: String },
    /// Evaluated on the composite record after fetching.
    Cast { expr: Expr },
}

#[derive(Debug, Clone)]
struct OutputColumn {
    name: String,
    projection: Projection,
}

fn cast_field_type(target: CastType) -> FieldType {
    match target {
        CastType::Integer => FieldType::Int32,
        CastType::BigInt => FieldType::Int64,
        CastType::Real => FieldType::Float64,
        CastType::String => FieldType::String,
    }
}

/// Result set of a `SELECT ... FROM a JOIN b ON a.x = b.y` statement.
pub struct JoinLayer {
    ctx: Arc<DatasourceContext>,
    name: String,
    tables: Vec<JoinTable>,
    outputs: Vec<OutputColumn>,
    schema: Arc<LayerSchema>,
    params: GetFeatureParams,
    distinct: bool,
    paging: PagingController,
    mode_chosen: bool,
    cursor: Option<(Box<dyn ResponseDecoder>, u64)>,
    seen: HashSet<String>,
    next_fid: i64,
    stopped: bool,
}

impl JoinLayer {
    /// Validates `statement` and prepares the join request. `layers` holds the capability of
    /// each table, FROM table first.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::JoinsNotSupported`], [`QueryError::UnsupportedJoinClause`],
    /// [`QueryError::UnsupportedWhereClause`] and
    /// [`QueryError::UnsupportedColumnExpression`].
    pub(crate) fn new(
        ctx: Arc<DatasourceContext>,
        statement: &SelectStatement,
        layers: Vec<LayerCapability>,
    ) -> Result<Self> {
        let capabilities = Arc::clone(&ctx.capabilities);
        if !capabilities.joins_supported {
            return Err(QueryError::JoinsNotSupported.into());
        }

        let table_refs = std::iter::once(&statement.from).chain(statement.joins.iter().map(|join| &join.table));
        let mut tables = Vec::new();
        for (table, layer) in table_refs.zip(layers) {
            let srs = layer.default_srs.as_deref().map(Srs::parse);
            let schema = ctx.resolve_schema(&layer, srs.as_ref())?;
            tables.push(JoinTable {
                table: table.clone(),
                layer,
                schema,
            });
        }

        let columns = JoinColumns { tables: &tables };
        let default_srs = tables
            .first()
            .and_then(|table| table.layer.default_srs.as_deref())
            .map(Srs::parse);
        let translate_ctx = TranslateContext {
            version: capabilities.version,
            capabilities: &capabilities.filter,
            columns: &columns,
            default_srs: default_srs.as_ref(),
        };

        let mut condition: Option<Expr> = None;
        for join in &statement.joins {
            let on = join
                .on
                .as_ref()
                .filter(|on| is_key_equality(on, &columns))
                .ok_or(QueryError::UnsupportedJoinClause)?;
            translate(on, &translate_ctx).map_err(|err| {
                debug!("join condition not translatable: {err}");
                QueryError::UnsupportedJoinClause
            })?;
            condition = Some(match condition {
                Some(previous) => Expr::and(previous, on.clone()),
                None => on.clone(),
            });
        }
        let condition = condition.ok_or(QueryError::UnsupportedJoinClause)?;
        let condition = match &statement.selection {
            Some(selection) => Expr::and(condition, selection.clone()),
            None => condition,
        };
        let body = translate(&condition, &translate_ctx).map_err(|err| {
            debug!("join WHERE clause not translatable: {err}");
            QueryError::UnsupportedWhereClause
        })?;

        let namespaces = namespace_bindings(&tables, &capabilities.namespaces);
        let dialect = capabilities.version.filter_dialect();
        let mut params = GetFeatureParams::join(
            tables.iter().map(|table| table.layer.name.clone()).collect(),
        );
        params.filter = Some(filter_document(dialect, &body, &namespaces));
        params.sort_by = statement
            .order_by
            .iter()
            .filter_map(|item| match columns.locate(&item.column) {
                Some((idx, name)) if tables[idx].schema.field(&name).is_some() => {
                    Some(SortKey::new(name, item.ascending))
                },
                _ => {
                    warn!("ORDER BY {} ignored: not a field of a joined layer", item.column);
                    None
                },
            })
            .collect();

        let outputs = output_columns(&statement.projection, &tables, &columns)?;
        let schema = Arc::new(output_schema(&outputs, &tables));
        let name = tables
            .iter()
            .map(|table| table.reference().to_string())
            .collect::<Vec<_>>()
            .join("_");
        let max_features = ctx.options.max_features;
        debug!("join {name} over {} layers", tables.len());

        Ok(Self {
            ctx,
            name,
            tables,
            outputs,
            schema,
            params,
            distinct: statement.distinct,
            paging: PagingController::new(PagingMode::Single { count: None }, max_features),
            mode_chosen: false,
            cursor: None,
            seen: HashSet::new(),
            next_fid: 0,
            stopped: false,
        })
    }

    fn page_size(&self) -> Option<u64> {
        paging::page_size(&self.ctx.capabilities, &self.ctx.options)
    }

    fn open_page(&mut self) -> Result<bool> {
        if !self.mode_chosen {
            let mode = PagingMode::select(self.page_size(), true, None, self.ctx.options.max_features);
            self.paging.reset(mode);
            self.mode_chosen = true;
        }
        let Some(window) = self.paging.next_window() else {
            return Ok(false);
        };
        let mut params = self.params.clone();
        params.start_index = window.start_index;
        params.count = window.count;
        let url = get_feature_url(&self.ctx.base_url, self.ctx.capabilities.version, &params);
        let response = self.ctx.get(&url)?;
        let srs = self
            .tables
            .first()
            .and_then(|table| table.layer.default_srs.as_deref())
            .map(Srs::parse);
        let options = self.ctx.decode_options(&self.name, srs.as_ref());
        let decoder = open_decoder(&response, &options).with_url_context(&url)?;
        self.cursor = Some((decoder, 0));
        Ok(true)
    }

    /// Flattens the members of a tuple into `ref.field` values.
    fn composite(&self, members: &[DecodedFeature]) -> Feature {
        let mut feature = Feature::new();
        for table in &self.tables {
            let local = table.layer.local_name();
            let Some(member) = members
                .iter()
                .find(|member| local_name(&member.type_name) == local)
            else {
                continue;
            };
            for field in &table.schema.fields {
                let value = if field.name == GML_ID {
                    member
                        .id
                        .clone()
                        .map_or(FieldValue::Null, FieldValue::String)
                } else {
                    member
                        .property(&field.name)
                        .map_or(FieldValue::Null, |raw| FieldValue::from_raw(raw, field.field_type))
                };
                feature.fields.push((table.qualified(&field.name), value));
            }
            if let Some(geometry_name) = table.schema.geometry_name() {
                let geometry = member
                    .geometry_named(geometry_name)
                    .or_else(|| member.geometries.first().map(|(_, g)| g));
                if let Some(geometry) = geometry {
                    feature
                        .geometries
                        .push((table.qualified(geometry_name), geometry.clone()));
                }
            }
        }
        feature
    }

    fn project(&self, composite: &Feature) -> Result<Feature> {
        let mut feature = Feature::new();
        for output in &self.outputs {
            match &output.projection {
                Projection::Field { qualified } => {
                    let value = composite.field(qualified).cloned().unwrap_or(FieldValue::Null);
                    feature.fields.push((output.name.clone(), value));
                },
                Projection::Geometry { qualified } => {
                    if let Some(geometry) = composite.geometry_named(qualified) {
                        feature.geometries.push((output.name.clone(), geometry.clone()));
                    }
                },
                Projection::Cast { expr } => {
                    let value = evaluate_value(expr, composite)?.into_field_value();
                    feature.fields.push((output.name.clone(), value));
                },
            }
        }
        Ok(feature)
    }

    fn distinct_key(feature: &Feature) -> String {
        let mut key = String::new();
        for (_, value) in &feature.fields {
            // Debug keeps NULL apart from the empty string
            let _ = write!(key, "{value:?}\u{1f}");
        }
        for (_, geometry) in &feature.geometries {
            let _ = write!(key, "{}\u{1f}", to_wkt(geometry));
        }
        key
    }

    fn pull(&mut self) -> Result<Option<Feature>> {
        loop {
            if self.cursor.is_none() && !self.open_page()? {
                return Ok(None);
            }
            let Some((decoder, returned)) = self.cursor.as_mut() else {
                return Ok(None);
            };
            let Some(record) = decoder.next_record()? else {
                let (returned, counts) = (*returned, decoder.counts());
                self.cursor = None;
                self.paging.page_done(returned, counts);
                continue;
            };
            *returned += 1;
            let members = match record {
                DecodedRecord::Tuple(members) => members,
                DecodedRecord::Feature(feature) => vec![feature],
            };
            let composite = self.composite(&members);
            let mut feature = self.project(&composite)?;
            if self.distinct && !self.seen.insert(Self::distinct_key(&feature)) {
                continue;
            }
            self.next_fid += 1;
            feature.fid = Some(self.next_fid);
            return Ok(Some(feature));
        }
    }

    fn hits(&self) -> Result<u64> {
        let mut params = self.params.clone();
        params.hits = true;
        let url = get_feature_url(&self.ctx.base_url, self.ctx.capabilities.version, &params);
        let response = self.ctx.get(&url)?;
        parse_hits(&response.body).with_url_context(&url)
    }

    fn count_by_iteration(&mut self) -> Result<u64> {
        self.reset_reading();
        let mut count = 0;
        let result = loop {
            match self.next_feature() {
                Ok(Some(_)) => count += 1,
                Ok(None) => break Ok(count),
                Err(err) => break Err(err),
            }
        };
        self.reset_reading();
        result
    }
}

fn is_key_equality(on: &Expr, columns: &JoinColumns<'_>) -> bool {
    let Expr::Compare {
        op: CompareOp::Eq,
        left,
        right,
    } = on
    else {
        return false;
    };
    let (Expr::Column(left), Expr::Column(right)) = (left.as_ref(), right.as_ref()) else {
        return false;
    };
    match (columns.locate(left), columns.locate(right)) {
        (Some((left_table, _)), Some((right_table, _))) => left_table != right_table,
        _ => false,
    }
}

fn namespace_bindings(
    tables: &[JoinTable],
    declared: &std::collections::BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut bindings: Vec<(String, String)> = Vec::new();
    for table in tables {
        let Some(prefix) = table.layer.prefix() else {
            continue;
        };
        if bindings.iter().any(|(bound, _)| bound == prefix) {
            continue;
        }
        let uri = table
            .layer
            .namespace_uri
            .clone()
            .or_else(|| declared.get(prefix).cloned());
        if let Some(uri) = uri {
            bindings.push((prefix.to_string(), uri));
        }
    }
    bindings
}

fn table_columns(table: &JoinTable, out: &mut Vec<OutputColumn>) {
    for field in &table.schema.fields {
        let qualified = table.qualified(&field.name);
        out.push(OutputColumn {
            name: qualified.clone(),
            projection: Projection::Field { qualified },
        });
    }
    if let Some(geometry) = table.schema.geometry_name() {
        let qualified = table.qualified(geometry);
        out.push(OutputColumn {
            name: qualified.clone(),
            projection: Projection::Geometry { qualified },
        });
    }
}

fn output_columns(
    projection: &[SelectItem],
    tables: &[JoinTable],
    columns: &JoinColumns<'_>,
) -> Result<Vec<OutputColumn>> {
    let mut outputs = Vec::new();
    for item in projection {
        match item {
            SelectItem::Wildcard => tables.iter().for_each(|table| table_columns(table, &mut outputs)),
            SelectItem::QualifiedWildcard(qualifier) => {
                let table = tables
                    .iter()
                    .find(|table| table.table.matches(qualifier))
                    .ok_or(QueryError::UnsupportedColumnExpression)?;
                table_columns(table, &mut outputs);
            },
            SelectItem::Expr {
                expr: Expr::Column(column),
                alias,
            } => {
                let (idx, name) = columns
                    .locate(column)
                    .ok_or(QueryError::UnsupportedColumnExpression)?;
                let table = &tables[idx];
                let qualified = table.qualified(&name);
                let projection = if table.schema.geometry_name() == Some(name.as_str()) {
                    Projection::Geometry {
                        qualified: qualified.clone(),
                    }
                } else {
                    Projection::Field {
                        qualified: qualified.clone(),
                    }
                };
                outputs.push(OutputColumn {
                    name: alias.clone().unwrap_or(qualified),
                    projection,
                });
            },
            SelectItem::Expr {
                expr: expr @ Expr::Cast { expr: inner, .. },
                alias,
            } => {
                let Expr::Column(column) = inner.as_ref() else {
                    return Err(QueryError::UnsupportedColumnExpression.into());
                };
                let (idx, name) = columns
                    .locate(column)
                    .ok_or(QueryError::UnsupportedColumnExpression)?;
                outputs.push(OutputColumn {
                    name: alias.clone().unwrap_or_else(|| tables[idx].qualified(&name)),
                    projection: Projection::Cast { expr: expr.clone() },
                });
            },
            SelectItem::Expr { .. } => return Err(QueryError::UnsupportedColumnExpression.into()),
        }
    }
    Ok(outputs)
}

fn output_schema(outputs: &[OutputColumn], tables: &[JoinTable]) -> LayerSchema {
    let field_type = |qualified: &str| {
        tables
            .iter()
            .find_map(|table| {
                let name = qualified.strip_prefix(table.reference())?.strip_prefix('.')?;
                table.schema.field(name).map(|field| field.field_type)
            })
            .unwrap_or(FieldType::String)
    };
    let mut fields = Vec::new();
    let mut geometry = None;
    for output in outputs {
        match &output.projection {
            Projection::Field { qualified } => {
                fields.push(FieldDescriptor::new(output.name.clone(), field_type(qualified)));
            },
            Projection::Cast { expr } => {
                let target = match expr {
                    Expr::Cast { target, .. } => *target,
                    _ => CastType::String,
                };
                fields.push(FieldDescriptor::new(output.name.clone(), cast_field_type(target)));
            },
            Projection::Geometry { qualified } => {
                if geometry.is_none() {
                    let geometry_type = tables
                        .iter()
                        .filter_map(|table| table.schema.geometry.as_ref().map(|g| (table, g)))
                        .find(|(table, g)| table.qualified(&g.name) == *qualified)
                        .map_or(GeometryType::Unknown, |(_, g)| g.geometry_type);
                    geometry = Some(GeometryFieldDescriptor {
                        name: output.name.clone(),
                        geometry_type,
                    });
                }
            },
        }
    }
    LayerSchema::new(fields, geometry, SchemaOptions { expose_gml_id: false })
}

impl FeatureSource for JoinLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&mut self) -> Arc<LayerSchema> {
        Arc::clone(&self.schema)
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        if self.stopped {
            return Ok(None);
        }
        match self.pull() {
            Ok(Some(feature)) => Ok(Some(feature)),
            Ok(None) => {
                self.stopped = true;
                Ok(None)
            },
            Err(err) => {
                self.cursor = None;
                self.stopped = true;
                Err(err)
            },
        }
    }

    fn reset_reading(&mut self) {
        self.cursor = None;
        self.mode_chosen = false;
        self.seen.clear();
        self.next_fid = 0;
        self.stopped = false;
    }

    /// Counted by the server unless DISTINCT applies. A failing hits request falls back to
    /// reading the whole result. The count is never cached.
    fn feature_count(&mut self) -> Result<u64> {
        if !self.distinct {
            match self.hits() {
                Ok(count) => return Ok(count),
                Err(err) => warn!("hits request for join {} failed: {err}", self.name),
            }
        }
        self.count_by_iteration()
    }
}
