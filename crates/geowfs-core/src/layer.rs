//! Layers: cursors over `GetFeature` results and the WFS-T entry points.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::capabilities::LayerCapability;
use crate::context::DatasourceContext;
use crate::decoder::{ResponseDecoder, open_decoder, parse_hits};
use crate::error::{QueryError, ResponseContextExt, Result, TransactionError};
use crate::feature::Feature;
use crate::filter::{
    Expr, LayerColumns, TranslateContext, bbox_filter, evaluate, filter_document,
    identity_element, parse_predicate, translate,
};
use crate::geometry::{Extent, envelope};
use crate::paging::{self, PagingController, PagingMode};
use crate::request::{GetFeatureParams, SortKey, describe_url, get_feature_url};
use crate::schema::LayerSchema;
use crate::srs::{Srs, to_web_mercator};
use crate::transaction::{TransactionEngine, TransactionState, TransactionTarget, delete_by_id_filter};

/// Pseudo field name standing for the geometry in ignored-field lists.
pub const GEOMETRY_FIELD_TOKEN: &str = "OGR_GEOMETRY";

/// A readable sequence of features with a fixed schema.
pub trait FeatureSource {
    fn name(&self) -> &str;

    /// Layer definition, described on first use.
    fn schema(&mut self) -> Arc<LayerSchema>;

    /// Pulls the next feature, or `None` once the sequence is exhausted.
    ///
    /// # Errors
    ///
    /// Returns transport and response errors. The source stays usable after
    /// [`FeatureSource::reset_reading`].
    fn next_feature(&mut self) -> Result<Option<Feature>>;

    /// Rewinds to the first feature.
    fn reset_reading(&mut self);

    /// Number of features the sequence yields.
    ///
    /// # Errors
    ///
    /// Returns the errors of the requests needed to count.
    fn feature_count(&mut self) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct AttributeFilter {
    expr: Expr,
    /// Translated body, `None` when the predicate is evaluated on decoded features.
    server_body: Option<String>,
}

struct Cursor {
    decoder: Box<dyn ResponseDecoder>,
    page_returned: u64,
}

/// One feature type of a WFS endpoint.
pub struct WfsLayer {
    ctx: Arc<DatasourceContext>,
    capability: LayerCapability,
    schema: Option<Arc<LayerSchema>>,
    attribute_filter: Option<AttributeFilter>,
    spatial_filter: Option<Extent>,
    ignored_fields: Vec<String>,
    ignore_geometry: bool,
    order_by: Vec<SortKey>,
    active_srs: Option<Srs>,
    cursor: Option<Cursor>,
    paging: PagingController,
    mode_chosen: bool,
    stopped: bool,
    next_fid: i64,
    yielded: u64,
    transactions: TransactionEngine,
    cached_extent: Option<Extent>,
}

impl WfsLayer {
    pub(crate) fn new(ctx: Arc<DatasourceContext>, capability: LayerCapability) -> Self {
        let max_features = ctx.options.max_features;
        Self {
            ctx,
            capability,
            schema: None,
            attribute_filter: None,
            spatial_filter: None,
            ignored_fields: Vec::new(),
            ignore_geometry: false,
            order_by: Vec::new(),
            active_srs: None,
            cursor: None,
            paging: PagingController::new(PagingMode::Single { count: None }, max_features),
            mode_chosen: false,
            stopped: false,
            next_fid: 0,
            yielded: 0,
            transactions: TransactionEngine::new(),
            cached_extent: None,
        }
    }

    #[must_use]
    pub fn capability(&self) -> &LayerCapability {
        &self.capability
    }

    /// `TITLE`, `ABSTRACT` and `KEYWORD_n` items of the layer.
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.capability.metadata()
    }

    /// Default SRS followed by the other advertised ones.
    #[must_use]
    pub fn supported_srs(&self) -> Vec<String> {
        self.capability
            .default_srs
            .iter()
            .chain(&self.capability.other_srs)
            .cloned()
            .collect()
    }

    /// SRS requested for features: the active one, else the layer default.
    #[must_use]
    pub fn srs(&self) -> Option<Srs> {
        self.active_srs
            .clone()
            .or_else(|| self.capability.default_srs.as_deref().map(Srs::parse))
    }

    /// Requests features in `srs`, one of [`WfsLayer::supported_srs`].
    ///
    /// Names are compared verbatim, then by EPSG code, so `EPSG:4258` selects an advertised
    /// `urn:ogc:def:crs:EPSG::4258`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnsupportedSrs`] for an SRS the layer does not advertise.
    pub fn set_active_srs(&mut self, srs: &str) -> Result<()> {
        let wanted = Srs::parse(srs);
        let supported = self.supported_srs();
        let matched = supported
            .iter()
            .find(|name| name.as_str() == srs)
            .or_else(|| {
                supported
                    .iter()
                    .find(|name| wanted.epsg.is_some() && Srs::parse(name).epsg == wanted.epsg)
            })
            .ok_or_else(|| QueryError::UnsupportedSrs {
                srs: srs.to_string(),
                layer: self.capability.name.clone(),
            })?;
        self.active_srs = Some(Srs::parse(matched));
        self.cached_extent = None;
        self.invalidate();
        Ok(())
    }

    /// `SRSNAME` to send: only when it differs from the layer default.
    fn srs_param(&self) -> Option<String> {
        self.active_srs
            .as_ref()
            .filter(|srs| Some(srs.name.as_str()) != self.capability.default_srs.as_deref())
            .map(|srs| srs.name.clone())
    }

    /// Restricts the features to those matching a SQL predicate. `None` or blank clears it.
    ///
    /// Predicates the server cannot evaluate are checked on decoded features instead.
    ///
    /// # Errors
    ///
    /// Returns parse errors and spatial function argument errors.
    pub fn set_attribute_filter(&mut self, predicate: Option<&str>) -> Result<()> {
        self.invalidate();
        let Some(text) = predicate.map(str::trim).filter(|text| !text.is_empty()) else {
            self.attribute_filter = None;
            return Ok(());
        };
        let expr = parse_predicate(text)?;
        self.apply_attribute_expr(expr)
    }

    /// Installs an already parsed predicate as the attribute filter.
    pub(crate) fn apply_attribute_expr(&mut self, expr: Expr) -> Result<()> {
        self.invalidate();
        let server_body = match self.translate_expr(&expr) {
            Ok(body) => Some(body),
            Err(err) => {
                if !err.is_filter_fallback() {
                    return Err(err);
                }
                warn!("{err}; filter '{expr}' evaluated client-side");
                None
            },
        };
        self.attribute_filter = Some(AttributeFilter { expr, server_body });
        Ok(())
    }

    fn translate_expr(&mut self, expr: &Expr) -> Result<String> {
        let schema = self.schema();
        let srs = self.srs();
        let columns = LayerColumns::new(&schema);
        let translate_ctx = TranslateContext {
            version: self.ctx.capabilities.version,
            capabilities: &self.ctx.capabilities.filter,
            columns: &columns,
            default_srs: srs.as_ref(),
        };
        Ok(translate(expr, &translate_ctx)?)
    }

    /// Whether the active attribute filter is evaluated client-side.
    #[must_use]
    pub fn filters_client_side(&self) -> bool {
        self.attribute_filter
            .as_ref()
            .is_some_and(|filter| filter.server_body.is_none())
    }

    /// Restricts the features to those whose envelope meets `extent`.
    pub fn set_spatial_filter(&mut self, extent: Option<Extent>) {
        self.invalidate();
        if extent.is_some() && self.schema().geometry.is_none() {
            debug!("layer {} has no geometry, spatial filter ignored", self.capability.name);
            self.spatial_filter = None;
            return;
        }
        self.spatial_filter = extent;
    }

    /// Fields left out of requests. [`GEOMETRY_FIELD_TOKEN`] stands for the geometry.
    pub fn set_ignored_fields(&mut self, fields: &[&str]) {
        self.invalidate();
        self.ignore_geometry = fields.contains(&GEOMETRY_FIELD_TOKEN);
        self.ignored_fields = fields
            .iter()
            .filter(|field| **field != GEOMETRY_FIELD_TOKEN)
            .map(|field| (*field).to_string())
            .collect();
    }

    pub fn set_ignore_geometry(&mut self, ignore: bool) {
        self.invalidate();
        self.ignore_geometry = ignore;
    }

    /// Server-side ordering of the features.
    pub fn set_order_by(&mut self, keys: Vec<SortKey>) {
        self.invalidate();
        self.order_by = keys;
    }

    /// Drops the cursor and anything derived from the current query.
    fn invalidate(&mut self) {
        self.cursor = None;
        self.paging.invalidate_count();
        self.cached_extent = None;
        self.rewind();
    }

    fn rewind(&mut self) {
        self.cursor = None;
        self.mode_chosen = false;
        self.stopped = false;
        self.next_fid = 0;
        self.yielded = 0;
    }

    fn namespace_bindings(&self) -> Vec<(String, String)> {
        match (self.capability.prefix(), &self.capability.namespace_uri) {
            (Some(prefix), Some(uri)) => vec![(prefix.to_string(), uri.clone())],
            _ => Vec::new(),
        }
    }

    /// Complete `FILTER` document combining the attribute and spatial filters.
    fn server_filter(&self, schema: &LayerSchema) -> Option<String> {
        let dialect = self.ctx.capabilities.version.filter_dialect();
        let attribute = self
            .attribute_filter
            .as_ref()
            .and_then(|filter| filter.server_body.clone());
        let srs = self.srs();
        let spatial = self.spatial_filter.as_ref().and_then(|extent| {
            schema
                .geometry_name()
                .map(|geometry| bbox_filter(dialect, geometry, extent, srs.as_ref()))
        });
        let body = match (attribute, spatial) {
            (Some(attribute), Some(spatial)) => format!("<And>{attribute}{spatial}</And>"),
            (Some(body), None) | (None, Some(body)) => body,
            (None, None) => return None,
        };
        Some(filter_document(dialect, &body, &self.namespace_bindings()))
    }

    fn property_names(&self, schema: &LayerSchema) -> Vec<String> {
        if self.ignored_fields.is_empty() && !self.ignore_geometry {
            return Vec::new();
        }
        let mut names: Vec<String> = schema
            .declared_fields()
            .filter(|field| !self.ignored_fields.contains(&field.name))
            .map(|field| field.name.clone())
            .collect();
        if !self.ignore_geometry {
            names.extend(schema.geometry_name().map(str::to_string));
        }
        names
    }

    fn query_params(&self, schema: &LayerSchema) -> GetFeatureParams {
        let mut params = GetFeatureParams::new(self.capability.name.clone());
        params.filter = self.server_filter(schema);
        params.property_names = self.property_names(schema);
        params.sort_by.clone_from(&self.order_by);
        params.srs_name = self.srs_param();
        params
    }

    fn page_size(&self) -> Option<u64> {
        paging::page_size(&self.ctx.capabilities, &self.ctx.options)
    }

    /// Issues the request of the next page. Returns `false` once there is none.
    fn open_page(&mut self, schema: &LayerSchema) -> Result<bool> {
        if !self.mode_chosen {
            let mode = PagingMode::select(
                self.page_size(),
                schema.has_primary_key,
                self.paging.number_matched(),
                self.ctx.options.max_features,
            );
            debug!("layer {} paging mode {mode:?}", self.capability.name);
            self.paging.reset(mode);
            self.mode_chosen = true;
        }
        let Some(window) = self.paging.next_window() else {
            return Ok(false);
        };
        let mut params = self.query_params(schema);
        params.start_index = window.start_index;
        params.count = window.count;
        let url = get_feature_url(&self.ctx.base_url, self.ctx.capabilities.version, &params);
        let response = self.ctx.get(&url)?;
        let srs = self.srs();
        let options = self.ctx.decode_options(&self.capability.name, srs.as_ref());
        let decoder = open_decoder(&response, &options).with_url_context(&url)?;
        self.cursor = Some(Cursor {
            decoder,
            page_returned: 0,
        });
        Ok(true)
    }

    fn matches(&self, feature: &Feature) -> Result<bool> {
        if let (Some(extent), Some(geometry)) = (&self.spatial_filter, feature.geometry()) {
            if !envelope(geometry).is_some_and(|bounds| bounds.intersects(extent)) {
                return Ok(false);
            }
        }
        match &self.attribute_filter {
            Some(AttributeFilter {
                expr,
                server_body: None,
            }) => Ok(evaluate(expr, feature)?),
            _ => Ok(true),
        }
    }

    fn pull(&mut self, schema: &LayerSchema) -> Result<Option<Feature>> {
        loop {
            if self.cursor.is_none() && !self.open_page(schema)? {
                return Ok(None);
            }
            let Some(cursor) = self.cursor.as_mut() else {
                return Ok(None);
            };
            let Some(record) = cursor.decoder.next_record()? else {
                let returned = cursor.page_returned;
                let counts = cursor.decoder.counts();
                self.cursor = None;
                self.paging.page_done(returned, counts);
                continue;
            };
            cursor.page_returned += 1;
            let Some(decoded) = record.into_feature() else {
                continue;
            };

            let mut feature = Feature::from_decoded(&decoded, schema);
            self.next_fid += 1;
            if feature.fid.is_none() {
                feature.fid = Some(self.next_fid);
            }
            if self.ignore_geometry {
                feature.geometries.clear();
            }
            if self.matches(&feature)? {
                return Ok(Some(feature));
            }
        }
    }

    /// Server-side count through a `RESULTTYPE=hits` request.
    fn hits(&self, schema: &LayerSchema) -> Result<u64> {
        let mut params = GetFeatureParams::new(self.capability.name.clone());
        params.filter = self.server_filter(schema);
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

    /// Extent of the layer in its requested SRS.
    ///
    /// The advertised WGS84 box is used when it is trusted, or covers the whole world, and
    /// the SRS is geographic or Web Mercator. Otherwise every feature is read.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NoExtent`] when no feature has a geometry, and the errors of
    /// the iteration.
    pub fn extent(&mut self) -> Result<Extent> {
        if let Some(extent) = self.cached_extent {
            return Ok(extent);
        }
        let extent = match self.capabilities_extent() {
            Some(extent) => extent,
            None => self.extent_by_iteration()?,
        };
        self.cached_extent = Some(extent);
        Ok(extent)
    }

    fn capabilities_extent(&self) -> Option<Extent> {
        let bbox = self.capability.wgs84_bbox?;
        if !self.ctx.options.trust_capabilities_bounds && !bbox.is_whole_world() {
            return None;
        }
        let srs = self.srs()?;
        if srs.is_geographic() {
            Some(bbox)
        } else if srs.is_web_mercator() {
            let (min_x, min_y) = to_web_mercator(bbox.min_x, bbox.min_y);
            let (max_x, max_y) = to_web_mercator(bbox.max_x, bbox.max_y);
            Some(Extent::new(min_x, min_y, max_x, max_y))
        } else {
            None
        }
    }

    fn extent_by_iteration(&mut self) -> Result<Extent> {
        self.reset_reading();
        let mut extent: Option<Extent> = None;
        let result = loop {
            match self.next_feature() {
                Ok(Some(feature)) => {
                    if let Some(bounds) = feature.geometry().and_then(envelope) {
                        match extent.as_mut() {
                            Some(extent) => extent.merge(&bounds),
                            None => extent = Some(bounds),
                        }
                    }
                },
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.reset_reading();
        result?;
        extent.ok_or_else(|| {
            QueryError::NoExtent {
                layer: self.capability.name.clone(),
            }
            .into()
        })
    }

    /// Fetches the feature whose server identifier is `<layer>.<fid>`.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::FeatureNotFound`] when the server returns no feature.
    pub fn get_feature(&mut self, fid: i64) -> Result<Feature> {
        let schema = self.schema();
        let dialect = self.ctx.capabilities.version.filter_dialect();
        let id = format!("{}.{fid}", self.capability.local_name());
        let mut params = GetFeatureParams::new(self.capability.name.clone());
        params.filter = Some(filter_document(
            dialect,
            &identity_element(dialect, &id),
            &self.namespace_bindings(),
        ));
        params.srs_name = self.srs_param();
        let url = get_feature_url(&self.ctx.base_url, self.ctx.capabilities.version, &params);
        let response = self.ctx.get(&url)?;
        let srs = self.srs();
        let options = self.ctx.decode_options(&self.capability.name, srs.as_ref());
        let mut decoder = open_decoder(&response, &options).with_url_context(&url)?;

        let decoded = decoder
            .next_record()?
            .and_then(|record| record.into_feature())
            .ok_or(TransactionError::FeatureNotFound { fid })?;
        let mut feature = Feature::from_decoded(&decoded, &schema);
        feature.fid.get_or_insert(fid);
        Ok(feature)
    }

    fn check_updatable(&self) -> Result<()> {
        if self.ctx.options.update && self.ctx.capabilities.transactions_supported() {
            Ok(())
        } else {
            Err(TransactionError::NotUpdatable {
                layer: self.capability.name.clone(),
            }
            .into())
        }
    }

    /// Runs `f` against the transaction target of this layer.
    fn with_target<T>(
        &mut self,
        f: impl FnOnce(
            &mut TransactionEngine,
            &TransactionTarget<'_>,
            &dyn geowfs_core_common::Fetcher,
        ) -> Result<T>,
    ) -> Result<T> {
        self.check_updatable()?;
        let schema = self.schema();
        let version = self.ctx.capabilities.version;
        let describe = describe_url(
            &self.ctx.base_url,
            version,
            std::slice::from_ref(&self.capability.name),
        );
        let namespace = schema
            .target_namespace
            .clone()
            .or_else(|| self.capability.namespace_uri.clone())
            .unwrap_or_default();
        let lat_long_order = self
            .capability
            .default_srs
            .as_deref()
            .is_some_and(|srs| Srs::parse(srs).has_lat_long_order());
        let target = TransactionTarget {
            version,
            layer_name: &self.capability.name,
            namespace_uri: &namespace,
            describe_url: &describe,
            endpoint: self.ctx.capabilities.transaction_url(),
            schema: &schema,
            srs_name: self.capability.default_srs.as_deref(),
            lat_long_order,
        };
        let result = f(&mut self.transactions, &target, self.ctx.fetcher.as_ref());
        if result.is_ok() {
            self.paging.invalidate_count();
            self.cached_extent = None;
        }
        result
    }

    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        self.transactions.state()
    }

    /// Server identifiers of the features inserted by the last insert or commit.
    #[must_use]
    pub fn last_inserted_ids(&self) -> &[String] {
        self.transactions.last_inserted_ids()
    }

    /// # Errors
    ///
    /// Returns [`TransactionError::NotUpdatable`] and
    /// [`TransactionError::AlreadyInTransaction`].
    pub fn start_transaction(&mut self) -> Result<()> {
        self.check_updatable()?;
        self.transactions.start()
    }

    /// Sends the queued operations as one `Transaction` request.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NoActiveTransaction`] and the reconciliation errors.
    pub fn commit_transaction(&mut self) -> Result<()> {
        if self.transactions.state() == TransactionState::Ready {
            return Err(TransactionError::NoActiveTransaction.into());
        }
        self.with_target(|engine, target, fetcher| engine.commit(target, fetcher))?;
        info!("layer {} committed", self.capability.name);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`TransactionError::NoActiveTransaction`] outside a transaction.
    pub fn rollback_transaction(&mut self) -> Result<()> {
        self.transactions.rollback()
    }

    /// Inserts `feature`, or queues it inside a transaction. An immediate insert fills in
    /// the identifier assigned by the server.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::IdentityAlreadySet`] and the server-side failures.
    pub fn create_feature(&mut self, feature: &mut Feature) -> Result<()> {
        self.with_target(|engine, target, fetcher| engine.insert(target, fetcher, feature))
    }

    /// Replaces the feature identified by its `gml_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::IdentityRequired`] and the server-side failures.
    pub fn set_feature(&mut self, feature: &Feature) -> Result<()> {
        self.with_target(|engine, target, fetcher| engine.update(target, fetcher, feature))
    }

    /// Deletes the feature `<layer>.<fid>`, looked up first to learn its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::FeatureNotFound`] and the server-side failures.
    pub fn delete_feature(&mut self, fid: i64) -> Result<()> {
        self.check_updatable()?;
        let feature = self.get_feature(fid)?;
        let gml_id = feature
            .gml_id()
            .map_or_else(|| format!("{}.{fid}", self.capability.local_name()), str::to_string);
        let version = self.ctx.capabilities.version;
        self.with_target(|engine, target, fetcher| {
            engine.delete(target, fetcher, delete_by_id_filter(version, &gml_id))
        })
    }

    /// Deletes every feature matched by a translated filter body.
    pub(crate) fn delete_matching(&mut self, filter_body: String) -> Result<()> {
        self.with_target(|engine, target, fetcher| engine.delete(target, fetcher, filter_body))
    }

    /// Translates a SQL predicate for a server-side delete.
    pub(crate) fn translate_predicate(&mut self, text: &str) -> Result<String> {
        let expr = parse_predicate(text)?;
        self.translate_expr(&expr)
    }
}

impl FeatureSource for WfsLayer {
    fn name(&self) -> &str {
        &self.capability.name
    }

    fn schema(&mut self) -> Arc<LayerSchema> {
        if let Some(schema) = &self.schema {
            return Arc::clone(schema);
        }
        let srs = self.srs();
        match self.ctx.resolve_schema(&self.capability, srs.as_ref()) {
            Ok(schema) => {
                self.schema = Some(Arc::clone(&schema));
                schema
            },
            Err(err) => {
                // not remembered: the next call describes again
                warn!("cannot get the definition of layer {}: {err}", self.capability.name);
                Arc::new(LayerSchema {
                    inferred: true,
                    ..LayerSchema::default()
                })
            },
        }
    }

    /// Reading is allowed inside a transaction. Queued operations reach the server only on
    /// commit, so pending inserts and deletes are not visible here.
    fn next_feature(&mut self) -> Result<Option<Feature>> {
        if self.stopped {
            return Ok(None);
        }
        if self
            .ctx
            .options
            .max_features
            .is_some_and(|max| self.yielded >= max)
        {
            return Ok(None);
        }
        let schema = self.schema();
        match self.pull(&schema) {
            Ok(Some(feature)) => {
                self.yielded += 1;
                Ok(Some(feature))
            },
            Ok(None) => {
                self.stopped = true;
                let unfiltered = self.attribute_filter.is_none() && self.spatial_filter.is_none();
                if unfiltered && self.ctx.options.max_features.is_none() {
                    self.paging.set_number_matched(self.yielded);
                }
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
        self.rewind();
    }

    fn feature_count(&mut self) -> Result<u64> {
        let version = self.ctx.capabilities.version;
        let count = if self.filters_client_side() {
            self.count_by_iteration()?
        } else if let Some(known) = self.paging.number_matched() {
            known
        } else if self.ctx.capabilities.hits_supported || version.is_2_0() {
            let schema = self.schema();
            let count = self.hits(&schema)?;
            self.paging.set_number_matched(count);
            count
        } else {
            self.count_by_iteration()?
        };
        Ok(self
            .ctx
            .options
            .max_features
            .map_or(count, |max| max.min(count)))
    }
}

/// A fixed, in-memory result set.
#[derive(Debug, Clone)]
pub struct MemoryLayer {
    name: String,
    schema: Arc<LayerSchema>,
    features: Vec<Feature>,
    position: usize,
}

impl MemoryLayer {
    #[must_use]
    pub fn new(name: impl Into<String>, schema: LayerSchema, features: Vec<Feature>) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            features,
            position: 0,
        }
    }
}

impl FeatureSource for MemoryLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&mut self) -> Arc<LayerSchema> {
        Arc::clone(&self.schema)
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        let feature = self.features.get(self.position).cloned();
        if feature.is_some() {
            self.position += 1;
        }
        Ok(feature)
    }

    fn reset_reading(&mut self) {
        self.position = 0;
    }

    fn feature_count(&mut self) -> Result<u64> {
        Ok(self.features.len() as u64)
    }
}
