//! State shared by a datasource and all of its layers.

use std::sync::{Arc, Mutex, PoisonError};

use geowfs_core_common::{FetchRequest, FetchResponse, Fetcher};
use log::{debug, warn};

use crate::capabilities::{CapabilitiesSnapshot, LayerCapability};
use crate::config::ResolvedOptions;
use crate::decoder::{DecodeOptions, open_decoder};
use crate::description::DescriptionFile;
use crate::error::{ResponseContextExt, ResponseError, Result};
use crate::request::{GetFeatureParams, describe_url, get_feature_url};
use crate::schema::{LayerSchema, SchemaCache, infer_schema, layer_schema_from_document, parse_schema_document};
use crate::srs::Srs;
use crate::xml::prefix;

/// Name given to an inferred geometry property the payload left unnamed.
const DEFAULT_GEOMETRY_NAME: &str = "geometry";

pub(crate) struct DatasourceContext {
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) capabilities: CapabilitiesSnapshot,
    pub(crate) options: ResolvedOptions,
    /// Endpoint every request is built from, `OUTPUTFORMAT` included.
    pub(crate) base_url: String,
    pub(crate) schemas: SchemaCache,
    pub(crate) description: Mutex<Option<DescriptionFile>>,
    /// Layers exposed by the datasource, in capabilities order.
    pub(crate) layer_names: Vec<String>,
}

impl DatasourceContext {
    pub(crate) fn get(&self, url: &str) -> Result<FetchResponse> {
        debug!("GET {url}");
        Ok(self.fetcher.fetch(&FetchRequest::get(url))?)
    }

    pub(crate) fn decode_options(&self, type_name: &str, srs: Option<&Srs>) -> DecodeOptions {
        DecodeOptions {
            streaming: self.options.use_streaming,
            lat_long_order: srs.is_some_and(Srs::has_lat_long_order),
            type_name: type_name.to_string(),
        }
    }

    fn with_description<T>(&self, f: impl FnOnce(&mut DescriptionFile) -> T) -> Option<T> {
        self.description
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .map(f)
    }

    /// Schema of `layer`, described on first use.
    ///
    /// The lookup goes through the cache, the description file, a `DescribeFeatureType`
    /// request and finally a one-feature sample.
    pub(crate) fn resolve_schema(
        &self,
        layer: &LayerCapability,
        srs: Option<&Srs>,
    ) -> Result<Arc<LayerSchema>> {
        if let Some(cached) = self.schemas.get(&layer.name) {
            return Ok(cached.schema);
        }
        if let Some(schema) = self.schema_from_description(&layer.name) {
            return Ok(schema);
        }
        match self.describe(&layer.name) {
            Ok(schema) => Ok(schema),
            Err(err) => {
                warn!("DescribeFeatureType failed for {}: {err}", layer.name);
                self.infer(layer, srs).map_err(|infer_err| {
                    debug!("schema inference failed for {}: {infer_err}", layer.name);
                    err
                })
            },
        }
    }

    fn schema_from_description(&self, layer: &str) -> Option<Arc<LayerSchema>> {
        let document = self
            .with_description(|description| description.layer_schema(layer).cloned())
            .flatten()?;
        match layer_schema_from_document(&document, layer, self.options.schema) {
            Ok(schema) => {
                debug!("schema of {layer} read from description file");
                self.schemas.insert(layer, schema, document);
                self.schemas.get(layer).map(|cached| cached.schema)
            },
            Err(err) => {
                warn!("description file schema of {layer} unusable: {err}");
                None
            },
        }
    }

    /// Layers described together with `layer`: every exposed layer sharing its prefix whose
    /// schema is still unknown.
    fn describe_batch(&self, layer: &str) -> Vec<String> {
        if !self.options.load_multiple_layer_defn {
            return vec![layer.to_string()];
        }
        let mut batch = vec![layer.to_string()];
        batch.extend(
            self.layer_names
                .iter()
                .filter(|name| name.as_str() != layer)
                .filter(|name| prefix(name) == prefix(layer))
                .filter(|name| !self.schemas.contains(name))
                .cloned(),
        );
        batch.sort_by_key(|name| self.layer_names.iter().position(|n| n == name));
        batch
    }

    fn describe(&self, layer: &str) -> Result<Arc<LayerSchema>> {
        let batch = self.describe_batch(layer);
        if batch.len() > 1 {
            match self.describe_layers(&batch) {
                Ok(found) if found.iter().any(|name| name == layer) => {},
                Ok(_) => {
                    debug!("{layer} missing from the batched description, describing it alone");
                    self.describe_layers(&[layer.to_string()])?;
                },
                Err(err) => {
                    debug!("batched DescribeFeatureType failed: {err}");
                    self.describe_layers(&[layer.to_string()])?;
                },
            }
        } else {
            self.describe_layers(&batch)?;
        }
        self.schemas.get(layer).map(|cached| cached.schema).ok_or_else(|| {
            ResponseError::MissingLayerDefinition {
                layer: layer.to_string(),
            }
            .into()
        })
    }

    /// Describes `layers` in one request and records the schemas found.
    fn describe_layers(&self, layers: &[String]) -> Result<Vec<String>> {
        let url = describe_url(&self.base_url, self.capabilities.version, layers);
        let response = self.get(&url)?;
        let document = parse_schema_document(&response.body).with_url_context(&url)?;
        let found = self
            .schemas
            .populate(&document, layers, self.options.schema);
        if layers.len() == 1 && found.is_empty() {
            // the single-layer path surfaces the parse error instead of a silent miss
            layer_schema_from_document(&document, &layers[0], self.options.schema)?;
        }

        if found.is_empty() {
            return Ok(found);
        }
        let recorded = self.with_description(|description| {
            for name in &found {
                description.add_layer(name, &document);
            }
            description.save()
        });
        if let Some(Err(err)) = recorded {
            warn!("{err}");
        }
        Ok(found)
    }

    /// Builds a schema from the first feature of a `GetFeature` sample.
    fn infer(&self, layer: &LayerCapability, srs: Option<&Srs>) -> Result<Arc<LayerSchema>> {
        let mut params = GetFeatureParams::new(layer.name.clone());
        params.count = Some(1);
        params.srs_name = srs
            .filter(|srs| Some(srs.name.as_str()) != layer.default_srs.as_deref())
            .map(|srs| srs.name.clone());
        let url = get_feature_url(&self.base_url, self.capabilities.version, &params);
        let response = self.get(&url)?;

        let default_srs = layer.default_srs.as_deref().map(Srs::parse);
        let options = self.decode_options(&layer.name, srs.or(default_srs.as_ref()));
        let mut decoder = open_decoder(&response, &options).with_url_context(&url)?;
        let sample = decoder
            .next_record()?
            .and_then(|record| record.into_feature())
            .ok_or_else(|| ResponseError::MissingLayerDefinition {
                layer: layer.name.clone(),
            })?;

        let geometry_name = sample.geometries.first().map(|(name, _)| {
            if name.is_empty() {
                DEFAULT_GEOMETRY_NAME
            } else {
                name.as_str()
            }
        });
        let schema = infer_schema(&sample.properties, geometry_name, self.options.schema);
        debug!(
            "inferred {} fields for {} from a sample feature",
            schema.field_count(),
            layer.name
        );
        Ok(Arc::new(schema))
    }
}

