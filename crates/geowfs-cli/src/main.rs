//! Command-line interface for `GeoWFS`, a client for OGC Web Feature Services.
//!
//! This binary provides a thin CLI over the [`geowfs_core`] library: it opens an endpoint
//! (or a local description file), lists its layers and schemas, and runs feature queries.
//!
//! # Architecture
//!
//! The CLI is built using [`clap`] for argument parsing and [`tracing`] for structured logging.
//! HTTP requests go through [`reqwest`]'s blocking client, plugged into the library as its
//! fetcher.
//!
//! # Available Commands
//!
//! - `info` - Display endpoint capabilities
//! - `layers` - List the feature types of an endpoint
//! - `schema` - Display the fields of one layer
//! - `query` - Read features, with optional filters or an SQL statement
//! - `versions` - List the supported protocol versions

mod display;
mod http;

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use geowfs_core::{Extent, FeatureSource, OpenOptions, WfsConfig, WfsDataSource};

use crate::http::HttpFetcher;

#[derive(Parser)]
#[command(
    name = "geowfs",
    version,
    about = "OGC Web Feature Service client",
    long_about = "GeoWFS reads feature types from WFS 1.0.0, 1.1.0 and 2.0.x servers.\n\
                  Connections are endpoint URLs (optionally prefixed with WFS:) or description files."
)]
/// Command-line arguments and options for the `GeoWFS` CLI.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    /// Open option as KEY=VALUE (e.g. `PAGE_SIZE=500`). May be repeated.
    #[arg(long = "oo", value_name = "KEY=VALUE", global = true)]
    open_options: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the `GeoWFS` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Displays the capabilities of an endpoint.
    Info {
        /// Endpoint URL or description file.
        #[arg(value_name = "CONNECTION")]
        connection: String,
    },

    /// Lists the feature types an endpoint serves.
    Layers {
        /// Endpoint URL or description file.
        #[arg(value_name = "CONNECTION")]
        connection: String,
    },

    /// Displays the schema of a layer.
    Schema {
        /// Endpoint URL or description file.
        #[arg(value_name = "CONNECTION")]
        connection: String,

        /// Layer name, qualified or not.
        #[arg(value_name = "LAYER")]
        layer: String,
    },

    /// Reads features from a layer, or runs an SQL statement against the endpoint.
    Query {
        /// Endpoint URL or description file.
        #[arg(value_name = "CONNECTION")]
        connection: String,

        /// Layer name. Required unless `--sql` is given.
        #[arg(value_name = "LAYER", required_unless_present = "sql")]
        layer: Option<String>,

        /// Attribute filter as an SQL predicate (e.g. "pop > 1000").
        #[arg(long = "where", value_name = "PREDICATE", conflicts_with = "sql")]
        predicate: Option<String>,

        /// Spatial filter as minx,miny,maxx,maxy.
        #[arg(long, value_name = "BBOX", conflicts_with = "sql")]
        bbox: Option<String>,

        /// Stop after this many features.
        #[arg(long, value_name = "N")]
        limit: Option<usize>,

        /// SELECT or DELETE statement.
        #[arg(long, value_name = "STATEMENT")]
        sql: Option<String>,
    },

    /// Lists the supported WFS versions and what the driver does with each.
    Versions,
}

/// Entry point for the `GeoWFS` command-line interface.
///
/// # Errors
///
/// Returns an error if command execution fails or if the logging system cannot be initialized.
fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let options = OpenOptions::from_key_values(&cli.open_options)?;

    match cli.command {
        Commands::Info { connection } => {
            let ds = open_datasource(&connection, options)?;
            display::display_endpoint_info(&ds);
        },
        Commands::Layers { connection } => {
            let ds = open_datasource(&connection, options)?;
            display::display_layers(&ds);
        },
        Commands::Schema { connection, layer } => {
            handle_schema(&connection, &layer, options)?;
        },
        Commands::Query {
            connection,
            layer,
            predicate,
            bbox,
            limit,
            sql,
        } => {
            let mut ds = open_datasource(&connection, options)?;
            if let Some(sql) = sql {
                handle_sql(&mut ds, &sql, limit)?;
            } else if let Some(layer) = layer {
                let extent = bbox.as_deref().map(parse_bbox).transpose()?;
                handle_query(&mut ds, &layer, predicate.as_deref(), extent, limit)?;
            }
        },
        Commands::Versions => display::display_versions(),
    }

    Ok(())
}

fn open_datasource(connection: &str, options: OpenOptions) -> Result<WfsDataSource> {
    info!("Opening {connection}");
    let config = WfsConfig::from_env()?;
    let fetcher = Arc::new(HttpFetcher::new()?);
    let ds = WfsDataSource::open(connection, fetcher, &config, options)?;
    debug!("{} layer(s) at {}", ds.layer_count(), ds.base_url());
    Ok(ds)
}

fn handle_schema(connection: &str, name: &str, options: OpenOptions) -> Result<()> {
    let mut ds = open_datasource(connection, options)?;
    let layer = ds
        .layer_by_name(name)
        .ok_or_else(|| anyhow!("Layer '{name}' not found."))?;
    let schema = layer.schema();
    display::display_schema(layer.name(), &schema);
    Ok(())
}

fn handle_query(
    ds: &mut WfsDataSource,
    name: &str,
    predicate: Option<&str>,
    extent: Option<Extent>,
    limit: Option<usize>,
) -> Result<()> {
    let layer = ds
        .layer_by_name(name)
        .ok_or_else(|| anyhow!("Layer '{name}' not found."))?;
    layer.set_attribute_filter(predicate)?;
    layer.set_spatial_filter(extent);
    if layer.filters_client_side() {
        info!("Attribute filter is evaluated locally");
    }
    print_features(layer, limit)
}

fn handle_sql(ds: &mut WfsDataSource, sql: &str, limit: Option<usize>) -> Result<()> {
    info!("Executing {sql}");
    match ds.execute_sql(sql)? {
        Some(mut result) => print_features(result.as_mut(), limit),
        None => {
            println!("Statement executed.");
            Ok(())
        },
    }
}

fn print_features(source: &mut dyn FeatureSource, limit: Option<usize>) -> Result<()> {
    let mut features = Vec::new();
    while limit.is_none_or(|limit| features.len() < limit) {
        match source.next_feature()? {
            Some(feature) => features.push(feature),
            None => break,
        }
    }
    display::display_features(&features);
    Ok(())
}

/// Parses `minx,miny,maxx,maxy` into an extent.
fn parse_bbox(text: &str) -> Result<Extent> {
    let values = text
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| anyhow!("Invalid bbox coordinate '{}'.", part.trim()))
        })
        .collect::<Result<Vec<_>>>()?;
    let [min_x, min_y, max_x, max_y] = values[..] else {
        bail!("A bbox needs 4 comma-separated values, got {}.", values.len());
    };
    if min_x > max_x || min_y > max_y {
        bail!("Bbox minimums must not exceed maximums.");
    }
    Ok(Extent::new(min_x, min_y, max_x, max_y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bbox() {
        let extent = parse_bbox("-10, 40.5,2,51").unwrap();
        assert_eq!(
            (extent.min_x, extent.min_y, extent.max_x, extent.max_y),
            (-10.0, 40.5, 2.0, 51.0)
        );
    }

    #[test]
    fn test_parse_bbox_errors() {
        assert_eq!(
            parse_bbox("1,2,3").unwrap_err().to_string(),
            "A bbox needs 4 comma-separated values, got 3."
        );
        assert_eq!(
            parse_bbox("1,2,x,4").unwrap_err().to_string(),
            "Invalid bbox coordinate 'x'."
        );
        assert!(parse_bbox("3,2,1,4").is_err());
    }

    #[test]
    fn test_query_requires_layer_or_sql() {
        assert!(Cli::try_parse_from(["geowfs", "query", "http://host/wfs"]).is_err());
        assert!(
            Cli::try_parse_from(["geowfs", "query", "http://host/wfs", "--sql", "SELECT * FROM a"])
                .is_ok()
        );
        assert!(
            Cli::try_parse_from([
                "geowfs",
                "query",
                "http://host/wfs",
                "lyr",
                "--where",
                "a = 1",
                "--sql",
                "SELECT * FROM a"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_open_options_repeat() {
        let cli = Cli::try_parse_from([
            "geowfs",
            "layers",
            "http://host/wfs",
            "--oo",
            "PAGE_SIZE=10",
            "--oo",
            "EXPOSE_GML_ID=NO",
        ])
        .unwrap();
        assert_eq!(cli.open_options, ["PAGE_SIZE=10", "EXPOSE_GML_ID=NO"]);
        assert!(OpenOptions::from_key_values(&cli.open_options).is_ok());
    }
}
