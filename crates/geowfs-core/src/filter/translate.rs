//! Predicate to OGC Filter / FES translation.
//!
//! Translation runs in two passes. The first validates spatial function arguments; its errors
//! are final. The second renders XML and may fail with an error for which
//! [`WfsError::is_filter_fallback`](crate::error::WfsError::is_filter_fallback) holds, in
//! which case the caller evaluates the predicate on the client instead.

use std::fmt::Write as _;

use super::{ColumnRef, CompareOp, Expr, Literal};
use crate::capabilities::{FilterCapabilities, FilterDialect, WfsVersion};
use crate::error::FilterError;
use crate::geometry::{Extent, parse_wkt};
use crate::gml::{GmlProfile, GmlWriter, write_box, write_envelope};
use crate::schema::{FieldType, GML_ID, LayerSchema};
use crate::srs::Srs;
use crate::xml::{escape_attr, escape_text};

/// What a column name designates on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Attribute(FieldType),
    Geometry,
    /// The `gml_id` identity field.
    GmlId,
    /// The client-side feature id, unknown to the server.
    Fid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    /// Text placed in `PropertyName` / `ValueReference`.
    pub reference: String,
    pub kind: ColumnKind,
}

/// Maps column names of a predicate to server-side property references.
pub trait ColumnResolver {
    fn resolve(&self, column: &ColumnRef) -> Option<ResolvedColumn>;
}

/// Resolver over the schema of a single layer.
#[derive(Debug, Clone, Copy)]
pub struct LayerColumns<'a> {
    schema: &'a LayerSchema,
}

impl<'a> LayerColumns<'a> {
    #[must_use]
    pub fn new(schema: &'a LayerSchema) -> Self {
        Self { schema }
    }
}

impl ColumnResolver for LayerColumns<'_> {
    fn resolve(&self, column: &ColumnRef) -> Option<ResolvedColumn> {
        let name = column.name.as_str();
        let kind = if self.schema.geometry_name() == Some(name) {
            ColumnKind::Geometry
        } else if name == GML_ID {
            ColumnKind::GmlId
        } else if let Some(field) = self.schema.declared_fields().find(|f| f.name == name) {
            ColumnKind::Attribute(field.field_type)
        } else if name.eq_ignore_ascii_case("FID") {
            ColumnKind::Fid
        } else {
            return None;
        };
        Some(ResolvedColumn {
            reference: name.to_string(),
            kind,
        })
    }
}

/// Everything the translator needs besides the predicate.
pub struct TranslateContext<'a> {
    pub version: WfsVersion,
    pub capabilities: &'a FilterCapabilities,
    pub columns: &'a dyn ColumnResolver,
    /// SRS assumed for geometry literals that do not name one.
    pub default_srs: Option<&'a Srs>,
}

const BINARY_SPATIAL: &[(&str, &str)] = &[
    ("ST_EQUALS", "Equals"),
    ("ST_DISJOINT", "Disjoint"),
    ("ST_TOUCHES", "Touches"),
    ("ST_CONTAINS", "Contains"),
    ("ST_INTERSECTS", "Intersects"),
    ("ST_WITHIN", "Within"),
    ("ST_CROSSES", "Crosses"),
    ("ST_OVERLAPS", "Overlaps"),
];

const DISTANCE_SPATIAL: &[(&str, &str)] = &[("ST_DWITHIN", "DWithin"), ("ST_BEYOND", "Beyond")];

fn spatial_operator(name: &str) -> Option<(&'static str, bool)> {
    let upper = name.to_ascii_uppercase();
    BINARY_SPATIAL
        .iter()
        .find(|(f, _)| *f == upper)
        .map(|(_, op)| (*op, false))
        .or_else(|| {
            DISTANCE_SPATIAL
                .iter()
                .find(|(f, _)| *f == upper)
                .map(|(_, op)| (*op, true))
        })
}

fn is_function(expr: &Expr, wanted: &str) -> bool {
    matches!(expr, Expr::Function { name, .. } if name.eq_ignore_ascii_case(wanted))
}

fn is_geometry_operand(expr: &Expr, ctx: &TranslateContext<'_>) -> bool {
    match expr {
        Expr::Column(column) => ctx
            .columns
            .resolve(column)
            .is_some_and(|c| c.kind == ColumnKind::Geometry),
        other => is_function(other, "ST_MakeEnvelope") || is_function(other, "ST_GeomFromText"),
    }
}

fn is_number(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(Literal::Number(_)))
}

/// Cuts WKT after its outermost parenthesised group, ignoring trailing garbage.
fn balanced_wkt(text: &str) -> &str {
    let mut depth = 0usize;
    for (idx, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[..=idx];
                }
            },
            _ => {},
        }
    }
    text
}

/// Interprets an SRS argument: an EPSG code or an SRS name with an EPSG code.
fn srs_argument(arg: &Expr, function: &str, index: usize) -> Result<Srs, FilterError> {
    let wrong_value = || FilterError::WrongArgumentValue {
        function: function.to_string(),
        index,
    };
    match arg {
        Expr::Literal(literal @ Literal::Number(text)) => {
            if !literal.is_integer() {
                return Err(FilterError::WrongArgumentType {
                    function: function.to_string(),
                    index,
                });
            }
            match text.parse::<u32>() {
                Ok(code) if code > 0 => Ok(Srs::from_epsg(code)),
                _ => Err(wrong_value()),
            }
        },
        Expr::Literal(Literal::Text(name)) => {
            let srs = Srs::parse(name);
            if srs.epsg.is_some() { Ok(srs) } else { Err(wrong_value()) }
        },
        _ => Err(FilterError::WrongArgumentType {
            function: function.to_string(),
            index,
        }),
    }
}

fn validate_function(
    name: &str,
    args: &[Expr],
    ctx: &TranslateContext<'_>,
) -> Result<(), FilterError> {
    let wrong_count = || FilterError::WrongArgumentCount {
        function: name.to_string(),
    };
    let wrong_type = |index: usize| FilterError::WrongArgumentType {
        function: name.to_string(),
        index,
    };

    if let Some((_, with_distance)) = spatial_operator(name) {
        let expected = if with_distance { 3 } else { 2 };
        if args.len() != expected {
            return Err(wrong_count());
        }
        for (idx, arg) in args.iter().take(2).enumerate() {
            if !is_geometry_operand(arg, ctx) {
                return Err(wrong_type(idx + 1));
            }
        }
        if with_distance && !is_number(&args[2]) {
            return Err(wrong_type(3));
        }
        return Ok(());
    }

    match name.to_ascii_uppercase().as_str() {
        "ST_MAKEENVELOPE" => {
            if !(4..=5).contains(&args.len()) {
                return Err(wrong_count());
            }
            if let Some(idx) = args.iter().take(4).position(|a| !is_number(a)) {
                return Err(wrong_type(idx + 1));
            }
            if let Some(srs) = args.get(4) {
                srs_argument(srs, name, 5)?;
            }
            Ok(())
        },
        "ST_GEOMFROMTEXT" => {
            if !(1..=2).contains(&args.len()) {
                return Err(wrong_count());
            }
            let Expr::Literal(Literal::Text(wkt)) = &args[0] else {
                return Err(wrong_type(1));
            };
            if parse_wkt(balanced_wkt(wkt)).is_err() {
                return Err(FilterError::WrongArgumentValue {
                    function: name.to_string(),
                    index: 1,
                });
            }
            if let Some(srs) = args.get(1) {
                srs_argument(srs, name, 2)?;
            }
            Ok(())
        },
        _ => Ok(()),
    }
}

fn validate(expr: &Expr, ctx: &TranslateContext<'_>) -> Result<(), FilterError> {
    match expr {
        Expr::Column(_) | Expr::Literal(_) => Ok(()),
        Expr::Compare { left, right, .. } => {
            validate(left, ctx)?;
            validate(right, ctx)
        },
        Expr::Like { expr, pattern, .. } => {
            validate(expr, ctx)?;
            validate(pattern, ctx)
        },
        Expr::IsNull { expr, .. } | Expr::Not(expr) | Expr::Cast { expr, .. } => {
            validate(expr, ctx)
        },
        Expr::InList { expr, list, .. } => {
            validate(expr, ctx)?;
            list.iter().try_for_each(|e| validate(e, ctx))
        },
        Expr::Between {
            expr, low, high, ..
        } => {
            validate(expr, ctx)?;
            validate(low, ctx)?;
            validate(high, ctx)
        },
        Expr::And(items) | Expr::Or(items) => items.iter().try_for_each(|e| validate(e, ctx)),
        Expr::Function { name, args } => {
            validate_function(name, args, ctx)?;
            args.iter().try_for_each(|e| validate(e, ctx))
        },
    }
}

fn is_identity(column: &ColumnRef, ctx: &TranslateContext<'_>) -> bool {
    ctx.columns
        .resolve(column)
        .is_some_and(|c| c.kind == ColumnKind::GmlId)
}

/// Collects ids when the whole predicate is `gml_id = '...'` terms joined by OR.
fn collect_ids(expr: &Expr, ctx: &TranslateContext<'_>, ids: &mut Vec<String>) -> bool {
    match expr {
        Expr::Compare {
            op: CompareOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(c), Expr::Literal(Literal::Text(id)))
            | (Expr::Literal(Literal::Text(id)), Expr::Column(c))
                if is_identity(c, ctx) =>
            {
                ids.push(id.clone());
                true
            },
            _ => false,
        },
        Expr::InList {
            expr,
            list,
            negated: false,
        } => match expr.as_ref() {
            Expr::Column(c) if is_identity(c, ctx) => list.iter().all(|item| match item {
                Expr::Literal(Literal::Text(id)) => {
                    ids.push(id.clone());
                    true
                },
                _ => false,
            }),
            _ => false,
        },
        Expr::Or(items) => items.iter().all(|item| collect_ids(item, ctx, ids)),
        _ => false,
    }
}

/// Filter element selecting one feature by server identifier.
#[must_use]
pub fn identity_element(dialect: FilterDialect, id: &str) -> String {
    let id = escape_attr(id);
    match dialect {
        FilterDialect::Fes10 => format!("<FeatureId fid=\"{id}\"/>"),
        FilterDialect::Fes11 => format!("<GmlObjectId id=\"{id}\"/>"),
        FilterDialect::Fes20 => format!("<ResourceId rid=\"{id}\"/>"),
    }
}

fn untranslatable(expr: &Expr) -> FilterError {
    FilterError::Untranslatable {
        expression: expr.to_string(),
    }
}

struct Renderer<'a, 'c> {
    ctx: &'a TranslateContext<'c>,
    dialect: FilterDialect,
    gml: GmlWriter,
}

impl Renderer<'_, '_> {
    fn property(&self, column: &ColumnRef, geometry: bool) -> Result<String, FilterError> {
        let resolved = self
            .ctx
            .columns
            .resolve(column)
            .ok_or_else(|| FilterError::UnknownColumn {
                column: column.to_string(),
            })?;
        match resolved.kind {
            ColumnKind::Fid => Err(FilterError::UnknownColumn {
                column: column.to_string(),
            }),
            ColumnKind::GmlId => Err(untranslatable(&Expr::Column(column.clone()))),
            ColumnKind::Geometry if !geometry => {
                Err(untranslatable(&Expr::Column(column.clone())))
            },
            _ => {
                let tag = self.dialect.property_element();
                Ok(format!("<{tag}>{}</{tag}>", escape_text(&resolved.reference)))
            },
        }
    }

    fn literal(expr: &Expr, literal: &Literal) -> Result<String, FilterError> {
        let text = match literal {
            Literal::Null => return Err(untranslatable(expr)),
            Literal::Boolean(b) => b.to_string(),
            Literal::Number(n) => n.clone(),
            Literal::Text(t) => escape_text(t).into_owned(),
        };
        Ok(format!("<Literal>{text}</Literal>"))
    }

    fn require_comparison(&self, capability: &str, element: &str) -> Result<(), FilterError> {
        if self.ctx.capabilities.supports_comparison(capability) {
            Ok(())
        } else {
            Err(FilterError::UnsupportedFilterOperator {
                operator: element.to_string(),
            })
        }
    }

    fn predicate(&mut self, expr: &Expr, out: &mut String) -> Result<(), FilterError> {
        match expr {
            Expr::And(items) => self.tree("And", items, out),
            Expr::Or(items) => self.tree("Or", items, out),
            Expr::Not(inner) => {
                out.push_str("<Not>");
                self.predicate(inner, out)?;
                out.push_str("</Not>");
                Ok(())
            },
            Expr::Compare { op, left, right } => self.comparison(expr, *op, left, right, out),
            Expr::Like {
                expr: target,
                pattern,
                negated,
                case_insensitive,
            } => {
                let (Expr::Column(column), Expr::Literal(Literal::Text(pattern))) =
                    (target.as_ref(), pattern.as_ref())
                else {
                    return Err(untranslatable(expr));
                };
                let property = self.property(column, false)?;
                self.require_comparison("Like", "PropertyIsLike")?;
                let escape_attr_name = if self.dialect == FilterDialect::Fes10 {
                    "escape"
                } else {
                    "escapeChar"
                };
                let match_case = if self.dialect == FilterDialect::Fes10 {
                    String::new()
                } else {
                    format!(" matchCase=\"{}\"", !case_insensitive)
                };
                let body = format!(
                    "<PropertyIsLike wildCard=\"*\" singleChar=\"_\" {escape_attr_name}=\"!\"{match_case}>{property}<Literal>{}</Literal></PropertyIsLike>",
                    escape_text(&like_pattern(pattern))
                );
                push_negated(out, &body, *negated);
                Ok(())
            },
            Expr::IsNull {
                expr: target,
                negated,
            } => {
                let Expr::Column(column) = target.as_ref() else {
                    return Err(untranslatable(expr));
                };
                let property = self.property(column, false)?;
                self.require_comparison("Null", "PropertyIsNull")?;
                let body = format!("<PropertyIsNull>{property}</PropertyIsNull>");
                push_negated(out, &body, *negated);
                Ok(())
            },
            Expr::InList {
                expr: target,
                list,
                negated,
            } => {
                let alternatives: Vec<Expr> = list
                    .iter()
                    .map(|item| Expr::compare(CompareOp::Eq, target.as_ref().clone(), item.clone()))
                    .collect();
                if alternatives.is_empty() {
                    return Err(untranslatable(expr));
                }
                if *negated {
                    out.push_str("<Not>");
                }
                self.tree("Or", &alternatives, out)?;
                if *negated {
                    out.push_str("</Not>");
                }
                Ok(())
            },
            Expr::Between {
                expr: target,
                low,
                high,
                negated,
            } => {
                let (Expr::Column(column), Expr::Literal(low_lit), Expr::Literal(high_lit)) =
                    (target.as_ref(), low.as_ref(), high.as_ref())
                else {
                    return Err(untranslatable(expr));
                };
                let property = self.property(column, false)?;
                self.require_comparison("Between", "PropertyIsBetween")?;
                let body = format!(
                    "<PropertyIsBetween>{property}<LowerBoundary>{}</LowerBoundary><UpperBoundary>{}</UpperBoundary></PropertyIsBetween>",
                    Self::literal(expr, low_lit)?,
                    Self::literal(expr, high_lit)?
                );
                push_negated(out, &body, *negated);
                Ok(())
            },
            Expr::Function { name, args } => self.spatial(expr, name, args, out),
            Expr::Column(_) | Expr::Literal(_) | Expr::Cast { .. } => Err(untranslatable(expr)),
        }
    }

    /// Nests an n-ary connective as a binary tree whose left side holds the largest power of
    /// two strictly below the item count.
    fn tree(&mut self, tag: &str, items: &[Expr], out: &mut String) -> Result<(), FilterError> {
        if let [single] = items {
            return self.predicate(single, out);
        }
        let split = items.len().next_power_of_two() / 2;
        let _ = write!(out, "<{tag}>");
        self.tree(tag, &items[..split], out)?;
        self.tree(tag, &items[split..], out)?;
        let _ = write!(out, "</{tag}>");
        Ok(())
    }

    fn comparison(
        &mut self,
        expr: &Expr,
        op: CompareOp,
        left: &Expr,
        right: &Expr,
        out: &mut String,
    ) -> Result<(), FilterError> {
        let (first, second, op) = match (left, right) {
            (Expr::Column(column), Expr::Literal(literal)) => (
                self.property(column, false)?,
                Self::literal(expr, literal)?,
                op,
            ),
            (Expr::Literal(literal), Expr::Column(column)) => (
                self.property(column, false)?,
                Self::literal(expr, literal)?,
                op.mirrored(),
            ),
            (Expr::Column(a), Expr::Column(b)) => {
                (self.property(a, false)?, self.property(b, false)?, op)
            },
            _ => return Err(untranslatable(expr)),
        };
        let element = format!("PropertyIs{}", op.capability_name());
        self.require_comparison(op.capability_name(), &element)?;
        let _ = write!(out, "<{element}>{first}{second}</{element}>");
        Ok(())
    }

    fn spatial(
        &mut self,
        expr: &Expr,
        name: &str,
        args: &[Expr],
        out: &mut String,
    ) -> Result<(), FilterError> {
        let Some((operator, with_distance)) = spatial_operator(name) else {
            return Err(untranslatable(expr));
        };
        if !self.ctx.capabilities.supports_spatial(operator) {
            return Err(FilterError::UnsupportedFilterOperator {
                operator: operator.to_string(),
            });
        }
        let first = self.geometry_operand(expr, &args[0])?;
        let second = self.geometry_operand(expr, &args[1])?;
        let _ = write!(out, "<{operator}>{first}{second}");
        if with_distance {
            let Expr::Literal(Literal::Number(distance)) = &args[2] else {
                return Err(untranslatable(expr));
            };
            let unit_attr = if self.dialect.is_fes20() { "uom" } else { "unit" };
            let _ = write!(out, "<Distance {unit_attr}=\"m\">{distance}</Distance>");
        }
        let _ = write!(out, "</{operator}>");
        Ok(())
    }

    /// SRS name and axis swap for a geometry literal.
    fn literal_reference(&self, srs_arg: Option<&Expr>, function: &str, index: usize) -> Result<(Option<String>, bool), FilterError> {
        match srs_arg {
            None => Ok(self
                .ctx
                .default_srs
                .map_or((None, false), |srs| (Some(srs.name.clone()), srs.has_lat_long_order()))),
            Some(arg) => {
                let srs = srs_argument(arg, function, index)?;
                let swap = srs.has_lat_long_order();
                Ok((Some(srs.name), swap))
            },
        }
    }

    fn geometry_operand(&mut self, parent: &Expr, arg: &Expr) -> Result<String, FilterError> {
        match arg {
            Expr::Column(column) => self.property(column, true),
            Expr::Function { name, args } if name.eq_ignore_ascii_case("ST_MakeEnvelope") => {
                let corner = |idx: usize| args[idx].literal_f64().ok_or_else(|| untranslatable(arg));
                let extent = Extent::new(corner(0)?, corner(1)?, corner(2)?, corner(3)?);
                let (srs_name, swap) = self.literal_reference(args.get(4), name, 5)?;
                Ok(if self.dialect == FilterDialect::Fes10 {
                    legacy_box(&extent, srs_name.as_deref(), swap)
                } else {
                    write_envelope(&extent, srs_name.as_deref(), swap)
                })
            },
            Expr::Function { name, args } if name.eq_ignore_ascii_case("ST_GeomFromText") => {
                let Expr::Literal(Literal::Text(wkt)) = &args[0] else {
                    return Err(untranslatable(arg));
                };
                let geometry = parse_wkt(balanced_wkt(wkt)).map_err(|_| untranslatable(arg))?;
                let (srs_name, swap) = self.literal_reference(args.get(1), name, 2)?;
                self.gml.set_reference(srs_name, swap);
                Ok(self.gml.write(&geometry))
            },
            _ => Err(untranslatable(parent)),
        }
    }
}

impl Expr {
    fn literal_f64(&self) -> Option<f64> {
        match self {
            Self::Literal(literal) => literal.as_f64(),
            _ => None,
        }
    }
}

fn push_negated(out: &mut String, body: &str, negated: bool) {
    if negated {
        let _ = write!(out, "<Not>{body}</Not>");
    } else {
        out.push_str(body);
    }
}

/// SQL LIKE pattern to the `*`/`_`/`!` convention used in the filter.
fn like_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '%' => out.push('*'),
            '*' | '!' => {
                out.push('!');
                out.push(c);
            },
            other => out.push(other),
        }
    }
    out
}

fn legacy_box(extent: &Extent, srs_name: Option<&str>, swap: bool) -> String {
    let (lower, upper) = if swap {
        ((extent.min_y, extent.min_x), (extent.max_y, extent.max_x))
    } else {
        ((extent.min_x, extent.min_y), (extent.max_x, extent.max_y))
    };
    let srs = srs_name
        .map(|s| format!(" srsName=\"{}\"", escape_attr(s)))
        .unwrap_or_default();
    format!(
        "<gml:Box{srs}><gml:coordinates>{},{} {},{}</gml:coordinates></gml:Box>",
        lower.0, lower.1, upper.0, upper.1
    )
}

/// Translates a predicate into the body of a filter document.
///
/// # Errors
///
/// Spatial argument errors ([`FilterError::WrongArgumentCount`] and friends) are final.
/// [`FilterError::UnsupportedFilterOperator`], [`FilterError::UnknownColumn`] and
/// [`FilterError::Untranslatable`] mean the predicate must be evaluated client-side.
pub fn translate(expr: &Expr, ctx: &TranslateContext<'_>) -> Result<String, FilterError> {
    validate(expr, ctx)?;
    let dialect = ctx.version.filter_dialect();

    let mut ids = Vec::new();
    if collect_ids(expr, ctx, &mut ids) {
        return Ok(ids.iter().map(|id| identity_element(dialect, id)).collect());
    }

    let gml = if dialect == FilterDialect::Fes10 {
        GmlWriter::new(GmlProfile::Gml2)
    } else {
        GmlWriter::new(GmlProfile::Gml3).with_ids()
    };
    let mut renderer = Renderer { ctx, dialect, gml };
    let mut out = String::new();
    renderer.predicate(expr, &mut out)?;
    Ok(out)
}

/// Wraps a filter body into a `<Filter>` element with the dialect's namespaces.
///
/// `namespaces` holds extra `(prefix, uri)` bindings for prefixed type names.
#[must_use]
pub fn filter_document(dialect: FilterDialect, body: &str, namespaces: &[(String, String)]) -> String {
    let mut out = format!("<Filter xmlns=\"{}\"", dialect.filter_namespace());
    for (prefix, uri) in namespaces {
        let _ = write!(out, " xmlns:{prefix}=\"{}\"", escape_attr(uri));
    }
    let _ = write!(out, " xmlns:gml=\"{}\">{body}</Filter>", dialect.gml_namespace());
    out
}

/// `BBOX` predicate for a rectangular spatial filter.
#[must_use]
pub fn bbox_filter(
    dialect: FilterDialect,
    geometry_reference: &str,
    extent: &Extent,
    srs: Option<&Srs>,
) -> String {
    let swap = srs.is_some_and(Srs::has_lat_long_order);
    let tag = dialect.property_element();
    let property = format!("<{tag}>{}</{tag}>", escape_text(geometry_reference));
    let shape = if dialect.is_fes20() {
        write_envelope(extent, srs.map(|s| s.name.as_str()), swap)
    } else {
        write_box(extent, swap)
    };
    format!("<BBOX>{property}{shape}</BBOX>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse_predicate;
    use crate::schema::{FieldDescriptor, GeometryFieldDescriptor, GeometryType};
    use crate::config::SchemaOptions;

    fn schema() -> LayerSchema {
        LayerSchema::new(
            vec![
                FieldDescriptor::new("str", FieldType::String),
                FieldDescriptor::new("boolean", FieldType::Boolean),
                FieldDescriptor::new("short", FieldType::Int16),
                FieldDescriptor::new("int", FieldType::Int32),
                FieldDescriptor::new("float", FieldType::Float32),
            ],
            Some(GeometryFieldDescriptor {
                name: "shape".into(),
                geometry_type: GeometryType::Point,
            }),
            SchemaOptions { expose_gml_id: true },
        )
    }

    fn run(version: WfsVersion, text: &str) -> Result<String, FilterError> {
        let schema = schema();
        let columns = LayerColumns::new(&schema);
        let capabilities = FilterCapabilities::default();
        let srs = Srs::parse("urn:ogc:def:crs:EPSG::4326");
        let ctx = TranslateContext {
            version,
            capabilities: &capabilities,
            columns: &columns,
            default_srs: Some(&srs),
        };
        translate(&parse_predicate(text).unwrap(), &ctx)
    }

    #[test]
    fn nine_way_disjunction() {
        let body = run(
            WfsVersion::V1_1_0,
            "(str = 'str' AND short = 1 AND float = 1.2) OR str LIKE 'st%' OR boolean IS NOT NULL OR int > 1 OR int >= 1 or int != 2 or int < 2000000000 or int <= 2000000000 OR str IN ('foo', 'bar')",
        )
        .unwrap();
        assert_eq!(
            body,
            "<Or><Or><Or><Or><And><And><PropertyIsEqualTo><PropertyName>str</PropertyName><Literal>str</Literal></PropertyIsEqualTo><PropertyIsEqualTo><PropertyName>short</PropertyName><Literal>1</Literal></PropertyIsEqualTo></And><PropertyIsEqualTo><PropertyName>float</PropertyName><Literal>1.2</Literal></PropertyIsEqualTo></And><PropertyIsLike wildCard=\"*\" singleChar=\"_\" escapeChar=\"!\" matchCase=\"true\"><PropertyName>str</PropertyName><Literal>st*</Literal></PropertyIsLike></Or><Or><Not><PropertyIsNull><PropertyName>boolean</PropertyName></PropertyIsNull></Not><PropertyIsGreaterThan><PropertyName>int</PropertyName><Literal>1</Literal></PropertyIsGreaterThan></Or></Or><Or><Or><PropertyIsGreaterThanOrEqualTo><PropertyName>int</PropertyName><Literal>1</Literal></PropertyIsGreaterThanOrEqualTo><PropertyIsNotEqualTo><PropertyName>int</PropertyName><Literal>2</Literal></PropertyIsNotEqualTo></Or><Or><PropertyIsLessThan><PropertyName>int</PropertyName><Literal>2000000000</Literal></PropertyIsLessThan><PropertyIsLessThanOrEqualTo><PropertyName>int</PropertyName><Literal>2000000000</Literal></PropertyIsLessThanOrEqualTo></Or></Or></Or><Or><PropertyIsEqualTo><PropertyName>str</PropertyName><Literal>foo</Literal></PropertyIsEqualTo><PropertyIsEqualTo><PropertyName>str</PropertyName><Literal>bar</Literal></PropertyIsEqualTo></Or></Or>"
        );
    }

    #[test]
    fn envelopes_follow_the_srs_argument() {
        let body = run(
            WfsVersion::V1_1_0,
            "ST_Intersects(shape, ST_MakeEnvelope(1.5,48.5,2.5,49.5)) OR \
             ST_Intersects(shape, ST_MakeEnvelope(1.5,48.5,2.5,49.5, 4326)) OR \
             ST_Intersects(shape, ST_MakeEnvelope(1.5,48.5,2.5,49.5, 'EPSG:4326')) OR \
             ST_Intersects(shape, ST_MakeEnvelope(380000,5370000,470000,5490000,32630))",
        )
        .unwrap();
        assert_eq!(
            body,
            "<Or><Or><Intersects><PropertyName>shape</PropertyName><gml:Envelope srsName=\"urn:ogc:def:crs:EPSG::4326\"><gml:lowerCorner>48.5 1.5</gml:lowerCorner><gml:upperCorner>49.5 2.5</gml:upperCorner></gml:Envelope></Intersects><Intersects><PropertyName>shape</PropertyName><gml:Envelope srsName=\"urn:ogc:def:crs:EPSG::4326\"><gml:lowerCorner>48.5 1.5</gml:lowerCorner><gml:upperCorner>49.5 2.5</gml:upperCorner></gml:Envelope></Intersects></Or><Or><Intersects><PropertyName>shape</PropertyName><gml:Envelope srsName=\"EPSG:4326\"><gml:lowerCorner>1.5 48.5</gml:lowerCorner><gml:upperCorner>2.5 49.5</gml:upperCorner></gml:Envelope></Intersects><Intersects><PropertyName>shape</PropertyName><gml:Envelope srsName=\"urn:ogc:def:crs:EPSG::32630\"><gml:lowerCorner>380000 5370000</gml:lowerCorner><gml:upperCorner>470000 5490000</gml:upperCorner></gml:Envelope></Intersects></Or></Or>"
        );
    }

    #[test]
    fn geometry_literals_get_numbered_ids() {
        let body = run(
            WfsVersion::V1_1_0,
            "ST_Intersects(shape, ST_GeomFromText('POLYGON((1.5 48.5,2.5 49.5,2.5 49.5,2.5 48.5,1.5 48.5)))')) OR \
             ST_Intersects(shape, ST_GeomFromText('POLYGON((1.5 48.5,2.5 49.5,2.5 49.5,2.5 48.5,1.5 48.5)))', 4326)) OR \
             ST_Intersects(shape, ST_GeomFromText('POLYGON((1.5 48.5,2.5 49.5,2.5 49.5,2.5 48.5,1.5 48.5)))', 'EPSG:4326'))",
        )
        .unwrap();
        assert_eq!(
            body,
            "<Or><Or><Intersects><PropertyName>shape</PropertyName><gml:Polygon srsName=\"urn:ogc:def:crs:EPSG::4326\" gml:id=\"id1\"><gml:exterior><gml:LinearRing><gml:posList>48.5 1.5 49.5 2.5 49.5 2.5 48.5 2.5 48.5 1.5</gml:posList></gml:LinearRing></gml:exterior></gml:Polygon></Intersects><Intersects><PropertyName>shape</PropertyName><gml:Polygon srsName=\"urn:ogc:def:crs:EPSG::4326\" gml:id=\"id2\"><gml:exterior><gml:LinearRing><gml:posList>48.5 1.5 49.5 2.5 49.5 2.5 48.5 2.5 48.5 1.5</gml:posList></gml:LinearRing></gml:exterior></gml:Polygon></Intersects></Or><Intersects><PropertyName>shape</PropertyName><gml:Polygon srsName=\"EPSG:4326\" gml:id=\"id3\"><gml:exterior><gml:LinearRing><gml:posList>1.5 48.5 2.5 49.5 2.5 49.5 2.5 48.5 1.5 48.5</gml:posList></gml:LinearRing></gml:exterior></gml:Polygon></Intersects></Or>"
        );
    }

    #[test]
    fn distance_operator() {
        let body = run(
            WfsVersion::V1_1_0,
            "ST_DWithin(shape,ST_MakeEnvelope(1.5,48.5,2.5,49.5),5)",
        )
        .unwrap();
        assert_eq!(
            body,
            "<DWithin><PropertyName>shape</PropertyName><gml:Envelope srsName=\"urn:ogc:def:crs:EPSG::4326\"><gml:lowerCorner>48.5 1.5</gml:lowerCorner><gml:upperCorner>49.5 2.5</gml:upperCorner></gml:Envelope><Distance unit=\"m\">5</Distance></DWithin>"
        );
    }

    #[test]
    fn spatial_argument_errors() {
        let cases = [
            ("ST_Intersects(shape)", "Wrong number of arguments for ST_Intersects"),
            ("ST_Intersects(shape, 5)", "Wrong field type for argument 2 of ST_Intersects"),
            ("ST_Intersects(shape, ST_MakeEnvelope(1))", "Wrong number of arguments for ST_MakeEnvelope"),
            ("ST_Intersects(shape, ST_MakeEnvelope(1,1,1,'a'))", "Wrong field type for argument 4 of ST_MakeEnvelope"),
            ("ST_Intersects(shape, ST_MakeEnvelope(1,1,1,1,3.5))", "Wrong field type for argument 5 of ST_MakeEnvelope"),
            ("ST_Intersects(shape, ST_MakeEnvelope(1,1,1,1,'not_a_srs'))", "Wrong value for argument 5 of ST_MakeEnvelope"),
            ("ST_Intersects(shape, ST_MakeEnvelope(1,1,1,1,-5))", "Wrong value for argument 5 of ST_MakeEnvelope"),
            ("ST_Intersects(shape, ST_GeomFromText(1,2,3))", "Wrong number of arguments for ST_GeomFromText"),
            ("ST_Intersects(shape, ST_GeomFromText(1))", "Wrong field type for argument 1 of ST_GeomFromText"),
            ("ST_Intersects(shape, ST_GeomFromText('INVALID_GEOM'))", "Wrong value for argument 1 of ST_GeomFromText"),
            ("ST_Intersects(shape, ST_GeomFromText('POINT(0 0)', 'invalid_srs'))", "Wrong value for argument 2 of ST_GeomFromText"),
            ("ST_DWithin(shape)", "Wrong number of arguments for ST_DWithin"),
            ("ST_DWithin(shape,'a',5)", "Wrong field type for argument 2 of ST_DWithin"),
            ("ST_DWithin(shape,shape,'a')", "Wrong field type for argument 3 of ST_DWithin"),
        ];
        for (text, message) in cases {
            let err = run(WfsVersion::V1_1_0, text).unwrap_err();
            assert_eq!(err.to_string(), message, "{text}");
        }
    }

    #[test]
    fn identity_filters() {
        assert_eq!(
            run(WfsVersion::V1_1_0, "gml_id = 'my_layer.1' OR gml_id = 'my_layer.1'").unwrap(),
            "<GmlObjectId id=\"my_layer.1\"/><GmlObjectId id=\"my_layer.1\"/>"
        );
        assert_eq!(
            run(WfsVersion::V1_0_0, "gml_id = 'my_layer.100'").unwrap(),
            "<FeatureId fid=\"my_layer.100\"/>"
        );
        assert_eq!(
            run(WfsVersion::V2_0_0, "gml_id IN ('a', 'b')").unwrap(),
            "<ResourceId rid=\"a\"/><ResourceId rid=\"b\"/>"
        );
        assert!(matches!(
            run(WfsVersion::V1_1_0, "gml_id = 'x' AND str = 'y'"),
            Err(FilterError::Untranslatable { .. })
        ));
    }

    #[test]
    fn fallback_errors() {
        assert!(matches!(
            run(WfsVersion::V1_1_0, "FID = 1"),
            Err(FilterError::UnknownColumn { .. })
        ));
        assert!(matches!(
            run(WfsVersion::V1_1_0, "not_a_field = 1"),
            Err(FilterError::UnknownColumn { .. })
        ));
        assert!(matches!(
            run(WfsVersion::V1_1_0, "CAST(str AS integer) = 1"),
            Err(FilterError::Untranslatable { .. })
        ));

        let schema = schema();
        let columns = LayerColumns::new(&schema);
        let capabilities = FilterCapabilities {
            comparison_operators: Some(["EqualTo".to_string()].into_iter().collect()),
            ..FilterCapabilities::default()
        };
        let ctx = TranslateContext {
            version: WfsVersion::V1_1_0,
            capabilities: &capabilities,
            columns: &columns,
            default_srs: None,
        };
        let err = translate(&parse_predicate("str LIKE 'a%'").unwrap(), &ctx).unwrap_err();
        assert_eq!(
            err,
            FilterError::UnsupportedFilterOperator {
                operator: "PropertyIsLike".into()
            }
        );
    }

    #[test]
    fn mirrored_literal_comparison_in_fes20() {
        assert_eq!(
            run(WfsVersion::V2_0_0, "1 < int").unwrap(),
            "<PropertyIsGreaterThan><ValueReference>int</ValueReference><Literal>1</Literal></PropertyIsGreaterThan>"
        );
    }

    #[test]
    fn documents_and_bbox() {
        assert_eq!(
            filter_document(FilterDialect::Fes20, "<X/>", &[("foo".into(), "http://foo".into())]),
            "<Filter xmlns=\"http://www.opengis.net/fes/2.0\" xmlns:foo=\"http://foo\" xmlns:gml=\"http://www.opengis.net/gml/3.2\"><X/></Filter>"
        );
        let srs = Srs::parse("urn:ogc:def:crs:EPSG::4326");
        assert_eq!(
            bbox_filter(FilterDialect::Fes11, "shape", &Extent::new(1.0, 48.0, 3.0, 50.0), Some(&srs)),
            "<BBOX><PropertyName>shape</PropertyName><gml:Box><gml:coordinates>48.0000000000000000,1.0000000000000000 50.0000000000000000,3.0000000000000000</gml:coordinates></gml:Box></BBOX>"
        );
    }
}
