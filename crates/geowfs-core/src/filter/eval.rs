//! Client-side predicate evaluation.
//!
//! Used when a predicate cannot be sent to the server. Comparisons follow SQL three-valued
//! logic: anything involving NULL is unknown, and unknown rows are rejected.

use std::cmp::Ordering;

use geo_types::{Coord, Geometry, Rect};

use super::{CastType, ColumnRef, CompareOp, Expr, Literal};
use crate::error::FilterError;
use crate::feature::{Feature, FieldValue};
use crate::geometry::{envelope, parse_wkt};

/// Value of a sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Geometry(Geometry<f64>),
}

impl EvalValue {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Real(r) => Some(*r),
            Self::Boolean(b) => Some(f64::from(u8::from(*b))),
            Self::Text(t) => t.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_text(&self) -> Option<String> {
        match self {
            Self::Null | Self::Geometry(_) => None,
            Self::Boolean(b) => Some(b.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Real(r) => Some(r.to_string()),
            Self::Text(t) => Some(t.clone()),
        }
    }

    /// Converts the value into a feature field value; geometries have no field form.
    #[must_use]
    pub fn into_field_value(self) -> FieldValue {
        match self {
            Self::Null | Self::Geometry(_) => FieldValue::Null,
            Self::Boolean(b) => FieldValue::Boolean(b),
            Self::Integer(i) => FieldValue::Integer(i),
            Self::Real(r) => FieldValue::Real(r),
            Self::Text(t) => FieldValue::String(t),
        }
    }
}

impl From<&FieldValue> for EvalValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => Self::Null,
            FieldValue::String(s) => Self::Text(s.clone()),
            FieldValue::Integer(i) => Self::Integer(*i),
            FieldValue::Real(r) => Self::Real(*r),
            FieldValue::Boolean(b) => Self::Boolean(*b),
        }
    }
}

fn not_evaluable(expr: &Expr) -> FilterError {
    FilterError::Untranslatable {
        expression: expr.to_string(),
    }
}

fn column_value(column: &ColumnRef, feature: &Feature) -> Result<EvalValue, FilterError> {
    let qualified = column.to_string();
    for name in [qualified.as_str(), column.name.as_str()] {
        if let Some(value) = feature.field(name) {
            return Ok(value.into());
        }
        if let Some(geometry) = feature.geometry_named(name) {
            return Ok(EvalValue::Geometry(geometry.clone()));
        }
    }
    if column.name.eq_ignore_ascii_case("FID") {
        return Ok(feature.fid.map_or(EvalValue::Null, EvalValue::Integer));
    }
    Err(FilterError::UnknownColumn { column: qualified })
}

/// Leading integer of a string, as C `atoi` reads it.
fn leading_integer(text: &str) -> i64 {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .take_while(|(idx, c)| c.is_ascii_digit() || (*idx == 0 && (*c == '-' || *c == '+')))
        .map(|(idx, c)| idx + c.len_utf8())
        .last()
        .unwrap_or(0);
    text[..end].parse().unwrap_or(0)
}

#[allow(clippy::cast_possible_truncation)]
fn cast(value: EvalValue, target: CastType) -> EvalValue {
    match (value, target) {
        (EvalValue::Null, _) => EvalValue::Null,
        (value, CastType::String) => value.to_text().map_or(EvalValue::Null, EvalValue::Text),
        (EvalValue::Text(text), CastType::Integer | CastType::BigInt) => {
            EvalValue::Integer(text.trim().parse().unwrap_or_else(|_| leading_integer(&text)))
        },
        (EvalValue::Real(r), CastType::Integer | CastType::BigInt) => EvalValue::Integer(r as i64),
        (EvalValue::Text(text), CastType::Real) => {
            EvalValue::Real(text.trim().parse().unwrap_or(0.0))
        },
        (value, CastType::Real) => value.as_f64().map_or(EvalValue::Null, EvalValue::Real),
        (EvalValue::Boolean(b), _) => EvalValue::Integer(i64::from(b)),
        (value @ EvalValue::Integer(_), _) => value,
        (EvalValue::Geometry(_), _) => EvalValue::Null,
    }
}

fn literal_value(literal: &Literal) -> EvalValue {
    match literal {
        Literal::Null => EvalValue::Null,
        Literal::Boolean(b) => EvalValue::Boolean(*b),
        Literal::Number(text) => text.parse().map_or_else(
            |_| text.parse().map_or(EvalValue::Null, EvalValue::Real),
            EvalValue::Integer,
        ),
        Literal::Text(text) => EvalValue::Text(text.clone()),
    }
}

fn geometry_function(name: &str, args: &[EvalValue]) -> Option<EvalValue> {
    match name.to_ascii_uppercase().as_str() {
        "ST_MAKEENVELOPE" if args.len() >= 4 => {
            let min = Coord {
                x: args[0].as_f64()?,
                y: args[1].as_f64()?,
            };
            let max = Coord {
                x: args[2].as_f64()?,
                y: args[3].as_f64()?,
            };
            Some(EvalValue::Geometry(Geometry::Polygon(Rect::new(min, max).to_polygon())))
        },
        "ST_GEOMFROMTEXT" => match args.first()? {
            EvalValue::Text(wkt) => parse_wkt(wkt).ok().map(EvalValue::Geometry),
            _ => None,
        },
        _ => None,
    }
}

/// Computes the value of an expression for one feature.
///
/// # Errors
///
/// Returns [`FilterError::UnknownColumn`] for columns the feature does not have and
/// [`FilterError::Untranslatable`] for constructs that cannot be evaluated locally.
pub fn evaluate_value(expr: &Expr, feature: &Feature) -> Result<EvalValue, FilterError> {
    match expr {
        Expr::Column(column) => column_value(column, feature),
        Expr::Literal(literal) => Ok(literal_value(literal)),
        Expr::Cast { expr: inner, target } => Ok(cast(evaluate_value(inner, feature)?, *target)),
        Expr::Function { name, args } if !name.to_ascii_uppercase().starts_with("ST_") || args.is_empty() => {
            Err(not_evaluable(expr))
        },
        Expr::Function { name, args } => {
            let values = args
                .iter()
                .map(|arg| evaluate_value(arg, feature))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(value) = geometry_function(name, &values) {
                return Ok(value);
            }
            Ok(truth(expr, feature)?.map_or(EvalValue::Null, EvalValue::Boolean))
        },
        _ => Ok(truth(expr, feature)?.map_or(EvalValue::Null, EvalValue::Boolean)),
    }
}

fn compare_values(left: &EvalValue, right: &EvalValue) -> Option<Ordering> {
    match (left, right) {
        (EvalValue::Null, _) | (_, EvalValue::Null) => None,
        (EvalValue::Geometry(_), _) | (_, EvalValue::Geometry(_)) => None,
        (EvalValue::Integer(a), EvalValue::Integer(b)) => Some(a.cmp(b)),
        (EvalValue::Text(a), EvalValue::Text(b)) => Some(a.cmp(b)),
        (EvalValue::Text(a), other) | (other, EvalValue::Text(a))
            if a.trim().parse::<f64>().is_err() =>
        {
            let b = other.to_text()?;
            let ordering = a.as_str().cmp(b.as_str());
            Some(if matches!(left, EvalValue::Text(_)) { ordering } else { ordering.reverse() })
        },
        (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn op_holds(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

fn like_match(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => (0..=text.len()).any(|skip| like_match(&text[skip..], rest)),
        Some(('_', rest)) => !text.is_empty() && like_match(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && like_match(&text[1..], rest),
    }
}

fn envelopes_intersect(a: &EvalValue, b: &EvalValue) -> Option<bool> {
    match (a, b) {
        (EvalValue::Geometry(a), EvalValue::Geometry(b)) => {
            Some(envelope(a)?.intersects(&envelope(b)?))
        },
        _ => None,
    }
}

fn truth(expr: &Expr, feature: &Feature) -> Result<Option<bool>, FilterError> {
    Ok(match expr {
        Expr::And(items) => {
            let mut result = Some(true);
            for item in items {
                match truth(item, feature)? {
                    Some(false) => return Ok(Some(false)),
                    None => result = None,
                    Some(true) => {},
                }
            }
            result
        },
        Expr::Or(items) => {
            let mut result = Some(false);
            for item in items {
                match truth(item, feature)? {
                    Some(true) => return Ok(Some(true)),
                    None => result = None,
                    Some(false) => {},
                }
            }
            result
        },
        Expr::Not(inner) => truth(inner, feature)?.map(|b| !b),
        Expr::Compare { op, left, right } => {
            let left = evaluate_value(left, feature)?;
            let right = evaluate_value(right, feature)?;
            compare_values(&left, &right).map(|ordering| op_holds(*op, ordering))
        },
        Expr::Like {
            expr: target,
            pattern,
            negated,
            case_insensitive,
        } => {
            let text = evaluate_value(target, feature)?.to_text();
            let pattern = evaluate_value(pattern, feature)?.to_text();
            match (text, pattern) {
                (Some(text), Some(pattern)) => {
                    let (text, pattern) = if *case_insensitive {
                        (text.to_lowercase(), pattern.to_lowercase())
                    } else {
                        (text, pattern)
                    };
                    let text: Vec<char> = text.chars().collect();
                    let pattern: Vec<char> = pattern.chars().collect();
                    Some(like_match(&text, &pattern) != *negated)
                },
                _ => None,
            }
        },
        Expr::IsNull {
            expr: target,
            negated,
        } => Some((evaluate_value(target, feature)? == EvalValue::Null) != *negated),
        Expr::InList {
            expr: target,
            list,
            negated,
        } => {
            let value = evaluate_value(target, feature)?;
            let mut result = Some(false);
            for item in list {
                match compare_values(&value, &evaluate_value(item, feature)?) {
                    Some(Ordering::Equal) => {
                        result = Some(true);
                        break;
                    },
                    None => result = None,
                    Some(_) => {},
                }
            }
            result.map(|found| found != *negated)
        },
        Expr::Between {
            expr: target,
            low,
            high,
            negated,
        } => {
            let value = evaluate_value(target, feature)?;
            let low = compare_values(&value, &evaluate_value(low, feature)?);
            let high = compare_values(&value, &evaluate_value(high, feature)?);
            match (low, high) {
                (Some(low), Some(high)) => {
                    Some((low != Ordering::Less && high != Ordering::Greater) != *negated)
                },
                _ => None,
            }
        },
        Expr::Function { name, args } if name.eq_ignore_ascii_case("ST_Intersects") && args.len() == 2 => {
            let a = evaluate_value(&args[0], feature)?;
            let b = evaluate_value(&args[1], feature)?;
            if a == EvalValue::Null || b == EvalValue::Null {
                None
            } else {
                Some(envelopes_intersect(&a, &b).ok_or_else(|| not_evaluable(expr))?)
            }
        },
        Expr::Function { .. } => return Err(not_evaluable(expr)),
        Expr::Column(_) | Expr::Literal(_) | Expr::Cast { .. } => {
            match evaluate_value(expr, feature)? {
                EvalValue::Null => None,
                EvalValue::Boolean(b) => Some(b),
                EvalValue::Integer(i) => Some(i != 0),
                EvalValue::Real(r) => Some(r != 0.0),
                _ => return Err(not_evaluable(expr)),
            }
        },
    })
}

/// Whether `feature` satisfies the predicate. Unknown results count as not satisfied.
///
/// # Errors
///
/// Same as [`evaluate_value`].
pub fn evaluate(expr: &Expr, feature: &Feature) -> Result<bool, FilterError> {
    Ok(truth(expr, feature)?.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse_predicate;
    use geo_types::Point;

    fn feature() -> Feature {
        let mut feature = Feature::new()
            .with_field("gml_id", "my_layer.1")
            .with_field("str", "str")
            .with_field("int", 123_456_789i64)
            .with_field("float", 1.2)
            .with_field("empty", FieldValue::Null)
            .with_geometry("shape", Geometry::Point(Point::new(2.0, 49.0)));
        feature.fid = Some(1);
        feature
    }

    fn check(text: &str) -> bool {
        evaluate(&parse_predicate(text).unwrap(), &feature()).unwrap()
    }

    #[test]
    fn comparisons_and_connectives() {
        assert!(check("str = 'str' AND int > 1"));
        assert!(check("float = 1.2 OR str = 'other'"));
        assert!(!check("NOT (int >= 123456789)"));
        assert!(check("str IN ('foo', 'str')"));
        assert!(check("int BETWEEN 1 AND 2000000000"));
        assert!(check("FID = 1"));
    }

    #[test]
    fn null_semantics() {
        assert!(check("empty IS NULL"));
        assert!(!check("empty = 'x'"));
        assert!(!check("NOT (empty = 'x')"));
        assert!(check("empty = 'x' OR str = 'str'"));
    }

    #[test]
    fn like_patterns() {
        assert!(check("str LIKE 'st%'"));
        assert!(check("str LIKE 's_r'"));
        assert!(!check("str LIKE 'ST%'"));
        assert!(check("str ILIKE 'ST%'"));
        assert!(check("str NOT LIKE 'x%'"));
    }

    #[test]
    fn casts() {
        let feature = Feature::new().with_field("str", "123.4");
        let value = |text: &str| evaluate_value(&parse_predicate(text).unwrap(), &feature).unwrap();
        assert_eq!(value("CAST(str AS integer)"), EvalValue::Integer(123));
        assert_eq!(value("CAST(str AS float)"), EvalValue::Real(123.4));
        assert_eq!(value("CAST(str AS varchar)"), EvalValue::Text("123.4".into()));
    }

    #[test]
    fn envelope_intersection() {
        assert!(check("ST_Intersects(shape, ST_MakeEnvelope(1, 48, 3, 50))"));
        assert!(!check("ST_Intersects(shape, ST_MakeEnvelope(10, 10, 11, 11))"));
    }

    #[test]
    fn unknown_columns_fail() {
        let err = evaluate(&parse_predicate("missing = 1").unwrap(), &feature()).unwrap_err();
        assert!(matches!(err, FilterError::UnknownColumn { .. }));
    }
}
