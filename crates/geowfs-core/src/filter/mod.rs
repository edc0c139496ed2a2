//! Attribute predicates.
//!
//! SQL text is parsed once into the small [`Expr`] tree below ([`sql`]), which is then either
//! rendered into an OGC Filter / FES document for the server ([`translate`]) or evaluated
//! against decoded features when the server cannot be asked ([`eval`]).

pub mod eval;
pub mod sql;
pub mod translate;

use std::fmt;

pub use eval::{EvalValue, evaluate, evaluate_value};
pub use sql::{
    DeleteStatement, JoinClause, OrderItem, SelectItem, SelectStatement, SqlStatement, TableRef,
    parse_predicate, parse_statement,
};
pub use translate::{
    ColumnKind, ColumnResolver, LayerColumns, ResolvedColumn, TranslateContext, bbox_filter,
    filter_document, identity_element, translate,
};

/// A constant in a predicate. Numbers keep their source text so they are sent unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(String),
    Text(String),
}

impl Literal {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(text) => text.parse().ok(),
            _ => None,
        }
    }

    /// Whether the literal is a number without fractional part or exponent.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Number(text) if text.trim_start_matches('-').chars().all(|c| c.is_ascii_digit()))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::Number(text) => f.write_str(text),
            Self::Text(text) => write!(f, "'{}'", text.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Operator name as advertised in filter capabilities.
    #[must_use]
    pub fn capability_name(self) -> &'static str {
        match self {
            Self::Eq => "EqualTo",
            Self::Ne => "NotEqualTo",
            Self::Lt => "LessThan",
            Self::Le => "LessThanOrEqualTo",
            Self::Gt => "GreaterThan",
            Self::Ge => "GreaterThanOrEqualTo",
        }
    }

    /// The operator with its operands exchanged (`1 < x` is `x > 1`).
    #[must_use]
    pub fn mirrored(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }
}

/// A possibly table-qualified column name, as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Splits a quoted `"table.column"` identifier into its parts.
    #[must_use]
    pub fn split_dotted(&self) -> Option<(String, String)> {
        if let Some(table) = &self.table {
            return Some((table.clone(), self.name.clone()));
        }
        self.name
            .split_once('.')
            .map(|(table, name)| (table.to_string(), name.to_string()))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{table}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Target of a `CAST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    Integer,
    BigInt,
    Real,
    String,
}

impl fmt::Display for CastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Real => "FLOAT",
            Self::String => "CHARACTER",
        })
    }
}

/// Predicate tree. `And`/`Or` are n-ary: nested chains of the same connective are flattened.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Literal),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        case_insensitive: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        target: CastType,
    },
}

impl Expr {
    #[must_use]
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(ColumnRef::new(name))
    }

    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Literal(Literal::Text(value.into()))
    }

    #[must_use]
    pub fn number(value: impl fmt::Display) -> Self {
        Self::Literal(Literal::Number(value.to_string()))
    }

    #[must_use]
    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Self::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Conjunction of two predicates, flattening existing conjunctions.
    #[must_use]
    pub fn and(left: Expr, right: Expr) -> Self {
        let mut items = Vec::new();
        for side in [left, right] {
            match side {
                Self::And(inner) => items.extend(inner),
                other => items.push(other),
            }
        }
        Self::And(items)
    }

    /// Calls `f` on every column referenced by the predicate.
    pub fn visit_columns(&self, f: &mut impl FnMut(&ColumnRef)) {
        match self {
            Self::Column(column) => f(column),
            Self::Literal(_) => {},
            Self::Compare { left, right, .. } => {
                left.visit_columns(f);
                right.visit_columns(f);
            },
            Self::Like { expr, pattern, .. } => {
                expr.visit_columns(f);
                pattern.visit_columns(f);
            },
            Self::IsNull { expr, .. } | Self::Not(expr) | Self::Cast { expr, .. } => {
                expr.visit_columns(f);
            },
            Self::InList { expr, list, .. } => {
                expr.visit_columns(f);
                list.iter().for_each(|e| e.visit_columns(f));
            },
            Self::Between {
                expr, low, high, ..
            } => {
                expr.visit_columns(f);
                low.visit_columns(f);
                high.visit_columns(f);
            },
            Self::And(items) | Self::Or(items) => items.iter().for_each(|e| e.visit_columns(f)),
            Self::Function { args, .. } => args.iter().for_each(|e| e.visit_columns(f)),
        }
    }
}

fn join_sql(items: &[Expr], separator: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(column) => write!(f, "{column}"),
            Self::Literal(literal) => write!(f, "{literal}"),
            Self::Compare { op, left, right } => write!(f, "{left} {} {right}", op.sql()),
            Self::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let keyword = if *case_insensitive { "ILIKE" } else { "LIKE" };
                write!(f, "{expr} {not}{keyword} {pattern}")
            },
            Self::IsNull { expr, negated } => {
                write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
            },
            Self::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "{expr} {}IN (", if *negated { "NOT " } else { "" })?;
                join_sql(list, ", ", f)?;
                f.write_str(")")
            },
            Self::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{expr} {}BETWEEN {low} AND {high}",
                if *negated { "NOT " } else { "" }
            ),
            Self::And(items) => {
                f.write_str("(")?;
                join_sql(items, " AND ", f)?;
                f.write_str(")")
            },
            Self::Or(items) => {
                f.write_str("(")?;
                join_sql(items, " OR ", f)?;
                f.write_str(")")
            },
            Self::Not(expr) => write!(f, "NOT ({expr})"),
            Self::Function { name, args } => {
                write!(f, "{name}(")?;
                join_sql(args, ", ", f)?;
                f.write_str(")")
            },
            Self::Cast { expr, target } => write!(f, "CAST({expr} AS {target})"),
        }
    }
}
