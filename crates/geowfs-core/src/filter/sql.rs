//! SQL front end.
//!
//! Predicates and SELECT statements go through `sqlparser`; the resulting AST is narrowed to
//! the subset a WFS request can carry. DELETE is recognised by hand because only its layer
//! name and WHERE text matter.

use sqlparser::ast::{
    BinaryOperator, Expr as SqlExpr, FunctionArg, FunctionArgExpr, FunctionArguments,
    GroupByExpr, JoinConstraint, JoinOperator, ObjectName, OrderByKind, Query,
    SelectItem as SqlSelectItem, SelectItemQualifiedWildcardKind, SetExpr, Statement,
    TableFactor, UnaryOperator, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;

use super::{CastType, ColumnRef, CompareOp, Expr, Literal};
use crate::error::{FilterError, QueryError, Result};

fn parse_error(err: ParserError) -> FilterError {
    let message = match err {
        ParserError::ParserError(message) | ParserError::TokenizerError(message) => message,
        ParserError::RecursionLimitExceeded => "recursion limit exceeded".to_string(),
    };
    FilterError::Parse { message }
}

/// Parses a WHERE-style predicate.
///
/// # Errors
///
/// Returns [`FilterError::Parse`] when the text is not a single supported expression.
pub fn parse_predicate(text: &str) -> std::result::Result<Expr, FilterError> {
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(text)
        .map_err(parse_error)?;
    let expr = parser.parse_expr().map_err(parse_error)?;
    let next = parser.peek_token();
    if next.token != Token::EOF {
        return Err(FilterError::Parse {
            message: format!("unexpected {} after expression", next.token),
        });
    }
    convert_expr(&expr)
}

fn unsupported(expr: &SqlExpr) -> FilterError {
    FilterError::Parse {
        message: format!("unsupported expression {expr}"),
    }
}

fn convert_literal(value: &Value) -> Option<Literal> {
    match value {
        Value::Number(raw, _) => Some(Literal::Number(raw.to_string())),
        Value::SingleQuotedString(text) => Some(Literal::Text(text.clone())),
        Value::Boolean(b) => Some(Literal::Boolean(*b)),
        Value::Null => Some(Literal::Null),
        _ => None,
    }
}

fn compare_op(op: &BinaryOperator) -> Option<CompareOp> {
    Some(match op {
        BinaryOperator::Eq => CompareOp::Eq,
        BinaryOperator::NotEq => CompareOp::Ne,
        BinaryOperator::Lt => CompareOp::Lt,
        BinaryOperator::LtEq => CompareOp::Le,
        BinaryOperator::Gt => CompareOp::Gt,
        BinaryOperator::GtEq => CompareOp::Ge,
        _ => return None,
    })
}

fn cast_type(data_type: &str) -> Option<CastType> {
    let data_type = data_type.to_ascii_uppercase();
    if data_type.starts_with("BIGINT") {
        Some(CastType::BigInt)
    } else if data_type.starts_with("INT") {
        Some(CastType::Integer)
    } else if ["FLOAT", "REAL", "DOUBLE", "NUMERIC", "DECIMAL"]
        .iter()
        .any(|p| data_type.starts_with(p))
    {
        Some(CastType::Real)
    } else if ["VARCHAR", "TEXT", "CHAR", "STRING"]
        .iter()
        .any(|p| data_type.starts_with(p))
    {
        Some(CastType::String)
    } else {
        None
    }
}

fn object_name_text(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|part| {
            part.as_ident()
                .map_or_else(|| part.to_string(), |ident| ident.value.clone())
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn push_flattened(items: &mut Vec<Expr>, expr: Expr, and: bool) {
    match (expr, and) {
        (Expr::And(inner), true) | (Expr::Or(inner), false) => items.extend(inner),
        (other, _) => items.push(other),
    }
}

fn convert_expr(expr: &SqlExpr) -> std::result::Result<Expr, FilterError> {
    let converted = match expr {
        SqlExpr::Identifier(ident) => Expr::Column(ColumnRef::new(ident.value.clone())),
        SqlExpr::CompoundIdentifier(parts) => match parts.as_slice() {
            [table, column] => Expr::Column(ColumnRef::qualified(
                table.value.clone(),
                column.value.clone(),
            )),
            _ => Expr::Column(ColumnRef::new(
                parts
                    .iter()
                    .map(|p| p.value.as_str())
                    .collect::<Vec<_>>()
                    .join("."),
            )),
        },
        SqlExpr::Value(value) => {
            Expr::Literal(convert_literal(&value.value).ok_or_else(|| unsupported(expr))?)
        },
        SqlExpr::Nested(inner) => convert_expr(inner)?,
        SqlExpr::BinaryOp { left, op, right } => {
            let left = convert_expr(left)?;
            let right = convert_expr(right)?;
            match op {
                BinaryOperator::And | BinaryOperator::Or => {
                    let and = matches!(op, BinaryOperator::And);
                    let mut items = Vec::new();
                    push_flattened(&mut items, left, and);
                    push_flattened(&mut items, right, and);
                    if and { Expr::And(items) } else { Expr::Or(items) }
                },
                other => {
                    let op = compare_op(other).ok_or_else(|| unsupported(expr))?;
                    Expr::compare(op, left, right)
                },
            }
        },
        SqlExpr::UnaryOp { op, expr: inner } => match op {
            UnaryOperator::Not => Expr::Not(Box::new(convert_expr(inner)?)),
            UnaryOperator::Plus => convert_expr(inner)?,
            UnaryOperator::Minus => match convert_expr(inner)? {
                Expr::Literal(Literal::Number(text)) => match text.strip_prefix('-') {
                    Some(positive) => Expr::Literal(Literal::Number(positive.to_string())),
                    None => Expr::Literal(Literal::Number(format!("-{text}"))),
                },
                _ => return Err(unsupported(expr)),
            },
            _ => return Err(unsupported(expr)),
        },
        SqlExpr::IsNull(inner) => Expr::IsNull {
            expr: Box::new(convert_expr(inner)?),
            negated: false,
        },
        SqlExpr::IsNotNull(inner) => Expr::IsNull {
            expr: Box::new(convert_expr(inner)?),
            negated: true,
        },
        SqlExpr::Like {
            negated,
            expr: inner,
            pattern,
            ..
        } => Expr::Like {
            expr: Box::new(convert_expr(inner)?),
            pattern: Box::new(convert_expr(pattern)?),
            negated: *negated,
            case_insensitive: false,
        },
        SqlExpr::ILike {
            negated,
            expr: inner,
            pattern,
            ..
        } => Expr::Like {
            expr: Box::new(convert_expr(inner)?),
            pattern: Box::new(convert_expr(pattern)?),
            negated: *negated,
            case_insensitive: true,
        },
        SqlExpr::InList {
            expr: inner,
            list,
            negated,
        } => Expr::InList {
            expr: Box::new(convert_expr(inner)?),
            list: list.iter().map(convert_expr).collect::<std::result::Result<_, _>>()?,
            negated: *negated,
        },
        SqlExpr::Between {
            expr: inner,
            negated,
            low,
            high,
        } => Expr::Between {
            expr: Box::new(convert_expr(inner)?),
            low: Box::new(convert_expr(low)?),
            high: Box::new(convert_expr(high)?),
            negated: *negated,
        },
        SqlExpr::Function(function) => {
            let name = function
                .name
                .0
                .last()
                .and_then(|part| part.as_ident())
                .map(|ident| ident.value.clone())
                .ok_or_else(|| unsupported(expr))?;
            let args = match &function.args {
                FunctionArguments::None => Vec::new(),
                FunctionArguments::List(list) => list
                    .args
                    .iter()
                    .map(|arg| match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => convert_expr(e),
                        _ => Err(unsupported(expr)),
                    })
                    .collect::<std::result::Result<_, _>>()?,
                FunctionArguments::Subquery(_) => return Err(unsupported(expr)),
            };
            Expr::Function { name, args }
        },
        SqlExpr::Cast {
            expr: inner,
            data_type,
            ..
        } => Expr::Cast {
            expr: Box::new(convert_expr(inner)?),
            target: cast_type(&data_type.to_string()).ok_or_else(|| unsupported(expr))?,
        },
        _ => return Err(unsupported(expr)),
    };
    Ok(converted)
}

/// A table in FROM or JOIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// Name used to qualify columns: the alias when present.
    #[must_use]
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Whether `qualifier` designates this table.
    #[must_use]
    pub fn matches(&self, qualifier: &str) -> bool {
        qualifier == self.reference_name() || qualifier == self.name
    }
}

/// `JOIN table ON condition`. `on` is `None` for any other join form.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: TableRef,
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Wildcard,
    /// `table.*`
    QualifiedWildcard(String),
    Expr {
        expr: Expr,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub column: ColumnRef,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<JoinClause>,
    pub selection: Option<Expr>,
    pub order_by: Vec<OrderItem>,
}

/// `DELETE FROM layer [WHERE condition]`, with the condition kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStatement {
    pub layer: String,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlStatement {
    Select(SelectStatement),
    Delete(DeleteStatement),
}

fn unsupported_statement(sql: &str) -> QueryError {
    QueryError::UnsupportedStatement {
        statement: sql.to_string(),
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let rest = &text[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword)
        && rest.chars().next().is_none_or(char::is_whitespace))
    .then_some(rest)
}

fn parse_delete(sql: &str) -> Option<Result<DeleteStatement>> {
    let rest = strip_keyword(sql, "DELETE")?;
    let Some(rest) = strip_keyword(rest.trim_start(), "FROM") else {
        return Some(Err(unsupported_statement(sql).into()));
    };
    let rest = rest.trim_start();
    let (layer, rest) = if let Some(quoted) = rest.strip_prefix('"') {
        match quoted.split_once('"') {
            Some((layer, rest)) => (layer, rest),
            None => return Some(Err(unsupported_statement(sql).into())),
        }
    } else {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest.split_at(end)
    };
    if layer.is_empty() {
        return Some(Err(unsupported_statement(sql).into()));
    }
    let condition = strip_keyword(rest.trim_start(), "WHERE").map(|c| c.trim().to_string());
    Some(Ok(DeleteStatement {
        layer: layer.to_string(),
        condition,
    }))
}

fn table_ref(factor: &TableFactor, sql: &str) -> Result<TableRef> {
    let TableFactor::Table { name, alias, .. } = factor else {
        return Err(unsupported_statement(sql).into());
    };
    Ok(TableRef {
        name: object_name_text(name),
        alias: alias.as_ref().map(|a| a.name.value.clone()),
    })
}

fn convert_select(query: &Query, sql: &str) -> Result<SelectStatement> {
    if query.with.is_some() {
        return Err(unsupported_statement(sql).into());
    }
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(unsupported_statement(sql).into());
    };
    match &select.group_by {
        GroupByExpr::Expressions(exprs, _) if exprs.is_empty() => {},
        _ => return Err(unsupported_statement(sql).into()),
    }
    if select.having.is_some() || select.from.len() != 1 {
        return Err(unsupported_statement(sql).into());
    }

    let from = &select.from[0];
    let table = table_ref(&from.relation, sql)?;
    let joins = from
        .joins
        .iter()
        .map(|join| {
            let on = match &join.join_operator {
                JoinOperator::Join(JoinConstraint::On(on))
                | JoinOperator::Inner(JoinConstraint::On(on)) => Some(convert_expr(on)?),
                _ => None,
            };
            Ok(JoinClause {
                table: table_ref(&join.relation, sql)?,
                on,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let projection = select
        .projection
        .iter()
        .map(|item| {
            Ok(match item {
                SqlSelectItem::Wildcard(_) => SelectItem::Wildcard,
                SqlSelectItem::QualifiedWildcard(SelectItemQualifiedWildcardKind::ObjectName(name), _) => {
                    SelectItem::QualifiedWildcard(object_name_text(name))
                },
                SqlSelectItem::QualifiedWildcard(..) => {
                    return Err(QueryError::UnsupportedColumnExpression.into());
                },
                SqlSelectItem::UnnamedExpr(expr) => SelectItem::Expr {
                    expr: convert_expr(expr)?,
                    alias: None,
                },
                SqlSelectItem::ExprWithAlias { expr, alias } => SelectItem::Expr {
                    expr: convert_expr(expr)?,
                    alias: Some(alias.value.clone()),
                },
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let selection = select.selection.as_ref().map(convert_expr).transpose()?;

    let mut order_by = Vec::new();
    if let Some(clause) = &query.order_by {
        let OrderByKind::Expressions(items) = &clause.kind else {
            return Err(unsupported_statement(sql).into());
        };
        for item in items {
            let Expr::Column(column) = convert_expr(&item.expr)? else {
                return Err(unsupported_statement(sql).into());
            };
            order_by.push(OrderItem {
                column,
                ascending: item.options.asc.unwrap_or(true),
            });
        }
    }

    Ok(SelectStatement {
        distinct: select.distinct.is_some(),
        projection,
        from: table,
        joins,
        selection,
        order_by,
    })
}

/// Parses a statement handed to `execute_sql`.
///
/// # Errors
///
/// Returns [`FilterError::Parse`] for syntax errors and
/// [`QueryError::UnsupportedStatement`] for statements outside SELECT/DELETE.
pub fn parse_statement(sql: &str) -> Result<SqlStatement> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if let Some(delete) = parse_delete(trimmed) {
        return delete.map(SqlStatement::Delete);
    }
    let statements = Parser::parse_sql(&GenericDialect {}, trimmed).map_err(parse_error)?;
    match statements.as_slice() {
        [Statement::Query(query)] => Ok(SqlStatement::Select(convert_select(query, trimmed)?)),
        _ => Err(unsupported_statement(trimmed).into()),
    }
}
