use chrono::NaiveDateTime;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectAvailability {
        diner_ids: Vec<DinerId>,
        reservation_time: NaiveDateTime,
    },
    /// `reservations` goes through the plain writer, `bookings` through the
    /// checked path.
    InsertReservation {
        table_id: TableId,
        restaurant_id: RestaurantId,
        reservation_time: NaiveDateTime,
        /// Raw comma-delimited list; the engine validates it.
        diner_ids: String,
        checked: bool,
    },
    DeleteReservation {
        id: ReservationId,
    },
}

const INSERT_COLUMNS: [&str; 4] = ["table_id", "restaurant_id", "reservation_time", "diner_ids"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let checked = match table.as_str() {
        "reservations" => false,
        "bookings" => true,
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let values = extract_insert_values(insert)?;
    if values.len() != INSERT_COLUMNS.len() {
        return Err(SqlError::WrongArity(INSERT_COLUMNS.len(), values.len()));
    }

    // With a column list, values follow it; without one, the canonical order.
    let mut slots: [Option<&Expr>; 4] = [None; 4];
    if insert.columns.is_empty() {
        for (slot, value) in slots.iter_mut().zip(&values) {
            *slot = Some(value);
        }
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(insert.columns.len(), values.len()));
        }
        for (col, value) in insert.columns.iter().zip(&values) {
            let name = col.value.to_lowercase();
            let idx = INSERT_COLUMNS
                .iter()
                .position(|c| *c == name)
                .ok_or_else(|| SqlError::UnknownColumn(name.clone()))?;
            slots[idx] = Some(value);
        }
    }
    let slot = |i: usize| slots[i].ok_or(SqlError::MissingColumn(INSERT_COLUMNS[i]));

    Ok(Command::InsertReservation {
        table_id: parse_i64_expr(slot(0)?)?,
        restaurant_id: parse_i64_expr(slot(1)?)?,
        reservation_time: parse_time_expr(slot(2)?)?,
        diner_ids: parse_text_expr(slot(3)?)?,
        checked,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" && table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::DeleteReservation { id })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    if table != "availability" {
        return Err(SqlError::UnknownTable(table));
    }
    // Rows always carry every availability column.
    match select.projection.as_slice() {
        [ast::SelectItem::Wildcard(_)] => {}
        _ => return Err(SqlError::Unsupported("column list on availability, use SELECT *".into())),
    }

    let (mut diner_ids, mut reservation_time) = (None, None);
    if let Some(selection) = &select.selection {
        extract_availability_filters(selection, &mut diner_ids, &mut reservation_time)?;
    }

    Ok(Command::SelectAvailability {
        diner_ids: diner_ids.ok_or(SqlError::MissingFilter("diner_ids"))?,
        reservation_time: reservation_time.ok_or(SqlError::MissingFilter("reservation_time"))?,
    })
}

/// Accepts `diner_ids = '1,2,3'`, `diner_ids IN (1, 2, 3)` and
/// `reservation_time = '...'`, joined by AND. Any other predicate is an error
/// rather than being dropped.
fn extract_availability_filters(
    expr: &Expr,
    diner_ids: &mut Option<Vec<DinerId>>,
    reservation_time: &mut Option<NaiveDateTime>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, diner_ids, reservation_time)?;
                extract_availability_filters(right, diner_ids, reservation_time)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("diner_ids") | Some("diner_id") => {
                    *diner_ids = Some(parse_diner_ids(&parse_text_expr(right)?)?);
                }
                Some("reservation_time") => {
                    *reservation_time = Some(parse_time_expr(right)?);
                }
                Some(other) => return Err(SqlError::UnknownColumn(other.to_string())),
                None => return Err(SqlError::Unsupported(format!("filter {expr}"))),
            },
            _ => return Err(SqlError::Unsupported(format!("operator {op} in filter"))),
        },
        Expr::InList { expr: column, list, negated: false }
            if matches!(expr_column_name(column).as_deref(), Some("diner_ids") | Some("diner_id")) =>
        {
            *diner_ids = Some(list.iter().map(parse_i64_expr).collect::<Result<_, _>>()?);
        }
        Expr::Nested(inner) => extract_availability_filters(inner, diner_ids, reservation_time)?,
        other => return Err(SqlError::Unsupported(format!("filter {other}"))),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<ReservationId, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => match expr_column_name(left).as_deref() {
            Some("id") | Some("reservation_id") => parse_i64_expr(right),
            _ => Err(SqlError::MissingFilter("id")),
        },
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        // A lone id written unquoted.
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_time_expr(expr: &Expr) -> Result<NaiveDateTime, SqlError> {
    Ok(parse_reservation_time(&parse_text_expr(expr)?)?)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    /// Well-formed SQL carrying a malformed diner list or time.
    #[error(transparent)]
    Value(#[from] ParseError),
}
