use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::dates::{DateRange, InvalidRange};
use crate::limits::{MAX_NAME_LEN, MAX_REASON_LEN};
use crate::model::{ReservationStatus, UnitStatus};
use crate::pricing::Money;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        id: Option<Ulid>,
        unit_id: Ulid,
        range: DateRange,
        extras: Vec<String>,
    },
    Approve {
        reservation_id: Ulid,
    },
    Reject {
        reservation_id: Ulid,
    },
    Cancel {
        reservation_id: Ulid,
        reason: Option<String>,
    },
    UpsertUnit {
        id: Ulid,
        owner_id: String,
        name: String,
        daily_rate: Money,
        cancellation_fee: Money,
        status: Option<UnitStatus>,
    },
    InsertUnitExtra {
        unit_id: Ulid,
        name: String,
        fee: Money,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectUnitReservations {
        unit_id: Ulid,
        status: Option<ReservationStatus>,
    },
    SelectAvailability {
        unit_id: Ulid,
        range: DateRange,
    },
    SelectBlockedDates {
        unit_id: Ulid,
    },
    SelectQuote {
        unit_id: Ulid,
        range: DateRange,
        extras: Vec<String>,
    },
    SelectUnits {
        id: Option<Ulid>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// One VALUES row, addressable by column name when the INSERT lists columns
/// and by position otherwise.
struct InsertRow {
    columns: Vec<String>,
    values: Vec<Expr>,
}

impl InsertRow {
    fn get(&self, name: &str, position: usize) -> Option<&Expr> {
        if self.columns.is_empty() {
            return self.values.get(position);
        }
        let idx = self.columns.iter().position(|c| c == name)?;
        self.values.get(idx)
    }

    fn required(&self, name: &'static str, position: usize) -> Result<&Expr, SqlError> {
        self.get(name, position).ok_or(SqlError::MissingColumn(name))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = extract_insert_row(insert)?;

    match table.as_str() {
        "reservations" => {
            let start = parse_date(row.required("start_date", 2)?)?;
            let end = parse_date(row.required("end_date", 3)?)?;
            Ok(Command::InsertReservation {
                id: parse_ulid_or_null(row.required("id", 0)?)?,
                unit_id: parse_ulid(row.required("unit_id", 1)?)?,
                range: DateRange::new(start, end)?,
                extras: match row.get("extras", 4) {
                    Some(expr) => parse_extras(expr)?,
                    None => Vec::new(),
                },
            })
        }
        "approvals" => Ok(Command::Approve {
            reservation_id: parse_ulid(row.required("reservation_id", 0)?)?,
        }),
        "rejections" => Ok(Command::Reject {
            reservation_id: parse_ulid(row.required("reservation_id", 0)?)?,
        }),
        "cancellations" => {
            let reason = match row.get("reason", 1) {
                Some(expr) => parse_string_or_null(expr)?,
                None => None,
            };
            if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
                return Err(SqlError::InvalidValue("reason too long".into()));
            }
            Ok(Command::Cancel {
                reservation_id: parse_ulid(row.required("reservation_id", 0)?)?,
                reason,
            })
        }
        "units" => {
            let status = match row.get("status", 5) {
                Some(expr) => match parse_string_or_null(expr)? {
                    Some(s) => Some(s.parse().map_err(SqlError::InvalidValue)?),
                    None => None,
                },
                None => None,
            };
            Ok(Command::UpsertUnit {
                id: parse_ulid(row.required("id", 0)?)?,
                owner_id: parse_name(row.required("owner_id", 1)?)?,
                name: parse_name(row.required("name", 2)?)?,
                daily_rate: parse_money(row.required("daily_rate", 3)?)?,
                cancellation_fee: parse_money(row.required("cancellation_fee", 4)?)?,
                status,
            })
        }
        "unit_extras" => Ok(Command::InsertUnitExtra {
            unit_id: parse_ulid(row.required("unit_id", 0)?)?,
            name: parse_name(row.required("name", 1)?)?,
            fee: parse_money(row.required("fee", 2)?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column = value` filters joined by AND.
struct Filters(Vec<(String, Expr)>);

impl Filters {
    fn get(&self, name: &str) -> Option<&Expr> {
        self.0.iter().find(|(c, _)| c == name).map(|(_, e)| e)
    }

    fn required(&self, name: &'static str) -> Result<&Expr, SqlError> {
        self.get(name).ok_or(SqlError::MissingFilter(name))
    }

    fn range(&self) -> Result<DateRange, SqlError> {
        let start = parse_date(self.required("start_date")?)?;
        let end = parse_date(self.required("end_date")?)?;
        Ok(DateRange::new(start, end)?)
    }
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

    let mut filters = Filters(Vec::new());
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters.0)?;
    }

    match table.as_str() {
        "reservations" => {
            if let Some(id) = filters.get("id") {
                return Ok(Command::SelectReservation { id: parse_ulid(id)? });
            }
            let status = match filters.get("status") {
                Some(expr) => Some(parse_string(expr)?.parse().map_err(SqlError::InvalidValue)?),
                None => None,
            };
            Ok(Command::SelectUnitReservations {
                unit_id: parse_ulid(filters.required("unit_id")?)?,
                status,
            })
        }
        "availability" => Ok(Command::SelectAvailability {
            unit_id: parse_ulid(filters.required("unit_id")?)?,
            range: filters.range()?,
        }),
        "blocked_dates" => Ok(Command::SelectBlockedDates {
            unit_id: parse_ulid(filters.required("unit_id")?)?,
        }),
        "quote" => Ok(Command::SelectQuote {
            unit_id: parse_ulid(filters.required("unit_id")?)?,
            range: filters.range()?,
            extras: match filters.get("extras") {
                Some(expr) => parse_extras(expr)?,
                None => Vec::new(),
            },
        }),
        "units" => Ok(Command::SelectUnits {
            id: filters.get("id").map(parse_ulid).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref().clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_row(insert: &ast::Insert) -> Result<InsertRow, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    match rows.as_slice() {
        [] => Err(SqlError::Parse("empty VALUES".into())),
        [row] => {
            let columns: Vec<String> =
                insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
            if !columns.is_empty() && columns.len() != row.len() {
                return Err(SqlError::Parse(format!(
                    "{} columns but {} values",
                    columns.len(),
                    row.len()
                )));
            }
            Ok(InsertRow {
                columns,
                values: row.clone(),
            })
        }
        _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
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

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_name(expr: &Expr) -> Result<String, SqlError> {
    let s = parse_string(expr)?;
    if s.is_empty() || s.len() > MAX_NAME_LEN {
        return Err(SqlError::InvalidValue(format!("name length {}", s.len())));
    }
    Ok(s)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL id".into()))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match parse_string_or_null(expr)? {
        Some(s) => Ulid::from_string(&s)
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}"))),
        None => Ok(None),
    }
}

/// ISO `YYYY-MM-DD` string literal.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    s.parse().map_err(|_| SqlError::InvalidDate(s.clone()))
}

/// Amounts are written in major units: `80`, `80.50`, or `'80.50'`.
fn parse_money(expr: &Expr) -> Result<Money, SqlError> {
    let raw = match extract_value(expr) {
        Some(Value::Number(n, _)) => n.clone(),
        Some(Value::SingleQuotedString(s)) => s.clone(),
        Some(other) => return Err(SqlError::Parse(format!("expected amount, got {other}"))),
        None => return Err(SqlError::InvalidValue(format!("bad amount {expr}"))),
    };
    Money::parse_major(&raw).map_err(|e| SqlError::InvalidValue(e.to_string()))
}

/// Comma-separated extra names; NULL or empty means none.
fn parse_extras(expr: &Expr) -> Result<Vec<String>, SqlError> {
    Ok(parse_string_or_null(expr)?
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default())
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("invalid date: {0:?}")]
    InvalidDate(String),
    #[error(transparent)]
    Range(#[from] InvalidRange),
}
