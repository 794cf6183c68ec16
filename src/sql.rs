use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertClient {
        id: Ulid,
        name: String,
    },
    InsertPackage {
        id: Ulid,
        name: String,
    },
    InsertService {
        id: Ulid,
        name: String,
    },
    InsertReservation {
        id: Ulid,
        client_id: Ulid,
        date: Ms,
        start: Ms,
        end: Ms,
        status: Option<ReservationStatus>,
        attendees: Option<u32>,
        total: Option<Cents>,
        deposit: Option<Cents>,
        package_id: Option<Ulid>,
        notes: Option<String>,
    },
    UpdateReservation {
        id: Ulid,
        patch: ReservationPatch,
    },
    DeleteReservation {
        id: Ulid,
    },
    InsertServiceLine {
        reservation_id: Ulid,
        service_id: Ulid,
        quantity: u32,
    },
    InsertPayment {
        reservation_id: Ulid,
        amount: Cents,
        method: PaymentMethod,
        reference: Option<String>,
    },
    SelectReservations {
        window: Option<(Ms, Ms)>,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectClients,
    Listen {
        channel: String,
    },
}

impl Command {
    /// True for commands that change state — these are gated on role at
    /// the wire boundary.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Command::SelectReservations { .. }
                | Command::SelectReservation { .. }
                | Command::SelectClients
                | Command::Listen { .. }
        )
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "clients" | "packages" | "services" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("catalog entry", 2, values.len()));
            }
            let id = parse_ulid(&values[0])?;
            let name = parse_string(&values[1])?;
            Ok(match table.as_str() {
                "clients" => Command::InsertClient { id, name },
                "packages" => Command::InsertPackage { id, name },
                _ => Command::InsertService { id, name },
            })
        }
        "reservations" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("reservations", 5, values.len()));
            }
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                client_id: parse_ulid(&values[1])?,
                date: parse_i64(&values[2])?,
                start: parse_i64(&values[3])?,
                end: parse_i64(&values[4])?,
                status: opt(&values, 5).map(parse_status).transpose()?,
                attendees: opt(&values, 6).map(parse_u32).transpose()?,
                total: opt(&values, 7).map(parse_i64).transpose()?,
                deposit: opt(&values, 8).map(parse_i64).transpose()?,
                package_id: match opt(&values, 9) {
                    Some(expr) => parse_ulid_or_null(expr)?,
                    None => None,
                },
                notes: match opt(&values, 10) {
                    Some(expr) => parse_string_or_null(expr)?,
                    None => None,
                },
            })
        }
        "service_lines" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("service_lines", 3, values.len()));
            }
            Ok(Command::InsertServiceLine {
                reservation_id: parse_ulid(&values[0])?,
                service_id: parse_ulid(&values[1])?,
                quantity: parse_u32(&values[2])?,
            })
        }
        "payments" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("payments", 3, values.len()));
            }
            Ok(Command::InsertPayment {
                reservation_id: parse_ulid(&values[0])?,
                amount: parse_i64(&values[1])?,
                method: parse_method(&values[2])?,
                reference: match opt(&values, 3) {
                    Some(expr) => parse_string_or_null(expr)?,
                    None => None,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Optional positional value: absent and explicit NULL both read as absent
/// for scalar columns; nullable columns go through the `_or_null` parsers.
fn opt<'a>(values: &'a [Expr], idx: usize) -> Option<&'a Expr> {
    let expr = values.get(idx)?;
    if matches!(extract_value(expr), Some(Value::Null)) {
        return None;
    }
    Some(expr)
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    // SET builds the tri-state patch: a column that isn't assigned stays
    // Keep; `col = NULL` is an explicit Clear.
    let mut patch = ReservationPatch::default();
    for assignment in assignments {
        let column = assignment_column(&assignment.target)?;
        let value = &assignment.value;
        let is_null = matches!(extract_value(value), Some(Value::Null));
        match column.as_str() {
            "client_id" => {
                patch.client_id = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_ulid(value)?)
                }
            }
            "date" => {
                patch.date = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_i64(value)?)
                }
            }
            "start" => {
                patch.start = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_i64(value)?)
                }
            }
            "end" => {
                patch.end = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_i64(value)?)
                }
            }
            "status" => {
                patch.status = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_status(value)?)
                }
            }
            "attendees" => {
                patch.attendees = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_u32(value)?)
                }
            }
            "total" => {
                patch.total = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_i64(value)?)
                }
            }
            "deposit" => {
                patch.deposit = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_i64(value)?)
                }
            }
            "package_id" => {
                patch.package_id = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_ulid(value)?)
                }
            }
            "notes" => {
                patch.notes = if is_null {
                    Patch::Clear
                } else {
                    Patch::Set(parse_string(value)?)
                }
            }
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    Ok(Command::UpdateReservation { id, patch })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
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

    match table.as_str() {
        "clients" => Ok(Command::SelectClients),
        "reservations" => {
            let (mut id, mut start, mut end) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_reservation_filters(selection, &mut id, &mut start, &mut end)?;
            }
            if let Some(id) = id {
                return Ok(Command::SelectReservation { id });
            }
            match (start, end) {
                (Some(start), Some(end)) => Ok(Command::SelectReservations {
                    window: Some((start, end)),
                }),
                (None, None) => Ok(Command::SelectReservations { window: None }),
                (Some(_), None) => Err(SqlError::MissingFilter("end")),
                (None, Some(_)) => Err(SqlError::MissingFilter("start")),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_reservation_filters(
    expr: &Expr,
    id: &mut Option<Ulid>,
    start: &mut Option<Ms>,
    end: &mut Option<Ms>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_reservation_filters(left, id, start, end)?;
                extract_reservation_filters(right, id, start, end)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("id") {
                    *id = Some(parse_ulid(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start = Some(parse_i64(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    *end = Some(parse_i64(right)?);
                }
            }
            _ => {}
        }
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

fn assignment_column(target: &ast::AssignmentTarget) -> Result<String, SqlError> {
    match target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_status(expr: &Expr) -> Result<ReservationStatus, SqlError> {
    let s = parse_string(expr)?;
    ReservationStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
}

fn parse_method(expr: &Expr) -> Result<PaymentMethod, SqlError> {
    let s = parse_string(expr)?;
    PaymentMethod::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad payment method: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
