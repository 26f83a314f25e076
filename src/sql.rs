use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, Ident, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        key: ResourceKey,
        name: Option<String>,
        capacity: Option<u32>,
    },
    /// `None` leaves a field as it is; `Some(None)` clears it.
    UpdateResource {
        key: ResourceKey,
        name: Option<Option<String>>,
        capacity: Option<Option<u32>>,
    },
    DeleteResource {
        key: ResourceKey,
    },
    /// One row commits a booking, several rows commit them as one batch.
    InsertBookings {
        bookings: Vec<NewBooking>,
    },
    InsertMakeup {
        makeup: NewMakeup,
    },
    /// `deleted` is set when the client sent `DELETE` rather than `UPDATE`.
    CancelBooking {
        id: Ulid,
        reason: Option<String>,
        deleted: bool,
    },
    /// Missing parts of the slot keep the booking's current values.
    RescheduleBooking {
        id: Ulid,
        date: Option<NaiveDate>,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
        reason: Option<String>,
    },
    ReassignBooking {
        id: Ulid,
        resource: ResourceKey,
        reason: Option<String>,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectTimetable {
        key: ResourceKey,
        date: Option<NaiveDate>,
    },
    SelectMakeups {
        group_id: Option<i64>,
    },
    SelectHistory {
        booking_id: Ulid,
    },
    SelectAdjustmentsBy {
        author: String,
    },
    SelectConflicts {
        proposal: Proposal,
        exclude: Option<Ulid>,
    },
    SelectAvailability {
        keys: Vec<ResourceKey>,
        date: NaiveDate,
        within: TimeRange,
        min_minutes: Option<i64>,
    },
    SelectResources {
        kind: Option<ResourceKind>,
    },
    Listen {
        key: ResourceKey,
    },
    Unlisten {
        key: ResourceKey,
    },
    UnlistenAll,
}

/// Row layout a statement answers with, known before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Bookings,
    Adjustments,
    Conflicts,
    Availability,
    Resources,
    /// Reschedules and reassignments return the replacement's id.
    NewBookingId,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_ascii_uppercase();
    if let Some(rest) = upper.strip_prefix("UNLISTEN") {
        let channel = trimmed[trimmed.len() - rest.len()..].trim();
        if channel == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten {
            key: parse_channel(channel)?,
        });
    }
    if upper.starts_with("LISTEN ") {
        return Ok(Command::Listen {
            key: parse_channel(trimmed[7..].trim())?,
        });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result layout of a statement, without binding its parameters. `None` for
/// statements that answer with a command tag only.
pub fn result_shape(sql: &str) -> Option<ResultShape> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            let table = table_factor_name(&select.from.first()?.relation).ok()?;
            match table.as_str() {
                "bookings" | "makeup_sessions" => Some(ResultShape::Bookings),
                "adjustments" => Some(ResultShape::Adjustments),
                "conflicts" => Some(ResultShape::Conflicts),
                "availability" => Some(ResultShape::Availability),
                "resources" => Some(ResultShape::Resources),
                _ => None,
            }
        }
        Statement::Update {
            table, assignments, ..
        } => {
            let is_bookings = table_factor_name(&table.relation).ok()? == "bookings";
            let cancels = assignments
                .iter()
                .any(|a| assignment_column(&a.target).ok().as_deref() == Some("status"));
            (is_bookings && !cancels).then_some(ResultShape::NewBookingId)
        }
        _ => None,
    }
}

fn parse_channel(channel: &str) -> Result<ResourceKey, SqlError> {
    let channel = channel.trim_matches('"');
    ResourceKey::from_channel(channel).ok_or_else(|| SqlError::BadChannel(channel.to_string()))
}

/// Column layout of an insertable table: names in positional order, the
/// first `required` of them mandatory.
struct Layout {
    table: &'static str,
    columns: &'static [&'static str],
    required: usize,
}

static RESOURCE_LAYOUT: Layout = Layout {
    table: "resources",
    columns: &["id", "name", "capacity"],
    required: 1,
};

static BOOKING_LAYOUT: Layout = Layout {
    table: "bookings",
    columns: &[
        "id", "subject_id", "room_id", "teacher_id", "group_id", "date", "start", "end",
    ],
    required: 8,
};

static MAKEUP_LAYOUT: Layout = Layout {
    table: "makeup_sessions",
    columns: &[
        "id",
        "subject_id",
        "room_id",
        "teacher_id",
        "group_id",
        "date",
        "start",
        "end",
        "reason",
        "original_booking_id",
        "event_id",
    ],
    required: 9,
};

/// One INSERT row rearranged into layout order.
struct Row<'a> {
    layout: &'static Layout,
    values: Vec<Option<&'a Expr>>,
}

impl<'a> Row<'a> {
    /// Values are matched by the INSERT column list when one is given,
    /// by position otherwise.
    fn new(layout: &'static Layout, columns: &[Ident], row: &'a [Expr]) -> Result<Self, SqlError> {
        let mut values = vec![None; layout.columns.len()];
        if columns.is_empty() {
            if row.len() < layout.required || row.len() > layout.columns.len() {
                return Err(SqlError::WrongArity(layout.table, layout.required, row.len()));
            }
            for (slot, value) in values.iter_mut().zip(row) {
                *slot = Some(value);
            }
            return Ok(Self { layout, values });
        }
        if columns.len() != row.len() {
            return Err(SqlError::WrongArity(layout.table, columns.len(), row.len()));
        }
        for (column, value) in columns.iter().zip(row) {
            let i = layout
                .columns
                .iter()
                .position(|name| column.value.eq_ignore_ascii_case(name))
                .ok_or_else(|| SqlError::UnknownColumn(column.value.clone()))?;
            if values[i].replace(value).is_some() {
                return Err(SqlError::Parse(format!("column {} given twice", column.value)));
            }
        }
        if let Some(missing) = (0..layout.required).find(|&i| values[i].is_none()) {
            return Err(SqlError::MissingColumn(layout.columns[missing]));
        }
        Ok(Self { layout, values })
    }

    fn required(&self, column: &str) -> Result<&'a Expr, SqlError> {
        self.optional(column)
            .ok_or_else(|| SqlError::UnknownColumn(column.to_string()))
    }

    fn optional(&self, column: &str) -> Option<&'a Expr> {
        let i = self.layout.columns.iter().position(|name| *name == column)?;
        self.values[i]
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;
    let columns = &insert.columns;

    match table.as_str() {
        "rooms" | "teachers" | "groups" => {
            let kind = ResourceKind::parse(&table).ok_or(SqlError::UnknownTable(table.clone()))?;
            let row = Row::new(&RESOURCE_LAYOUT, columns, single_row(&rows, "resources")?)?;
            Ok(Command::InsertResource {
                key: ResourceKey::new(kind, parse_i64(row.required("id")?)?),
                name: row.optional("name").map(parse_string_or_null).transpose()?.flatten(),
                capacity: row.optional("capacity").map(parse_u32_or_null).transpose()?.flatten(),
            })
        }
        "bookings" => {
            let mut bookings = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = Row::new(&BOOKING_LAYOUT, columns, values)?;
                let booking =
                    booking_row(&row).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                bookings.push(booking);
            }
            Ok(Command::InsertBookings { bookings })
        }
        "makeup_sessions" => {
            let row = Row::new(&MAKEUP_LAYOUT, columns, single_row(&rows, "makeup_sessions")?)?;
            let base = booking_row(&row)?;
            Ok(Command::InsertMakeup {
                makeup: NewMakeup {
                    id: base.id,
                    subject_id: base.subject_id,
                    resources: base.resources,
                    slot: base.slot,
                    reason: parse_string(row.required("reason")?)?,
                    original_booking: row
                        .optional("original_booking_id")
                        .map(parse_ulid_or_null)
                        .transpose()?
                        .flatten(),
                    related_event: row
                        .optional("event_id")
                        .map(parse_i64_or_null)
                        .transpose()?
                        .flatten(),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// The slot is validated by the engine, not here.
fn booking_row(row: &Row<'_>) -> Result<NewBooking, SqlError> {
    Ok(NewBooking {
        id: parse_ulid(row.required("id")?)?,
        subject_id: parse_i64(row.required("subject_id")?)?,
        resources: ResourceSet::new(
            parse_i64(row.required("room_id")?)?,
            parse_i64(row.required("teacher_id")?)?,
            parse_i64(row.required("group_id")?)?,
        ),
        slot: TemporalSlot {
            date: parse_date(row.required("date")?)?,
            start: parse_time(row.required("start")?)?,
            end: parse_time(row.required("end")?)?,
        },
    })
}

fn single_row<'a>(rows: &'a [Vec<Expr>], table: &'static str) -> Result<&'a [Expr], SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!(
            "multi-row INSERT into {table}"
        ))),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" | "teachers" | "groups" => {
            let kind = ResourceKind::parse(&table).ok_or(SqlError::UnknownTable(table.clone()))?;
            Ok(Command::DeleteResource {
                key: ResourceKey::new(kind, parse_i64(id)?),
            })
        }
        "bookings" => Ok(Command::CancelBooking {
            id: parse_ulid(id)?,
            reason: None,
            deleted: true,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let set = assignments
        .iter()
        .map(|a| Ok((assignment_column(&a.target)?, &a.value)))
        .collect::<Result<Vec<(String, &Expr)>, SqlError>>()?;

    match table.as_str() {
        "rooms" | "teachers" | "groups" => {
            let kind = ResourceKind::parse(&table).ok_or(SqlError::UnknownTable(table.clone()))?;
            let (mut name, mut capacity) = (None, None);
            for (column, value) in set {
                match column.as_str() {
                    "name" => name = Some(parse_string_or_null(value)?),
                    "capacity" => capacity = Some(parse_u32_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            if name.is_none() && capacity.is_none() {
                return Err(SqlError::MissingAssignment("name or capacity"));
            }
            Ok(Command::UpdateResource {
                key: ResourceKey::new(kind, parse_i64(id)?),
                name,
                capacity,
            })
        }
        "bookings" => parse_booking_update(parse_ulid(id)?, set),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_booking_update(id: Ulid, set: Vec<(String, &Expr)>) -> Result<Command, SqlError> {
    let mut reason = None;
    let mut status = None;
    let (mut date, mut start, mut end) = (None, None, None);
    let mut resource = None;

    for (column, value) in set {
        match column.as_str() {
            "reason" => reason = parse_string_or_null(value)?,
            "status" => status = Some(parse_string(value)?),
            "date" => date = Some(parse_date(value)?),
            "start" => start = Some(parse_time(value)?),
            "end" => end = Some(parse_time(value)?),
            col => match resource_column(col) {
                Some(kind) => {
                    if resource.is_some() {
                        return Err(SqlError::Unsupported(
                            "more than one resource change per statement".into(),
                        ));
                    }
                    resource = Some(ResourceKey::new(kind, parse_i64(value)?));
                }
                None => return Err(SqlError::UnknownColumn(column)),
            },
        }
    }

    let moves = date.is_some() || start.is_some() || end.is_some();
    match (status, moves, resource) {
        (Some(status), false, None) => match status.to_lowercase().as_str() {
            "cancelled" | "canceled" => Ok(Command::CancelBooking {
                id,
                reason,
                deleted: false,
            }),
            _ => Err(SqlError::Unsupported(format!("status '{status}'"))),
        },
        (None, true, None) => Ok(Command::RescheduleBooking {
            id,
            date,
            start,
            end,
            reason,
        }),
        (None, false, Some(resource)) => Ok(Command::ReassignBooking {
            id,
            resource,
            reason,
        }),
        (None, false, None) => Err(SqlError::MissingAssignment(
            "status, date/start/end or a resource id",
        )),
        _ => Err(SqlError::Unsupported(
            "status, slot and resource changes must be separate statements".into(),
        )),
    }
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    GtEq,
    LtEq,
}

struct Filter<'a> {
    column: String,
    op: FilterOp,
    /// Several values for `col IN (...)`.
    values: Vec<&'a Expr>,
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => {
            if let Some(id) = eq_filter(&filters, "id") {
                return Ok(Command::SelectBooking {
                    id: parse_ulid(id)?,
                });
            }
            let (kind, id) = filters
                .iter()
                .filter(|f| f.op == FilterOp::Eq && f.values.len() == 1)
                .find_map(|f| resource_column(&f.column).map(|kind| (kind, f.values[0])))
                .ok_or(SqlError::MissingFilter("id, room_id, teacher_id or group_id"))?;
            Ok(Command::SelectTimetable {
                key: ResourceKey::new(kind, parse_i64(id)?),
                date: eq_filter(&filters, "date").map(parse_date).transpose()?,
            })
        }
        "makeup_sessions" => Ok(Command::SelectMakeups {
            group_id: eq_filter(&filters, "group_id").map(parse_i64).transpose()?,
        }),
        "adjustments" => {
            if let Some(id) = eq_filter(&filters, "booking_id") {
                Ok(Command::SelectHistory {
                    booking_id: parse_ulid(id)?,
                })
            } else if let Some(author) = eq_filter(&filters, "author") {
                Ok(Command::SelectAdjustmentsBy {
                    author: parse_string(author)?,
                })
            } else {
                Err(SqlError::MissingFilter("booking_id or author"))
            }
        }
        "conflicts" => {
            let required = |col: &'static str| eq_filter(&filters, col).ok_or(SqlError::MissingFilter(col));
            Ok(Command::SelectConflicts {
                proposal: Proposal {
                    resources: ResourceSet::new(
                        parse_i64(required("room_id")?)?,
                        parse_i64(required("teacher_id")?)?,
                        parse_i64(required("group_id")?)?,
                    ),
                    slot: TemporalSlot {
                        date: parse_date(required("date")?)?,
                        start: parse_time(required("start")?)?,
                        end: parse_time(required("end")?)?,
                    },
                },
                exclude: eq_filter(&filters, "exclude_id").map(parse_ulid).transpose()?,
            })
        }
        "availability" => {
            let mut keys = Vec::new();
            for f in filters.iter().filter(|f| f.op == FilterOp::Eq) {
                if let Some(kind) = resource_column(&f.column) {
                    for value in &f.values {
                        keys.push(ResourceKey::new(kind, parse_i64(value)?));
                    }
                }
            }
            if keys.is_empty() {
                return Err(SqlError::MissingFilter("room_id, teacher_id or group_id"));
            }
            let bound = |col: &'static str, op: FilterOp| {
                filters
                    .iter()
                    .find(|f| f.column == col && (f.op == op || f.op == FilterOp::Eq))
                    .and_then(|f| f.values.first().copied())
                    .ok_or(SqlError::MissingFilter(col))
            };
            Ok(Command::SelectAvailability {
                keys,
                date: parse_date(eq_filter(&filters, "date").ok_or(SqlError::MissingFilter("date"))?)?,
                within: TimeRange {
                    start: parse_time(bound("start", FilterOp::GtEq)?)?,
                    end: parse_time(bound("end", FilterOp::LtEq)?)?,
                },
                min_minutes: eq_filter(&filters, "min_duration").map(parse_i64).transpose()?,
            })
        }
        "resources" => {
            let kind = match eq_filter(&filters, "kind") {
                Some(expr) => {
                    let s = parse_string(expr)?;
                    Some(ResourceKind::parse(&s).ok_or(SqlError::Parse(format!("bad kind: {s}")))?)
                }
                None => None,
            };
            Ok(Command::SelectResources { kind })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_filters<'a>(expr: &'a Expr, filters: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_filters(left, filters)?;
                    return collect_filters(right, filters);
                }
                ast::BinaryOperator::Eq => FilterOp::Eq,
                ast::BinaryOperator::GtEq => FilterOp::GtEq,
                ast::BinaryOperator::LtEq => FilterOp::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            filters.push(Filter {
                column,
                op,
                values: vec![right.as_ref()],
            });
            Ok(())
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            let column = expr_column_name(expr)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {expr}")))?;
            filters.push(Filter {
                column,
                op: FilterOp::Eq,
                values: list.iter().collect(),
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn eq_filter<'a>(filters: &[Filter<'a>], column: &str) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|f| f.column == column && f.op == FilterOp::Eq && f.values.len() == 1)
        .map(|f| f.values[0])
}

/// `room_id` -> `Room`, and so on.
fn resource_column(column: &str) -> Option<ResourceKind> {
    ResourceKind::parse(column.strip_suffix("_id")?)
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

fn assignment_column(target: &AssignmentTarget) -> Result<String, SqlError> {
    match target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        AssignmentTarget::Tuple(_) => Err(SqlError::Unsupported("tuple assignment".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<&Expr, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => Ok(right),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
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

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64(expr).map(Some)
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    let Some(v) = parse_i64_or_null(expr)? else {
        return Ok(None);
    };
    u32::try_from(v)
        .map(Some)
        .map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// `YYYY-MM-DD`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
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
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("missing assignment: {0}")]
    MissingAssignment(&'static str),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("invalid channel: {0} (expected room_<id>, teacher_<id> or group_<id>)")]
    BadChannel(String),
}
