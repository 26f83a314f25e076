use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveTime, Timelike};
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::auth::TimetabledAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ResultShape};
use crate::tenant::TenantManager;

/// Author recorded when a client connects without a user name.
const ANONYMOUS: &str = "anonymous";

pub struct TimetabledHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TimetabledQueryParser>,
}

impl TimetabledHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TimetabledQueryParser),
        }
    }

    fn tenant<C: ClientInfo>(client: &C) -> String {
        client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string())
    }

    fn resolve_engine(&self, tenant: &str) -> PgWireResult<Arc<Engine>> {
        self.tenant_manager.get_or_create(tenant).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Every mutation is attributed to the authenticated user.
    fn author<C: ClientInfo>(client: &C) -> String {
        client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }

    async fn run<C: ClientInfo>(&self, client: &C, sql: &str) -> PgWireResult<Vec<Response>> {
        let tenant = Self::tenant(client);
        let engine = self.resolve_engine(&tenant)?;
        let author = Self::author(client);
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&tenant, &engine, cmd, &author).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        tenant: &str,
        engine: &Engine,
        cmd: Command,
        author: &str,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertResource {
                key,
                name,
                capacity,
            } => {
                engine
                    .register_resource(key, name, capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateResource {
                key,
                name,
                capacity,
            } => {
                let current = engine.resource(key).await.map_err(engine_err)?;
                engine
                    .update_resource(
                        key,
                        name.unwrap_or(current.name),
                        capacity.unwrap_or(current.capacity),
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteResource { key } => {
                engine.retire_resource(key).await.map_err(engine_err)?;
                if let Some(hub) = self.tenant_manager.notify_hub(tenant) {
                    hub.remove(&key);
                }
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBookings { mut bookings } => {
                let count = bookings.len();
                if count == 1 {
                    engine
                        .commit(bookings.swap_remove(0))
                        .await
                        .map_err(engine_err)?;
                } else {
                    engine.commit_batch(bookings).await.map_err(engine_err)?;
                }
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::InsertMakeup { makeup } => {
                engine
                    .schedule_makeup(makeup, author)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::CancelBooking {
                id,
                reason,
                deleted,
            } => {
                engine.cancel(id, reason, author).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new(cancel_tag(deleted)).with_rows(1))])
            }
            Command::RescheduleBooking {
                id,
                date,
                start,
                end,
                reason,
            } => {
                let current = engine
                    .booking(&id)
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                let slot = TemporalSlot {
                    date: date.unwrap_or(current.slot.date),
                    start: start.unwrap_or(current.slot.start),
                    end: end.unwrap_or(current.slot.end),
                };
                let new_id = engine
                    .reschedule(id, slot, reason, author)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![new_id_response(new_id, id)])
            }
            Command::ReassignBooking {
                id,
                resource,
                reason,
            } => {
                let new_id = engine
                    .reassign(id, resource, reason, author)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![new_id_response(new_id, id)])
            }
            Command::SelectBooking { id } => {
                let bookings: Vec<Booking> = engine.booking(&id).into_iter().collect();
                Ok(vec![bookings_response(&bookings)])
            }
            Command::SelectTimetable { key, date } => {
                let bookings = engine.timetable(key, date).await.map_err(engine_err)?;
                Ok(vec![bookings_response(&bookings)])
            }
            Command::SelectMakeups { group_id } => {
                Ok(vec![bookings_response(&engine.makeup_sessions(group_id))])
            }
            Command::SelectHistory { booking_id } => {
                Ok(vec![adjustments_response(&engine.history(&booking_id))?])
            }
            Command::SelectAdjustmentsBy { author } => {
                Ok(vec![adjustments_response(&engine.adjustments_by(&author))?])
            }
            Command::SelectConflicts { proposal, exclude } => {
                let conflicts = engine
                    .check_all(&proposal, exclude)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![conflicts_response(&conflicts)])
            }
            Command::SelectAvailability {
                keys,
                date,
                within,
                min_minutes,
            } => {
                let free = engine
                    .common_free_slots(&keys, date, within, min_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![availability_response(date, &free)])
            }
            Command::SelectResources { kind } => {
                Ok(vec![resources_response(&engine.list_resources(kind).await)])
            }
            Command::Listen { key } => {
                if !engine.exists(key.kind, key.id) {
                    return Err(engine_err(EngineError::UnknownResource(key)));
                }
                debug!("LISTEN {key}");
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { .. } | Command::UnlistenAll => {
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("subject_id", Type::INT8),
        field("room_id", Type::INT8),
        field("teacher_id", Type::INT8),
        field("group_id", Type::INT8),
        field("date", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("is_makeup", Type::BOOL),
        field("reason", Type::VARCHAR),
        field("original_booking_id", Type::VARCHAR),
        field("supersedes", Type::VARCHAR),
    ]
}

fn adjustment_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("booking_id", Type::VARCHAR),
        field("kind", Type::VARCHAR),
        field("author", Type::VARCHAR),
        field("reason", Type::VARCHAR),
        field("before", Type::VARCHAR),
        field("after", Type::VARCHAR),
        field("created_at", Type::VARCHAR),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![
        field("kind", Type::VARCHAR),
        field("resource_id", Type::INT8),
        field("booking_id", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("end", Type::VARCHAR),
        field("minutes", Type::INT8),
    ]
}

fn resource_schema() -> Vec<FieldInfo> {
    vec![
        field("kind", Type::VARCHAR),
        field("id", Type::INT8),
        field("name", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("scheduled", Type::INT8),
    ]
}

fn new_id_schema() -> Vec<FieldInfo> {
    vec![field("id", Type::VARCHAR), field("supersedes", Type::VARCHAR)]
}

fn schema_for(shape: ResultShape) -> Vec<FieldInfo> {
    match shape {
        ResultShape::Bookings => booking_schema(),
        ResultShape::Adjustments => adjustment_schema(),
        ResultShape::Conflicts => conflict_schema(),
        ResultShape::Availability => availability_schema(),
        ResultShape::Resources => resource_schema(),
        ResultShape::NewBookingId => new_id_schema(),
    }
}

fn describe(sql: &str) -> Vec<FieldInfo> {
    sql::result_shape(sql).map(schema_for).unwrap_or_default()
}

fn rows_response(schema: Vec<FieldInfo>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(Arc::new(schema), stream::iter(rows)))
}

fn fmt_time(t: NaiveTime) -> String {
    if t.second() == 0 {
        t.format("%H:%M").to_string()
    } else {
        t.format("%H:%M:%S").to_string()
    }
}

fn bookings_response(bookings: &[Booking]) -> Response {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<DataRow>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.subject_id)?;
            encoder.encode_field(&b.resources.room_id)?;
            encoder.encode_field(&b.resources.teacher_id)?;
            encoder.encode_field(&b.resources.group_id)?;
            encoder.encode_field(&b.slot.date.to_string())?;
            encoder.encode_field(&fmt_time(b.slot.start))?;
            encoder.encode_field(&fmt_time(b.slot.end))?;
            encoder.encode_field(&b.status.to_string())?;
            encoder.encode_field(&b.is_makeup())?;
            encoder.encode_field(&b.makeup.as_ref().map(|m| m.reason.clone()))?;
            encoder.encode_field(
                &b.makeup
                    .as_ref()
                    .and_then(|m| m.original_booking)
                    .map(|id| id.to_string()),
            )?;
            encoder.encode_field(&b.supersedes.map(|id| id.to_string()))?;
            Ok(encoder.take_row())
        })
        .collect();
    rows_response(booking_schema(), rows)
}

fn adjustments_response(adjustments: &[Adjustment]) -> PgWireResult<Response> {
    let schema = Arc::new(adjustment_schema());
    let mut rows = Vec::with_capacity(adjustments.len());
    for a in adjustments {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&a.id.to_string())?;
        encoder.encode_field(&a.target.to_string())?;
        encoder.encode_field(&a.kind.to_string())?;
        encoder.encode_field(&a.author)?;
        encoder.encode_field(&a.reason)?;
        encoder.encode_field(&to_json(&a.before)?)?;
        encoder.encode_field(&to_json(&a.after)?)?;
        encoder.encode_field(&a.created_at.to_rfc3339())?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(rows_response(adjustment_schema(), rows))
}

fn conflicts_response(conflicts: &[Conflict]) -> Response {
    let schema = Arc::new(conflict_schema());
    let rows: Vec<PgWireResult<DataRow>> = conflicts
        .iter()
        .map(|c| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&c.kind.to_string())?;
            encoder.encode_field(&c.resource_id)?;
            encoder.encode_field(&c.booking_id.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    rows_response(conflict_schema(), rows)
}

fn availability_response(date: chrono::NaiveDate, free: &[TimeRange]) -> Response {
    let schema = Arc::new(availability_schema());
    let date = date.to_string();
    let rows: Vec<PgWireResult<DataRow>> = free
        .iter()
        .map(|range| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&date)?;
            encoder.encode_field(&fmt_time(range.start))?;
            encoder.encode_field(&fmt_time(range.end))?;
            encoder.encode_field(&range.minutes())?;
            Ok(encoder.take_row())
        })
        .collect();
    rows_response(availability_schema(), rows)
}

fn resources_response(resources: &[ResourceInfo]) -> Response {
    let schema = Arc::new(resource_schema());
    let rows: Vec<PgWireResult<DataRow>> = resources
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.key.kind.to_string())?;
            encoder.encode_field(&r.key.id)?;
            encoder.encode_field(&r.name)?;
            encoder.encode_field(&r.capacity.map(i64::from))?;
            encoder.encode_field(&(r.scheduled as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    rows_response(resource_schema(), rows)
}

fn new_id_response(new_id: ulid::Ulid, old_id: ulid::Ulid) -> Response {
    let schema = Arc::new(new_id_schema());
    let row = (|| -> PgWireResult<DataRow> {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&new_id.to_string())?;
        encoder.encode_field(&old_id.to_string())?;
        Ok(encoder.take_row())
    })();
    rows_response(new_id_schema(), vec![row])
}

fn to_json<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "XX000".into(),
            format!("encoding error: {e}"),
        )))
    })
}

#[async_trait]
impl SimpleQueryHandler for TimetabledHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TimetabledQueryParser;

#[async_trait]
impl QueryParser for TimetabledQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TimetabledHandler {
    type Statement = String;
    type QueryParser = TimetabledQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let responses = self.run(client, &sql).await?;
        Ok(responses
            .into_iter()
            .next()
            .unwrap_or(Response::EmptyQuery))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(describe(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();

    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TimetabledFactory {
    handler: Arc<TimetabledHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<TimetabledAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl TimetabledFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = TimetabledAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(TimetabledHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TimetabledFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(TimetabledFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidSlot { .. } => "22007",
        EngineError::UnknownResource(_) => "23503",
        EngineError::Conflict(_) => "23P01",
        EngineError::NotFound(_) => "02000",
        EngineError::AlreadyExists(_) | EngineError::DuplicateBooking(_) => "23505",
        EngineError::CapacityExceeded { .. } => "23514",
        EngineError::NotScheduled(_)
        | EngineError::StillScheduled(_)
        | EngineError::Unchanged(_)
        | EngineError::InUse(_) => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if !e.is_caller_error() {
        error!("request failed: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

/// A cancel answers with the verb of the statement the client sent.
fn cancel_tag(deleted: bool) -> &'static str {
    if deleted { "DELETE" } else { "UPDATE" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn cancel_tag_echoes_statement() {
        let id = Ulid::new();
        let tag = |sql: String| match crate::sql::parse_sql(&sql).unwrap() {
            Command::CancelBooking { deleted, .. } => cancel_tag(deleted),
            cmd => panic!("expected CancelBooking, got {cmd:?}"),
        };
        assert_eq!(tag(format!("DELETE FROM bookings WHERE id = '{id}'")), "DELETE");
        assert_eq!(
            tag(format!("UPDATE bookings SET status = 'cancelled' WHERE id = '{id}'")),
            "UPDATE"
        );
    }

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT * FROM bookings"), 0);
        assert_eq!(count_params("UPDATE bookings SET room_id = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("SELECT $10, $3"), 10);
    }

    #[test]
    fn sqlstates_follow_error_class() {
        let key = ResourceKey::room(1);
        let id = Ulid::new();
        assert_eq!(sqlstate(&EngineError::UnknownResource(key)), "23503");
        assert_eq!(sqlstate(&EngineError::NotFound(id)), "02000");
        assert_eq!(sqlstate(&EngineError::InUse(key)), "55000");
        assert_eq!(sqlstate(&EngineError::Storage("disk".into())), "58030");
        assert_eq!(sqlstate(&EngineError::LimitExceeded("batch too large")), "54000");
    }

    #[test]
    fn times_drop_zero_seconds() {
        assert_eq!(fmt_time(NaiveTime::from_hms_opt(8, 30, 0).unwrap()), "08:30");
        assert_eq!(fmt_time(NaiveTime::from_hms_opt(8, 30, 15).unwrap()), "08:30:15");
    }

    #[test]
    fn describe_matches_result_rows() {
        assert_eq!(describe("SELECT * FROM availability WHERE room_id = $1").len(), 4);
        assert_eq!(describe("UPDATE bookings SET start = $1 WHERE id = $2").len(), 2);
        assert!(describe("DELETE FROM bookings WHERE id = $1").is_empty());
    }
}
