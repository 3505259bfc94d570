use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::RoadstayAuthSource;
use crate::directory::{DirectoryError, InMemoryDirectory};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

/// Everything a connection needs. Shared by all connections.
pub struct ServerContext {
    pub engine: Arc<Engine>,
    pub directory: Arc<InMemoryDirectory>,
    pub password: String,
}

pub struct RoadstayHandler {
    ctx: Arc<ServerContext>,
    query_parser: Arc<RoadstayQueryParser>,
}

impl RoadstayHandler {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self {
            ctx,
            query_parser: Arc::new(RoadstayQueryParser),
        }
    }

    /// The login user name is the acting party id.
    fn actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<String> {
        client
            .metadata()
            .get("user")
            .cloned()
            .ok_or_else(|| user_err("28000", "no user on connection".into()))
    }

    async fn run(&self, actor: &str, query: &str) -> PgWireResult<Vec<Response>> {
        let started = std::time::Instant::now();
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                .increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        debug!("{actor}: {label}");
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, actor: &str, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.ctx.engine;
        match cmd {
            Command::InsertReservation {
                id,
                unit_id,
                range,
                extras,
            } => {
                let mut request = ReservationRequest::new(unit_id, actor, range).with_extras(extras);
                if let Some(id) = id {
                    request = request.with_id(id);
                }
                engine.create_reservation(request).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::Approve { reservation_id } => {
                engine.approve(reservation_id, actor).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::Reject { reservation_id } => {
                engine.reject(reservation_id, actor).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::Cancel {
                reservation_id,
                reason,
            } => {
                // The requester cancels as a customer; anyone else goes down
                // the provider path and is permission-checked there.
                let current = engine.store().get(&reservation_id).await.map_err(engine_err)?;
                let cancellation = if current.requester_id == actor {
                    engine.cancel(reservation_id, actor, reason).await
                } else {
                    engine.cancel_by_provider(reservation_id, actor, reason).await
                }
                .map_err(engine_err)?;

                let schema = Arc::new(cancellation_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&cancellation.reservation.id.to_string())?;
                encoder.encode_field(&cancellation.fee.to_string())?;
                encoder.encode_field(&cancellation.cancelled_by.as_str().to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::UpsertUnit {
                id,
                owner_id,
                name,
                daily_rate,
                cancellation_fee,
                status,
            } => {
                let existing = self.ctx.directory.get_unit(&id);
                let allowed = match &existing {
                    Some(unit) => {
                        engine.is_admin(actor) || (unit.owner_id == actor && owner_id == actor)
                    }
                    None => engine.is_admin(actor) || owner_id == actor,
                };
                if !allowed {
                    return Err(engine_err(EngineError::PermissionDenied(format!(
                        "{actor} may not write unit {id}"
                    ))));
                }
                let unit = Unit {
                    id,
                    owner_id,
                    name,
                    daily_rate,
                    cancellation_fee,
                    status: status
                        .or(existing.as_ref().map(|u| u.status))
                        .unwrap_or(UnitStatus::Draft),
                    extras: existing.map(|u| u.extras).unwrap_or_default(),
                };
                self.ctx.directory.upsert_unit(unit).map_err(directory_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertUnitExtra { unit_id, name, fee } => {
                let unit = self
                    .ctx
                    .directory
                    .get_unit(&unit_id)
                    .ok_or_else(|| engine_err(EngineError::NotFound(unit_id)))?;
                if unit.owner_id != actor && !engine.is_admin(actor) {
                    return Err(engine_err(EngineError::PermissionDenied(format!(
                        "{actor} does not own unit {unit_id}"
                    ))));
                }
                self.ctx
                    .directory
                    .add_extra(unit_id, Extra { name, fee })
                    .map_err(directory_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectReservation { id } => {
                let r = engine.get_reservation(id, actor).await.map_err(engine_err)?;
                reservation_rows(vec![r])
            }
            Command::SelectUnitReservations { unit_id, status } => {
                let rs = engine
                    .list_unit_reservations(unit_id, actor, status)
                    .await
                    .map_err(engine_err)?;
                reservation_rows(rs)
            }
            Command::SelectAvailability { unit_id, range } => {
                let available = engine
                    .is_available(unit_id, range, None)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&unit_id.to_string())?;
                encoder.encode_field(&range.start().to_string())?;
                encoder.encode_field(&range.end().to_string())?;
                encoder.encode_field(&available)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBlockedDates { unit_id } => {
                let days = engine.blocked_dates(unit_id).await.map_err(engine_err)?;
                let schema = Arc::new(blocked_dates_schema());
                let uid = unit_id.to_string();
                let rows: Vec<PgWireResult<_>> = days
                    .into_iter()
                    .map(|day| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&uid)?;
                        encoder.encode_field(&day.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectQuote {
                unit_id,
                range,
                extras,
            } => {
                let quote = engine.quote(unit_id, range, &extras).await.map_err(engine_err)?;
                let schema = Arc::new(quote_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&unit_id.to_string())?;
                encoder.encode_field(&range.start().to_string())?;
                encoder.encode_field(&range.end().to_string())?;
                encoder.encode_field(&quote.days)?;
                encoder.encode_field(&quote.daily_rate.to_string())?;
                encoder.encode_field(&quote.extras_total.to_string())?;
                encoder.encode_field(&quote.total.to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectUnits { id } => {
                let units = match id {
                    Some(id) => self.ctx.directory.get_unit(&id).into_iter().collect(),
                    None => self.ctx.directory.units(),
                };
                let schema = Arc::new(units_schema());
                let rows: Vec<PgWireResult<_>> = units
                    .into_iter()
                    .map(|u| {
                        let extras = u
                            .extras
                            .iter()
                            .map(|e| format!("{}={}", e.name, e.fee))
                            .collect::<Vec<_>>()
                            .join(",");
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&u.id.to_string())?;
                        encoder.encode_field(&u.owner_id)?;
                        encoder.encode_field(&u.name)?;
                        encoder.encode_field(&u.daily_rate.to_string())?;
                        encoder.encode_field(&u.cancellation_fee.to_string())?;
                        encoder.encode_field(&u.status.to_string())?;
                        encoder.encode_field(&extras)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn reservation_rows(reservations: Vec<Reservation>) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(reservations_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.unit_id.to_string())?;
            encoder.encode_field(&r.requester_id)?;
            encoder.encode_field(&r.range.start().to_string())?;
            encoder.encode_field(&r.range.end().to_string())?;
            encoder.encode_field(&r.extras.join(","))?;
            encoder.encode_field(&r.total_price.to_string())?;
            encoder.encode_field(&r.status.to_string())?;
            encoder.encode_field(&r.created_at.to_rfc3339())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn reservations_schema() -> Vec<FieldInfo> {
    [
        "id",
        "unit_id",
        "requester_id",
        "start_date",
        "end_date",
        "extras",
        "total_price",
        "status",
        "created_at",
    ]
    .into_iter()
    .map(text_field)
    .collect()
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("unit_id"),
        text_field("start_date"),
        text_field("end_date"),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn blocked_dates_schema() -> Vec<FieldInfo> {
    vec![text_field("unit_id"), text_field("day")]
}

fn quote_schema() -> Vec<FieldInfo> {
    vec![
        text_field("unit_id"),
        text_field("start_date"),
        text_field("end_date"),
        FieldInfo::new("days".into(), None, None, Type::INT8, FieldFormat::Text),
        text_field("daily_rate"),
        text_field("extras_total"),
        text_field("total"),
    ]
}

fn units_schema() -> Vec<FieldInfo> {
    ["id", "owner_id", "name", "daily_rate", "cancellation_fee", "status", "extras"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn cancellation_schema() -> Vec<FieldInfo> {
    ["reservation_id", "fee", "cancelled_by"]
        .into_iter()
        .map(text_field)
        .collect()
}

/// Schema a statement will produce, worked out from its target table without
/// parsing it (it may still hold `$n` placeholders).
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    let after = |kw: &str| {
        words
            .iter()
            .position(|w| *w == kw)
            .and_then(|i| words.get(i + 1))
            .copied()
    };
    if words.first() == Some(&"select") {
        return match after("from") {
            Some("reservations") => reservations_schema(),
            Some("availability") => availability_schema(),
            Some("blocked_dates") => blocked_dates_schema(),
            Some("quote") => quote_schema(),
            Some("units") => units_schema(),
            _ => vec![],
        };
    }
    match after("into") {
        Some("cancellations") => cancellation_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for RoadstayHandler {
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
        let actor = self.actor(client)?;
        self.run(&actor, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoadstayQueryParser;

#[async_trait]
impl QueryParser for RoadstayQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoadstayHandler {
    type Statement = String;
    type QueryParser = RoadstayQueryParser;

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
        let actor = self.actor(client)?;
        let sql = substitute_params(portal);
        self.run(&actor, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_err("P0001", "statement produced no response".into()))
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

/// Inline bound text parameters as quoted literals in one pass over the
/// statement. Inserted values are never rescanned, and `$N` inside the
/// statement's own string literals is left alone.
fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let digits_start = i + 1;
                let mut j = digits_start;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                let param = sql[digits_start..j]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| params.get(idx));
                if let Some(param) = param {
                    out.push_str(&sql[copied..i]);
                    match param {
                        Some(value) => {
                            out.push('\'');
                            out.push_str(&String::from_utf8_lossy(value.as_ref()).replace('\'', "''"));
                            out.push('\'');
                        }
                        None => out.push_str("NULL"),
                    }
                    copied = j;
                }
                i = j.max(i + 1);
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoadstayFactory {
    handler: Arc<RoadstayHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoadstayAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoadstayFactory {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let auth_source = RoadstayAuthSource::new(
            ctx.engine.identity().clone(),
            ctx.password.clone(),
        );
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoadstayHandler::new(ctx)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoadstayFactory {
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
    ctx: Arc<ServerContext>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = RoadstayFactory::new(ctx);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_err(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine failure.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::DateRangeConflict(_) => "23P01",
        EngineError::PermissionDenied(_) => "42501",
        EngineError::NotFound(_) => "02000",
        EngineError::InvalidDateRange(_) => "22008",
        EngineError::InvalidStateTransition(_) | EngineError::UnitUnavailable(_) => "55000",
        EngineError::StorageError(_) => "58000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::UnknownExtra(_) => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_err(sqlstate(&e), e.to_string())
}

fn directory_err(e: DirectoryError) -> PgWireError {
    match e {
        DirectoryError::Invalid(msg) => user_err("22023", msg),
        DirectoryError::UnknownUnit(id) => engine_err(EngineError::NotFound(id)),
        other => engine_err(other.into()),
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::InvalidDate(_) | SqlError::Range(_) => "22008",
        SqlError::InvalidValue(_) => "22023",
        _ => "42601",
    };
    user_err(code, e.to_string())
}
