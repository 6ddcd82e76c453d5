use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SharedPasswordSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub const CONFLICT_MESSAGE: &str =
    "diner has existing reservation within the requested reservation window";

pub struct TableMatchHandler {
    engine: Arc<Engine>,
    query_parser: Arc<TableMatchQueryParser>,
}

impl TableMatchHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(TableMatchQueryParser),
        }
    }

    /// Parse, execute and record RED metrics for one statement. Result
    /// columns are encoded in `format`.
    async fn run(&self, query: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        match cmd {
            Command::SelectAvailability {
                diner_ids,
                reservation_time,
            } => {
                let tables = match self
                    .engine
                    .find_availability(&diner_ids, reservation_time)
                    .await
                    .map_err(engine_err)?
                {
                    Availability::Open(tables) => tables,
                    Availability::Conflict => return Err(conflict_err()),
                };

                let schema = Arc::new(availability_schema(format));
                let rows: Vec<PgWireResult<_>> = tables
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t.restaurant_id)?;
                        encoder.encode_field(&t.restaurant_name)?;
                        encoder.encode_field(&t.table_id)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertReservation {
                table_id,
                restaurant_id,
                reservation_time,
                diner_ids,
                checked,
            } => {
                let created = if checked {
                    self.engine
                        .book_reservation(table_id, restaurant_id, reservation_time, &diner_ids)
                        .await
                } else {
                    self.engine
                        .create_reservation(table_id, restaurant_id, reservation_time, &diner_ids)
                        .await
                }
                .map_err(engine_err)?;

                let schema = Arc::new(reservation_schema(format));
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&created.reservation_id)?;
                encoder.encode_field(&created.restaurant_id)?;
                encoder.encode_field(&created.table_id)?;
                encoder.encode_field(&format_diner_ids(&created.diner_ids))?;
                encoder.encode_field(&format_store_time(&created.reservation_time))?;
                let rows = vec![Ok(encoder.take_row())];

                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::DeleteReservation { id } => {
                let removed = self.engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(removed)),
                ))
            }
        }
    }
}

const AVAILABILITY_COLUMNS: [(&str, Type); 3] = [
    ("restaurant_id", Type::INT8),
    ("restaurant_name", Type::VARCHAR),
    ("table_id", Type::INT8),
];

const RESERVATION_COLUMNS: [(&str, Type); 5] = [
    ("reservation_id", Type::INT8),
    ("restaurant_id", Type::INT8),
    ("table_id", Type::INT8),
    ("diner_ids", Type::VARCHAR),
    ("reservation_time", Type::VARCHAR),
];

/// Field descriptions with each column's wire format taken from `format`.
/// The simple protocol always passes `Format::UnifiedText`; extended clients
/// pick per column in Bind.
fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn availability_schema(format: &Format) -> Vec<FieldInfo> {
    fields(&AVAILABILITY_COLUMNS, format)
}

fn reservation_schema(format: &Format) -> Vec<FieldInfo> {
    fields(&RESERVATION_COLUMNS, format)
}

/// Result columns a statement will produce, decided from its text.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("SELECT") && upper.contains("AVAILABILITY") {
        availability_schema(format)
    } else if upper.starts_with("INSERT") {
        reservation_schema(format)
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for TableMatchHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TableMatchQueryParser;

#[async_trait]
impl QueryParser for TableMatchQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TableMatchHandler {
    type Statement = String;
    type QueryParser = TableMatchQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&sql, &portal.result_column_format).await
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
            result_schema(&target.statement, &Format::UnifiedText),
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
            &target.result_column_format,
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

/// Inline bound text parameters as quoted literals in one left-to-right
/// pass, so placeholder text inside a bound value is never rewritten.
/// Placeholders with no bound value are left as written.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let param = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        if let Some(param) = param {
            result.push_str(&sql[copied..i]);
            match param {
                Some(value) => {
                    let text = String::from_utf8_lossy(value.as_ref()).replace('\'', "''");
                    result.push('\'');
                    result.push_str(&text);
                    result.push('\'');
                }
                None => result.push_str("NULL"),
            }
            copied = end;
        }
        i = end.max(i + 1);
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TableMatchFactory {
    handler: Arc<TableMatchHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPasswordSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TableMatchFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(TableMatchHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPasswordSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TableMatchFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = TableMatchFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn conflict_err() -> PgWireError {
    user_error("23P01", CONFLICT_MESSAGE.into())
}

fn engine_err(e: EngineError) -> PgWireError {
    match e {
        EngineError::Conflict(_) => conflict_err(),
        EngineError::InvalidRequest(_) | EngineError::LimitExceeded(_) => {
            user_error("22023", e.to_string())
        }
        EngineError::DataAccess(_) => {
            tracing::error!("data access failure: {e}");
            user_error("58000", e.to_string())
        }
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    match e {
        SqlError::Value(_) => user_error("22023", e.to_string()),
        _ => user_error("42601", e.to_string()),
    }
}
