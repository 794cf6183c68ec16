use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use tokio::net::TcpStream;
use pgwire::tokio::TlsAcceptor;

use crate::auth::{Caller, DirectoryAuthSource, Role, StaffDirectory};
use crate::engine::{Engine, EngineError, NewReservation};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct VenueHandler {
    engine: Arc<Engine>,
    directory: Arc<StaffDirectory>,
    query_parser: Arc<VenueQueryParser>,
}

impl VenueHandler {
    pub fn new(engine: Arc<Engine>, directory: Arc<StaffDirectory>) -> Self {
        Self {
            engine,
            directory,
            query_parser: Arc::new(VenueQueryParser),
        }
    }

    /// The startup handshake already authenticated the user; here we only
    /// attach the opaque caller identity the role gate works on.
    fn resolve_caller<C: ClientInfo>(&self, client: &C) -> Caller {
        let subject = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default();
        let role = self.directory.role_of(&subject).unwrap_or(Role::Viewer);
        Caller { subject, role }
    }

    /// Boundary middleware: mutating commands require ADMIN or STAFF.
    fn authorize(&self, caller: &Caller, cmd: &Command) -> PgWireResult<()> {
        if cmd.is_mutation() && !caller.role.can_mutate() {
            metrics::counter!(observability::PERMISSION_DENIED_TOTAL).increment(1);
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "42501".into(),
                format!("permission denied for {}", caller.subject),
            ))));
        }
        Ok(())
    }

    async fn dispatch<C: ClientInfo>(
        &self,
        client: &C,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let caller = self.resolve_caller(client);
        self.authorize(&caller, &cmd)?;

        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertClient { id, name } => {
                engine.register_client(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertPackage { id, name } => {
                engine.register_package(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertService { id, name } => {
                engine.register_service(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertReservation {
                id,
                client_id,
                date,
                start,
                end,
                status,
                attendees,
                total,
                deposit,
                package_id,
                notes,
            } => {
                engine
                    .create_reservation(NewReservation {
                        id,
                        client_id,
                        date,
                        start,
                        end,
                        status,
                        attendees,
                        total,
                        deposit,
                        package_id,
                        notes,
                        services: Vec::new(),
                        payments: Vec::new(),
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateReservation { id, patch } => {
                engine
                    .update_reservation(id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertServiceLine {
                reservation_id,
                service_id,
                quantity,
            } => {
                engine
                    .add_service_line(reservation_id, service_id, quantity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertPayment {
                reservation_id,
                amount,
                method,
                reference,
            } => {
                engine
                    .record_payment(reservation_id, amount, method, reference)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectReservations { window } => {
                let reservations = engine
                    .list_reservations(window)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(reservations_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encode_reservation_fields(&mut encoder, r)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectReservation { id } => {
                let schema = Arc::new(reservation_detail_schema());
                let rows: Vec<PgWireResult<_>> = match engine.get_reservation(id).await {
                    Some(r) => {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        let row: PgWireResult<_> = (|| {
                            encode_reservation_fields(&mut encoder, &r)?;
                            encoder.encode_field(&json_field(&r.services)?)?;
                            encoder.encode_field(&json_field(&r.payments)?)?;
                            Ok(encoder.take_row())
                        })();
                        vec![row]
                    }
                    None => Vec::new(), // absent target reads as an empty result set
                };

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectClients => {
                let clients = engine.list_clients();
                let schema = Arc::new(clients_schema());
                let rows: Vec<PgWireResult<_>> = clients
                    .iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.id.to_string())?;
                        encoder.encode_field(&c.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                if channel.is_empty()
                    || !channel.chars().all(|c| c.is_alphanumeric() || c == '_')
                {
                    return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel}"),
                    ))));
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("client_id"),
        int8("date"),
        int8("start"),
        int8("end"),
        varchar("status"),
        FieldInfo::new("attendees".into(), None, None, Type::INT4, FieldFormat::Text),
        int8("total"),
        int8("deposit"),
        varchar("package_id"),
        varchar("notes"),
        int8("created_at"),
        int8("updated_at"),
    ]
}

fn reservation_detail_schema() -> Vec<FieldInfo> {
    let mut schema = reservations_schema();
    schema.push(varchar("service_lines"));
    schema.push(varchar("payments"));
    schema
}

fn clients_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("name")]
}

fn encode_reservation_fields(
    encoder: &mut DataRowEncoder,
    r: &Reservation,
) -> PgWireResult<()> {
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.client_id.to_string())?;
    encoder.encode_field(&r.date)?;
    encoder.encode_field(&r.span.start)?;
    encoder.encode_field(&r.span.end)?;
    encoder.encode_field(&r.status.as_str())?;
    encoder.encode_field(&r.attendees.map(|a| a as i32))?;
    encoder.encode_field(&r.total)?;
    encoder.encode_field(&r.deposit)?;
    encoder.encode_field(&r.package_id.map(|p| p.to_string()))?;
    encoder.encode_field(&r.notes)?;
    encoder.encode_field(&r.created_at)?;
    encoder.encode_field(&r.updated_at)?;
    Ok(())
}

fn json_field<T: serde::Serialize>(value: &T) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| PgWireError::ApiError(Box::new(e)))
}

#[async_trait]
impl SimpleQueryHandler for VenueHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.dispatch(client, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct VenueQueryParser;

#[async_trait]
impl QueryParser for VenueQueryParser {
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
        Ok(select_schema_for(stmt).unwrap_or_default())
    }
}

/// Result schema for SELECT statements; None for commands that only return
/// a completion tag.
fn select_schema_for(sql: &str) -> Option<Vec<FieldInfo>> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return None;
    }
    if upper.contains("RESERVATIONS") {
        if upper.contains("WHERE") && upper.contains(" ID") {
            Some(reservation_detail_schema())
        } else {
            Some(reservations_schema())
        }
    } else if upper.contains("CLIENTS") {
        Some(clients_schema())
    } else {
        None
    }
}

#[async_trait]
impl ExtendedQueryHandler for VenueHandler {
    type Statement = String;
    type QueryParser = VenueQueryParser;

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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.dispatch(client, cmd).await?;
        Ok(responses.remove(0))
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
            select_schema_for(&target.statement).unwrap_or_default(),
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
        Ok(DescribePortalResponse::new(
            select_schema_for(&target.statement.statement).unwrap_or_default(),
        ))
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
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

pub struct VenueFactory {
    handler: Arc<VenueHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<DirectoryAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl VenueFactory {
    pub fn new(engine: Arc<Engine>, directory: Arc<StaffDirectory>) -> Self {
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(VenueHandler::new(engine, directory.clone())),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                DirectoryAuthSource(directory),
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for VenueFactory {
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

/// Serve one connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    directory: Arc<StaffDirectory>,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = Arc::new(VenueFactory::new(engine, directory));
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::SlotConflict(_) => {
            metrics::counter!(observability::SLOT_CONFLICTS_TOTAL).increment(1);
            "23P01" // exclusion_violation
        }
        EngineError::ReferenceNotFound { .. } => "23503", // foreign_key_violation
        EngineError::NotFound(_) => "P0002",              // no_data_found
        EngineError::AlreadyExists(_) => "23505",         // unique_violation
        EngineError::InvalidInterval { .. } | EngineError::Validation(_) => "23514", // check_violation
        EngineError::InvalidTransition { .. } => "55000", // object_not_in_prerequisite_state
        EngineError::LimitExceeded(_) => "54000",         // program_limit_exceeded
        EngineError::WalError(_) => "XX000",              // internal_error
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
