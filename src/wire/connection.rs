use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cancel::AbortSignal;
use crate::error::{PgSyncError, ServerError};
use crate::template::{Rendered, Template};
use crate::wire::dsn::{Dsn, SessionParams, SslMode};
use crate::wire::protocol::{self, AuthRequest, BackendMessage, FieldDescription, Notification};
use crate::wire::row::Row;
use crate::wire::text::{PgValue, TextDecoders};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Closed,
    Idle,
    Reserved,
    QueryWriting,
    QueryReading,
}

/// How a query's results are shaped for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// No result expected.
    Void,
    /// Exactly one column per row; rows are unwrapped to bare values.
    Value,
    /// Decoded rows.
    Row,
    /// Command tag plus rows plus field descriptors.
    Full,
}

#[derive(Debug, Default)]
pub struct QueryOptions {
    /// When set, rows are streamed here as they are decoded instead of being
    /// buffered into the result.
    pub row_sink: Option<mpsc::UnboundedSender<Row>>,
    pub abort: Option<AbortSignal>,
}

#[derive(Debug)]
pub enum QueryOutput {
    None,
    Values(Vec<PgValue>),
    Rows(Vec<Row>),
    Full {
        tag: String,
        rows: Vec<Row>,
        fields: Arc<Vec<FieldDescription>>,
    },
}

impl QueryOutput {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryOutput::Rows(rows) | QueryOutput::Full { rows, .. } => rows,
            _ => Vec::new(),
        }
    }

    pub fn into_values(self) -> Vec<PgValue> {
        match self {
            QueryOutput::Values(values) => values,
            _ => Vec::new(),
        }
    }
}

/// Handle for protocol-level cancellation of the query running on the
/// connection this was taken from. Opens a fresh socket and sends a
/// CancelRequest keyed by the backend's secret.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    host: String,
    port: u16,
    process_id: i32,
    secret_key: i32,
}

impl CancelHandle {
    pub async fn cancel(&self) -> Result<(), PgSyncError> {
        let mut socket = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|error| PgSyncError::Wire(format!("Cancel socket failed: {error}")))?;
        socket
            .write_all(&protocol::cancel_request(self.process_id, self.secret_key))
            .await
            .map_err(|error| PgSyncError::Wire(format!("Cancel send failed: {error}")))?;
        let _ = socket.shutdown().await;
        Ok(())
    }
}

/// A single multiplexed socket to PostgreSQL. Processes at most one query at
/// a time; callers needing parallelism use multiple connections.
#[derive(Debug)]
pub struct Connection {
    stream: Option<BufStream<TcpStream>>,
    state: ConnState,
    server_addr: (String, u16),
    backend: Option<(i32, i32)>,
    server_params: HashMap<String, String>,
    notifications: VecDeque<Notification>,
    decoders: TextDecoders,
    session_hash: u64,
    idle_timeout: Option<Duration>,
    last_used: Instant,
}

impl Connection {
    /// Open a connection, authenticate, and issue a `SET` statement per
    /// recognized session parameter.
    pub async fn connect(dsn: &Dsn, session: &SessionParams) -> Result<Self, PgSyncError> {
        if dsn.ssl_mode == SslMode::Require {
            return Err(PgSyncError::Unsupported("TLS (sslmode=require)".to_string()));
        }
        let tcp = TcpStream::connect((dsn.host.as_str(), dsn.port))
            .await
            .map_err(|error| {
                PgSyncError::Wire(format!("Could not reach {}:{}: {error}", dsn.host, dsn.port))
            })?;
        let _ = tcp.set_nodelay(true);
        let mut stream = BufStream::new(tcp);
        write_all(&mut stream, &protocol::startup_message(&dsn.user, &dsn.dbname)).await?;
        flush(&mut stream).await?;

        let mut backend = None;
        let mut server_params = HashMap::new();
        loop {
            match read_message(&mut stream).await? {
                BackendMessage::Authentication(AuthRequest::Ok) => {}
                BackendMessage::Authentication(AuthRequest::CleartextPassword) => {
                    let password = dsn.password.as_deref().ok_or_else(|| {
                        PgSyncError::Wire("Server requires a password".to_string())
                    })?;
                    write_all(&mut stream, &protocol::password_message(password)).await?;
                    flush(&mut stream).await?;
                }
                BackendMessage::Authentication(AuthRequest::Md5Password { salt }) => {
                    let password = dsn.password.as_deref().ok_or_else(|| {
                        PgSyncError::Wire("Server requires a password".to_string())
                    })?;
                    let digest = protocol::md5_password(&dsn.user, password, salt);
                    write_all(&mut stream, &protocol::password_message(&digest)).await?;
                    flush(&mut stream).await?;
                }
                BackendMessage::Authentication(AuthRequest::Sasl(mechanisms)) => {
                    return Err(PgSyncError::Unsupported(format!(
                        "SASL authentication ({})",
                        mechanisms.join(", ")
                    )));
                }
                BackendMessage::Authentication(AuthRequest::Other(code)) => {
                    return Err(PgSyncError::Unsupported(format!(
                        "Authentication method {code}"
                    )));
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => backend = Some((process_id, secret_key)),
                BackendMessage::ParameterStatus { name, value } => {
                    server_params.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    debug!(message = %notice.message, "server notice during startup");
                }
                BackendMessage::ErrorResponse(error) => return Err(PgSyncError::Server(error)),
                BackendMessage::ReadyForQuery { .. } => break,
                other => {
                    warn!(?other, "unexpected message during startup");
                }
            }
        }

        let mut connection = Self {
            stream: Some(stream),
            state: ConnState::Idle,
            server_addr: (dsn.host.clone(), dsn.port),
            backend,
            server_params,
            notifications: VecDeque::new(),
            decoders: TextDecoders::with_builtins(),
            session_hash: session.affinity_hash(),
            idle_timeout: None,
            last_used: Instant::now(),
        };
        for statement in session.set_statements() {
            connection
                .query(QueryType::Void, &Template::raw(statement), QueryOptions::default())
                .await?;
        }
        Ok(connection)
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn session_hash(&self) -> u64 {
        self.session_hash
    }

    pub fn server_parameter(&self, name: &str) -> Option<&str> {
        self.server_params.get(name).map(String::as_str)
    }

    pub fn decoders_mut(&mut self) -> &mut TextDecoders {
        &mut self.decoders
    }

    pub fn set_idle_timeout(&mut self, timeout: Option<Duration>) {
        self.idle_timeout = timeout;
    }

    /// True once the configured idle timeout has elapsed without a query.
    pub fn idle_expired(&self) -> bool {
        self.idle_timeout
            .map(|timeout| self.last_used.elapsed() >= timeout)
            .unwrap_or(false)
    }

    /// Mark the connection as checked out without an active query.
    pub fn reserve(&mut self) {
        if self.state == ConnState::Idle {
            self.state = ConnState::Reserved;
        }
    }

    pub fn release(&mut self) {
        if self.state == ConnState::Reserved {
            self.state = ConnState::Idle;
        }
    }

    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        self.backend.map(|(process_id, secret_key)| CancelHandle {
            host: self.server_addr.0.clone(),
            port: self.server_addr.1,
            process_id,
            secret_key,
        })
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    /// Run one query. The template is rendered first; if any `param` token
    /// captured a positional parameter the extended protocol is used,
    /// otherwise the simple-query path.
    pub async fn query(
        &mut self,
        query_type: QueryType,
        template: &Template,
        options: QueryOptions,
    ) -> Result<QueryOutput, PgSyncError> {
        let rendered = template.render()?;
        self.query_rendered(query_type, rendered, options).await
    }

    /// Run SQL that already carries its `$N` placeholders and parameters.
    pub async fn query_rendered(
        &mut self,
        query_type: QueryType,
        rendered: Rendered,
        mut options: QueryOptions,
    ) -> Result<QueryOutput, PgSyncError> {
        self.ensure_ready()?;
        if let Some(abort) = &options.abort {
            if abort.is_aborted() {
                return Err(PgSyncError::Aborted);
            }
        }
        debug!(sql = %rendered.sql, params = rendered.params.len(), "query");

        self.state = ConnState::QueryWriting;
        if let Err(error) = self.send_query(&rendered).await {
            self.close().await;
            return Err(error);
        }
        self.state = ConnState::QueryReading;
        let result = self.read_results(query_type, &mut options).await;
        match &result {
            Ok(_) | Err(PgSyncError::Server(_)) | Err(PgSyncError::Aborted) => {
                self.state = ConnState::Idle;
                self.last_used = Instant::now();
            }
            Err(_) => self.close().await,
        }
        result
    }

    fn ensure_ready(&self) -> Result<(), PgSyncError> {
        match self.state {
            ConnState::Idle | ConnState::Reserved => Ok(()),
            ConnState::Closed => Err(PgSyncError::Wire("Connection is closed".to_string())),
            ConnState::QueryWriting | ConnState::QueryReading => Err(PgSyncError::Wire(
                "Connection already has an active query".to_string(),
            )),
        }
    }

    /// Prepare a statement server-side and read back its result descriptors
    /// without executing it.
    pub async fn describe(&mut self, sql: &str) -> Result<Vec<FieldDescription>, PgSyncError> {
        self.ensure_ready()?;
        self.state = ConnState::QueryWriting;
        let send = async {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| PgSyncError::Wire("Connection is closed".to_string()))?;
            write_all(stream, &protocol::parse_message("", sql)).await?;
            write_all(stream, &protocol::describe_statement("")).await?;
            write_all(stream, &protocol::sync_message()).await?;
            flush(stream).await
        };
        if let Err(error) = send.await {
            self.close().await;
            return Err(error);
        }
        self.state = ConnState::QueryReading;

        let mut fields = Vec::new();
        let mut server_error = None;
        let mut wire_error = None;
        {
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(PgSyncError::Wire("Connection is closed".to_string())),
            };
            loop {
                match read_message(stream).await {
                    Ok(BackendMessage::RowDescription(descriptors)) => fields = descriptors,
                    Ok(BackendMessage::ErrorResponse(error)) => server_error = Some(error),
                    Ok(BackendMessage::ReadyForQuery { .. }) => break,
                    Ok(_) => {}
                    Err(error) => {
                        wire_error = Some(error);
                        break;
                    }
                }
            }
        }
        if let Some(error) = wire_error {
            self.close().await;
            return Err(error);
        }
        self.state = ConnState::Idle;
        self.last_used = Instant::now();
        match server_error {
            Some(error) => Err(PgSyncError::Server(error)),
            None => Ok(fields),
        }
    }

    /// Close the socket. Safe to call repeatedly, in any state; an in-flight
    /// query is abandoned.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = write_all(&mut stream, &protocol::terminate_message()).await;
            let _ = flush(&mut stream).await;
            let _ = stream.get_mut().shutdown().await;
        }
        self.state = ConnState::Closed;
    }

    async fn send_query(&mut self, rendered: &Rendered) -> Result<(), PgSyncError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PgSyncError::Wire("Connection is closed".to_string()))?;
        if rendered.params.is_empty() {
            write_all(stream, &protocol::query_message(&rendered.sql)).await?;
        } else {
            write_all(stream, &protocol::parse_message("", &rendered.sql)).await?;
            write_all(stream, &protocol::bind_message("", "", &rendered.params)).await?;
            write_all(stream, &protocol::describe_portal("")).await?;
            write_all(stream, &protocol::execute_message("")).await?;
            write_all(stream, &protocol::sync_message()).await?;
        }
        flush(stream).await
    }

    async fn read_results(
        &mut self,
        query_type: QueryType,
        options: &mut QueryOptions,
    ) -> Result<QueryOutput, PgSyncError> {
        let Self {
            stream,
            notifications,
            decoders,
            backend,
            server_addr,
            server_params,
            ..
        } = self;
        let stream = stream
            .as_mut()
            .ok_or_else(|| PgSyncError::Wire("Connection is closed".to_string()))?;

        let mut fields: Arc<Vec<FieldDescription>> = Arc::new(Vec::new());
        let mut rows: Vec<Row> = Vec::new();
        let mut tag = String::new();
        let mut server_error: Option<ServerError> = None;
        let mut aborted = false;
        let mut cancel_sent = false;

        loop {
            let message = match options.abort.as_mut() {
                Some(abort) if !cancel_sent => {
                    tokio::select! {
                        biased;
                        _ = abort.aborted() => {
                            aborted = true;
                            cancel_sent = true;
                            if let Some((process_id, secret_key)) = backend {
                                let handle = CancelHandle {
                                    host: server_addr.0.clone(),
                                    port: server_addr.1,
                                    process_id: *process_id,
                                    secret_key: *secret_key,
                                };
                                tokio::spawn(async move {
                                    if let Err(error) = handle.cancel().await {
                                        warn!(%error, "protocol cancel failed");
                                    }
                                });
                            }
                            continue;
                        }
                        message = read_message(stream) => message?,
                    }
                }
                _ => read_message(stream).await?,
            };
            match message {
                BackendMessage::RowDescription(descriptors) => {
                    fields = Arc::new(descriptors);
                }
                BackendMessage::DataRow(columns) => {
                    if aborted || server_error.is_some() {
                        continue;
                    }
                    let mut values = Vec::with_capacity(columns.len());
                    for (i, column) in columns.into_iter().enumerate() {
                        let value = match column {
                            None => PgValue::Null,
                            Some(text) => {
                                let oid = fields.get(i).map(|f| f.type_oid).unwrap_or(0);
                                decoders.decode(oid, &text)?
                            }
                        };
                        values.push(value);
                    }
                    let row = Row::new(fields.clone(), values);
                    match &options.row_sink {
                        Some(sink) => {
                            let _ = sink.send(row);
                        }
                        None => rows.push(row),
                    }
                }
                BackendMessage::CommandComplete { tag: complete_tag } => tag = complete_tag,
                BackendMessage::EmptyQueryResponse => {}
                BackendMessage::ErrorResponse(error) => server_error = Some(error),
                BackendMessage::NoticeResponse(notice) => {
                    debug!(severity = %notice.severity, message = %notice.message, "server notice");
                }
                BackendMessage::NotificationResponse(notification) => {
                    notifications.push_back(notification);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    server_params.insert(name, value);
                }
                BackendMessage::ReadyForQuery { .. } => break,
                BackendMessage::ParseComplete
                | BackendMessage::BindComplete
                | BackendMessage::CloseComplete
                | BackendMessage::NoData
                | BackendMessage::PortalSuspended
                | BackendMessage::ParameterDescription(_) => {}
                BackendMessage::Unknown { tag } => {
                    warn!(tag, "skipping unrecognized result message");
                }
                other => {
                    warn!(?other, "unexpected message while reading results");
                }
            }
        }

        if aborted {
            return Err(PgSyncError::Aborted);
        }
        if let Some(error) = server_error {
            return Err(PgSyncError::Server(error));
        }
        let output = match query_type {
            QueryType::Void => QueryOutput::None,
            QueryType::Value => {
                let mut values = Vec::with_capacity(rows.len());
                for row in rows {
                    if row.len() != 1 {
                        return Err(PgSyncError::Wire(format!(
                            "Expected a single-column result, found {} columns",
                            row.len()
                        )));
                    }
                    values.extend(row.into_values());
                }
                QueryOutput::Values(values)
            }
            QueryType::Row => QueryOutput::Rows(rows),
            QueryType::Full => QueryOutput::Full { tag, rows, fields },
        };
        Ok(output)
    }

    /// Simple-protocol statement with no result.
    pub async fn execute_simple(&mut self, sql: &str) -> Result<(), PgSyncError> {
        self.query(QueryType::Void, &Template::raw(sql), QueryOptions::default())
            .await
            .map(|_| ())
    }

    pub async fn fetch_rows(&mut self, template: &Template) -> Result<Vec<Row>, PgSyncError> {
        Ok(self
            .query(QueryType::Row, template, QueryOptions::default())
            .await?
            .into_rows())
    }

    /// First value of a single-column result, when any row came back.
    pub async fn fetch_value(
        &mut self,
        template: &Template,
    ) -> Result<Option<PgValue>, PgSyncError> {
        Ok(self
            .query(QueryType::Value, template, QueryOptions::default())
            .await?
            .into_values()
            .into_iter()
            .next())
    }
}

async fn read_message(stream: &mut BufStream<TcpStream>) -> Result<BackendMessage, PgSyncError> {
    let mut header = [0u8; 5];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|error| PgSyncError::Wire(format!("Socket read failed: {error}")))?;
    let tag = header[0];
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len < 4 {
        return Err(PgSyncError::Wire(format!("Invalid message length {len}")));
    }
    let mut payload = vec![0u8; len as usize - 4];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|error| PgSyncError::Wire(format!("Socket read failed: {error}")))?;
    protocol::parse_backend_message(tag, Bytes::from(payload))
}

async fn write_all(
    stream: &mut BufStream<TcpStream>,
    bytes: &[u8],
) -> Result<(), PgSyncError> {
    stream
        .write_all(bytes)
        .await
        .map_err(|error| PgSyncError::Wire(format!("Socket write failed: {error}")))
}

async fn flush(stream: &mut BufStream<TcpStream>) -> Result<(), PgSyncError> {
    stream
        .flush()
        .await
        .map_err(|error| PgSyncError::Wire(format!("Socket flush failed: {error}")))
}
