use crate::service::{Service, UnknownService};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use smtpd_wire::{parse_timestamp, split_min, FieldCountError, TimestampParseError};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Protocol version spoken by the table engine. Frames carrying any other
/// version are a fatal protocol violation.
pub const TABLE_PROTOCOL_VERSION: &str = "0.1";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("i/o error on the host channel")]
    Io(#[from] std::io::Error),
    #[error("unexpected end of input from the host")]
    UnexpectedEof,
    #[error(transparent)]
    FieldCount(#[from] FieldCountError),
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("unsupported protocol version {0:?}")]
    UnsupportedVersion(String),
    #[error(transparent)]
    Timestamp(#[from] TimestampParseError),
    #[error("empty table name")]
    EmptyTableName,
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),
    #[error(transparent)]
    Service(#[from] UnknownService),
    #[error("malformed {operation} payload: {reason}")]
    MalformedPayload {
        operation: String,
        reason: String,
    },
}

impl TableError {
    fn malformed(operation: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Timestamp and table name of the query being served, handed to every
/// handler invocation.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub timestamp: DateTime<Utc>,
    pub table: String,
}

type UpdateHandler = Box<dyn Fn(QueryContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type CheckHandler =
    Box<dyn Fn(QueryContext, String) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;
type LookupHandler = Box<
    dyn Fn(QueryContext, String) -> BoxFuture<'static, anyhow::Result<Option<String>>> + Send + Sync,
>;
type FetchHandler =
    Box<dyn Fn(QueryContext) -> BoxFuture<'static, anyhow::Result<Option<String>>> + Send + Sync>;

/// The table engine. Construct one, install handlers, then call
/// [`Table::dispatch`], which owns the process stdio until the host goes
/// away. Registration after dispatch is impossible: dispatch consumes the
/// engine.
#[derive(Default)]
pub struct Table {
    update: Option<UpdateHandler>,
    check: BTreeMap<Service, CheckHandler>,
    lookup: BTreeMap<Service, LookupHandler>,
    fetch: BTreeMap<Service, FetchHandler>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handler run when the host asks the table to refresh
    /// itself. The reply is `ok` unless the handler fails.
    ///
    /// Panics if an update handler is already installed.
    pub fn on_update<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(QueryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let previous = self
            .update
            .replace(Box::new(move |ctx| Box::pin(handler(ctx))));
        assert!(previous.is_none(), "update handler already registered");
        self
    }

    /// Install the existence-check handler for one service.
    ///
    /// Panics if the service already has a check handler.
    pub fn on_check<F, Fut>(&mut self, service: Service, handler: F) -> &mut Self
    where
        F: Fn(QueryContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let previous = self
            .check
            .insert(service, Box::new(move |ctx, key| Box::pin(handler(ctx, key))));
        assert!(
            previous.is_none(),
            "check handler already registered for service {service}"
        );
        self
    }

    /// Install the keyed lookup handler for one service. `Ok(None)` means
    /// the key is not in the table.
    ///
    /// Panics if the service already has a lookup handler.
    pub fn on_lookup<F, Fut>(&mut self, service: Service, handler: F) -> &mut Self
    where
        F: Fn(QueryContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        let previous = self
            .lookup
            .insert(service, Box::new(move |ctx, key| Box::pin(handler(ctx, key))));
        assert!(
            previous.is_none(),
            "lookup handler already registered for service {service}"
        );
        self
    }

    /// Install the keyless fetch handler for one service.
    ///
    /// Panics if the service already has a fetch handler.
    pub fn on_fetch<F, Fut>(&mut self, service: Service, handler: F) -> &mut Self
    where
        F: Fn(QueryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        let previous = self
            .fetch
            .insert(service, Box::new(move |ctx| Box::pin(handler(ctx))));
        assert!(
            previous.is_none(),
            "fetch handler already registered for service {service}"
        );
        self
    }

    fn advertised(&self) -> Vec<&'static str> {
        let mut services: BTreeSet<&Service> = BTreeSet::new();
        services.extend(self.check.keys());
        services.extend(self.lookup.keys());
        services.extend(self.fetch.keys());
        services.into_iter().map(|service| service.name()).collect()
    }

    /// Run the engine over the process stdio. Never returns successfully:
    /// the host closing our stdin, and any protocol violation, end the
    /// process lifetime.
    pub async fn dispatch(self) -> Result<(), TableError> {
        self.dispatch_io(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Run the engine over an arbitrary byte stream pair.
    pub async fn dispatch_io<R, W>(self, input: R, output: W) -> Result<(), TableError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut lines = BufReader::new(input).lines();
        let output = Arc::new(Mutex::new(output));

        // config prelude: everything up to config|ready is consumed
        loop {
            let line = lines.next_line().await?.ok_or(TableError::UnexpectedEof)?;
            if line == "config|ready" {
                break;
            }
        }

        for service in self.advertised() {
            send_reply(&output, format!("register|{service}")).await?;
        }
        send_reply(&output, "register|ready".to_string()).await?;
        tracing::debug!("registration complete, entering dispatch loop");

        let mut tasks = JoinSet::new();
        let result = loop {
            let line = match lines.next_line().await {
                Err(err) => break Err(err.into()),
                Ok(None) => break Err(TableError::UnexpectedEof),
                Ok(Some(line)) => line,
            };
            if let Err(err) = self.handle_line(&line, &output, &mut tasks).await {
                tracing::error!("fatal protocol error on {line:?}: {err}");
                break Err(err);
            }
        };

        // let in-flight queries finish so their replies are not lost
        while tasks.join_next().await.is_some() {}
        result
    }

    async fn handle_line<W>(
        &self,
        line: &str,
        output: &Arc<Mutex<W>>,
        tasks: &mut JoinSet<()>,
    ) -> Result<(), TableError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tracing::trace!("<- {line}");
        let fields = split_min(line, 5)?;
        if fields[0] != "table" {
            return Err(TableError::UnknownCommand(fields[0].to_string()));
        }
        if fields[1] != TABLE_PROTOCOL_VERSION {
            return Err(TableError::UnsupportedVersion(fields[1].to_string()));
        }
        let timestamp = parse_timestamp(fields[2])?;
        let tablename = fields[3];
        if tablename.is_empty() {
            return Err(TableError::EmptyTableName);
        }
        let operation = fields[4];
        let atoms = &fields[5..];
        let ctx = QueryContext {
            timestamp,
            table: tablename.to_string(),
        };

        match operation {
            "update" => {
                if atoms.len() != 1 {
                    return Err(TableError::malformed(operation, "expected <opaque>"));
                }
                // the host does not wait on updates from a backend that
                // never registered one
                let Some(handler) = &self.update else {
                    return Ok(());
                };
                let opaque = atoms[0].to_string();
                let query = handler(ctx);
                let output = output.clone();
                tasks.spawn(async move {
                    let status = match query.await {
                        Ok(()) => "ok",
                        Err(err) => {
                            tracing::error!("update failed: {err:#}");
                            "ko"
                        }
                    };
                    send_task_reply(&output, format!("update-result|{opaque}|{status}")).await;
                });
            }
            "check" => {
                if atoms.len() != 3 {
                    return Err(TableError::malformed(
                        operation,
                        "expected <service>|<opaque>|<key>",
                    ));
                }
                let service: Service = atoms[0].parse()?;
                let opaque = atoms[1].to_string();
                let key = atoms[2].to_string();
                let Some(handler) = self.check.get(&service) else {
                    send_reply(
                        output,
                        format!("check-result|{opaque}|error|no handler registered"),
                    )
                    .await?;
                    return Ok(());
                };
                let query = handler(ctx, key);
                let output = output.clone();
                tasks.spawn(async move {
                    let reply = match query.await {
                        Ok(true) => format!("check-result|{opaque}|found"),
                        Ok(false) => format!("check-result|{opaque}|not-found"),
                        Err(err) => format!("check-result|{opaque}|error|{err:#}"),
                    };
                    send_task_reply(&output, reply).await;
                });
            }
            "fetch" => {
                if atoms.len() != 2 {
                    return Err(TableError::malformed(operation, "expected <service>|<opaque>"));
                }
                let service: Service = atoms[0].parse()?;
                let opaque = atoms[1].to_string();
                let Some(handler) = self.fetch.get(&service) else {
                    send_reply(
                        output,
                        format!("lookup-result|{opaque}|error|no handler registered"),
                    )
                    .await?;
                    return Ok(());
                };
                let query = handler(ctx);
                let output = output.clone();
                tasks.spawn(async move {
                    send_task_reply(&output, lookup_reply(&opaque, query.await)).await;
                });
            }
            "lookup" => {
                if atoms.len() != 3 {
                    return Err(TableError::malformed(
                        operation,
                        "expected <service>|<opaque>|<key>",
                    ));
                }
                let service: Service = atoms[0].parse()?;
                let opaque = atoms[1].to_string();
                let key = atoms[2].to_string();
                let Some(handler) = self.lookup.get(&service) else {
                    send_reply(
                        output,
                        format!("lookup-result|{opaque}|error|no handler registered"),
                    )
                    .await?;
                    return Ok(());
                };
                let query = handler(ctx, key);
                let output = output.clone();
                tasks.spawn(async move {
                    send_task_reply(&output, lookup_reply(&opaque, query.await)).await;
                });
            }
            other => return Err(TableError::UnknownOperation(other.to_string())),
        }
        Ok(())
    }
}

fn lookup_reply(opaque: &str, outcome: anyhow::Result<Option<String>>) -> String {
    match outcome {
        Ok(Some(value)) => format!("lookup-result|{opaque}|found|{value}"),
        Ok(None) => format!("lookup-result|{opaque}|not-found"),
        Err(err) => format!("lookup-result|{opaque}|error|{err:#}"),
    }
}

/// Write one reply line and flush, holding the writer lock for the whole
/// line so concurrent repliers cannot interleave bytes.
async fn send_reply<W>(output: &Mutex<W>, line: String) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tracing::trace!("-> {line}");
    let mut output = output.lock().await;
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

async fn send_task_reply<W>(output: &Mutex<W>, line: String)
where
    W: AsyncWrite + Unpin,
{
    if let Err(err) = send_reply(output, line).await {
        tracing::error!("failed to write reply: {err}");
    }
}
