use crate::events::{Filtering, Reporting};
use crate::session::{InvalidSessionId, Session, SessionId, SessionStore};
use chrono::{DateTime, Utc};
use smtpd_wire::{
    join, parse_timestamp, split_min, AddressParseError, FieldCountError, PeerAddress,
    TimestampParseError,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Protocol version spoken by the filter engine. Frames carrying any
/// other version are a fatal protocol violation.
pub const FILTER_PROTOCOL_VERSION: &str = "0.7";

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("i/o error on the host channel")]
    Io(#[from] std::io::Error),
    #[error("unexpected end of input from the host")]
    UnexpectedEof,
    #[error(transparent)]
    FieldCount(#[from] FieldCountError),
    #[error("unsupported protocol version {0:?}")]
    UnsupportedVersion(String),
    #[error(transparent)]
    Timestamp(#[from] TimestampParseError),
    #[error("unknown direction {0:?}")]
    UnknownDirection(String),
    #[error(transparent)]
    SessionId(#[from] InvalidSessionId),
    #[error(transparent)]
    Address(#[from] AddressParseError),
    #[error("unknown {kind} event {event:?}")]
    UnknownEvent { kind: &'static str, event: String },
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("malformed {event} payload: {reason}")]
    MalformedPayload { event: String, reason: String },
}

impl FilterError {
    fn malformed(event: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

/// Callbacks for the inbound mail flow: reports plus filter requests.
pub struct SmtpIn<S> {
    pub(crate) report: Reporting<S>,
    pub(crate) filter: Filtering<S>,
}

impl<S> Default for SmtpIn<S> {
    fn default() -> Self {
        Self {
            report: Reporting::default(),
            filter: Filtering::default(),
        }
    }
}

impl<S> SmtpIn<S> {
    pub fn report(&mut self) -> &mut Reporting<S> {
        &mut self.report
    }

    pub fn filter(&mut self) -> &mut Filtering<S> {
        &mut self.filter
    }
}

/// Callbacks for the outbound relay flow. Only reports exist here; the
/// host never sends filter requests for `smtp-out`.
pub struct SmtpOut<S> {
    pub(crate) report: Reporting<S>,
}

impl<S> Default for SmtpOut<S> {
    fn default() -> Self {
        Self {
            report: Reporting::default(),
        }
    }
}

impl<S> SmtpOut<S> {
    pub fn report(&mut self) -> &mut Reporting<S> {
        &mut self.report
    }
}

/// The filter engine. Construct one, install callbacks, then call
/// [`Filter::dispatch`], which owns the process stdio until the host
/// goes away.
///
/// `S` is the per-session user data produced by the session allocator;
/// processes that keep no per-session state use `Filter<()>`.
pub struct Filter<S = ()> {
    smtp_in: SmtpIn<S>,
    smtp_out: SmtpOut<S>,
    sessions: SessionStore<S>,
}

impl<S> Default for Filter<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Filter<S> {
    pub fn new() -> Self {
        Self {
            smtp_in: SmtpIn::default(),
            smtp_out: SmtpOut::default(),
            sessions: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    pub fn smtp_in(&mut self) -> &mut SmtpIn<S> {
        &mut self.smtp_in
    }

    pub fn smtp_out(&mut self) -> &mut SmtpOut<S> {
        &mut self.smtp_out
    }

    /// Run the engine over the process stdio. Never returns successfully:
    /// the host closing our stdin, and any protocol violation, end the
    /// process lifetime.
    pub async fn dispatch(self) -> Result<(), FilterError> {
        self.dispatch_io(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Run the engine over an arbitrary byte stream pair.
    pub async fn dispatch_io<R, W>(mut self, input: R, mut output: W) -> Result<(), FilterError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(input).lines();

        // config prelude: everything up to config|ready is consumed
        loop {
            let line = lines
                .next_line()
                .await?
                .ok_or(FilterError::UnexpectedEof)?;
            if line == "config|ready" {
                break;
            }
        }

        for event in self.smtp_in.report.advertised() {
            send_line(&mut output, &format!("register|report|smtp-in|{event}")).await?;
        }
        for event in self.smtp_out.report.advertised() {
            send_line(&mut output, &format!("register|report|smtp-out|{event}")).await?;
        }
        for event in self.smtp_in.filter.advertised() {
            send_line(&mut output, &format!("register|filter|smtp-in|{event}")).await?;
        }
        send_line(&mut output, "register|ready").await?;
        tracing::debug!("registration complete, entering dispatch loop");

        loop {
            let line = lines
                .next_line()
                .await?
                .ok_or(FilterError::UnexpectedEof)?;
            if let Err(err) = self.handle_line(&line, &mut output).await {
                tracing::error!("fatal protocol error on {line:?}: {err}");
                return Err(err);
            }
        }
    }

    async fn handle_line<W>(&mut self, line: &str, output: &mut W) -> Result<(), FilterError>
    where
        W: AsyncWrite + Unpin,
    {
        tracing::trace!("<- {line}");
        let fields = split_min(line, 6)?;
        let kind = fields[0];
        if fields[1] != FILTER_PROTOCOL_VERSION {
            return Err(FilterError::UnsupportedVersion(fields[1].to_string()));
        }
        let timestamp = parse_timestamp(fields[2])?;
        let direction = fields[3];
        let event = fields[4];
        let session_id = SessionId::parse(fields[5])?;
        let atoms = &fields[6..];

        match kind {
            "report" => {
                let reporting = match direction {
                    "smtp-in" => &mut self.smtp_in.report,
                    "smtp-out" => &mut self.smtp_out.report,
                    other => return Err(FilterError::UnknownDirection(other.to_string())),
                };
                Self::handle_report(reporting, &self.sessions, timestamp, event, session_id, atoms)
            }
            "filter" => {
                if direction != "smtp-in" {
                    return Err(FilterError::UnknownDirection(direction.to_string()));
                }
                Self::handle_filter(
                    &mut self.smtp_in.filter,
                    &self.sessions,
                    timestamp,
                    event,
                    session_id,
                    atoms,
                    output,
                )
                .await
            }
            other => Err(FilterError::UnknownCommand(other.to_string())),
        }
    }

    fn handle_report(
        reporting: &mut Reporting<S>,
        sessions: &SessionStore<S>,
        timestamp: DateTime<Utc>,
        event: &str,
        session_id: SessionId,
        atoms: &[&str],
    ) -> Result<(), FilterError> {
        let session = Session::new(session_id, sessions.clone());
        match event {
            "link-connect" => {
                if let Some(alloc) = &reporting.session_allocator {
                    sessions.lock().insert(session.id().clone(), alloc());
                }
                if atoms.len() != 4 {
                    return Err(FilterError::malformed(event, "expected exactly 4 arguments"));
                }
                if let Some(cb) = &mut reporting.link_connect {
                    let src: PeerAddress = atoms[2].parse()?;
                    let dest: PeerAddress = atoms[3].parse()?;
                    cb(timestamp, &session, atoms[0], atoms[1], &src, &dest);
                }
            }
            "link-disconnect" => {
                if !atoms.is_empty() {
                    return Err(FilterError::malformed(event, "expected no arguments"));
                }
                if let Some(cb) = &mut reporting.link_disconnect {
                    cb(timestamp, &session);
                }
                sessions.lock().remove(session.id());
            }
            "link-greeting" => {
                if atoms.len() != 1 {
                    return Err(FilterError::malformed(event, "expected exactly 1 argument"));
                }
                if let Some(cb) = &mut reporting.link_greeting {
                    cb(timestamp, &session, atoms[0]);
                }
            }
            "link-identify" => {
                expect_args(event, atoms, 2)?;
                if let Some(cb) = &mut reporting.link_identify {
                    cb(timestamp, &session, atoms[0], atoms[1]);
                }
            }
            "link-auth" => {
                expect_args(event, atoms, 2)?;
                if let Some(cb) = &mut reporting.link_auth {
                    cb(timestamp, &session, atoms[0], atoms[1]);
                }
            }
            "link-tls" => {
                expect_args(event, atoms, 1)?;
                if let Some(cb) = &mut reporting.link_tls {
                    cb(timestamp, &session, atoms[0]);
                }
            }
            "tx-reset" => {
                expect_args(event, atoms, 1)?;
                if let Some(cb) = &mut reporting.tx_reset {
                    cb(timestamp, &session, atoms[0]);
                }
            }
            "tx-begin" => {
                expect_args(event, atoms, 1)?;
                if let Some(cb) = &mut reporting.tx_begin {
                    cb(timestamp, &session, atoms[0]);
                }
            }
            "tx-mail" => {
                expect_args(event, atoms, 3)?;
                if let Some(cb) = &mut reporting.tx_mail {
                    cb(timestamp, &session, atoms[0], atoms[1], atoms[2]);
                }
            }
            "tx-rcpt" => {
                expect_args(event, atoms, 3)?;
                if let Some(cb) = &mut reporting.tx_rcpt {
                    cb(timestamp, &session, atoms[0], atoms[1], atoms[2]);
                }
            }
            "tx-envelope" => {
                expect_args(event, atoms, 2)?;
                if let Some(cb) = &mut reporting.tx_envelope {
                    cb(timestamp, &session, atoms[0], atoms[1]);
                }
            }
            "tx-data" => {
                expect_args(event, atoms, 2)?;
                if let Some(cb) = &mut reporting.tx_data {
                    cb(timestamp, &session, atoms[0], atoms[1]);
                }
            }
            "tx-commit" => {
                expect_args(event, atoms, 2)?;
                let size: u64 = atoms[1]
                    .parse()
                    .map_err(|_| FilterError::malformed(event, "size is not a decimal integer"))?;
                if let Some(cb) = &mut reporting.tx_commit {
                    cb(timestamp, &session, atoms[0], size);
                }
            }
            "tx-rollback" => {
                expect_args(event, atoms, 1)?;
                if let Some(cb) = &mut reporting.tx_rollback {
                    cb(timestamp, &session, atoms[0]);
                }
            }
            "protocol-client" => {
                if let Some(cb) = &mut reporting.protocol_client {
                    cb(timestamp, &session, &join(atoms));
                }
            }
            "protocol-server" => {
                if let Some(cb) = &mut reporting.protocol_server {
                    cb(timestamp, &session, &join(atoms));
                }
            }
            "filter-report" => {
                expect_args(event, atoms, 3)?;
                if let Some(cb) = &mut reporting.filter_report {
                    cb(timestamp, &session, atoms[0], atoms[1], &join(&atoms[2..]));
                }
            }
            "filter-response" => {
                expect_args(event, atoms, 2)?;
                if let Some(cb) = &mut reporting.filter_response {
                    cb(timestamp, &session, atoms[0], atoms[1], &atoms[2..]);
                }
            }
            "timeout" => {
                if let Some(cb) = &mut reporting.timeout {
                    cb(timestamp, &session);
                }
            }
            other => {
                return Err(FilterError::UnknownEvent {
                    kind: "report",
                    event: other.to_string(),
                })
            }
        }
        Ok(())
    }

    async fn handle_filter<W>(
        filtering: &mut Filtering<S>,
        sessions: &SessionStore<S>,
        timestamp: DateTime<Utc>,
        event: &str,
        session_id: SessionId,
        atoms: &[&str],
        output: &mut W,
    ) -> Result<(), FilterError>
    where
        W: AsyncWrite + Unpin,
    {
        let (token, atoms) = atoms
            .split_first()
            .ok_or_else(|| FilterError::malformed(event, "missing opaque token"))?;
        let session = Session::new(session_id, sessions.clone());

        // An advertised verb with no handler should never arrive; when it
        // does anyway the request is dropped without a reply.
        let response = match event {
            "connect" => match &mut filtering.connect {
                None => return Ok(()),
                Some(cb) => {
                    expect_args(event, atoms, 2)?;
                    let src: PeerAddress = atoms[1].parse()?;
                    cb(timestamp, &session, atoms[0], &src)
                }
            },
            "helo" => match &mut filtering.helo {
                None => return Ok(()),
                Some(cb) => {
                    expect_args(event, atoms, 1)?;
                    cb(timestamp, &session, atoms[0])
                }
            },
            "ehlo" => match &mut filtering.ehlo {
                None => return Ok(()),
                Some(cb) => {
                    expect_args(event, atoms, 1)?;
                    cb(timestamp, &session, atoms[0])
                }
            },
            "starttls" => match &mut filtering.starttls {
                None => return Ok(()),
                Some(cb) => {
                    expect_args(event, atoms, 1)?;
                    cb(timestamp, &session, atoms[0])
                }
            },
            "auth" => match &mut filtering.auth {
                None => return Ok(()),
                Some(cb) => {
                    expect_args(event, atoms, 1)?;
                    cb(timestamp, &session, atoms[0])
                }
            },
            "mail-from" => match &mut filtering.mail_from {
                None => return Ok(()),
                Some(cb) => {
                    expect_args(event, atoms, 1)?;
                    cb(timestamp, &session, atoms[0])
                }
            },
            "rcpt-to" => match &mut filtering.rcpt_to {
                None => return Ok(()),
                Some(cb) => {
                    expect_args(event, atoms, 1)?;
                    cb(timestamp, &session, atoms[0])
                }
            },
            "data" => match &mut filtering.data {
                None => return Ok(()),
                Some(cb) => cb(timestamp, &session),
            },
            "data-line" => {
                // data-line fans out replacement lines and never produces
                // a filter-result
                let Some(cb) = &mut filtering.data_line else {
                    return Ok(());
                };
                let line = join(atoms);
                for replacement in cb(timestamp, &session, &line) {
                    send_line(
                        output,
                        &format!("filter-dataline|{}|{token}|{replacement}", session.id()),
                    )
                    .await?;
                }
                return Ok(());
            }
            "commit" => match &mut filtering.commit {
                None => return Ok(()),
                Some(cb) => cb(timestamp, &session),
            },
            "noop" => match &mut filtering.noop {
                None => return Ok(()),
                Some(cb) => cb(timestamp, &session),
            },
            "rset" => match &mut filtering.rset {
                None => return Ok(()),
                Some(cb) => cb(timestamp, &session),
            },
            "help" => match &mut filtering.help {
                None => return Ok(()),
                Some(cb) => cb(timestamp, &session),
            },
            "wiz" => match &mut filtering.wiz {
                None => return Ok(()),
                Some(cb) => cb(timestamp, &session),
            },
            other => {
                return Err(FilterError::UnknownEvent {
                    kind: "filter",
                    event: other.to_string(),
                })
            }
        };

        send_line(
            output,
            &format!(
                "filter-result|{}|{token}|{}",
                session.id(),
                response.encode()
            ),
        )
        .await?;
        Ok(())
    }
}

fn expect_args(event: &str, atoms: &[&str], expected: usize) -> Result<(), FilterError> {
    if atoms.len() < expected {
        return Err(FilterError::malformed(
            event,
            format!("expected {expected} arguments but found {}", atoms.len()),
        ));
    }
    Ok(())
}

async fn send_line<W>(output: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tracing::trace!("-> {line}");
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
