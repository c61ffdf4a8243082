//! Callback slot tables and the registration catalogue.
//!
//! Every report event and filter verb has one optional slot; installing a
//! callback is what causes the event to be advertised during the
//! handshake. The host must never send an event that was not advertised.

use crate::response::Response;
use crate::session::Session;
use chrono::{DateTime, Utc};
use smtpd_wire::PeerAddress;

pub type LinkConnectCb<S> =
    Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &str, &PeerAddress, &PeerAddress) + Send>;
pub type LinkDisconnectCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>) + Send>;
pub type LinkGreetingCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str) + Send>;
pub type LinkIdentifyCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &str) + Send>;
pub type LinkAuthCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &str) + Send>;
pub type LinkTlsCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str) + Send>;

pub type TxMessageCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str) + Send>;
pub type TxMailCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &str, &str) + Send>;
pub type TxRcptCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &str, &str) + Send>;
pub type TxEnvelopeCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &str) + Send>;
pub type TxDataCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &str) + Send>;
pub type TxCommitCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, u64) + Send>;

pub type ProtocolCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str) + Send>;
pub type FilterReportCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &str, &str) + Send>;
pub type FilterResponseCb<S> =
    Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &str, &[&str]) + Send>;
pub type TimeoutCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>) + Send>;

pub type ConnectRequestCb<S> =
    Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str, &PeerAddress) -> Response + Send>;
pub type ParamRequestCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str) -> Response + Send>;
pub type PhaseRequestCb<S> = Box<dyn FnMut(DateTime<Utc>, &Session<S>) -> Response + Send>;
pub type DataLineRequestCb<S> =
    Box<dyn FnMut(DateTime<Utc>, &Session<S>, &str) -> Vec<String> + Send>;

/// Report callbacks for one direction (`smtp-in` or `smtp-out`). Report
/// events are passive: the host expects no reply.
pub struct Reporting<S> {
    pub(crate) session_allocator: Option<Box<dyn Fn() -> S + Send>>,
    pub(crate) link_connect: Option<LinkConnectCb<S>>,
    pub(crate) link_greeting: Option<LinkGreetingCb<S>>,
    pub(crate) link_identify: Option<LinkIdentifyCb<S>>,
    pub(crate) link_tls: Option<LinkTlsCb<S>>,
    pub(crate) link_auth: Option<LinkAuthCb<S>>,
    pub(crate) link_disconnect: Option<LinkDisconnectCb<S>>,
    pub(crate) tx_reset: Option<TxMessageCb<S>>,
    pub(crate) tx_begin: Option<TxMessageCb<S>>,
    pub(crate) tx_mail: Option<TxMailCb<S>>,
    pub(crate) tx_rcpt: Option<TxRcptCb<S>>,
    pub(crate) tx_envelope: Option<TxEnvelopeCb<S>>,
    pub(crate) tx_data: Option<TxDataCb<S>>,
    pub(crate) tx_commit: Option<TxCommitCb<S>>,
    pub(crate) tx_rollback: Option<TxMessageCb<S>>,
    pub(crate) protocol_client: Option<ProtocolCb<S>>,
    pub(crate) protocol_server: Option<ProtocolCb<S>>,
    pub(crate) filter_report: Option<FilterReportCb<S>>,
    pub(crate) filter_response: Option<FilterResponseCb<S>>,
    pub(crate) timeout: Option<TimeoutCb<S>>,
}

impl<S> Default for Reporting<S> {
    fn default() -> Self {
        Self {
            session_allocator: None,
            link_connect: None,
            link_greeting: None,
            link_identify: None,
            link_tls: None,
            link_auth: None,
            link_disconnect: None,
            tx_reset: None,
            tx_begin: None,
            tx_mail: None,
            tx_rcpt: None,
            tx_envelope: None,
            tx_data: None,
            tx_commit: None,
            tx_rollback: None,
            protocol_client: None,
            protocol_server: None,
            filter_report: None,
            filter_response: None,
            timeout: None,
        }
    }
}

impl<S> Reporting<S> {
    /// Install the allocator that produces the per-session user data.
    ///
    /// Registering an allocator implicitly advertises `link-connect` and
    /// `link-disconnect` so the engine can track the session lifecycle
    /// even when no callback is installed on those events.
    pub fn session_allocator(&mut self, alloc: impl Fn() -> S + Send + 'static) -> &mut Self {
        self.session_allocator = Some(Box::new(alloc));
        self
    }

    /// Callback arguments: rdns, fcrdns, source address, destination
    /// address.
    pub fn on_link_connect(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &str, &PeerAddress, &PeerAddress)
            + Send
            + 'static,
    ) -> &mut Self {
        self.link_connect = Some(Box::new(cb));
        self
    }

    pub fn on_link_disconnect(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>) + Send + 'static,
    ) -> &mut Self {
        self.link_disconnect = Some(Box::new(cb));
        self
    }

    /// Callback argument: the announced hostname.
    pub fn on_link_greeting(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) + Send + 'static,
    ) -> &mut Self {
        self.link_greeting = Some(Box::new(cb));
        self
    }

    /// Callback arguments: identification method, hostname.
    pub fn on_link_identify(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &str) + Send + 'static,
    ) -> &mut Self {
        self.link_identify = Some(Box::new(cb));
        self
    }

    /// Callback arguments: authentication result, username.
    pub fn on_link_auth(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &str) + Send + 'static,
    ) -> &mut Self {
        self.link_auth = Some(Box::new(cb));
        self
    }

    /// Callback argument: the negotiated TLS parameter string.
    pub fn on_link_tls(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) + Send + 'static,
    ) -> &mut Self {
        self.link_tls = Some(Box::new(cb));
        self
    }

    pub fn on_tx_reset(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) + Send + 'static,
    ) -> &mut Self {
        self.tx_reset = Some(Box::new(cb));
        self
    }

    pub fn on_tx_begin(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) + Send + 'static,
    ) -> &mut Self {
        self.tx_begin = Some(Box::new(cb));
        self
    }

    /// Callback arguments: message id, result, sender address.
    pub fn on_tx_mail(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &str, &str) + Send + 'static,
    ) -> &mut Self {
        self.tx_mail = Some(Box::new(cb));
        self
    }

    /// Callback arguments: message id, result, recipient address.
    pub fn on_tx_rcpt(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &str, &str) + Send + 'static,
    ) -> &mut Self {
        self.tx_rcpt = Some(Box::new(cb));
        self
    }

    /// Callback arguments: message id, envelope id.
    pub fn on_tx_envelope(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &str) + Send + 'static,
    ) -> &mut Self {
        self.tx_envelope = Some(Box::new(cb));
        self
    }

    /// Callback arguments: message id, result.
    pub fn on_tx_data(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &str) + Send + 'static,
    ) -> &mut Self {
        self.tx_data = Some(Box::new(cb));
        self
    }

    /// Callback arguments: message id, message size in bytes.
    pub fn on_tx_commit(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, u64) + Send + 'static,
    ) -> &mut Self {
        self.tx_commit = Some(Box::new(cb));
        self
    }

    pub fn on_tx_rollback(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) + Send + 'static,
    ) -> &mut Self {
        self.tx_rollback = Some(Box::new(cb));
        self
    }

    /// Callback argument: the raw client command line, `|` included.
    pub fn on_protocol_client(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) + Send + 'static,
    ) -> &mut Self {
        self.protocol_client = Some(Box::new(cb));
        self
    }

    /// Callback argument: the raw server response line, `|` included.
    pub fn on_protocol_server(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) + Send + 'static,
    ) -> &mut Self {
        self.protocol_server = Some(Box::new(cb));
        self
    }

    /// Callback arguments: filter kind, filter name, message.
    pub fn on_filter_report(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &str, &str) + Send + 'static,
    ) -> &mut Self {
        self.filter_report = Some(Box::new(cb));
        self
    }

    /// Callback arguments: phase, response, remaining parameters.
    pub fn on_filter_response(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &str, &[&str]) + Send + 'static,
    ) -> &mut Self {
        self.filter_response = Some(Box::new(cb));
        self
    }

    pub fn on_timeout(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>) + Send + 'static,
    ) -> &mut Self {
        self.timeout = Some(Box::new(cb));
        self
    }

    pub(crate) fn advertised(&self) -> Vec<&'static str> {
        let mut events = Vec::new();
        if self.link_connect.is_some() || self.session_allocator.is_some() {
            events.push("link-connect");
        }
        if self.link_greeting.is_some() {
            events.push("link-greeting");
        }
        if self.link_identify.is_some() {
            events.push("link-identify");
        }
        if self.link_tls.is_some() {
            events.push("link-tls");
        }
        if self.link_auth.is_some() {
            events.push("link-auth");
        }
        if self.link_disconnect.is_some() || self.session_allocator.is_some() {
            events.push("link-disconnect");
        }
        if self.tx_reset.is_some() {
            events.push("tx-reset");
        }
        if self.tx_begin.is_some() {
            events.push("tx-begin");
        }
        if self.tx_mail.is_some() {
            events.push("tx-mail");
        }
        if self.tx_rcpt.is_some() {
            events.push("tx-rcpt");
        }
        if self.tx_envelope.is_some() {
            events.push("tx-envelope");
        }
        if self.tx_data.is_some() {
            events.push("tx-data");
        }
        if self.tx_commit.is_some() {
            events.push("tx-commit");
        }
        if self.tx_rollback.is_some() {
            events.push("tx-rollback");
        }
        if self.protocol_client.is_some() {
            events.push("protocol-client");
        }
        if self.protocol_server.is_some() {
            events.push("protocol-server");
        }
        if self.filter_report.is_some() {
            events.push("filter-report");
        }
        if self.filter_response.is_some() {
            events.push("filter-response");
        }
        if self.timeout.is_some() {
            events.push("timeout");
        }
        events
    }
}

/// Filter request callbacks. Each request carries an opaque token and is
/// answered with exactly one `filter-result` line, except `data-line`
/// which fans out replacement lines instead.
pub struct Filtering<S> {
    pub(crate) connect: Option<ConnectRequestCb<S>>,
    pub(crate) helo: Option<ParamRequestCb<S>>,
    pub(crate) ehlo: Option<ParamRequestCb<S>>,
    pub(crate) starttls: Option<ParamRequestCb<S>>,
    pub(crate) auth: Option<ParamRequestCb<S>>,
    pub(crate) mail_from: Option<ParamRequestCb<S>>,
    pub(crate) rcpt_to: Option<ParamRequestCb<S>>,
    pub(crate) data: Option<PhaseRequestCb<S>>,
    pub(crate) data_line: Option<DataLineRequestCb<S>>,
    pub(crate) commit: Option<PhaseRequestCb<S>>,
    pub(crate) noop: Option<PhaseRequestCb<S>>,
    pub(crate) rset: Option<PhaseRequestCb<S>>,
    pub(crate) help: Option<PhaseRequestCb<S>>,
    pub(crate) wiz: Option<PhaseRequestCb<S>>,
}

impl<S> Default for Filtering<S> {
    fn default() -> Self {
        Self {
            connect: None,
            helo: None,
            ehlo: None,
            starttls: None,
            auth: None,
            mail_from: None,
            rcpt_to: None,
            data: None,
            data_line: None,
            commit: None,
            noop: None,
            rset: None,
            help: None,
            wiz: None,
        }
    }
}

impl<S> Filtering<S> {
    /// Callback arguments: rdns, source address.
    pub fn on_connect(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str, &PeerAddress) -> Response + Send + 'static,
    ) -> &mut Self {
        self.connect = Some(Box::new(cb));
        self
    }

    pub fn on_helo(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) -> Response + Send + 'static,
    ) -> &mut Self {
        self.helo = Some(Box::new(cb));
        self
    }

    pub fn on_ehlo(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) -> Response + Send + 'static,
    ) -> &mut Self {
        self.ehlo = Some(Box::new(cb));
        self
    }

    pub fn on_starttls(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) -> Response + Send + 'static,
    ) -> &mut Self {
        self.starttls = Some(Box::new(cb));
        self
    }

    /// Callback argument: the authentication method.
    pub fn on_auth(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) -> Response + Send + 'static,
    ) -> &mut Self {
        self.auth = Some(Box::new(cb));
        self
    }

    pub fn on_mail_from(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) -> Response + Send + 'static,
    ) -> &mut Self {
        self.mail_from = Some(Box::new(cb));
        self
    }

    pub fn on_rcpt_to(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) -> Response + Send + 'static,
    ) -> &mut Self {
        self.rcpt_to = Some(Box::new(cb));
        self
    }

    pub fn on_data(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>) -> Response + Send + 'static,
    ) -> &mut Self {
        self.data = Some(Box::new(cb));
        self
    }

    /// The handler receives one message body line and returns the lines
    /// to forward in its place; an empty vector swallows the line.
    pub fn on_data_line(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>, &str) -> Vec<String> + Send + 'static,
    ) -> &mut Self {
        self.data_line = Some(Box::new(cb));
        self
    }

    pub fn on_commit(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>) -> Response + Send + 'static,
    ) -> &mut Self {
        self.commit = Some(Box::new(cb));
        self
    }

    pub fn on_noop(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>) -> Response + Send + 'static,
    ) -> &mut Self {
        self.noop = Some(Box::new(cb));
        self
    }

    pub fn on_rset(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>) -> Response + Send + 'static,
    ) -> &mut Self {
        self.rset = Some(Box::new(cb));
        self
    }

    pub fn on_help(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>) -> Response + Send + 'static,
    ) -> &mut Self {
        self.help = Some(Box::new(cb));
        self
    }

    pub fn on_wiz(
        &mut self,
        cb: impl FnMut(DateTime<Utc>, &Session<S>) -> Response + Send + 'static,
    ) -> &mut Self {
        self.wiz = Some(Box::new(cb));
        self
    }

    pub(crate) fn advertised(&self) -> Vec<&'static str> {
        let mut events = Vec::new();
        if self.connect.is_some() {
            events.push("connect");
        }
        if self.helo.is_some() {
            events.push("helo");
        }
        if self.ehlo.is_some() {
            events.push("ehlo");
        }
        if self.starttls.is_some() {
            events.push("starttls");
        }
        if self.auth.is_some() {
            events.push("auth");
        }
        if self.mail_from.is_some() {
            events.push("mail-from");
        }
        if self.rcpt_to.is_some() {
            events.push("rcpt-to");
        }
        if self.data.is_some() {
            events.push("data");
        }
        if self.data_line.is_some() {
            events.push("data-line");
        }
        if self.commit.is_some() {
            events.push("commit");
        }
        if self.noop.is_some() {
            events.push("noop");
        }
        if self.rset.is_some() {
            events.push("rset");
        }
        if self.help.is_some() {
            events.push("help");
        }
        if self.wiz.is_some() {
            events.push("wiz");
        }
        events
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn advertised_reports_follow_registration() {
        let mut reporting = Reporting::<()>::default();
        assert!(reporting.advertised().is_empty());

        reporting.on_tx_commit(|_, _, _, _| {});
        reporting.on_link_greeting(|_, _, _| {});
        assert_eq!(reporting.advertised(), vec!["link-greeting", "tx-commit"]);
    }

    #[test]
    fn allocator_implies_lifecycle_events() {
        let mut reporting = Reporting::<u32>::default();
        reporting.session_allocator(|| 0);
        assert_eq!(
            reporting.advertised(),
            vec!["link-connect", "link-disconnect"]
        );
    }

    #[test]
    fn advertised_filters_follow_registration() {
        let mut filtering = Filtering::<()>::default();
        assert!(filtering.advertised().is_empty());

        filtering.on_mail_from(|_, _, _| Response::proceed());
        filtering.on_wiz(|_, _| Response::reject("502 nice try"));
        assert_eq!(filtering.advertised(), vec!["mail-from", "wiz"]);
    }
}
