//! A filter that registers every callback and traces each event to
//! stderr, letting everything through. Useful to watch what the host
//! actually sends, and as a template for real filters.

use smtpd_filter::{Filter, Response};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct SessionTrace {
    rdns: String,
    data_lines: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the protocol; diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut filter = Filter::<SessionTrace>::new();

    let reports = filter.smtp_in().report();
    reports.session_allocator(SessionTrace::default);
    reports.on_link_connect(|_, session, rdns, fcrdns, src, dest| {
        info!("{session}: link-connect {rdns}|{fcrdns}|{src}|{dest}");
        let _ = session.with_data(|trace| trace.rdns = rdns.to_string());
    });
    reports.on_link_disconnect(|_, session| {
        let summary = session.with_data(|trace| (trace.rdns.clone(), trace.data_lines));
        match summary {
            Some((rdns, data_lines)) => {
                info!("{session}: link-disconnect rdns={rdns} data_lines={data_lines}")
            }
            None => info!("{session}: link-disconnect"),
        }
    });
    reports.on_link_greeting(|_, session, hostname| {
        info!("{session}: link-greeting {hostname}");
    });
    reports.on_link_identify(|_, session, method, hostname| {
        info!("{session}: link-identify {method}|{hostname}");
    });
    reports.on_link_auth(|_, session, result, username| {
        info!("{session}: link-auth {result}|{username}");
    });
    reports.on_link_tls(|_, session, tls| {
        info!("{session}: link-tls {tls}");
    });
    reports.on_tx_reset(|_, session, msgid| {
        info!("{session}: tx-reset {msgid}");
    });
    reports.on_tx_begin(|_, session, msgid| {
        info!("{session}: tx-begin {msgid}");
    });
    reports.on_tx_mail(|_, session, msgid, result, from| {
        info!("{session}: tx-mail {msgid}|{result}|{from}");
    });
    reports.on_tx_rcpt(|_, session, msgid, result, to| {
        info!("{session}: tx-rcpt {msgid}|{result}|{to}");
    });
    reports.on_tx_envelope(|_, session, msgid, envelope| {
        info!("{session}: tx-envelope {msgid}|{envelope}");
    });
    reports.on_tx_data(|_, session, msgid, result| {
        info!("{session}: tx-data {msgid}|{result}");
    });
    reports.on_tx_commit(|_, session, msgid, size| {
        info!("{session}: tx-commit {msgid}|{size}");
    });
    reports.on_tx_rollback(|_, session, msgid| {
        info!("{session}: tx-rollback {msgid}");
    });
    reports.on_protocol_client(|_, session, command| {
        info!("{session}: protocol-client {command}");
    });
    reports.on_protocol_server(|_, session, response| {
        info!("{session}: protocol-server {response}");
    });
    reports.on_filter_report(|_, session, kind, name, message| {
        info!("{session}: filter-report {kind}|{name}|{message}");
    });
    reports.on_filter_response(|_, session, phase, response, params| {
        info!("{session}: filter-response {phase}|{response}|{params:?}");
    });
    reports.on_timeout(|_, session| {
        info!("{session}: timeout");
    });

    let requests = filter.smtp_in().filter();
    requests.on_connect(|_, session, rdns, src| {
        info!("{session}: connect {rdns}|{src}");
        Response::proceed()
    });
    requests.on_helo(|_, session, hostname| {
        info!("{session}: helo {hostname}");
        Response::proceed()
    });
    requests.on_ehlo(|_, session, hostname| {
        info!("{session}: ehlo {hostname}");
        Response::proceed()
    });
    requests.on_starttls(|_, session, tls| {
        info!("{session}: starttls {tls}");
        Response::proceed()
    });
    requests.on_auth(|_, session, method| {
        info!("{session}: auth {method}");
        Response::proceed()
    });
    requests.on_mail_from(|_, session, from| {
        info!("{session}: mail-from {from}");
        Response::proceed()
    });
    requests.on_rcpt_to(|_, session, to| {
        info!("{session}: rcpt-to {to}");
        Response::proceed()
    });
    requests.on_data(|_, session| {
        info!("{session}: data");
        Response::proceed()
    });
    requests.on_data_line(|_, session, line| {
        let _ = session.with_data(|trace| trace.data_lines += 1);
        vec![line.to_string()]
    });
    requests.on_commit(|_, session| {
        info!("{session}: commit");
        Response::proceed()
    });

    filter.dispatch().await?;
    Ok(())
}
