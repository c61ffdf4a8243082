//! End-to-end exercises of the filter engine over in-memory stdio.

use smtpd_filter::{Filter, FilterError, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const HANDSHAKE: &str = "config|smtp-version|7.4.0\nconfig|protocol|0.7\nconfig|ready\n";

async fn run<S>(filter: Filter<S>, input: &str) -> (Result<(), FilterError>, String) {
    let mut output = Vec::new();
    let result = filter.dispatch_io(input.as_bytes(), &mut output).await;
    (result, String::from_utf8(output).expect("utf8 output"))
}

#[tokio::test]
async fn handshake_advertises_registered_events() {
    let mut filter = Filter::<()>::new();
    filter
        .smtp_in()
        .filter()
        .on_mail_from(|_, _, _| Response::proceed());

    let (result, output) = run(filter, HANDSHAKE).await;
    assert!(matches!(result, Err(FilterError::UnexpectedEof)));
    k9::assert_equal!(output, "register|filter|smtp-in|mail-from\nregister|ready\n");
}

#[tokio::test]
async fn handshake_registers_all_directions() {
    let mut filter = Filter::<()>::new();
    filter.smtp_in().report().on_link_greeting(|_, _, _| {});
    filter.smtp_out().report().on_tx_commit(|_, _, _, _| {});
    filter.smtp_in().filter().on_helo(|_, _, _| Response::proceed());

    let (_, output) = run(filter, HANDSHAKE).await;
    assert_eq!(
        output,
        "register|report|smtp-in|link-greeting\n\
         register|report|smtp-out|tx-commit\n\
         register|filter|smtp-in|helo\n\
         register|ready\n"
    );
}

#[tokio::test]
async fn helo_proceed() {
    let mut filter = Filter::<()>::new();
    filter.smtp_in().filter().on_helo(|_, _, _| Response::proceed());

    let input = format!(
        "{HANDSHAKE}filter|0.7|1576146008.006099|smtp-in|helo|7641df9771b4ed00|1ef1c203cc576e5d|host.example\n"
    );
    let (_, output) = run(filter, &input).await;
    assert!(output.ends_with("filter-result|7641df9771b4ed00|1ef1c203cc576e5d|proceed\n"));
}

#[tokio::test]
async fn helo_reject_with_message() {
    let mut filter = Filter::<()>::new();
    filter
        .smtp_in()
        .filter()
        .on_helo(|_, _, _| Response::reject("550 go away"));

    let input = format!(
        "{HANDSHAKE}filter|0.7|1576146008.006099|smtp-in|helo|7641df9771b4ed00|1ef1c203cc576e5d|host.example\n"
    );
    let (_, output) = run(filter, &input).await;
    assert!(output.ends_with("filter-result|7641df9771b4ed00|1ef1c203cc576e5d|reject|550 go away\n"));
}

#[tokio::test]
async fn callbacks_see_timestamp_and_parameter() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    let mut filter = Filter::<()>::new();
    filter.smtp_in().filter().on_helo(move |ts, session, helo| {
        log.lock().unwrap().push(format!(
            "{}.{:06} {} {helo}",
            ts.timestamp(),
            ts.timestamp_subsec_micros(),
            session.id()
        ));
        Response::junk()
    });

    let input = format!(
        "{HANDSHAKE}filter|0.7|1576146008.006099|smtp-in|helo|7641df9771b4ed00|tok|host.example\n"
    );
    let (_, output) = run(filter, &input).await;
    assert!(output.ends_with("filter-result|7641df9771b4ed00|tok|junk\n"));
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        ["1576146008.006099 7641df9771b4ed00 host.example"]
    );
}

#[tokio::test]
async fn data_line_fans_out_and_preserves_pipes() {
    let mut filter = Filter::<()>::new();
    filter
        .smtp_in()
        .filter()
        .on_data_line(|_, _, line| {
            assert_eq!(line, "X-Added: yes");
            vec!["A".to_string(), "B|C".to_string()]
        });

    let input = format!("{HANDSHAKE}filter|0.7|1.0|smtp-in|data-line|1111111111111111|TOK|X-Added: yes\n");
    let (_, output) = run(filter, &input).await;
    assert!(output.ends_with(
        "filter-dataline|1111111111111111|TOK|A\n\
         filter-dataline|1111111111111111|TOK|B|C\n"
    ));
    assert!(!output.contains("filter-result"));
}

#[tokio::test]
async fn data_line_handler_may_swallow_lines() {
    let mut filter = Filter::<()>::new();
    filter.smtp_in().filter().on_data_line(|_, _, _| Vec::new());

    let input = format!("{HANDSHAKE}filter|0.7|1.0|smtp-in|data-line|1111111111111111|TOK|secret\n");
    let (result, output) = run(filter, &input).await;
    assert!(matches!(result, Err(FilterError::UnexpectedEof)));
    assert!(output.ends_with("register|ready\n"));
}

#[tokio::test]
async fn data_line_rejoins_pipes_in_input() {
    let seen = Arc::new(Mutex::new(String::new()));
    let line_log = seen.clone();

    let mut filter = Filter::<()>::new();
    filter.smtp_in().filter().on_data_line(move |_, _, line| {
        *line_log.lock().unwrap() = line.to_string();
        vec![line.to_string()]
    });

    let input = format!("{HANDSHAKE}filter|0.7|1.0|smtp-in|data-line|1111111111111111|TOK|a|b|c\n");
    let (_, output) = run(filter, &input).await;
    assert_eq!(*seen.lock().unwrap(), "a|b|c");
    assert!(output.ends_with("filter-dataline|1111111111111111|TOK|a|b|c\n"));
}

#[tokio::test]
async fn unhandled_verb_is_dropped_silently() {
    let mut filter = Filter::<()>::new();
    filter.smtp_in().filter().on_helo(|_, _, _| Response::proceed());

    // wiz was never advertised; a host that sends it anyway gets nothing back
    let input = format!("{HANDSHAKE}filter|0.7|1.0|smtp-in|wiz|2222222222222222|TOK\n");
    let (result, output) = run(filter, &input).await;
    assert!(matches!(result, Err(FilterError::UnexpectedEof)));
    assert!(output.ends_with("register|ready\n"));
}

#[derive(Default)]
struct Connections {
    rdns: String,
}

#[tokio::test]
async fn session_data_lives_from_connect_to_disconnect() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let allocations = Arc::new(AtomicU64::new(0));

    let mut filter = Filter::<Connections>::new();
    let counter = allocations.clone();
    filter.smtp_in().report().session_allocator(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Connections::default()
    });
    filter
        .smtp_in()
        .report()
        .on_link_connect(|_, session, rdns, _, src, dest| {
            assert_eq!(src.to_string(), "10.0.0.1:35298");
            assert_eq!(dest.to_string(), "10.0.0.2:25");
            let _ = session.with_data(|data| data.rdns = rdns.to_string());
        });
    let log = observed.clone();
    filter.smtp_in().report().on_link_disconnect(move |_, session| {
        let rdns = session.with_data(|data| data.rdns.clone());
        log.lock().unwrap().push(rdns);
    });

    let input = format!(
        "{HANDSHAKE}\
         report|0.7|1.0|smtp-in|link-connect|0000000000000000|mx.example|pass|10.0.0.1:35298|10.0.0.2:25\n\
         report|0.7|2.0|smtp-in|link-disconnect|0000000000000000\n"
    );
    let (result, _) = run(filter, &input).await;
    assert!(matches!(result, Err(FilterError::UnexpectedEof)));
    assert_eq!(allocations.load(Ordering::SeqCst), 1);
    assert_eq!(
        observed.lock().unwrap().as_slice(),
        [Some("mx.example".to_string())]
    );
}

#[tokio::test]
async fn session_data_is_gone_after_disconnect() {
    let escaped = Arc::new(Mutex::new(None));

    let mut filter = Filter::<u32>::new();
    filter.smtp_in().report().session_allocator(|| 7);
    let stash = escaped.clone();
    filter.smtp_in().report().on_link_connect(move |_, session, _, _, _, _| {
        *stash.lock().unwrap() = Some(session.clone());
    });

    let input = format!(
        "{HANDSHAKE}\
         report|0.7|1.0|smtp-in|link-connect|00000000000000aa|h|p|1.2.3.4:5|6.7.8.9:10\n\
         report|0.7|2.0|smtp-in|link-disconnect|00000000000000aa\n"
    );
    let _ = run(filter, &input).await;

    let session = escaped.lock().unwrap().take().expect("session captured");
    assert_eq!(session.with_data(|v| *v), None);
}

#[tokio::test]
async fn tx_commit_accepts_zero_size() {
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let log = sizes.clone();

    let mut filter = Filter::<()>::new();
    filter
        .smtp_in()
        .report()
        .on_tx_commit(move |_, _, msgid, size| {
            log.lock().unwrap().push((msgid.to_string(), size));
        });

    let input = format!("{HANDSHAKE}report|0.7|1.0|smtp-in|tx-commit|3333333333333333|abcd0123|0\n");
    let (result, _) = run(filter, &input).await;
    assert!(matches!(result, Err(FilterError::UnexpectedEof)));
    assert_eq!(sizes.lock().unwrap().as_slice(), [("abcd0123".to_string(), 0)]);
}

#[tokio::test]
async fn tx_commit_with_bad_size_is_fatal() {
    let mut filter = Filter::<()>::new();
    filter.smtp_in().report().on_tx_commit(|_, _, _, _| {});

    let input = format!("{HANDSHAKE}report|0.7|1.0|smtp-in|tx-commit|3333333333333333|abcd0123|many\n");
    let (result, _) = run(filter, &input).await;
    assert!(matches!(result, Err(FilterError::MalformedPayload { .. })));
}

#[tokio::test]
async fn filter_response_with_empty_params() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    let mut filter = Filter::<()>::new();
    filter
        .smtp_in()
        .report()
        .on_filter_response(move |_, _, phase, response, params| {
            log.lock()
                .unwrap()
                .push((phase.to_string(), response.to_string(), params.len()));
        });

    let input =
        format!("{HANDSHAKE}report|0.7|1.0|smtp-in|filter-response|4444444444444444|helo|proceed\n");
    let (result, _) = run(filter, &input).await;
    assert!(matches!(result, Err(FilterError::UnexpectedEof)));
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        [("helo".to_string(), "proceed".to_string(), 0)]
    );
}

#[tokio::test]
async fn protocol_client_text_is_rejoined() {
    let seen = Arc::new(Mutex::new(String::new()));
    let log = seen.clone();

    let mut filter = Filter::<()>::new();
    filter
        .smtp_in()
        .report()
        .on_protocol_client(move |_, _, command| {
            *log.lock().unwrap() = command.to_string();
        });

    let input = format!(
        "{HANDSHAKE}report|0.7|1.0|smtp-in|protocol-client|5555555555555555|MAIL FROM:<a|b@example>\n"
    );
    let _ = run(filter, &input).await;
    assert_eq!(*seen.lock().unwrap(), "MAIL FROM:<a|b@example>");
}

#[tokio::test]
async fn version_mismatch_is_fatal() {
    let mut filter = Filter::<()>::new();
    filter.smtp_in().filter().on_helo(|_, _, _| Response::proceed());

    let input = format!("{HANDSHAKE}filter|0.9|1.0|smtp-in|helo|6666666666666666|TOK|x\n");
    let (result, _) = run(filter, &input).await;
    assert!(matches!(result, Err(FilterError::UnsupportedVersion(v)) if v == "0.9"));
}

#[tokio::test]
async fn bad_session_id_is_fatal() {
    let mut filter = Filter::<()>::new();
    filter.smtp_in().filter().on_helo(|_, _, _| Response::proceed());

    let input = format!("{HANDSHAKE}filter|0.7|1.0|smtp-in|helo|not-hex-at-all|TOK|x\n");
    let (result, _) = run(filter, &input).await;
    assert!(matches!(result, Err(FilterError::SessionId(_))));
}

#[tokio::test]
async fn unknown_event_is_fatal() {
    let mut filter = Filter::<()>::new();
    filter.smtp_in().report().on_timeout(|_, _| {});

    let input = format!("{HANDSHAKE}report|0.7|1.0|smtp-in|link-teleport|7777777777777777\n");
    let (result, _) = run(filter, &input).await;
    assert!(matches!(result, Err(FilterError::UnknownEvent { kind: "report", .. })));
}

#[tokio::test]
async fn eof_before_config_ready_is_fatal() {
    let filter = Filter::<()>::new();
    let (result, output) = run(filter, "config|smtp-version|7.4.0\n").await;
    assert!(matches!(result, Err(FilterError::UnexpectedEof)));
    assert!(output.is_empty());
}
