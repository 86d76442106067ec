mod utils;

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context as _, Error};
use bytes::BytesMut;
use tracing_test::traced_test;
use wharf::{
    plugin::{EventSink, SsePlugin},
    proto::{
        sse::{SseEvent, SseParser},
        DecodeStatus, HttpRequest,
    },
    ServerModule, WriteError,
};

use crate::utils::{given_get, given_session, given_task_pool};

fn ticker(_request: &HttpRequest, sink: EventSink) {
    for n in 1..=3 {
        let event = SseEvent::new(format!("tick {}", n)).with_id(n.to_string());
        if sink.send(event).is_err() {
            return;
        }
    }
}

fn then_head_and_events(output: &[u8]) -> Result<(String, Vec<SseEvent>), Error> {
    let end = output
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .context("no response head")?
        + 4;
    let head = String::from_utf8(output[..end].to_vec())?;

    let mut parser = SseParser::chunked(1 << 16);
    let mut buf = BytesMut::from(&output[end..]);
    let mut events = Vec::new();
    while let DecodeStatus::FullyRead(event) = parser.decode(&mut buf)? {
        events.push(event);
    }
    events.extend(parser.finish()?);

    Ok((head, events))
}

#[test]
#[traced_test]
fn subscriber_events_are_streamed_then_terminated() -> Result<(), Error> {
    let module = ServerModule::builder("sse")
        .plugin(SsePlugin::new().stream("/ticks", ticker))
        .task_pool(given_task_pool())
        .build()?;
    let mut session = given_session(module)?;

    session.when_received(given_get("/ticks").as_bytes());
    session.when_notified_until(|session| session.channel.is_write_shut())?;

    let output = session.channel.output();
    assert!(output.ends_with(b"0\r\n\r\n"));

    let (head, events) = then_head_and_events(&output)?;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Content-Type: text/event-stream\r\n"));
    assert!(head.contains("Transfer-Encoding: chunked\r\n"));

    let data: Vec<_> = events.iter().map(|event| event.data.as_str()).collect();
    assert_eq!(data, ["tick 1", "tick 2", "tick 3"]);
    assert_eq!(events[2].id.as_deref(), Some("3"));

    // The stream is over but the session waits for the client to leave
    assert!(!session.processor.is_closed());
    let subscription = session.when_peer_closed();
    assert!(subscription.closed);

    Ok(())
}

#[test]
#[traced_test]
fn client_leaving_stops_the_subscriber() -> Result<(), Error> {
    let stopped: Arc<Mutex<Option<WriteError>>> = Arc::default();

    let recorded = stopped.clone();
    let subscriber = move |_request: &HttpRequest, sink: EventSink| loop {
        if let Err(error) = sink.send(SseEvent::comment("keep-alive")) {
            *recorded.lock().unwrap() = Some(error);
            return;
        }
        thread::sleep(Duration::from_millis(5));
    };

    let module = ServerModule::builder("sse")
        .plugin(SsePlugin::new().stream("/forever", subscriber))
        .task_pool(given_task_pool())
        .build()?;
    let mut session = given_session(module)?;

    session.when_received(given_get("/forever").as_bytes());
    let subscription = session.when_peer_closed();
    assert!(subscription.closed);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(error) = stopped.lock().unwrap().take() {
            assert!(matches!(error, WriteError::Closed | WriteError::QueueFull));
            break;
        }
        if Instant::now() > deadline {
            bail!("subscriber never noticed the client left");
        }
        thread::sleep(Duration::from_millis(5));
    }

    Ok(())
}

#[test]
#[traced_test]
fn other_methods_are_not_streams() -> Result<(), Error> {
    let module = ServerModule::builder("sse")
        .plugin(SsePlugin::new().stream("/ticks", ticker))
        .task_pool(given_task_pool())
        .build()?;
    let mut session = given_session(module)?;

    session.when_received(b"POST /ticks HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n");

    let responses = session.then_responses()?;
    assert_eq!(responses[0].status(), 404);

    Ok(())
}
