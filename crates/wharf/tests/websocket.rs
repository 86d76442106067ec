mod utils;

use std::sync::{Arc, Mutex};

use anyhow::{bail, Context as _, Error};
use bytes::BytesMut;
use tracing_test::traced_test;
use wharf::{
    plugin::{WebSocketEndpoint, WebSocketPlugin, WsSession},
    proto::{
        websocket::{CloseFrame, Message, Role, WebSocketCodec},
        DecodeStatus,
    },
    ServerModule,
};

use crate::utils::{given_session, given_task_pool, then_decoded_responses, TestSession};

type Closes = Arc<Mutex<Vec<Option<CloseFrame>>>>;

/// Echoes text prefixed with the room it was sent to.
struct RoomEcho {
    closes: Closes,
}

impl WebSocketEndpoint for RoomEcho {
    fn on_open(&mut self, session: &mut WsSession) -> Result<(), Error> {
        session.send(Message::text("welcome"))?;
        Ok(())
    }

    fn on_message(&mut self, session: &mut WsSession, message: Message) -> Result<(), Error> {
        let room = session.path_param("room").unwrap_or("lobby").to_string();

        match message {
            Message::Text(text) => session.send(Message::text(format!("{}: {}", room, text)))?,
            other => session.send(other)?,
        }

        Ok(())
    }

    fn on_close(&mut self, _session: &mut WsSession, frame: Option<&CloseFrame>) {
        self.closes.lock().unwrap().push(frame.cloned());
    }
}

fn given_echo_session(closes: &Closes) -> Result<TestSession, Error> {
    let closes = closes.clone();
    let plugin = WebSocketPlugin::new().endpoint("/rooms/{room}", move || RoomEcho {
        closes: closes.clone(),
    });

    let module = ServerModule::builder("ws")
        .plugin(plugin)
        .task_pool(given_task_pool())
        .build()?;
    given_session(module)
}

fn given_upgrade(path: &str, version: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: {}\r\n\r\n",
        path, version
    )
}

fn given_client_frames(messages: &[Message]) -> Result<Vec<u8>, Error> {
    let mut client = WebSocketCodec::new(Role::Client, Vec::new(), 1 << 20);
    let mut wire = BytesMut::new();

    for message in messages {
        client.encode(message, &mut wire)?;
    }

    Ok(wire.to_vec())
}

/// Split the output into the upgrade response head and the frames after it.
fn then_upgrade_and_frames(output: &[u8]) -> Result<(String, Vec<Message>), Error> {
    let end = output
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .context("no response head")?
        + 4;
    let head = String::from_utf8(output[..end].to_vec())?;

    let mut client = WebSocketCodec::new(Role::Client, Vec::new(), 1 << 20);
    let mut buf = BytesMut::from(&output[end..]);
    let mut messages = Vec::new();
    loop {
        match client.decode(&mut buf)? {
            DecodeStatus::FullyRead(message) => messages.push(message),
            DecodeStatus::NeedMoreData => break,
            DecodeStatus::Closed => bail!("client codec closed"),
        }
    }

    Ok((head, messages))
}

#[test]
#[traced_test]
fn upgraded_session_echoes_and_answers_pings() -> Result<(), Error> {
    let closes = Closes::default();
    let mut session = given_echo_session(&closes)?;

    session.when_received(given_upgrade("/rooms/blue", "13").as_bytes());
    let frames = given_client_frames(&[
        Message::text("hi"),
        Message::Ping("are you there".into()),
        Message::binary(&b"\x00\x01"[..]),
    ])?;
    let subscription = session.when_received(&frames);

    let (head, messages) = then_upgrade_and_frames(&session.channel.output())?;
    assert!(head.starts_with("HTTP/1.1 101 "));
    assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert_eq!(
        messages,
        [
            Message::text("welcome"),
            Message::text("blue: hi"),
            Message::Pong("are you there".into()),
            Message::binary(&b"\x00\x01"[..]),
        ]
    );

    assert!(!subscription.closed);
    assert!(closes.lock().unwrap().is_empty());

    Ok(())
}

#[test]
#[traced_test]
fn client_close_is_echoed_then_session_closes() -> Result<(), Error> {
    let closes = Closes::default();
    let mut session = given_echo_session(&closes)?;

    session.when_received(given_upgrade("/rooms/red", "13").as_bytes());
    let frames = given_client_frames(&[Message::close(1000, "bye")])?;
    let subscription = session.when_received(&frames);

    let (_, messages) = then_upgrade_and_frames(&session.channel.output())?;
    assert_eq!(messages.last(), Some(&Message::close(1000, "bye")));
    assert!(subscription.closed);

    let closes = closes.lock().unwrap();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].as_ref().map(|frame| frame.code), Some(1000));

    Ok(())
}

#[test]
#[traced_test]
fn peer_vanishing_reports_close_without_frame() -> Result<(), Error> {
    let closes = Closes::default();
    let mut session = given_echo_session(&closes)?;

    session.when_received(given_upgrade("/rooms/green", "13").as_bytes());
    let subscription = session.when_peer_closed();

    assert!(subscription.closed);
    assert_eq!(*closes.lock().unwrap(), [None]);

    Ok(())
}

#[test]
#[traced_test]
fn unsupported_version_is_refused_with_426() -> Result<(), Error> {
    let closes = Closes::default();
    let mut session = given_echo_session(&closes)?;

    let subscription = session.when_received(given_upgrade("/rooms/blue", "8").as_bytes());

    let responses = then_decoded_responses(&session.channel.output())?;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status(), 426);
    assert_eq!(responses[0].headers().get("Sec-WebSocket-Version"), Some("13"));
    assert!(subscription.closed);
    assert!(closes.lock().unwrap().is_empty());

    Ok(())
}

#[test]
#[traced_test]
fn unmasked_client_frame_closes_with_protocol_error() -> Result<(), Error> {
    let closes = Closes::default();
    let mut session = given_echo_session(&closes)?;

    session.when_received(given_upgrade("/rooms/blue", "13").as_bytes());

    // A server-role encoder doesn't mask
    let mut server = WebSocketCodec::new(Role::Server, Vec::new(), 1 << 20);
    let mut wire = BytesMut::new();
    server.encode(&Message::text("sneaky"), &mut wire)?;
    session.when_received(&wire);

    let (_, messages) = then_upgrade_and_frames(&session.channel.output())?;
    let Some(Message::Close(Some(frame))) = messages.last() else {
        bail!("expected a close frame, got {:?}", messages);
    };
    assert_eq!(frame.code, 1002);

    Ok(())
}

#[test]
#[traced_test]
fn remote_sends_are_written_on_notify() -> Result<(), Error> {
    let remote = Arc::new(Mutex::new(None));

    struct Broadcaster {
        remote: Arc<Mutex<Option<wharf::plugin::WsRemote>>>,
    }

    impl WebSocketEndpoint for Broadcaster {
        fn on_open(&mut self, session: &mut WsSession) -> Result<(), Error> {
            *self.remote.lock().unwrap() = Some(session.remote());
            Ok(())
        }

        fn on_message(&mut self, _session: &mut WsSession, _message: Message) -> Result<(), Error> {
            Ok(())
        }
    }

    let shared = remote.clone();
    let module = ServerModule::builder("ws")
        .plugin(WebSocketPlugin::new().endpoint("/feed", move || Broadcaster {
            remote: shared.clone(),
        }))
        .task_pool(given_task_pool())
        .build()?;
    let mut session = given_session(module)?;

    session.when_received(given_upgrade("/feed", "13").as_bytes());
    let remote = remote.lock().unwrap().clone().context("endpoint not opened")?;

    let sender = std::thread::spawn(move || {
        remote.send(Message::text("from elsewhere"))?;
        remote.close(1001, "shutting down")
    });
    sender.join().unwrap()?;

    session.when_notified_until(|session| {
        then_upgrade_and_frames(&session.channel.output())
            .map(|(_, messages)| messages.len() >= 2)
            .unwrap_or(false)
    })?;

    let (_, messages) = then_upgrade_and_frames(&session.channel.output())?;
    assert_eq!(
        messages,
        [Message::text("from elsewhere"), Message::close(1001, "shutting down")]
    );

    Ok(())
}
