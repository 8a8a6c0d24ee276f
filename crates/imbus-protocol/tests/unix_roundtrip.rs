//! Integration test: framing and client helper over a real Unix socket.

use std::os::unix::fs::PermissionsExt;

use imbus_protocol::{BusClient, ProtocolError, UnixTransport};
use imbus_types::{
    Body, BusMethod, ErrorName, Message, Method, ReturnValue, SignalKind, ContextSignal, BUS_PATH,
};

#[tokio::test]
async fn hello_roundtrip_on_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("bus");
    let transport = UnixTransport::bind(&socket).unwrap();

    let server = tokio::spawn(async move {
        let conn = transport.accept().await.unwrap();
        let (mut tx, mut rx) = conn.into_split();

        let hello = rx.recv().await.unwrap().unwrap();
        match &hello.body {
            Body::Call(call) => {
                assert_eq!(call.path, BUS_PATH);
                assert_eq!(call.method, Method::Bus(BusMethod::Hello));
            }
            other => panic!("expected Hello, got {other:?}"),
        }

        // A signal arriving before the reply must not be lost.
        let signal = Message::signal(
            "/org/imbus/InputContext_1",
            SignalKind::Context(ContextSignal::Enabled),
        );
        tx.send(&signal).await.unwrap();
        let reply = Message::method_return(hello.serial, ReturnValue::Str(":1.1".into()));
        tx.send(&reply).await.unwrap();

        let id_call = rx.recv().await.unwrap().unwrap();
        tx.send(&Message::error(id_call.serial, ErrorName::Failed, "no id"))
            .await
            .unwrap();
        transport.close();
    });

    let mut client = BusClient::connect(&socket).await.unwrap();
    assert_eq!(client.unique_name(), Some(":1.1"));

    match client.call_bus(BusMethod::GetId).await {
        Err(ProtocolError::Remote { name, message }) => {
            assert_eq!(name, ErrorName::Failed);
            assert_eq!(message, "no id");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    let backlog = client.next_message().await.unwrap().unwrap();
    assert!(matches!(
        backlog.body,
        Body::Signal(ref s) if s.kind == SignalKind::Context(ContextSignal::Enabled)
    ));

    server.await.unwrap();
}

#[tokio::test]
async fn bind_replaces_stale_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("nested").join("bus");

    let first = UnixTransport::bind(&socket).unwrap();
    drop(first);
    assert!(socket.exists());

    let second = UnixTransport::bind(&socket).unwrap();
    assert_eq!(second.local_path(), socket.as_path());
    let mode = std::fs::metadata(&socket).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    second.close();
    assert!(!socket.exists());
}

#[tokio::test]
async fn connect_to_missing_socket_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = UnixTransport::connect(dir.path().join("absent")).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Connection(_)));
}

#[tokio::test]
async fn bind_refuses_a_live_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("bus");
    let _running = UnixTransport::bind(&socket).unwrap();

    assert!(matches!(
        UnixTransport::bind(&socket),
        Err(ProtocolError::Connection(_))
    ));
}
