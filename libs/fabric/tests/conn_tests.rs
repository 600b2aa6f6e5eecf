use std::time::Duration;

use talk_fabric::conn::{
    Connection, ConnectionListener, TcpConnection, TcpConnectionListener, UnixConnection,
    UnixConnectionListener,
};
use talk_fabric::{Address, Error, Frame, FrameChannel};
use tokio::io::AsyncWriteExt;

/// Helper to get a free port
async fn get_listener() -> (TcpConnectionListener, String) {
    let listener = TcpConnectionListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

#[tokio::test]
async fn tcp_send_receive_single_message() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let mut conn = listener.accept().await.unwrap();
        let received = conn.receive().await.unwrap();
        conn.send(&received).await.unwrap(); // Echo back
    });

    let mut client = TcpConnection::connect(&addr).await.unwrap();
    let msg = b"hello world";
    client.send(msg).await.unwrap();
    let response = client.receive().await.unwrap();

    assert_eq!(response, msg);
}

#[tokio::test]
async fn tcp_multiple_messages_preserve_boundaries() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let mut conn = listener.accept().await.unwrap();
        for _ in 0..3 {
            let msg = conn.receive().await.unwrap();
            conn.send(&msg).await.unwrap();
        }
    });

    let mut client = TcpConnection::connect(&addr).await.unwrap();
    let messages = vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()];

    for msg in &messages {
        client.send(msg).await.unwrap();
        let response = client.receive().await.unwrap();
        assert_eq!(&response, msg);
    }
}

#[tokio::test]
async fn tcp_receive_timeout_fires() {
    let (listener, addr) = get_listener().await;

    // Server that never responds
    tokio::spawn(async move {
        let _conn = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut client = TcpConnection::builder()
        .address(addr)
        .receive_timeout(Duration::from_millis(100))
        .connect()
        .await
        .unwrap();

    client.send(b"hello").await.unwrap();

    match client.receive().await {
        Err(Error::Timeout(op)) => assert_eq!(op, "Receive"),
        other => panic!("Expected timeout error, got {:?}", other),
    }
}

#[tokio::test]
async fn tcp_rejects_oversized_frame() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    // Server claiming a 200MB frame, over the 100MB default
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_u32(200 * 1024 * 1024).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = TcpConnection::connect(&addr).await.unwrap();

    match client.receive().await {
        Err(Error::InvalidFrame(msg)) => assert!(msg.contains("too large")),
        other => panic!("Expected InvalidFrame error, got {:?}", other),
    }
}

#[tokio::test]
async fn configured_frame_limit_applies_to_send() {
    let (_listener, addr) = get_listener().await;
    let mut client = TcpConnection::builder()
        .address(addr)
        .max_frame_size(8)
        .connect()
        .await
        .unwrap();

    match client.send(b"more than eight bytes").await {
        Err(Error::InvalidFrame(msg)) => assert!(msg.contains("too large")),
        other => panic!("Expected InvalidFrame error, got {:?}", other),
    }
}

#[tokio::test]
async fn frame_channel_roundtrip() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let conn = listener.accept().await.unwrap();
        let mut channel = FrameChannel::from_boxed(conn);
        let frame = channel.receive().await.unwrap();
        channel.send(&frame).await.unwrap(); // Echo back
    });

    let mut channel = FrameChannel::tcp(&addr).await.unwrap();
    let frame = Frame::Message {
        payload: b"{\"id\":42}".to_vec(),
    };
    channel.send(&frame).await.unwrap();
    assert_eq!(channel.receive().await.unwrap(), frame);
}

#[tokio::test]
async fn split_channel_is_full_duplex() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let conn = listener.accept().await.unwrap();
        let (mut source, mut sink) = FrameChannel::from_boxed(conn).into_split();
        sink.send(&Frame::End).await.unwrap();
        let frame = source.receive().await.unwrap();
        sink.send(&frame).await.unwrap();
    });

    let channel = FrameChannel::connect(&Address::tcp(&addr).unwrap(), Default::default())
        .await
        .unwrap();
    let (mut source, mut sink) = channel.into_split();
    assert_eq!(source.receive().await.unwrap(), Frame::End);
    sink.send(&Frame::Cancel).await.unwrap();
    assert_eq!(source.receive().await.unwrap(), Frame::Cancel);
}

#[tokio::test]
async fn connection_closed_error() {
    let (listener, addr) = get_listener().await;

    // Server that immediately closes
    tokio::spawn(async move {
        let mut conn = listener.accept().await.unwrap();
        conn.close().await.unwrap();
    });

    let mut client = TcpConnection::connect(&addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    match client.receive().await {
        Err(Error::ConnectionClosed) => {}
        other => panic!("Expected ConnectionClosed, got {:?}", other),
    }
}

#[tokio::test]
async fn listener_trait_object_usage() {
    let address = Address::tcp("127.0.0.1:0").unwrap();
    let listener: Box<dyn ConnectionListener> = address.bind(None).await.unwrap();
    let bound = listener.local_address().unwrap();
    assert!(matches!(&bound, Address::Tcp(addr) if !addr.ends_with(":0")));

    tokio::spawn(async move {
        let mut client = bound.connect(Default::default()).await.unwrap();
        client.send(b"test").await.unwrap();
    });

    let mut conn = listener.accept().await.unwrap();
    assert_eq!(conn.receive().await.unwrap(), b"test");
}

// Unix Socket Tests

#[tokio::test]
async fn unix_send_receive_single_message() {
    let socket_path = "/tmp/talk_test_unix_single.sock";

    let listener = UnixConnectionListener::bind(socket_path).await.unwrap();

    tokio::spawn(async move {
        let mut conn = listener.accept().await.unwrap();
        let received = conn.receive().await.unwrap();
        conn.send(&received).await.unwrap(); // Echo back
    });

    let mut client = UnixConnection::connect(socket_path).await.unwrap();
    let msg = b"hello unix";
    client.send(msg).await.unwrap();
    let response = client.receive().await.unwrap();

    assert_eq!(response, msg);
}

#[tokio::test]
async fn unix_multiple_messages_preserve_boundaries() {
    let socket_path = "/tmp/talk_test_unix_multi.sock";

    let listener = UnixConnectionListener::bind(socket_path).await.unwrap();

    tokio::spawn(async move {
        let mut conn = listener.accept().await.unwrap();
        for _ in 0..3 {
            let msg = conn.receive().await.unwrap();
            conn.send(&msg).await.unwrap();
        }
    });

    let mut client = UnixConnection::connect(socket_path).await.unwrap();
    let messages = vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()];

    for msg in &messages {
        client.send(msg).await.unwrap();
        let response = client.receive().await.unwrap();
        assert_eq!(&response, msg);
    }
}

#[tokio::test]
async fn unix_listener_cleans_up_socket() {
    let socket_path = "/tmp/talk_test_unix_cleanup.sock";

    {
        let listener = UnixConnectionListener::bind(socket_path).await.unwrap();
        assert!(std::path::Path::new(socket_path).exists());
        assert_eq!(listener.path(), std::path::Path::new(socket_path));
    }

    assert!(!std::path::Path::new(socket_path).exists());
}

#[tokio::test]
async fn unix_bind_replaces_stale_socket() {
    let socket_path = "/tmp/talk_test_unix_stale.sock";
    std::fs::write(socket_path, b"stale").unwrap();

    let _listener = UnixConnectionListener::bind(socket_path).await.unwrap();
    assert!(UnixConnection::connect(socket_path).await.is_ok());
}

#[tokio::test]
async fn unix_timeout_works() {
    let socket_path = "/tmp/talk_test_unix_timeout.sock";

    let listener = UnixConnectionListener::bind(socket_path).await.unwrap();

    // Server that never responds
    tokio::spawn(async move {
        let _conn = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut client = UnixConnection::builder()
        .path(socket_path)
        .receive_timeout(Duration::from_millis(100))
        .connect()
        .await
        .unwrap();

    client.send(b"hello").await.unwrap();

    match client.receive().await {
        Err(Error::Timeout(op)) => assert_eq!(op, "Receive"),
        other => panic!("Expected timeout error, got {:?}", other),
    }
}
