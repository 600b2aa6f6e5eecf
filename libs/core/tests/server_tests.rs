use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::sleep;

use talk_core::{
    middleware_fn, service, Client, Context, DefaultExtractor, Endpoint, Error, ErrorCode,
    LocalTransport, Message, RegisterOptions, Result, Server, Stream, StreamMode, TransportConfig,
    TypedStream,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: u64,
    pub text: String,
}

#[derive(Default)]
pub struct NoteService {
    notes: parking_lot::Mutex<Vec<Note>>,
}

#[service]
impl NoteService {
    pub async fn create_note(&self, _ctx: Context, text: String) -> Result<Note> {
        let mut notes = self.notes.lock();
        let note = Note {
            id: notes.len() as u64 + 1,
            text,
        };
        notes.push(note.clone());
        Ok(note)
    }

    pub async fn get_note(&self, _ctx: Context, id: u64) -> Result<Note> {
        self.notes
            .lock()
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("note {id}")))
    }

    pub async fn watch_notes(&self, _ctx: Context) -> Result<tokio::sync::mpsc::Receiver<Note>> {
        let notes = self.notes.lock().clone();
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        tokio::spawn(async move {
            for note in notes {
                if tx.send(note).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    pub async fn count_words(
        &self,
        _ctx: Context,
        mut lines: tokio::sync::mpsc::Receiver<String>,
    ) -> Result<usize> {
        let mut words = 0;
        while let Some(line) = lines.recv().await {
            words += line.split_whitespace().count();
        }
        Ok(words)
    }
}

fn echo_endpoint() -> Endpoint {
    Endpoint::builder("Echo")
        .streaming(
            StreamMode::Bidirectional,
            |_ctx: Context, _req: (), stream: Arc<dyn Stream>| async move {
                while let Some(msg) = stream.recv().await? {
                    stream.send(msg).await?;
                }
                Ok::<_, Error>(())
            },
        )
        .build()
        .unwrap()
}

fn refusing_endpoint() -> Endpoint {
    Endpoint::builder("Refuse")
        .streaming(
            StreamMode::ServerSide,
            |_ctx: Context, _req: (), stream: Arc<dyn Stream>| async move {
                stream.send(json!("first")).await?;
                Err::<(), _>(Error::permission_denied("no more"))
            },
        )
        .build()
        .unwrap()
}

/// Streams increasing numbers until its caller goes away.
#[derive(Default)]
pub struct Ticker {
    stopped: Arc<AtomicBool>,
}

#[service]
impl Ticker {
    pub async fn watch_ticks(&self, _ctx: Context) -> Result<tokio::sync::mpsc::Receiver<u64>> {
        let stopped = Arc::clone(&self.stopped);
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            for n in 0.. {
                if tx.send(n).await.is_err() {
                    stopped.store(true, Ordering::SeqCst);
                    return;
                }
                sleep(Duration::from_millis(5)).await;
            }
        });
        Ok(rx)
    }
}

/// Hand-built server stream that only ends when its context does.
fn ticks_endpoint(ended: Arc<AtomicBool>) -> Endpoint {
    Endpoint::builder("Ticks")
        .streaming(
            StreamMode::ServerSide,
            move |ctx: Context, _req: (), stream: Arc<dyn Stream>| {
                let ended = Arc::clone(&ended);
                async move {
                    for n in 0u64.. {
                        tokio::select! {
                            biased;
                            _ = ctx.done() => {
                                ended.store(true, Ordering::SeqCst);
                                return Err(ctx.done_err());
                            }
                            sent = stream.send(json!(n)) => sent?,
                        }
                    }
                    Ok::<_, Error>(())
                }
            },
        )
        .build()
        .unwrap()
}

/// Serve a ticker on its own named transport; returns the handler and producer flags.
async fn start_ticker(name: &str) -> (Client, Arc<AtomicBool>, Arc<AtomicBool>) {
    let transport = LocalTransport::named(name);
    let ended = Arc::new(AtomicBool::new(false));
    let ticker = Ticker::default();
    let stopped = Arc::clone(&ticker.stopped);

    let mut server = Server::builder(transport.clone())
        .extractor(DefaultExtractor::new())
        .build();
    server.register(Arc::new(ticker)).unwrap();
    server.add_endpoint(ticks_endpoint(Arc::clone(&ended))).unwrap();
    tokio::spawn(async move { server.serve(Context::background()).await });

    while !transport.is_serving() {
        sleep(Duration::from_millis(5)).await;
    }
    (Client::new(transport), ended, stopped)
}

async fn eventually(flag: &AtomicBool) -> bool {
    for _ in 0..200 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Start a server on a fresh named local transport and wait until it serves.
async fn start(name: &str, calls: Arc<AtomicUsize>) -> (Arc<Server>, Client) {
    let transport = LocalTransport::named(name);
    let mut server = Server::builder(transport.clone())
        .extractor(DefaultExtractor::new())
        .build();

    let counting = middleware_fn(move |ctx: Context, msg: Message, next| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            next(ctx, msg).await
        }
    });
    server
        .register_with(
            Arc::new(NoteService::default()),
            RegisterOptions::new().prefix("/api").middleware(counting),
        )
        .unwrap();
    server.add_endpoint(echo_endpoint()).unwrap();
    server.add_endpoint(refusing_endpoint()).unwrap();

    let server = Arc::new(server);
    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve(Context::background()).await });

    while !transport.is_serving() {
        sleep(Duration::from_millis(5)).await;
    }
    (server, Client::new(transport))
}

#[tokio::test]
async fn register_applies_prefix() {
    let (server, _client) = start("prefix", Arc::new(AtomicUsize::new(0))).await;
    let get = server.endpoints().iter().find(|e| e.name == "GetNote").unwrap();
    assert_eq!(get.path, "/api/note/{id}");
    let echo = server.endpoints().iter().find(|e| e.name == "Echo").unwrap();
    assert_eq!(echo.path, "/echo");
}

#[tokio::test]
async fn unary_round_trip_through_middleware() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (_server, client) = start("unary", Arc::clone(&calls)).await;
    let ctx = Context::background();

    let created: Note = client.call(ctx.clone(), "CreateNote", "remember milk").await.unwrap();
    assert_eq!(created.id, 1);

    let fetched: Note = client.call(ctx.clone(), "GetNote", &1u64).await.unwrap();
    assert_eq!(fetched, created);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let err = client
        .call::<_, Note>(ctx.clone(), "GetNote", &99u64)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.message, "note 99");
}

#[tokio::test]
async fn unknown_and_streaming_endpoints_reject_unary_calls() {
    let (_server, client) = start("reject", Arc::new(AtomicUsize::new(0))).await;
    let ctx = Context::background();

    let err = client.call_raw(ctx.clone(), "Nope", json!(null)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let err = client.call_raw(ctx, "Echo", json!(null)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedPrecondition);
}

#[tokio::test]
async fn server_stream_delivers_every_item() {
    let (_server, client) = start("watch", Arc::new(AtomicUsize::new(0))).await;
    let ctx = Context::background();
    for text in ["a", "b", "c"] {
        let _: Note = client.call(ctx.clone(), "CreateNote", text).await.unwrap();
    }

    let stream = client.stream(ctx, "WatchNotes", &()).await.unwrap();
    let mut seen = Vec::new();
    while let Some(note) = stream.recv_as::<Note>().await.unwrap() {
        seen.push(note.text);
    }
    assert_eq!(seen, ["a", "b", "c"]);
}

#[tokio::test]
async fn client_stream_reports_single_result() {
    let (_server, client) = start("words", Arc::new(AtomicUsize::new(0))).await;
    let stream = client
        .stream(Context::background(), "CountWords", &())
        .await
        .unwrap();

    stream.send_as("one two").await.unwrap();
    stream.send_as("three").await.unwrap();
    stream.close_send().await.unwrap();

    assert_eq!(stream.recv_as::<usize>().await.unwrap(), Some(3));
    assert_eq!(stream.recv().await.unwrap(), None);
}

#[tokio::test]
async fn bidirectional_echo() {
    let (_server, client) = start("echo", Arc::new(AtomicUsize::new(0))).await;
    let stream = client.stream(Context::background(), "Echo", &()).await.unwrap();

    stream.send(json!({"n": 1})).await.unwrap();
    assert_eq!(stream.recv().await.unwrap(), Some(json!({"n": 1})));
    stream.send(json!("again")).await.unwrap();
    assert_eq!(stream.recv().await.unwrap(), Some(json!("again")));

    stream.close_send().await.unwrap();
    assert_eq!(stream.recv().await.unwrap(), None);
}

#[tokio::test]
async fn stream_handler_error_reaches_client() {
    let (_server, client) = start("refuse", Arc::new(AtomicUsize::new(0))).await;
    let stream = client.stream(Context::background(), "Refuse", &()).await.unwrap();

    assert_eq!(stream.recv().await.unwrap(), Some(json!("first")));
    let err = stream.recv().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);
}

#[tokio::test]
async fn shutdown_stops_serving() {
    let (server, client) = start("shutdown", Arc::new(AtomicUsize::new(0))).await;
    server
        .shutdown(Context::background().with_timeout(Duration::from_secs(1)))
        .await
        .unwrap();

    let transport = LocalTransport::named("shutdown");
    while transport.is_serving() {
        sleep(Duration::from_millis(5)).await;
    }
    let err = client
        .call_raw(Context::background(), "GetNote", json!(1))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Unavailable);
}

#[tokio::test]
async fn register_requires_extractor() {
    let mut server = Server::new(Arc::new(LocalTransport::new()));
    let err = server.register(Arc::new(NoteService::default())).unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedPrecondition);
}

#[tokio::test]
async fn from_config() {
    let cfg = TransportConfig::from_json_str(r#"{"type": "inproc", "config": {"name": "cfg"}}"#)
        .unwrap();
    let client = Client::from_config(&cfg).unwrap();
    assert_eq!(client.transport().name(), "local(cfg)");
    assert_eq!(client.codec().name(), "json");

    let err = Server::from_config(&TransportConfig::new("smoke-signals")).err().unwrap();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
    assert_eq!(err.message, "unknown transport type: smoke-signals");
}

#[tokio::test]
async fn closing_a_server_stream_ends_the_handler() {
    let (client, ended, _) = start_ticker("ticks-close").await;
    let stream = client.stream(Context::background(), "Ticks", &()).await.unwrap();

    assert_eq!(stream.recv().await.unwrap(), Some(json!(0)));
    stream.close().await.unwrap();

    // The stream is still held; only close() can reach the handler.
    assert!(eventually(&ended).await);
    drop(stream);
}

#[tokio::test]
async fn cancelling_the_caller_ends_the_handler() {
    let (client, ended, _) = start_ticker("ticks-cancel").await;
    let ctx = Context::background().child();
    let stream = client.stream(ctx.clone(), "Ticks", &()).await.unwrap();

    assert_eq!(stream.recv().await.unwrap(), Some(json!(0)));
    ctx.cancel();

    assert!(eventually(&ended).await);
    let err = loop {
        match stream.recv().await {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("stream ended without the cancellation"),
            Err(err) => break err,
        }
    };
    assert_eq!(err.code, ErrorCode::Cancelled);
}

#[tokio::test]
async fn closing_an_extracted_stream_stops_the_producer() {
    let (client, _, stopped) = start_ticker("ticker-close").await;
    let stream = client.stream(Context::background(), "WatchTicks", &()).await.unwrap();

    assert_eq!(stream.recv_as::<u64>().await.unwrap(), Some(0));
    stream.close().await.unwrap();

    assert!(eventually(&stopped).await);
    drop(stream);
}

#[tokio::test]
async fn cancelling_the_caller_stops_the_producer() {
    let (client, _, stopped) = start_ticker("ticker-cancel").await;
    let ctx = Context::background().child();
    let stream = client.stream(ctx.clone(), "WatchTicks", &()).await.unwrap();

    assert_eq!(stream.recv_as::<u64>().await.unwrap(), Some(0));
    ctx.cancel();

    assert!(eventually(&stopped).await);
}

#[tokio::test]
async fn shutdown_before_serve_is_honoured() {
    let transport = Arc::new(LocalTransport::new());
    let server = Server::new(transport.clone());
    server
        .shutdown(Context::background().with_timeout(Duration::from_secs(1)))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), server.serve(Context::background()))
        .await
        .expect("serve ignored the earlier shutdown")
        .unwrap();
    assert!(!transport.is_serving());

    // The request is used up; the next serve runs until stopped again.
    let serving = Arc::new(server);
    let handle = {
        let serving = Arc::clone(&serving);
        tokio::spawn(async move { serving.serve(Context::background()).await })
    };
    while !transport.is_serving() {
        sleep(Duration::from_millis(5)).await;
    }
    serving.shutdown(Context::background()).await.unwrap();
    handle.await.unwrap().unwrap();
}
