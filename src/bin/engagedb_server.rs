//! engagedb server - Unix socket front end for the engagement engine
//!
//! Usage:
//!   engagedb-server /path/to/db [--socket /tmp/engagedb.sock] [--config engagedb.json]
//!                   [--log-level debug] [--verify-targets]
//!
//! Protocol:
//!   Request:  [4-byte length BE] [MessagePack payload]
//!   Response: [4-byte length BE] [MessagePack payload]
//!
//! Every response is `{ ok: true, data }` or `{ ok: false, error: { kind, message } }`.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use engagedb::pipeline::parse_pipeline;
use engagedb::{Collection, EngageError, Engine, ErrorKind, PageRequest, ServerConfig, SledStore, VideoQuery};

const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

// ============================================================================
// Wire Protocol Types
// ============================================================================

/// Request from client. The acting user is always an explicit `subject`.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    // Toggles
    ToggleVideoLike {
        subject: String,
        #[serde(rename = "videoId")]
        video_id: String,
    },
    ToggleCommentLike {
        subject: String,
        #[serde(rename = "commentId")]
        comment_id: String,
    },
    ToggleTweetLike {
        subject: String,
        #[serde(rename = "tweetId")]
        tweet_id: String,
    },
    ToggleSubscription {
        subject: String,
        #[serde(rename = "channelId")]
        channel_id: String,
    },

    // Aggregates and listings
    ChannelStats {
        #[serde(rename = "channelId")]
        channel_id: String,
    },
    VideoComments {
        #[serde(rename = "videoId")]
        video_id: String,
        #[serde(default)]
        page: Option<i64>,
        #[serde(default, rename = "pageSize")]
        page_size: Option<i64>,
    },
    ChannelVideos {
        #[serde(rename = "channelId")]
        channel_id: String,
        #[serde(default)]
        query: VideoQuery,
    },
    LikedVideos { subject: String },
    ChannelSubscribers {
        #[serde(rename = "channelId")]
        channel_id: String,
    },
    SubscribedChannels { subject: String },
    UploadedVideos {
        #[serde(rename = "channelId")]
        channel_id: String,
    },

    // Raw pipelines
    Aggregate { collection: String, pipeline: Value },
    Explain { collection: String, pipeline: Value },

    // Control
    Ping,
    Shutdown,
}

#[derive(Debug, Serialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Response envelope
#[derive(Debug, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    fn data(data: Value) -> Self {
        Response { ok: true, data: Some(data), error: None }
    }

    fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response {
            ok: false,
            data: None,
            error: Some(WireError { kind, message: message.into() }),
        }
    }
}

impl From<engagedb::Result<Value>> for Response {
    fn from(result: engagedb::Result<Value>) -> Self {
        match result {
            Ok(data) => Response::data(data),
            Err(e) => Response::error(e.kind(), e.to_string()),
        }
    }
}

fn to_data<T: Serialize>(value: engagedb::Result<T>) -> engagedb::Result<Value> {
    Ok(serde_json::to_value(value?)?)
}

fn collection(name: &str) -> engagedb::Result<Collection> {
    name.parse::<Collection>()
}

// ============================================================================
// Request Handler
// ============================================================================

fn handle_request(engine: &Engine<SledStore>, request: Request) -> Response {
    let result = match request {
        Request::ToggleVideoLike { subject, video_id } => {
            to_data(engine.toggle_video_like(&subject, &video_id))
        }
        Request::ToggleCommentLike { subject, comment_id } => {
            to_data(engine.toggle_comment_like(&subject, &comment_id))
        }
        Request::ToggleTweetLike { subject, tweet_id } => {
            to_data(engine.toggle_tweet_like(&subject, &tweet_id))
        }
        Request::ToggleSubscription { subject, channel_id } => {
            to_data(engine.toggle_subscription(&subject, &channel_id))
        }

        Request::ChannelStats { channel_id } => to_data(engine.channel_stats(&channel_id)),
        Request::VideoComments { video_id, page, page_size } => {
            let request = PageRequest::new(
                page.unwrap_or(engagedb::pagination::DEFAULT_PAGE),
                page_size.unwrap_or(engagedb::pagination::DEFAULT_PAGE_SIZE),
            );
            to_data(engine.video_comments(&video_id, request))
        }
        Request::ChannelVideos { channel_id, query } => to_data(engine.channel_videos(&channel_id, &query)),
        Request::LikedVideos { subject } => to_data(engine.liked_videos(&subject)),
        Request::ChannelSubscribers { channel_id } => to_data(engine.channel_subscribers(&channel_id)),
        Request::SubscribedChannels { subject } => to_data(engine.subscribed_channels(&subject)),
        Request::UploadedVideos { channel_id } => to_data(engine.uploaded_videos(&channel_id)),

        Request::Aggregate { collection: name, pipeline } => collection(&name)
            .and_then(|c| Ok((c, parse_pipeline(&pipeline)?)))
            .and_then(|(c, stages)| to_data(engine.aggregate(c, &stages))),
        Request::Explain { collection: name, pipeline } => collection(&name)
            .and_then(|c| Ok((c, parse_pipeline(&pipeline)?)))
            .and_then(|(c, stages)| to_data(engine.explain(c, &stages))),

        Request::Ping => Ok(Value::String("pong".to_string())),
        Request::Shutdown => engine.store().flush().map(|()| Value::Null),
    };
    Response::from(result)
}

// ============================================================================
// Client Connection Handler
// ============================================================================

fn read_message(stream: &mut UnixStream) -> std::io::Result<Option<Vec<u8>>> {
    // 4-byte length prefix (big-endian)
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(Some(buf))
}

fn write_message(stream: &mut UnixStream, data: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "response too large"))?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(data)?;
    stream.flush()
}

fn send(stream: &mut UnixStream, response: &Response) -> std::io::Result<()> {
    // to_vec_named keeps field names on the wire
    match rmp_serde::to_vec_named(response) {
        Ok(bytes) => write_message(stream, &bytes),
        Err(e) => {
            tracing::error!(error = %e, "response serialization failed");
            Ok(())
        }
    }
}

/// Flush the store and remove the socket file. Shared by the shutdown
/// command and the signal handler; the caller exits afterwards.
fn shut_down(engine: &Engine<SledStore>, socket: &Path) {
    match engine.store().flush() {
        Ok(()) => tracing::info!("flush complete"),
        Err(e) => tracing::error!(error = %e, "flush failed"),
    }
    match std::fs::remove_file(socket) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(socket = %socket.display(), error = %e, "failed to remove socket"),
    }
}

fn handle_client(mut stream: UnixStream, engine: Arc<Engine<SledStore>>, socket: Arc<PathBuf>, client_id: usize) {
    tracing::info!(client_id, "client connected");

    loop {
        let msg = match read_message(&mut stream) {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::info!(client_id, "client disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(client_id, error = %e, "read failed");
                break;
            }
        };

        let request: Request = match rmp_serde::from_slice(&msg) {
            Ok(req) => req,
            Err(e) => {
                let response = Response::error(ErrorKind::Validation, format!("Invalid request: {}", e));
                if send(&mut stream, &response).is_err() {
                    break;
                }
                continue;
            }
        };

        let is_shutdown = matches!(request, Request::Shutdown);
        tracing::debug!(client_id, ?request, "request");

        let response = handle_request(&engine, request);
        if let Some(error) = &response.error {
            tracing::debug!(client_id, kind = ?error.kind, message = %error.message, "request failed");
        }

        if let Err(e) = send(&mut stream, &response) {
            tracing::warn!(client_id, error = %e, "write failed");
            break;
        }

        if is_shutdown {
            tracing::info!(client_id, "shutdown requested");
            shut_down(&engine, &socket);
            std::process::exit(0);
        }
    }
}

// ============================================================================
// Main
// ============================================================================

fn print_usage() {
    eprintln!("Usage: engagedb-server <db-path> [--socket <path>] [--config <file>] [--log-level <level>] [--verify-targets]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <db-path>          Path to the sled database directory");
    eprintln!("  --socket           Unix socket path (default: {})", engagedb::config::DEFAULT_SOCKET);
    eprintln!("  --config           JSON config file (socket, logLevel, verifyTargets)");
    eprintln!("  --log-level        Log filter (default: {}, or ${})", engagedb::config::DEFAULT_LOG_LEVEL, engagedb::config::LOG_ENV);
    eprintln!("  --verify-targets   Reject toggles whose target does not exist");
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = match ServerConfig::from_args(args.get(1..).unwrap_or_default()) {
        Ok(config) => config,
        Err(EngageError::Validation(msg)) => {
            eprintln!("engagedb-server: {}", msg);
            print_usage();
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).context("invalid log level")?)
        .with_writer(std::io::stderr)
        .init();

    // Remove stale socket file
    let _ = std::fs::remove_file(&config.socket_path);

    let store = SledStore::open(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;
    let engine = Arc::new(Engine::with_config(store, config.engine.clone()));

    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("failed to bind {}", config.socket_path.display()))?;
    tracing::info!(socket = %config.socket_path.display(), verify_targets = config.engine.verify_targets, "listening");

    // Flush and clean up on SIGINT/SIGTERM
    let engine_for_signal = Arc::clone(&engine);
    let socket = Arc::new(config.socket_path.clone());
    let socket_for_signal = Arc::clone(&socket);
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("failed to register signal handlers")?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!(signal = sig, "received signal, flushing");
            shut_down(&engine_for_signal, &socket_for_signal);
            std::process::exit(0);
        }
    });

    let mut client_id = 0;
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                client_id += 1;
                let engine = Arc::clone(&engine);
                let socket = Arc::clone(&socket);
                thread::spawn(move || handle_client(stream, engine, socket, client_id));
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engagedb::DocumentStore;
    use serde_json::json;

    fn decode(value: Value) -> Request {
        let bytes = rmp_serde::to_vec_named(&value).unwrap();
        rmp_serde::from_slice(&bytes).unwrap()
    }

    fn engine() -> (tempfile::TempDir, Engine<SledStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        (dir, Engine::new(store))
    }

    #[test]
    fn test_toggle_round_trip() {
        let (_dir, engine) = engine();
        let request = decode(json!({"cmd": "toggleVideoLike", "subject": "u1", "videoId": "v1"}));

        let response = handle_request(&engine, request);
        assert!(response.ok);
        assert_eq!(response.data, Some(json!({"active": true})));
    }

    #[test]
    fn test_validation_error_envelope() {
        let (_dir, engine) = engine();
        let request = decode(json!({"cmd": "channelStats", "channelId": "  "}));

        let response = handle_request(&engine, request);
        assert!(!response.ok);
        assert!(response.data.is_none());
        assert_eq!(response.error.unwrap().kind, ErrorKind::Validation);
    }

    #[test]
    fn test_aggregate_command() {
        let (_dir, engine) = engine();
        for _ in 0..3 {
            engine.store().create(Collection::Comments, serde_json::Map::new()).unwrap();
        }
        let request = decode(json!({
            "cmd": "aggregate",
            "collection": "comments",
            "pipeline": [{"$count": "n"}]
        }));

        let response = handle_request(&engine, request);
        assert_eq!(response.data, Some(json!([{"n": 3}])));
    }

    #[test]
    fn test_unknown_collection() {
        let (_dir, engine) = engine();
        let request = decode(json!({"cmd": "explain", "collection": "nope", "pipeline": []}));
        let response = handle_request(&engine, request);
        assert_eq!(response.error.unwrap().kind, ErrorKind::Validation);
    }

    #[test]
    fn test_shut_down_removes_socket_and_flushes() {
        let (dir, engine) = engine();
        let socket = dir.path().join("engagedb.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        engine.toggle_subscription("s1", "c1").unwrap();

        let response = handle_request(&engine, decode(json!({"cmd": "shutdown"})));
        assert!(response.ok);
        shut_down(&engine, &socket);
        assert!(!socket.exists());
        drop(listener);

        // Already gone: a second cleanup is a no-op
        shut_down(&engine, &socket);

        drop(engine);
        let reopened = SledStore::open(dir.path().join("db")).unwrap();
        assert_eq!(reopened.find(Collection::Subscriptions, &engagedb::Filter::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_video_comments_defaults() {
        let (_dir, engine) = engine();
        let response = handle_request(&engine, decode(json!({"cmd": "videoComments", "videoId": "v1"})));
        let data = response.data.unwrap();
        assert_eq!(data["totalCount"], 0);
        assert_eq!(data["page"], 1);
        assert_eq!(data["pageSize"], 10);
    }
}
