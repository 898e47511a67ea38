//! In-memory realtime backend for tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use spacebook_shared::{Result, SpacebookError};
use spacebook_transport::{Connector, Socket, SocketEvent};
use tokio::sync::mpsc;

const CONNECTED: &str = r#"{"t":"c","d":{"t":"h","d":{"ts":1,"v":"5"}}}"#;

/// A space served over fake sockets: answers info and revision queries and
/// lets tests push notifications or drop the connection.
pub(crate) struct FakeSpace {
    primary: Mutex<String>,
    revisions: HashMap<String, Value>,
    client: Mutex<Option<mpsc::UnboundedSender<SocketEvent>>>,
    connections: AtomicUsize,
    revision_queries: AtomicUsize,
    revision_delay: Mutex<Option<Duration>>,
    swallow_revision: AtomicBool,
    refuse: AtomicBool,
}

/// Frames answering one request, sent after `delay`.
struct Reply {
    frames: Vec<String>,
    delay: Option<Duration>,
}

impl FakeSpace {
    /// Serves revisions `r1`, `r2` and `r3`; `primary` is the one the info
    /// record points at.
    pub(crate) fn new(primary: &str) -> Arc<Self> {
        let revisions = HashMap::from([
            ("r1".to_string(), revision("Part 2")),
            ("r2".to_string(), revision("Part 2 (revised)")),
            ("r3".to_string(), revision("Part 2 (final)")),
        ]);
        Arc::new(Self {
            primary: Mutex::new(primary.to_string()),
            revisions,
            client: Mutex::new(None),
            connections: AtomicUsize::new(0),
            revision_queries: AtomicUsize::new(0),
            revision_delay: Mutex::new(None),
            swallow_revision: AtomicBool::new(false),
            refuse: AtomicBool::new(false),
        })
    }

    /// Answer revision queries only after `delay`.
    pub(crate) fn delay_revisions(&self, delay: Duration) {
        *self.revision_delay.lock().unwrap() = Some(delay);
    }

    /// Drop the connection instead of answering the next revision query.
    pub(crate) fn swallow_next_revision(&self) {
        self.swallow_revision.store(true, Ordering::SeqCst);
    }

    /// Refuse every later connection attempt.
    pub(crate) fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_primary(&self, revision: &str) {
        *self.primary.lock().unwrap() = revision.to_string();
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn revision_queries(&self) -> usize {
        self.revision_queries.load(Ordering::SeqCst)
    }

    /// Push the info record's revision to the connected client.
    pub(crate) fn push_info(&self, revision: &str) {
        self.push("spaces/s/infos", json!({ "primaryRevision": revision }));
    }

    pub(crate) fn push(&self, path: &str, data: Value) {
        self.send(json!({"t": "d", "d": {"a": "m", "b": {"p": path, "d": data}}}).to_string());
    }

    /// Close the current connection from the server side.
    pub(crate) fn drop_connection(&self) {
        if let Some(client) = self.client.lock().unwrap().take() {
            let _ = client.send(SocketEvent::Closed("1006 reset".into()));
        }
    }

    fn send(&self, frame: String) {
        if let Some(client) = self.client.lock().unwrap().as_ref() {
            let _ = client.send(SocketEvent::Frame(frame));
        }
    }

    fn answer(&self, frame: &str) -> Option<Reply> {
        let frame: Value = serde_json::from_str(frame).ok()?;
        let id = frame["d"]["r"].as_u64()?;
        let path = frame["d"]["b"]["p"].as_str()?;
        let mut delay = None;

        let data = if path.ends_with("/infos") {
            Some(json!({
                "name": "Fake Space",
                "logoURL": "https://img/cover.png",
                "updatedAt": 1_700_000_000_000_i64,
                "primaryRevision": self.primary.lock().unwrap().clone(),
            }))
        } else if let Some((_, revision)) = path.split_once("/revisions/") {
            self.revision_queries.fetch_add(1, Ordering::SeqCst);
            if self.swallow_revision.swap(false, Ordering::SeqCst) {
                self.drop_connection();
                return None;
            }
            delay = *self.revision_delay.lock().unwrap();
            self.revisions.get(revision).cloned()
        } else {
            None
        };

        let frames = match data {
            // Answer as a big payload followed by its numbered ok-frame.
            Some(data) => vec![
                json!({"t": "d", "d": {"a": "d", "b": {"p": path.trim_start_matches('/'), "d": data}}}).to_string(),
                json!({"t": "d", "d": {"r": id, "b": {"s": "ok", "d": {}}}}).to_string(),
            ],
            None => vec![json!({"t": "d", "d": {"r": id, "b": {"s": "not_found", "d": "no such path"}}}).to_string()],
        };
        Some(Reply { frames, delay })
    }
}

fn revision(part_title: &str) -> Value {
    json!({
        "content": {
            "primaryVersion": "v1",
            "versions": { "v1": {
                "entryPage": "root",
                "pages": {
                    "root": { "title": "Root", "pages": ["ch1", "part"] },
                    "ch1": { "kind": "document", "title": "Ch1", "documentURL": "http://cdn/ch1" },
                    "part": { "kind": "group", "title": part_title, "pages": ["ch2"] },
                    "ch2": { "kind": "document", "title": "Ch2", "documentURL": "http://cdn/ch2" }
                }
            } },
            "assets": { "img": { "name": "pic.png", "downloadURL": "http://cdn/img" } }
        }
    })
}

pub(crate) struct FakeConnector {
    space: Arc<FakeSpace>,
}

impl FakeConnector {
    pub(crate) fn new(space: Arc<FakeSpace>) -> Self {
        Self { space }
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _uri: &str) -> impl Future<Output = Result<Socket>> + Send {
        if self.space.refuse.load(Ordering::SeqCst) {
            return std::future::ready(Err(SpacebookError::transport("connection refused")));
        }

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        self.space.connections.fetch_add(1, Ordering::SeqCst);
        *self.space.client.lock().unwrap() = Some(in_tx.clone());
        let _ = in_tx.send(SocketEvent::Frame(CONNECTED.into()));

        let space = Arc::clone(&self.space);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let Some(reply) = space.answer(&frame) else {
                    continue;
                };
                match reply.delay {
                    Some(delay) => {
                        let in_tx = in_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            deliver(&in_tx, reply.frames);
                        });
                    }
                    None => deliver(&in_tx, reply.frames),
                }
            }
        });

        std::future::ready(Ok(Socket::new(out_tx, in_rx)))
    }
}

fn deliver(client: &mpsc::UnboundedSender<SocketEvent>, frames: Vec<String>) {
    for frame in frames {
        if client.send(SocketEvent::Frame(frame)).is_err() {
            return;
        }
    }
}
