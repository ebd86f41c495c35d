//! In-process conversion service speaking the session protocol over WebSocket

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Filenames starting with this prefix get an unrecoverable error after metadata
pub const REJECT_PREFIX: &str = "reject";

/// What the converter saw during one session
#[derive(Clone, Debug, Default)]
pub struct ObservedSession {
    /// Query string of the upgrade request
    pub query: String,
    /// Control commands received, in order
    pub commands: Vec<u64>,
    /// `index` field of every control message
    pub indices: Vec<u64>,
    /// Number of binary frames received
    pub frames: usize,
    /// Concatenated binary payload
    pub bytes: Vec<u8>,
}

impl ObservedSession {
    /// Value of one query parameter
    pub fn param(&self, key: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

/// Handle to a running fake converter
pub struct FakeConverter {
    addr: SocketAddr,
    sessions: Arc<Mutex<Vec<ObservedSession>>>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeConverter {
    /// Bind to an ephemeral port and start accepting sessions
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let task = {
            let sessions = sessions.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, n, sessions.clone()));
                }
            })
        };

        Self {
            addr,
            sessions,
            task,
        }
    }

    /// Session endpoint for `transport.endpoint`
    pub fn endpoint(&self) -> String {
        format!("ws://{}/ws/session", self.addr)
    }

    /// Sessions that reached upload-finished or were rejected
    pub fn sessions(&self) -> Vec<ObservedSession> {
        self.sessions.lock().unwrap().clone()
    }
}

impl Drop for FakeConverter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, n: usize, sessions: Arc<Mutex<Vec<ObservedSession>>>) {
    let query = Arc::new(Mutex::new(String::new()));
    let captured = query.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        *captured.lock().unwrap() = request.uri().query().unwrap_or_default().to_string();
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    let mut session = ObservedSession {
        query: query.lock().unwrap().clone(),
        ..Default::default()
    };
    let rejected = session
        .param("filename")
        .is_some_and(|name| name.starts_with(REJECT_PREFIX));

    // Keep reading after replying so the client is the one to close
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                let command = value["command"].as_u64().unwrap();
                session.commands.push(command);
                session.indices.push(value["index"].as_u64().unwrap());

                if command == 2 && rejected {
                    sessions.lock().unwrap().push(session.clone());
                    let fatal = json!({"command": 10, "body": {"unrecoverable": true, "message": "unsupported image"}});
                    send(&mut ws, fatal).await;
                }
                if command == 11 && !rejected {
                    sessions.lock().unwrap().push(session.clone());
                    for reply in milestones(n) {
                        send(&mut ws, reply).await;
                    }
                }
            }
            Message::Binary(bytes) => {
                session.frames += 1;
                session.bytes.extend_from_slice(&bytes);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    ws.close(None).await.ok();
}

fn milestones(n: usize) -> Vec<Value> {
    vec![
        json!({"command": 5, "body": {}}),
        json!({"command": 6, "body": {}}),
        json!({"command": 10, "body": {"unrecoverable": false, "message": "queue busy"}}),
        json!({"command": 7, "body": {"spec": {"token": format!("tok-{n}")}}}),
        json!({"command": 8, "body": {}}),
        json!({"command": 9, "body": {}}),
    ]
}

async fn send(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::text(value.to_string())).await.ok();
}
