//! Streaming transports (SSE, WebSocket).
//!
//! The connector only opens and closes connections; everything that arrives
//! on the wire is pushed back into the engine via `Engine::stream_event`.

pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Sse,
    Ws,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Open,
    Message {
        /// SSE event type; `None` for WebSocket frames and default events.
        event_type: Option<String>,
        data: String,
        last_event_id: Option<String>,
    },
    Error(String),
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

pub trait StreamConnector {
    fn connect(&mut self, url: &str, kind: StreamKind) -> ConnId;
    fn close(&mut self, conn: ConnId);
}

/// Test host: records connections so a test can drive them.
#[derive(Default)]
pub struct MemoryStreams {
    next_id: ConnId,
    pub connections: Vec<(ConnId, String, StreamKind)>,
    pub closed: Vec<ConnId>,
}

impl MemoryStreams {
    pub fn last_connection(&self) -> Option<ConnId> {
        self.connections.last().map(|(id, _, _)| *id)
    }
}

impl StreamConnector for MemoryStreams {
    fn connect(&mut self, url: &str, kind: StreamKind) -> ConnId {
        self.next_id += 1;
        self.connections.push((self.next_id, url.to_string(), kind));
        self.next_id
    }

    fn close(&mut self, conn: ConnId) {
        self.closed.push(conn);
    }
}
