//! External collaborators.
//!
//! The engine owns the document and the reactive graph; everything else —
//! durable storage, the network, the URL bar — is reached through these
//! traits. The in-memory implementations double as the deterministic test
//! host.

pub mod http;
pub mod storage;
pub mod stream;
pub mod url_state;

pub use http::{HttpClient, HttpRequest, HttpResponse, RequestId, ScriptedHttp};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use stream::{ConnId, MemoryStreams, StreamConnector, StreamEvent, StreamKind};
pub use url_state::{MemoryUrl, UrlState};

pub struct Host {
    pub storage: Box<dyn Storage>,
    pub http: Box<dyn HttpClient>,
    pub streams: Box<dyn StreamConnector>,
    pub url: Box<dyn UrlState>,
}

impl Host {
    /// Fully in-memory host: scripted HTTP, recorded streams, no disk.
    pub fn in_memory() -> Self {
        Self {
            storage: Box::new(MemoryStorage::default()),
            http: Box::new(ScriptedHttp::default()),
            streams: Box::new(MemoryStreams::default()),
            url: Box::new(MemoryUrl::default()),
        }
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::in_memory()
    }
}
