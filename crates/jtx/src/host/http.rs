//! HTTP client interface.
//!
//! Source fetches are *ticketed*: `begin` returns a request id and the host
//! later feeds the outcome back through `Engine::http_response`. Overlapping
//! refreshes therefore race naturally and the later completion wins, which
//! is the contract the scheduler wants. Handler helpers (`get`, `post`, …)
//! use the synchronous `perform` path instead.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

pub type RequestId = u64;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET",
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpClient {
    /// Start an asynchronous request; the embedder completes it later.
    fn begin(&mut self, request: HttpRequest) -> RequestId;

    /// Requests started with `begin` that the embedder has not collected.
    fn take_pending(&mut self) -> Vec<(RequestId, HttpRequest)>;

    /// Resolve a pending request immediately, when the host can (scripted
    /// responses, local fixtures). Drives `Engine::pump_http`.
    fn try_complete(&mut self, request: &HttpRequest) -> Option<Result<HttpResponse, String>> {
        let _ = request;
        None
    }

    /// Synchronous request for handler helpers.
    fn perform(&mut self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// Test/CLI host: responses are scripted per URL and consumed in order.
#[derive(Default)]
pub struct ScriptedHttp {
    next_id: RequestId,
    pending: Vec<(RequestId, HttpRequest)>,
    scripted: FxHashMap<String, VecDeque<Result<HttpResponse, String>>>,
    pub log: Vec<HttpRequest>,
}

impl ScriptedHttp {
    /// Queue a response for the next request to `url`.
    pub fn respond(&mut self, url: &str, status: u16, body: &str) {
        self.scripted
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(HttpResponse {
                status,
                body: body.to_string(),
            }));
    }

    /// Queue a transport failure for the next request to `url`.
    pub fn fail(&mut self, url: &str, message: &str) {
        self.scripted
            .entry(url.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub fn next_scripted(&mut self, url: &str) -> Option<Result<HttpResponse, String>> {
        self.scripted.get_mut(url).and_then(VecDeque::pop_front)
    }
}

impl HttpClient for ScriptedHttp {
    fn begin(&mut self, request: HttpRequest) -> RequestId {
        self.next_id += 1;
        self.log.push(request.clone());
        self.pending.push((self.next_id, request));
        self.next_id
    }

    fn take_pending(&mut self) -> Vec<(RequestId, HttpRequest)> {
        std::mem::take(&mut self.pending)
    }

    fn try_complete(&mut self, request: &HttpRequest) -> Option<Result<HttpResponse, String>> {
        self.next_scripted(&request.url)
    }

    fn perform(&mut self, request: HttpRequest) -> Result<HttpResponse, String> {
        self.log.push(request.clone());
        self.next_scripted(&request.url)
            .unwrap_or_else(|| Err(format!("no scripted response for {}", request.url)))
    }
}
