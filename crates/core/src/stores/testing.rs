//! Scripted transport for adapter tests.

use super::transport::{HttpResponse, HttpTransport};
use crate::error::StoreError;
use reqwest::Method;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

type Reply = Result<HttpResponse, StoreError>;

/// Replays queued replies in order and records every request. An exhausted
/// queue behaves like a refused connection.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, status: u16, body: Value) -> &Self {
        self.push(Ok(HttpResponse::new(status, body)))
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.push(Err(StoreError::Request(message.to_string())))
    }

    fn push(&self, reply: Reply) -> &Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests().pop()
    }

    pub fn boxed(&self) -> Box<dyn HttpTransport> {
        Box::new(self.clone())
    }
}

impl HttpTransport for ScriptedTransport {
    fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<HttpResponse, StoreError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(RecordedRequest {
                method,
                path: path.to_string(),
                body: body.cloned(),
            });
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| Err(StoreError::Request("connection refused".to_string())))
    }
}
