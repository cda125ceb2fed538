//! Scripted in-memory transport
//!
//! Replies are queued per `"METHOD path"` route. The last queued reply for a
//! route is sticky: it is returned for every further call, so a test can say
//! "pending forever" with a single entry. Optional delays use
//! `tokio::time::sleep`, which cooperates with a paused test clock.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::{Result, Transport, TransportError, TransportFuture};

#[derive(Clone)]
struct Reply {
    delay: Option<Duration>,
    result: Result<Value>,
}

/// A call observed by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `method path`.
    pub fn reply(&self, method: &str, path: &str, result: Result<Value>) -> &Self {
        self.push(method, path, None, result)
    }

    /// Queue a reply that resolves after `delay`.
    pub fn reply_after(
        &self,
        method: &str,
        path: &str,
        delay: Duration,
        result: Result<Value>,
    ) -> &Self {
        self.push(method, path, Some(delay), result)
    }

    /// Drop all queued replies for `method path`.
    pub fn clear_replies(&self, method: &str, path: &str) {
        self.routes
            .lock()
            .unwrap()
            .remove(&route_key(method, path));
    }

    /// Number of calls made to `method path`.
    pub fn calls_to(&self, method: &str, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    /// All calls in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn push(
        &self,
        method: &str,
        path: &str,
        delay: Option<Duration>,
        result: Result<Value>,
    ) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(route_key(method, path))
            .or_default()
            .push_back(Reply { delay, result });
        self
    }

    fn call(
        &self,
        method: &'static str,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> TransportFuture<'_> {
        let key = route_key(method, path);
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            path: path.to_string(),
            query,
            body,
        });

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        Box::pin(async move {
            let Some(reply) = reply else {
                return Err(TransportError::Server {
                    status: 404,
                    message: format!("no mock reply for {key}"),
                });
            };
            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }
            reply.result
        })
    }
}

fn route_key(method: &str, path: &str) -> String {
    format!("{method} {path}")
}

impl Transport for MockTransport {
    fn get<'a>(&'a self, path: &'a str, query: &'a [(&'a str, &'a str)]) -> TransportFuture<'a> {
        let query = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.call("GET", path, query, None)
    }

    fn post<'a>(&'a self, path: &'a str, body: Option<&'a Value>) -> TransportFuture<'a> {
        self.call("POST", path, Vec::new(), body.cloned())
    }

    fn delete<'a>(&'a self, path: &'a str) -> TransportFuture<'a> {
        self.call("DELETE", path, Vec::new(), None)
    }
}
