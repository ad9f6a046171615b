//! Scripted transport for testing
//!
//! Replies are routed by the longest matching URL fragment. Each route plays
//! its replies in order and then keeps repeating the last one.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::transport::{OutboundRequest, RawResponse, Transport};
use crate::error::ApiError;

/// One scripted outcome
#[derive(Debug, Clone)]
pub enum MockReply {
    Json(u16, Value),
    Text(u16, String),
    Fault(ApiError),
    /// Never completes; only a timeout ends it
    Hang,
}

impl MockReply {
    pub fn ok(body: Value) -> Self {
        MockReply::Json(200, body)
    }

    pub fn offline() -> Self {
        MockReply::Fault(ApiError::Transport("network unreachable".to_string()))
    }
}

struct Route {
    fragment: String,
    replies: VecDeque<MockReply>,
}

/// Mock transport recording every attempt it receives.
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    fallback: MockReply,
    delay: Mutex<Duration>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            fallback: MockReply::ok(serde_json::json!({})),
            delay: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for requests whose URL contains `fragment`.
    pub fn reply(&self, fragment: &str, reply: MockReply) -> &Self {
        let mut routes = self.routes.lock().unwrap();
        match routes.iter_mut().find(|r| r.fragment == fragment) {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(Route {
                fragment: fragment.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    /// Simulated network latency applied to every attempt
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of attempts sent to URLs containing `fragment`
    pub fn count(&self, fragment: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }

    fn next_reply(&self, url: &str) -> MockReply {
        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .filter(|r| url.contains(&r.fragment))
            .max_by_key(|r| r.fragment.len());

        match route {
            Some(route) if route.replies.len() > 1 => {
                route.replies.pop_front().unwrap_or_else(|| self.fallback.clone())
            }
            Some(route) => route
                .replies
                .front()
                .cloned()
                .unwrap_or_else(|| self.fallback.clone()),
            None => self.fallback.clone(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: OutboundRequest) -> Result<RawResponse, ApiError> {
        let reply = self.next_reply(&request.url);
        self.requests.lock().unwrap().push(request);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            MockReply::Json(status, body) => Ok(RawResponse {
                status,
                retry_after: None,
                body: body.to_string(),
            }),
            MockReply::Text(status, body) => Ok(RawResponse {
                status,
                retry_after: None,
                body,
            }),
            MockReply::Fault(err) => Err(err),
            MockReply::Hang => std::future::pending().await,
        }
    }
}
