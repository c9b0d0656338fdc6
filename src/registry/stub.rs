//! Scripted registry client for tests.

use crate::registry::client::{HttpReply, RegistryClient};
use crate::types::{DepconfError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Answers from a fixed script; unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedClient {
    routes: HashMap<String, (u16, String)>,
    sequences: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
    unreachable: HashSet<String>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, url: &str, status: u16, body: &str) -> Self {
        self.routes.insert(url.to_string(), (status, body.to_string()));
        self
    }

    /// Replies taken in order; the last one repeats.
    pub fn sequence(self, url: &str, replies: Vec<(u16, &str)>) -> Self {
        let queue = replies
            .into_iter()
            .map(|(status, body)| (status, body.to_string()))
            .collect();
        self.sequences.lock().unwrap().insert(url.to_string(), queue);
        self
    }

    pub fn unreachable(mut self, url: &str) -> Self {
        self.unreachable.insert(url.to_string());
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(u, _)| u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn redirect_flags(&self, url: &str) -> Vec<bool> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, follow)| *follow)
            .collect()
    }
}

#[async_trait]
impl RegistryClient for ScriptedClient {
    async fn get(&self, url: &str, follow_redirects: bool) -> Result<HttpReply> {
        self.calls.lock().unwrap().push((url.to_string(), follow_redirects));

        if self.unreachable.contains(url) {
            return Err(DepconfError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        if let Some(queue) = self.sequences.lock().unwrap().get_mut(url) {
            let (status, body) = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            };
            return Ok(HttpReply { status, body });
        }

        let (status, body) = self
            .routes
            .get(url)
            .cloned()
            .unwrap_or((404, String::new()));
        Ok(HttpReply { status, body })
    }
}
