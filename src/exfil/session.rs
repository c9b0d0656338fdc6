//! Reassembly of chunked payloads carried in DNS query names.
//!
//! Query names follow `v2_f.<index>.<token>.<hex chunk>.v2_e.<domain>`. Chunks
//! are grouped per token until the final chunk has been seen and every index
//! up to it has arrived.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Hex characters carried by a full-length chunk.
pub const MAX_CHUNK_LEN: usize = 60;

/// Highest chunk index accepted; payloads are a few hundred bytes.
pub const MAX_CHUNK_INDEX: usize = 4096;

const START_LABEL: &str = "v2_f";
const END_LABEL: &str = "v2_e";

/// One chunk parsed out of a query name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: usize,
    pub token: &'a str,
    pub data: &'a str,
}

/// Parse a query name into a chunk. Returns `None` for names that do not
/// follow the label grammar or carry an index that is not a number up to
/// [`MAX_CHUNK_INDEX`].
pub fn parse_query_name(name: &str) -> Option<Chunk<'_>> {
    let labels: Vec<&str> = name.trim_end_matches('.').split('.').collect();
    if labels.len() < 5 || labels[0] != START_LABEL || labels[4] != END_LABEL {
        return None;
    }

    let index = labels[1].parse::<usize>().ok().filter(|i| *i <= MAX_CHUNK_INDEX)?;
    Some(Chunk {
        index,
        token: labels[2],
        data: labels[3],
    })
}

/// Whether a chunk ends the payload.
///
/// A short chunk always does. A full-length chunk only does when it decodes
/// to a closing `}`, so a non-final chunk that happens to end on `}` is
/// mistaken for the last one.
pub fn is_final_chunk(data: &str) -> bool {
    if data.len() < MAX_CHUNK_LEN {
        return true;
    }
    hex::decode(data)
        .ok()
        .and_then(|bytes| bytes.last().copied())
        == Some(b'}')
}

#[derive(Debug)]
struct Session {
    chunks: BTreeMap<usize, String>,
    final_index: Option<usize>,
    last_seen: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            final_index: None,
            last_seen: Instant::now(),
        }
    }

    fn is_complete(&self) -> bool {
        self.final_index
            .and_then(|last| last.checked_add(1))
            .is_some_and(|count| self.chunks.len() == count)
    }

    fn payload(&self) -> String {
        self.chunks.values().map(String::as_str).collect()
    }
}

/// Concurrent session table keyed by token.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Session>>,
    /// Tokens already decoded, kept until reaped so retransmits are ignored.
    completed: Arc<DashMap<String, Instant>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            completed: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Record a chunk. Returns the concatenated hex payload once the session
    /// completes; a session is handed out at most once.
    pub fn accept(&self, chunk: &Chunk<'_>) -> Option<String> {
        if self.completed.contains_key(chunk.token) {
            debug!("Ignoring chunk {} for completed session {}", chunk.index, chunk.token);
            return None;
        }

        {
            let mut session = self
                .sessions
                .entry(chunk.token.to_string())
                .or_insert_with(Session::new);
            session.chunks.insert(chunk.index, chunk.data.to_string());
            if is_final_chunk(chunk.data) {
                session.final_index = session.final_index.max(Some(chunk.index));
            }
            session.last_seen = Instant::now();
        }

        let (token, session) = self
            .sessions
            .remove_if(chunk.token, |_, session| session.is_complete())?;
        debug!("Session {} complete with {} chunks", token, session.chunks.len());
        self.completed.insert(token, Instant::now());
        Some(session.payload())
    }

    /// Sessions still waiting for chunks.
    pub fn pending(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions idle for longer than the TTL and forget old completions.
    pub fn reap(&self) -> usize {
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.last_seen.elapsed() <= ttl);
        self.completed.retain(|_, done| done.elapsed() <= ttl);
        before.saturating_sub(self.sessions.len())
    }

    /// Run [`SessionStore::reap`] periodically in the background.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let store = self.clone();
        let period = (self.ttl / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let reaped = store.reap();
                if reaped > 0 {
                    debug!("Reaped {} incomplete sessions", reaped);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk<'a>(index: usize, token: &'a str, data: &'a str) -> Chunk<'a> {
        Chunk { index, token, data }
    }

    /// 30 bytes of `a` -> 60 hex characters, not ending in `}`.
    fn full_chunk() -> String {
        hex::encode([b'a'; 30])
    }

    #[test]
    fn test_parse_query_name() {
        assert_eq!(
            parse_query_name("v2_f.3.tok1.deadbe.v2_e.confirm.example.com."),
            Some(chunk(3, "tok1", "deadbe"))
        );
        assert_eq!(parse_query_name("v2_f.x.tok1.deadbe.v2_e.example.com"), None);
        assert_eq!(parse_query_name("ns1.example.com."), None);
        assert_eq!(parse_query_name("v2_f.0.tok1.deadbe.example.com"), None);
    }

    #[test]
    fn test_oversized_index_is_rejected() {
        assert_eq!(
            parse_query_name("v2_f.18446744073709551615.T.7d.v2_e.confirm.example.com."),
            None
        );
        assert_eq!(parse_query_name("v2_f.99999999999999999999.T.7d.v2_e.example.com"), None);
        assert_eq!(
            parse_query_name("v2_f.4096.T.7d.v2_e.example.com").map(|c| c.index),
            Some(MAX_CHUNK_INDEX)
        );
        assert_eq!(parse_query_name("v2_f.4097.T.7d.v2_e.example.com"), None);
    }

    #[test]
    fn test_max_index_final_chunk_does_not_overflow() {
        let store = SessionStore::new(Duration::from_secs(600));
        assert_eq!(store.accept(&chunk(usize::MAX, "T5", "7d")), None);
        assert_eq!(store.pending(), 1);
    }

    #[test]
    fn test_final_chunk_detection() {
        assert!(is_final_chunk("deadbe"));
        assert!(!is_final_chunk(&full_chunk()));

        let mut ends_with_brace = [b'a'; 30];
        ends_with_brace[29] = b'}';
        assert!(is_final_chunk(&hex::encode(ends_with_brace)));
    }

    #[test]
    fn test_single_short_chunk_completes() {
        let store = SessionStore::new(Duration::from_secs(600));
        assert_eq!(store.accept(&chunk(0, "T", "deadbe")), Some("deadbe".to_string()));
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn test_out_of_order_chunks() {
        let store = SessionStore::new(Duration::from_secs(600));
        let first = full_chunk();

        assert_eq!(store.accept(&chunk(1, "T2", "7d")), None);
        assert_eq!(store.pending(), 1);
        assert_eq!(
            store.accept(&chunk(0, "T2", &first)),
            Some(format!("{}7d", first))
        );
    }

    #[test]
    fn test_retransmitted_chunk_overwrites() {
        let store = SessionStore::new(Duration::from_secs(600));
        let first = full_chunk();
        let replacement = hex::encode([b'b'; 30]);

        assert_eq!(store.accept(&chunk(0, "T3", &first)), None);
        assert_eq!(store.accept(&chunk(0, "T3", &replacement)), None);
        assert_eq!(
            store.accept(&chunk(1, "T3", "7d")),
            Some(format!("{}7d", replacement))
        );
    }

    #[test]
    fn test_completed_session_decodes_once() {
        let store = SessionStore::new(Duration::from_secs(600));
        assert!(store.accept(&chunk(0, "T4", "7d")).is_some());
        assert_eq!(store.accept(&chunk(0, "T4", "7d")), None);
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn test_reap_drops_stale_sessions() {
        let store = SessionStore::new(Duration::ZERO);
        store.accept(&chunk(0, "stale", &full_chunk()));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(store.reap(), 1);
        assert_eq!(store.pending(), 0);
    }
}
