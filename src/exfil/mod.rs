//! Install confirmations.
//!
//! Decoy packages registered under confusable names phone home by encoding a
//! small JSON document into DNS query names under a zone we are
//! authoritative for. The listener answers every query, reassembles the
//! chunks per session token and persists the decoded record.

pub mod dns;
pub mod record;
pub mod session;
pub mod store;

pub use dns::{run_listener, AnswerTable, ConfirmationSink, ExfilHandler, ListenerSettings};
pub use record::{decode_payload, Payload};
pub use session::{
    is_final_chunk, parse_query_name, Chunk, SessionStore, MAX_CHUNK_INDEX, MAX_CHUNK_LEN,
};
pub use store::{Confirmation, ConfirmationStore, JsonLinesStore, MemoryStore};
