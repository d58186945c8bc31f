//! Durable storage for sessions and their messages.
//!
//! The multiplexer only does point lookups and writes here; no transaction
//! ever spans this store and the in-memory registries. The store is always
//! written before (or alongside) the in-memory state so a crash cannot leave
//! a session that exists only in memory.

pub mod store;

pub use store::{MessageRecord, MessageRole, SessionRecord, SessionStore, SqliteStore};
