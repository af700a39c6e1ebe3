//! `deadlockd` — a decentralized, edge-chasing deadlock detector layered
//! over a per-node FIFO exclusive lock manager.
//!
//! Each node owns its resources exclusively; transactions may span
//! nodes. When a transaction blocks, the local [`server::lock_manager`]
//! fabricates a probe and fans it out to every peer. Peers forward the
//! probe along their own local wait-for edges; a probe that loops back
//! to its initiator proves a cycle, and the detecting node picks a
//! victim and broadcasts an abort.

pub mod config;
pub mod digest;
pub mod error;
pub mod facade;
pub mod server;

pub use config::ServiceConfig;
pub use error::LockError;
