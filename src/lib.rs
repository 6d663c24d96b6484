//! mesh-sync: trigger-based bidirectional database replication.
//!
//! The workspace splits along the data path:
//!
//! ```text
//! change log ──▶ sync-route ──▶ mesh-sync::extract ──▶ wire bytes
//!                                                        │ transport
//!                                                        ▼ (out of scope)
//! wire bytes ──▶ mesh-sync::loader ──▶ sync-transform ──▶ sync-load ──▶ target db
//! ```
//!
//! This root crate ties the member crates together into the two
//! services a node runs per peer: [`extract::ExtractService`] turns
//! routed outgoing batches into protocol streams, and
//! [`loader::LoadService`] replays incoming protocol streams against
//! the local database, producing one [`sync_model::BatchAck`] per
//! batch. [`ack::AckSender`] delivers acks back through an injected
//! transport with bounded retries.
//!
//! Transport itself (HTTP push/pull), trigger DDL generation, and
//! configuration loading live outside this workspace; everything here
//! works against the capability traits those layers implement.

pub mod ack;
pub mod extract;
pub mod loader;
pub mod testing;

pub use ack::{AckSender, AckTransport};
pub use extract::ExtractService;
pub use loader::LoadService;
