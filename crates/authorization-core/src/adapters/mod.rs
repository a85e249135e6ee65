//! Concrete adapters plugging into the domain layer's ports. Everything
//! here is replaceable: a test harness swaps in its own `Signer`/`Approver`
//! without touching `domain`.
//!
//! - `nostrconnect`: `nostrconnect://` bunker URL parsing (§6)
//! - `interactive_adapter`: sanitizes and forwards pending approvals to a
//!   human-facing prompter (§4.11)
//! - `ipc_adapter`: the synchronous, non-interactive local IPC entry point
//!   (§4.10)
//! - `nip46_adapter`: the bunker/relay envelope entry point, driving the
//!   same `AuthorizationPort` through the interactive path (§6, §4.1 step 2)
//! - `rocksdb_store`: production `KeyValueStore`, behind `rocksdb-backend`

pub mod interactive_adapter;
pub mod ipc_adapter;
pub mod nip46_adapter;
pub mod nostrconnect;

#[cfg(feature = "rocksdb-backend")]
pub mod rocksdb_store;

pub use interactive_adapter::{DisplayApproval, InteractiveAdapter, Prompter};
pub use ipc_adapter::{IpcCursorRow, IpcQueryAdapter};
pub use nip46_adapter::{parse_event_kind, Nip46Envelope, Nip46EnvelopeHandler, Nip46Response};
pub use nostrconnect::{parse as parse_nostrconnect_uri, NostrConnectUri, ParsedPermission};

#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_store::{RocksDbConfig, RocksDbStore};
