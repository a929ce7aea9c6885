//! # PetraBench
//!
//! Protocol layer of a latency-measuring load generator for key-value and
//! block-storage backends.
//!
//! ## Features
//!
//! - Memcached ASCII protocol (get, set)
//! - Block-storage binary framing with per-connection correlation handles,
//!   plus the classic memcached binary framing and SASL PLAIN handshake
//! - etcd v2 keys API with Raft leader-redirect tracking
//! - Plain HTTP/1.1 with `Content-Length` bodies
//! - Resumable parsers: responses may arrive in fragments of any size
//!
//! ## Example
//!
//! ```ignore
//! use petrabench::prelude::*;
//!
//! let config = Config::default();
//! let proto = AnyProtocol::from_config(&config, ServerHandle::standalone());
//! let mut session = Session::new(proto, Arc::new(ConnectionStats::new()));
//! session.issue_get(OpKind::Get, "key", 0)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ bytes ┌──────────────────┐ resume_parse ┌──────────────┐
//! │ transport    │──────▶│ Session          │─────────────▶│ AnyProtocol  │
//! │ (event loop) │◀──────│  in-flight queue │◀─────────────│  state       │
//! └──────────────┘       └──────────────────┘  completion  └──────────────┘
//!                                                                 │
//!                                                  ServerGroup ◀──┘ (etcd leader)
//! ```

// Modules
pub mod config;
pub mod error;
pub mod group;
pub mod metrics;
pub mod operation;
pub mod prelude;
pub mod protocol;
pub mod session;

// Re-exports for convenience
pub use error::{PetraBenchError, ProtocolError, Result};
