//! Prelude module for common imports.
//!
//! This module re-exports commonly used types and traits for convenience.
//!
//! # Usage
//!
//! ```ignore
//! use petrabench::prelude::*;
//! ```

// Error types
pub use crate::error::{PetraBenchError, ProtocolError, Result};

// Configuration
pub use crate::config::{
    BinaryConfig, BinaryFraming, Config, EtcdConfig, ProtocolConfig, ProtocolKind, SaslConfig,
};

// Operations
pub use crate::operation::{OpKind, Operation, RequestHandle};

// Protocol
pub use crate::protocol::{AnyProtocol, ParseResult, Protocol};

// Servers and sessions
pub use crate::group::{ServerGroup, ServerHandle};
pub use crate::session::Session;

// Statistics
pub use crate::metrics::{ConnectionStats, Metrics, StatsSink};

// Common external crates
pub use bytes::BytesMut;
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
