//! Measured operations and the monotonic clock that stamps them

use std::cmp::Ordering;
use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic seconds since the first call in this process
pub fn now() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Command kind of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Get,
    /// Get issued while waiting on a prior request
    GetWait,
    Set,
    /// Set issued while waiting on a prior request
    SetWait,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Get => "GET",
            OpKind::GetWait => "GETW",
            OpKind::Set => "SET",
            OpKind::SetWait => "SETW",
        }
    }

    pub fn is_get(self) -> bool {
        matches!(self, OpKind::Get | OpKind::GetWait)
    }
}

/// Correlation token echoed back by the block protocol.
///
/// A slot index into a per-connection handle table, never an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(pub(crate) u32);

impl RequestHandle {
    /// Value carried in the wire header
    pub fn token(self) -> u64 {
        u64::from(self.0)
    }
}

/// One unit of measured work
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub key: String,
    pub start_time: f64,
    pub end_time: f64,

    /// Time of the most recent leader redirect seen while in flight
    pub switch_time: f64,

    /// Leader redirects seen while in flight
    pub switched: u32,

    pub request_handle: Option<RequestHandle>,
}

impl Operation {
    /// Create an operation stamped with the current time
    pub fn new(kind: OpKind, key: impl Into<String>) -> Self {
        let start_time = now();
        Self {
            kind,
            key: key.into(),
            start_time,
            end_time: start_time,
            switch_time: 0.0,
            switched: 0,
            request_handle: None,
        }
    }

    /// Stamp the end time
    pub fn finish(&mut self) {
        self.end_time = now().max(self.start_time);
    }

    /// Elapsed microseconds
    pub fn time(&self) -> f64 {
        (self.end_time - self.start_time) * 1_000_000.0
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.start_time == other.start_time
    }
}

impl PartialOrd for Operation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.start_time.partial_cmp(&other.start_time)
    }
}
