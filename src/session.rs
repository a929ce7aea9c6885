//! Per-connection request bookkeeping
//!
//! A [`Session`] sits between a transport and a protocol: it encodes
//! requests into the outbound buffer, keeps the operations that are in
//! flight, and turns parser completions back into finished operations
//! with their end times stamped.

use crate::ProtocolError;
use crate::metrics::StatsSink;
use crate::operation::{OpKind, Operation};
use crate::protocol::{AnyProtocol, ParseResult, Protocol};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// One connection's protocol state and in-flight queue
pub struct Session<P: Protocol = AnyProtocol> {
    protocol: P,
    stats: Arc<dyn StatsSink + Send + Sync>,
    out: BytesMut,
    in_flight: VecDeque<Operation>,
    ready: bool,
}

impl<P: Protocol> Session<P> {
    /// Create a session, queueing the protocol's handshake if it has one
    pub fn new(mut protocol: P, stats: Arc<dyn StatsSink + Send + Sync>) -> Self {
        let mut out = BytesMut::with_capacity(8192);
        let ready = protocol.setup_connection(&mut out);
        if !ready {
            debug!(protocol = protocol.name(), "handshake pending");
        }
        Self {
            protocol,
            stats,
            out,
            in_flight: VecDeque::new(),
            ready,
        }
    }

    /// True once the connection handshake has completed
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Operations awaiting a response
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Take the bytes queued for the transport to write
    pub fn take_outbound(&mut self) -> BytesMut {
        self.out.split()
    }

    /// Encode a get and queue its operation
    pub fn issue_get(
        &mut self,
        kind: OpKind,
        key: &str,
        value_len: usize,
    ) -> Result<usize, ProtocolError> {
        let mut op = Operation::new(kind, key);
        let n = self
            .protocol
            .encode_get(&mut self.out, key, value_len, &mut op)?;
        self.in_flight.push_back(op);
        Ok(n)
    }

    /// Encode a set and queue its operation
    pub fn issue_set(
        &mut self,
        kind: OpKind,
        key: &str,
        value: &[u8],
    ) -> Result<usize, ProtocolError> {
        let mut op = Operation::new(kind, key);
        let n = self.protocol.encode_set(&mut self.out, key, value, &mut op)?;
        self.in_flight.push_back(op);
        Ok(n)
    }

    /// Drain every complete response in `input`, returning finished operations
    pub fn on_readable(&mut self, input: &mut BytesMut) -> Result<Vec<Operation>, ProtocolError> {
        if !self.ready {
            self.ready = self.protocol.finish_setup(input, self.stats.as_ref())?;
            if !self.ready {
                return Ok(Vec::new());
            }
            debug!(protocol = self.protocol.name(), "handshake complete");
        }

        let mut done = Vec::new();
        loop {
            let Some(head) = self.in_flight.front_mut() else {
                if input.is_empty() {
                    break;
                }
                return Err(ProtocolError::UnsolicitedData(self.protocol.state_name()));
            };

            let finished = match self.protocol.resume_parse(input, head, self.stats.as_ref())? {
                ParseResult::NeedMoreData => break,
                ParseResult::Complete => self.in_flight.pop_front(),
                ParseResult::Matched(handle) => {
                    let index = self
                        .in_flight
                        .iter()
                        .position(|op| op.request_handle == Some(handle))
                        .ok_or(ProtocolError::UnknownHandle(handle.token()))?;
                    self.in_flight.remove(index)
                }
            };

            if let Some(mut op) = finished {
                op.finish();
                trace!(kind = op.kind.as_str(), key = %op.key, latency_us = op.time(), "op done");
                done.push(op);
            }
        }
        Ok(done)
    }
}
