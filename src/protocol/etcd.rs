//! etcd v2 HTTP client with Raft leader-redirect tracking
//!
//! A node that is not the leader may answer with 422/423/424 (the
//! 200/201/404 equivalents) plus an `X-Raft-Leader` header naming the node
//! it believes leads the cluster. The parser follows the redirect without
//! losing the operation's timing and updates the group's leader pointer,
//! but only from the connection whose server is the current believed
//! leader, so stale followers cannot make the pointer flap.
//!
//! The response head is parsed as a whole; the chunked body is skipped by
//! scanning for its terminating zero-length chunk.

use super::buffer::{drain, drain_keeping, find, lossy, parse_decimal};
use super::http::{ResponseHead, parse_head};
use super::{ParseResult, Protocol};
use crate::ProtocolError;
use crate::group::ServerHandle;
use crate::metrics::StatsSink;
use crate::operation::{Operation, now};
use bytes::BytesMut;
use itoa::Buffer;
use tracing::{debug, error, info};

/// Last chunk of a chunked body, with the CRLF that ends the line before it
const CHUNKED_END: &[u8] = b"\r\n0\r\n\r\n";

const LEADER_HEADER: &str = "X-Raft-Leader";

const KEY_PATH: &[u8] = b"/v2/keys/test/";

/// Read state of the etcd parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtcdState {
    Idle,
    WaitingForHttp,
    WaitingForHttpBody,
}

impl EtcdState {
    pub fn name(self) -> &'static str {
        match self {
            EtcdState::Idle => "IDLE",
            EtcdState::WaitingForHttp => "WAITING_FOR_HTTP",
            EtcdState::WaitingForHttpBody => "WAITING_FOR_HTTP_BODY",
        }
    }
}

/// etcd v2 keys API protocol
#[derive(Debug)]
pub struct EtcdProtocol {
    state: EtcdState,
    server: ServerHandle,
    linearizable: bool,
}

impl EtcdProtocol {
    pub fn new(server: ServerHandle, linearizable: bool) -> Self {
        Self {
            state: EtcdState::Idle,
            server,
            linearizable,
        }
    }

    pub fn state(&self) -> EtcdState {
        self.state
    }

    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    fn request_sent(&mut self) {
        self.server.group.request_sent(self.server.id);
        if self.state == EtcdState::Idle {
            self.state = EtcdState::WaitingForHttp;
        }
    }

    /// Returns whether the status announces a leader change
    fn handle_status(
        &self,
        head: &ResponseHead<'_>,
        op: &mut Operation,
        stats: &dyn StatsSink,
    ) -> Result<bool, ProtocolError> {
        match head.code {
            200 | 201 => Ok(false),
            404 => {
                stats.inc_get_misses();
                Ok(false)
            }
            // 404 from a node whose leader has moved
            424 => {
                stats.inc_get_misses();
                Ok(true)
            }
            // 200 and 201 from a node whose leader has moved
            422 | 423 => Ok(true),
            500 => {
                op.finish();
                let leader = self.server.group.leader();
                error!(
                    latency_us = op.time(),
                    server = self.server.id,
                    leader,
                    "Internal Server Error"
                );
                self.server.group.print_load_state();
                Err(ProtocolError::BackendFault {
                    status: head.status(),
                    latency_us: op.time(),
                    server: self.server.id,
                    leader,
                })
            }
            _ => Err(ProtocolError::UnexpectedStatus(head.status())),
        }
    }

    fn follow_leader(&mut self, value: &[u8], op: &mut Operation) -> Result<(), ProtocolError> {
        let new_leader: u32 =
            parse_decimal(value).ok_or_else(|| ProtocolError::InvalidLeader(lossy(value)))?;

        // Only the believed leader's connection may move the pointer; a
        // follower's view of the cluster may be older than ours.
        if self
            .server
            .group
            .replace_leader_if_current(self.server.id, new_leader)
        {
            info!(server = self.server.id, new_leader, "new leader");
        } else {
            debug!(
                server = self.server.id,
                new_leader, "ignoring redirect from non-leader connection"
            );
        }

        op.switched += 1;
        op.switch_time = now();
        Ok(())
    }
}

impl Protocol for EtcdProtocol {
    fn encode_get(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        _value_len: usize,
        _op: &mut Operation,
    ) -> Result<usize, ProtocolError> {
        let start = out.len();
        out.extend_from_slice(b"GET ");
        out.extend_from_slice(KEY_PATH);
        out.extend_from_slice(key.as_bytes());
        if self.linearizable {
            out.extend_from_slice(b"?quorum=true");
        }
        out.extend_from_slice(b" HTTP/1.1\r\n\r\n");

        self.request_sent();
        Ok(out.len() - start)
    }

    fn encode_set(
        &mut self,
        out: &mut BytesMut,
        key: &str,
        value: &[u8],
        _op: &mut Operation,
    ) -> Result<usize, ProtocolError> {
        let start = out.len();
        let mut itoa_buf = Buffer::new();
        out.extend_from_slice(b"POST ");
        out.extend_from_slice(KEY_PATH);
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\nContent-Length: ");
        // "value=" + value
        out.extend_from_slice(itoa_buf.format(value.len() + 6).as_bytes());
        out.extend_from_slice(
            b"\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nvalue=",
        );
        out.extend_from_slice(value);

        self.request_sent();
        Ok(out.len() - start)
    }

    fn resume_parse(
        &mut self,
        input: &mut BytesMut,
        op: &mut Operation,
        stats: &dyn StatsSink,
    ) -> Result<ParseResult, ProtocolError> {
        loop {
            match self.state {
                EtcdState::Idle => {
                    if input.is_empty() {
                        return Ok(ParseResult::NeedMoreData);
                    }
                    return Err(ProtocolError::UnsolicitedData(self.state.name()));
                }
                EtcdState::WaitingForHttp => {
                    let parsed = parse_head(input, LEADER_HEADER);
                    if !matches!(parsed, Ok(None)) {
                        // The request has its answer, whatever the answer is
                        self.server.group.response_received(self.server.id);
                    }
                    let Some(head) = parsed? else {
                        return Ok(ParseResult::NeedMoreData);
                    };

                    if self.handle_status(&head, op, stats)? {
                        let Some(leader) = head.value else {
                            return Err(ProtocolError::InvalidLeader(format!(
                                "{} without {LEADER_HEADER}",
                                head.status()
                            )));
                        };
                        self.follow_leader(leader, op)?;
                    }

                    // The head's last CRLF stays so an empty body still ends in CHUNKED_END
                    let consumed = head.len - 2;
                    drain(input, consumed, stats);
                    self.state = EtcdState::WaitingForHttpBody;
                }
                EtcdState::WaitingForHttpBody => match find(input, CHUNKED_END) {
                    Some(pos) => {
                        drain(input, pos + CHUNKED_END.len(), stats);
                        self.state = EtcdState::WaitingForHttp;
                        return Ok(ParseResult::Complete);
                    }
                    None => {
                        drain_keeping(input, CHUNKED_END.len() - 1, stats);
                        return Ok(ParseResult::NeedMoreData);
                    }
                },
            }
        }
    }

    fn state_name(&self) -> &'static str {
        self.state.name()
    }

    fn name(&self) -> &'static str {
        "etcd"
    }

    fn reset(&mut self) {
        self.state = EtcdState::Idle;
    }
}
