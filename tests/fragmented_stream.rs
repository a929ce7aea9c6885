//! Drives every protocol through a real byte stream that delivers responses
//! in small, arbitrary fragments.

use petrabench::prelude::*;
use petrabench::protocol::wire::{BLK_CMD_GET, BLK_CMD_SET, BlockHeader};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Write `wire` in `chunk`-byte writes and feed what arrives to `session`
async fn drive<P: Protocol>(
    session: &mut Session<P>,
    wire: Vec<u8>,
    chunk: usize,
    expected: usize,
) -> Vec<Operation> {
    let (mut client, mut server) = duplex(16);
    let writer = tokio::spawn(async move {
        for piece in wire.chunks(chunk) {
            server.write_all(piece).await.unwrap();
        }
        server
    });

    let mut input = BytesMut::with_capacity(4096);
    let mut done = Vec::new();
    while done.len() < expected {
        let n = client.read_buf(&mut input).await.unwrap();
        assert!(n > 0, "stream closed after {} of {expected} ops", done.len());
        done.extend(session.on_readable(&mut input).unwrap());
    }

    drop(writer.await.unwrap());
    assert!(input.is_empty());
    done
}

#[tokio::test]
async fn test_ascii_over_stream() {
    init_tracing();
    let stats = Arc::new(ConnectionStats::new());
    let proto = AnyProtocol::from_config(&Config::default(), ServerHandle::standalone());
    let mut session = Session::new(proto, stats.clone());

    session.issue_get(OpKind::Get, "missing", 0).unwrap();
    session.issue_get(OpKind::GetWait, "present", 0).unwrap();
    session.issue_set(OpKind::Set, "present", b"hello").unwrap();

    let wire = b"END\r\nVALUE present 0 5\r\nhello\r\nEND\r\nSTORED\r\n".to_vec();
    let len = wire.len() as u64;
    let done = drive(&mut session, wire, 3, 3).await;

    let kinds: Vec<_> = done.iter().map(|op| op.kind).collect();
    assert_eq!(kinds, vec![OpKind::Get, OpKind::GetWait, OpKind::Set]);
    assert_eq!(stats.get_misses(), 1);
    assert_eq!(stats.rx_bytes(), len);
}

#[tokio::test]
async fn test_block_binary_over_stream() {
    init_tracing();
    let stats = Arc::new(ConnectionStats::new());
    let config = Config::from_toml("[protocol]\nkind = \"binary\"\n").unwrap();
    let proto = AnyProtocol::from_config(&config, ServerHandle::standalone());
    let mut session = Session::new(proto, stats.clone());

    session.issue_get(OpKind::Get, "8", 1024).unwrap();
    session.issue_set(OpKind::Set, "16", &[7u8; 512]).unwrap();
    let out = session.take_outbound();
    let get = BlockHeader::decode(&out).unwrap();
    let set = BlockHeader::decode(&out[BlockHeader::SIZE..]).unwrap();
    assert_eq!(get.block_count, 2);
    assert_eq!(set.block_count, 1);

    // The write is acknowledged before the read returns its blocks
    let mut wire = Vec::new();
    BlockHeader::new(BLK_CMD_SET, set.request_token, set.lba, 1).encode(&mut wire);
    BlockHeader::new(BLK_CMD_GET, get.request_token, get.lba, 2).encode(&mut wire);
    wire.resize(wire.len() + 1024, 0xee);
    let len = wire.len() as u64;

    let done = drive(&mut session, wire, 5, 2).await;
    let keys: Vec<_> = done.iter().map(|op| op.key.as_str()).collect();
    assert_eq!(keys, vec!["16", "8"]);
    assert_eq!(stats.rx_bytes(), len);
}

#[tokio::test]
async fn test_etcd_leader_redirect_over_stream() {
    init_tracing();
    let metrics = Arc::new(Metrics::new());
    let group = ServerGroup::new(3, 0);
    let config = Config::from_toml("[protocol]\nkind = \"etcd\"\n").unwrap();

    let leader_conn = AnyProtocol::from_config(&config, ServerHandle::new(0, Arc::clone(&group)));
    let follower_conn =
        AnyProtocol::from_config(&config, ServerHandle::new(1, Arc::clone(&group)));
    let mut leader = Session::new(leader_conn, metrics.clone());
    let mut follower = Session::new(follower_conn, metrics.clone());

    let redirect = |to: u32| {
        format!(
            "HTTP/1.1 422 status code 422\r\nContent-Type: application/json\r\n\
             X-Raft-Leader: {to}\r\nTransfer-Encoding: chunked\r\n\r\n\
             2\r\n{{}}\r\n0\r\n\r\n"
        )
        .into_bytes()
    };

    // A stale follower must not move the pointer
    follower.issue_set(OpKind::Set, "k", b"v").unwrap();
    let done = drive(&mut follower, redirect(1), 4, 1).await;
    assert_eq!(done[0].switched, 1);
    assert_eq!(group.leader(), 0);

    leader.issue_set(OpKind::Set, "k", b"v").unwrap();
    leader.issue_get(OpKind::Get, "gone", 0).unwrap();
    let mut wire = redirect(2);
    wire.extend_from_slice(b"HTTP/1.1 404 Not Found\r\nX-Etcd-Index: 7\r\n\r\n0\r\n\r\n");
    let done = drive(&mut leader, wire, 2, 2).await;

    assert_eq!(done[0].switched, 1);
    assert!(done[0].switch_time >= done[0].start_time);
    assert_eq!(done[1].switched, 0);
    assert_eq!(group.leader(), 2);
    assert_eq!(group.load(0), 0);

    let output = metrics.gather();
    assert!(output.contains("petrabench_get_misses_total 1"));
}

#[tokio::test]
async fn test_http_over_stream() {
    init_tracing();
    let stats = Arc::new(ConnectionStats::new());
    let config = Config::from_toml("[protocol]\nkind = \"http\"\n").unwrap();
    let proto = AnyProtocol::from_config(&config, ServerHandle::standalone());
    let mut session = Session::new(proto, stats.clone());

    session.issue_get(OpKind::Get, "a", 0).unwrap();
    session.issue_set(OpKind::Set, "b", b"payload").unwrap();

    let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello\
                 HTTP/1.1 200 OK\r\nServer: test\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok"
        .to_vec();
    let len = wire.len() as u64;
    let done = drive(&mut session, wire, 1, 2).await;

    assert_eq!(done.len(), 2);
    assert_eq!(stats.get_misses(), 0);
    assert_eq!(stats.rx_bytes(), len);
}
