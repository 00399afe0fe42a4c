//! 分帧重组的性质测试：同一段线上字节无论被切成多少片、在哪里切，
//! 经 `NetWorker` 读路径得到的帧序列都与整段投递完全一致。

use bytes::Bytes;
use proptest::prelude::*;
use proptest::sample::Index;
use spark_codec_frame::websocket::{compute_accept_key, encode_with_mask};
use spark_codec_frame::{LengthPrefixed, LineDelimited, Opcode, WebSocket, WsFrame};
use spark_fiber::test_stubs::{MemoryPeer, MemorySocket};
use spark_fiber::{NetWorker, Protocol, Runtime, Service, SocketId, Worker, WorkerCore};
use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

const MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
const CLIENT_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// 只记录收到的帧。
struct Collect<P: Protocol> {
    prototype: P,
    frames: Rc<RefCell<Vec<P::Frame>>>,
}

impl<P: Protocol + Clone> Service for Collect<P> {
    type Protocol = P;
    type Work = ();
    type Attachment = ();

    fn protocol(&mut self) -> P {
        self.prototype.clone()
    }

    fn on_frame(&mut self, _core: &mut WorkerCore<Self>, _socket: SocketId, frame: P::Frame) {
        self.frames.borrow_mut().push(frame);
    }
}

fn deliver<P>(prototype: P, chunks: &[Vec<u8>]) -> (Vec<P::Frame>, MemoryPeer)
where
    P: Protocol + Clone,
{
    let frames = Rc::new(RefCell::new(Vec::new()));
    let service = Collect {
        prototype,
        frames: Rc::clone(&frames),
    };
    let mut worker = NetWorker::new("collect", Runtime::default(), service);
    worker.initialize().unwrap();
    let (socket, peer) = MemorySocket::pair();
    let id = worker.adopt(Box::new(socket)).unwrap();
    for chunk in chunks {
        peer.send(chunk);
        worker.handle_socket(id);
    }
    let collected = frames.take();
    (collected, peer)
}

fn split(wire: &[u8], cuts: &[Index]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts.iter().map(|cut| cut.index(wire.len() + 1)).collect();
    points.push(0);
    points.push(wire.len());
    points.sort_unstable();
    points.dedup();
    points
        .windows(2)
        .map(|pair| wire[pair[0]..pair[1]].to_vec())
        .collect()
}

fn assert_split_matches_whole<P>(prototype: P, wire: &[u8], cuts: &[Index], expected: usize)
where
    P: Protocol + Clone,
    P::Frame: PartialEq + Debug,
{
    let (whole, _) = deliver(prototype.clone(), &[wire.to_vec()]);
    let (pieces, _) = deliver(prototype, &split(wire, cuts));
    assert_eq!(whole.len(), expected);
    assert_eq!(whole, pieces);
}

fn upgrade_request() -> Vec<u8> {
    format!(
        "GET /stream HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {CLIENT_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
    .into_bytes()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn length_prefixed_frames_survive_arbitrary_splits(
        first in proptest::collection::vec(any::<u8>(), 0..300),
        second in proptest::collection::vec(any::<u8>(), 0..300),
        cuts in proptest::collection::vec(any::<Index>(), 0..12),
    ) {
        let protocol = LengthPrefixed::default();
        let mut wire = protocol.build(&first).unwrap().to_vec();
        wire.extend_from_slice(&protocol.build(&second).unwrap());
        assert_split_matches_whole(protocol.clone(), &wire, &cuts, 2);

        let (frames, _) = deliver(protocol, &split(&wire, &cuts));
        prop_assert_eq!(&frames[0][..], &first[..]);
        prop_assert_eq!(&frames[1][..], &second[..]);
    }

    #[test]
    fn lines_survive_arbitrary_splits(
        first in "[a-z ]{0,40}",
        second in "[a-z ]{0,40}",
        cuts in proptest::collection::vec(any::<Index>(), 0..12),
    ) {
        let wire = format!("{first}\r\n{second}\n").into_bytes();
        assert_split_matches_whole(LineDelimited::default(), &wire, &cuts, 2);

        let (frames, _) = deliver(LineDelimited::default(), &split(&wire, &cuts));
        prop_assert_eq!(frames[0].clone(), Bytes::from(first));
        prop_assert_eq!(frames[1].clone(), Bytes::from(second));
    }

    #[test]
    fn websocket_handshake_and_frames_survive_arbitrary_splits(
        first in proptest::collection::vec(any::<u8>(), 0..200),
        second in proptest::collection::vec(any::<u8>(), 0..200),
        cuts in proptest::collection::vec(any::<Index>(), 0..12),
    ) {
        let mut wire = upgrade_request();
        wire.extend_from_slice(&encode_with_mask(Opcode::Binary, true, &first, Some(MASK)));
        wire.extend_from_slice(&encode_with_mask(Opcode::Binary, true, &second, Some(MASK)));
        assert_split_matches_whole(WebSocket::default(), &wire, &cuts, 2);

        let (frames, peer) = deliver(WebSocket::default(), &split(&wire, &cuts));
        prop_assert_eq!(
            &frames[0],
            &WsFrame { fin: true, opcode: Opcode::Binary, masked: true, payload: Bytes::from(first) }
        );
        prop_assert_eq!(&frames[1].payload[..], &second[..]);
        let response = peer.output_string();
        prop_assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        let accept_header = format!("Sec-WebSocket-Accept: {}\r\n", compute_accept_key(CLIENT_KEY));
        prop_assert!(response.contains(&accept_header));
    }
}

#[test]
fn rejected_upgrade_answers_400_and_closes() {
    let request = b"POST /stream HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec();
    let (frames, peer) = deliver(WebSocket::default(), &[request]);
    assert!(frames.is_empty());
    assert!(peer.output_string().starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(peer.is_closed());
}

#[test]
fn corrupt_line_is_skipped_and_the_stream_continues() {
    let wire = [&b"ok\n"[..], &[0xFF, 0xFE, b'\n'], b"next\n"].concat();
    let (frames, peer) = deliver(LineDelimited::default(), &[wire]);
    assert_eq!(frames, vec![Bytes::from_static(b"ok"), Bytes::from_static(b"next")]);
    assert!(!peer.is_closed());
}
