use bytes::{Buf, BufMut, Bytes, BytesMut};
use spark_fiber::{Cut, FramingError};

/// RFC 6455 操作码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// 一个已去掩码的 WebSocket 帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: Opcode,
    /// 帧在线上是否带掩码。
    pub masked: bool,
    pub payload: Bytes,
}

const MAX_CONTROL_PAYLOAD: usize = 125;

/// 从缓冲切出一个帧；数据不足时不消费任何字节。
pub(crate) fn cut(buffer: &mut BytesMut, max_payload: usize) -> Cut<WsFrame> {
    if buffer.len() < 2 {
        return Cut::NeedMore;
    }
    let first = buffer[0];
    let second = buffer[1];
    if first & 0x70 != 0 {
        return Cut::Corrupt(FramingError::malformed("reserved bits set"));
    }
    let Some(opcode) = Opcode::from_u8(first & 0x0F) else {
        return Cut::Corrupt(FramingError::malformed(format!(
            "unknown opcode {:#x}",
            first & 0x0F
        )));
    };
    let fin = first & 0x80 != 0;
    let masked = second & 0x80 != 0;

    let (len, mut offset) = match second & 0x7F {
        126 => {
            if buffer.len() < 4 {
                return Cut::NeedMore;
            }
            (u64::from(u16::from_be_bytes([buffer[2], buffer[3]])), 4)
        }
        127 => {
            if buffer.len() < 10 {
                return Cut::NeedMore;
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buffer[2..10]);
            let len = u64::from_be_bytes(raw);
            if len >> 63 != 0 {
                return Cut::Corrupt(FramingError::malformed("64-bit length has its high bit set"));
            }
            (len, 10)
        }
        short => (u64::from(short), 2),
    };
    let len = usize::try_from(len).unwrap_or(usize::MAX);
    if opcode.is_control() && (!fin || len > MAX_CONTROL_PAYLOAD) {
        return Cut::Corrupt(FramingError::malformed(
            "control frames must be final and at most 125 bytes",
        ));
    }
    if len > max_payload {
        return Cut::Corrupt(FramingError::TooLarge {
            len,
            limit: max_payload,
        });
    }

    let mask = if masked {
        if buffer.len() < offset + 4 {
            return Cut::NeedMore;
        }
        let key = [
            buffer[offset],
            buffer[offset + 1],
            buffer[offset + 2],
            buffer[offset + 3],
        ];
        offset += 4;
        Some(key)
    } else {
        None
    };
    if buffer.len() < offset + len {
        return Cut::NeedMore;
    }

    buffer.advance(offset);
    let mut payload = buffer.split_to(len);
    if let Some(key) = mask {
        for (index, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[index % 4];
        }
    }
    Cut::Frame(WsFrame {
        fin,
        opcode,
        masked,
        payload: payload.freeze(),
    })
}

/// 编码一个服务端帧（不带掩码）。
pub fn encode(opcode: Opcode, fin: bool, payload: &[u8]) -> Bytes {
    encode_with_mask(opcode, fin, payload, None)
}

/// 编码一个帧；`mask` 为 `Some` 时按客户端方式加掩码。
pub fn encode_with_mask(opcode: Opcode, fin: bool, payload: &[u8], mask: Option<[u8; 4]>) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + 14);
    frame.put_u8((if fin { 0x80 } else { 0 }) | opcode.as_u8());
    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    match payload.len() {
        len @ 0..=125 => frame.put_u8(mask_bit | len as u8),
        len @ 126..=0xFFFF => {
            frame.put_u8(mask_bit | 126);
            frame.put_u16(len as u16);
        }
        len => {
            frame.put_u8(mask_bit | 127);
            frame.put_u64(len as u64);
        }
    }
    match mask {
        Some(key) => {
            frame.put_slice(&key);
            frame.extend(payload.iter().enumerate().map(|(index, byte)| byte ^ key[index % 4]));
        }
        None => frame.put_slice(payload),
    }
    frame.freeze()
}
