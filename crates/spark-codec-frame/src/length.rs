use crate::FrameLimits;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use spark_fiber::{Cut, FramingError, Protocol};

const HEADER_LEN: usize = 4;

/// 4 字节小端长度头 + 负载。
///
/// # 契约说明（What）
/// - 长度头声明的负载超过 `max_frame_len` 时报告 `TooLarge`，不消费任何字节；
/// - `build` 拒绝超过 `max_frame_len` 或无法用 32 位长度头表示的负载，保证发出的帧对端都能切出；
/// - `corrective` 至少丢弃一个字节，然后停在第一个“长度头看起来合法”的位置；
///   找不到时保留末尾不足一个长度头的字节，它们可能是下一帧的开头。
#[derive(Debug, Clone)]
pub struct LengthPrefixed {
    max_frame_len: usize,
}

impl Default for LengthPrefixed {
    fn default() -> Self {
        Self::new(&FrameLimits::default())
    }
}

impl LengthPrefixed {
    pub fn new(limits: &FrameLimits) -> Self {
        Self {
            max_frame_len: limits.max_frame_len,
        }
    }

    fn declared_len(bytes: &[u8]) -> usize {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
    }
}

impl Protocol for LengthPrefixed {
    type Frame = Bytes;

    fn cut(&mut self, buffer: &mut BytesMut) -> Cut<Bytes> {
        if buffer.len() < HEADER_LEN {
            return Cut::NeedMore;
        }
        let len = Self::declared_len(&buffer[..HEADER_LEN]);
        if len > self.max_frame_len {
            return Cut::Corrupt(FramingError::TooLarge {
                len,
                limit: self.max_frame_len,
            });
        }
        if buffer.len() < HEADER_LEN + len {
            return Cut::NeedMore;
        }
        buffer.advance(HEADER_LEN);
        Cut::Frame(buffer.split_to(len).freeze())
    }

    fn corrective(&mut self, buffer: &mut BytesMut) -> usize {
        if buffer.is_empty() {
            return 0;
        }
        let plausible = (1..buffer.len())
            .take_while(|offset| offset + HEADER_LEN <= buffer.len())
            .find(|offset| {
                Self::declared_len(&buffer[*offset..*offset + HEADER_LEN]) <= self.max_frame_len
            });
        let discard = plausible.unwrap_or_else(|| {
            buffer
                .len()
                .saturating_sub(HEADER_LEN - 1)
                .max(1)
        });
        buffer.advance(discard);
        discard
    }

    fn build(&self, payload: &[u8]) -> Result<Bytes, FramingError> {
        let too_large = || FramingError::TooLarge {
            len: payload.len(),
            limit: self.max_frame_len,
        };
        if payload.len() > self.max_frame_len {
            return Err(too_large());
        }
        let header = u32::try_from(payload.len()).map_err(|_| too_large())?;
        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_u32_le(header);
        frame.put_slice(payload);
        Ok(frame.freeze())
    }
}
