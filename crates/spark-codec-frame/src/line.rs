use crate::FrameLimits;
use bytes::{Buf, Bytes, BytesMut};
use spark_fiber::{Cut, FramingError, Metadata, Protocol};

const NEWLINE: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// 以 `\n` 分隔的文本行，行尾的 `\r` 会被剥离。
///
/// # 设计动机（Why）
/// - 行协议常见于调试通道与简单的文本命令，边界识别只依赖分隔符；
/// - `cut` 只负责切分字节，UTF-8 合法性放在 `verify` 中检查，失败的行按损坏帧处理。
///
/// # 契约说明（What）
/// - 帧不包含换行符；
/// - 尚未出现换行符但已超过 `max_line_len` 时报告 `TooLarge`，`corrective` 丢弃到下一个换行符为止。
#[derive(Debug, Clone)]
pub struct LineDelimited {
    max_line_len: usize,
}

impl Default for LineDelimited {
    fn default() -> Self {
        Self::new(&FrameLimits::default())
    }
}

impl LineDelimited {
    pub fn new(limits: &FrameLimits) -> Self {
        Self {
            max_line_len: limits.max_line_len,
        }
    }
}

impl Protocol for LineDelimited {
    type Frame = Bytes;

    fn cut(&mut self, buffer: &mut BytesMut) -> Cut<Bytes> {
        let Some(position) = buffer.iter().position(|byte| *byte == NEWLINE) else {
            return if buffer.len() > self.max_line_len {
                Cut::Corrupt(FramingError::TooLarge {
                    len: buffer.len(),
                    limit: self.max_line_len,
                })
            } else {
                Cut::NeedMore
            };
        };
        if position > self.max_line_len {
            return Cut::Corrupt(FramingError::TooLarge {
                len: position,
                limit: self.max_line_len,
            });
        }
        let mut line = buffer.split_to(position + 1);
        line.truncate(position);
        if line.last() == Some(&CARRIAGE_RETURN) {
            line.truncate(position - 1);
        }
        Cut::Frame(line.freeze())
    }

    fn corrective(&mut self, buffer: &mut BytesMut) -> usize {
        let discard = buffer
            .iter()
            .position(|byte| *byte == NEWLINE)
            .map_or(buffer.len(), |position| position + 1);
        buffer.advance(discard);
        discard
    }

    fn verify(&self, frame: &Bytes, _metadata: &Metadata) -> Result<(), FramingError> {
        std::str::from_utf8(frame)
            .map(|_| ())
            .map_err(|err| FramingError::rejected(format!("line is not valid UTF-8: {err}")))
    }

    fn build(&self, payload: &[u8]) -> Result<Bytes, FramingError> {
        if payload.len() > self.max_line_len {
            return Err(FramingError::TooLarge {
                len: payload.len(),
                limit: self.max_line_len,
            });
        }
        if payload.contains(&NEWLINE) {
            return Err(FramingError::malformed("line payload contains a newline"));
        }
        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload);
        line.push(NEWLINE);
        Ok(Bytes::from(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_terminates_lines_and_refuses_embedded_newlines() {
        let protocol = LineDelimited::default();
        assert_eq!(protocol.build(b"PONG").unwrap(), Bytes::from_static(b"PONG\n"));
        assert!(matches!(protocol.build(b"a\nb"), Err(FramingError::Malformed(_))));
    }

    #[test]
    fn splits_lines_and_strips_carriage_return() {
        let mut protocol = LineDelimited::default();
        let mut buffer = BytesMut::from(&b"PING\r\nECHO hi\npart"[..]);
        let metadata = Metadata::new();
        assert_eq!(
            protocol.parse(&mut buffer, &metadata),
            Cut::Frame(Bytes::from_static(b"PING"))
        );
        assert_eq!(
            protocol.parse(&mut buffer, &metadata),
            Cut::Frame(Bytes::from_static(b"ECHO hi"))
        );
        assert_eq!(protocol.parse(&mut buffer, &metadata), Cut::NeedMore);
        assert_eq!(&buffer[..], b"part");
    }

    #[test]
    fn invalid_utf8_is_rejected_by_verify() {
        let mut protocol = LineDelimited::default();
        let mut buffer = BytesMut::from(&[0xC3, 0x28, b'\n', b'o', b'k', b'\n'][..]);
        let metadata = Metadata::new();
        assert!(matches!(
            protocol.parse(&mut buffer, &metadata),
            Cut::Corrupt(FramingError::Rejected(_))
        ));
        assert_eq!(
            protocol.parse(&mut buffer, &metadata),
            Cut::Frame(Bytes::from_static(b"ok"))
        );
    }

    #[test]
    fn overlong_line_is_discarded_up_to_the_next_newline() {
        let mut protocol = LineDelimited::new(&FrameLimits {
            max_line_len: 4,
            ..FrameLimits::default()
        });
        let mut buffer = BytesMut::from(&b"toolong\nok\n"[..]);
        assert!(matches!(
            protocol.cut(&mut buffer),
            Cut::Corrupt(FramingError::TooLarge { len: 7, limit: 4 })
        ));
        assert_eq!(protocol.corrective(&mut buffer), 8);
        assert_eq!(protocol.cut(&mut buffer), Cut::Frame(Bytes::from_static(b"ok")));
    }
}
