use super::{Cut, Protocol};
use crate::error::FramingError;
use bytes::{Bytes, BytesMut};

/// 原样透传：每次读到的全部字节即为一帧，出站数据不加帧头。
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Protocol for Passthrough {
    type Frame = Bytes;

    fn cut(&mut self, buffer: &mut BytesMut) -> Cut<Bytes> {
        if buffer.is_empty() {
            Cut::NeedMore
        } else {
            Cut::Frame(buffer.split().freeze())
        }
    }

    fn build(&self, payload: &[u8]) -> Result<Bytes, FramingError> {
        Ok(Bytes::copy_from_slice(payload))
    }
}
