//! Wire encoding for control messages and datagram/unistream headers.
//!
//! Every message is built out of the `Encode`/`Decode` primitives in this
//! module: fixed-width integers, a QUIC-style variable length integer, and
//! length-prefixed byte strings. Higher level message types (see
//! [`crate::message`]) are themselves `Encode`/`Decode` by composing these.

mod datagram;
mod error;
mod message;
mod varint;

pub use datagram::*;
pub use error::*;
pub use message::*;
pub use varint::*;

use bytes::{Buf, BufMut};

/// Anything that can be serialized onto the wire.
pub trait Encode: Sized {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError>;
}

/// Anything that can be parsed off the wire.
pub trait Decode: Sized {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError>;
}

impl Encode for u8 {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        if w.remaining_mut() < 1 {
            return Err(EncodeError::BufferTooShort);
        }
        w.put_u8(*self);
        Ok(())
    }
}

impl Decode for u8 {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        if !r.has_remaining() {
            return Err(DecodeError::UnexpectedEnd);
        }
        Ok(r.get_u8())
    }
}

impl Encode for u16 {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        if w.remaining_mut() < 2 {
            return Err(EncodeError::BufferTooShort);
        }
        w.put_u16(*self);
        Ok(())
    }
}

impl Decode for u16 {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        if r.remaining() < 2 {
            return Err(DecodeError::UnexpectedEnd);
        }
        Ok(r.get_u16())
    }
}

impl Encode for u32 {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        if w.remaining_mut() < 4 {
            return Err(EncodeError::BufferTooShort);
        }
        w.put_u32(*self);
        Ok(())
    }
}

impl Decode for u32 {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        if r.remaining() < 4 {
            return Err(DecodeError::UnexpectedEnd);
        }
        Ok(r.get_u32())
    }
}

impl Encode for u64 {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        if w.remaining_mut() < 8 {
            return Err(EncodeError::BufferTooShort);
        }
        w.put_u64(*self);
        Ok(())
    }
}

impl Decode for u64 {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        if r.remaining() < 8 {
            return Err(DecodeError::UnexpectedEnd);
        }
        Ok(r.get_u64())
    }
}

/// A length-prefixed byte string: a [`VarInt`] length followed by that many bytes.
impl Encode for bytes::Bytes {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        VarInt::try_from(self.len() as u64)?.encode(w)?;
        if w.remaining_mut() < self.len() {
            return Err(EncodeError::BufferTooShort);
        }
        w.put_slice(self);
        Ok(())
    }
}

impl Decode for bytes::Bytes {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        let len = VarInt::decode(r)?.into_inner() as usize;
        if r.remaining() < len {
            return Err(DecodeError::UnexpectedEnd);
        }
        Ok(r.copy_to_bytes(len))
    }
}

/// A UTF-8 string, encoded the same way as [`bytes::Bytes`].
impl Encode for String {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        VarInt::try_from(self.len() as u64)?.encode(w)?;
        if w.remaining_mut() < self.len() {
            return Err(EncodeError::BufferTooShort);
        }
        w.put_slice(self.as_bytes());
        Ok(())
    }
}

impl Decode for String {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        let len = VarInt::decode(r)?.into_inner() as usize;
        if r.remaining() < len {
            return Err(DecodeError::UnexpectedEnd);
        }
        let mut buf = vec![0u8; len];
        r.copy_to_slice(&mut buf);
        String::from_utf8(buf).map_err(|_| DecodeError::InvalidString)
    }
}
