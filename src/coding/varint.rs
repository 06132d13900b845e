use super::{Decode, DecodeError, Encode, EncodeError};
use bytes::{Buf, BufMut};

/// A QUIC-style variable-length integer: the top two bits of the first byte
/// pick the encoded width (1/2/4/8 bytes), giving 6/14/30/62 usable bits.
///
/// Every length prefix in the message codec (§4.1) and every count field
/// goes through this type, so a value that doesn't fit is always an
/// `EncodeError::VarIntTooLarge` / `DecodeError::VarIntOverflow` rather than
/// silent truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: u64 = (1 << 62) - 1;

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for VarInt {
    type Error = EncodeError;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        if v > Self::MAX {
            return Err(EncodeError::VarIntTooLarge(v));
        }
        Ok(Self(v))
    }
}

impl From<VarInt> for u64 {
    fn from(v: VarInt) -> u64 {
        v.0
    }
}

impl Encode for VarInt {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        let v = self.0;
        if v < (1 << 6) {
            if w.remaining_mut() < 1 {
                return Err(EncodeError::BufferTooShort);
            }
            w.put_u8(v as u8);
        } else if v < (1 << 14) {
            if w.remaining_mut() < 2 {
                return Err(EncodeError::BufferTooShort);
            }
            w.put_u16(0b01 << 14 | v as u16);
        } else if v < (1 << 30) {
            if w.remaining_mut() < 4 {
                return Err(EncodeError::BufferTooShort);
            }
            w.put_u32(0b10 << 30 | v as u32);
        } else {
            if w.remaining_mut() < 8 {
                return Err(EncodeError::BufferTooShort);
            }
            w.put_u64(0b11 << 62 | v);
        }
        Ok(())
    }
}

impl Decode for VarInt {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        if !r.has_remaining() {
            return Err(DecodeError::UnexpectedEnd);
        }
        let first = r.chunk()[0];
        let tag = first >> 6;
        let len = 1usize << tag;
        if r.remaining() < len {
            return Err(DecodeError::UnexpectedEnd);
        }

        let v = match tag {
            0 => r.get_u8() as u64 & 0x3f,
            1 => r.get_u16() as u64 & 0x3fff,
            2 => r.get_u32() as u64 & 0x3fff_ffff,
            3 => r.get_u64() & 0x3fff_ffff_ffff_ffff,
            _ => unreachable!(),
        };

        Ok(Self(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(v: u64) {
        let mut buf = BytesMut::new();
        let vi = VarInt::try_from(v).unwrap();
        vi.encode(&mut buf).unwrap();
        let decoded = VarInt::decode(&mut buf).unwrap();
        assert_eq!(decoded.into_inner(), v);
    }

    #[test]
    fn round_trip_widths() {
        roundtrip(0);
        roundtrip(63);
        roundtrip(64);
        roundtrip((1 << 14) - 1);
        roundtrip(1 << 14);
        roundtrip((1 << 30) - 1);
        roundtrip(1 << 30);
        roundtrip(VarInt::MAX);
    }

    #[test]
    fn too_large_rejected() {
        let err = VarInt::try_from(VarInt::MAX + 1).unwrap_err();
        assert!(matches!(err, EncodeError::VarIntTooLarge(_)));
    }

    #[test]
    fn decode_runs_off_buffer() {
        // Tag says 8-byte encoding, but only one byte is present.
        let mut buf = BytesMut::from(&[0xC0u8][..]);
        let err = VarInt::decode(&mut buf).unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedEnd);
    }

    #[test]
    fn single_byte_uses_top_bits_zero() {
        let mut buf = BytesMut::new();
        VarInt::try_from(37).unwrap().encode(&mut buf).unwrap();
        assert_eq!(buf.to_vec(), vec![37]);
    }
}
