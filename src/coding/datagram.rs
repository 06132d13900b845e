//! The datagram header (§4.1). Unlike control messages this is not
//! length-prefixed — it is packed directly into a QUIC datagram frame, whose
//! own framing tells the transport where the datagram ends.

use super::{Decode, DecodeError, Encode, EncodeError, VarInt};
use crate::model::{Flags, MediaId};
use bytes::{Buf, BufMut};

#[derive(Debug, Clone, PartialEq)]
pub struct DatagramHeader {
    pub media_id: MediaId,
    pub group_id: u64,
    pub object_id: u64,
    pub object_offset: u64,
    pub queue_delay: u64,
    pub flags: Flags,
    pub nb_objects_previous_group: u64,
    pub object_length: u64,
    pub payload: bytes::Bytes,
}

impl Encode for DatagramHeader {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        VarInt::try_from(self.media_id.0)?.encode(w)?;
        VarInt::try_from(self.group_id)?.encode(w)?;
        VarInt::try_from(self.object_id)?.encode(w)?;
        VarInt::try_from(self.object_offset)?.encode(w)?;
        VarInt::try_from(self.queue_delay)?.encode(w)?;
        self.flags.encode(w)?;
        VarInt::try_from(self.nb_objects_previous_group)?.encode(w)?;
        VarInt::try_from(self.object_length)?.encode(w)?;
        if w.remaining_mut() < self.payload.len() {
            return Err(EncodeError::BufferTooShort);
        }
        w.put_slice(&self.payload);
        Ok(())
    }
}

impl Decode for DatagramHeader {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        let media_id = MediaId(VarInt::decode(r)?.into_inner());
        let group_id = VarInt::decode(r)?.into_inner();
        let object_id = VarInt::decode(r)?.into_inner();
        let object_offset = VarInt::decode(r)?.into_inner();
        let queue_delay = VarInt::decode(r)?.into_inner();
        let flags = Flags::decode(r)?;
        let nb_objects_previous_group = VarInt::decode(r)?.into_inner();
        let object_length = VarInt::decode(r)?.into_inner();
        // Whatever remains in the datagram is the payload; the transport's
        // own datagram framing bounds `r`.
        let payload = r.copy_to_bytes(r.remaining());
        Ok(Self {
            media_id,
            group_id,
            object_id,
            object_offset,
            queue_delay,
            flags,
            nb_objects_previous_group,
            object_length,
            payload,
        })
    }
}
