//! Control messages (§4.1). Each message is length-prefixed by a 16-bit
//! big-endian length, followed by a type byte and type-specific fields.
//! [`Message::encode_framed`]/[`Message::decode_framed`] handle the framing;
//! the `Encode`/`Decode` impls on each message struct handle the body.

use super::{Decode, DecodeError, Encode, EncodeError, VarInt};
use crate::model::{Flags, MediaId, ObjectLocation, SubscribeIntent, TransportMode};
use bytes::{Buf, BufMut};

impl Encode for TransportMode {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        let tag: u8 = match self {
            TransportMode::Stream => 0,
            TransportMode::Datagram => 1,
            TransportMode::Warp => 2,
            TransportMode::Rush => 3,
        };
        tag.encode(w)
    }
}

impl Decode for TransportMode {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(match u8::decode(r)? {
            0 => TransportMode::Stream,
            1 => TransportMode::Datagram,
            2 => TransportMode::Warp,
            3 => TransportMode::Rush,
            other => return Err(DecodeError::UnknownMessageType(other as u64)),
        })
    }
}

impl Encode for ObjectLocation {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        VarInt::try_from(self.group_id)?.encode(w)?;
        VarInt::try_from(self.object_id)?.encode(w)
    }
}

impl Decode for ObjectLocation {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        let group_id = VarInt::decode(r)?.into_inner();
        let object_id = VarInt::decode(r)?.into_inner();
        Ok(ObjectLocation::new(group_id, object_id))
    }
}

impl Encode for SubscribeIntent {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        match self {
            SubscribeIntent::CurrentGroup => 0u8.encode(w),
            SubscribeIntent::NextGroup => 1u8.encode(w),
            SubscribeIntent::StartPoint(loc) => {
                2u8.encode(w)?;
                loc.encode(w)
            }
        }
    }
}

impl Decode for SubscribeIntent {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(match u8::decode(r)? {
            0 => SubscribeIntent::CurrentGroup,
            1 => SubscribeIntent::NextGroup,
            2 => SubscribeIntent::StartPoint(ObjectLocation::decode(r)?),
            other => return Err(DecodeError::UnknownMessageType(other as u64)),
        })
    }
}

impl Encode for Flags {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        self.0.encode(w)
    }
}

impl Decode for Flags {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Flags(u8::decode(r)?))
    }
}

macro_rules! message_types {
    ($(($tag:expr, $variant:ident, $ty:ident)),+ $(,)?) => {
        /// Any control message, tagged by its wire type byte.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($variant($ty)),+
        }

        impl Message {
            fn type_tag(&self) -> u8 {
                match self {
                    $(Message::$variant(_) => $tag),+
                }
            }

            fn encode_body<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
                match self {
                    $(Message::$variant(m) => m.encode(w)),+
                }
            }

            fn decode_body<R: Buf>(tag: u8, r: &mut R) -> Result<Self, DecodeError> {
                match tag {
                    $($tag => Ok(Message::$variant($ty::decode(r)?)),)+
                    other => Err(DecodeError::UnknownMessageType(other as u64)),
                }
            }
        }

        $(
            impl From<$ty> for Message {
                fn from(m: $ty) -> Message {
                    Message::$variant(m)
                }
            }

            impl TryFrom<Message> for $ty {
                type Error = Message;

                fn try_from(msg: Message) -> Result<Self, Message> {
                    match msg {
                        Message::$variant(m) => Ok(m),
                        other => Err(other),
                    }
                }
            }
        )+
    };
}

message_types! {
    (1, Request, Request),
    (2, Post, Post),
    (3, Accept, Accept),
    (4, StartPoint, StartPointMsg),
    (5, FinDatagram, FinDatagramMsg),
    (6, Fragment, FragmentMsg),
    (7, CachePolicy, CachePolicyMsg),
    (8, Subscribe, SubscribeMsg),
    (9, Notify, NotifyMsg),
    (10, WarpHeader, WarpHeaderMsg),
    (11, ObjectHeader, ObjectHeaderMsg),
}

impl Message {
    /// Frame this message with its 16-bit big-endian length prefix and type
    /// byte, writing `len(type_byte + body) || type_byte || body`.
    pub fn encode_framed<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        let mut body = bytes::BytesMut::new();
        self.type_tag().encode(&mut body)?;
        self.encode_body(&mut body)?;

        if body.len() > u16::MAX as usize {
            return Err(EncodeError::VarIntTooLarge(body.len() as u64));
        }
        (body.len() as u16).encode(w)?;
        if w.remaining_mut() < body.len() {
            return Err(EncodeError::BufferTooShort);
        }
        w.put_slice(&body);
        Ok(())
    }

    /// Parse a framed message. Returns `Ok(None)` if the buffer does not yet
    /// contain a full frame (the caller should wait for more bytes), and
    /// `Err` on a malformed frame (§7, fatal to the stream).
    pub fn decode_framed<R: Buf>(r: &mut R) -> Result<Option<Self>, DecodeError> {
        if r.remaining() < 2 {
            return Ok(None);
        }
        let mut peek = r.chunk();
        // u16::decode would consume from r directly; peek the length first
        // without committing, so a short buffer doesn't lose the prefix.
        if peek.len() < 2 {
            return Ok(None);
        }
        let len = u16::decode(&mut peek)? as usize;
        if r.remaining() < 2 + len {
            return Ok(None);
        }

        r.advance(2);
        let mut body = r.copy_to_bytes(len);
        let tag = u8::decode(&mut body)?;
        let msg = Self::decode_body(tag, &mut body)?;
        if body.has_remaining() {
            return Err(DecodeError::FieldBoundsExceeded(
                "trailing bytes after message body".to_string(),
            ));
        }
        Ok(Some(msg))
    }
}

/// REQUEST: a subscriber asking to consume a URL (§4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub url: String,
    pub transport_mode: TransportMode,
    pub subscribe_intent: SubscribeIntent,
}

impl Encode for Request {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        self.url.encode(w)?;
        self.transport_mode.encode(w)?;
        self.subscribe_intent.encode(w)
    }
}

impl Decode for Request {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            url: String::decode(r)?,
            transport_mode: TransportMode::decode(r)?,
            subscribe_intent: SubscribeIntent::decode(r)?,
        })
    }
}

/// POST: a publisher announcing it wants to push a URL (§4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub url: String,
    pub transport_mode: TransportMode,
    pub cache_policy: bool,
    pub start: ObjectLocation,
}

impl Encode for Post {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        self.url.encode(w)?;
        self.transport_mode.encode(w)?;
        (self.cache_policy as u8).encode(w)?;
        self.start.encode(w)
    }
}

impl Decode for Post {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            url: String::decode(r)?,
            transport_mode: TransportMode::decode(r)?,
            cache_policy: u8::decode(r)? != 0,
            start: ObjectLocation::decode(r)?,
        })
    }
}

/// ACCEPT: the peer's reply to REQUEST/POST, carrying a freshly minted
/// `media_id` (§4.1, §4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct Accept {
    pub transport_mode: TransportMode,
    pub media_id: MediaId,
}

impl Encode for Accept {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        self.transport_mode.encode(w)?;
        VarInt::try_from(self.media_id.0)?.encode(w)
    }
}

impl Decode for Accept {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            transport_mode: TransportMode::decode(r)?,
            media_id: MediaId(VarInt::decode(r)?.into_inner()),
        })
    }
}

/// START_POINT (§4.1, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPointMsg {
    pub location: ObjectLocation,
}

impl Encode for StartPointMsg {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        self.location.encode(w)
    }
}

impl Decode for StartPointMsg {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            location: ObjectLocation::decode(r)?,
        })
    }
}

/// FIN_DATAGRAM: the final `(group, object)` of the media (§4.1, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinDatagramMsg {
    pub location: ObjectLocation,
}

impl Encode for FinDatagramMsg {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        self.location.encode(w)
    }
}

impl Decode for FinDatagramMsg {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            location: ObjectLocation::decode(r)?,
        })
    }
}

/// FRAGMENT, carried inline on the control stream in single-stream mode
/// (§4.1, §4.5).
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentMsg {
    pub group_id: u64,
    pub object_id: u64,
    pub nb_objects_previous_group: u64,
    pub offset: u64,
    pub object_length: u64,
    pub flags: Flags,
    pub data: bytes::Bytes,
}

impl Encode for FragmentMsg {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        VarInt::try_from(self.group_id)?.encode(w)?;
        VarInt::try_from(self.object_id)?.encode(w)?;
        VarInt::try_from(self.nb_objects_previous_group)?.encode(w)?;
        VarInt::try_from(self.offset)?.encode(w)?;
        VarInt::try_from(self.object_length)?.encode(w)?;
        self.flags.encode(w)?;
        VarInt::try_from(self.data.len() as u64)?.encode(w)?;
        if w.remaining_mut() < self.data.len() {
            return Err(EncodeError::BufferTooShort);
        }
        w.put_slice(&self.data);
        Ok(())
    }
}

impl Decode for FragmentMsg {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        let group_id = VarInt::decode(r)?.into_inner();
        let object_id = VarInt::decode(r)?.into_inner();
        let nb_objects_previous_group = VarInt::decode(r)?.into_inner();
        let offset = VarInt::decode(r)?.into_inner();
        let object_length = VarInt::decode(r)?.into_inner();
        let flags = Flags::decode(r)?;
        let fragment_length = VarInt::decode(r)?.into_inner() as usize;
        if r.remaining() < fragment_length {
            return Err(DecodeError::UnexpectedEnd);
        }
        let data = r.copy_to_bytes(fragment_length);
        Ok(Self {
            group_id,
            object_id,
            nb_objects_previous_group,
            offset,
            object_length,
            flags,
            data,
        })
    }
}

/// CACHE_POLICY: whether the relay cache should treat this media as
/// real-time (§4.1, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicyMsg {
    pub is_real_time: bool,
}

impl Encode for CachePolicyMsg {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        (self.is_real_time as u8).encode(w)
    }
}

impl Decode for CachePolicyMsg {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            is_real_time: u8::decode(r)? != 0,
        })
    }
}

/// SUBSCRIBE: register a URL prefix for NOTIFY delivery (§4.1, §4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeMsg {
    pub url_prefix: String,
}

impl Encode for SubscribeMsg {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        self.url_prefix.encode(w)
    }
}

impl Decode for SubscribeMsg {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            url_prefix: String::decode(r)?,
        })
    }
}

/// NOTIFY: deliver a newly published URL matching a subscribed prefix
/// (§4.1, §4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyMsg {
    pub url: String,
}

impl Encode for NotifyMsg {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        self.url.encode(w)
    }
}

impl Decode for NotifyMsg {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            url: String::decode(r)?,
        })
    }
}

/// WARP_HEADER: opens a warp-mode unidirectional substream for one group
/// (§4.1, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarpHeaderMsg {
    pub media_id: MediaId,
    pub group_id: u64,
}

impl Encode for WarpHeaderMsg {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        VarInt::try_from(self.media_id.0)?.encode(w)?;
        VarInt::try_from(self.group_id)?.encode(w)
    }
}

impl Decode for WarpHeaderMsg {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            media_id: MediaId(VarInt::decode(r)?.into_inner()),
            group_id: VarInt::decode(r)?.into_inner(),
        })
    }
}

/// OBJECT_HEADER: introduces one object's properties within a warp/rush
/// substream (§4.1, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeaderMsg {
    pub object_id: u64,
    pub nb_objects_previous_group: u64,
    pub flags: Flags,
    pub object_length: u64,
}

impl Encode for ObjectHeaderMsg {
    fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), EncodeError> {
        VarInt::try_from(self.object_id)?.encode(w)?;
        VarInt::try_from(self.nb_objects_previous_group)?.encode(w)?;
        self.flags.encode(w)?;
        VarInt::try_from(self.object_length)?.encode(w)
    }
}

impl Decode for ObjectHeaderMsg {
    fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            object_id: VarInt::decode(r)?.into_inner(),
            nb_objects_previous_group: VarInt::decode(r)?.into_inner(),
            flags: Flags::decode(r)?,
            object_length: VarInt::decode(r)?.into_inner(),
        })
    }
}
