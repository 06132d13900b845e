//! Core data model: media objects, fragments, and the small value types
//! shared by every other module (§3).

use std::cmp::Ordering;
use std::fmt;

/// Connection-local numeric alias for a subscribed/published URL.
///
/// Allocated by the side that creates the stream context (§3, "Stream
/// context"); never sent in clear text anywhere except `ACCEPT` /
/// `WARP_HEADER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediaId(pub u64);

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// QUIC-like stream identifier. The low bit distinguishes client/server
/// initiator; bit 1 distinguishes bidirectional (0) from unidirectional (1)
/// (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u64);

impl StreamId {
    pub fn is_unidirectional(self) -> bool {
        self.0 & 0b10 != 0
    }

    pub fn is_client_initiated(self) -> bool {
        self.0 & 0b01 == 0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `(group_id, object_id)`, compared lexicographically as §4.4/§8 require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ObjectLocation {
    pub group_id: u64,
    pub object_id: u64,
}

impl ObjectLocation {
    pub const ORIGIN: Self = Self {
        group_id: 0,
        object_id: 0,
    };

    pub fn new(group_id: u64, object_id: u64) -> Self {
        Self {
            group_id,
            object_id,
        }
    }

    /// The location immediately following this object, assuming the next
    /// object is in the same group.
    pub fn next_object(self) -> Self {
        Self {
            group_id: self.group_id,
            object_id: self.object_id + 1,
        }
    }

    /// The first object of the following group.
    pub fn next_group(self) -> Self {
        Self {
            group_id: self.group_id + 1,
            object_id: 0,
        }
    }
}

impl PartialOrd for ObjectLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.group_id, self.object_id).cmp(&(other.group_id, other.object_id))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G:{} O:{}", self.group_id, self.object_id)
    }
}

/// `(group_id, object_id, offset)`, the key every fragment and ack record is
/// ordered by (§3, §4.2, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct FragmentKey {
    pub location: ObjectLocation,
    pub offset: u64,
}

impl FragmentKey {
    pub fn new(group_id: u64, object_id: u64, offset: u64) -> Self {
        Self {
            location: ObjectLocation::new(group_id, object_id),
            offset,
        }
    }
}

impl PartialOrd for FragmentKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FragmentKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.location, self.offset).cmp(&(other.location, other.offset))
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{}", self.location, self.offset)
    }
}

/// Per-fragment flags byte. The only bit pattern the spec names is the
/// "should skip" placeholder (§4.5); everything else is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Flags(pub u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const SKIP: Flags = Flags(0xFF);

    pub fn is_skip(self) -> bool {
        self.0 == 0xFF
    }
}

/// The transport mode negotiated for a stream context (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    /// Bulk data flows inline on the bidirectional control stream.
    Stream,
    /// Bulk data flows as QUIC datagrams.
    Datagram,
    /// One unidirectional substream per group.
    Warp,
    /// One unidirectional substream per object.
    Rush,
}

/// What point in the media a subscriber wants to start from (REQUEST,
/// §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeIntent {
    /// Start at whatever group is currently open on the publisher.
    CurrentGroup,
    /// Start at the group after whatever is currently open.
    NextGroup,
    /// Start at an exact, possibly already-past, `(group, object)`.
    StartPoint(ObjectLocation),
}

/// A contiguous byte range of an object as carried by a datagram or stream
/// chunk (§3, "Fragment").
#[derive(Debug, Clone)]
pub struct Fragment {
    pub group_id: u64,
    pub object_id: u64,
    pub offset: u64,
    pub object_length: u64,
    pub flags: Flags,
    pub nb_objects_previous_group: u64,
    pub queue_delay: u64,
    pub data: bytes::Bytes,
}

impl Fragment {
    pub fn key(&self) -> FragmentKey {
        FragmentKey::new(self.group_id, self.object_id, self.offset)
    }

    pub fn location(&self) -> ObjectLocation {
        ObjectLocation::new(self.group_id, self.object_id)
    }

    /// True when `offset + length == object_length`, i.e. this fragment
    /// completes the object (§3 invariant).
    pub fn is_last(&self) -> bool {
        self.offset + self.data.len() as u64 >= self.object_length
    }
}
