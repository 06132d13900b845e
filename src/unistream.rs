//! Unidirectional substream engine (§4.6): warp sends one substream per
//! group, rush sends one substream per object. Both share this state
//! machine, parameterized by [`Mode`], rather than duplicating the send and
//! receive loops.

use crate::coding::{Message, ObjectHeaderMsg, WarpHeaderMsg};
use crate::model::{Flags, MediaId};
use crate::Error;

/// Whether a substream carries one whole group (warp) or one object (rush)
/// (§4.6 REDESIGN FLAGS: share one state machine, branch only on the
/// object-id boundary check).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Warp,
    Rush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstreamSendState {
    SendingOpen,
    WarpHeaderSent,
    ObjectHeader,
    ObjectData,
    AllSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstreamReceiveState {
    Open,
    WarpHeader,
    ObjectHeader,
    ObjectData,
}

/// Send-side state for one warp/rush substream.
#[derive(Debug)]
pub struct SendSubstream {
    pub mode: Mode,
    pub media_id: MediaId,
    pub group_id: u64,
    pub state: SubstreamSendState,
    pub next_object_id: u64,
    pub last_object_id: Option<u64>,
    current_object_offset: u64,
    current_object_length: u64,
}

impl SendSubstream {
    pub fn new(mode: Mode, media_id: MediaId, group_id: u64) -> Self {
        Self {
            mode,
            media_id,
            group_id,
            state: SubstreamSendState::SendingOpen,
            next_object_id: 0,
            last_object_id: None,
            current_object_offset: 0,
            current_object_length: 0,
        }
    }

    /// Step 1: open the substream with WARP_HEADER (§4.6). Rush substreams
    /// skip this — they are one object each, identified purely by the
    /// control stream's FRAGMENT/OBJECT_HEADER framing at a higher layer.
    pub fn open(&mut self) -> Message {
        self.state = SubstreamSendState::WarpHeaderSent;
        Message::from(WarpHeaderMsg {
            media_id: self.media_id,
            group_id: self.group_id,
        })
    }

    /// Learn the boundary past which this substream has nothing left to
    /// send, from either a final-object signal or the next group's
    /// `nb_objects_previous_group`.
    pub fn set_last_object_id(&mut self, last_object_id: u64) {
        self.last_object_id = Some(last_object_id);
    }

    /// Whether the substream is done emitting objects (§4.6 step 2).
    pub fn is_exhausted(&self) -> bool {
        matches!(self.last_object_id, Some(last) if self.next_object_id >= last)
    }

    /// Step 3: object properties are known; emit OBJECT_HEADER. `should_skip`
    /// comes from the congestion policy hook (§4.6, §4.7); when set, the
    /// object is announced as zero-length with flags `0xFF` regardless of
    /// its real size.
    pub fn begin_object(&mut self, object_length: u64, nb_objects_previous_group: u64, should_skip: bool) -> Message {
        let (length, flags) = if should_skip { (0, Flags::SKIP) } else { (object_length, Flags::NONE) };

        self.current_object_offset = 0;
        self.current_object_length = length;
        self.state = if length > 0 { SubstreamSendState::ObjectData } else { SubstreamSendState::ObjectHeader };
        if length == 0 {
            self.advance_object();
        }

        Message::from(ObjectHeaderMsg {
            object_id: self.next_object_id,
            nb_objects_previous_group,
            flags,
            object_length: length,
        })
    }

    /// Accounts for `len` bytes of payload written for the current object;
    /// once the object's full length has been streamed, advances to the
    /// next object_id and returns to `ObjectHeader`.
    pub fn advance_payload(&mut self, len: u64) {
        self.current_object_offset += len;
        if self.current_object_offset >= self.current_object_length {
            self.advance_object();
        }
    }

    fn advance_object(&mut self) {
        self.next_object_id += 1;
        self.state = if self.is_exhausted() { SubstreamSendState::AllSent } else { SubstreamSendState::ObjectHeader };

        match self.mode {
            Mode::Rush => {
                // A rush substream conveys exactly one object.
                self.last_object_id = Some(self.next_object_id);
                self.state = SubstreamSendState::AllSent;
            }
            Mode::Warp => {}
        }
    }

    /// Step 4: no more objects; emit FIN and let the caller delete the
    /// context.
    pub fn finish(&mut self) {
        self.state = SubstreamSendState::AllSent;
    }
}

/// Receive-side state for one warp/rush substream.
#[derive(Debug)]
pub struct RecvSubstream {
    pub mode: Mode,
    pub state: SubstreamReceiveState,
    pub media_id: Option<MediaId>,
    pub current_group: u64,
    pub expected_next_object_id: u64,
    pub current_object_id: Option<u64>,
    pub current_object_offset: u64,
}

impl RecvSubstream {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            state: SubstreamReceiveState::Open,
            media_id: None,
            current_group: 0,
            expected_next_object_id: 0,
            current_object_id: None,
            current_object_offset: 0,
        }
    }

    /// WARP_HEADER binds the substream to a control stream's `media_id` and
    /// identifies the group it carries.
    pub fn on_warp_header(&mut self, header: WarpHeaderMsg) {
        self.media_id = Some(header.media_id);
        self.current_group = header.group_id;
        self.expected_next_object_id = 0;
        self.state = SubstreamReceiveState::ObjectHeader;
    }

    /// OBJECT_HEADER: validates the ordering rule (warp requires
    /// `object_id == expected_next`; rush requires `object_id == 0`) before
    /// accepting it (§4.6).
    pub fn on_object_header(&mut self, header: ObjectHeaderMsg) -> Result<(), Error> {
        let expected = match self.mode {
            Mode::Warp => self.expected_next_object_id,
            Mode::Rush => 0,
        };
        if header.object_id != expected {
            return Err(Error::StateViolation {
                state: format!("{:?}", self.mode),
                message: format!("object_id {} out of order, expected {}", header.object_id, expected),
            });
        }

        self.current_object_id = Some(header.object_id);
        self.current_object_offset = 0;

        if header.object_length == 0 {
            // Delivered immediately; state returns to ObjectHeader.
            self.expected_next_object_id += 1;
            self.current_object_id = None;
            self.state = SubstreamReceiveState::ObjectHeader;
        } else {
            self.state = SubstreamReceiveState::ObjectData;
        }
        Ok(())
    }

    /// Accounts for `len` bytes of object payload handed to the reassembly
    /// engine; returns the `(group_id, object_id, offset)` the caller
    /// should tag it with before advancing the offset.
    pub fn on_object_data(&mut self, len: u64, object_length: u64) -> (u64, u64, u64) {
        let object_id = self.current_object_id.expect("on_object_data called outside ObjectData state");
        let offset = self.current_object_offset;
        self.current_object_offset += len;
        if self.current_object_offset >= object_length {
            self.expected_next_object_id = object_id + 1;
            self.current_object_id = None;
            self.state = SubstreamReceiveState::ObjectHeader;
        }
        (self.current_group, object_id, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warp_send_progresses_object_by_object() {
        let mut sub = SendSubstream::new(Mode::Warp, MediaId(1), 0);
        let open = sub.open();
        assert!(matches!(open, Message::WarpHeader(_)));
        assert_eq!(sub.state, SubstreamSendState::WarpHeaderSent);

        sub.set_last_object_id(2);
        let header = sub.begin_object(10, 0, false);
        assert!(matches!(header, Message::ObjectHeader(_)));
        assert_eq!(sub.state, SubstreamSendState::ObjectData);

        sub.advance_payload(10);
        assert_eq!(sub.state, SubstreamSendState::ObjectHeader);
        assert_eq!(sub.next_object_id, 1);

        sub.begin_object(5, 0, false);
        sub.advance_payload(5);
        assert_eq!(sub.state, SubstreamSendState::AllSent);
        assert!(sub.is_exhausted());
    }

    #[test]
    fn rush_send_exhausts_after_one_object() {
        let mut sub = SendSubstream::new(Mode::Rush, MediaId(1), 0);
        sub.open();
        sub.begin_object(8, 0, false);
        sub.advance_payload(8);
        assert_eq!(sub.state, SubstreamSendState::AllSent);
    }

    #[test]
    fn should_skip_emits_zero_length_object() {
        let mut sub = SendSubstream::new(Mode::Warp, MediaId(1), 0);
        sub.open();
        sub.set_last_object_id(5);
        let msg = sub.begin_object(100, 0, true);
        let header: ObjectHeaderMsg = msg.try_into().unwrap();
        assert_eq!(header.object_length, 0);
        assert!(header.flags.is_skip());
        assert_eq!(sub.next_object_id, 1);
    }

    #[test]
    fn warp_recv_rejects_out_of_order_object_id() {
        let mut sub = RecvSubstream::new(Mode::Warp);
        sub.on_warp_header(WarpHeaderMsg { media_id: MediaId(1), group_id: 0 });
        let err = sub
            .on_object_header(ObjectHeaderMsg {
                object_id: 1,
                nb_objects_previous_group: 0,
                flags: Flags::NONE,
                object_length: 10,
            })
            .unwrap_err();
        assert!(matches!(err, Error::StateViolation { .. }));
    }

    #[test]
    fn rush_recv_requires_object_id_zero() {
        let mut sub = RecvSubstream::new(Mode::Rush);
        sub.on_warp_header(WarpHeaderMsg { media_id: MediaId(1), group_id: 3 });
        sub.on_object_header(ObjectHeaderMsg {
            object_id: 0,
            nb_objects_previous_group: 0,
            flags: Flags::NONE,
            object_length: 4,
        })
        .unwrap();
        let (group, object, offset) = sub.on_object_data(4, 4);
        assert_eq!((group, object, offset), (3, 0, 0));
        assert_eq!(sub.state, SubstreamReceiveState::ObjectHeader);
    }

    #[test]
    fn zero_length_object_header_delivers_immediately() {
        let mut sub = RecvSubstream::new(Mode::Warp);
        sub.on_warp_header(WarpHeaderMsg { media_id: MediaId(1), group_id: 0 });
        sub.on_object_header(ObjectHeaderMsg {
            object_id: 0,
            nb_objects_previous_group: 0,
            flags: Flags::SKIP,
            object_length: 0,
        })
        .unwrap();
        assert_eq!(sub.state, SubstreamReceiveState::ObjectHeader);
        assert_eq!(sub.expected_next_object_id, 1);
    }
}
