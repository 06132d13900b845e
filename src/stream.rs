//! Stream protocol state machine (§4.5): drives one bidirectional control
//! stream through its send/receive states, deciding what to send next and
//! dispatching inbound messages by current state.

use crate::coding::{
    Accept, CachePolicyMsg, FinDatagramMsg, FragmentMsg, Message, NotifyMsg, Post, Request, StartPointMsg,
    SubscribeMsg,
};
use crate::model::{Flags, MediaId, ObjectLocation, SubscribeIntent, TransportMode};
use crate::{Delivery, Error, Progress, Reassembler};

/// What the state machine is doing with its next write opportunity
/// (§4.5 "Send states").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Initial,
    Ready,
    SingleStream,
    Repair,
    FinalPoint,
    StartPoint,
    CachePolicy,
    Subscribe,
    Notify,
    WaitingNotify,
    NotifyReady,
    Fin,
    NoMore,
}

/// What kind of message the peer may legally send next (§4.5 "Receive
/// states").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    NotReady,
    Initial,
    Fragment,
    Notify,
    Done,
}

/// What the sender priority check decided to do (§4.5, rule 1-5).
#[derive(Debug, Clone, PartialEq)]
pub enum NextSend {
    StartPoint(StartPointMsg),
    FinalPoint(FinDatagramMsg),
    CachePolicy(CachePolicyMsg),
    SingleStreamFragment,
    Idle,
}

/// Per-stream control-plane state (§3 "Stream context", §4.5).
#[derive(Debug)]
pub struct StreamContext {
    pub media_id: Option<MediaId>,
    pub transport_mode: TransportMode,
    pub send_state: SendState,
    pub receive_state: ReceiveState,

    pub start: Option<ObjectLocation>,
    pub is_start_point_sent: bool,
    pub final_object: Option<ObjectLocation>,
    pub is_final_point_sent: bool,
    pub is_cache_real_time: bool,
    pub is_cache_policy_sent: bool,

    pub is_peer_finished: bool,
    pub is_local_finished: bool,
    pub is_final_object_id_sent: bool,

    pub url_prefix: Option<String>,

    /// The consumer-side reassembly engine for this stream's media, fed by
    /// every `FRAGMENT`/`START_POINT`/`FIN_DATAGRAM` received in receive
    /// state `fragment` (§4.3, §4.5).
    pub reassembler: Reassembler,
    pending_deliveries: Vec<Delivery>,
}

impl StreamContext {
    pub fn new(transport_mode: TransportMode) -> Self {
        Self {
            media_id: None,
            transport_mode,
            send_state: SendState::Initial,
            receive_state: ReceiveState::NotReady,
            start: None,
            is_start_point_sent: false,
            final_object: None,
            is_final_point_sent: false,
            is_cache_real_time: false,
            is_cache_policy_sent: false,
            is_peer_finished: false,
            is_local_finished: false,
            is_final_object_id_sent: false,
            url_prefix: None,
            reassembler: Reassembler::new(),
            pending_deliveries: Vec::new(),
        }
    }

    /// Drains every delivery the reassembler has produced since the last
    /// call, in delivery order (§4.3, §6 "Consumer contract").
    pub fn drain_deliveries(&mut self) -> Vec<Delivery> {
        self.pending_deliveries.drain(..).collect()
    }

    /// Queues deliveries produced outside of [`Self::on_receive`] (datagram
    /// mode feeds the reassembler directly from the connection dispatcher,
    /// rather than through a framed message).
    pub(crate) fn push_deliveries(&mut self, deliveries: Vec<Delivery>) {
        self.pending_deliveries.extend(deliveries);
    }

    fn reassembly_progress(&self) -> Progress {
        if self.reassembler.is_finished() {
            Progress::Finished
        } else {
            Progress::Continue
        }
    }

    /// Sender priority when `send_state == Ready` (§4.5, rules 1-5). Does
    /// not itself flip `send_state`; the caller commits the transition once
    /// it has actually written the chosen message.
    pub fn next_send(&self, fragment_data_ready: bool) -> NextSend {
        if self.send_state != SendState::Ready {
            return NextSend::Idle;
        }

        if let Some(start) = self.start {
            if start != ObjectLocation::ORIGIN && !self.is_start_point_sent {
                return NextSend::StartPoint(StartPointMsg { location: start });
            }
        }

        if let Some(final_object) = self.final_object {
            if !self.is_final_point_sent {
                return NextSend::FinalPoint(FinDatagramMsg { location: final_object });
            }
        }

        if self.is_cache_real_time && !self.is_cache_policy_sent {
            return NextSend::CachePolicy(CachePolicyMsg { is_real_time: true });
        }

        if self.transport_mode == TransportMode::Stream && fragment_data_ready {
            return NextSend::SingleStreamFragment;
        }

        NextSend::Idle
    }

    pub fn commit_start_point_sent(&mut self) {
        self.is_start_point_sent = true;
        self.send_state = SendState::Ready;
    }

    pub fn commit_final_point_sent(&mut self) {
        self.is_final_point_sent = true;
        self.is_final_object_id_sent = true;
        self.send_state = SendState::Ready;
    }

    pub fn commit_cache_policy_sent(&mut self) {
        self.is_cache_policy_sent = true;
        self.send_state = SendState::Ready;
    }

    /// Builds the FRAGMENT message for a single-stream send (§4.5). When the
    /// publisher reports `media_finished` with no payload, this instead
    /// signals FIN_DATAGRAM; when it reports `should_skip`, emits a
    /// zero-length placeholder with flags `0xFF`.
    pub fn build_single_stream_fragment(
        &mut self,
        group_id: u64,
        object_id: u64,
        nb_objects_previous_group: u64,
        offset: u64,
        object_length: u64,
        data: bytes::Bytes,
        should_skip: bool,
        media_finished: bool,
    ) -> Message {
        self.send_state = SendState::SingleStream;

        if media_finished && data.is_empty() {
            self.is_final_object_id_sent = true;
            return Message::from(FinDatagramMsg {
                location: ObjectLocation::new(group_id, object_id),
            });
        }

        if should_skip {
            return Message::from(FragmentMsg {
                group_id,
                object_id,
                nb_objects_previous_group,
                offset,
                object_length: 0,
                flags: Flags::SKIP,
                data: bytes::Bytes::new(),
            });
        }

        Message::from(FragmentMsg {
            group_id,
            object_id,
            nb_objects_previous_group,
            offset,
            object_length,
            flags: Flags::NONE,
            data,
        })
    }

    /// Dispatches one inbound message according to the current receive
    /// state (§4.5). Returns the reassembly engine's progress signal when
    /// the message feeds it; `Progress::Continue` otherwise.
    pub fn on_receive(&mut self, message: Message) -> Result<Progress, Error> {
        match (self.receive_state, message) {
            (ReceiveState::NotReady, Message::Request(request)) => {
                self.handle_request(request);
                Ok(Progress::Continue)
            }
            (ReceiveState::NotReady, Message::Post(post)) => {
                self.handle_post(post);
                Ok(Progress::Continue)
            }
            (ReceiveState::NotReady, Message::Subscribe(subscribe)) => {
                self.handle_subscribe(subscribe);
                Ok(Progress::Continue)
            }
            (ReceiveState::Initial, Message::Accept(accept)) => {
                self.media_id = Some(accept.media_id);
                self.receive_state = ReceiveState::Fragment;
                Ok(Progress::Continue)
            }
            (ReceiveState::Fragment, Message::StartPoint(start_point)) => {
                self.reassembler
                    .learn_start_point(start_point.location.group_id, start_point.location.object_id)?;
                Ok(self.reassembly_progress())
            }
            (ReceiveState::Fragment, Message::CachePolicy(cache_policy)) => {
                self.is_cache_real_time = cache_policy.is_real_time;
                Ok(Progress::Continue)
            }
            (ReceiveState::Fragment, Message::FinDatagram(fin)) => {
                self.reassembler.learn_final_object_id(fin.location.group_id, fin.location.object_id);
                Ok(self.reassembly_progress())
            }
            (ReceiveState::Fragment, Message::Fragment(fragment)) => {
                let deliveries = self.reassembler.input_fragment(
                    fragment.group_id,
                    fragment.object_id,
                    fragment.offset,
                    0,
                    fragment.flags,
                    fragment.nb_objects_previous_group,
                    fragment.object_length,
                    fragment.data,
                )?;
                self.pending_deliveries.extend(deliveries);
                Ok(self.reassembly_progress())
            }
            (ReceiveState::WaitingNotify, Message::Notify(notify)) | (ReceiveState::Notify, Message::Notify(notify)) => {
                self.handle_notify(notify);
                Ok(Progress::Continue)
            }
            (state, other) => Err(Error::StateViolation {
                state: format!("{state:?}"),
                message: format!("{other:?}"),
            }),
        }
    }

    fn handle_request(&mut self, request: Request) {
        self.start = Some(match request.subscribe_intent {
            SubscribeIntent::CurrentGroup => ObjectLocation::ORIGIN,
            SubscribeIntent::NextGroup => ObjectLocation::new(1, 0),
            SubscribeIntent::StartPoint(location) => location,
        });
        self.transport_mode = request.transport_mode;
        self.send_state = SendState::Ready;
        self.receive_state = ReceiveState::Fragment;
    }

    fn handle_post(&mut self, post: Post) {
        self.transport_mode = post.transport_mode;
        self.is_cache_real_time = post.cache_policy;
        self.start = Some(post.start);
        self.receive_state = ReceiveState::Fragment;
        self.send_state = SendState::Ready;
    }

    fn handle_subscribe(&mut self, subscribe: SubscribeMsg) {
        self.url_prefix = Some(subscribe.url_prefix);
        self.send_state = SendState::NotifyReady;
        self.receive_state = ReceiveState::Notify;
    }

    fn handle_notify(&mut self, _notify: NotifyMsg) {
        self.receive_state = ReceiveState::Notify;
    }

    /// Sent ACCEPT in reply to REQUEST/POST, minting `media_id` (§4.8).
    pub fn accept(&mut self, media_id: MediaId) -> Message {
        self.media_id = Some(media_id);
        self.send_state = SendState::Ready;
        Message::from(Accept {
            transport_mode: self.transport_mode,
            media_id,
        })
    }

    /// The peer sent FIN on this stream. Returns `true` when the stream
    /// context should be torn down immediately (both sides finished),
    /// `false` if it should wait for the local FIN (§4.5).
    pub fn on_peer_fin(&mut self) -> bool {
        self.is_peer_finished = true;
        self.is_peer_finished && self.is_local_finished
    }

    pub fn on_local_fin(&mut self) -> bool {
        self.is_local_finished = true;
        self.send_state = SendState::Fin;
        self.is_peer_finished && self.is_local_finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_sends_start_point_before_anything_else() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        ctx.send_state = SendState::Ready;
        ctx.start = Some(ObjectLocation::new(3, 0));
        ctx.final_object = Some(ObjectLocation::new(10, 0));

        match ctx.next_send(true) {
            NextSend::StartPoint(msg) => assert_eq!(msg.location, ObjectLocation::new(3, 0)),
            other => panic!("expected StartPoint, got {other:?}"),
        }

        ctx.commit_start_point_sent();
        match ctx.next_send(true) {
            NextSend::FinalPoint(msg) => assert_eq!(msg.location, ObjectLocation::new(10, 0)),
            other => panic!("expected FinalPoint, got {other:?}"),
        }
    }

    #[test]
    fn idle_when_no_fragment_data_ready() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        ctx.send_state = SendState::Ready;
        assert_eq!(ctx.next_send(false), NextSend::Idle);
    }

    #[test]
    fn single_stream_send_picked_once_priorities_cleared() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        ctx.send_state = SendState::Ready;
        assert_eq!(ctx.next_send(true), NextSend::SingleStreamFragment);
    }

    #[test]
    fn should_skip_emits_zero_length_placeholder() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        let msg = ctx.build_single_stream_fragment(0, 0, 0, 0, 100, bytes::Bytes::new(), true, false);
        let fragment: FragmentMsg = msg.try_into().unwrap();
        assert_eq!(fragment.object_length, 0);
        assert!(fragment.flags.is_skip());
    }

    #[test]
    fn media_finished_with_empty_payload_emits_fin() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        let msg = ctx.build_single_stream_fragment(2, 5, 0, 0, 0, bytes::Bytes::new(), false, true);
        assert!(matches!(msg, Message::FinDatagram(_)));
        assert!(ctx.is_final_object_id_sent);
    }

    #[test]
    fn request_in_not_ready_sets_up_sending() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        ctx.receive_state = ReceiveState::NotReady;
        let progress = ctx
            .on_receive(Message::from(Request {
                url: "live/cam0".to_string(),
                transport_mode: TransportMode::Datagram,
                subscribe_intent: SubscribeIntent::NextGroup,
            }))
            .unwrap();
        assert_eq!(progress, Progress::Continue);
        assert_eq!(ctx.send_state, SendState::Ready);
        assert_eq!(ctx.start, Some(ObjectLocation::new(1, 0)));
        assert_eq!(ctx.transport_mode, TransportMode::Datagram);
    }

    #[test]
    fn fragment_in_fragment_state_feeds_the_reassembler() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        ctx.receive_state = ReceiveState::Fragment;
        let progress = ctx
            .on_receive(Message::from(FragmentMsg {
                group_id: 0,
                object_id: 0,
                nb_objects_previous_group: 0,
                offset: 0,
                object_length: 5,
                flags: Flags::NONE,
                data: bytes::Bytes::from_static(b"hello"),
            }))
            .unwrap();
        assert_eq!(progress, Progress::Continue);
        let deliveries = ctx.drain_deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(&deliveries[0].data[..], b"hello");
        assert_eq!(ctx.reassembler.next_expected(), ObjectLocation::new(0, 1));
    }

    #[test]
    fn start_point_in_fragment_state_drops_earlier_data() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        ctx.receive_state = ReceiveState::Fragment;
        ctx.on_receive(Message::from(crate::coding::StartPointMsg {
            location: ObjectLocation::new(2, 0),
        }))
        .unwrap();

        let progress = ctx
            .on_receive(Message::from(FragmentMsg {
                group_id: 0,
                object_id: 0,
                nb_objects_previous_group: 0,
                offset: 0,
                object_length: 3,
                flags: Flags::NONE,
                data: bytes::Bytes::from_static(b"old"),
            }))
            .unwrap();
        assert_eq!(progress, Progress::Continue);
        assert!(ctx.drain_deliveries().is_empty());
    }

    #[test]
    fn fin_datagram_in_fragment_state_can_finish_the_stream() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        ctx.receive_state = ReceiveState::Fragment;
        ctx.on_receive(Message::from(FragmentMsg {
            group_id: 0,
            object_id: 0,
            nb_objects_previous_group: 0,
            offset: 0,
            object_length: 1,
            flags: Flags::NONE,
            data: bytes::Bytes::from_static(b"a"),
        }))
        .unwrap();

        let progress = ctx
            .on_receive(Message::from(FinDatagramMsg {
                location: ObjectLocation::new(0, 1),
            }))
            .unwrap();
        assert_eq!(progress, Progress::Finished);
    }

    #[test]
    fn cache_policy_in_fragment_state_records_real_time_flag() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        ctx.receive_state = ReceiveState::Fragment;
        ctx.on_receive(Message::from(CachePolicyMsg { is_real_time: true })).unwrap();
        assert!(ctx.is_cache_real_time);
    }

    #[test]
    fn fragment_in_not_ready_is_a_state_violation() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        let err = ctx
            .on_receive(Message::from(FragmentMsg {
                group_id: 0,
                object_id: 0,
                nb_objects_previous_group: 0,
                offset: 0,
                object_length: 1,
                flags: Flags::NONE,
                data: bytes::Bytes::from_static(b"x"),
            }))
            .unwrap_err();
        assert!(matches!(err, Error::StateViolation { .. }));
    }

    #[test]
    fn fin_deletes_stream_only_once_both_sides_finished() {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        assert!(!ctx.on_peer_fin());
        assert!(ctx.on_local_fin());
    }
}
