//! Connection/subscription manager (§4.8) and the global/connection context
//! types (§3). This is the layer that wires streams, substreams, and local
//! media source registrations together; everything below it
//! (cache/reassembly/horizon/stream/unistream) is agnostic to how many
//! connections or sources exist.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::coding::{DatagramHeader, Decode, Message};
use crate::config::Config;
use crate::horizon::HorizonEngine;
use crate::model::{MediaId, StreamId, TransportMode};
use crate::stream::StreamContext;
use crate::unistream::{Mode, RecvSubstream, SendSubstream};
use crate::{Error, Progress};

/// A pending notification: a URL newly published that matches some
/// subscriber's prefix (§4.8 `subscribe_pattern`).
#[derive(Debug, Clone)]
struct PendingNotify {
    stream_id: StreamId,
    url: String,
}

/// One registered local media source (§3 "Global context", "registry of
/// local media sources").
struct LocalSource {
    url: String,
    is_real_time: bool,
    start_group: u64,
    start_object: u64,
}

/// RAII handle returned by [`ConnectionManager::publish_object_source`].
/// Dropping it unregisters the source, mirroring the coordinator-style
/// registration handles this crate's connection layer was modeled on.
pub struct SourceRegistration {
    media_id: MediaId,
    sources: Rc<std::cell::RefCell<HashMap<MediaId, LocalSource>>>,
}

impl Drop for SourceRegistration {
    fn drop(&mut self) {
        self.sources.borrow_mut().remove(&self.media_id);
        log::debug!("[CONNECTION] source {} unregistered", self.media_id);
    }
}

/// Per-connection state (§3 "Connection context").
pub struct Connection {
    pub streams: HashMap<StreamId, StreamContext>,
    pub send_substreams: HashMap<StreamId, SendSubstream>,
    pub recv_substreams: HashMap<StreamId, RecvSubstream>,
    /// Per-stream ack/horizon bookkeeping for whatever this connection has
    /// sent (§4.4). Created lazily the first time a datagram for the
    /// stream is acked, lost, or scheduled.
    pub horizons: HashMap<StreamId, HorizonEngine>,
    /// Bytes received on each control stream but not yet enough to frame a
    /// full message (§4.1, §6 "stream_data" inbound callback).
    recv_buffers: HashMap<StreamId, bytes::BytesMut>,
    /// Routes a datagram's `media_id` back to the control stream that
    /// negotiated it, so an inbound datagram or ack/loss report can find
    /// the right `StreamContext`/`HorizonEngine` (§4.7, §4.8).
    media_to_stream: HashMap<MediaId, StreamId>,
    next_media_id: u64,
    pending_notifies: Vec<PendingNotify>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
            send_substreams: HashMap::new(),
            recv_substreams: HashMap::new(),
            horizons: HashMap::new(),
            recv_buffers: HashMap::new(),
            media_to_stream: HashMap::new(),
            next_media_id: 0,
            pending_notifies: Vec::new(),
        }
    }

    fn next_media_id(&mut self) -> MediaId {
        let id = self.next_media_id;
        self.next_media_id += 1;
        MediaId(id)
    }

    fn stream_for_media(&self, media_id: MediaId) -> Result<StreamId, Error> {
        self.media_to_stream
            .get(&media_id)
            .copied()
            .ok_or_else(|| Error::SourceNotFound(format!("no stream registered for media {media_id}")))
    }

    /// Appends newly arrived bytes to `stream_id`'s receive buffer and
    /// dispatches every complete frame now available through
    /// [`StreamContext::on_receive`] (§6 "stream_data" inbound callback).
    /// `fin` marks the peer's half of the stream as closed once every
    /// buffered frame has been dispatched.
    pub fn on_stream_data(&mut self, stream_id: StreamId, data: &[u8], fin: bool) -> Result<Progress, Error> {
        let buf = self.recv_buffers.entry(stream_id).or_default();
        buf.extend_from_slice(data);

        let mut progress = Progress::Continue;
        while let Some(message) = Message::decode_framed(buf)? {
            let ctx = self
                .streams
                .entry(stream_id)
                .or_insert_with(|| StreamContext::new(TransportMode::Stream));
            if ctx.on_receive(message)? == Progress::Finished {
                progress = Progress::Finished;
            }
            if let Some(media_id) = ctx.media_id {
                self.media_to_stream.insert(media_id, stream_id);
            }
        }

        if fin {
            if let Some(ctx) = self.streams.get_mut(&stream_id) {
                ctx.on_peer_fin();
            }
        }

        Ok(progress)
    }

    /// Parses an inbound datagram's header and feeds its payload to the
    /// owning stream's reassembly engine (§6 "datagram" inbound callback).
    pub fn on_datagram(&mut self, data: &[u8]) -> Result<Progress, Error> {
        let mut body = bytes::Bytes::copy_from_slice(data);
        let header = DatagramHeader::decode(&mut body)?;
        let stream_id = self.stream_for_media(header.media_id)?;
        let ctx = self
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| Error::SourceNotFound(format!("stream for media {} is gone", header.media_id)))?;

        let deliveries = ctx.reassembler.input_fragment(
            header.group_id,
            header.object_id,
            header.object_offset,
            header.queue_delay,
            header.flags,
            header.nb_objects_previous_group,
            header.object_length,
            header.payload,
        )?;
        ctx.push_deliveries(deliveries);
        Ok(if ctx.reassembler.is_finished() { Progress::Finished } else { Progress::Continue })
    }

    /// A previously sent datagram was acknowledged; advances that stream's
    /// horizon (§6 "datagram_acked" inbound callback, §4.4).
    pub fn on_datagram_acked(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut body = bytes::Bytes::copy_from_slice(data);
        let header = DatagramHeader::decode(&mut body)?;
        let stream_id = self.stream_for_media(header.media_id)?;
        self.horizons.entry(stream_id).or_default().handle_ack(
            header.group_id,
            header.object_id,
            header.object_offset,
            header.payload.len() as u64,
        );
        Ok(())
    }

    /// A previously sent datagram was lost; retransmits immediately and
    /// queues an extra repeat if configured (§6 "datagram_lost" inbound
    /// callback, §4.4). Returns whether a retransmit was actually
    /// scheduled.
    pub fn on_datagram_lost(
        &mut self,
        data: &[u8],
        now: u64,
        extra_repeat_on_nack: bool,
        extra_repeat_delay: u64,
    ) -> Result<bool, Error> {
        let mut body = bytes::Bytes::copy_from_slice(data);
        let header = DatagramHeader::decode(&mut body)?;
        let stream_id = self.stream_for_media(header.media_id)?;
        Ok(self.horizons.entry(stream_id).or_default().handle_lost(
            header.group_id,
            header.object_id,
            header.object_offset,
            now,
            extra_repeat_on_nack,
            extra_repeat_delay,
        ))
    }

    /// A datagram arrived after its own extra repeat already fired; purely
    /// informational, the ack that eventually arrives drives horizon state
    /// (§6 "datagram_spurious" inbound callback, §4.4).
    pub fn on_datagram_spurious(&mut self, _data: &[u8]) {}

    /// The peer reset `stream_id`; tear down whatever state this connection
    /// held for it (§6 "stream_reset" inbound callback).
    pub fn on_stream_reset(&mut self, stream_id: StreamId) {
        self.recv_buffers.remove(&stream_id);
        self.streams.remove(&stream_id);
    }

    /// The peer asked us to stop sending on `stream_id` (§6 "stop_sending"
    /// inbound callback).
    pub fn on_stop_sending(&mut self, stream_id: StreamId) {
        self.send_substreams.remove(&stream_id);
    }

    /// Opens a subscription channel: sends SUBSCRIBE and moves the stream to
    /// `waiting_notify` (§4.8).
    pub fn subscribe_pattern(&mut self, stream_id: StreamId, prefix_url: String) {
        let mut ctx = StreamContext::new(TransportMode::Stream);
        ctx.url_prefix = Some(prefix_url);
        ctx.send_state = crate::stream::SendState::Subscribe;
        ctx.receive_state = crate::stream::ReceiveState::NotReady;
        self.streams.insert(stream_id, ctx);
    }

    /// For every stream in `notify_ready` whose registered prefix matches
    /// `url`, enqueue a NOTIFY (§4.8, called both before a SUBSCRIBE send
    /// and on every new local media-source registration).
    pub fn notify_matching_subscribers(&mut self, url: &str) {
        for (stream_id, ctx) in self.streams.iter() {
            if ctx.send_state != crate::stream::SendState::NotifyReady {
                continue;
            }
            if let Some(prefix) = &ctx.url_prefix {
                if url.starts_with(prefix.as_str()) {
                    self.pending_notifies.push(PendingNotify {
                        stream_id: *stream_id,
                        url: url.to_string(),
                    });
                }
            }
        }
    }

    pub fn drain_pending_notifies(&mut self) -> Vec<(StreamId, String)> {
        self.pending_notifies.drain(..).map(|n| (n.stream_id, n.url)).collect()
    }

    /// Accepts an incoming REQUEST/POST: creates a consumer/publisher
    /// context and mints a fresh `media_id` to reply with via ACCEPT
    /// (§4.8).
    pub fn accept_media(&mut self, stream_id: StreamId, mode: TransportMode) -> MediaId {
        let media_id = self.next_media_id();
        let ctx = self.streams.entry(stream_id).or_insert_with(|| StreamContext::new(mode));
        ctx.media_id = Some(media_id);
        self.media_to_stream.insert(media_id, stream_id);
        media_id
    }

    /// Opens a warp (one substream per group) or rush (one per object)
    /// send-side substream bound to `media_id` (§4.6).
    pub fn open_send_substream(&mut self, stream_id: StreamId, mode: Mode, media_id: MediaId, group_id: u64) {
        self.send_substreams.insert(stream_id, SendSubstream::new(mode, media_id, group_id));
    }

    pub fn open_recv_substream(&mut self, stream_id: StreamId, mode: Mode) {
        self.recv_substreams.insert(stream_id, RecvSubstream::new(mode));
    }

    /// Round-robin scan over datagram-mode streams looking for the next one
    /// ready to send (§4.7). Returns the stream id of the first active
    /// candidate found after `after`, wrapping around once.
    pub fn next_active_datagram_stream(&self, after: Option<StreamId>) -> Option<StreamId> {
        let mut ids: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|(_, ctx)| ctx.transport_mode == TransportMode::Datagram && ctx.media_id.is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);

        if ids.is_empty() {
            return None;
        }

        let start_index = match after {
            Some(marker) => ids.iter().position(|id| *id == marker).map(|i| (i + 1) % ids.len()),
            None => None,
        }
        .unwrap_or(0);

        Some(ids[(start_index) % ids.len()])
    }

    /// Whether any datagram-mode stream still has pending data to send,
    /// reported back to the transport after a send attempt (§4.7
    /// `at_least_one_active`).
    pub fn at_least_one_active_datagram(&self) -> bool {
        self.streams
            .values()
            .any(|ctx| ctx.transport_mode == TransportMode::Datagram && ctx.media_id.is_some())
    }
}

/// Shared engine-wide state (§3 "Global context"). Owns the config and the
/// registry of locally published media; individual connections borrow it
/// read-only except when registering/unregistering a source.
pub struct GlobalContext {
    pub config: Config,
    sources: Rc<std::cell::RefCell<HashMap<MediaId, LocalSource>>>,
    next_source_id: AtomicU64,
    pub nb_useless_fragments: u64,
}

impl GlobalContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sources: Rc::new(std::cell::RefCell::new(HashMap::new())),
            next_source_id: AtomicU64::new(0),
            nb_useless_fragments: 0,
        }
    }

    /// Registers a newly published source and returns an RAII handle that
    /// unregisters it on drop (§4.8 `publish_object_source`).
    pub fn publish_object_source(
        &self,
        url: String,
        is_real_time: bool,
        start_group: u64,
        start_object: u64,
    ) -> (MediaId, SourceRegistration) {
        let media_id = MediaId(self.next_source_id.fetch_add(1, Ordering::Relaxed));
        self.sources.borrow_mut().insert(
            media_id,
            LocalSource {
                url,
                is_real_time,
                start_group,
                start_object,
            },
        );
        (
            media_id,
            SourceRegistration {
                media_id,
                sources: Rc::clone(&self.sources),
            },
        )
    }

    pub fn find_source_by_url(&self, url: &str) -> Option<MediaId> {
        self.sources
            .borrow()
            .iter()
            .find(|(_, source)| source.url == url)
            .map(|(id, _)| *id)
    }

    /// Like [`Self::find_source_by_url`], but fails with `SourceNotFound`
    /// (§4.8, §7) when an endpoint expects the URL to already be locally
    /// registered.
    pub fn require_source_by_url(&self, url: &str) -> Result<MediaId, Error> {
        self.find_source_by_url(url).ok_or_else(|| Error::SourceNotFound(url.to_string()))
    }

    pub fn source_properties(&self, media_id: MediaId) -> Option<(bool, u64, u64)> {
        self.sources
            .borrow()
            .get(&media_id)
            .map(|s| (s.is_real_time, s.start_group, s.start_object))
    }
}
