//! External interfaces (§6): the trait-object boundary between the core and
//! whatever owns the QUIC connection, the publisher's media source, and the
//! consumer's playback pipeline. The core never blocks and never spawns a
//! task, so every trait here is a plain synchronous contract — no
//! `async_trait` — in contrast to the coordinator-style traits this crate's
//! ideas were grounded on.
//!
//! §6 also lists a set of callbacks the core *receives* from the transport
//! (`stream_data`, `datagram`, `datagram_acked`/`lost`/`spurious`,
//! `stream_reset`, `stop_sending`). Those aren't modeled as trait methods
//! here — there's nothing for an implementor to override, the core's
//! reaction is fixed — so they're plain inbound entry points on
//! [`crate::Connection`]: `on_stream_data`, `on_datagram`,
//! `on_datagram_acked`, `on_datagram_lost`, `on_datagram_spurious`,
//! `on_stream_reset`, `on_stop_sending`. `Transport` below covers only the
//! outbound half: what the core asks the transport to do.

use crate::model::{Flags, MediaId, StreamId};
use crate::{CloseReason, Error};

/// Callbacks the core invokes on whatever owns the QUIC connection
/// (§6 "Transport callback", outbound half).
pub trait Transport {
    /// Write `data` on `stream_id`, setting `fin` if this is the last write.
    fn stream_data(&mut self, stream_id: StreamId, data: &[u8], fin: bool) -> Result<(), Error>;

    /// Asks how much room is available to send on `stream_id` right now;
    /// the core fills up to that many bytes into its own buffer before
    /// calling `stream_data`.
    fn prepare_to_send(&mut self, stream_id: StreamId) -> usize;

    /// Send `data` as a standalone unreliable datagram.
    fn datagram(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Room available for the next outgoing datagram, or `None` if the
    /// transport has nothing queueable right now.
    fn prepare_datagram(&mut self) -> Option<usize>;

    /// The connection is going away; `reason` explains why.
    fn close(&mut self, reason: CloseReason, code: u64);
}

/// What the publisher side reports back for a `get_data` poll
/// (§6 "Publisher contract").
#[derive(Debug, Clone, Default)]
pub struct PublisherReport {
    pub bytes_written: usize,
    pub is_new_group: bool,
    pub object_length: u64,
    pub is_media_finished: bool,
    pub is_still_active: bool,
    pub has_backlog: bool,
}

/// Actions the core can ask a publisher to perform.
pub enum PublisherAction<'a> {
    /// `buf == None`: report how many bytes are available without
    /// consuming them. `buf == Some(_)`: copy up to the buffer's length.
    GetData { buf: Option<&'a mut [u8]>, max: usize },
    SkipObject,
    Close { reason: CloseReason },
}

/// A registered media source, invoked by the core to pull bytes for
/// whatever stream or datagram slot is ready to send (§6 "Publisher
/// contract").
pub trait Publisher {
    fn publisher(&mut self, action: PublisherAction<'_>, now: u64) -> Result<PublisherReport, Error>;
}

/// Actions the core delivers to a consumer as data and metadata arrive.
pub enum ConsumerAction<'a> {
    DatagramReady {
        data: &'a [u8],
        group: u64,
        object: u64,
        offset: u64,
        queue_delay: u64,
        flags: Flags,
        nb_objects_previous_group: u64,
        object_length: u64,
    },
    FinalObjectId { group: u64, object: u64 },
    StartPoint { group: u64, object: u64 },
    RealTimeCache { is_real_time: bool },
    Close { reason: CloseReason },
}

/// What the reassembly engine hands back to the application on each
/// delivery (§6 "Consumer contract", §7 "ConsumerFinished").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerOutcome {
    Continue,
    /// The reassembler has delivered everything up to the final object.
    /// Not an error; triggers a graceful FIN on the owning stream.
    Finished,
}

/// Registered media sink; receives reassembled data and lifecycle events
/// (§6 "Consumer contract").
pub trait Consumer {
    fn consumer(&mut self, action: ConsumerAction<'_>, now: u64) -> Result<ConsumerOutcome, Error>;
}

/// Properties describing a newly published media source, used to answer a
/// subscriber's `REQUEST` and to decide the initial start point
/// (§4.8 `publish_object_source`).
#[derive(Debug, Clone, Copy)]
pub struct ObjectSourceProperties {
    pub is_real_time: bool,
    pub start_group: u64,
    pub start_object: u64,
}

/// Higher-level API layered on top of [`Publisher`] for an application that
/// thinks in terms of whole objects rather than poll-for-bytes
/// (§6 "Object source contract").
pub trait ObjectSource {
    fn publish_object(
        &mut self,
        media_id: MediaId,
        data: &[u8],
        group: u64,
        object: u64,
        flags: Flags,
    ) -> Result<(), Error>;

    fn publish_object_fin(&mut self, media_id: MediaId) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullConsumer;

    impl Consumer for NullConsumer {
        fn consumer(&mut self, action: ConsumerAction<'_>, _now: u64) -> Result<ConsumerOutcome, Error> {
            match action {
                ConsumerAction::FinalObjectId { group, object } if group == 0 && object == 0 => {
                    Ok(ConsumerOutcome::Finished)
                }
                _ => Ok(ConsumerOutcome::Continue),
            }
        }
    }

    #[test]
    fn consumer_trait_object_is_callable() {
        let mut consumer: Box<dyn Consumer> = Box::new(NullConsumer);
        let outcome = consumer
            .consumer(ConsumerAction::FinalObjectId { group: 0, object: 0 }, 0)
            .unwrap();
        assert_eq!(outcome, ConsumerOutcome::Finished);
    }
}
