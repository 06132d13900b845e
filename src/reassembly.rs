//! Reassembly engine (§4.3): the consumer side. Converts arriving fragments
//! into in-order object deliveries, tolerating both reordering and a
//! deliberately late-arriving start point.

use crate::model::{Flags, ObjectLocation};
use crate::Error;

/// How a delivered object relates to the in-order stream (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Out of order: delivered for inspection, not counted toward progress.
    Peek,
    /// Exactly the next object expected.
    InSequence,
    /// A previously peeked object that has now become in-order.
    Repair,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub location: ObjectLocation,
    pub mode: DeliveryMode,
    pub flags: Flags,
    pub data: bytes::Bytes,
}

#[derive(Debug, Default)]
struct PendingObject {
    length: Option<u64>,
    nb_objects_previous_group: u64,
    flags: Flags,
    delivered_as_peek: bool,
}

/// Per-stream reassembly state.
#[derive(Debug)]
pub struct Reassembler {
    cache: crate::cache::MediaCache,
    next_expected: ObjectLocation,
    start_point: Option<ObjectLocation>,
    final_object: Option<ObjectLocation>,
    is_finished: bool,
    pending: std::collections::HashMap<ObjectLocation, PendingObject>,
    /// Highest location handed to the upper callback so far, in-sequence or
    /// peeked; used to reject a `learn_start_point` regression (§4.3).
    highest_delivered: Option<ObjectLocation>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            cache: crate::cache::MediaCache::new(),
            next_expected: ObjectLocation::ORIGIN,
            start_point: None,
            final_object: None,
            is_finished: false,
            pending: std::collections::HashMap::new(),
            highest_delivered: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn next_expected(&self) -> ObjectLocation {
        self.next_expected
    }

    /// Sets the earliest expected `(group, object)`. Data below the start
    /// point is dropped; data at or beyond it becomes deliverable (§4.3).
    pub fn learn_start_point(&mut self, group_id: u64, object_id: u64) -> Result<(), Error> {
        let point = ObjectLocation::new(group_id, object_id);
        if let Some(highest) = self.highest_delivered {
            if point < highest {
                return Err(Error::StartPointConflict);
            }
        }
        self.start_point = Some(point);
        if self.next_expected < point {
            self.next_expected = point;
        }
        self.pending.retain(|location, _| *location >= point);
        Ok(())
    }

    /// Sets the end boundary. `is_finished` becomes true once every object
    /// in `[start, final)` has been delivered in-sequence (§4.3).
    pub fn learn_final_object_id(&mut self, group_id: u64, object_id: u64) {
        let final_location = ObjectLocation::new(group_id, object_id);
        self.final_object = Some(final_location);
        if self.next_expected >= final_location {
            self.is_finished = true;
        }
    }

    /// Feeds a fragment into the cache and returns any objects this fragment
    /// makes deliverable, in delivery order.
    #[allow(clippy::too_many_arguments)]
    pub fn input_fragment(
        &mut self,
        group_id: u64,
        object_id: u64,
        offset: u64,
        _queue_delay: u64,
        flags: Flags,
        nb_objects_previous_group: u64,
        object_length: u64,
        data: bytes::Bytes,
    ) -> Result<Vec<Delivery>, Error> {
        let location = ObjectLocation::new(group_id, object_id);

        if let Some(start) = self.start_point {
            if location < start {
                log::trace!("[REASSEMBLY] dropping fragment at {} before start point {}", location, start);
                return Ok(Vec::new());
            }
        }

        let fragment = crate::model::Fragment {
            group_id,
            object_id,
            offset,
            object_length,
            flags,
            nb_objects_previous_group,
            queue_delay: _queue_delay,
            data,
        };
        self.cache.insert(&fragment)?;
        self.reconcile_next_expected();

        if location < self.next_expected {
            log::trace!(
                "[REASSEMBLY] dropping duplicate fragment at {} already delivered (next_expected {})",
                location,
                self.next_expected
            );
            return Ok(Vec::new());
        }

        let entry = self.pending.entry(location).or_default();
        entry.flags = flags;
        if nb_objects_previous_group > 0 {
            entry.nb_objects_previous_group = nb_objects_previous_group;
        }
        if entry.length.is_none() {
            entry.length = Some(object_length);
        }

        if !self.cache.object_is_complete(group_id, object_id) {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        self.deliver_complete(location, &mut out);
        self.advance_in_sequence(&mut out);
        Ok(out)
    }

    fn deliver_complete(&mut self, location: ObjectLocation, out: &mut Vec<Delivery>) {
        if location != self.next_expected {
            let already_peeked = self
                .pending
                .get(&location)
                .map(|p| p.delivered_as_peek)
                .unwrap_or(false);
            if !already_peeked {
                if let Some(entry) = self.pending.get_mut(&location) {
                    entry.delivered_as_peek = true;
                }
                let data = self.cache.copy_available_data(
                    location.group_id,
                    location.object_id,
                    0,
                    self.pending.get(&location).and_then(|p| p.length).unwrap_or(0),
                );
                let flags = self.pending.get(&location).map(|p| p.flags).unwrap_or_default();
                out.push(Delivery {
                    location,
                    mode: DeliveryMode::Peek,
                    flags,
                    data,
                });
                self.highest_delivered = Some(self.highest_delivered.map_or(location, |h| h.max(location)));
            }
        }
    }

    /// Corrects `next_expected` once the real object count of its group
    /// becomes known (§4.3 group progression rule). `next_expected` always
    /// advances one object at a time by default, since the count for the
    /// current group is usually still unknown at the moment its last object
    /// is delivered — it's only learned independently later, from the next
    /// group's first fragment's `nb_objects_previous_group` (or from
    /// `notify_final`). When that happens, this walks `next_expected`
    /// forward past any now-phantom object ids the learned count rules out.
    fn reconcile_next_expected(&mut self) {
        loop {
            match self.cache.get_object_count(self.next_expected.group_id) {
                Some(count) if self.next_expected.object_id >= count => {
                    self.next_expected = self.next_expected.next_group();
                }
                _ => break,
            }
        }
    }

    /// Walks forward from `next_expected`, delivering every object whose
    /// data has already arrived.
    fn advance_in_sequence(&mut self, out: &mut Vec<Delivery>) {
        loop {
            self.reconcile_next_expected();
            let location = self.next_expected;
            if !self.cache.object_is_complete(location.group_id, location.object_id) {
                break;
            }

            let entry = self.pending.get(&location);
            let was_peeked = entry.map(|e| e.delivered_as_peek).unwrap_or(false);
            let length = entry.and_then(|e| e.length).unwrap_or(0);
            let flags = entry.map(|e| e.flags).unwrap_or_default();

            let data = self.cache.copy_available_data(location.group_id, location.object_id, 0, length);
            out.push(Delivery {
                location,
                mode: if was_peeked { DeliveryMode::Repair } else { DeliveryMode::InSequence },
                flags,
                data,
            });
            self.pending.remove(&location);
            self.highest_delivered = Some(self.highest_delivered.map_or(location, |h| h.max(location)));
            self.next_expected = location.next_object();

            if let Some(final_location) = self.final_object {
                if self.next_expected >= final_location {
                    self.is_finished = true;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_object_delivers_in_sequence() {
        let mut r = Reassembler::new();
        let out = r
            .input_fragment(0, 0, 0, 0, Flags::NONE, 0, 5, bytes::Bytes::from_static(b"hello"))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mode, DeliveryMode::InSequence);
        assert_eq!(&out[0].data[..], b"hello");
    }

    #[test]
    fn out_of_order_object_is_peeked_then_repaired() {
        let mut r = Reassembler::new();

        let out = r
            .input_fragment(0, 1, 0, 0, Flags::NONE, 0, 3, bytes::Bytes::from_static(b"abc"))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mode, DeliveryMode::Peek);

        let out = r
            .input_fragment(0, 0, 0, 0, Flags::NONE, 0, 3, bytes::Bytes::from_static(b"xyz"))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].mode, DeliveryMode::InSequence);
        assert_eq!(out[1].mode, DeliveryMode::Repair);
        assert!(r.next_expected() > ObjectLocation::new(0, 1));
    }

    #[test]
    fn group_progression_requires_matching_object_count() {
        let mut r = Reassembler::new();
        r.input_fragment(0, 0, 0, 0, Flags::NONE, 0, 1, bytes::Bytes::from_static(b"a")).unwrap();

        // Wrong count: claims 3 objects in group 0, but only one was sent.
        // The object is still observable out of order, but next_expected
        // must not jump into group 1 on the strength of a mismatched claim.
        let out = r
            .input_fragment(1, 0, 0, 0, Flags::NONE, 3, 1, bytes::Bytes::from_static(b"b"))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mode, DeliveryMode::Peek);
        assert_eq!(r.next_expected(), ObjectLocation::new(0, 1));
    }

    #[test]
    fn group_progression_advances_once_count_matches() {
        let mut r = Reassembler::new();
        r.input_fragment(0, 0, 0, 0, Flags::NONE, 0, 1, bytes::Bytes::from_static(b"a")).unwrap();

        // Correct count: group 0 really did have exactly one object.
        let out = r
            .input_fragment(1, 0, 0, 0, Flags::NONE, 1, 1, bytes::Bytes::from_static(b"b"))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mode, DeliveryMode::InSequence);
        assert_eq!(out[0].location, ObjectLocation::new(1, 0));
        assert_eq!(r.next_expected(), ObjectLocation::new(1, 1));
    }

    #[test]
    fn duplicate_fragment_after_delivery_is_not_repeeked() {
        let mut r = Reassembler::new();
        let out = r
            .input_fragment(0, 0, 0, 0, Flags::NONE, 0, 5, bytes::Bytes::from_static(b"hello"))
            .unwrap();
        assert_eq!(out[0].mode, DeliveryMode::InSequence);
        assert_eq!(r.next_expected(), ObjectLocation::new(0, 1));

        // An extra repeat of the same datagram arrives after delivery; it
        // must be a silent no-op, not a fresh Peek.
        let out = r
            .input_fragment(0, 0, 0, 0, Flags::NONE, 0, 5, bytes::Bytes::from_static(b"hello"))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(r.next_expected(), ObjectLocation::new(0, 1));
    }

    #[test]
    fn learn_start_point_skips_earlier_data() {
        let mut r = Reassembler::new();
        r.learn_start_point(2, 0).unwrap();
        let out = r
            .input_fragment(0, 0, 0, 0, Flags::NONE, 0, 1, bytes::Bytes::from_static(b"a"))
            .unwrap();
        assert!(out.is_empty());

        let out = r
            .input_fragment(2, 0, 0, 0, Flags::NONE, 0, 1, bytes::Bytes::from_static(b"b"))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].mode, DeliveryMode::InSequence);
    }

    #[test]
    fn learn_start_point_rejects_regression() {
        let mut r = Reassembler::new();
        r.input_fragment(1, 0, 0, 0, Flags::NONE, 0, 1, bytes::Bytes::from_static(b"a")).unwrap();
        let err = r.learn_start_point(0, 0).unwrap_err();
        assert!(matches!(err, Error::StartPointConflict));
    }

    #[test]
    fn final_object_id_marks_finished() {
        let mut r = Reassembler::new();
        r.learn_final_object_id(0, 1);
        r.input_fragment(0, 0, 0, 0, Flags::NONE, 0, 1, bytes::Bytes::from_static(b"a")).unwrap();
        assert!(r.is_finished());
    }
}
