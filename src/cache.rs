//! Fragment cache (§4.2): a per-media ordered store of received fragments,
//! plus the object-level bookkeeping (length, flags, per-group object
//! counts) a relay needs to serve late or new subscribers.

use std::collections::{BTreeMap, HashMap};

use crate::model::{Flags, Fragment, FragmentKey, MediaId, ObjectLocation};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectProperties {
    pub object_length: u64,
    pub nb_objects_previous_group: u64,
    pub flags: Flags,
}

/// Result of [`FragmentCache::get_object_properties`]: the object header
/// hasn't necessarily arrived yet, and that's a normal, expected state
/// rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectPropertiesResult {
    Known(ObjectProperties),
    NotYet,
}

#[derive(Debug, Default)]
struct ObjectEntry {
    length: Option<u64>,
    nb_objects_previous_group: Option<u64>,
    flags: Flags,
}

/// The fragment store for a single media stream.
#[derive(Debug, Default)]
pub struct MediaCache {
    fragments: BTreeMap<FragmentKey, bytes::Bytes>,
    objects: HashMap<ObjectLocation, ObjectEntry>,
    group_object_count: HashMap<u64, u64>,
    /// Last object the publisher will ever send, if known (§4.2
    /// `notify_final`).
    final_location: Option<ObjectLocation>,
}

impl MediaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fragment. Idempotent on an exact duplicate (same key, same
    /// payload); fails with [`Error::Overlap`] if the offsets overlap
    /// inconsistently with what's already cached (§4.2 invariant).
    pub fn insert(&mut self, fragment: &Fragment) -> Result<(), Error> {
        let key = fragment.key();
        let location = fragment.location();

        if let Some(existing) = self.fragments.get(&key) {
            if existing == &fragment.data {
                log::trace!("[CACHE] duplicate fragment at {} offset {}, ignoring", location, fragment.offset);
                return Ok(());
            }
            return Err(Error::Overlap { offset: fragment.offset });
        }

        // Check for inconsistent overlap against neighboring fragments of
        // the same object.
        let new_start = fragment.offset;
        let new_end = fragment.offset + fragment.data.len() as u64;

        for (existing_key, existing_data) in self.fragments.range(
            FragmentKey::new(location.group_id, location.object_id, 0)
                ..FragmentKey::new(location.group_id, location.object_id, u64::MAX),
        ) {
            let existing_start = existing_key.offset;
            let existing_end = existing_start + existing_data.len() as u64;
            if new_start < existing_end && existing_start < new_end {
                log::debug!("[CACHE] overlapping fragment for {} at offset {}", location, new_start);
                return Err(Error::Overlap { offset: new_start });
            }
        }

        let entry = self.objects.entry(location).or_default();
        if entry.length.is_none() {
            entry.length = Some(fragment.object_length);
            entry.flags = fragment.flags;
        }
        if fragment.nb_objects_previous_group > 0 {
            entry.nb_objects_previous_group = Some(fragment.nb_objects_previous_group);
            self.learn_group_count_from_next(location, fragment.nb_objects_previous_group);
        }

        self.fragments.insert(key, fragment.data.clone());
        Ok(())
    }

    fn learn_group_count_from_next(&mut self, next_group_first: ObjectLocation, nb_objects_previous_group: u64) {
        if next_group_first.object_id == 0 && next_group_first.group_id > 0 {
            self.group_object_count
                .insert(next_group_first.group_id - 1, nb_objects_previous_group);
        }
    }

    /// Record that the publisher will never send anything after this object
    /// (§4.2).
    pub fn notify_final(&mut self, group_id: u64, object_id: u64) {
        let location = ObjectLocation::new(group_id, object_id);
        self.final_location = Some(location);
        self.group_object_count.insert(group_id, object_id + 1);
    }

    pub fn get_object_properties(&self, group_id: u64, object_id: u64) -> ObjectPropertiesResult {
        let location = ObjectLocation::new(group_id, object_id);
        match self.objects.get(&location) {
            Some(entry) if entry.length.is_some() => ObjectPropertiesResult::Known(ObjectProperties {
                object_length: entry.length.unwrap(),
                nb_objects_previous_group: entry.nb_objects_previous_group.unwrap_or(0),
                flags: entry.flags,
            }),
            _ => ObjectPropertiesResult::NotYet,
        }
    }

    /// Number of objects known for `group`, from either a next-group
    /// `nb_objects_previous_group` observation or the final-object signal.
    pub fn get_object_count(&self, group_id: u64) -> Option<u64> {
        self.group_object_count.get(&group_id).copied()
    }

    /// The largest contiguous byte run starting at `offset` available for
    /// `(group, object)`, up to `max` bytes.
    pub fn copy_available_data(&self, group_id: u64, object_id: u64, offset: u64, max: u64) -> bytes::Bytes {
        let mut out = bytes::BytesMut::new();
        let mut want = offset;

        for (key, data) in self.fragments.range(
            FragmentKey::new(group_id, object_id, 0)..FragmentKey::new(group_id, object_id, u64::MAX),
        ) {
            if key.offset > want {
                break; // gap: nothing more is contiguous
            }
            let frag_end = key.offset + data.len() as u64;
            if frag_end <= want {
                continue; // fully before the window we want
            }
            let skip = (want - key.offset) as usize;
            let available = &data[skip..];
            let take = available.len().min((max - (want - offset)) as usize);
            out.extend_from_slice(&available[..take]);
            want += take as u64;
            if out.len() as u64 >= max {
                break;
            }
        }

        out.freeze()
    }

    /// Whether every byte in `[0, object_length)` has arrived for this
    /// object (§4.2 "complete").
    pub fn object_is_complete(&self, group_id: u64, object_id: u64) -> bool {
        let length = match self.get_object_properties(group_id, object_id) {
            ObjectPropertiesResult::Known(props) => props.object_length,
            ObjectPropertiesResult::NotYet => return false,
        };
        if length == 0 {
            return self.objects.contains_key(&ObjectLocation::new(group_id, object_id));
        }
        self.copy_available_data(group_id, object_id, 0, length).len() as u64 == length
    }
}

/// Top-level cache: one [`MediaCache`] per registered media stream.
#[derive(Debug, Default)]
pub struct FragmentCache {
    media: HashMap<MediaId, MediaCache>,
}

impl FragmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn media(&mut self, media_id: MediaId) -> &mut MediaCache {
        self.media.entry(media_id).or_default()
    }

    pub fn get(&self, media_id: MediaId) -> Option<&MediaCache> {
        self.media.get(&media_id)
    }

    pub fn remove(&mut self, media_id: MediaId) {
        self.media.remove(&media_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(group: u64, object: u64, offset: u64, object_length: u64, data: &[u8]) -> Fragment {
        Fragment {
            group_id: group,
            object_id: object,
            offset,
            object_length,
            flags: Flags::NONE,
            nb_objects_previous_group: 0,
            queue_delay: 0,
            data: bytes::Bytes::copy_from_slice(data),
        }
    }

    #[test]
    fn insert_is_idempotent_on_exact_duplicate() {
        let mut cache = MediaCache::new();
        let f = frag(0, 0, 0, 5, b"hello");
        cache.insert(&f).unwrap();
        cache.insert(&f).unwrap();
        assert!(cache.object_is_complete(0, 0));
    }

    #[test]
    fn insert_rejects_inconsistent_overlap() {
        let mut cache = MediaCache::new();
        cache.insert(&frag(0, 0, 0, 10, b"hello")).unwrap();
        let err = cache.insert(&frag(0, 0, 2, 10, b"ZZZZZ")).unwrap_err();
        assert!(matches!(err, Error::Overlap { offset: 2 }));
    }

    #[test]
    fn copy_available_data_stops_at_gap() {
        let mut cache = MediaCache::new();
        cache.insert(&frag(0, 0, 0, 20, b"0123456789")).unwrap();
        cache.insert(&frag(0, 0, 15, 20, b"fghij")).unwrap();

        let data = cache.copy_available_data(0, 0, 0, 20);
        assert_eq!(&data[..], b"0123456789");
    }

    #[test]
    fn object_completes_once_offsets_cover_full_length() {
        let mut cache = MediaCache::new();
        cache.insert(&frag(0, 0, 0, 10, b"01234")).unwrap();
        assert!(!cache.object_is_complete(0, 0));
        cache.insert(&frag(0, 0, 5, 10, b"56789")).unwrap();
        assert!(cache.object_is_complete(0, 0));
    }

    #[test]
    fn zero_length_object_is_complete_once_seen() {
        let mut cache = MediaCache::new();
        cache.insert(&frag(3, 0, 0, 0, b"")).unwrap();
        assert!(cache.object_is_complete(3, 0));
    }

    #[test]
    fn object_count_learned_from_next_group_first_fragment() {
        let mut cache = MediaCache::new();
        let mut next = frag(1, 0, 0, 150, b"x");
        next.nb_objects_previous_group = 2; // group 0 had objects 0 and 1
        cache.insert(&next).unwrap();
        assert_eq!(cache.get_object_count(0), Some(2));
    }

    #[test]
    fn object_count_learned_from_notify_final() {
        let mut cache = MediaCache::new();
        cache.notify_final(2, 0);
        assert_eq!(cache.get_object_count(2), Some(1));
    }

    #[test]
    fn properties_not_yet_known_before_any_fragment() {
        let cache = MediaCache::new();
        assert_eq!(cache.get_object_properties(0, 0), ObjectPropertiesResult::NotYet);
    }
}
