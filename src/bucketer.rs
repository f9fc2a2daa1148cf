//! Deterministic traffic bucketing.
use std::io::Cursor;

use crate::project_config::TrafficRange;

/// Size of the bucketing line. Buckets fall in `[0, MAX_TRAFFIC_VALUE)`.
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;

const HASH_SEED: u32 = 1;

/// Maps a bucketing key onto the `[0, 10000)` line.
pub trait Bucketer: Send + Sync {
    /// Bucket for `bucketing_id` hashed together with the id of the entity that owns the
    /// allocation (an experiment id or a group id).
    fn bucket(&self, bucketing_id: &str, parent_id: &str) -> u32;

    /// Bucket the user and return the entity id whose range contains the bucket.
    fn bucket_into<'a>(
        &self,
        bucketing_id: &str,
        parent_id: &str,
        ranges: &'a [TrafficRange],
    ) -> Option<&'a str> {
        let bucket = self.bucket(bucketing_id, parent_id);
        log::trace!(target: "optiflag", bucketing_id, parent_id, bucket; "assigned bucket");
        find_bucket(bucket, ranges)
    }
}

/// The default bucketer: MurmurHash3 x86 32-bit with seed 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct Murmur3Bucketer;

impl Bucketer for Murmur3Bucketer {
    fn bucket(&self, bucketing_id: &str, parent_id: &str) -> u32 {
        let key = format!("{bucketing_id}{parent_id}");
        // Reading from an in-memory cursor cannot fail.
        let hash = murmur3::murmur3_32(&mut Cursor::new(key.as_bytes()), HASH_SEED).unwrap_or(0);
        ((u64::from(hash) * u64::from(MAX_TRAFFIC_VALUE)) >> 32) as u32
    }
}

/// Find the first range whose end is strictly greater than `bucket`. Ranges are half-open
/// `[previous end, end)`. An empty entity id is an explicit hole in the allocation.
pub(crate) fn find_bucket(bucket: u32, ranges: &[TrafficRange]) -> Option<&str> {
    ranges
        .iter()
        .find(|range| bucket < range.end_of_range)
        .map(|range| range.entity_id.as_str())
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{find_bucket, Bucketer, Murmur3Bucketer, MAX_TRAFFIC_VALUE};
    use crate::project_config::TrafficRange;

    fn range(entity_id: &str, end_of_range: u32) -> TrafficRange {
        TrafficRange {
            entity_id: entity_id.to_owned(),
            end_of_range,
        }
    }

    #[test]
    fn known_bucket_values() {
        let bucketer = Murmur3Bucketer;
        assert_eq!(bucketer.bucket("ppid1", "1886780721"), 5254);
        assert_eq!(bucketer.bucket("ppid2", "1886780721"), 4299);
        assert_eq!(bucketer.bucket("ppid2", "1886780722"), 2434);
        assert_eq!(bucketer.bucket("ppid3", "1886780721"), 5439);
    }

    #[test]
    fn buckets_stay_in_range() {
        let bucketer = Murmur3Bucketer;
        for i in 0..5_000 {
            let bucket = bucketer.bucket(&format!("user-{i}"), "exp");
            assert!(bucket < MAX_TRAFFIC_VALUE);
        }
    }

    #[test]
    fn deterministic() {
        let bucketer = Murmur3Bucketer;
        assert_eq!(bucketer.bucket("alice", "exp_1"), bucketer.bucket("alice", "exp_1"));
    }

    #[test]
    fn ranges_are_half_open() {
        let ranges = [range("a", 5000), range("b", 10000)];
        assert_eq!(find_bucket(0, &ranges), Some("a"));
        assert_eq!(find_bucket(4999, &ranges), Some("a"));
        assert_eq!(find_bucket(5000, &ranges), Some("b"));
        assert_eq!(find_bucket(9999, &ranges), Some("b"));
    }

    #[test]
    fn outside_allocation() {
        let ranges = [range("a", 5000)];
        assert_eq!(find_bucket(5000, &ranges), None);
        assert_eq!(find_bucket(0, &[]), None);
    }

    #[test]
    fn empty_entity_is_a_hole() {
        let ranges = [range("", 5000), range("a", 10000)];
        assert_eq!(find_bucket(10, &ranges), None);
        assert_eq!(find_bucket(6000, &ranges), Some("a"));
    }

    #[test]
    fn full_allocation_always_hits() {
        let bucketer = Murmur3Bucketer;
        let ranges = [range("only", MAX_TRAFFIC_VALUE)];
        for i in 0..100 {
            assert_eq!(
                bucketer.bucket_into(&format!("u{i}"), "exp", &ranges),
                Some("only")
            );
        }
    }
}
