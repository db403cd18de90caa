//! Duplicate suppression for punch records.
//!
//! Terminals re-report the same scan and produce rapid status flips when a
//! finger is held on the reader. Within each subject, any record closer than
//! the threshold to the previously kept record is dropped, whatever its
//! status.

use std::collections::HashMap;
use std::time::Duration;

use punchsync_core::PunchRecord;

/// Collapse near-simultaneous punches per subject.
///
/// Subjects are emitted in order of first appearance; each subject's kept
/// records are ascending by `raw_timestamp` (stable for ties).
pub fn dedupe(records: Vec<PunchRecord>, threshold: Duration) -> Vec<PunchRecord> {
    dedupe_from(records, threshold, &HashMap::new())
}

/// [`dedupe`] continued from earlier history.
///
/// `anchors` maps a subject to the `raw_timestamp` of its last record kept in
/// a previous pass. Each anchor counts as already kept, so a record within
/// `threshold` of it is dropped. Anchors are never emitted.
pub fn dedupe_from(
    records: Vec<PunchRecord>,
    threshold: Duration,
    anchors: &HashMap<String, i64>,
) -> Vec<PunchRecord> {
    if records.is_empty() {
        return records;
    }
    let total = records.len();
    let threshold_secs = threshold.as_secs();

    let mut order: HashMap<String, usize> = HashMap::new();
    let mut partitions: Vec<Vec<PunchRecord>> = Vec::new();
    for record in records {
        let idx = *order.entry(record.subject_id.clone()).or_insert_with(|| {
            partitions.push(Vec::new());
            partitions.len() - 1
        });
        partitions[idx].push(record);
    }

    let mut kept = Vec::with_capacity(total);
    for mut partition in partitions {
        partition.sort_by_key(|r| r.raw_timestamp);
        let mut last_kept: Option<i64> = partition
            .first()
            .and_then(|r| anchors.get(&r.subject_id))
            .copied();
        for record in partition {
            if let Some(last) = last_kept {
                if record.raw_timestamp.abs_diff(last) <= threshold_secs {
                    continue;
                }
            }
            last_kept = Some(record.raw_timestamp);
            kept.push(record);
        }
    }

    let removed = total - kept.len();
    if removed > 0 {
        tracing::info!(removed, kept = kept.len(), threshold_secs, "removed duplicate punches");
    }
    kept
}
