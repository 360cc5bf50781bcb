use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;

use crate::models::series::{Granularity, TimePoint, TimeSeries};

/// Merge a fetched batch into an existing series.
///
/// A point whose date key already exists overwrites that value in place
/// (last writer wins); other points are appended. The result is sorted
/// ascending by timestamp. Merging the same batch twice equals merging it
/// once, and an empty batch leaves the series unchanged.
pub fn merge_series(
    existing: &[TimePoint],
    incoming: &[TimePoint],
    granularity: Granularity,
) -> TimeSeries {
    merge_series_by(existing, incoming, |ts| granularity.date_key(ts))
}

/// `merge_series` with a caller-supplied date key.
pub fn merge_series_by<K, F>(existing: &[TimePoint], incoming: &[TimePoint], date_key: F) -> TimeSeries
where
    K: Eq + Hash,
    F: Fn(&DateTime<Utc>) -> K,
{
    let mut merged: TimeSeries = existing.to_vec();
    let mut positions: HashMap<K, usize> = merged
        .iter()
        .enumerate()
        .map(|(idx, p)| (date_key(&p.timestamp), idx))
        .collect();

    for point in incoming {
        let key = date_key(&point.timestamp);
        match positions.get(&key) {
            Some(&idx) => merged[idx].value = point.value,
            None => {
                positions.insert(key, merged.len());
                merged.push(*point);
            }
        }
    }

    merged.sort_by_key(|p| p.timestamp);
    merged
}

/// Drop every point older than `cutoff`.
pub fn retain_since(series: TimeSeries, cutoff: DateTime<Utc>) -> TimeSeries {
    series.into_iter().filter(|p| p.timestamp >= cutoff).collect()
}
