use chrono::{DateTime, Utc};

use crate::models::series::TimePoint;

/// A point of `a` paired with its nearest-in-time point of `b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinedPoint {
    /// Timestamp of the `a` sample
    pub timestamp: DateTime<Utc>,
    pub a: f64,
    pub b: f64,
}

/// Pair every point of `a` with the point of `b` at the smallest absolute
/// time distance. On a tie the earlier candidate in `b` wins. An empty `b`
/// yields an empty result.
///
/// Sorted input (`a` ascending, `b` strictly ascending) takes a linear
/// two-pointer walk; anything else falls back to a full scan per point.
/// Both paths return the same pairs.
pub fn join_nearest(a: &[TimePoint], b: &[TimePoint]) -> Vec<JoinedPoint> {
    if b.is_empty() {
        return Vec::new();
    }

    let a_sorted = a.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
    let b_strict = b.windows(2).all(|w| w[0].timestamp < w[1].timestamp);

    if a_sorted && b_strict {
        join_sorted(a, b)
    } else {
        join_scan(a, b)
    }
}

fn distance(x: &DateTime<Utc>, y: &DateTime<Utc>) -> i64 {
    (*x - *y).num_milliseconds().abs()
}

fn join_sorted(a: &[TimePoint], b: &[TimePoint]) -> Vec<JoinedPoint> {
    let mut j = 0;
    a.iter()
        .map(|p| {
            // Distances along a strictly increasing `b` fall, then rise; the
            // first index where they stop falling is the first minimum.
            while j + 1 < b.len()
                && distance(&b[j + 1].timestamp, &p.timestamp) < distance(&b[j].timestamp, &p.timestamp)
            {
                j += 1;
            }
            JoinedPoint {
                timestamp: p.timestamp,
                a: p.value,
                b: b[j].value,
            }
        })
        .collect()
}

fn join_scan(a: &[TimePoint], b: &[TimePoint]) -> Vec<JoinedPoint> {
    a.iter()
        .filter_map(|p| {
            let nearest = b
                .iter()
                .min_by_key(|q| distance(&q.timestamp, &p.timestamp))?;
            Some(JoinedPoint {
                timestamp: p.timestamp,
                a: p.value,
                b: nearest.value,
            })
        })
        .collect()
}
