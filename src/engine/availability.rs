use crate::model::*;

// ── Free-time algebra ─────────────────────────────────────────────

/// Busy ranges of one resource on the date of its entries, clipped to
/// `within`, sorted and merged.
pub(crate) fn busy_within(entries: &[Entry], within: &TimeRange) -> Vec<TimeRange> {
    let mut busy: Vec<TimeRange> = entries
        .iter()
        .filter(|e| e.slot.range().overlaps(within))
        .map(|e| TimeRange {
            start: e.slot.start.max(within.start),
            end: e.slot.end.min(within.end),
        })
        .collect();
    busy.sort_by_key(|r| r.start);
    merge_overlapping(&busy)
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[TimeRange]) -> Vec<TimeRange> {
    let mut merged: Vec<TimeRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` merged.
pub fn subtract_intervals(base: &[TimeRange], to_remove: &[TimeRange]) -> Vec<TimeRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeRange {
                    start: current_start,
                    end: r.start,
                });
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeRange {
                start: current_start,
                end: current_end,
            });
        }
    }

    result
}

/// Ranges inside `within` where none of the resources is busy, keeping only
/// those at least `min_minutes` long.
pub fn common_free(
    busy_per_resource: &[Vec<TimeRange>],
    within: TimeRange,
    min_minutes: Option<i64>,
) -> Vec<TimeRange> {
    let mut busy: Vec<TimeRange> = busy_per_resource.iter().flatten().copied().collect();
    busy.sort_by_key(|r| r.start);
    let busy = merge_overlapping(&busy);

    let min = min_minutes.unwrap_or(0);
    subtract_intervals(&[within], &busy)
        .into_iter()
        .filter(|r| r.minutes() >= min)
        .collect()
}
