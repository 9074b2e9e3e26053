use crate::error::{Error, Result};

/// A time-bounded slice of the source media.
///
/// Spans of one plan are contiguous, non-overlapping, and cover the full
/// duration; `index` defines transcription and concatenation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpan {
    /// 0-based position in the plan.
    pub index: usize,
    /// Start offset in milliseconds, inclusive.
    pub start_ms: u64,
    /// End offset in milliseconds, exclusive.
    pub end_ms: u64,
}

impl SegmentSpan {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Split a total duration into ordered spans of at most `cap_ms` each.
///
/// Produces `ceil(total_ms / cap_ms)` spans; the last one may be shorter
/// than the cap. A duration at or below the cap yields exactly one span.
pub fn plan(total_ms: u64, cap_ms: u64) -> Result<Vec<SegmentSpan>> {
    if total_ms == 0 {
        return Err(Error::InvalidInput(
            "total duration must be positive".into(),
        ));
    }
    if cap_ms == 0 {
        return Err(Error::InvalidInput(
            "maximum segment duration must be positive".into(),
        ));
    }

    let count = total_ms.div_ceil(cap_ms);
    let mut spans = Vec::with_capacity(count as usize);
    for i in 0..count {
        spans.push(SegmentSpan {
            index: i as usize,
            start_ms: i * cap_ms,
            end_ms: ((i + 1) * cap_ms).min(total_ms),
        });
    }
    Ok(spans)
}
