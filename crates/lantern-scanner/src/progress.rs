//! Progress percentage calculation.

/// Percentage of `analyzed` out of `total`, clamped to `[0, 100]`.
///
/// An empty or unknown total counts as done.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_progress(analyzed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 100.0;
    }
    let analyzed = analyzed.max(0) as f64;
    (100.0 * analyzed / total as f64).clamp(0.0, 100.0)
}

/// [`calculate_progress`] for unsigned counters.
#[must_use]
pub fn progress_of(processed: u64, total: u64) -> f64 {
    calculate_progress(
        i64::try_from(processed).unwrap_or(i64::MAX),
        i64::try_from(total).unwrap_or(i64::MAX),
    )
}
