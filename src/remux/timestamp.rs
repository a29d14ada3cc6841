//! 33-bit MPEG timestamp helpers.

/// Period of the 33-bit PTS/DTS counter.
pub const PTS_ROLLOVER: i64 = 1 << 33;

/// A jump larger than this is a wrap, not a real discontinuity.
pub const PTS_HALF_RANGE: i64 = 1 << 32;

/// Moves `value` by whole rollover periods until it is within half a period
/// of `reference`. Without a reference the value is returned as is.
///
/// ```
/// use hlsio::remux::timestamp::{pts_normalize, PTS_ROLLOVER};
///
/// // a stream that wrapped just after the reference
/// assert_eq!(pts_normalize(100, Some(PTS_ROLLOVER - 100)), PTS_ROLLOVER + 100);
/// assert_eq!(pts_normalize(100, None), 100);
/// ```
pub fn pts_normalize(mut value: i64, reference: Option<i64>) -> i64 {
    let Some(reference) = reference else {
        return value;
    };
    let offset = if reference < value { -PTS_ROLLOVER } else { PTS_ROLLOVER };
    while (value - reference).abs() > PTS_HALF_RANGE {
        value += offset;
    }
    value
}

pub fn ticks_to_seconds(ticks: i64, timescale: u32) -> f64 {
    ticks as f64 / timescale as f64
}

pub fn seconds_to_ticks(seconds: f64, timescale: u32) -> i64 {
    (seconds * timescale as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_normalize_both_directions() {
        let near_end = PTS_ROLLOVER - 9000;
        assert_eq!(pts_normalize(3000, Some(near_end)), PTS_ROLLOVER + 3000);
        assert_eq!(pts_normalize(near_end, Some(3000)), near_end - PTS_ROLLOVER);
        assert_eq!(pts_normalize(90_000, Some(0)), 90_000);
    }

    #[test]
    fn test_tick_conversions() {
        assert_eq!(ticks_to_seconds(135_000, 90_000), 1.5);
        assert_eq!(seconds_to_ticks(1.5, 48_000), 72_000);
    }

    /// A raw 33-bit stamp always lands within half a period of the reference,
    /// and on the same residue class.
    #[quickcheck]
    fn prop_normalized_close_to_reference(raw: u64, reference: i64) -> bool {
        let raw = (raw % PTS_ROLLOVER as u64) as i64;
        let reference = reference % (PTS_ROLLOVER * 4);
        let value = pts_normalize(raw, Some(reference));
        (value - reference).abs() <= PTS_HALF_RANGE && (value - raw).rem_euclid(PTS_ROLLOVER) == 0
    }
}
