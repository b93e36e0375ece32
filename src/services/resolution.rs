//! Query resolution mapping for the metrics read API

use crate::entities::metrics::resolution;

/// Pick a resolution for a `[from, to)` range: under 30 days of span reads
/// daily rows, under 300 the 10-day rollup, under 3000 the 100-day rollup,
/// anything longer the 1000-day rollup.
pub fn auto_resolution(from: i64, to: i64) -> i32 {
    let span_days = (to.saturating_sub(from)) / 86_400;
    if span_days < 30 {
        resolution::DAY
    } else if span_days < 300 {
        resolution::TEN_DAYS
    } else if span_days < 3_000 {
        resolution::HUNDRED_DAYS
    } else {
        resolution::THOUSAND_DAYS
    }
}

/// Resolve the query parameter: absent or "auto" maps by range span, an
/// explicit value must be one of the four supported resolutions.
pub fn resolve_resolution(param: Option<&str>, from: i64, to: i64) -> Result<i32, String> {
    match param {
        None => Ok(auto_resolution(from, to)),
        Some("auto") => Ok(auto_resolution(from, to)),
        Some(raw) => match raw.parse::<i32>() {
            Ok(value)
                if value == resolution::DAY
                    || value == resolution::TEN_DAYS
                    || value == resolution::HUNDRED_DAYS
                    || value == resolution::THOUSAND_DAYS =>
            {
                Ok(value)
            }
            _ => Err(format!(
                "Invalid resolution '{}': expected 86400, 864000, 8640000, 86400000 or auto",
                raw
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_resolution_thresholds() {
        let day = 86_400i64;
        assert_eq!(auto_resolution(0, 29 * day), resolution::DAY);
        assert_eq!(auto_resolution(0, 30 * day), resolution::TEN_DAYS);
        assert_eq!(auto_resolution(0, 299 * day), resolution::TEN_DAYS);
        assert_eq!(auto_resolution(0, 300 * day), resolution::HUNDRED_DAYS);
        assert_eq!(auto_resolution(0, 2_999 * day), resolution::HUNDRED_DAYS);
        assert_eq!(auto_resolution(0, 3_000 * day), resolution::THOUSAND_DAYS);
    }

    #[test]
    fn test_resolve_resolution_param() {
        assert_eq!(resolve_resolution(None, 0, 0).unwrap(), resolution::DAY);
        assert_eq!(
            resolve_resolution(Some("auto"), 0, 400 * 86_400).unwrap(),
            resolution::HUNDRED_DAYS
        );
        assert_eq!(
            resolve_resolution(Some("864000"), 0, 0).unwrap(),
            resolution::TEN_DAYS
        );
        assert!(resolve_resolution(Some("3600"), 0, 0).is_err());
        assert!(resolve_resolution(Some("daily"), 0, 0).is_err());
    }
}
