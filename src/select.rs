//! Task selection expression resolver.
//!
//! Parses the `--tasks` argument into a concrete, deduplicated, ascending
//! set of task ids. Pure; all validation failures name the offending token
//! instead of silently dropping or clamping it.

use std::collections::BTreeSet;

use crate::error::SelectionError;

/// Resolves a selection expression against a suite of `suite_size` tasks.
///
/// Accepted forms:
/// - `None` or `"all"`: the full suite, ids `1..=suite_size`
/// - comma-joined ids and closed ranges: `"1-3,2,5"`
/// - whitespace-separated ids: `"1 4 9"`
///
/// The result is strictly ascending and duplicate-free. Any id outside
/// `[1, suite_size]`, non-numeric bound, or inverted range is an
/// [`SelectionError::InvalidSelection`].
pub fn resolve(expr: Option<&str>, suite_size: u32) -> Result<Vec<u32>, SelectionError> {
    let expr = match expr {
        None => return Ok((1..=suite_size).collect()),
        Some(e) => e.trim(),
    };
    if expr.is_empty() || expr.eq_ignore_ascii_case("all") {
        return Ok((1..=suite_size).collect());
    }

    let tokens: Vec<&str> = if expr.contains(',') {
        expr.split(',').map(str::trim).collect()
    } else {
        expr.split_whitespace().collect()
    };

    let mut ids = BTreeSet::new();
    for token in tokens {
        if token.is_empty() {
            return Err(SelectionError::InvalidSelection {
                token: "<empty>".to_string(),
                reason: "empty token in selection".to_string(),
            });
        }
        match token.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_id(lo, token)?;
                let hi = parse_id(hi, token)?;
                if lo > hi {
                    return Err(SelectionError::InvalidSelection {
                        token: token.to_string(),
                        reason: format!("range start {} exceeds end {}", lo, hi),
                    });
                }
                for id in lo..=hi {
                    check_bounds(id, token, suite_size)?;
                    ids.insert(id);
                }
            }
            None => {
                let id = parse_id(token, token)?;
                check_bounds(id, token, suite_size)?;
                ids.insert(id);
            }
        }
    }

    Ok(ids.into_iter().collect())
}

fn parse_id(text: &str, token: &str) -> Result<u32, SelectionError> {
    let id: u32 = text
        .trim()
        .parse()
        .map_err(|_| SelectionError::InvalidSelection {
            token: token.to_string(),
            reason: format!("'{}' is not a task id", text.trim()),
        })?;
    if id == 0 {
        return Err(SelectionError::InvalidSelection {
            token: token.to_string(),
            reason: "task ids start at 1".to_string(),
        });
    }
    Ok(id)
}

fn check_bounds(id: u32, token: &str, suite_size: u32) -> Result<(), SelectionError> {
    if id > suite_size {
        return Err(SelectionError::InvalidSelection {
            token: token.to_string(),
            reason: format!("task id {} exceeds suite size {}", id, suite_size),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_resolves_to_full_suite() {
        assert_eq!(resolve(None, 5).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_all_keyword() {
        assert_eq!(resolve(Some("all"), 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(resolve(Some("ALL"), 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_ranges_and_ids_deduplicated_ascending() {
        assert_eq!(resolve(Some("1-3,2,5"), 10).unwrap(), vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_space_separated_ids() {
        assert_eq!(resolve(Some("9 1 4"), 10).unwrap(), vec![1, 4, 9]);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = resolve(Some("5-3"), 10).unwrap_err();
        assert!(err.to_string().contains("5-3"));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err = resolve(Some("abc"), 10).unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_out_of_bounds_rejected_not_clamped() {
        let err = resolve(Some("1,99"), 10).unwrap_err();
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn test_zero_id_rejected() {
        assert!(resolve(Some("0"), 10).is_err());
        assert!(resolve(Some("0-3"), 10).is_err());
    }

    #[test]
    fn test_overlapping_ranges_merge() {
        assert_eq!(resolve(Some("1-4,3-6"), 10).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }
}
