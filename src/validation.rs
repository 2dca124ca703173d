//! Shared validation rules
//!
//! Pure functions used by every service that accepts external input. Domain
//! errors are distinguished so handlers can map them to stable codes.

use crate::error::{Error, Result};
use crate::models::{ActionType, Algorithm, TimeWindow, SYNC_EVENT_TYPES};

/// Default page size when the requested limit is out of range
pub const DEFAULT_LIMIT: i64 = 20;

/// Largest page size a caller may request
pub const MAX_LIMIT: i64 = 100;

/// Reject empty user identifiers
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(Error::InvalidUserId);
    }
    Ok(())
}

/// Reject non-positive bookmark identifiers
pub fn validate_bookmark_id(bookmark_id: i64) -> Result<()> {
    if bookmark_id <= 0 {
        return Err(Error::InvalidBookmarkId);
    }
    Ok(())
}

/// Parse and validate an action type
pub fn validate_action_type(value: &str) -> Result<ActionType> {
    ActionType::parse(value)
}

/// Reject scores outside [0, 1]
pub fn validate_score(score: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&score) || score.is_nan() {
        return Err(Error::InvalidScore { value: score });
    }
    Ok(())
}

/// Clamp a requested page size: out-of-range values fall back to the default
pub fn validate_limit(limit: i64) -> i64 {
    if limit <= 0 || limit > MAX_LIMIT {
        DEFAULT_LIMIT
    } else {
        limit
    }
}

/// Parse and validate a trending time window
pub fn validate_time_window(value: &str) -> Result<TimeWindow> {
    TimeWindow::parse(value)
}

/// Parse a recommendation algorithm and reject non-generatable ones
pub fn validate_algorithm(value: &str) -> Result<Algorithm> {
    let algorithm = Algorithm::parse(value)?;
    if !Algorithm::GENERATABLE.contains(&algorithm) {
        return Err(Error::InvalidAlgorithm {
            value: value.to_string(),
        });
    }
    Ok(algorithm)
}

/// Validate a sync event resource type against the allowed set
pub fn validate_sync_event_type(value: &str) -> Result<()> {
    if !SYNC_EVENT_TYPES.contains(&value) {
        return Err(Error::InvalidSyncEventType {
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id() {
        assert!(validate_user_id("u-1").is_ok());
        assert!(matches!(validate_user_id(""), Err(Error::InvalidUserId)));
    }

    #[test]
    fn test_bookmark_id() {
        assert!(validate_bookmark_id(1).is_ok());
        assert!(matches!(
            validate_bookmark_id(0),
            Err(Error::InvalidBookmarkId)
        ));
        assert!(matches!(
            validate_bookmark_id(-3),
            Err(Error::InvalidBookmarkId)
        ));
    }

    #[test]
    fn test_limit_clamp() {
        assert_eq!(validate_limit(0), DEFAULT_LIMIT);
        assert_eq!(validate_limit(-5), DEFAULT_LIMIT);
        assert_eq!(validate_limit(150), DEFAULT_LIMIT);
        assert_eq!(validate_limit(100), 100);
        assert_eq!(validate_limit(1), 1);
        assert_eq!(validate_limit(20), 20);
    }

    #[test]
    fn test_score_bounds() {
        assert!(validate_score(0.0).is_ok());
        assert!(validate_score(1.0).is_ok());
        assert!(validate_score(1.0000001).is_err());
        assert!(validate_score(-0.0000001).is_err());
        assert!(validate_score(f64::NAN).is_err());
    }

    #[test]
    fn test_action_type() {
        assert_eq!(validate_action_type("view").unwrap(), ActionType::View);
        assert!(validate_action_type("buy").is_err());
    }

    #[test]
    fn test_time_window() {
        assert_eq!(
            validate_time_window("weekly").unwrap(),
            TimeWindow::Weekly
        );
        assert!(validate_time_window("yearly").is_err());
    }

    #[test]
    fn test_algorithm() {
        assert_eq!(
            validate_algorithm("hybrid").unwrap(),
            Algorithm::Hybrid
        );
        // A stored reason type, not a generatable strategy
        assert!(validate_algorithm("similar_users").is_err());
        assert!(validate_algorithm("ml").is_err());
    }

    #[test]
    fn test_sync_event_type() {
        assert!(validate_sync_event_type("bookmark").is_ok());
        assert!(validate_sync_event_type("collection").is_ok());
        assert!(validate_sync_event_type("avatar").is_err());
    }
}
