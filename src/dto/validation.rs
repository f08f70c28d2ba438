//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::dao::models::MatchFilters;

/// Upper bound accepted for a declared or filtered age.
pub const MAX_AGE: u8 = 120;

/// Validates that an age range is ordered and within bounds.
///
/// # Examples
///
/// ```ignore
/// validate_filters(&MatchFilters { min_age: Some(20), max_age: Some(30), ..Default::default() }) // Ok
/// validate_filters(&MatchFilters { min_age: Some(30), max_age: Some(20), ..Default::default() }) // Err
/// ```
pub fn validate_filters(filters: &MatchFilters) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (filters.min_age, filters.max_age) {
        if min > max {
            let mut err = ValidationError::new("age_range_order");
            err.message = Some(format!("min_age {min} is greater than max_age {max}").into());
            return Err(err);
        }
    }

    let out_of_bounds = [filters.min_age, filters.max_age]
        .into_iter()
        .flatten()
        .any(|age| age > MAX_AGE);
    if out_of_bounds {
        let mut err = ValidationError::new("age_range_bounds");
        err.message = Some(format!("ages must not exceed {MAX_AGE}").into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a free-text field is not blank once trimmed.
pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("value must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filters_valid() {
        assert!(validate_filters(&MatchFilters::default()).is_ok());
        assert!(
            validate_filters(&MatchFilters {
                min_age: Some(18),
                max_age: Some(18),
                ..MatchFilters::default()
            })
            .is_ok()
        );
    }

    #[test]
    fn test_validate_filters_inverted_range() {
        assert!(
            validate_filters(&MatchFilters {
                min_age: Some(40),
                max_age: Some(20),
                ..MatchFilters::default()
            })
            .is_err()
        );
    }

    #[test]
    fn test_validate_filters_out_of_bounds() {
        assert!(
            validate_filters(&MatchFilters {
                max_age: Some(200),
                ..MatchFilters::default()
            })
            .is_err()
        );
    }

    #[test]
    fn test_validate_not_blank() {
        assert!(validate_not_blank("hi").is_ok());
        assert!(validate_not_blank("   ").is_err());
        assert!(validate_not_blank("").is_err());
    }
}
