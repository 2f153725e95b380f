//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest display name accepted for participants, bosses and encounters.
pub const MAX_NAME_LENGTH: usize = 48;

/// Validates a display name: not blank once trimmed, at most
/// [`MAX_NAME_LENGTH`] characters.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("Ada")   // Ok
/// validate_display_name("   ")   // Err - blank
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("name_blank");
        err.message = Some("Name must not be blank".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > MAX_NAME_LENGTH {
        let mut err = ValidationError::new("name_length");
        err.message = Some(
            format!("Name must be at most {MAX_NAME_LENGTH} characters (got {length})").into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates the choices of a question: at least two, none blank, no
/// duplicates.
pub fn validate_choices(choices: &[String]) -> Result<(), ValidationError> {
    if choices.len() < 2 {
        let mut err = ValidationError::new("choices_count");
        err.message =
            Some(format!("A question needs at least 2 choices (got {})", choices.len()).into());
        return Err(err);
    }

    if choices.iter().any(|choice| choice.trim().is_empty()) {
        let mut err = ValidationError::new("choice_blank");
        err.message = Some("Choices must not be blank".into());
        return Err(err);
    }

    for (index, choice) in choices.iter().enumerate() {
        if choices[..index]
            .iter()
            .any(|other| other.trim() == choice.trim())
        {
            let mut err = ValidationError::new("choice_duplicate");
            err.message = Some(format!("Choice `{}` is listed twice", choice.trim()).into());
            return Err(err);
        }
    }

    Ok(())
}
