//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::services::room_code;

/// Validates that a room code has the right length and alphabet, ignoring case.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("K7QM2X") // Ok
/// validate_room_code("k7qm2x") // Ok - case-insensitive
/// validate_room_code("K7QM2")  // Err - too short
/// validate_room_code("K7QM0X") // Err - `0` is not in the alphabet
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.chars().count() != room_code::CODE_LENGTH {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {} characters (got {})",
                room_code::CODE_LENGTH,
                code.chars().count()
            )
            .into(),
        );
        return Err(err);
    }

    if !room_code::validate(code) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code contains characters outside the room code alphabet".into());
        return Err(err);
    }

    Ok(())
}
