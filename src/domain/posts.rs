//! Validation rules for post and comment authoring.

use crate::domain::error::DomainError;

/// Message shown when a post is submitted with no text.
pub const EMPTY_POST_TEXT_MESSAGE: &str = "Add some text to the post.";

/// Message shown when a comment is submitted with no text.
pub const EMPTY_COMMENT_TEXT_MESSAGE: &str = "Add some text to the comment.";

/// Message shown when an uploaded file does not decode as a raster image.
pub const INVALID_IMAGE_MESSAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// Validate post text, returning the trimmed body.
pub fn validate_post_text(text: &str) -> Result<String, DomainError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(EMPTY_POST_TEXT_MESSAGE));
    }
    Ok(trimmed.to_string())
}

/// Validate comment text, returning the trimmed body.
pub fn validate_comment_text(text: &str) -> Result<String, DomainError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(EMPTY_COMMENT_TEXT_MESSAGE));
    }
    Ok(trimmed.to_string())
}

/// Ensure an uploaded payload decodes as a raster image.
///
/// The check inspects the header bytes only; a payload that `imagesize`
/// cannot identify is rejected with the fixed form message so the post
/// stays unsaved.
pub fn validate_image_payload(bytes: &[u8]) -> Result<(), DomainError> {
    match imagesize::blob_size(bytes) {
        Ok(_) => Ok(()),
        Err(_) => Err(DomainError::validation(INVALID_IMAGE_MESSAGE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_text_is_trimmed() {
        let text = validate_post_text("  Курт Кобейн жив  ").expect("valid text");
        assert_eq!(text, "Курт Кобейн жив");
    }

    #[test]
    fn whitespace_only_post_text_is_rejected() {
        let err = validate_post_text("   \n\t").expect_err("empty text rejected");
        assert!(err.to_string().contains(EMPTY_POST_TEXT_MESSAGE));
    }

    #[test]
    fn empty_comment_text_is_rejected() {
        let err = validate_comment_text("").expect_err("empty text rejected");
        assert!(err.to_string().contains(EMPTY_COMMENT_TEXT_MESSAGE));
    }

    #[test]
    fn png_header_passes_image_validation() {
        // Smallest payload imagesize can measure: PNG signature + IHDR.
        let mut png: Vec<u8> = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(&[0x00, 0x00, 0x00, 0x0D]);
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]); // width 1
        png.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]); // height 1
        png.extend_from_slice(&[0x08, 0x06, 0x00, 0x00, 0x00]);
        assert!(validate_image_payload(&png).is_ok());
    }

    #[test]
    fn text_payload_fails_image_validation() {
        let err = validate_image_payload(b"definitely not an image").expect_err("rejected");
        assert_eq!(err.to_string(), INVALID_IMAGE_MESSAGE);
    }
}
