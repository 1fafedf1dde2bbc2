use crate::error::{Error, Result};

/// Longest accepted stream name.
pub const MAX_STREAM_NAME_LEN: usize = 255;

/// Check that a stream name is usable as a storage key component.
///
/// Names must be non-empty, at most 255 characters, and made of ASCII
/// letters, digits, `_` or `-`.
pub fn validate_stream_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidStreamName("stream name is empty".to_string()));
    }
    if name.len() > MAX_STREAM_NAME_LEN {
        return Err(Error::InvalidStreamName(format!(
            "stream name exceeds {} characters",
            MAX_STREAM_NAME_LEN
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(Error::InvalidStreamName(format!(
            "'{}' contains illegal character '{}'",
            name, c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_stream_name("events").is_ok());
        assert!(validate_stream_name("app-logs_2024").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_stream_name("").is_err());
        assert!(validate_stream_name("a/b").is_err());
        assert!(validate_stream_name("has space").is_err());
        assert!(validate_stream_name(&"x".repeat(256)).is_err());
    }
}
