use crate::errors::MessageError;

/// Maximum accepted size of a single inbound message, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Normalize an inbound payload before it is relayed: embedded line breaks
/// become spaces, leading/trailing whitespace is dropped.
pub fn sanitize(raw: &str) -> String {
    raw.replace('\n', " ").trim().to_owned()
}

/// Reject payloads over [`MAX_MESSAGE_SIZE`]. The caller is expected to drop
/// the connection on failure rather than truncate.
pub fn validate(raw: &str) -> Result<(), MessageError> {
    if raw.len() > MAX_MESSAGE_SIZE {
        return Err(MessageError::TooLarge {
            len: raw.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}
