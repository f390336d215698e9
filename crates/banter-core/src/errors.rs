/// Errors raised while screening inbound payloads.
///
/// These are local to a single connection's reader: the resolution is always
/// to drop that connection, never to surface anything to the rest of the room.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("message of {len} bytes exceeds the {limit}-byte limit")]
    TooLarge { len: usize, limit: usize },
}
