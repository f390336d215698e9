pub mod errors;
pub mod ids;
pub mod message;

pub use errors::MessageError;
pub use ids::ClientId;
pub use message::{sanitize, validate, MAX_MESSAGE_SIZE};
