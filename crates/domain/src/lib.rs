pub mod errors;
pub mod events;
pub mod message;
pub mod read_marker;
pub mod value_objects;

pub use errors::{DomainError, DomainResult};
pub use events::ServerEvent;
pub use message::{AttachmentInfo, DeliveryStatus, Message};
pub use read_marker::ReadMarker;
pub use value_objects::{ConnectionId, ConversationId, MessageId, Timestamp, UserId};
