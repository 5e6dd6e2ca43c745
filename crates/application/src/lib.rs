pub mod error;
pub mod gateway;
pub mod membership;
pub mod presence;
pub mod read_state;
pub mod registry;
pub mod relay;
pub mod typing;

pub use error::ApplicationError;
pub use gateway::{Gateway, GatewayError, PersistenceGateway};
pub use membership::MembershipRelay;
pub use presence::PresenceTracker;
pub use read_state::{MarkSeenOutcome, ReadStateEngine};
pub use registry::{ConnectionRegistry, EventSender, RemovedConnection};
pub use relay::{MessageRelay, SendMessageRequest};
pub use typing::TypingRelay;
