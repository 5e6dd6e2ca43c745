use std::sync::Arc;

use application::{
    ConnectionRegistry, Gateway, MembershipRelay, MessageRelay, PresenceTracker, ReadStateEngine,
    TypingRelay,
};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub relay: Arc<MessageRelay>,
    pub read_state: Arc<ReadStateEngine>,
    pub typing: Arc<TypingRelay>,
    pub membership: Arc<MembershipRelay>,
    pub gateway: Gateway,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceTracker>,
        relay: Arc<MessageRelay>,
        read_state: Arc<ReadStateEngine>,
        typing: Arc<TypingRelay>,
        membership: Arc<MembershipRelay>,
        gateway: Gateway,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            registry,
            presence,
            relay,
            read_state,
            typing,
            membership,
            gateway,
            jwt_service,
        }
    }
}
