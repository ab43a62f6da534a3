use thiserror::Error;
use tracing::error_span;

use fedround_core::{message::Message, ClientId};

use crate::state_machine::{
    requests::{RequestError, StateMachineRequest},
    RequestSender,
};

/// Error returned by the [`MessageHandler`] methods.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::Error),
    #[error("state machine failed to handle message: {0}")]
    StateMachine(#[from] RequestError),
}

/// Forwards client messages to the state machine.
#[derive(Debug, Clone)]
pub struct MessageHandler {
    requests: RequestSender,
}

impl MessageHandler {
    pub fn new(requests: RequestSender) -> Self {
        Self { requests }
    }

    /// Registers a new client and returns its identifier.
    pub async fn register(&self) -> Result<ClientId, MessageError> {
        let client_id = ClientId::new();
        let span = error_span!("register", client_id = %client_id);
        self.requests
            .request(StateMachineRequest::Register(client_id), span)
            .await?;
        Ok(client_id)
    }

    /// Decodes a `bincode` encoded [`Message`] and hands it to the state machine.
    pub async fn handle_message(&self, data: &[u8]) -> Result<(), MessageError> {
        let message: Message = bincode::deserialize(data)?;
        let span = error_span!(
            "message",
            client_id = %message.client_id,
            round_id = message.round_id
        );
        self.requests.request(message.into(), span).await?;
        Ok(())
    }
}
