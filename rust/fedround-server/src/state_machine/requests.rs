//! This module provides the `StateMachineRequest`, `RequestSender` and `RequestReceiver` types.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use derive_more::From;
use displaydoc::Display;
use futures::{future::FutureExt, Stream};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, Span};

use fedround_core::{
    message::{EvaluateRes, FitRes, Message, Payload},
    ClientId,
    Parameters,
};

/// Errors which can occur while the state machine handles a request.
#[derive(Debug, Display, Error)]
pub enum RequestError {
    /// The message was rejected: {0}.
    MessageRejected(&'static str),
    /// The message was discarded.
    MessageDiscarded,
    /// The request could not be processed due to an internal error: {0}.
    InternalError(&'static str),
}

/// A request to hand in the initial parameters.
#[derive(Debug)]
pub struct ParametersRequest {
    pub client_id: ClientId,
    pub round_id: u64,
    pub parameters: Parameters,
}

/// A request to hand in the result of a local training step.
#[derive(Debug)]
pub struct FitRequest {
    pub client_id: ClientId,
    pub round_id: u64,
    pub result: FitRes,
}

/// A request to hand in the result of a local evaluation step.
#[derive(Debug)]
pub struct EvaluateRequest {
    pub client_id: ClientId,
    pub round_id: u64,
    pub result: EvaluateRes,
}

/// A request to report that a client failed its task.
#[derive(Debug)]
pub struct FailureRequest {
    pub client_id: ClientId,
    pub round_id: u64,
    pub reason: String,
}

/// A [`StateMachine`] request.
///
/// [`StateMachine`]: crate::state_machine::StateMachine
#[derive(Debug)]
pub enum StateMachineRequest {
    Register(ClientId),
    Disconnect(ClientId),
    Parameters(ParametersRequest),
    Fit(FitRequest),
    Evaluate(EvaluateRequest),
    Failure(FailureRequest),
}

impl From<Message> for StateMachineRequest {
    fn from(message: Message) -> Self {
        let Message {
            client_id,
            round_id,
            payload,
        } = message;
        match payload {
            Payload::Parameters(parameters) => StateMachineRequest::Parameters(ParametersRequest {
                client_id,
                round_id,
                parameters,
            }),
            Payload::Fit(result) => StateMachineRequest::Fit(FitRequest {
                client_id,
                round_id,
                result,
            }),
            Payload::Evaluate(result) => StateMachineRequest::Evaluate(EvaluateRequest {
                client_id,
                round_id,
                result,
            }),
            Payload::Failure(reason) => StateMachineRequest::Failure(FailureRequest {
                client_id,
                round_id,
                reason,
            }),
            Payload::Disconnect => StateMachineRequest::Disconnect(client_id),
        }
    }
}

/// A handle to send requests to the [`StateMachine`].
///
/// [`StateMachine`]: crate::state_machine::StateMachine
#[derive(Clone, From, Debug)]
pub struct RequestSender(mpsc::UnboundedSender<(StateMachineRequest, Span, ResponseSender)>);

impl RequestSender {
    /// Sends a request to the [`StateMachine`].
    ///
    /// # Errors
    /// Fails if the [`StateMachine`] has already shut down and the `Request` channel has been
    /// closed as a result.
    ///
    /// [`StateMachine`]: crate::state_machine::StateMachine
    pub async fn request(&self, req: StateMachineRequest, span: Span) -> Result<(), RequestError> {
        let (resp_tx, resp_rx) = oneshot::channel::<Result<(), RequestError>>();
        self.0.send((req, span, resp_tx)).map_err(|_| {
            RequestError::InternalError(
                "failed to send request to the state machine: state machine is shutting down",
            )
        })?;
        resp_rx.await.map_err(|_| {
            RequestError::InternalError("failed to receive response from the state machine")
        })?
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// A channel for the state machine to send the response to a [`StateMachineRequest`].
pub(in crate::state_machine) type ResponseSender = oneshot::Sender<Result<(), RequestError>>;

/// The receiver half of the `Request` channel that is used by the [`StateMachine`] to receive
/// requests.
///
/// [`StateMachine`]: crate::state_machine::StateMachine
#[derive(From, Debug)]
pub struct RequestReceiver(mpsc::UnboundedReceiver<(StateMachineRequest, Span, ResponseSender)>);

impl Stream for RequestReceiver {
    type Item = (StateMachineRequest, Span, ResponseSender);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        trace!("RequestReceiver: polling");
        Pin::new(&mut self.get_mut().0).poll_recv(cx)
    }
}

impl RequestReceiver {
    /// Creates a new `Request` channel and returns the [`RequestReceiver`] as well as the
    /// [`RequestSender`] half.
    pub fn new() -> (Self, RequestSender) {
        let (tx, rx) = mpsc::unbounded_channel::<(StateMachineRequest, Span, ResponseSender)>();
        (RequestReceiver::from(rx), RequestSender::from(tx))
    }

    /// Closes the `Request` channel. Requests already queued can still be received.
    pub fn close(&mut self) {
        self.0.close()
    }

    /// Receives the next request.
    pub async fn recv(&mut self) -> Option<(StateMachineRequest, Span, ResponseSender)> {
        self.0.recv().await
    }

    /// Tries to retrieve the next request without blocking.
    ///
    /// Returns `None` if no request is pending and `Some(None)` if the channel is closed.
    pub fn try_recv(&mut self) -> Option<Option<(StateMachineRequest, Span, ResponseSender)>> {
        self.0.recv().now_or_never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_is_answered() {
        let (mut rx, tx) = RequestReceiver::new();
        let client_id = ClientId::new();

        let answer = async {
            let (req, _span, resp_tx) = rx.recv().await.unwrap();
            assert!(matches!(req, StateMachineRequest::Register(id) if id == client_id));
            resp_tx.send(Ok(())).unwrap();
        };
        let (response, _) = tokio::join!(
            tx.request(StateMachineRequest::Register(client_id), Span::none()),
            answer
        );
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_request_fails_after_close() {
        let (mut rx, tx) = RequestReceiver::new();
        rx.close();
        assert!(tx.is_closed());
        assert!(matches!(
            tx.request(StateMachineRequest::Disconnect(ClientId::new()), Span::none())
                .await,
            Err(RequestError::InternalError(_))
        ));
        assert!(matches!(rx.try_recv(), Some(None)));
    }

    #[test]
    fn test_message_conversion() {
        let client_id = ClientId::new();
        let req = StateMachineRequest::from(Message {
            client_id,
            round_id: 4,
            payload: Payload::Failure("diverged".to_string()),
        });
        match req {
            StateMachineRequest::Failure(FailureRequest {
                client_id: id,
                round_id,
                reason,
            }) => {
                assert_eq!(id, client_id);
                assert_eq!(round_id, 4);
                assert_eq!(reason, "diverged");
            }
            _ => panic!("unexpected request"),
        }
    }
}
