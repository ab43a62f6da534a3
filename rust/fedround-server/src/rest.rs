//! A HTTP API for the clients of the coordinator.
//!
//! | route                    | method | body                  | answer                   |
//! |--------------------------|--------|-----------------------|--------------------------|
//! | `/register`              | POST   |                       | `bincode` [`ClientId`]   |
//! | `/task?client_id=<uuid>` | GET    |                       | `bincode` [`Task`]       |
//! | `/message`               | POST   | `bincode` [`Message`] | status code only         |
//! | `/model`                 | GET    |                       | `bincode` [`Parameters`] |
//!
//! [`ClientId`]: fedround_core::ClientId
//! [`Task`]: fedround_core::message::Task
//! [`Message`]: fedround_core::message::Message
//! [`Parameters`]: fedround_core::Parameters

use std::convert::Infallible;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use warp::{
    http::StatusCode,
    reply::{self, Reply, Response},
    Filter,
};

use fedround_core::ClientId;

use crate::{
    services::{Fetcher, MessageError, MessageHandler},
    settings::ApiSettings,
    state_machine::RequestError,
};

#[derive(Deserialize, Serialize)]
struct TaskQuery {
    client_id: String,
}

/// Starts a HTTP server at the given address, serving the routes of [`routes`].
pub async fn serve(api_settings: ApiSettings, fetcher: Fetcher, message_handler: MessageHandler) {
    warp::serve(routes(fetcher, message_handler))
        .run(api_settings.bind_address)
        .await;
}

/// Builds the routes of the HTTP API.
///
/// * `fetcher`: fetcher for responding to task and model requests.
/// * `message_handler`: handler for registrations and client messages.
pub fn routes(
    fetcher: Fetcher,
    message_handler: MessageHandler,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let register = warp::path!("register")
        .and(warp::post())
        .and(with_message_handler(message_handler.clone()))
        .and_then(handle_register);

    let task = warp::path!("task")
        .and(warp::get())
        .and(warp::query::<TaskQuery>())
        .and_then(client_id)
        .and(with_fetcher(fetcher.clone()))
        .and_then(handle_task);

    let message = warp::path!("message")
        .and(warp::post())
        .and(warp::body::bytes())
        .and(with_message_handler(message_handler))
        .and_then(handle_message);

    let model = warp::path!("model")
        .and(warp::get())
        .and(with_fetcher(fetcher))
        .and_then(handle_model);

    register
        .or(task)
        .or(message)
        .or(model)
        .recover(handle_reject)
        .with(warp::log("http"))
}

/// Handles and responds to a registration.
async fn handle_register(handler: MessageHandler) -> Result<impl warp::Reply, Infallible> {
    Ok(match handler.register().await {
        Ok(client_id) => bincode_reply(&client_id),
        Err(e) => {
            warn!("failed to register client: {}", e);
            empty_reply(StatusCode::INTERNAL_SERVER_ERROR)
        }
    })
}

/// Handles and responds to a request for the current task of a client.
async fn handle_task(
    client_id: ClientId,
    fetcher: Fetcher,
) -> Result<impl warp::Reply, Infallible> {
    Ok(bincode_reply(&fetcher.task(&client_id)))
}

/// Handles and responds to a client message.
async fn handle_message(
    body: Bytes,
    handler: MessageHandler,
) -> Result<impl warp::Reply, Infallible> {
    let code = match handler.handle_message(&body).await {
        Ok(()) => StatusCode::OK,
        Err(MessageError::Decode(e)) => {
            warn!("failed to decode message: {}", e);
            StatusCode::BAD_REQUEST
        }
        Err(MessageError::StateMachine(e)) => {
            warn!("failed to handle message: {}", e);
            match e {
                RequestError::MessageRejected(_) | RequestError::MessageDiscarded => {
                    StatusCode::CONFLICT
                }
                RequestError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    };
    Ok(empty_reply(code))
}

/// Handles and responds to a request for the global model.
async fn handle_model(fetcher: Fetcher) -> Result<impl warp::Reply, Infallible> {
    Ok(match fetcher.model() {
        Some(model) => bincode_reply(model.as_ref()),
        None => empty_reply(StatusCode::NO_CONTENT),
    })
}

fn bincode_reply<T: Serialize>(value: &T) -> Response {
    match bincode::serialize(value) {
        Ok(bytes) => reply::with_header(bytes, "Content-Type", "application/octet-stream")
            .into_response(),
        Err(e) => {
            error!("failed to serialize response: {}", e);
            empty_reply(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// reply with empty body; the status code is the interesting part
fn empty_reply(code: StatusCode) -> Response {
    reply::with_status(Vec::new(), code).into_response()
}

/// Converts a message handler into a `warp` filter.
fn with_message_handler(
    handler: MessageHandler,
) -> impl Filter<Extract = (MessageHandler,), Error = Infallible> + Clone {
    warp::any().map(move || handler.clone())
}

/// Converts a data fetcher into a `warp` filter.
fn with_fetcher(fetcher: Fetcher) -> impl Filter<Extract = (Fetcher,), Error = Infallible> + Clone {
    warp::any().map(move || fetcher.clone())
}

/// Extracts a client ID from the url query string.
async fn client_id(query: TaskQuery) -> Result<ClientId, warp::Rejection> {
    query
        .client_id
        .parse()
        .map_err(|_| warp::reject::custom(InvalidClientId))
}

#[derive(Debug)]
struct InvalidClientId;

impl warp::reject::Reject for InvalidClientId {}

/// Handles `warp` rejections of bad requests.
async fn handle_reject(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let code = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if let Some(InvalidClientId) = err.find() {
        StatusCode::BAD_REQUEST
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        StatusCode::BAD_REQUEST
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        error!("unhandled rejection: {:?}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok(empty_reply(code))
}

#[cfg(test)]
mod tests {
    use fedround_core::message::{Message, Payload, Task};

    use super::*;
    use crate::{
        state_machine::tests::utils::{round_settings, strategy_settings},
        state_machine::StateMachineInitializer,
        strategy::FedAvg,
    };

    fn init() -> (
        impl Filter<Extract = impl Reply, Error = Infallible> + Clone,
        crate::state_machine::StateMachine,
    ) {
        let (state_machine, request_tx, event_subscriber) =
            StateMachineInitializer::new(round_settings(), FedAvg::new(strategy_settings()))
                .init();
        let routes = routes(
            Fetcher::new(&event_subscriber),
            MessageHandler::new(request_tx),
        );
        (routes, state_machine)
    }

    #[tokio::test]
    async fn test_register_and_poll() {
        let (routes, state_machine) = init();
        let _state_machine = tokio::spawn(state_machine.run());

        let response = warp::test::request()
            .method("POST")
            .path("/register")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let client_id: ClientId = bincode::deserialize(response.body()).unwrap();

        let response = warp::test::request()
            .path(&format!("/task?client_id={}", client_id))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let task: Task = bincode::deserialize(response.body()).unwrap();
        // a single client is not enough to start
        assert_eq!(task, Task::Wait);

        let response = warp::test::request().path("/model").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let (routes, state_machine) = init();
        let _state_machine = tokio::spawn(state_machine.run());

        let response = warp::test::request()
            .path("/task?client_id=not-a-uuid")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = warp::test::request()
            .method("POST")
            .path("/message")
            .body(vec![0xff; 3])
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = warp::test::request().path("/unknown").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unexpected_message_is_rejected() {
        let (routes, state_machine) = init();
        let _state_machine = tokio::spawn(state_machine.run());

        let message = Message {
            client_id: ClientId::new(),
            round_id: 0,
            payload: Payload::Failure("nothing to do".to_string()),
        };
        let response = warp::test::request()
            .method("POST")
            .path("/message")
            .body(bincode::serialize(&message).unwrap())
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
