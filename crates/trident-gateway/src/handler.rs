//! Axum route handlers for the `OpenAI`, Anthropic and Gemini-native client protocols

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use futures_util::{Stream, StreamExt, stream};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use trident_core::HttpError;

use crate::convert::EncodeRequest;
use crate::convert::anthropic::{AnthropicStreamEncoder, to_anthropic_response};
use crate::convert::gemini::{GeminiNativeRequest, GeminiStreamEncoder, to_gemini_response};
use crate::convert::openai::{OpenAiStreamEncoder, to_openai_response};
use crate::error::GatewayError;
use crate::gateway::{EventStream, Gateway};
use crate::protocol::anthropic::{AnthropicErrorDetail, AnthropicRequest, AnthropicStreamEvent};
use crate::protocol::gemini::GeminiRequest;
use crate::protocol::openai::{OpenAiModel, OpenAiModelList, OpenAiRequest};
use crate::types::StreamEvent;

/// Build the router serving every client protocol
pub fn gateway_router(gateway: Gateway) -> Router {
    Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", routing::post(openai_chat_completions))
        .route("/v1/models", routing::get(openai_list_models))
        // Anthropic-compatible endpoint
        .route("/v1/messages", routing::post(anthropic_messages))
        // Gemini-native endpoints
        .route("/v1beta/models", routing::get(gemini_list_models))
        .route("/v1beta/models/{action}", routing::post(gemini_generate))
        .with_state(gateway)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// -- OpenAI-compatible handlers --

/// Handle `POST /v1/chat/completions`
async fn openai_chat_completions(State(gateway): State<Gateway>, Json(request): Json<OpenAiRequest>) -> Response {
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = unix_now();
    let expose = gateway.expose_signatures();

    if request.is_stream() {
        let model = request.model().to_owned();
        return match gateway.complete_stream(request, CancellationToken::new()).await {
            Ok(events) => openai_stream_response(events, OpenAiStreamEncoder::new(id, model, created, expose))
                .into_response(),
            Err(e) => error_to_openai_response(&e),
        };
    }

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    match gateway.complete(request, cancel).await {
        Ok(decoded) => Json(to_openai_response(&decoded, &id, created, expose)).into_response(),
        Err(e) => error_to_openai_response(&e),
    }
}

/// Handle `GET /v1/models`
async fn openai_list_models(State(gateway): State<Gateway>) -> Response {
    let models = match gateway.models(CancellationToken::new()).await {
        Ok(models) => models,
        Err(e) => return error_to_openai_response(&e),
    };

    let created = unix_now();
    let data = models
        .iter()
        .map(|model| OpenAiModel {
            id: model.id.clone(),
            object: "model".to_owned(),
            created,
            owned_by: "trident".to_owned(),
        })
        .collect();

    Json(OpenAiModelList {
        object: "list".to_owned(),
        data,
    })
    .into_response()
}

/// Build a streaming SSE response in `OpenAI` format, terminated by `[DONE]`
fn openai_stream_response(
    events: EventStream,
    mut encoder: OpenAiStreamEncoder,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let sse = events.flat_map(move |result| {
        let mut out = Vec::with_capacity(2);
        match result {
            Ok(event) => {
                let done = matches!(event, StreamEvent::Done { .. });
                if let Some(chunk) = encoder.encode(event) {
                    out.push(Event::default().json_data(chunk));
                }
                if done {
                    out.push(Ok(Event::default().data("[DONE]")));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "stream failed");
                out.push(Event::default().json_data(openai_error_body(&e)));
            }
        }
        stream::iter(out)
    });

    Sse::new(sse).keep_alive(KeepAlive::default())
}

fn openai_error_body(error: &GatewayError) -> Value {
    json!({
        "error": {
            "message": error.client_message(),
            "type": error.error_type(),
            "code": error.upstream_status(),
        }
    })
}

/// Convert a gateway error to an `OpenAI`-style JSON error response
fn error_to_openai_response(error: &GatewayError) -> Response {
    (error.status_code(), Json(openai_error_body(error))).into_response()
}

// -- Anthropic-compatible handler --

/// Handle `POST /v1/messages`
async fn anthropic_messages(State(gateway): State<Gateway>, Json(request): Json<AnthropicRequest>) -> Response {
    let id = format!("msg_{}", uuid::Uuid::new_v4().simple());
    let expose = gateway.expose_signatures();

    if request.is_stream() {
        let model = request.model().to_owned();
        return match gateway.complete_stream(request, CancellationToken::new()).await {
            Ok(events) => {
                anthropic_stream_response(events, AnthropicStreamEncoder::new(id, model, expose)).into_response()
            }
            Err(e) => error_to_anthropic_response(&e),
        };
    }

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    match gateway.complete(request, cancel).await {
        Ok(decoded) => Json(to_anthropic_response(&decoded, &id, expose)).into_response(),
        Err(e) => error_to_anthropic_response(&e),
    }
}

/// Build a streaming SSE response in Anthropic format
fn anthropic_stream_response(
    events: EventStream,
    mut encoder: AnthropicStreamEncoder,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let sse = events.flat_map(move |result| {
        let events = match result {
            Ok(event) => encoder.encode(event),
            Err(e) => {
                tracing::warn!(error = %e, "stream failed");
                vec![AnthropicStreamEvent::Error {
                    error: AnthropicErrorDetail {
                        error_type: e.error_type().to_owned(),
                        message: e.client_message(),
                    },
                }]
            }
        };

        stream::iter(
            events
                .into_iter()
                .map(|event| Event::default().event(event.event_type()).json_data(event)),
        )
    });

    Sse::new(sse).keep_alive(KeepAlive::default())
}

/// Convert a gateway error to an Anthropic-style JSON error response
fn error_to_anthropic_response(error: &GatewayError) -> Response {
    let body = json!({
        "type": "error",
        "error": {
            "type": error.error_type(),
            "message": error.client_message(),
        }
    });

    (error.status_code(), Json(body)).into_response()
}

// -- Gemini-native handlers --

/// Split `{model}:{method}` from the last path segment
fn parse_action(action: &str) -> Option<(&str, bool)> {
    let (model, method) = action.rsplit_once(':')?;
    if model.is_empty() {
        return None;
    }

    match method {
        "generateContent" => Some((model, false)),
        "streamGenerateContent" => Some((model, true)),
        _ => None,
    }
}

/// Handle `POST /v1beta/models/{model}:generateContent` and `:streamGenerateContent`
async fn gemini_generate(
    State(gateway): State<Gateway>,
    Path(action): Path<String>,
    Json(body): Json<GeminiRequest>,
) -> Response {
    let Some((model, stream)) = parse_action(&action) else {
        return (
            StatusCode::NOT_FOUND,
            Json(gemini_error_body(StatusCode::NOT_FOUND, &format!("unknown method: {action}"))),
        )
            .into_response();
    };

    let request = GeminiNativeRequest {
        model: model.to_owned(),
        stream,
        body,
    };
    let expose = gateway.expose_signatures();

    if stream {
        return match gateway.complete_stream(request, CancellationToken::new()).await {
            Ok(events) => gemini_stream_response(events, GeminiStreamEncoder::new(expose)).into_response(),
            Err(e) => error_to_gemini_response(&e),
        };
    }

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    match gateway.complete(request, cancel).await {
        Ok(decoded) => Json(to_gemini_response(&decoded, expose)).into_response(),
        Err(e) => error_to_gemini_response(&e),
    }
}

/// Handle `GET /v1beta/models`
async fn gemini_list_models(State(gateway): State<Gateway>) -> Response {
    match gateway.models(CancellationToken::new()).await {
        Ok(models) => {
            let models: Vec<Value> = models
                .iter()
                .map(|model| {
                    json!({
                        "name": format!("models/{}", model.id),
                        "displayName": model.display_name.as_deref().unwrap_or(&model.id),
                        "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
                    })
                })
                .collect();
            Json(json!({ "models": models })).into_response()
        }
        Err(e) => error_to_gemini_response(&e),
    }
}

fn gemini_stream_response(
    events: EventStream,
    mut encoder: GeminiStreamEncoder,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let sse = events.filter_map(move |result| {
        let event = match result {
            Ok(event) => encoder.encode(event).map(|chunk| Event::default().json_data(chunk)),
            Err(e) => {
                tracing::warn!(error = %e, "stream failed");
                Some(Event::default().json_data(gemini_error_body(e.status_code(), &e.client_message())))
            }
        };
        std::future::ready(event)
    });

    Sse::new(sse).keep_alive(KeepAlive::default())
}

/// Canonical status name Google APIs put next to the numeric code
const fn gemini_status(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        499 => "CANCELLED",
        503 => "UNAVAILABLE",
        504 => "DEADLINE_EXCEEDED",
        500..=599 => "INTERNAL",
        _ => "UNKNOWN",
    }
}

fn gemini_error_body(status: StatusCode, message: &str) -> Value {
    json!({
        "error": {
            "code": status.as_u16(),
            "message": message,
            "status": gemini_status(status),
        }
    })
}

/// Convert a gateway error to a Google-style JSON error response
fn error_to_gemini_response(error: &GatewayError) -> Response {
    let status = error.status_code();
    (status, Json(gemini_error_body(status, &error.client_message()))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_actions() {
        assert_eq!(parse_action("gemini-2.5-pro:generateContent"), Some(("gemini-2.5-pro", false)));
        assert_eq!(
            parse_action("gemini-2.5-pro:streamGenerateContent"),
            Some(("gemini-2.5-pro", true))
        );
        assert_eq!(parse_action("gemini-2.5-pro:countTokens"), None);
        assert_eq!(parse_action("gemini-2.5-pro"), None);
        assert_eq!(parse_action(":generateContent"), None);
    }

    #[test]
    fn error_envelopes_keep_upstream_status() {
        let error = GatewayError::BadRequest {
            status: 429,
            body: "quota".to_owned(),
        };

        let openai = openai_error_body(&error);
        assert_eq!(openai["error"]["code"], 429);
        assert_eq!(openai["error"]["type"], "upstream_bad_request");
        assert!(openai["error"]["message"].as_str().unwrap().contains("quota"));

        let gemini = gemini_error_body(error.status_code(), &error.client_message());
        assert_eq!(gemini["error"]["code"], 429);
        assert_eq!(gemini["error"]["status"], "RESOURCE_EXHAUSTED");
    }

    #[test]
    fn openai_code_is_null_without_upstream_status() {
        assert!(openai_error_body(&GatewayError::NoToken)["error"]["code"].is_null());
    }
}
