//! HTTP transport for the booking conversation.
//!
//! - `POST   /sessions/{operator_id}`: begin (or resume) a session for a patient
//! - `POST   /sessions/{operator_id}/messages`: send one nurse message
//! - `POST   /sessions/{operator_id}/reset`: start the booking over for the same patient
//! - `POST   /sessions/{operator_id}/patient`: switch to another patient
//! - `DELETE /sessions/{operator_id}`: disconnect; the session stays resumable

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use careline_agent::{SessionError, SessionService, SessionStarted, TurnReply};
use careline_core::domain::patient::PatientId;
use careline_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionsState {
    sessions: SessionService,
}

#[derive(Debug, Deserialize)]
pub struct BeginRequest {
    pub patient_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn router(sessions: SessionService) -> Router {
    Router::new()
        .route("/sessions/{operator_id}", post(begin_session).delete(end_session))
        .route("/sessions/{operator_id}/messages", post(send_message))
        .route("/sessions/{operator_id}/reset", post(reset_session))
        .route("/sessions/{operator_id}/patient", post(switch_patient))
        .with_state(SessionsState { sessions })
}

async fn begin_session(
    Path(operator_id): Path<String>,
    State(state): State<SessionsState>,
    Json(body): Json<BeginRequest>,
) -> ApiResult<SessionStarted> {
    let started =
        state.sessions.begin(&operator_id, PatientId(body.patient_id)).await.map_err(session_error)?;
    info!(
        event_name = "transport.session.begin",
        operator_id = %operator_id,
        patient_id = body.patient_id,
        resumed = started.greeting.is_none(),
        "session opened over http"
    );
    Ok(Json(started))
}

async fn send_message(
    Path(operator_id): Path<String>,
    State(state): State<SessionsState>,
    Json(body): Json<MessageRequest>,
) -> ApiResult<TurnReply> {
    let text = body.text.trim();
    if text.is_empty() {
        return Err(bad_request("message text is required"));
    }

    let reply = state.sessions.message(&operator_id, text).await.map_err(session_error)?;
    Ok(Json(reply))
}

async fn reset_session(
    Path(operator_id): Path<String>,
    State(state): State<SessionsState>,
) -> ApiResult<SessionStarted> {
    let started = state.sessions.reset(&operator_id).await.map_err(session_error)?;
    Ok(Json(started))
}

async fn switch_patient(
    Path(operator_id): Path<String>,
    State(state): State<SessionsState>,
    Json(body): Json<BeginRequest>,
) -> ApiResult<SessionStarted> {
    let started = state
        .sessions
        .switch_subject(&operator_id, PatientId(body.patient_id))
        .await
        .map_err(session_error)?;
    info!(
        event_name = "transport.session.switch_patient",
        operator_id = %operator_id,
        patient_id = body.patient_id,
        "patient switched over http"
    );
    Ok(Json(started))
}

async fn end_session(
    Path(operator_id): Path<String>,
    State(state): State<SessionsState>,
) -> StatusCode {
    state.sessions.end(&operator_id).await;
    StatusCode::NO_CONTENT
}

fn bad_request(message: &str) -> (StatusCode, Json<ApiError>) {
    interface_error(InterfaceError::BadRequest {
        message: message.to_string(),
        correlation_id: Uuid::new_v4().to_string(),
    })
}

fn session_error(error: SessionError) -> (StatusCode, Json<ApiError>) {
    interface_error(ApplicationError::from(error).into_interface(Uuid::new_v4().to_string()))
}

fn interface_error(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let (status, message) = match &error {
        InterfaceError::BadRequest { message, .. } => (StatusCode::BAD_REQUEST, message.clone()),
        InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, message.clone()),
        InterfaceError::ServiceUnavailable { .. } | InterfaceError::Internal { .. } => {
            error!(
                event_name = "transport.session.error",
                correlation_id = error.correlation_id(),
                error = %error,
                "session operation failed"
            );
            let status = if matches!(error, InterfaceError::ServiceUnavailable { .. }) {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, format!("{} (reference {})", error.user_message(), error.correlation_id()))
        }
    };
    (status, Json(ApiError { error: message }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        extract::{Path, State},
        http::{Request, StatusCode},
        Json,
    };
    use careline_agent::{CapabilityCall, Completion, ScriptedProvider};
    use careline_core::config::AppConfig;
    use careline_core::domain::booking::capability;
    use careline_db::{connect_with_settings, migrations, DemoDataset};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{
        begin_session, router, send_message, BeginRequest, MessageRequest, SessionsState,
    };
    use crate::bootstrap::session_service;

    async fn state(provider: Arc<ScriptedProvider>) -> SessionsState {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoDataset::load(&pool).await.expect("demo data");
        SessionsState { sessions: session_service(&AppConfig::default(), pool, provider) }
    }

    #[tokio::test]
    async fn begin_then_message_reports_booking_progress() {
        let provider = Arc::new(ScriptedProvider::new([
            Completion::text("Hi! Booking for John Doe."),
            Completion::calls(vec![CapabilityCall::new(
                "c1",
                capability::GET_PROVIDERS_BY_SPECIALTY,
                json!({"specialty": "Primary Care"}),
            )]),
            Completion::text("Dr. Meredith Grey is the primary care provider."),
        ]));
        let state = state(provider).await;

        let Json(started) = begin_session(
            Path("nurse-1".to_string()),
            State(state.clone()),
            Json(BeginRequest { patient_id: 1 }),
        )
        .await
        .expect("begin");
        assert_eq!(started.greeting.as_deref(), Some("Hi! Booking for John Doe."));

        let Json(reply) = send_message(
            Path("nurse-1".to_string()),
            State(state),
            Json(MessageRequest { text: "Primary care please".to_string() }),
        )
        .await
        .expect("message");

        assert_eq!(reply.text, "Dr. Meredith Grey is the primary care provider.");
        assert!(reply.booking_progress.contains("Provider: Dr. Meredith Grey"));
        assert_eq!(reply.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn message_without_a_session_is_not_found() {
        let state = state(Arc::new(ScriptedProvider::default())).await;

        let (status, Json(body)) = send_message(
            Path("nurse-9".to_string()),
            State(state),
            Json(MessageRequest { text: "hello".to_string() }),
        )
        .await
        .err()
        .expect("no session");

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error, "no active session for operator `nurse-9`");
    }

    #[tokio::test]
    async fn storage_failures_hide_details_behind_a_reference() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let sessions = session_service(
            &AppConfig::default(),
            pool.clone(),
            Arc::new(ScriptedProvider::default()),
        );
        pool.close().await;

        let (status, Json(body)) = begin_session(
            Path("nurse-1".to_string()),
            State(SessionsState { sessions }),
            Json(BeginRequest { patient_id: 1 }),
        )
        .await
        .err()
        .expect("closed pool");

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.error.starts_with("The service is temporarily unavailable."), "{}", body.error);
        assert!(body.error.contains("(reference "));
    }

    #[tokio::test]
    async fn router_rejects_blank_messages_and_unknown_patients() {
        let state = state(Arc::new(ScriptedProvider::default())).await;
        let app = router(state.sessions.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/sessions/nurse-1")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"patient_id": 404}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.expect("body"))
                .expect("json");
        assert_eq!(body["error"], json!("patient 404 not found"));

        let response = app
            .oneshot(
                Request::post("/sessions/nurse-1/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"text": "   "}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_keeps_the_session_resumable() {
        let provider = Arc::new(ScriptedProvider::new([Completion::text("Hello.")]));
        let state = state(provider).await;
        let app = router(state.sessions.clone());

        begin_session(Path("nurse-1".to_string()), State(state.clone()), Json(BeginRequest { patient_id: 2 }))
            .await
            .expect("begin");

        let response = app
            .oneshot(Request::delete("/sessions/nurse-1").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let Json(resumed) =
            begin_session(Path("nurse-1".to_string()), State(state), Json(BeginRequest { patient_id: 2 }))
                .await
                .expect("resume");
        assert_eq!(resumed.greeting, None);
        assert_eq!(resumed.patient_name, "Jane Smith");
    }
}
