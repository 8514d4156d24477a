//! REST handlers for the chat surface.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::adapters::http::error::ApiError;
use crate::adapters::http::middleware::RequirePrincipal;
use crate::adapters::http::AppState;
use crate::application::{relay, CancelFlag, TurnOutcome, DEFAULT_RELAY_CAPACITY};
use crate::domain::foundation::{CoreError, Principal, SessionId};
use crate::domain::message::MessageRole;
use crate::domain::safety::SessionCreateInput;
use crate::domain::session::{Session, SessionSettings};

use super::dto::{
    ClearContextQuery, CreateSessionRequest, CreateSessionResponse, ExportQuery,
    ListSessionsQuery, ListSessionsResponse, MessageDto, MessagesQuery, MessagesResponse,
    SendMessageRequest, SessionDto, SettingsDto, SimpleMessageResponse,
};

/// Parses a session id and loads the session, hiding foreign sessions as
/// not-found.
pub(super) async fn load_owned_session(
    state: &AppState,
    principal: &Principal,
    session_id: &str,
) -> Result<Session, ApiError> {
    let session_id: SessionId = session_id
        .parse()
        .map_err(|_| CoreError::validation("sessionId", "Session id must be a UUID"))?;

    let session = state
        .sessions
        .find(&session_id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("Session not found: {}", session_id)))?;

    if session.user_id() != &principal.user_id {
        return Err(CoreError::not_found(format!("Session not found: {}", session_id)).into());
    }

    Ok(session)
}

/// `POST /chat/session` - create a session.
///
/// Defaults cascade: explicit body values, then the user's stored
/// preferences, then the process defaults.
pub async fn create_session(
    State(state): State<AppState>,
    RequirePrincipal(principal): RequirePrincipal,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let registry = state.orchestrator.registry();
    let preferences = state
        .users
        .find(&principal.user_id)
        .await?
        .map(|u| u.preferences().clone())
        .unwrap_or_default();

    let provider = body
        .provider
        .clone()
        .or_else(|| preferences.provider.clone())
        .unwrap_or_else(|| registry.default_provider().to_string());
    let model = body.model.clone().or_else(|| preferences.model.clone());
    let system_prompt = body
        .system_prompt
        .clone()
        .or_else(|| preferences.system_prompt.clone());

    let known = registry.names();
    state.orchestrator.safety().validate_session_create(
        &SessionCreateInput {
            provider: &provider,
            model: model.as_deref(),
            temperature: body.temperature,
            max_tokens: body.max_tokens,
            system_prompt: system_prompt.as_deref(),
        },
        &known,
    )?;

    let defaults = SessionSettings::default();
    let settings = SessionSettings {
        temperature: body
            .temperature
            .or(preferences.temperature)
            .unwrap_or(defaults.temperature),
        max_tokens: body.max_tokens.unwrap_or(defaults.max_tokens),
    };

    let session = Session::new(
        principal.user_id.clone(),
        provider,
        model,
        system_prompt,
        settings,
        state.clock.now(),
    );
    state.sessions.create(&session).await?;

    tracing::info!(
        correlation_id = %principal.correlation_id,
        user_id = %principal.user_id,
        session_id = %session.id(),
        provider = session.provider(),
        "session created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id().to_string(),
            provider: session.provider().to_string(),
            model: session.model().map(String::from),
            settings: SettingsDto {
                temperature: settings.temperature,
                max_tokens: settings.max_tokens,
            },
            system_prompt: session.system_prompt().map(String::from),
        }),
    ))
}

/// `GET /chat/sessions` - list the caller's sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
    RequirePrincipal(principal): RequirePrincipal,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let limit = query.limit.min(100);
    let (sessions, total) = state
        .sessions
        .find_by_user(&principal.user_id, limit, query.offset)
        .await?;

    Ok(Json(ListSessionsResponse {
        sessions: sessions.iter().map(SessionDto::from).collect(),
        total,
    }))
}

/// `GET /chat/sessions/:sid/messages` - list a session's messages.
pub async fn get_messages(
    State(state): State<AppState>,
    RequirePrincipal(principal): RequirePrincipal,
    Path(session_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let session = load_owned_session(&state, &principal, &session_id).await?;

    let messages = state
        .messages
        .find_by_session(session.id(), query.limit)
        .await?;

    Ok(Json(MessagesResponse {
        session_id: session.id().to_string(),
        messages: messages.iter().map(MessageDto::from).collect(),
        session: SessionDto::from(&session),
    }))
}

/// `POST /chat/message/simple` - non-streaming turn: drives the same
/// orchestrator with a buffering subscription and returns both persisted
/// messages once the turn is terminal.
pub async fn send_message_simple(
    State(state): State<AppState>,
    RequirePrincipal(principal): RequirePrincipal,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<SimpleMessageResponse>, ApiError> {
    let session_id: SessionId = body
        .session_id
        .parse()
        .map_err(|_| CoreError::validation("sessionId", "Session id must be a UUID"))?;

    let turn = state
        .orchestrator
        .admit(&principal, session_id, &body.message, body.provider.as_deref())
        .await?;

    let (sender, receiver) = relay(DEFAULT_RELAY_CAPACITY, state.metrics.clone());
    // Nobody streams here; drain in the background so the buffer never fills.
    tokio::spawn(receiver.collect());

    let outcome = turn.run(sender, CancelFlag::new()).await;

    match outcome {
        TurnOutcome::Completed(record)
        | TurnOutcome::Fallback(record, _)
        | TurnOutcome::Cancelled(record) => Ok(Json(SimpleMessageResponse {
            success: true,
            user_message: MessageDto::from(&record.user_message),
            assistant_message: MessageDto::from(&record.assistant_message),
        })),
        TurnOutcome::Failed(_, cause) => Err(cause.into()),
        TurnOutcome::Rejected(err) => Err(err.into()),
    }
}

/// `DELETE /chat/sessions/:sid/context` - clear the session's messages.
pub async fn clear_context(
    State(state): State<AppState>,
    RequirePrincipal(principal): RequirePrincipal,
    Path(session_id): Path<String>,
    Query(query): Query<ClearContextQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = load_owned_session(&state, &principal, &session_id).await?;

    let deleted = state
        .orchestrator
        .context()
        .clear(session.id(), query.keep_system)
        .await?;

    Ok(Json(serde_json::json!({
        "result": { "messagesDeleted": deleted }
    })))
}

/// `POST /chat/sessions/:sid/summarize` - force a summarisation pass.
pub async fn summarize(
    State(state): State<AppState>,
    RequirePrincipal(principal): RequirePrincipal,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = load_owned_session(&state, &principal, &session_id).await?;

    let report = state.orchestrator.context().summarise(session.id()).await;

    Ok(Json(serde_json::json!({ "result": report })))
}

/// `GET /chat/sessions/:sid/stats` - context statistics.
pub async fn stats(
    State(state): State<AppState>,
    RequirePrincipal(principal): RequirePrincipal,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = load_owned_session(&state, &principal, &session_id).await?;

    let stats = state.orchestrator.context().stats(session.id()).await?;

    Ok(Json(serde_json::json!({ "stats": stats })))
}

/// `GET /chat/sessions/:sid/export?format=json|text` - download the
/// conversation.
pub async fn export(
    State(state): State<AppState>,
    RequirePrincipal(principal): RequirePrincipal,
    Path(session_id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let session = load_owned_session(&state, &principal, &session_id).await?;
    let messages = state.messages.find_by_session(session.id(), None).await?;

    match query.format.as_str() {
        "json" => {
            let body = serde_json::json!({
                "session": SessionDto::from(&session),
                "messages": messages.iter().map(MessageDto::from).collect::<Vec<_>>(),
            });
            let filename = format!("session-{}.json", session.id());
            Ok((
                [
                    (header::CONTENT_TYPE, "application/json".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                Json(body),
            )
                .into_response())
        }
        "text" => {
            let mut text = format!("# {}\n\n", session.title());
            for message in &messages {
                let speaker = match message.role() {
                    MessageRole::User => "User",
                    MessageRole::Assistant => "Assistant",
                    MessageRole::System => "System",
                    MessageRole::Summary => "Summary",
                };
                text.push_str(&format!("{}: {}\n\n", speaker, message.content()));
            }
            let filename = format!("session-{}.txt", session.id());
            Ok((
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                text,
            )
                .into_response())
        }
        other => Err(CoreError::validation(
            "format",
            format!("Unknown export format '{}'", other),
        )
        .into()),
    }
}
