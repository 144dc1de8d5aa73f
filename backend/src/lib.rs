pub mod adapter;
pub mod config;
pub mod record;
pub mod redeem;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use santa_core::{DrawError, DrawingId, Participant, RedemptionCode, Session};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{RetryPolicy, StoreAdapter};
use crate::config::Config;
use crate::redeem::RedeemError;
use crate::store::{KvStore, MemoryStore};

pub use crate::redeem::redeem;

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    adapter: StoreAdapter,
    admin_password: Arc<str>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()), RetryPolicy::default(), "changeme")
    }
}

impl AppState {
    pub fn new(store: Arc<dyn KvStore>, policy: RetryPolicy, admin_password: &str) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            adapter: StoreAdapter::new(store, policy),
            admin_password: Arc::from(admin_password),
        }
    }

    pub async fn from_config(config: &Config) -> Self {
        let store = match &config.persist_path {
            Some(path) => MemoryStore::with_persistence(path.clone()).await,
            None => MemoryStore::new(),
        };
        Self::new(Arc::new(store), config.retry, &config.admin_password)
    }

    pub fn adapter(&self) -> &StoreAdapter {
        &self.adapter
    }
}

#[derive(Clone, Debug, Default)]
struct SessionRecord {
    session: Session,
    last_drawing: Option<DrawingId>,
    // Bumped on reset so a drawing saved across a reset is not attached to
    // the fresh session.
    generation: u64,
}

impl SessionRecord {
    fn reset(&mut self) {
        *self = SessionRecord {
            generation: self.generation.wrapping_add(1),
            ..SessionRecord::default()
        };
    }

    fn record_drawing(&mut self, generation: u64, drawing_id: DrawingId) -> bool {
        if self.generation != generation {
            return false;
        }
        self.last_drawing = Some(drawing_id);
        true
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/session", post(create_session))
        .route("/session/:id", get(get_session))
        .route("/session/:id/participants", post(add_participant))
        .route("/session/:id/participants/:name", delete(remove_participant))
        .route("/session/:id/reset", post(reset_session))
        .route("/session/:id/draw", post(draw))
        .route("/redeem", post(redeem_code))
        .route("/codes/:code", get(check_code))
        .route("/admin/cleanup", post(cleanup))
        .with_state(state)
}

#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(Serialize)]
struct SessionView {
    session_id: String,
    participants: Vec<Participant>,
    can_draw: bool,
    last_drawing: Option<DrawingId>,
}

#[derive(Serialize)]
struct ParticipantsResponse {
    participants: Vec<Participant>,
}

#[derive(Deserialize)]
struct AddParticipantRequest {
    name: String,
}

#[derive(Deserialize)]
struct DrawParams {
    seed: Option<u64>,
}

#[derive(Serialize)]
struct IssuedCode {
    giver: Participant,
    code: RedemptionCode,
}

#[derive(Serialize)]
struct DrawResponse {
    sorteo_id: DrawingId,
    assignments: Vec<IssuedCode>,
    failed_givers: Vec<Participant>,
}

#[derive(Deserialize)]
struct RedeemRequest {
    code: String,
}

#[derive(Serialize)]
struct RedeemResponse {
    receiver: String,
}

#[derive(Serialize)]
struct CodeStatus {
    code: RedemptionCode,
    redeemable: bool,
}

fn session_not_found() -> Response {
    (StatusCode::NOT_FOUND, "session not found").into_response()
}

fn draw_error_response(err: DrawError) -> Response {
    let status = match &err {
        DrawError::DuplicateName(_) => StatusCode::CONFLICT,
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let session_id = Uuid::new_v4().to_string();
    state
        .sessions
        .write()
        .await
        .insert(session_id.clone(), SessionRecord::default());

    (StatusCode::CREATED, Json(CreateSessionResponse { session_id }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;
    let Some(record) = sessions.get(&session_id) else {
        return session_not_found();
    };

    (
        StatusCode::OK,
        Json(SessionView {
            session_id: session_id.clone(),
            participants: record.session.participants().to_vec(),
            can_draw: record.session.can_draw(),
            last_drawing: record.last_drawing.clone(),
        }),
    )
        .into_response()
}

async fn add_participant(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<AddParticipantRequest>,
) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;
    let Some(record) = sessions.get_mut(&session_id) else {
        return session_not_found();
    };

    if let Err(err) = record.session.add(&payload.name) {
        return draw_error_response(err);
    }

    (
        StatusCode::OK,
        Json(ParticipantsResponse {
            participants: record.session.participants().to_vec(),
        }),
    )
        .into_response()
}

async fn remove_participant(
    State(state): State<AppState>,
    Path((session_id, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;
    let Some(record) = sessions.get_mut(&session_id) else {
        return session_not_found();
    };

    if record.session.remove(&name).is_none() {
        return (StatusCode::NOT_FOUND, "participant not found").into_response();
    }

    (
        StatusCode::OK,
        Json(ParticipantsResponse {
            participants: record.session.participants().to_vec(),
        }),
    )
        .into_response()
}

async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;
    let Some(record) = sessions.get_mut(&session_id) else {
        return session_not_found();
    };

    record.reset();
    StatusCode::OK.into_response()
}

async fn draw(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<DrawParams>,
) -> impl IntoResponse {
    let (assignments, generation) = {
        let sessions = state.sessions.read().await;
        let Some(record) = sessions.get(&session_id) else {
            return session_not_found();
        };

        let mut rng = params
            .seed
            .map(ChaCha8Rng::seed_from_u64)
            .unwrap_or_else(ChaCha8Rng::from_entropy);
        match record.session.draw(&mut rng) {
            Ok(assignments) => (assignments, record.generation),
            Err(err) => return draw_error_response(err),
        }
    };

    // Saving is slow under retries; the session lock is not held meanwhile.
    let report = state.adapter.persist_drawing(&assignments, Utc::now()).await;

    let recorded = state
        .sessions
        .write()
        .await
        .get_mut(&session_id)
        .map(|record| record.record_drawing(generation, report.drawing_id.clone()))
        .unwrap_or(false);
    if !recorded {
        warn!(drawing = %report.drawing_id, "session reset or removed while saving, drawing not recorded");
    }

    let status = if report.is_complete() {
        info!(drawing = %report.drawing_id, codes = report.saved.len(), "drawing saved");
        StatusCode::CREATED
    } else {
        warn!(
            drawing = %report.drawing_id,
            failed = report.failed_givers.len(),
            "drawing partially saved"
        );
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(DrawResponse {
            sorteo_id: report.drawing_id,
            assignments: assignments
                .into_iter()
                .map(|a| IssuedCode {
                    giver: a.giver,
                    code: a.code,
                })
                .collect(),
            failed_givers: report.failed_givers,
        }),
    )
        .into_response()
}

async fn redeem_code(
    State(state): State<AppState>,
    Json(payload): Json<RedeemRequest>,
) -> impl IntoResponse {
    match redeem(&state.adapter, &payload.code).await {
        Ok(receiver) => (StatusCode::OK, Json(RedeemResponse { receiver })).into_response(),
        Err(err) => {
            let status = match &err {
                RedeemError::EmptyCode => StatusCode::BAD_REQUEST,
                RedeemError::NotFound => StatusCode::NOT_FOUND,
                RedeemError::Verification(source) => {
                    warn!(error = %source, "redemption lookup failed");
                    StatusCode::SERVICE_UNAVAILABLE
                }
            };
            (status, err.to_string()).into_response()
        }
    }
}

async fn check_code(
    State(state): State<AppState>,
    Path(raw_code): Path<String>,
) -> impl IntoResponse {
    let code = match RedemptionCode::normalize(&raw_code) {
        Ok(code) => code,
        Err(err) => return draw_error_response(err),
    };

    match state.adapter.exists(&code).await {
        Ok(redeemable) => (StatusCode::OK, Json(CodeStatus { code, redeemable })).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, format!("verification error: {err}")).into_response(),
    }
}

async fn cleanup(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let provided = headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != &*state.admin_password {
        return (StatusCode::UNAUTHORIZED, "invalid admin password").into_response();
    }

    match state.adapter.clean_old_codes().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, format!("cleanup failed: {err}")).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{Faults, FlakyStore};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_app() -> (Router, AppState) {
        let state = AppState::default();
        (app(state.clone()), state)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn session_with(app: &Router, names: &[&str]) -> String {
        let res = app.clone().oneshot(post_empty("/session")).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let session_id = json_body(res).await["session_id"].as_str().unwrap().to_string();

        for name in names {
            let res = app
                .clone()
                .oneshot(post_json(
                    &format!("/session/{session_id}/participants"),
                    json!({ "name": name }),
                ))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        session_id
    }

    #[tokio::test]
    async fn duplicate_participant_rejected_and_count_unchanged() {
        let (app, _) = test_app();
        let session_id = session_with(&app, &["Ana"]).await;

        let res = app
            .clone()
            .oneshot(post_json(
                &format!("/session/{session_id}/participants"),
                json!({ "name": "Ana" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = app
            .clone()
            .oneshot(post_json(
                &format!("/session/{session_id}/participants"),
                json!({ "name": "   " }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let view = json_body(
            app.clone()
                .oneshot(get_req(&format!("/session/{session_id}")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(view["participants"], json!(["Ana"]));
        assert_eq!(view["can_draw"], false);
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let (app, _) = test_app();
        let res = app.clone().oneshot(get_req("/session/unknown")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .clone()
            .oneshot(post_json("/session/unknown/participants", json!({ "name": "Ana" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app.clone().oneshot(post_empty("/session/unknown/draw")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn remove_and_reset_participants() {
        let (app, _) = test_app();
        let session_id = session_with(&app, &["Ana", "Beto", "Cata"]).await;

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri(format!("/session/{session_id}/participants/Beto"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["participants"], json!(["Ana", "Cata"]));

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri(format!("/session/{session_id}/participants/Beto"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .clone()
            .oneshot(post_empty(&format!("/session/{session_id}/reset")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let view = json_body(
            app.clone()
                .oneshot(get_req(&format!("/session/{session_id}")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(view["participants"], json!([]));
    }

    #[test]
    fn draw_errors_map_to_status() {
        let status = |err| draw_error_response(err).status();
        assert_eq!(status(DrawError::DuplicateName("Ana".into())), StatusCode::CONFLICT);
        assert_eq!(
            status(DrawError::TooFewParticipants { required: 3, found: 2 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(DrawError::AssignmentExhausted { attempts: 100 }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn drawing_saved_across_a_reset_is_not_recorded() {
        let mut record = SessionRecord::default();
        record.session.add("Ana").unwrap();
        let generation = record.generation;

        record.reset();
        assert!(!record.record_drawing(generation, DrawingId::from_millis(1)));
        assert_eq!(record.last_drawing, None);
        assert!(record.session.is_empty());

        assert!(record.record_drawing(record.generation, DrawingId::from_millis(2)));
        assert_eq!(record.last_drawing, Some(DrawingId::from_millis(2)));
    }

    #[tokio::test]
    async fn reset_clears_last_drawing() {
        let (app, _) = test_app();
        let session_id = session_with(&app, &["Ana", "Beto", "Cata"]).await;
        let res = app
            .clone()
            .oneshot(post_empty(&format!("/session/{session_id}/draw?seed=7")))
            .await
            .unwrap();
        let sorteo_id = json_body(res).await["sorteo_id"].clone();

        let view = json_body(
            app.clone()
                .oneshot(get_req(&format!("/session/{session_id}")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(view["last_drawing"], sorteo_id);

        app.clone()
            .oneshot(post_empty(&format!("/session/{session_id}/reset")))
            .await
            .unwrap();
        let view = json_body(
            app.clone()
                .oneshot(get_req(&format!("/session/{session_id}")))
                .await
                .unwrap(),
        )
        .await;
        assert!(view["last_drawing"].is_null());
    }

    #[tokio::test]
    async fn draw_requires_three_participants() {
        let (app, _) = test_app();
        let session_id = session_with(&app, &["Ana", "Beto"]).await;
        let res = app
            .clone()
            .oneshot(post_empty(&format!("/session/{session_id}/draw")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn seeded_draw_then_redeem_each_code_once() {
        let (app, state) = test_app();
        let names = ["Ana", "Beto", "Cata", "Dani"];
        let session_id = session_with(&app, &names).await;

        let res = app
            .clone()
            .oneshot(post_empty(&format!("/session/{session_id}/draw?seed=42")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        assert!(body["sorteo_id"].as_str().unwrap().starts_with("sorteo-"));
        assert_eq!(body["failed_givers"], json!([]));

        let mut session = Session::new();
        for name in names {
            session.add(name).unwrap();
        }
        let expected = session.draw(&mut ChaCha8Rng::seed_from_u64(42)).unwrap();

        let issued = body["assignments"].as_array().unwrap();
        assert_eq!(issued.len(), expected.len());
        for (entry, want) in issued.iter().zip(&expected) {
            assert_eq!(entry["giver"], want.giver.name());
            assert_eq!(entry["code"], want.code.as_str());
            assert!(entry.get("receiver").is_none());
        }

        for want in &expected {
            let res = app
                .clone()
                .oneshot(get_req(&format!("/codes/{}", want.code)))
                .await
                .unwrap();
            assert_eq!(json_body(res).await["redeemable"], true);

            let res = app
                .clone()
                .oneshot(post_json(
                    "/redeem",
                    json!({ "code": want.code.as_str().to_lowercase() }),
                ))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(json_body(res).await["receiver"], want.receiver.name());

            let res = app
                .clone()
                .oneshot(post_json("/redeem", json!({ "code": want.code.as_str() })))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::NOT_FOUND);
        }

        let leftover = state.adapter().clean_old_codes().await.unwrap();
        assert_eq!(leftover.deleted, 0);
    }

    #[tokio::test]
    async fn redeem_rejects_empty_and_unknown_codes() {
        let (app, _) = test_app();
        let res = app
            .clone()
            .oneshot(post_json("/redeem", json!({ "code": "  " })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(post_json("/redeem", json!({ "code": "REGALO-NOPE00" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn store_outages_surface_as_503() {
        let store = Arc::new(FlakyStore::with_faults(Faults {
            failing_sets: usize::MAX,
            fail_gets: true,
            ..Faults::default()
        }));
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
        };
        let state = AppState::new(store.clone(), policy, "changeme");
        let app = app(state);
        let session_id = session_with(&app, &["Ana", "Beto", "Cata"]).await;

        let res = app
            .clone()
            .oneshot(post_empty(&format!("/session/{session_id}/draw")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(res).await;
        assert_eq!(body["failed_givers"], json!(["Ana", "Beto", "Cata"]));
        assert_eq!(store.set_calls(), 6);

        let res = app
            .clone()
            .oneshot(post_json("/redeem", json!({ "code": "REGALO-ABC123" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn cleanup_requires_admin_password() {
        let (app, state) = test_app();
        let session_id = session_with(&app, &["Ana", "Beto", "Cata"]).await;
        let res = app
            .clone()
            .oneshot(post_empty(&format!("/session/{session_id}/draw")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = app.clone().oneshot(post_empty("/admin/cleanup")).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/admin/cleanup")
                    .header("x-admin-password", "changeme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await, json!({ "deleted": 3, "failed": 0 }));

        let remaining = state.adapter().clean_old_codes().await.unwrap();
        assert_eq!(remaining.deleted, 0);
    }
}
