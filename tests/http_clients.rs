//! Integration tests for the HTTP collaborators against an in-process fake
//! backend (storage, insight, journal and profile endpoints).

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use yournal::capture::FileCaptureDevice;
use yournal::profile::{ProfileClient, ProfileUpdate, UserContext};
use chrono::NaiveDate;
use yournal::remote::{
    window_around, EntryKind, EntryPayload, HttpInsightClient, HttpPersistenceClient, InsightApi,
    JournalClient, ObjectStorage, PersistenceApi, SupabaseStorage,
};
use yournal::retry::RetryPolicy;
use yournal::session::{ErrorKind, RecordingController, SessionPhase};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct StoredObject {
    bucket: String,
    name: String,
    content_type: String,
    api_key: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct Recorded {
    objects: Vec<StoredObject>,
    insight_requests: Vec<Value>,
    journal_requests: Vec<Value>,
    insight_auth: Vec<Option<String>>,
    history_queries: Vec<HashMap<String, String>>,
    profile_requests: u32,
}

#[derive(Clone, Default)]
struct Backend {
    recorded: Arc<Mutex<Recorded>>,
    /// Profile lookups fail with 503 this many times before succeeding.
    profile_failures: Arc<Mutex<u32>>,
}

async fn upload(
    State(backend): State<Backend>,
    Path((bucket, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if name.contains("reject") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"statusCode": "409", "error": "Duplicate", "message": "The resource already exists"})),
        );
    }

    let header = |key: &str| {
        headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    backend.recorded.lock().unwrap().objects.push(StoredObject {
        bucket: bucket.clone(),
        name: name.clone(),
        content_type: header("content-type"),
        api_key: header("apikey"),
        bytes: body.to_vec(),
    });

    (StatusCode::OK, Json(json!({"Key": format!("{}/{}", bucket, name)})))
}

async fn chat(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    {
        let mut recorded = backend.recorded.lock().unwrap();
        recorded.insight_requests.push(body.clone());
        recorded.insight_auth.push(auth);
    }

    match body["content"].as_str() {
        Some("fail") => (StatusCode::BAD_GATEWAY, Json(json!({"error": "model overloaded"}))),
        Some("garbled") => (StatusCode::OK, Json(json!({"answer": "hola"}))),
        _ => (
            StatusCode::OK,
            Json(json!({
                "data": {
                    "title": "Buen día",
                    "description": "Un día tranquilo",
                    "moodEmoji": "😀",
                    "insights": [{"text": "dormiste bien", "polarity": "positive"}]
                }
            })),
        ),
    }
}

async fn journal(State(backend): State<Backend>, Json(body): Json<Value>) -> impl IntoResponse {
    let reject = body["content"].as_str() == Some("nosave");
    backend.recorded.lock().unwrap().journal_requests.push(body);

    if reject {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "database unavailable"})))
    } else {
        (StatusCode::CREATED, Json(json!({"ok": true})))
    }
}

async fn journal_history(
    State(backend): State<Backend>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let user = query.get("userId").cloned().unwrap_or_default();
    backend.recorded.lock().unwrap().history_queries.push(query);

    if user != "user-1" {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "unknown user"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "data": {
                "2024-02-28": "Caminé por el parque",
                "2024-03-01": "Buen día",
                "2024-04-15": "fuera de rango"
            }
        })),
    )
}

async fn users_get(
    State(backend): State<Backend>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    backend.recorded.lock().unwrap().profile_requests += 1;

    {
        let mut failures = backend.profile_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "warming up"})));
        }
    }

    match query.get("auth_id").map(String::as_str) {
        Some("eq.auth-1") => (
            StatusCode::OK,
            Json(json!({"id": 42, "auth_id": "auth-1", "name": null, "age": null})),
        ),
        _ => (
            StatusCode::NOT_ACCEPTABLE,
            Json(json!({"message": "JSON object requested, multiple (or no) rows returned"})),
        ),
    }
}

async fn users_patch(
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let id = query
        .get("id")
        .and_then(|f| f.strip_prefix("eq."))
        .unwrap_or_default()
        .to_string();

    Json(json!({
        "id": id,
        "auth_id": "auth-1",
        "name": body["name"],
        "age": body["age"],
    }))
}

/// Start the fake backend and return its base URL.
async fn spawn_backend(backend: Backend) -> String {
    let app = Router::new()
        .route("/storage/v1/object/:bucket/*name", post(upload))
        .route("/api/chat", post(chat))
        .route("/api/journal", get(journal_history).post(journal))
        .route("/rest/v1/users", get(users_get).patch(users_patch))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_storage_upload_returns_public_url() {
    let backend = Backend::default();
    let base = spawn_backend(backend.clone()).await;
    let storage = SupabaseStorage::new(&base, "audios", "service-key", TIMEOUT).unwrap();

    let url = storage
        .upload("audio_171.webm", b"webm-bytes", "audio/webm")
        .await
        .unwrap();
    assert_eq!(url, format!("{}/storage/v1/object/public/audios/audio_171.webm", base));

    let recorded = backend.recorded.lock().unwrap();
    let object = &recorded.objects[0];
    assert_eq!(object.bucket, "audios");
    assert_eq!(object.name, "audio_171.webm");
    assert_eq!(object.content_type, "audio/webm");
    assert_eq!(object.api_key, "service-key");
    assert_eq!(object.bytes, b"webm-bytes");
}

#[tokio::test]
async fn test_storage_error_carries_service_message() {
    let base = spawn_backend(Backend::default()).await;
    let storage = SupabaseStorage::new(&base, "audios", "service-key", TIMEOUT).unwrap();

    let err = storage
        .upload("reject.webm", b"x", "audio/webm")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("The resource already exists"));
}

#[tokio::test]
async fn test_insight_client_parses_wrapped_response() {
    let backend = Backend::default();
    let base = spawn_backend(backend.clone()).await;
    let client =
        HttpInsightClient::new(&format!("{}/api", base), "/chat", Some("jwt".into()), TIMEOUT)
            .unwrap();

    let insight = client
        .submit(&EntryPayload::text("hoy fue un buen día", "user-1"))
        .await
        .unwrap();
    assert_eq!(insight.title, "Buen día");
    assert_eq!(insight.mood_emoji, "😀");
    assert_eq!(insight.insights.len(), 1);

    let recorded = backend.recorded.lock().unwrap();
    assert_eq!(recorded.insight_requests[0]["type"], "text");
    assert_eq!(recorded.insight_requests[0]["userId"], "user-1");
    assert_eq!(recorded.insight_auth[0].as_deref(), Some("Bearer jwt"));
}

#[tokio::test]
async fn test_insight_client_errors() {
    let base = spawn_backend(Backend::default()).await;
    let client = HttpInsightClient::new(&format!("{}/api", base), "/chat", None, TIMEOUT).unwrap();

    let err = client
        .submit(&EntryPayload::text("fail", "user-1"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("model overloaded"));

    assert!(client
        .submit(&EntryPayload::text("garbled", "user-1"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_persistence_client_acks_any_success() {
    let backend = Backend::default();
    let base = spawn_backend(backend.clone()).await;
    let client =
        HttpPersistenceClient::new(&format!("{}/api", base), "/journal", None, TIMEOUT).unwrap();

    client
        .submit(&EntryPayload::audio("https://store/audio_171.webm", "audio/webm", "user-1"))
        .await
        .unwrap();

    let err = client
        .submit(&EntryPayload::text("nosave", "user-1"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("database unavailable"));

    let recorded = backend.recorded.lock().unwrap();
    assert_eq!(recorded.journal_requests.len(), 2);
    assert_eq!(recorded.journal_requests[0]["mimeType"], "audio/webm");
}

#[tokio::test]
async fn test_profile_fetch_retries_until_available() {
    let backend = Backend::default();
    *backend.profile_failures.lock().unwrap() = 2;
    let base = spawn_backend(backend.clone()).await;

    let client = ProfileClient::new(
        &base,
        "service-key",
        RetryPolicy::new(4, Duration::from_millis(10)),
        TIMEOUT,
    )
    .unwrap();

    let profile = client.fetch_by_auth_id("auth-1").await.unwrap();
    assert_eq!(profile.id, "42");
    assert!(profile.needs_onboarding());
    assert_eq!(backend.recorded.lock().unwrap().profile_requests, 3);
}

#[tokio::test]
async fn test_profile_fetch_gives_up_after_policy() {
    let backend = Backend::default();
    *backend.profile_failures.lock().unwrap() = 10;
    let base = spawn_backend(backend.clone()).await;

    let client = ProfileClient::new(
        &base,
        "service-key",
        RetryPolicy::new(3, Duration::from_millis(5)),
        TIMEOUT,
    )
    .unwrap();

    assert!(client.fetch_by_auth_id("auth-1").await.is_err());
    assert_eq!(backend.recorded.lock().unwrap().profile_requests, 3);
}

#[tokio::test]
async fn test_journal_history_returns_one_entry_per_day() {
    let backend = Backend::default();
    let base = spawn_backend(backend.clone()).await;
    let client = JournalClient::new(
        &format!("{}/api", base),
        "/journal",
        Some("user-jwt".to_string()),
        RetryPolicy::none(),
        TIMEOUT,
    )
    .unwrap();

    let center = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let (start, end) = window_around(center, 3);
    let days = client.fetch_range("user-1", start, end).await.unwrap();

    assert_eq!(days.len(), 2);
    assert_eq!(days.get(&center).map(String::as_str), Some("Buen día"));

    let recorded = backend.recorded.lock().unwrap();
    let query = &recorded.history_queries[0];
    assert_eq!(query.get("startDate").map(String::as_str), Some("2024-02-27"));
    assert_eq!(query.get("endDate").map(String::as_str), Some("2024-03-04"));
}

#[tokio::test]
async fn test_journal_history_error_is_reported() {
    let base = spawn_backend(Backend::default()).await;
    let client = JournalClient::new(
        &format!("{}/api", base),
        "/journal",
        None,
        RetryPolicy::none(),
        TIMEOUT,
    )
    .unwrap();

    let center = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let (start, end) = window_around(center, 3);
    let err = client.fetch_range("stranger", start, end).await.unwrap_err();
    assert!(format!("{:#}", err).contains("unknown user"));
}

#[tokio::test]
async fn test_profile_update_round_trip() {
    let base = spawn_backend(Backend::default()).await;
    let client = ProfileClient::new(&base, "service-key", RetryPolicy::none(), TIMEOUT).unwrap();

    let valid = ProfileUpdate::new("Ana", "34").validate().unwrap();
    let profile = client.update("42", &valid).await.unwrap();
    assert_eq!(profile.id, "42");
    assert_eq!(profile.name.as_deref(), Some("Ana"));
    assert_eq!(profile.age, Some(34));
    assert!(!profile.needs_onboarding());
}

#[tokio::test]
async fn test_replayed_file_reaches_complete_over_http() {
    let backend = Backend::default();
    let base = spawn_backend(backend.clone()).await;
    let api = format!("{}/api", base);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entry.webm");
    std::fs::write(&path, b"0123456789abcdef").unwrap();

    let device = FileCaptureDevice::new(&path).with_chunk_size(5);
    let mut finished = device.finished();

    let mut controller = RecordingController::new(
        Box::new(device),
        Arc::new(SupabaseStorage::new(&base, "audios", "service-key", TIMEOUT).unwrap()),
        Arc::new(HttpInsightClient::new(&api, "/chat", None, TIMEOUT).unwrap()),
        Arc::new(HttpPersistenceClient::new(&api, "/journal", None, TIMEOUT).unwrap()),
        UserContext::new("user-1"),
    );

    assert_eq!(controller.start().await.unwrap(), "audio/webm");
    finished.wait_for(|done| *done).await.unwrap();
    let blob = controller.stop().await.unwrap();
    assert_eq!(blob.bytes(), b"0123456789abcdef");

    let outcome = controller.submit().await.unwrap();
    assert_eq!(controller.phase(), SessionPhase::Complete);
    assert_eq!(outcome.insight.title, "Buen día");

    let reference = outcome.uploaded_reference.clone().unwrap();
    assert!(reference.starts_with(&format!("{}/storage/v1/object/public/audios/audio_", base)));
    assert!(reference.ends_with(".webm"));

    let report = outcome.persistence.wait().await;
    assert!(report.is_saved());
    assert_eq!(report.kind, EntryKind::Audio);

    let recorded = backend.recorded.lock().unwrap();
    assert_eq!(recorded.objects[0].bytes, b"0123456789abcdef");
    assert_eq!(recorded.insight_requests[0]["content"], reference.as_str());
    assert_eq!(recorded.journal_requests[0], recorded.insight_requests[0]);
}

#[tokio::test]
async fn test_unreachable_storage_is_an_upload_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entry.ogg");
    std::fs::write(&path, b"oggdata").unwrap();

    let backend_url = spawn_backend(Backend::default()).await;
    let api = format!("{}/api", backend_url);

    let device = FileCaptureDevice::new(&path);
    let mut finished = device.finished();
    let mut controller = RecordingController::new(
        Box::new(device),
        // Nothing listens on port 9 of localhost.
        Arc::new(SupabaseStorage::new("http://127.0.0.1:9", "audios", "k", TIMEOUT).unwrap()),
        Arc::new(HttpInsightClient::new(&api, "/chat", None, TIMEOUT).unwrap()),
        Arc::new(HttpPersistenceClient::new(&api, "/journal", None, TIMEOUT).unwrap()),
        UserContext::new("user-1"),
    );

    controller.start().await.unwrap();
    finished.wait_for(|done| *done).await.unwrap();
    controller.stop().await.unwrap();

    let err = controller.submit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upload);
    assert_eq!(controller.phase(), SessionPhase::Failed);
    assert_eq!(
        controller.encoded_blob().map(|b| b.bytes().to_vec()),
        Some(b"oggdata".to_vec())
    );
}
