//! REST client, optimistic reordering and job polling against an
//! in-process mock backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use fiction_forge::ForgeError;
use fiction_forge::models::{Chapter, GenerationJob, JobStatus};
use fiction_forge::services::api::ApiClient;
use fiction_forge::services::auth::StaticToken;
use fiction_forge::services::cache::QueryCache;
use fiction_forge::services::job_progress::JobView;
use fiction_forge::services::job_watch::JobWatcher;
use fiction_forge::services::realtime::{RealtimeClient, RealtimeConfig};
use fiction_forge::services::reorder::{OrderedList, reorder_items};
use serde::Deserialize;
use tokio::net::TcpListener;
use uuid::Uuid;

const TOKEN: &str = "writer-token";

struct Backend {
    book_id: Uuid,
    chapters: Mutex<Vec<Chapter>>,
    fail_reorder: AtomicBool,
    job_polls: AtomicUsize,
    cancelled: Mutex<Vec<Uuid>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "detail": "Invalid token" })),
    )
        .into_response()
}

async fn list_chapters(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(book_id): Path<Uuid>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if book_id != backend.book_id {
        return (StatusCode::NOT_FOUND, "no such book").into_response();
    }

    // Served in reverse to check the client sorts by position
    let mut chapters = backend.chapters.lock().unwrap().clone();
    chapters.reverse();
    Json(chapters).into_response()
}

#[derive(Deserialize)]
struct ReorderBody {
    new_position: u32,
}

async fn reorder_chapter(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Path(chapter_id): Path<Uuid>,
    Json(body): Json<ReorderBody>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if backend.fail_reorder.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": "Reorder failed" })),
        )
            .into_response();
    }

    let mut chapters = backend.chapters.lock().unwrap();
    match reorder_items(&chapters, chapter_id, body.new_position) {
        Ok(reordered) => {
            *chapters = reordered;
            Json(serde_json::json!({ "success": true })).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn get_job(State(backend): State<Arc<Backend>>, Path(job_id): Path<Uuid>) -> Response {
    let poll = backend.job_polls.fetch_add(1, Ordering::SeqCst);
    let (status, progress) = match poll {
        0 => (JobStatus::Queued, 0.0),
        1 | 2 => (JobStatus::InProgress, 50.0),
        _ => (JobStatus::Completed, 100.0),
    };

    Json(GenerationJob {
        id: job_id,
        sub_chapter_id: None,
        job_type: Some("generate".into()),
        status,
        progress: Some(progress),
        stage: Some("drafting".into()),
        estimated_time_remaining: None,
        error_message: None,
        created_at: None,
    })
    .into_response()
}

async fn cancel_job(State(backend): State<Arc<Backend>>, Path(job_id): Path<Uuid>) -> StatusCode {
    backend.cancelled.lock().unwrap().push(job_id);
    StatusCode::NO_CONTENT
}

fn chapters(book_id: Uuid, n: u32) -> Vec<Chapter> {
    (1..=n)
        .map(|i| Chapter {
            id: Uuid::from_u128(i as u128),
            book_id,
            chapter_number: i,
            title: format!("Chapter {i}"),
            chapter_plot: None,
            character_id: None,
            target_word_count: Some(3000),
            current_word_count: i * 100,
            updated_at: None,
        })
        .collect()
}

async fn spawn_backend() -> (Arc<Backend>, String) {
    let book_id = Uuid::new_v4();
    let backend = Arc::new(Backend {
        book_id,
        chapters: Mutex::new(chapters(book_id, 5)),
        fail_reorder: AtomicBool::new(false),
        job_polls: AtomicUsize::new(0),
        cancelled: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/api/chapters/book/:book_id", get(list_chapters))
        .route("/api/chapters/:id/reorder", put(reorder_chapter))
        .route("/api/generation-jobs/:id", get(get_job))
        .route("/api/generation-jobs/:id/cancel", post(cancel_job))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (backend, format!("http://{addr}"))
}

fn numbers(chapters: &[Chapter]) -> Vec<u32> {
    chapters.iter().map(|c| c.chapter_number).collect()
}

fn ids(chapters: &[Chapter]) -> Vec<u128> {
    chapters.iter().map(|c| c.id.as_u128()).collect()
}

#[tokio::test]
async fn test_list_is_sorted_and_authenticated() {
    let (backend, url) = spawn_backend().await;

    let api = ApiClient::new(&url, Arc::new(StaticToken(TOKEN.into())));
    let list = api.list_chapters(backend.book_id).await.unwrap();
    assert_eq!(numbers(&list), vec![1, 2, 3, 4, 5]);

    let stranger = ApiClient::new(&url, Arc::new(StaticToken("wrong".into())));
    let err = stranger.list_chapters(backend.book_id).await.unwrap_err();
    match &err {
        ForgeError::Api { status, message } => {
            assert_eq!(*status, StatusCode::UNAUTHORIZED);
            assert_eq!(message, "Invalid token");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_missing_token_fails_before_request() {
    let (backend, url) = spawn_backend().await;
    let api = ApiClient::new(&url, Arc::new(StaticToken(String::new())));

    let err = api.list_chapters(backend.book_id).await.unwrap_err();
    assert!(matches!(err, ForgeError::Unauthenticated));
}

#[tokio::test]
async fn test_plain_text_error_body_is_kept() {
    let (_, url) = spawn_backend().await;
    let api = ApiClient::new(&url, Arc::new(StaticToken(TOKEN.into())));

    let err = api.list_chapters(Uuid::new_v4()).await.unwrap_err();
    match err {
        ForgeError::Api { status, message } => {
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(message, "no such book");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_reorder_reconciles_with_server() {
    let (backend, url) = spawn_backend().await;
    let api = Arc::new(ApiClient::new(&url, Arc::new(StaticToken(TOKEN.into()))));
    let list = OrderedList::<Chapter, _>::new(backend.book_id, Arc::new(QueryCache::new()), api);

    list.load().await.unwrap();
    list.reorder(Uuid::from_u128(3), 1).await.unwrap();

    let reloaded = list.load().await.unwrap();
    assert_eq!(ids(&reloaded), vec![3, 1, 2, 4, 5]);
    assert_eq!(numbers(&reloaded), vec![1, 2, 3, 4, 5]);
    assert_eq!(ids(&backend.chapters.lock().unwrap()), vec![3, 1, 2, 4, 5]);
}

#[tokio::test]
async fn test_failed_reorder_rolls_back() {
    let (backend, url) = spawn_backend().await;
    backend.fail_reorder.store(true, Ordering::SeqCst);
    let api = Arc::new(ApiClient::new(&url, Arc::new(StaticToken(TOKEN.into()))));
    let list = OrderedList::<Chapter, _>::new(backend.book_id, Arc::new(QueryCache::new()), api);

    let before = list.load().await.unwrap();
    let err = list.reorder(Uuid::from_u128(1), 5).await.unwrap_err();
    assert!(matches!(err, ForgeError::Api { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR));

    assert_eq!(list.items().unwrap(), before);
    assert_eq!(numbers(&list.load().await.unwrap()), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_job_watch_polls_without_realtime() {
    let (backend, url) = spawn_backend().await;
    let api = ApiClient::new(&url, Arc::new(StaticToken(TOKEN.into())));

    // Never connected, so the watcher has to poll
    let realtime = Arc::new(RealtimeClient::new(
        RealtimeConfig {
            api_url: url.clone(),
            ..Default::default()
        },
        Arc::new(StaticToken(TOKEN.into())),
    ));
    let watcher = JobWatcher::new(api, realtime, Duration::from_millis(20));

    let mut seen = Vec::new();
    let job_id = Uuid::new_v4();
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        watcher.watch(job_id, |view| seen.push(view.clone())),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome, JobView::Completed);
    assert!(
        seen.iter()
            .any(|v| matches!(v, JobView::Running(p) if p.percent == 50.0))
    );
    assert_eq!(seen.last(), Some(&JobView::Completed));
    assert!(backend.job_polls.load(Ordering::SeqCst) >= 4);

    watcher.cancel(job_id).await.unwrap();
    assert_eq!(*backend.cancelled.lock().unwrap(), vec![job_id]);
}

#[tokio::test]
async fn test_job_watch_with_zero_poll_interval() {
    let (_, url) = spawn_backend().await;
    let api = ApiClient::new(&url, Arc::new(StaticToken(TOKEN.into())));
    let realtime = Arc::new(RealtimeClient::new(
        RealtimeConfig {
            api_url: url.clone(),
            ..Default::default()
        },
        Arc::new(StaticToken(TOKEN.into())),
    ));

    let watcher = JobWatcher::new(api, realtime, Duration::ZERO);
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        watcher.watch(Uuid::new_v4(), |_| {}),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome, JobView::Completed);
}
