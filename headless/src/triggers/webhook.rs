//! HTTP endpoint accepting tasks.
//!
//! The server runs on its own tokio runtime thread so the scheduler stays
//! synchronous. Handlers and the trigger share one in-memory queue.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::core::types::{Task, TaskResult};
use crate::triggers::Trigger;

pub const SECRET_HEADER: &str = "x-webhook-secret";

const COMPLETED_CAPACITY: usize = 100;
const RECENT_COMPLETED: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueuedTask {
    #[serde(skip)]
    task: Task,
    id: String,
    added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTask {
    pub task_id: String,
    pub result: TaskResult,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Queue {
    pending: VecDeque<QueuedTask>,
    completed: VecDeque<CompletedTask>,
    current: Option<String>,
}

/// State shared between the HTTP handlers and the trigger.
#[derive(Debug, Clone, Default)]
pub struct WebhookState {
    queue: Arc<Mutex<Queue>>,
    secret: Option<String>,
}

impl WebhookState {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            queue: Arc::default(),
            secret,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a task and return its 1-based queue position.
    pub fn enqueue(&self, task: Task) -> usize {
        let mut queue = self.lock();
        queue.pending.push_back(QueuedTask {
            id: task.id.clone(),
            task,
            added_at: Utc::now(),
        });
        queue.pending.len()
    }

    fn pop(&self) -> Option<Task> {
        let mut queue = self.lock();
        let next = queue.pending.pop_front().map(|queued| queued.task);
        queue.current = next.as_ref().map(|task| task.id.clone());
        next
    }

    fn complete(&self, result: &TaskResult) {
        let mut queue = self.lock();
        queue.completed.push_back(CompletedTask {
            task_id: result.task_id.clone(),
            result: result.clone(),
            completed_at: Utc::now(),
        });
        while queue.completed.len() > COMPLETED_CAPACITY {
            queue.completed.pop_front();
        }
        queue.current = None;
    }

    pub fn queue_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn completed_len(&self) -> usize {
        self.lock().completed.len()
    }

    pub fn current_task(&self) -> Option<String> {
        self.lock().current.clone()
    }
}

#[derive(Debug, Deserialize)]
struct TaskRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

/// Build the webhook router.
pub fn router(state: WebhookState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/task", post(post_task))
        .route("/status", get(get_status))
        .route("/health", get(health))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_secret,
        ))
        .layer(cors)
        .with_state(state)
}

async fn require_secret(
    State(state): State<WebhookState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(secret) = &state.secret {
        let provided = request
            .headers()
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(secret.as_str()) {
            warn!(path = %request.uri().path(), "rejected request with bad secret");
            return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    }
    next.run(request).await
}

/// POST /task - queue a new task.
async fn post_task(State(state): State<WebhookState>, body: Bytes) -> Response {
    let raw: &[u8] = if body.is_empty() { b"{}" } else { &body };
    let request: TaskRequest = match serde_json::from_slice(raw) {
        Ok(request) => request,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {err}")),
    };
    let Some(prompt) = request.prompt.filter(|p| !p.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing prompt");
    };

    let id = request
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("task-{}", Utc::now().timestamp_millis()));
    let position = state.enqueue(Task::new(id.clone(), prompt));
    info!(task_id = %id, position, "task queued");

    Json(json!({
        "success": true,
        "taskId": id,
        "queuePosition": position,
    }))
    .into_response()
}

/// GET /status - current task, queue and recent results.
async fn get_status(State(state): State<WebhookState>) -> Json<serde_json::Value> {
    let queue = state.lock();
    let skip = queue.completed.len().saturating_sub(RECENT_COMPLETED);
    let recent: Vec<&CompletedTask> = queue.completed.iter().skip(skip).collect();
    Json(json!({
        "currentTask": queue.current,
        "queueLength": queue.pending.len(),
        "queue": queue.pending.iter().collect::<Vec<_>>(),
        "recentCompleted": recent,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

struct Server {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Trigger fed by HTTP requests.
pub struct WebhookTrigger {
    port: u16,
    state: WebhookState,
    server: Option<Server>,
    local_addr: Option<SocketAddr>,
}

impl WebhookTrigger {
    pub fn new(port: u16, secret: Option<String>) -> Self {
        Self {
            port,
            state: WebhookState::new(secret),
            server: None,
            local_addr: None,
        }
    }

    pub fn state(&self) -> &WebhookState {
        &self.state
    }

    /// Address the server is bound to once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Trigger for WebhookTrigger {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn next_task(&mut self) -> Result<Option<Task>> {
        Ok(self.state.pop())
    }

    fn on_task_complete(&mut self, result: &TaskResult) -> Result<()> {
        self.state.complete(result);
        info!(task_id = %result.task_id, status = %result.status, "task completed");
        Ok(())
    }

    fn on_startup(&mut self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .with_context(|| format!("bind webhook port {}", self.port))?;
        listener
            .set_nonblocking(true)
            .context("set listener non-blocking")?;
        let addr = listener.local_addr().context("read listener address")?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("build webhook runtime")?;
        let app = router(self.state.clone());
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let handle = thread::Builder::new()
            .name("webhook".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            error!(err = %err, "failed to register webhook listener");
                            return;
                        }
                    };
                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(err) = served {
                        error!(err = %err, "webhook server stopped with error");
                    }
                });
            })
            .context("spawn webhook thread")?;

        info!(addr = %addr, "webhook listening");
        self.local_addr = Some(addr);
        self.server = Some(Server { shutdown, handle });
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<()> {
        let Some(server) = self.server.take() else {
            return Ok(());
        };
        // The receiver is gone only if the server already exited.
        let _ = server.shutdown.send(());
        server
            .handle
            .join()
            .map_err(|_| anyhow!("webhook thread panicked"))?;
        info!("webhook server stopped");
        Ok(())
    }
}
