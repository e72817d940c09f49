//! Fake LXD/Incus daemon served over a unix socket.
//!
//! The router mirrors the handful of `/1.0` endpoints the migration consumes.
//! State is shared behind a mutex so tests can script responses before a call
//! and inspect recorded requests afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use migrator_api_models::{
    ClusterMember, ClusterMemberStatePost, MemberStateAction, MemberStatus, Network, Operation,
    ResponseEnvelope, ServerInfo, StoragePool,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

/// Scriptable daemon state.
#[derive(Debug, Clone, Default)]
pub struct FakeDaemonState {
    /// Answer for `GET /1.0`.
    pub server_info: ServerInfo,
    /// Answers for `GET /1.0?target=<member>`; members without an entry get `server_info`.
    pub member_info: BTreeMap<String, ServerInfo>,
    /// Answer for `GET /1.0/storage-pools`.
    pub storage_pools: Vec<StoragePool>,
    /// Answers for `GET /1.0/storage-pools?target=<member>`.
    pub member_pools: BTreeMap<String, Vec<StoragePool>>,
    /// Answer for `GET /1.0/cluster/members`.
    pub members: Vec<ClusterMember>,
    /// Number of upcoming member listings that fail with a server error.
    pub member_list_failures: u32,
    /// Number of member listings served so far, failures included.
    pub member_list_calls: u32,
    /// Instance names reported by `GET /1.0/instances`.
    pub instances: Vec<String>,
    /// Answer for `GET /1.0/networks`.
    pub networks: Vec<Network>,
    /// Members whose state transitions fail.
    pub failing_members: BTreeSet<String>,
    /// State transitions requested so far, in order.
    pub state_requests: Vec<(String, ClusterMemberStatePost)>,
    /// Operations created so far.
    pub operations: BTreeMap<String, Operation>,
}

impl FakeDaemonState {
    /// Start from a server info payload.
    #[must_use]
    pub fn new(server_info: ServerInfo) -> Self {
        Self {
            server_info,
            ..Self::default()
        }
    }
}

type SharedState = Arc<Mutex<FakeDaemonState>>;

/// Running fake daemon; the server task stops when this value is dropped.
pub struct FakeDaemon {
    state: SharedState,
    socket: PathBuf,
    task: JoinHandle<()>,
    _dir: Option<TempDir>,
}

impl FakeDaemon {
    /// Serve `state` on a socket inside a fresh temp directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound. Must be called from
    /// within a tokio runtime.
    pub fn start(state: FakeDaemonState) -> Result<Self> {
        let dir = crate::fixtures::temp_dir()?;
        let socket = dir.path().join("unix.socket");
        Self::spawn(&socket, state, Some(dir))
    }

    /// Serve `state` on an explicit socket path, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound. Must be called from
    /// within a tokio runtime.
    pub fn start_at(socket: &Path, state: FakeDaemonState) -> Result<Self> {
        Self::spawn(socket, state, None)
    }

    fn spawn(socket: &Path, state: FakeDaemonState, dir: Option<TempDir>) -> Result<Self> {
        if let Some(parent) = socket.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(socket)?;
        let state = Arc::new(Mutex::new(state));
        let app = router(Arc::clone(&state));
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self {
            state,
            socket: socket.to_path_buf(),
            task,
            _dir: dir,
        })
    }

    /// Socket path clients should connect to.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Lock the shared state for inspection or scripting.
    ///
    /// Drop the guard before issuing requests against the daemon.
    pub fn state(&self) -> MutexGuard<'_, FakeDaemonState> {
        lock(&self.state)
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(state: &SharedState) -> MutexGuard<'_, FakeDaemonState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Deserialize)]
struct TargetQuery {
    target: Option<String>,
}

type Reply = (StatusCode, Json<ResponseEnvelope>);

fn sync_reply(metadata: Value) -> Reply {
    (StatusCode::OK, Json(ResponseEnvelope::sync(metadata)))
}

fn error_reply(status: StatusCode, message: &str) -> Reply {
    (
        status,
        Json(ResponseEnvelope::error(status.as_u16(), message)),
    )
}

fn encode<T: serde::Serialize>(value: &T) -> Reply {
    match serde_json::to_value(value) {
        Ok(metadata) => sync_reply(metadata),
        Err(err) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/1.0", get(server_info))
        .route("/1.0/storage-pools", get(storage_pools))
        .route("/1.0/cluster/members", get(cluster_members))
        .route("/1.0/cluster/members/{name}/state", post(member_state))
        .route("/1.0/operations/{id}/wait", get(wait_operation))
        .route("/1.0/instances", get(instances))
        .route("/1.0/networks", get(networks))
        .with_state(state)
}

async fn server_info(State(state): State<SharedState>, Query(query): Query<TargetQuery>) -> Reply {
    let guard = lock(&state);
    let info = query
        .target
        .as_ref()
        .and_then(|member| guard.member_info.get(member))
        .unwrap_or(&guard.server_info);
    encode(info)
}

async fn storage_pools(
    State(state): State<SharedState>,
    Query(query): Query<TargetQuery>,
) -> Reply {
    let guard = lock(&state);
    let pools = query
        .target
        .as_ref()
        .and_then(|member| guard.member_pools.get(member))
        .unwrap_or(&guard.storage_pools);
    encode(pools)
}

async fn cluster_members(State(state): State<SharedState>) -> Reply {
    let mut guard = lock(&state);
    guard.member_list_calls += 1;
    if guard.member_list_failures > 0 {
        guard.member_list_failures -= 1;
        return error_reply(StatusCode::SERVICE_UNAVAILABLE, "cluster database unavailable");
    }
    encode(&guard.members)
}

async fn member_state(
    State(state): State<SharedState>,
    UrlPath(name): UrlPath<String>,
    Json(request): Json<ClusterMemberStatePost>,
) -> Reply {
    let mut guard = lock(&state);
    if !guard
        .members
        .iter()
        .any(|member| member.server_name == name)
    {
        return error_reply(StatusCode::NOT_FOUND, "cluster member not found");
    }

    let id = format!("op-{}", guard.operations.len() + 1);
    let failed = guard.failing_members.contains(&name);
    let operation = if failed {
        Operation {
            id: id.clone(),
            status: "Failure".to_string(),
            status_code: 400,
            err: format!("failed to transition {name}"),
        }
    } else {
        if let Some(member) = guard
            .members
            .iter_mut()
            .find(|member| member.server_name == name)
        {
            match request.action {
                MemberStateAction::Evacuate => {
                    member.status = MemberStatus::Evacuated;
                    member.message = "Unavailable due to maintenance".to_string();
                }
                MemberStateAction::Restore => {
                    member.status = MemberStatus::Online;
                    member.message = "Fully operational".to_string();
                }
            }
        }
        Operation {
            id: id.clone(),
            status: "Success".to_string(),
            status_code: Operation::SUCCESS,
            err: String::new(),
        }
    };
    guard.state_requests.push((name, request));
    guard.operations.insert(id.clone(), operation.clone());

    (
        StatusCode::ACCEPTED,
        Json(ResponseEnvelope::async_operation(
            format!("/1.0/operations/{id}"),
            json!({"id": id, "status": "Running"}),
        )),
    )
}

async fn wait_operation(State(state): State<SharedState>, UrlPath(id): UrlPath<String>) -> Reply {
    let guard = lock(&state);
    guard.operations.get(&id).map_or_else(
        || error_reply(StatusCode::NOT_FOUND, "operation not found"),
        encode,
    )
}

async fn instances(State(state): State<SharedState>) -> Reply {
    let guard = lock(&state);
    let urls: Vec<String> = guard
        .instances
        .iter()
        .map(|name| format!("/1.0/instances/{name}?project=default"))
        .collect();
    encode(&urls)
}

async fn networks(State(state): State<SharedState>) -> Reply {
    let guard = lock(&state);
    encode(&guard.networks)
}
