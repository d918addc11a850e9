//! In-process BotNet nodes served over HTTP on 127.0.0.1 for cross-node tests.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use botnet_kernel::{BotnetNode, IncomingOutcome};
use botnet_memory::SqliteStore;
use botnet_types::agent::Agent;
use botnet_types::config::NodeConfig;
use botnet_types::error::BotnetError;
use botnet_types::manifest::NodeManifest;
use botnet_types::message::Message;
use botnet_types::node::NodeInfo;
use botnet_wire::message::{ApiResponse, FederationAck, PublicKeyRecord};
use botnet_wire::{StaticResolver, TxtResolver};
use std::sync::Arc;
use std::time::Duration;

pub struct TestNode {
    pub node: Arc<BotnetNode>,
    pub base_url: String,
    _dir: tempfile::TempDir,
}

/// A node with no seeds and an empty resolver.
pub async fn spawn_node(node_id: &str) -> TestNode {
    spawn_node_with(node_id, Vec::new(), Arc::new(StaticResolver::new())).await
}

pub async fn spawn_node_with(
    node_id: &str,
    seeds: Vec<String>,
    resolver: Arc<dyn TxtResolver>,
) -> TestNode {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let dir = tempfile::tempdir().unwrap();

    let mut config = NodeConfig {
        node_id: node_id.to_string(),
        domain: node_id.to_string(),
        public_url: Some(base_url.clone()),
        data_dir: dir.path().to_path_buf(),
        ..NodeConfig::default()
    };
    config.bootstrap.seeds = seeds;

    let storage = Arc::new(SqliteStore::open_in_memory().unwrap());
    let node = Arc::new(BotnetNode::boot_with(config, storage, resolver).unwrap());

    let app = router(node.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestNode {
        node,
        base_url,
        _dir: dir,
    }
}

/// Make `a` and `b` neighbors of each other.
pub async fn link(a: &TestNode, b: &TestNode) {
    a.node
        .topology()
        .add_neighbor(b.node.node_id(), &b.base_url)
        .await
        .unwrap();
    b.node
        .topology()
        .add_neighbor(a.node.node_id(), &a.base_url)
        .await
        .unwrap();
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn router(node: Arc<BotnetNode>) -> Router {
    Router::new()
        .route("/api/v1/info", get(info))
        .route("/api/v1/agents", get(agents))
        .route("/api/v1/agents/{id}/publickey", get(public_key))
        .route("/federation/agents/{id}/location", get(location))
        .route("/federation/messages", post(incoming))
        .route("/.well-known/botnet-node.json", get(manifest))
        .with_state(node)
}

async fn info(State(node): State<Arc<BotnetNode>>) -> Result<Json<NodeInfo>, StatusCode> {
    node.node_info()
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn agents(
    State(node): State<Arc<BotnetNode>>,
) -> Result<Json<ApiResponse<Vec<Agent>>>, StatusCode> {
    node.list_local_agents(1, 1000)
        .map(|page| Json(ApiResponse::ok(page.items)))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn public_key(
    State(node): State<Arc<BotnetNode>>,
    Path(id): Path<String>,
) -> Result<Json<PublicKeyRecord>, StatusCode> {
    node.get_agent_public_key(&id)
        .map(Json)
        .map_err(|_| StatusCode::NOT_FOUND)
}

async fn location(
    State(node): State<Arc<BotnetNode>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<botnet_wire::message::AgentLocation>>, StatusCode> {
    match node.agent_location(&id) {
        Ok(Some(loc)) => Ok(Json(ApiResponse::ok(loc))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn incoming(
    State(node): State<Arc<BotnetNode>>,
    Json(message): Json<Message>,
) -> (StatusCode, Json<ApiResponse<FederationAck>>) {
    let id = message.id.clone();
    match node.process_incoming_message(message).await {
        Ok(outcome) => {
            let status = match outcome {
                IncomingOutcome::Accepted => "accepted",
                IncomingOutcome::Duplicate => "duplicate",
            };
            (
                StatusCode::OK,
                Json(ApiResponse::ok(FederationAck {
                    message_id: id,
                    status: status.to_string(),
                })),
            )
        }
        Err(e) => {
            let code = match e {
                BotnetError::SecurityRejected { .. } => StatusCode::FORBIDDEN,
                BotnetError::RecipientNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (code, Json(ApiResponse::err(e.to_string())))
        }
    }
}

async fn manifest(State(node): State<Arc<BotnetNode>>) -> Result<Json<NodeManifest>, StatusCode> {
    node.get_node_manifest()
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
