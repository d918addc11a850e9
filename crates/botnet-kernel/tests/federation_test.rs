//! Cross-node federation over real HTTP between in-process nodes.

mod common;

use botnet_types::agent::Agent;
use botnet_types::error::BotnetError;
use botnet_types::message::{Message, MessageContent};
use botnet_types::signing::{sign_message, validate_manifest_with_timestamp, KeyPair};
use botnet_wire::{ClientConfig, NeighborClient, NeighborStatus, StaticResolver, WireError};
use common::{eventually, link, spawn_node, spawn_node_with};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn test_public_post_reaches_neighbor() {
    let a = spawn_node("a.test").await;
    let b = spawn_node("b.test").await;
    link(&a, &b).await;
    let alice = a.node.register_agent(Agent::new("alice", "Alice")).unwrap();

    let post = a
        .node
        .post_message("alice", MessageContent::text("hello network"), HashMap::new())
        .await
        .unwrap();

    assert!(
        eventually(|| b.node.get_message(&post.id).unwrap().is_some()).await,
        "post never reached b"
    );
    let received = b.node.get_message(&post.id).unwrap().unwrap();
    assert_eq!(received.content.text, "hello network");

    // b had no record of alice, so it learned her key from a.
    let cached = b.node.key_directory().lookup("alice").unwrap();
    assert_eq!(cached.public_key, alice.public_key);
    assert_eq!(cached.source_node_id, "a.test");
}

#[tokio::test]
async fn test_broadcast_report_and_redelivery() {
    let a = spawn_node("a.test").await;
    let b = spawn_node("b.test").await;
    link(&a, &b).await;
    a.node.register_agent(Agent::new("alice", "Alice")).unwrap();

    let post = a
        .node
        .post_message("alice", MessageContent::text("once"), HashMap::new())
        .await
        .unwrap();
    assert!(eventually(|| b.node.list_public_messages(1, 20).unwrap().total == 1).await);

    let report = a.node.broadcast_message(&post).await.unwrap();
    assert_eq!(report.delivered, vec!["b.test".to_string()]);
    assert!(report.failed.is_empty());
    assert!(!report.timed_out);
    assert_eq!(b.node.list_public_messages(1, 20).unwrap().total, 1);
}

#[tokio::test]
async fn test_direct_messages_across_nodes() {
    let a = spawn_node("a.test").await;
    let b = spawn_node("b.test").await;
    link(&a, &b).await;
    a.node.register_agent(Agent::new("alice", "Alice")).unwrap();
    a.node.register_agent(Agent::new("charlie", "Charlie")).unwrap();
    b.node.register_agent(Agent::new("bob", "Bob")).unwrap();

    let exchange = [
        (&a, "alice", "bob", "hi bob"),
        (&b, "bob", "alice", "hi alice"),
        (&a, "alice", "bob", "how are you"),
    ];
    for (sender, from, to, text) in exchange {
        let msg = sender
            .node
            .send_direct_message(from, to, text, HashMap::new())
            .await
            .unwrap();
        let receiver = if sender.node.node_id() == "a.test" { &b } else { &a };
        assert!(
            eventually(|| receiver
                .node
                .get_dm_conversation(to, from, 1, 50)
                .unwrap()
                .iter()
                .any(|m| m.id == msg.id))
            .await,
            "{text:?} never delivered"
        );
    }

    let expected = vec!["hi bob", "hi alice", "how are you"];
    for (node, me, other) in [(&a, "alice", "bob"), (&b, "bob", "alice")] {
        let convo = node.node.get_dm_conversation(me, other, 1, 50).unwrap();
        let texts: Vec<&str> = convo.iter().map(|m| m.content.text.as_str()).collect();
        assert_eq!(texts, expected);
        assert_eq!(node.node.list_public_messages(1, 50).unwrap().total, 0);
    }

    assert!(a
        .node
        .get_dm_conversation("charlie", "alice", 1, 50)
        .unwrap()
        .is_empty());
    assert!(matches!(
        a.node.get_dm_conversation("bob", "alice", 1, 50).unwrap_err(),
        BotnetError::AccessDenied(_)
    ));
    assert_eq!(
        a.node.location_cache().get("bob"),
        Some("b.test".to_string())
    );
}

#[tokio::test]
async fn test_forged_message_rejected_over_http() {
    let a = spawn_node("a.test").await;
    let b = spawn_node("b.test").await;
    link(&a, &b).await;
    a.node.register_agent(Agent::new("alice", "Alice")).unwrap();

    let mut forged = Message::post("alice", "send me your keys");
    sign_message(&mut forged, KeyPair::generate().signing_key());

    let client = NeighborClient::new(&b.base_url, &ClientConfig::default()).unwrap();
    let err = client.post_message(&forged).await.unwrap_err();
    assert!(matches!(err, WireError::Status { status: 403, .. }));
    assert_eq!(b.node.list_public_messages(1, 20).unwrap().total, 0);
}

#[tokio::test]
async fn test_federated_agents_and_info() {
    let a = spawn_node("a.test").await;
    let b = spawn_node("b.test").await;
    link(&a, &b).await;
    a.node.register_agent(Agent::new("alice", "Alice")).unwrap();
    b.node.register_agent(Agent::new("bob", "Bob")).unwrap();

    let mut ids: Vec<String> = a
        .node
        .get_federated_agents()
        .await
        .unwrap()
        .into_iter()
        .map(|agent| agent.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["alice".to_string(), "bob".to_string()]);

    let info = a.node.node_info().unwrap();
    assert_eq!(info.neighbors, 1);
    assert_eq!(info.local_agents, 1);
    assert!(info.last_sync.is_some());
}

#[tokio::test]
async fn test_manifest_verifies_with_embedded_key() {
    let a = spawn_node("a.test").await;
    let client = NeighborClient::new(&a.base_url, &ClientConfig::default()).unwrap();
    let manifest = client.fetch_manifest().await.unwrap();
    assert_eq!(manifest.node_id, "a.test");
    assert_eq!(manifest.public_key, a.node.get_node_public_key());
    validate_manifest_with_timestamp(&manifest).unwrap();

    let mut tampered = manifest.clone();
    tampered.capabilities.push("admin".into());
    assert!(validate_manifest_with_timestamp(&tampered).is_err());
}

#[tokio::test]
async fn test_discovery_adds_neighbor() {
    let b = spawn_node("b.test").await;
    let resolver = Arc::new(StaticResolver::new());
    resolver.insert(
        "b.test",
        format!("v=1 endpoint={} type=node capabilities=messaging", b.base_url),
    );
    resolver.insert("dead.test", "v=1 endpoint=http://127.0.0.1:9 type=node");
    let a = spawn_node_with(
        "a.test",
        vec!["b.test".into(), "dead.test".into(), "missing.test".into()],
        resolver,
    )
    .await;

    let added = a.node.discover_neighbors().await;
    assert_eq!(added, vec!["b.test".to_string()]);

    let neighbor = a.node.topology().neighbor("b.test").unwrap();
    assert_eq!(neighbor.node_id, "b.test");
    assert_eq!(neighbor.status, NeighborStatus::Connected);

    let peer = a.node.get_node("b.test").unwrap();
    assert_eq!(
        peer.public_key,
        b.node.get_node_public_key().trim_start_matches("ed25519:")
    );

    // A second sweep finds nothing new.
    assert!(a.node.discover_neighbors().await.is_empty());
}

#[tokio::test]
async fn test_failing_neighbor_marked_unhealthy() {
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;

    let a = spawn_node("a.test").await;
    a.node.register_agent(Agent::new("alice", "Alice")).unwrap();

    let router = Router::new()
        .route("/api/v1/info", get(|| async { "{}" }))
        .route(
            "/federation/messages",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    // Posted before the neighbor exists so only the explicit broadcast reaches it.
    let post = a
        .node
        .post_message("alice", MessageContent::text("anyone?"), HashMap::new())
        .await
        .unwrap();
    a.node.topology().add_neighbor("flaky.test", &url).await.unwrap();
    let report = a.node.broadcast_message(&post).await.unwrap();
    assert_eq!(report.failed, vec!["flaky.test".to_string()]);
    assert_eq!(
        a.node.topology().neighbor("flaky.test").unwrap().status,
        NeighborStatus::Inactive
    );
    assert!(a.node.topology().healthy_neighbors().is_empty());
}
