use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use holpaca_agent::{Agent, AgentConfig};
use holpaca_core::engine::CacheEngine;
use holpaca_engine::MemEngine;
use holpaca_orchestrator::controller::{Controller, Motivation};
use holpaca_orchestrator::proxy::{CacheResize, PoolResize, ProxyDirectory, ProxyManager};
use holpaca_orchestrator::service;
use holpaca_proto::{CacheStatus, GetStatusResponse, ResizeRequest};

/// Minimal agent stand-in: serves a fixed status and counts resize calls.
async fn spawn_fake_agent(status: CacheStatus) -> (String, Arc<AtomicUsize>) {
    let resizes = Arc::new(AtomicUsize::new(0));
    let counter = resizes.clone();
    let app = Router::new()
        .route(
            "/status",
            get(move || {
                let cache_status = status.clone();
                async move { Json(GetStatusResponse { cache_status }) }
            }),
        )
        .route(
            "/resize",
            post(move |Json(_): Json<ResizeRequest>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::OK
                }
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, resizes)
}

async fn wait_for_proxies(directory: &ProxyDirectory, expected: usize) {
    for _ in 0..500 {
        if directory.len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("directory never reached {expected} proxies");
}

// ---------------------------------------------------------------------------
// Registration semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_is_idempotent() {
    let directory = ProxyDirectory::new();
    directory.connect("10.0.0.1:7000").await;
    directory.connect("10.0.0.1:7000").await;
    assert_eq!(directory.len().await, 1, "a repeated connect must not add a proxy");
}

#[tokio::test]
async fn disconnect_tolerates_absent_names() {
    let directory = ProxyDirectory::new();
    directory.connect("10.0.0.1:7000").await;
    directory.disconnect("10.0.0.1:7000").await;
    directory.disconnect("10.0.0.1:7000").await;
    assert!(directory.is_empty().await);
}

// ---------------------------------------------------------------------------
// Fan-out and the plan-length guard
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_plans_are_discarded_entirely() {
    let (addr_a, hits_a) = spawn_fake_agent(CacheStatus::default()).await;
    let (addr_b, hits_b) = spawn_fake_agent(CacheStatus::default()).await;
    let directory = ProxyDirectory::new();
    directory.connect(&addr_a).await;
    directory.connect(&addr_b).await;

    // One entry for a two-agent fleet: nothing may be dispatched.
    directory
        .resize(vec![CacheResize {
            name: addr_a.clone(),
            pools: vec![PoolResize { id: 0, size: 100 }],
        }])
        .await;
    assert_eq!(hits_a.load(Ordering::SeqCst), 0);
    assert_eq!(hits_b.load(Ordering::SeqCst), 0);

    // A full-fleet plan goes through.
    directory
        .resize(vec![
            CacheResize { name: addr_a.clone(), pools: vec![] },
            CacheResize { name: addr_b.clone(), pools: vec![] },
        ])
        .await;
    assert_eq!(hits_a.load(Ordering::SeqCst), 1);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_agents_are_skipped_but_not_evicted() {
    let (addr, _) = spawn_fake_agent(CacheStatus::default()).await;
    let directory = ProxyDirectory::new();
    directory.connect(&addr).await;
    // Nothing listens here; the round should simply miss this agent.
    directory.connect("127.0.0.1:9").await;

    let statuses = directory.get_status().await;
    assert_eq!(statuses.len(), 1, "only the live agent answers");
    assert!(statuses.contains_key(&addr));
    assert_eq!(directory.len().await, 2, "failures must not evict proxies");
}

// ---------------------------------------------------------------------------
// End to end: real agent, registration, proportional split
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn agent_registers_and_motivation_splits_proportionally() {
    let directory = ProxyDirectory::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let orchestrator_addr = listener.local_addr().unwrap().to_string();
    let app = service::router(directory.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let engine = Arc::new(MemEngine::new(1_000));
    let agent_engine: Arc<dyn CacheEngine> = engine.clone();
    // The agent owns a runtime and blocks while registering; keep it off
    // the async threads.
    let agent = tokio::task::spawn_blocking(move || {
        Agent::new(
            AgentConfig {
                address: Some("127.0.0.1:0".into()),
                orchestrator_address: Some(orchestrator_addr),
                ..Default::default()
            },
            agent_engine,
        )
        .expect("agent startup")
    })
    .await
    .unwrap();

    wait_for_proxies(&directory, 1).await;

    let p0 = agent.add_pool("hot", 500, 0.0, 3.0).unwrap();
    let p1 = agent.add_pool("cold", 500, 0.0, 1.0).unwrap();

    let statuses = directory.get_status().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses.values().next().unwrap().pools.len(), 2);

    Motivation.tick(&directory).await;
    assert_eq!(engine.pool_info(p0).unwrap().pool_size, 750);
    assert_eq!(engine.pool_info(p1).unwrap().pool_size, 250);

    // Dropping the agent deregisters it.
    tokio::task::spawn_blocking(move || drop(agent)).await.unwrap();
    wait_for_proxies(&directory, 0).await;
}
