//! HTTP and WebSocket gateway tests driving the router directly

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use bingohall::api::websocket::join_game;
use bingohall::api::{build_app, AppState, ConnectionBroadcaster, ServerMessage};
use bingohall::games::types::GameId;
use bingohall::config::HallConfig;
use bingohall::game_store;
use bingohall::games::card::CardGrid;
use bingohall::games::draw_engine::{DrawSeed, DrawSequence};
use bingohall::games::types::{ClaimKind, UserId};
use bingohall::hall::{BingoHall, HallServices};
use bingohall::ledger::{DenyListCompliance, InMemoryLedger};
use bingohall::metrics::HallMetrics;
use bingohall::storage::MemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    hall: Arc<BingoHall>,
    broadcaster: Arc<ConnectionBroadcaster>,
    ledger: Arc<InMemoryLedger>,
    store: Arc<MemoryStore>,
}

fn test_app() -> TestApp {
    let config = HallConfig::testing();
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let metrics = Some(Arc::new(HallMetrics::new().unwrap()));
    let broadcaster = Arc::new(ConnectionBroadcaster::new(metrics.clone()));

    let hall = BingoHall::start(
        config.clone(),
        HallServices {
            store: store.clone(),
            ledger: ledger.clone(),
            compliance: Arc::new(DenyListCompliance::new()),
            events: broadcaster.clone(),
            metrics: metrics.clone(),
        },
    )
    .unwrap();

    let state = Arc::new(AppState {
        hall: hall.clone(),
        broadcaster: broadcaster.clone(),
        metrics,
        version: "test".to_string(),
    });

    TestApp {
        router: build_app(state, &config.api),
        hall,
        broadcaster,
        ledger,
        store,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_and_jackpot() {
    let app = test_app();

    let (status, body) = send(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Running");

    let (status, body) = send(&app.router, "GET", "/jackpot", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jackpot"], 0);
}

#[tokio::test]
async fn test_game_lifecycle_over_http() {
    let app = test_app();

    let (status, body) = send(&app.router, "POST", "/games", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["game"]["id"].as_u64().unwrap();
    assert_eq!(body["game"]["status"], "scheduled");
    assert!(body["commitment"]["seedHash"].is_string());

    app.ledger.deposit(&UserId::new("ana"), 300);
    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/games/{}/cards", id),
        Some(json!({ "userId": "ana", "price": 300 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["userId"], "ana");

    let (status, _) = send(&app.router, "POST", &format!("/games/{}/start", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, draw) = send(&app.router, "POST", &format!("/games/{}/draw", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(draw["sequenceIndex"], 1);

    let (status, verification) =
        send(&app.router, "GET", &format!("/games/{}/draws/1/verify", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verification["verified"], true);

    let (status, report) = send(&app.router, "GET", &format!("/games/{}/fairness", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["drawsTotal"], 1);

    let (status, outcome) = send(&app.router, "POST", &format!("/games/{}/stop", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["reason"], "force_stopped");

    let (status, body) = send(&app.router, "POST", &format!("/games/{}/start", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_STATE");

    let (status, body) = send(&app.router, "GET", "/games", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["games"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_game_returns_404_with_request_id() {
    let app = test_app();
    let request = Request::builder()
        .uri("/games/99")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-request-id"], "req-42");

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["request_id"], "req-42");
    assert_eq!(body["error"]["code"], "GAME_NOT_FOUND");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_counters() {
    let app = test_app();
    send(&app.router, "POST", "/games", None).await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("bingohall_games_scheduled_total 1"));
}

#[tokio::test]
async fn test_draws_reach_subscribed_sockets() {
    let app = test_app();
    let game_id = app.hall.schedule_game(0).unwrap().game.game.id;

    let (watcher, mut rx) = app.broadcaster.connect(UserId::new("viewer"));
    let (_idle, mut idle_rx) = app.broadcaster.connect(UserId::new("idle"));
    app.broadcaster.subscribe(watcher, game_id);

    app.hall.start_game(game_id).await.unwrap();
    let draw = app.hall.draw_next(game_id).await.unwrap();

    match rx.recv().await {
        Some(ServerMessage::NumberDrawn {
            game_id: got,
            number,
            sequence_index,
        }) => {
            assert_eq!(got, game_id);
            assert_eq!(number, draw.number);
            assert_eq!(sequence_index, 1);
        }
        other => panic!("unexpected message {:?}", other),
    }
    assert!(idle_rx.try_recv().is_err());

    // A subscriber going away leaves the game running
    app.broadcaster.unsubscribe(watcher);
    assert!(app.hall.draw_next(game_id).await.is_ok());
}

#[tokio::test]
async fn test_route_claim_acknowledges_then_fans_out_wins() {
    let app = test_app();
    let game_id = app.hall.schedule_game(0).unwrap().game.game.id;

    let record = game_store::load_seed(app.store.as_ref(), game_id).unwrap().unwrap();
    let mut sequence = DrawSequence::new(game_id, DrawSeed::from_hex(&record.seed_hex).unwrap());
    let order: Vec<u8> = (0..24).map(|_| sequence.next().unwrap().0).collect();
    let mut values = order.iter().copied();
    let mut cells = [[None; 5]; 5];
    for (r, row) in cells.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            if !(r == 2 && c == 2) {
                *cell = values.next();
            }
        }
    }

    let ana = UserId::new("ana");
    app.ledger.deposit(&ana, 100);
    let card = app
        .hall
        .purchase_card(ana.clone(), game_id, Some(CardGrid(cells)), 100)
        .await
        .unwrap();

    let (claimant, mut claimant_rx) = app.broadcaster.connect(ana);
    let (other, mut other_rx) = app.broadcaster.connect(UserId::new("bo"));
    app.broadcaster.subscribe(claimant, game_id);
    app.broadcaster.subscribe(other, game_id);

    app.hall.start_game(game_id).await.unwrap();
    let first = app.hall.draw_next(game_id).await.unwrap();
    while let Ok(message) = claimant_rx.try_recv() {
        assert!(matches!(message, ServerMessage::NumberDrawn { .. }));
    }
    while other_rx.try_recv().is_ok() {}

    // Nothing complete yet: only the claimant hears about the rejection
    let verdict = app
        .broadcaster
        .route_claim(claimant, game_id, card.id, ClaimKind::Quine, &app.hall)
        .await
        .unwrap();
    assert!(!verdict.valid);
    assert_eq!(verdict.reason.as_deref(), Some("NUMBER_NOT_DRAWN"));
    assert!(matches!(claimant_rx.recv().await, Some(ServerMessage::ClaimReceived { .. })));
    assert!(matches!(
        claimant_rx.recv().await,
        Some(ServerMessage::ClaimValidated { ref result, .. }) if !result.valid
    ));
    assert!(other_rx.try_recv().is_err());
    assert_eq!(first.sequence_index, 1);

    for _ in 0..4 {
        app.hall.draw_next(game_id).await.unwrap();
    }
    while claimant_rx.try_recv().is_ok() {}
    while other_rx.try_recv().is_ok() {}

    let verdict = app
        .broadcaster
        .route_claim(claimant, game_id, card.id, ClaimKind::Quine, &app.hall)
        .await
        .unwrap();
    assert!(verdict.valid);
    assert_eq!(verdict.call_count, Some(5));
    assert!(matches!(claimant_rx.recv().await, Some(ServerMessage::ClaimReceived { .. })));
    assert!(matches!(
        claimant_rx.recv().await,
        Some(ServerMessage::ClaimValidated { ref result, .. }) if result.valid
    ));
    assert!(matches!(
        other_rx.recv().await,
        Some(ServerMessage::ClaimValidated { ref claim, .. }) if claim.game_id == game_id
    ));
}

#[tokio::test]
async fn test_join_game_subscribes_before_the_snapshot() {
    let app = test_app();
    let game_id = app.hall.schedule_game(0).unwrap().game.game.id;
    app.hall.start_game(game_id).await.unwrap();
    for _ in 0..3 {
        app.hall.draw_next(game_id).await.unwrap();
    }

    let (viewer, mut rx) = app.broadcaster.connect(UserId::new("viewer"));
    join_game(&app.broadcaster, &app.hall, viewer, game_id);
    assert_eq!(app.broadcaster.subscriber_count(game_id), 1);

    match rx.recv().await {
        Some(ServerMessage::GameState { game }) => assert_eq!(game.game.draws.len(), 3),
        other => panic!("unexpected message {:?}", other),
    }

    app.hall.draw_next(game_id).await.unwrap();
    assert!(matches!(
        rx.recv().await,
        Some(ServerMessage::NumberDrawn { sequence_index: 4, .. })
    ));

    // Unknown games answer with an error and leave no subscription behind
    join_game(&app.broadcaster, &app.hall, viewer, GameId(404));
    assert!(matches!(
        rx.recv().await,
        Some(ServerMessage::Error { ref code, .. }) if code == "GAME_NOT_FOUND"
    ));
    assert_eq!(app.broadcaster.subscriber_count(GameId(404)), 0);
}
