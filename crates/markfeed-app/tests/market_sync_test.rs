//! MarketSync lifecycle integration tests.
//!
//! Exercises the full path against a local push server:
//! - Subscription and connection state
//! - Push books and price updates into the store and valuation engine
//! - Pull fallback when the push channel is unreachable
//! - Idempotent topic teardown

mod common;
use common::mock_ws::MockWsServer;
use common::{eventually, fast_config, CountingFetcher};

use markfeed_app::MarketSync;
use markfeed_core::{ConnectionState, Position, PositionId, PositionSide, Price, Size, Source, Symbol, Topic};
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn btc() -> Symbol {
    Symbol::new("BTCUSDT").unwrap()
}

fn start(sync: &Arc<MarketSync>) -> tokio::task::JoinHandle<()> {
    let sync = sync.clone();
    tokio::spawn(async move {
        sync.run().await.unwrap();
    })
}

async fn wait_connected(sync: &MarketSync, topic: &Topic) -> bool {
    eventually(WAIT, || async { sync.connection_state(topic) == Some(ConnectionState::Connected) }).await
}

#[tokio::test]
async fn test_subscribes_and_applies_pushed_book() {
    let server = MockWsServer::start().await;
    let fetcher = Arc::new(CountingFetcher::failing());
    let sync = Arc::new(MarketSync::with_fetcher(fast_config(&server.url()), fetcher));
    let runner = start(&sync);

    let topic = Topic::order_book(btc());
    let mut rx = sync.subscribe_order_book(&btc());
    assert!(sync.open(topic.clone()));
    assert!(!sync.open(topic.clone()));
    assert!(wait_connected(&sync, &topic).await);

    let subscribed = eventually(WAIT, || async {
        server.received_messages().await.iter().any(|m| {
            let json: Value = serde_json::from_str(m).unwrap();
            json["method"] == "subscribe"
                && json["params"]["type"] == "orderbook"
                && json["params"]["symbol"] == "BTCUSDT"
        })
    })
    .await;
    assert!(subscribed, "subscribe message not received");

    server.push(r#"{"type":"orderbook","data":{"asks":[["101","2"],["100.5","1"]],"bids":[["99","3"],["bad","1"]]}}"#);

    tokio::time::timeout(WAIT, rx.wait_for(|s| s.is_some())).await.unwrap().unwrap();
    let snapshot = sync.store().get_snapshot(&btc()).unwrap();
    assert_eq!(snapshot.source(), Source::Push);
    assert_eq!(snapshot.best_ask(), Some(Price::new(dec!(100.5))));
    assert_eq!(snapshot.best_bid(), Some(Price::new(dec!(99))));
    assert_eq!(snapshot.bids().len(), 1);
    assert!(!snapshot.is_synthetic());

    // No pulls while the push channel is healthy.
    let polls = sync.poll_count(&topic);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sync.poll_count(&topic), polls);

    sync.shutdown().await;
    runner.await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_price_update_revalues_position() {
    let server = MockWsServer::start().await;
    let sync = Arc::new(MarketSync::with_fetcher(
        fast_config(&server.url()),
        Arc::new(CountingFetcher::failing()),
    ));
    let runner = start(&sync);
    let mut updates = sync.subscribe_position_updates();

    sync.positions()
        .upsert_position(Position::open(
            PositionId::new("p-1"),
            btc(),
            PositionSide::Long,
            Size::new(dec!(0.1)),
            Price::new(dec!(50000)),
            dec!(10),
            dec!(500),
        ))
        .await
        .unwrap();

    let _ = sync.watch_symbol(&btc());
    assert!(wait_connected(&sync, &Topic::ticker(btc())).await);
    assert!(eventually(WAIT, || async { server.connection_count().await >= 2 }).await);
    assert!(
        eventually(WAIT, || async {
            server.received_messages().await.iter().any(|m| m.contains("price_update"))
        })
        .await
    );

    server.push(r#"{"type":"price_update","data":{"BTCUSDT":"55000","ETHUSDT":"bad"}}"#);

    let revalued = eventually(WAIT, || async {
        sync.positions()
            .position(&PositionId::new("p-1"))
            .map_or(false, |p| p.unrealized_pnl == dec!(500))
    })
    .await;
    assert!(revalued, "position was not revalued");

    let position = sync.positions().position(&PositionId::new("p-1")).unwrap();
    assert_eq!(position.roe_percent, dec!(100));
    assert_eq!(position.entry_price, Price::new(dec!(50000)));
    assert_eq!(sync.store().last_price(&btc()), Some(Price::new(dec!(55000))));

    // Opened, then at least one revaluation.
    assert!(updates.recv().await.is_ok());
    assert!(updates.recv().await.is_ok());

    sync.shutdown().await;
    runner.await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_order_book_only_symbol_revalues_on_mid_change() {
    let server = MockWsServer::start().await;
    let sync = Arc::new(MarketSync::with_fetcher(
        fast_config(&server.url()),
        Arc::new(CountingFetcher::failing()),
    ));
    let runner = start(&sync);

    let id = PositionId::new("p-2");
    sync.positions()
        .upsert_position(Position::open(
            id.clone(),
            btc(),
            PositionSide::Long,
            Size::new(dec!(0.1)),
            Price::new(dec!(50000)),
            dec!(10),
            dec!(500),
        ))
        .await
        .unwrap();

    let topic = Topic::order_book(btc());
    sync.open(topic.clone());
    assert!(wait_connected(&sync, &topic).await);
    assert!(eventually(WAIT, || async { !server.received_messages().await.is_empty() }).await);

    server.push(r#"{"type":"orderbook","data":{"asks":[["55001","1"]],"bids":[["54999","1"]]}}"#);

    let revalued = eventually(WAIT, || async {
        sync.positions()
            .position(&id)
            .map_or(false, |p| p.mark_price == Price::new(dec!(55000)))
    })
    .await;
    assert!(revalued, "position mark did not follow the book mid");
    assert_eq!(sync.positions().position(&id).unwrap().unrealized_pnl, dec!(500));

    sync.shutdown().await;
    runner.await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_push_channel_falls_back_to_pull() {
    let fetcher = Arc::new(CountingFetcher::default());
    let sync = Arc::new(MarketSync::with_fetcher(fast_config("ws://127.0.0.1:9"), fetcher.clone()));
    let runner = start(&sync);

    let topic = Topic::order_book(btc());
    sync.open(topic.clone());

    let in_fallback = eventually(WAIT, || async {
        sync.connection_state(&topic) == Some(ConnectionState::Fallback)
    })
    .await;
    assert!(in_fallback, "topic never reached fallback");

    let pulled = eventually(WAIT, || async {
        sync.store()
            .get_snapshot(&btc())
            .map_or(false, |s| s.source() == Source::Pull)
    })
    .await;
    assert!(pulled);
    assert!(fetcher.calls() >= 1);

    let snapshot = sync.store().get_snapshot(&btc()).unwrap();
    assert_eq!(snapshot.mid_price(), Some(Price::new(dec!(100))));
    assert!(!snapshot.is_synthetic());

    // Polling keeps going in fallback.
    let calls = fetcher.calls();
    assert!(eventually(WAIT, || async { fetcher.calls() > calls }).await);

    assert!(sync.reset_fallback(&topic));
    assert!(!sync.reset_fallback(&Topic::ticker(btc())));

    sync.shutdown().await;
    runner.await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_stops_polling() {
    let fetcher = Arc::new(CountingFetcher::default());
    let sync = Arc::new(MarketSync::with_fetcher(fast_config("ws://127.0.0.1:9"), fetcher.clone()));
    let runner = start(&sync);

    let topic = Topic::order_book(btc());
    sync.open(topic.clone());
    assert!(eventually(WAIT, || async { fetcher.calls() >= 1 }).await);

    assert!(sync.close(&topic));
    assert!(!sync.close(&topic));
    assert_eq!(sync.connection_state(&topic), None);
    assert!(sync.topics().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = fetcher.calls();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fetcher.calls(), calls, "closed topic kept polling");

    // Reopening after close starts a fresh session.
    assert!(sync.open(topic.clone()));
    assert!(sync.connection_state(&topic).is_some());

    sync.shutdown().await;
    runner.await.unwrap();
    assert!(sync.is_shutdown());
    assert!(!sync.open(topic));
}

#[tokio::test]
async fn test_silent_connection_is_forced_to_reconnect() {
    let server = MockWsServer::start().await;
    let mut config = fast_config(&server.url());
    config.staleness.order_book_threshold_ms = 100;
    let sync = Arc::new(MarketSync::with_fetcher(config, Arc::new(CountingFetcher::failing())));
    let runner = start(&sync);

    let topic = Topic::order_book(btc());
    sync.open(topic.clone());
    assert!(wait_connected(&sync, &topic).await);

    let reconnected = eventually(WAIT, || async { server.connection_count().await >= 2 }).await;
    assert!(reconnected, "silent topic was not reconnected");

    sync.shutdown().await;
    runner.await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_run_twice_is_rejected() {
    let sync = Arc::new(MarketSync::with_fetcher(
        fast_config("ws://127.0.0.1:9"),
        Arc::new(CountingFetcher::failing()),
    ));
    let runner = start(&sync);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(matches!(sync.run().await, Err(markfeed_app::AppError::AlreadyRunning)));

    sync.shutdown().await;
    runner.await.unwrap();
}
