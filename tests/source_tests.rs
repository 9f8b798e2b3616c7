use chrono::Utc;
use tokio::sync::mpsc;

use polysentry::ingestion::ws_listener::handle_text;
use polysentry::ingestion::{FeedEvent, Forwarder, WsEventSource};

fn trade_frame(i: usize) -> String {
    format!(
        r#"{{"event_type":"last_trade_price","asset_id":"tok","market":"0xm","price":"0.5",
            "size":"10","side":"BUY","taker_address":"0xw","transaction_hash":"0xtx{i}"}}"#
    )
}

#[tokio::test]
async fn test_full_queue_drops_newest_without_blocking() {
    let (forwarder, mut rx) = Forwarder::<FeedEvent>::channel(1_024, "test");
    let (errors_tx, _errors_rx) = mpsc::channel(8);

    // No consumer while the burst arrives
    let now = Utc::now();
    for i in 0..2_000 {
        handle_text(&trade_frame(i), now, &forwarder, &errors_tx);
    }
    assert_eq!(forwarder.dropped(), 976);

    let mut ids = Vec::new();
    while let Ok(event) = rx.try_recv() {
        let trade = event.into_trade().expect("trade event");
        ids.push(trade.transaction_id);
    }
    assert_eq!(ids.len(), 1_024);
    assert_eq!(ids.first().map(String::as_str), Some("0xtx0"));
    assert_eq!(ids.last().map(String::as_str), Some("0xtx1023"));
}

#[tokio::test]
async fn test_book_traffic_never_crowds_out_trades() {
    let (forwarder, mut rx) = Forwarder::<FeedEvent>::channel(1_024, "test");
    let (errors_tx, _errors_rx) = mpsc::channel(8);

    let now = Utc::now();
    let book = r#"{"event_type":"book","asset_id":"tok","market":"0xm","bids":[],"asks":[]}"#;
    for _ in 0..1_024 {
        assert_eq!(handle_text(book, now, &forwarder, &errors_tx), 0);
    }
    let price_change = r#"[{"event_type":"price_change","asset_id":"tok"},
        {"event_type":"tick_size_change","asset_id":"tok"}]"#;
    assert_eq!(handle_text(price_change, now, &forwarder, &errors_tx), 0);

    assert_eq!(handle_text(&trade_frame(7), now, &forwarder, &errors_tx), 1);
    assert_eq!(forwarder.dropped(), 0);

    let trade = rx.try_recv().expect("queued").into_trade().expect("trade event");
    assert_eq!(trade.transaction_id, "0xtx7");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_frame_reported_and_skipped() {
    let (forwarder, mut rx) = Forwarder::<FeedEvent>::channel(8, "test");
    let (errors_tx, mut errors_rx) = mpsc::channel(8);

    let forwarded = handle_text("{broken", Utc::now(), &forwarder, &errors_tx);
    assert_eq!(forwarded, 0);
    assert!(errors_rx.try_recv().is_ok());

    handle_text(&trade_frame(1), Utc::now(), &forwarder, &errors_tx);
    assert!(matches!(rx.try_recv(), Ok(FeedEvent::Trade(_))));
}

#[tokio::test]
async fn test_source_handle_tracks_subscriptions_and_closes() {
    // Nothing listens here; the task just keeps retrying until closed
    let (source, _events, _errors) =
        WsEventSource::spawn("ws://127.0.0.1:9".into(), vec!["a".into()], 16);

    source.subscribe(&["b".to_string(), "a".to_string()]);
    assert_eq!(source.active_assets(), vec!["a".to_string(), "b".to_string()]);

    source.unsubscribe(&["a".to_string()]);
    assert_eq!(source.active_assets(), vec!["b".to_string()]);

    source.close();
    source.close();
    assert!(source.is_closed());
    assert_eq!(source.stats().message_count, 0);
}
