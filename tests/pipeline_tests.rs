//! End-to-end pipeline tests against real local feed endpoints

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use ratebridge::calc::{DerivationEngine, FormulaSet};
    use ratebridge::config::{LineFeedConfig, RestFeedConfig};
    use ratebridge::dispatch::Dispatcher;
    use ratebridge::feed::sources::{LineProtocolCollector, RestPollingCollector};
    use ratebridge::feed::{pump_events, FeedEvent, RateCollector, RateListener};
    use ratebridge::sink::MemorySink;
    use ratebridge::types::ConnectionState;

    const FORMULAS: &str = r#"{
        "direct":  { "bid": "{base}{quote}_bid", "ask": "{base}{quote}_ask" },
        "inverse": { "bid": "{quote}{base}_bid", "ask": "{quote}{base}_ask" },
        "cross":   { "bid": "{base}{quote}_bid / {anchor}{quote}_ask",
                     "ask": "{base}{quote}_ask / {anchor}{quote}_bid" }
    }"#;

    fn dispatcher(sink: Arc<MemorySink>) -> Arc<Dispatcher> {
        let engine = DerivationEngine::new(
            FormulaSet::from_json(FORMULAS).unwrap(),
            vec!["USD".to_string()],
        );
        Arc::new(Dispatcher::new(sink, engine))
    }

    async fn recv(rx: &mut mpsc::Receiver<FeedEvent>) -> FeedEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for feed event")
            .expect("event channel closed early")
    }

    /// Minimal line-protocol feed: acknowledges subscriptions and then
    /// streams ticks for every subscribed rate until the client goes away.
    async fn spawn_line_feed() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let mut subscribed: Vec<String> = Vec::new();
            let mut sequence = 0u32;

            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if let Some(rate) = line.strip_prefix("subscribe|") {
                                    subscribed.push(rate.to_string());
                                    let ack = format!("Subscribed to {rate}\n");
                                    if write_half.write_all(ack.as_bytes()).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            _ => return,
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(20)) => {
                        for rate in &subscribed {
                            sequence += 1;
                            let bid = 40.50 + f64::from(sequence) * 0.01;
                            let ask = bid + 0.05;
                            let record = format!(
                                "{rate}|22:number:{bid:.5}|25:number:{ask:.5}|5:timestamp:2025-08-27T10:15:30.123\n"
                            );
                            if write_half.write_all(record.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        port
    }

    fn line_cfg(port: u16) -> LineFeedConfig {
        LineFeedConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout_ms: 1000,
        }
    }

    // ========================================================================
    // Line-protocol collector
    // ========================================================================

    #[tokio::test]
    async fn line_collector_streams_ticks_in_order() {
        let port = spawn_line_feed().await;
        let (tx, mut rx) = mpsc::channel(64);
        let mut collector =
            LineProtocolCollector::new(line_cfg(port), "sub1".to_string(), tx);

        collector.connect("PF1", "user", "pass").await.unwrap();
        assert_eq!(collector.state(), ConnectionState::Connected);
        assert!(matches!(
            recv(&mut rx).await,
            FeedEvent::Connected { status: true, .. }
        ));

        collector.subscribe("PF1", "PF1_USDTRY").await.unwrap();
        assert!(matches!(
            recv(&mut rx).await,
            FeedEvent::RateStatus { .. }
        ));

        // First arrival, then ordered updates.
        let first = recv(&mut rx).await;
        let first_bid = match first {
            FeedEvent::RateAvailable { ref rate_name, ref tick, .. } => {
                assert_eq!(rate_name, "PF1_USDTRY");
                tick.bid
            }
            other => panic!("expected first arrival, got {other:?}"),
        };
        let second = recv(&mut rx).await;
        match second {
            FeedEvent::RateUpdate { ref tick, .. } => assert!(tick.bid > first_bid),
            other => panic!("expected update, got {other:?}"),
        }

        collector.disconnect("PF1", "user", "pass").await.unwrap();
    }

    #[tokio::test]
    async fn no_events_follow_the_disconnect_notification() {
        let port = spawn_line_feed().await;
        let (tx, mut rx) = mpsc::channel(64);
        let mut collector =
            LineProtocolCollector::new(line_cfg(port), "sub1".to_string(), tx);

        collector.connect("PF1", "user", "pass").await.unwrap();
        collector.subscribe("PF1", "PF1_USDTRY").await.unwrap();

        // Wait until ticks are flowing.
        loop {
            if matches!(recv(&mut rx).await, FeedEvent::RateUpdate { .. }) {
                break;
            }
        }

        collector.disconnect("PF1", "user", "pass").await.unwrap();
        assert_eq!(collector.state(), ConnectionState::Disconnected);
        drop(collector);

        // Drain what was queued before the disconnect; the clean disconnect
        // notification must be the final event on the channel.
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(FeedEvent::Disconnected { status: true, .. })
        ));
    }

    #[tokio::test]
    async fn failed_unsubscribe_keeps_the_subscription() {
        let port = spawn_line_feed().await;
        let (tx, _rx) = mpsc::channel(64);
        let mut collector =
            LineProtocolCollector::new(line_cfg(port), "sub1".to_string(), tx);

        collector.connect("PF1", "user", "pass").await.unwrap();
        collector.subscribe("PF1", "PF1_USDTRY").await.unwrap();
        collector.disconnect("PF1", "user", "pass").await.unwrap();

        // With the socket gone the control send fails; the subscription must
        // survive so a retry still attempts the send instead of silently
        // treating the rate as already unsubscribed.
        assert!(collector.unsubscribe("PF1", "PF1_USDTRY").await.is_err());
        assert!(collector.unsubscribe("PF1", "PF1_USDTRY").await.is_err());
    }

    #[tokio::test]
    async fn failed_connect_reports_status_false() {
        // Bind and drop to get a port nobody is listening on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (tx, mut rx) = mpsc::channel(8);
        let mut collector =
            LineProtocolCollector::new(line_cfg(port), "sub1".to_string(), tx);

        assert!(collector.connect("PF1", "user", "pass").await.is_err());
        assert_eq!(collector.state(), ConnectionState::ConnectFailed);
        assert!(matches!(
            recv(&mut rx).await,
            FeedEvent::Connected { status: false, .. }
        ));
    }

    // ========================================================================
    // REST polling collector
    // ========================================================================

    /// One-shot HTTP feed serving a fixed rate payload for every request.
    async fn spawn_rest_feed(body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        port
    }

    #[tokio::test]
    async fn rest_collector_polls_subscribed_rates() {
        let body = r#"{"rateName":"PF2_USDTRY","bid":40.6,"ask":40.65,"timestamp":"2025-08-27T10:15:30.123"}"#;
        let port = spawn_rest_feed(body).await;

        let cfg = RestFeedConfig {
            base_url: format!("http://127.0.0.1:{port}"),
            poll_interval_ms: 20,
            request_timeout_ms: 1000,
        };
        let (tx, mut rx) = mpsc::channel(64);
        let mut collector = RestPollingCollector::new(cfg, "sub2".to_string(), tx);

        collector.connect("PF2", "user", "pass").await.unwrap();
        assert!(matches!(
            recv(&mut rx).await,
            FeedEvent::Connected { status: true, .. }
        ));

        collector.subscribe("PF2", "PF2_USDTRY").await.unwrap();
        match recv(&mut rx).await {
            FeedEvent::RateAvailable { rate_name, tick, .. } => {
                assert_eq!(rate_name, "PF2_USDTRY");
                assert!((tick.bid - 40.6).abs() < 1e-9);
                assert!((tick.ask - 40.65).abs() < 1e-9);
            }
            other => panic!("expected first arrival, got {other:?}"),
        }
        assert!(matches!(
            recv(&mut rx).await,
            FeedEvent::RateUpdate { .. }
        ));

        collector.disconnect("PF2", "user", "pass").await.unwrap();
    }

    // ========================================================================
    // Full pipeline: collector -> pump -> dispatcher -> sink
    // ========================================================================

    #[tokio::test]
    async fn ticks_flow_from_feed_to_sink() {
        let port = spawn_line_feed().await;
        let sink = Arc::new(MemorySink::new());
        let dispatcher = dispatcher(Arc::clone(&sink));
        let listener: Arc<dyn RateListener> = dispatcher.clone();

        let (tx, rx) = mpsc::channel(64);
        let pump = tokio::spawn(pump_events(rx, listener));
        let mut collector =
            LineProtocolCollector::new(line_cfg(port), "sub1".to_string(), tx);

        collector.connect("PF1", "user", "pass").await.unwrap();
        collector.subscribe("PF1", "PF1_USDTRY").await.unwrap();

        timeout(Duration::from_secs(5), async {
            loop {
                if sink.stored("calc:sub1:TRYUSD").is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("derived rate never reached the sink");

        // Stop the feed and drain the pump before asserting, so the sink is
        // quiescent.
        collector.disconnect("PF1", "user", "pass").await.unwrap();
        drop(collector);
        let _ = pump.await;

        let raw = sink.stored("raw:sub1:PF1_USDTRY").unwrap();
        let direct = sink.stored("calc:sub1:USDTRY").unwrap();
        assert_eq!((raw.bid, raw.ask), (direct.bid, direct.ask));

        let table = dispatcher.table_snapshot("sub1").unwrap();
        assert!(table.get("PF1_USDTRY").is_some());
    }
}
