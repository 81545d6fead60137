//! Cross-component tests for TimeDriver

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async};

use crate::bus::testing::{descriptor, MemoryConnector};
use crate::config::ConnectionConfig;
use crate::transport::BusMessage;
use crate::{
    BusPublisherPool, ClockHandle, CommandServer, DriverConfig, HardwareModel, MetricsCollector,
    ModelContext, ModelRegistry, PauseStatus, RateController, TickScheduler, WsBusConnector,
};

fn create_test_config() -> DriverConfig {
    let mut config = DriverConfig::default();
    config.common.absolute_start_time = 100.0;
    config.simulator.hardware_model.command.enabled = false;
    config.simulator.hardware_model.console.enabled = false;
    config.simulator.hardware_model.connections =
        vec![ConnectionConfig { kind: "time".to_string(), ..Default::default() }];
    config
}

/// Accepts bus connections forever. Every decoded frame is forwarded with its connection number;
/// the first connection is closed after `drop_first_after` frames.
async fn spawn_bus_server(
    drop_first_after: usize,
) -> (String, mpsc::UnboundedReceiver<(usize, BusMessage)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let frame_tx = frame_tx.clone();
            let number = connection;
            connection += 1;
            tokio::spawn(async move {
                let Ok(ws) = accept_async(stream).await else { return };
                let (mut sink, mut inbound) = ws.split();
                let mut seen = 0;
                while let Some(Ok(Message::Text(text))) = inbound.next().await {
                    let Ok(message) = serde_json::from_str::<BusMessage>(&text) else { continue };
                    let _ = frame_tx.send((number, message));
                    seen += 1;
                    if number == 0 && seen == drop_first_after {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                }
            });
        }
    });

    (format!("ws://{addr}"), frame_rx)
}

mod model_tests {
    use super::*;

    fn build(config: &DriverConfig) -> (Arc<MemoryConnector>, ClockHandle, Box<dyn HardwareModel>) {
        let connector = Arc::new(MemoryConnector::default());
        let (handle, inbox) = ClockHandle::channel();
        let context = ModelContext {
            connector: connector.clone(),
            handle: handle.clone(),
            inbox,
            console: None,
        };
        let model = ModelRegistry::with_builtin().build(config, context).unwrap();
        (connector, handle, model)
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_counts_from_absolute_start_time() {
        let (connector, handle, model) = build(&create_test_config());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(model.run(stop_rx));

        assert_eq!(handle.send("PAUSE").await.unwrap(), "PAUSE");
        // 0.085 s past the start time is 8.5 ticks of 10 ms; partial ticks are dropped
        assert_eq!(handle.send("UNTIL 100.085").await.unwrap(), "RUN");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = handle.status();
        assert_eq!(status.tick_index, 8);
        assert_eq!(status.pause, PauseStatus::Paused);
        assert!((status.absolute_time - 100.08).abs() < 1e-9);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        let published = connector.published(&descriptor(crate::DEFAULT_CONNECTION_STRING, "command"));
        assert_eq!(published, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_in_the_past_holds_current_tick() {
        let (_connector, handle, model) = build(&create_test_config());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(model.run(stop_rx));

        tokio::time::sleep(Duration::from_micros(45_000)).await;
        assert_eq!(handle.send("UNTIL 3.5").await.unwrap(), "RUN");
        let held = handle.status().tick_index;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.status().tick_index, held);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_changes_clamp_at_bounds() {
        let (_connector, handle, model) = build(&create_test_config());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(model.run(stop_rx));

        for _ in 0..20 {
            handle.send("DECREASE").await.unwrap();
        }
        assert_eq!(handle.status().real_micros_per_tick, 100);
        for _ in 0..20 {
            handle.send("INCREASE").await.unwrap();
        }
        assert_eq!(handle.status().real_micros_per_tick, 1_000_000);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_tick_is_first_published() {
        let mut config = create_test_config();
        config.common.initial_tick = 500;
        let (connector, handle, model) = build(&config);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(model.run(stop_rx));

        tokio::time::sleep(Duration::from_micros(25_000)).await;
        assert_eq!(handle.status().tick_index, 502);

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        let published = connector.published(&descriptor(crate::DEFAULT_CONNECTION_STRING, "command"));
        assert_eq!(published, vec![500, 501]);
    }
}

mod websocket_tests {
    use super::*;

    fn create_test_rate() -> RateController {
        RateController::new(create_test_config().rate_settings()).unwrap()
    }

    #[tokio::test]
    async fn test_ticks_reach_a_websocket_bus() {
        let (uri, mut frames) = spawn_bus_server(usize::MAX).await;
        let metrics = Arc::new(MetricsCollector::new());
        let mut pool = BusPublisherPool::new(Arc::new(WsBusConnector::default()), metrics.clone());
        pool.register(descriptor(&uri, "command"));
        assert_eq!(pool.connect_all().await, 1);

        let (_handle, inbox) = ClockHandle::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(TickScheduler::new(create_test_rate(), pool, inbox, metrics).run(stop_rx));

        let bus = "command".to_string();
        assert_eq!(frames.recv().await.unwrap(), (0, BusMessage::EnableSetTime { bus: bus.clone() }));
        for tick in 0..3 {
            assert_eq!(frames.recv().await.unwrap(), (0, BusMessage::SetTime { bus: bus.clone(), tick }));
        }

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_bus_is_reconnected() {
        // First connection closes after the enable frame and two ticks
        let (uri, mut frames) = spawn_bus_server(3).await;
        let metrics = Arc::new(MetricsCollector::new());
        let mut pool = BusPublisherPool::new(Arc::new(WsBusConnector::default()), metrics.clone());
        pool.register(descriptor(&uri, "command"));
        pool.connect_all().await;

        let (_handle, inbox) = ClockHandle::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(TickScheduler::new(create_test_rate(), pool, inbox, metrics).run(stop_rx));

        let mut ticks = Vec::new();
        let mut enables = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while ticks.len() < 6 {
                match frames.recv().await.unwrap() {
                    (connection, BusMessage::EnableSetTime { .. }) => enables.push(connection),
                    (connection, BusMessage::SetTime { tick, .. }) => ticks.push((connection, tick)),
                }
            }
        })
        .await
        .unwrap();

        stop_tx.send(()).unwrap();
        let final_metrics = task.await.unwrap();

        assert_eq!(enables[..2], [0, 1]);
        assert_eq!(ticks[..2], [(0, 0), (0, 1)]);
        assert!(ticks[2..].iter().all(|(connection, _)| *connection >= 1));
        assert!(ticks.windows(2).all(|pair| pair[1].1 > pair[0].1));
        assert!(final_metrics.reconnects >= 1);
    }

    #[tokio::test]
    async fn test_remote_commands_steer_published_ticks() {
        let (uri, mut frames) = spawn_bus_server(usize::MAX).await;
        let metrics = Arc::new(MetricsCollector::new());
        let mut pool = BusPublisherPool::new(Arc::new(WsBusConnector::default()), metrics.clone());
        pool.register(descriptor(&uri, "command"));
        pool.connect_all().await;

        let (handle, inbox) = ClockHandle::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(TickScheduler::new(create_test_rate(), pool, inbox, metrics).run(stop_rx));

        let server = CommandServer::bind("127.0.0.1:0", handle.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (server_stop, server_rx) = oneshot::channel();
        tokio::spawn(server.run(server_rx));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        ws.send(Message::Text("PAUSE".to_string())).await.unwrap();
        assert_eq!(ws.next().await.unwrap().unwrap(), Message::Text("PAUSE".to_string()));
        let held = handle.status().tick_index;

        ws.send(Message::Text("RUN 0.05".to_string())).await.unwrap();
        assert_eq!(ws.next().await.unwrap().unwrap(), Message::Text("RUN".to_string()));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let (_, BusMessage::SetTime { tick, .. }) = frames.recv().await.unwrap() {
                    if tick == held + 4 {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.status().tick_index, held + 5);
        assert_eq!(handle.status().pause, PauseStatus::Paused);

        server_stop.send(()).unwrap();
        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
