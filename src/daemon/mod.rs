use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{self, AsyncBufRead, AsyncWrite, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    protocol::handler::RequestHandler,
    report::notify::BusNotifier,
    rules::{book::RuleBook, matcher::RuleSet},
    settings::load_settings,
    storage::{aggregate::AggregateStore, file_store::FileStore, kv::KeyValueStore},
    tracker::{
        bus::EventBus,
        service::{Schedule, TrackerInput, TrackerService},
        state::SessionTracker,
    },
    utils::{
        clock::{Clock, DefaultClock},
        dir::store_path,
    },
};

pub mod args;
pub mod host;
pub mod shutdown;

const INPUT_QUEUE: usize = 16;

/// Represents the starting point for the host. Runs until stdin closes or Ctrl-C.
pub async fn start_host(dir: PathBuf, schedule: Schedule) -> Result<()> {
    let store = FileStore::new(store_path(&dir))?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    info!("Starting host in {dir:?}");

    run_host(
        store,
        clock,
        schedule,
        BufReader::new(io::stdin()),
        io::stdout(),
        CancellationToken::new(),
    )
    .await
}

async fn run_host<K: KeyValueStore>(
    kv: K,
    clock: Arc<dyn Clock>,
    schedule: Schedule,
    reader: impl AsyncBufRead + Unpin,
    writer: impl AsyncWrite + Unpin,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let store = Arc::new(AggregateStore::new(kv, clock.clone()));

    let settings = load_settings(store.kv()).await.unwrap_or_else(|e| {
        warn!("Couldn't load settings, using defaults: {e}");
        Default::default()
    });
    let rules = RuleBook::new(store.kv(), clock.clone())
        .list()
        .await
        .unwrap_or_else(|e| {
            warn!("Couldn't load rules: {e}");
            Vec::new()
        });

    let bus = EventBus::new();
    // Subscribed before the service takes the bus, so the writer sees every broadcast and stops
    // once the service is gone.
    let broadcasts = bus.subscribe();
    let (input_sender, input_receiver) = mpsc::channel::<TrackerInput>(INPUT_QUEUE);
    let (line_sender, line_receiver) = mpsc::channel::<String>(INPUT_QUEUE);

    let tracker = SessionTracker::new(
        store.clone(),
        clock.clone(),
        bus.clone(),
        settings,
        RuleSet::new(rules),
    );
    let service = TrackerService::new(
        input_receiver,
        tracker,
        RequestHandler::new(store.clone(), clock.clone()),
        store,
        Box::new(BusNotifier::new(bus)),
        clock,
        shutdown_token.clone(),
        schedule,
    );

    let (_, service_result, input_result, output_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        async {
            let result = service.run().await;
            shutdown_token.cancel();
            result
        },
        host::read_input(reader, input_sender, line_sender, shutdown_token.clone()),
        host::write_output(writer, line_receiver, broadcasts),
    );

    if let Err(service_result) = service_result {
        error!("Tracker service got an error {:?}", service_result);
    }

    if let Err(input_result) = input_result {
        error!("Input got an error {:?}", input_result);
    }

    if let Err(output_result) = output_result {
        error!("Output got an error {:?}", output_result);
    }

    Ok(())
}

#[cfg(test)]
mod host_tests {
    use std::{
        pin::Pin,
        sync::Arc,
        task::{Context, Poll},
        time::Duration,
    };

    use anyhow::Result;
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tokio::io::{AsyncRead, AsyncWriteExt, BufReader, ReadBuf};
    use tokio_util::sync::CancellationToken;

    use crate::{
        storage::{aggregate::AggregateStore, file_store::FileStore, kv::MemoryStore},
        tracker::service::Schedule,
        utils::{
            clock::{testing::local_time, Clock, VirtualClock},
            logging::TEST_LOGGING,
            time::Period,
        },
    };

    use super::run_host;

    #[tokio::test(start_paused = true)]
    async fn test_host_stops_when_input_breaks() -> Result<()> {
        *TEST_LOGGING;
        let clock: Arc<dyn Clock> =
            Arc::new(VirtualClock::starting_at(local_time(2024, 3, 15, 12, 0, 0)));
        let shutdown = CancellationToken::new();

        let mut output = Vec::new();
        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            run_host(
                MemoryStore::new(),
                clock.clone(),
                Schedule::default(),
                BufReader::new(FailingInput),
                &mut output,
                shutdown.clone(),
            ),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
        assert!(shutdown.is_cancelled());

        // A line that isn't UTF-8 is skipped, then EOF ends the host.
        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            run_host(
                MemoryStore::new(),
                clock,
                Schedule::default(),
                BufReader::new(&b"\xff\n"[..]),
                &mut output,
                CancellationToken::new(),
            ),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
        Ok(())
    }

    /// Input whose reads always fail, like a stdin that was closed under the host.
    struct FailingInput;

    impl AsyncRead for FailingInput {
        fn poll_read(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }
    }

    fn line(value: Value) -> String {
        format!("{value}\n")
    }

    /// Drives the whole host through stdio with a file store, then checks what reached disk.
    #[tokio::test(start_paused = true)]
    async fn smoke_test_host() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock: Arc<dyn Clock> =
            Arc::new(VirtualClock::starting_at(local_time(2024, 3, 15, 12, 0, 0)));

        let (mut input, host_input) = tokio::io::duplex(4096);
        let mut output = Vec::new();

        let (host_result, _) = tokio::join!(
            run_host(
                FileStore::new(dir.path().to_path_buf())?,
                clock.clone(),
                Schedule::default(),
                BufReader::new(host_input),
                &mut output,
                CancellationToken::new(),
            ),
            async {
                let activate = line(json!({
                    "channel": "event",
                    "event": {"kind": "tabActivated", "tab": {"id": 1, "url": "https://www.a.com/x"}}
                }));
                input.write_all(activate.as_bytes()).await?;
                tokio::time::sleep(Duration::from_millis(10_500)).await;

                let blur = line(json!({
                    "channel": "event",
                    "event": {"kind": "windowFocusChanged", "windowId": null}
                }));
                input.write_all(blur.as_bytes()).await?;
                let summary = line(json!({
                    "channel": "request",
                    "id": 1,
                    "type": "GET_SUMMARY",
                    "payload": {"period": "day"}
                }));
                input.write_all(summary.as_bytes()).await?;
                tokio::time::sleep(Duration::from_millis(100)).await;
                drop(input);
                anyhow::Ok(())
            },
        );
        host_result?;

        let written = String::from_utf8(output)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?;
        let response = written
            .iter()
            .find(|v| v["channel"] == json!("response"))
            .ok_or_else(|| anyhow::anyhow!("no response written"))?;
        assert_eq!(response["id"], json!(1));
        assert_eq!(
            response["payload"]["summary"]["sites"]["a.com"],
            json!({"seconds": 10, "visits": 1})
        );
        assert!(written
            .iter()
            .any(|v| v["channel"] == json!("broadcast") && v["type"] == json!("TRACKING_UPDATE")));

        let store = AggregateStore::new(FileStore::new(dir.path().to_path_buf())?, clock);
        let summary = store.summary(Period::Day, None, None).await?;
        assert_eq!(summary.total().seconds, 10);
        Ok(())
    }
}
