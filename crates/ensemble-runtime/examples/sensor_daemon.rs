//! A daemon-mode program fed from outside the engine.
//!
//! The monitor b-thread wakes on externally enqueued `reading` events and
//! registers an alert b-thread when a reading crosses the threshold.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use ensemble_runtime::{
    Event, EventSet, Program, ProgramConfig, Runner, SyncStatement, TracingRunnerListener,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let program = Program::with_config(ProgramConfig {
        daemon: true,
        ..ProgramConfig::named("sensor")
    });

    program.register_bthread("monitor", |bp| async move {
        loop {
            let reading = bp
                .sync(SyncStatement::new().wait_for(EventSet::from_predicate(
                    "readings",
                    |event| event.name() == "reading",
                )))
                .await?;
            let value = reading
                .payload()
                .and_then(|payload| payload.as_i64())
                .unwrap_or(0);
            if value > 90 {
                bp.register_bthread("alert", move |bp| async move {
                    bp.sync(SyncStatement::new().request(Event::with_payload(
                        "alert",
                        json!({ "reading": value }),
                    )))
                    .await?;
                    Ok(())
                });
            }
            if value < 0 {
                return Ok(());
            }
        }
    });

    let runner = Runner::new(program.clone());
    runner.add_listener(Arc::new(TracingRunnerListener));
    let cancel = runner.cancellation_token();

    let feeder = tokio::spawn(async move {
        for value in [42, 95, 17, -1] {
            tokio::time::sleep(Duration::from_millis(100)).await;
            program.enqueue_external(Event::with_payload("reading", json!(value)));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let reason = runner.run().await?;
    feeder.await?;
    println!("run ended: {reason:?}");
    Ok(())
}
