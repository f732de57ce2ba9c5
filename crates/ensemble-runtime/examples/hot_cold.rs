//! The classic hot/cold interleaving b-program.
//!
//! Two b-threads request three `hot` and three `cold` events; a third
//! alternates blocking so the selected sequence strictly interleaves.

use std::sync::Arc;

use ensemble_runtime::{
    Event, EventSet, Program, Runner, SyncStatement, TracingRunnerListener,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let program = Program::new("hot-cold");

    program.register_bthread("heat", |bp| async move {
        for _ in 0..3 {
            bp.sync(SyncStatement::new().request(Event::named("hot"))).await?;
        }
        Ok(())
    });

    program.register_bthread("chill", |bp| async move {
        for _ in 0..3 {
            bp.sync(SyncStatement::new().request(Event::named("cold"))).await?;
        }
        Ok(())
    });

    program.register_bthread("interleave", |bp| async move {
        for _ in 0..3 {
            bp.sync(
                SyncStatement::new()
                    .wait_for(EventSet::singleton(Event::named("cold")))
                    .block(EventSet::singleton(Event::named("hot"))),
            )
            .await?;
            bp.sync(
                SyncStatement::new()
                    .wait_for(EventSet::singleton(Event::named("hot")))
                    .block(EventSet::singleton(Event::named("cold"))),
            )
            .await?;
        }
        Ok(())
    });

    let runner = Runner::new(program);
    runner.add_listener(Arc::new(TracingRunnerListener));
    let reason = runner.run().await?;
    println!("run ended: {reason:?}");
    Ok(())
}
