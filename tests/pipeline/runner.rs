use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::support::{
    gateway::{block, page_entry, ScriptedGateway, SecretAdapter},
    helpers::{init_tracing, wait_until},
};
use anyhow::{anyhow, bail, Context, Result};
use overweight_keeper::{AgentConfig, ControllerSettings, Runner, RuntimeAdapter};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runner_submits_and_stops_on_cancellation() -> Result<()> {
    init_tracing();
    let (gateway, blocks) = ScriptedGateway::new();
    gateway.set_pages(vec![page_entry(1000, 0, 1), page_entry(1000, 1, 0)]);

    let runner = Arc::new(Runner::new(gateway.clone(), ControllerSettings::default()));
    let task = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run().await }
    });

    blocks.unbounded_send(Ok(block(10)))?;
    wait_until("batch submission", WAIT, || gateway.submitted().len() == 1).await?;
    assert_eq!(gateway.submitted()[0].items(), 1);

    let status = gateway
        .take_status_sender()
        .context("submission should open a status stream")?;

    runner.cancellation_token().cancel();
    timeout(WAIT, task)
        .await
        .context("runner should stop after cancellation")???;

    assert!(gateway.is_disconnected());
    assert!(blocks.is_closed(), "block subscription should be released");
    assert!(status.is_closed(), "status subscription should be released");
    assert_eq!(runner.controller().active_trackers(), 0);
    assert_eq!(runner.controller().telemetry().snapshot().batches_submitted, 1);
    Ok(())
}

#[tokio::test]
async fn closed_block_stream_is_an_error() -> Result<()> {
    init_tracing();
    let (gateway, blocks) = ScriptedGateway::new();
    let runner = Runner::new(gateway.clone(), ControllerSettings::default());

    blocks.unbounded_send(Ok(block(1)))?;
    drop(blocks);

    let err = timeout(WAIT, runner.run())
        .await
        .context("runner should stop when the block stream closes")?
        .expect_err("closed stream must surface as an error");

    assert!(
        format!("{err:#}").contains("closed"),
        "unexpected error: {err:#}"
    );
    assert!(gateway.is_disconnected());
    assert_eq!(gateway.service_head_queries(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_notification_does_not_stop_the_agent() -> Result<()> {
    init_tracing();
    let (gateway, blocks) = ScriptedGateway::new();
    gateway.set_pages(vec![page_entry(1000, 0, 1)]);

    let runner = Arc::new(Runner::new(gateway.clone(), ControllerSettings::default()));
    let task = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run().await }
    });

    blocks.unbounded_send(Err(anyhow!("one malformed header")))?;
    blocks.unbounded_send(Ok(block(11)))?;

    wait_until("batch submission", WAIT, || gateway.submitted().len() == 1).await?;
    assert!(!task.is_finished(), "runner must keep consuming blocks");
    assert_eq!(gateway.service_head_queries(), 1);
    assert_eq!(
        runner.controller().telemetry().snapshot().subscription_errors,
        1
    );

    runner.cancellation_token().cancel();
    timeout(WAIT, task)
        .await
        .context("runner should stop after cancellation")???;
    assert!(gateway.is_disconnected());
    Ok(())
}

#[tokio::test]
async fn connect_hands_configured_secret_to_adapter() -> Result<()> {
    init_tracing();
    let config = AgentConfig::builder()
        .endpoint("ws://127.0.0.1:1")
        .secret_uri("//Alice")
        .build()?;

    let seen = Arc::new(Mutex::new(None::<String>));
    let err = Runner::connect(&config, {
        let seen = seen.clone();
        move |secret: &str| -> Result<Arc<dyn RuntimeAdapter>> {
            *seen.lock().expect("secret slot poisoned") = Some(secret.to_owned());
            bail!("keystore locked")
        }
    })
    .await
    .err()
    .context("adapter failure must abort connect")?;

    let message = format!("{err:#}");
    assert!(message.contains("failed to build runtime adapter"), "{message}");
    assert!(message.contains("keystore locked"), "{message}");
    assert_eq!(
        seen.lock().expect("secret slot poisoned").as_deref(),
        Some("//Alice")
    );
    Ok(())
}

#[tokio::test]
async fn connect_builds_adapter_before_dialing() -> Result<()> {
    init_tracing();
    let config = AgentConfig::builder()
        .endpoint("ws://127.0.0.1:1")
        .secret_uri("//Bob")
        .build()?;

    let built = Arc::new(Mutex::new(None::<Arc<SecretAdapter>>));
    let result = timeout(
        WAIT,
        Runner::connect(&config, {
            let built = built.clone();
            move |secret: &str| -> Result<Arc<dyn RuntimeAdapter>> {
                let adapter = Arc::new(SecretAdapter {
                    secret: secret.to_owned(),
                });
                *built.lock().expect("adapter slot poisoned") = Some(adapter.clone());
                Ok(adapter)
            }
        }),
    )
    .await
    .context("connect to a closed port should fail promptly")?;

    let err = result.err().context("nothing listens on port 1")?;
    assert!(format!("{err:#}").contains("failed to connect"), "{err:#}");

    let adapter = built
        .lock()
        .expect("adapter slot poisoned")
        .clone()
        .context("adapter should be built before connecting")?;
    assert_eq!(adapter.secret, "//Bob");
    Ok(())
}

#[tokio::test]
async fn subscription_failure_is_fatal() -> Result<()> {
    init_tracing();
    let (gateway, _blocks) = ScriptedGateway::new();
    gateway.fail_subscribe();
    let runner = Runner::new(gateway.clone(), ControllerSettings::default());

    let err = runner
        .run()
        .await
        .expect_err("startup subscription failure must be returned");

    assert!(format!("{err:#}").contains("failed to subscribe to new blocks"));
    assert_eq!(gateway.service_head_queries(), 0);
    Ok(())
}

#[tokio::test]
async fn pre_cancelled_runner_exits_cleanly() -> Result<()> {
    init_tracing();
    let (gateway, blocks) = ScriptedGateway::new();
    let runner = Runner::new(gateway.clone(), ControllerSettings::default())
        .with_metrics_interval(Duration::from_millis(5));
    runner.cancellation_token().cancel();

    timeout(WAIT, runner.run_until_ctrl_c())
        .await
        .context("cancelled runner should return promptly")??;

    assert!(gateway.is_disconnected());
    assert!(blocks.is_closed());
    Ok(())
}
