use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    gateway::{block, page_entry, ScriptedGateway},
    helpers::{expected_batch, init_tracing, recovery_actions, wait_until},
};
use anyhow::{Context, Result};
use overweight_keeper::{
    BlockOutcome, Controller, ControllerSettings, DispatchEvent, MessageOrigin, QueuePage,
    ScaleCallBuilder, TxStatus,
};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn controller(gateway: Arc<ScriptedGateway>) -> Arc<Controller<ScriptedGateway>> {
    Arc::new(Controller::new(
        gateway,
        ControllerSettings::default(),
        CancellationToken::new(),
    ))
}

fn sibling_page(page_index: u32) -> QueuePage {
    QueuePage {
        origin: MessageOrigin::Sibling(1000),
        page_index,
        remaining: 1,
    }
}

fn in_block(events: Vec<DispatchEvent>) -> Result<TxStatus> {
    Ok(TxStatus::InBlock {
        block_hash: "0xbeef".into(),
        events,
    })
}

fn finalized() -> Result<TxStatus> {
    Ok(TxStatus::Finalized {
        block_hash: "0xbeef".into(),
    })
}

#[tokio::test]
async fn active_service_head_defers_recovery() -> Result<()> {
    init_tracing();
    let (gateway, _blocks) = ScriptedGateway::new();
    gateway.set_service_head(Some(MessageOrigin::Parent));
    gateway.set_pages(vec![page_entry(1000, 0, 1)]);
    let controller = controller(gateway.clone());

    let outcome = controller.handle_block(&block(1)).await;

    assert_eq!(outcome, BlockOutcome::ServiceHeadActive(MessageOrigin::Parent));
    assert_eq!(controller.state().cooldown(), 4);
    assert_eq!(gateway.page_queries(), 0);
    assert!(gateway.submitted().is_empty());
    Ok(())
}

#[tokio::test]
async fn positive_cooldown_only_counts_down() -> Result<()> {
    init_tracing();
    let (gateway, _blocks) = ScriptedGateway::new();
    gateway.set_pages(vec![page_entry(1000, 0, 1)]);
    let controller = controller(gateway.clone());
    controller.state().set_cooldown(2);

    let outcome = controller.handle_block(&block(1)).await;

    assert_eq!(outcome, BlockOutcome::CoolingDown { remaining: 1 });
    assert_eq!(controller.state().cooldown(), 1);
    assert_eq!(gateway.service_head_queries(), 1);
    assert_eq!(gateway.page_queries(), 0);
    assert!(gateway.submitted().is_empty());
    Ok(())
}

#[tokio::test]
async fn oversized_backlog_is_truncated_in_page_order() -> Result<()> {
    init_tracing();
    let (gateway, _blocks) = ScriptedGateway::new();
    gateway.set_pages((0..12).map(|page| page_entry(1000, page, 1)).collect());
    let controller = controller(gateway.clone());

    let outcome = controller.handle_block(&block(1)).await;

    assert_eq!(outcome, BlockOutcome::Submitted { items: 10 });
    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].items(), 10);

    let pages: Vec<QueuePage> = (0..10).map(sibling_page).collect();
    assert_eq!(submitted[0], expected_batch(&pages)?);
    assert_eq!(controller.state().cooldown(), 4);

    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failed_item_is_banned_and_excluded_from_later_batches() -> Result<()> {
    init_tracing();
    let (gateway, _blocks) = ScriptedGateway::new();
    gateway.set_pages((0..3).map(|page| page_entry(1000, page, 1)).collect());
    let controller = controller(gateway.clone());

    assert_eq!(
        controller.handle_block(&block(1)).await,
        BlockOutcome::Submitted { items: 3 }
    );

    let status = gateway
        .take_status_sender()
        .context("submission should open a status stream")?;
    status.unbounded_send(in_block(vec![
        DispatchEvent::ItemCompleted,
        DispatchEvent::ItemFailed {
            error: "Module(MessageQueue::InsufficientWeight)".into(),
        },
        DispatchEvent::ItemCompleted,
        DispatchEvent::ExtrinsicSuccess,
    ]))?;
    status.unbounded_send(finalized())?;

    wait_until("tracker finishes", WAIT, || controller.active_trackers() == 0).await?;
    assert!(status.is_closed(), "finalization should release the status stream");

    let pages: Vec<QueuePage> = (0..3).map(sibling_page).collect();
    let actions = recovery_actions(&ScaleCallBuilder::default(), &pages)?;
    let state = controller.state();
    assert!(!state.is_banned(actions[0].fingerprint()));
    assert!(state.is_banned(actions[1].fingerprint()));
    assert!(!state.is_banned(actions[2].fingerprint()));

    let snapshot = controller.telemetry().snapshot();
    assert_eq!(snapshot.items_completed, 2);
    assert_eq!(snapshot.items_failed, 1);

    for number in 2..6 {
        state.set_cooldown(0);
        assert_eq!(
            controller.handle_block(&block(number)).await,
            BlockOutcome::Submitted { items: 2 }
        );
    }

    let submitted = gateway.submitted();
    assert_eq!(submitted.len(), 5);
    let without_banned = expected_batch(&[sibling_page(0), sibling_page(2)])?;
    assert!(submitted[1..].iter().all(|call| *call == without_banned));

    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn batch_failure_overrides_post_submission_cooldown() -> Result<()> {
    init_tracing();
    let (gateway, _blocks) = ScriptedGateway::new();
    gateway.set_pages(vec![page_entry(2000, 7, 3)]);
    let controller = controller(gateway.clone());

    controller.handle_block(&block(1)).await;
    assert_eq!(controller.state().cooldown(), 4);

    let status = gateway
        .take_status_sender()
        .context("submission should open a status stream")?;
    status.unbounded_send(in_block(vec![DispatchEvent::ExtrinsicFailed {
        error: "Module(Utility::TooManyCalls)".into(),
    }]))?;
    status.unbounded_send(finalized())?;

    wait_until("tracker finishes", WAIT, || controller.active_trackers() == 0).await?;

    assert_eq!(controller.state().cooldown(), 300);
    assert_eq!(controller.state().banned_count(), 0);
    assert_eq!(controller.telemetry().snapshot().batch_failures, 1);
    Ok(())
}

#[tokio::test]
async fn blocks_arriving_mid_processing_have_no_side_effects() -> Result<()> {
    init_tracing();
    let (gateway, _blocks) = ScriptedGateway::new();
    let gate = gateway.hold_page_queries();
    let controller = controller(gateway.clone());

    let first = controller
        .dispatch(block(1))
        .context("idle controller should accept a block")?;
    gateway.page_query_entered().await;

    assert!(controller.dispatch(block(2)).is_none());
    assert_eq!(controller.handle_block(&block(3)).await, BlockOutcome::Busy);
    assert_eq!(gateway.service_head_queries(), 1);
    assert_eq!(gateway.page_queries(), 1);
    assert_eq!(controller.state().cooldown(), -1);

    gate.notify_one();
    assert_eq!(first.await?, BlockOutcome::NoPages);
    assert!(!controller.state().is_processing());
    assert_eq!(controller.telemetry().snapshot().busy_skips, 2);
    Ok(())
}

#[tokio::test]
async fn rejected_submission_still_cools_down() -> Result<()> {
    init_tracing();
    let (gateway, _blocks) = ScriptedGateway::new();
    gateway.set_pages(vec![page_entry(1000, 0, 1)]);
    gateway.fail_submit(true);
    let controller = controller(gateway.clone());

    let outcome = controller.handle_block(&block(1)).await;

    assert_eq!(outcome, BlockOutcome::SubmissionFailed);
    assert_eq!(gateway.submitted().len(), 1);
    assert_eq!(controller.state().cooldown(), 4);
    assert_eq!(controller.active_trackers(), 0);
    assert_eq!(controller.telemetry().snapshot().submission_errors, 1);

    for number in 2..5 {
        assert!(matches!(
            controller.handle_block(&block(number)).await,
            BlockOutcome::CoolingDown { .. }
        ));
    }
    gateway.fail_submit(false);
    assert_eq!(
        controller.handle_block(&block(5)).await,
        BlockOutcome::Submitted { items: 1 }
    );

    controller.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_releases_pending_status_streams() -> Result<()> {
    init_tracing();
    let (gateway, _blocks) = ScriptedGateway::new();
    gateway.set_pages(vec![page_entry(1000, 0, 1)]);
    let controller = controller(gateway.clone());

    controller.handle_block(&block(1)).await;
    let status = gateway
        .take_status_sender()
        .context("submission should open a status stream")?;
    status.unbounded_send(Ok(TxStatus::Ready))?;
    assert_eq!(controller.active_trackers(), 1);

    controller.shutdown().await;

    assert_eq!(controller.active_trackers(), 0);
    assert!(status.is_closed());
    Ok(())
}
