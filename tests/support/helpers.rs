use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use overweight_keeper::queue::{BatchCall, RecoveryAction, RecoveryTarget, WeightLimit};
use overweight_keeper::{CallBuilder, QueuePage, ScaleCallBuilder};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(what: &str, timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("{what} did not happen within {timeout:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Batch the default call builder produces for `pages`, in the given order.
pub fn expected_batch(pages: &[QueuePage]) -> Result<BatchCall> {
    let builder = ScaleCallBuilder::default();
    let actions = recovery_actions(&builder, pages)?;
    builder.build_batch_call(&actions)
}

pub fn recovery_actions(
    builder: &ScaleCallBuilder,
    pages: &[QueuePage],
) -> Result<Vec<RecoveryAction>> {
    pages
        .iter()
        .map(|page| builder.build_recovery_call(RecoveryTarget::for_page(page, WeightLimit::default())))
        .collect()
}
