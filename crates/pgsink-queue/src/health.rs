use crate::{
    event::{Bus, QueueEvent},
    processor::HealthCheck,
};
use core::time::Duration;
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

/// Refreshes the cached health state every `period` until `token` is cancelled.
///
/// This task holds the only [`watch::Sender`] for the state, so it is the only
/// writer. The dispatcher reads the cached value and never probes itself.
pub(crate) async fn health_loop<H: HealthCheck>(
    check: H,
    period: Duration,
    state: watch::Sender<bool>,
    bus: Bus,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // A probe stuck on a dead connection must not hold up close().
        let healthy = tokio::select! {
            () = token.cancelled() => break,
            healthy = check.check() => healthy,
        };

        let previous = state.send_replace(healthy);
        if previous != healthy {
            if healthy {
                tracing::info!("Store is healthy again");
            } else {
                tracing::warn!("Store reported unhealthy, pausing dispatch");
            }
            bus.publish(QueueEvent::HealthChanged { healthy });
        }
    }

    tracing::trace!("Health poller stopped");
}
