use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::gauge;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::notifier::NotifierSet;
use crate::intelligence::{Verifiable, VerifyContext, VerifyOutcome};

/// One expire-then-verify pass. Alerts go out through the notifiers.
pub async fn verify_pass(
    tracker: &dyn Verifiable,
    ctx: &VerifyContext,
    notifiers: &NotifierSet,
    now: DateTime<Utc>,
) -> VerifyOutcome {
    let expired = tracker.expire(now);
    let outcome = tracker.verify_due(ctx, now).await;

    for alert in &outcome.alerts {
        tracing::info!(
            tracker = tracker.name(),
            alert_id = %alert.id,
            wallet = %alert.trade.wallet,
            title = alert.title(),
            "Verified pattern alert"
        );
        notifiers.dispatch(alert.clone());
    }

    if expired > 0 {
        tracing::info!(tracker = tracker.name(), expired, "Expired stale observations");
    }

    outcome
}

/// Periodically verify one tracker until shutdown.
pub async fn run_verifier(
    tracker: Arc<dyn Verifiable>,
    ctx: VerifyContext,
    notifiers: NotifierSet,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = tracker.name();
    tracing::info!(tracker = name, interval_secs, "Verifier started");

    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                tracing::info!(tracker = name, "Verifier shutting down");
                return;
            }
        }

        verify_pass(tracker.as_ref(), &ctx, &notifiers, Utc::now()).await;
        gauge!("pending_observations", "tracker" => name).set(tracker.pending_len() as f64);
    }
}
