mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use polysentry::config::DetectionConfig;
use polysentry::enrichment::{PriceBook, RateLimiter};
use polysentry::intelligence::{HedgeTracker, PatternTracker, VerifyContext};
use polysentry::models::{AlertReason, PositionSlice, Side, WalletProfile};
use polysentry::services::{load_all, save_all, verify_pass, NotifierSet};
use polysentry::store::{MemoryStore, Persistable};

use common::{MockEnrichment, MARKET, NO_TOKEN, YES_TOKEN};

#[tokio::test]
async fn test_pre_move_buy_up_is_favorable() {
    let config = DetectionConfig::default();
    let patterns = PatternTracker::from_config(&config);
    let client = MockEnrichment::new();
    client.set_positions("0xpre", vec![common::position(YES_TOKEN, "Yes", 30_000, "0.52")]);

    let t0 = Utc::now() - Duration::hours(2);
    let buy = common::trade_at("0xpre", YES_TOKEN, Side::Buy, "0.40", 30_000, t0);
    patterns.observe(&buy, None, t0);
    assert_eq!(patterns.pre_move.pending_len(), 1);

    let ctx = common::verify_context(client);
    let outcome = patterns.pre_move.verify_due(&ctx, Utc::now()).await;
    assert_eq!(outcome.verified, 1);
    assert_eq!(outcome.favorable, 1);

    let stats = patterns.pre_move.stats("0xpre").expect("stats");
    assert_eq!(stats.verified, 1);
    assert_eq!(stats.favorable, 1);
    assert_eq!(patterns.pre_move.pending_len(), 0);
}

#[tokio::test]
async fn test_pre_move_sell_into_rally_is_unfavorable() {
    let config = DetectionConfig::default();
    let patterns = PatternTracker::from_config(&config);
    let client = MockEnrichment::new();
    client.set_positions("0xshort", vec![common::position(YES_TOKEN, "Yes", 1, "0.82")]);

    let t0 = Utc::now() - Duration::hours(2);
    let sell = common::trade_at("0xshort", YES_TOKEN, Side::Sell, "0.65", 20_000, t0);
    patterns.observe(&sell, None, t0);

    let ctx = common::verify_context(client);
    let outcome = patterns.pre_move.verify_due(&ctx, Utc::now()).await;
    assert_eq!(outcome.verified, 1);
    assert_eq!(outcome.favorable, 0);

    let stats = patterns.pre_move.stats("0xshort").expect("stats");
    assert_eq!(stats.verified, 1);
    assert_eq!(stats.favorable, 0);
}

#[tokio::test]
async fn test_exhausted_limiter_defers_to_next_pass() {
    let config = DetectionConfig::default();
    let patterns = PatternTracker::from_config(&config);
    let client = MockEnrichment::new();

    let t0 = Utc::now() - Duration::hours(2);
    for wallet in ["0xfirst", "0xsecond"] {
        client.set_positions(wallet, vec![common::position(YES_TOKEN, "Yes", 30_000, "0.52")]);
        let buy = common::trade_at(wallet, YES_TOKEN, Side::Buy, "0.40", 30_000, t0);
        patterns.observe(&buy, None, t0);
    }
    assert_eq!(patterns.pre_move.pending_len(), 2);

    // One token left in a bucket that refills one per second
    let limiter = Arc::new(RateLimiter::per_minute(60));
    assert!(limiter.try_acquire_n(59));
    let ctx = VerifyContext {
        client: client.clone(),
        limiter,
        prices: Arc::new(PriceBook::new()),
        timeout: StdDuration::from_secs(5),
    };

    let first = patterns.pre_move.verify_due(&ctx, Utc::now()).await;
    assert_eq!(first.verified, 1);
    assert_eq!(first.deferred, 1);
    assert_eq!(patterns.pre_move.pending_len(), 1);
    assert_eq!(client.calls(), 1);

    let verified: Vec<u32> = ["0xfirst", "0xsecond"]
        .iter()
        .map(|w| patterns.pre_move.stats(w).expect("stats").verified)
        .collect();
    assert_eq!(verified.iter().sum::<u32>(), 1);
    let waiting = if verified[0] == 0 { "0xfirst" } else { "0xsecond" };
    let untouched = patterns.pre_move.stats(waiting).expect("stats");
    assert_eq!(untouched.observed, 1);
    assert_eq!(untouched.verified, 0);
    assert_eq!(untouched.favorable, 0);

    tokio::time::sleep(StdDuration::from_millis(1_100)).await;

    let second = patterns.pre_move.verify_due(&ctx, Utc::now()).await;
    assert_eq!(second.verified, 1);
    assert_eq!(second.deferred, 0);
    assert_eq!(patterns.pre_move.pending_len(), 0);
    let caught_up = patterns.pre_move.stats(waiting).expect("stats");
    assert_eq!(caught_up.verified, 1);
    assert_eq!(caught_up.favorable, 1);
}

#[tokio::test]
async fn test_second_verification_is_a_noop() {
    let config = DetectionConfig::default();
    let patterns = PatternTracker::from_config(&config);
    let client = MockEnrichment::new();
    client.set_positions("0xonce", vec![common::position(YES_TOKEN, "Yes", 100, "0.60")]);

    let t0 = Utc::now() - Duration::hours(2);
    let buy = common::trade_at("0xonce", YES_TOKEN, Side::Buy, "0.40", 30_000, t0);
    patterns.observe(&buy, None, t0);

    let ctx = common::verify_context(client);
    let notifiers = NotifierSet::new();
    let first = verify_pass(patterns.pre_move.as_ref(), &ctx, &notifiers, Utc::now()).await;
    let before = patterns.pre_move.stats("0xonce").expect("stats");
    let second = verify_pass(patterns.pre_move.as_ref(), &ctx, &notifiers, Utc::now()).await;

    assert_eq!(first.verified, 1);
    assert_eq!(second.verified, 0);
    assert_eq!(patterns.pre_move.stats("0xonce"), Some(before));
}

#[tokio::test]
async fn test_persist_and_reload_reproduces_state() {
    let config = DetectionConfig::default();
    let patterns = Arc::new(PatternTracker::from_config(&config));
    let client = MockEnrichment::new();
    client.set_positions("0xa", vec![common::position(YES_TOKEN, "Yes", 100, "0.70")]);

    // One verified observation for 0xa and one still pending for 0xb
    let old = Utc::now() - Duration::hours(2);
    patterns.observe(
        &common::trade_at("0xa", YES_TOKEN, Side::Buy, "0.40", 30_000, old),
        None,
        old,
    );
    let recent = Utc::now();
    patterns.observe(
        &common::trade_at("0xb", YES_TOKEN, Side::Buy, "0.40", 30_000, recent),
        None,
        recent,
    );
    let ctx = common::verify_context(client);
    patterns.pre_move.verify_due(&ctx, Utc::now()).await;

    let store = MemoryStore::new();
    let saved: Vec<Arc<dyn Persistable>> = vec![patterns.clone()];
    assert_eq!(save_all(&saved, &store).await, 1);

    let reloaded = Arc::new(PatternTracker::from_config(&config));
    let targets: Vec<Arc<dyn Persistable>> = vec![reloaded.clone()];
    load_all(&targets, &store).await;

    assert_eq!(reloaded.pre_move.pending_len(), patterns.pre_move.pending_len());
    assert_eq!(reloaded.pre_move.verified_len(), patterns.pre_move.verified_len());
    assert_eq!(reloaded.pre_move.stats("0xa"), patterns.pre_move.stats("0xa"));
    assert_eq!(reloaded.pre_move.stats("0xb"), patterns.pre_move.stats("0xb"));
    assert_eq!(reloaded.pre_move.pending_len(), 1);
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let config = DetectionConfig::default();
    let store = MemoryStore::new();
    let patterns = Arc::new(PatternTracker::from_config(&config));
    store.insert_raw(patterns.snapshot_key(), b"{not json");

    let targets: Vec<Arc<dyn Persistable>> = vec![patterns.clone()];
    load_all(&targets, &store).await;
    assert_eq!(patterns.pending_len(), 0);
}

fn hedged_profile(wallet: &str) -> WalletProfile {
    let mut profile = WalletProfile::empty(wallet, MARKET, Utc::now());
    for (asset, outcome, size) in [(YES_TOKEN, "Yes", 1_000), (NO_TOKEN, "No", 100)] {
        profile.market_positions.push(PositionSlice {
            asset_id: asset.into(),
            outcome: outcome.into(),
            size: size.into(),
            avg_price: common::dec("0.5"),
            current_price: common::dec("0.5"),
            current_value: common::dec("0.5") * rust_decimal::Decimal::from(size),
            redeemable: false,
        });
    }
    profile
}

#[tokio::test]
async fn test_hedge_removal_confirmed_on_resolution() {
    let config = DetectionConfig::default();
    let hedge = HedgeTracker::from_config(&config);

    let t0 = Utc::now() - Duration::hours(2);
    let mut sell = common::trade_at("0xhedge", NO_TOKEN, Side::Sell, "0.30", 500, t0);
    sell.outcome = Some("No".into());

    let check = hedge.observe(&sell, Some(&hedged_profile("0xhedge")), t0);
    assert_eq!(check.reasons, vec![AlertReason::HedgeRemoval]);
    let removal = check.removal.expect("removal");
    assert_eq!(removal.sold_outcome, "No");
    assert_eq!(removal.position.no_before, common::dec("600"));

    // Market resolved Yes: keeping Yes and dumping No was right
    let client = MockEnrichment::new();
    let mut won = common::position(YES_TOKEN, "Yes", 1_000, "1");
    won.redeemable = true;
    client.set_positions("0xhedge", vec![won]);

    let ctx = common::verify_context(client);
    let outcome = hedge.engine().verify_due(&ctx, Utc::now()).await;
    assert_eq!(outcome.verified, 1);
    assert_eq!(outcome.favorable, 1);
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].reasons, vec![AlertReason::HedgeRemovalConfirmed]);
    assert_eq!(
        outcome.alerts[0].title(),
        "Resolution-Confirmed Hedge Removal"
    );
}

#[tokio::test]
async fn test_unresolved_hedge_stays_pending() {
    let config = DetectionConfig::default();
    let hedge = HedgeTracker::from_config(&config);

    let t0 = Utc::now() - Duration::hours(2);
    let mut sell = common::trade_at("0xwait", NO_TOKEN, Side::Sell, "0.30", 500, t0);
    sell.outcome = Some("No".into());
    hedge.observe(&sell, Some(&hedged_profile("0xwait")), t0);

    let client = MockEnrichment::new();
    client.set_positions("0xwait", vec![common::position(YES_TOKEN, "Yes", 1_000, "0.70")]);

    let ctx = common::verify_context(client);
    let outcome = hedge.engine().verify_due(&ctx, Utc::now()).await;
    assert_eq!(outcome.verified, 0);
    assert_eq!(outcome.deferred, 1);
    assert_eq!(hedge.engine().pending_len(), 1);
}

#[tokio::test]
async fn test_confirmed_hedge_reason_needs_a_removal_on_the_trade() {
    let config = DetectionConfig::default();
    let hedge = HedgeTracker::from_config(&config);

    let t0 = Utc::now() - Duration::hours(3);
    for offset in [0, 10] {
        let at = t0 + Duration::minutes(offset);
        let mut sell = common::trade_at("0xpro", NO_TOKEN, Side::Sell, "0.30", 500, at);
        sell.outcome = Some("No".into());
        hedge.observe(&sell, Some(&hedged_profile("0xpro")), at);
    }

    let client = MockEnrichment::new();
    let mut won = common::position(YES_TOKEN, "Yes", 1_000, "1");
    won.redeemable = true;
    client.set_positions("0xpro", vec![won]);

    let verified_at = Utc::now();
    let outcome = hedge
        .engine()
        .verify_due(&common::verify_context(client), verified_at)
        .await;
    assert_eq!(outcome.verified, 2);
    assert_eq!(outcome.favorable, 2);

    // Past the cooldown, a plain buy elsewhere carries no hedge reason
    let later = verified_at + Duration::hours(13);
    let mut buy = common::trade_at("0xpro", "tok-other", Side::Buy, "0.40", 5_000, later);
    buy.market_id = "0xunrelated".into();
    let check = hedge.observe(&buy, None, later);
    assert!(check.reasons.is_empty());
    assert!(check.removal.is_none());

    // and did not use up the cooldown: the next real removal is confirmed
    let mut sell = common::trade_at("0xpro", NO_TOKEN, Side::Sell, "0.30", 500, later);
    sell.outcome = Some("No".into());
    let check = hedge.observe(&sell, Some(&hedged_profile("0xpro")), later);
    assert_eq!(
        check.reasons,
        vec![AlertReason::HedgeRemoval, AlertReason::HedgeRemovalConfirmed]
    );
}
