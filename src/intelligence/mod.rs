pub mod contrarian;
pub mod copy;
pub mod hedge;
pub mod observation;
pub mod patterns;
pub mod rules;
pub mod title;

pub use contrarian::ContrarianWinnerCache;
pub use copy::CopyTracker;
pub use hedge::{detect_hedge_removal, HedgeCheck, HedgeTracker};
pub use observation::{
    AlertPolicy, GroundTruth, ObservationTracker, PatternRule, TrackerSnapshot, Verifiable,
    VerifyContext, VerifyOutcome,
};
pub use patterns::PatternTracker;
pub use rules::{evaluate_simple, FrequencyCounter};
pub use title::alert_title;

use std::sync::Arc;

use crate::config::DetectionConfig;
use crate::store::Persistable;

/// All long-lived detection state, built once at startup and shared by the
/// monitor, the verifiers and the persistence loop.
#[derive(Clone)]
pub struct Trackers {
    pub copy: Arc<CopyTracker>,
    pub hedge: Arc<HedgeTracker>,
    pub patterns: Arc<PatternTracker>,
    pub contrarian: Arc<ContrarianWinnerCache>,
    pub frequency: Arc<FrequencyCounter>,
}

impl Trackers {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            copy: Arc::new(CopyTracker::from_config(config)),
            hedge: Arc::new(HedgeTracker::from_config(config)),
            patterns: Arc::new(PatternTracker::from_config(config)),
            contrarian: Arc::new(ContrarianWinnerCache::from_config(&config.copy)),
            frequency: Arc::new(FrequencyCounter::from_rules(
                &config.rules,
                config.engine.max_wallets,
            )),
        }
    }

    /// Everything that gets saved and restored.
    pub fn persistables(&self) -> Vec<Arc<dyn Persistable>> {
        vec![
            self.patterns.clone() as Arc<dyn Persistable>,
            self.hedge.clone() as Arc<dyn Persistable>,
            self.copy.clone() as Arc<dyn Persistable>,
            self.contrarian.clone() as Arc<dyn Persistable>,
        ]
    }

    /// Everything with delayed verification.
    pub fn verifiers(&self) -> Vec<Arc<dyn Verifiable>> {
        let mut verifiers = self.patterns.verifiers();
        verifiers.push(self.hedge.verifier());
        verifiers
    }
}
