pub mod market_discovery;
pub mod notifier;
pub mod persistence;
pub mod verifier;

pub use notifier::{AlertNotifier, LogNotifier, NotifierSet, NotifyError, TelegramNotifier};
pub use persistence::{load_all, run_persistence, save_all};
pub use verifier::{run_verifier, verify_pass};
