pub mod forwarder;
pub mod frame;
pub mod pipeline;
pub mod trade_poller;
pub mod ws_listener;

pub use forwarder::{Forwarded, Forwarder};
pub use frame::{parse_frame, FeedEvent, FrameError};
pub use pipeline::{run_trade_monitor, TradeMonitor};
pub use trade_poller::run_trade_poller;
pub use ws_listener::{FeedActivity, SourceError, SourceStats, WsEventSource};
