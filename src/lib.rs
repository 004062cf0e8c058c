//! Resobox looper: multi-track live audio looper core.
//! Tracks stack recorded layers; background workers keep track lengths and
//! the cross-track mix current while the audio callback records and plays.

pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod layer;
pub mod looper;
pub mod metrics;
pub mod mixer;
pub mod phase;
pub mod playback;
pub mod state;
pub mod track;
pub mod worker;

pub use config::{LooperConfig, CHANNELS};
pub use control::{spawn_control_loop, ControlSender, LooperCommand};
pub use error::LooperError;
pub use looper::{Looper, LooperRuntime};
pub use playback::BlockShape;
pub use state::{LooperState, MixInfo};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "resobox_looper=debug,resobox=info";

/// Install the global tracing subscriber. Honors `RUST_LOG`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}
