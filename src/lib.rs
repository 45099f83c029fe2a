mod config;
mod engine;
mod events;

pub mod audio;
pub mod error;
pub mod timing;

pub use config::EngineConfig;
pub use engine::{PlaybackPosition, TimelineHandle, TimelineSnapshot, spawn_timeline};
pub use error::{ConfigError, EngineError, SchedulerError, SinkError, TimelineError};
pub use events::{ScheduledEvent, SynthEvent, TimelineEvent};
