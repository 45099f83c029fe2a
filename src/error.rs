use crate::timing::RationalTime;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    #[error("beat position already occupied at frame {0}")]
    DuplicateFrame(i64),

    #[error("frame {frame} would move the beat past its neighbours ({min}..{max})")]
    OutOfOrder { frame: i64, min: i64, max: i64 },

    #[error("beat no longer exists")]
    NotFound,

    #[error("timeline has no beats")]
    Empty,

    #[error("frame {0} is before the start of the audio")]
    NegativeFrame(i64),

    #[error("beat index {0} is outside the timeline")]
    IndexOutOfRange(i64),

    #[error("offset {0} is outside [0, 1)")]
    OffsetOutOfRange(RationalTime),

    #[error("position lies beyond the last representable frame")]
    FrameOverflow,

    #[error("need at least two beats to measure a beat interval")]
    NoInterval,

    #[error("selection must start on an earlier beat than it ends")]
    InvalidRange,

    #[error("no beat range is selected")]
    NoSelection,

    #[error("corrected beat would collide with another beat at frame {frame}")]
    Inconsistent { frame: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("trigger buffer is full")]
    BufferFull,

    #[error("audio backend disconnected")]
    Disconnected,

    #[error("audio backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler thread has shut down")]
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error("no playback position source is attached")]
    NoPlaybackSource,

    #[error("timeline engine has shut down")]
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
