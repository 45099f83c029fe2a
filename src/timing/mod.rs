mod quantizer;
mod rational;
mod scheduler;
mod tempo;
mod timeline;

pub use quantizer::{Bound, DEFAULT_MAX_SUBDIVISION, QuantizedPosition, Quantizer, beat_delta};
pub use rational::{InvalidRational, RationalTime};
pub use scheduler::{
    EventQueue, SchedulerHandle, SchedulerSender, SchedulerState, spawn_scheduler,
};
pub use tempo::{Correction, TempoCorrector, TempoEstimate, nice_duration};
pub use timeline::{
    BeatHandle, BeatMarker, BeatRange, BeatTimeline, DEFAULT_SAMPLE_RATE, frames_to_duration,
    rescale_frames,
};
