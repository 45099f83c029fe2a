use beatgrid::audio::trigger_channel;
use beatgrid::timing::{RationalTime, frames_to_duration, spawn_scheduler};
use beatgrid::{EngineConfig, TimelineEvent, spawn_timeline};
use ringbuf::traits::Consumer;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let timeline = spawn_timeline(&config);
    let events = timeline.subscribe()?;

    let rate = config.sample_rate as i64;
    timeline.load_frames(vec![0, rate / 2, rate, rate * 3 / 2], config.sample_rate)?;
    let last = timeline.nearest(rate * 3 / 2)?;
    timeline.move_beat(last, rate * 3 / 2 + rate / 10)?;

    timeline.select_snapped(0, rate * 2)?;
    let correction = timeline.apply_tempo_correction()?;
    tracing::info!(?correction, "tempo corrected");
    if let Some(estimate) = timeline.estimate()? {
        tracing::info!("selection: {}", estimate.status(config.sample_rate));
    }

    let position = timeline.resolve(rate * 3 / 4)?;
    tracing::info!(
        beat = position.beat_index,
        offset = %position.offset,
        "resolved"
    );
    let half_beat = RationalTime::new(1, 2).ok_or("invalid offset")?;
    tracing::info!(frame = timeline.to_frame(1, half_beat)?, "half past beat 1");

    for event in events.try_iter() {
        if let TimelineEvent::BeatsChanged { revision, frames } = event {
            tracing::info!(revision, ?frames, "beats changed");
        }
    }

    let (sink, mut triggers) = trigger_channel(config.trigger_buffer_capacity);
    let scheduler = spawn_scheduler(sink);
    let snapshot = timeline.snapshot()?;
    for pair in snapshot.frames().windows(2) {
        let length = frames_to_duration(pair[1] - pair[0], config.sample_rate);
        scheduler.note(0, 60, 100, length / 2)?;
        std::thread::sleep(length);
    }
    std::thread::sleep(Duration::from_millis(50));

    scheduler.shutdown();
    while let Some(triggered) = triggers.try_pop() {
        tracing::info!(event = ?triggered.event, "audio callback received");
    }
    timeline.shutdown()?;
    Ok(())
}
