use crate::error::SinkError;
use crate::events::SynthEvent;
use parking_lot::Mutex;
use ringbuf::{
    HeapRb,
    traits::{Producer, Split},
};
use std::sync::Arc;
use std::time::Instant;

/// Receives note triggers from the scheduler thread at their deadlines.
pub trait AudioSink: Send {
    fn trigger_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), SinkError>;

    fn trigger_note_off(&mut self, channel: u8, note: u8) -> Result<(), SinkError>;

    fn trigger(&mut self, event: SynthEvent) -> Result<(), SinkError> {
        match event {
            SynthEvent::NoteOn {
                channel,
                note,
                velocity,
            } => self.trigger_note_on(channel, note, velocity),
            SynthEvent::NoteOff { channel, note } => self.trigger_note_off(channel, note),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TriggeredEvent {
    pub at: Instant,
    pub event: SynthEvent,
}

pub type TriggerProducer = ringbuf::HeapProd<TriggeredEvent>;
pub type TriggerConsumer = ringbuf::HeapCons<TriggeredEvent>;

/// Forwards triggers to a real-time audio callback through a lock-free ring
/// buffer.
pub struct RingBufferSink {
    producer: TriggerProducer,
}

pub fn trigger_channel(capacity: usize) -> (RingBufferSink, TriggerConsumer) {
    let rb = HeapRb::<TriggeredEvent>::new(capacity);
    let (producer, consumer) = rb.split();
    (RingBufferSink { producer }, consumer)
}

impl RingBufferSink {
    fn push(&mut self, event: SynthEvent) -> Result<(), SinkError> {
        self.producer
            .try_push(TriggeredEvent {
                at: Instant::now(),
                event,
            })
            .map_err(|_| SinkError::BufferFull)
    }
}

impl AudioSink for RingBufferSink {
    fn trigger_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), SinkError> {
        self.push(SynthEvent::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    fn trigger_note_off(&mut self, channel: u8, note: u8) -> Result<(), SinkError> {
        self.push(SynthEvent::NoteOff { channel, note })
    }
}

/// Keeps every trigger it receives; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<Vec<SynthEvent>>>,
    reject: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records each trigger and then reports a backend failure for it.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<SynthEvent> {
        self.log.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    fn record(&mut self, event: SynthEvent) -> Result<(), SinkError> {
        self.log.lock().push(event);
        if self.reject {
            Err(SinkError::Backend("rejected by recording sink".into()))
        } else {
            Ok(())
        }
    }
}

impl AudioSink for RecordingSink {
    fn trigger_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), SinkError> {
        self.record(SynthEvent::NoteOn {
            channel,
            note,
            velocity,
        })
    }

    fn trigger_note_off(&mut self, channel: u8, note: u8) -> Result<(), SinkError> {
        self.record(SynthEvent::NoteOff { channel, note })
    }
}
