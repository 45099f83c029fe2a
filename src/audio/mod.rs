mod sink;

pub use sink::{
    AudioSink, RecordingSink, RingBufferSink, TriggerConsumer, TriggerProducer,
    TriggeredEvent, trigger_channel,
};
