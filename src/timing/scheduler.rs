use crate::audio::AudioSink;
use crate::error::SchedulerError;
use crate::events::{ScheduledEvent, SynthEvent};
use crossbeam::channel::{self, Receiver, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::Deref;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed(Instant),
}

#[derive(Debug)]
struct Pending {
    deadline: Instant,
    seq: u64,
    event: SynthEvent,
}

// Reversed so the max-heap pops the earliest deadline, then the earliest
// submission.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

/// Deadline-ordered queue of pending triggers. Equal deadlines keep
/// submission order.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Pending>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the event is now the earliest pending one, which
    /// is the only case where the owner has to rearm its timer.
    pub fn schedule(&mut self, deadline: Instant, event: SynthEvent) -> bool {
        let becomes_head = self.heap.peek().is_none_or(|head| deadline < head.deadline);
        self.heap.push(Pending {
            deadline,
            seq: self.next_seq,
            event,
        });
        self.next_seq += 1;
        becomes_head
    }

    /// Removes every event due at `now`, earliest first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<ScheduledEvent> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|head| head.deadline <= now) {
            if let Some(pending) = self.heap.pop() {
                due.push(ScheduledEvent {
                    deadline: pending.deadline,
                    event: pending.event,
                });
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|head| head.deadline)
    }

    pub fn state(&self) -> SchedulerState {
        match self.next_deadline() {
            Some(deadline) => SchedulerState::Armed(deadline),
            None => SchedulerState::Idle,
        }
    }

    /// Drops every pending event and returns how many there were.
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.heap.len();
        self.heap.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[derive(Debug)]
enum SchedulerCommand {
    Schedule(ScheduledEvent),
    Trigger(SynthEvent),
    CancelAll,
    Pending(Sender<usize>),
    Shutdown,
}

enum Step {
    Continue,
    Rearm,
    Stop,
}

/// Cloneable sending half of the scheduler. Calls fail with
/// [`SchedulerError::Disconnected`] once the thread has stopped.
#[derive(Clone)]
pub struct SchedulerSender {
    command_tx: Sender<SchedulerCommand>,
}

/// Owner of the scheduler thread. Dropping it cancels everything still
/// pending and joins the thread.
pub struct SchedulerHandle {
    sender: SchedulerSender,
    thread: Option<JoinHandle<()>>,
}

pub fn spawn_scheduler<S: AudioSink + 'static>(sink: S) -> SchedulerHandle {
    let (command_tx, command_rx) = channel::unbounded();

    let thread = std::thread::Builder::new()
        .name("event-scheduler".into())
        .spawn(move || scheduler_thread(command_rx, Box::new(sink)))
        .map_err(|e| tracing::error!("failed to spawn scheduler thread: {}", e))
        .ok();

    SchedulerHandle {
        sender: SchedulerSender { command_tx },
        thread,
    }
}

impl SchedulerSender {
    fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerError> {
        self.command_tx
            .send(command)
            .map_err(|_| SchedulerError::Disconnected)
    }

    /// Past deadlines fire on the next wake.
    pub fn schedule(&self, deadline: Instant, event: SynthEvent) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Schedule(ScheduledEvent { deadline, event }))
    }

    pub fn schedule_after(&self, delay: Duration, event: SynthEvent) -> Result<(), SchedulerError> {
        self.schedule(Instant::now() + delay, event)
    }

    pub fn note_on(&self, channel: u8, note: u8, velocity: u8) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Trigger(SynthEvent::NoteOn {
            channel,
            note,
            velocity,
        }))
    }

    pub fn note_off(&self, channel: u8, note: u8) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Trigger(SynthEvent::NoteOff { channel, note }))
    }

    /// Starts a note now and schedules its note-off after `duration`.
    pub fn note(
        &self,
        channel: u8,
        note: u8,
        velocity: u8,
        duration: Duration,
    ) -> Result<(), SchedulerError> {
        let deadline = Instant::now() + duration;
        self.note_on(channel, note, velocity)?;
        self.schedule(deadline, SynthEvent::NoteOff { channel, note })
    }

    pub fn cancel_all(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::CancelAll)
    }

    /// Number of events still waiting for their deadline.
    pub fn pending(&self) -> Result<usize, SchedulerError> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.send(SchedulerCommand::Pending(reply_tx))?;
        reply_rx.recv().map_err(|_| SchedulerError::Disconnected)
    }
}

impl SchedulerHandle {
    pub fn sender(&self) -> SchedulerSender {
        self.sender.clone()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.sender.send(SchedulerCommand::Shutdown);
            if thread.join().is_err() {
                tracing::error!("scheduler thread panicked");
            }
        }
    }
}

impl Deref for SchedulerHandle {
    type Target = SchedulerSender;

    fn deref(&self) -> &SchedulerSender {
        &self.sender
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scheduler_thread(command_rx: Receiver<SchedulerCommand>, mut sink: Box<dyn AudioSink>) {
    tracing::info!("scheduler started");
    let mut queue = EventQueue::new();
    let mut timer = channel::never();

    loop {
        let step = channel::select! {
            recv(command_rx) -> command => match command {
                Ok(command) => handle_command(&mut queue, sink.as_mut(), command),
                Err(_) => Step::Stop,
            },
            recv(timer) -> _ => wake(&command_rx, &mut queue, sink.as_mut()),
        };

        match step {
            Step::Continue => {}
            Step::Rearm => timer = rearm(&queue),
            Step::Stop => break,
        }
    }

    let dropped = queue.cancel_all();
    tracing::info!(dropped, "scheduler stopped");
}

/// Timer wake. Commands already queued are applied first so that events
/// submitted before the wake fire together, in deadline order.
fn wake(
    command_rx: &Receiver<SchedulerCommand>,
    queue: &mut EventQueue,
    sink: &mut dyn AudioSink,
) -> Step {
    for command in command_rx.try_iter() {
        if let Step::Stop = handle_command(queue, sink, command) {
            return Step::Stop;
        }
    }
    fire(queue, sink, Instant::now());
    Step::Rearm
}

fn handle_command(
    queue: &mut EventQueue,
    sink: &mut dyn AudioSink,
    command: SchedulerCommand,
) -> Step {
    match command {
        SchedulerCommand::Schedule(scheduled) => {
            tracing::debug!(event = ?scheduled.event, "schedule");
            if queue.schedule(scheduled.deadline, scheduled.event) {
                Step::Rearm
            } else {
                Step::Continue
            }
        }
        SchedulerCommand::Trigger(event) => {
            deliver(sink, event);
            Step::Continue
        }
        SchedulerCommand::CancelAll => {
            let dropped = queue.cancel_all();
            tracing::debug!(dropped, "cancel all");
            Step::Rearm
        }
        SchedulerCommand::Pending(reply) => {
            let _ = reply.send(queue.len());
            Step::Continue
        }
        SchedulerCommand::Shutdown => Step::Stop,
    }
}

fn fire(queue: &mut EventQueue, sink: &mut dyn AudioSink, now: Instant) {
    for scheduled in queue.drain_due(now) {
        deliver(sink, scheduled.event);
    }
}

fn rearm(queue: &EventQueue) -> Receiver<Instant> {
    match queue.next_deadline() {
        Some(deadline) => channel::at(deadline),
        None => channel::never(),
    }
}

// Failures are logged and not retried; a stuck sink must not hold back
// later deadlines.
fn deliver(sink: &mut dyn AudioSink, event: SynthEvent) {
    match sink.trigger(event) {
        Ok(()) => tracing::trace!(?event, "triggered"),
        Err(err) => tracing::warn!(?event, %err, "audio sink rejected trigger"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RecordingSink;

    fn off(note: u8) -> SynthEvent {
        SynthEvent::NoteOff { channel: 0, note }
    }

    fn notes(events: &[ScheduledEvent]) -> Vec<u8> {
        events
            .iter()
            .map(|e| match e.event {
                SynthEvent::NoteOff { note, .. } | SynthEvent::NoteOn { note, .. } => note,
            })
            .collect()
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let base = Instant::now();
        let mut queue = EventQueue::new();
        queue.schedule(base + Duration::from_millis(5), off(5));
        queue.schedule(base + Duration::from_millis(1), off(1));
        queue.schedule(base + Duration::from_millis(3), off(3));

        let due = queue.drain_due(base + Duration::from_millis(10));
        assert_eq!(notes(&due), vec![1, 3, 5]);
    }

    #[test]
    fn test_equal_deadlines_are_fifo() {
        let deadline = Instant::now() + Duration::from_millis(2);
        let mut queue = EventQueue::new();
        queue.schedule(deadline, off(b'A'));
        queue.schedule(deadline, off(b'B'));
        assert_eq!(notes(&queue.drain_due(deadline)), vec![b'A', b'B']);
    }

    #[test]
    fn test_only_new_head_rearms() {
        let base = Instant::now();
        let mut queue = EventQueue::new();
        assert_eq!(queue.state(), SchedulerState::Idle);

        assert!(queue.schedule(base + Duration::from_millis(5), off(5)));
        assert!(!queue.schedule(base + Duration::from_millis(8), off(8)));
        assert!(!queue.schedule(base + Duration::from_millis(5), off(6)));
        assert!(queue.schedule(base + Duration::from_millis(1), off(1)));
        assert_eq!(
            queue.state(),
            SchedulerState::Armed(base + Duration::from_millis(1))
        );
    }

    #[test]
    fn test_batched_drain_in_single_wake() {
        let now = Instant::now();
        let mut queue = EventQueue::new();
        queue.schedule(now, off(3));
        queue.schedule(now - Duration::from_millis(2), off(1));
        queue.schedule(now - Duration::from_millis(1), off(2));
        queue.schedule(now + Duration::from_secs(60), off(9));

        let due = queue.drain_due(now);
        assert_eq!(notes(&due), vec![1, 2, 3]);
        assert_eq!(
            queue.state(),
            SchedulerState::Armed(now + Duration::from_secs(60))
        );
    }

    #[test]
    fn test_drain_nothing_due() {
        let now = Instant::now();
        let mut queue = EventQueue::new();
        queue.schedule(now + Duration::from_millis(50), off(1));
        assert!(queue.drain_due(now).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancel_all_returns_to_idle() {
        let mut queue = EventQueue::new();
        queue.schedule(Instant::now(), off(1));
        queue.schedule(Instant::now(), off(2));
        assert_eq!(queue.cancel_all(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.state(), SchedulerState::Idle);
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_wake_applies_queued_commands_before_firing() {
        let (command_tx, command_rx) = channel::unbounded();
        let past = Instant::now() - Duration::from_millis(10);
        for ms in [5, 1, 3] {
            command_tx
                .send(SchedulerCommand::Schedule(ScheduledEvent {
                    deadline: past + Duration::from_millis(ms),
                    event: off(ms as u8),
                }))
                .unwrap();
        }

        let mut queue = EventQueue::new();
        let mut sink = RecordingSink::new();
        assert!(matches!(
            wake(&command_rx, &mut queue, &mut sink),
            Step::Rearm
        ));
        assert_eq!(sink.events(), vec![off(1), off(3), off(5)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wake_stops_on_queued_shutdown() {
        let (command_tx, command_rx) = channel::unbounded();
        let mut queue = EventQueue::new();
        queue.schedule(Instant::now(), off(1));
        command_tx.send(SchedulerCommand::Shutdown).unwrap();

        let mut sink = RecordingSink::new();
        assert!(matches!(wake(&command_rx, &mut queue, &mut sink), Step::Stop));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_fire_keeps_going_after_sink_failure() {
        let now = Instant::now();
        let mut queue = EventQueue::new();
        queue.schedule(now, off(1));
        queue.schedule(now, off(2));

        let mut sink = RecordingSink::rejecting();
        fire(&mut queue, &mut sink, now);
        assert_eq!(sink.events(), vec![off(1), off(2)]);
        assert!(queue.is_empty());
    }
}
