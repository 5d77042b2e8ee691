use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    pub connect_attempts: AtomicU64,
    pub generations: AtomicU64,
    pub frames_in: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub messages_rejected: AtomicU64,
    pub unknown_opcodes: AtomicU64,
    pub commands_sent: AtomicU64,
    pub sink_pushes: AtomicU64,
    pub sink_failures: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub connect_attempts: u64,
    pub generations: u64,
    pub frames_in: u64,
    pub frames_dropped: u64,
    pub messages_rejected: u64,
    pub unknown_opcodes: u64,
    pub commands_sent: u64,
    pub sink_pushes: u64,
    pub sink_failures: u64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            unknown_opcodes: self.unknown_opcodes.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            sink_pushes: self.sink_pushes.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}
