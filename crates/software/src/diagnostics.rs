//! Counters for recoverable conditions.
//!
//! Nothing on the control path is allowed to stop the tick, so malformed input, dropped notes and the like are
//! tallied here instead of being returned as errors. The counters are atomics so that a monitoring task can read them
//! while the tick is running in a higher-priority context.

use core::sync::atomic::{AtomicU32, Ordering};

/// Kinds of recoverable condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Diagnostic {
    /// The MIDI decoder discarded one or more bytes.
    MalformedMidi,
    /// A NoteOn could not be given a voice and stealing was disabled.
    VoiceAllocationDropped,
    /// A calibration table was rejected.
    InvalidCalibration,
    /// An outbound MIDI packet could not be handed to the transport.
    OutboundDropped,
    /// An event was decoded but left for the next tick because the drain budget was spent.
    DeferredEvent,
    /// A tick took longer than the tick period.
    TickOverrun,
}

/// Shared diagnostic counters.
///
/// Writes happen on the control path only; reads may happen from anywhere.
#[derive(Debug, Default)]
pub struct Diagnostics {
    malformed_midi: AtomicU32,
    voice_allocation_dropped: AtomicU32,
    invalid_calibration: AtomicU32,
    outbound_dropped: AtomicU32,
    deferred_events: AtomicU32,
    tick_overruns: AtomicU32,
}

/// A point-in-time copy of every counter, including the overflow counts kept by the input queues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Snapshot {
    /// See [`Diagnostic::MalformedMidi`].
    pub malformed_midi: u32,
    /// See [`Diagnostic::VoiceAllocationDropped`].
    pub voice_allocation_dropped: u32,
    /// See [`Diagnostic::InvalidCalibration`].
    pub invalid_calibration: u32,
    /// Bytes lost to input queue overflow, summed across queues.
    pub queue_overflow: u32,
    /// See [`Diagnostic::OutboundDropped`].
    pub outbound_dropped: u32,
    /// See [`Diagnostic::DeferredEvent`].
    pub deferred_events: u32,
    /// See [`Diagnostic::TickOverrun`].
    pub tick_overruns: u32,
}

impl Diagnostics {
    /// Constructs a set of zeroed counters. Usable in a `static`.
    pub const fn new() -> Self {
        Self {
            malformed_midi: AtomicU32::new(0),
            voice_allocation_dropped: AtomicU32::new(0),
            invalid_calibration: AtomicU32::new(0),
            outbound_dropped: AtomicU32::new(0),
            deferred_events: AtomicU32::new(0),
            tick_overruns: AtomicU32::new(0),
        }
    }

    fn counter(&self, diagnostic: Diagnostic) -> &AtomicU32 {
        match diagnostic {
            Diagnostic::MalformedMidi => &self.malformed_midi,
            Diagnostic::VoiceAllocationDropped => &self.voice_allocation_dropped,
            Diagnostic::InvalidCalibration => &self.invalid_calibration,
            Diagnostic::OutboundDropped => &self.outbound_dropped,
            Diagnostic::DeferredEvent => &self.deferred_events,
            Diagnostic::TickOverrun => &self.tick_overruns,
        }
    }

    /// Counts one occurrence.
    pub fn record(&self, diagnostic: Diagnostic) {
        self.record_many(diagnostic, 1);
    }

    /// Counts `n` occurrences. Counters saturate rather than wrap.
    pub fn record_many(&self, diagnostic: Diagnostic, n: u32) {
        if n == 0 {
            return;
        }
        // single writer, so load + store is sufficient and works on cores without atomic read-modify-write
        let counter = self.counter(diagnostic);
        counter.store(
            counter.load(Ordering::Relaxed).saturating_add(n),
            Ordering::Relaxed,
        );
    }

    /// Reads one counter.
    pub fn count(&self, diagnostic: Diagnostic) -> u32 {
        self.counter(diagnostic).load(Ordering::Relaxed)
    }

    /// Copies every counter; `queue_overflow` is supplied by the caller since the queues keep their own tallies.
    pub fn snapshot(&self, queue_overflow: u32) -> Snapshot {
        Snapshot {
            malformed_midi: self.count(Diagnostic::MalformedMidi),
            voice_allocation_dropped: self.count(Diagnostic::VoiceAllocationDropped),
            invalid_calibration: self.count(Diagnostic::InvalidCalibration),
            queue_overflow,
            outbound_dropped: self.count(Diagnostic::OutboundDropped),
            deferred_events: self.count(Diagnostic::DeferredEvent),
            tick_overruns: self.count(Diagnostic::TickOverrun),
        }
    }
}
