//! Sending-side typing debouncer.
//!
//! The first keystroke after a pause emits "typing". Every keystroke moves
//! the quiet deadline to `last keystroke + quiet`. When the deadline passes,
//! exactly one "stopped typing" goes out. Switching rooms or sending stops
//! typing early.

use std::{ops::Sub, time::Duration};

use quadchat_proto::RoomId;

/// Quiet interval after the last keystroke before "stopped typing".
pub const DEFAULT_TYPING_QUIET: Duration = Duration::from_millis(1000);

/// A typing indicator to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingSignal {
    /// Emit `typing { isTyping: true }`.
    Start(RoomId),
    /// Emit `typing { isTyping: false }`.
    Stop(RoomId),
}

impl TypingSignal {
    /// Room the signal is for.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::Start(room) | Self::Stop(room) => room,
        }
    }

    /// Value for the `isTyping` field.
    pub fn is_typing(&self) -> bool {
        matches!(self, Self::Start(_))
    }
}

/// Debounce state for the local user.
#[derive(Debug, Clone)]
pub struct TypingDebouncer<I> {
    quiet: Duration,
    /// Room we announced typing in, and the last keystroke time.
    active: Option<(RoomId, I)>,
}

impl<I> TypingDebouncer<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Debouncer with the given quiet interval.
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, active: None }
    }

    /// Room typing is currently announced in.
    pub fn active_room(&self) -> Option<&RoomId> {
        self.active.as_ref().map(|(room, _)| room)
    }

    /// Local keystroke in `room_id`.
    pub fn keystroke(&mut self, room_id: &str, now: I) -> Vec<TypingSignal> {
        if let Some((room, last)) = &mut self.active
            && room == room_id
        {
            *last = now;
            return Vec::new();
        }

        // New burst, or the user moved to another room mid-burst.
        let mut signals: Vec<_> = self.stop().into_iter().collect();
        self.active = Some((room_id.to_string(), now));
        signals.push(TypingSignal::Start(room_id.to_string()));
        signals
    }

    /// Fire the quiet deadline if it has passed.
    pub fn tick(&mut self, now: I) -> Option<TypingSignal> {
        let due = self.active.as_ref().is_some_and(|(_, last)| now - *last >= self.quiet);
        if due { self.stop() } else { None }
    }

    /// Stop now (focus change, send, sign-out).
    pub fn stop(&mut self) -> Option<TypingSignal> {
        self.active.take().map(|(room, _)| TypingSignal::Stop(room))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn burst_collapses_to_one_start_and_one_stop() {
        let mut debouncer = TypingDebouncer::new(DEFAULT_TYPING_QUIET);
        let mut emitted = Vec::new();

        for t in [0, 200, 400] {
            emitted.extend(debouncer.tick(ms(t)).map(|s| (t, s)));
            emitted.extend(debouncer.keystroke("r1", ms(t)).into_iter().map(|s| (t, s)));
        }
        for t in (500..=2_000).step_by(100) {
            emitted.extend(debouncer.tick(ms(t)).map(|s| (t, s)));
        }

        assert_eq!(
            emitted,
            vec![
                (0, TypingSignal::Start("r1".into())),
                (1_400, TypingSignal::Stop("r1".into())),
            ]
        );
    }

    #[test]
    fn stop_fires_exactly_at_deadline() {
        let mut debouncer = TypingDebouncer::new(DEFAULT_TYPING_QUIET);
        debouncer.keystroke("r1", ms(400));
        assert_eq!(debouncer.tick(ms(1_399)), None);
        assert_eq!(debouncer.tick(ms(1_400)), Some(TypingSignal::Stop("r1".into())));
        assert_eq!(debouncer.tick(ms(1_500)), None);
    }

    #[test]
    fn typing_resumes_after_stop() {
        let mut debouncer = TypingDebouncer::new(DEFAULT_TYPING_QUIET);
        debouncer.keystroke("r1", ms(0));
        debouncer.tick(ms(1_000));
        let signals = debouncer.keystroke("r1", ms(1_200));
        assert_eq!(signals, vec![TypingSignal::Start("r1".into())]);
    }

    #[test]
    fn room_switch_stops_previous_room() {
        let mut debouncer = TypingDebouncer::new(DEFAULT_TYPING_QUIET);
        debouncer.keystroke("r1", ms(0));
        let signals = debouncer.keystroke("r2", ms(100));
        assert_eq!(
            signals,
            vec![TypingSignal::Stop("r1".into()), TypingSignal::Start("r2".into())]
        );
        assert_eq!(debouncer.active_room().map(String::as_str), Some("r2"));
    }

    #[test]
    fn explicit_stop_is_single_shot() {
        let mut debouncer = TypingDebouncer::new(DEFAULT_TYPING_QUIET);
        assert_eq!(debouncer.stop(), None);
        debouncer.keystroke("r1", ms(0));
        assert_eq!(debouncer.stop(), Some(TypingSignal::Stop("r1".into())));
        assert_eq!(debouncer.stop(), None);
        assert_eq!(debouncer.tick(ms(5_000)), None);
    }

    proptest! {
        /// Starts and stops alternate, beginning with a start.
        #[test]
        fn signals_alternate(gaps in proptest::collection::vec(0u64..3_000, 1..40)) {
            let mut debouncer = TypingDebouncer::new(DEFAULT_TYPING_QUIET);
            let mut now = 0;
            let mut signals = Vec::new();

            for gap in gaps {
                now += gap;
                signals.extend(debouncer.tick(ms(now)));
                signals.extend(debouncer.keystroke("r1", ms(now)));
            }
            signals.extend(debouncer.tick(ms(now + 1_000)));

            for (i, signal) in signals.iter().enumerate() {
                prop_assert_eq!(signal.is_typing(), i % 2 == 0);
            }
            prop_assert_eq!(signals.len() % 2, 0, "every start is eventually stopped");
        }
    }
}
