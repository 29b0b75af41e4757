//! Hysteretic silence detection over metering output.
//!
//! Confirmed entry requires `duration_secs` continuously below threshold;
//! confirmed exit requires `recovery_secs` continuously above it. The entry
//! timer is deliberately preserved while a recovery is pending, so a brief
//! dip back into audio does not corrupt the total silence duration reported
//! when recovery finally completes.

use std::time::Instant;

use crate::config::SilenceConfig;

/// Where the detector currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Silent,
}

/// One observation emitted per metering window.
///
/// `just_entered` fires at most once per silent episode; `just_recovered`
/// fires at most once and only after a prior `just_entered`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilenceEvent {
    /// Whether confirmed silence is ongoing.
    pub in_silence: bool,
    /// Seconds since the silence began (while silent or on recovery).
    pub duration_secs: f64,
    /// Set on the window where silence was confirmed.
    pub just_entered: bool,
    /// Set on the window where recovery was confirmed.
    pub just_recovered: bool,
    /// Total confirmed silence duration, reported with `just_recovered`.
    pub total_duration_secs: f64,
}

/// Silence state machine. Config is snapshotted at construction; the engine
/// creates a fresh detector for every capture session.
#[derive(Debug)]
pub struct SilenceDetector {
    cfg: SilenceConfig,
    state: State,
    silence_start: Option<Instant>,
    recovery_start: Option<Instant>,
    confirmed_secs: f64,
}

impl SilenceDetector {
    #[must_use]
    pub fn new(cfg: SilenceConfig) -> Self {
        Self {
            cfg,
            state: State::Idle,
            silence_start: None,
            recovery_start: None,
            confirmed_secs: 0.0,
        }
    }

    /// Clears all timers and returns to idle.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.silence_start = None;
        self.recovery_start = None;
        self.confirmed_secs = 0.0;
    }

    /// Feeds one window's RMS levels and advances the state machine.
    pub fn update(&mut self, rms_left: f64, rms_right: f64, now: Instant) -> SilenceEvent {
        let instant_silent =
            rms_left < self.cfg.threshold_db && rms_right < self.cfg.threshold_db;
        let mut event = SilenceEvent::default();

        match self.state {
            State::Idle => {
                if instant_silent {
                    let start = *self.silence_start.get_or_insert(now);
                    let elapsed = now.duration_since(start).as_secs_f64();
                    if elapsed >= self.cfg.duration_secs {
                        self.state = State::Silent;
                        self.recovery_start = None;
                        self.confirmed_secs = elapsed;
                        event.in_silence = true;
                        event.duration_secs = elapsed;
                        event.just_entered = true;
                    }
                } else {
                    self.silence_start = None;
                }
            }
            State::Silent => {
                let start = self
                    .silence_start
                    .expect("silence_start is set while Silent");
                let elapsed = now.duration_since(start).as_secs_f64();
                self.confirmed_secs = elapsed;
                event.in_silence = true;
                event.duration_secs = elapsed;

                if instant_silent {
                    // Audio dipped back below threshold; abandon the pending
                    // recovery but keep the original entry timer.
                    self.recovery_start = None;
                } else {
                    let recovery = *self.recovery_start.get_or_insert(now);
                    if now.duration_since(recovery).as_secs_f64() >= self.cfg.recovery_secs {
                        event.just_recovered = true;
                        event.in_silence = false;
                        event.total_duration_secs = self.confirmed_secs;
                        self.state = State::Idle;
                        self.silence_start = None;
                        self.recovery_start = None;
                    }
                }
            }
        }

        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg() -> SilenceConfig {
        SilenceConfig {
            threshold_db: -40.0,
            duration_secs: 3.0,
            recovery_secs: 5.0,
        }
    }

    /// Drives the detector with one observation per 250 ms window.
    fn run(
        detector: &mut SilenceDetector,
        base: Instant,
        spans: &[(f64, f64)], // (seconds, rms level on both channels)
    ) -> Vec<(f64, SilenceEvent)> {
        let mut events = Vec::new();
        let mut t = 0.0;
        for &(seconds, level) in spans {
            let windows = (seconds / 0.25) as usize;
            for _ in 0..windows {
                t += 0.25;
                let now = base + Duration::from_secs_f64(t);
                events.push((t, detector.update(level, level, now)));
            }
        }
        events
    }

    #[test]
    fn no_audio_confirms_exactly_once() {
        let mut detector = SilenceDetector::new(cfg());
        let base = Instant::now();
        let events = run(&mut detector, base, &[(10.0, -60.0)]);

        let entered: Vec<_> = events.iter().filter(|(_, e)| e.just_entered).collect();
        assert_eq!(entered.len(), 1, "exactly one just_entered");
        let (t, event) = entered[0];
        assert!((*t - 3.0).abs() < 0.26, "entered at ~3s, got {t}");
        assert!((event.duration_secs - 3.0).abs() < 0.26);

        // While silent, duration is monotonically non-decreasing.
        let mut last = 0.0;
        for (t, event) in &events {
            if *t >= 3.0 {
                assert!(event.in_silence || event.just_recovered);
                assert!(event.duration_secs >= last);
                last = event.duration_secs;
            }
        }
        assert!(!events.iter().any(|(_, e)| e.just_recovered));
    }

    #[test]
    fn recovery_after_audio_returns() {
        let mut detector = SilenceDetector::new(cfg());
        let base = Instant::now();
        let events = run(&mut detector, base, &[(4.0, -60.0), (6.0, -20.0)]);

        let recovered: Vec<_> = events.iter().filter(|(_, e)| e.just_recovered).collect();
        assert_eq!(recovered.len(), 1, "exactly one just_recovered");
        let (t, event) = recovered[0];
        assert!((*t - 9.0).abs() < 0.26, "recovered at ~9s, got {t}");
        // Total includes the recovery window itself: ~4s silence + 5s recovery.
        assert!(
            (event.total_duration_secs - 9.0).abs() < 0.3,
            "total ~9s, got {}",
            event.total_duration_secs
        );
        assert!(!event.in_silence);
    }

    #[test]
    fn interrupted_recovery_preserves_the_entry_timer() {
        let mut detector = SilenceDetector::new(cfg());
        let base = Instant::now();
        let events = run(
            &mut detector,
            base,
            &[(4.0, -60.0), (2.0, -20.0), (4.0, -60.0)],
        );

        assert!(!events.iter().any(|(_, e)| e.just_recovered));
        let (_, last) = events.last().unwrap();
        assert!(last.in_silence);
        // silence_start was never cleared, so duration spans the whole run.
        assert!(
            (last.duration_secs - 10.0).abs() < 0.26,
            "duration ~10s, got {}",
            last.duration_secs
        );
    }

    #[test]
    fn brief_dip_never_confirms() {
        let mut detector = SilenceDetector::new(cfg());
        let base = Instant::now();
        let events = run(&mut detector, base, &[(2.0, -60.0), (2.0, -20.0)]);
        assert!(!events.iter().any(|(_, e)| e.just_entered));
        assert!(!events.iter().any(|(_, e)| e.in_silence));
    }

    #[test]
    fn entry_threshold_is_inclusive() {
        let mut detector = SilenceDetector::new(cfg());
        let base = Instant::now();
        // First observation arms the timer.
        detector.update(-60.0, -60.0, base);
        // Exactly duration_secs later the state flips.
        let event = detector.update(-60.0, -60.0, base + Duration::from_secs(3));
        assert!(event.just_entered);
    }

    #[test]
    fn recovery_threshold_is_inclusive() {
        let mut detector = SilenceDetector::new(cfg());
        let base = Instant::now();
        detector.update(-60.0, -60.0, base);
        detector.update(-60.0, -60.0, base + Duration::from_secs(3));
        // Audio returns; first loud observation arms the recovery timer.
        detector.update(-20.0, -20.0, base + Duration::from_secs(4));
        let event = detector.update(-20.0, -20.0, base + Duration::from_secs(9));
        assert!(event.just_recovered);
    }

    #[test]
    fn one_loud_channel_is_not_silence() {
        let mut detector = SilenceDetector::new(cfg());
        let base = Instant::now();
        detector.update(-60.0, -20.0, base);
        let event = detector.update(-60.0, -20.0, base + Duration::from_secs(10));
        assert!(!event.in_silence);
        assert!(!event.just_entered);
    }

    #[test]
    fn event_language_alternates_entered_and_recovered() {
        let mut detector = SilenceDetector::new(cfg());
        let base = Instant::now();
        let events = run(
            &mut detector,
            base,
            &[
                (4.0, -60.0),
                (6.0, -20.0),
                (4.0, -60.0),
                (6.0, -20.0),
                (4.0, -60.0),
            ],
        );
        let projected: Vec<&str> = events
            .iter()
            .filter_map(|(_, e)| {
                if e.just_entered {
                    Some("entered")
                } else if e.just_recovered {
                    Some("recovered")
                } else {
                    None
                }
            })
            .collect();
        assert_eq!(
            projected,
            vec!["entered", "recovered", "entered", "recovered", "entered"]
        );
    }
}
