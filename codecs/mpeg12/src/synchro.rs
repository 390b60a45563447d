//! Frame dropping and presentation reordering.
//!
//! The decoder measures how long each picture type takes to decode and,
//! before committing to a picture, checks whether it can be on screen in
//! time. The underlying model: let T be the picture period and tau[I,P,B]
//! the mean decode time per type. A machine that satisfies
//! `(1 + n_p*(n_b+1))*T > tau[I]` can decode every I picture of the stream;
//! `(n_b+1)*T > tau[P]` every P; `T > tau[B]` every B. Slower machines fall
//! back to deadline tests of the form `pts - now > tau' + DELTA` where
//! `tau' = tau + tau/2 + render_time` pads the mean with its typical
//! deviation and the output cost.
//!
//! Presentation dates need reordering around B pictures: the PTS carried on
//! a non-B picture applies only after the intervening B pictures have been
//! shown, so it is parked in `backward_pts` until the next anchor.

use std::str::FromStr;
use std::sync::Arc;

use crate::decoder::TimeSource;
use crate::types::CodingType;

/// Bound of the decoding-date FIFO.
const MAX_DECODING_PIC: usize = 16;
/// Samples a tau average keeps at most.
const MAX_PIC_AVERAGE: i64 = 8;
/// Error margin of the deadline tests, in microseconds.
const DELTA: i64 = 40_000;

/// Fake stream pattern used until the real one is observed; often right.
const DEFAULT_NB_P: i64 = 5;
const DEFAULT_NB_B: i64 = 1;

/// Picture-selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynchroMode {
    /// Adaptive selection from measured decode times.
    #[default]
    Auto,
    /// I pictures only.
    IOnly,
    /// I pictures plus one P after each.
    IPlus,
    /// I and P pictures.
    IP,
    /// I and P plus every other B.
    IPPlus,
    /// Everything.
    Ipb,
}

impl FromStr for SynchroMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "auto" => SynchroMode::Auto,
            "i" => SynchroMode::IOnly,
            "i+" => SynchroMode::IPlus,
            "ip" => SynchroMode::IP,
            "ip+" => SynchroMode::IPPlus,
            "ipb" => SynchroMode::Ipb,
            _ => return Err(()),
        })
    }
}

/// Picture period in microseconds for a frame rate in 1/1001 fps.
fn period(frame_rate: i64) -> i64 {
    if frame_rate <= 0 {
        return 0;
    }
    1001 * 1_000_000 / frame_rate
}

pub struct Synchro {
    mode: SynchroMode,
    time: Arc<dyn TimeSource>,

    /* Decoding dates of the pictures in flight. */
    date_fifo: [(i64, usize); MAX_DECODING_PIC],
    fifo_start: usize,
    fifo_end: usize,

    /* Stream pattern: P pictures per GOP, B pictures between anchors, and
     * the counters tracking the pattern currently being observed. */
    n_p: i64,
    n_b: i64,
    eta_p: i64,
    eta_b: i64,

    /* Mean decode times, indexed by coding type. */
    tau: [i64; 5],
    meaningful: [i64; 5],

    dropped_last: bool,
    current_pts: i64,
    backward_pts: i64,
    next_period: i64,

    /* Counters, reported in the I-picture trace. */
    pic_count: u32,
    trashed_pic: u32,
    not_chosen_pic: u32,
}

impl Synchro {
    pub fn new(mode: SynchroMode, time: Arc<dyn TimeSource>) -> Self {
        let now = time.now();
        Self {
            mode,
            time,
            date_fifo: [(0, 0); MAX_DECODING_PIC],
            fifo_start: 0,
            fifo_end: 0,
            n_p: DEFAULT_NB_P,
            n_b: DEFAULT_NB_B,
            eta_p: DEFAULT_NB_P,
            eta_b: DEFAULT_NB_B,
            tau: [0; 5],
            meaningful: [0; 5],
            dropped_last: false,
            current_pts: now,
            backward_pts: 0,
            next_period: 0,
            pic_count: 0,
            trashed_pic: 0,
            not_chosen_pic: 0,
        }
    }

    fn tau_prime(&self, coding_type: CodingType, render_time: i64) -> i64 {
        let t = self.tau[coding_type.index()];
        t + (t >> 1) + render_time
    }

    /// Decide whether the coming picture is worth decoding.
    pub fn choose(&mut self, coding_type: CodingType, frame_rate: i64, render_time: i64) -> bool {
        if self.mode != SynchroMode::Auto {
            return self.choose_forced(coding_type);
        }

        let now = self.time.now();
        let period = period(frame_rate);
        let i_budget = (1 + self.n_p * (self.n_b + 1)) * period > self.tau[CodingType::I.index()];
        let p_budget = (self.n_b + 1) * period > self.tau[CodingType::P.index()];

        let decode = match coding_type {
            CodingType::I | CodingType::D => {
                let pts = if self.backward_pts != 0 {
                    self.backward_pts
                } else {
                    /* Displaying order: B B P B B I; current_pts names the
                     * first pending B, this picture lands n_b + 2 periods
                     * later. */
                    self.current_pts + period * (self.n_b + 2)
                };
                let ok = i_budget
                    || pts - now > self.tau_prime(CodingType::I, render_time) + DELTA;
                if !ok {
                    tracing::warn!("trashing I picture");
                }
                ok
            }

            CodingType::P => {
                let pts = if self.backward_pts != 0 {
                    self.backward_pts
                } else {
                    self.current_pts + period * (self.n_b + 1)
                };
                if !i_budget {
                    false
                } else if p_budget {
                    /* Still keeping up; only drop if really late. */
                    pts - now > 0
                } else {
                    pts - now > self.tau_prime(CodingType::P, render_time) + DELTA
                        && pts - now
                            + period * ((self.n_p - self.eta_p) * (1 + self.n_b) - 1)
                            > self.tau_prime(CodingType::P, render_time)
                                + self.tau_prime(CodingType::I, render_time)
                                + DELTA
                }
            }

            CodingType::B => {
                p_budget
                    && self.current_pts - now > self.tau_prime(CodingType::B, render_time) + DELTA
            }
        };

        if !decode {
            self.not_chosen_pic += 1;
        }
        decode
    }

    fn choose_forced(&mut self, coding_type: CodingType) -> bool {
        match coding_type {
            CodingType::I | CodingType::D => {
                if self.mode == SynchroMode::IPlus {
                    self.dropped_last = true;
                }
                true
            }
            CodingType::P => match self.mode {
                SynchroMode::IOnly => false,
                SynchroMode::IPlus => {
                    if self.dropped_last {
                        self.dropped_last = false;
                        true
                    } else {
                        false
                    }
                }
                _ => true,
            },
            CodingType::B => match self.mode {
                SynchroMode::IOnly | SynchroMode::IPlus | SynchroMode::IP => false,
                SynchroMode::Ipb => true,
                _ => {
                    /* IP+: every other one. */
                    self.dropped_last = !self.dropped_last;
                    !self.dropped_last
                }
            },
        }
    }

    /// Account a trashed picture.
    pub fn trash(&mut self, _coding_type: CodingType) {
        self.trashed_pic += 1;
    }

    /// A picture starts decoding: remember when.
    pub fn decode(&mut self, coding_type: CodingType) {
        if (self.fifo_end + MAX_DECODING_PIC + 1 - self.fifo_start) % MAX_DECODING_PIC != 0 {
            self.date_fifo[self.fifo_end] = (self.time.now(), coding_type.index());
            self.fifo_end = (self.fifo_end + 1) % MAX_DECODING_PIC;
        } else {
            tracing::error!("synchro fifo full, estimations will be biased");
        }
    }

    /// A picture finished decoding (or was destroyed, with `garbage` set);
    /// fold its decode time into the per-type mean.
    pub fn end(&mut self, garbage: bool) {
        if self.fifo_start == self.fifo_end {
            return;
        }
        if !garbage {
            let (start, coding_index) = self.date_fifo[self.fifo_start];
            let tau = self.time.now() - start;

            /* Mean with the running average, for stability. */
            let n = self.meaningful[coding_index];
            self.tau[coding_index] = (n * self.tau[coding_index] + tau) / (n + 1);
            if self.meaningful[coding_index] < MAX_PIC_AVERAGE {
                self.meaningful[coding_index] += 1;
            }
        }
        self.fifo_start = (self.fifo_start + 1) % MAX_DECODING_PIC;
    }

    /// Presentation date of the picture currently being rotated out.
    pub fn date(&self) -> i64 {
        self.current_pts
    }

    /// Folds a parked anchor PTS into the current date; used when the
    /// stream ends and no further anchor will consume it.
    pub fn take_backward_pts(&mut self) {
        if self.backward_pts != 0 {
            self.current_pts = self.backward_pts;
            self.backward_pts = 0;
        }
    }

    /// Mean decode time currently estimated for a picture type.
    pub fn tau(&self, coding_type: CodingType) -> i64 {
        self.tau[coding_type.index()]
    }

    pub fn trashed_pictures(&self) -> u32 {
        self.trashed_pic
    }

    /// A new picture header arrived: track the stream pattern and advance
    /// the presentation clock, consuming the PES timestamps.
    pub fn new_picture(
        &mut self,
        coding_type: CodingType,
        repeat_field: i32,
        frame_rate: i64,
        next_pts: &mut i64,
        next_dts: &mut i64,
    ) {
        let period = period(frame_rate);

        match coding_type {
            CodingType::I | CodingType::D => {
                if self.eta_p != 0 && self.eta_p != self.n_p {
                    tracing::warn!(
                        "stream periodicity changed from P[{}] to P[{}]",
                        self.n_p,
                        self.eta_p
                    );
                    self.n_p = self.eta_p;
                }
                self.eta_p = 0;
                self.eta_b = 0;
                tracing::debug!(
                    "synchro: I({}) P({})[{}] B({})[{}], trashed {}:{}/{}",
                    self.tau[CodingType::I.index()],
                    self.tau[CodingType::P.index()],
                    self.n_p,
                    self.tau[CodingType::B.index()],
                    self.n_b,
                    self.not_chosen_pic,
                    self.trashed_pic - self.not_chosen_pic.min(self.trashed_pic),
                    self.pic_count,
                );
            }
            CodingType::P => {
                self.eta_p += 1;
                if self.eta_b != 0 && self.eta_b != self.n_b {
                    tracing::warn!(
                        "stream periodicity changed from B[{}] to B[{}]",
                        self.n_b,
                        self.eta_b
                    );
                    self.n_b = self.eta_b;
                }
                self.eta_b = 0;
            }
            CodingType::B => {
                self.eta_b += 1;
            }
        }

        self.current_pts += self.next_period;
        /* A frame occupies 2, 3 or 4 half-periods on screen, depending on
         * repeat_first_field / top_field_first / the progressive flags. */
        self.next_period = i64::from(repeat_field) * (period >> 1);

        let threshold = period >> 2;
        if coding_type == CodingType::B {
            /* B pictures display in coding order: the PES timestamp applies
             * to this very picture. */
            if *next_pts != 0 {
                if (*next_pts - self.current_pts).abs() > threshold {
                    tracing::warn!(
                        "pts != current_date ({})",
                        self.current_pts - *next_pts
                    );
                }
                self.current_pts = *next_pts;
                *next_pts = 0;
            }
        } else {
            if self.backward_pts != 0 {
                if *next_dts != 0 && (*next_dts - self.backward_pts).abs() > threshold {
                    tracing::warn!(
                        "backward_pts != dts ({})",
                        self.backward_pts - *next_dts
                    );
                }
                if (self.backward_pts - self.current_pts).abs() > threshold {
                    tracing::warn!(
                        "backward_pts != current_pts ({})",
                        self.current_pts - self.backward_pts
                    );
                }
                self.current_pts = self.backward_pts;
                self.backward_pts = 0;
            } else if *next_dts != 0 {
                if (*next_dts - self.current_pts).abs() > threshold {
                    tracing::warn!("dts != current_pts ({})", self.current_pts - *next_dts);
                }
                /* By definition of a DTS. */
                self.current_pts = *next_dts;
                *next_dts = 0;
            }

            if *next_pts != 0 {
                /* Park the PTS for the next anchor. */
                self.backward_pts = *next_pts;
                *next_pts = 0;
            }
        }

        self.pic_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Scripted clock: every `now()` returns the value set by the test.
    struct FakeClock(AtomicI64);

    impl TimeSource for FakeClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn synchro_at(mode: SynchroMode, start: i64) -> (Synchro, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock(AtomicI64::new(start)));
        (Synchro::new(mode, clock.clone()), clock)
    }

    const NTSC: i64 = 30 * 1001; // 29.97 fps, period 33 366 us

    #[test]
    fn mode_string_parsing() {
        assert_eq!("auto".parse(), Ok(SynchroMode::Auto));
        assert_eq!("I".parse(), Ok(SynchroMode::IOnly));
        assert_eq!("i+".parse(), Ok(SynchroMode::IPlus));
        assert_eq!("IP".parse(), Ok(SynchroMode::IP));
        assert_eq!("ip+".parse(), Ok(SynchroMode::IPPlus));
        assert_eq!("IPB".parse(), Ok(SynchroMode::Ipb));
        assert_eq!(SynchroMode::from_str("bogus"), Err(()));
    }

    #[test]
    fn forced_modes_select_the_advertised_pictures() {
        let (mut s, _) = synchro_at(SynchroMode::IOnly, 0);
        assert!(s.choose(CodingType::I, NTSC, 0));
        assert!(!s.choose(CodingType::P, NTSC, 0));
        assert!(!s.choose(CodingType::B, NTSC, 0));

        let (mut s, _) = synchro_at(SynchroMode::IPlus, 0);
        assert!(s.choose(CodingType::I, NTSC, 0));
        assert!(s.choose(CodingType::P, NTSC, 0)); // the one after the I
        assert!(!s.choose(CodingType::P, NTSC, 0));

        let (mut s, _) = synchro_at(SynchroMode::IPPlus, 0);
        assert!(s.choose(CodingType::P, NTSC, 0));
        assert!(!s.choose(CodingType::B, NTSC, 0));
        assert!(s.choose(CodingType::B, NTSC, 0)); // alternates

        let (mut s, _) = synchro_at(SynchroMode::Ipb, 0);
        assert!(s.choose(CodingType::B, NTSC, 0));
    }

    #[test]
    fn tau_is_a_capped_running_mean() {
        let (mut s, clock) = synchro_at(SynchroMode::Auto, 0);
        for i in 0..12 {
            clock.0.store(i * 1_000_000, Ordering::Relaxed);
            s.decode(CodingType::P);
            clock.0.store(i * 1_000_000 + 10_000, Ordering::Relaxed);
            s.end(false);
        }
        assert_eq!(s.tau(CodingType::P), 10_000);

        // A garbage end does not pollute the mean.
        s.decode(CodingType::P);
        clock.0.store(999_000_000, Ordering::Relaxed);
        s.end(true);
        assert_eq!(s.tau(CodingType::P), 10_000);
    }

    #[test]
    fn fast_machine_decodes_everything() {
        let (mut s, clock) = synchro_at(SynchroMode::Auto, 0);
        // Make tau tiny: every type decodes in 1 ms.
        for t in [CodingType::I, CodingType::P, CodingType::B] {
            for _ in 0..4 {
                let base = clock.0.load(Ordering::Relaxed);
                s.decode(t);
                clock.0.store(base + 1_000, Ordering::Relaxed);
                s.end(false);
            }
        }
        assert!(s.choose(CodingType::I, NTSC, 0));
        assert!(s.choose(CodingType::P, NTSC, 0));
    }

    /// Pictures that cost three periods to decode starve the budget; after
    /// warm-up only I pictures survive.
    #[test]
    fn overloaded_machine_degrades_to_i_only() {
        let (mut s, clock) = synchro_at(SynchroMode::Auto, 0);
        let mut now = 0;
        for t in [CodingType::I, CodingType::P, CodingType::B] {
            for _ in 0..8 {
                clock.0.store(now, Ordering::Relaxed);
                s.decode(t);
                now += 100_000; // 100 ms per picture, period is 33 ms
                clock.0.store(now, Ordering::Relaxed);
                s.end(false);
            }
        }
        // current_pts is far in the past by now; B and P have no budget:
        // (n_b + 1) * T = 66 ms < tau[P] = 100 ms.
        assert!(!s.choose(CodingType::B, NTSC, 0));
        assert!(!s.choose(CodingType::P, NTSC, 0));
        // I pictures still decode thanks to the full-GOP budget:
        // (1 + 5 * 2) * 33 ms > 100 ms.
        assert!(s.choose(CodingType::I, NTSC, 0));
    }

    #[test]
    fn b_pictures_take_the_pes_pts_directly() {
        let (mut s, _) = synchro_at(SynchroMode::Auto, 0);
        let mut pts = 500_000;
        let mut dts = 0;
        s.new_picture(CodingType::B, 2, NTSC, &mut pts, &mut dts);
        assert_eq!(s.date(), 500_000);
        assert_eq!(pts, 0);
    }

    #[test]
    fn anchor_pts_applies_to_the_next_anchor() {
        let (mut s, _) = synchro_at(SynchroMode::Auto, 0);
        let mut dts = 0;

        // First anchor carries a PTS: it is parked, not consumed.
        let mut pts = 1_000_000;
        s.new_picture(CodingType::I, 2, NTSC, &mut pts, &mut dts);
        assert_eq!(pts, 0);
        assert_ne!(s.date(), 1_000_000);

        // The next anchor inherits it.
        let mut pts = 0;
        s.new_picture(CodingType::P, 2, NTSC, &mut pts, &mut dts);
        assert_eq!(s.date(), 1_000_000);
    }

    #[test]
    fn current_pts_advances_by_display_duration() {
        let (mut s, _) = synchro_at(SynchroMode::Auto, 0);
        let period = period(NTSC);
        let (mut pts, mut dts) = (0, 0);
        s.new_picture(CodingType::B, 2, NTSC, &mut pts, &mut dts);
        let first = s.date();
        // Previous picture displayed for 3 half-periods (repeat_first_field).
        s.new_picture(CodingType::B, 3, NTSC, &mut pts, &mut dts);
        assert_eq!(s.date(), first + period);
        s.new_picture(CodingType::B, 2, NTSC, &mut pts, &mut dts);
        assert_eq!(s.date(), first + period + 3 * (period >> 1));
    }

    #[test]
    fn stream_pattern_tracking_adapts_n_p_and_n_b() {
        let (mut s, _) = synchro_at(SynchroMode::Auto, 0);
        let (mut pts, mut dts) = (0, 0);
        // GOP of I P P with no B pictures.
        s.new_picture(CodingType::I, 2, NTSC, &mut pts, &mut dts);
        s.new_picture(CodingType::P, 2, NTSC, &mut pts, &mut dts);
        s.new_picture(CodingType::P, 2, NTSC, &mut pts, &mut dts);
        s.new_picture(CodingType::I, 2, NTSC, &mut pts, &mut dts);
        assert_eq!(s.n_p, 2);
        assert_eq!(s.n_b, 0);
    }
}
