//! Layered 16 bit score values.
//!
//! Scores are stored from the point of view of the side being certified.
//! Higher is better. The ranges are:
//!
//! | Value | Meaning |
//! | --- | --- |
//! | `MATE - n`, `n <= 2000` | proven win, `n` more of our moves |
//! | `28000 ..= 29999` | won, distance not yet proven |
//! | `i16::MIN` | unknown |
//! | `i16::MAX` | forced by a human override |
//! | `0` | draw |
//! | otherwise | heuristic evaluation, never a final proof |
//!
//! Negated win ranges are the corresponding losses.

use std::fmt;

use antisolve_egtb::{Probe, Wdl};

/// A score from the point of view of the certified side.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Score(pub i16);

impl Score {
    pub const MATE: Score = Score(32000);
    pub const MAX_MATE_DISTANCE: u16 = 2000;
    /// Top of the placeholder bank.
    pub const WON: Score = Score(29999);
    /// Bottom of the placeholder bank.
    pub const WON_FLOOR: Score = Score(28000);
    pub const UNKNOWN: Score = Score(i16::MIN);
    pub const MANUAL: Score = Score(i16::MAX);
    pub const DRAW: Score = Score(0);

    const PROVEN_FLOOR: i16 = Score::MATE.0 - Score::MAX_MATE_DISTANCE as i16;

    /// Proven win with `n` more of our moves.
    pub const fn mate_in(n: u16) -> Score {
        let n = if n > Score::MAX_MATE_DISTANCE {
            Score::MAX_MATE_DISTANCE
        } else {
            n
        };
        Score(Score::MATE.0 - n as i16)
    }

    /// Proven loss, the opponent needing `n` more moves.
    pub const fn mated_in(n: u16) -> Score {
        Score(-Score::mate_in(n).0)
    }

    /// Won, with an estimated but unproven distance.
    pub const fn won_estimate(n: u16) -> Score {
        let span = (Score::WON.0 - Score::WON_FLOOR.0) as u16;
        let n = if n > span { span } else { n };
        Score(Score::WON.0 - n as i16)
    }

    /// Heuristic evaluation, clamped below the placeholder bank.
    pub fn heuristic(cp: i32) -> Score {
        let limit = i32::from(Score::WON_FLOOR.0) - 1;
        Score(cp.clamp(-limit, limit) as i16)
    }

    pub fn is_sentinel(self) -> bool {
        self == Score::UNKNOWN || self == Score::MANUAL
    }

    /// Distance of a proven win.
    pub fn mate_distance(self) -> Option<u16> {
        (Score::PROVEN_FLOOR..=Score::MATE.0)
            .contains(&self.0)
            .then(|| (Score::MATE.0 - self.0) as u16)
    }

    /// Distance of a proven loss.
    pub fn mated_distance(self) -> Option<u16> {
        if self.is_sentinel() {
            None
        } else {
            Score(-self.0).mate_distance()
        }
    }

    pub fn is_proven(self) -> bool {
        self.mate_distance().is_some() || self.mated_distance().is_some()
    }

    pub fn is_placeholder(self) -> bool {
        (Score::WON_FLOOR.0..=Score::WON.0).contains(&self.0)
    }

    /// Proven or estimated win.
    pub fn is_won(self) -> bool {
        !self.is_sentinel() && self.0 >= Score::WON_FLOOR.0
    }

    /// One of our moves back from the position that was scored.
    ///
    /// Proven wins grow by one move and placeholders move down the bank,
    /// saturating at its floor. Everything else passes through.
    #[must_use]
    pub fn parent(self) -> Score {
        if self.is_won() {
            Score((self.0 - 1).max(Score::WON_FLOOR.0))
        } else {
            self
        }
    }

    /// Map an exact tablebase value for the side to move.
    pub fn from_probe(probe: Probe) -> Score {
        match probe.wdl {
            Wdl::Win => Score::mate_in(probe.distance),
            Wdl::Draw => Score::DRAW,
            Wdl::Loss => Score::mated_in(probe.distance),
        }
    }
}

impl fmt::Debug for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Score({self})")
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Score::UNKNOWN {
            f.write_str("unknown")
        } else if *self == Score::MANUAL {
            f.write_str("manual")
        } else if let Some(n) = self.mate_distance() {
            write!(f, "#{n}")
        } else if let Some(n) = self.mated_distance() {
            write!(f, "#-{n}")
        } else if self.is_placeholder() {
            write!(f, "won~{}", Score::WON.0 - self.0)
        } else if -self.0 >= Score::WON_FLOOR.0 {
            write!(f, "lost~{}", Score::WON.0 + self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges() {
        assert_eq!(Score::mate_in(0), Score::MATE);
        assert_eq!(Score::mate_in(5).mate_distance(), Some(5));
        assert_eq!(Score::mate_in(5000), Score::mate_in(2000));
        assert_eq!(Score::mated_in(3).mated_distance(), Some(3));
        assert!(Score::won_estimate(12).is_placeholder());
        assert!(!Score::won_estimate(12).is_proven());
        assert_eq!(Score::UNKNOWN.mated_distance(), None);
        assert_eq!(Score::MANUAL.mate_distance(), None);
        assert_eq!(Score::heuristic(100_000), Score(27999));
        assert!(!Score::heuristic(-100_000).is_proven());
    }

    #[test]
    fn test_parent() {
        assert_eq!(Score::MATE.parent(), Score::mate_in(1));
        assert_eq!(Score::mate_in(2000).parent(), Score::WON);
        assert_eq!(Score::WON.parent(), Score::won_estimate(1));
        assert_eq!(Score::WON_FLOOR.parent(), Score::WON_FLOOR);
        assert_eq!(Score::DRAW.parent(), Score::DRAW);
        assert_eq!(Score(150).parent(), Score(150));
        assert_eq!(Score::UNKNOWN.parent(), Score::UNKNOWN);
        assert_eq!(Score::MANUAL.parent(), Score::MANUAL);
        assert_eq!(Score::mated_in(4).parent(), Score::mated_in(4));
    }

    #[test]
    fn test_probe() {
        assert_eq!(Score::from_probe(Probe::win(5)), Score(31995));
        assert_eq!(Score::from_probe(Probe::DRAW), Score::DRAW);
        assert_eq!(Score::from_probe(Probe::loss(2)), Score(-31998));
    }

    #[test]
    fn test_display() {
        assert_eq!(Score::mate_in(7).to_string(), "#7");
        assert_eq!(Score::mated_in(7).to_string(), "#-7");
        assert_eq!(Score::won_estimate(3).to_string(), "won~3");
        assert_eq!(Score(-120).to_string(), "-120");
        assert_eq!(Score::UNKNOWN.to_string(), "unknown");
    }
}
