use std::{error::Error, fmt};

use antisolve_egtb::{Material, MAX_PIECES};
use serde::{Deserialize, Serialize};

use crate::{evaluator::SearchRequest, score::Score};

/// Invalid solver settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConfigError(String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid solver config: {}", self.0)
    }
}

impl Error for ConfigError {}

/// Solver settings. Every field has a default, so an empty table is a
/// valid config.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// Positions with at most this many pieces are solved from tables.
    pub egtb_pieces: usize,
    /// Larger material signatures that are also taken from tables.
    pub special_five: Vec<String>,
    /// Evaluator scores below this do not overrule a tree hint.
    pub trust_threshold: i16,
    /// Arbitration levels for the top level of a session.
    pub alt_steps: u32,
    pub max_alt_steps: u32,
    /// Frames available to a throwaway arbitration session.
    pub alt_depth: usize,
    /// Distance an evaluator move must gain to replace a hint.
    pub alt_tolerance: i16,
    /// Distance a stored score may exceed a recomputed one before it is
    /// reported.
    pub forced_move_tolerance: i16,
    pub stop: Option<StopPolicy>,
    pub multipv: u32,
    pub node_budget: Option<u64>,
    pub mate_budget: Option<u32>,
    /// Frames below the session root.
    pub max_depth: usize,
    /// Recorded with evaluator results.
    pub evaluator_version: u8,
    /// Decompressed chunks kept per table.
    pub cache_chunks: usize,
    /// Tree weight cache slots, as a power of two.
    pub weight_cache_bits: u32,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            egtb_pieces: 4,
            special_five: Vec::new(),
            trust_threshold: 1000,
            alt_steps: 0,
            max_alt_steps: 3,
            alt_depth: 24,
            alt_tolerance: 2,
            forced_move_tolerance: 2,
            stop: None,
            multipv: 2,
            node_budget: Some(2_000_000),
            mate_budget: None,
            max_depth: 400,
            evaluator_version: 1,
            cache_chunks: 16,
            weight_cache_bits: 16,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.egtb_pieces > MAX_PIECES {
            return Err(ConfigError(format!(
                "egtb_pieces {} exceeds {MAX_PIECES}",
                self.egtb_pieces
            )));
        }
        self.special_materials()?;
        if self.multipv == 0 {
            return Err(ConfigError("multipv must be at least 1".to_owned()));
        }
        if self.max_depth == 0 || self.alt_depth == 0 {
            return Err(ConfigError("depth limits must be positive".to_owned()));
        }
        if !(1..=30).contains(&self.weight_cache_bits) {
            return Err(ConfigError("weight_cache_bits must be in 1..=30".to_owned()));
        }
        if self.cache_chunks == 0 {
            return Err(ConfigError("cache_chunks must be positive".to_owned()));
        }
        if self.trust_threshold < 0 || self.alt_tolerance < 0 || self.forced_move_tolerance < 0 {
            return Err(ConfigError("thresholds must not be negative".to_owned()));
        }
        if let Some(ref stop) = self.stop {
            stop.validate()?;
        }
        Ok(())
    }

    /// Normalized signatures from `special_five`.
    pub fn special_materials(&self) -> Result<Vec<Material>, ConfigError> {
        self.special_five
            .iter()
            .map(|s| {
                s.parse::<Material>()
                    .map(Material::into_normalized)
                    .map_err(|_| ConfigError(format!("invalid material signature: {s}")))
            })
            .collect()
    }

    pub fn search_request(&self) -> SearchRequest {
        SearchRequest {
            multipv: self.multipv,
            nodes: self.node_budget,
            mate: self.mate_budget,
        }
    }
}

/// When to accept an evaluator score instead of descending further.
///
/// The depth a search must reach grows with the number of pieces:
/// `depth_floor + depth_span * p / (p + depth_half)`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StopPolicy {
    pub hard_limit: i16,
    pub soft_limit: i16,
    pub depth_floor: u32,
    pub depth_span: u32,
    pub depth_half: u32,
}

impl Default for StopPolicy {
    fn default() -> StopPolicy {
        StopPolicy {
            hard_limit: Score::WON_FLOOR.0,
            soft_limit: 9000,
            depth_floor: 20,
            depth_span: 40,
            depth_half: 16,
        }
    }
}

impl StopPolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_limit > self.hard_limit {
            return Err(ConfigError("soft_limit exceeds hard_limit".to_owned()));
        }
        if self.depth_half == 0 {
            return Err(ConfigError("depth_half must be positive".to_owned()));
        }
        Ok(())
    }

    pub fn required_depth(&self, pieces: usize) -> u32 {
        let p = u64::try_from(pieces).unwrap_or(u64::MAX);
        let extra = u64::from(self.depth_span).saturating_mul(p)
            / p.saturating_add(u64::from(self.depth_half)).max(1);
        self.depth_floor
            .saturating_add(u32::try_from(extra).unwrap_or(u32::MAX))
    }

    /// Whether a search result is good enough to stop at.
    pub fn accepts(&self, score: Score, depth: u32, pieces: usize) -> bool {
        if score.is_sentinel() {
            return false;
        }
        score.0 >= self.hard_limit
            || (score.0 >= self.soft_limit && depth >= self.required_depth(pieces))
    }

    /// The placeholder stored for an accepted score.
    pub fn placeholder(score: Score) -> Score {
        match score.mate_distance() {
            Some(n) => Score::won_estimate(n),
            None if score.is_placeholder() => score,
            None => Score::WON,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: SolverConfig = toml::from_str("").unwrap();
        assert_eq!(config, SolverConfig::default());
        assert!(config.validate().is_ok());
        assert!(config.stop.is_none());

        let config: SolverConfig = toml::from_str(
            r#"
            egtb_pieces = 3
            special_five = ["KRvKN"]
            [stop]
            soft_limit = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.egtb_pieces, 3);
        assert_eq!(config.special_materials().unwrap()[0].to_string(), "KRvKN");
        assert_eq!(config.stop.as_ref().unwrap().depth_floor, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid() {
        assert!(toml::from_str::<SolverConfig>("egtb_piece = 3").is_err());

        let config = SolverConfig {
            special_five: vec!["KRvKX".to_owned()],
            ..SolverConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SolverConfig {
            egtb_pieces: 7,
            ..SolverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stop_policy() {
        let stop = StopPolicy::default();
        let depths: Vec<u32> = (2..=32).map(|p| stop.required_depth(p)).collect();
        assert!(depths.windows(2).all(|w| w[0] <= w[1]));
        assert!(depths.iter().all(|&d| d < 60));
        assert_eq!(stop.required_depth(16), 40);

        assert!(stop.accepts(Score::mate_in(30), 1, 32));
        assert!(stop.accepts(Score(9500), 45, 20));
        assert!(!stop.accepts(Score(9500), 30, 20));
        assert!(!stop.accepts(Score(8000), 60, 2));
        assert!(!stop.accepts(Score::MANUAL, 60, 2));

        assert_eq!(StopPolicy::placeholder(Score::mate_in(12)), Score::won_estimate(12));
        assert_eq!(StopPolicy::placeholder(Score(9500)), Score::WON);
    }
}
