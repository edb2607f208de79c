//! Configuration types for counterexample-guided synthesis

/// Which side of a target a synthesized bound must lie on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundDirection {
    /// `target <= bound` everywhere
    #[default]
    Upper,
    /// `target >= bound` everywhere
    Lower,
}

impl BoundDirection {
    pub fn is_upper(&self) -> bool {
        matches!(self, BoundDirection::Upper)
    }
}

impl std::fmt::Display for BoundDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundDirection::Upper => write!(f, "upper"),
            BoundDirection::Lower => write!(f, "lower"),
        }
    }
}

impl std::str::FromStr for BoundDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upper" | "max" => Ok(BoundDirection::Upper),
            "lower" | "min" => Ok(BoundDirection::Lower),
            _ => Err(format!(
                "Unknown bound direction: '{}'. Valid options: upper, lower",
                s
            )),
        }
    }
}

/// Configuration for the CEGIS loop
#[derive(Debug, Clone)]
pub struct CegisConfig {
    /// Random draws per counterexample search before asking the solver
    pub fuzz_rounds: usize,
    /// Smallest value drawn while fuzzing
    pub fuzz_min: i64,
    /// Largest value drawn while fuzzing
    pub fuzz_max: i64,
    /// Fuzzing stops after this many counterexamples in one search
    pub max_fuzz_hits: usize,
    /// Give up once more counterexamples than this have accumulated
    pub max_counterexamples: usize,
    /// Re-check candidates against all counterexamples past this count
    pub sanity_check_after: usize,
    /// Cap on greedy bound-tightening queries
    pub max_tightening_rounds: usize,
    /// Override for the leaf budget (None = derived from the target)
    pub max_leaves: Option<usize>,
    /// Seed for the fuzzing generator
    pub seed: u64,
}

impl Default for CegisConfig {
    fn default() -> Self {
        Self {
            fuzz_rounds: 5,
            fuzz_min: -3,
            fuzz_max: 3,
            max_fuzz_hits: 2,
            max_counterexamples: 100,
            sanity_check_after: 30,
            max_tightening_rounds: 32,
            max_leaves: None,
            seed: 0,
        }
    }
}

impl CegisConfig {
    pub fn with_max_counterexamples(mut self, max: usize) -> Self {
        self.max_counterexamples = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_direction_from_str() {
        assert_eq!("upper".parse::<BoundDirection>().unwrap(), BoundDirection::Upper);
        assert_eq!("Lower".parse::<BoundDirection>().unwrap(), BoundDirection::Lower);
        assert_eq!("min".parse::<BoundDirection>().unwrap(), BoundDirection::Lower);
        assert!("sideways".parse::<BoundDirection>().is_err());
    }

    #[test]
    fn test_bound_direction_display() {
        assert_eq!(format!("{}", BoundDirection::Upper), "upper");
        assert_eq!(format!("{}", BoundDirection::Lower), "lower");
    }

    #[test]
    fn test_cegis_config_defaults() {
        let config = CegisConfig::default();
        assert_eq!(config.fuzz_rounds, 5);
        assert_eq!((config.fuzz_min, config.fuzz_max), (-3, 3));
        assert_eq!(config.max_fuzz_hits, 2);
        assert_eq!(config.max_counterexamples, 100);
        assert_eq!(config.sanity_check_after, 30);
        assert_eq!(config.max_tightening_rounds, 32);
        assert_eq!(config.seed, 0);
    }

    #[test]
    fn test_cegis_config_builder() {
        let config = CegisConfig::default().with_max_counterexamples(5);
        assert_eq!(config.max_counterexamples, 5);
        assert_eq!(config.max_leaves, None);
    }
}
