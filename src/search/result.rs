//! Synthesis result types and statistics

use crate::ir::Expr;
use crate::ir::analysis::count_leaves;
use std::time::Duration;

/// Result of a synthesis run
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// The synthesized program (if any)
    pub program: Option<Expr>,
    /// The original target
    pub target: Expr,
    /// Instruction count of the program that succeeded
    pub size: Option<usize>,
    /// Statistics from the run
    pub statistics: SynthesisStatistics,
}

impl SynthesisResult {
    /// Create a result with no program found
    pub fn no_program(target: Expr, statistics: SynthesisStatistics) -> Self {
        Self {
            program: None,
            target,
            size: None,
            statistics,
        }
    }

    /// Create a result carrying a program
    pub fn with_program(
        target: Expr,
        program: Expr,
        size: usize,
        statistics: SynthesisStatistics,
    ) -> Self {
        Self {
            program: Some(program),
            target,
            size: Some(size),
            statistics,
        }
    }

    pub fn found(&self) -> bool {
        self.program.is_some()
    }

    /// Leaves saved by the program relative to the target
    pub fn leaf_savings(&self) -> i64 {
        match &self.program {
            Some(program) => count_leaves(&self.target) as i64 - count_leaves(program) as i64,
            None => 0,
        }
    }
}

/// Statistics from a synthesis run
#[derive(Debug, Clone, Default)]
pub struct SynthesisStatistics {
    /// Total time spent
    pub elapsed_time: Duration,
    /// Number of solver queries made
    pub solver_queries: u64,
    /// Counterexamples found by random fuzzing
    pub fuzz_counterexamples: u64,
    /// Counterexamples returned by the solver
    pub solver_counterexamples: u64,
    /// Candidate programs proposed by resynthesis
    pub candidates: u64,
    /// Accepted bound tightenings
    pub tightenings: u64,
    /// Program sizes attempted
    pub sizes_tried: u64,
}

impl SynthesisStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counterexamples(&self) -> u64 {
        self.fuzz_counterexamples + self.solver_counterexamples
    }

    /// Fraction of counterexamples found without the solver (0.0 to 1.0)
    pub fn fuzz_hit_rate(&self) -> f64 {
        let total = self.counterexamples();
        if total == 0 {
            0.0
        } else {
            self.fuzz_counterexamples as f64 / total as f64
        }
    }

    /// Fold another run's counters into this one
    pub fn merge(&mut self, other: &SynthesisStatistics) {
        self.elapsed_time += other.elapsed_time;
        self.solver_queries += other.solver_queries;
        self.fuzz_counterexamples += other.fuzz_counterexamples;
        self.solver_counterexamples += other.solver_counterexamples;
        self.candidates += other.candidates;
        self.tightenings += other.tightenings;
        self.sizes_tried += other.sizes_tried;
    }

    /// Format statistics as a human-readable string
    pub fn format_summary(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("Time: {:.2?}\n", self.elapsed_time));
        s.push_str(&format!("Sizes tried: {}\n", self.sizes_tried));
        s.push_str(&format!("Solver queries: {}\n", self.solver_queries));
        s.push_str(&format!("Candidates: {}\n", self.candidates));
        s.push_str(&format!("Counterexamples: {}\n", self.counterexamples()));
        if self.counterexamples() > 0 {
            s.push_str(&format!(
                "Found by fuzzing: {:.2}%\n",
                self.fuzz_hit_rate() * 100.0
            ));
        }
        if self.tightenings > 0 {
            s.push_str(&format!("Tightenings: {}\n", self.tightenings));
        }
        s
    }
}

impl std::fmt::Display for SynthesisResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.program, self.size) {
            (Some(program), Some(size)) => {
                writeln!(f, "Program found at size {}:", size)?;
                writeln!(f, "  {} -> {}", self.target, program)?;
                writeln!(f, "Leaves saved: {}", self.leaf_savings())
            }
            _ => {
                writeln!(f, "No program found.")?;
                writeln!(f, "  {}", self.target)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;

    #[test]
    fn test_result_no_program() {
        let target = parse_expr("x*2 - x").unwrap();
        let result = SynthesisResult::no_program(target, SynthesisStatistics::new());
        assert!(!result.found());
        assert_eq!(result.leaf_savings(), 0);
        assert!(result.to_string().starts_with("No program found."));
    }

    #[test]
    fn test_result_with_program() {
        let target = parse_expr("x*2 - x").unwrap();
        let result = SynthesisResult::with_program(
            target,
            parse_expr("x").unwrap(),
            1,
            SynthesisStatistics::new(),
        );
        assert!(result.found());
        assert_eq!(result.leaf_savings(), 2);
        assert!(result.to_string().contains("x*2 - x -> x"));
    }

    #[test]
    fn test_statistics_fuzz_hit_rate() {
        let mut stats = SynthesisStatistics::new();
        stats.fuzz_counterexamples = 3;
        stats.solver_counterexamples = 1;
        assert!((stats.fuzz_hit_rate() - 0.75).abs() < 1e-10);
        assert_eq!(SynthesisStatistics::new().fuzz_hit_rate(), 0.0);
    }

    #[test]
    fn test_statistics_merge() {
        let mut a = SynthesisStatistics::new();
        a.solver_queries = 2;
        let mut b = SynthesisStatistics::new();
        b.solver_queries = 3;
        b.elapsed_time = Duration::from_millis(5);
        a.merge(&b);
        assert_eq!(a.solver_queries, 5);
        assert_eq!(a.elapsed_time, Duration::from_millis(5));
        assert!(a.format_summary().contains("Solver queries: 5"));
    }
}
