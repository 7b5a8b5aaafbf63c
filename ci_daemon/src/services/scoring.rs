//! Score aggregation. Pure functions of a result's captured data.

use crate::models::build::{BuildResult, TestScore};

/// Weighted percentage over structured scores, truncated toward zero.
pub fn structured_total<'a>(scores: impl IntoIterator<Item = &'a TestScore>) -> i32 {
    let scores: Vec<&TestScore> = scores.into_iter().collect();
    let total_weight: i64 = scores.iter().map(|s| s.weight.max(0)).sum();
    if total_weight <= 0 {
        return 0;
    }

    let total: f64 = scores
        .iter()
        .filter(|s| s.max_score > 0)
        .map(|s| {
            let score = s.score.clamp(0, s.max_score) as f64;
            let weight = s.weight.max(0) as f64;
            (score / s.max_score as f64) * (weight / total_weight as f64)
        })
        .sum();

    (total * 100.0) as i32
}

/// Share of passing markers as a percentage, truncated toward zero.
pub fn pass_rate(passes: u32, fails: u32) -> i32 {
    let runs = u64::from(passes) + u64::from(fails);
    if runs == 0 {
        return 0;
    }
    (u64::from(passes) * 100 / runs) as i32
}

/// Total score for a finished run.
///
/// Structured scores take precedence over pass/fail markers. Any
/// build-level failure forces the score to 0.
pub fn total_score(result: &BuildResult) -> i32 {
    if result.build_failures > 0 {
        return 0;
    }
    if !result.test_scores.is_empty() {
        return structured_total(result.test_scores.values());
    }
    pass_rate(result.num_passes, result.num_fails)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(name: &str, score: i64, max: i64, weight: i64) -> TestScore {
        TestScore {
            secret: String::new(),
            test_name: name.to_string(),
            score,
            max_score: max,
            weight,
        }
    }

    #[test]
    fn test_pass_rate() {
        assert_eq!(pass_rate(3, 1), 75);
        assert_eq!(pass_rate(2, 1), 66);
        assert_eq!(pass_rate(0, 0), 0);
        assert_eq!(pass_rate(5, 0), 100);
    }

    #[test]
    fn test_structured_total_weights_and_clamps() {
        let scores = [score("a", 5, 5, 1), score("b", 0, 5, 1)];
        assert_eq!(structured_total(&scores), 50);

        let scores = [score("a", 10, 5, 3), score("b", 1, 2, 1)];
        // 1.0 * 3/4 + 0.5 * 1/4
        assert_eq!(structured_total(&scores), 87);

        let scores = [score("a", 1, 0, 1)];
        assert_eq!(structured_total(&scores), 0);
        assert_eq!(structured_total(std::iter::empty()), 0);
    }

    #[test]
    fn test_structured_scores_take_precedence() {
        let mut r = BuildResult::new(1, "cs101", "alice", 1);
        r.num_passes = 1;
        r.num_fails = 3;
        r.test_scores.insert("a".into(), score("a", 4, 4, 1));
        assert_eq!(total_score(&r), 100);
    }

    #[test]
    fn test_build_failure_forces_zero() {
        let mut r = BuildResult::new(1, "cs101", "alice", 1);
        r.num_passes = 8;
        assert_eq!(total_score(&r), 100);
        r.build_failures = 1;
        assert_eq!(total_score(&r), 0);
    }

    #[test]
    fn test_recomputing_is_stable() {
        let mut r = BuildResult::new(1, "cs101", "alice", 1);
        r.test_scores.insert("a".into(), score("a", 2, 3, 2));
        r.test_scores.insert("b".into(), score("b", 1, 3, 1));
        let first = total_score(&r);
        for _ in 0..10 {
            assert_eq!(total_score(&r), first);
        }
    }
}
