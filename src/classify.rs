//! Difficulty classification and reward policy
//!
//! Difficulty is read off an issue's labels, first match wins:
//! - any of `good first issue`, `beginner`, `easy` -> EASY
//! - any of `hard`, `complex`, `expert` -> HARD
//! - anything else, including no labels -> MEDIUM
//!
//! Rewards: EASY = 100, MEDIUM = 250, HARD = 500 points.
//! Completing an issue also raises reputation by a tenth of its reward.

use crate::model::Difficulty;

const EASY_LABELS: &[&str] = &["good first issue", "beginner", "easy"];
const HARD_LABELS: &[&str] = &["hard", "complex", "expert"];

pub const EASY_REWARD: u32 = 100;
pub const MEDIUM_REWARD: u32 = 250;
pub const HARD_REWARD: u32 = 500;

/// Reputation gained per completed issue is `reward / REPUTATION_DIVISOR`
pub const REPUTATION_DIVISOR: u32 = 10;

/// Classify an issue by its labels (case-insensitive)
pub fn classify<I, S>(labels: I) -> Difficulty
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let normalized: Vec<String> = labels
        .into_iter()
        .map(|l| l.as_ref().to_lowercase())
        .collect();
    let has_any = |set: &[&str]| normalized.iter().any(|l| set.contains(&l.as_str()));

    if has_any(EASY_LABELS) {
        Difficulty::Easy
    } else if has_any(HARD_LABELS) {
        Difficulty::Hard
    } else {
        Difficulty::Medium
    }
}

pub const fn reward_for(difficulty: Difficulty) -> u32 {
    match difficulty {
        Difficulty::Easy => EASY_REWARD,
        Difficulty::Medium => MEDIUM_REWARD,
        Difficulty::Hard => HARD_REWARD,
    }
}

pub const fn reputation_for(reward: u32) -> u32 {
    reward / REPUTATION_DIVISOR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_with_reward(labels: &[&str]) -> (Difficulty, u32) {
        let difficulty = classify(labels);
        (difficulty, reward_for(difficulty))
    }

    #[test]
    fn test_easy_labels() {
        assert_eq!(
            classify_with_reward(&["good first issue"]),
            (Difficulty::Easy, 100)
        );
        assert_eq!(classify(["beginner"]), Difficulty::Easy);
        assert_eq!(classify(["bug", "Easy"]), Difficulty::Easy);
    }

    #[test]
    fn test_hard_labels() {
        assert_eq!(classify_with_reward(&["expert"]), (Difficulty::Hard, 500));
        assert_eq!(classify(["COMPLEX"]), Difficulty::Hard);
        assert_eq!(classify(["hard", "performance"]), Difficulty::Hard);
    }

    #[test]
    fn test_no_labels_is_medium() {
        let empty: [&str; 0] = [];
        assert_eq!(classify(empty), Difficulty::Medium);
        assert_eq!(classify_with_reward(&[]), (Difficulty::Medium, 250));
        assert_eq!(classify(["bug", "documentation"]), Difficulty::Medium);
    }

    #[test]
    fn test_easy_wins_over_hard() {
        assert_eq!(
            classify_with_reward(&["good first issue", "expert"]),
            (Difficulty::Easy, 100)
        );
        assert_eq!(classify(["expert", "beginner"]), Difficulty::Easy);
    }

    #[test]
    fn test_labels_must_match_exactly() {
        // "easy-ish" and "hardware" are not difficulty labels
        assert_eq!(classify(["easy-ish", "hardware"]), Difficulty::Medium);
    }

    #[test]
    fn test_reputation_is_tenth_of_reward() {
        assert_eq!(reputation_for(100), 10);
        assert_eq!(reputation_for(250), 25);
        assert_eq!(reputation_for(505), 50);
        assert_eq!(reputation_for(9), 0);
    }
}
