//! Classify command - preview difficulty and reward for labels

use devvault::classify::{classify, reward_for};

use crate::style::*;

pub fn run(labels: &[String]) {
    let difficulty = classify(labels);
    println!(
        "{} {} points",
        style_difficulty(difficulty),
        style_bold(&reward_for(difficulty).to_string())
    );
}
