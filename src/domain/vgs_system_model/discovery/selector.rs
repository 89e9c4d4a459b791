use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// The strategies available for picking one peer out of the reachable candidates.
///
/// Each strategy works on the probed loads only; the registry maps the chosen index
/// back to a peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Selector {
    /// Random draw with weight `1 / (1 + load)`, so lightly loaded peers win more often.
    #[default]
    InvertedWeighedRandom,

    /// Uniform random draw, ignores load.
    Random,

    /// Always the lowest load; ties go to the earlier candidate.
    LowestLoad,
}

impl Selector {
    /// Returns the index of the chosen candidate, or `None` if there are no candidates.
    pub fn pick<R: Rng>(&self, loads: &[u64], rng: &mut R) -> Option<usize> {
        if loads.is_empty() {
            return None;
        }

        match self {
            Selector::InvertedWeighedRandom => {
                let weights: Vec<f64> = loads.iter().map(|load| inverted_weight(*load)).collect();
                let total: f64 = weights.iter().sum();

                let mut draw = rng.random::<f64>() * total;
                for (index, weight) in weights.iter().enumerate() {
                    if draw < *weight {
                        return Some(index);
                    }
                    draw -= weight;
                }

                // Floating point leftovers land on the last candidate.
                Some(loads.len() - 1)
            }
            Selector::Random => Some(rng.random_range(0..loads.len())),
            Selector::LowestLoad => loads.iter().enumerate().min_by_key(|(index, load)| (**load, *index)).map(|(index, _)| index),
        }
    }
}

fn inverted_weight(load: u64) -> f64 {
    1.0 / (1.0 + load as f64)
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InvertedWeighedRandom" | "invertedWeighedRandom" => Ok(Selector::InvertedWeighedRandom),
            "Random" | "random" => Ok(Selector::Random),
            "LowestLoad" | "lowestLoad" => Ok(Selector::LowestLoad),
            other => Err(Error::InvalidConfig(format!("unknown selector '{}'", other))),
        }
    }
}
