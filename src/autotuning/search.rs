//! Search strategies for auto-tuning.
//!
//! Strategies only propose configurations; the driver owns the RNG,
//! deduplicates proposals and evaluates them.

use crate::space::{Configuration, Configurations, ParameterSpace};
use crate::utils::errors::SpaceError;
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use std::fmt;

/// Search algorithm named in `def search { arg algorithm = '...'; }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchAlgorithm {
    /// Every valid configuration in domain order
    Exhaustive,
    /// Independent rejection samples
    Random,
    /// Random restarts plus single-parameter moves around the champion
    RandomLocal,
}

impl SearchAlgorithm {
    /// Parse an algorithm name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "exhaustive" => Some(SearchAlgorithm::Exhaustive),
            "random" => Some(SearchAlgorithm::Random),
            "randomlocal" => Some(SearchAlgorithm::RandomLocal),
            _ => None,
        }
    }
}

impl fmt::Display for SearchAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchAlgorithm::Exhaustive => write!(f, "Exhaustive"),
            SearchAlgorithm::Random => write!(f, "Random"),
            SearchAlgorithm::RandomLocal => write!(f, "Randomlocal"),
        }
    }
}

/// Trait for search strategies.
pub trait SearchStrategy: Send {
    /// Propose the next configuration; `None` ends the search.
    fn next(&mut self, best: Option<&Configuration>, rng: &mut StdRng) -> Result<Option<Configuration>, SpaceError>;

    /// Get name of the strategy
    fn name(&self) -> &str;
}

/// Build the strategy for an algorithm.
pub fn strategy<'s>(
    algorithm: SearchAlgorithm,
    space: &'s ParameterSpace,
    max_attempts: usize,
    restart_probability: f64,
) -> Box<dyn SearchStrategy + 's> {
    match algorithm {
        SearchAlgorithm::Exhaustive => Box::new(ExhaustiveSearch::new(space)),
        SearchAlgorithm::Random => Box::new(RandomSearch::new(space, max_attempts)),
        SearchAlgorithm::RandomLocal => Box::new(RandomLocalSearch::new(space, max_attempts, restart_probability)),
    }
}

/// Exhaustive search: every valid configuration in domain order.
pub struct ExhaustiveSearch<'s> {
    configs: Configurations<'s>,
}

impl<'s> ExhaustiveSearch<'s> {
    /// Enumerate `space`.
    pub fn new(space: &'s ParameterSpace) -> Self {
        Self { configs: space.configurations() }
    }
}

impl SearchStrategy for ExhaustiveSearch<'_> {
    fn next(&mut self, _best: Option<&Configuration>, _rng: &mut StdRng) -> Result<Option<Configuration>, SpaceError> {
        Ok(self.configs.next())
    }

    fn name(&self) -> &str {
        "exhaustive"
    }
}

/// Random search: independent rejection samples.
pub struct RandomSearch<'s> {
    space: &'s ParameterSpace,
    max_attempts: usize,
}

impl<'s> RandomSearch<'s> {
    /// Sample `space`, giving up after `max_attempts` rejected draws.
    pub fn new(space: &'s ParameterSpace, max_attempts: usize) -> Self {
        Self { space, max_attempts }
    }
}

impl SearchStrategy for RandomSearch<'_> {
    fn next(&mut self, _best: Option<&Configuration>, rng: &mut StdRng) -> Result<Option<Configuration>, SpaceError> {
        self.space.sample(rng, self.max_attempts).map(Some)
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// Randomized local search.
///
/// Until a champion exists every proposal is a fresh sample. Afterwards a
/// proposal restarts from a fresh sample with probability
/// `restart_probability` and otherwise moves one parameter of the
/// champion to a neighboring domain value.
pub struct RandomLocalSearch<'s> {
    space: &'s ParameterSpace,
    max_attempts: usize,
    restart_probability: f64,
}

impl<'s> RandomLocalSearch<'s> {
    /// Local search over `space`.
    pub fn new(space: &'s ParameterSpace, max_attempts: usize, restart_probability: f64) -> Self {
        Self { space, max_attempts, restart_probability: restart_probability.clamp(0.0, 1.0) }
    }
}

impl SearchStrategy for RandomLocalSearch<'_> {
    fn next(&mut self, best: Option<&Configuration>, rng: &mut StdRng) -> Result<Option<Configuration>, SpaceError> {
        match best {
            Some(base) if !rng.gen_bool(self.restart_probability) => {
                self.space.perturb(base, rng, self.max_attempts).map(Some)
            }
            _ => self.space.sample(rng, self.max_attempts).map(Some),
        }
    }

    fn name(&self) -> &str {
        "randomlocal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{Parameter, ParamRole, Value};
    use rand::SeedableRng;

    fn space() -> ParameterSpace {
        let ints = |v: &[i64]| v.iter().map(|x| Value::Int(*x)).collect::<Vec<_>>();
        ParameterSpace::new(
            vec![
                Parameter::new("T", ints(&[1, 16, 32, 64]), ParamRole::TileSize),
                Parameter::new("U", ints(&[1, 2, 3, 4]), ParamRole::UnrollFactor),
            ],
            vec![],
            Default::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(SearchAlgorithm::from_name("Randomlocal"), Some(SearchAlgorithm::RandomLocal));
        assert_eq!(SearchAlgorithm::from_name("EXHAUSTIVE"), Some(SearchAlgorithm::Exhaustive));
        assert_eq!(SearchAlgorithm::from_name("genetic"), None);
        assert_eq!(SearchAlgorithm::RandomLocal.to_string(), "Randomlocal");
    }

    #[test]
    fn test_exhaustive_covers_space() {
        let space = space();
        let mut search = ExhaustiveSearch::new(&space);
        let mut rng = StdRng::seed_from_u64(0);
        let mut count = 0;
        while search.next(None, &mut rng).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 16);
    }

    #[test]
    fn test_seeded_proposals_repeat() {
        let space = space();
        let run = || {
            let mut search = RandomSearch::new(&space, 10);
            let mut rng = StdRng::seed_from_u64(7);
            (0..8).map(|_| search.next(None, &mut rng).unwrap().unwrap().to_string()).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_local_moves_one_parameter() {
        let space = space();
        let mut search = RandomLocalSearch::new(&space, 50, 0.0);
        let mut rng = StdRng::seed_from_u64(3);
        let base = search.next(None, &mut rng).unwrap().unwrap();
        for _ in 0..20 {
            let next = search.next(Some(&base), &mut rng).unwrap().unwrap();
            let changed = base.iter().zip(next.iter()).filter(|(a, b)| a.1 != b.1).count();
            assert_eq!(changed, 1);
        }
    }
}
