use std::{sync::Arc, time::Duration};

use bctree::{Dataset, Objective, SearchOutcome, Searcher, TreeError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use bandits::{Bandit, Rave, Uct};
use forest::Forest;
use problem::TreeProblem;
use rollout::RandomRollout;
use search::Search;

pub mod bandits;
pub mod forest;
pub mod incumbent;
pub mod problem;
pub mod rollout;
pub mod search;
pub mod util;

pub use rollout::{EmptyInit, Expansion};

/// When to stop searching. Checked between iterations only.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SearchLimit {
  iterations: Option<u32>,
  duration: Option<Duration>,
}

impl SearchLimit {
  pub fn new(n: u32) -> Self {
    Self::iterations(n)
  }

  pub fn iterations(n: u32) -> Self {
    SearchLimit {
      iterations: Some(n),
      duration: None,
    }
  }

  pub fn time(d: Duration) -> Self {
    SearchLimit {
      iterations: None,
      duration: Some(d),
    }
  }

  pub fn with_time(mut self, d: Duration) -> Self {
    self.duration = Some(d);
    self
  }

  /// Whether another iteration may start after `n` of them took `elapsed`.
  pub fn more(&self, n: u32, elapsed: Duration) -> bool {
    if self.iterations.map(|l| n >= l).unwrap_or(false) {
      return false;
    }
    if self.duration.map(|d| elapsed >= d).unwrap_or(false) {
      return false;
    }
    true
  }
}

/// Parameters of one search.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchConfig {
  pub exploration: f64,
  pub regularization: f64,
  // random playouts per new position
  pub playouts: u32,
  pub limit: SearchLimit,
  pub seed: u64,
  pub workers: usize,
  pub min_leaf_size: usize,
  pub max_depth: Option<u32>,
  /// Equivalence constant `k` of the subtree statistics blend. `None`
  /// searches with plain UCT.
  pub rave: Option<f64>,
}

impl Default for SearchConfig {
  fn default() -> Self {
    SearchConfig {
      exploration: 2.0,
      regularization: 0.001,
      playouts: 1,
      limit: SearchLimit::new(1000),
      seed: 0,
      workers: 1,
      min_leaf_size: 1,
      max_depth: None,
      rave: None,
    }
  }
}

impl SearchConfig {
  pub fn set_exploration(mut self, exploration: f64) -> Self {
    self.exploration = exploration;
    self
  }

  pub fn set_regularization(mut self, regularization: f64) -> Self {
    self.regularization = regularization;
    self
  }

  pub fn set_playouts(mut self, playouts: u32) -> Self {
    self.playouts = playouts;
    self
  }

  pub fn set_limit(mut self, limit: SearchLimit) -> Self {
    self.limit = limit;
    self
  }

  pub fn set_seed(mut self, seed: u64) -> Self {
    self.seed = seed;
    self
  }

  pub fn set_workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  pub fn set_min_leaf_size(mut self, min_leaf_size: usize) -> Self {
    self.min_leaf_size = min_leaf_size;
    self
  }

  pub fn set_max_depth(mut self, max_depth: Option<u32>) -> Self {
    self.max_depth = max_depth;
    self
  }

  pub fn set_rave(mut self, rave: Option<f64>) -> Self {
    self.rave = rave;
    self
  }

  pub fn validate(&self) -> Result<(), TreeError> {
    let invalid = |name: &str, expected: &str, found: String| {
      Err(TreeError::InvalidParameter(
        name.to_string(),
        expected.to_string(),
        found,
      ))
    };
    if !(self.exploration >= 0.0 && self.exploration.is_finite()) {
      return invalid("exploration", "a finite value >= 0", self.exploration.to_string());
    }
    if !(self.regularization >= 0.0 && self.regularization.is_finite()) {
      return invalid(
        "regularization",
        "a finite value >= 0",
        self.regularization.to_string(),
      );
    }
    if self.playouts == 0 {
      return invalid("playouts", "at least 1", "0".to_string());
    }
    if self.workers == 0 {
      return invalid("workers", "at least 1", "0".to_string());
    }
    if self.min_leaf_size == 0 {
      return invalid("min_leaf_size", "at least 1", "0".to_string());
    }
    if let Some(k) = self.rave {
      if !(k >= 0.0 && k.is_finite()) {
        return invalid("rave", "a finite value >= 0", k.to_string());
      }
    }
    Ok(())
  }
}

/// Runs the search over `data` and returns the best tree found, fitted on
/// `data`.
pub fn search_with(data: &Dataset, config: &SearchConfig) -> Result<SearchOutcome, TreeError> {
  search_and_inspect(data, config, |_| ()).map(|(outcome, _)| outcome)
}

/// Like [`search_with`], and hands the final forest to `inspect`.
pub fn search_and_inspect<T>(
  data: &Dataset,
  config: &SearchConfig,
  inspect: impl FnOnce(&Forest) -> T,
) -> Result<(SearchOutcome, T), TreeError> {
  config.validate()?;
  info!(
    "searching {} rows x {} features: c = {}, rave = {:?}, reg = {}, playouts = {}, workers = {}, limit = {:?}",
    data.n_rows(),
    data.n_features(),
    config.exploration,
    config.rave,
    config.regularization,
    config.playouts,
    config.workers,
    config.limit
  );
  let objective = Objective::new(data, config.regularization);
  let problem = Arc::new(TreeProblem::new(
    Arc::new(data.clone()),
    objective,
    config.min_leaf_size,
    config.max_depth,
  ));
  match config.rave {
    Some(k) => run_search(
      problem,
      config,
      Rave {
        exploration: config.exploration,
        k,
      },
      inspect,
    ),
    None => run_search(problem, config, Uct(config.exploration), inspect),
  }
}

fn run_search<B: Bandit, T>(
  problem: Arc<TreeProblem>,
  config: &SearchConfig,
  bandit: B,
  inspect: impl FnOnce(&Forest) -> T,
) -> Result<(SearchOutcome, T), TreeError> {
  let search = Search::new(problem, config.limit, bandit, RandomRollout(config.playouts))?;
  let mut workers = search.create_workers(config.workers, config.seed);
  search.run(&mut workers)?;

  let inspected = {
    let forest = search.forest.read().unwrap();
    debug!("{} positions, root {}", forest.len(), forest.node(forest.root()));
    inspect(&forest)
  };
  let (tree, score) = search.incumbent().snapshot();
  if search.iterations() == 0 && search.timed_out() {
    warn!("budget exhausted before the first iteration, returning a single leaf");
  }
  info!(
    "search done after {} iterations in {:?}: score {score:.6}, size {}, {} improvements",
    search.iterations(),
    search.elapsed(),
    tree.size(),
    search.incumbent().improvements()
  );
  let outcome = SearchOutcome {
    tree,
    elapsed: search.elapsed(),
    timed_out: search.timed_out(),
  };
  Ok((outcome, inspected))
}

/// The encoded tree returned by [`search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
  pub tree: String,
  // seconds
  pub elapsed: f64,
  pub timed_out: bool,
}

/// Searches for a small tree with high balanced accuracy on the binary
/// matrix `features` and labels `labels`, for `budget` iterations with `playouts`
/// random completions per new position.
pub fn search(
  features: Vec<Vec<u8>>,
  labels: Vec<u8>,
  exploration: f64,
  budget: u32,
  regularization: f64,
  playouts: u32,
) -> Result<Solution, TreeError> {
  let data = Dataset::new(features, labels)?;
  let config = SearchConfig::default()
    .set_exploration(exploration)
    .set_limit(SearchLimit::new(budget))
    .set_regularization(regularization)
    .set_playouts(playouts);
  let outcome = search_with(&data, &config)?;
  Ok(Solution {
    tree: outcome.tree.to_string(),
    elapsed: outcome.elapsed.as_secs_f64(),
    timed_out: outcome.timed_out,
  })
}

/// The anytime search behind the common searcher interface.
#[derive(Clone, Debug, Default)]
pub struct MctsSearcher {
  pub config: SearchConfig,
}

impl MctsSearcher {
  pub fn new(config: SearchConfig) -> Self {
    MctsSearcher { config }
  }
}

impl Searcher for MctsSearcher {
  fn name(&self) -> &str {
    "mcts"
  }

  fn run(&self, data: &Dataset) -> Result<SearchOutcome, TreeError> {
    search_with(data, &self.config)
  }
}
