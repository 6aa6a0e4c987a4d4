use std::{fmt::Display, sync::Arc};

use bctree::{Dataset, Objective, Support};
use rand::{seq::SliceRandom, Rng};

/// What to do with an open position of the tree being built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
  Stop,
  Split(usize),
}

/// A subproblem: the training rows routed to one open leaf.
#[derive(Debug, Clone)]
pub struct Position {
  pub rows: Arc<[usize]>,
  // [negatives, positives]
  pub counts: [usize; 2],
  pub depth: u32,
}

/// The search space: which positions may be split and how, and what a leaf
/// is worth.
#[derive(Debug)]
pub struct TreeProblem {
  data: Arc<Dataset>,
  objective: Objective,
  min_leaf_size: usize,
  max_depth: Option<u32>,
}

impl TreeProblem {
  pub fn new(
    data: Arc<Dataset>,
    objective: Objective,
    min_leaf_size: usize,
    max_depth: Option<u32>,
  ) -> Self {
    TreeProblem {
      data,
      objective,
      min_leaf_size: min_leaf_size.max(1),
      max_depth,
    }
  }

  pub fn data(&self) -> &Dataset {
    &self.data
  }

  pub fn objective(&self) -> &Objective {
    &self.objective
  }

  pub fn root(&self) -> Position {
    let rows: Arc<[usize]> = self.data.all_rows().into();
    Position {
      counts: self.data.class_counts(),
      rows,
      depth: 0,
    }
  }

  /// Positions with equal keys have the same subproblem. Depth only
  /// matters when it is limited.
  pub fn transposition_key(&self, position: &Position) -> (Arc<[usize]>, u32) {
    let depth = if self.max_depth.is_some() { position.depth } else { 0 };
    (position.rows.clone(), depth)
  }

  pub fn stop_value(&self, position: &Position) -> f64 {
    self.objective.leaf_value(position.counts)
  }

  /// Best value any subtree over this position could reach.
  pub fn upper_bound(&self, position: &Position) -> f64 {
    let stop = self.stop_value(position);
    if self.check_terminal(position) {
      stop
    } else {
      stop.max(self.objective.perfect_value(position.counts) - self.objective.split_penalty())
    }
  }

  /// A position is terminal when no split can pay for its penalty, or the
  /// size and depth limits forbid splitting.
  pub fn check_terminal(&self, position: &Position) -> bool {
    let gain = self.objective.perfect_value(position.counts) - self.stop_value(position);
    gain <= self.objective.split_penalty()
      || position.rows.len() < 2 * self.min_leaf_size
      || self.max_depth.map(|d| position.depth >= d).unwrap_or(false)
  }

  fn admissible(&self, support: &Support) -> bool {
    support.side_len(false) >= self.min_leaf_size && support.side_len(true) >= self.min_leaf_size
  }

  // splits leaving a side empty are never legal, which also rules out
  // splitting twice on a feature along one path
  pub fn legal_actions(&self, position: &Position) -> Vec<Action> {
    let mut actions = vec![Action::Stop];
    if self.check_terminal(position) {
      return actions;
    }
    for feature in 0..self.data.n_features() {
      if self.admissible(&self.data.support(&position.rows, feature)) {
        actions.push(Action::Split(feature));
      }
    }
    actions
  }

  pub fn apply_split(&self, position: &Position, feature: usize) -> (Position, Position) {
    let (left, right) = self.data.partition(&position.rows, feature);
    let child = |rows: Vec<usize>| Position {
      counts: self.data.label_counts(&rows),
      rows: rows.into(),
      depth: position.depth + 1,
    };
    (child(left), child(right))
  }

  /// A split on a uniformly random admissible feature, if there is one.
  pub fn random_split<R: Rng + ?Sized>(
    &self,
    position: &Position,
    rng: &mut R,
  ) -> Option<(usize, Position, Position)> {
    let mut features: Vec<usize> = (0..self.data.n_features()).collect();
    features.shuffle(rng);
    features
      .into_iter()
      .find(|&f| self.admissible(&self.data.support(&position.rows, f)))
      .map(|f| {
        let (left, right) = self.apply_split(position, f);
        (f, left, right)
      })
  }
}

impl Display for Action {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Action::Stop => write!(f, "stop"),
      Action::Split(feature) => write!(f, "x{feature}"),
    }
  }
}
