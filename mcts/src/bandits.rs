use rand::{seq::SliceRandom, Rng};

use crate::{forest::Node, problem::Action};

pub trait Bandit: Copy + Send + Sync {
  /// Picks the action to take at a node whose actions were created.
  fn select<R: Rng + ?Sized>(&self, node: &Node, rng: &mut R) -> Action;
}

#[derive(Copy, Clone)]
pub struct UniformlyRandomBandit;

/// UCB1 with the given exploration constant. Actions never selected come
/// first, then `mean + c * sqrt(ln N / n)`.
#[derive(Copy, Clone)]
pub struct Uct(pub f64);

/// UCB1 over splits whose mean is blended with the mean value of the same
/// split anywhere below the node, weighted by `sqrt(k / (3N + k))`. Stops
/// when no split looks better than a leaf.
#[derive(Copy, Clone, Debug)]
pub struct Rave {
  pub exploration: f64,
  // equivalence constant, 0 disables the blend
  pub k: f64,
}

/// Weight of the subtree statistics after `n` selections.
pub fn rave_weight(n: u32, k: f64) -> f64 {
  if k <= 0.0 {
    return 0.0;
  }
  (k / (3.0 * n as f64 + k)).sqrt()
}

impl Bandit for UniformlyRandomBandit {
  fn select<R: Rng + ?Sized>(&self, node: &Node, rng: &mut R) -> Action {
    let tried = node.actions.len();
    let ix = rng.gen_range(0..tried + node.untried().len());
    if ix < tried {
      node.actions.keys().nth(ix).copied().unwrap_or(Action::Stop)
    } else {
      node.untried()[ix - tried]
    }
  }
}

impl Bandit for Uct {
  fn select<R: Rng + ?Sized>(&self, node: &Node, rng: &mut R) -> Action {
    if let Some(action) = node.random_untried(rng) {
      return action;
    }
    let ln_n = (node.action_select_count() as f64).ln();
    let mut best_s = f64::MIN;
    let mut best_a = Action::Stop;
    let mut actions: Vec<_> = node.actions.iter().collect();
    // ties go to a random action
    actions.shuffle(rng);
    for (a, data) in actions {
      let n = data.select_count();
      if n == 0 {
        return *a;
      }
      let score = data.value() + self.0 * (ln_n / n as f64).sqrt();
      if score > best_s {
        best_s = score;
        best_a = *a;
      }
    }
    best_a
  }
}

impl Bandit for Rave {
  fn select<R: Rng + ?Sized>(&self, node: &Node, rng: &mut R) -> Action {
    let untried: Vec<usize> = node
      .untried()
      .iter()
      .filter_map(|a| match a {
        Action::Split(f) => Some(*f),
        Action::Stop => None,
      })
      .collect();
    if let Some(&f) = untried.choose(rng) {
      return Action::Split(f);
    }
    let n = node.action_select_count();
    let ln_n = (n.max(1) as f64).ln();
    let beta = rave_weight(n, self.k);
    let mut splits: Vec<_> = node
      .actions
      .iter()
      .filter_map(|(a, data)| match a {
        Action::Split(f) => Some((*f, data)),
        Action::Stop => None,
      })
      .collect();
    splits.shuffle(rng);
    let mut best: Option<(f64, usize)> = None;
    for (f, data) in splits {
      let visits = data.select_count().max(1) as f64;
      let score = beta * node.subtree_value(f)
        + (1.0 - beta) * data.value()
        + self.exploration * (ln_n / visits).sqrt();
      if best.map(|(s, _)| score > s).unwrap_or(true) {
        best = Some((score, f));
      }
    }
    match best {
      Some((score, f)) if score >= node.stop_value() => Action::Split(f),
      _ => Action::Stop,
    }
  }
}
