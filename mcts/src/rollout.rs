use bctree::Tree;
use rand::Rng;

use crate::problem::{Position, TreeProblem};

/// Outcome of completing one open position.
#[derive(Debug, Clone)]
pub struct Simulation {
  // reward fed back to the statistics
  pub mean: f64,
  pub best_value: f64,
  pub best: Tree,
}

pub trait Expansion: Copy + Send + Sync {
  fn expand<R: Rng + ?Sized>(
    &self,
    problem: &TreeProblem,
    position: &Position,
    rng: &mut R,
  ) -> Simulation;

  fn block_expand<R: Rng + ?Sized>(
    &self,
    problem: &TreeProblem,
    positions: &[Position],
    rng: &mut R,
  ) -> Vec<Simulation> {
    positions
      .iter()
      .map(|p| self.expand(problem, p, rng))
      .collect()
  }
}

/// Completes a position with the given number of random playouts.
#[derive(Copy, Clone)]
pub struct RandomRollout(pub u32);

/// Values a position as a leaf without simulating.
#[derive(Clone, Copy)]
pub struct EmptyInit;

impl Expansion for RandomRollout {
  fn expand<R: Rng + ?Sized>(
    &self,
    problem: &TreeProblem,
    position: &Position,
    rng: &mut R,
  ) -> Simulation {
    let playouts = self.0.max(1);
    let mut total = 0.0;
    let mut best: Option<(f64, Tree)> = None;
    for _ in 0..playouts {
      let (value, tree) = playout(problem, position, rng);
      total += value;
      if best.as_ref().map(|(v, _)| value > *v).unwrap_or(true) {
        best = Some((value, tree));
      }
    }
    let (best_value, best) = best.unwrap_or_else(|| (problem.stop_value(position), Tree::leaf()));
    Simulation {
      mean: total / playouts as f64,
      best_value,
      best,
    }
  }
}

impl Expansion for EmptyInit {
  fn expand<R: Rng + ?Sized>(
    &self,
    problem: &TreeProblem,
    position: &Position,
    _rng: &mut R,
  ) -> Simulation {
    let stop = problem.stop_value(position);
    Simulation {
      mean: stop,
      best_value: stop,
      best: Tree::leaf(),
    }
  }
}

struct Draft {
  value: f64,
  // feature and the indices of both children
  split: Option<(usize, usize, usize)>,
}

/// Grows random splits until every open position is terminal, then prunes
/// bottom-up every split that is worth no more than a leaf.
fn playout<R: Rng + ?Sized>(problem: &TreeProblem, position: &Position, rng: &mut R) -> (f64, Tree) {
  let penalty = problem.objective().split_penalty();
  let mut drafts = vec![Draft {
    value: problem.stop_value(position),
    split: None,
  }];
  let mut open = vec![(0, position.clone())];
  while let Some((ix, position)) = open.pop() {
    if problem.check_terminal(&position) {
      continue;
    }
    if let Some((feature, left, right)) = problem.random_split(&position, rng) {
      let l = drafts.len();
      drafts.push(Draft {
        value: problem.stop_value(&left),
        split: None,
      });
      drafts.push(Draft {
        value: problem.stop_value(&right),
        split: None,
      });
      drafts[ix].split = Some((feature, l, l + 1));
      open.push((l, left));
      open.push((l + 1, right));
    }
  }

  // children always come after their parent
  let mut trees: Vec<Option<Tree>> = vec![None; drafts.len()];
  for ix in (0..drafts.len()).rev() {
    let kept = drafts[ix].split.and_then(|(feature, l, r)| {
      let value = drafts[l].value + drafts[r].value - penalty;
      if value > drafts[ix].value {
        Some((feature, l, r, value))
      } else {
        None
      }
    });
    trees[ix] = Some(match kept {
      Some((feature, l, r, value)) => {
        drafts[ix].value = value;
        let left = trees[l].take().unwrap_or_default();
        let right = trees[r].take().unwrap_or_default();
        Tree::split(feature, left, right)
      }
      None => Tree::leaf(),
    });
  }
  (drafts[0].value, trees[0].take().unwrap_or_default())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use bctree::{Dataset, Objective};
  use rand::{rngs::StdRng, SeedableRng};

  use super::*;

  fn problem(labels: Vec<u8>, regularization: f64) -> TreeProblem {
    let data = Dataset::new(
      vec![
        vec![0, 0, 1],
        vec![0, 1, 0],
        vec![1, 0, 0],
        vec![1, 1, 1],
        vec![0, 0, 0],
        vec![1, 1, 0],
      ],
      labels,
    )
    .unwrap();
    let objective = Objective::new(&data, regularization);
    TreeProblem::new(Arc::new(data), objective, 1, None)
  }

  #[test]
  fn playout_values_match_the_scorer() {
    let p = problem(vec![0, 1, 1, 0, 0, 1], 0.01);
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..25 {
      let (value, mut tree) = playout(&p, &p.root(), &mut rng);
      let score = p.objective().fit_and_score(&mut tree, p.data()).unwrap();
      assert!((value - score).abs() < 1e-9, "{value} vs {score} for {tree}");
      assert!(value >= p.stop_value(&p.root()));
    }
  }

  #[test]
  fn playouts_of_pure_positions_are_leaves() {
    let p = problem(vec![1, 1, 1, 1, 1, 1], 0.0);
    let mut rng = StdRng::seed_from_u64(0);
    let sim = RandomRollout(4).expand(&p, &p.root(), &mut rng);
    assert_eq!(sim.best, Tree::leaf());
    assert_eq!(sim.mean, 1.0);
    assert_eq!(sim.best_value, 1.0);
  }

  #[test]
  fn best_playout_is_at_least_the_mean() {
    let p = problem(vec![0, 1, 1, 0, 0, 1], 0.001);
    let mut rng = StdRng::seed_from_u64(2);
    let positions = vec![p.root(), p.apply_split(&p.root(), 0).1];
    let sims = RandomRollout(8).block_expand(&p, &positions, &mut rng);
    assert_eq!(sims.len(), 2);
    for sim in sims {
      assert!(sim.best_value >= sim.mean - 1e-12);
    }
  }

  #[test]
  fn empty_init_uses_the_stop_value() {
    let p = problem(vec![0, 1, 1, 0, 0, 1], 0.001);
    let mut rng = StdRng::seed_from_u64(0);
    let sim = EmptyInit.expand(&p, &p.root(), &mut rng);
    assert_eq!(sim.mean, p.stop_value(&p.root()));
    assert_eq!(sim.best, Tree::leaf());
  }
}
