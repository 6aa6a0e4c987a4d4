use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, RwLock,
  },
  time::{Duration, Instant},
};

use bctree::{Tree, TreeError};
use log::{debug, trace, warn};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
  bandits::Bandit,
  forest::{Forest, NodeId, Plan},
  incumbent::Incumbent,
  problem::{Action, Position, TreeProblem},
  rollout::{Expansion, Simulation},
  SearchLimit,
};

const PROGRESS_EVERY: u32 = 1000;

pub struct Search<B, E> {
  problem: Arc<TreeProblem>,
  pub forest: RwLock<Forest>,
  limit: SearchLimit,
  bandit_policy: B,
  static_estimator: E,
  incumbent: Incumbent,
  // best score any tree can reach
  upper_bound: f64,
  iterations: AtomicU32,
  timed_out: AtomicBool,
  started: Instant,
}

pub struct Worker {
  rng: StdRng,
  trajectory: Trajectory,
}

#[derive(Debug, Clone, Copy)]
enum Step {
  // first visit, completed by the simulation at this index
  Frontier(usize),
  Action(Action),
}

/// Positions visited by one iteration, parents before children.
#[derive(Debug, Default)]
pub struct Trajectory {
  steps: Vec<(NodeId, Step)>,
  frontier: Vec<Position>,
}

impl Trajectory {
  fn clear(&mut self) {
    self.steps.clear();
    self.frontier.clear();
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}

impl<B, E> Search<B, E>
where
  B: Bandit,
  E: Expansion,
{
  pub fn new(
    problem: Arc<TreeProblem>,
    limit: SearchLimit,
    bandit_policy: B,
    static_estimator: E,
  ) -> Result<Self, TreeError> {
    let mut leaf = Tree::leaf();
    let score = problem.objective().fit_and_score(&mut leaf, problem.data())?;
    let upper_bound = problem.upper_bound(&problem.root());
    let forest = Forest::new(1024, &problem);
    Ok(Search {
      problem,
      forest: RwLock::new(forest),
      limit,
      bandit_policy,
      static_estimator,
      incumbent: Incumbent::new(leaf, score),
      upper_bound,
      iterations: AtomicU32::new(0),
      timed_out: AtomicBool::new(false),
      started: Instant::now(),
    })
  }

  pub fn create_workers(&self, count: usize, seed: u64) -> Vec<Worker> {
    (0..count)
      .map(|ix| Worker {
        rng: StdRng::seed_from_u64(seed.wrapping_add(ix as u64)),
        trajectory: Trajectory::default(),
      })
      .collect()
  }

  /// Runs every worker until the limit is reached or the incumbent is
  /// provably optimal.
  pub fn run(&self, workers: &mut [Worker]) -> Result<(), TreeError> {
    if let [worker] = workers {
      return self.start(worker);
    }
    let results = crossbeam::scope(|s| {
      let handles: Vec<_> = workers
        .iter_mut()
        .map(|worker| s.spawn(move |_| self.start(worker)))
        .collect();
      handles
        .into_iter()
        .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
        .collect::<Vec<_>>()
    })
    .unwrap_or_else(|e| std::panic::resume_unwind(e));
    results.into_iter().collect()
  }

  pub fn start(&self, worker: &mut Worker) -> Result<(), TreeError> {
    loop {
      if self.converged() {
        return Ok(());
      }
      let elapsed = self.started.elapsed();
      let claimed = self
        .iterations
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
          if self.limit.more(n, elapsed) {
            n.checked_add(1)
          } else {
            None
          }
        });
      let n = match claimed {
        Ok(n) => n,
        Err(_) => {
          self.timed_out.store(true, Ordering::Relaxed);
          return Ok(());
        }
      };

      {
        let mut guard = self.forest.write().unwrap();
        self.select(&mut guard, worker);
      }
      let simulations = self.static_estimator.block_expand(
        &self.problem,
        &worker.trajectory.frontier,
        &mut worker.rng,
      );
      let improved = {
        let mut guard = self.forest.write().unwrap();
        if self.backpropogate(&mut guard, &worker.trajectory, &simulations) {
          let root = guard.node(guard.root());
          Some((guard.best_tree(guard.root()), root.best_value()))
        } else {
          None
        }
      };
      trace!(
        "iteration {n}: {} positions, {} simulated",
        worker.trajectory.len(),
        simulations.len()
      );

      if let Some((mut tree, expected)) = improved {
        let score = self
          .problem
          .objective()
          .fit_and_score(&mut tree, self.problem.data())?;
        if (score - expected).abs() > 1e-9 {
          warn!("tree {tree} scores {score}, search expected {expected}");
        }
        if self.incumbent.offer(tree, score) {
          debug!(
            "iteration {n}: incumbent {} with score {score:.6}",
            self.incumbent.tree()
          );
        }
      }
      if n > 0 && n % PROGRESS_EVERY == 0 {
        debug!(
          "{n} iterations in {:?}, best {:.6}",
          self.started.elapsed(),
          self.incumbent.score()
        );
      }
    }
  }

  // descends from the root, taking one action at every position seen
  // before and stopping at positions seen for the first time
  fn select(&self, forest: &mut Forest, worker: &mut Worker) {
    let trajectory = &mut worker.trajectory;
    trajectory.clear();
    let mut stack = vec![forest.root()];
    while let Some(node_id) = stack.pop() {
      let node = forest.node_mut(node_id);
      node.increment_select_count();
      if node.select_count() == 1 {
        trajectory
          .steps
          .push((node_id, Step::Frontier(trajectory.frontier.len())));
        trajectory.frontier.push(node.position().clone());
        continue;
      }
      if !node.actions_created() {
        let actions = self.problem.legal_actions(node.position());
        node.create_actions(actions);
      }
      let action = self.bandit_policy.select(node, &mut worker.rng);
      node.visit_action(action);
      trajectory.steps.push((node_id, Step::Action(action)));
      if let Action::Split(feature) = action {
        let (left, right) = forest.get_ids_of_children(node_id, feature, &self.problem);
        stack.push(right);
        stack.push(left);
      }
    }
  }

  /// Adds this iteration's value of every visited position to its
  /// statistics, children first, and refreshes the best known completions
  /// of the positions and all their ancestors. Every split taken below a
  /// position is also credited to its subtree statistics. Returns whether
  /// the root's best completion improved.
  fn backpropogate(
    &self,
    forest: &mut Forest,
    trajectory: &Trajectory,
    simulations: &[Simulation],
  ) -> bool {
    let penalty = self.problem.objective().split_penalty();
    let root = forest.root();
    let root_best = forest.node(root).best_value();
    let mut values: HashMap<NodeId, f64> = HashMap::with_capacity(trajectory.len());
    // (feature, value) of the splits taken in each position's subtree
    let mut taken: HashMap<NodeId, Vec<(usize, f64)>> = HashMap::new();
    for &(node_id, step) in trajectory.steps.iter().rev() {
      let (value, improved) = match step {
        Step::Frontier(ix) => {
          let sim = &simulations[ix];
          let improved = forest
            .node_mut(node_id)
            .offer_best(sim.best_value, Plan::Rollout(sim.best.clone()));
          (sim.mean, improved)
        }
        Step::Action(Action::Stop) => (forest.node(node_id).stop_value(), false),
        Step::Action(Action::Split(feature)) => match forest.node(node_id).children(feature) {
          Some((left, right)) => {
            let value = values[&left] + values[&right] - penalty;
            let best =
              forest.node(left).best_value() + forest.node(right).best_value() - penalty;
            let improved = forest.node_mut(node_id).offer_best(best, Plan::Split(feature));
            let mut splits = vec![(feature, value)];
            splits.extend(taken.remove(&left).unwrap_or_default());
            splits.extend(taken.remove(&right).unwrap_or_default());
            taken.insert(node_id, splits);
            (value, improved)
          }
          None => (forest.node(node_id).stop_value(), false),
        },
      };
      if improved {
        forest.propagate_best(node_id, penalty);
      }

      let node = forest.node_mut(node_id);
      node.value.add_sample(value, 1);
      if let Step::Action(action) = step {
        if let Some(info) = node.actions.get_mut(&action) {
          info.reward.add_sample(value, 1);
        }
      }
      if let Some(splits) = taken.get(&node_id) {
        for &(feature, v) in splits {
          node.subtree_actions.entry(feature).or_default().add_sample(v, 1);
        }
      }
      values.insert(node_id, value);
    }
    forest.node(root).best_value() > root_best
  }

  pub fn incumbent(&self) -> &Incumbent {
    &self.incumbent
  }

  pub fn problem(&self) -> &TreeProblem {
    &self.problem
  }

  /// Whether the incumbent reaches the best score any tree can have.
  pub fn converged(&self) -> bool {
    self.incumbent.score() >= self.upper_bound - 1e-9
  }

  /// Whether the search stopped because the limit ran out.
  pub fn timed_out(&self) -> bool {
    self.timed_out.load(Ordering::Relaxed)
  }

  pub fn iterations(&self) -> u32 {
    self.iterations.load(Ordering::Relaxed)
  }

  pub fn elapsed(&self) -> Duration {
    self.started.elapsed()
  }
}
