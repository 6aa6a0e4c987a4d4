use std::{
  collections::{BTreeMap, HashMap, VecDeque},
  fmt::Display,
  sync::Arc,
};

use bctree::Tree;
use rand::{seq::SliceRandom, Rng};

use crate::{
  problem::{Action, Position, TreeProblem},
  util::RunningAverage,
};

pub mod render;

// an arena based graph of open positions, one node per row subset
// does not support deletion of nodes

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// How the best known completion of a position is built.
#[derive(Debug, Clone)]
pub enum Plan {
  Stop,
  // follow the best plans of the split's two children
  Split(usize),
  Rollout(Tree),
}

#[derive(Debug)]
pub struct Node {
  position: Position,
  stop_value: f64,
  actions_created: bool,
  // legal actions that were never selected
  untried: Vec<Action>,
  pub(crate) actions: BTreeMap<Action, ActionInfo>,
  // children of every split selected so far, (value 0, value 1)
  children: BTreeMap<usize, (NodeId, NodeId)>,
  // (parent, feature) of every split leading here
  parents: Vec<(NodeId, usize)>,
  // values of iterations whose subtree split on the feature, here or below
  pub(crate) subtree_actions: BTreeMap<usize, RunningAverage>,
  pub(crate) value: RunningAverage,
  select_count: u32,
  best_value: f64,
  best_plan: Plan,
}

#[derive(Debug, Default)]
pub(crate) struct ActionInfo {
  pub(crate) reward: RunningAverage,
  select_count: u32,
}

#[derive(Debug)]
pub struct Forest {
  nodes: Vec<Node>,
  root: NodeId,
  index: HashMap<(Arc<[usize]>, u32), NodeId>,
}

impl Forest {
  pub fn new(capacity: usize, problem: &TreeProblem) -> Self {
    let mut forest = Self {
      nodes: Vec::with_capacity(capacity),
      root: NodeId(0),
      index: HashMap::with_capacity(capacity),
    };
    forest.root = forest.get_or_insert(problem.root(), problem);
    forest
  }

  pub fn root(&self) -> NodeId {
    self.root
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  fn get_or_insert(&mut self, position: Position, problem: &TreeProblem) -> NodeId {
    let key = problem.transposition_key(&position);
    if let Some(&id) = self.index.get(&key) {
      return id;
    }
    let id = NodeId(self.nodes.len());
    let stop_value = problem.stop_value(&position);
    self.nodes.push(Node::new(position, stop_value));
    self.index.insert(key, id);
    id
  }

  /// Every node id, in creation order.
  pub fn ids(&self) -> impl Iterator<Item = NodeId> {
    (0..self.nodes.len()).map(NodeId)
  }

  pub fn node(&self, node_id: NodeId) -> &Node {
    &self.nodes[node_id.0]
  }

  pub(crate) fn node_mut(&mut self, node_id: NodeId) -> &mut Node {
    &mut self.nodes[node_id.0]
  }

  /// Child positions of splitting `node_id` on `feature`. A child whose rows
  /// were reached before by another path is shared.
  pub(crate) fn get_ids_of_children(
    &mut self,
    node_id: NodeId,
    feature: usize,
    problem: &TreeProblem,
  ) -> (NodeId, NodeId) {
    if let Some(ids) = self.nodes[node_id.0].children.get(&feature) {
      return *ids;
    }
    let (left, right) = problem.apply_split(&self.nodes[node_id.0].position, feature);
    let (left, right) = (
      self.get_or_insert(left, problem),
      self.get_or_insert(right, problem),
    );
    self.nodes[node_id.0].children.insert(feature, (left, right));
    self.nodes[left.0].parents.push((node_id, feature));
    self.nodes[right.0].parents.push((node_id, feature));
    (left, right)
  }

  /// Re-offers the splits of every ancestor of `node_id` after its best
  /// value went up, following all parents.
  pub(crate) fn propagate_best(&mut self, node_id: NodeId, penalty: f64) {
    let mut queue = VecDeque::from([node_id]);
    while let Some(id) = queue.pop_front() {
      for (parent, feature) in self.nodes[id.0].parents.clone() {
        let Some((left, right)) = self.nodes[parent.0].children(feature) else {
          continue;
        };
        let value = self.nodes[left.0].best_value + self.nodes[right.0].best_value - penalty;
        if self.nodes[parent.0].offer_best(value, Plan::Split(feature)) {
          queue.push_back(parent);
        }
      }
    }
  }

  /// The tree described by the best plans below `node_id`.
  pub fn best_tree(&self, node_id: NodeId) -> Tree {
    let node = self.node(node_id);
    match &node.best_plan {
      Plan::Stop => Tree::leaf(),
      Plan::Rollout(tree) => tree.clone(),
      Plan::Split(feature) => match node.children.get(feature) {
        Some(&(left, right)) => Tree::split(*feature, self.best_tree(left), self.best_tree(right)),
        None => Tree::leaf(),
      },
    }
  }
}

impl Node {
  fn new(position: Position, stop_value: f64) -> Self {
    Self {
      position,
      stop_value,
      actions_created: false,
      untried: Vec::new(),
      actions: BTreeMap::new(),
      children: BTreeMap::new(),
      parents: Vec::new(),
      subtree_actions: BTreeMap::new(),
      value: RunningAverage::new(),
      select_count: 0,
      best_value: stop_value,
      best_plan: Plan::Stop,
    }
  }

  pub fn position(&self) -> &Position {
    &self.position
  }

  pub fn stop_value(&self) -> f64 {
    self.stop_value
  }

  pub fn select_count(&self) -> u32 {
    self.select_count
  }

  pub(crate) fn increment_select_count(&mut self) {
    self.select_count += 1;
  }

  pub fn actions_created(&self) -> bool {
    self.actions_created
  }

  pub(crate) fn create_actions(&mut self, actions: Vec<Action>) {
    debug_assert!(!self.actions_created, "recreating actions");
    self.actions_created = true;
    self.untried = actions;
  }

  pub fn untried(&self) -> &[Action] {
    &self.untried
  }

  pub(crate) fn random_untried<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Action> {
    self.untried.choose(rng).copied()
  }

  /// Counts a selection of `action`, materialising its statistics on the
  /// first one.
  pub(crate) fn visit_action(&mut self, action: Action) {
    if let Some(ix) = self.untried.iter().position(|a| *a == action) {
      self.untried.swap_remove(ix);
    }
    self.actions.entry(action).or_default().select_count += 1;
  }

  /// Selections made at this node, i.e. visits after the first one.
  pub fn action_select_count(&self) -> u32 {
    self.actions.values().map(|a| a.select_count).sum()
  }

  pub fn children(&self, feature: usize) -> Option<(NodeId, NodeId)> {
    self.children.get(&feature).copied()
  }

  pub fn parents(&self) -> &[(NodeId, usize)] {
    &self.parents
  }

  /// Mean value of iterations that split on `feature` at this node or
  /// below it, 0 when there were none.
  pub fn subtree_value(&self, feature: usize) -> f64 {
    self.subtree_actions
      .get(&feature)
      .map(|a| a.value())
      .unwrap_or(0.0)
  }

  pub fn best_value(&self) -> f64 {
    self.best_value
  }

  pub fn best_plan(&self) -> &Plan {
    &self.best_plan
  }

  /// Keeps the plan if it strictly beats the best known one.
  pub(crate) fn offer_best(&mut self, value: f64, plan: Plan) -> bool {
    if value > self.best_value {
      self.best_value = value;
      self.best_plan = plan;
      true
    } else {
      false
    }
  }
}

impl ActionInfo {
  pub(crate) fn select_count(&self) -> u32 {
    self.select_count
  }

  pub(crate) fn value(&self) -> f64 {
    self.reward.value()
  }
}

impl Display for Node {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Node {{\"rows\": {}", self.position.rows.len())?;
    let actions: Vec<_> = self.actions.keys().map(|k| k.to_string()).collect();
    write!(f, ", \"actions\": {:?}", actions)?;
    let children: Vec<_> = self.children.keys().collect();
    write!(
      f,
      ", \"splits\": {:?}, \"parents\": {}, \"select_count\": {}, \"best\": {:.4}",
      children,
      self.parents.len(),
      self.select_count,
      self.best_value
    )?;
    write!(f, "}}")?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use bctree::{Dataset, Objective};

  use super::*;

  fn problem() -> TreeProblem {
    let data = Dataset::new(
      vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]],
      vec![0, 0, 1, 1],
    )
    .unwrap();
    let objective = Objective::new(&data, 0.001);
    TreeProblem::new(Arc::new(data), objective, 1, None)
  }

  #[test]
  fn actions_are_materialised_on_first_selection() {
    let p = problem();
    let mut forest = Forest::new(16, &p);
    let root = forest.root();
    let node = forest.node_mut(root);
    assert!(!node.actions_created());
    let actions = p.legal_actions(node.position());
    node.create_actions(actions);
    assert_eq!(node.untried().len(), 3);
    assert!(node.actions.is_empty());

    node.visit_action(Action::Split(1));
    node.visit_action(Action::Split(1));
    assert_eq!(node.untried().len(), 2);
    assert!(!node.untried().contains(&Action::Split(1)));
    assert_eq!(node.actions.len(), 1);
    assert_eq!(node.actions[&Action::Split(1)].select_count(), 2);
    assert_eq!(node.action_select_count(), 2);
  }

  #[test]
  fn children_are_created_once() {
    let p = problem();
    let mut forest = Forest::new(16, &p);
    let root = forest.root();
    let ids = forest.get_ids_of_children(root, 0, &p);
    assert_eq!(forest.len(), 3);
    assert_eq!(forest.get_ids_of_children(root, 0, &p), ids);
    assert_eq!(forest.len(), 3);
    assert_eq!(forest.node(root).children(0), Some(ids));
    assert_eq!(forest.node(ids.0).position().counts, [2, 0]);
    assert_eq!(forest.node(ids.1).position().counts, [0, 2]);
    assert!((forest.node(ids.0).stop_value() - 0.5).abs() < 1e-12);
    assert_eq!(forest.node(ids.0).parents(), &[(root, 0)]);
  }

  #[test]
  fn split_orders_meet_in_one_node() {
    let p = problem();
    let mut forest = Forest::new(16, &p);
    let root = forest.root();
    let (zero, _) = forest.get_ids_of_children(root, 0, &p);
    let (one, _) = forest.get_ids_of_children(root, 1, &p);
    let (a, _) = forest.get_ids_of_children(zero, 1, &p);
    let (b, _) = forest.get_ids_of_children(one, 0, &p);
    // rows with x0 = 0 and x1 = 0, reached both ways
    assert_eq!(a, b);
    assert_eq!(&*forest.node(a).position().rows, &[0]);
    assert_eq!(forest.node(a).parents(), &[(zero, 1), (one, 0)]);
    assert_eq!(forest.len(), 8);
  }

  #[test]
  fn better_completions_reach_every_parent() {
    let data = Dataset::new(
      vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]],
      vec![0, 1, 1, 1],
    )
    .unwrap();
    let objective = Objective::new(&data, 0.001);
    let p = TreeProblem::new(Arc::new(data), objective, 1, None);
    let mut forest = Forest::new(16, &p);
    let root = forest.root();
    let (zero, _) = forest.get_ids_of_children(root, 0, &p);
    let (one, _) = forest.get_ids_of_children(root, 1, &p);
    let (shared, _) = forest.get_ids_of_children(zero, 1, &p);
    assert_eq!(forest.get_ids_of_children(one, 0, &p).0, shared);
    assert!((forest.node(root).best_value() - 0.5).abs() < 1e-12);

    assert!(forest
      .node_mut(shared)
      .offer_best(0.6, Plan::Rollout(Tree::leaf())));
    forest.propagate_best(shared, 0.001);
    let expected = 0.6 + 1.0 / 6.0 - 0.001;
    for parent in [zero, one] {
      assert!((forest.node(parent).best_value() - expected).abs() < 1e-12);
    }
    assert!(matches!(forest.node(zero).best_plan(), Plan::Split(1)));
    assert!(matches!(forest.node(one).best_plan(), Plan::Split(0)));
    assert!((forest.node(root).best_value() - (expected + 2.0 / 6.0 - 0.001)).abs() < 1e-12);
    assert!(matches!(forest.node(root).best_plan(), Plan::Split(0)));
  }

  #[test]
  fn best_tree_follows_best_plans() {
    let p = problem();
    let mut forest = Forest::new(16, &p);
    let root = forest.root();
    assert_eq!(forest.best_tree(root), Tree::leaf());
    assert!((forest.node(root).best_value() - 0.5).abs() < 1e-12);

    let (left, right) = forest.get_ids_of_children(root, 0, &p);
    let value = forest.node(left).best_value() + forest.node(right).best_value() - 0.001;
    assert!(forest.node_mut(root).offer_best(value, Plan::Split(0)));
    assert!(!forest.node_mut(root).offer_best(value, Plan::Stop));
    assert_eq!(forest.best_tree(root).to_string(), "(0 leaf leaf)");

    let rollout = Tree::split(1, Tree::leaf(), Tree::leaf());
    assert!(forest.node_mut(left).offer_best(0.75, Plan::Rollout(rollout)));
    assert_eq!(forest.best_tree(root).to_string(), "(0 (1 leaf leaf) leaf)");
  }
}
