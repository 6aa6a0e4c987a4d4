use crate::{
  data::Dataset,
  errors::TreeError,
  tree::{majority, Tree},
};

/// Regularised balanced accuracy of a fitted tree:
/// `balanced_accuracy - regularization * (size - 1) / 2`.
///
/// Each split adds two nodes, so the penalty is `regularization` per split.
pub fn score(tree: &Tree, data: &Dataset, regularization: f64) -> Result<f64, TreeError> {
  let bacc = tree.balanced_accuracy(data)?;
  Ok(bacc - regularization * (tree.size() - 1) as f64 / 2.0)
}

/// Scoring context for one training set.
///
/// Balanced accuracy is a sum over leaves: a leaf predicting `c` contributes
/// `weights[c]` for every row of class `c` it holds. The weights are
/// `1 / (k * class count)` with `k` the number of classes present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Objective {
  regularization: f64,
  weights: [f64; 2],
}

impl Objective {
  pub fn new(data: &Dataset, regularization: f64) -> Self {
    let counts = data.class_counts();
    let present = counts.iter().filter(|&&c| c > 0).count() as f64;
    let weight = |c: usize| if c == 0 { 0.0 } else { 1.0 / (present * c as f64) };
    Objective {
      regularization,
      weights: [weight(counts[0]), weight(counts[1])],
    }
  }

  pub fn regularization(&self) -> f64 {
    self.regularization
  }

  pub fn weights(&self) -> [f64; 2] {
    self.weights
  }

  /// Cost of one split.
  pub fn split_penalty(&self) -> f64 {
    self.regularization
  }

  /// Contribution of a leaf holding `counts` rows of each class, under the
  /// same majority rule `Tree::fit` uses.
  pub fn leaf_value(&self, counts: [usize; 2]) -> f64 {
    let p = majority(counts) as usize;
    counts[p] as f64 * self.weights[p]
  }

  /// Value of classifying every row in `counts` correctly with no splits;
  /// no subtree over these rows can do better.
  pub fn perfect_value(&self, counts: [usize; 2]) -> f64 {
    counts[0] as f64 * self.weights[0] + counts[1] as f64 * self.weights[1]
  }

  pub fn score(&self, tree: &Tree, data: &Dataset) -> Result<f64, TreeError> {
    score(tree, data, self.regularization)
  }

  pub fn fit_and_score(&self, tree: &mut Tree, data: &Dataset) -> Result<f64, TreeError> {
    tree.fit(data)?;
    self.score(tree, data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn data() -> Dataset {
    // 3 negatives, 1 positive
    Dataset::new(
      vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]],
      vec![0, 0, 0, 1],
    )
    .unwrap()
  }

  #[test]
  fn penalty_is_per_split() {
    let d = data();
    let mut tree = Tree::split(0, Tree::leaf(), Tree::split(1, Tree::leaf(), Tree::leaf()));
    tree.fit(&d).unwrap();
    assert_eq!(tree.balanced_accuracy(&d).unwrap(), 1.0);
    let s = score(&tree, &d, 0.01).unwrap();
    assert!((s - 0.98).abs() < 1e-12);
    assert!((Objective::new(&d, 0.01).split_penalty() - 0.01).abs() < 1e-12);
  }

  #[test]
  fn unfitted_trees_cannot_be_scored() {
    assert_eq!(score(&Tree::leaf(), &data(), 0.0), Err(TreeError::NotFitted));
  }

  #[test]
  fn leaf_values_add_up_to_balanced_accuracy() {
    let d = data();
    let objective = Objective::new(&d, 0.0);
    assert_eq!(objective.weights(), [1.0 / 6.0, 0.5]);

    // the root leaf predicts 0: all negatives right, the positive wrong
    assert!((objective.leaf_value([3, 1]) - 0.5).abs() < 1e-12);

    let mut tree = Tree::split(0, Tree::leaf(), Tree::leaf());
    let s = objective.fit_and_score(&mut tree, &d).unwrap();
    // left [2, 0], right [1, 1] predicts 0 on the tie
    let by_leaves = objective.leaf_value([2, 0]) + objective.leaf_value([1, 1]);
    assert!((s - by_leaves).abs() < 1e-12);
    assert!((objective.perfect_value([3, 1]) - 1.0).abs() < 1e-12);
  }

  #[test]
  fn missing_class_has_no_weight() {
    let d = Dataset::new(vec![vec![0], vec![1]], vec![0, 0]).unwrap();
    let objective = Objective::new(&d, 0.1);
    assert_eq!(objective.weights(), [0.5, 0.0]);
    assert_eq!(objective.leaf_value([2, 0]), 1.0);
    let mut tree = Tree::leaf();
    assert_eq!(objective.fit_and_score(&mut tree, &d).unwrap(), 1.0);
  }
}
