use std::sync::{
  atomic::{AtomicUsize, Ordering},
  RwLock,
};

use bctree::Tree;

/// Best fitted tree found so far and its score.
///
/// Readers never block each other; `offer` replaces the tree only on a
/// strict improvement, so the score never decreases.
#[derive(Debug)]
pub struct Incumbent {
  best: RwLock<(Tree, f64)>,
  improvements: AtomicUsize,
}

impl Incumbent {
  pub fn new(tree: Tree, score: f64) -> Self {
    Incumbent {
      best: RwLock::new((tree, score)),
      improvements: AtomicUsize::new(0),
    }
  }

  pub fn offer(&self, tree: Tree, score: f64) -> bool {
    let mut guard = self.best.write().unwrap();
    if score > guard.1 {
      *guard = (tree, score);
      self.improvements.fetch_add(1, Ordering::Relaxed);
      true
    } else {
      false
    }
  }

  pub fn score(&self) -> f64 {
    self.best.read().unwrap().1
  }

  pub fn tree(&self) -> Tree {
    self.best.read().unwrap().0.clone()
  }

  pub fn snapshot(&self) -> (Tree, f64) {
    self.best.read().unwrap().clone()
  }

  /// Number of accepted offers.
  pub fn improvements(&self) -> usize {
    self.improvements.load(Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_strict_improvements_are_kept() {
    let incumbent = Incumbent::new(Tree::leaf(), 0.5);
    let split = Tree::split(0, Tree::leaf(), Tree::leaf());
    assert!(!incumbent.offer(split.clone(), 0.5));
    assert!(!incumbent.offer(split.clone(), 0.25));
    assert_eq!(incumbent.tree(), Tree::leaf());
    assert!(incumbent.offer(split.clone(), 0.75));
    assert_eq!(incumbent.snapshot(), (split, 0.75));
    assert_eq!(incumbent.improvements(), 1);
  }

  #[test]
  fn score_never_decreases_under_concurrent_offers() {
    let incumbent = Incumbent::new(Tree::leaf(), 0.0);
    crossbeam::scope(|s| {
      for t in 0..4 {
        let incumbent = &incumbent;
        s.spawn(move |_| {
          let mut last = incumbent.score();
          for i in 0..100 {
            incumbent.offer(Tree::leaf(), ((i * 7 + t * 13) % 100) as f64 / 100.0);
            let now = incumbent.score();
            assert!(now >= last);
            last = now;
          }
        });
      }
    })
    .unwrap();
    assert_eq!(incumbent.score(), 0.99);
    assert!(incumbent.improvements() >= 1);
  }
}
