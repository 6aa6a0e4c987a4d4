use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{data::Dataset, errors::TreeError, tree::Tree};

/// Result of one run of a tree searcher. The tree is fitted on the data the
/// searcher was given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
  pub tree: Tree,
  pub elapsed: Duration,
  // false when the searcher converged before its budget ran out
  pub timed_out: bool,
}

/// Common interface of the anytime search and the exact solvers it is
/// compared against.
pub trait Searcher {
  fn name(&self) -> &str;
  fn run(&self, data: &Dataset) -> Result<SearchOutcome, TreeError>;
}
