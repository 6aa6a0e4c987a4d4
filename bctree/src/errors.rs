use thiserror::Error;

/// Errors raised while validating data, decoding trees or evaluating them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TreeError {
  #[error("feature value {value} at row {row}, column {feature} is not binary")]
  NonBinaryFeature { row: usize, feature: usize, value: u8 },
  #[error("label {value} at row {row} is not binary")]
  NonBinaryLabel { row: usize, value: u8 },
  #[error("row {row} has {found} features, expected {expected}")]
  RaggedRow {
    row: usize,
    expected: usize,
    found: usize,
  },
  #[error("{rows} feature rows but {labels} labels")]
  LengthMismatch { rows: usize, labels: usize },
  #[error("dataset has no rows")]
  EmptyDataset,
  #[error("parse error at byte {position} near {token:?}: {reason}")]
  Parse {
    position: usize,
    token: String,
    reason: &'static str,
  },
  // a split referencing a column the data doesn't have; never retried
  #[error("split on feature {feature} but the data only has {n_features} features")]
  FeatureOutOfRange { feature: usize, n_features: usize },
  // a deserialized arena that doesn't describe a tree
  #[error("malformed tree at node {node}: {reason}")]
  MalformedTree { node: usize, reason: &'static str },
  #[error("tree has leaves without predictions, call fit first")]
  NotFitted,
  /// Name of the parameter, what was expected, what was passed.
  #[error("invalid value for {0}, expected {1} but {2} provided")]
  InvalidParameter(String, String, String),
}
