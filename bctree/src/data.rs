use fixedbitset::FixedBitSet;

use crate::errors::TreeError;

/// Read-only binary feature matrix and label vector.
///
/// Columns are stored as bitsets so routing a row through a split is a
/// single bit lookup.
#[derive(Debug, Clone)]
pub struct Dataset {
  n_rows: usize,
  columns: Vec<FixedBitSet>,
  labels: FixedBitSet,
  // number of rows labelled 0 and 1
  class_counts: [usize; 2],
}

/// Contingency counts of one feature against the label over a row subset,
/// indexed as `counts[feature value][label]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Support {
  pub counts: [[usize; 2]; 2],
}

impl Support {
  /// Label counts of the rows where the feature equals `value`.
  pub fn side(&self, value: bool) -> [usize; 2] {
    self.counts[value as usize]
  }

  pub fn side_len(&self, value: bool) -> usize {
    let [neg, pos] = self.side(value);
    neg + pos
  }

  // feature = 1 and label = 1
  pub fn true_positives(&self) -> usize {
    self.counts[1][1]
  }

  pub fn false_positives(&self) -> usize {
    self.counts[1][0]
  }

  pub fn true_negatives(&self) -> usize {
    self.counts[0][0]
  }

  pub fn false_negatives(&self) -> usize {
    self.counts[0][1]
  }
}

impl Dataset {
  pub fn new(features: Vec<Vec<u8>>, labels: Vec<u8>) -> Result<Self, TreeError> {
    if features.len() != labels.len() {
      return Err(TreeError::LengthMismatch {
        rows: features.len(),
        labels: labels.len(),
      });
    }
    if labels.is_empty() {
      return Err(TreeError::EmptyDataset);
    }
    let n_rows = labels.len();
    let n_features = features[0].len();

    let mut columns = vec![FixedBitSet::with_capacity(n_rows); n_features];
    for (row, values) in features.iter().enumerate() {
      if values.len() != n_features {
        return Err(TreeError::RaggedRow {
          row,
          expected: n_features,
          found: values.len(),
        });
      }
      for (feature, &value) in values.iter().enumerate() {
        match value {
          0 => {}
          1 => columns[feature].insert(row),
          _ => return Err(TreeError::NonBinaryFeature { row, feature, value }),
        }
      }
    }

    let mut label_bits = FixedBitSet::with_capacity(n_rows);
    let mut class_counts = [0; 2];
    for (row, &value) in labels.iter().enumerate() {
      match value {
        0 => {}
        1 => label_bits.insert(row),
        _ => return Err(TreeError::NonBinaryLabel { row, value }),
      }
      class_counts[value as usize] += 1;
    }

    Ok(Dataset {
      n_rows,
      columns,
      labels: label_bits,
      class_counts,
    })
  }

  pub fn n_rows(&self) -> usize {
    self.n_rows
  }

  pub fn n_features(&self) -> usize {
    self.columns.len()
  }

  pub fn label(&self, row: usize) -> bool {
    self.labels[row]
  }

  pub fn value(&self, row: usize, feature: usize) -> bool {
    self.columns[feature][row]
  }

  pub fn class_counts(&self) -> [usize; 2] {
    self.class_counts
  }

  pub fn all_rows(&self) -> Vec<usize> {
    (0..self.n_rows).collect()
  }

  pub fn label_counts(&self, rows: &[usize]) -> [usize; 2] {
    let mut counts = [0; 2];
    for &row in rows {
      counts[self.labels[row] as usize] += 1;
    }
    counts
  }

  /// Hot path of the search: called for every candidate split.
  pub fn support(&self, rows: &[usize], feature: usize) -> Support {
    let column = &self.columns[feature];
    let mut support = Support::default();
    for &row in rows {
      support.counts[column[row] as usize][self.labels[row] as usize] += 1;
    }
    support
  }

  /// Rows with the feature unset and set, in their original order.
  pub fn partition(&self, rows: &[usize], feature: usize) -> (Vec<usize>, Vec<usize>) {
    let column = &self.columns[feature];
    rows.iter().partition(|&&row| !column[row])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn xor_data() -> Dataset {
    Dataset::new(
      vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]],
      vec![0, 1, 1, 0],
    )
    .unwrap()
  }

  #[test]
  fn rejects_non_binary_values() {
    let err = Dataset::new(vec![vec![0, 2]], vec![1]).unwrap_err();
    assert_eq!(
      err,
      TreeError::NonBinaryFeature {
        row: 0,
        feature: 1,
        value: 2
      }
    );
    let err = Dataset::new(vec![vec![0], vec![1]], vec![1, 3]).unwrap_err();
    assert_eq!(err, TreeError::NonBinaryLabel { row: 1, value: 3 });
  }

  #[test]
  fn rejects_bad_shapes() {
    assert_eq!(
      Dataset::new(vec![vec![0, 1], vec![1]], vec![0, 1]).unwrap_err(),
      TreeError::RaggedRow {
        row: 1,
        expected: 2,
        found: 1
      }
    );
    assert_eq!(
      Dataset::new(vec![vec![0]], vec![0, 1]).unwrap_err(),
      TreeError::LengthMismatch { rows: 1, labels: 2 }
    );
    assert_eq!(
      Dataset::new(vec![], vec![]).unwrap_err(),
      TreeError::EmptyDataset
    );
  }

  #[test]
  fn support_counts_value_label_pairs() {
    let data = xor_data();
    assert_eq!(data.n_rows(), 4);
    assert_eq!(data.n_features(), 2);
    assert_eq!(data.class_counts(), [2, 2]);

    let s = data.support(&data.all_rows(), 0);
    assert_eq!(s.counts, [[1, 1], [1, 1]]);

    let s = data.support(&[1, 2, 3], 1);
    assert_eq!(s.side(false), [0, 1]);
    assert_eq!(s.side(true), [1, 1]);
    assert_eq!(s.true_positives(), 1);
    assert_eq!(s.false_positives(), 1);
    assert_eq!(s.true_negatives(), 0);
    assert_eq!(s.false_negatives(), 1);
    assert_eq!(s.side_len(true), 2);
  }

  #[test]
  fn partition_splits_on_feature_value() {
    let data = xor_data();
    let (off, on) = data.partition(&[0, 1, 3], 1);
    assert_eq!(off, vec![0]);
    assert_eq!(on, vec![1, 3]);
    assert_eq!(data.label_counts(&on), [1, 1]);
  }
}
