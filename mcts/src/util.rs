/// Sum and count of reward samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningAverage {
  sum: f64,
  count: u32,
}

impl RunningAverage {
  pub fn new() -> Self {
    Self { sum: 0.0, count: 0 }
  }

  pub fn add_sample(&mut self, v: f64, n: u32) {
    self.sum += v * n as f64;
    self.count += n;
  }

  pub fn value(&self) -> f64 {
    if self.count == 0 {
      0.0
    } else {
      self.sum / self.count as f64
    }
  }

  pub fn sum(&self) -> f64 {
    self.sum
  }

  pub fn count(&self) -> u32 {
    self.count
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn running_average_tracks_sum_and_count() {
    let mut avg = RunningAverage::new();
    assert_eq!(avg.value(), 0.0);
    avg.add_sample(1.0, 1);
    avg.add_sample(0.5, 2);
    assert_eq!(avg.count(), 3);
    assert!((avg.sum() - 2.0).abs() < 1e-12);
    assert!((avg.value() - 2.0 / 3.0).abs() < 1e-12);
  }
}
