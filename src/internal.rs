use std::sync::Arc;

use rand::Rng;

use crate::scalar::Real;


pub type RcT<T> = Arc<T>;
pub type RcCell<T> = parking_lot::RwLock<T>;


#[inline]
pub fn negative_index(i: isize, n: usize) -> usize {
  if i < 0 {
    (n as isize + i) as usize
  } else {
    i as usize
  }
}


// Polar Box-Muller transformation

pub fn randn<T: Real>(rng: &mut impl Rng) -> (T, T) {
  loop {
    let u = rng.gen_range(-T::one(), T::one());
    let v = rng.gen_range(-T::one(), T::one());
    let r = u * u + v * v;
    // Try again if outside interval
    if r == T::zero() || r >= T::one() { continue }
    let c = (T::lit(-2.0) * r.ln() / r).sqrt();
    return (u * c, v * c)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use rand::{SeedableRng, rngs::StdRng};

  #[test]
  fn negative() {
    assert_eq!(negative_index(-1, 4), 3);
    assert_eq!(negative_index(2, 4), 2);
  }

  #[test]
  fn normal_moments() {
    let mut rng = StdRng::seed_from_u64(3);
    let samples: Vec<f64> = (0..20_000)
      .flat_map(|_| { let (a, b) = randn::<f64>(&mut rng); [a, b] })
      .collect();
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    assert!(mean.abs() < 0.03);
    assert!((variance - 1.0).abs() < 0.05);
  }
}
