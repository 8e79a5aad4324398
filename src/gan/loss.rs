use crate::{ ops::Hops, scalar::Real };


/// Binary cross-entropy of fake logits against the "real" label.
///
/// `mean(-ln(sigmoid(fake)))`, written as `mean(softplus(-fake))`
/// so that large logits neither overflow nor lose precision.

pub fn generator_loss<R: Real, O: Hops<R>>(fake: &O) -> O {
  fake.negate().softplus().mean()
}

/// Binary cross-entropy of real logits against "real" plus fake logits against "fake".

pub fn discriminator_loss<R: Real, O: Hops<R>>(real: &O, fake: &O) -> O {
  real.negate().softplus().mean() + fake.softplus().mean()
}


#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_abs_diff_eq;
  use proptest::prelude::*;
  use crate::Tensor;

  #[test]
  fn undecided_logits() {
    let zeros = Tensor::<f64>::zeros(&[4, 1]);
    let ln2 = 2f64.ln();
    assert_abs_diff_eq!(generator_loss(&zeros).item(), ln2, epsilon = 1e-12);
    assert_abs_diff_eq!(discriminator_loss(&zeros, &zeros).item(), 2.0 * ln2, epsilon = 1e-12);
  }

  #[test]
  fn confident_logits() {
    let real = Tensor::fill(&[3, 1], 50.0f32);
    let fake = Tensor::fill(&[3, 1], -50.0f32);
    assert!(discriminator_loss(&real, &fake).item() < 1e-6);
    assert_abs_diff_eq!(generator_loss(&fake).item(), 50.0, epsilon = 1e-4);
    // Confidently wrong stays finite
    assert!(discriminator_loss(&fake, &real).item().is_finite());
  }

  #[test]
  fn gradients_match_sigmoid() {
    // d/dx softplus(-x) = sigmoid(x) - 1
    let fake = Tensor::vec(&[-2.0, 0.0, 3.0]).trained();
    let loss = generator_loss(&fake);
    loss.backward();
    let grad = fake.grad().unwrap().to_vec();
    for (g, x) in grad.iter().zip([-2.0f64, 0.0, 3.0]) {
      let sigmoid = 1.0 / (1.0 + (-x).exp());
      assert_abs_diff_eq!(*g, (sigmoid - 1.0) / 3.0, epsilon = 1e-12);
    }
  }

  proptest! {
    #[test]
    fn never_negative(
      real in prop::collection::vec(-100.0f32..100.0, 1..16),
      fake in prop::collection::vec(-100.0f32..100.0, 1..16),
    ) {
      let real = Tensor::vec(&real);
      let fake = Tensor::vec(&fake);
      prop_assert!(generator_loss(&fake).item() >= 0.0);
      let loss = discriminator_loss(&real, &fake).item();
      prop_assert!(loss >= 0.0 && loss.is_finite());
    }
  }
}
