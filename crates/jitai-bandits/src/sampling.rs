//! Gamma and Beta sampling for Thompson sampling.
//!
//! Gamma draws use Marsaglia–Tsang for `shape >= 1`. Smaller shapes are
//! boosted: draw from `Gamma(shape + 1)` and scale by `U^(1/shape)`.
//! A Beta draw is `x / (x + y)` with `x ~ Gamma(alpha)` and `y ~ Gamma(beta)`.

use rand::Rng;
use rand_distr::StandardNormal;

/// Lower bound applied to Beta parameters before sampling.
const MIN_SHAPE: f64 = 1e-6;

/// Draws from `Gamma(shape, 1)`. Non-positive or non-finite shapes yield `0.0`.
pub fn sample_gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64) -> f64 {
    if !shape.is_finite() || shape <= 0.0 {
        return 0.0;
    }
    if shape < 1.0 {
        let u: f64 = rng.gen();
        return sample_gamma(rng, shape + 1.0) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let (x, v) = loop {
            let x: f64 = rng.sample(StandardNormal);
            let v = 1.0 + c * x;
            if v > 0.0 {
                break (x, v * v * v);
            }
        };
        let u: f64 = rng.gen();
        // squeeze
        if u < 1.0 - 0.0331 * x.powi(4) {
            return d * v;
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// Draws θ ~ Beta(alpha, beta). Always returns a value in `[0, 1]`.
pub fn sample_beta<R: Rng + ?Sized>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    let a = if alpha.is_finite() { alpha.max(MIN_SHAPE) } else { 1.0 };
    let b = if beta.is_finite() { beta.max(MIN_SHAPE) } else { 1.0 };
    let x = sample_gamma(rng, a);
    let y = sample_gamma(rng, b);
    let sum = x + y;
    if sum <= 0.0 || !sum.is_finite() {
        // Both draws underflowed; the mean is the only sensible answer.
        return a / (a + b);
    }
    (x / sum).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mean_of(alpha: f64, beta: f64, draws: usize) -> f64 {
        let mut rng = StdRng::seed_from_u64(7);
        #[allow(clippy::cast_precision_loss)]
        let n = draws as f64;
        (0..draws).map(|_| sample_beta(&mut rng, alpha, beta)).sum::<f64>() / n
    }

    #[test]
    fn beta_mean_converges() {
        for (a, b) in [(1.0, 1.0), (2.0, 8.0), (28.0, 2.0), (0.5, 0.5), (0.3, 3.0)] {
            let mean = mean_of(a, b, 20_000);
            let expected = a / (a + b);
            assert!(
                (mean - expected).abs() < 0.02,
                "Beta({a},{b}) mean {mean} vs {expected}"
            );
        }
    }

    #[test]
    fn gamma_mean_matches_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        for shape in [0.4, 1.0, 3.5, 12.0] {
            let mean = (0..20_000).map(|_| sample_gamma(&mut rng, shape)).sum::<f64>() / 20_000.0;
            assert!((mean - shape).abs() < shape * 0.05 + 0.02, "shape {shape} mean {mean}");
        }
    }

    #[test]
    fn degenerate_shapes_do_not_panic() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!((sample_gamma(&mut rng, 0.0)).abs() < f64::EPSILON);
        assert!((sample_gamma(&mut rng, f64::NAN)).abs() < f64::EPSILON);
        let theta = sample_beta(&mut rng, 0.0, 0.0);
        assert!((0.0..=1.0).contains(&theta));
    }

    proptest! {
        #[test]
        fn beta_sample_stays_in_unit_interval(
            alpha in 0.001f64..500.0,
            beta in 0.001f64..500.0,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let theta = sample_beta(&mut rng, alpha, beta);
            prop_assert!((0.0..=1.0).contains(&theta));
        }
    }
}
