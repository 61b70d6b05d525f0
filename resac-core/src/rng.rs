// Randomness is threaded explicitly. A key is consumed either by splitting it or by turning it
// into a generator, never both.

use rand::{Rng, SeedableRng, rngs::StdRng};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RngKey(u64);

impl RngKey {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn split(self) -> (Self, Self) {
        let [a, b] = self.split_n();
        (a, b)
    }

    pub fn split_n<const N: usize>(self) -> [Self; N] {
        let mut rng = self.into_rng();
        std::array::from_fn(|_| Self(rng.random()))
    }

    pub fn into_rng(self) -> StdRng {
        StdRng::seed_from_u64(self.0)
    }

    /// A plain seed for collaborators that take one, like gymnasium's `reset(seed=...)`.
    pub fn into_seed(self) -> u64 {
        self.into_rng().random()
    }

    /// `n` samples from `U[low, high)` per dimension, row major.
    pub fn uniform(self, low: &[f32], high: &[f32], rows: usize) -> Vec<f32> {
        assert_eq!(low.len(), high.len(), "bounds must have the same length");
        let mut rng = self.into_rng();
        let mut out = Vec::with_capacity(rows * low.len());
        for _ in 0..rows {
            for (lo, hi) in low.iter().zip(high) {
                let u: f32 = rng.random();
                out.push(lo + u * (hi - lo));
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::RngKey;
    use rand::Rng;

    #[test]
    fn same_key_same_stream() {
        let mut a = RngKey::new(7).into_rng();
        let mut b = RngKey::new(7).into_rng();
        for _ in 0..8 {
            assert_eq!(a.random::<u32>(), b.random::<u32>());
        }
    }

    #[test]
    fn split_children_differ() {
        let [a, b, c] = RngKey::new(0).split_n();
        assert_ne!(a, b);
        assert_ne!(b, c);
        let (x, y) = RngKey::new(0).split();
        assert_eq!(x, a);
        assert_eq!(y, b);
    }

    #[test]
    fn uniform_respects_bounds() {
        let samples = RngKey::new(3).uniform(&[-2., 0.], &[2., 0.5], 100);
        assert_eq!(samples.len(), 200);
        for pair in samples.chunks(2) {
            assert!((-2.0..2.0).contains(&pair[0]));
            assert!((0.0..0.5).contains(&pair[1]));
        }
    }
}
