use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp1, StandardNormal};
use serde::{Deserialize, Serialize};

/// Random number generator owned by a single chain.
pub type ChainRng = ChaCha8Rng;

/// One RNG per chain, seeded from `seed + chain` so results do not depend
/// on thread scheduling.
pub fn chain_rngs(seed: u64, num_chains: usize) -> Vec<ChainRng> {
    (0..num_chains)
        .map(|chain| ChaCha8Rng::seed_from_u64(seed.wrapping_add(chain as u64)))
        .collect()
}

#[inline]
pub fn uniform(rng: &mut ChainRng) -> f64 {
    rng.gen::<f64>()
}

#[inline]
pub fn normal(rng: &mut ChainRng) -> f64 {
    StandardNormal.sample(rng)
}

#[inline]
pub fn exponential(rng: &mut ChainRng) -> f64 {
    Exp1.sample(rng)
}

/// Snapshot of a chain's generator, enough to resume the stream exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: [u8; 32],
    pub stream: u64,
    pub word_pos: u128,
}

impl RngState {
    pub fn capture(rng: &ChainRng) -> Self {
        Self {
            seed: rng.get_seed(),
            stream: rng.get_stream(),
            word_pos: rng.get_word_pos(),
        }
    }

    pub fn restore(&self) -> ChainRng {
        let mut rng = ChaCha8Rng::from_seed(self.seed);
        rng.set_stream(self.stream);
        rng.set_word_pos(self.word_pos);
        rng
    }
}
