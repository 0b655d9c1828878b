use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::debug;

#[derive(Debug, Clone)]
/// Produces the visiting order of variants for every round.
///
/// One generator is seeded once and then shared by all rounds, so consecutive rounds get
/// independent permutations instead of repeating the same one.
pub struct Scheduler {
    rng: StdRng,
}

impl Scheduler {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => {
                debug!(seed = seed, "Seeding scheduler");

                Self {
                    rng: StdRng::seed_from_u64(seed),
                }
            }
            None => Self {
                rng: StdRng::from_entropy(),
            },
        }
    }

    /// `count` uniformly random permutations of `items`, each drawn from the given order
    pub fn rounds<'a, T: Clone>(
        &'a mut self,
        items: &'a [T],
        count: usize,
    ) -> impl Iterator<Item = Vec<T>> + 'a {
        (0..count).map(move |_| {
            let mut order = items.to_vec();
            order.shuffle(&mut self.rng);

            order
        })
    }
}
