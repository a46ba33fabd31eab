// Seed-reproducible pseudo-random number generator for pattern sampling.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding.
// Every sampler in `loopcraft` draws from a `LoopRng` created fresh from the
// caller's seed at the start of a generation call, so a given seed and a given
// transition table always yield the same pattern.
//
// The algorithm is fixed and documented here on purpose: persisted models are
// expected to regenerate bit-identical patterns on any platform. Do not swap
// the generator, change the float conversion, or reorder draws inside
// `choose`/`range_usize` without treating it as a format break.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ state, seeded through SplitMix64.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRng {
    s: [u64; 4],
}

impl LoopRng {
    /// Create a generator from a `u64` seed.
    ///
    /// Two generators built from the same seed produce identical streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Next raw `u64` of the stream.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform `f64` in [0, 1), built from the upper 53 bits.
    ///
    /// This is the `r` used by every inverse-CDF draw.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform integer in `[low, high)` without modulo bias.
    ///
    /// Panics if `low >= high`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        assert!(low < high, "range_usize: low must be less than high");
        let range = (high - low) as u64;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1)) as usize;
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range) as usize;
            }
        }
    }

    /// Pick one element uniformly. Returns `None` for an empty slice and
    /// consumes no randomness in that case.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.range_usize(0, items.len());
        items.get(idx)
    }
}

/// SplitMix64 step, used only to expand the seed into xoshiro state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = LoopRng::new(7);
        let mut b = LoopRng::new(7);
        for _ in 0..500 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = LoopRng::new(7);
        let mut b = LoopRng::new(8);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn splitmix_seed_zero_matches_reference() {
        // First SplitMix64 output for state 0, from the reference implementation.
        let mut sm = 0u64;
        assert_eq!(splitmix64(&mut sm), 0xe220_a839_7b1d_cdaf);
    }

    #[test]
    fn f64_in_unit_range() {
        let mut rng = LoopRng::new(12345);
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "f64 out of range: {v}");
        }
    }

    #[test]
    fn range_usize_within_bounds() {
        let mut rng = LoopRng::new(555);
        for _ in 0..10_000 {
            let v = rng.range_usize(3, 10);
            assert!((3..10).contains(&v), "range_usize out of range: {v}");
        }
    }

    #[test]
    fn choose_covers_all_items() {
        let items = ['a', 'b', 'c'];
        let mut rng = LoopRng::new(99);
        let mut seen = [false; 3];
        for _ in 0..200 {
            let c = *rng.choose(&items).unwrap();
            seen[items.iter().position(|&x| x == c).unwrap()] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn choose_empty_consumes_nothing() {
        let mut a = LoopRng::new(3);
        let b = a.clone();
        let empty: [u8; 0] = [];
        assert!(a.choose(&empty).is_none());
        assert_eq!(a, b);
    }

    #[test]
    fn serialization_roundtrip_continues_stream() {
        let mut rng = LoopRng::new(42);
        for _ in 0..50 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: LoopRng = serde_json::from_str(&json).unwrap();
        for _ in 0..50 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
