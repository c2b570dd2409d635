//! Shapley credit assignment over tool/model coalitions.
//!
//! Exact computation enumerates all subsets for up to [`EXACT_LIMIT`] players;
//! larger games fall back to Monte Carlo over seeded random permutations, so
//! results stay deterministic for a given seed. Exact mode guarantees
//! efficiency (credits sum to the grand-coalition value), symmetry, and zero
//! credit for dummy players.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::collections::HashMap;

/// Player counts up to this use exact subset enumeration.
pub const EXACT_LIMIT: usize = 8;

/// Observed values per coalition, keyed by player bitmask.
///
/// Missing coalitions are worth zero; the empty coalition is always zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoalitionValues {
    players: usize,
    values: HashMap<u32, f64>,
}

impl CoalitionValues {
    pub fn new(players: usize) -> Self {
        assert!(players <= 32, "coalition mask is 32 bits");
        Self {
            players,
            values: HashMap::new(),
        }
    }

    pub fn players(&self) -> usize {
        self.players
    }

    /// Record the observed value of a coalition given as player indices.
    pub fn set(&mut self, members: &[usize], value: f64) {
        let mut mask = 0u32;
        for &m in members {
            debug_assert!(m < self.players);
            mask |= 1 << m;
        }
        self.values.insert(mask, value);
    }

    pub fn get_mask(&self, mask: u32) -> f64 {
        if mask == 0 {
            return 0.0;
        }
        self.values.get(&mask).copied().unwrap_or(0.0)
    }

    /// Value of the grand coalition.
    pub fn grand_value(&self) -> f64 {
        if self.players == 0 {
            return 0.0;
        }
        self.get_mask((1u32 << self.players) - 1)
    }
}

/// Shapley credits: exact when small enough, Monte Carlo otherwise.
pub fn credits(values: &CoalitionValues, permutations: u32, seed: u64) -> Vec<f64> {
    if values.players() <= EXACT_LIMIT {
        exact_credits(values)
    } else {
        monte_carlo_credits(values, permutations.max(100), seed)
    }
}

/// Exact Shapley values by subset enumeration.
///
/// `credit_i = Σ_{S ⊆ N∖{i}} |S|!(n−|S|−1)!/n! · (v(S∪{i}) − v(S))`
pub fn exact_credits(values: &CoalitionValues) -> Vec<f64> {
    let n = values.players();
    if n == 0 {
        return Vec::new();
    }

    let mut factorial = vec![1.0f64; n + 1];
    for i in 1..=n {
        factorial[i] = factorial[i - 1] * i as f64;
    }

    let full = (1u32 << n) - 1;
    let mut credits = vec![0.0; n];
    for (i, credit) in credits.iter_mut().enumerate() {
        let bit = 1u32 << i;
        let others = full & !bit;
        // Enumerate subsets S of the other players.
        let mut subset = 0u32;
        loop {
            let s = subset.count_ones() as usize;
            let weight = factorial[s] * factorial[n - s - 1] / factorial[n];
            *credit += weight * (values.get_mask(subset | bit) - values.get_mask(subset));

            if subset == others {
                break;
            }
            subset = (subset.wrapping_sub(others)) & others;
        }
    }
    credits
}

/// Monte Carlo Shapley over seeded permutations.
///
/// Each permutation derives its RNG from `(seed, index)`, and the per-player
/// marginal vectors are folded in index order, so the result is deterministic.
pub fn monte_carlo_credits(values: &CoalitionValues, permutations: u32, seed: u64) -> Vec<f64> {
    let n = values.players();
    if n == 0 {
        return Vec::new();
    }

    let marginals: Vec<Vec<f64>> = (0..permutations)
        .into_par_iter()
        .map(|index| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut rng);

            let mut contribution = vec![0.0; n];
            let mut mask = 0u32;
            let mut prev = 0.0;
            for &player in &order {
                mask |= 1 << player;
                let value = values.get_mask(mask);
                contribution[player] = value - prev;
                prev = value;
            }
            contribution
        })
        .collect();

    let mut credits = vec![0.0; n];
    for contribution in &marginals {
        for (c, m) in credits.iter_mut().zip(contribution) {
            *c += m;
        }
    }
    for c in &mut credits {
        *c /= permutations as f64;
    }
    credits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_efficiency_holds() {
        let mut v = CoalitionValues::new(3);
        v.set(&[0], 1.0);
        v.set(&[1], 2.0);
        v.set(&[2], 0.5);
        v.set(&[0, 1], 4.0);
        v.set(&[0, 2], 2.0);
        v.set(&[1, 2], 3.0);
        v.set(&[0, 1, 2], 6.0);

        let credits = exact_credits(&v);
        let total: f64 = credits.iter().sum();
        assert!((total - v.grand_value()).abs() < 1e-9);
    }

    #[test]
    fn symmetric_players_get_equal_credit() {
        let mut v = CoalitionValues::new(2);
        v.set(&[0], 1.0);
        v.set(&[1], 1.0);
        v.set(&[0, 1], 3.0);

        let credits = exact_credits(&v);
        assert!((credits[0] - credits[1]).abs() < 1e-12);
        assert!((credits[0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn dummy_player_gets_zero() {
        let mut v = CoalitionValues::new(3);
        // Player 2 never changes any coalition's value.
        v.set(&[0], 1.0);
        v.set(&[1], 1.0);
        v.set(&[2], 0.0);
        v.set(&[0, 1], 3.0);
        v.set(&[0, 2], 1.0);
        v.set(&[1, 2], 1.0);
        v.set(&[0, 1, 2], 3.0);

        let credits = exact_credits(&v);
        assert!(credits[2].abs() < 1e-12);
    }

    #[test]
    fn monte_carlo_is_deterministic_and_close() {
        let mut v = CoalitionValues::new(4);
        v.set(&[0], 1.0);
        v.set(&[0, 1], 2.0);
        v.set(&[0, 1, 2], 3.0);
        v.set(&[0, 1, 2, 3], 4.0);

        let a = monte_carlo_credits(&v, 500, 7);
        let b = monte_carlo_credits(&v, 500, 7);
        assert_eq!(a, b);

        let exact = exact_credits(&v);
        for (mc, ex) in a.iter().zip(&exact) {
            assert!((mc - ex).abs() < 0.5, "MC {mc} too far from exact {ex}");
        }
    }

    #[test]
    fn dispatch_switches_on_player_count() {
        let small = CoalitionValues::new(3);
        assert_eq!(credits(&small, 100, 1).len(), 3);

        let mut large = CoalitionValues::new(10);
        large.set(&(0..10).collect::<Vec<_>>(), 5.0);
        let result = credits(&large, 200, 1);
        assert_eq!(result.len(), 10);
        // Efficiency holds for MC too: every permutation telescopes to v(N).
        let total: f64 = result.iter().sum();
        assert!((total - 5.0).abs() < 1e-9);
    }
}
