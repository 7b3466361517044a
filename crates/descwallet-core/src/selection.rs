//! Coin selection algorithms for transaction building
//!
//! Implements first-fit, smallest-first, largest-first, oldest-first and
//! branch-and-bound over effective values (value minus the fee needed to
//! spend the output). Branch-and-bound prefers, among acceptable solutions,
//! fewer inputs and then the lowest total value; when it finds no solution
//! it falls back to largest-first.

use crate::fees::FeeRate;
use crate::types::Utxo;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Upper bound on branch-and-bound search steps
pub const BNB_TOTAL_TRIES: u32 = 100_000;

/// UTXO plus the weight its signed input adds to the transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedUtxo {
    /// Candidate output
    pub utxo: Utxo,
    /// Weight of the signed input spending it
    pub input_weight: u64,
}

impl WeightedUtxo {
    /// Fee paid for including this input at `rate`
    pub fn input_fee(&self, rate: FeeRate) -> u64 {
        rate.fee_for_weight(self.input_weight)
    }

    /// Value minus the fee of spending it; may be negative
    pub fn effective_value(&self, rate: FeeRate) -> i64 {
        self.utxo.value() as i64 - self.input_fee(rate) as i64
    }
}

/// Coin selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Select outputs in index order
    FirstFit,
    /// Select smallest outputs first (consolidates dust)
    SmallestFirst,
    /// Select largest outputs first (minimize inputs)
    LargestFirst,
    /// Select oldest outputs first (confirmed before unconfirmed)
    OldestFirst,
    /// Search for a changeless solution, largest-first otherwise
    #[default]
    BranchAndBound,
}

/// What the selected inputs must pay for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionTarget {
    /// Sum of recipient outputs
    pub amount: u64,
    /// Fee of the transaction without any inputs
    pub base_fee: u64,
    /// Fee rate used to price inputs
    pub fee_rate: FeeRate,
    /// Cost of adding a change output and later spending it
    pub cost_of_change: u64,
}

/// Coin selection result
#[derive(Debug, Clone)]
pub struct SelectionResult {
    /// Selected outputs, must-spend outputs first
    pub selected: Vec<WeightedUtxo>,
    /// Total value of selected outputs
    pub total_value: u64,
    /// Fee of the transaction without a change output
    pub fee: u64,
    /// Value left after amount and fee, available for change
    pub excess: u64,
}

/// Pluggable coin selection
pub trait CoinSelector {
    /// Choose inputs covering `target`
    ///
    /// `must_use` outputs are always spent; `candidates` are optional.
    fn select(
        &self,
        must_use: Vec<WeightedUtxo>,
        candidates: Vec<WeightedUtxo>,
        target: &SelectionTarget,
    ) -> Result<SelectionResult>;
}

/// Strategy-driven selector
#[derive(Debug, Clone, Copy, Default)]
pub struct UtxoSelector {
    strategy: SelectionStrategy,
}

impl UtxoSelector {
    /// Create selector with strategy
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self { strategy }
    }

    /// Selected strategy
    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    fn sort_candidates(strategy: SelectionStrategy, candidates: &mut [WeightedUtxo]) {
        let by_outpoint = |a: &WeightedUtxo, b: &WeightedUtxo| a.utxo.outpoint.cmp(&b.utxo.outpoint);
        match strategy {
            SelectionStrategy::FirstFit => candidates.sort_by(by_outpoint),
            SelectionStrategy::SmallestFirst => candidates.sort_by(|a, b| {
                a.utxo.value().cmp(&b.utxo.value()).then_with(|| by_outpoint(a, b))
            }),
            SelectionStrategy::LargestFirst | SelectionStrategy::BranchAndBound => {
                candidates.sort_by(|a, b| {
                    b.utxo.value().cmp(&a.utxo.value()).then_with(|| by_outpoint(a, b))
                })
            }
            SelectionStrategy::OldestFirst => candidates.sort_by(|a, b| {
                let height = |u: &WeightedUtxo| u.utxo.confirmation_height.unwrap_or(u32::MAX);
                height(a).cmp(&height(b)).then_with(|| by_outpoint(a, b))
            }),
        }
    }

    fn greedy(
        &self,
        must_use: Vec<WeightedUtxo>,
        candidates: Vec<WeightedUtxo>,
        target: &SelectionTarget,
    ) -> Result<SelectionResult> {
        let mut selected = must_use;
        let mut total = sum_values(&selected)?;
        let mut fee = target.base_fee + sum_input_fees(&selected, target.fee_rate);

        for candidate in candidates {
            if total >= required(target.amount, fee)? {
                break;
            }
            fee += candidate.input_fee(target.fee_rate);
            total = total
                .checked_add(candidate.utxo.value())
                .ok_or_else(|| Error::AmountOverflow("selected value".to_string()))?;
            selected.push(candidate);
        }

        let needed = required(target.amount, fee)?;
        if total < needed {
            return Err(Error::InsufficientFunds {
                needed,
                available: total,
            });
        }
        Ok(SelectionResult {
            selected,
            total_value: total,
            fee,
            excess: total - needed,
        })
    }

    fn branch_and_bound(
        &self,
        must_use: &[WeightedUtxo],
        candidates: &[WeightedUtxo],
        target: &SelectionTarget,
    ) -> Option<Vec<usize>> {
        let rate = target.fee_rate;
        let must_effective: i64 = must_use.iter().map(|u| u.effective_value(rate)).sum();
        let goal = (target.amount + target.base_fee) as i64 - must_effective;
        if goal <= 0 {
            return None;
        }
        let values: Vec<(i64, u64)> = candidates
            .iter()
            .map(|u| (u.effective_value(rate), u.utxo.value()))
            .collect();
        let mut search = BnbSearch {
            values: &values,
            target: goal,
            upper: goal + target.cost_of_change as i64,
            tries: BNB_TOTAL_TRIES,
            current: Vec::new(),
            best: None,
        };
        let remaining = values.iter().map(|(eff, _)| *eff).sum();
        search.explore(0, 0, 0, remaining);
        search.best.map(|(indices, _)| indices)
    }
}

struct BnbSearch<'a> {
    values: &'a [(i64, u64)],
    target: i64,
    upper: i64,
    tries: u32,
    current: Vec<usize>,
    best: Option<(Vec<usize>, u64)>,
}

impl BnbSearch<'_> {
    fn explore(&mut self, index: usize, effective: i64, value: u64, remaining: i64) {
        if self.tries == 0 || effective > self.upper {
            return;
        }
        self.tries -= 1;

        if effective >= self.target {
            let better = match &self.best {
                None => true,
                Some((best, best_value)) => match self.current.len().cmp(&best.len()) {
                    Ordering::Less => true,
                    Ordering::Equal => value < *best_value,
                    Ordering::Greater => false,
                },
            };
            if better {
                self.best = Some((self.current.clone(), value));
            }
            return;
        }
        if index >= self.values.len() || effective + remaining < self.target {
            return;
        }
        // a solution with more inputs than the best one cannot win
        if let Some((best, _)) = &self.best {
            if self.current.len() + 1 > best.len() {
                return;
            }
        }

        let (eff, val) = self.values[index];
        self.current.push(index);
        self.explore(index + 1, effective + eff, value + val, remaining - eff);
        self.current.pop();
        self.explore(index + 1, effective, value, remaining - eff);
    }
}

impl CoinSelector for UtxoSelector {
    fn select(
        &self,
        must_use: Vec<WeightedUtxo>,
        candidates: Vec<WeightedUtxo>,
        target: &SelectionTarget,
    ) -> Result<SelectionResult> {
        tracing::debug!(
            "Selecting coins: strategy={:?}, amount={}, base_fee={}, candidates={}",
            self.strategy,
            target.amount,
            target.base_fee,
            candidates.len()
        );

        // outputs that cost more to spend than they are worth never help
        let mut candidates: Vec<WeightedUtxo> = candidates
            .into_iter()
            .filter(|u| u.effective_value(target.fee_rate) > 0)
            .collect();
        Self::sort_candidates(self.strategy, &mut candidates);

        let result = if self.strategy == SelectionStrategy::BranchAndBound {
            match self.branch_and_bound(&must_use, &candidates, target) {
                Some(indices) => {
                    let mut selected = must_use;
                    let mut picked = indices.into_iter().peekable();
                    for (i, candidate) in candidates.into_iter().enumerate() {
                        if picked.peek() == Some(&i) {
                            picked.next();
                            selected.push(candidate);
                        }
                    }
                    let total = sum_values(&selected)?;
                    let fee = target.base_fee + sum_input_fees(&selected, target.fee_rate);
                    let needed = required(target.amount, fee)?;
                    SelectionResult {
                        selected,
                        total_value: total,
                        fee,
                        excess: total.saturating_sub(needed),
                    }
                }
                None => self.greedy(must_use, candidates, target)?,
            }
        } else {
            self.greedy(must_use, candidates, target)?
        };

        tracing::info!(
            "Selected {} inputs, total={}, fee={}, excess={}",
            result.selected.len(),
            result.total_value,
            result.fee,
            result.excess
        );
        Ok(result)
    }
}

fn required(amount: u64, fee: u64) -> Result<u64> {
    amount
        .checked_add(fee)
        .ok_or_else(|| Error::AmountOverflow("amount plus fee".to_string()))
}

fn sum_values(utxos: &[WeightedUtxo]) -> Result<u64> {
    utxos.iter().try_fold(0u64, |acc, u| {
        acc.checked_add(u.utxo.value())
            .ok_or_else(|| Error::AmountOverflow("selected value".to_string()))
    })
}

fn sum_input_fees(utxos: &[WeightedUtxo], rate: FeeRate) -> u64 {
    utxos.iter().map(|u| u.input_fee(rate)).sum()
}
