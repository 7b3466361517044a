//! Transaction fee calculation
//!
//! Fees are priced in sat/vB on the estimated weight of the final signed
//! transaction. Input weights assume worst-case 72-byte DER signatures so an
//! estimate never undershoots the real size.

use crate::descriptor::ScriptTemplate;
use crate::{Error, Result};
use descwallet_params::RelayPolicy;
use serde::{Deserialize, Serialize};

/// Version, lock time and one-byte input/output counts, in weight units
pub const TX_OVERHEAD_WEIGHT: u64 = (4 + 4 + 1 + 1) * 4;

/// Segwit marker and flag bytes, in weight units
pub const SEGWIT_MARKER_WEIGHT: u64 = 2;

/// Default fee rate when the caller does not supply one (sat/vB)
pub const DEFAULT_FEE_RATE: f32 = 1.0;

/// Fee rate in satoshis per virtual byte
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct FeeRate(f32);

impl FeeRate {
    /// Create from sat/vB
    pub const fn from_sat_per_vb(rate: f32) -> Self {
        Self(rate)
    }

    /// Rate in sat/vB
    pub const fn as_sat_per_vb(&self) -> f32 {
        self.0
    }

    /// Fee for a transaction of `weight` weight units, rounded up
    pub fn fee_for_weight(&self, weight: u64) -> u64 {
        (weight as f64 * self.0 as f64 / 4.0).ceil() as u64
    }
}

impl Default for FeeRate {
    fn default() -> Self {
        Self(DEFAULT_FEE_RATE)
    }
}

/// Weight of one signed input spending `template`
///
/// Outpoint (36) + sequence (4) + scriptSig length and scriptSig, counted
/// four times, plus the witness stack counted once.
pub const fn input_weight(template: ScriptTemplate) -> u64 {
    match template {
        // witness: count, sig (1+72), pubkey (1+33)
        ScriptTemplate::Wpkh => (36 + 4 + 1) * 4 + (1 + 73 + 34),
        // scriptSig: push sig (1+72), push pubkey (1+33)
        ScriptTemplate::Pkh => (36 + 4 + 1 + 73 + 34) * 4,
        // scriptSig pushes the 22-byte redeem script
        ScriptTemplate::ShWpkh => (36 + 4 + 1 + 23) * 4 + (1 + 73 + 34),
        // witness: count, schnorr sig (1+64)
        ScriptTemplate::Tr => (36 + 4 + 1) * 4 + (1 + 65),
    }
}

/// Weight of one output with a script of `script_len` bytes
pub const fn output_weight(script_len: usize) -> u64 {
    (8 + varint_len(script_len) + script_len as u64) * 4
}

const fn varint_len(n: usize) -> u64 {
    if n < 0xfd {
        1
    } else if n <= 0xffff {
        3
    } else {
        5
    }
}

/// Fee calculator bound to a relay policy
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    policy: RelayPolicy,
}

impl FeeCalculator {
    /// Create new fee calculator
    pub fn new(policy: RelayPolicy) -> Self {
        Self { policy }
    }

    /// Validate a requested rate against the relay policy
    pub fn validate_fee_rate(&self, rate: FeeRate) -> Result<FeeRate> {
        if !self.policy.is_valid_fee_rate(rate.as_sat_per_vb()) {
            return Err(Error::InvalidFeeRate(format!(
                "{} sat/vB is outside [{}, {}]",
                rate.as_sat_per_vb(),
                self.policy.min_relay_fee_rate,
                self.policy.max_fee_rate
            )));
        }
        Ok(rate)
    }

    /// Weight of a transaction without inputs
    pub fn base_weight(&self, output_script_lens: &[usize], segwit: bool) -> u64 {
        let outputs: u64 = output_script_lens.iter().map(|len| output_weight(*len)).sum();
        let marker = if segwit { SEGWIT_MARKER_WEIGHT } else { 0 };
        TX_OVERHEAD_WEIGHT + outputs + marker
    }

    /// Estimate the fee of a full transaction
    pub fn estimate_fee(
        &self,
        rate: FeeRate,
        inputs: &[ScriptTemplate],
        output_script_lens: &[usize],
    ) -> u64 {
        let segwit = inputs.iter().any(ScriptTemplate::is_segwit);
        let weight = self.base_weight(output_script_lens, segwit)
            + inputs.iter().map(|t| input_weight(*t)).sum::<u64>();
        let fee = rate.fee_for_weight(weight);
        tracing::debug!("Estimated fee {} sat for weight {} at {:?}", fee, weight, rate);
        fee
    }

    /// Smallest value an output to `script_len` bytes may carry
    pub fn dust_threshold(&self, script_len: usize, spend_template: ScriptTemplate) -> u64 {
        let rate = FeeRate::from_sat_per_vb(self.policy.dust_relay_fee_rate);
        rate.fee_for_weight(output_weight(script_len) + input_weight(spend_template))
    }

    /// Relay policy in use
    pub fn policy(&self) -> &RelayPolicy {
        &self.policy
    }
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::new(RelayPolicy::mainnet())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_vsizes() {
        assert_eq!(input_weight(ScriptTemplate::Wpkh), 272); // 68 vB
        assert_eq!(input_weight(ScriptTemplate::Pkh), 592); // 148 vB
        assert_eq!(input_weight(ScriptTemplate::ShWpkh), 364); // 91 vB
        assert_eq!(input_weight(ScriptTemplate::Tr), 230); // 57.5 vB
    }

    #[test]
    fn test_output_weight() {
        // p2wpkh output: 8 + 1 + 22 bytes
        assert_eq!(output_weight(22), 124);
        // p2tr output: 8 + 1 + 34 bytes
        assert_eq!(output_weight(34), 172);
    }

    #[test]
    fn test_fee_rounds_up() {
        let rate = FeeRate::from_sat_per_vb(1.0);
        assert_eq!(rate.fee_for_weight(4), 1);
        assert_eq!(rate.fee_for_weight(5), 2);
        assert_eq!(FeeRate::from_sat_per_vb(2.5).fee_for_weight(400), 250);
    }

    #[test]
    fn test_simple_send_fee() {
        let calculator = FeeCalculator::default();
        let fee = calculator.estimate_fee(
            FeeRate::from_sat_per_vb(1.0),
            &[ScriptTemplate::Wpkh],
            &[22, 22],
        );
        // 40 + 2 + 272 + 2 * 124 = 562 WU = 140.5 vB
        assert_eq!(fee, 141);
    }

    #[test]
    fn test_more_inputs_cost_more() {
        let calculator = FeeCalculator::default();
        let rate = FeeRate::from_sat_per_vb(5.0);
        let one = calculator.estimate_fee(rate, &[ScriptTemplate::Wpkh], &[22]);
        let two = calculator.estimate_fee(rate, &[ScriptTemplate::Wpkh; 2], &[22]);
        let legacy = calculator.estimate_fee(rate, &[ScriptTemplate::Pkh], &[22]);
        assert!(two > one);
        assert!(legacy > one);
    }

    #[test]
    fn test_fee_rate_validation() {
        let calculator = FeeCalculator::default();
        assert!(calculator.validate_fee_rate(FeeRate::from_sat_per_vb(1.0)).is_ok());
        assert!(matches!(
            calculator.validate_fee_rate(FeeRate::from_sat_per_vb(0.1)),
            Err(Error::InvalidFeeRate(_))
        ));
        assert!(calculator.validate_fee_rate(FeeRate::from_sat_per_vb(50_000.0)).is_err());
    }

    #[test]
    fn test_dust_threshold() {
        let calculator = FeeCalculator::default();
        // (124 + 272) / 4 * 3 sat/vB
        assert_eq!(calculator.dust_threshold(22, ScriptTemplate::Wpkh), 297);
    }
}
