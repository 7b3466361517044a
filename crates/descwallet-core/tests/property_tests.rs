//! Property-based tests for descwallet-core
//!
//! Uses proptest to verify invariants across randomized inputs

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use descwallet_core::descriptor::ScriptTemplate;
use descwallet_core::fees::input_weight;
use descwallet_core::selection::{SelectionTarget, WeightedUtxo};
use descwallet_core::{
    ChainSnapshot, ChainTx, CoinSelector, Descriptor, FeeCalculator, FeeRate, KeychainKind,
    ScriptMap, SelectionStrategy, UtxoIndex, UtxoSelector, Utxo,
};
use descwallet_params::NetworkType;
use proptest::prelude::*;
use std::collections::BTreeSet;

const TPRV: &str = "tprv8ZgxMBicQKsPexGYyaFwnAsCXCjmz2FaTm6LtesyyihjbQE3gRMfXqQBXKM43DvC1UgRVv1qom1qFxNMSqVAs88qx9PhgFnfGVUdiiDf6j4";

// ============================================================================
// Property Test Strategies
// ============================================================================

fn template_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("pkh"), Just("wpkh"), Just("sh-wpkh"), Just("tr")]
}

fn descriptor(template: &str) -> Descriptor {
    let key = format!("{}/84'/1'/0'/0/*", TPRV);
    let text = match template {
        "sh-wpkh" => format!("sh(wpkh({}))", key),
        other => format!("{}({})", other, key),
    };
    Descriptor::parse(&text).unwrap()
}

/// UTXO values between dust and 1 BTC
fn values_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1_000u64..100_000_000, 1..12)
}

fn weighted(values: &[u64]) -> Vec<WeightedUtxo> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| WeightedUtxo {
            utxo: Utxo {
                outpoint: OutPoint::new(Txid::from_byte_array([i as u8; 32]), i as u32),
                txout: TxOut {
                    value: Amount::from_sat(*value),
                    script_pubkey: ScriptBuf::new(),
                },
                keychain: KeychainKind::External,
                derivation_index: i as u32,
                confirmation_height: Some(100 + i as u32),
            },
            input_weight: input_weight(ScriptTemplate::Wpkh),
        })
        .collect()
}

fn strategy_strategy() -> impl Strategy<Value = SelectionStrategy> {
    prop_oneof![
        Just(SelectionStrategy::FirstFit),
        Just(SelectionStrategy::SmallestFirst),
        Just(SelectionStrategy::LargestFirst),
        Just(SelectionStrategy::OldestFirst),
        Just(SelectionStrategy::BranchAndBound),
    ]
}

// ============================================================================
// Descriptor Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: derivation is a pure function of descriptor, index and network
    #[test]
    fn prop_derive_script_deterministic(
        template in template_strategy(),
        index in 0u32..0x8000_0000
    ) {
        let desc = descriptor(template);
        let a = desc.derive_script(index, NetworkType::Regtest).unwrap();
        let b = desc.derive_script(index, NetworkType::Regtest).unwrap();
        prop_assert_eq!(&a, &b);

        let reparsed = Descriptor::parse(&desc.to_string_with_secret().unwrap()).unwrap();
        prop_assert_eq!(reparsed.derive_script(index, NetworkType::Regtest).unwrap(), a);
    }

    /// Property: public form derives the same scripts
    #[test]
    fn prop_public_descriptor_matches(
        template in template_strategy(),
        index in 0u32..1_000
    ) {
        let desc = descriptor(template);
        let public = Descriptor::parse(&desc.to_public_string().unwrap()).unwrap();
        prop_assert!(!public.has_private_key());
        prop_assert_eq!(
            public.derive_script(index, NetworkType::Regtest).unwrap(),
            desc.derive_script(index, NetworkType::Regtest).unwrap()
        );
    }

    /// Property: next index is above every used and revealed index
    #[test]
    fn prop_next_unused_index_is_fresh(
        used in prop::collection::btree_set(0u32..10_000, 0..20),
        last_revealed in prop::option::of(0u32..10_000)
    ) {
        let desc = descriptor("wpkh");
        let next = desc.next_unused_index(&used, last_revealed);
        prop_assert!(used.iter().all(|i| next > *i));
        prop_assert!(last_revealed.map_or(true, |r| next > r));
    }
}

// ============================================================================
// Selection And Fee Properties
// ============================================================================

proptest! {
    /// Property: a successful selection pays the amount and the fee
    #[test]
    fn prop_selection_covers_target(
        values in values_strategy(),
        strategy in strategy_strategy(),
        fraction in 1u64..100,
        rate in 1u32..50
    ) {
        let candidates = weighted(&values);
        let total: u64 = values.iter().sum();
        let target = SelectionTarget {
            amount: total * fraction / 200,
            base_fee: 50 * rate as u64,
            fee_rate: FeeRate::from_sat_per_vb(rate as f32),
            cost_of_change: 100 * rate as u64,
        };
        if let Ok(result) = UtxoSelector::new(strategy).select(Vec::new(), candidates, &target) {
            let selected: u64 = result.selected.iter().map(|u| u.utxo.value()).sum();
            prop_assert_eq!(selected, result.total_value);
            prop_assert_eq!(result.total_value, target.amount + result.fee + result.excess);
            let outpoints: BTreeSet<_> = result.selected.iter().map(|u| u.utxo.outpoint).collect();
            prop_assert_eq!(outpoints.len(), result.selected.len());
        }
    }

    /// Property: higher rates never lower the fee
    #[test]
    fn prop_fee_monotonic_in_rate(
        inputs in 1usize..20,
        outputs in 1usize..10,
        low in 1u32..500,
        step in 0u32..500
    ) {
        let calculator = FeeCalculator::default();
        let templates = vec![ScriptTemplate::Wpkh; inputs];
        let lens = vec![22usize; outputs];
        let a = calculator.estimate_fee(FeeRate::from_sat_per_vb(low as f32), &templates, &lens);
        let b = calculator.estimate_fee(FeeRate::from_sat_per_vb((low + step) as f32), &templates, &lens);
        prop_assert!(b >= a);
    }
}

// ============================================================================
// Index Properties
// ============================================================================

fn funding_tx(values: &[u64], scripts: &[ScriptBuf]) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([0xab; 32]), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: values
            .iter()
            .enumerate()
            .map(|(i, v)| TxOut {
                value: Amount::from_sat(*v),
                script_pubkey: scripts[i % scripts.len()].clone(),
            })
            .collect(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: balance equals the sum of unspent outputs, and re-applying
    /// the same chain data changes nothing
    #[test]
    fn prop_balance_is_sum_and_apply_idempotent(
        values in values_strategy(),
        height in prop::option::of(1u32..800_000)
    ) {
        let owned: Vec<ScriptBuf> = (0..3u8)
            .map(|n| ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([n; 20])))
            .collect();
        let foreign = ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([0xff; 20]));
        let mut all = owned.clone();
        all.push(foreign);

        let scripts: ScriptMap = owned
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), (KeychainKind::External, i as u32)))
            .collect();
        let chain = ChainSnapshot {
            tip_height: height.unwrap_or(0),
            transactions: vec![ChainTx {
                tx: funding_tx(&values, &all),
                height,
                block_time: height.map(|h| 1_500_000_000 + h as u64),
            }],
        };

        let index = UtxoIndex::default();
        index.apply_sync_result(scripts.clone(), chain.clone());
        let first = index.snapshot();
        let unspent: Vec<Utxo> = first.list_unspent().collect();
        prop_assert_eq!(first.balance(), unspent.iter().map(Utxo::value).sum::<u64>());

        let delta = index.apply_sync_result(scripts, chain);
        prop_assert!(delta.is_empty());
        let second: Vec<Utxo> = index.snapshot().list_unspent().collect();
        prop_assert_eq!(unspent, second);
    }
}
