//! Fee Estimator (spec §4.4, §2 L2).
//!
//! Converges the refund/change output to `totalInputs - nonRefundOutputs -
//! targetFee`, dropping change into the fee when it would be dust, and
//! re-estimating vsize until the witness shape stabilizes (at most
//! [`crate::constants::MAX_FEE_LOOP_ITERATIONS`] iterations).

pub mod dimensions;

use crate::constants::MAX_FEE_LOOP_ITERATIONS;
use crate::error::{OpnetTxError, Result};

/// Per-input witness shape the estimator needs to size a spend.
#[derive(Debug, Clone)]
pub enum InputDimensions {
    /// Taproot key-path spend: one Schnorr signature.
    KeyPath,
    /// Target-leaf script-path spend (spec §4.2).
    TargetLeaf { leaf_script_len: usize, tree_depth: u8 },
    /// Lock-leaf (cancel) script-path spend.
    Cancel { lock_leaf_script_len: usize, tree_depth: u8 },
    /// A witness field input whose exact witness component lengths are
    /// already known (P2WDA, consolidated-interaction reveal).
    Explicit { witness_components: Vec<usize> },
}

impl InputDimensions {
    fn witness_components(&self) -> Vec<usize> {
        match self {
            InputDimensions::KeyPath => dimensions::key_path_witness_components(false),
            InputDimensions::TargetLeaf {
                leaf_script_len,
                tree_depth,
            } => dimensions::target_leaf_witness_components(*leaf_script_len, *tree_depth),
            InputDimensions::Cancel {
                lock_leaf_script_len,
                tree_depth,
            } => dimensions::cancel_witness_components(*lock_leaf_script_len, *tree_depth),
            InputDimensions::Explicit {
                witness_components, ..
            } => witness_components.clone(),
        }
    }
}

/// Estimate the virtual size of a transaction with the given inputs and
/// output script lengths.
pub fn estimate_vsize(inputs: &[InputDimensions], output_script_lens: &[usize]) -> usize {
    let mut base_weight = dimensions::TX_OVERHEAD_SIZE * 4;
    let mut witness_weight = 0usize;
    let mut has_witness = false;

    for input in inputs {
        let components = input.witness_components();
        if !components.is_empty() {
            has_witness = true;
        }
        base_weight += dimensions::input_weight(&components) - components_witness_weight(&components);
        witness_weight += components_witness_weight(&components);
    }

    for &len in output_script_lens {
        base_weight += dimensions::output_weight(len);
    }

    dimensions::vsize_from_weight(base_weight, witness_weight, has_witness)
}

fn components_witness_weight(components: &[usize]) -> usize {
    if components.is_empty() {
        return 0;
    }
    bitcoin::VarInt(components.len() as u64).size()
        + components
            .iter()
            .map(|&len| bitcoin::VarInt(len as u64).size() + len)
            .sum::<usize>()
}

/// Ceiling division for fee = rate * vsize with a decimal rate.
pub fn ceil_fee(vsize: usize, fee_rate_sat_per_vb: f64) -> u64 {
    (vsize as f64 * fee_rate_sat_per_vb).ceil() as u64
}

/// Outcome of a converged fee-estimation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeEstimate {
    pub fee: u64,
    pub vsize: usize,
    /// `Some(amount)` when a refund/change output survives; `None` when it
    /// was dropped for being dust and absorbed into the fee.
    pub refund_amount: Option<u64>,
}

/// Run the iterative vsize -> fee -> refund loop (spec §4.4).
///
/// `inputs` and `non_refund_output_lens` describe the transaction shape
/// excluding the refund output; `refund_script_len` is the script length
/// the refund output would have if kept.
pub fn converge(
    inputs: &[InputDimensions],
    non_refund_output_lens: &[usize],
    total_input_value: u64,
    non_refund_output_value: u64,
    fee_rate_sat_per_vb: f64,
    refund_script_len: usize,
    dust_threshold: u64,
) -> Result<FeeEstimate> {
    let vsize_with_change = {
        let mut lens = non_refund_output_lens.to_vec();
        lens.push(refund_script_len);
        estimate_vsize(inputs, &lens)
    };
    let vsize_without_change = estimate_vsize(inputs, non_refund_output_lens);

    let mut with_change = true;
    let mut last_with_change_fee: Option<u64> = None;
    let mut last_without_change_fee: Option<u64> = None;

    for _ in 0..MAX_FEE_LOOP_ITERATIONS {
        if with_change {
            let fee = ceil_fee(vsize_with_change, fee_rate_sat_per_vb).max(1);
            last_with_change_fee = Some(fee);
            let spendable = total_input_value
                .checked_sub(non_refund_output_value)
                .ok_or(OpnetTxError::InsufficientFunds {
                    inputs: total_input_value,
                    required: non_refund_output_value,
                })?;
            if spendable < fee {
                return Err(OpnetTxError::InsufficientFunds {
                    inputs: total_input_value,
                    required: non_refund_output_value + fee,
                });
            }
            let change = spendable - fee;
            if change < dust_threshold {
                // Tie-break: prefer "without change" (bound fee upward).
                with_change = false;
                continue;
            }
            return Ok(FeeEstimate {
                fee,
                vsize: vsize_with_change,
                refund_amount: Some(change),
            });
        } else {
            let fee_at_rate = ceil_fee(vsize_without_change, fee_rate_sat_per_vb).max(1);
            last_without_change_fee = Some(fee_at_rate);
            let spendable =
                total_input_value
                    .checked_sub(non_refund_output_value)
                    .ok_or(OpnetTxError::InsufficientFunds {
                        inputs: total_input_value,
                        required: non_refund_output_value,
                    })?;
            if spendable == 0 {
                return Err(OpnetTxError::InsufficientFunds {
                    inputs: total_input_value,
                    required: non_refund_output_value + fee_at_rate,
                });
            }
            // Absorb the whole remainder into the fee; this tolerates
            // small estimation shortfalls as long as the effective fee is
            // positive (spec §4.4 "Tie-breaks").
            return Ok(FeeEstimate {
                fee: spendable,
                vsize: vsize_without_change,
                refund_amount: None,
            });
        }
    }

    // Oscillation guard (spec §9 Open Question 2): fall back to the lower
    // of the two observed fees, preferring "without change".
    match (last_without_change_fee, last_with_change_fee) {
        (Some(fee), _) => Ok(FeeEstimate {
            fee,
            vsize: vsize_without_change,
            refund_amount: None,
        }),
        (None, Some(fee)) => Ok(FeeEstimate {
            fee,
            vsize: vsize_with_change,
            refund_amount: None,
        }),
        (None, None) => Err(OpnetTxError::InsufficientFunds {
            inputs: total_input_value,
            required: non_refund_output_value,
        }),
    }
}
