//! Fee-bump monotonicity (spec §8 scenario 6, §4.6 "Fee bump").

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Secp256k1, SecretKey};

use opnet_tx::builders::funding::{FundingBuilder, FundingParams};
use opnet_tx::builders::{BuilderConfig, UtxoReference};
use opnet_tx::keys::signer::{LocalKeypairSigner, SignerIdentity};
use opnet_tx::keys::ClassicalKeypair;
use opnet_tx::state::reconstruct::rebuild_with_new_fees;
use opnet_tx::Network;

fn signer_from_byte(byte: u8) -> LocalKeypairSigner {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
    LocalKeypairSigner::new(ClassicalKeypair::from_secret_key(&secp, sk))
}

fn utxo(value: u64, address: &bitcoin::Address) -> UtxoReference {
    UtxoReference {
        txid: bitcoin::Txid::all_zeros(),
        vout: 0,
        value,
        script_pubkey: address.script_pubkey(),
        address: Some(address.clone()),
        redeem_script: None,
        witness_script: None,
        non_witness_utxo: None,
    }
}

/// Scenario 6: export a funding state at feeRate=5, `rebuildWithNewFees`
/// to 25, re-sign -> the new fee is at least 5x the old fee (minus a small
/// rounding epsilon), while the input/output structure is unchanged.
#[tokio::test]
async fn fee_bump_raises_fee_proportionally() {
    let wallet = signer_from_byte(41);
    let sender = wallet.controlled_address(bitcoin::Network::Regtest).unwrap();

    let low_fee_config = BuilderConfig::new(Network::Regtest, 5.0);
    let params = FundingParams {
        to: sender.clone(),
        refund_address: sender.clone(),
        amount: 60_000,
        split_inputs_into: 1,
        auto_adjust_amount: false,
    };
    let available = vec![utxo(150_000, &sender)];

    let mut low_fee_builder = FundingBuilder::new(low_fee_config, params.clone(), &wallet);
    low_fee_builder.build(&available).unwrap();
    let low_fee_state = low_fee_builder.export_state(0, 1_700_000_000);
    low_fee_builder.sign().await.unwrap();
    let low_fee_tx = low_fee_builder.extract().unwrap();
    let old_fee = 150_000 - low_fee_tx.output.iter().map(|o| o.value.to_sat()).sum::<u64>();

    let bumped_state = rebuild_with_new_fees(&low_fee_state, 25.0);
    assert_eq!(bumped_state.base_params.fee_rate, 25.0);

    let mut bumped_builder = FundingBuilder::from_state(&bumped_state, &wallet).unwrap();
    bumped_builder.sign().await.unwrap();
    let bumped_tx = bumped_builder.extract().unwrap();
    let new_fee = 150_000 - bumped_tx.output.iter().map(|o| o.value.to_sat()).sum::<u64>();

    assert!(
        new_fee as f64 >= old_fee as f64 * 5.0 - 2.0,
        "new_fee={new_fee} old_fee={old_fee}"
    );
    assert_eq!(bumped_tx.input.len(), low_fee_tx.input.len());
    assert_eq!(bumped_tx.output.len(), low_fee_tx.output.len());
}
