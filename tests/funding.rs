//! End-to-end funding scenarios (spec §8 scenarios 1-2).

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Secp256k1, SecretKey};

use opnet_tx::builders::funding::{FundingBuilder, FundingParams};
use opnet_tx::builders::{BuilderConfig, UtxoReference};
use opnet_tx::keys::signer::{LocalKeypairSigner, SignerIdentity};
use opnet_tx::keys::ClassicalKeypair;
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

/// Scenario 1: one 200,000-sat UTXO, amount=100,000, splitInputsInto=3,
/// feeRate=1 sat/vB -> at least 3 outputs of ~33,333 sats plus change, and
/// the finalized transaction's vsize falls in the expected taproot-spend
/// range.
#[tokio::test]
async fn funding_split_into_three_outputs_with_change() {
    let wallet = signer_from_byte(1);
    let recipient = signer_from_byte(2)
        .controlled_address(bitcoin::Network::Regtest)
        .unwrap();
    let sender = wallet.controlled_address(bitcoin::Network::Regtest).unwrap();

    let config = BuilderConfig::new(Network::Regtest, 1.0);
    let params = FundingParams {
        to: recipient,
        refund_address: sender.clone(),
        amount: 100_000,
        split_inputs_into: 3,
        auto_adjust_amount: false,
    };
    let mut builder = FundingBuilder::new(config, params, &wallet);
    builder.build(&[utxo(200_000, &sender)]).unwrap();

    assert!(builder.outputs().len() >= 3);
    for output in builder.outputs().iter().take(3) {
        assert!((33_000..=33_400).contains(&output.value));
    }

    let vsize = builder.vsize().unwrap();
    assert!((140..=200).contains(&vsize), "vsize {vsize} out of range");

    builder.sign().await.unwrap();
    let tx = builder.extract().unwrap();
    assert_eq!(tx.input.len(), 1);
    assert!(tx.input[0].witness.len() >= 1);

    let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    assert!(total_out < 200_000);
}

/// Scenario 2: a single 100,000-sat UTXO, amount=100,000,
/// autoAdjustAmount=true, feeRate=2 sat/vB -> the fee is deducted from the
/// requested amount instead of the transaction being rejected, and the
/// resulting fee/vsize ratio tracks the requested fee rate.
#[tokio::test]
async fn funding_auto_adjust_exact_value() {
    let wallet = signer_from_byte(3);
    let sender = wallet.controlled_address(bitcoin::Network::Regtest).unwrap();

    let config = BuilderConfig::new(Network::Regtest, 2.0);
    let params = FundingParams {
        to: sender.clone(),
        refund_address: sender.clone(),
        amount: 100_000,
        split_inputs_into: 1,
        auto_adjust_amount: true,
    };
    let mut builder = FundingBuilder::new(config, params, &wallet);
    builder.build(&[utxo(100_000, &sender)]).unwrap();

    let total_out: u64 = builder.outputs().iter().map(|o| o.value).sum();
    assert!(total_out < 100_000);

    let actual_fee = 100_000 - total_out;
    let vsize = builder.vsize().unwrap();
    let ratio = actual_fee as f64 / vsize as f64;
    assert!(ratio >= 1.9, "fee/vsize ratio {ratio} below requested rate");

    builder.sign().await.unwrap();
    let tx = builder.extract().unwrap();
    assert_eq!(tx.output.len(), 1);
}
