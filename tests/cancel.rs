//! End-to-end cancel scenario (spec §8 scenario 4).

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::ScriptBuf;

use opnet_tx::builders::cancel::{CancelBuilder, CancelParams};
use opnet_tx::builders::{BuilderConfig, UtxoReference};
use opnet_tx::keys::signer::{LocalKeypairSigner, SignerIdentity};
use opnet_tx::keys::ClassicalKeypair;
use opnet_tx::script::lock_leaf::build_lock_leaf;
use opnet_tx::taproot::TaprootTree;
use opnet_tx::Network;

fn signer_from_byte(byte: u8) -> LocalKeypairSigner {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
    LocalKeypairSigner::new(ClassicalKeypair::from_secret_key(&secp, sk))
}

/// Scenario 4: an abandoned target output is recovered by spending the
/// lock leaf. A single refund output carries the remainder minus fee, and
/// the witness stack is exactly signature + lock-leaf script + control
/// block.
#[tokio::test]
async fn cancel_recovers_abandoned_output() {
    let wallet = signer_from_byte(21);
    let main_signer = wallet.x_only_public_key().unwrap();
    let target_leaf_script = ScriptBuf::from_bytes(vec![0x51]);
    let lock_leaf = build_lock_leaf(&main_signer);

    let secp = Secp256k1::new();
    let tree = TaprootTree::build(&secp, target_leaf_script.clone(), lock_leaf, main_signer).unwrap();

    let target_utxo = UtxoReference {
        txid: bitcoin::Txid::all_zeros(),
        vout: 0,
        value: 80_000,
        script_pubkey: tree.output_script(),
        address: None,
        redeem_script: None,
        witness_script: None,
        non_witness_utxo: None,
    };

    let refund_address = wallet.controlled_address(bitcoin::Network::Regtest).unwrap();
    let params = CancelParams {
        target_leaf_script,
        main_signer_pubkey: main_signer,
        refund_address,
        network: Network::Regtest,
    };

    let config = BuilderConfig::new(Network::Regtest, 1.0);
    let mut builder = CancelBuilder::new(config, params, &target_utxo, &wallet).unwrap();
    builder.build(&[]).unwrap();
    builder.sign().await.unwrap();
    let tx = builder.extract().unwrap();

    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.output.len(), 1);
    assert!(tx.output[0].value.to_sat() < 80_000);
    assert_eq!(tx.input[0].witness.len(), 3);
}
