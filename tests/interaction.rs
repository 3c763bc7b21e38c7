//! End-to-end contract-interaction scenario (spec §8 scenario 3).

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Secp256k1, SecretKey};

use opnet_tx::builders::interaction::{InteractionBuilder, InteractionParams};
use opnet_tx::builders::{BuilderConfig, UtxoReference};
use opnet_tx::challenge::ChallengeSolution;
use opnet_tx::constants::MINIMUM_AMOUNT_REWARD;
use opnet_tx::keys::signer::{LocalKeypairSigner, SignerIdentity};
use opnet_tx::keys::ClassicalKeypair;
use opnet_tx::script::{compile_target_leaf, ScriptCompilerParams};
use opnet_tx::taproot::TaprootTree;
use opnet_tx::Network;

fn signer_from_byte(byte: u8) -> LocalKeypairSigner {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
    LocalKeypairSigner::new(ClassicalKeypair::from_secret_key(&secp, sk))
}

fn mock_challenge(submitter: bitcoin::secp256k1::XOnlyPublicKey) -> ChallengeSolution {
    ChallengeSolution {
        epoch_number: 7,
        submitter_public_key: submitter,
        solution: [4u8; 32],
        salt: [5u8; 32],
        graffiti: [6u8; 32],
        difficulty: 3,
        unlock_height: 900_000,
    }
}

/// Scenario 3: a funded target UTXO, calldata 0x01020304, an all-zero
/// contract secret, and a mock challenge solution -> the first output is
/// the deterministic time-lock P2WSH reward (value = max(priorityFee,
/// MINIMUM_AMOUNT_REWARD)) and the second output returns change to the
/// sender.
#[tokio::test]
async fn interaction_produces_reward_then_change() {
    let wallet = signer_from_byte(11);
    let main_signer = wallet.x_only_public_key().unwrap();
    let submitter = signer_from_byte(12).x_only_public_key().unwrap();
    let challenge = mock_challenge(submitter);

    let params = InteractionParams {
        contract_address: "bcrt1p-placeholder".to_string(),
        compressed_calldata: vec![0x01, 0x02, 0x03, 0x04],
        contract_secret: [0u8; 32],
        challenge: challenge.clone(),
        priority_fee: 50,
        features: vec![],
        script_signer_seed: [13u8; 32],
        refund_address: wallet.controlled_address(bitcoin::Network::Regtest).unwrap(),
        passthrough_outputs: vec![],
        network: Network::Regtest,
    };

    // Recompute the expected tree output script the same way the builder
    // does, to construct a target UTXO that will pass its own validation.
    let secp = Secp256k1::new();
    let script_signer =
        ClassicalKeypair::from_deterministic_seed(&secp, &params.script_signer_seed).unwrap();
    let compiled = compile_target_leaf(&ScriptCompilerParams {
        compressed_calldata: &params.compressed_calldata,
        contract_secret: &params.contract_secret,
        challenge: &params.challenge,
        priority_fee: params.priority_fee,
        features: &params.features,
        main_signer,
        script_signer: script_signer.x_only_public_key(),
        network: params.network,
    })
    .unwrap();
    let lock_leaf = opnet_tx::script::lock_leaf::build_lock_leaf(&main_signer);
    let tree = TaprootTree::build(&secp, compiled.script, lock_leaf, main_signer).unwrap();

    let target_utxo = UtxoReference {
        txid: bitcoin::Txid::all_zeros(),
        vout: 0,
        value: 100_000,
        script_pubkey: tree.output_script(),
        address: None,
        redeem_script: None,
        witness_script: None,
        non_witness_utxo: None,
    };

    let config = BuilderConfig::new(Network::Regtest, 1.0);
    let mut builder =
        InteractionBuilder::new(config, params, &target_utxo, &wallet).unwrap();
    builder.build(&[]).unwrap();

    let expected_reward = 50u64.max(MINIMUM_AMOUNT_REWARD);
    let expected_reward_script = challenge.time_lock_address(bitcoin::Network::Regtest).script_pubkey();

    builder.sign().await.unwrap();
    let tx = builder.extract().unwrap();

    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.output.len(), 2);
    assert_eq!(tx.output[0].value.to_sat(), expected_reward);
    assert_eq!(tx.output[0].script_pubkey, expected_reward_script);
    assert!(tx.output[1].value.to_sat() < 100_000);
}
