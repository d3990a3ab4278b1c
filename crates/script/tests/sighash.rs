use blkaudit_primitives::outpoint::OutPoint;
use blkaudit_primitives::transaction::{Transaction, TxIn, TxOut};
use blkaudit_script::sighash::{
    signature_hash, PrecomputedTransactionData, SigVersion, SighashError, SighashType,
    SIGHASH_ALL, SIGHASH_SINGLE, SIGHASH_SINGLE_NO_OUTPUT,
};

fn hex_to_bytes(input: &str) -> Vec<u8> {
    assert!(input.len() % 2 == 0, "odd hex length");
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&input[i..i + 2], 16).expect("hex"))
        .collect()
}

const BIP143_P2WPKH_UNSIGNED: &str = concat!(
    "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f",
    "0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57",
    "b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85",
    "c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2",
    "f0167faa815988ac11000000"
);

fn two_in_one_out() -> Transaction {
    let input = |n: u8| TxIn {
        prevout: OutPoint::new([n; 32], 0),
        script_sig: Vec::new(),
        sequence: 0xffff_ffff,
        witness: Vec::new(),
    };
    Transaction {
        version: 1,
        vin: vec![input(1), input(2)],
        vout: vec![TxOut {
            value: 5_000,
            script_pubkey: vec![0x51],
        }],
        lock_time: 0,
    }
}

#[test]
fn bip143_native_p2wpkh_digest() {
    let tx = Transaction::consensus_decode(&hex_to_bytes(BIP143_P2WPKH_UNSIGNED)).expect("decode");
    assert_eq!(tx.vin.len(), 2);
    let script_code = hex_to_bytes("76a9141d0f172a0ecb48aee1be1f2687d2963ae33f71a188ac");
    let expected =
        hex_to_bytes("c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670");

    let digest = signature_hash(
        &tx,
        1,
        &script_code,
        600_000_000,
        SighashType(SIGHASH_ALL),
        SigVersion::WitnessV0,
        None,
    )
    .expect("sighash");
    assert_eq!(digest.to_vec(), expected);

    let precomputed = PrecomputedTransactionData::new(&tx);
    let shared = signature_hash(
        &tx,
        1,
        &script_code,
        600_000_000,
        SighashType(SIGHASH_ALL),
        SigVersion::WitnessV0,
        Some(&precomputed),
    )
    .expect("sighash");
    assert_eq!(shared, digest);
}

#[test]
fn legacy_single_without_matching_output_signs_one() {
    let tx = two_in_one_out();
    let digest = signature_hash(
        &tx,
        1,
        &[0x51],
        0,
        SighashType(SIGHASH_SINGLE),
        SigVersion::Base,
        None,
    )
    .expect("sighash");
    assert_eq!(digest, SIGHASH_SINGLE_NO_OUTPUT);

    let witness = signature_hash(
        &tx,
        1,
        &[0x51],
        0,
        SighashType(SIGHASH_SINGLE),
        SigVersion::WitnessV0,
        None,
    )
    .expect("sighash");
    assert_ne!(witness, SIGHASH_SINGLE_NO_OUTPUT);
}

#[test]
fn legacy_digest_ignores_code_separators() {
    let tx = two_in_one_out();
    let plain = signature_hash(
        &tx,
        0,
        &[0x76, 0xac],
        0,
        SighashType(SIGHASH_ALL),
        SigVersion::Base,
        None,
    )
    .expect("sighash");
    let separated = signature_hash(
        &tx,
        0,
        &[0x76, 0xab, 0xac],
        0,
        SighashType(SIGHASH_ALL),
        SigVersion::Base,
        None,
    )
    .expect("sighash");
    assert_eq!(plain, separated);
}

#[test]
fn input_index_out_of_range() {
    let tx = two_in_one_out();
    let err = signature_hash(
        &tx,
        2,
        &[],
        0,
        SighashType(SIGHASH_ALL),
        SigVersion::Base,
        None,
    )
    .expect_err("out of range");
    assert_eq!(
        err,
        SighashError::InputIndexOutOfRange {
            index: 2,
            inputs: 2
        }
    );
}
