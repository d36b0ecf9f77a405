use rayon::prelude::*;

use crate::crypto::backend::ristretto_b::RistrettoGroup;
use crate::crypto::elgamal::*;

pub fn to_u8_32(input: &[u8]) -> [u8; 32] {
    assert_eq!(input.len(), 32);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&input);
    bytes
}

pub fn random_encrypt_ballots(n: usize, pk: &PublicKey) -> (Vec<Vec<u8>>, Vec<Ciphertext>) {
    let group = RistrettoGroup;
    let plaintexts: Vec<Vec<u8>> = (0..n)
        .into_par_iter()
        .map(|_| group.rnd_plaintext())
        .collect();

    let cs: Vec<Ciphertext> = plaintexts
        .par_iter()
        .map(|p| {
            // rnd_plaintext is always MAX_EMBED bytes, embedding cannot fail
            let encoded = group.embed(p).unwrap_or_else(|_| group.rnd());
            pk.encrypt(&encoded)
        })
        .collect();

    (plaintexts, cs)
}

/// First bytes of a digest or id, for log lines.
pub(crate) fn short(input: &[u8]) -> String {
    hex::encode(&input[0..input.len().min(3)])
}
