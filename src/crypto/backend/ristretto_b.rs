use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::digest::{ExtendableOutputDirty, Update, XofReader};
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use sha3::Shake256;

use crate::crypto::elgamal::PrivateKey;
use crate::error::CryptoError;
use crate::util;

/// Maximum number of message bytes that fit into one group element.
pub const MAX_EMBED: usize = 29;

const PEDERSEN_H_LABEL: &[u8] = b"nevv/dkg/pedersen-h";

/// The prime order group used throughout: ristretto255.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RistrettoGroup;

impl RistrettoGroup {
    pub fn generator(&self) -> &RistrettoPoint {
        &RISTRETTO_BASEPOINT_POINT
    }
    pub fn gmod_pow(&self, other: &Scalar) -> RistrettoPoint {
        other * &RISTRETTO_BASEPOINT_TABLE
    }
    pub fn rnd(&self) -> RistrettoPoint {
        let mut rng = OsRng;
        RistrettoPoint::random(&mut rng)
    }
    pub fn rnd_exp(&self) -> Scalar {
        let mut rng = OsRng;
        Scalar::random(&mut rng)
    }
    pub fn rnd_plaintext(&self) -> Vec<u8> {
        let mut csprng = OsRng;
        let mut value = [0u8; MAX_EMBED];
        csprng.fill_bytes(&mut value);

        value.to_vec()
    }

    /// Embeds up to `MAX_EMBED` bytes into a point.
    ///
    /// Byte 1 holds the length and the data follows it; bytes 0 and 31 are
    /// varied until the buffer is a canonical ristretto encoding.
    pub fn embed(&self, data: &[u8]) -> Result<RistrettoPoint, CryptoError> {
        if data.len() > MAX_EMBED {
            return Err(CryptoError::Embed(data.len()));
        }
        let mut bytes = [0u8; 32];
        bytes[1] = data.len() as u8;
        bytes[2..2 + data.len()].copy_from_slice(data);
        for j in 0..64 {
            bytes[31] = j as u8;
            for i in 0..128 {
                bytes[0] = 2 * i as u8;
                if let Some(point) = CompressedRistretto(bytes).decompress() {
                    return Ok(point);
                }
            }
        }

        Err(CryptoError::Embed(data.len()))
    }

    pub fn extract(&self, element: &RistrettoPoint) -> Result<Vec<u8>, CryptoError> {
        let compressed = element.compress();
        let bytes = compressed.as_bytes();
        let len = bytes[1] as usize;
        if len > MAX_EMBED {
            return Err(CryptoError::Extract(len));
        }

        Ok(bytes[2..2 + len].to_vec())
    }

    pub fn gen_key(&self) -> PrivateKey {
        let secret = self.rnd_exp();
        PrivateKey::from(&secret)
    }

    // https://docs.rs/bulletproofs/4.0.0/src/bulletproofs/generators.rs.html
    pub fn generators(&self, size: usize, label: &[u8]) -> Vec<RistrettoPoint> {
        let mut ret: Vec<RistrettoPoint> = Vec::with_capacity(size);
        let mut shake = Shake256::default();
        shake.update(label);

        let mut reader = shake.finalize_xof_dirty();
        for _ in 0..size {
            let mut uniform_bytes = [0u8; 64];
            reader.read(&mut uniform_bytes);
            let g = RistrettoPoint::from_uniform_bytes(&uniform_bytes);
            ret.push(g);
        }

        ret
    }

    /// Second base for Pedersen commitments, with unknown discrete log wrt g.
    pub fn pedersen_h(&self) -> RistrettoPoint {
        let mut uniform_bytes = [0u8; 64];
        let mut shake = Shake256::default();
        shake.update(PEDERSEN_H_LABEL);
        shake.finalize_xof_dirty().read(&mut uniform_bytes);

        RistrettoPoint::from_uniform_bytes(&uniform_bytes)
    }

    pub fn decompress(&self, bytes: &[u8]) -> Result<RistrettoPoint, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::MalformedPoint(format!("{} bytes", bytes.len())));
        }
        CompressedRistretto(util::to_u8_32(bytes))
            .decompress()
            .ok_or_else(|| CryptoError::MalformedPoint(hex::encode(bytes)))
    }
}
