use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::Serialize;
use sha2::{Digest, Sha512};

use crate::crypto::elgamal::Ciphertext;

pub type Hash = [u8; 64];

pub fn hash<T: Serialize>(data: &T) -> Result<Hash, bincode::Error> {
    let bytes = bincode::serialize(data)?;
    let mut hasher = Sha512::new();
    hasher.update(&bytes);

    let mut ret = [0u8; 64];
    ret.copy_from_slice(&hasher.finalize());
    Ok(ret)
}

/// Fiat-Shamir transcript. Everything a challenge depends on must be
/// absorbed before the challenge is drawn.
#[derive(Clone)]
pub struct Transcript {
    hasher: Sha512,
}

impl Transcript {
    pub fn new(domain: &[u8]) -> Transcript {
        let mut ret = Transcript {
            hasher: Sha512::new(),
        };
        ret.bytes(domain);
        ret
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update(&(data.len() as u64).to_le_bytes());
        self.hasher.update(data);
        self
    }

    pub fn point(&mut self, point: &RistrettoPoint) -> &mut Self {
        self.hasher.update(point.compress().as_bytes());
        self
    }

    pub fn points(&mut self, points: &[RistrettoPoint]) -> &mut Self {
        self.hasher.update(&(points.len() as u64).to_le_bytes());
        for p in points {
            self.point(p);
        }
        self
    }

    pub fn scalar(&mut self, scalar: &Scalar) -> &mut Self {
        self.hasher.update(scalar.as_bytes());
        self
    }

    pub fn ciphertexts(&mut self, cs: &[Ciphertext]) -> &mut Self {
        self.hasher.update(&(cs.len() as u64).to_le_bytes());
        for c in cs {
            self.point(&c.alpha);
            self.point(&c.beta);
        }
        self
    }

    pub fn challenge(&self) -> Scalar {
        Scalar::from_hash(self.hasher.clone())
    }

    /// `n` independent challenges, one per counter value.
    pub fn challenges(&self, n: usize) -> Vec<Scalar> {
        (0..n)
            .map(|i| {
                let mut hasher = self.hasher.clone();
                hasher.update(&(i as u64).to_le_bytes());
                Scalar::from_hash(hasher)
            })
            .collect()
    }
}
