use serde::{Deserialize, Serialize};

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;

/// An ElGamal pair: `alpha = g^r`, `beta = m * pk^r`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    pub alpha: RistrettoPoint,
    pub beta: RistrettoPoint,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub value: RistrettoPoint,
}

// not Serialize, a private key never leaves the node that created it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateKey {
    pub value: Scalar,
    pub public_value: RistrettoPoint,
}

impl PublicKey {
    pub fn from(pk_value: &RistrettoPoint) -> PublicKey {
        PublicKey { value: *pk_value }
    }

    pub fn encrypt(&self, plaintext: &RistrettoPoint) -> Ciphertext {
        let mut csprng = OsRng;
        let randomness = Scalar::random(&mut csprng);
        self.encrypt_with(plaintext, &randomness)
    }

    pub fn encrypt_with(&self, plaintext: &RistrettoPoint, randomness: &Scalar) -> Ciphertext {
        Ciphertext {
            alpha: randomness * &RISTRETTO_BASEPOINT_TABLE,
            beta: plaintext + (self.value * randomness),
        }
    }

    pub fn reencrypt(&self, c: &Ciphertext, randomness: &Scalar) -> Ciphertext {
        Ciphertext {
            alpha: c.alpha + (randomness * &RISTRETTO_BASEPOINT_TABLE),
            beta: c.beta + (self.value * randomness),
        }
    }
}

impl PrivateKey {
    pub fn from(secret: &Scalar) -> PrivateKey {
        PrivateKey {
            value: *secret,
            public_value: secret * &RISTRETTO_BASEPOINT_TABLE,
        }
    }

    pub fn public(&self) -> PublicKey {
        PublicKey::from(&self.public_value)
    }

    pub fn decrypt(&self, c: &Ciphertext) -> RistrettoPoint {
        c.beta - (c.alpha * self.value)
    }
}
