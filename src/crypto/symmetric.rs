use aes::Aes256;
use block_modes::block_padding::Pkcs7;
use block_modes::{BlockMode, Cbc};
use curve25519_dalek::ristretto::RistrettoPoint;
use generic_array::{typenum::U32, GenericArray};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::CryptoError;

type Aes256Cbc = Cbc<Aes256, Pkcs7>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Encrypted {
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub iv: Vec<u8>,
}

/// Symmetric key from a Diffie-Hellman point, bound to `context`.
pub fn derive_key(shared: &RistrettoPoint, context: &[u8]) -> GenericArray<u8, U32> {
    let mut hasher = Sha512::new();
    hasher.update(b"nevv/dh-key");
    hasher.update(shared.compress().as_bytes());
    hasher.update(context);
    let digest = hasher.finalize();

    GenericArray::clone_from_slice(&digest[0..32])
}

pub fn encrypt(key: &GenericArray<u8, U32>, data: &[u8]) -> Result<Encrypted, CryptoError> {
    let mut csprng = OsRng;
    let mut iv = [0u8; 16];
    csprng.fill_bytes(&mut iv);
    let cipher = Aes256Cbc::new_var(key, &iv)
        .map_err(|e| CryptoError::Symmetric(e.to_string()))?;

    Ok(Encrypted {
        bytes: cipher.encrypt_vec(data),
        iv: iv.to_vec(),
    })
}

pub fn decrypt(key: &GenericArray<u8, U32>, encrypted: &Encrypted) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Cbc::new_var(key, &encrypted.iv)
        .map_err(|e| CryptoError::Symmetric(e.to_string()))?;

    cipher
        .decrypt_vec(&encrypted.bytes)
        .map_err(|e| CryptoError::Symmetric(e.to_string()))
}
