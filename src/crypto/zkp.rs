use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use crate::crypto::backend::ristretto_b::RistrettoGroup;
use crate::crypto::hashing::Transcript;

/// Proof of knowledge of `x` such that `public = g^x`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Schnorr {
    pub commitment: RistrettoPoint,
    pub challenge: Scalar,
    pub response: Scalar,
}

/// Proof that `log_g(public1) == log_g2(public2)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChaumPedersen {
    pub commitment1: RistrettoPoint,
    pub commitment2: RistrettoPoint,
    pub challenge: Scalar,
    pub response: Scalar,
}

fn schnorr_challenge(
    public: &RistrettoPoint,
    commitment: &RistrettoPoint,
    label: &[u8],
) -> Scalar {
    let group = RistrettoGroup;
    let mut transcript = Transcript::new(b"nevv/schnorr");
    transcript
        .bytes(label)
        .point(group.generator())
        .point(public)
        .point(commitment);
    transcript.challenge()
}

fn cp_challenge(
    g2: &RistrettoPoint,
    public1: &RistrettoPoint,
    public2: &RistrettoPoint,
    commitment1: &RistrettoPoint,
    commitment2: &RistrettoPoint,
    label: &[u8],
) -> Scalar {
    let group = RistrettoGroup;
    let mut transcript = Transcript::new(b"nevv/chaum-pedersen");
    transcript
        .bytes(label)
        .point(group.generator())
        .point(g2)
        .point(public1)
        .point(public2)
        .point(commitment1)
        .point(commitment2);
    transcript.challenge()
}

impl RistrettoGroup {
    pub fn schnorr_prove(&self, secret: &Scalar, public: &RistrettoPoint, label: &[u8]) -> Schnorr {
        let r = self.rnd_exp();
        let commitment = self.gmod_pow(&r);
        let challenge = schnorr_challenge(public, &commitment, label);
        let response = r + challenge * secret;

        Schnorr {
            commitment,
            challenge,
            response,
        }
    }

    pub fn schnorr_verify(&self, public: &RistrettoPoint, proof: &Schnorr, label: &[u8]) -> bool {
        let challenge = schnorr_challenge(public, &proof.commitment, label);
        let lhs = self.gmod_pow(&proof.response);
        let rhs = proof.commitment + (public * challenge);

        challenge == proof.challenge && lhs == rhs
    }

    pub fn cp_prove(
        &self,
        secret: &Scalar,
        public1: &RistrettoPoint,
        public2: &RistrettoPoint,
        g2: &RistrettoPoint,
        label: &[u8],
    ) -> ChaumPedersen {
        let r = self.rnd_exp();
        let commitment1 = self.gmod_pow(&r);
        let commitment2 = g2 * r;
        let challenge = cp_challenge(g2, public1, public2, &commitment1, &commitment2, label);
        let response = r + challenge * secret;

        ChaumPedersen {
            commitment1,
            commitment2,
            challenge,
            response,
        }
    }

    pub fn cp_verify(
        &self,
        public1: &RistrettoPoint,
        public2: &RistrettoPoint,
        g2: &RistrettoPoint,
        proof: &ChaumPedersen,
        label: &[u8],
    ) -> bool {
        let challenge = cp_challenge(
            g2,
            public1,
            public2,
            &proof.commitment1,
            &proof.commitment2,
            label,
        );

        let ok1 = self.gmod_pow(&proof.response) == proof.commitment1 + (public1 * challenge);
        let ok2 = g2 * proof.response == proof.commitment2 + (public2 * challenge);

        challenge == proof.challenge && ok1 && ok2
    }
}

#[cfg(test)]
mod tests {
    use crate::crypto::backend::ristretto_b::RistrettoGroup;

    #[test]
    fn test_ristretto_schnorr() {
        let group = RistrettoGroup;
        let secret = group.rnd_exp();
        let public = group.gmod_pow(&secret);
        let schnorr = group.schnorr_prove(&secret, &public, b"ctx");
        let verified = group.schnorr_verify(&public, &schnorr, b"ctx");
        assert!(verified == true);

        let public_false = group.gmod_pow(&group.rnd_exp());
        let verified_false = group.schnorr_verify(&public_false, &schnorr, b"ctx");
        assert!(verified_false == false);
        let wrong_label = group.schnorr_verify(&public, &schnorr, b"other");
        assert!(wrong_label == false);
    }

    #[test]
    fn test_ristretto_chaumpedersen() {
        let group = RistrettoGroup;
        let g2 = group.rnd();
        let secret = group.rnd_exp();
        let public1 = group.gmod_pow(&secret);
        let public2 = g2 * secret;
        let proof = group.cp_prove(&secret, &public1, &public2, &g2, &vec![]);
        let verified = group.cp_verify(&public1, &public2, &g2, &proof, &vec![]);
        assert!(verified == true);

        let public_false = group.gmod_pow(&group.rnd_exp());
        let verified_false = group.cp_verify(&public1, &public_false, &g2, &proof, &vec![]);
        assert!(verified_false == false);
    }
}
