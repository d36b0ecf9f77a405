use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::{MultiscalarMul, VartimeMultiscalarMul};

use crate::crypto::backend::ristretto_b::RistrettoGroup;
use crate::crypto::elgamal::{Ciphertext, PublicKey};
use crate::crypto::hashing::Transcript;
use crate::error::CryptoError;

/// Commitments sent by the prover before the challenge.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TValues {
    pub t1: RistrettoPoint,
    pub t2: RistrettoPoint,
    pub t3: RistrettoPoint,
    pub t4_alpha: RistrettoPoint,
    pub t4_beta: RistrettoPoint,
    pub t_hats: Vec<RistrettoPoint>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Responses {
    pub s1: Scalar,
    pub s2: Scalar,
    pub s3: Scalar,
    pub s4: Scalar,
    pub s_hats: Vec<Scalar>,
    pub s_primes: Vec<Scalar>,
}

/// Terelius-Wikström proof of shuffle, non-interactive via Fiat-Shamir.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ShuffleProof {
    pub t: TValues,
    pub s: Responses,
    // permutation commitment
    pub cs: Vec<RistrettoPoint>,
    // commitment chain
    pub c_hats: Vec<RistrettoPoint>,
}

/// Output position `i` holds the re-encryption of input `perm[i]`.
pub type Permutation = Vec<usize>;

pub struct Shuffler<'a> {
    pub pk: &'a PublicKey,
    /// `h` followed by `h_1..h_N`, independent of g.
    pub generators: &'a [RistrettoPoint],
}

impl<'a> Shuffler<'a> {
    pub fn gen_shuffle(&self, ciphertexts: &[Ciphertext]) -> (Vec<Ciphertext>, Vec<Scalar>, Permutation) {
        let group = RistrettoGroup;
        let mut perm: Permutation = (0..ciphertexts.len()).collect();
        perm.shuffle(&mut OsRng);

        let rs: Vec<Scalar> = (0..ciphertexts.len())
            .into_par_iter()
            .map(|_| group.rnd_exp())
            .collect();

        let e_primes = perm
            .par_iter()
            .zip(rs.par_iter())
            .map(|(j, r)| self.pk.reencrypt(&ciphertexts[*j], r))
            .collect();

        (e_primes, rs, perm)
    }

    pub fn gen_proof(
        &self,
        es: &[Ciphertext],
        e_primes: &[Ciphertext],
        r_primes: &[Scalar],
        perm: &[usize],
        label: &[u8],
    ) -> ShuffleProof {
        let group = RistrettoGroup;
        let n = es.len();
        let h = self.generators[0];
        let hs = &self.generators[1..n + 1];

        let (cs, rs) = self.gen_commitments(perm, hs);

        let us = self.u_challenges(es, e_primes, &cs, label);
        let u_primes: Vec<Scalar> = perm.iter().map(|j| us[*j]).collect();

        let (c_hats, r_hats) = self.gen_commitment_chain(&h, &u_primes);

        let r_bar: Scalar = rs.iter().sum();

        let mut vs = vec![Scalar::one(); n];
        for i in (0..n.saturating_sub(1)).rev() {
            vs[i] = u_primes[i + 1] * vs[i + 1];
        }
        let r_hat: Scalar = r_hats.iter().zip(vs.iter()).map(|(r, v)| r * v).sum();
        let r_tilde: Scalar = rs.iter().zip(us.iter()).map(|(r, u)| r * u).sum();
        let r_prime: Scalar = r_primes.iter().zip(u_primes.iter()).map(|(r, u)| r * u).sum();

        let omegas: Vec<Scalar> = (0..4).map(|_| group.rnd_exp()).collect();
        let omega_hats: Vec<Scalar> = (0..n).map(|_| group.rnd_exp()).collect();
        let omega_primes: Vec<Scalar> = (0..n).map(|_| group.rnd_exp()).collect();

        let t1 = group.gmod_pow(&omegas[0]);
        let t2 = group.gmod_pow(&omegas[1]);
        let t3 = group.gmod_pow(&omegas[2]) + RistrettoPoint::multiscalar_mul(&omega_primes, hs);
        let t4_alpha = -group.gmod_pow(&omegas[3])
            + RistrettoPoint::multiscalar_mul(&omega_primes, e_primes.iter().map(|e| e.alpha));
        let t4_beta = -(self.pk.value * omegas[3])
            + RistrettoPoint::multiscalar_mul(&omega_primes, e_primes.iter().map(|e| e.beta));

        let t_hats: Vec<RistrettoPoint> = (0..n)
            .into_par_iter()
            .map(|i| {
                let previous = if i == 0 { h } else { c_hats[i - 1] };
                group.gmod_pow(&omega_hats[i]) + (previous * omega_primes[i])
            })
            .collect();

        let t = TValues {
            t1,
            t2,
            t3,
            t4_alpha,
            t4_beta,
            t_hats,
        };
        let c = self.challenge(es, e_primes, &cs, &c_hats, &t, label);

        let s1 = omegas[0] + c * r_bar;
        let s2 = omegas[1] + c * r_hat;
        let s3 = omegas[2] + c * r_tilde;
        let s4 = omegas[3] + c * r_prime;
        let s_hats = omega_hats
            .iter()
            .zip(r_hats.iter())
            .map(|(w, r)| w + c * r)
            .collect();
        let s_primes = omega_primes
            .iter()
            .zip(u_primes.iter())
            .map(|(w, u)| w + c * u)
            .collect();

        let s = Responses {
            s1,
            s2,
            s3,
            s4,
            s_hats,
            s_primes,
        };

        ShuffleProof { t, s, cs, c_hats }
    }

    pub fn check_proof(
        &self,
        proof: &ShuffleProof,
        es: &[Ciphertext],
        e_primes: &[Ciphertext],
        label: &[u8],
    ) -> bool {
        let group = RistrettoGroup;
        let n = es.len();
        if n < 2
            || e_primes.len() != n
            || self.generators.len() < n + 1
            || proof.cs.len() != n
            || proof.c_hats.len() != n
            || proof.t.t_hats.len() != n
            || proof.s.s_hats.len() != n
            || proof.s.s_primes.len() != n
        {
            return false;
        }
        let h = self.generators[0];
        let hs = &self.generators[1..n + 1];

        let us = self.u_challenges(es, e_primes, &proof.cs, label);

        let c_bar: RistrettoPoint =
            proof.cs.iter().sum::<RistrettoPoint>() - hs.iter().sum::<RistrettoPoint>();
        let u: Scalar = us.iter().product();
        let c_hat = proof.c_hats[n - 1] - (h * u);
        let c_tilde = RistrettoPoint::vartime_multiscalar_mul(&us, &proof.cs);
        let a_prime = RistrettoPoint::vartime_multiscalar_mul(&us, es.iter().map(|e| e.alpha));
        let b_prime = RistrettoPoint::vartime_multiscalar_mul(&us, es.iter().map(|e| e.beta));

        let c = self.challenge(es, e_primes, &proof.cs, &proof.c_hats, &proof.t, label);
        let s = &proof.s;

        let t1 = group.gmod_pow(&s.s1) - (c_bar * c);
        let t2 = group.gmod_pow(&s.s2) - (c_hat * c);
        let t3 = group.gmod_pow(&s.s3) + RistrettoPoint::vartime_multiscalar_mul(&s.s_primes, hs)
            - (c_tilde * c);
        let t4_alpha = -group.gmod_pow(&s.s4)
            + RistrettoPoint::vartime_multiscalar_mul(&s.s_primes, e_primes.iter().map(|e| e.alpha))
            - (a_prime * c);
        let t4_beta = -(self.pk.value * s.s4)
            + RistrettoPoint::vartime_multiscalar_mul(&s.s_primes, e_primes.iter().map(|e| e.beta))
            - (b_prime * c);

        let hats_ok = (0..n).into_par_iter().all(|i| {
            let previous = if i == 0 { h } else { proof.c_hats[i - 1] };
            let t_hat = group.gmod_pow(&s.s_hats[i]) + (previous * s.s_primes[i])
                - (proof.c_hats[i] * c);
            t_hat == proof.t.t_hats[i]
        });

        t1 == proof.t.t1
            && t2 == proof.t.t2
            && t3 == proof.t.t3
            && t4_alpha == proof.t.t4_alpha
            && t4_beta == proof.t.t4_beta
            && hats_ok
    }

    fn gen_commitments(&self, perm: &[usize], hs: &[RistrettoPoint]) -> (Vec<RistrettoPoint>, Vec<Scalar>) {
        let group = RistrettoGroup;
        let n = perm.len();
        let mut cs = vec![RistrettoPoint::default(); n];
        let mut rs = vec![Scalar::zero(); n];
        for (i, h) in hs.iter().enumerate() {
            let j = perm[i];
            rs[j] = group.rnd_exp();
            cs[j] = group.gmod_pow(&rs[j]) + h;
        }

        (cs, rs)
    }

    fn gen_commitment_chain(
        &self,
        initial: &RistrettoPoint,
        us: &[Scalar],
    ) -> (Vec<RistrettoPoint>, Vec<Scalar>) {
        let group = RistrettoGroup;
        let mut cs = Vec::with_capacity(us.len());
        let mut rs = Vec::with_capacity(us.len());
        let mut previous = *initial;
        for u in us {
            let r = group.rnd_exp();
            let c = group.gmod_pow(&r) + (previous * u);
            cs.push(c);
            rs.push(r);
            previous = c;
        }

        (cs, rs)
    }

    fn transcript(
        &self,
        es: &[Ciphertext],
        e_primes: &[Ciphertext],
        cs: &[RistrettoPoint],
        label: &[u8],
    ) -> Transcript {
        let mut transcript = Transcript::new(b"nevv/shuffle");
        transcript
            .bytes(label)
            .point(&self.pk.value)
            .points(self.generators)
            .ciphertexts(es)
            .ciphertexts(e_primes)
            .points(cs);
        transcript
    }

    fn u_challenges(
        &self,
        es: &[Ciphertext],
        e_primes: &[Ciphertext],
        cs: &[RistrettoPoint],
        label: &[u8],
    ) -> Vec<Scalar> {
        self.transcript(es, e_primes, cs, label).challenges(es.len())
    }

    fn challenge(
        &self,
        es: &[Ciphertext],
        e_primes: &[Ciphertext],
        cs: &[RistrettoPoint],
        c_hats: &[RistrettoPoint],
        t: &TValues,
        label: &[u8],
    ) -> Scalar {
        let mut transcript = self.transcript(es, e_primes, cs, label);
        transcript
            .bytes(b"challenge")
            .points(c_hats)
            .point(&t.t1)
            .point(&t.t2)
            .point(&t.t3)
            .point(&t.t4_alpha)
            .point(&t.t4_beta)
            .points(&t.t_hats);
        transcript.challenge()
    }
}

fn pair(alpha: &[RistrettoPoint], beta: &[RistrettoPoint]) -> Option<Vec<Ciphertext>> {
    if alpha.len() != beta.len() {
        return None;
    }
    Some(
        alpha
            .iter()
            .zip(beta.iter())
            .map(|(a, b)| Ciphertext { alpha: *a, beta: *b })
            .collect(),
    )
}

/// Shuffles `(alpha, beta)` pairs under `key`, returning `(gamma, delta, proof)`.
///
/// The commitment generators are derived from `label`, which must be the
/// same on the verifying side.
pub fn shuffle(
    key: &PublicKey,
    alpha: &[RistrettoPoint],
    beta: &[RistrettoPoint],
    label: &[u8],
) -> Result<(Vec<RistrettoPoint>, Vec<RistrettoPoint>, ShuffleProof), CryptoError> {
    let es = pair(alpha, beta).ok_or_else(|| {
        CryptoError::Input(format!("{} alphas but {} betas", alpha.len(), beta.len()))
    })?;
    let (e_primes, proof) = shuffle_ciphertexts(key, &es, label)?;

    let gamma = e_primes.iter().map(|e| e.alpha).collect();
    let delta = e_primes.iter().map(|e| e.beta).collect();
    Ok((gamma, delta, proof))
}

pub fn shuffle_ciphertexts(
    key: &PublicKey,
    es: &[Ciphertext],
    label: &[u8],
) -> Result<(Vec<Ciphertext>, ShuffleProof), CryptoError> {
    if es.len() < 2 {
        return Err(CryptoError::Input(format!(
            "cannot shuffle {} ciphertexts, need at least 2",
            es.len()
        )));
    }
    let group = RistrettoGroup;
    let generators = group.generators(es.len() + 1, label);
    let shuffler = Shuffler {
        pk: key,
        generators: &generators,
    };
    let (e_primes, rs, perm) = shuffler.gen_shuffle(es);
    let proof = shuffler.gen_proof(es, &e_primes, &rs, &perm, label);

    Ok((e_primes, proof))
}

pub fn verify(
    proof: &ShuffleProof,
    key: &PublicKey,
    alpha: &[RistrettoPoint],
    beta: &[RistrettoPoint],
    gamma: &[RistrettoPoint],
    delta: &[RistrettoPoint],
    label: &[u8],
) -> bool {
    match (pair(alpha, beta), pair(gamma, delta)) {
        (Some(es), Some(e_primes)) => verify_ciphertexts(proof, key, &es, &e_primes, label),
        _ => false,
    }
}

pub fn verify_ciphertexts(
    proof: &ShuffleProof,
    key: &PublicKey,
    es: &[Ciphertext],
    e_primes: &[Ciphertext],
    label: &[u8],
) -> bool {
    let group = RistrettoGroup;
    let generators = group.generators(es.len() + 1, label);
    let shuffler = Shuffler {
        pk: key,
        generators: &generators,
    };

    shuffler.check_proof(proof, es, e_primes, label)
}
