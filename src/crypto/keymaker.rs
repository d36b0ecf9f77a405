//! Threshold decryption: verifiable decryption factors from DKG shares and
//! their combination by Lagrange interpolation in the exponent.
use std::collections::HashSet;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::VartimeMultiscalarMul;
use log::{info, warn};
use rayon::prelude::*;

use crate::crypto::backend::ristretto_b::RistrettoGroup;
use crate::crypto::dkg::{eval_commits, x_of, Index, SharedSecret};
use crate::crypto::elgamal::Ciphertext;
use crate::crypto::zkp::ChaumPedersen;
use crate::data::artifact::Partial;
use crate::error::{CryptoError, Error, ProtocolError, ThresholdError};

pub struct Keymaker {
    index: Index,
    share: Scalar,
    verification_key: RistrettoPoint,
}

impl Keymaker {
    pub fn from_shared(shared: &SharedSecret) -> Keymaker {
        let group = RistrettoGroup;
        Keymaker {
            index: shared.index,
            share: shared.share,
            verification_key: group.gmod_pow(&shared.share),
        }
    }

    pub fn index(&self) -> Index {
        self.index
    }

    pub fn verification_key(&self) -> &RistrettoPoint {
        &self.verification_key
    }

    pub fn decryption_factor(&self, c: &Ciphertext, label: &[u8]) -> (RistrettoPoint, ChaumPedersen) {
        let group = RistrettoGroup;
        let factor = c.alpha * self.share;
        let proof = group.cp_prove(&self.share, &self.verification_key, &factor, &c.alpha, label);

        (factor, proof)
    }

    pub fn decryption_factor_many(
        &self,
        cs: &[Ciphertext],
        label: &[u8],
    ) -> (Vec<RistrettoPoint>, Vec<ChaumPedersen>) {
        cs.par_iter()
            .map(|c| self.decryption_factor(c, label))
            .unzip()
    }

    pub fn verify_decryption_factors(
        verification_key: &RistrettoPoint,
        cs: &[Ciphertext],
        decs: &[RistrettoPoint],
        proofs: &[ChaumPedersen],
        label: &[u8],
    ) -> bool {
        if cs.len() != decs.len() || cs.len() != proofs.len() {
            return false;
        }
        let group = RistrettoGroup;
        cs.par_iter()
            .zip(decs.par_iter())
            .zip(proofs.par_iter())
            .all(|((c, d), p)| group.cp_verify(verification_key, d, &c.alpha, p, label))
    }
}

/// Lagrange coefficient at zero for `index` over `indices`.
pub fn lagrange(indices: &[Index], index: Index) -> Scalar {
    let xi = x_of(index);
    let mut num = Scalar::one();
    let mut den = Scalar::one();
    for j in indices.iter().filter(|j| **j != index) {
        let xj = x_of(*j);
        num *= xj;
        den *= xj - xi;
    }

    num * den.invert()
}

pub fn interpolate(shares: &[(Index, Scalar)]) -> Result<Scalar, Error> {
    let indices: Vec<Index> = shares.iter().map(|(i, _)| *i).collect();
    let distinct: HashSet<&Index> = indices.iter().collect();
    if distinct.len() != indices.len() {
        let duplicate = indices
            .iter()
            .find(|i| indices.iter().filter(|j| j == i).count() > 1)
            .copied()
            .unwrap_or_default();
        return Err(ThresholdError::DuplicateIndex(duplicate).into());
    }

    Ok(shares
        .iter()
        .map(|(i, s)| lagrange(&indices, *i) * s)
        .sum())
}

/// Interpolates the secret, refusing with fewer than `threshold + 1` shares.
pub fn recover_secret(shares: &[(Index, Scalar)], threshold: usize) -> Result<Scalar, Error> {
    if shares.len() < threshold + 1 {
        return Err(ThresholdError::Partials(shares.len(), threshold + 1).into());
    }
    interpolate(shares)
}

/// Combines partial decryptions of `cs` into plaintext points.
///
/// Flagged partials are skipped. Every remaining partial must carry valid
/// proofs against the share commitment `commits` evaluated at its index.
pub fn reconstruct(
    partials: &[Partial],
    cs: &[Ciphertext],
    threshold: usize,
    commits: &[RistrettoPoint],
    label: &[u8],
) -> Result<Vec<RistrettoPoint>, Error> {
    let mut seen = HashSet::new();
    for p in partials {
        if !seen.insert(p.index) {
            return Err(ThresholdError::DuplicateIndex(p.index).into());
        }
    }
    let valid: Vec<&Partial> = partials.iter().filter(|p| !p.flag).collect();
    if valid.len() < threshold + 1 {
        warn!(
            ">> Only {} usable partials of {}, need {}",
            valid.len(),
            partials.len(),
            threshold + 1
        );
        return Err(ThresholdError::Partials(valid.len(), threshold + 1).into());
    }

    for p in valid.iter() {
        if p.points.len() != cs.len() {
            return Err(ProtocolError::Msg(format!(
                "partial {} has {} points for {} ciphertexts",
                p.index,
                p.points.len(),
                cs.len()
            ))
            .into());
        }
        let verification_key = eval_commits(commits, &x_of(p.index));
        if !Keymaker::verify_decryption_factors(&verification_key, cs, &p.points, &p.proofs, label) {
            return Err(CryptoError::Proof(format!("decryption factors of node {}", p.index)).into());
        }
    }

    let indices: Vec<Index> = valid.iter().map(|p| p.index).collect();
    let lagranges: Vec<Scalar> = indices.iter().map(|i| lagrange(&indices, *i)).collect();
    info!(">> Reconstructing {} ciphertexts from nodes {:?}", cs.len(), indices);

    let ret = cs
        .par_iter()
        .enumerate()
        .map(|(k, c)| {
            let factors = valid.iter().map(|p| p.points[k]);
            let combined = RistrettoPoint::vartime_multiscalar_mul(lagranges.iter(), factors);
            c.beta - combined
        })
        .collect();

    Ok(ret)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::crypto::backend::ristretto_b::RistrettoGroup;
    use crate::crypto::dkg::eval;
    use crate::crypto::elgamal::PublicKey;
    use crate::crypto::keymaker::*;
    use crate::util;

    // dealer-based sharing, stands in for a DKG run
    fn shared_secrets(n: usize, t: usize) -> (Scalar, Vec<SharedSecret>) {
        let group = RistrettoGroup;
        let poly: Vec<Scalar> = (0..=t).map(|_| group.rnd_exp()).collect();
        let commits: Vec<RistrettoPoint> = poly.iter().map(|a| group.gmod_pow(a)).collect();
        let shared = (0..n as Index)
            .map(|i| SharedSecret {
                index: i,
                share: eval(&poly, &x_of(i)),
                public: commits[0],
                commits: commits.clone(),
            })
            .collect();

        (poly[0], shared)
    }

    fn partial(shared: &SharedSecret, cs: &[Ciphertext], label: &[u8]) -> Partial {
        let km = Keymaker::from_shared(shared);
        let (points, proofs) = km.decryption_factor_many(cs, label);
        Partial {
            points,
            proofs,
            index: shared.index,
            flag: false,
            node: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_threshold_decryption() {
        let group = RistrettoGroup;
        let (secret, shared) = shared_secrets(4, 2);
        let pk = PublicKey::from(&group.gmod_pow(&secret));
        let (plaintexts, cs) = util::random_encrypt_ballots(5, &pk);

        let partials: Vec<Partial> = shared.iter().map(|s| partial(s, &cs, b"l")).collect();
        let points = reconstruct(&partials[1..], &cs, 2, &shared[0].commits, b"l").unwrap();
        let decrypted: Vec<Vec<u8>> = points.iter().map(|p| group.extract(p).unwrap()).collect();
        assert_eq!(decrypted, plaintexts);

        let all = reconstruct(&partials, &cs, 2, &shared[0].commits, b"l").unwrap();
        assert_eq!(all, points);
    }

    #[test]
    fn test_reconstruct_below_threshold() {
        let group = RistrettoGroup;
        let (secret, shared) = shared_secrets(3, 1);
        let pk = PublicKey::from(&group.gmod_pow(&secret));
        let (_, cs) = util::random_encrypt_ballots(2, &pk);

        let mut partials: Vec<Partial> = shared.iter().map(|s| partial(s, &cs, b"l")).collect();
        partials[1] = Partial::failed(1, partials[1].node);
        partials[2] = Partial::failed(2, partials[2].node);

        match reconstruct(&partials, &cs, 1, &shared[0].commits, b"l") {
            Err(Error::Threshold(ThresholdError::Partials(1, 2))) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reconstruct_duplicate_index() {
        let group = RistrettoGroup;
        let (secret, shared) = shared_secrets(3, 1);
        let pk = PublicKey::from(&group.gmod_pow(&secret));
        let (_, cs) = util::random_encrypt_ballots(2, &pk);

        let first = partial(&shared[0], &cs, b"l");
        let partials = vec![first.clone(), first];
        match reconstruct(&partials, &cs, 1, &shared[0].commits, b"l") {
            Err(Error::Threshold(ThresholdError::DuplicateIndex(0))) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reconstruct_bad_factor() {
        let group = RistrettoGroup;
        let (secret, shared) = shared_secrets(3, 1);
        let pk = PublicKey::from(&group.gmod_pow(&secret));
        let (_, cs) = util::random_encrypt_ballots(2, &pk);

        let mut partials: Vec<Partial> = shared.iter().map(|s| partial(s, &cs, b"l")).collect();
        partials[0].points[1] = group.rnd();
        match reconstruct(&partials, &cs, 1, &shared[0].commits, b"l") {
            Err(Error::Crypto(CryptoError::Proof(_))) => {}
            other => panic!("unexpected {:?}", other),
        }

        partials[0].points.pop();
        match reconstruct(&partials, &cs, 1, &shared[0].commits, b"l") {
            Err(Error::Protocol(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_interpolate() {
        let (secret, shared) = shared_secrets(5, 2);
        let shares: Vec<(Index, Scalar)> = shared.iter().map(|s| (s.index, s.share)).collect();
        assert_eq!(recover_secret(&shares[2..], 2).unwrap(), secret);
        assert_eq!(recover_secret(&shares, 2).unwrap(), secret);
        assert!(recover_secret(&shares[3..], 2).is_err());

        let duplicated = vec![shares[0], shares[0], shares[1]];
        assert!(interpolate(&duplicated).is_err());
    }
}
