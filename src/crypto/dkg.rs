//! Pedersen distributed key generation.
//!
//! Every participant deals shares of a random polynomial under Pedersen
//! commitments, complaints are answered with justifications, and the
//! qualified dealers finally reveal Feldman commitments from which the joint
//! public key is derived. The generator is a pure state machine; message
//! transport and timing belong to `protocol::dkg`.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::PublicKey as SPublicKey;
use ed25519_dalek::{Keypair, Signature, Signer, Verifier};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::crypto::backend::ristretto_b::RistrettoGroup;
use crate::crypto::elgamal::PrivateKey;
use crate::crypto::hashing;
use crate::crypto::symmetric::{self, Encrypted};
use crate::error::{CryptoError, Error, ProtocolError, ThresholdError};

pub type Index = u32;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Deal {
    pub dealer: Index,
    pub recipient: Index,
    /// Pedersen commitments `g^a_k h^b_k` to the dealer's polynomials.
    pub commitments: Vec<RistrettoPoint>,
    pub encrypted_share: Encrypted,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Approval,
    Complaint,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Response {
    pub dealer: Index,
    pub verifier: Index,
    pub status: Status,
    /// Hash of the commitments the verifier received, exposes equivocation.
    #[serde(with = "serde_bytes")]
    pub digest: Vec<u8>,
    pub signature: Signature,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Justification {
    pub dealer: Index,
    pub verifier: Index,
    pub share: Scalar,
    pub blinding: Scalar,
    pub signature: Signature,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SecretCommit {
    pub dealer: Index,
    /// Feldman commitments `g^a_k`.
    pub commitments: Vec<RistrettoPoint>,
    pub signature: Signature,
}

/// Output of a successful run. Never serialized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedSecret {
    pub index: Index,
    pub share: Scalar,
    pub public: RistrettoPoint,
    pub commits: Vec<RistrettoPoint>,
}

impl SharedSecret {
    /// `g^share` of the participant at `index`.
    pub fn public_share(&self, index: Index) -> RistrettoPoint {
        eval_commits(&self.commits, &x_of(index))
    }
}

struct ReceivedDeal {
    commitments: Vec<RistrettoPoint>,
    digest: Vec<u8>,
    // None when the deal could not be decrypted or did not verify
    share: Option<(Scalar, Scalar)>,
}

pub struct DistKeyGenerator {
    session: Vec<u8>,
    index: Index,
    threshold: usize,
    ephemeral: PrivateKey,
    publics: Vec<RistrettoPoint>,
    signer: Arc<Keypair>,
    verifiers: Vec<SPublicKey>,
    secret_poly: Vec<Scalar>,
    blinding_poly: Vec<Scalar>,
    deals: HashMap<Index, ReceivedDeal>,
    responses: HashMap<(Index, Index), Status>,
    justified: HashSet<(Index, Index)>,
    excluded: HashSet<Index>,
    commits: HashMap<Index, Vec<RistrettoPoint>>,
}

/// Shares are evaluated at `index + 1`, zero is the secret.
pub fn x_of(index: Index) -> Scalar {
    Scalar::from(index as u64 + 1)
}

pub fn eval(poly: &[Scalar], x: &Scalar) -> Scalar {
    poly.iter().rev().fold(Scalar::zero(), |acc, c| acc * x + c)
}

pub fn eval_commits(commits: &[RistrettoPoint], x: &Scalar) -> RistrettoPoint {
    commits
        .iter()
        .rev()
        .fold(RistrettoPoint::default(), |acc, c| acc * x + c)
}

fn statement<T: Serialize>(tag: &str, session: &[u8], body: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(&(tag, session, body))
}

impl DistKeyGenerator {
    pub fn new(
        session: &[u8],
        index: Index,
        threshold: usize,
        ephemeral: PrivateKey,
        publics: Vec<RistrettoPoint>,
        signer: Arc<Keypair>,
        verifiers: Vec<SPublicKey>,
    ) -> Result<DistKeyGenerator, Error> {
        let n = publics.len();
        if n == 0 || verifiers.len() != n {
            return Err(ProtocolError::Participants(verifiers.len(), n.max(1)).into());
        }
        if threshold >= n {
            return Err(ProtocolError::Msg(format!(
                "threshold {} must be below participant count {}",
                threshold, n
            ))
            .into());
        }
        if index as usize >= n || publics[index as usize] != ephemeral.public_value {
            return Err(ProtocolError::UnknownNode(index.to_string()).into());
        }

        let group = RistrettoGroup;
        let secret_poly = (0..=threshold).map(|_| group.rnd_exp()).collect();
        let blinding_poly = (0..=threshold).map(|_| group.rnd_exp()).collect();

        Ok(DistKeyGenerator {
            session: session.to_vec(),
            index,
            threshold,
            ephemeral,
            publics,
            signer,
            verifiers,
            secret_poly,
            blinding_poly,
            deals: HashMap::new(),
            responses: HashMap::new(),
            justified: HashSet::new(),
            excluded: HashSet::new(),
            commits: HashMap::new(),
        })
    }

    pub fn index(&self) -> Index {
        self.index
    }

    pub fn n(&self) -> usize {
        self.publics.len()
    }

    fn pedersen_commitments(&self) -> Vec<RistrettoPoint> {
        let group = RistrettoGroup;
        let h = group.pedersen_h();
        self.secret_poly
            .iter()
            .zip(self.blinding_poly.iter())
            .map(|(a, b)| group.gmod_pow(a) + h * b)
            .collect()
    }

    fn deal_key_context(&self, dealer: Index, recipient: Index) -> Vec<u8> {
        let mut context = self.session.clone();
        context.extend(&dealer.to_le_bytes());
        context.extend(&recipient.to_le_bytes());
        context
    }

    fn check_share(commitments: &[RistrettoPoint], index: Index, share: &Scalar, blinding: &Scalar) -> bool {
        let group = RistrettoGroup;
        let expected = eval_commits(commitments, &x_of(index));
        group.gmod_pow(share) + group.pedersen_h() * blinding == expected
    }

    /// One deal per peer; the dealer's own share is kept locally.
    pub fn deals(&mut self) -> Result<Vec<Deal>, Error> {
        let commitments = self.pedersen_commitments();
        let digest = hashing::hash(&commitments)?.to_vec();
        let mut ret = Vec::with_capacity(self.n() - 1);

        for j in 0..self.n() as Index {
            let x = x_of(j);
            let share = eval(&self.secret_poly, &x);
            let blinding = eval(&self.blinding_poly, &x);
            if j == self.index {
                self.deals.insert(
                    j,
                    ReceivedDeal {
                        commitments: commitments.clone(),
                        digest: digest.clone(),
                        share: Some((share, blinding)),
                    },
                );
                continue;
            }
            let dh = self.publics[j as usize] * self.ephemeral.value;
            let key = symmetric::derive_key(&dh, &self.deal_key_context(self.index, j));
            let mut plaintext = share.to_bytes().to_vec();
            plaintext.extend(&blinding.to_bytes());

            ret.push(Deal {
                dealer: self.index,
                recipient: j,
                commitments: commitments.clone(),
                encrypted_share: symmetric::encrypt(&key, &plaintext)?,
            });
        }

        Ok(ret)
    }

    fn open_deal(&self, deal: &Deal) -> Option<(Scalar, Scalar)> {
        let dh = self.publics[deal.dealer as usize] * self.ephemeral.value;
        let key = symmetric::derive_key(&dh, &self.deal_key_context(deal.dealer, self.index));
        let plaintext = symmetric::decrypt(&key, &deal.encrypted_share).ok()?;
        if plaintext.len() != 64 {
            return None;
        }
        let mut share = [0u8; 32];
        let mut blinding = [0u8; 32];
        share.copy_from_slice(&plaintext[0..32]);
        blinding.copy_from_slice(&plaintext[32..64]);
        let share = Scalar::from_canonical_bytes(share)?;
        let blinding = Scalar::from_canonical_bytes(blinding)?;

        if Self::check_share(&deal.commitments, self.index, &share, &blinding) {
            Some((share, blinding))
        } else {
            None
        }
    }

    /// Validates a deal addressed to this node. An invalid deal is not an
    /// error: it produces a complaint.
    pub fn process_deal(&mut self, deal: &Deal) -> Result<Response, Error> {
        if deal.recipient != self.index {
            return Err(ProtocolError::Phase(format!(
                "deal for {} delivered to {}",
                deal.recipient, self.index
            ))
            .into());
        }
        if deal.dealer == self.index || deal.dealer as usize >= self.n() {
            return Err(ProtocolError::UnknownNode(deal.dealer.to_string()).into());
        }
        if self.deals.contains_key(&deal.dealer) {
            return Err(ProtocolError::DuplicateIndex(deal.dealer).into());
        }

        let share = if deal.commitments.len() == self.threshold + 1 {
            self.open_deal(deal)
        } else {
            None
        };
        let status = if share.is_some() {
            Status::Approval
        } else {
            warn!(
                ">> Deal from {} failed verification at {}, complaining",
                deal.dealer, self.index
            );
            Status::Complaint
        };
        let digest = hashing::hash(&deal.commitments)?.to_vec();
        self.deals.insert(
            deal.dealer,
            ReceivedDeal {
                commitments: deal.commitments.clone(),
                digest: digest.clone(),
                share,
            },
        );
        self.responses.insert((deal.dealer, self.index), status);

        let body = (deal.dealer, self.index, status, &digest);
        let signature = self.signer.sign(&statement("response", &self.session, &body)?);

        Ok(Response {
            dealer: deal.dealer,
            verifier: self.index,
            status,
            digest,
            signature,
        })
    }

    /// A response can only be judged once the deal it refers to is known.
    pub fn has_deal(&self, dealer: Index) -> bool {
        self.deals.contains_key(&dealer)
    }

    pub fn process_response(&mut self, response: &Response) -> Result<Option<Justification>, Error> {
        let n = self.n();
        if response.dealer as usize >= n || response.verifier as usize >= n {
            return Err(ProtocolError::UnknownNode(format!(
                "{}/{}",
                response.dealer, response.verifier
            ))
            .into());
        }
        if response.dealer == response.verifier {
            return Err(ProtocolError::Phase("dealer cannot respond to itself".to_string()).into());
        }
        let body = (
            response.dealer,
            response.verifier,
            response.status,
            &response.digest,
        );
        let message = statement("response", &self.session, &body)?;
        self.verifiers[response.verifier as usize]
            .verify(&message, &response.signature)
            .map_err(ProtocolError::from)?;

        let key = (response.dealer, response.verifier);
        if response.verifier == self.index {
            // our own response, recorded when the deal was processed
            return Ok(None);
        }
        if self.responses.contains_key(&key) {
            return Err(ProtocolError::Phase(format!("duplicate response {:?}", key)).into());
        }
        let deal = self.deals.get(&response.dealer).ok_or_else(|| {
            ProtocolError::Phase(format!("response for unknown deal {}", response.dealer))
        })?;
        if deal.digest != response.digest {
            warn!(
                ">> Dealer {} sent inconsistent commitments, excluding",
                response.dealer
            );
            self.excluded.insert(response.dealer);
        }
        self.responses.insert(key, response.status);

        if response.status == Status::Complaint && response.dealer == self.index {
            info!(
                ">> Complaint from {} against own deal, justifying",
                response.verifier
            );
            return Ok(Some(self.justification(response.verifier)?));
        }

        Ok(None)
    }

    fn justification(&self, verifier: Index) -> Result<Justification, Error> {
        let x = x_of(verifier);
        let share = eval(&self.secret_poly, &x);
        let blinding = eval(&self.blinding_poly, &x);
        self.sign_justification(verifier, share, blinding)
    }

    fn sign_justification(&self, verifier: Index, share: Scalar, blinding: Scalar) -> Result<Justification, Error> {
        let body = (self.index, verifier, &share, &blinding);
        let signature = self.signer.sign(&statement("justification", &self.session, &body)?);

        Ok(Justification {
            dealer: self.index,
            verifier,
            share,
            blinding,
            signature,
        })
    }

    /// A justification can only be judged once the complaint it answers is
    /// known.
    pub fn has_complaint(&self, dealer: Index, verifier: Index) -> bool {
        self.responses.get(&(dealer, verifier)) == Some(&Status::Complaint)
    }

    pub fn process_justification(&mut self, justification: &Justification) -> Result<(), Error> {
        let key = (justification.dealer, justification.verifier);
        if self.responses.get(&key) != Some(&Status::Complaint) {
            return Err(ProtocolError::Phase(format!("justification without complaint {:?}", key)).into());
        }
        let body = (
            justification.dealer,
            justification.verifier,
            &justification.share,
            &justification.blinding,
        );
        let message = statement("justification", &self.session, &body)?;
        self.verifiers[justification.dealer as usize]
            .verify(&message, &justification.signature)
            .map_err(ProtocolError::from)?;

        let deal = self.deals.get_mut(&justification.dealer).ok_or_else(|| {
            ProtocolError::Phase(format!("justification for unknown deal {}", justification.dealer))
        })?;
        let valid = Self::check_share(
            &deal.commitments,
            justification.verifier,
            &justification.share,
            &justification.blinding,
        );
        if !valid {
            warn!(
                ">> Invalid justification from dealer {}, excluding",
                justification.dealer
            );
            self.excluded.insert(justification.dealer);
            return Ok(());
        }
        if justification.verifier == self.index {
            deal.share = Some((justification.share, justification.blinding));
        }
        self.justified.insert(key);

        Ok(())
    }

    pub fn responses_complete(&self) -> bool {
        let n = self.n();
        self.responses.len() == n * n.saturating_sub(1)
    }

    /// Complaints neither justified nor already resolved by exclusion.
    pub fn unresolved(&self) -> Vec<(Index, Index)> {
        self.responses
            .iter()
            .filter(|(key, status)| {
                **status == Status::Complaint
                    && !self.justified.contains(*key)
                    && !self.excluded.contains(&key.0)
            })
            .map(|(key, _)| *key)
            .collect()
    }

    /// Dealers that failed to justify in time are excluded.
    pub fn expire_justifications(&mut self) {
        for (dealer, verifier) in self.unresolved() {
            warn!(
                ">> Dealer {} did not justify complaint from {}, excluding",
                dealer, verifier
            );
            self.excluded.insert(dealer);
        }
    }

    pub fn certified(&self) -> bool {
        self.responses_complete() && self.unresolved().is_empty()
    }

    pub fn qual(&self) -> Vec<Index> {
        (0..self.n() as Index)
            .filter(|i| !self.excluded.contains(i) && self.deals.contains_key(i))
            .collect()
    }

    pub fn in_qual(&self) -> bool {
        self.qual().contains(&self.index)
    }

    pub fn secret_commits(&self) -> Result<SecretCommit, Error> {
        if !self.certified() {
            return Err(ProtocolError::Phase("secret commits before certification".to_string()).into());
        }
        if !self.in_qual() {
            return Err(ProtocolError::Phase(format!("{} is not in QUAL", self.index)).into());
        }
        let group = RistrettoGroup;
        let commitments: Vec<RistrettoPoint> =
            self.secret_poly.iter().map(|a| group.gmod_pow(a)).collect();
        let signature = self
            .signer
            .sign(&statement("commit", &self.session, &(self.index, &commitments))?);

        Ok(SecretCommit {
            dealer: self.index,
            commitments,
            signature,
        })
    }

    /// Checks revealed Feldman commitments against this node's share. A
    /// mismatch after certification cannot be explained by honest behaviour
    /// and is fatal.
    pub fn process_secret_commits(&mut self, commit: &SecretCommit) -> Result<(), Error> {
        if !self.certified() {
            return Err(ProtocolError::Phase("secret commits before certification".to_string()).into());
        }
        if !self.qual().contains(&commit.dealer) {
            return Err(ProtocolError::Phase(format!("commit from {} outside QUAL", commit.dealer)).into());
        }
        if self.commits.contains_key(&commit.dealer) {
            return Err(ProtocolError::DuplicateIndex(commit.dealer).into());
        }
        let message = statement("commit", &self.session, &(commit.dealer, &commit.commitments))?;
        self.verifiers[commit.dealer as usize]
            .verify(&message, &commit.signature)
            .map_err(ProtocolError::from)?;

        if commit.commitments.len() != self.threshold + 1 {
            return Err(CryptoError::Proof(format!("commit length from {}", commit.dealer)).into());
        }
        let (share, _) = self
            .deals
            .get(&commit.dealer)
            .and_then(|d| d.share)
            .ok_or_else(|| ProtocolError::Phase(format!("no share from {}", commit.dealer)))?;
        let group = RistrettoGroup;
        if group.gmod_pow(&share) != eval_commits(&commit.commitments, &x_of(self.index)) {
            return Err(CryptoError::Proof(format!("secret commits of dealer {}", commit.dealer)).into());
        }
        self.commits.insert(commit.dealer, commit.commitments.clone());

        Ok(())
    }

    pub fn commits_complete(&self) -> bool {
        self.certified() && self.qual().iter().all(|i| self.commits.contains_key(i))
    }

    pub fn finalize(&self) -> Result<SharedSecret, Error> {
        let qual = self.qual();
        if qual.len() < self.threshold + 1 {
            return Err(ThresholdError::Qual(qual.len(), self.threshold).into());
        }
        if !self.commits_complete() {
            return Err(ProtocolError::Phase("finalize before all QUAL commits".to_string()).into());
        }

        let mut share = Scalar::zero();
        let mut commits = vec![RistrettoPoint::default(); self.threshold + 1];
        for i in qual.iter() {
            let (s, _) = self
                .deals
                .get(i)
                .and_then(|d| d.share)
                .ok_or_else(|| ProtocolError::Phase(format!("no share from {}", i)))?;
            share += s;
            let dealer_commits = self
                .commits
                .get(i)
                .ok_or_else(|| ProtocolError::Phase(format!("no commits from {}", i)))?;
            for (acc, c) in commits.iter_mut().zip(dealer_commits.iter()) {
                *acc += c;
            }
        }

        Ok(SharedSecret {
            index: self.index,
            share,
            public: commits[0],
            commits,
        })
    }
}
