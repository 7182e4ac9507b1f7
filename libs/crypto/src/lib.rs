//! Password hash tuples. A stored password is always the triple of an algorithm tag,
//! a random salt and the digest of `salt || password`. The plaintext is never kept.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

use openssl::memcmp;
use openssl::sha::{Sha1, Sha512};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub mod serialise;

use crate::serialise::b64;

// NIST 800-63.b salt should be 112 bits -> 14  8u8.
const SALT_LEN: usize = 24;
const SALT_MIN_NIST_LEN: usize = 14;

const SHA512_DIGEST_LEN: usize = 64;
const SHA1_DIGEST_LEN: usize = 20;

const ALG_SHA512_SALTED: &str = "sha512-salted";
const ALG_SHA1_SALTED: &str = "sha1-salted";

/// The algorithm tag of a hash tuple. Tags this crate doesn't know are kept as-is so that
/// a password matcher elsewhere in the application can still claim them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha512Salted,
    // Imported type, will upgrade to the above.
    Sha1Salted,
    Other(String),
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &str {
        match self {
            HashAlgorithm::Sha512Salted => ALG_SHA512_SALTED,
            HashAlgorithm::Sha1Salted => ALG_SHA1_SALTED,
            HashAlgorithm::Other(tag) => tag.as_str(),
        }
    }
}

impl From<&str> for HashAlgorithm {
    fn from(value: &str) -> Self {
        match value {
            ALG_SHA512_SALTED => HashAlgorithm::Sha512Salted,
            ALG_SHA1_SALTED => HashAlgorithm::Sha1Salted,
            other => HashAlgorithm::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stored form of a hash tuple, serialised as `[algorithm, salt, digest]`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DbPasswordV1(
    pub String,
    #[serde(with = "b64")] pub Vec<u8>,
    #[serde(with = "b64")] pub Vec<u8>,
);

impl fmt::Debug for DbPasswordV1 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DbPasswordV1({})", self.0)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct HashTuple {
    algorithm: HashAlgorithm,
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl fmt::Debug for HashTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HashTuple")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl From<DbPasswordV1> for HashTuple {
    fn from(DbPasswordV1(alg, salt, digest): DbPasswordV1) -> Self {
        HashTuple {
            algorithm: HashAlgorithm::from(alg.as_str()),
            salt,
            digest,
        }
    }
}

fn random_salt() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..SALT_LEN).map(|_| rng.gen()).collect()
}

fn sha512_salted(salt: &[u8], cleartext: &str) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(cleartext.as_bytes());
    hasher.finish().to_vec()
}

fn sha1_salted(salt: &[u8], cleartext: &str) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(cleartext.as_bytes());
    hasher.finish().to_vec()
}

impl HashTuple {
    /// Hash a password with a fresh salt. Two calls with the same password never
    /// share a salt.
    pub fn new(cleartext: &str) -> Self {
        let salt = random_salt();
        let digest = sha512_salted(&salt, cleartext);
        HashTuple {
            algorithm: HashAlgorithm::Sha512Salted,
            salt,
            digest,
        }
    }

    /// Build a tuple in the legacy sha1 form. Only used when importing credentials
    /// from older deployments, these are upgraded at the next successful login.
    pub fn new_sha1_salted(salt: Vec<u8>, cleartext: &str) -> Self {
        let digest = sha1_salted(&salt, cleartext);
        HashTuple {
            algorithm: HashAlgorithm::Sha1Salted,
            salt,
            digest,
        }
    }

    pub fn algorithm(&self) -> &HashAlgorithm {
        &self.algorithm
    }

    /// Recompute the digest with the stored salt and compare. Any malformed tuple
    /// is a mismatch, never an error.
    pub fn verify(&self, cleartext: &str) -> bool {
        let (chal, expect_len) = match &self.algorithm {
            HashAlgorithm::Sha512Salted => (sha512_salted(&self.salt, cleartext), SHA512_DIGEST_LEN),
            HashAlgorithm::Sha1Salted => (sha1_salted(&self.salt, cleartext), SHA1_DIGEST_LEN),
            HashAlgorithm::Other(tag) => {
                debug!(alg = %tag, "unsupported hash algorithm");
                return false;
            }
        };

        if self.salt.is_empty() || self.digest.len() != expect_len {
            debug!(alg = %self.algorithm, "malformed hash tuple");
            return false;
        }

        // memcmp::eq requires equal lengths, checked above.
        memcmp::eq(&chal, &self.digest)
    }

    pub fn requires_upgrade(&self) -> bool {
        match &self.algorithm {
            HashAlgorithm::Sha512Salted => self.salt.len() < SALT_MIN_NIST_LEN,
            HashAlgorithm::Sha1Salted | HashAlgorithm::Other(_) => true,
        }
    }

    pub fn to_dbpasswordv1(&self) -> DbPasswordV1 {
        DbPasswordV1(
            self.algorithm.as_str().to_string(),
            self.salt.clone(),
            self.digest.clone(),
        )
    }
}

/// Hash a cleartext password into a new tuple.
#[inline]
pub fn hash(cleartext: &str) -> HashTuple {
    HashTuple::new(cleartext)
}

/// Check a cleartext password against a stored tuple.
#[inline]
pub fn hash_equals(cleartext: &str, tuple: &HashTuple) -> bool {
    tuple.verify(cleartext)
}

/// Compare two secrets without leaking the position of the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && memcmp::eq(a, b)
}
