/*!
NSEC3 hashed names (RFC 5155).  The zone keeps a second tree of nodes
whose owners are `base32hex(H(owner)).<apex>`; the hash is SHA-1
iterated `iterations` times with the salt appended at every round.
*/

use data_encoding::BASE32_DNSSEC;
use sha1::{Digest, Sha1};

use crate::dns::name::Name;
use crate::errors::{ProtoError, ZoneError};

pub const NSEC3_HASH_SHA1: u8 = 1;

/// `(algorithm, flags, iterations, salt)` from the apex NSEC3PARAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3Params {
    pub algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
}

impl Nsec3Params {
    pub fn from_rdata(wire: &[u8]) -> Result<Self, ZoneError> {
        if wire.len() < 5 {
            return Err(ProtoError::Malformed("truncated nsec3param rdata").into());
        }
        let salt_len = wire[4] as usize;
        let salt = wire
            .get(5..5 + salt_len)
            .ok_or(ProtoError::Malformed("truncated nsec3param salt"))?
            .to_vec();
        Ok(Nsec3Params {
            algorithm: wire[0],
            flags: wire[1],
            iterations: u16::from_be_bytes([wire[2], wire[3]]),
            salt,
        })
    }
}

/// Iterated hash of the case-folded owner name, RFC 5155 section 5.
pub fn hash_name(name: &Name, params: &Nsec3Params) -> Vec<u8> {
    let mut owner = name.clone();
    owner.make_lower();

    let mut hasher = Sha1::new();
    hasher.update(owner.wire());
    hasher.update(&params.salt);
    let mut digest = hasher.finalize();

    for _ in 0..params.iterations {
        let mut hasher = Sha1::new();
        hasher.update(digest);
        hasher.update(&params.salt);
        digest = hasher.finalize();
    }
    digest.to_vec()
}

/// `base32hex(H(name)).<apex>`, the owner of the matching NSEC3 node.
pub fn hashed_owner(name: &Name, params: &Nsec3Params, apex: &Name) -> Result<Name, ProtoError> {
    let digest = hash_name(name, params);
    let label = BASE32_DNSSEC.encode(&digest);
    Name::concat(&Name::from_text(&label)?, apex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn params(iterations: u16, salt: &[u8]) -> Nsec3Params {
        Nsec3Params {
            algorithm: NSEC3_HASH_SHA1,
            flags: 0,
            iterations,
            salt: salt.to_vec(),
        }
    }

    #[test]
    fn test_params_from_rdata() {
        // SHA-1, opt-out clear, 12 iterations, salt aabbccdd
        let wire = hex!("01 00 000C 04 AABBCCDD");
        let p = Nsec3Params::from_rdata(&wire).unwrap();
        assert_eq!(NSEC3_HASH_SHA1, p.algorithm);
        assert_eq!(12, p.iterations);
        assert_eq!(vec![0xAA, 0xBB, 0xCC, 0xDD], p.salt);
        assert!(Nsec3Params::from_rdata(&wire[..6]).is_err());
    }

    #[test]
    fn test_hash_is_case_insensitive() {
        let p = params(2, &hex!("AABB"));
        let a = hash_name(&Name::from_text("WWW.Example.COM.").unwrap(), &p);
        let b = hash_name(&Name::from_text("www.example.com.").unwrap(), &p);
        assert_eq!(a, b);
        assert_eq!(20, a.len());
    }

    #[test]
    fn test_hashed_owner_vector() {
        // the RFC 5155 appendix A zone: salt aabbccdd, 12 iterations;
        // H(example) = 0p9mhaveqvm6t7vbl5lop2u3t2rp3tom
        let p = params(12, &hex!("AABBCCDD"));
        let apex = Name::from_text("example.").unwrap();
        let owner = hashed_owner(&apex, &p, &apex).unwrap();
        assert_eq!(
            "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom.example.",
            owner.to_string()
        );
    }

    #[test]
    fn test_different_names_hash_apart() {
        let p = params(0, &[]);
        let a = hash_name(&Name::from_text("a.example.").unwrap(), &p);
        let b = hash_name(&Name::from_text("b.example.").unwrap(), &p);
        assert_ne!(a, b);
    }
}
