/*!
TSIG transaction signatures (RFC 8945).

A signed message carries one TSIG RR as the very last record of the
ADDITIONAL section.  The MAC covers the message with the TSIG RR
stripped (ARCOUNT decremented, the original ID restored) followed by
the TSIG variables; a response additionally prepends the length-
prefixed request MAC.  Verification order matters: the MAC is checked
before the time window so that a BADTIME answer can itself be signed.
*/

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use sha1::Sha1;
use sha2::Sha256;

use super::name::Name;
use super::rdata::Rdata;
use super::{CLASS_ANY, TSIG_ERR_BADKEY, TSIG_ERR_BADSIG, TSIG_ERR_BADTIME, TYPE_TSIG};
use crate::errors::ProtoError;

// hand-assembled wire forms; the single label is under the 63-octet
// limit, so no fallible parse is involved
pub static ALG_HMAC_SHA1: Lazy<Arc<Name>> =
    Lazy::new(|| Arc::new(Name::from_wire_unchecked(b"\x09hmac-sha1\x00", 1)));
pub static ALG_HMAC_SHA256: Lazy<Arc<Name>> =
    Lazy::new(|| Arc::new(Name::from_wire_unchecked(b"\x0bhmac-sha256\x00", 1)));

#[derive(Debug, Clone)]
pub struct TsigKey {
    pub name: Arc<Name>,
    pub algorithm: Arc<Name>,
    pub secret: Vec<u8>,
}

/// The server's key store, looked up by key (owner) name.
#[derive(Debug, Default)]
pub struct TsigKeyring {
    keys: HashMap<Arc<Name>, TsigKey>,
}

impl TsigKeyring {
    pub fn new() -> Self {
        TsigKeyring {
            keys: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: TsigKey) {
        self.keys.insert(key.name.clone(), key);
    }

    pub fn get(&self, name: &Name) -> Option<&TsigKey> {
        self.keys.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Decoded TSIG RDATA plus the key (owner) name.
#[derive(Debug, Clone)]
pub struct Tsig {
    pub key_name: Arc<Name>,
    pub algorithm: Arc<Name>,
    pub time_signed: u64,
    pub fudge: u16,
    pub mac: Vec<u8>,
    pub original_id: u16,
    pub error: u16,
    pub other: Vec<u8>,
}

impl Tsig {
    pub fn from_rr(key_name: Arc<Name>, rdata: &Rdata) -> Result<Self, ProtoError> {
        let wire = rdata.wire();
        let algorithm = rdata
            .dnames()
            .first()
            .cloned()
            .ok_or(ProtoError::Malformed("tsig algorithm name missing"))?;
        let mut pos = algorithm.len();

        let t = take(wire, &mut pos, 6)?;
        let time_signed = ((t[0] as u64) << 40)
            | ((t[1] as u64) << 32)
            | ((t[2] as u64) << 24)
            | ((t[3] as u64) << 16)
            | ((t[4] as u64) << 8)
            | t[5] as u64;
        let f = take(wire, &mut pos, 2)?;
        let fudge = u16::from_be_bytes([f[0], f[1]]);
        let m = take(wire, &mut pos, 2)?;
        let mac_len = u16::from_be_bytes([m[0], m[1]]) as usize;
        let mac = take(wire, &mut pos, mac_len)?.to_vec();
        let o = take(wire, &mut pos, 2)?;
        let original_id = u16::from_be_bytes([o[0], o[1]]);
        let e = take(wire, &mut pos, 2)?;
        let error = u16::from_be_bytes([e[0], e[1]]);
        let ol = take(wire, &mut pos, 2)?;
        let other_len = u16::from_be_bytes([ol[0], ol[1]]) as usize;
        let other = take(wire, &mut pos, other_len)?.to_vec();
        if pos != wire.len() {
            return Err(ProtoError::Malformed("trailing octets in tsig rdata"));
        }

        Ok(Tsig {
            key_name,
            algorithm,
            time_signed,
            fudge,
            mac,
            original_id,
            error,
            other,
        })
    }

    pub fn rdata_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.algorithm.wire());
        out.extend_from_slice(&u48_bytes(self.time_signed));
        out.extend_from_slice(&self.fudge.to_be_bytes());
        out.extend_from_slice(&(self.mac.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.mac);
        out.extend_from_slice(&self.original_id.to_be_bytes());
        out.extend_from_slice(&self.error.to_be_bytes());
        out.extend_from_slice(&(self.other.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.other);
        out
    }

    /// The TSIG variables that enter the MAC, RFC 8945 section 4.3.3.
    fn digest_variables(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&lower_wire(&self.key_name));
        out.extend_from_slice(&CLASS_ANY.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // TTL
        out.extend_from_slice(&lower_wire(&self.algorithm));
        out.extend_from_slice(&u48_bytes(self.time_signed));
        out.extend_from_slice(&self.fudge.to_be_bytes());
        out.extend_from_slice(&self.error.to_be_bytes());
        out.extend_from_slice(&(self.other.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.other);
        out
    }
}

fn take<'a>(wire: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], ProtoError> {
    let span = wire
        .get(*pos..*pos + n)
        .ok_or(ProtoError::Malformed("truncated tsig rdata"))?;
    *pos += n;
    Ok(span)
}

fn u48_bytes(v: u64) -> [u8; 6] {
    let b = v.to_be_bytes();
    [b[2], b[3], b[4], b[5], b[6], b[7]]
}

fn lower_wire(name: &Name) -> Vec<u8> {
    let mut lowered = name.clone();
    lowered.make_lower();
    lowered.wire().to_vec()
}

fn compute_mac(algorithm: &Name, secret: &[u8], chunks: &[&[u8]]) -> Option<Vec<u8>> {
    if algorithm == &**ALG_HMAC_SHA256 {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).ok()?;
        for c in chunks {
            mac.update(c);
        }
        Some(mac.finalize().into_bytes().to_vec())
    } else if algorithm == &**ALG_HMAC_SHA1 {
        let mut mac = Hmac::<Sha1>::new_from_slice(secret).ok()?;
        for c in chunks {
            mac.update(c);
        }
        Some(mac.finalize().into_bytes().to_vec())
    } else {
        None
    }
}

/// The message as it entered the MAC: TSIG RR stripped, ARCOUNT
/// decremented, original ID restored.
fn unsigned_message(msg: &[u8], tsig_offset: usize, original_id: u16) -> Vec<u8> {
    let mut out = msg[..tsig_offset].to_vec();
    out[..2].copy_from_slice(&original_id.to_be_bytes());
    let arcount = u16::from_be_bytes([out[10], out[11]]).saturating_sub(1);
    out[10..12].copy_from_slice(&arcount.to_be_bytes());
    out
}

/// Verify a signed request.  On failure the returned code goes into the
/// TSIG RDATA of a NOTAUTH response.
pub fn verify_request(
    msg: &[u8],
    tsig_offset: usize,
    tsig: &Tsig,
    keyring: &TsigKeyring,
    now: u64,
) -> Result<(), u16> {
    let key = match keyring.get(&tsig.key_name) {
        Some(key) => key,
        None => return Err(TSIG_ERR_BADKEY),
    };
    if key.algorithm != tsig.algorithm {
        return Err(TSIG_ERR_BADKEY);
    }

    let message = unsigned_message(msg, tsig_offset, tsig.original_id);
    let variables = tsig.digest_variables();
    let mac = compute_mac(&tsig.algorithm, &key.secret, &[&message, &variables])
        .ok_or(TSIG_ERR_BADKEY)?;
    if mac.len() != tsig.mac.len() || !constant_time_eq(&mac, &tsig.mac) {
        return Err(TSIG_ERR_BADSIG);
    }

    let skew = now.abs_diff(tsig.time_signed);
    if skew > tsig.fudge as u64 {
        return Err(TSIG_ERR_BADTIME);
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Sign a finished response in place: computes the MAC over the request
/// MAC, the response and the TSIG variables, then appends the TSIG RR
/// and bumps ARCOUNT.
pub fn sign_response(
    msg: &mut Vec<u8>,
    key: &TsigKey,
    request: &Tsig,
    now: u64,
    error: u16,
) -> Result<(), ProtoError> {
    // a BADTIME response reports the server's clock in OTHER DATA
    let other = if error == TSIG_ERR_BADTIME {
        u48_bytes(now).to_vec()
    } else {
        Vec::new()
    };
    // a BADKEY/BADSIG response carries the TSIG RR with an empty MAC
    let mut tsig = Tsig {
        key_name: key.name.clone(),
        algorithm: key.algorithm.clone(),
        time_signed: now,
        fudge: 300,
        mac: Vec::new(),
        original_id: request.original_id,
        error,
        other,
    };

    if error != TSIG_ERR_BADKEY && error != TSIG_ERR_BADSIG {
        let request_mac_len = (request.mac.len() as u16).to_be_bytes();
        let variables = tsig.digest_variables();
        tsig.mac = compute_mac(
            &key.algorithm,
            &key.secret,
            &[&request_mac_len, &request.mac, msg, &variables],
        )
        .ok_or(ProtoError::Malformed("unsupported tsig algorithm"))?;
    }

    append_tsig_rr(msg, key, &tsig);
    Ok(())
}

/// Sign a request in place.  A request MAC covers only the message
/// and the TSIG variables, with no prior-MAC component.
pub fn sign_request(msg: &mut Vec<u8>, key: &TsigKey, now: u64) -> Result<(), ProtoError> {
    let original_id = u16::from_be_bytes([msg[0], msg[1]]);
    let mut tsig = Tsig {
        key_name: key.name.clone(),
        algorithm: key.algorithm.clone(),
        time_signed: now,
        fudge: 300,
        mac: Vec::new(),
        original_id,
        error: 0,
        other: Vec::new(),
    };
    let variables = tsig.digest_variables();
    tsig.mac = compute_mac(&key.algorithm, &key.secret, &[msg, &variables])
        .ok_or(ProtoError::Malformed("unsupported tsig algorithm"))?;

    append_tsig_rr(msg, key, &tsig);
    Ok(())
}

fn append_tsig_rr(msg: &mut Vec<u8>, key: &TsigKey, tsig: &Tsig) {
    let rdata = tsig.rdata_wire();
    msg.extend_from_slice(key.name.wire());
    msg.extend_from_slice(&TYPE_TSIG.to_be_bytes());
    msg.extend_from_slice(&CLASS_ANY.to_be_bytes());
    msg.extend_from_slice(&0u32.to_be_bytes());
    msg.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    msg.extend_from_slice(&rdata);

    let arcount = u16::from_be_bytes([msg[10], msg[11]]) + 1;
    msg[10..12].copy_from_slice(&arcount.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::header::Header;
    use crate::dns::TYPE_TSIG;

    fn test_key() -> TsigKey {
        TsigKey {
            name: Arc::new(Name::from_text("transfer-key.").unwrap()),
            algorithm: ALG_HMAC_SHA256.clone(),
            secret: b"0123456789abcdef".to_vec(),
        }
    }

    #[test]
    fn test_algorithm_name_wire_forms() {
        assert_eq!(**ALG_HMAC_SHA1, Name::from_text("hmac-sha1.").unwrap());
        assert_eq!(**ALG_HMAC_SHA256, Name::from_text("hmac-sha256.").unwrap());
        assert_eq!(1, ALG_HMAC_SHA1.label_count());
        assert_eq!(1, ALG_HMAC_SHA256.label_count());
    }

    fn signed_query(key: &TsigKey, now: u64) -> (Vec<u8>, usize) {
        let mut msg = Vec::new();
        let mut hd = Header::new();
        hd.with_id(0x4242);
        msg.extend_from_slice(hd.bytes());

        let offset = msg.len();
        sign_request(&mut msg, key, now).unwrap();
        (msg, offset)
    }

    fn parse_tsig(msg: &[u8], offset: usize, key: &TsigKey) -> Tsig {
        // owner
        let (owner, used) = Name::parse(msg, offset).unwrap();
        assert_eq!(&owner, &*key.name);
        let pos = offset + used + 2 + 2 + 4;
        let rdlen = u16::from_be_bytes([msg[pos], msg[pos + 1]]) as usize;
        let rdata =
            Rdata::parse(TYPE_TSIG, &msg[pos + 2..pos + 2 + rdlen]).unwrap();
        Tsig::from_rr(Arc::new(owner), &rdata).unwrap()
    }

    #[test]
    fn test_verify_request_good() {
        let key = test_key();
        let mut ring = TsigKeyring::new();
        ring.insert(key.clone());
        let (msg, offset) = signed_query(&key, 1_700_000_000);
        let tsig = parse_tsig(&msg, offset, &key);
        assert_eq!(Ok(()), verify_request(&msg, offset, &tsig, &ring, 1_700_000_100));
    }

    #[test]
    fn test_verify_request_badsig() {
        let key = test_key();
        let mut ring = TsigKeyring::new();
        ring.insert(TsigKey {
            secret: b"wrong-secret".to_vec(),
            ..key.clone()
        });
        let (msg, offset) = signed_query(&key, 1_700_000_000);
        let tsig = parse_tsig(&msg, offset, &key);
        assert_eq!(
            Err(TSIG_ERR_BADSIG),
            verify_request(&msg, offset, &tsig, &ring, 1_700_000_000)
        );
    }

    #[test]
    fn test_verify_request_badkey_and_badtime() {
        let key = test_key();
        let (msg, offset) = signed_query(&key, 1_700_000_000);
        let tsig = parse_tsig(&msg, offset, &key);

        let empty = TsigKeyring::new();
        assert_eq!(
            Err(TSIG_ERR_BADKEY),
            verify_request(&msg, offset, &tsig, &empty, 1_700_000_000)
        );

        let mut ring = TsigKeyring::new();
        ring.insert(key);
        assert_eq!(
            Err(TSIG_ERR_BADTIME),
            verify_request(&msg, offset, &tsig, &ring, 1_700_009_999)
        );
    }

    #[test]
    fn test_sign_response_appends_last() {
        let key = test_key();
        let (request, offset) = signed_query(&key, 1_700_000_000);
        let req_tsig = parse_tsig(&request, offset, &key);

        let mut response = Vec::new();
        let mut hd = Header::new();
        hd.with_id(0x4242).with_qr(true);
        response.extend_from_slice(hd.bytes());
        let unsigned_len = response.len();

        sign_response(&mut response, &key, &req_tsig, 1_700_000_001, 0).unwrap();
        assert!(response.len() > unsigned_len);
        let parsed = parse_tsig(&response, unsigned_len, &key);
        assert!(!parsed.mac.is_empty());
        assert_eq!(1, u16::from_be_bytes([response[10], response[11]]));
    }
}
