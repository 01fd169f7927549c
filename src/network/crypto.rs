//! The two cryptographic envelopes of the network protocol, and the password
//! lookup they authenticate against.
//!
//! Signing wraps the datagram in a part carrying
//! `HMAC-SHA256(password, username ‖ payload)` followed by the username; the
//! payload itself stays in clear. Encryption derives an AES-256 key as
//! `SHA-256(password)` and runs OFB over `SHA-1(payload) ‖ payload`, so the
//! receiver can both decrypt and detect tampering.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str;

use aes::Aes256;
use hmac::{Hmac, Mac};
use ofb::cipher::{KeyIvInit, StreamCipher};
use ofb::Ofb;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::errors::NetworkError;
use crate::network::{TYPE_ENCRYPT_AES256, TYPE_SIGN_SHA256};

type HmacSha256 = Hmac<Sha256>;
type Aes256Ofb = Ofb<Aes256>;

/// The size of the SHA-1 checksum leading an encrypted payload.
const CHECKSUM_LEN: usize = 20;

/// The size of the HMAC-SHA256 digest leading a signature part.
const MAC_LEN: usize = 32;

/// Maps a username to its password. Shared read-only across server tasks;
/// the mapping is expected to stay unchanged for the server's lifetime.
pub trait PasswordLookup: Send + Sync {
    /// Returns the password for `username`, or `None` for an unknown user.
    fn password(&self, username: &str) -> Option<String>;
}

impl PasswordLookup for HashMap<String, String> {
    fn password(&self, username: &str) -> Option<String> {
        self.get(username).cloned()
    }
}

/// A password lookup backed by a file of `username: password` lines, the
/// format collectd's network plugin uses for its `AuthFile` option. Blank
/// lines and `#` comments are ignored; whitespace around the colon is
/// tolerated.
#[derive(Debug, Clone)]
pub struct AuthFile {
    users: HashMap<String, String>,
}

impl AuthFile {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<AuthFile> {
        AuthFile::read(BufReader::new(File::open(path)?))
    }

    fn read<R: BufRead>(reader: R) -> io::Result<AuthFile> {
        let mut users = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(idx) = line.find(':') {
                let username = line[..idx].trim();
                let password = line[idx + 1..].trim();
                users.insert(username.to_owned(), password.to_owned());
            }
        }
        Ok(AuthFile { users })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl PasswordLookup for AuthFile {
    fn password(&self, username: &str) -> Option<String> {
        self.users.get(username).cloned()
    }
}

fn hmac(password: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(password.as_bytes()).expect("HMAC accepts keys of any length")
}

/// Wraps `payload` in a signature part. The part carries the digest and the
/// username; the payload follows in clear and is covered by the digest.
pub fn sign(payload: &[u8], username: &str, password: &str) -> Vec<u8> {
    let mut mac = hmac(password);
    mac.update(username.as_bytes());
    mac.update(payload);

    let size = 4 + MAC_LEN + username.len();
    let mut out = Vec::with_capacity(size + payload.len());
    out.extend_from_slice(&TYPE_SIGN_SHA256.to_be_bytes());
    out.extend_from_slice(&(size as u16).to_be_bytes());
    out.extend_from_slice(&mac.finalize().into_bytes());
    out.extend_from_slice(username.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Verifies a signature part (`digest ‖ username`, header stripped) against
/// the payload that follows it in the datagram. The digest comparison is
/// constant time.
pub fn verify(
    part: &[u8],
    payload: &[u8],
    lookup: &dyn PasswordLookup,
) -> Result<(), NetworkError> {
    if part.len() <= MAC_LEN {
        return Err(NetworkError::Invalid("signature part too small"));
    }

    let username = str::from_utf8(&part[MAC_LEN..])
        .map_err(|_| NetworkError::Invalid("username is not valid UTF-8"))?;
    let password = lookup
        .password(username)
        .ok_or_else(|| NetworkError::UnknownUser(username.to_owned()))?;

    let mut mac = hmac(&password);
    mac.update(&part[MAC_LEN..]);
    mac.update(payload);
    mac.verify_slice(&part[..MAC_LEN])
        .map_err(|_| NetworkError::AuthFailure)
}

/// Wraps `payload` in an encryption part with a fresh random IV.
pub fn encrypt(payload: &[u8], username: &str, password: &str) -> Result<Vec<u8>, NetworkError> {
    let mut iv = [0u8; 16];
    OsRng.fill_bytes(&mut iv);
    encrypt_with_iv(payload, username, password, &iv)
}

fn encrypt_with_iv(
    payload: &[u8],
    username: &str,
    password: &str,
    iv: &[u8; 16],
) -> Result<Vec<u8>, NetworkError> {
    let size = 4 + 2 + username.len() + iv.len() + CHECKSUM_LEN + payload.len();
    if size > usize::from(u16::max_value()) {
        return Err(NetworkError::Invalid("payload too large to encrypt"));
    }

    // Checksum and payload are contiguous plaintext, enciphered with a
    // single keystream.
    let mut sealed = Vec::with_capacity(CHECKSUM_LEN + payload.len());
    sealed.extend_from_slice(&Sha1::digest(payload));
    sealed.extend_from_slice(payload);

    let key = Sha256::digest(password.as_bytes());
    let mut cipher = Aes256Ofb::new_from_slices(&key, iv)
        .map_err(|_| NetworkError::Invalid("bad cipher parameters"))?;
    cipher.apply_keystream(&mut sealed);

    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&TYPE_ENCRYPT_AES256.to_be_bytes());
    out.extend_from_slice(&(size as u16).to_be_bytes());
    out.extend_from_slice(&(username.len() as u16).to_be_bytes());
    out.extend_from_slice(username.as_bytes());
    out.extend_from_slice(iv);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypts an encryption part (header stripped) and returns the plaintext
/// datagram. A checksum mismatch means the ciphertext was tampered with or
/// the password is wrong; either way the datagram is rejected.
pub fn decrypt(part: &[u8], lookup: &dyn PasswordLookup) -> Result<Vec<u8>, NetworkError> {
    if part.len() < 2 {
        return Err(NetworkError::Invalid("encrypted part truncated"));
    }
    let username_len = usize::from(u16::from_be_bytes([part[0], part[1]]));
    if part.len() < 2 + username_len + 16 + CHECKSUM_LEN {
        return Err(NetworkError::Invalid("encrypted part truncated"));
    }

    let username = str::from_utf8(&part[2..2 + username_len])
        .map_err(|_| NetworkError::Invalid("username is not valid UTF-8"))?;
    let password = lookup
        .password(username)
        .ok_or_else(|| NetworkError::UnknownUser(username.to_owned()))?;

    let iv = &part[2 + username_len..2 + username_len + 16];
    let mut data = part[2 + username_len + 16..].to_vec();

    let key = Sha256::digest(password.as_bytes());
    let mut cipher = Aes256Ofb::new_from_slices(&key, iv)
        .map_err(|_| NetworkError::Invalid("bad cipher parameters"))?;
    cipher.apply_keystream(&mut data);

    let (checksum, plaintext) = data.split_at(CHECKSUM_LEN);
    if Sha1::digest(plaintext).as_slice() != checksum {
        return Err(NetworkError::AuthFailure);
    }

    Ok(plaintext.to_vec())
}
