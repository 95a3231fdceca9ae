//! ECIES-X25519: an integrated encryption scheme on Curve25519.
//!
//! A sealed message is `ephemeral_public(32) || nonce(12) || aes_gcm_ciphertext`.
//!   - The sender makes a fresh X25519 key per message and runs Diffie-Hellman
//!     against the receiver's public key.
//!   - HKDF-SHA256 over `ephemeral_public || shared_secret` gives the AES-256-GCM key.
//!
//! Only the holder of the receiver's `StaticSecret` can open it.

use crate::Error;
use aes_gcm::aead::{generic_array::GenericArray, Aead, NewAead};
use aes_gcm::Aes256Gcm;
use hkdf::Hkdf;
use rand_core::{CryptoRng, RngCore};
use sha2::Sha256;
use std::convert::TryInto;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

const PUBLIC_KEY_LENGTH: usize = 32;
const AES_IV_LENGTH: usize = 12;
const AES_TAG_LENGTH: usize = 16;

type AesKey = [u8; 32];

/// Generate a receiver keypair
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::new(&mut *rng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

/// Encrypt a message so only the receiver's secret can open it.
pub fn seal<R: RngCore + CryptoRng>(
    receiver_pub: &PublicKey,
    msg: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, Error> {
    let ephemeral_sk = EphemeralSecret::new(&mut *rng);
    let ephemeral_pk = PublicKey::from(&ephemeral_sk);

    let shared = ephemeral_sk.diffie_hellman(receiver_pub);
    let aes_key = derive_key(&ephemeral_pk, shared.as_bytes())?;

    let mut iv = [0u8; AES_IV_LENGTH];
    rng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new(GenericArray::from_slice(&aes_key));
    let encrypted = cipher
        .encrypt(GenericArray::from_slice(&iv), msg)
        .map_err(|_| Error::Encryption)?;

    let mut sealed = Vec::with_capacity(PUBLIC_KEY_LENGTH + AES_IV_LENGTH + encrypted.len());
    sealed.extend_from_slice(ephemeral_pk.as_bytes());
    sealed.extend_from_slice(&iv);
    sealed.extend(encrypted);

    Ok(sealed)
}

/// Decrypt a sealed message with the receiver's secret.
pub fn open(receiver_sec: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>, Error> {
    if sealed.len() < PUBLIC_KEY_LENGTH + AES_IV_LENGTH + AES_TAG_LENGTH {
        return Err(Error::MalformedCiphertext);
    }

    let ephemeral_pk: [u8; PUBLIC_KEY_LENGTH] = sealed[..PUBLIC_KEY_LENGTH]
        .try_into()
        .map_err(|_| Error::MalformedCiphertext)?;
    let ephemeral_pk = PublicKey::from(ephemeral_pk);
    let iv = &sealed[PUBLIC_KEY_LENGTH..PUBLIC_KEY_LENGTH + AES_IV_LENGTH];
    let encrypted = &sealed[PUBLIC_KEY_LENGTH + AES_IV_LENGTH..];

    let shared = receiver_sec.diffie_hellman(&ephemeral_pk);
    let aes_key = derive_key(&ephemeral_pk, shared.as_bytes())?;

    let cipher = Aes256Gcm::new(GenericArray::from_slice(&aes_key));
    cipher
        .decrypt(GenericArray::from_slice(iv), encrypted)
        .map_err(|_| Error::Decryption)
}

fn derive_key(ephemeral_pk: &PublicKey, shared: &[u8; 32]) -> Result<AesKey, Error> {
    let mut master = [0u8; PUBLIC_KEY_LENGTH * 2];
    master[..PUBLIC_KEY_LENGTH].copy_from_slice(ephemeral_pk.as_bytes());
    master[PUBLIC_KEY_LENGTH..].copy_from_slice(shared);

    let hkdf = Hkdf::<Sha256>::new(None, &master);
    let mut out = [0u8; 32];
    hkdf.expand(b"confidential_ballot/ecies", &mut out)
        .map_err(|_| Error::Encryption)?;

    Ok(out)
}
