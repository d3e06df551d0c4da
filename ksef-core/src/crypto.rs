//! Encryption and hashing primitives used by the KSeF protocol.
use aes::Aes256;
use aes::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64ct::{Base64, Encoding};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::api::KsefError;

pub const AES_KEY_LEN: usize = 32;
pub const AES_IV_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// RSA-OAEP with SHA-256 as both digest and MGF1 hash, no label.
pub fn rsa_oaep_encrypt(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, KsefError> {
    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|e| KsefError::Crypto(format!("RSA-OAEP encryption failed: {e}")))
}

/// AES-256-CBC with PKCS#7 padding.
pub fn aes_cbc_encrypt(
    key: &[u8; AES_KEY_LEN],
    iv: &[u8; AES_IV_LEN],
    plaintext: &[u8],
) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn sha256_base64(data: &[u8]) -> String {
    Base64::encode_string(&sha256(data))
}

/// Fresh AES key and IV from the OS random source.
pub fn random_key_material() -> ([u8; AES_KEY_LEN], [u8; AES_IV_LEN]) {
    let mut key = [0u8; AES_KEY_LEN];
    let mut iv = [0u8; AES_IV_LEN];
    OsRng.fill_bytes(&mut key);
    OsRng.fill_bytes(&mut iv);
    (key, iv)
}
