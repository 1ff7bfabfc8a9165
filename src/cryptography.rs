use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use crate::errors::BackupError;
use crate::{ENCRYPTED_KEY_SIZE, PUBLIC_KEY_SIZE, SESSION_KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const RSA_KEY_BITS: usize = 1024;

/// The protocol pins the CBC initialization vector to sixteen zero bytes.
/// Insecure as a general construction, but both ends must agree on it and
/// the server only accepts this exact mode.
const ZERO_IV: [u8; 16] = [0u8; 16];

/// DER envelope that turns the 140-byte PKCS#1 `RSAPublicKey` of a
/// 1024-bit key into the SubjectPublicKeyInfo form the server expects.
/// The rsaEncryption AlgorithmIdentifier carries no NULL parameter
/// (Crypto++ flavour), which fixes the whole encoding at 160 bytes.
const SPKI_PREFIX: [u8; 20] = [
    0x30, 0x81, 0x9d, // SEQUENCE, 157 bytes
    0x30, 0x0b, // AlgorithmIdentifier SEQUENCE, 11 bytes
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01, // OID rsaEncryption
    0x03, 0x81, 0x8d, 0x00, // BIT STRING, 141 bytes, no unused bits
];

/// Per-session symmetric cipher: AES-256 in CBC mode with PKCS#7 padding
/// and the protocol's zero IV. The key is either issued by the server
/// (decrypted out of the key-exchange response) or freshly generated.
pub struct SessionCipher {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionCipher {
    /// Wrap an externally supplied key. Anything but 32 bytes is refused.
    pub fn new(key: &[u8]) -> Result<Self, BackupError> {
        if key.len() != SESSION_KEY_SIZE {
            return Err(BackupError::InvalidKeyLength(key.len()));
        }
        let mut buf = [0u8; SESSION_KEY_SIZE];
        buf.copy_from_slice(key);
        Ok(SessionCipher { key: buf })
    }

    /// Fresh 32-byte key from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        SessionCipher { key }
    }

    pub fn key(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.key
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.into(), &ZERO_IV.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BackupError> {
        Aes256CbcDec::new(&self.key.into(), &ZERO_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| BackupError::Crypto(format!("AES decryption failed: {e}")))
    }
}

/// Long-term asymmetric identity: a 1024-bit RSA key pair. The private
/// half round-trips through PKCS#8 DER for storage in the identity file;
/// the public half travels on the wire in the fixed 160-byte
/// SubjectPublicKeyInfo encoding.
pub struct IdentityKey {
    key: RsaPrivateKey,
}

impl IdentityKey {
    pub fn generate() -> Result<Self, BackupError> {
        let key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| BackupError::Crypto(format!("RSA key generation failed: {e}")))?;
        Ok(IdentityKey { key })
    }

    pub fn from_der(der: &[u8]) -> Result<Self, BackupError> {
        let key = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| BackupError::Crypto(format!("malformed private key: {e}")))?;
        Ok(IdentityKey { key })
    }

    pub fn to_der(&self) -> Result<Vec<u8>, BackupError> {
        Ok(self
            .key
            .to_pkcs8_der()
            .map_err(|e| BackupError::Crypto(format!("private key export failed: {e}")))?
            .as_bytes()
            .to_vec())
    }

    /// The 160-byte public key encoding sent in the send-public-key
    /// request. Packed field-by-field: the fixed DER envelope, then the
    /// PKCS#1 body. A 1024-bit modulus with the standard exponent always
    /// yields a 140-byte body, so the total length is invariant.
    pub fn public_key_spki(&self) -> Result<[u8; PUBLIC_KEY_SIZE], BackupError> {
        let pkcs1 = self
            .key
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| BackupError::Crypto(format!("public key export failed: {e}")))?;
        let body = pkcs1.as_bytes();
        if SPKI_PREFIX.len() + body.len() != PUBLIC_KEY_SIZE {
            return Err(BackupError::Crypto(format!(
                "public key encodes to {} bytes, expected {}",
                SPKI_PREFIX.len() + body.len(),
                PUBLIC_KEY_SIZE
            )));
        }

        let mut spki = [0u8; PUBLIC_KEY_SIZE];
        spki[..SPKI_PREFIX.len()].copy_from_slice(&SPKI_PREFIX);
        spki[SPKI_PREFIX.len()..].copy_from_slice(body);
        Ok(spki)
    }

    /// OAEP-SHA1 decryption with the private key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BackupError> {
        self.key
            .decrypt(Oaep::new::<Sha1>(), ciphertext)
            .map_err(|e| BackupError::Crypto(format!("RSA decryption failed: {e}")))
    }

    /// Recover the server-issued session key from the 128-byte encrypted
    /// tail of a key-exchange response. Any decrypted length other than
    /// 32 bytes is rejected.
    pub fn decrypt_session_key(
        &self,
        ciphertext: &[u8],
    ) -> Result<[u8; SESSION_KEY_SIZE], BackupError> {
        if ciphertext.len() != ENCRYPTED_KEY_SIZE {
            return Err(BackupError::Crypto(format!(
                "encrypted session key is {} bytes, expected {}",
                ciphertext.len(),
                ENCRYPTED_KEY_SIZE
            )));
        }

        let plain = self.decrypt(ciphertext)?;
        if plain.len() != SESSION_KEY_SIZE {
            return Err(BackupError::Crypto(format!(
                "decrypted session key is {} bytes, expected {}",
                plain.len(),
                SESSION_KEY_SIZE
            )));
        }

        let mut key = [0u8; SESSION_KEY_SIZE];
        key.copy_from_slice(&plain);
        Ok(key)
    }
}

/// OAEP-SHA1 encryption under a peer's 160-byte public key encoding.
/// This is the server's half of the key exchange; the client itself only
/// needs it in tests, but it is part of the cipher contract.
pub fn encrypt_with_public(spki: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, BackupError> {
    let key = public_key_from_spki(spki)?;
    key.encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext)
        .map_err(|e| BackupError::Crypto(format!("RSA encryption failed: {e}")))
}

fn public_key_from_spki(spki: &[u8]) -> Result<RsaPublicKey, BackupError> {
    if spki.len() != PUBLIC_KEY_SIZE || spki[..SPKI_PREFIX.len()] != SPKI_PREFIX {
        return Err(BackupError::Crypto(
            "malformed public key encoding".to_string(),
        ));
    }
    RsaPublicKey::from_pkcs1_der(&spki[SPKI_PREFIX.len()..])
        .map_err(|e| BackupError::Crypto(format!("malformed public key: {e}")))
}
