//! Key generation, signing and verification.
//!
//! Keys are Ed25519. The private half is stored as the base64 encoding of the
//! 32-byte secret seed and the public half as the base64 encoding of the
//! 32-byte verifying key. Signatures are the base64 encoding of the 64-byte
//! Ed25519 signature over the UTF-8 bytes of the document content.
//!
//! Ed25519 signing is deterministic: the same key and content always give the
//! same signature, so re-signing a redelivered batch rewrites identical rows.

use base64::{Engine, engine::general_purpose::STANDARD};
use ed25519_dalek::{
    PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH, Signature as Ed25519Signature, Signer, SigningKey,
    Verifier, VerifyingKey,
};
use rand::{Rng, rngs::OsRng};
use zeroize::Zeroizing;

use crate::{
    error::{Result, SignerError},
    events::AvailableKey,
    model::{Document, Key, Signature},
};

/// Length of generated record ids.
pub const ID_LENGTH: usize = 16;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Returns a fresh random id of [`ID_LENGTH`] lowercase base-36 characters.
#[must_use]
pub fn new_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH).map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())])).collect()
}

/// Generates a key pair with a fresh random id.
#[must_use]
pub fn generate_key() -> Key {
    let signing_key = SigningKey::generate(&mut OsRng);
    let seed: Zeroizing<[u8; SECRET_KEY_LENGTH]> = Zeroizing::new(signing_key.to_bytes());
    Key::new(
        new_id(),
        STANDARD.encode(&*seed),
        STANDARD.encode(signing_key.verifying_key().to_bytes()),
    )
}

/// A decoded key ready to sign documents.
///
/// Decoding happens once per checkout; the secret is scrubbed when the
/// signer is dropped.
pub struct KeySigner {
    key_id: String,
    signing_key: SigningKey,
}

impl KeySigner {
    /// Decodes the secret carried by an available-key message.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::InvalidKeyMaterial`] if the secret is not valid
    /// base64 or not exactly 32 bytes.
    pub fn from_available(key: &AvailableKey) -> Result<Self> {
        let signing_key = decode_secret(&key.id, &key.private)?;
        Ok(Self { key_id: key.id.clone(), signing_key })
    }

    /// Id of the key this signer uses.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Signs raw content and returns the base64 signature.
    #[must_use]
    pub fn sign_content(&self, content: &str) -> String {
        STANDARD.encode(self.signing_key.sign(content.as_bytes()).to_bytes())
    }

    /// Produces the signature record of one document.
    #[must_use]
    pub fn sign(&self, document: &Document) -> Signature {
        Signature {
            id: document.id.clone(),
            key_id: self.key_id.clone(),
            signature: self.sign_content(&document.content),
        }
    }
}

impl std::fmt::Debug for KeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySigner").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

fn decode_secret(key_id: &str, private: &str) -> Result<SigningKey> {
    let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
        STANDARD
            .decode(private.as_bytes())
            .map_err(|e| SignerError::invalid_key_material(key_id, format!("base64 decode: {e}")))?,
    );
    let seed: Zeroizing<[u8; SECRET_KEY_LENGTH]> =
        Zeroizing::new(bytes.as_slice().try_into().map_err(|_| {
            SignerError::invalid_key_material(
                key_id,
                format!("expected {SECRET_KEY_LENGTH} bytes, got {}", bytes.len()),
            )
        })?);
    Ok(SigningKey::from_bytes(&seed))
}

/// Checks `signature` over `content` against a base64 public key.
///
/// Returns `false` for any malformed input as well as for a signature that
/// does not verify.
#[must_use]
pub fn verify(public: &str, content: &str, signature: &str) -> bool {
    let Ok(public_bytes) = STANDARD.decode(public.as_bytes()) else {
        return false;
    };
    let Ok(public_bytes) = <[u8; PUBLIC_KEY_LENGTH]>::try_from(public_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_bytes) else {
        return false;
    };
    let Ok(signature_bytes) = STANDARD.decode(signature.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Ed25519Signature::from_slice(&signature_bytes) else {
        return false;
    };
    verifying_key.verify(content.as_bytes(), &signature).is_ok()
}
