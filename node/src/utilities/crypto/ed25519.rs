//! Uses the `ed25519-zebra` crate to implement signing and signature verification.
use ed25519_zebra::{Signature as ZebraSignature, SigningKey, VerificationKey, VerificationKeyBytes};
use rand::rngs::OsRng;

use crate::utilities::crypto::{KeyPairError, PublicKey, Signature, Signer};
use crate::utilities::encoding::{from_hex, to_hex};
use crate::utilities::hash::HashType;

// Careful with DEBUG, DISPLAY!!!
pub struct Ed25519Keypair {
    signing_key: SigningKey,
    verification_key: VerificationKey,
}

impl Ed25519Keypair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::new(OsRng);
        let verification_key = VerificationKey::from(&signing_key);
        Self {
            signing_key,
            verification_key,
        }
    }

    pub fn from_private_key_hex(hex: &str) -> Result<Self, KeyPairError> {
        let bytes = from_hex(hex).map_err(|_| KeyPairError::PrivateKey)?;
        let seed = <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| KeyPairError::SliceLength)?;
        let signing_key = SigningKey::from(seed);
        let verification_key = VerificationKey::from(&signing_key);
        Ok(Self {
            signing_key,
            verification_key,
        })
    }

    pub fn private_key_hex(&self) -> String {
        let seed: [u8; 32] = self.signing_key.into();
        to_hex(seed)
    }

    fn parse_public_key(public_key: &PublicKey) -> Result<VerificationKey, KeyPairError> {
        let raw = public_key.to_raw()?;
        let bytes = <[u8; 32]>::try_from(raw.as_slice()).map_err(|_| KeyPairError::SliceLength)?;
        VerificationKey::try_from(VerificationKeyBytes::from(bytes))
            .map_err(|_| KeyPairError::PublicKey(public_key.to_string()))
    }
}

impl Signer for Ed25519Keypair {
    fn public_key(&self) -> PublicKey {
        let raw: [u8; 32] = self.verification_key.into();
        PublicKey::from_raw(&raw)
    }

    fn sign(&self, hash: &HashType) -> Result<Signature, KeyPairError> {
        let signature = self.signing_key.sign(hash.as_bytes());
        let sig_data: [u8; 64] = signature.into();
        Ok(Signature::new(sig_data.to_vec()))
    }

    fn verify(&self, public_key: &PublicKey, hash: &HashType, signature: &Signature) -> bool {
        let verification_key = match Self::parse_public_key(public_key) {
            Ok(key) => key,
            Err(err) => {
                log::debug!("Rejecting signature, bad public key {public_key}: {err}");
                return false;
            }
        };
        let sig_bytes = match <[u8; 64]>::try_from(signature.as_bytes()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        verification_key
            .verify(&ZebraSignature::from(sig_bytes), hash.as_bytes())
            .is_ok()
    }
}

#[cfg(test)]
mod test {
    use crate::utilities::hash::Hasher;

    use super::*;

    #[test]
    fn test_sign_ok() {
        let keypair = Ed25519Keypair::generate();
        let hash = Hasher::digest(b"payload");
        let signature = keypair.sign(&hash).unwrap();
        assert!(keypair.verify(&keypair.public_key(), &hash, &signature));
    }

    #[test]
    fn test_sign_fail() {
        let keypair = Ed25519Keypair::generate();
        let other = Ed25519Keypair::generate();
        let hash = Hasher::digest(b"payload");
        let signature = keypair.sign(&hash).unwrap();

        assert!(!keypair.verify(&other.public_key(), &hash, &signature));
        assert!(!keypair.verify(&keypair.public_key(), &Hasher::digest(b"other"), &signature));
        assert!(!keypair.verify(&keypair.public_key(), &hash, &Signature::new(vec![1, 2, 3])));
    }

    #[test]
    fn test_private_key_hex_round_trip() {
        let keypair = Ed25519Keypair::generate();
        let restored = Ed25519Keypair::from_private_key_hex(&keypair.private_key_hex()).unwrap();
        assert_eq!(keypair.public_key(), restored.public_key());
    }
}
