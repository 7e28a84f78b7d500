pub(crate) mod crypto;
pub(crate) mod encoding;
pub(crate) mod hash;
pub(crate) mod id;
pub(crate) mod merkle;
pub(crate) mod time;

pub use crypto::ed25519::Ed25519Keypair;
pub use crypto::{KeyPairError, PublicKey, Signature, Signer};
pub use encoding::{Decode, Encode};
pub use hash::HashType;
pub(crate) use merkle::Merkle;
pub use merkle::MerkleProof;
