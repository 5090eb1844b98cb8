//! Host key signature verification and agent-held user keys.

#[allow(unused_imports)]
use {
    crate::error::*,
    log::{debug, error, info, log, trace, warn},
};

use sha2::{Digest, Sha256};
use signature::Verifier;

use crate::*;
use packets::{Ed25519Sig, PubKey, RSA256Sig, RSASig, Signature};
use sshnames::*;
use sshwire::BinString;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SigType {
    Ed25519,
    /// `ssh-rsa`, SHA-1 digest
    RsaSha1,
    /// `rsa-sha2-256`
    RsaSha256,
}

impl SigType {
    /// Must be a valid name
    pub fn from_name(name: &'static str) -> Result<Self> {
        match name {
            SSH_NAME_ED25519 => Ok(SigType::Ed25519),
            SSH_NAME_RSA => Ok(SigType::RsaSha1),
            SSH_NAME_RSA_SHA256 => Ok(SigType::RsaSha256),
            _ => Err(Error::bug()),
        }
    }

    /// Returns a valid name
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            SigType::Ed25519 => SSH_NAME_ED25519,
            SigType::RsaSha1 => SSH_NAME_RSA,
            SigType::RsaSha256 => SSH_NAME_RSA_SHA256,
        }
    }

    /// Verifies `sig` over `msg` with public key `k`.
    ///
    /// The message is the raw exchange hash for host keys, or the
    /// session-id-prefixed auth request for user keys.
    pub fn verify(&self, k: &PubKey, msg: &[u8], sig: &Signature) -> Result<()> {
        match (self, k, sig) {
            (SigType::Ed25519, PubKey::Ed25519(k), Signature::Ed25519(Ed25519Sig { sig })) => {
                let k: &[u8; 32] = k.key.0.try_into().map_err(|_| Error::BadKey)?;
                let k = ed25519_dalek::VerifyingKey::from_bytes(k).map_err(|_| Error::BadKey)?;
                let sig = ed25519_dalek::Signature::from_slice(sig.0).map_err(|_| Error::BadSig)?;
                k.verify(msg, &sig).map_err(|_| Error::BadSig)
            }
            (SigType::RsaSha1, PubKey::RSA(k), Signature::RSA(RSASig { sig })) => {
                let k = rsa_pubkey(k)?;
                let k = rsa::pkcs1v15::VerifyingKey::<sha1::Sha1>::new(k);
                let sig = rsa::pkcs1v15::Signature::try_from(sig.0).map_err(|_| Error::BadSig)?;
                k.verify(msg, &sig).map_err(|_| Error::BadSig)
            }
            (SigType::RsaSha256, PubKey::RSA(k), Signature::RSA256(RSA256Sig { sig })) => {
                let k = rsa_pubkey(k)?;
                let k = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(k);
                let sig = rsa::pkcs1v15::Signature::try_from(sig.0).map_err(|_| Error::BadSig)?;
                k.verify(msg, &sig).map_err(|_| Error::BadSig)
            }
            _ => {
                debug!("Signature algorithm mismatch for key type");
                Err(Error::BadSig)
            }
        }
    }
}

fn rsa_pubkey(k: &packets::RSAPubKey) -> Result<rsa::RsaPublicKey> {
    rsa::RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(k.n.0),
        rsa::BigUint::from_bytes_be(k.e.0),
    )
    .map_err(|e| {
        debug!("Bad RSA key: {e}");
        Error::BadKey
    })
}

/// A user public key whose private half is held by an external agent.
///
/// The client never sees key material, only signatures. The blob is the SSH
/// wire encoding of the public key, as listed by the agent.
#[derive(Clone, PartialEq)]
pub struct AgentKey {
    blob: Vec<u8>,
}

impl core::fmt::Debug for AgentKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AgentKey(len={})", self.blob.len())
    }
}

impl AgentKey {
    pub fn new(blob: Vec<u8>) -> Self {
        AgentKey { blob }
    }

    /// The wire encoding of the public key.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Parses the blob into a structured public key.
    pub fn pubkey(&self) -> Result<PubKey<'_>> {
        sshwire::read_ssh(&self.blob, None)
    }

    /// SHA-256 digest of the key blob.
    ///
    /// Kept on the connection after a successful publickey auth, for
    /// connection-reuse logic in callers.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(&self.blob).into()
    }
}

/// A signature produced by the agent, with storage.
#[derive(Debug, Clone)]
pub enum OwnedSig {
    Ed25519(Vec<u8>),
    RsaSha1(Vec<u8>),
    RsaSha256(Vec<u8>),
}

impl<'a> From<&'a OwnedSig> for Signature<'a> {
    fn from(s: &'a OwnedSig) -> Self {
        match s {
            OwnedSig::Ed25519(v) => Signature::Ed25519(Ed25519Sig { sig: BinString(v) }),
            OwnedSig::RsaSha1(v) => Signature::RSA(RSASig { sig: BinString(v) }),
            OwnedSig::RsaSha256(v) => Signature::RSA256(RSA256Sig { sig: BinString(v) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skifflog::init_test_log;
    use crate::sshwire::{write_ssh_vec, Blob};

    #[test]
    fn ed25519_verify() {
        init_test_log();
        use ed25519_dalek::Signer;
        let sk = ed25519_dalek::SigningKey::generate(&mut rand_core::OsRng);
        let vk = sk.verifying_key();
        let keybytes = vk.to_bytes();
        let pk = PubKey::Ed25519(packets::Ed25519PubKey { key: BinString(&keybytes) });

        let msg = b"the exchange hash";
        let sig = sk.sign(msg).to_bytes();
        let wire_sig = Signature::Ed25519(Ed25519Sig { sig: BinString(&sig) });

        SigType::Ed25519.verify(&pk, msg, &wire_sig).unwrap();

        // tampered message fails
        let e = SigType::Ed25519.verify(&pk, b"not the hash", &wire_sig).unwrap_err();
        assert!(matches!(e, Error::BadSig));
    }

    #[test]
    fn rsa_verify() {
        init_test_log();
        use rsa::signature::SignatureEncoding;
        use rsa::signature::Signer;
        use rsa::traits::PublicKeyParts;
        // small key, test only
        let sk = rsa::RsaPrivateKey::new(&mut rand_core::OsRng, 1024).unwrap();
        let vk = rsa::RsaPublicKey::from(&sk);
        let n = vk.n().to_bytes_be();
        let e = vk.e().to_bytes_be();
        let pk = PubKey::RSA(packets::RSAPubKey { e: BinString(&e), n: BinString(&n) });

        let msg = b"the exchange hash";
        let signer = rsa::pkcs1v15::SigningKey::<sha1::Sha1>::new(sk);
        let sig = signer.sign(msg).to_vec();
        let wire_sig = Signature::RSA(RSASig { sig: BinString(&sig) });

        SigType::RsaSha1.verify(&pk, msg, &wire_sig).unwrap();
        let err = SigType::RsaSha1.verify(&pk, b"other", &wire_sig).unwrap_err();
        assert!(matches!(err, Error::BadSig));
    }

    #[test]
    fn agent_key_blob_roundtrip() {
        let keybytes = [7u8; 32];
        let pk = PubKey::Ed25519(packets::Ed25519PubKey { key: BinString(&keybytes) });
        let blob = write_ssh_vec(&pk).unwrap();
        let k = AgentKey::new(blob);
        assert!(matches!(k.pubkey().unwrap(), PubKey::Ed25519(_)));
        // digest is stable
        assert_eq!(k.digest(), k.digest());
        let _ = Blob(k.pubkey().unwrap());
    }
}
