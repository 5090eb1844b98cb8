//! Key exchange: algorithm negotiation, DH exchange, host key
//! verification, and derivation of the transport keys.
#![allow(non_upper_case_globals)]

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use digest::Digest;
use num_bigint::BigUint;
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::*;
use behaviour::CliBehaviour;
use comp::CompAlg;
use encrypt::{Cipher, Integ, Keys};
use ident::RemoteVersion;
use namelist::{LocalNames, NameList};
use packets::{Packet, PubKey};
use sign::SigType;
use sshnames::*;
use sshwire::{hash_mpint, hash_ser_length, mpint_magnitude, BinString};
use traffic::TrafSend;

use pretty_hex::PrettyHex;

/// The exchange hash of the first KEX, fixed for the life of the
/// connection. 20 bytes for sha1 methods, 32 for sha256.
pub type SessId = Vec<u8>;

const fixed_options_kex: &[&str] =
    &[SSH_NAME_CURVE25519, SSH_NAME_CURVE25519_LIBSSH, SSH_NAME_DH_GROUP14_SHA1];

const fixed_options_hostsig: &[&str] =
    &[SSH_NAME_ED25519, SSH_NAME_RSA_SHA256, SSH_NAME_RSA];

const fixed_options_cipher: &[&str] = &[
    SSH_NAME_AES256_CTR,
    SSH_NAME_AES192_CTR,
    SSH_NAME_AES128_CTR,
    SSH_NAME_AES256_CBC,
    SSH_NAME_AES192_CBC,
    SSH_NAME_AES128_CBC,
    SSH_NAME_3DES_CBC,
];
const fixed_options_mac: &[&str] =
    &[SSH_NAME_HMAC_SHA256, SSH_NAME_HMAC_SHA512, SSH_NAME_HMAC_SHA1];
const fixed_options_comp_off: &[&str] =
    &[SSH_NAME_NONE, SSH_NAME_ZLIB_OPENSSH, SSH_NAME_ZLIB];
const fixed_options_comp_on: &[&str] =
    &[SSH_NAME_ZLIB_OPENSSH, SSH_NAME_ZLIB, SSH_NAME_NONE];

pub(crate) struct AlgoConfig {
    kexs: LocalNames,
    hostsig: LocalNames,
    ciphers: LocalNames,
    macs: LocalNames,
    comps: LocalNames,
}

impl AlgoConfig {
    /// Creates the standard algorithm configuration.
    ///
    /// `compression` moves the zlib methods ahead of `none` in preference.
    pub fn new(compression: bool) -> Self {
        let comps = if compression { fixed_options_comp_on } else { fixed_options_comp_off };
        AlgoConfig {
            kexs: fixed_options_kex.into(),
            hostsig: fixed_options_hostsig.into(),
            ciphers: fixed_options_cipher.into(),
            macs: fixed_options_mac.into(),
            comps: comps.into(),
        }
    }
}

/// The current state of the Kex
#[derive(Debug)]
pub(crate) enum Kex {
    /// No key exchange in progress
    Idle,

    /// Waiting for a KexInit packet, have sent one.
    KexInit {
        // Cookie sent in our KexInit packet. Kept so that we can reproduce the
        // KexInit packet when calculating the exchange hash.
        our_cookie: KexCookie,
    },
    /// Waiting for KexDHReply
    KexDH { algos: Algos, kex_hash: KexHash },
    /// Waiting for NewKeys. `output` is new keys to take into use
    NewKeys { output: KexOutput, algos: Algos },

    /// A transient state used internally to transition between other states.
    ///
    /// Returned from .take().
    /// Should only ever occur while inside a method call, a proper state
    /// will be set before returning. (Could remain set if an error occurs,
    /// but an error returned from Kex is not recoverable anyway).
    Taken,
}

type KexCookie = [u8; 16];

pub(crate) struct KexHash {
    hash_ctx: Box<dyn digest::DynDigest + Send>,
}

impl fmt::Debug for KexHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexHash").finish_non_exhaustive()
    }
}

// kexhash state. progressively include version idents, kexinit payloads,
// hostkey, e/f, secret
impl KexHash {
    fn new(
        algos: &Algos,
        algo_conf: &AlgoConfig,
        our_cookie: &KexCookie,
        remote_version: &RemoteVersion,
        remote_kexinit: &packets::Packet,
    ) -> Result<Self> {
        // RFC4253 section 8:
        // The hash H is computed as the HASH hash of the concatenation of the
        // following:
        //    string    V_C, the client's identification string (CR and LF
        //              excluded)
        //    string    V_S, the server's identification string (CR and LF
        //              excluded)
        //    string    I_C, the payload of the client's SSH_MSG_KEXINIT
        //    string    I_S, the payload of the server's SSH_MSG_KEXINIT
        //    string    K_S, the host key
        //    mpint     e, exchange value sent by the client (aka q_c)
        //    mpint     f, exchange value sent by the server (aka q_s)
        //    mpint     K, the shared secret

        let mut kh = KexHash { hash_ctx: algos.kex.hash() };
        let remote_version = remote_version.version().trap()?;
        // Recreate our own kexinit packet to hash.
        let own_kexinit = Kex::make_kexinit(our_cookie, algo_conf);
        kh.hash_slice(ident::OUR_VERSION);
        kh.hash_slice(remote_version);
        hash_ser_length(&mut *kh.hash_ctx, &own_kexinit)?;
        hash_ser_length(&mut *kh.hash_ctx, remote_kexinit)?;
        // The remainder of hash_ctx is updated after kexdhreply

        Ok(kh)
    }

    /// Fill everything except K.
    ///
    /// `q_c` and `q_s` are the exchange values exactly as they appeared on
    /// the wire. For the group methods that is already the canonical mpint
    /// content, for curve25519 a plain string, so both hash identically.
    fn prefinish(&mut self, host_key: &PubKey, q_c: &[u8], q_s: &[u8]) -> Result<()> {
        hash_ser_length(&mut *self.hash_ctx, host_key)?;
        self.hash_slice(q_c);
        self.hash_slice(q_s);
        Ok(())
    }

    /// Compute the remainder of the hash, consuming KexHash.
    /// K is provided as raw bytes, it will be padded as an mpint
    /// internally.
    fn finish(mut self, k: &[u8]) -> SessId {
        hash_mpint(&mut *self.hash_ctx, k);
        self.hash_ctx.finalize_reset().to_vec()
    }

    // Hashes a slice, with added u32 length prefix.
    fn hash_slice(&mut self, v: &[u8]) {
        self.hash_ctx.update(&(v.len() as u32).to_be_bytes());
        self.hash_ctx.update(v);
    }
}

/// Records the chosen algorithms while key exchange proceeds
#[derive(Debug)]
pub(crate) struct Algos {
    pub kex: SharedSecret,
    pub hostsig: SigType,
    pub cipher_enc: Cipher,
    pub cipher_dec: Cipher,
    pub integ_enc: Integ,
    pub integ_dec: Integ,
    pub comp_enc: CompAlg,
    pub comp_dec: CompAlg,

    // If first_kex_packet_follows was set in SSH_MSG_KEXINIT but the
    // guessed algorithms don't match, we discard the next message
    // (RFC4253 Sec 7). This flag is reset to `false` after the packet has
    // been discarded.
    pub discard_next: bool,

    // always true in this client-only crate, flipped by tests that
    // need a matching pair of key sets.
    pub is_client: bool,
}

impl fmt::Display for Algos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Negotiated algorithms {{\nkex {}\nhostkey {}\ncipher c->s {}\ncipher s->c {}\nmac c->s {}\nmac s->c {}\n}}",
            self.kex, self.hostsig.algorithm_name(), self.cipher_enc, self.cipher_dec, self.integ_enc, self.integ_dec)
    }
}

impl Kex {
    pub fn new() -> Self {
        Kex::Idle
    }

    fn take(&mut self) -> Self {
        debug_assert!(!matches!(self, Kex::Taken));
        core::mem::replace(self, Kex::Taken)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Kex::Idle)
    }

    /// Sends a `KexInit` message. Must be called from `Idle` state
    pub fn send_kexinit(&mut self, conf: &AlgoConfig, s: &mut TrafSend) -> Result<()> {
        if !matches!(self, Kex::Idle) {
            return Err(Error::bug());
        }
        let mut our_cookie = [0u8; 16];
        random::fill_random(our_cookie.as_mut_slice())?;
        s.send(Kex::make_kexinit(&our_cookie, conf))?;
        *self = Kex::KexInit { our_cookie };
        Ok(())
    }

    pub fn handle_kexinit(
        &mut self,
        remote_kexinit: packets::KexInit,
        algo_conf: &AlgoConfig,
        remote_version: &RemoteVersion,
        s: &mut TrafSend,
    ) -> Result<()> {
        // Reply if we haven't already sent one (the server initiated a
        // rekey). This bumps the state to Kex::KexInit.
        if let Kex::Idle = self {
            self.send_kexinit(algo_conf, s)?;
        }

        let our_cookie = if let Kex::KexInit { ref our_cookie } = self {
            our_cookie
        } else {
            // already received a KexInit
            return error::PacketWrong.fail();
        };

        let algos = Self::algo_negotiation(&remote_kexinit, algo_conf)?;
        debug!("{algos}");

        let p = algos.kex.make_kexdhinit()?;
        s.send(p)?;
        let kex_hash =
            KexHash::new(&algos, algo_conf, our_cookie, remote_version, &remote_kexinit.into())?;
        *self = Kex::KexDH { algos, kex_hash };
        Ok(())
    }

    fn make_kexinit<'a>(cookie: &KexCookie, conf: &'a AlgoConfig) -> Packet<'a> {
        packets::KexInit {
            cookie: *cookie,
            kex: (&conf.kexs).into(),
            hostsig: (&conf.hostsig).into(),
            cipher_c2s: (&conf.ciphers).into(),
            cipher_s2c: (&conf.ciphers).into(),
            mac_c2s: (&conf.macs).into(),
            mac_s2c: (&conf.macs).into(),
            comp_c2s: (&conf.comps).into(),
            comp_s2c: (&conf.comps).into(),
            lang_c2s: NameList::empty(),
            lang_s2c: NameList::empty(),
            first_follows: false,
            reserved: 0,
        }
        .into()
    }

    pub fn handle_kexdhreply(
        &mut self,
        p: &packets::KexDHReply,
        s: &mut TrafSend,
        b: &mut dyn CliBehaviour,
    ) -> Result<()> {
        if let Kex::KexDH { algos, .. } = self {
            if algos.discard_next {
                algos.discard_next = false;
                // Ignore this packet, the peer's first_follows guess was wrong
                return Ok(());
            }
        }

        if let Kex::KexDH { mut algos, kex_hash } = self.take() {
            let output = SharedSecret::handle_kexdhreply(&mut algos, kex_hash, p, b)?;
            s.send(packets::NewKeys {})?;
            *self = Kex::NewKeys { output, algos };
            Ok(())
        } else {
            error::PacketWrong.fail()
        }
    }

    /// Takes the new keys into use for receiving, and becomes `Idle`.
    ///
    /// The first KEX's `H` becomes the persistent session id.
    pub fn handle_newkeys(
        &mut self,
        sess_id: &mut Option<SessId>,
        s: &mut TrafSend,
        authenticated: bool,
    ) -> Result<()> {
        if let Kex::NewKeys { output, algos } = self.take() {
            // We will have already sent our own NewKeys message when the
            // DH reply was handled.
            let sess_id = sess_id.get_or_insert(output.h.clone());
            let keys = Keys::derive(&output.k, &output.h, sess_id, &algos)?;
            s.rekey(keys, authenticated);
            *self = Kex::Idle;
            Ok(())
        } else {
            error::PacketWrong.fail()
        }
    }

    /// Perform SSH algorithm negotiation, RFC4253 Section 7.1.
    ///
    /// For each category the first name in the client's list that is also
    /// present in the server's list is selected.
    fn algo_negotiation(p: &packets::KexInit, conf: &AlgoConfig) -> Result<Algos> {
        let kex_method = p
            .kex
            .first_match(true, &conf.kexs)?
            .ok_or(Error::AlgoNoMatch { algo: "kex" })?;
        let kex = SharedSecret::from_name(kex_method)?;
        let goodguess_kex = p.kex.first() == conf.kexs.first();

        let hostsig_method = p
            .hostsig
            .first_match(true, &conf.hostsig)?
            .ok_or(Error::AlgoNoMatch { algo: "hostkey" })?;
        let hostsig = SigType::from_name(hostsig_method)?;
        let goodguess_hostkey = p.hostsig.first() == conf.hostsig.first();

        // c2s is our transmit direction as a client
        let n = p
            .cipher_c2s
            .first_match(true, &conf.ciphers)?
            .ok_or(Error::AlgoNoMatch { algo: "encryption" })?;
        let cipher_enc = Cipher::from_name(n)?;
        let n = p
            .cipher_s2c
            .first_match(true, &conf.ciphers)?
            .ok_or(Error::AlgoNoMatch { algo: "encryption" })?;
        let cipher_dec = Cipher::from_name(n)?;

        let n = p
            .mac_c2s
            .first_match(true, &conf.macs)?
            .ok_or(Error::AlgoNoMatch { algo: "mac" })?;
        let integ_enc = Integ::from_name(n)?;
        let n = p
            .mac_s2c
            .first_match(true, &conf.macs)?
            .ok_or(Error::AlgoNoMatch { algo: "mac" })?;
        let integ_dec = Integ::from_name(n)?;

        let n = p
            .comp_c2s
            .first_match(true, &conf.comps)?
            .ok_or(Error::AlgoNoMatch { algo: "compression" })?;
        let comp_enc = CompAlg::from_name(n)?;
        let n = p
            .comp_s2c
            .first_match(true, &conf.comps)?
            .ok_or(Error::AlgoNoMatch { algo: "compression" })?;
        let comp_dec = CompAlg::from_name(n)?;

        // Ignore language fields, an empty list is the common case.

        let discard_next = p.first_follows && !(goodguess_kex && goodguess_hostkey);

        Ok(Algos {
            kex,
            hostsig,
            cipher_enc,
            cipher_dec,
            integ_enc,
            integ_dec,
            comp_enc,
            comp_dec,
            discard_next,
            is_client: true,
        })
    }
}

pub(crate) enum SharedSecret {
    KexCurve25519(KexCurve25519),
    KexDhGroup14(KexDhGroup14),
}

impl fmt::Display for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::KexCurve25519(_) => SSH_NAME_CURVE25519,
            Self::KexDhGroup14(_) => SSH_NAME_DH_GROUP14_SHA1,
        };
        write!(f, "{n}")
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret({self})")
    }
}

impl SharedSecret {
    pub fn from_name(name: &'static str) -> Result<Self> {
        match name {
            SSH_NAME_CURVE25519 | SSH_NAME_CURVE25519_LIBSSH => {
                Ok(SharedSecret::KexCurve25519(KexCurve25519::new()?))
            }
            SSH_NAME_DH_GROUP14_SHA1 => {
                Ok(SharedSecret::KexDhGroup14(KexDhGroup14::new()?))
            }
            _ => Err(Error::bug()),
        }
    }

    /// A fresh instance of the exchange hash function for this method.
    pub(crate) fn hash(&self) -> Box<dyn digest::DynDigest + Send> {
        match self {
            SharedSecret::KexCurve25519(_) => Box::new(Sha256::new()),
            SharedSecret::KexDhGroup14(_) => Box::new(Sha1::new()),
        }
    }

    fn make_kexdhinit(&self) -> Result<Packet> {
        let q_c = BinString(self.pubkey());
        Ok(packets::KexDHInit { q_c }.into())
    }

    fn handle_kexdhreply(
        algos: &mut Algos,
        mut kex_hash: KexHash,
        p: &packets::KexDHReply,
        b: &mut dyn CliBehaviour,
    ) -> Result<KexOutput> {
        kex_hash.prefinish(&p.k_s.0, algos.kex.pubkey(), p.q_s.0)?;
        // consumes the sharedsecret private key in algos
        let kex_out = match &mut algos.kex {
            SharedSecret::KexCurve25519(k) => k.secret(p.q_s.0, kex_hash)?,
            SharedSecret::KexDhGroup14(k) => k.secret(p.q_s.0, kex_hash)?,
        };

        let h: &[u8] = kex_out.h.as_ref();
        trace!("verify h {:?}", h.hex_dump());
        algos.hostsig.verify(&p.k_s.0, h, &p.sig.0)?;
        debug!("Hostkey signature is valid");
        if matches!(b.valid_hostkey(&p.k_s.0), Ok(true)) {
            Ok(kex_out)
        } else {
            Err(Error::HostKeyRejected)
        }
    }

    fn pubkey(&self) -> &[u8] {
        match self {
            SharedSecret::KexCurve25519(k) => k.pubkey(),
            SharedSecret::KexDhGroup14(k) => k.pubkey(),
        }
    }
}

pub(crate) struct KexOutput {
    /// `H` for this exchange, conn takes the first as sess_id
    pub h: SessId,
    /// The raw shared secret
    pub k: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for KexOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexOutput").finish_non_exhaustive()
    }
}

impl KexOutput {
    fn new(k: Vec<u8>, kex_hash: KexHash) -> Self {
        let k = Zeroizing::new(k);
        let h = kex_hash.finish(&k);
        KexOutput { h, k }
    }
}

pub(crate) struct KexCurve25519 {
    // Initialised in `new()`, consumed when deriving the secret
    ours: Option<x25519_dalek::EphemeralSecret>,
    // pubkey is relatively expensive to compute from the secret key
    pubkey: [u8; 32],
}

impl fmt::Debug for KexCurve25519 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexCurve25519")
            .field("ours", &if self.ours.is_some() { "Some" } else { "None" })
            .finish_non_exhaustive()
    }
}

impl KexCurve25519 {
    fn new() -> Result<Self> {
        let ours = x25519_dalek::EphemeralSecret::random_from_rng(rand_core::OsRng);
        let pubkey = x25519_dalek::PublicKey::from(&ours);
        let pubkey = pubkey.to_bytes();
        Ok(KexCurve25519 { ours: Some(ours), pubkey })
    }

    fn pubkey(&self) -> &[u8] {
        &self.pubkey
    }

    fn secret(&mut self, theirs: &[u8], kex_hash: KexHash) -> Result<KexOutput> {
        let theirs: [u8; 32] = theirs
            .try_into()
            .map_err(|_| Error::KexFailed { reason: "bad exchange value" })?;
        let theirs = theirs.into();
        let shsec = self.ours.take().trap()?.diffie_hellman(&theirs);
        Ok(KexOutput::new(shsec.as_bytes().to_vec(), kex_hash))
    }
}

/// Oakley group 14, RFC3526 Section 3. Generator is 2.
const MODP_GROUP14: &str = "\
    FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
    29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
    EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
    E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
    EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
    C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
    83655D23DCA3AD961C62F356208552BB9ED529077096966D\
    670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
    E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
    DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
    15728E5A8AACAA68FFFFFFFFFFFFFFFF";

/// Exponent size in bytes. Twice the 160 bit strength estimate of
/// group 14, RFC4419 style.
const DH_EXPONENT_BYTES: usize = 64;

pub(crate) struct KexDhGroup14 {
    x: Option<Zeroizing<BigUint>>,
    // mpint wire content of `e`, kept for the exchange hash
    e: Vec<u8>,
}

impl fmt::Debug for KexDhGroup14 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexDhGroup14")
            .field("x", &if self.x.is_some() { "Some" } else { "None" })
            .finish_non_exhaustive()
    }
}

impl KexDhGroup14 {
    fn prime() -> BigUint {
        // OK unwrap: fixed hex constant
        BigUint::parse_bytes(MODP_GROUP14.as_bytes(), 16).unwrap()
    }

    fn new() -> Result<Self> {
        let p = Self::prime();
        let mut xbytes = Zeroizing::new([0u8; DH_EXPONENT_BYTES]);
        random::fill_random(xbytes.as_mut_slice())?;
        let x = Zeroizing::new(BigUint::from_bytes_be(xbytes.as_slice()));

        let g = BigUint::from(2u32);
        let e = g.modpow(&x, &p);
        let e = mpint_magnitude(&e.to_bytes_be());
        Ok(KexDhGroup14 { x: Some(x), e })
    }

    fn pubkey(&self) -> &[u8] {
        &self.e
    }

    fn secret(&mut self, theirs: &[u8], kex_hash: KexHash) -> Result<KexOutput> {
        let p = Self::prime();
        let f = BigUint::from_bytes_be(theirs);
        // 1 < f < p-1, RFC4253 Section 8
        let one = BigUint::from(1u32);
        if f <= one || f >= &p - &one {
            return Err(Error::KexFailed { reason: "exchange value out of range" });
        }

        let x = self.x.take().trap()?;
        let k = f.modpow(&x, &p);

        Ok(KexOutput::new(k.to_bytes_be(), kex_hash))
    }
}

#[cfg(test)]
mod tests {
    use crate::encrypt::{self};
    use crate::kex::{self, *};
    use crate::packets::KexInit;
    use crate::skifflog::init_test_log;
    use crate::*;
    use digest::Digest;

    #[test]
    fn test_name_match() {
        // check that the from_name() functions are complete
        for k in kex::fixed_options_kex.iter() {
            kex::SharedSecret::from_name(k).unwrap();
        }
        for k in kex::fixed_options_hostsig.iter() {
            sign::SigType::from_name(k).unwrap();
        }
        for k in kex::fixed_options_cipher.iter() {
            encrypt::Cipher::from_name(k).unwrap();
        }
        for k in kex::fixed_options_mac.iter() {
            encrypt::Integ::from_name(k).unwrap();
        }
        for k in kex::fixed_options_comp_on.iter() {
            comp::CompAlg::from_name(k).unwrap();
        }
    }

    // Unknown names fail. This is easy to hit if the names of from_name()
    // match statements are mistyped or aren't imported.
    // These are separate tests because they trigger `Error::bug()` which
    // is an explicit panic in debug builds.
    #[test]
    #[should_panic]
    fn test_unknown_kex() {
        kex::SharedSecret::from_name("bad").unwrap();
    }
    #[test]
    #[should_panic]
    fn test_unknown_sig() {
        sign::SigType::from_name("bad").unwrap();
    }
    #[test]
    #[should_panic]
    fn test_unknown_cipher() {
        encrypt::Cipher::from_name("bad").unwrap();
    }
    #[test]
    #[should_panic]
    fn test_unknown_integ() {
        encrypt::Integ::from_name("bad").unwrap();
    }

    #[test]
    fn curve25519_shared_secret() {
        init_test_log();
        let mut a = KexCurve25519::new().unwrap();
        let mut b = KexCurve25519::new().unwrap();
        let a_pub = a.pubkey().to_vec();
        let b_pub = b.pubkey().to_vec();

        let ha = KexHash { hash_ctx: Box::new(sha2::Sha256::new()) };
        let hb = KexHash { hash_ctx: Box::new(sha2::Sha256::new()) };
        let out_a = a.secret(&b_pub, ha).unwrap();
        let out_b = b.secret(&a_pub, hb).unwrap();
        assert_eq!(*out_a.k, *out_b.k);
        // hash inputs were identical (empty prefix + K mpint)
        assert_eq!(out_a.h, out_b.h);
    }

    #[test]
    fn group14_shared_secret() {
        init_test_log();
        let mut a = KexDhGroup14::new().unwrap();
        let mut b = KexDhGroup14::new().unwrap();
        let a_pub = a.pubkey().to_vec();
        let b_pub = b.pubkey().to_vec();

        let ha = KexHash { hash_ctx: Box::new(sha1::Sha1::new()) };
        let hb = KexHash { hash_ctx: Box::new(sha1::Sha1::new()) };
        let out_a = a.secret(&b_pub, ha).unwrap();
        let out_b = b.secret(&a_pub, hb).unwrap();
        assert_eq!(*out_a.k, *out_b.k);
        assert_eq!(out_a.h, out_b.h);
        // sha1 session id length
        assert_eq!(out_a.h.len(), 20);
    }

    #[test]
    fn group14_rejects_degenerate() {
        let mut a = KexDhGroup14::new().unwrap();
        let h = KexHash { hash_ctx: Box::new(sha1::Sha1::new()) };
        let e = a.secret(&[1u8], h).unwrap_err();
        assert!(matches!(e, Error::KexFailed { .. }));
    }

    fn server_kexinit<'a>(
        kex: &'a str,
        hostsig: &'a str,
        cipher: &'a str,
        mac: &'a str,
        comp: &'a str,
    ) -> KexInit<'a> {
        KexInit {
            cookie: [7u8; 16],
            kex: kex.try_into().unwrap(),
            hostsig: hostsig.try_into().unwrap(),
            cipher_c2s: cipher.try_into().unwrap(),
            cipher_s2c: cipher.try_into().unwrap(),
            mac_c2s: mac.try_into().unwrap(),
            mac_s2c: mac.try_into().unwrap(),
            comp_c2s: comp.try_into().unwrap(),
            comp_s2c: comp.try_into().unwrap(),
            lang_c2s: NameList::empty(),
            lang_s2c: NameList::empty(),
            first_follows: false,
            reserved: 0,
        }
    }

    #[test]
    fn negotiation_picks_client_preference() {
        init_test_log();
        let conf = AlgoConfig::new(false);
        let p = server_kexinit(
            "diffie-hellman-group14-sha1,curve25519-sha256",
            "ssh-rsa,ssh-ed25519",
            "3des-cbc,aes256-ctr",
            "hmac-sha1,hmac-sha2-256",
            "none",
        );
        let algos = Kex::algo_negotiation(&p, &conf).unwrap();
        // client preference order wins
        assert!(matches!(algos.kex, SharedSecret::KexCurve25519(_)));
        assert_eq!(algos.hostsig, sign::SigType::Ed25519);
        assert_eq!(algos.cipher_enc, encrypt::Cipher::Aes256Ctr);
        assert_eq!(algos.integ_dec, encrypt::Integ::HmacSha256);
        assert_eq!(algos.comp_enc, comp::CompAlg::None);
    }

    #[test]
    fn negotiation_no_match() {
        let conf = AlgoConfig::new(false);
        let p = server_kexinit(
            "diffie-hellman-group1-sha1",
            "ssh-ed25519",
            "aes256-ctr",
            "hmac-sha2-256",
            "none",
        );
        let e = Kex::algo_negotiation(&p, &conf).unwrap_err();
        assert!(matches!(e, Error::AlgoNoMatch { algo: "kex" }));
    }

    #[test]
    fn negotiation_empty_category_fails() {
        let conf = AlgoConfig::new(false);
        let p = server_kexinit("curve25519-sha256", "ssh-ed25519", "", "hmac-sha2-256", "none");
        let e = Kex::algo_negotiation(&p, &conf).unwrap_err();
        assert!(matches!(e, Error::AlgoNoMatch { algo: "encryption" }));
    }

    #[test]
    fn negotiation_compression_preference() {
        let conf = AlgoConfig::new(true);
        let p = server_kexinit(
            "curve25519-sha256",
            "ssh-ed25519",
            "aes128-cbc",
            "hmac-sha1",
            "zlib@openssh.com,none",
        );
        let algos = Kex::algo_negotiation(&p, &conf).unwrap();
        assert_eq!(algos.comp_enc, comp::CompAlg::ZlibOpenssh);
        assert_eq!(algos.cipher_enc, encrypt::Cipher::Aes128Cbc);
        assert_eq!(algos.integ_enc, encrypt::Integ::HmacSha1);
    }
}
