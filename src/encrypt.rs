//! Handles encryption/decryption and framing a payload in a SSH packet.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;
use core::fmt::Debug;
use core::num::Wrapping;

use aes::cipher::{
    generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, BlockSizeUser,
    KeyIvInit, StreamCipher,
};
use hmac::{Hmac, Mac};
use sha2::Digest as _;

use crate::*;
use comp::{CompAlg, CompState};
use kex::{self, SessId};
use sshnames::*;
use sshwire::hash_mpint;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type TdesCbcEnc = cbc::Encryptor<des::TdesEde3>;
type TdesCbcDec = cbc::Decryptor<des::TdesEde3>;
// RFC4344 stream ciphers use the full block as a counter
type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

type HmacSha1 = Hmac<sha1::Sha1>;
type HmacSha256 = Hmac<sha2::Sha256>;
type HmacSha512 = Hmac<sha2::Sha512>;

// RFC4253 Section 6. Including length u32 length field, excluding MAC
const SSH_MIN_PACKET_SIZE: usize = 16;
const SSH_MIN_PADLEN: usize = 4;
const SSH_MIN_BLOCK: usize = 8;
pub const SSH_LENGTH_SIZE: usize = 4;
pub const SSH_PAYLOAD_START: usize = SSH_LENGTH_SIZE + 1;

/// Largest is aes cbc/ctr
const MAX_IV_LEN: usize = 16;
/// Largest is hmac-sha2-512
const MAX_KEY_LEN: usize = 64;

/// Stateful [`Keys`], stores sequence numbers and compression streams as
/// well. A single instance is kept for the entire session; rekeys replace
/// only the [`Keys`].
#[derive(Debug)]
pub(crate) struct KeyState {
    keys: Keys,
    comp: CompState,
    // Packet sequence numbers. These must survive rekeying,
    // they are only reset by a full transport reset.
    seq_encrypt: Wrapping<u32>,
    seq_decrypt: Wrapping<u32>,
}

impl KeyState {
    /// A brand new `KeyState` with no encryption, zero sequence numbers
    pub fn new_cleartext() -> Self {
        KeyState {
            keys: Keys::new_cleartext(),
            comp: CompState::default(),
            seq_encrypt: Wrapping(0),
            seq_decrypt: Wrapping(0),
        }
    }

    pub fn is_cleartext(&self) -> bool {
        matches!(self.keys.enc, EncKey::NoCipher) || matches!(self.keys.dec, DecKey::NoCipher)
    }

    /// Updates with new keys, keeping the same sequence numbers.
    ///
    /// `authenticated` selects immediate activation for
    /// `zlib@openssh.com`.
    pub fn rekey(&mut self, keys: Keys, authenticated: bool) {
        self.comp.newkeys(keys.comp_enc, keys.comp_dec, authenticated);
        self.keys = keys;
    }

    /// Starts delayed compression, called on auth success.
    pub fn auth_success(&mut self) {
        self.comp.enable_delayed();
    }

    pub fn recv_seq(&self) -> u32 {
        self.seq_decrypt.0
    }

    pub fn sent_packets(&self) -> u32 {
        self.seq_encrypt.0
    }

    /// Decrypts the first block in the buffer, returning the total packet
    /// length (including length field and MAC).
    pub fn decrypt_first_block(&mut self, buf: &mut [u8]) -> Result<u32, Error> {
        self.keys.decrypt_first_block(buf)
    }

    /// Decrypt bytes after the first block of the buffer and validate the MAC.
    /// Ensures that the packet meets minimum length.
    pub fn decrypt(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let e = self.keys.decrypt(buf, self.seq_decrypt.0);
        self.seq_decrypt += 1;
        e
    }

    /// Decompresses an inbound payload, `None` if compression is inactive.
    ///
    /// Applied after MAC verification.
    pub fn decompress(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        self.comp.decompress(payload)
    }

    pub fn compress_enabled(&self) -> bool {
        self.comp.comp_active()
    }

    /// Compresses an outbound payload, before framing.
    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.comp.compress(payload)
    }

    /// `buf` is the entire output buffer to encrypt in place.
    /// `payload_len` is the length of the payload portion.
    /// This is stateful, updating the sequence number.
    pub fn encrypt(&mut self, payload_len: usize, buf: &mut [u8]) -> Result<usize, Error> {
        let e = self.keys.encrypt(payload_len, buf, self.seq_encrypt.0);
        self.seq_encrypt += 1;
        e
    }

    pub fn size_block_dec(&self) -> usize {
        self.keys.dec.size_block()
    }

    /// Returns the maximum payload that can fit in an available buffer
    /// after header, encryption, padding, mac.
    pub fn max_enc_payload(&self, total_avail: usize) -> usize {
        let total_avail = total_avail.saturating_sub(self.keys.integ_enc.size_out());
        let overhead = SSH_LENGTH_SIZE + 1 + SSH_MIN_PADLEN;
        let mut space = total_avail;

        // round down to block size
        let extra_block = total_avail % self.keys.enc.size_block();
        if extra_block != 0 {
            space = space.saturating_sub(extra_block);
        }

        space = space.saturating_sub(overhead);

        if space + overhead < SSH_MIN_PACKET_SIZE {
            0
        } else {
            space
        }
    }
}

pub(crate) struct Keys {
    pub(crate) enc: EncKey,
    pub(crate) dec: DecKey,

    pub(crate) integ_enc: IntegKey,
    pub(crate) integ_dec: IntegKey,

    pub(crate) comp_enc: CompAlg,
    pub(crate) comp_dec: CompAlg,
}

impl Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("enc", &self.enc)
            .field("dec", &self.dec)
            .field("integ_enc", &self.integ_enc)
            .field("integ_dec", &self.integ_dec)
            .finish_non_exhaustive()
    }
}

impl Keys {
    fn new_cleartext() -> Self {
        Keys {
            enc: EncKey::NoCipher,
            dec: DecKey::NoCipher,
            integ_enc: IntegKey::NoInteg,
            integ_dec: IntegKey::NoInteg,
            comp_enc: CompAlg::None,
            comp_dec: CompAlg::None,
        }
    }

    /// Derives a full set of transport keys from KEX output.
    ///
    /// `k` is the raw shared secret, `h` the exchange hash of this round,
    /// `sess_id` the first exchange hash of the connection.
    pub fn derive(
        k: &[u8],
        h: &SessId,
        sess_id: &SessId,
        algos: &kex::Algos,
    ) -> Result<Self, Error> {
        let mut hash = algos.kex.hash();

        // RFC4253 7.2, client-to-server uses A/C/E, server-to-client B/D/F.
        let (iv_e, iv_d, k_e, k_d, i_e, i_d) = if algos.is_client {
            ('A', 'B', 'C', 'D', 'E', 'F')
        } else {
            ('B', 'A', 'D', 'C', 'F', 'E')
        };

        let enc = {
            let iv = Self::compute_key(iv_e, algos.cipher_enc.iv_len(), &mut *hash, k, h, sess_id)?;
            let key = Self::compute_key(k_e, algos.cipher_enc.key_len(), &mut *hash, k, h, sess_id)?;
            EncKey::from_cipher(&algos.cipher_enc, &key, &iv)?
        };

        let dec = {
            let iv = Self::compute_key(iv_d, algos.cipher_dec.iv_len(), &mut *hash, k, h, sess_id)?;
            let key = Self::compute_key(k_d, algos.cipher_dec.key_len(), &mut *hash, k, h, sess_id)?;
            DecKey::from_cipher(&algos.cipher_dec, &key, &iv)?
        };

        let integ_enc = {
            let key = Self::compute_key(i_e, algos.integ_enc.key_len(), &mut *hash, k, h, sess_id)?;
            IntegKey::from_integ(&algos.integ_enc, &key)?
        };

        let integ_dec = {
            let key = Self::compute_key(i_d, algos.integ_dec.key_len(), &mut *hash, k, h, sess_id)?;
            IntegKey::from_integ(&algos.integ_dec, &key)?
        };

        Ok(Keys {
            enc,
            dec,
            integ_enc,
            integ_dec,
            comp_enc: algos.comp_enc,
            comp_dec: algos.comp_dec,
        })
    }

    /// RFC4253 7.2. `K1 = HASH(K || H || "A" || session_id)`,
    /// `Kn = HASH(K || H || K1 || ... || Kn-1)`, concatenated until enough
    /// bytes for the use.
    fn compute_key(
        letter: char,
        len: usize,
        hash_ctx: &mut dyn digest::DynDigest,
        k: &[u8],
        h: &SessId,
        sess_id: &SessId,
    ) -> Result<zeroize::Zeroizing<Vec<u8>>, Error> {
        debug_assert!(len <= MAX_KEY_LEN.max(MAX_IV_LEN));
        let hsz = hash_ctx.output_size();
        let mut w = vec![0u8; hsz];
        let mut out = zeroize::Zeroizing::new(Vec::with_capacity(len.max(hsz)));

        hash_ctx.reset();
        hash_mpint(hash_ctx, k);
        hash_ctx.update(h.as_slice());
        hash_ctx.update(&[letter as u8]);
        hash_ctx.update(sess_id.as_slice());
        hash_ctx.finalize_into_reset(&mut w).trap()?;
        out.extend_from_slice(&w);

        while out.len() < len {
            // Kn = HASH(K || H || K1 || ... || Kn-1)
            hash_mpint(hash_ctx, k);
            hash_ctx.update(h.as_slice());
            hash_ctx.update(&out);
            hash_ctx.finalize_into_reset(&mut w).trap()?;
            out.extend_from_slice(&w);
        }
        out.truncate(len);
        Ok(out)
    }

    /// Decrypts the first block in the buffer, returning the length of the
    /// total SSH packet (including length+mac) which is calculated
    /// from the decrypted first 4 bytes.
    /// Bytes `buf[..block_size]` are decrypted in place, the remainder is
    /// handled later by [`decrypt`](Self::decrypt).
    fn decrypt_first_block(&mut self, buf: &mut [u8]) -> Result<u32, Error> {
        let size_block = self.dec.size_block();
        if buf.len() < size_block {
            return Err(Error::bug());
        }

        self.dec.process(&mut buf[..size_block])?;
        let len = u32::from_be_bytes(buf[..SSH_LENGTH_SIZE].try_into().unwrap());

        let total_len = len
            .checked_add((SSH_LENGTH_SIZE + self.integ_dec.size_out()) as u32)
            .ok_or(Error::BadMac)?;

        Ok(total_len)
    }

    /// Decrypt the whole packet buffer and validate the MAC.
    /// Returns the payload length.
    /// Ensures that the packet meets minimum length requirements.
    /// The first block_size bytes have already been decrypted by
    /// [`decrypt_first_block`](Self::decrypt_first_block).
    fn decrypt(&mut self, buf: &mut [u8], seq: u32) -> Result<usize, Error> {
        let size_block = self.dec.size_block();
        let size_integ = self.integ_dec.size_out();

        if buf.len() < size_block + size_integ {
            debug!("Bad packet, {} smaller than block size", buf.len());
            return error::SshProto.fail();
        }
        if buf.len() < SSH_MIN_PACKET_SIZE + size_integ {
            debug!("Bad packet, {} smaller than min packet size", buf.len());
            return error::SshProto.fail();
        }
        // "MUST be a multiple of the cipher block size".
        let len = buf.len() - size_integ;
        if len % size_block != 0 {
            debug!("Bad packet, not multiple of block size");
            return error::SshProto.fail();
        }

        let (data, mac) = buf.split_at_mut(len);

        // first block is already decrypted
        self.dec.process(&mut data[size_block..])?;

        self.integ_dec.verify(seq, data, mac)?;

        let padlen = data[SSH_LENGTH_SIZE] as usize;
        if padlen < SSH_MIN_PADLEN {
            debug!("Packet padding too short");
            return error::SshProto.fail();
        }

        let payload_len = data
            .len()
            .checked_sub(SSH_LENGTH_SIZE + 1 + padlen)
            .ok_or_else(|| {
                debug!("Bad padding length");
                error::SshProto.build()
            })?;

        Ok(payload_len)
    }

    /// Padding is required to meet
    /// - minimum packet length
    /// - minimum padding size,
    /// - encrypted length being a multiple of block length
    fn calc_encrypt_pad(&self, payload_len: usize) -> usize {
        let size_block = self.enc.size_block();
        let len = SSH_LENGTH_SIZE + 1 + payload_len;

        // round padding length upwards so that len is a multiple of block size
        let mut padlen = size_block - len % size_block;

        // need at least 4 bytes padding
        if padlen < SSH_MIN_PADLEN {
            padlen += size_block
        }

        // The minimum size of a packet is 16 (plus mac)
        // We know we already have at least 8 bytes because of blocksize rounding.
        if len + padlen < SSH_MIN_PACKET_SIZE {
            padlen += size_block;
        }
        padlen
    }

    /// Encrypt a buffer in-place, adding packet size, padding, MAC.
    /// Returns the total length.
    /// Ensures that the packet meets minimum and other length requirements.
    fn encrypt(&mut self, payload_len: usize, buf: &mut [u8], seq: u32) -> Result<usize, Error> {
        let size_integ = self.integ_enc.size_out();
        let padlen = self.calc_encrypt_pad(payload_len);
        // len is everything except the MAC
        let len = SSH_LENGTH_SIZE + 1 + payload_len + padlen;

        debug_assert_eq!(len % self.enc.size_block(), 0);

        if len + size_integ > buf.len() {
            error!("Output buffer {} is too small for packet", buf.len());
            return Err(Error::NoRoom);
        }

        // write the length
        buf[..SSH_LENGTH_SIZE]
            .copy_from_slice(&((len - SSH_LENGTH_SIZE) as u32).to_be_bytes());
        // write random padding
        buf[SSH_LENGTH_SIZE] = padlen as u8;
        let pad_start = SSH_LENGTH_SIZE + 1 + payload_len;
        debug_assert_eq!(pad_start + padlen, len);
        random::fill_random(&mut buf[pad_start..pad_start + padlen])?;

        let (enc, rest) = buf.split_at_mut(len);
        let (mac, _) = rest.split_at_mut(size_integ);

        // MAC is computed over the plaintext with the sequence number
        // prepended, RFC4253 Section 6.4
        self.integ_enc.sign(seq, enc, mac)?;
        self.enc.process(enc)?;

        Ok(len + size_integ)
    }
}

/// Placeholder for a cipher type prior to creating an [`EncKey`] or [`DecKey`],
/// for use during key setup in [`kex`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Cipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    TdesCbc,
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::Aes128Cbc => SSH_NAME_AES128_CBC,
            Self::Aes192Cbc => SSH_NAME_AES192_CBC,
            Self::Aes256Cbc => SSH_NAME_AES256_CBC,
            Self::Aes128Ctr => SSH_NAME_AES128_CTR,
            Self::Aes192Ctr => SSH_NAME_AES192_CTR,
            Self::Aes256Ctr => SSH_NAME_AES256_CTR,
            Self::TdesCbc => SSH_NAME_3DES_CBC,
        };
        write!(f, "{n}")
    }
}

impl Cipher {
    /// Creates a cipher by algorithm name. Must be passed a known name.
    pub fn from_name(name: &'static str) -> Result<Self, Error> {
        match name {
            SSH_NAME_AES128_CBC => Ok(Cipher::Aes128Cbc),
            SSH_NAME_AES192_CBC => Ok(Cipher::Aes192Cbc),
            SSH_NAME_AES256_CBC => Ok(Cipher::Aes256Cbc),
            SSH_NAME_AES128_CTR => Ok(Cipher::Aes128Ctr),
            SSH_NAME_AES192_CTR => Ok(Cipher::Aes192Ctr),
            SSH_NAME_AES256_CTR => Ok(Cipher::Aes256Ctr),
            SSH_NAME_3DES_CBC => Ok(Cipher::TdesCbc),
            _ => Err(Error::bug()),
        }
    }

    /// Length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            Cipher::Aes128Cbc | Cipher::Aes128Ctr => 16,
            Cipher::Aes192Cbc | Cipher::Aes192Ctr | Cipher::TdesCbc => 24,
            Cipher::Aes256Cbc | Cipher::Aes256Ctr => 32,
        }
    }

    /// Length in bytes
    pub fn iv_len(&self) -> usize {
        match self {
            Cipher::TdesCbc => des::TdesEde3::block_size(),
            _ => aes::Aes128::block_size(),
        }
    }
}

macro_rules! cipher_dispatch {
    ($self:ident, $data:ident, $($Variant:ident),* ) => {
        match $self {
            $( Self::$Variant(c) => {
                for block in $data.chunks_exact_mut(c.block_size_bytes()) {
                    c.process_block(block);
                }
            } )*
            Self::NoCipher => (),
        }
    };
}

// A uniform face over the cbc/ctr cipher objects so the EncKey/DecKey
// dispatch below can stay a plain match.
trait BlockProcess {
    fn block_size_bytes(&self) -> usize;
    fn process_block(&mut self, block: &mut [u8]);
}

macro_rules! impl_block_process_enc {
    ($($t:ty),*) => {
        $(impl BlockProcess for $t {
            fn block_size_bytes(&self) -> usize {
                <$t as BlockSizeUser>::block_size()
            }
            fn process_block(&mut self, block: &mut [u8]) {
                self.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        })*
    };
}

macro_rules! impl_block_process_dec {
    ($($t:ty),*) => {
        $(impl BlockProcess for $t {
            fn block_size_bytes(&self) -> usize {
                <$t as BlockSizeUser>::block_size()
            }
            fn process_block(&mut self, block: &mut [u8]) {
                self.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        })*
    };
}

macro_rules! impl_block_process_stream {
    ($($t:ty),*) => {
        $(impl BlockProcess for $t {
            fn block_size_bytes(&self) -> usize {
                // AES block size; these are AES-CTR stream cipher wrappers
                // which don't themselves implement BlockSizeUser.
                16
            }
            fn process_block(&mut self, block: &mut [u8]) {
                self.apply_keystream(block);
            }
        })*
    };
}

impl_block_process_enc!(Aes128CbcEnc, Aes192CbcEnc, Aes256CbcEnc, TdesCbcEnc);
impl_block_process_dec!(Aes128CbcDec, Aes192CbcDec, Aes256CbcDec, TdesCbcDec);
impl_block_process_stream!(Aes128Ctr, Aes192Ctr, Aes256Ctr);

pub(crate) enum EncKey {
    Aes128Cbc(Aes128CbcEnc),
    Aes192Cbc(Aes192CbcEnc),
    Aes256Cbc(Aes256CbcEnc),
    Aes128Ctr(Aes128Ctr),
    Aes192Ctr(Aes192Ctr),
    Aes256Ctr(Aes256Ctr),
    TdesCbc(TdesCbcEnc),
    NoCipher,
}

impl Debug for EncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::Aes128Cbc(_) => "Aes128Cbc",
            Self::Aes192Cbc(_) => "Aes192Cbc",
            Self::Aes256Cbc(_) => "Aes256Cbc",
            Self::Aes128Ctr(_) => "Aes128Ctr",
            Self::Aes192Ctr(_) => "Aes192Ctr",
            Self::Aes256Ctr(_) => "Aes256Ctr",
            Self::TdesCbc(_) => "TdesCbc",
            Self::NoCipher => "NoCipher",
        };
        f.write_fmt(format_args!("EncKey::{n}"))
    }
}

impl EncKey {
    /// Construct a key
    pub fn from_cipher(cipher: &Cipher, key: &[u8], iv: &[u8]) -> Result<Self, Error> {
        let e = match cipher {
            Cipher::Aes128Cbc => {
                EncKey::Aes128Cbc(Aes128CbcEnc::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes192Cbc => {
                EncKey::Aes192Cbc(Aes192CbcEnc::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes256Cbc => {
                EncKey::Aes256Cbc(Aes256CbcEnc::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes128Ctr => {
                EncKey::Aes128Ctr(Aes128Ctr::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes192Ctr => {
                EncKey::Aes192Ctr(Aes192Ctr::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes256Ctr => {
                EncKey::Aes256Ctr(Aes256Ctr::new_from_slices(key, iv).trap()?)
            }
            Cipher::TdesCbc => {
                EncKey::TdesCbc(TdesCbcEnc::new_from_slices(key, iv).trap()?)
            }
        };
        Ok(e)
    }

    pub fn size_block(&self) -> usize {
        match self {
            EncKey::TdesCbc(_) | EncKey::NoCipher => SSH_MIN_BLOCK,
            _ => aes::Aes128::block_size(),
        }
    }

    fn process(&mut self, data: &mut [u8]) -> Result<()> {
        cipher_dispatch!(
            self, data, Aes128Cbc, Aes192Cbc, Aes256Cbc, Aes128Ctr, Aes192Ctr,
            Aes256Ctr, TdesCbc
        );
        Ok(())
    }
}

pub(crate) enum DecKey {
    Aes128Cbc(Aes128CbcDec),
    Aes192Cbc(Aes192CbcDec),
    Aes256Cbc(Aes256CbcDec),
    Aes128Ctr(Aes128Ctr),
    Aes192Ctr(Aes192Ctr),
    Aes256Ctr(Aes256Ctr),
    TdesCbc(TdesCbcDec),
    NoCipher,
}

impl Debug for DecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::Aes128Cbc(_) => "Aes128Cbc",
            Self::Aes192Cbc(_) => "Aes192Cbc",
            Self::Aes256Cbc(_) => "Aes256Cbc",
            Self::Aes128Ctr(_) => "Aes128Ctr",
            Self::Aes192Ctr(_) => "Aes192Ctr",
            Self::Aes256Ctr(_) => "Aes256Ctr",
            Self::TdesCbc(_) => "TdesCbc",
            Self::NoCipher => "NoCipher",
        };
        f.write_fmt(format_args!("DecKey::{n}"))
    }
}

impl DecKey {
    /// Construct a key
    pub fn from_cipher(cipher: &Cipher, key: &[u8], iv: &[u8]) -> Result<Self, Error> {
        let d = match cipher {
            Cipher::Aes128Cbc => {
                DecKey::Aes128Cbc(Aes128CbcDec::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes192Cbc => {
                DecKey::Aes192Cbc(Aes192CbcDec::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes256Cbc => {
                DecKey::Aes256Cbc(Aes256CbcDec::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes128Ctr => {
                DecKey::Aes128Ctr(Aes128Ctr::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes192Ctr => {
                DecKey::Aes192Ctr(Aes192Ctr::new_from_slices(key, iv).trap()?)
            }
            Cipher::Aes256Ctr => {
                DecKey::Aes256Ctr(Aes256Ctr::new_from_slices(key, iv).trap()?)
            }
            Cipher::TdesCbc => {
                DecKey::TdesCbc(TdesCbcDec::new_from_slices(key, iv).trap()?)
            }
        };
        Ok(d)
    }

    pub fn size_block(&self) -> usize {
        match self {
            DecKey::TdesCbc(_) | DecKey::NoCipher => SSH_MIN_BLOCK,
            _ => aes::Aes128::block_size(),
        }
    }

    fn process(&mut self, data: &mut [u8]) -> Result<()> {
        cipher_dispatch!(
            self, data, Aes128Cbc, Aes192Cbc, Aes256Cbc, Aes128Ctr, Aes192Ctr,
            Aes256Ctr, TdesCbc
        );
        Ok(())
    }
}

/// Placeholder for a [`IntegKey`] type prior to keying. For use during key
/// setup in [`kex`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Integ {
    HmacSha1,
    HmacSha256,
    HmacSha512,
}

impl Integ {
    /// Matches a MAC name. Must be passed a known name.
    pub fn from_name(name: &'static str) -> Result<Self, Error> {
        match name {
            SSH_NAME_HMAC_SHA1 => Ok(Integ::HmacSha1),
            SSH_NAME_HMAC_SHA256 => Ok(Integ::HmacSha256),
            SSH_NAME_HMAC_SHA512 => Ok(Integ::HmacSha512),
            _ => Err(Error::bug()),
        }
    }
    /// length in bytes
    fn key_len(&self) -> usize {
        match self {
            Integ::HmacSha1 => 20,
            Integ::HmacSha256 => 32,
            Integ::HmacSha512 => 64,
        }
    }
}

impl fmt::Display for Integ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::HmacSha1 => SSH_NAME_HMAC_SHA1,
            Self::HmacSha256 => SSH_NAME_HMAC_SHA256,
            Self::HmacSha512 => SSH_NAME_HMAC_SHA512,
        };
        write!(f, "{n}")
    }
}

pub(crate) enum IntegKey {
    HmacSha1([u8; 20]),
    HmacSha256([u8; 32]),
    HmacSha512([u8; 64]),
    NoInteg,
}

impl Debug for IntegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::HmacSha1(_) => "HmacSha1",
            Self::HmacSha256(_) => "HmacSha256",
            Self::HmacSha512(_) => "HmacSha512",
            Self::NoInteg => "NoInteg",
        };
        f.write_fmt(format_args!("IntegKey::{n}"))
    }
}

impl IntegKey {
    pub fn from_integ(integ: &Integ, key: &[u8]) -> Result<Self, Error> {
        match integ {
            Integ::HmacSha1 => Ok(IntegKey::HmacSha1(key.try_into().trap()?)),
            Integ::HmacSha256 => Ok(IntegKey::HmacSha256(key.try_into().trap()?)),
            Integ::HmacSha512 => Ok(IntegKey::HmacSha512(key.try_into().trap()?)),
        }
    }

    pub fn size_out(&self) -> usize {
        match self {
            IntegKey::HmacSha1(_) => sha1::Sha1::output_size(),
            IntegKey::HmacSha256(_) => sha2::Sha256::output_size(),
            IntegKey::HmacSha512(_) => sha2::Sha512::output_size(),
            IntegKey::NoInteg => 0,
        }
    }

    fn sign(&self, seq: u32, data: &[u8], mac: &mut [u8]) -> Result<()> {
        match self {
            IntegKey::HmacSha1(k) => {
                let mut h = HmacSha1::new_from_slice(k).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                mac.copy_from_slice(&h.finalize().into_bytes());
            }
            IntegKey::HmacSha256(k) => {
                let mut h = HmacSha256::new_from_slice(k).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                mac.copy_from_slice(&h.finalize().into_bytes());
            }
            IntegKey::HmacSha512(k) => {
                let mut h = HmacSha512::new_from_slice(k).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                mac.copy_from_slice(&h.finalize().into_bytes());
            }
            IntegKey::NoInteg => (),
        }
        Ok(())
    }

    fn verify(&self, seq: u32, data: &[u8], mac: &[u8]) -> Result<()> {
        match self {
            IntegKey::HmacSha1(k) => {
                let mut h = HmacSha1::new_from_slice(k).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                h.verify_slice(mac).map_err(|_| {
                    info!("Packet integrity failed");
                    Error::BadMac
                })
            }
            IntegKey::HmacSha256(k) => {
                let mut h = HmacSha256::new_from_slice(k).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                h.verify_slice(mac).map_err(|_| {
                    info!("Packet integrity failed");
                    Error::BadMac
                })
            }
            IntegKey::HmacSha512(k) => {
                let mut h = HmacSha512::new_from_slice(k).trap()?;
                h.update(&seq.to_be_bytes());
                h.update(data);
                h.verify_slice(mac).map_err(|_| {
                    info!("Packet integrity failed");
                    Error::BadMac
                })
            }
            IntegKey::NoInteg => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::encrypt::*;
    use crate::error::Error;
    use crate::kex;
    use crate::skifflog::*;
    use crate::sshnames::SSH_NAME_CURVE25519;
    #[allow(unused_imports)]
    use pretty_hex::PrettyHex;
    use sha2::Sha256;

    // setting `corrupt` tests that an incorrect mac is detected
    fn do_roundtrips(keys_enc: &mut KeyState, keys_dec: &mut KeyState, corrupt: bool) {
        for i in 0usize..80 {
            let mut v: Vec<u8> = (0u8..i as u8 + 110).collect();
            let orig_payload = v[SSH_PAYLOAD_START..SSH_PAYLOAD_START + i].to_vec();

            let written = keys_enc.encrypt(i, v.as_mut_slice()).unwrap();

            v.truncate(written);

            if corrupt {
                // flip a bit of the payload
                v[SSH_PAYLOAD_START] ^= 4;
            }

            let l = keys_dec.decrypt_first_block(v.as_mut_slice()).unwrap() as usize;
            assert_eq!(l, v.len());

            let dec = keys_dec.decrypt(v.as_mut_slice());

            if corrupt {
                assert!(matches!(dec, Err(Error::BadMac)));
                return;
            }
            let payload_len = dec.unwrap();
            assert_eq!(payload_len, i);
            let dec_payload = v[SSH_PAYLOAD_START..SSH_PAYLOAD_START + i].to_vec();
            assert_eq!(orig_payload, dec_payload);
        }
    }

    #[test]
    fn roundtrip_nocipher() {
        // check padding works
        let mut ke = KeyState::new_cleartext();
        let mut kd = KeyState::new_cleartext();
        do_roundtrips(&mut ke, &mut kd, false);
    }

    #[test]
    #[should_panic]
    fn roundtrip_nocipher_corrupt() {
        // test the test, cleartext has no mac
        let mut ke = KeyState::new_cleartext();
        let mut kd = KeyState::new_cleartext();
        do_roundtrips(&mut ke, &mut kd, true);
    }

    fn algos_for(ce: Cipher, ie: Integ, cd: Cipher, id: Integ) -> kex::Algos {
        kex::Algos {
            kex: kex::SharedSecret::from_name(SSH_NAME_CURVE25519).unwrap(),
            hostsig: crate::sign::SigType::Ed25519,
            cipher_enc: ce,
            cipher_dec: cd,
            integ_enc: ie,
            integ_dec: id,
            comp_enc: crate::comp::CompAlg::None,
            comp_dec: crate::comp::CompAlg::None,
            discard_next: false,
            is_client: false,
        }
    }

    fn algo_combos() -> Vec<kex::Algos> {
        let mut v = Vec::new();
        let ciphers = [
            (Cipher::Aes128Cbc, Integ::HmacSha1),
            (Cipher::Aes192Cbc, Integ::HmacSha256),
            (Cipher::Aes256Cbc, Integ::HmacSha512),
            (Cipher::Aes128Ctr, Integ::HmacSha512),
            (Cipher::Aes192Ctr, Integ::HmacSha1),
            (Cipher::Aes256Ctr, Integ::HmacSha256),
            (Cipher::TdesCbc, Integ::HmacSha1),
            (Cipher::TdesCbc, Integ::HmacSha512),
        ];
        for (c, i) in ciphers {
            v.push(algos_for(c, i, c, i));
        }
        // and one asymmetric pair
        v.push(algos_for(Cipher::Aes256Ctr, Integ::HmacSha256, Cipher::TdesCbc, Integ::HmacSha1));
        v
    }

    fn keypair_for(algos: &mut kex::Algos) -> (KeyState, KeyState) {
        use digest::Digest;
        // arbitrary keys
        let h: kex::SessId = Sha256::digest(b"some exchange hash").to_vec();
        let sess_id: kex::SessId = Sha256::digest(b"some sessid").to_vec();
        let sharedkey = b"hello";

        let mut keys_enc = KeyState::new_cleartext();
        let newkeys = Keys::derive(sharedkey, &h, &sess_id, algos).unwrap();
        keys_enc.rekey(newkeys, false);

        // client and server enc/dec keys are derived differently, we need
        // them to match for this test
        algos.is_client = !algos.is_client;
        core::mem::swap(&mut algos.cipher_enc, &mut algos.cipher_dec);
        core::mem::swap(&mut algos.integ_enc, &mut algos.integ_dec);
        let newkeys_b = Keys::derive(sharedkey, &h, &sess_id, algos).unwrap();
        let mut keys_dec = KeyState::new_cleartext();
        keys_dec.rekey(newkeys_b, false);

        (keys_enc, keys_dec)
    }

    #[test]
    fn algo_roundtrips() {
        init_test_log();

        for mut algos in algo_combos() {
            trace!("algos enc {:?} {:?}", algos.cipher_enc, algos.integ_enc);
            let (mut keys_enc, mut keys_dec) = keypair_for(&mut algos);
            do_roundtrips(&mut keys_enc, &mut keys_dec, false);
            do_roundtrips(&mut keys_enc, &mut keys_dec, true);
        }
    }

    #[test]
    fn compressed_roundtrip() {
        init_test_log();
        let mut algos = algos_for(
            Cipher::Aes256Ctr,
            Integ::HmacSha256,
            Cipher::Aes256Ctr,
            Integ::HmacSha256,
        );
        algos.comp_enc = crate::comp::CompAlg::Zlib;
        algos.comp_dec = crate::comp::CompAlg::Zlib;
        let (mut keys_enc, mut keys_dec) = keypair_for(&mut algos);

        assert!(keys_enc.compress_enabled());
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let packed = keys_enc.compress(&payload).unwrap();
        assert!(packed.len() < payload.len());

        let restored = keys_dec.decompress(&packed).unwrap().unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn max_enc_payload() {
        init_test_log();
        for mut algos in algo_combos() {
            let (mut keys, _) = keypair_for(&mut algos);

            let mut buf = [0u8; 200];

            for i in 1..180 {
                let p = keys.max_enc_payload(i);
                if p > 0 {
                    let l = keys.encrypt(p, &mut buf).unwrap();
                    assert!(l <= i);

                    // check a larger payload would bump the packet size
                    let l = keys.encrypt(p + 1, &mut buf).unwrap();
                    assert!(l > i);
                }
            }
        }
    }

    #[test]
    fn sequence_numbers_increment() {
        let mut ks = KeyState::new_cleartext();
        assert_eq!(ks.sent_packets(), 0);
        let mut buf = [0u8; 64];
        ks.encrypt(4, &mut buf).unwrap();
        ks.encrypt(4, &mut buf).unwrap();
        assert_eq!(ks.sent_packets(), 2);
        assert_eq!(ks.recv_seq(), 0);
    }
}
