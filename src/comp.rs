//! Payload compression, RFC4253 Section 6.2.
//!
//! Compression applies to the packet payload only, before framing and
//! encryption. The zlib stream state persists for the life of the
//! transport, including across rekeys.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

use crate::*;
use sshnames::*;

/// Negotiated compression algorithm for one direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CompAlg {
    None,
    Zlib,
    /// `zlib@openssh.com`, activation deferred until auth success
    ZlibOpenssh,
}

impl CompAlg {
    /// Must be passed a known name.
    pub fn from_name(name: &'static str) -> Result<Self> {
        match name {
            SSH_NAME_NONE => Ok(CompAlg::None),
            SSH_NAME_ZLIB => Ok(CompAlg::Zlib),
            SSH_NAME_ZLIB_OPENSSH => Ok(CompAlg::ZlibOpenssh),
            _ => Err(Error::bug()),
        }
    }
}

/// Compression contexts for both directions.
///
/// Kept separately from the cipher keys since a rekey does not replace an
/// already-active zlib stream.
#[derive(Default)]
pub(crate) struct CompState {
    comp: Option<Compressor>,
    decomp: Option<Decompressor>,
    delayed_comp: bool,
    delayed_decomp: bool,
}

impl core::fmt::Debug for CompState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompState")
            .field("comp", &self.comp.is_some())
            .field("decomp", &self.decomp.is_some())
            .field("delayed_comp", &self.delayed_comp)
            .field("delayed_decomp", &self.delayed_decomp)
            .finish()
    }
}

impl CompState {
    /// Applies newly negotiated algorithms at `newkeys` time.
    ///
    /// `zlib` activates immediately, `zlib@openssh.com` immediately only if
    /// userauth has already succeeded, otherwise on
    /// [`enable_delayed()`](Self::enable_delayed).
    pub fn newkeys(&mut self, alg_comp: CompAlg, alg_decomp: CompAlg, authenticated: bool) {
        if self.comp.is_none()
            && (alg_comp == CompAlg::Zlib
                || (authenticated && alg_comp == CompAlg::ZlibOpenssh))
        {
            self.comp = Some(Compressor::new());
        } else if alg_comp == CompAlg::ZlibOpenssh {
            self.delayed_comp = true;
        }

        if self.decomp.is_none()
            && (alg_decomp == CompAlg::Zlib
                || (authenticated && alg_decomp == CompAlg::ZlibOpenssh))
        {
            self.decomp = Some(Decompressor::new());
        } else if alg_decomp == CompAlg::ZlibOpenssh {
            self.delayed_decomp = true;
        }
    }

    /// Called on auth success to start delayed compression.
    pub fn enable_delayed(&mut self) {
        if self.delayed_comp {
            self.delayed_comp = false;
            self.comp = Some(Compressor::new());
        }
        if self.delayed_decomp {
            self.delayed_decomp = false;
            self.decomp = Some(Decompressor::new());
        }
    }

    pub fn comp_active(&self) -> bool {
        self.comp.is_some()
    }

    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.comp.as_mut().trap()?.process(payload)
    }

    /// Returns `None` when inbound compression isn't active.
    pub fn decompress(&mut self, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.decomp.as_mut() {
            Some(d) => d.process(payload).map(Some),
            None => Ok(None),
        }
    }
}

pub(crate) struct Compressor {
    z: Compress,
}

impl Compressor {
    fn new() -> Self {
        // zlib header included, matching the "zlib" method of RFC4253
        Compressor { z: Compress::new(Compression::fast(), true) }
    }

    fn process(&mut self, mut input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let mut chunk = [0u8; 1024];
        loop {
            let in_before = self.z.total_in();
            let out_before = self.z.total_out();
            let st = self
                .z
                .compress(input, &mut chunk, FlushCompress::Sync)
                .map_err(|_| Error::BadCompress)?;
            let consumed = (self.z.total_in() - in_before) as usize;
            let produced = (self.z.total_out() - out_before) as usize;
            out.extend_from_slice(&chunk[..produced]);
            input = &input[consumed..];

            if input.is_empty() && produced < chunk.len() {
                break;
            }
            if consumed == 0 && produced == 0 {
                debug!("zlib made no progress, status {st:?}");
                return error::BadCompress.fail();
            }
        }
        Ok(out)
    }
}

pub(crate) struct Decompressor {
    z: Decompress,
}

impl Decompressor {
    fn new() -> Self {
        Decompressor { z: Decompress::new(true) }
    }

    fn process(&mut self, mut input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() * 2 + 64);
        let mut chunk = [0u8; 1024];
        loop {
            let in_before = self.z.total_in();
            let out_before = self.z.total_out();
            let st = self
                .z
                .decompress(input, &mut chunk, FlushDecompress::Sync)
                .map_err(|_| Error::BadCompress)?;
            let consumed = (self.z.total_in() - in_before) as usize;
            let produced = (self.z.total_out() - out_before) as usize;
            out.extend_from_slice(&chunk[..produced]);
            input = &input[consumed..];

            // An inflated payload larger than the packet cap means either
            // corruption or a hostile peer.
            if out.len() > config::MAX_PACKET_PAYLOAD + config::PACKET_SLACK {
                return error::BadCompress.fail();
            }
            if input.is_empty() && produced < chunk.len() {
                break;
            }
            if consumed == 0 && produced == 0 {
                debug!("zlib made no progress, status {st:?}");
                return error::BadCompress.fail();
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skifflog::init_test_log;

    fn active_pair() -> CompState {
        let mut c = CompState::default();
        c.newkeys(CompAlg::Zlib, CompAlg::Zlib, false);
        c
    }

    #[test]
    fn roundtrip() {
        init_test_log();
        let mut c = active_pair();
        // same stream handles successive payloads
        for payload in
            [&b"hello compressed world"[..], &[0u8; 2000], b"x", &[7u8; 100]]
        {
            let packed = c.compress(payload).unwrap();
            let restored = c.decompress(&packed).unwrap().unwrap();
            assert_eq!(restored, payload);
        }
    }

    #[test]
    fn delayed_activation() {
        let mut c = CompState::default();
        c.newkeys(CompAlg::ZlibOpenssh, CompAlg::ZlibOpenssh, false);
        assert!(!c.comp_active());
        assert!(c.decompress(b"anything").unwrap().is_none());

        c.enable_delayed();
        assert!(c.comp_active());
        let packed = c.compress(b"post-auth data").unwrap();
        let restored = c.decompress(&packed).unwrap().unwrap();
        assert_eq!(restored, b"post-auth data");
    }

    #[test]
    fn immediate_when_authenticated() {
        let mut c = CompState::default();
        c.newkeys(CompAlg::ZlibOpenssh, CompAlg::ZlibOpenssh, true);
        assert!(c.comp_active());
    }

    #[test]
    fn garbage_fails() {
        init_test_log();
        let mut c = active_pair();
        assert!(matches!(
            c.decompress(&[0xff, 0x00, 0x55, 0xaa]).unwrap_err(),
            Error::BadCompress
        ));
    }
}
