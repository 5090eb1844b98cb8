//! SSH protocol version exchange, RFC4253 Section 4.2.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::*;

/// The version line sent to the peer. No comment portion.
pub const OUR_VERSION: &[u8] = b"SSH-2.0-skiff_0.2";

const SSH_PREFIX: &[u8] = b"SSH-";
const SSH2_PREFIX: &[u8] = b"SSH-2.0";

/// Longest identification line accepted, per RFC4253
const MAX_LINE: usize = 255;

/// Greeting lines before the identification line are tolerated and
/// discarded, up to this total.
const MAX_PREAMBLE: usize = 16 * 1024;

/// Parses and stores the remote version string, consuming bytes ahead of the
/// binary packet protocol. Lines prior to the `SSH-` identification line
/// (a server greeting) are discarded.
pub(crate) struct RemoteVersion {
    line: Vec<u8>,
    version: Option<Vec<u8>>,
    discarded: usize,
}

impl RemoteVersion {
    pub fn new() -> Self {
        RemoteVersion { line: Vec::new(), version: None, discarded: 0 }
    }

    /// Returns the remote version line, without trailing CR LF.
    /// `None` until the identification line has been received.
    pub fn version(&self) -> Option<&[u8]> {
        self.version.as_deref()
    }

    /// Consumes bytes from `buf` until the identification line is complete,
    /// returning the number of bytes used.
    pub fn consume(&mut self, buf: &[u8]) -> Result<usize> {
        if self.version.is_some() {
            return Err(Error::bug());
        }

        let mut used = 0;
        for &b in buf {
            used += 1;
            if b == b'\n' {
                let mut line = core::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.starts_with(SSH_PREFIX) {
                    if !line.starts_with(SSH2_PREFIX) {
                        debug!("Remote version isn't SSH-2.0");
                        return error::NotSsh.fail();
                    }
                    trace!("Remote version {:?}", core::str::from_utf8(&line));
                    self.version = Some(line);
                    return Ok(used);
                }
                // a greeting line, discard it
                self.discarded += line.len() + 1;
                if self.discarded > MAX_PREAMBLE {
                    return error::NotSsh.fail();
                }
            } else {
                if self.line.len() >= MAX_LINE {
                    return error::NotSsh.fail();
                }
                self.line.push(b);
            }
        }
        Ok(used)
    }
}

/// Writes our version line, returning the length used.
pub(crate) fn write_version(buf: &mut [u8]) -> Result<usize> {
    let total = OUR_VERSION.len() + 2;
    if total > buf.len() {
        return Err(Error::NoRoom);
    }
    buf[..OUR_VERSION.len()].copy_from_slice(OUR_VERSION);
    buf[OUR_VERSION.len()..total].copy_from_slice(b"\r\n");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_plain() {
        let mut rv = RemoteVersion::new();
        let used = rv.consume(b"SSH-2.0-OpenSSH_8.9\r\nrest").unwrap();
        assert_eq!(used, 21);
        assert_eq!(rv.version().unwrap(), b"SSH-2.0-OpenSSH_8.9");
    }

    #[test]
    fn version_split_across_reads() {
        let mut rv = RemoteVersion::new();
        rv.consume(b"SSH-2.0-lib").unwrap();
        assert!(rv.version().is_none());
        rv.consume(b"test\r\n").unwrap();
        assert_eq!(rv.version().unwrap(), b"SSH-2.0-libtest");
    }

    #[test]
    fn version_greeting_discarded() {
        let mut rv = RemoteVersion::new();
        let input = b"Welcome to example.com\nno fishing\r\nSSH-2.0-x\r\n";
        let used = rv.consume(input).unwrap();
        assert_eq!(used, input.len());
        assert_eq!(rv.version().unwrap(), b"SSH-2.0-x");
    }

    #[test]
    fn version_not_ssh2() {
        let mut rv = RemoteVersion::new();
        let e = rv.consume(b"SSH-1.5-old\r\n").unwrap_err();
        assert!(matches!(e, Error::NotSsh));
    }

    #[test]
    fn version_bare_lf() {
        // RFC allows implementations to be lenient about a missing CR
        let mut rv = RemoteVersion::new();
        rv.consume(b"SSH-2.0-bare\n").unwrap();
        assert_eq!(rv.version().unwrap(), b"SSH-2.0-bare");
    }
}
