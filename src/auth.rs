#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::*;
use kex::SessId;
use sshwire::{BinString, SSHEncode, SSHSink, WireResult};

/// The message to be signed in a pubkey authentication message,
/// RFC4252 Section 7.
///
/// The UserauthRequest's signature field is None.
#[derive(Debug)]
pub struct AuthSigMsg<'a> {
    pub(crate) sess_id: BinString<'a>,
    pub(crate) u: &'a packets::UserauthRequest<'a>,
}

impl SSHEncode for &AuthSigMsg<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.sess_id.enc(s)?;

        let m = packets::MessageNumber::SSH_MSG_USERAUTH_REQUEST as u8;
        m.enc(s)?;

        (*self.u).enc(s)?;
        Ok(())
    }
}

impl<'a> AuthSigMsg<'a> {
    pub fn new(u: &'a packets::UserauthRequest<'a>, sess_id: &'a SessId) -> Self {
        auth::AuthSigMsg { sess_id: BinString(sess_id.as_slice()), u }
    }
}

/// Which kind of auth request a packet 60 reply refers to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AuthType {
    Password,
    PubKey,
    KeyboardInteractive,
}
