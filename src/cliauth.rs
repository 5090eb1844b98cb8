//! Client authentication state machine: `none` probe, agent-signed
//! publickey, keyboard-interactive, and password, with per-method retry
//! budgets. RFC4252 and RFC4256.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::*;
use auth::AuthType;
use behaviour::CliBehaviour;
use config::{MAX_AGENT_KEY_ATTEMPTS, MAX_INTERACTIVE_ATTEMPTS};
use kex::SessId;
use packets::{
    AuthMethod, MethodPubKey, Packet, ParseContext, UserauthInfoRequest, UserauthPkOk,
    UserauthRequest,
};
use sign::{AgentKey, OwnedSig};
use sshnames::*;
use traffic::TrafSend;

// pub for packets::ParseContext
pub enum Req {
    Password(String),
    PubKey { key: AgentKey },
    KeyboardInteractive,
}

pub(crate) enum AuthState {
    Unstarted,
    /// ServiceRequest sent, waiting for ServiceAccept
    ServiceRequested,
    /// The `none` probe has been sent
    MethodQuery,
    Request { last_req: Req },
    Idle,
}

impl Req {
    // Creates a packet from the current request
    fn req_packet<'b>(
        &'b self,
        username: &'b str,
        parse_ctx: &mut ParseContext,
    ) -> Result<Packet<'b>> {
        let username = username.into();
        let p = match self {
            Req::PubKey { key, .. } => {
                parse_ctx.cli_auth_type = Some(AuthType::PubKey);
                packets::UserauthRequest {
                    username,
                    service: SSH_SERVICE_CONNECTION,
                    method: key.pubkey()?.try_into()?,
                }
                .into()
            }
            Req::Password(pw) => {
                parse_ctx.cli_auth_type = Some(AuthType::Password);
                packets::UserauthRequest {
                    username,
                    service: SSH_SERVICE_CONNECTION,
                    method: packets::AuthMethod::Password(packets::MethodPassword {
                        change: false,
                        password: pw.as_str().into(),
                    }),
                }
                .into()
            }
            Req::KeyboardInteractive => {
                parse_ctx.cli_auth_type = Some(AuthType::KeyboardInteractive);
                packets::UserauthRequest {
                    username,
                    service: SSH_SERVICE_CONNECTION,
                    method: packets::AuthMethod::KeyboardInteractive(
                        packets::MethodKeyboardInteractive {
                            lang: "".into(),
                            submethods: "".into(),
                        },
                    ),
                }
                .into()
            }
        };
        Ok(p)
    }
}

pub(crate) struct CliAuth {
    state: AuthState,

    username: String,

    // Starts as true, set to false if the behaviour reports no password
    // callback. Not set false if the server rejects auth.
    try_password: bool,

    // Set to false if the behaviour has no keyboard-interactive callback.
    try_kbi: bool,

    // Set to false once the agent runs out of keys.
    try_pubkey: bool,

    pubkey_attempts: usize,
    interactive_attempts: usize,

    // digest of the blob of the key that authenticated, kept for
    // connection-reuse logic in callers
    success_key_digest: Option<[u8; 32]>,
}

impl CliAuth {
    pub fn new() -> Self {
        CliAuth {
            state: AuthState::Unstarted,
            username: String::new(),
            try_password: true,
            try_kbi: true,
            try_pubkey: true,
            pubkey_attempts: 0,
            interactive_attempts: 0,
            success_key_digest: None,
        }
    }

    /// Begins authentication once the first KEX completes.
    pub fn start(&mut self, s: &mut TrafSend, b: &mut dyn CliBehaviour) -> Result<()> {
        if let AuthState::Unstarted = self.state {
            self.state = AuthState::ServiceRequested;
            self.username = b.username().map_err(|_| Error::BehaviourError {
                msg: "No username provided",
            })?;

            s.send(packets::ServiceRequest { name: SSH_SERVICE_USERAUTH })?;
        }
        Ok(())
    }

    /// Handles ServiceAccept by sending the initial `none` method probe.
    ///
    /// The failure response carries the server's allowed method list.
    pub fn service_accepted(&mut self, name: &str, s: &mut TrafSend) -> Result<()> {
        if name != SSH_SERVICE_USERAUTH {
            trace!("Accept for unrequested service {name}");
            return error::SshProto.fail();
        }
        match self.state {
            AuthState::ServiceRequested => {
                self.state = AuthState::MethodQuery;
                s.send(packets::UserauthRequest {
                    username: self.username.as_str().into(),
                    service: SSH_SERVICE_CONNECTION,
                    method: packets::AuthMethod::None,
                })?;
                Ok(())
            }
            _ => error::PacketWrong.fail(),
        }
    }

    fn make_password_req(&mut self, b: &mut dyn CliBehaviour) -> Result<Option<Req>> {
        match b.auth_password() {
            Err(_) => Err(Error::BehaviourError { msg: "Password callback failed" }),
            Ok(None) => {
                self.try_password = false;
                Ok(None)
            }
            Ok(Some(pw)) if pw.is_empty() => error::AuthCancelled.fail(),
            Ok(Some(pw)) => Ok(Some(Req::Password(pw))),
        }
    }

    /// Retrieves the next agent key to try, and returns the request.
    /// Returns None if none are available. `self.try_pubkey` will be set
    /// false when no more will be available.
    fn make_pubkey_req(&mut self, b: &mut dyn CliBehaviour) -> Option<Req> {
        if self.pubkey_attempts >= MAX_AGENT_KEY_ATTEMPTS {
            self.try_pubkey = false;
            return None;
        }
        let k = b.next_authkey().unwrap_or_else(|_| {
            warn!("Error getting pubkey for auth");
            None
        });

        match k {
            Some(key) => {
                self.pubkey_attempts += 1;
                Some(Req::PubKey { key })
            }
            None => {
                trace!("stop iterating pubkeys");
                self.try_pubkey = false;
                None
            }
        }
    }

    /// Builds the signed pubkey auth message.
    ///
    /// The signature is over the session id followed by the re-built
    /// request, RFC4252 Section 7. The agent produces the signature.
    fn auth_sig_msg(
        key: &AgentKey,
        sess_id: &SessId,
        p: &Packet,
        b: &mut dyn CliBehaviour,
    ) -> Result<OwnedSig> {
        if let Packet::UserauthRequest(UserauthRequest {
            username,
            service,
            method: AuthMethod::PubKey(MethodPubKey { sig_algo, pubkey, .. }),
        }) = p
        {
            let sig_packet = UserauthRequest {
                username: *username,
                service: *service,
                method: AuthMethod::PubKey(MethodPubKey {
                    sig_algo: *sig_algo,
                    pubkey: pubkey.clone(),
                    sig: None,
                }),
            };

            let msg = auth::AuthSigMsg::new(&sig_packet, sess_id);
            b.agent_sign(key, &msg)
                .map_err(|_| Error::BehaviourError { msg: "Agent signing failed" })
        } else {
            Err(Error::bug())
        }
    }

    pub fn auth60(
        &mut self,
        auth60: &packets::Userauth60<'_>,
        sess_id: &SessId,
        parse_ctx: &mut ParseContext,
        s: &mut TrafSend,
        b: &mut dyn CliBehaviour,
    ) -> Result<()> {
        match auth60 {
            packets::Userauth60::PkOk(pkok) => {
                parse_ctx.cli_auth_type = None;
                self.auth_pkok(pkok, sess_id, parse_ctx, s, b)
            }
            packets::Userauth60::InfoRequest(req) => self.auth_info_request(req, s, b),
            packets::Userauth60::PwChangeReq(_req) => {
                // The password was correct but expired. Without a
                // change-password flow the attempt is abandoned.
                warn!("Server requests a password change");
                parse_ctx.cli_auth_type = None;
                error::AuthCancelled.fail()
            }
        }
    }

    fn auth_pkok(
        &mut self,
        pkok: &UserauthPkOk<'_>,
        sess_id: &SessId,
        parse_ctx: &mut ParseContext,
        s: &mut TrafSend,
        b: &mut dyn CliBehaviour,
    ) -> Result<()> {
        // We are only sending keys one at a time so they shouldn't
        // get out of sync.
        let key = match &self.state {
            AuthState::Request { last_req: Req::PubKey { key } } => {
                let blob_pk: packets::PubKey = sshwire::read_ssh(key.blob(), None)?;
                if blob_pk != pkok.key.0 {
                    trace!("Mismatching pkok key");
                    return error::SshProto.fail();
                }
                key.clone()
            }
            _ => {
                trace!("Unexpected userauth60");
                return error::SshProto.fail();
            }
        };

        self.success_key_digest = Some(key.digest());

        let req = Req::PubKey { key: key.clone() };
        let mut p = req.req_packet(&self.username, parse_ctx)?;

        // Create the signature over sess-id || request
        let new_sig = Self::auth_sig_msg(&key, sess_id, &p, b)?;

        // Put it in the packet
        if let Packet::UserauthRequest(UserauthRequest {
            method: AuthMethod::PubKey(MethodPubKey { sig: ref mut psig, .. }),
            ..
        }) = p
        {
            *psig = Some(sshwire::Blob((&new_sig).into()))
        }

        s.send(p)?;
        Ok(())
    }

    fn auth_info_request(
        &mut self,
        req: &UserauthInfoRequest<'_>,
        s: &mut TrafSend,
        b: &mut dyn CliBehaviour,
    ) -> Result<()> {
        if !matches!(self.state, AuthState::Request { last_req: Req::KeyboardInteractive }) {
            trace!("Unexpected info request");
            return error::SshProto.fail();
        }

        // A zero-prompt request just reports progress, answer it without
        // troubling the application.
        let replies = if req.prompts.is_empty() {
            Vec::new()
        } else {
            let r = b
                .auth_keyboard_interactive(req.name, req.instruction, &req.prompts)
                .map_err(|_| Error::BehaviourError { msg: "Interactive callback failed" })?;
            if r.is_empty() {
                return error::AuthCancelled.fail();
            }
            if r.len() != req.prompts.len() {
                return Err(Error::BehaviourError {
                    msg: "Response count doesn't match prompts",
                });
            }
            r
        };

        let responses: Vec<sshwire::TextString> =
            replies.iter().map(|r| r.as_str().into()).collect();
        s.send(packets::UserauthInfoResponse { responses })?;
        Ok(())
    }

    /// Selects and sends the next authentication attempt after a failure.
    ///
    /// `methods` is the server's `can-continue` list. Methods are tried in
    /// the order publickey, keyboard-interactive, password, each within
    /// its retry budget. Exhaustion is [`Error::NoAuthMethods`].
    pub fn failure(
        &mut self,
        failure: &packets::UserauthFailure<'_>,
        parse_ctx: &mut ParseContext,
        s: &mut TrafSend,
        b: &mut dyn CliBehaviour,
    ) -> Result<()> {
        parse_ctx.cli_auth_type = None;
        self.state = AuthState::Idle;

        if failure.partial {
            debug!("Partial auth success, continuing");
        }

        if self.try_pubkey && failure.methods.has_algo(SSH_AUTHMETHOD_PUBLICKEY)? {
            if let Some(req) = self.make_pubkey_req(b) {
                self.state = AuthState::Request { last_req: req };
            }
        }

        if matches!(self.state, AuthState::Idle)
            && self.try_kbi
            && failure.methods.has_algo(SSH_AUTHMETHOD_INTERACTIVE)?
        {
            if !b.supports_keyboard_interactive()
                || self.interactive_attempts >= MAX_INTERACTIVE_ATTEMPTS
            {
                self.try_kbi = false;
            } else {
                self.interactive_attempts += 1;
                self.state = AuthState::Request { last_req: Req::KeyboardInteractive };
            }
        }

        if matches!(self.state, AuthState::Idle)
            && self.try_password
            && failure.methods.has_algo(SSH_AUTHMETHOD_PASSWORD)?
        {
            if self.interactive_attempts >= MAX_INTERACTIVE_ATTEMPTS {
                self.try_password = false;
            } else if let Some(req) = self.make_password_req(b)? {
                self.interactive_attempts += 1;
                self.state = AuthState::Request { last_req: req };
            }
        }

        if let AuthState::Request { last_req, .. } = &self.state {
            let p = last_req.req_packet(&self.username, parse_ctx)?;
            s.send(p)?;
            Ok(())
        } else {
            Err(Error::NoAuthMethods)
        }
    }

    pub fn success(&mut self, b: &mut dyn CliBehaviour) -> Result<()> {
        self.state = AuthState::Idle;
        b.authenticated();
        Ok(())
    }

    /// Digest of the public key blob that authenticated, if publickey
    /// auth succeeded.
    pub fn success_key_digest(&self) -> Option<&[u8; 32]> {
        self.success_key_digest.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::KeyState;
    use crate::skifflog::init_test_log;
    use crate::sshwire::packet_from_bytes;
    use crate::traffic::TrafOut;

    struct TestBehaviour {
        keys: Vec<AgentKey>,
        password: Option<String>,
        kbi: bool,
    }

    impl CliBehaviour for TestBehaviour {
        fn username(&mut self) -> behaviour::BhResult<String> {
            Ok("alice".into())
        }

        fn valid_hostkey(&mut self, _key: &packets::PubKey) -> behaviour::BhResult<bool> {
            Ok(true)
        }

        fn next_authkey(&mut self) -> behaviour::BhResult<Option<AgentKey>> {
            Ok(self.keys.pop())
        }

        fn auth_password(&mut self) -> behaviour::BhResult<Option<String>> {
            Ok(self.password.clone())
        }

        fn supports_keyboard_interactive(&self) -> bool {
            self.kbi
        }

        fn auth_keyboard_interactive(
            &mut self,
            _name: sshwire::TextString,
            _instruction: sshwire::TextString,
            prompts: &[packets::InfoPrompt],
        ) -> behaviour::BhResult<Vec<String>> {
            Ok(prompts.iter().map(|_| "resp".to_string()).collect())
        }
    }

    struct Fixture {
        auth: CliAuth,
        traf: TrafOut,
        keys: KeyState,
        ctx: ParseContext,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                auth: CliAuth::new(),
                traf: TrafOut::new(),
                keys: KeyState::new_cleartext(),
                ctx: ParseContext::new(),
            }
        }

        /// Drains and parses one queued outbound packet payload
        fn sent_payloads(&mut self) -> Vec<Vec<u8>> {
            let mut buf = vec![0u8; 4096];
            let mut out = Vec::new();
            let l = self.traf.output(&mut buf);
            let mut rest = &buf[..l];
            while !rest.is_empty() {
                let total = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize + 4;
                let padlen = rest[4] as usize;
                out.push(rest[5..total - padlen].to_vec());
                rest = &rest[total..];
            }
            out
        }
    }

    fn failure_packet(methods: &str) -> Vec<u8> {
        crate::sshwire::write_ssh_vec(&Packet::UserauthFailure(packets::UserauthFailure {
            methods: methods.try_into().unwrap(),
            partial: false,
        }))
        .unwrap()
    }

    #[test]
    fn auth_method_order_and_exhaustion() {
        init_test_log();
        let mut f = Fixture::new();
        let mut b = TestBehaviour { keys: vec![], password: Some("pw".into()), kbi: false };

        let mut s = f.traf.sender(&mut f.keys);
        f.auth.start(&mut s, &mut b).unwrap();
        f.auth.service_accepted(SSH_SERVICE_USERAUTH, &mut s).unwrap();
        let sent = f.sent_payloads();
        // service request then none probe
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0][0], packets::MessageNumber::SSH_MSG_SERVICE_REQUEST as u8);
        assert_eq!(sent[1][0], packets::MessageNumber::SSH_MSG_USERAUTH_REQUEST as u8);

        // no agent keys: password is chosen
        let fp = failure_packet("publickey,password");
        let fp = packet_from_bytes(&fp, &ParseContext::new()).unwrap();
        let fp = if let Packet::UserauthFailure(x) = fp { x } else { panic!() };
        let mut s = f.traf.sender(&mut f.keys);
        f.auth.failure(&fp, &mut f.ctx, &mut s, &mut b).unwrap();
        assert!(matches!(f.ctx.cli_auth_type, Some(AuthType::Password)));

        // two more failures exhaust the password budget
        let mut s = f.traf.sender(&mut f.keys);
        f.auth.failure(&fp, &mut f.ctx, &mut s, &mut b).unwrap();
        let mut s = f.traf.sender(&mut f.keys);
        f.auth.failure(&fp, &mut f.ctx, &mut s, &mut b).unwrap();
        let mut s = f.traf.sender(&mut f.keys);
        let e = f.auth.failure(&fp, &mut f.ctx, &mut s, &mut b).unwrap_err();
        assert!(matches!(e, Error::NoAuthMethods));
    }

    #[test]
    fn no_methods_without_callbacks() {
        init_test_log();
        let mut f = Fixture::new();
        // server only offers publickey, agent has nothing
        let mut b = TestBehaviour { keys: vec![], password: None, kbi: false };
        let fp = failure_packet("publickey");
        let fp = crate::sshwire::packet_from_bytes(&fp, &ParseContext::new()).unwrap();
        let fp = if let Packet::UserauthFailure(x) = fp { x } else { panic!() };
        let mut s = f.traf.sender(&mut f.keys);
        let e = f.auth.failure(&fp, &mut f.ctx, &mut s, &mut b).unwrap_err();
        assert!(matches!(e, Error::NoAuthMethods));
    }

    #[test]
    fn kbi_round() {
        init_test_log();
        let mut f = Fixture::new();
        let mut b = TestBehaviour { keys: vec![], password: None, kbi: true };

        let fp = failure_packet("keyboard-interactive");
        let fp = crate::sshwire::packet_from_bytes(&fp, &ParseContext::new()).unwrap();
        let fp = if let Packet::UserauthFailure(x) = fp { x } else { panic!() };
        let mut s = f.traf.sender(&mut f.keys);
        f.auth.failure(&fp, &mut f.ctx, &mut s, &mut b).unwrap();
        assert!(matches!(f.ctx.cli_auth_type, Some(AuthType::KeyboardInteractive)));
        f.sent_payloads();

        // server sends two prompts
        let req = packets::Userauth60::InfoRequest(packets::UserauthInfoRequest {
            name: "".into(),
            instruction: "".into(),
            lang: "".into(),
            prompts: vec![
                packets::InfoPrompt { prompt: "Password:".into(), echo: false },
                packets::InfoPrompt { prompt: "OTP:".into(), echo: true },
            ],
        });
        let sess_id: kex::SessId = vec![1; 32];
        let mut s = f.traf.sender(&mut f.keys);
        f.auth.auth60(&req, &sess_id, &mut f.ctx, &mut s, &mut b).unwrap();
        let sent = f.sent_payloads();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], packets::MessageNumber::SSH_MSG_USERAUTH_INFO_RESPONSE as u8);
        // two responses
        assert_eq!(u32::from_be_bytes(sent[0][1..5].try_into().unwrap()), 2);
    }
}
