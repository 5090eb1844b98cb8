//! Whole-connection tests against a scripted server.
//!
//! The server half speaks just enough of the protocol to exercise the
//! client: curve25519 KEX with an ed25519 host key, publickey/password
//! auth, session and direct-tcpip channels.

#![allow(clippy::unwrap_used)]

use crate::*;
use behaviour::{BhError, BhResult, CliBehaviour};
use channel::ChanData;
use encrypt::{KeyState, Keys};
use ident::RemoteVersion;
use kex::SessId;
use packets::{
    AuthMethod, Ed25519PubKey, Ed25519Sig, KexDHReply, Packet, ParseContext, PubKey,
    Signature, UserauthPkOk,
};
use runner::Runner;
use sign::{AgentKey, OwnedSig};
use skifflog::{init_test_log, trace};
use sshnames::*;
use sshwire::{
    hash_mpint, hash_ser_length, packet_from_bytes, write_ssh_vec, BinString, Blob,
};
use traffic::{TrafIn, TrafOut};

use digest::Digest;
use ed25519_dalek::Signer;
use sha2::Sha256;

const SERVER_VERSION: &[u8] = b"SSH-2.0-OpenSSH_8.9";

struct TestBehaviour {
    agent: Option<ed25519_dalek::SigningKey>,
    password: Option<String>,
    accept_hostkey: bool,
    hostkey_asks: usize,
    authed: bool,
    keys_offered: usize,
}

impl TestBehaviour {
    fn with_agent() -> Self {
        TestBehaviour {
            agent: Some(ed25519_dalek::SigningKey::generate(&mut rand_core::OsRng)),
            password: None,
            accept_hostkey: true,
            hostkey_asks: 0,
            authed: false,
            keys_offered: 0,
        }
    }

    fn with_password(pw: &str) -> Self {
        TestBehaviour { password: Some(pw.into()), agent: None, ..Self::with_agent() }
    }

    fn bare() -> Self {
        TestBehaviour { agent: None, ..Self::with_agent() }
    }
}

impl CliBehaviour for TestBehaviour {
    fn username(&mut self) -> BhResult<String> {
        Ok("alice".into())
    }

    fn valid_hostkey(&mut self, _key: &PubKey) -> BhResult<bool> {
        self.hostkey_asks += 1;
        Ok(self.accept_hostkey)
    }

    fn next_authkey(&mut self) -> BhResult<Option<AgentKey>> {
        if self.keys_offered > 0 {
            return Ok(None);
        }
        let Some(sk) = self.agent.as_ref() else {
            return Ok(None);
        };
        self.keys_offered += 1;
        let pk = sk.verifying_key().to_bytes();
        let blob =
            write_ssh_vec(&PubKey::Ed25519(Ed25519PubKey { key: BinString(&pk) })).unwrap();
        Ok(Some(AgentKey::new(blob)))
    }

    fn agent_sign(&mut self, _key: &AgentKey, msg: &auth::AuthSigMsg<'_>) -> BhResult<OwnedSig> {
        let sk = self.agent.as_ref().ok_or(BhError::Fail)?;
        let m = write_ssh_vec(&msg).map_err(|_| BhError::Fail)?;
        Ok(OwnedSig::Ed25519(sk.sign(&m).to_bytes().to_vec()))
    }

    fn auth_password(&mut self) -> BhResult<Option<String>> {
        Ok(self.password.clone())
    }

    fn authenticated(&mut self) {
        self.authed = true;
    }
}

/// The scripted server peer.
struct TestServer {
    tin: TrafIn,
    tout: TrafOut,
    keys: KeyState,
    rv: RemoteVersion,
    hostkey: ed25519_dalek::SigningKey,

    /// greeting and version line, sent ahead of any packets
    pre_output: Vec<u8>,

    sess_id: Option<SessId>,
    client_kexinit: Option<Vec<u8>>,
    server_kexinit: Option<Vec<u8>>,
    pending_keys: Option<Keys>,

    // behaviour knobs
    offer_methods: &'static str,
    accept_password: Option<&'static str>,
    chan_window: u32,
    chan_max_packet: u32,
    /// bridge direct-tcpip channels to an inner server (proxied tests)
    bridge: Option<Box<TestServer>>,

    // observations
    client_chan: Option<u32>,
    received_data: Vec<u8>,
    data_packet_sizes: Vec<usize>,
    exec_commands: Vec<String>,
    keepalives: Vec<Vec<u8>>,
    auth_successes: usize,
    got_close: bool,
}

impl TestServer {
    fn new() -> Self {
        let mut pre_output = SERVER_VERSION.to_vec();
        pre_output.extend_from_slice(b"\r\n");
        TestServer {
            tin: TrafIn::new(),
            tout: TrafOut::new(),
            keys: KeyState::new_cleartext(),
            rv: RemoteVersion::new(),
            hostkey: ed25519_dalek::SigningKey::generate(&mut rand_core::OsRng),
            pre_output,
            sess_id: None,
            client_kexinit: None,
            server_kexinit: None,
            pending_keys: None,
            offer_methods: "publickey,password",
            accept_password: None,
            chan_window: 200_000,
            chan_max_packet: 32768,
            bridge: None,
            client_chan: None,
            received_data: Vec::new(),
            data_packet_sizes: Vec::new(),
            exec_commands: Vec::new(),
            keepalives: Vec::new(),
            auth_successes: 0,
            got_close: false,
        }
    }

    fn send(&mut self, p: Packet) {
        self.tout.send_packet(p, &mut self.keys).unwrap();
    }

    fn take_output(&mut self) -> Vec<u8> {
        let mut out = core::mem::take(&mut self.pre_output);
        // bridge traffic surfaces as channel data
        if let Some(mut b) = self.bridge.take() {
            let inner = b.take_output();
            self.bridge = Some(b);
            if !inner.is_empty() {
                let num = self.client_chan.unwrap();
                let p = Packet::ChannelData(packets::ChannelData {
                    num,
                    data: BinString(&inner),
                });
                self.tout.send_packet(p, &mut self.keys).unwrap();
            }
        }
        let mut buf = [0u8; 4096];
        loop {
            let n = self.tout.output(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    fn input(&mut self, mut buf: &[u8]) {
        while !buf.is_empty() {
            let used = self.tin.input(&mut self.keys, &mut self.rv, buf).unwrap();
            buf = &buf[used..];
            if let Some((payload, _seq)) = self.tin.payload() {
                let payload = payload.to_vec();
                self.tin.done_payload();
                self.handle_packet(&payload);
            } else {
                assert!(used > 0, "server made no progress");
            }
        }
    }

    fn handle_packet(&mut self, payload: &[u8]) {
        let p = packet_from_bytes(payload, &ParseContext::default()).unwrap();
        match p {
            Packet::KexInit(_) => {
                self.client_kexinit = Some(payload.to_vec());
                if self.server_kexinit.is_none() {
                    self.send_kexinit();
                }
            }
            Packet::KexDHInit(p) => {
                let q_c = p.q_c.0.to_vec();
                self.kexdh_reply(&q_c);
            }
            Packet::NewKeys(_) => {
                let keys = self.pending_keys.take().unwrap();
                self.keys.rekey(keys, false);
                // a rekey consumed the stored kexinits
                self.server_kexinit = None;
                self.client_kexinit = None;
            }
            Packet::ServiceRequest(p) => {
                assert_eq!(p.name, SSH_SERVICE_USERAUTH);
                self.send(Packet::ServiceAccept(packets::ServiceAccept {
                    name: SSH_SERVICE_USERAUTH,
                }));
            }
            Packet::UserauthRequest(p) => match &p.method {
                AuthMethod::None => self.send_auth_failure(),
                AuthMethod::PubKey(m) => {
                    if m.sig.is_none() {
                        // probe: confirm the key is acceptable
                        let pkok = Packet::Userauth60(packets::Userauth60::PkOk(
                            UserauthPkOk { algo: m.sig_algo, key: m.pubkey.clone() },
                        ));
                        self.send(pkok);
                    } else {
                        self.auth_successes += 1;
                        self.send(Packet::UserauthSuccess(packets::UserauthSuccess {}));
                    }
                }
                AuthMethod::Password(m) => {
                    if Some(m.password.as_str().unwrap()) == self.accept_password {
                        self.auth_successes += 1;
                        self.send(Packet::UserauthSuccess(packets::UserauthSuccess {}));
                    } else {
                        self.send_auth_failure();
                    }
                }
                _ => self.send_auth_failure(),
            },
            Packet::ChannelOpen(p) => {
                self.client_chan = Some(p.num);
                if let packets::ChannelOpenType::DirectTcpip(_) = p.ty {
                    if self.bridge.is_none() {
                        self.bridge = Some(Box::new(TestServer::new()));
                    }
                }
                self.send(Packet::ChannelOpenConfirmation(
                    packets::ChannelOpenConfirmation {
                        num: p.num,
                        sender_num: 900,
                        initial_window: self.chan_window,
                        max_packet: self.chan_max_packet,
                    },
                ));
            }
            Packet::ChannelRequest(p) => {
                if let packets::ChannelReqType::Exec(e) = &p.req {
                    self.exec_commands.push(e.command.as_str().unwrap().to_string());
                }
                if p.want_reply {
                    // replies carry the recipient's channel number
                    let num = self.client_chan.unwrap();
                    self.send(Packet::ChannelSuccess(packets::ChannelSuccess { num }));
                }
            }
            Packet::ChannelData(p) => {
                self.data_packet_sizes.push(p.data.0.len());
                if let Some(b) = self.bridge.as_mut() {
                    b.input(p.data.0);
                } else {
                    self.received_data.extend_from_slice(p.data.0);
                }
            }
            Packet::ChannelWindowAdjust(_) => (),
            Packet::ChannelEof(_) => (),
            Packet::ChannelClose(_) => {
                if !self.got_close {
                    self.got_close = true;
                    let num = self.client_chan.unwrap();
                    self.send(Packet::ChannelClose(packets::ChannelClose { num }));
                }
            }
            Packet::Ignore(p) => {
                self.keepalives.push(p.data.0.to_vec());
            }
            Packet::Disconnect(p) => {
                trace!("client disconnected, reason {}", p.reason);
            }
            p => panic!("server got unexpected {:?}", p.message_num()),
        }
    }

    fn send_auth_failure(&mut self) {
        let p = Packet::UserauthFailure(packets::UserauthFailure {
            methods: self.offer_methods.try_into().unwrap(),
            partial: false,
        });
        self.send(p);
    }

    fn send_kexinit(&mut self) {
        let ki = packets::KexInit {
            cookie: [42u8; 16],
            kex: SSH_NAME_CURVE25519.try_into().unwrap(),
            hostsig: SSH_NAME_ED25519.try_into().unwrap(),
            cipher_c2s: SSH_NAME_AES256_CTR.try_into().unwrap(),
            cipher_s2c: SSH_NAME_AES256_CTR.try_into().unwrap(),
            mac_c2s: SSH_NAME_HMAC_SHA256.try_into().unwrap(),
            mac_s2c: SSH_NAME_HMAC_SHA256.try_into().unwrap(),
            comp_c2s: SSH_NAME_NONE.try_into().unwrap(),
            comp_s2c: SSH_NAME_NONE.try_into().unwrap(),
            lang_c2s: namelist::NameList::empty(),
            lang_s2c: namelist::NameList::empty(),
            first_follows: false,
            reserved: 0,
        };
        let payload = write_ssh_vec(&Packet::KexInit(ki)).unwrap();
        {
            let p = packet_from_bytes(&payload, &ParseContext::default()).unwrap();
            self.tout.send_packet(p, &mut self.keys).unwrap();
        }
        self.server_kexinit = Some(payload);
    }

    /// Initiates a rekey from the server side.
    fn start_rekey(&mut self) {
        assert!(self.server_kexinit.is_none());
        self.send_kexinit();
    }

    fn kexdh_reply(&mut self, q_c: &[u8]) {
        let eph = x25519_dalek::EphemeralSecret::random_from_rng(rand_core::OsRng);
        let q_s = x25519_dalek::PublicKey::from(&eph).to_bytes();
        let theirs: [u8; 32] = q_c.try_into().unwrap();
        let shared = eph.diffie_hellman(&theirs.into());
        let k = shared.as_bytes();

        let hostpk = self.hostkey.verifying_key().to_bytes();

        let mut h = Sha256::new();
        let hash_slice = |h: &mut Sha256, v: &[u8]| {
            h.update((v.len() as u32).to_be_bytes());
            h.update(v);
        };
        hash_slice(&mut h, ident::OUR_VERSION);
        hash_slice(&mut h, SERVER_VERSION);
        hash_slice(&mut h, self.client_kexinit.as_ref().unwrap());
        hash_slice(&mut h, self.server_kexinit.as_ref().unwrap());
        let hostpub = PubKey::Ed25519(Ed25519PubKey { key: BinString(&hostpk) });
        hash_ser_length(&mut h, &hostpub).unwrap();
        hash_slice(&mut h, q_c);
        hash_slice(&mut h, &q_s);
        hash_mpint(&mut h, k);
        let exh: Vec<u8> = h.finalize().to_vec();

        let sig = self.hostkey.sign(&exh).to_bytes();
        let p = Packet::KexDHReply(KexDHReply {
            k_s: Blob(hostpub),
            q_s: BinString(&q_s),
            sig: Blob(Signature::Ed25519(Ed25519Sig { sig: BinString(&sig) })),
        });
        self.send(p);
        self.send(Packet::NewKeys(packets::NewKeys {}));

        let sess_id = self.sess_id.get_or_insert(exh.clone()).clone();
        let algos = kex::Algos {
            kex: kex::SharedSecret::from_name(SSH_NAME_CURVE25519).unwrap(),
            hostsig: sign::SigType::Ed25519,
            cipher_enc: encrypt::Cipher::Aes256Ctr,
            cipher_dec: encrypt::Cipher::Aes256Ctr,
            integ_enc: encrypt::Integ::HmacSha256,
            integ_dec: encrypt::Integ::HmacSha256,
            comp_enc: comp::CompAlg::None,
            comp_dec: comp::CompAlg::None,
            discard_next: false,
            is_client: false,
        };
        self.pending_keys = Some(Keys::derive(k, &exh, &sess_id, &algos).unwrap());
    }
}

/// Shuttles bytes between a client runner and the scripted server until
/// neither makes progress.
fn pump(r: &mut Runner, b: &mut TestBehaviour, s: &mut TestServer) -> Result<()> {
    let mut buf = vec![0u8; 8192];
    let mut carry: Vec<u8> = Vec::new();
    for _ in 0..500 {
        let mut progressed = r.progress(b)?;

        let n = r.output(&mut buf)?;
        if n > 0 {
            s.input(&buf[..n]);
            progressed = true;
        }

        carry.extend_from_slice(&s.take_output());
        while !carry.is_empty() {
            let used = r.input(&carry)?;
            carry.drain(..used);
            if used == 0 {
                // a payload is waiting, process it before more input
                if r.progress(b)? {
                    progressed = true;
                    continue;
                }
                // channel data waiting for the application
                break;
            }
            progressed = true;
        }

        if !progressed {
            assert!(carry.is_empty(), "undelivered server bytes");
            return Ok(());
        }
    }
    panic!("pump didn't converge");
}

fn handshake() -> (Runner, TestBehaviour, TestServer) {
    init_test_log();
    let mut r = Runner::new_client(false);
    let mut b = TestBehaviour::with_agent();
    let mut s = TestServer::new();
    pump(&mut r, &mut b, &mut s).unwrap();
    assert!(r.is_authed());
    (r, b, s)
}

#[test]
fn handshake_happy_path() {
    let (r, b, s) = handshake();
    assert!(b.authed);
    assert_eq!(b.hostkey_asks, 1);
    assert_eq!(s.auth_successes, 1);
    // sha256 exchange hash becomes the session id
    assert_eq!(r.session_id().unwrap().len(), 32);
    // the successful key is remembered by digest
    assert!(r.auth_key_digest().is_some());
}

#[test]
fn hostkey_rejected() {
    init_test_log();
    let mut r = Runner::new_client(false);
    let mut b = TestBehaviour::with_agent();
    b.accept_hostkey = false;
    let mut s = TestServer::new();
    let e = pump(&mut r, &mut b, &mut s).unwrap_err();
    assert!(matches!(e, Error::HostKeyRejected));
}

#[test]
fn password_auth() {
    init_test_log();
    let mut r = Runner::new_client(false);
    let mut b = TestBehaviour::with_password("hunter2");
    let mut s = TestServer::new();
    s.offer_methods = "password";
    s.accept_password = Some("hunter2");
    pump(&mut r, &mut b, &mut s).unwrap();
    assert!(r.is_authed());
    // password auth leaves no key digest
    assert!(r.auth_key_digest().is_none());
}

#[test]
fn auth_methods_exhausted() {
    // server offers only publickey, the agent has no keys
    init_test_log();
    let mut r = Runner::new_client(false);
    let mut b = TestBehaviour::bare();
    let mut s = TestServer::new();
    s.offer_methods = "publickey";
    let e = pump(&mut r, &mut b, &mut s).unwrap_err();
    assert!(matches!(e, Error::NoAuthMethods));
}

#[test]
fn bad_mac_is_fatal() {
    let (mut r, mut b, mut s) = handshake();

    s.send(Packet::Ignore(packets::Ignore { data: BinString(b"soon corrupt") }));
    let mut wire = s.take_output();
    // flip a bit in the MAC trailer
    let last = wire.len() - 1;
    wire[last] ^= 1;

    let e = (|| -> Result<()> {
        let mut off = 0;
        while off < wire.len() {
            let used = r.input(&wire[off..])?;
            off += used;
            if used == 0 {
                r.progress(&mut b)?;
            }
        }
        r.progress(&mut b)?;
        Ok(())
    })()
    .unwrap_err();
    assert!(matches!(e, Error::BadMac));
}

#[test]
fn channel_flow_control() {
    // peer advertises window 4096 and max packet 2048, then a 6000 byte write
    let (mut r, mut b, mut s) = handshake();
    s.chan_window = 4096;
    s.chan_max_packet = 2048;

    let chan = r.open_session(Some("cat"), None).unwrap();
    pump(&mut r, &mut b, &mut s).unwrap();
    assert!(r.channel_ready(&chan).unwrap());
    assert_eq!(s.exec_commands, vec!["cat".to_string()]);

    let data = vec![7u8; 6000];
    let mut sent = 0;
    while sent < data.len() {
        let n = r.channel_send(&chan, ChanData::Normal, &data[sent..]).unwrap();
        if n == 0 {
            break;
        }
        sent += n;
    }
    pump(&mut r, &mut b, &mut s).unwrap();
    // window exhausted after two full packets
    assert_eq!(sent, 4096);
    assert_eq!(s.data_packet_sizes, vec![2048, 2048]);
    assert_eq!(r.channel_send(&chan, ChanData::Normal, &data[sent..]).unwrap(), 0);

    // window refill releases the tail
    s.send(Packet::ChannelWindowAdjust(packets::ChannelWindowAdjust {
        num: chan.num().0,
        adjust: 4096,
    }));
    pump(&mut r, &mut b, &mut s).unwrap();
    let n = r.channel_send(&chan, ChanData::Normal, &data[sent..]).unwrap();
    assert_eq!(n, 1904);
    pump(&mut r, &mut b, &mut s).unwrap();
    assert_eq!(s.data_packet_sizes, vec![2048, 2048, 1904]);
    assert_eq!(s.received_data.len(), 6000);
}

#[test]
fn rekey_preserves_session_id() {
    let (mut r, mut b, mut s) = handshake();
    let sess_id = r.session_id().unwrap().clone();

    let chan = r.open_session(None, None).unwrap();
    pump(&mut r, &mut b, &mut s).unwrap();

    s.start_rekey();
    pump(&mut r, &mut b, &mut s).unwrap();

    // rekey completed: session id unchanged, channels still usable
    assert_eq!(r.session_id().unwrap(), &sess_id);
    let n = r.channel_send(&chan, ChanData::Normal, b"after rekey").unwrap();
    assert_eq!(n, 11);
    pump(&mut r, &mut b, &mut s).unwrap();
    assert_eq!(s.received_data, b"after rekey");
}

#[test]
fn keepalive_probe() {
    let (mut r, mut b, mut s) = handshake();
    r.send_keepalive().unwrap();
    pump(&mut r, &mut b, &mut s).unwrap();
    assert_eq!(s.keepalives, vec![b"Hello, world!".to_vec()]);
}

#[test]
fn channel_close_handshake() {
    let (mut r, mut b, mut s) = handshake();
    let chan = r.open_session(None, None).unwrap();
    pump(&mut r, &mut b, &mut s).unwrap();

    r.channel_close(&chan).unwrap();
    pump(&mut r, &mut b, &mut s).unwrap();
    assert!(s.got_close);
    assert!(r.is_channel_closed(&chan));
    r.channel_done(chan).unwrap();
}

#[test]
fn incoming_session_data() {
    let (mut r, mut b, mut s) = handshake();
    let chan = r.open_session(None, None).unwrap();
    pump(&mut r, &mut b, &mut s).unwrap();

    let num = chan.num().0;
    s.send(Packet::ChannelData(packets::ChannelData {
        num,
        data: BinString(b"output bytes"),
    }));
    pump(&mut r, &mut b, &mut s).unwrap();

    let mut buf = [0u8; 64];
    let n = r.channel_input(&chan, ChanData::Normal, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"output bytes");
}

#[test]
fn disconnect_notifies() {
    let (mut r, mut b, mut s) = handshake();
    s.send(Packet::Disconnect(packets::Disconnect {
        reason: 2,
        desc: "going down".into(),
        lang: "".into(),
    }));
    let e = pump(&mut r, &mut b, &mut s).unwrap_err();
    assert!(matches!(e, Error::DisconnectByHost { reason: 2 }));
}

mod async_tests {
    use super::*;
    use crate::{expand_proxy_command, SshClient};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Runs a scripted server over an async stream.
    async fn serve(stream: tokio::io::DuplexStream, mut serv: TestServer) {
        use tokio::io::split;
        let (mut rd, mut wr) = split(stream);
        let mut buf = vec![0u8; 8192];
        loop {
            let out = serv.take_output();
            if !out.is_empty() {
                if wr.write_all(&out).await.is_err() {
                    return;
                }
                continue;
            }
            match rd.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => serv.input(&buf[..n]),
            }
        }
    }

    #[tokio::test]
    async fn async_session_roundtrip() {
        init_test_log();
        let (a, b_stream) = tokio::io::duplex(16384);
        let mut serv = TestServer::new();
        serv.chan_window = 200_000;
        tokio::spawn(serve(b_stream, serv));

        let client = SshClient::new(false);
        let run_client = client.clone();
        tokio::spawn(async move {
            let mut b = TestBehaviour::with_agent();
            let _ = run_client.run(a, &mut b).await;
        });

        let fut = async {
            client.authenticated().await.unwrap();
            let mut chan = client.open_session(Some("true"), None).await.unwrap();
            chan.write_all(b"stdin for the command").await.unwrap();
            chan.flush().await.unwrap();
            client.disconnect().unwrap();
        };
        tokio::time::timeout(Duration::from_secs(10), fut).await.unwrap();
    }

    #[tokio::test]
    async fn proxied_connection() {
        init_test_log();
        let (a, b_stream) = tokio::io::duplex(16384);
        // the outer server bridges direct-tcpip channels to an inner
        // scripted server, standing in for host B
        tokio::spawn(serve(b_stream, TestServer::new()));

        let outer = SshClient::new(false);
        let run_outer = outer.clone();
        tokio::spawn(async move {
            let mut b = TestBehaviour::with_agent();
            let _ = run_outer.run(a, &mut b).await;
        });

        let fut = async {
            outer.authenticated().await.unwrap();
            let tunnel = outer
                .open_direct_tcpip("hostb.example.com", 22, ("localhost", 0))
                .await
                .unwrap();

            // an entire second handshake through the channel
            let inner = SshClient::new(false);
            let run_inner = inner.clone();
            let inner_task = tokio::spawn(async move {
                let mut b = TestBehaviour::with_agent();
                let r = run_inner.run(tunnel, &mut b).await;
                // host key was checked once for the inner host too
                assert_eq!(b.hostkey_asks, 1);
                r
            });

            inner.authenticated().await.unwrap();
            assert_eq!(inner.session_id().unwrap().len(), 32);
            // independent transports have distinct session ids
            assert_ne!(inner.session_id(), outer.session_id());

            inner.disconnect().unwrap();
            // surface any assertion failure from the inner task
            let _ = inner_task.await.unwrap();
        };
        tokio::time::timeout(Duration::from_secs(10), fut).await.unwrap();
    }

    #[test]
    fn proxy_command_template() {
        assert_eq!(
            expand_proxy_command("nc %h %p", "alice", "b.example.com", 2022),
            "nc b.example.com 2022"
        );
    }
}
