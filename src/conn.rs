//! Represents the state of a SSH client connection.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug, *},
    log::{debug, error, info, log, trace, warn},
};

use pretty_hex::PrettyHex;

use crate::*;
use behaviour::CliBehaviour;
use channel::Channels;
use client::Client;
use kex::{AlgoConfig, Kex, SessId};
use packets::{Packet, ParseContext};
use traffic::TrafSend;

/// The core state of a SSH connection.
pub(crate) struct Conn {
    state: ConnState,

    // State of any current Key Exchange
    kex: Kex,

    sess_id: Option<SessId>,

    client: Client,

    algo_conf: AlgoConfig,

    parse_ctx: ParseContext,

    /// Remote version string. Kept for kexinit hashing during rekeys
    pub(crate) remote_version: ident::RemoteVersion,

    pub(crate) channels: Channels,
}

#[derive(Debug)]
enum ConnState {
    /// The initial state
    SendIdent,
    /// Prior to SSH binary packet protocol, receiving remote version
    /// identification
    ReceiveIdent,
    /// Waiting for first Kex to complete
    FirstKex,
    /// Binary protocol has started, auth hasn't succeeded
    PreAuth,
    /// After auth success
    Authed,
}

#[derive(Default, Debug)]
/// Returned state from `handle_payload()` or `progress()` for `Runner` to
/// use.
pub(crate) struct Dispatched {
    /// Incoming channel data, left in place in the receive buffer
    pub data_in: Option<channel::DataIn>,

    /// Connection state has changed, waiters should be re-polled
    pub progressed: bool,
}

impl Conn {
    pub fn new(compression: bool) -> Self {
        Conn {
            sess_id: None,
            kex: Kex::new(),
            remote_version: ident::RemoteVersion::new(),
            state: ConnState::SendIdent,
            algo_conf: AlgoConfig::new(compression),
            channels: Channels::new(),
            parse_ctx: ParseContext::new(),
            client: Client::new(),
        }
    }

    pub(crate) fn is_authed(&self) -> bool {
        matches!(self.state, ConnState::Authed)
    }

    pub(crate) fn initial_sent(&self) -> bool {
        !matches!(self.state, ConnState::SendIdent)
    }

    pub(crate) fn sess_id(&self) -> Option<&SessId> {
        self.sess_id.as_ref()
    }

    pub(crate) fn auth_key_digest(&self) -> Option<&[u8; 32]> {
        self.client.auth.success_key_digest()
    }

    /// Updates `ConnState` and sends any packets required to progress the
    /// connection state.
    pub(crate) fn progress(
        &mut self,
        s: &mut TrafSend,
        b: &mut dyn CliBehaviour,
    ) -> Result<Dispatched, Error> {
        let mut disp = Dispatched::default();
        match self.state {
            ConnState::SendIdent => {
                s.send_version()?;
                // send early to avoid round trip latency
                self.kex.send_kexinit(&self.algo_conf, s)?;
                disp.progressed = true;
                self.state = ConnState::ReceiveIdent
            }
            ConnState::ReceiveIdent => {
                if self.remote_version.version().is_some() {
                    // Ready to start binary packets. We've already sent our
                    // KexInit with SendIdent.
                    disp.progressed = true;
                    self.state = ConnState::FirstKex
                }
            }
            ConnState::FirstKex => {
                if self.sess_id.is_some() {
                    disp.progressed = true;
                    self.state = ConnState::PreAuth;
                    self.client.auth.start(s, b)?;
                }
            }
            ConnState::PreAuth | ConnState::Authed => {
                // event driven from here on
            }
        }
        trace!("-> {:?}", self.state);

        Ok(disp)
    }

    /// Volunteers a rekey once enough packets have been sent.
    ///
    /// Server-initiated rekeys arrive as a mid-session KexInit instead.
    pub(crate) fn maybe_rekey(&mut self, sent_packets: u32, s: &mut TrafSend) -> Result<()> {
        if self.is_authed() && self.kex.is_idle() && sent_packets > config::REKEY_PACKETS {
            debug!("Initiating rekey");
            self.kex.send_kexinit(&self.algo_conf, s)?;
        }
        Ok(())
    }

    /// Sends a keep-alive probe, invoked by the driver after an idle
    /// interval.
    pub(crate) fn keepalive(&mut self, s: &mut TrafSend) -> Result<()> {
        if self.is_authed() && self.kex.is_idle() {
            s.send(packets::Ignore { data: sshwire::BinString(b"Hello, world!") })?;
        }
        Ok(())
    }

    /// Emits channel packets that were deferred while a KEX was in flight.
    pub(crate) fn flush_channels(&mut self, s: &mut TrafSend) -> Result<()> {
        if self.kex.is_idle() {
            self.channels.flush_pending(s)?;
        }
        Ok(())
    }

    pub(crate) fn packet<'p>(&self, payload: &'p [u8]) -> Result<Packet<'p>> {
        sshwire::packet_from_bytes(payload, &self.parse_ctx)
    }

    /// Consumes an input payload, a view into the receive buffer.
    /// Response packets are queued to the send buffer.
    pub(crate) fn handle_payload(
        &mut self,
        payload: &[u8],
        seq: u32,
        s: &mut TrafSend,
        b: &mut dyn CliBehaviour,
    ) -> Result<Dispatched, Error> {
        // Parse the packet
        match self.packet(payload) {
            Ok(p) => {
                let num = p.message_num() as u8;
                let a = self.dispatch_packet(p, s, b);
                if let Err(Error::SshProto | Error::PacketWrong) = a {
                    debug!("Error handling {num} packet");
                }
                a
            }
            Err(Error::UnknownPacket { number }) => {
                trace!("Unimplemented packet type {number}");
                s.send(packets::Unimplemented { seq })?;
                Ok(Dispatched::default())
            }
            Err(e) => {
                debug!("Error decoding packet: {e}");
                trace!("Input:\n{:#?}", payload.hex_dump());
                Err(e)
            }
        }
    }

    /// Check that a packet is received in the correct state
    fn check_packet(&self, p: &Packet) -> Result<()> {
        let r = if !matches!(self.kex, Kex::Idle | Kex::KexInit { .. }) {
            // KEX in progress only allows certain packets
            match p.category() {
                packets::Category::All => Ok(()),
                packets::Category::Kex => Ok(()),
                _ => {
                    debug!("Invalid packet during kex");
                    error::SshProto.fail()
                }
            }
        } else {
            // No KEX in progress, check for auth and session packets
            match p.category() {
                packets::Category::All => Ok(()),
                packets::Category::Kex => Ok(()),
                packets::Category::Auth => match self.state {
                    ConnState::PreAuth | ConnState::Authed => Ok(()),
                    _ => error::SshProto.fail(),
                },
                packets::Category::Sess => match self.state {
                    ConnState::Authed => Ok(()),
                    _ => error::SshProto.fail(),
                },
            }
        };

        if r.is_err() {
            debug!("Received unexpected packet {}", p.message_num() as u8);
            trace!("state is {:?}", self.state);
        }
        r
    }

    pub fn kex_is_idle(&self) -> bool {
        self.kex.is_idle()
    }

    pub fn dispatch_packet(
        &mut self,
        packet: Packet,
        s: &mut TrafSend,
        b: &mut dyn CliBehaviour,
    ) -> Result<Dispatched, Error> {
        trace!("Incoming {packet:#?}");
        let mut disp = Dispatched::default();

        self.check_packet(&packet)?;

        match packet {
            Packet::KexInit(k) => {
                // A mid-session KexInit begins a rekey, channel traffic
                // already in flight keeps being delivered.
                self.kex.handle_kexinit(
                    k,
                    &self.algo_conf,
                    &self.remote_version,
                    s,
                )?;
            }
            Packet::KexDHInit(_p) => {
                debug!("Server sent a DH init");
                return error::SshProto.fail();
            }
            Packet::KexDHReply(p) => {
                self.kex.handle_kexdhreply(&p, s, b)?;
            }
            Packet::NewKeys(_) => {
                let authed = self.is_authed();
                self.kex.handle_newkeys(&mut self.sess_id, s, authed)?;
                disp.progressed = true;
            }
            Packet::ServiceRequest(_) => {
                // only a server accepts service requests
                debug!("Server sent a service request");
                return error::SshProto.fail();
            }
            Packet::ServiceAccept(p) => {
                self.client.auth.service_accepted(p.name, s)?;
            }
            Packet::Ignore(_) => {
                // nothing to do
            }
            Packet::Unimplemented(_) => {
                warn!("Received SSH unimplemented message");
            }
            Packet::DebugPacket(p) => {
                let level = match p.always_display {
                    true => log::Level::Info,
                    false => log::Level::Debug,
                };
                log!(level, "SSH debug message from remote host: {:?}", p.message);
            }
            Packet::Disconnect(p) => {
                // SSH_DISCONNECT_BY_APPLICATION is normal, sent by the
                // openssh server on shutdown.
                info!("Disconnected by remote, reason {}", p.reason);
                return Err(Error::DisconnectByHost { reason: p.reason });
            }
            Packet::UserauthRequest(_) => {
                debug!("Server sent an auth request");
                return error::SshProto.fail();
            }
            Packet::UserauthFailure(p) => {
                self.client.auth.failure(&p, &mut self.parse_ctx, s, b)?;
            }
            Packet::UserauthSuccess(_) => {
                if matches!(self.state, ConnState::PreAuth) {
                    self.state = ConnState::Authed;
                    // delayed compression methods activate now
                    s.auth_success();
                    self.client.auth_success(&mut self.parse_ctx, b)?;
                    disp.progressed = true;
                } else {
                    debug!("Received UserauthSuccess unrequested")
                }
            }
            Packet::UserauthBanner(p) => {
                self.client.banner(&p, b);
            }
            Packet::Userauth60(p) => {
                let sess_id = self.sess_id.as_ref().trap()?;
                self.client.auth.auth60(&p, sess_id, &mut self.parse_ctx, s, b)?;
            }
            Packet::UserauthInfoResponse(_) => {
                debug!("Server sent an info response");
                return error::SshProto.fail();
            }
            Packet::ChannelOpen(_)
            | Packet::ChannelOpenConfirmation(_)
            | Packet::ChannelOpenFailure(_)
            | Packet::ChannelWindowAdjust(_)
            | Packet::ChannelData(_)
            | Packet::ChannelDataExt(_)
            | Packet::ChannelEof(_)
            | Packet::ChannelClose(_)
            | Packet::ChannelRequest(_)
            | Packet::ChannelSuccess(_)
            | Packet::ChannelFailure(_) => {
                disp.data_in = self.channels.dispatch(packet, s)?;
                disp.progressed = true;
            }
            Packet::GlobalRequest(p) => {
                trace!("Got global request {p:?}");
                if p.want_reply {
                    // no global request handlers are installed
                    s.send(packets::RequestFailure {})?;
                }
            }
            Packet::RequestSuccess(_p) => {
                trace!("Got global request success")
            }
            Packet::RequestFailure(_) => {
                trace!("Got global request failure")
            }
        };
        Ok(disp)
    }
}
