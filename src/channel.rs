//! Channel multiplexing: lifecycle, window accounting, and request RPCs.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::collections::{HashMap, VecDeque};

use crate::*;
use packets::{
    ChannelData, ChannelDataExt, ChannelOpenType, ChannelReqType, ChannelRequest, Packet,
};
use sshnames::*;
use sshwire::{BinString, TextString};
use traffic::TrafSend;

/// A SSH protocol channel number, locally assigned.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct ChanNum(pub u32);

impl core::fmt::Display for ChanNum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// Channel data packet type.
///
/// Only the stderr extended stream is distinguished; other extended data
/// type codes are not in common use.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum ChanData {
    /// `SSH_MSG_CHANNEL_DATA`
    Normal,
    /// `SSH_MSG_CHANNEL_EXTENDED_DATA`, `SSH_EXTENDED_DATA_STDERR`
    Stderr,
}

impl ChanData {
    pub(crate) fn packet_offset(&self) -> usize {
        match self {
            ChanData::Normal => ChannelData::DATA_OFFSET,
            ChanData::Stderr => ChannelDataExt::DATA_OFFSET,
        }
    }
}

/// Incoming channel data noted during dispatch, the bytes themselves stay
/// in the receive buffer until the application reads them.
#[derive(Debug)]
pub(crate) struct DataIn {
    pub num: ChanNum,
    pub dt: ChanData,
    /// offset of the data within the packet payload
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone)]
pub struct ModePair {
    pub opcode: u8,
    pub arg: u32,
}

/// Requested terminal for a session channel.
#[derive(Debug, Clone)]
pub struct Pty {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
    pub modes: Vec<ModePair>,
}

impl Default for Pty {
    fn default() -> Self {
        Pty {
            term: config::DEFAULT_TERM.into(),
            cols: 80,
            rows: 24,
            width: 0,
            height: 0,
            modes: Vec::new(),
        }
    }
}

impl Pty {
    /// Encodes the terminal modes, opcode/argument pairs with a
    /// `TTY_OP_END` terminator. RFC4254 Section 8.
    fn encode_modes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.modes.len() * 5 + 1);
        for m in &self.modes {
            v.push(m.opcode);
            v.extend_from_slice(&m.arg.to_be_bytes());
        }
        v.push(0);
        v
    }
}

/// Like a `packets::ChannelReqType` but with storage.
/// Lifetime-free variants have the packet part directly.
#[derive(Debug)]
pub enum ReqDetails {
    Shell,
    Exec(String),
    Pty(Pty),
    WinChange(packets::WinChange),
    Signal(&'static str),
    Break(packets::Break),
}

#[derive(Debug)]
pub struct Req {
    // recipient's channel number
    num: u32,
    details: ReqDetails,
}

impl ReqDetails {
    fn want_reply(&self) -> bool {
        // window changes and signals are fire-and-forget
        !matches!(self, Self::WinChange(_) | Self::Signal(_))
    }
}

impl Req {
    fn packet<'a>(&'a self, modes: &'a [u8]) -> Result<Packet<'a>> {
        let num = self.num;
        let want_reply = self.details.want_reply();
        let ty = match &self.details {
            ReqDetails::Shell => ChannelReqType::Shell,
            ReqDetails::Pty(pty) => ChannelReqType::Pty(packets::PtyReq {
                term: TextString(pty.term.as_bytes()),
                cols: pty.cols,
                rows: pty.rows,
                width: pty.width,
                height: pty.height,
                modes: BinString(modes),
            }),
            ReqDetails::Exec(cmd) => {
                ChannelReqType::Exec(packets::Exec { command: cmd.as_str().into() })
            }
            ReqDetails::Signal(sig) => ChannelReqType::Signal(packets::Signal { sig: *sig }),
            ReqDetails::WinChange(rt) => ChannelReqType::WinChange(rt.clone()),
            ReqDetails::Break(rt) => ChannelReqType::Break(rt.clone()),
        };
        let p = ChannelRequest { num, want_reply, req: ty }.into();
        Ok(p)
    }
}

// Variants match packets::ChannelReqType, without data
#[derive(Debug, Clone, Copy)]
enum ReqKind {
    Shell,
    Exec,
    Pty,
    Break,
}

/// How the server finished a session channel.
#[derive(Debug, Clone)]
pub enum Exit {
    Status(u32),
    Signal(String),
}

pub(crate) type InitReqs = Vec<ReqDetails>;

/// Per-direction channel variables
#[derive(Debug)]
struct ChanDir {
    /// `u32` rather than `ChanNum` because it is also used
    /// for the sender-side number
    num: u32,
    max_packet: usize,
    window: usize,
}

#[derive(Debug)]
enum ChanState {
    /// `init_req` are the request messages to be sent once the
    /// ChannelOpenConfirmation is received
    Opening {
        init_req: InitReqs,
    },
    Normal,
    RecvEof,
    RecvClose,
    /// Open was rejected by the peer, the error is kept until the
    /// application observes it
    OpenFailed {
        reason: u32,
    },
    /// The channel is unused and ready to close after a call to `done()`
    PendingDone,
}

pub(crate) struct Channel {
    state: ChanState,
    sent_eof: bool,
    sent_close: bool,
    // queue of requests sent with want_reply
    last_req: VecDeque<ReqKind>,
    // a want_reply request was answered with ChannelFailure
    req_failed: bool,

    recv: ChanDir,
    /// populated in all states except `Opening` and `OpenFailed`
    send: Option<ChanDir>,

    /// Accumulated bytes for the next window adjustment (inbound data
    /// direction)
    pending_adjust: usize,

    full_window: usize,

    /// The application asked to close; EOF and close are emitted by
    /// `flush_pending()` once the transport permits
    close_requested: bool,

    /// Exit report from the server for session channels
    exit: Option<Exit>,

    /// Set once the application has called `done()`. The channel
    /// will only be removed from the list
    /// (allowing channel number re-use) if `app_done` is set
    app_done: bool,
}

impl Channel {
    fn new(num: ChanNum, init_req: InitReqs) -> Self {
        Channel {
            state: ChanState::Opening { init_req },
            sent_close: false,
            sent_eof: false,
            last_req: VecDeque::new(),
            req_failed: false,
            recv: ChanDir {
                num: num.0,
                max_packet: config::DEFAULT_MAX_PACKET,
                window: config::DEFAULT_WINDOW,
            },
            send: None,
            pending_adjust: 0,
            full_window: config::DEFAULT_WINDOW,
            close_requested: false,
            exit: None,
            app_done: false,
        }
    }

    /// Local channel number
    pub(crate) fn num(&self) -> ChanNum {
        ChanNum(self.recv.num)
    }

    /// Remote channel number, fails if the channel is still opening.
    ///
    /// Returned as a plain `u32` since it is a different namespace than
    /// `ChanNum`. This is the channel number included in most sent packets.
    pub(crate) fn send_num(&self) -> Result<u32> {
        Ok(self.send.as_ref().trap()?.num)
    }

    fn request(&mut self, req: ReqDetails, s: &mut TrafSend) -> Result<()> {
        let num = self.send_num()?;
        if req.want_reply() {
            let kind = match &req {
                ReqDetails::Shell => ReqKind::Shell,
                ReqDetails::Exec(_) => ReqKind::Exec,
                ReqDetails::Pty(_) => ReqKind::Pty,
                ReqDetails::Break(_) => ReqKind::Break,
                _ => return Err(Error::bug()),
            };
            self.last_req.push_back(kind);
        }
        let r = Req { num, details: req };
        let modes = if let ReqDetails::Pty(pty) = &r.details {
            pty.encode_modes()
        } else {
            Vec::new()
        };
        s.send(r.packet(&modes)?)
    }

    fn handle_eof(&mut self, _s: &mut TrafSend) -> Result<()> {
        if matches!(self.state, ChanState::Normal) {
            self.state = ChanState::RecvEof;
        }
        Ok(())
    }

    /// `channel_close` is replied to with our own close, once per
    /// direction. The channel is fully closed once both have been sent.
    fn handle_close(&mut self, s: &mut TrafSend) -> Result<()> {
        if !self.sent_close {
            s.send(packets::ChannelClose { num: self.send_num()? })?;
            self.sent_close = true;
        }
        self.state = ChanState::RecvClose;
        Ok(())
    }

    fn finished_input(&mut self, len: usize) {
        self.pending_adjust = self.pending_adjust.saturating_add(len)
    }

    fn have_recv_eof(&self) -> bool {
        matches!(self.state, ChanState::RecvEof | ChanState::RecvClose)
    }

    fn is_closed(&self) -> bool {
        matches!(self.state, ChanState::RecvClose) && self.sent_close
    }

    /// The segment length permitted for an outbound data packet.
    ///
    /// A packet is only emitted when the whole segment fits in the peer's
    /// window, so the window never goes negative.
    fn send_segment(&self, wanted: usize) -> Option<usize> {
        let send = self.send.as_ref()?;
        if self.sent_eof || self.sent_close {
            return None;
        }
        let seg = wanted.min(send.max_packet);
        if seg > 0 && send.window >= seg {
            Some(seg)
        } else {
            None
        }
    }

    /// Upper bound for a future send, used by callers sizing buffers.
    fn send_allowed(&self) -> Option<usize> {
        self.send.as_ref().map(|s| usize::min(s.window, s.max_packet))
    }

    /// Returns a window adjustment packet once half the window is consumed.
    fn check_window_adjust(&mut self) -> Result<Option<Packet>> {
        let num = self.send.as_ref().trap()?.num;
        if self.pending_adjust > self.full_window / 2 {
            let adjust = self.pending_adjust as u32;
            self.pending_adjust = 0;
            self.recv.window += adjust as usize;
            let p = packets::ChannelWindowAdjust { num, adjust }.into();
            Ok(Some(p))
        } else {
            Ok(None)
        }
    }
}

pub(crate) struct Channels {
    ch: HashMap<u32, Channel>,
    /// Local ids count up monotonically, no re-use
    next_num: u32,
}

impl Channels {
    pub fn new() -> Self {
        Channels { ch: HashMap::new(), next_num: 0 }
    }

    /// Requests opening a channel, returning the local number and the
    /// `ChannelOpen` packet to send.
    pub fn open<'b>(
        &mut self,
        ty: ChannelOpenType<'b>,
        init_req: InitReqs,
    ) -> Result<(ChanNum, Packet<'b>)> {
        let num = ChanNum(self.next_num);
        self.next_num = self.next_num.wrapping_add(1);

        let chan = Channel::new(num, init_req);
        let p = packets::ChannelOpen {
            num: num.0,
            initial_window: chan.recv.window as u32,
            max_packet: chan.recv.max_packet as u32,
            ty,
        }
        .into();
        self.ch.insert(num.0, chan);
        Ok((num, p))
    }

    fn get(&self, num: ChanNum) -> Result<&Channel> {
        self.ch.get(&num.0).ok_or(error::BadChannel { num }.build())
    }

    fn get_mut(&mut self, num: ChanNum) -> Result<&mut Channel> {
        self.ch.get_mut(&num.0).ok_or(error::BadChannel { num }.build())
    }

    /// Must be called when an application has finished with a channel.
    pub fn done(&mut self, num: ChanNum) -> Result<()> {
        let ch = self.get_mut(num)?;
        ch.app_done = true;
        if matches!(ch.state, ChanState::PendingDone | ChanState::OpenFailed { .. }) {
            self.ch.remove(&num.0);
        }
        Ok(())
    }

    fn remove(&mut self, num: ChanNum) -> Result<()> {
        let ch = self.get_mut(num)?;
        if ch.app_done {
            trace!("removing channel {}", num);
            self.ch.remove(&num.0);
        } else {
            ch.state = ChanState::PendingDone;
            trace!("not removing channel {}, not finished", num);
        }
        Ok(())
    }

    /// Returns `Some(reason)` if the peer rejected the open request.
    pub(crate) fn open_failure(&self, num: ChanNum) -> Option<u32> {
        match self.get(num) {
            Ok(Channel { state: ChanState::OpenFailed { reason }, .. }) => Some(*reason),
            _ => None,
        }
    }

    /// `true` once the open confirmation has arrived.
    pub(crate) fn is_open(&self, num: ChanNum) -> bool {
        self.get(num).map_or(false, |c| {
            !matches!(c.state, ChanState::Opening { .. } | ChanState::OpenFailed { .. })
        })
    }

    /// Returns the channel data packet to send.
    ///
    /// The caller has already sized `data` with
    /// [`send_segment()`](Self::send_segment).
    /// Don't call with zero length data.
    pub(crate) fn send_data<'b>(
        &mut self,
        num: ChanNum,
        dt: ChanData,
        data: &'b [u8],
    ) -> Result<Packet<'b>> {
        debug_assert!(!data.is_empty());

        let ch = self.get_mut(num)?;
        let send = ch.send.as_mut().trap()?;
        if data.len() > send.max_packet || data.len() > send.window {
            return Err(Error::bug());
        }
        send.window -= data.len();

        let data = BinString(data);
        let p = match dt {
            ChanData::Normal => packets::ChannelData { num: send.num, data }.into(),
            ChanData::Stderr => packets::ChannelDataExt {
                num: send.num,
                code: SSH_EXTENDED_DATA_STDERR,
                data,
            }
            .into(),
        };

        Ok(p)
    }

    /// Notes an application-initiated shutdown. EOF and close go out on
    /// the next `flush_pending()`, packets can't be interleaved into a
    /// key exchange.
    pub(crate) fn close(&mut self, num: ChanNum) -> Result<()> {
        self.get_mut(num)?.close_requested = true;
        Ok(())
    }

    /// Emits deferred close handshakes and window adjustments.
    ///
    /// Called whenever no key exchange is in flight.
    pub(crate) fn flush_pending(&mut self, s: &mut TrafSend) -> Result<()> {
        for ch in self.ch.values_mut() {
            if ch.send.is_none() {
                continue;
            }
            if ch.close_requested {
                if !ch.sent_eof {
                    s.send(packets::ChannelEof { num: ch.send_num()? })?;
                    ch.sent_eof = true;
                }
                if !ch.sent_close {
                    s.send(packets::ChannelClose { num: ch.send_num()? })?;
                    ch.sent_close = true;
                }
            }
            if let Some(p) = ch.check_window_adjust()? {
                s.send(p)?;
            }
        }
        Ok(())
    }

    /// Informs the channel layer that an incoming packet has been read out,
    /// so a window adjustment can be queued.
    pub(crate) fn finished_input(
        &mut self,
        num: ChanNum,
        len: usize,
    ) -> Result<Option<Packet>> {
        let ch = self.get_mut(num)?;
        ch.finished_input(len);
        ch.check_window_adjust()
    }

    pub(crate) fn have_recv_eof(&self, num: ChanNum) -> bool {
        self.get(num).map_or(false, |c| c.have_recv_eof())
    }

    pub(crate) fn is_closed(&self, num: ChanNum) -> bool {
        self.get(num).map_or(true, |c| c.is_closed())
    }

    pub(crate) fn send_segment(&self, num: ChanNum, wanted: usize) -> Result<Option<usize>> {
        Ok(self.get(num)?.send_segment(wanted))
    }

    pub(crate) fn send_allowed(&self, num: ChanNum) -> Option<usize> {
        self.get(num).map_or(Some(0), |c| c.send_allowed())
    }

    pub(crate) fn exit_status(&self, num: ChanNum) -> Option<Exit> {
        self.get(num).ok().and_then(|c| c.exit.clone())
    }

    pub(crate) fn term_window_change(
        &mut self,
        num: ChanNum,
        winch: packets::WinChange,
        s: &mut TrafSend,
    ) -> Result<()> {
        let ch = self.get_mut(num)?;
        ch.request(ReqDetails::WinChange(winch), s)
    }

    pub(crate) fn signal(
        &mut self,
        num: ChanNum,
        sig: &'static str,
        s: &mut TrafSend,
    ) -> Result<()> {
        let ch = self.get_mut(num)?;
        ch.request(ReqDetails::Signal(sig), s)
    }

    pub(crate) fn send_break(
        &mut self,
        num: ChanNum,
        length: u32,
        s: &mut TrafSend,
    ) -> Result<()> {
        let ch = self.get_mut(num)?;
        ch.request(ReqDetails::Break(packets::Break { length }), s)
    }

    /// `true` once a `want_reply` request on the channel was refused.
    pub(crate) fn req_failed(&self, num: ChanNum) -> bool {
        self.get(num).map_or(false, |c| c.req_failed)
    }

    // Some returned errors will be caught by the caller and ignored for
    // unknown channel numbers.
    fn dispatch_inner(
        &mut self,
        packet: Packet<'_>,
        s: &mut TrafSend,
    ) -> Result<Option<DataIn>> {
        let mut data_in = None;
        match packet {
            Packet::ChannelOpen(p) => {
                // Server-initiated channels (forwarded-tcpip, x11) have no
                // registered acceptor in the core.
                debug!("Rejecting incoming channel open");
                s.send(packets::ChannelOpenFailure {
                    num: p.num,
                    reason: ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED as u32,
                    desc: "".into(),
                    lang: "".into(),
                })?;
            }

            Packet::ChannelOpenConfirmation(p) => {
                let ch = self.get_mut(ChanNum(p.num))?;
                match ch.state {
                    ChanState::Opening { .. } => {
                        let init_state =
                            core::mem::replace(&mut ch.state, ChanState::Normal);
                        if let ChanState::Opening { init_req } = init_state {
                            debug_assert!(ch.send.is_none());
                            ch.send = Some(ChanDir {
                                num: p.sender_num,
                                max_packet: p.max_packet as usize,
                                window: p.initial_window as usize,
                            });
                            for r in init_req {
                                ch.request(r, s)?
                            }
                        }
                    }
                    _ => {
                        trace!("Bad channel state for open confirmation");
                        return error::SshProto.fail();
                    }
                }
            }

            Packet::ChannelOpenFailure(p) => {
                let ch = self.get_mut(ChanNum(p.num))?;
                if ch.send.is_some() {
                    trace!("open failure after confirmation");
                    return error::SshProto.fail();
                }
                debug!("Channel open failed, reason {}", p.reason);
                ch.state = ChanState::OpenFailed { reason: p.reason };
            }
            Packet::ChannelWindowAdjust(p) => {
                let send = self.get_mut(ChanNum(p.num))?.send.as_mut().trap()?;
                send.window = send.window.saturating_add(p.adjust as usize);
            }
            Packet::ChannelData(p) => {
                let ch = self.get_mut(ChanNum(p.num))?;
                let len = p.data.0.len();
                if len > ch.recv.window {
                    trace!("Peer exceeded our window");
                    return error::SshProto.fail();
                }
                ch.recv.window -= len;
                data_in = Some(DataIn {
                    num: ChanNum(p.num),
                    dt: ChanData::Normal,
                    offset: ChannelData::DATA_OFFSET,
                    len,
                });
            }
            Packet::ChannelDataExt(p) => {
                let ch = self.get_mut(ChanNum(p.num))?;
                let len = p.data.0.len();
                if len > ch.recv.window {
                    trace!("Peer exceeded our window");
                    return error::SshProto.fail();
                }
                ch.recv.window -= len;
                if p.code != SSH_EXTENDED_DATA_STDERR {
                    // Unknown extended stream, drop the data but still
                    // refill the window.
                    debug!("Ignoring extended data, code {}", p.code);
                    ch.finished_input(len);
                } else {
                    data_in = Some(DataIn {
                        num: ChanNum(p.num),
                        dt: ChanData::Stderr,
                        offset: ChannelDataExt::DATA_OFFSET,
                        len,
                    });
                }
            }
            Packet::ChannelEof(p) => {
                let ch = self.get_mut(ChanNum(p.num))?;
                ch.handle_eof(s)?;
            }
            Packet::ChannelClose(p) => {
                let ch = self.get_mut(ChanNum(p.num))?;
                ch.handle_close(s)?;
                self.remove(ChanNum(p.num))?;
            }
            Packet::ChannelRequest(p) => match self.get_mut(ChanNum(p.num)) {
                Ok(ch) => ch.dispatch_request(&p, s)?,
                Err(_) => debug!("Ignoring request to unknown channel: {p:#?}"),
            },
            Packet::ChannelSuccess(p) => {
                let ch = self.get_mut(ChanNum(p.num))?;
                if let Some(k) = ch.last_req.pop_front() {
                    trace!("Request {k:?} succeeded");
                } else {
                    debug!("Reply to no request");
                }
            }
            Packet::ChannelFailure(p) => {
                let ch = self.get_mut(ChanNum(p.num))?;
                if let Some(k) = ch.last_req.pop_front() {
                    warn!("Channel request {k:?} failed");
                    ch.req_failed = true;
                } else {
                    debug!("Reply to no request");
                }
            }
            _ => Error::bug_msg("unreachable")?,
        };

        Ok(data_in)
    }

    /// Incoming packet handling
    pub fn dispatch(&mut self, packet: Packet<'_>, s: &mut TrafSend) -> Result<Option<DataIn>> {
        let r = self.dispatch_inner(packet, s);

        match r {
            Err(Error::BadChannel { num, .. }) => {
                // Unexpected or late packets for unknown channels are
                // logged and dropped, not fatal.
                warn!("Ignoring bad channel number {num}");
                Ok(None)
            }
            r => r,
        }
    }
}

impl Channel {
    /// Handles a request sent by the server.
    ///
    /// Exit notifications are recorded, anything else with `want_reply`
    /// is refused.
    fn dispatch_request(&mut self, p: &ChannelRequest, s: &mut TrafSend) -> Result<()> {
        let success = match &p.req {
            ChannelReqType::ExitStatus(st) => {
                self.exit = Some(Exit::Status(st.status));
                true
            }
            ChannelReqType::ExitSignal(sig) => {
                self.exit = Some(Exit::Signal(sig.signal.to_string()));
                true
            }
            r => {
                if let ChannelReqType::Unknown(u) = r {
                    warn!("Unknown channel req type \"{u}\"");
                } else {
                    // OK unwrap: tested for Unknown
                    debug!("Unhandled channel req \"{}\"", r.variant_name().unwrap());
                };
                false
            }
        };

        if p.want_reply {
            let num = self.send_num()?;
            if success {
                s.send(packets::ChannelSuccess { num })?;
            } else {
                s.send(packets::ChannelFailure { num })?;
            }
        }
        Ok(())
    }
}
