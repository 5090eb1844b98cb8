//! Drives the connection state machine against byte buffers.
//!
//! `Runner` is sans-io: the caller feeds received bytes to [`input()`]
//! and writes out bytes from [`output()`]. Wakers notify the caller when
//! either side becomes ready.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::task::Waker;

use crate::*;
use behaviour::CliBehaviour;
use channel::{ChanData, ChanNum, Exit, InitReqs, Pty, ReqDetails};
use conn::Conn;
use encrypt::KeyState;
use kex::SessId;
use sshnames::SSH_DISCONNECT_BY_APPLICATION;
use traffic::{TrafIn, TrafOut};

// Runner public methods take a `ChanHandle` which cannot be cloned. This
// prevents confusion if an application were to continue using a channel
// after the channel was completed. The `ChanHandle` is consumed by
// `Runner::channel_done()`. Internally `ChanNum` is used, a newtype
// around u32.

pub struct Runner {
    conn: Conn,

    /// Binary packet handling from the network buffer
    traf_in: TrafIn,
    /// Binary packet handling to the network buffer
    traf_out: TrafOut,

    /// Current encryption/integrity keys
    keys: KeyState,

    /// Waker when output is ready
    output_waker: Option<Waker>,
    /// Waker when ready to consume input
    input_waker: Option<Waker>,

    /// A disconnect packet has been queued, close once it drains
    disconnecting: bool,

    closed: bool,
}

impl core::fmt::Debug for Runner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runner")
            .field("keys", &self.keys)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new_client(compression: bool) -> Runner {
        Runner {
            conn: Conn::new(compression),
            traf_in: TrafIn::new(),
            traf_out: TrafOut::new(),
            keys: KeyState::new_cleartext(),
            output_waker: None,
            input_waker: None,
            disconnecting: false,
            closed: false,
        }
    }

    /// Drives connection progress, handling a received payload and queueing
    /// other packets to send as required.
    ///
    /// This must be called regularly, passing in `behaviour`.
    /// Returns Ok(true) if an input packet was handled, Ok(false) if no
    /// packet was ready.
    pub fn progress(&mut self, behaviour: &mut dyn CliBehaviour) -> Result<bool> {
        let mut progressed = false;
        let sent_packets = self.keys.sent_packets();
        let mut s = self.traf_out.sender(&mut self.keys);
        // Handle an incoming packet
        if let Some((payload, seq)) = self.traf_in.payload() {
            progressed = true;
            let d = self.conn.handle_payload(payload, seq, &mut s, behaviour)?;

            if let Some(data_in) = d.data_in {
                // incoming channel data stays in the buffer until the
                // application reads it
                trace!("handle_payload chan input {data_in:?}");
                self.traf_in.set_channel_input(data_in)?;
            } else {
                // other packets have been completed
                self.traf_in.done_payload();
            }
        }

        self.conn.progress(&mut s, behaviour)?;
        self.conn.maybe_rekey(sent_packets, &mut s)?;
        self.conn.flush_channels(&mut s)?;
        self.wake();

        Ok(progressed)
    }

    /// `true` when channel packets may be sent, no KEX is in flight.
    pub fn ready_to_open(&self) -> bool {
        !self.closed && self.conn.is_authed() && self.conn.kex_is_idle()
    }

    /// Feeds input bytes from the network, returning the size consumed.
    pub fn input(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.traf_in.input(&mut self.keys, &mut self.conn.remote_version, buf)
    }

    /// Write any pending output to the wire, returning the size written
    pub fn output(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.closed {
            return error::ConnectionLost.fail();
        }
        let r = self.traf_out.output(buf);
        if r > 0 {
            self.wake();
        }
        Ok(r)
    }

    pub fn is_input_ready(&self) -> bool {
        (self.conn.initial_sent() && self.traf_in.ready_input()) || self.closed
    }

    pub fn is_output_pending(&self) -> bool {
        self.traf_out.output_pending() || self.closed
    }

    /// Set a waker to be notified when the `Runner` is ready
    /// to accept input from the main SSH socket.
    pub fn set_input_waker(&mut self, waker: &Waker) {
        if let Some(ref w) = self.input_waker {
            if w.will_wake(waker) {
                return;
            }
        }
        if let Some(w) = self.input_waker.replace(waker.clone()) {
            w.wake()
        }
    }

    /// Set a waker to be notified when SSH socket output is ready
    pub fn set_output_waker(&mut self, waker: &Waker) {
        if let Some(ref w) = self.output_waker {
            if w.will_wake(waker) {
                return;
            }
        }
        if let Some(w) = self.output_waker.replace(waker.clone()) {
            w.wake()
        }
    }

    /// Tears down the transport.
    ///
    /// All further operations fail with [`Error::ConnectionLost`]; the
    /// async layer completes every pending waiter with the same.
    pub fn close(&mut self) {
        trace!("runner close");
        self.closed = true;
        if let Some(w) = self.output_waker.take() {
            w.wake()
        }
        if let Some(w) = self.input_waker.take() {
            w.wake()
        }
    }

    /// Queues a clean disconnect packet. The driver closes the transport
    /// once pending output has drained.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.disconnecting {
            self.disconnecting = true;
            let mut s = self.traf_out.sender(&mut self.keys);
            let _ = s.send(packets::Disconnect {
                reason: SSH_DISCONNECT_BY_APPLICATION,
                desc: "bye".into(),
                lang: "".into(),
            });
        }
        self.wake();
        Ok(())
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_authed(&self) -> bool {
        self.conn.is_authed()
    }

    /// The session identifier, fixed at the first KEX.
    pub fn session_id(&self) -> Option<&SessId> {
        self.conn.sess_id()
    }

    /// Digest of the public key that authenticated, for connection reuse.
    pub fn auth_key_digest(&self) -> Option<&[u8; 32]> {
        self.conn.auth_key_digest()
    }

    /// Sends a keep-alive probe if the connection is authenticated.
    pub fn send_keepalive(&mut self) -> Result<()> {
        let mut s = self.traf_out.sender(&mut self.keys);
        self.conn.keepalive(&mut s)?;
        self.wake();
        Ok(())
    }

    /// Opens a session channel, optionally with a pty and a command.
    ///
    /// With no command a shell is requested.
    pub fn open_session(&mut self, exec: Option<&str>, pty: Option<Pty>) -> Result<ChanHandle> {
        if !self.is_authed() {
            return error::NotAuthenticated.fail();
        }
        if !self.conn.kex_is_idle() {
            // the caller polls ready_to_open() first
            return error::PacketWrong.fail();
        }
        let mut init_req = InitReqs::new();
        if let Some(pty) = pty {
            init_req.push(ReqDetails::Pty(pty));
        }
        if let Some(cmd) = exec {
            init_req.push(ReqDetails::Exec(cmd.into()));
        } else {
            init_req.push(ReqDetails::Shell);
        }
        let (num, p) = self.conn.channels.open(packets::ChannelOpenType::Session, init_req)?;
        self.traf_out.send_packet(p, &mut self.keys)?;
        self.wake();
        Ok(ChanHandle(num))
    }

    /// Opens a `direct-tcpip` forwarding channel to (host, port).
    pub fn open_direct_tcpip(
        &mut self,
        host: &str,
        port: u16,
        origin: (&str, u16),
    ) -> Result<ChanHandle> {
        if !self.is_authed() {
            return error::NotAuthenticated.fail();
        }
        if !self.conn.kex_is_idle() {
            return error::PacketWrong.fail();
        }
        let ty = packets::ChannelOpenType::DirectTcpip(packets::DirectTcpip {
            address: host.into(),
            port: port as u32,
            origin: origin.0.into(),
            origin_port: origin.1 as u32,
        });
        let (num, p) = self.conn.channels.open(ty, InitReqs::new())?;
        self.traf_out.send_packet(p, &mut self.keys)?;
        self.wake();
        Ok(ChanHandle(num))
    }

    /// `Some(true)` once the open confirmation arrived, `Some(false)` while
    /// pending, or an error if the peer refused the open.
    pub fn channel_ready(&self, chan: &ChanHandle) -> Result<bool> {
        if self.closed {
            return error::ConnectionLost.fail();
        }
        if let Some(reason) = self.conn.channels.open_failure(chan.0) {
            return Err(Error::ChannelOpenFailed { reason });
        }
        Ok(self.conn.channels.is_open(chan.0))
    }

    /// Send data from this application out the wire.
    ///
    /// Returns `Ok(len)` consumed, `Ok(0)` when the peer's window or the
    /// output buffer doesn't permit a send yet.
    pub fn channel_send(
        &mut self,
        chan: &ChanHandle,
        dt: ChanData,
        buf: &[u8],
    ) -> Result<usize> {
        if self.closed {
            return error::ConnectionLost.fail();
        }

        if buf.is_empty() {
            return Ok(0);
        }

        if self.conn.channels.is_closed(chan.0) {
            return error::ChannelEOF.fail();
        }

        // Data packets can't be interleaved into a key exchange
        if !self.conn.kex_is_idle() {
            return Ok(0);
        }

        // Whole segments only, the window never goes negative.
        let space = self
            .traf_out
            .send_allowed(&self.keys)
            .saturating_sub(dt.packet_offset());
        let wanted = buf.len().min(space);
        if wanted == 0 {
            return Ok(0);
        }
        let seg = match self.conn.channels.send_segment(chan.0, wanted)? {
            Some(l) => l,
            None => return Ok(0),
        };

        let p = self.conn.channels.send_data(chan.0, dt, &buf[..seg])?;
        self.traf_out.send_packet(p, &mut self.keys)?;
        self.wake();
        Ok(seg)
    }

    /// Receive data coming from the wire into this application.
    ///
    /// Returns `Ok(len)` received, `Err(Error::ChannelEOF)` on EOF,
    /// or other errors. Ok(0) indicates no data available, ie pending.
    pub fn channel_input(
        &mut self,
        chan: &ChanHandle,
        dt: ChanData,
        buf: &mut [u8],
    ) -> Result<usize> {
        if self.closed {
            return error::ConnectionLost.fail();
        }

        // Reading would queue a window adjustment, deferred during KEX
        if !self.conn.kex_is_idle() {
            return Ok(0);
        }

        let (len, complete) = self.traf_in.channel_input(chan.0, dt, buf);
        if len == 0 && self.is_channel_eof(chan) {
            return error::ChannelEOF.fail();
        }
        if let Some(len) = complete {
            let wind_adjust = self.conn.channels.finished_input(chan.0, len)?;
            if let Some(wind_adjust) = wind_adjust {
                self.traf_out.send_packet(wind_adjust, &mut self.keys)?;
            }
            self.wake();
        }
        Ok(len)
    }

    /// Discards any channel input data pending for `chan`.
    pub fn discard_channel_input(&mut self, chan: &ChanHandle) -> Result<()> {
        let len = self.traf_in.discard_channel_input(chan.0);
        if len > 0 {
            let wind_adjust = self.conn.channels.finished_input(chan.0, len)?;
            if let Some(wind_adjust) = wind_adjust {
                self.traf_out.send_packet(wind_adjust, &mut self.keys)?;
            }
            self.wake();
        }
        Ok(())
    }

    /// Indicates when channel data is ready.
    ///
    /// When channel data is ready, returns `Some((channel, dt, len))`.
    /// `len` is the amount of data remaining to read, always non-zero.
    /// Returns `None` if no data is ready.
    pub fn ready_channel_input(&self) -> Option<(ChanNum, ChanData, usize)> {
        self.traf_in.ready_channel_input()
    }

    pub fn is_channel_eof(&self, chan: &ChanHandle) -> bool {
        self.conn.channels.have_recv_eof(chan.0) || self.closed
    }

    pub fn is_channel_closed(&self, chan: &ChanHandle) -> bool {
        self.conn.channels.is_closed(chan.0) || self.closed
    }

    /// Returns the maximum data that may currently be sent to a channel,
    /// zero when a send would block on the window or buffer space.
    pub fn ready_channel_send(&self, chan: &ChanHandle, dt: ChanData) -> Result<Option<usize>> {
        if self.closed {
            return Ok(None);
        }
        // minimum of buffer space and channel window available
        let payload_space = self.traf_out.send_allowed(&self.keys);
        let payload_space = payload_space.saturating_sub(dt.packet_offset());
        Ok(self
            .conn
            .channels
            .send_allowed(chan.0)
            .map(|s| s.min(payload_space)))
    }

    /// The server's exit report for a session channel, if received.
    pub fn channel_exit_status(&self, chan: &ChanHandle) -> Option<Exit> {
        self.conn.channels.exit_status(chan.0)
    }

    /// Requests closing a channel. The channel stays in the registry until
    /// the peer's close arrives and the handle is released with
    /// [`channel_done()`](Self::channel_done).
    pub fn channel_close(&mut self, chan: &ChanHandle) -> Result<()> {
        self.conn.channels.close(chan.0)?;
        let mut s = self.traf_out.sender(&mut self.keys);
        self.conn.flush_channels(&mut s)?;
        self.wake();
        Ok(())
    }

    /// Must be called when an application has finished with a channel.
    pub fn channel_done(&mut self, chan: ChanHandle) -> Result<()> {
        self.conn.channels.done(chan.0)
    }

    /// Send a terminal window size change report.
    pub fn term_window_change(
        &mut self,
        chan: &ChanHandle,
        winch: packets::WinChange,
    ) -> Result<()> {
        let mut s = self.traf_out.sender(&mut self.keys);
        self.conn.channels.term_window_change(chan.0, winch, &mut s)
    }

    /// Delivers a signal to the remote process.
    pub fn channel_signal(&mut self, chan: &ChanHandle, sig: &'static str) -> Result<()> {
        let mut s = self.traf_out.sender(&mut self.keys);
        self.conn.channels.signal(chan.0, sig, &mut s)
    }

    /// Sends a break request for a session with a pty, RFC4254 Section 8.
    pub fn channel_break(&mut self, chan: &ChanHandle, length_ms: u32) -> Result<()> {
        let mut s = self.traf_out.sender(&mut self.keys);
        self.conn.channels.send_break(chan.0, length_ms, &mut s)
    }

    /// `true` if the server refused a `want_reply` channel request, for
    /// example a shell or exec request.
    pub fn channel_req_failed(&self, chan: &ChanHandle) -> bool {
        self.conn.channels.req_failed(chan.0)
    }

    fn wake(&mut self) {
        if self.is_input_ready() {
            if let Some(w) = self.input_waker.take() {
                w.wake()
            }
        }

        if self.is_output_pending() {
            if let Some(w) = self.output_waker.take() {
                w.wake()
            }
        }
    }
}

/// Represents an open channel, owned by the application.
///
/// Must be released by calling [`Runner::channel_done()`]
pub struct ChanHandle(pub(crate) ChanNum);

impl ChanHandle {
    /// Returns the channel number
    ///
    /// This can be used by applications as an index. An index may be
    /// reused after a call to [`Runner::channel_done()`], applications
    /// must take care not to keep using this `num()` index after that.
    pub fn num(&self) -> ChanNum {
        self.0
    }
}

impl core::fmt::Debug for ChanHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ChanHandle({})", self.num())
    }
}
