//! Binary packet buffering between the crypto engine and the socket.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result},
    log::{debug, error, info, log, trace, warn},
};

use crate::channel::{ChanData, ChanNum};
use crate::encrypt::{KeyState, SSH_PAYLOAD_START};
use crate::ident::RemoteVersion;
use crate::packets::Packet;
use crate::*;

/// Largest on-wire packet accepted or produced, inclusive of framing and
/// MAC.
const MAX_WIRE_PACKET: usize =
    SSH_PAYLOAD_START + config::MAX_PACKET_PAYLOAD + config::PACKET_SLACK + 64;

/// Outbound buffering beyond this makes `send_allowed()` report no space,
/// applying backpressure to channel data. Control packets are not blocked.
const TX_SOFT_LIMIT: usize = 4 * MAX_WIRE_PACKET;

pub(crate) struct TrafIn {
    /// Accumulated input buffer, sized for the largest allowed packet.
    /// Contains ciphertext or cleartext, decrypted in-place.
    /// Only contains a single SSH packet at a time.
    buf: Vec<u8>,
    state: RxState,
}

#[derive(Debug)]
enum RxState {
    /// Awaiting read, buffer is unused
    Idle,
    /// Reading initial encrypted block for packet length. idx > 0.
    ReadInitial { idx: usize },
    /// Reading remainder of encrypted packet
    Read { idx: usize, expect: usize },
    /// Whole encrypted packet has been read
    ReadComplete { len: usize },
    /// Decrypted complete input payload
    InPayload { len: usize, seq: u32 },
    /// Decrypted incoming channel data
    InChannelData {
        /// channel number
        chan: ChanNum,
        /// normal or stderr
        dt: ChanData,
        /// read index of channel data. Transitions to Idle once `idx==len`
        idx: usize,
        /// end of channel data in the buffer
        len: usize,
    },
}

impl TrafIn {
    pub fn new() -> Self {
        Self { buf: vec![0; MAX_WIRE_PACKET], state: RxState::Idle }
    }

    pub fn ready_input(&self) -> bool {
        match self.state {
            RxState::Idle | RxState::ReadInitial { .. } | RxState::Read { .. } => true,
            RxState::ReadComplete { .. }
            | RxState::InPayload { .. }
            | RxState::InChannelData { .. } => false,
        }
    }

    /// Returns the number of bytes consumed.
    pub fn input(
        &mut self,
        keys: &mut KeyState,
        remote_version: &mut RemoteVersion,
        buf: &[u8],
    ) -> Result<usize, Error> {
        let mut inlen = 0;
        debug_assert!(self.ready_input());
        if remote_version.version().is_none() && matches!(self.state, RxState::Idle) {
            // Handle initial version string
            inlen += remote_version.consume(buf)?;
        }
        let buf = &buf[inlen..];

        inlen += self.fill_input(keys, buf)?;
        trace!("after inlen {inlen} state {:?}", self.state);
        Ok(inlen)
    }

    /// Called when `payload()` is complete.
    pub(crate) fn done_payload(&mut self) {
        if let RxState::InPayload { .. } = self.state {
            self.state = RxState::Idle;
        }
    }

    /// Returns a reference to the decrypted payload buffer if ready,
    /// and the `seq` of that packet.
    pub(crate) fn payload(&self) -> Option<(&[u8], u32)> {
        match self.state {
            RxState::InPayload { len, seq } => {
                let payload = &self.buf[SSH_PAYLOAD_START..SSH_PAYLOAD_START + len];
                Some((payload, seq))
            }
            _ => None,
        }
    }

    fn fill_input(&mut self, keys: &mut KeyState, buf: &[u8]) -> Result<usize, Error> {
        let size_block = keys.size_block_dec();
        // 'r' is the remaining input, a slice that moves along.
        // Used to calculate the size to return
        let mut r = buf;

        // Fill the initial block from either Idle with input,
        // or a partial initial block
        if let Some(idx) = match self.state {
            RxState::Idle if !r.is_empty() => Some(0),
            RxState::ReadInitial { idx } => Some(idx),
            _ => None,
        } {
            let need = (size_block - idx).clamp(0, r.len());
            let x;
            (x, r) = r.split_at(need);
            let w = &mut self.buf[idx..idx + need];
            w.copy_from_slice(x);
            self.state = RxState::ReadInitial { idx: idx + need }
        }

        // Have enough input now to decrypt the packet length
        if let RxState::ReadInitial { idx } = self.state {
            if idx >= size_block {
                let w = &mut self.buf[..size_block];
                let total_len = keys.decrypt_first_block(w)? as usize;
                if total_len > self.buf.len() {
                    // Packets over the cap fail hard, resynchronising the
                    // stream isn't possible.
                    return Err(Error::BigPacket { size: total_len });
                }
                self.state = RxState::Read { idx, expect: total_len }
            }
        }

        // Know expected length, read until the end of the packet.
        // We have already validated that expect <= buf size.
        if let RxState::Read { ref mut idx, expect } = self.state {
            let need = (expect - *idx).min(r.len());
            let x;
            (x, r) = r.split_at(need);
            let w = &mut self.buf[*idx..*idx + need];
            w.copy_from_slice(x);
            *idx += need;
            if *idx == expect {
                self.state = RxState::ReadComplete { len: expect }
            }
        }

        if let RxState::ReadComplete { len } = self.state {
            let w = &mut self.buf[..len];
            let seq = keys.recv_seq();
            let mut payload_len = keys.decrypt(w)?;

            // decompression follows MAC verification
            if let Some(d) =
                keys.decompress(&self.buf[SSH_PAYLOAD_START..SSH_PAYLOAD_START + payload_len])?
            {
                self.buf[SSH_PAYLOAD_START..SSH_PAYLOAD_START + d.len()]
                    .copy_from_slice(&d);
                payload_len = d.len();
            }

            self.state = RxState::InPayload { len: payload_len, seq }
        }

        Ok(buf.len() - r.len())
    }

    /// Returns `(channel, dt, length)` of ready channel data
    pub fn ready_channel_input(&self) -> Option<(ChanNum, ChanData, usize)> {
        match self.state {
            RxState::InChannelData { chan, dt, idx, len } => {
                let rem = len - idx;
                debug_assert!(rem > 0);
                Some((chan, dt, rem))
            }
            _ => None,
        }
    }

    /// Marks the current payload as pending channel data to be read out
    /// with `channel_input()`.
    pub fn set_channel_input(&mut self, di: channel::DataIn) -> Result<()> {
        trace!("traf chan input state {:?}", self.state);
        match self.state {
            RxState::InPayload { .. } => {
                let idx = SSH_PAYLOAD_START + di.offset;
                self.state = RxState::InChannelData {
                    chan: di.num,
                    dt: di.dt,
                    idx,
                    len: idx + di.len,
                };
                Ok(())
            }
            _ => Err(Error::bug()),
        }
    }

    // Returns the length consumed, and Some(total) when the whole
    // data packet has been read out, or None if some is still pending.
    pub fn channel_input(
        &mut self,
        chan: ChanNum,
        dt: ChanData,
        buf: &mut [u8],
    ) -> (usize, Option<usize>) {
        match self.state {
            RxState::InChannelData { chan: c, dt: e, ref mut idx, len }
                if (c, e) == (chan, dt) =>
            {
                debug_assert!(len >= *idx);
                let wlen = (len - *idx).min(buf.len());
                buf[..wlen].copy_from_slice(&self.buf[*idx..*idx + wlen]);
                *idx += wlen;

                if *idx == len {
                    // all done
                    self.state = RxState::Idle;
                    (wlen, Some(len))
                } else {
                    (wlen, None)
                }
            }
            _ => (0, None),
        }
    }

    /// Returns the length of data discarded
    pub fn discard_channel_input(&mut self, chan: ChanNum) -> usize {
        match self.state {
            RxState::InChannelData { chan: c, len, idx, .. } if c == chan => {
                self.state = RxState::Idle;
                len - idx
            }
            _ => 0,
        }
    }
}

pub(crate) struct TrafOut {
    /// Pending output, encrypted in-place as packets are queued.
    /// May contain multiple SSH packets awaiting write-out.
    buf: Vec<u8>,
    /// Write-out cursor into `buf`
    idx: usize,
}

impl TrafOut {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(MAX_WIRE_PACKET), idx: 0 }
    }

    /// Serializes and encrypts a packet to send
    pub(crate) fn send_packet(&mut self, p: Packet, keys: &mut KeyState) -> Result<()> {
        trace!("send_packet {:?}", p.message_num());

        // Sanity check
        match p.category() {
            packets::Category::All | packets::Category::Kex => (), // OK cleartext
            _ => {
                if keys.is_cleartext() {
                    return Error::bug_msg("send cleartext");
                }
            }
        }

        // Use the tail of the buffer for the new packet. Payload starts
        // after the length and padding bytes which get filled by encrypt()
        let start = self.buf.len();
        self.buf.resize(start + MAX_WIRE_PACKET, 0);
        let wbuf = &mut self.buf[start..];
        let mut plen = sshwire::write_ssh(&mut wbuf[SSH_PAYLOAD_START..], &p)?;
        trace!("Sending {p:?}");

        if keys.compress_enabled() {
            let c =
                keys.compress(&self.buf[start + SSH_PAYLOAD_START..start + SSH_PAYLOAD_START + plen])?;
            let wbuf = &mut self.buf[start + SSH_PAYLOAD_START..];
            if c.len() > wbuf.len() {
                return Err(Error::NoRoom);
            }
            wbuf[..c.len()].copy_from_slice(&c);
            plen = c.len();
        }

        // Encrypt in place
        let elen = keys.encrypt(plen, &mut self.buf[start..])?;
        self.buf.truncate(start + elen);
        Ok(())
    }

    pub fn output_pending(&self) -> bool {
        self.idx < self.buf.len()
    }

    /// Returns payload space available for queueing a data packet.
    /// Control packets are sent regardless, this bound applies
    /// backpressure to channel data.
    pub fn send_allowed(&self, keys: &KeyState) -> usize {
        keys.max_enc_payload(TX_SOFT_LIMIT.saturating_sub(self.buf.len() - self.idx))
    }

    pub fn send_version(&mut self) -> Result<(), Error> {
        if !self.buf.is_empty() {
            return Err(Error::bug());
        }

        let mut v = [0u8; 256];
        let l = ident::write_version(&mut v)?;
        self.buf.extend_from_slice(&v[..l]);
        Ok(())
    }

    /// Write any pending output, returning the size written
    pub fn output(&mut self, buf: &mut [u8]) -> usize {
        let pending = self.buf.len() - self.idx;
        let wlen = pending.min(buf.len());
        buf[..wlen].copy_from_slice(&self.buf[self.idx..self.idx + wlen]);
        self.idx += wlen;

        if self.idx == self.buf.len() {
            // all written, recycle the buffer
            self.buf.clear();
            self.idx = 0;
        }
        wlen
    }

    pub fn sender<'s>(&'s mut self, keys: &'s mut KeyState) -> TrafSend<'s> {
        TrafSend::new(self, keys)
    }
}

/// Convenience to pass TrafOut with keys
pub(crate) struct TrafSend<'s> {
    out: &'s mut TrafOut,
    keys: &'s mut KeyState,
}

impl<'s> TrafSend<'s> {
    fn new(out: &'s mut TrafOut, keys: &'s mut KeyState) -> Self {
        Self { out, keys }
    }

    pub fn send<'p, P: Into<packets::Packet<'p>>>(&mut self, p: P) -> Result<()> {
        self.out.send_packet(p.into(), self.keys)
    }

    pub fn rekey(&mut self, keys: encrypt::Keys, authenticated: bool) {
        self.keys.rekey(keys, authenticated)
    }

    /// Starts delayed compression on auth success.
    pub fn auth_success(&mut self) {
        self.keys.auth_success()
    }

    pub fn send_version(&mut self) -> Result<(), Error> {
        self.out.send_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::ParseContext;
    use crate::skifflog::init_test_log;
    use crate::sshwire::packet_from_bytes;

    fn cleartext_packet(p: &Packet) -> Vec<u8> {
        let mut t = TrafOut::new();
        let mut keys = KeyState::new_cleartext();
        t.send_packet(reparse(p), &mut keys).unwrap();
        let mut buf = vec![0u8; MAX_WIRE_PACKET];
        let l = t.output(&mut buf);
        buf.truncate(l);
        buf
    }

    // lifetime dance for tests
    fn reparse(p: &Packet) -> Packet<'static> {
        let v = crate::sshwire::write_ssh_vec(p).unwrap().leak();
        packet_from_bytes(v, &ParseContext::new()).unwrap()
    }

    #[test]
    fn byte_at_a_time_input() {
        init_test_log();
        let p = Packet::DebugPacket(packets::DebugPacket {
            always_display: false,
            message: "drip fed".into(),
            lang: "".into(),
        });
        let wire = cleartext_packet(&p);

        let mut tin = TrafIn::new();
        let mut keys = KeyState::new_cleartext();
        let mut rv = RemoteVersion::new();
        rv.consume(b"SSH-2.0-x\r\n").unwrap();

        // a block one byte short of complete stays buffered
        for (i, b) in wire.iter().enumerate() {
            assert!(tin.payload().is_none(), "not complete before byte {i}");
            let used = tin.input(&mut keys, &mut rv, &[*b]).unwrap();
            assert_eq!(used, 1);
        }
        // the completing byte yields the packet
        let (payload, seq) = tin.payload().unwrap();
        assert_eq!(seq, 0);
        assert_eq!(payload[0], packets::MessageNumber::SSH_MSG_DEBUG as u8);
        tin.done_payload();
        assert!(tin.ready_input());
    }

    #[test]
    fn version_line_then_packet() {
        init_test_log();
        let p = Packet::NewKeys(packets::NewKeys {});
        let wire = cleartext_packet(&p);
        let mut input = b"SSH-2.0-OpenSSH_8.9\r\n".to_vec();
        input.extend_from_slice(&wire);

        let mut tin = TrafIn::new();
        let mut keys = KeyState::new_cleartext();
        let mut rv = RemoteVersion::new();

        let mut consumed = 0;
        while consumed < input.len() && tin.payload().is_none() {
            consumed += tin.input(&mut keys, &mut rv, &input[consumed..]).unwrap();
        }
        assert_eq!(rv.version().unwrap(), b"SSH-2.0-OpenSSH_8.9");
        let (payload, _) = tin.payload().unwrap();
        assert_eq!(payload[0], packets::MessageNumber::SSH_MSG_NEWKEYS as u8);
    }

    #[test]
    fn oversize_packet_rejected() {
        init_test_log();
        let mut tin = TrafIn::new();
        let mut keys = KeyState::new_cleartext();
        let mut rv = RemoteVersion::new();
        rv.consume(b"SSH-2.0-x\r\n").unwrap();

        // an impossible length in the first block
        let mut first = [0u8; 16];
        first[..4].copy_from_slice(&(10 * 1024 * 1024u32).to_be_bytes());
        let e = tin.input(&mut keys, &mut rv, &first).unwrap_err();
        assert!(matches!(e, Error::BigPacket { .. }));
    }

    #[test]
    fn multiple_queued_packets_write_out() {
        init_test_log();
        let mut t = TrafOut::new();
        let mut keys = KeyState::new_cleartext();
        for _ in 0..3 {
            t.send_packet(
                Packet::Ignore(packets::Ignore { data: sshwire::BinString(b"x") }),
                &mut keys,
            )
            .unwrap();
        }
        assert!(t.output_pending());

        // drain in small chunks
        let mut total = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let l = t.output(&mut buf);
            if l == 0 {
                break;
            }
            total.extend_from_slice(&buf[..l]);
        }
        assert!(!t.output_pending());

        // three packets present
        let mut rest = &total[..];
        let mut count = 0;
        while !rest.is_empty() {
            let plen = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
            rest = &rest[4 + plen..];
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
