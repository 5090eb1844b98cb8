//! Channel streams over a running client connection.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::*;
use async_client::ClientInner;
use channel::{ChanData, Exit};
use runner::ChanHandle;

/// A bidirectional stream over an open SSH channel.
///
/// Implements [`AsyncRead`] for the channel's normal data and
/// [`AsyncWrite`] for outbound data, so it can be used anywhere a socket
/// can, including as the underlying stream of a second [`SshClient`]
/// (a proxied connection). Reads and writes apply the channel's window
/// flow control; a write blocked on the peer's window suspends the caller
/// until a window adjustment arrives.
///
/// [`SshClient`]: crate::SshClient
pub struct ChanInOut {
    inner: Arc<ClientInner>,
    handle: Option<ChanHandle>,
}

impl core::fmt::Debug for ChanInOut {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChanInOut").field("handle", &self.handle).finish()
    }
}

fn io_err(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

impl ChanInOut {
    pub(crate) fn new(inner: Arc<ClientInner>, handle: ChanHandle) -> Self {
        ChanInOut { inner, handle: Some(handle) }
    }

    fn handle(&self) -> &ChanHandle {
        // set in new(), taken only by drop
        self.handle.as_ref().expect("channel handle")
    }

    /// The server's exit status or signal for a session channel, if
    /// reported yet.
    pub fn exit_status(&self) -> Option<Exit> {
        self.inner.lock_runner().channel_exit_status(self.handle())
    }

    /// Reports a terminal size change for a session with a pty.
    pub fn term_window_change(&self, winch: packets::WinChange) -> Result<()> {
        let r = self.inner.lock_runner().term_window_change(self.handle(), winch);
        self.inner.progress_notify.notify_one();
        r
    }

    /// Delivers a signal to the remote process.
    pub fn signal(&self, sig: &'static str) -> Result<()> {
        let r = self.inner.lock_runner().channel_signal(self.handle(), sig);
        self.inner.progress_notify.notify_one();
        r
    }

    /// Reads from the stderr extended-data stream of the channel.
    ///
    /// Returns `Ok(0)` on EOF.
    pub async fn read_stderr(&mut self, buf: &mut [u8]) -> Result<usize> {
        poll_fn(|cx| self.poll_read_dt(cx, ChanData::Stderr, buf)).await
    }

    fn poll_read_dt(
        &self,
        cx: &mut Context<'_>,
        dt: ChanData,
        buf: &mut [u8],
    ) -> Poll<Result<usize>> {
        // Register before checking: the run loop drains wakers after every
        // progress step, registering afterwards could miss a wakeup.
        self.register_read(cx);
        let mut runner = self.inner.lock_runner();
        match runner.channel_input(self.handle(), dt, buf) {
            Ok(0) => Poll::Pending,
            Ok(n) => {
                // reading may queue a window adjustment to flush
                self.inner.progress_notify.notify_one();
                Poll::Ready(Ok(n))
            }
            Err(Error::ChannelEOF) => Poll::Ready(Ok(0)),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn register_read(&self, cx: &mut Context<'_>) {
        self.inner
            .wakers
            .lock()
            .expect("wakers lock")
            .read
            .insert(self.handle().num(), cx.waker().clone());
    }

    fn register_write(&self, cx: &mut Context<'_>) {
        self.inner
            .wakers
            .lock()
            .expect("wakers lock")
            .write
            .insert(self.handle().num(), cx.waker().clone());
    }
}

impl AsyncRead for ChanInOut {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let b = buf.initialize_unfilled();
        match self.poll_read_dt(cx, ChanData::Normal, b) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(io_err(e))),
        }
    }
}

impl AsyncWrite for ChanInOut {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.register_write(cx);
        let mut runner = self.inner.lock_runner();
        match runner.channel_send(self.handle(), ChanData::Normal, buf) {
            // blocked on the peer's window or output buffer space
            Ok(0) => Poll::Pending,
            Ok(n) => {
                self.inner.progress_notify.notify_one();
                Poll::Ready(Ok(n))
            }
            Err(e) => Poll::Ready(Err(io_err(e))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // queued packets are written out by the client's run loop
        self.inner.progress_notify.notify_one();
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let r = self.inner.lock_runner().channel_close(self.handle());
        self.inner.progress_notify.notify_one();
        Poll::Ready(r.map_err(io_err))
    }
}

impl Drop for ChanInOut {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            let mut runner = self.inner.lock_runner();
            let _ = runner.channel_close(&h);
            let _ = runner.channel_done(h);
            drop(runner);
            self.inner.progress_notify.notify_one();
        }
    }
}
