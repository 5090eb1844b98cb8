//! Tokio driver for the sans-io [`Runner`].
//!
//! A [`SshClient`] owns the runner behind a mutex; `run()` shuttles bytes
//! between the runner and any `AsyncRead + AsyncWrite` stream. Since a
//! [`ChanInOut`] is itself such a stream, a second client can run over a
//! channel of a first one, giving proxied connections with no extra
//! transport machinery.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Poll, Waker};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::*;
use async_channel::ChanInOut;
use behaviour::CliBehaviour;
use channel::{ChanNum, Pty};
use runner::{ChanHandle, Runner};

#[derive(Default)]
pub(crate) struct Wakers {
    pub open: Vec<Waker>,
    pub auth: Vec<Waker>,
    pub read: HashMap<ChanNum, Waker>,
    pub write: HashMap<ChanNum, Waker>,
}

pub(crate) struct ClientInner {
    pub runner: Mutex<Runner>,
    /// Pokes the `run()` loop after operations that queue output or
    /// consume buffered input.
    pub progress_notify: Notify,
    pub wakers: Mutex<Wakers>,
    /// The error that tore down the transport, kept for pending waiters.
    fatal: Mutex<Option<Error>>,
}

impl ClientInner {
    pub fn lock_runner(&self) -> MutexGuard<'_, Runner> {
        // A poisoned mutex means a panic mid-update, not recoverable
        self.runner.lock().expect("runner lock")
    }

    pub fn wake_all(&self) {
        let mut w = self.wakers.lock().expect("wakers lock");
        for waker in w.open.drain(..) {
            waker.wake()
        }
        for waker in w.auth.drain(..) {
            waker.wake()
        }
        for (_, waker) in w.read.drain() {
            waker.wake()
        }
        for (_, waker) in w.write.drain() {
            waker.wake()
        }
    }

    fn set_fatal(&self, e: &Error) {
        let mut f = self.fatal.lock().expect("fatal lock");
        if f.is_none() {
            *f = Some(duplicate_error(e));
        }
    }

    /// The terminal error for a pending waiter, if the transport failed.
    pub fn fatal_error(&self) -> Option<Error> {
        self.fatal.lock().expect("fatal lock").as_ref().map(duplicate_error)
    }
}

/// Makes an owned copy of a terminal error for delivery to multiple
/// waiters. Variants carrying non-cloneable sources degrade to
/// `ConnectionLost`.
fn duplicate_error(e: &Error) -> Error {
    match e {
        Error::NoAuthMethods => Error::NoAuthMethods,
        Error::AuthCancelled => Error::AuthCancelled,
        Error::HostKeyRejected => Error::HostKeyRejected,
        Error::NotSsh => Error::NotSsh,
        Error::SshProto => Error::SshProto,
        Error::BadMac => Error::BadMac,
        Error::BadCompress => Error::BadCompress,
        Error::BadSig => Error::BadSig,
        Error::NotAuthenticated => Error::NotAuthenticated,
        Error::ByApplication => Error::ByApplication,
        Error::KexFailed { reason } => Error::KexFailed { reason },
        Error::AlgoNoMatch { algo } => Error::AlgoNoMatch { algo },
        Error::DisconnectByHost { reason } => Error::DisconnectByHost { reason: *reason },
        Error::ChannelOpenFailed { reason } => Error::ChannelOpenFailed { reason: *reason },
        _ => Error::ConnectionLost,
    }
}

/// An asynchronous SSH client connection.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct SshClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl SshClient {
    /// Creates a client.
    ///
    /// `compression` requests zlib payload compression during negotiation.
    /// Nothing happens on the wire until [`run()`](Self::run) is started.
    pub fn new(compression: bool) -> Self {
        SshClient {
            inner: Arc::new(ClientInner {
                runner: Mutex::new(Runner::new_client(compression)),
                progress_notify: Notify::new(),
                wakers: Mutex::new(Wakers::default()),
                fatal: Mutex::new(None),
            }),
        }
    }

    /// Runs the connection over `stream` until it closes or fails.
    ///
    /// `stream` is typically a TCP socket, or a [`ChanInOut`] of another
    /// connection for a proxied setup. Other tasks interact with the
    /// connection through clones of this client while `run()` is live.
    pub async fn run<S>(&self, stream: S, b: &mut dyn CliBehaviour) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let r = self.run_inner(stream, b).await;
        if let Err(ref e) = r {
            debug!("Connection finished: {e}");
            self.inner.set_fatal(e);
        }
        self.inner.lock_runner().close();
        self.inner.wake_all();
        r
    }

    async fn run_inner<S>(&self, stream: S, b: &mut dyn CliBehaviour) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut rd, mut wr) = tokio::io::split(stream);
        let mut inbuf = vec![0u8; 8192];
        let mut outbuf = vec![0u8; 8192];
        let mut in_len = 0;
        let mut in_off = 0;
        let keepalive = Duration::from_secs(config::KEEPALIVE_INTERVAL_SECS);
        let mut last_io = Instant::now();

        loop {
            // Process as much as possible before sleeping
            while self.inner.lock_runner().progress(b)? {
                self.inner.wake_all();
            }
            self.inner.wake_all();

            // Feed buffered input
            if in_off < in_len {
                let mut runner = self.inner.lock_runner();
                if runner.is_input_ready() {
                    in_off += runner.input(&inbuf[in_off..in_len])?;
                    if in_off == in_len {
                        in_off = 0;
                        in_len = 0;
                    }
                    continue;
                }
            }

            // Drain output
            let n = self.inner.lock_runner().output(&mut outbuf)?;
            if n > 0 {
                wr.write_all(&outbuf[..n]).await?;
                last_io = Instant::now();
                continue;
            }
            {
                let mut runner = self.inner.lock_runner();
                if runner.is_disconnecting() {
                    // disconnect packet has drained
                    runner.close();
                    return Ok(());
                }
            }

            let want_input = in_len == 0 && self.inner.lock_runner().is_input_ready();

            tokio::select! {
                r = rd.read(&mut inbuf), if want_input => {
                    let n = r?;
                    if n == 0 {
                        return error::ConnectionLost.fail();
                    }
                    in_len = n;
                    in_off = 0;
                    last_io = Instant::now();
                }
                _ = self.inner.progress_notify.notified() => (),
                _ = tokio::time::sleep_until(last_io + keepalive) => {
                    self.inner.lock_runner().send_keepalive()?;
                    last_io = Instant::now();
                }
            }
        }
    }

    /// Resolves once user authentication has completed.
    pub async fn authenticated(&self) -> Result<()> {
        poll_fn(|cx| {
            // register first, wakers are drained on every progress step
            self.inner.wakers.lock().expect("wakers lock").auth.push(cx.waker().clone());
            let runner = self.inner.lock_runner();
            if runner.is_authed() {
                return Poll::Ready(Ok(()));
            }
            let closed = runner.is_closed();
            drop(runner);
            if let Some(e) = self.inner.fatal_error() {
                return Poll::Ready(Err(e));
            }
            if closed {
                return Poll::Ready(error::ConnectionLost.fail());
            }
            Poll::Pending
        })
        .await
    }

    /// Opens a session channel, requesting a shell or `exec` command.
    ///
    /// Waits for authentication and then the server's open confirmation.
    pub async fn open_session(
        &self,
        exec: Option<&str>,
        pty: Option<Pty>,
    ) -> Result<ChanInOut> {
        self.authenticated().await?;
        let handle = self
            .when_ready_to_open(|runner| runner.open_session(exec, pty.clone()))
            .await?;
        self.inner.progress_notify.notify_one();
        self.wait_channel_open(handle).await
    }

    /// Opens a `direct-tcpip` channel to `(host, port)`.
    ///
    /// `origin` names the connection source being forwarded.
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        origin: (&str, u16),
    ) -> Result<ChanInOut> {
        self.authenticated().await?;
        let handle = self
            .when_ready_to_open(|runner| runner.open_direct_tcpip(host, port, origin))
            .await?;
        self.inner.progress_notify.notify_one();
        self.wait_channel_open(handle).await
    }

    /// Runs `f` once no key exchange is in flight, holding the runner lock
    /// so the open can't race a starting rekey.
    async fn when_ready_to_open<F>(&self, mut f: F) -> Result<ChanHandle>
    where
        F: FnMut(&mut Runner) -> Result<ChanHandle>,
    {
        poll_fn(|cx| {
            // register first, wakers are drained on every progress step
            self.inner.wakers.lock().expect("wakers lock").open.push(cx.waker().clone());
            let mut runner = self.inner.lock_runner();
            if !runner.ready_to_open() {
                let closed = runner.is_closed();
                drop(runner);
                if let Some(e) = self.inner.fatal_error() {
                    return Poll::Ready(Err(e));
                }
                if closed {
                    return Poll::Ready(error::ConnectionLost.fail());
                }
                return Poll::Pending;
            }
            Poll::Ready(f(&mut runner))
        })
        .await
    }

    async fn wait_channel_open(&self, handle: ChanHandle) -> Result<ChanInOut> {
        let r = poll_fn(|cx| {
            // register first, wakers are drained on every progress step
            self.inner
                .wakers
                .lock()
                .expect("wakers lock")
                .open
                .push(cx.waker().clone());
            match self.inner.lock_runner().channel_ready(&handle) {
                Err(e) => Poll::Ready(Err(e)),
                Ok(true) => Poll::Ready(Ok(())),
                Ok(false) => {
                    if let Some(e) = self.inner.fatal_error() {
                        return Poll::Ready(Err(e));
                    }
                    Poll::Pending
                }
            }
        })
        .await;

        match r {
            Ok(()) => Ok(ChanInOut::new(self.inner.clone(), handle)),
            Err(e) => {
                // the registry entry can be released straight away
                let _ = self.inner.lock_runner().channel_done(handle);
                Err(e)
            }
        }
    }

    /// The session identifier, fixed at the first key exchange.
    pub fn session_id(&self) -> Option<SessId> {
        self.inner.lock_runner().session_id().cloned()
    }

    /// Digest of the public key that authenticated, for connection-reuse
    /// bookkeeping.
    pub fn auth_key_digest(&self) -> Option<[u8; 32]> {
        self.inner.lock_runner().auth_key_digest().copied()
    }

    /// Requests a clean disconnect. `run()` returns once the packet has
    /// been written out.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.lock_runner().disconnect()?;
        self.inner.progress_notify.notify_one();
        Ok(())
    }
}

/// Expands a netcat-style proxy command template.
///
/// `%r`, `%h` and `%p` are replaced with the user, host and port of the
/// target connection; `%%` is a literal percent.
pub fn expand_proxy_command(template: &str, user: &str, host: &str, port: u16) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut it = template.chars();
    while let Some(c) = it.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match it.next() {
            Some('r') => out.push_str(user),
            Some('h') => out.push_str(host),
            Some('p') => out.push_str(&port.to_string()),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_command_expansion() {
        assert_eq!(
            expand_proxy_command("nc -X connect %h %p", "alice", "example.com", 2222),
            "nc -X connect example.com 2222"
        );
        assert_eq!(
            expand_proxy_command("ssh %r@%h -W %h:%p", "bob", "inner", 22),
            "ssh bob@inner -W inner:22"
        );
        assert_eq!(expand_proxy_command("100%% done", "u", "h", 1), "100% done");
        assert_eq!(expand_proxy_command("trailing %", "u", "h", 1), "trailing %");
        assert_eq!(expand_proxy_command("%x stays", "u", "h", 1), "%x stays");
    }
}
