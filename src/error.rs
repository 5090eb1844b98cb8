use core::str::Utf8Error;
#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use core::fmt::Arguments;

use snafu::prelude::*;

use crate::channel::ChanNum;

/// The skiff error type.
#[non_exhaustive]
#[derive(Snafu, Debug)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum Error {
    /// Output buffer ran out of room
    NoRoom,

    /// Input buffer ran out
    RanOut,

    /// Not a UTF-8 string
    BadString,

    /// Not a valid SSH ASCII name
    BadName,

    /// Remote peer isn't speaking SSH-2
    NotSsh,

    /// Error in received SSH protocol. Will disconnect.
    SshProto,

    /// Key exchange failed
    ///
    /// Covers a bad exchange value and an incorrect host key signature.
    #[snafu(display("Key exchange failed: {reason}"))]
    KexFailed { reason: &'static str },

    #[snafu(display("No matching {algo} algorithm"))]
    AlgoNoMatch { algo: &'static str },

    /// The application rejected the server's host key
    HostKeyRejected,

    /// Packet integrity (MAC) failed, or decryption produced garbage
    BadMac,

    /// Payload (de)compression failed
    BadCompress,

    /// Signature is incorrect
    BadSig,

    /// Received a key with invalid structure, or too large
    BadKey,

    /// All permitted authentication methods have been tried
    NoAuthMethods,

    /// The application cancelled an authentication prompt
    AuthCancelled,

    /// Attempted an operation requiring an authenticated connection
    NotAuthenticated,

    /// The transport was torn down while the operation was pending
    ConnectionLost,

    /// The peer sent SSH_MSG_DISCONNECT
    #[snafu(display("Disconnected by host, reason code {reason}"))]
    DisconnectByHost { reason: u32 },

    /// The server refused a channel open request
    #[snafu(display("Channel open failed, reason code {reason}"))]
    ChannelOpenFailed { reason: u32 },

    /// Closed by this application
    ByApplication,

    /// Ran out of channel numbers
    NoChannels,

    #[snafu(display("Bad channel number {num}"))]
    BadChannel { num: ChanNum },

    /// Channel EOF
    ///
    /// An expected error when an SSH channel completes. Any further calls in
    /// the same direction will fail similarly.
    ChannelEOF,

    /// SSH packet contents doesn't match length
    WrongPacketLength,

    #[snafu(display("Packet size {size} too large (or bad decrypt)"))]
    BigPacket { size: usize },

    /// Received packet at a disallowed time.
    PacketWrong,

    #[snafu(display("Unknown packet type {number}"))]
    UnknownPacket { number: u8 },

    /// An unknown SSH name was provided, for a key type, signature type,
    /// channel name etc.
    #[snafu(display("Unknown {kind} method"))]
    UnknownMethod { kind: &'static str },

    /// Failure from the application callback
    #[snafu(display("Failure from application: {msg}"))]
    BehaviourError { msg: &'static str },

    #[snafu(display("{msg}"))]
    Custom { msg: &'static str },

    /// IO error from the next layer
    IoError { source: std::io::Error },

    // This state should not be reached, previous logic should have prevented
    // it. Create this using [`Error::bug()`] or [`.trap()`](TrapBug::trap).
    /// Program bug
    Bug,
}

impl Error {
    pub fn msg(m: &'static str) -> Error {
        Error::Custom { msg: m }
    }

    #[cold]
    #[track_caller]
    /// Panics in debug builds, returns [`Error::Bug`] in release.
    pub fn bug() -> Error {
        // Easier to track the source of errors in development,
        // but release builds shouldn't panic.
        if cfg!(debug_assertions) {
            panic!("Hit a bug");
        } else {
            Error::Bug
        }
    }

    /// Like [`bug()`](Error::bug) but with a message
    ///
    /// The message can be used instead of a code comment, is logged at
    /// `debug` level.
    #[cold]
    pub fn bug_fmt(args: Arguments) -> Error {
        if cfg!(debug_assertions) {
            panic!("Hit a bug: {args}");
        } else {
            trace!("Hit a bug: {args}");
            Error::Bug
        }
    }

    #[cold]
    pub fn bug_msg<T>(msg: &str) -> Result<T, Error> {
        Err(Self::bug_fmt(format_args!("{}", msg)))
    }

    #[cold]
    pub fn bug_err_msg(msg: &str) -> Error {
        Self::bug_fmt(format_args!("{}", msg))
    }

    /// `true` for errors that are fatal to the whole transport.
    ///
    /// Channel-scoped failures return `false`; the transport continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ChannelOpenFailed { .. }
                | Error::ChannelEOF
                | Error::BadChannel { .. }
        )
    }
}

/// A skiff-specific Result type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub trait TrapBug<T> {
    /// `.trap()` should be used like `.unwrap()`, in situations
    /// never expected to fail. Instead it calls [`Error::bug()`].
    /// (or debug builds may panic)
    fn trap(self) -> Result<T, Error>;

    /// Like `trap()` but with a message, calls [`Error::bug_msg()`]
    /// The message can be used instead of a comment.
    fn trap_msg(self, args: Arguments) -> Result<T, Error>;
}

impl<T, E> TrapBug<T> for Result<T, E> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        // call directly so that Location::caller() works
        if let Ok(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }
    fn trap_msg(self, args: Arguments) -> Result<T, Error> {
        if let Ok(i) = self {
            Ok(i)
        } else {
            Err(Error::bug_fmt(args))
        }
    }
}

impl<T> TrapBug<T> for Option<T> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        // call directly so that Location::caller() works
        if let Some(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }
    fn trap_msg(self, args: Arguments) -> Result<T, Error> {
        if let Some(i) = self {
            Ok(i)
        } else {
            Err(Error::bug_fmt(args))
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(_e: Utf8Error) -> Error {
        Error::BadString
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::IoError { source: value }
    }
}
