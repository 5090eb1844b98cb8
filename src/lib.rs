//! An asynchronous SSH-2 client library.
//!
//! The protocol core is sans-io: [`Runner`] consumes and produces byte
//! buffers and never touches a socket. [`SshClient`] adapts it to tokio
//! streams, including tunnelling a second connection through a channel of
//! a first one.

#![forbid(unsafe_code)]
// avoids headscratching
#![deny(unused_must_use)]

pub mod config;
pub mod packets;
pub mod sshnames;
pub mod sshwire;

mod behaviour;
pub mod error;
mod random;

mod auth;
mod channel;
mod cliauth;
mod client;
mod comp;
mod conn;
mod encrypt;
mod ident;
mod kex;
mod namelist;
mod sign;
mod traffic;

mod runner;

mod async_channel;
mod async_client;

mod skifflog;
#[cfg(test)]
mod test;

// Application API
pub use async_channel::ChanInOut;
pub use async_client::{expand_proxy_command, SshClient};
pub use behaviour::{BhError, BhResult, CliBehaviour};
pub use channel::{ChanData, ChanNum, Exit, ModePair, Pty};
pub use error::{Error, Result};
pub use kex::SessId;
pub use packets::{InfoPrompt, PubKey};
pub use runner::{ChanHandle, Runner};
pub use sign::{AgentKey, OwnedSig};
pub use sshwire::TextString;

pub use auth::AuthSigMsg;
