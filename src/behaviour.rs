#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use snafu::prelude::*;

use crate::*;
use auth::AuthSigMsg;
use packets::{InfoPrompt, PubKey};
use sign::{AgentKey, OwnedSig};
use sshwire::TextString;

pub type BhResult<T> = core::result::Result<T, BhError>;

/// At present only a single failure type is implemented
#[derive(Debug, Snafu)]
pub enum BhError {
    Fail,
}

/// Application hooks for a client connection.
///
/// The connection calls these at suspension points: host key checks, auth
/// credential prompts, and informational events. Implementations may block
/// briefly; long prompts should be bridged to the application's own UI
/// machinery by the caller.
pub trait CliBehaviour: Send {
    /// The username to authenticate as.
    fn username(&mut self) -> BhResult<String>;

    /// Whether the host key is accepted for this connection.
    ///
    /// The application compares against its known-hosts store and prompts
    /// the user as needed; returning `false` fails the handshake with
    /// [`Error::HostKeyRejected`].
    fn valid_hostkey(&mut self, key: &PubKey) -> BhResult<bool>;

    /// Returns the next public key to try for `publickey` auth.
    ///
    /// Keys come from the agent's listing. `None` when the agent has no
    /// further keys; publickey auth is skipped entirely in that case.
    fn next_authkey(&mut self) -> BhResult<Option<AgentKey>> {
        Ok(None)
    }

    /// Asks the agent to sign `msg` with `key`.
    ///
    /// Only called after the server accepted the key probe.
    fn agent_sign(&mut self, _key: &AgentKey, _msg: &AuthSigMsg<'_>) -> BhResult<OwnedSig> {
        Err(BhError::Fail)
    }

    /// Returns a password for `password` auth.
    ///
    /// `Ok(None)` when no password callback is installed (the method is
    /// skipped). An empty string is treated as cancellation by the user.
    fn auth_password(&mut self) -> BhResult<Option<String>> {
        Ok(None)
    }

    /// Whether keyboard-interactive prompting is available.
    ///
    /// Implementations that provide
    /// [`auth_keyboard_interactive`](Self::auth_keyboard_interactive)
    /// return `true`.
    fn supports_keyboard_interactive(&self) -> bool {
        false
    }

    /// Collects responses for a keyboard-interactive info request.
    ///
    /// The returned list must have one entry per prompt; an empty list is
    /// treated as cancellation by the user.
    fn auth_keyboard_interactive(
        &mut self,
        _name: TextString,
        _instruction: TextString,
        _prompts: &[InfoPrompt],
    ) -> BhResult<Vec<String>> {
        Err(BhError::Fail)
    }

    /// Called on every `SSH_MSG_USERAUTH_BANNER`.
    fn show_banner(&mut self, banner: TextString, _lang: TextString) {
        if let Ok(b) = banner.as_str() {
            info!("Server banner: {b}");
        }
    }

    /// Called once on auth success.
    fn authenticated(&mut self) {}
}
