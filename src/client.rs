#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::*;
use behaviour::CliBehaviour;
use cliauth::CliAuth;
use packets::ParseContext;

/// Client-role state, presently just the auth machine.
pub(crate) struct Client {
    pub auth: CliAuth,
}

impl Client {
    pub fn new() -> Self {
        Client { auth: CliAuth::new() }
    }

    pub(crate) fn auth_success(
        &mut self,
        parse_ctx: &mut ParseContext,
        b: &mut dyn CliBehaviour,
    ) -> Result<()> {
        parse_ctx.cli_auth_type = None;
        self.auth.success(b)
    }

    pub(crate) fn banner(&mut self, banner: &packets::UserauthBanner<'_>, b: &mut dyn CliBehaviour) {
        b.show_banner(banner.message, banner.lang)
    }
}
