#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

/// Fills a buffer from the operating system RNG.
///
/// Used for KEX cookies, DH exponents and packet padding.
pub fn fill_random(buf: &mut [u8]) -> Result<(), Error> {
    getrandom::getrandom(buf).map_err(|_| Error::msg("RNG failed"))
}
