//! Named SSH algorithms, methods, and extensions.
//!
//! Packet numbers are listed in `packets.rs`.
//! This module also serves as an index of SSH specifications.

pub const SSH_PORT: u16 = 22;

/// [RFC8731](https://tools.ietf.org/html/rfc8731)
pub const SSH_NAME_CURVE25519: &str = "curve25519-sha256";
/// An older alias prior to standardisation. Eventually could be removed
pub const SSH_NAME_CURVE25519_LIBSSH: &str = "curve25519-sha256@libssh.org";
/// [RFC4253](https://tools.ietf.org/html/rfc4253)
pub const SSH_NAME_DH_GROUP14_SHA1: &str = "diffie-hellman-group14-sha1";

/// [RFC8709](https://tools.ietf.org/html/rfc8709)
pub const SSH_NAME_ED25519: &str = "ssh-ed25519";
/// [RFC8332](https://tools.ietf.org/html/rfc8332)
pub const SSH_NAME_RSA_SHA256: &str = "rsa-sha2-256";
/// [RFC4253](https://tools.ietf.org/html/rfc4253). SHA-1 signatures are
/// deprecated by OpenSSH but still the baseline key type name.
pub const SSH_NAME_RSA: &str = "ssh-rsa";

/// [RFC4344](https://tools.ietf.org/html/rfc4344)
pub const SSH_NAME_AES256_CTR: &str = "aes256-ctr";
pub const SSH_NAME_AES192_CTR: &str = "aes192-ctr";
pub const SSH_NAME_AES128_CTR: &str = "aes128-ctr";
/// [RFC4253](https://tools.ietf.org/html/rfc4253)
pub const SSH_NAME_AES256_CBC: &str = "aes256-cbc";
pub const SSH_NAME_AES192_CBC: &str = "aes192-cbc";
pub const SSH_NAME_AES128_CBC: &str = "aes128-cbc";
pub const SSH_NAME_3DES_CBC: &str = "3des-cbc";

/// [RFC6668](https://tools.ietf.org/html/rfc6668)
pub const SSH_NAME_HMAC_SHA256: &str = "hmac-sha2-256";
pub const SSH_NAME_HMAC_SHA512: &str = "hmac-sha2-512";
/// [RFC4253](https://tools.ietf.org/html/rfc4253)
pub const SSH_NAME_HMAC_SHA1: &str = "hmac-sha1";

/// [RFC4253](https://tools.ietf.org/html/rfc4253)
pub const SSH_NAME_NONE: &str = "none";
/// [RFC4253](https://tools.ietf.org/html/rfc4253) Section 6.2
pub const SSH_NAME_ZLIB: &str = "zlib";
/// OpenSSH delayed compression, activated after auth success.
/// [PROTOCOL](https://cvsweb.openbsd.org/src/usr.bin/ssh/PROTOCOL?annotate=HEAD)
pub const SSH_NAME_ZLIB_OPENSSH: &str = "zlib@openssh.com";

/// [RFC4252](https://tools.ietf.org/html/rfc4252)
pub const SSH_SERVICE_USERAUTH: &str = "ssh-userauth";
/// [RFC4254](https://tools.ietf.org/html/rfc4254)
pub const SSH_SERVICE_CONNECTION: &str = "ssh-connection";

/// [RFC4252](https://tools.ietf.org/html/rfc4252)
pub const SSH_AUTHMETHOD_PASSWORD: &str = "password";
/// [RFC4252](https://tools.ietf.org/html/rfc4252)
pub const SSH_AUTHMETHOD_PUBLICKEY: &str = "publickey";
/// [RFC4256](https://tools.ietf.org/html/rfc4256)
pub const SSH_AUTHMETHOD_INTERACTIVE: &str = "keyboard-interactive";

/// [RFC4254](https://tools.ietf.org/html/rfc4254)
pub const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Disconnect reason sent when this application closes,
/// [RFC4253](https://tools.ietf.org/html/rfc4253) Section 11.1
pub const SSH_DISCONNECT_BY_APPLICATION: u32 = 11;

/// [RFC4254](https://tools.ietf.org/html/rfc4254)
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy)]
pub enum ChanFail {
    SSH_OPEN_ADMINISTRATIVELY_PROHIBITED = 1,
    SSH_OPEN_CONNECT_FAILED = 2,
    SSH_OPEN_UNKNOWN_CHANNEL_TYPE = 3,
    SSH_OPEN_RESOURCE_SHORTAGE = 4,
}
