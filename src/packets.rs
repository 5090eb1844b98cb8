//! SSH protocol packets.
//!
//! A [`Packet`] can be encoded/decoded to the
//! SSH Binary Packet Protocol using [`sshwire`].
//! SSH packet format is described in [RFC4253](https://tools.ietf.org/html/rfc4253) SSH Transport

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use pretty_hex::PrettyHex;

use crate::*;
use namelist::NameList;
use sshnames::*;
use sshwire::{BinString, Blob, TextString};
use sshwire::{SSHDecode, SSHEncode, SSHSink, SSHSource, WireError, WireResult};

// Plain structs encode/decode as their fields in order. Enums need special
// handling to select a variant when deserializing, those are written out
// by hand below.
macro_rules! sshwire_struct {
    ($name:ident<$a:lifetime> { $($field:ident),* $(,)? }) => {
        impl<$a> SSHEncode for $name<$a> {
            fn enc<S>(&self, s: &mut S) -> WireResult<()>
            where S: SSHSink {
                $( self.$field.enc(s)?; )*
                Ok(())
            }
        }
        impl<'de: $a, $a> SSHDecode<'de> for $name<$a> {
            fn dec<S>(s: &mut S) -> WireResult<Self>
            where S: SSHSource<'de> {
                $( let $field = SSHDecode::dec(s)?; )*
                Ok(Self { $($field),* })
            }
        }
    };
    ($name:ident { $($field:ident),* $(,)? }) => {
        impl SSHEncode for $name {
            fn enc<S>(&self, s: &mut S) -> WireResult<()>
            where S: SSHSink {
                $( self.$field.enc(s)?; )*
                Ok(())
            }
        }
        impl<'de> SSHDecode<'de> for $name {
            fn dec<S>(s: &mut S) -> WireResult<Self>
            where S: SSHSource<'de> {
                $( let $field = SSHDecode::dec(s)?; )*
                Ok(Self { $($field),* })
            }
        }
    };
}

#[derive(Debug)]
pub struct KexInit<'a> {
    pub cookie: [u8; 16],
    pub kex: NameList<'a>,
    /// A list of signature algorithms
    ///
    /// RFC4253 refers to this as the host key algorithms, but actually they
    /// are signature algorithms.
    pub hostsig: NameList<'a>,
    pub cipher_c2s: NameList<'a>,
    pub cipher_s2c: NameList<'a>,
    pub mac_c2s: NameList<'a>,
    pub mac_s2c: NameList<'a>,
    pub comp_c2s: NameList<'a>,
    pub comp_s2c: NameList<'a>,
    pub lang_c2s: NameList<'a>,
    pub lang_s2c: NameList<'a>,
    pub first_follows: bool,
    pub reserved: u32,
}
sshwire_struct!(KexInit<'a> {
    cookie, kex, hostsig, cipher_c2s, cipher_s2c, mac_c2s, mac_s2c,
    comp_c2s, comp_s2c, lang_c2s, lang_s2c, first_follows, reserved,
});

#[derive(Debug)]
pub struct NewKeys {}
sshwire_struct!(NewKeys {});

/// `SSH_MSG_IGNORE`, also used for keep-alive probes.
#[derive(Debug)]
pub struct Ignore<'a> {
    pub data: BinString<'a>,
}
sshwire_struct!(Ignore<'a> { data });

/// Named to avoid clashing with [`fmt::Debug`]
#[derive(Debug)]
pub struct DebugPacket<'a> {
    pub always_display: bool,
    pub message: TextString<'a>,
    pub lang: TextString<'a>,
}
sshwire_struct!(DebugPacket<'a> { always_display, message, lang });

#[derive(Debug)]
pub struct Disconnect<'a> {
    pub reason: u32,
    pub desc: TextString<'a>,
    pub lang: TextString<'a>,
}
sshwire_struct!(Disconnect<'a> { reason, desc, lang });

#[derive(Debug)]
pub struct Unimplemented {
    pub seq: u32,
}
sshwire_struct!(Unimplemented { seq });

/// Carries `e` for group methods, `Q_C` for curve25519.
///
/// Both encodings are a `u32` length prefix followed by bytes; the mpint
/// canonicalisation for group methods is applied by [`kex`](crate::kex)
/// before the value reaches here.
#[derive(Debug)]
pub struct KexDHInit<'a> {
    pub q_c: BinString<'a>,
}
sshwire_struct!(KexDHInit<'a> { q_c });

#[derive(Debug)]
pub struct KexDHReply<'a> {
    pub k_s: Blob<PubKey<'a>>,
    pub q_s: BinString<'a>,
    pub sig: Blob<Signature<'a>>,
}
sshwire_struct!(KexDHReply<'a> { k_s, q_s, sig });

#[derive(Debug)]
pub struct ServiceRequest<'a> {
    pub name: &'a str,
}
sshwire_struct!(ServiceRequest<'a> { name });

#[derive(Debug)]
pub struct ServiceAccept<'a> {
    pub name: &'a str,
}
sshwire_struct!(ServiceAccept<'a> { name });

#[derive(Debug)]
pub struct UserauthRequest<'a> {
    pub username: TextString<'a>,
    pub service: &'a str,
    pub method: AuthMethod<'a>,
}

impl SSHEncode for UserauthRequest<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.username.enc(s)?;
        self.service.enc(s)?;
        self.method.variant_name()?.enc(s)?;
        self.method.enc_payload(s)
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for UserauthRequest<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let username = SSHDecode::dec(s)?;
        let service = SSHDecode::dec(s)?;
        let variant: BinString = SSHDecode::dec(s)?;
        let method = AuthMethod::dec_payload(s, variant.0)?;
        Ok(Self { username, service, method })
    }
}

/// The method-specific part of a [`UserauthRequest`].
#[derive(Debug)]
pub enum AuthMethod<'a> {
    Password(MethodPassword<'a>),
    PubKey(MethodPubKey<'a>),
    KeyboardInteractive(MethodKeyboardInteractive<'a>),
    None,
    Unknown(Unknown<'a>),
}

impl<'a> AuthMethod<'a> {
    pub fn variant_name(&self) -> WireResult<&'static str> {
        match self {
            Self::Password(_) => Ok(SSH_AUTHMETHOD_PASSWORD),
            Self::PubKey(_) => Ok(SSH_AUTHMETHOD_PUBLICKEY),
            Self::KeyboardInteractive(_) => Ok(SSH_AUTHMETHOD_INTERACTIVE),
            Self::None => Ok(SSH_NAME_NONE),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }

    fn enc_payload<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        match self {
            Self::Password(p) => p.enc(s),
            Self::PubKey(p) => p.enc(s),
            Self::KeyboardInteractive(p) => p.enc(s),
            Self::None => Ok(()),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }

    fn dec_payload<'de: 'a, S: SSHSource<'de>>(
        s: &mut S,
        variant: &'a [u8],
    ) -> WireResult<Self> {
        match variant {
            x if x == SSH_AUTHMETHOD_PASSWORD.as_bytes() => {
                Ok(Self::Password(SSHDecode::dec(s)?))
            }
            x if x == SSH_AUTHMETHOD_PUBLICKEY.as_bytes() => {
                Ok(Self::PubKey(SSHDecode::dec(s)?))
            }
            x if x == SSH_AUTHMETHOD_INTERACTIVE.as_bytes() => {
                Ok(Self::KeyboardInteractive(SSHDecode::dec(s)?))
            }
            x if x == SSH_NAME_NONE.as_bytes() => Ok(Self::None),
            _ => {
                s.ctx().seen_unknown = true;
                Ok(Self::Unknown(Unknown(variant)))
            }
        }
    }
}

impl<'a> TryFrom<PubKey<'a>> for AuthMethod<'a> {
    type Error = Error;
    fn try_from(pubkey: PubKey<'a>) -> Result<Self> {
        let sig_algo = Signature::sig_name_for_pubkey(&pubkey)?;
        Ok(AuthMethod::PubKey(MethodPubKey {
            sig_algo,
            pubkey: Blob(pubkey),
            sig: None,
        }))
    }
}

/// One of the packets that shares message number 60.
///
/// The parse decision comes from [`ParseContext::cli_auth_type`], set when
/// the corresponding auth request was sent.
#[derive(Debug)]
pub enum Userauth60<'a> {
    PkOk(UserauthPkOk<'a>),
    PwChangeReq(UserauthPwChangeReq<'a>),
    InfoRequest(UserauthInfoRequest<'a>),
}

impl SSHEncode for Userauth60<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        match self {
            Self::PkOk(p) => p.enc(s),
            Self::PwChangeReq(p) => p.enc(s),
            Self::InfoRequest(p) => p.enc(s),
        }
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for Userauth60<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        match s.ctx().cli_auth_type {
            Some(auth::AuthType::Password) => Ok(Self::PwChangeReq(SSHDecode::dec(s)?)),
            Some(auth::AuthType::PubKey) => Ok(Self::PkOk(SSHDecode::dec(s)?)),
            Some(auth::AuthType::KeyboardInteractive) => {
                Ok(Self::InfoRequest(SSHDecode::dec(s)?))
            }
            _ => {
                trace!("Wrong packet state for userauth60");
                Err(WireError::PacketWrong)
            }
        }
    }
}

#[derive(Debug)]
pub struct UserauthPkOk<'a> {
    pub algo: &'a str,
    pub key: Blob<PubKey<'a>>,
}
sshwire_struct!(UserauthPkOk<'a> { algo, key });

#[derive(Debug)]
pub struct UserauthPwChangeReq<'a> {
    pub prompt: TextString<'a>,
    pub lang: TextString<'a>,
}
sshwire_struct!(UserauthPwChangeReq<'a> { prompt, lang });

/// `SSH_MSG_USERAUTH_INFO_REQUEST`, RFC4256 keyboard-interactive.
#[derive(Debug)]
pub struct UserauthInfoRequest<'a> {
    pub name: TextString<'a>,
    pub instruction: TextString<'a>,
    pub lang: TextString<'a>,
    pub prompts: Vec<InfoPrompt<'a>>,
}

#[derive(Debug)]
pub struct InfoPrompt<'a> {
    pub prompt: TextString<'a>,
    pub echo: bool,
}
sshwire_struct!(InfoPrompt<'a> { prompt, echo });

impl SSHEncode for UserauthInfoRequest<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.name.enc(s)?;
        self.instruction.enc(s)?;
        self.lang.enc(s)?;
        (self.prompts.len() as u32).enc(s)?;
        for p in &self.prompts {
            p.enc(s)?;
        }
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for UserauthInfoRequest<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let name = SSHDecode::dec(s)?;
        let instruction = SSHDecode::dec(s)?;
        let lang = SSHDecode::dec(s)?;
        let num: u32 = SSHDecode::dec(s)?;
        let mut prompts = Vec::new();
        for _ in 0..num {
            prompts.push(SSHDecode::dec(s)?);
        }
        Ok(Self { name, instruction, lang, prompts })
    }
}

/// `SSH_MSG_USERAUTH_INFO_RESPONSE`, RFC4256.
///
/// The response count must equal the prompt count of the request.
#[derive(Debug)]
pub struct UserauthInfoResponse<'a> {
    pub responses: Vec<TextString<'a>>,
}

impl SSHEncode for UserauthInfoResponse<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        (self.responses.len() as u32).enc(s)?;
        for r in &self.responses {
            r.enc(s)?;
        }
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for UserauthInfoResponse<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let num: u32 = SSHDecode::dec(s)?;
        let mut responses = Vec::new();
        for _ in 0..num {
            responses.push(SSHDecode::dec(s)?);
        }
        Ok(Self { responses })
    }
}

pub struct MethodPassword<'a> {
    pub change: bool,
    pub password: TextString<'a>,
}
sshwire_struct!(MethodPassword<'a> { change, password });

// Don't print password
impl fmt::Debug for MethodPassword<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodPassword")
            .field("change", &self.change)
            .finish_non_exhaustive()
    }
}

/// RFC4256 method fields: language tag then submethods hint.
#[derive(Debug)]
pub struct MethodKeyboardInteractive<'a> {
    pub lang: TextString<'a>,
    pub submethods: TextString<'a>,
}
sshwire_struct!(MethodKeyboardInteractive<'a> { lang, submethods });

#[derive(Debug)]
pub struct MethodPubKey<'a> {
    /// A signature algorithm name (not key algorithm name).
    pub sig_algo: &'a str,
    pub pubkey: Blob<PubKey<'a>>,
    pub sig: Option<Blob<Signature<'a>>>,
}

impl SSHEncode for MethodPubKey<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        // byte      SSH_MSG_USERAUTH_REQUEST
        // string    user name
        // string    service name
        // string    "publickey"
        // boolean   TRUE
        // string    public key algorithm name
        // string    public key to be used for authentication
        // string    signature

        // Signature bool will be set when signing
        let force_sig_bool = s.ctx().map_or(false, |c| c.method_pubkey_force_sig_bool);
        let sig = self.sig.is_some() || force_sig_bool;
        sig.enc(s)?;
        self.sig_algo.enc(s)?;
        self.pubkey.enc(s)?;
        self.sig.enc(s)?;
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for MethodPubKey<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let sig = bool::dec(s)?;
        let sig_algo = SSHDecode::dec(s)?;
        let pubkey = SSHDecode::dec(s)?;
        let sig = if sig { Some(SSHDecode::dec(s)?) } else { None };
        Ok(Self { sig_algo, pubkey, sig })
    }
}

#[derive(Debug)]
pub struct UserauthFailure<'a> {
    pub methods: NameList<'a>,
    pub partial: bool,
}
sshwire_struct!(UserauthFailure<'a> { methods, partial });

#[derive(Debug)]
pub struct UserauthSuccess {}
sshwire_struct!(UserauthSuccess {});

#[derive(Debug)]
pub struct UserauthBanner<'a> {
    pub message: TextString<'a>,
    pub lang: TextString<'a>,
}
sshwire_struct!(UserauthBanner<'a> { message, lang });

#[derive(Debug, Clone, PartialEq)]
pub enum PubKey<'a> {
    Ed25519(Ed25519PubKey<'a>),
    RSA(RSAPubKey<'a>),
    Unknown(Unknown<'a>),
}

impl PubKey<'_> {
    /// The algorithm name presented. May be invalid.
    pub fn algorithm_name(&self) -> Result<&str, &Unknown<'_>> {
        match self {
            PubKey::Ed25519(_) => Ok(SSH_NAME_ED25519),
            PubKey::RSA(_) => Ok(SSH_NAME_RSA),
            PubKey::Unknown(u) => Err(u),
        }
    }

    fn variant_name(&self) -> WireResult<&'static str> {
        match self {
            Self::Ed25519(_) => Ok(SSH_NAME_ED25519),
            Self::RSA(_) => Ok(SSH_NAME_RSA),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }
}

impl SSHEncode for PubKey<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.variant_name()?.enc(s)?;
        match self {
            Self::Ed25519(k) => k.enc(s),
            Self::RSA(k) => k.enc(s),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for PubKey<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let variant: BinString = SSHDecode::dec(s)?;
        match variant.0 {
            x if x == SSH_NAME_ED25519.as_bytes() => Ok(Self::Ed25519(SSHDecode::dec(s)?)),
            x if x == SSH_NAME_RSA.as_bytes() => Ok(Self::RSA(SSHDecode::dec(s)?)),
            _ => {
                s.ctx().seen_unknown = true;
                Ok(Self::Unknown(Unknown(variant.0)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ed25519PubKey<'a> {
    pub key: BinString<'a>,
}
sshwire_struct!(Ed25519PubKey<'a> { key });

#[derive(Debug, Clone, PartialEq)]
pub struct RSAPubKey<'a> {
    pub e: BinString<'a>,
    pub n: BinString<'a>,
}
sshwire_struct!(RSAPubKey<'a> { e, n });

#[derive(Debug)]
pub enum Signature<'a> {
    Ed25519(Ed25519Sig<'a>),
    RSA(RSASig<'a>),
    RSA256(RSA256Sig<'a>),
    Unknown(Unknown<'a>),
}

impl<'a> Signature<'a> {
    /// The algorithm name presented. May be invalid.
    pub fn algorithm_name(&self) -> Result<&'a str, &Unknown<'a>> {
        match self {
            Signature::Ed25519(_) => Ok(SSH_NAME_ED25519),
            Signature::RSA(_) => Ok(SSH_NAME_RSA),
            Signature::RSA256(_) => Ok(SSH_NAME_RSA_SHA256),
            Signature::Unknown(u) => Err(u),
        }
    }

    /// Returns the signature algorithm name to request for a public key.
    ///
    /// Returns [`Error::UnknownMethod`] if the `PubKey` is unknown.
    pub fn sig_name_for_pubkey(pubkey: &PubKey) -> Result<&'static str> {
        match pubkey {
            PubKey::Ed25519(_) => Ok(SSH_NAME_ED25519),
            PubKey::RSA(_) => Ok(SSH_NAME_RSA),
            PubKey::Unknown(u) => {
                warn!("Unknown key type \"{}\"", u);
                Err(Error::UnknownMethod { kind: "key" })
            }
        }
    }

    pub fn sig_bytes(&self) -> Result<&'a [u8]> {
        match self {
            Signature::Ed25519(e) => Ok(e.sig.0),
            Signature::RSA(r) => Ok(r.sig.0),
            Signature::RSA256(r) => Ok(r.sig.0),
            Signature::Unknown(u) => {
                warn!("Unknown signature type \"{}\"", u);
                Err(Error::UnknownMethod { kind: "signature" })
            }
        }
    }

    fn variant_name(&self) -> WireResult<&'static str> {
        match self {
            Self::Ed25519(_) => Ok(SSH_NAME_ED25519),
            Self::RSA(_) => Ok(SSH_NAME_RSA),
            Self::RSA256(_) => Ok(SSH_NAME_RSA_SHA256),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }
}

impl SSHEncode for Signature<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.variant_name()?.enc(s)?;
        match self {
            Self::Ed25519(k) => k.enc(s),
            Self::RSA(k) => k.enc(s),
            Self::RSA256(k) => k.enc(s),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for Signature<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let variant: BinString = SSHDecode::dec(s)?;
        match variant.0 {
            x if x == SSH_NAME_ED25519.as_bytes() => Ok(Self::Ed25519(SSHDecode::dec(s)?)),
            x if x == SSH_NAME_RSA.as_bytes() => Ok(Self::RSA(SSHDecode::dec(s)?)),
            x if x == SSH_NAME_RSA_SHA256.as_bytes() => Ok(Self::RSA256(SSHDecode::dec(s)?)),
            _ => {
                s.ctx().seen_unknown = true;
                Ok(Self::Unknown(Unknown(variant.0)))
            }
        }
    }
}

#[derive(Debug)]
pub struct Ed25519Sig<'a> {
    pub sig: BinString<'a>,
}
sshwire_struct!(Ed25519Sig<'a> { sig });

#[derive(Debug)]
pub struct RSASig<'a> {
    pub sig: BinString<'a>,
}
sshwire_struct!(RSASig<'a> { sig });

#[derive(Debug)]
pub struct RSA256Sig<'a> {
    pub sig: BinString<'a>,
}
sshwire_struct!(RSA256Sig<'a> { sig });

#[derive(Debug)]
pub struct GlobalRequest<'a> {
    pub want_reply: bool,
    pub req: GlobalRequestMethod<'a>,
}

impl SSHEncode for GlobalRequest<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.req.variant_name()?.enc(s)?;
        self.want_reply.enc(s)?;
        self.req.enc_payload(s)
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for GlobalRequest<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let variant: BinString = SSHDecode::dec(s)?;
        let want_reply = SSHDecode::dec(s)?;
        let req = GlobalRequestMethod::dec_payload(s, variant.0)?;
        Ok(Self { want_reply, req })
    }
}

/// No global requests are originated by this client; anything received is
/// answered with `RequestFailure` by the connection layer.
#[derive(Debug)]
pub enum GlobalRequestMethod<'a> {
    Unknown(Unknown<'a>),
}

impl GlobalRequestMethod<'_> {
    fn variant_name(&self) -> WireResult<&'static str> {
        Err(WireError::UnknownVariant)
    }

    fn enc_payload<S: SSHSink>(&self, _s: &mut S) -> WireResult<()> {
        Err(WireError::UnknownVariant)
    }

    fn dec_payload<'de: 'a, 'a, S: SSHSource<'de>>(
        s: &mut S,
        variant: &'a [u8],
    ) -> WireResult<GlobalRequestMethod<'a>> {
        s.ctx().seen_unknown = true;
        Ok(GlobalRequestMethod::Unknown(Unknown(variant)))
    }
}

#[derive(Debug)]
pub struct RequestSuccess {}
sshwire_struct!(RequestSuccess {});

#[derive(Debug)]
pub struct RequestFailure {}
sshwire_struct!(RequestFailure {});

#[derive(Debug)]
pub struct ChannelOpen<'a> {
    // channel_type is implicit in ty below
    pub num: u32,
    pub initial_window: u32,
    pub max_packet: u32,
    pub ty: ChannelOpenType<'a>,
}

impl SSHEncode for ChannelOpen<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.ty.variant_name()?.enc(s)?;
        self.num.enc(s)?;
        self.initial_window.enc(s)?;
        self.max_packet.enc(s)?;
        self.ty.enc_payload(s)
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for ChannelOpen<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let variant: BinString = SSHDecode::dec(s)?;
        let num = SSHDecode::dec(s)?;
        let initial_window = SSHDecode::dec(s)?;
        let max_packet = SSHDecode::dec(s)?;
        let ty = ChannelOpenType::dec_payload(s, variant.0)?;
        Ok(Self { num, initial_window, max_packet, ty })
    }
}

#[derive(Debug)]
pub enum ChannelOpenType<'a> {
    Session,
    ForwardedTcpip(ForwardedTcpip<'a>),
    DirectTcpip(DirectTcpip<'a>),
    Unknown(Unknown<'a>),
}

impl ChannelOpenType<'_> {
    pub fn variant_name(&self) -> WireResult<&'static str> {
        match self {
            Self::Session => Ok("session"),
            Self::ForwardedTcpip(_) => Ok("forwarded-tcpip"),
            Self::DirectTcpip(_) => Ok("direct-tcpip"),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }

    fn enc_payload<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        match self {
            Self::Session => Ok(()),
            Self::ForwardedTcpip(t) => t.enc(s),
            Self::DirectTcpip(t) => t.enc(s),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }

    fn dec_payload<'de: 'a, 'a, S: SSHSource<'de>>(
        s: &mut S,
        variant: &'a [u8],
    ) -> WireResult<ChannelOpenType<'a>> {
        match variant {
            b"session" => Ok(ChannelOpenType::Session),
            b"forwarded-tcpip" => Ok(ChannelOpenType::ForwardedTcpip(SSHDecode::dec(s)?)),
            b"direct-tcpip" => Ok(ChannelOpenType::DirectTcpip(SSHDecode::dec(s)?)),
            _ => {
                s.ctx().seen_unknown = true;
                Ok(ChannelOpenType::Unknown(Unknown(variant)))
            }
        }
    }
}

#[derive(Debug)]
pub struct ChannelOpenConfirmation {
    pub num: u32,
    pub sender_num: u32,
    pub initial_window: u32,
    pub max_packet: u32,
}
sshwire_struct!(ChannelOpenConfirmation { num, sender_num, initial_window, max_packet });

#[derive(Debug)]
pub struct ChannelOpenFailure<'a> {
    pub num: u32,
    pub reason: u32,
    pub desc: TextString<'a>,
    pub lang: TextString<'a>,
}
sshwire_struct!(ChannelOpenFailure<'a> { num, reason, desc, lang });

#[derive(Debug)]
pub struct ChannelWindowAdjust {
    pub num: u32,
    pub adjust: u32,
}
sshwire_struct!(ChannelWindowAdjust { num, adjust });

#[derive(Debug)]
pub struct ChannelData<'a> {
    pub num: u32,
    pub data: BinString<'a>,
}
sshwire_struct!(ChannelData<'a> { num, data });

impl ChannelData<'_> {
    // offset into a packet payload, includes packet type byte
    pub const DATA_OFFSET: usize = 9;
}

#[derive(Debug)]
pub struct ChannelDataExt<'a> {
    pub num: u32,
    pub code: u32,
    pub data: BinString<'a>,
}
sshwire_struct!(ChannelDataExt<'a> { num, code, data });

impl ChannelDataExt<'_> {
    // offset into a packet payload, includes packet type byte
    pub const DATA_OFFSET: usize = 13;
}

#[derive(Debug)]
pub struct ChannelEof {
    pub num: u32,
}
sshwire_struct!(ChannelEof { num });

#[derive(Debug)]
pub struct ChannelClose {
    pub num: u32,
}
sshwire_struct!(ChannelClose { num });

#[derive(Debug)]
pub struct ChannelSuccess {
    pub num: u32,
}
sshwire_struct!(ChannelSuccess { num });

#[derive(Debug)]
pub struct ChannelFailure {
    pub num: u32,
}
sshwire_struct!(ChannelFailure { num });

#[derive(Debug)]
pub struct ChannelRequest<'a> {
    pub num: u32,
    // channel_type is implicit in req below
    pub want_reply: bool,
    pub req: ChannelReqType<'a>,
}

impl SSHEncode for ChannelRequest<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where
        S: SSHSink,
    {
        self.num.enc(s)?;
        self.req.variant_name()?.enc(s)?;
        self.want_reply.enc(s)?;
        self.req.enc_payload(s)
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for ChannelRequest<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where
        S: SSHSource<'de>,
    {
        let num = SSHDecode::dec(s)?;
        let variant: BinString = SSHDecode::dec(s)?;
        let want_reply = SSHDecode::dec(s)?;
        let req = ChannelReqType::dec_payload(s, variant.0)?;
        Ok(Self { num, want_reply, req })
    }
}

#[derive(Debug)]
pub enum ChannelReqType<'a> {
    Shell,
    Exec(Exec<'a>),
    Pty(PtyReq<'a>),
    Subsystem(Subsystem<'a>),
    WinChange(WinChange),
    Signal(Signal<'a>),
    ExitStatus(ExitStatus),
    ExitSignal(ExitSignal<'a>),
    Break(Break),
    // Other requests that aren't implemented at present:
    // auth-agent-req@openssh.com
    // x11-req
    // env
    // xon-xoff
    Unknown(Unknown<'a>),
}

impl ChannelReqType<'_> {
    pub fn variant_name(&self) -> WireResult<&'static str> {
        match self {
            Self::Shell => Ok("shell"),
            Self::Exec(_) => Ok("exec"),
            Self::Pty(_) => Ok("pty-req"),
            Self::Subsystem(_) => Ok("subsystem"),
            Self::WinChange(_) => Ok("window-change"),
            Self::Signal(_) => Ok("signal"),
            Self::ExitStatus(_) => Ok("exit-status"),
            Self::ExitSignal(_) => Ok("exit-signal"),
            Self::Break(_) => Ok("break"),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }

    fn enc_payload<S: SSHSink>(&self, s: &mut S) -> WireResult<()> {
        match self {
            Self::Shell => Ok(()),
            Self::Exec(p) => p.enc(s),
            Self::Pty(p) => p.enc(s),
            Self::Subsystem(p) => p.enc(s),
            Self::WinChange(p) => p.enc(s),
            Self::Signal(p) => p.enc(s),
            Self::ExitStatus(p) => p.enc(s),
            Self::ExitSignal(p) => p.enc(s),
            Self::Break(p) => p.enc(s),
            Self::Unknown(_) => Err(WireError::UnknownVariant),
        }
    }

    fn dec_payload<'de: 'a, 'a, S: SSHSource<'de>>(
        s: &mut S,
        variant: &'a [u8],
    ) -> WireResult<ChannelReqType<'a>> {
        match variant {
            b"shell" => Ok(ChannelReqType::Shell),
            b"exec" => Ok(ChannelReqType::Exec(SSHDecode::dec(s)?)),
            b"pty-req" => Ok(ChannelReqType::Pty(SSHDecode::dec(s)?)),
            b"subsystem" => Ok(ChannelReqType::Subsystem(SSHDecode::dec(s)?)),
            b"window-change" => Ok(ChannelReqType::WinChange(SSHDecode::dec(s)?)),
            b"signal" => Ok(ChannelReqType::Signal(SSHDecode::dec(s)?)),
            b"exit-status" => Ok(ChannelReqType::ExitStatus(SSHDecode::dec(s)?)),
            b"exit-signal" => Ok(ChannelReqType::ExitSignal(SSHDecode::dec(s)?)),
            b"break" => Ok(ChannelReqType::Break(SSHDecode::dec(s)?)),
            _ => {
                s.ctx().seen_unknown = true;
                Ok(ChannelReqType::Unknown(Unknown(variant)))
            }
        }
    }
}

#[derive(Debug)]
pub struct Exec<'a> {
    pub command: TextString<'a>,
}
sshwire_struct!(Exec<'a> { command });

#[derive(Debug)]
pub struct Subsystem<'a> {
    pub subsystem: TextString<'a>,
}
sshwire_struct!(Subsystem<'a> { subsystem });

/// The contents of a `"pty-req"` request.
#[derive(Debug)]
pub struct PtyReq<'a> {
    pub term: TextString<'a>,
    pub cols: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
    pub modes: BinString<'a>,
}
sshwire_struct!(PtyReq<'a> { term, cols, rows, width, height, modes });

#[derive(Debug, Clone)]
pub struct WinChange {
    pub cols: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
}
sshwire_struct!(WinChange { cols, rows, width, height });

/// A unix signal channel request
#[derive(Debug)]
pub struct Signal<'a> {
    pub sig: &'a str,
}
sshwire_struct!(Signal<'a> { sig });

#[derive(Debug)]
pub struct ExitStatus {
    pub status: u32,
}
sshwire_struct!(ExitStatus { status });

#[derive(Debug)]
pub struct ExitSignal<'a> {
    pub signal: &'a str,
    pub core: bool,
    pub error: TextString<'a>,
    pub lang: TextString<'a>,
}
sshwire_struct!(ExitSignal<'a> { signal, core, error, lang });

#[derive(Debug, Clone)]
pub struct Break {
    pub length: u32,
}
sshwire_struct!(Break { length });

#[derive(Debug)]
pub struct ForwardedTcpip<'a> {
    pub address: TextString<'a>,
    pub port: u32,
    pub origin: TextString<'a>,
    pub origin_port: u32,
}
sshwire_struct!(ForwardedTcpip<'a> { address, port, origin, origin_port });

#[derive(Debug)]
pub struct DirectTcpip<'a> {
    pub address: TextString<'a>,
    pub port: u32,
    pub origin: TextString<'a>,
    pub origin_port: u32,
}
sshwire_struct!(DirectTcpip<'a> { address, port, origin, origin_port });

// Placeholder for unknown method names. These are sometimes non-fatal and
// need to be handled by the relevant code, for example newly invented pubkey
// types. This is deliberately not serializable, we only receive it.
#[derive(Clone, PartialEq)]
pub struct Unknown<'a>(pub &'a [u8]);

impl fmt::Display for Unknown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = sshwire::try_as_ascii_str(self.0) {
            f.write_str(s)
        } else {
            write!(f, "non-ascii {:?}", self.0.hex_dump())
        }
    }
}

impl fmt::Debug for Unknown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// State to be passed to decoding.
/// Use this so the parser can select the correct enum variant to decode.
#[derive(Default, Clone, Debug)]
pub struct ParseContext {
    pub cli_auth_type: Option<auth::AuthType>,

    // Used by auth_sig_msg()
    pub method_pubkey_force_sig_bool: bool,

    // Set to true if an unknown variant is encountered.
    // Packet length checks should be omitted in that case.
    pub(crate) seen_unknown: bool,
}

impl ParseContext {
    pub fn new() -> Self {
        ParseContext {
            cli_auth_type: None,
            method_pubkey_force_sig_bool: false,
            seen_unknown: false,
        }
    }
}

/// We have repeated `match` statements for the various packet types, use a macro
macro_rules! messagetypes {
    (
        $( ( $message_num:literal,
            $SpecificPacketVariant:ident,
            $SpecificPacketType:ty,
            $SSH_MESSAGE_NAME:ident,
            $category:ident
            ),
             )*
    ) => {

#[derive(Debug)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum MessageNumber {
    // variants are eg
    // SSH_MSG_KEXINIT = 20,
    $(
    $SSH_MESSAGE_NAME = $message_num,
    )*
}

impl TryFrom<u8> for MessageNumber {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        match v {
            // eg
            // 20 = Ok(MessageNumber::SSH_MSG_KEXINIT)
            $(
            $message_num => Ok(MessageNumber::$SSH_MESSAGE_NAME),
            )*
            _ => {
                Err(Error::UnknownPacket { number: v })
            }
        }
    }
}

impl SSHEncode for Packet<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where S: SSHSink {
        let t = self.message_num() as u8;
        t.enc(s)?;
        match self {
            // eg
            // Packet::KexInit(p) => {
            // ...
            $(
            Packet::$SpecificPacketVariant(p) => {
                p.enc(s)?
            }
            )*
        };
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for Packet<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where S: SSHSource<'de> {
        let msg_num = u8::dec(s)?;
        let ty = MessageNumber::try_from(msg_num);
        let ty = match ty {
            Ok(t) => t,
            Err(_) => return Err(WireError::UnknownPacket { number: msg_num })
        };

        // Decode based on the message number
        let p = match ty {
            // eg
            // MessageNumber::SSH_MSG_KEXINIT => Packet::KexInit(
            // ...
            $(
            MessageNumber::$SSH_MESSAGE_NAME => Packet::$SpecificPacketVariant(SSHDecode::dec(s)?),
            )*
        };
        Ok(p)
    }
}

/// Top level SSH packet enum
#[derive(Debug)]
pub enum Packet<'a> {
    // eg KexInit(KexInit<'a>),
    $(
    $SpecificPacketVariant($SpecificPacketType),
    )*
}

impl<'a> Packet<'a> {
    pub fn message_num(&self) -> MessageNumber {
        match self {
            // eg
            // Packet::KexInit() => {
            // ..
            $(
            Packet::$SpecificPacketVariant(_) => {
                MessageNumber::$SSH_MESSAGE_NAME
            }
            )*
        }
    }

    pub fn category(&self) -> Category {
        match self {
            // eg
            // Packet::KexInit() => Category::Kex,
            $(
            Packet::$SpecificPacketVariant(_) => Category::$category,
            )*
        }
    }
}

$(
impl<'a> From<$SpecificPacketType> for Packet<'a> {
    fn from(s: $SpecificPacketType) -> Packet<'a> {
        Packet::$SpecificPacketVariant(s)
    }
}
)*

} } // macro

pub enum Category {
    /// Allowed at any time.
    All,
    /// After kexinit, before newkeys complete (other packets are not allowed
    /// during that time).
    Kex,
    /// Post-kex
    Auth,
    /// Post-auth
    Sess,
}

messagetypes![
(1, Disconnect, Disconnect<'a>, SSH_MSG_DISCONNECT, All),
(2, Ignore, Ignore<'a>, SSH_MSG_IGNORE, All),
(3, Unimplemented, Unimplemented, SSH_MSG_UNIMPLEMENTED, All),
(4, DebugPacket, DebugPacket<'a>, SSH_MSG_DEBUG, All),
(5, ServiceRequest, ServiceRequest<'a>, SSH_MSG_SERVICE_REQUEST, Auth),
(6, ServiceAccept, ServiceAccept<'a>, SSH_MSG_SERVICE_ACCEPT, Auth),
(20, KexInit, KexInit<'a>, SSH_MSG_KEXINIT, All),
(21, NewKeys, NewKeys, SSH_MSG_NEWKEYS, Kex),
(30, KexDHInit, KexDHInit<'a>, SSH_MSG_KEXDH_INIT, Kex),
(31, KexDHReply, KexDHReply<'a>, SSH_MSG_KEXDH_REPLY, Kex),

(50, UserauthRequest, UserauthRequest<'a>, SSH_MSG_USERAUTH_REQUEST, Auth),
(51, UserauthFailure, UserauthFailure<'a>, SSH_MSG_USERAUTH_FAILURE, Auth),
(52, UserauthSuccess, UserauthSuccess, SSH_MSG_USERAUTH_SUCCESS, Auth),
(53, UserauthBanner, UserauthBanner<'a>, SSH_MSG_USERAUTH_BANNER, Auth),
// One of
// SSH_MSG_USERAUTH_PASSWD_CHANGEREQ
// SSH_MSG_USERAUTH_PK_OK
// SSH_MSG_USERAUTH_INFO_REQUEST
(60, Userauth60, Userauth60<'a>, SSH_MSG_USERAUTH_60, Auth),
(61, UserauthInfoResponse, UserauthInfoResponse<'a>, SSH_MSG_USERAUTH_INFO_RESPONSE, Auth),

(80, GlobalRequest, GlobalRequest<'a>, SSH_MSG_GLOBAL_REQUEST, Sess),
(81, RequestSuccess, RequestSuccess, SSH_MSG_REQUEST_SUCCESS, Sess),
(82, RequestFailure, RequestFailure, SSH_MSG_REQUEST_FAILURE, Sess),

(90, ChannelOpen, ChannelOpen<'a>, SSH_MSG_CHANNEL_OPEN, Sess),
(91, ChannelOpenConfirmation, ChannelOpenConfirmation, SSH_MSG_CHANNEL_OPEN_CONFIRMATION, Sess),
(92, ChannelOpenFailure, ChannelOpenFailure<'a>, SSH_MSG_CHANNEL_OPEN_FAILURE, Sess),
(93, ChannelWindowAdjust, ChannelWindowAdjust, SSH_MSG_CHANNEL_WINDOW_ADJUST, Sess),
(94, ChannelData, ChannelData<'a>, SSH_MSG_CHANNEL_DATA, Sess),
(95, ChannelDataExt, ChannelDataExt<'a>, SSH_MSG_CHANNEL_EXTENDED_DATA, Sess),
(96, ChannelEof, ChannelEof, SSH_MSG_CHANNEL_EOF, Sess),
(97, ChannelClose, ChannelClose, SSH_MSG_CHANNEL_CLOSE, Sess),
(98, ChannelRequest, ChannelRequest<'a>, SSH_MSG_CHANNEL_REQUEST, Sess),
(99, ChannelSuccess, ChannelSuccess, SSH_MSG_CHANNEL_SUCCESS, Sess),
(100, ChannelFailure, ChannelFailure, SSH_MSG_CHANNEL_FAILURE, Sess),
];

#[cfg(test)]
mod tests {
    use crate::packets::*;
    use crate::skifflog::init_test_log;
    use crate::sshwire::tests::{test_roundtrip, test_roundtrip_context};
    use crate::sshwire::{packet_from_bytes, write_ssh_vec};
    use crate::{packets, sshwire};
    use pretty_hex::PrettyHex;

    #[test]
    /// check round trip of packet enums is right
    fn packet_type() {
        for i in 0..=255 {
            let ty = packets::MessageNumber::try_from(i);
            if let Ok(ty) = ty {
                assert_eq!(i, ty as u8);
            }
        }
    }

    #[test]
    fn roundtrip_channel_open() {
        init_test_log();
        let p = Packet::ChannelOpen(ChannelOpen {
            num: 111,
            initial_window: 50000,
            max_packet: 20000,
            ty: ChannelOpenType::DirectTcpip(DirectTcpip {
                address: "localhost".into(),
                port: 4444,
                origin: "somewhere".into(),
                origin_port: 0,
            }),
        });
        test_roundtrip(&p);

        let p = Packet::ChannelOpen(ChannelOpen {
            num: 0,
            initial_window: 899,
            max_packet: 14,
            ty: ChannelOpenType::Session,
        });
        test_roundtrip(&p);
    }

    #[test]
    fn roundtrip_kbi() {
        init_test_log();
        let p = Packet::Userauth60(Userauth60::InfoRequest(UserauthInfoRequest {
            name: "login".into(),
            instruction: "type the thing".into(),
            lang: "".into(),
            prompts: vec![
                InfoPrompt { prompt: "Password:".into(), echo: false },
                InfoPrompt { prompt: "Token:".into(), echo: true },
            ],
        }));
        let mut ctx = ParseContext::new();
        ctx.cli_auth_type = Some(crate::auth::AuthType::KeyboardInteractive);
        test_roundtrip_context(&p, &ctx);

        let p = Packet::UserauthInfoResponse(UserauthInfoResponse {
            responses: vec!["hunter2".into(), "000000".into()],
        });
        test_roundtrip(&p);
    }

    #[test]
    fn unknown_method() {
        init_test_log();
        let p = Packet::ChannelOpen(ChannelOpen {
            num: 0,
            initial_window: 899,
            max_packet: 14,
            ty: ChannelOpenType::Session,
        });
        let mut buf1 = write_ssh_vec(&p).unwrap();
        // change a byte in the "session" name
        buf1[8] = b'X';
        trace!("broken: {:?}", buf1.hex_dump());
        let ctx = ParseContext::default();
        let p2 = packet_from_bytes(&buf1, &ctx).unwrap();
        trace!("broken: {p2:#?}");
        assert!(matches!(
            p2,
            Packet::ChannelOpen(ChannelOpen { ty: ChannelOpenType::Unknown(_), .. })
        ));
    }

    #[test]
    /// Tests recovery from unknown variants in a blob when decoding.
    fn unknown_variant_in_blob() {
        init_test_log();
        let p: Packet = UserauthRequest {
            username: "matt".into(),
            service: "ssh-connection",
            method: AuthMethod::PubKey(MethodPubKey {
                sig_algo: "something",
                pubkey: Blob(PubKey::Ed25519(Ed25519PubKey { key: BinString(b"zzzz") })),
                sig: Some(Blob(Signature::Ed25519(Ed25519Sig {
                    sig: BinString(b"sighere"),
                }))),
            }),
        }
        .into();

        let mut buf1 = write_ssh_vec(&p).unwrap();
        // change a byte in the "ssh-ed25519" variant string
        let idx = buf1.windows(11).position(|w| w == b"ssh-ed25519").unwrap();
        buf1[idx + 2] = b'F';
        trace!("broken: {:?}", buf1.hex_dump());
        let ctx = ParseContext::default();
        let p2 = packet_from_bytes(&buf1, &ctx).unwrap();
        trace!("broken: {p2:#?}");
        assert!(matches!(
            p2,
            Packet::UserauthRequest(UserauthRequest {
                method: AuthMethod::PubKey(MethodPubKey {
                    pubkey: Blob(PubKey::Unknown(Unknown(b"ssF-ed25519"))),
                    sig: Some(Blob(Signature::Ed25519(_))),
                    ..
                }),
                ..
            })
        ));
    }

    #[test]
    #[should_panic]
    fn unknown_method_ser() {
        init_test_log();
        let p = Packet::ChannelOpen(ChannelOpen {
            num: 0,
            initial_window: 200000,
            max_packet: 88200,
            ty: ChannelOpenType::Unknown(Unknown(b"audio-stream")),
        });
        write_ssh_vec(&p).unwrap();
    }
}
