//! ESMTP features

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    net::{Ipv4Addr, Ipv6Addr},
};

use crate::{
    error,
    transport::smtp::{authentication::Mechanism, response::Response},
    Error,
};

/// Client identifier, the parameter to `EHLO`
#[derive(PartialEq, Eq, Clone, Debug)]
#[non_exhaustive]
pub enum ClientId {
    /// A fully-qualified domain name
    Domain(String),
    /// An IPv4 address
    Ipv4(Ipv4Addr),
    /// An IPv6 address
    Ipv6(Ipv6Addr),
}

const LOCALHOST_CLIENT: ClientId = ClientId::Ipv4(Ipv4Addr::new(127, 0, 0, 1));

impl Default for ClientId {
    fn default() -> Self {
        // https://tools.ietf.org/html/rfc5321#section-4.1.4
        // Use the host name when there is one, an address literal otherwise.
        #[cfg(feature = "hostname")]
        {
            hostname::get()
                .ok()
                .and_then(|s| s.into_string().ok())
                .filter(|s| !s.is_empty())
                .map(Self::Domain)
                .unwrap_or(LOCALHOST_CLIENT)
        }
        #[cfg(not(feature = "hostname"))]
        LOCALHOST_CLIENT
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Domain(ref value) => f.write_str(value),
            Self::Ipv4(ref value) => write!(f, "[{value}]"),
            Self::Ipv6(ref value) => write!(f, "[IPv6:{value}]"),
        }
    }
}

/// Supported ESMTP keywords
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum Extension {
    /// 8BITMIME keyword
    ///
    /// Defined in [RFC 6152](https://tools.ietf.org/html/rfc6152)
    EightBitMime,
    /// SMTPUTF8 keyword
    ///
    /// Defined in [RFC 6531](https://tools.ietf.org/html/rfc6531)
    SmtpUtfEight,
    /// STARTTLS keyword
    ///
    /// Defined in [RFC 2487](https://tools.ietf.org/html/rfc2487)
    StartTls,
    /// AUTH mechanism
    Authentication(Mechanism),
}

impl Display for Extension {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Extension::EightBitMime => f.write_str("8BITMIME"),
            Extension::SmtpUtfEight => f.write_str("SMTPUTF8"),
            Extension::StartTls => f.write_str("STARTTLS"),
            Extension::Authentication(ref mechanism) => write!(f, "AUTH {mechanism}"),
        }
    }
}

/// What the server told about itself in its `EHLO` reply
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct ServerInfo {
    /// The name given in the first line of the reply
    name: String,
    /// Features known to this crate
    features: HashSet<Extension>,
    /// `AUTH` was listed, whatever the mechanisms
    auth: bool,
}

impl Display for ServerInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let features = if self.features.is_empty() {
            "no supported features".to_owned()
        } else {
            let mut features: Vec<String> = self.features.iter().map(ToString::to_string).collect();
            features.sort();
            features.join(", ")
        };
        write!(f, "{} with {}", self.name, features)
    }
}

impl ServerInfo {
    /// Parses a EHLO response to create a `ServerInfo`
    pub fn from_response(response: &Response) -> Result<ServerInfo, Error> {
        let name = response
            .first_word()
            .ok_or_else(|| error::response("Could not read server name"))?;

        let mut info = ServerInfo {
            name: name.to_owned(),
            ..ServerInfo::default()
        };

        // the first line is the greeting, keywords follow
        for line in response.message().skip(1) {
            let mut split = line.split_whitespace();
            let Some(keyword) = split.next() else {
                continue;
            };
            let keyword = keyword.to_ascii_uppercase();

            match keyword.as_str() {
                "8BITMIME" => {
                    info.features.insert(Extension::EightBitMime);
                }
                "SMTPUTF8" => {
                    info.features.insert(Extension::SmtpUtfEight);
                }
                "STARTTLS" => {
                    info.features.insert(Extension::StartTls);
                }
                // `AUTH=` is the pre-standard form still sent by some servers
                _ if keyword == "AUTH" || keyword.starts_with("AUTH=") => {
                    info.auth = true;
                    let inline = keyword.strip_prefix("AUTH=").filter(|m| !m.is_empty());
                    let mechanisms = split.map(str::to_ascii_uppercase);
                    for mechanism in inline.map(str::to_owned).into_iter().chain(mechanisms) {
                        if let Some(mechanism) = Mechanism::from_keyword(&mechanism) {
                            info.features.insert(Extension::Authentication(mechanism));
                        }
                    }
                }
                _ => (),
            };
        }

        Ok(info)
    }

    /// Checks if the server supports an ESMTP feature
    pub fn supports_feature(&self, keyword: Extension) -> bool {
        self.features.contains(&keyword)
    }

    /// Checks if the server supports an authentication mechanism
    pub fn supports_auth_mechanism(&self, mechanism: Mechanism) -> bool {
        self.features
            .contains(&Extension::Authentication(mechanism))
    }

    /// Whether the server advertised `AUTH` at all
    pub fn auth_advertised(&self) -> bool {
        self.auth
    }

    /// Advertised mechanisms this crate implements
    pub fn auth_mechanisms(&self) -> Vec<Mechanism> {
        Mechanism::ALL
            .into_iter()
            .filter(|m| self.supports_auth_mechanism(*m))
            .collect()
    }

    /// The name given in the server banner
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }
}

/// A `MAIL FROM` extension parameter
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum MailParameter {
    /// `BODY` parameter
    Body(MailBodyParameter),
    /// `SMTPUTF8` parameter
    SmtpUtfEight,
}

impl Display for MailParameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            MailParameter::Body(ref value) => write!(f, "BODY={value}"),
            MailParameter::SmtpUtfEight => f.write_str("SMTPUTF8"),
        }
    }
}

/// Values for the `BODY` parameter to `MAIL FROM`
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub enum MailBodyParameter {
    /// `8BITMIME`
    EightBitMime,
}

impl Display for MailBodyParameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            MailBodyParameter::EightBitMime => f.write_str("8BITMIME"),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ehlo(lines: &[&str]) -> ServerInfo {
        let mut raw = String::new();
        for (i, line) in lines.iter().enumerate() {
            let sep = if i + 1 == lines.len() { ' ' } else { '-' };
            raw.push_str(&format!("250{sep}{line}\r\n"));
        }
        ServerInfo::from_response(&raw.parse().unwrap()).unwrap()
    }

    #[test]
    fn clientid_fmt() {
        assert_eq!(ClientId::Domain("test".to_owned()).to_string(), "test");
        assert_eq!(LOCALHOST_CLIENT.to_string(), "[127.0.0.1]");
        assert_eq!(
            ClientId::Ipv6(Ipv6Addr::LOCALHOST).to_string(),
            "[IPv6:::1]"
        );
    }

    #[test]
    fn extension_fmt() {
        assert_eq!(Extension::EightBitMime.to_string(), "8BITMIME");
        assert_eq!(
            Extension::Authentication(Mechanism::CramMd5).to_string(),
            "AUTH CRAM-MD5"
        );
    }

    #[test]
    fn server_info_features() {
        let info = ehlo(&[
            "me.example.org greets you",
            "8BITMIME",
            "starttls",
            "AUTH PLAIN LOGIN NTLM",
            "SIZE 42",
        ]);

        assert_eq!(info.name(), "me.example.org");
        assert!(info.supports_feature(Extension::EightBitMime));
        assert!(info.supports_feature(Extension::StartTls));
        assert!(!info.supports_feature(Extension::SmtpUtfEight));
        assert!(info.auth_advertised());
        assert_eq!(info.auth_mechanisms(), vec![Mechanism::Plain, Mechanism::Ntlm]);
        assert_eq!(
            info.to_string(),
            "me.example.org with 8BITMIME, AUTH NTLM, AUTH PLAIN, STARTTLS"
        );
    }

    #[test]
    fn server_info_old_auth_syntax() {
        let info = ehlo(&["me", "AUTH=CRAM-MD5 PLAIN"]);
        assert_eq!(info.auth_mechanisms(), vec![Mechanism::Plain, Mechanism::CramMd5]);
    }

    #[test]
    fn auth_without_known_mechanism() {
        let info = ehlo(&["me", "AUTH GSSAPI XOAUTH2"]);
        assert!(info.auth_advertised());
        assert!(info.auth_mechanisms().is_empty());

        let info = ehlo(&["me"]);
        assert!(!info.auth_advertised());
        assert_eq!(info.to_string(), "me with no supported features");
    }

    #[test]
    fn mail_parameters() {
        assert_eq!(
            MailParameter::Body(MailBodyParameter::EightBitMime).to_string(),
            "BODY=8BITMIME"
        );
        assert_eq!(MailParameter::SmtpUtfEight.to_string(), "SMTPUTF8");
    }
}
