//! NTLM over SMTP `AUTH`
//!
//! The exchange has three messages: the client's negotiate message, the
//! server's challenge, and the client's authenticate message carrying
//! NTLMv2 responses. Layouts follow
//! [MS-NLMP](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-nlmp/)
//! sections 2.2.1.1 to 2.2.1.3.

use std::{
    fmt::{self, Debug, Formatter},
    time::{SystemTime, UNIX_EPOCH},
};

use md4::{Digest, Md4};

use super::{hmac_md5, Credentials, Mechanism, ServerContext};
use crate::{error, Error};

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_MESSAGE: u32 = 1;
const CHALLENGE_MESSAGE: u32 = 2;
const AUTHENTICATE_MESSAGE: u32 = 3;

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_OEM_DOMAIN_SUPPLIED: u32 = 0x0000_1000;
const NEGOTIATE_OEM_WORKSTATION_SUPPLIED: u32 = 0x0000_2000;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const NEGOTIATE_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// AV pair id of the server's timestamp in the target info
const MSV_AV_TIMESTAMP: u16 = 7;
const MSV_AV_EOL: u16 = 0;

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

/// The server reply that asks for the negotiate message
const NTLM_SUPPORTED: &str = "NTLM supported";

/// NTLM state for one authentication attempt
pub struct NtlmAuth {
    domain: String,
    username: String,
    password: String,
    workstation: String,
    /// Host the session was opened to
    host: String,
}

impl Debug for NtlmAuth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtlmAuth")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("workstation", &self.workstation)
            .field("host", &self.host)
            .finish()
    }
}

impl NtlmAuth {
    /// Splits a `domain\username` login
    pub fn new(host: &str, credentials: &Credentials, workstation: &str) -> Result<Self, Error> {
        let (domain, username) = credentials.username().split_once('\\').ok_or_else(|| {
            error::auth("Wrong format of username. The required format is 'domain\\username'")
        })?;

        Ok(NtlmAuth {
            domain: domain.to_owned(),
            username: username.to_owned(),
            password: credentials.secret.clone(),
            workstation: workstation.to_owned(),
            host: host.to_owned(),
        })
    }

    pub(super) fn start(&self, server: &ServerContext<'_>) -> Result<(), Error> {
        if !server.tls && !server.mechanisms.contains(&Mechanism::Ntlm) {
            return Err(error::auth(format!(
                "unknown authentication type: {:?}",
                server.mechanisms
            )));
        }
        if server.name != self.host {
            return Err(error::auth("wrong host name"));
        }
        Ok(())
    }

    pub(super) fn next(&self, from_server: &str) -> Result<Vec<u8>, Error> {
        if from_server == NTLM_SUPPORTED {
            return self.negotiate_message();
        }

        let challenge = crate::base64::decode(from_server.trim())
            .map_err(|e| error::auth(format!("Decode base64 error: {e}")))?;
        self.authenticate_message(&challenge, fastrand::u64(..).to_le_bytes())
    }

    /// Type 1 message, advertising what the client supports
    pub fn negotiate_message(&self) -> Result<Vec<u8>, Error> {
        let mut flags = NEGOTIATE_FLAGS;
        if !self.domain.is_empty() {
            flags |= NEGOTIATE_OEM_DOMAIN_SUPPLIED;
        }
        if !self.workstation.is_empty() {
            flags |= NEGOTIATE_OEM_WORKSTATION_SUPPLIED;
        }

        let mut message = MessageWriter::new(NEGOTIATE_MESSAGE, 32);
        message.put_u32(flags);
        message.put_payload(self.domain.as_bytes())?;
        message.put_payload(self.workstation.as_bytes())?;
        Ok(message.finish())
    }

    /// Type 3 message, answering `challenge` with NTLMv2 responses
    fn authenticate_message(
        &self,
        challenge: &[u8],
        client_challenge: [u8; 8],
    ) -> Result<Vec<u8>, Error> {
        let challenge = Challenge::parse(challenge)?;
        let server_timestamp = challenge.timestamp();

        let key = ntowf_v2(&self.username, &self.domain, &self.password)?;
        // a server sending its timestamp expects an all-zero LM response
        let lm_response = match server_timestamp {
            Some(_) => vec![0; 24],
            None => lmv2_response(&key, &challenge.server_challenge, &client_challenge)?,
        };
        let nt_response = ntv2_response(
            &key,
            &challenge.server_challenge,
            &client_challenge,
            server_timestamp.unwrap_or_else(filetime_now),
            challenge.target_info,
        )?;

        let mut message = MessageWriter::new(AUTHENTICATE_MESSAGE, 64);
        message.put_payload(&lm_response)?;
        message.put_payload(&nt_response)?;
        message.put_payload(&utf16le(&self.domain))?;
        message.put_payload(&utf16le(&self.username))?;
        message.put_payload(&utf16le(&self.workstation))?;
        // no session key
        message.put_payload(&[])?;
        message.put_u32((challenge.flags & NEGOTIATE_FLAGS) | NEGOTIATE_UNICODE);
        Ok(message.finish())
    }
}

/// The parts of a type 2 message the client needs
#[derive(Debug)]
struct Challenge<'a> {
    flags: u32,
    server_challenge: [u8; 8],
    target_info: &'a [u8],
}

impl<'a> Challenge<'a> {
    fn parse(message: &'a [u8]) -> Result<Self, Error> {
        if message.len() < 32 || &message[..8] != SIGNATURE {
            return Err(error::auth("invalid NTLM challenge message"));
        }
        if read_u32(message, 8) != Some(CHALLENGE_MESSAGE) {
            return Err(error::auth("unexpected NTLM message type"));
        }

        let flags = read_u32(message, 20).unwrap_or_default();
        let mut server_challenge = [0; 8];
        server_challenge.copy_from_slice(&message[24..32]);

        // the target info fields are absent from old servers' messages
        let target_info: &[u8] = match (read_u16(message, 40), read_u32(message, 44)) {
            (Some(len), Some(offset)) => message
                .get(offset as usize..offset as usize + len as usize)
                .ok_or_else(|| error::auth("NTLM target info out of bounds"))?,
            _ => &[],
        };

        Ok(Challenge {
            flags,
            server_challenge,
            target_info,
        })
    }

    /// The server's `MsvAvTimestamp`, if the target info has one
    fn timestamp(&self) -> Option<u64> {
        let mut rest = self.target_info;
        while let (Some(id), Some(len)) = (read_u16(rest, 0), read_u16(rest, 2)) {
            let value = rest.get(4..4 + len as usize)?;
            match id {
                MSV_AV_EOL => return None,
                MSV_AV_TIMESTAMP => return value.try_into().ok().map(u64::from_le_bytes),
                _ => rest = &rest[4 + len as usize..],
            }
        }
        None
    }
}

/// Builds a message: fixed header, then payloads referenced by
/// `(length, length, offset)` security buffers
struct MessageWriter {
    header: Vec<u8>,
    payload: Vec<u8>,
    header_len: usize,
}

impl MessageWriter {
    fn new(message_type: u32, header_len: usize) -> Self {
        let mut header = Vec::with_capacity(header_len);
        header.extend_from_slice(SIGNATURE);
        header.extend_from_slice(&message_type.to_le_bytes());
        MessageWriter {
            header,
            payload: Vec::new(),
            header_len,
        }
    }

    fn put_u32(&mut self, value: u32) {
        self.header.extend_from_slice(&value.to_le_bytes());
    }

    /// Fails when `data` does not fit a security buffer
    fn put_payload(&mut self, data: &[u8]) -> Result<(), Error> {
        let len = u16::try_from(data.len())
            .map_err(|_| error::auth(format!("NTLM field too long ({} bytes)", data.len())))?;
        let offset = u32::try_from(self.header_len + self.payload.len())
            .map_err(|_| error::auth("NTLM message too long"))?;
        self.header.extend_from_slice(&len.to_le_bytes());
        self.header.extend_from_slice(&len.to_le_bytes());
        self.header.extend_from_slice(&offset.to_le_bytes());
        self.payload.extend_from_slice(data);
        Ok(())
    }

    fn finish(mut self) -> Vec<u8> {
        debug_assert_eq!(self.header.len(), self.header_len);
        self.header.append(&mut self.payload);
        self.header
    }
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2)?.try_into().ok().map(u16::from_le_bytes)
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)?.try_into().ok().map(u32::from_le_bytes)
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Current time in 100ns intervals since 1601
fn filetime_now() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_secs() + FILETIME_EPOCH_OFFSET) * 10_000_000
        + u64::from(since_epoch.subsec_nanos()) / 100
}

/// NTOWFv1, the MD4 of the UTF-16LE password
fn nt_hash(password: &str) -> [u8; 16] {
    Md4::digest(utf16le(password)).into()
}

/// NTOWFv2, keyed by the password hash over the user and domain
fn ntowf_v2(username: &str, domain: &str, password: &str) -> Result<[u8; 16], Error> {
    let identity = utf16le(&(username.to_uppercase() + domain));
    hmac_md5(&nt_hash(password), &[identity.as_slice()])
}

fn lmv2_response(
    key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Result<Vec<u8>, Error> {
    let proof = hmac_md5(key, &[&server_challenge[..], &client_challenge[..]])?;
    Ok([&proof[..], &client_challenge[..]].concat())
}

fn ntv2_response(
    key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: u64,
    target_info: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut blob = vec![1, 1, 0, 0, 0, 0, 0, 0];
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0; 4]);

    let proof = hmac_md5(key, &[&server_challenge[..], &blob[..]])?;
    Ok([&proof[..], &blob[..]].concat())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn hex(data: &[u8]) -> String {
        data.iter().map(|b| format!("{b:02x}")).collect()
    }

    // MS-NLMP 4.2.1 common values
    const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
    const CLIENT_CHALLENGE: [u8; 8] = [0xaa; 8];

    // MsvAvNbDomainName "Domain", MsvAvNbComputerName "Server", MsvAvEOL
    const TARGET_INFO: &[u8] = b"\x02\x00\x0c\x00D\x00o\x00m\x00a\x00i\x00n\x00\
        \x01\x00\x0c\x00S\x00e\x00r\x00v\x00e\x00r\x00\x00\x00\x00\x00";

    fn auth() -> NtlmAuth {
        NtlmAuth::new(
            "smtp.example.org",
            &Credentials::from(("Domain\\User", "Password")),
            "COMPUTER",
        )
        .unwrap()
    }

    fn challenge_message(target_info: &[u8]) -> Vec<u8> {
        let mut message = Vec::new();
        message.extend_from_slice(SIGNATURE);
        message.extend_from_slice(&CHALLENGE_MESSAGE.to_le_bytes());
        // target name, empty
        message.extend_from_slice(&[0, 0, 0, 0, 48, 0, 0, 0]);
        message.extend_from_slice(&0xe28a_8235u32.to_le_bytes());
        message.extend_from_slice(&SERVER_CHALLENGE);
        message.extend_from_slice(&[0; 8]);
        message.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        message.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        message.extend_from_slice(&48u32.to_le_bytes());
        message.extend_from_slice(target_info);
        message
    }

    #[test]
    fn known_hashes() {
        assert_eq!(hex(&nt_hash("Password")), "a4f49c406510bdcab6824ee7c30fd852");
        assert_eq!(
            hex(&ntowf_v2("User", "Domain", "Password").unwrap()),
            "0c868a403bfd7a93a3001ef22ef02e3f"
        );
    }

    #[test]
    fn known_responses() {
        let key = ntowf_v2("User", "Domain", "Password").unwrap();

        let lm = lmv2_response(&key, &SERVER_CHALLENGE, &CLIENT_CHALLENGE).unwrap();
        assert_eq!(
            hex(&lm),
            "86c35097ac9cec102554764a57cccc19aaaaaaaaaaaaaaaa"
        );

        let nt = ntv2_response(&key, &SERVER_CHALLENGE, &CLIENT_CHALLENGE, 0, TARGET_INFO).unwrap();
        assert_eq!(hex(&nt[..16]), "68cd0ab851e51c96aabc927bebef6a1c");
        assert_eq!(nt.len(), 16 + 28 + TARGET_INFO.len() + 4);
    }

    #[test]
    fn username_needs_domain() {
        let err = NtlmAuth::new("host", &Credentials::from(("user", "pass")), "").unwrap_err();
        assert!(err.is_auth());
        assert_eq!(
            err.to_string(),
            "authentication error: Wrong format of username. The required format is 'domain\\username'"
        );
    }

    #[test]
    fn start_checks() {
        let auth = auth();
        let ntlm = [Mechanism::Ntlm];

        let ok = ServerContext {
            name: "smtp.example.org",
            tls: false,
            mechanisms: &ntlm,
        };
        assert!(auth.start(&ok).is_ok());

        let wrong_host = ServerContext {
            name: "SMTP.example.org",
            ..ok
        };
        assert!(auth.start(&wrong_host).unwrap_err().is_auth());

        let not_advertised = ServerContext {
            mechanisms: &[Mechanism::Plain],
            ..ok
        };
        assert!(auth.start(&not_advertised).unwrap_err().is_auth());

        let over_tls = ServerContext {
            tls: true,
            ..not_advertised
        };
        assert!(auth.start(&over_tls).is_ok());
    }

    #[test]
    fn negotiate() {
        let message = auth().next(NTLM_SUPPORTED).unwrap();

        assert_eq!(&message[..8], SIGNATURE);
        assert_eq!(read_u32(&message, 8), Some(NEGOTIATE_MESSAGE));
        let flags = read_u32(&message, 12).unwrap();
        assert_eq!(flags & NEGOTIATE_FLAGS, NEGOTIATE_FLAGS);
        assert_ne!(flags & NEGOTIATE_OEM_DOMAIN_SUPPLIED, 0);
        // domain then workstation, right after the header
        assert_eq!(&message[32..], b"DomainCOMPUTER");
        assert_eq!(read_u16(&message, 16), Some(6));
        assert_eq!(read_u32(&message, 20), Some(32));
        assert_eq!(read_u16(&message, 24), Some(8));
        assert_eq!(read_u32(&message, 28), Some(38));
    }

    #[test]
    fn authenticate() {
        let challenge = challenge_message(TARGET_INFO);
        let message = auth()
            .authenticate_message(&challenge, CLIENT_CHALLENGE)
            .unwrap();

        assert_eq!(&message[..8], SIGNATURE);
        assert_eq!(read_u32(&message, 8), Some(AUTHENTICATE_MESSAGE));

        let field = |at: usize| {
            let len = read_u16(&message, at).unwrap() as usize;
            let offset = read_u32(&message, at + 4).unwrap() as usize;
            &message[offset..offset + len]
        };
        assert_eq!(hex(&field(12)[..16]), "86c35097ac9cec102554764a57cccc19");
        assert_eq!(field(28), utf16le("Domain"));
        assert_eq!(field(36), utf16le("User"));
        assert_eq!(field(44), utf16le("COMPUTER"));
        assert!(field(52).is_empty());

        let nt = field(20);
        assert_eq!(&nt[16..24], &[1, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&nt[32..40], &CLIENT_CHALLENGE);
        assert_eq!(&nt[44..44 + TARGET_INFO.len()], TARGET_INFO);
        assert_ne!(read_u32(&message, 60).unwrap() & NEGOTIATE_UNICODE, 0);
    }

    #[test]
    fn server_timestamp_is_used() {
        let mut target_info = vec![0x07, 0x00, 0x08, 0x00];
        target_info.extend_from_slice(&0x01d0_0000_0000_0000u64.to_le_bytes());
        target_info.extend_from_slice(&[0, 0, 0, 0]);

        let message = challenge_message(&target_info);
        let challenge = Challenge::parse(&message).unwrap();
        assert_eq!(challenge.timestamp(), Some(0x01d0_0000_0000_0000));

        let message = challenge_message(TARGET_INFO);
        assert_eq!(Challenge::parse(&message).unwrap().timestamp(), None);
    }

    #[test]
    fn server_timestamp_zeroes_lm_response() {
        let mut target_info = vec![0x07, 0x00, 0x08, 0x00];
        target_info.extend_from_slice(&0x01d0_0000_0000_0000u64.to_le_bytes());
        target_info.extend_from_slice(&[0, 0, 0, 0]);

        let message = auth()
            .authenticate_message(&challenge_message(&target_info), CLIENT_CHALLENGE)
            .unwrap();
        let len = read_u16(&message, 12).unwrap() as usize;
        let offset = read_u32(&message, 16).unwrap() as usize;
        assert_eq!(&message[offset..offset + len], &[0; 24]);

        // the NT response still carries the server's timestamp
        let len = read_u16(&message, 20).unwrap() as usize;
        let offset = read_u32(&message, 24).unwrap() as usize;
        let nt = &message[offset..offset + len];
        assert_eq!(&nt[24..32], &0x01d0_0000_0000_0000u64.to_le_bytes());
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let username = format!("Domain\\{}", "u".repeat(40_000));
        let auth = NtlmAuth::new(
            "smtp.example.org",
            &Credentials::from((username.as_str(), "Password")),
            "COMPUTER",
        )
        .unwrap();

        let err = auth
            .authenticate_message(&challenge_message(TARGET_INFO), CLIENT_CHALLENGE)
            .unwrap_err();
        assert!(err.is_auth());

        let long_workstation = NtlmAuth::new(
            "smtp.example.org",
            &Credentials::from(("Domain\\User", "Password")),
            &"w".repeat(70_000),
        )
        .unwrap();
        assert!(long_workstation.next(NTLM_SUPPORTED).unwrap_err().is_auth());
    }

    #[test]
    fn base64_challenge() {
        let challenge = crate::base64::encode(challenge_message(TARGET_INFO));
        let message = auth().next(&challenge).unwrap();
        assert_eq!(read_u32(&message, 8), Some(AUTHENTICATE_MESSAGE));
    }

    #[test]
    fn malformed_challenges() {
        let auth = auth();
        assert!(auth.next("%%% not base64 %%%").unwrap_err().is_auth());
        assert!(auth
            .next(&crate::base64::encode(b"too short"))
            .unwrap_err()
            .is_auth());

        let mut wrong_type = challenge_message(&[]);
        wrong_type[8] = 3;
        assert!(auth
            .next(&crate::base64::encode(wrong_type))
            .unwrap_err()
            .is_auth());

        let mut out_of_bounds = challenge_message(TARGET_INFO);
        out_of_bounds.truncate(60);
        assert!(auth
            .next(&crate::base64::encode(out_of_bounds))
            .unwrap_err()
            .is_auth());
    }
}
