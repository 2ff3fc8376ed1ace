//! Blocking SMTP client
//!
//! [`SmtpConnection`] speaks the protocol over a [`NetworkStream`], which is
//! either a plain TCP socket or the same socket wrapped by rustls.
//! [`probe_tls`] is the heuristic used to guess which one a port expects.

#[cfg(feature = "tracing")]
use std::borrow::Cow;

pub use self::{
    connection::SmtpConnection,
    net::NetworkStream,
    probe::probe_tls,
    tls::{
        Certificate, CertificateStore, TlsMode, TlsParameters, TlsParametersBuilder, TlsVersion,
    },
};

mod connection;
mod net;
mod probe;
mod tls;

/// The codec used for transparency
#[derive(Debug, Default)]
struct ClientCodec {
    status: CodecStatus,
}

impl ClientCodec {
    /// Creates a new client codec
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds transparency
    ///
    /// A `.` starting a line is doubled, so the body can never contain the
    /// `CRLF.CRLF` terminator. The start of the stream counts as the start of
    /// a line.
    fn encode(&mut self, frame: &[u8], buf: &mut Vec<u8>) {
        let mut start = 0;
        for (idx, byte) in frame.iter().enumerate() {
            match self.status {
                CodecStatus::StartOfNewLine if *byte == b'.' => {
                    buf.extend_from_slice(&frame[start..idx]);
                    buf.push(b'.');
                    start = idx;
                    self.status = CodecStatus::Normal;
                }
                CodecStatus::StartingNewLine if *byte == b'\n' => {
                    self.status = CodecStatus::StartOfNewLine;
                }
                _ if *byte == b'\r' => {
                    self.status = CodecStatus::StartingNewLine;
                }
                _ => {
                    self.status = CodecStatus::Normal;
                }
            }
        }
        buf.extend_from_slice(&frame[start..]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecStatus {
    /// Midway through a line
    Normal,
    /// Just after a `\r`
    StartingNewLine,
    /// Just after a `\r\n`
    StartOfNewLine,
}

impl Default for CodecStatus {
    fn default() -> Self {
        CodecStatus::StartOfNewLine
    }
}

/// Returns the string replacing all the CRLF with "\<CRLF\>"
///
/// Used for debug displays
#[cfg(feature = "tracing")]
fn escape_crlf(string: &str) -> Cow<'_, str> {
    if string.contains("\r\n") {
        Cow::Owned(string.replace("\r\n", "<CRLF>"))
    } else {
        Cow::Borrowed(string)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn codec() {
        let mut codec = ClientCodec::new();
        let mut buf: Vec<u8> = vec![];

        codec.encode(b".leading dot\r\n", &mut buf);
        codec.encode(b"test\r\n", &mut buf);
        codec.encode(b".\r\n", &mut buf);
        codec.encode(b"\r\ntest", &mut buf);
        codec.encode(b"te\r\n.\r\nst", &mut buf);
        codec.encode(b"test", &mut buf);
        codec.encode(b"test.", &mut buf);
        codec.encode(b"test\n", &mut buf);
        codec.encode(b".test\n", &mut buf);
        codec.encode(b"test", &mut buf);
        codec.encode(b"test\r", &mut buf);
        codec.encode(b"\n.split across frames", &mut buf);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "..leading dot\r\ntest\r\n..\r\n\r\ntestte\r\n..\r\nsttesttest.test\n.test\ntesttest\r\n..split across frames"
        );
    }

    #[test]
    fn codec_leaves_plain_text_alone() {
        let mut codec = ClientCodec::new();
        let mut buf = Vec::new();
        codec.encode(b"Subject: hi\r\n\r\nhello. world.\r\n", &mut buf);
        assert_eq!(buf, b"Subject: hi\r\n\r\nhello. world.\r\n");
    }

    #[test]
    #[cfg(feature = "tracing")]
    fn test_escape_crlf() {
        assert_eq!(escape_crlf("\r\n"), "<CRLF>");
        assert_eq!(escape_crlf("EHLO my_name\r\n"), "EHLO my_name<CRLF>");
        assert_eq!(
            escape_crlf("EHLO my_name\r\nSIZE 42\r\n"),
            "EHLO my_name<CRLF>SIZE 42<CRLF>"
        );
        assert_eq!(escape_crlf("no line ending"), "no line ending");
    }
}
