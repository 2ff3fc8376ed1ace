use std::iter;

use crate::message::header::{HeaderName, Headers, Params};

/// Length of the random part of a boundary
const BOUNDARY_LEN: usize = 30;

/// How a part is presented by the reader's mail client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Shown next to the message body
    Inline,
    /// Offered as a separate file
    Attachment,
}

impl Disposition {
    fn as_str(self) -> &'static str {
        match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        }
    }
}

/// A base64 encoded body part
///
/// # Example
///
/// ```
/// use relaymail::message::{Disposition, SinglePart};
///
/// let part = SinglePart::base64(
///     "text/plain; charset=utf-8",
///     Disposition::Attachment,
///     Some("notes.txt"),
///     b"meeting at noon",
/// );
/// assert_eq!(
///     part.headers().get_raw("Content-Disposition"),
///     Some("attachment; filename=\"notes.txt\"")
/// );
/// ```
#[derive(Debug, Clone)]
pub struct SinglePart {
    headers: Headers,
    body: Vec<u8>,
}

impl SinglePart {
    /// Builds a part carrying `data` as wrapped base64
    ///
    /// With a file name, `Content-Type` gets a `name` parameter,
    /// `Content-Disposition` a `filename` parameter, and the name is
    /// repeated in `Content-Description`.
    pub fn base64(
        content_type: &str,
        disposition: Disposition,
        filename: Option<&str>,
        data: &[u8],
    ) -> Self {
        let mut headers = Headers::new();
        headers.set_raw(HeaderName::CONTENT_TRANSFER_ENCODING, "base64".to_owned());

        let (type_params, disposition_params) = match filename {
            Some(filename) => (
                Params::new().with("name", filename),
                Params::new().with("filename", filename),
            ),
            None => (Params::new(), Params::new()),
        };
        headers.set_value(HeaderName::CONTENT_TYPE, content_type, &type_params);
        headers.set_value(
            HeaderName::CONTENT_DISPOSITION,
            disposition.as_str(),
            &disposition_params,
        );
        if let Some(filename) = filename {
            headers.set_text(HeaderName::CONTENT_DESCRIPTION, filename);
        }

        let mut body = Vec::with_capacity(data.len() * 4 / 3 + data.len() / 28 + 4);
        crate::base64::encode_wrapped(data, &mut body);

        SinglePart { headers, body }
    }

    /// Get the headers from singlepart
    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get the encoded body
    #[inline]
    pub fn raw_body(&self) -> &[u8] {
        &self.body
    }

    fn format(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.headers.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
    }
}

/// Create a random MIME boundary
///
/// The `=_` prefix can never show up in base64 or in a plain text line
/// starting with `--`, so the boundary needs no collision check.
fn make_boundary() -> String {
    iter::once('=')
        .chain(iter::once('_'))
        .chain(iter::repeat_with(fastrand::alphanumeric).take(BOUNDARY_LEN))
        .collect()
}

/// A `multipart/mixed` body
#[derive(Debug, Clone)]
pub struct MultiPart {
    boundary: String,
    parts: Vec<SinglePart>,
}

impl MultiPart {
    /// Creates an empty `multipart/mixed` body with a random boundary
    pub fn mixed() -> Self {
        MultiPart {
            boundary: make_boundary(),
            parts: Vec::new(),
        }
    }

    /// Add part to multipart
    pub fn part(mut self, part: SinglePart) -> Self {
        self.parts.push(part);
        self
    }

    /// Get the boundary of multipart contents
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Get the parts from the multipart
    pub fn parts(&self) -> &[SinglePart] {
        &self.parts
    }

    /// Parameters for the enclosing `Content-Type: multipart/mixed` field
    pub fn content_type_params(&self) -> Params {
        Params::new().with("boundary", self.boundary.as_str())
    }

    /// Writes every part, each introduced by the boundary, and the
    /// closing delimiter
    pub fn format(&self, out: &mut Vec<u8>) {
        for part in &self.parts {
            out.extend_from_slice(b"--");
            out.extend_from_slice(self.boundary.as_bytes());
            out.extend_from_slice(b"\r\n");
            part.format(out);
        }

        out.extend_from_slice(b"--");
        out.extend_from_slice(self.boundary.as_bytes());
        out.extend_from_slice(b"--\r\n");
    }

    /// Get message content formatted for SMTP
    pub fn formatted(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.format(&mut out);
        out
    }
}
