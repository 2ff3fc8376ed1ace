//! Header block of a message
//!
//! Values are stored already encoded, in insertion order, and folded at
//! whitespace when written out.
// https://tools.ietf.org/html/rfc5322#section-2.2

use std::{
    borrow::Cow,
    fmt::{self, Display},
    ops::Deref,
    time::SystemTime,
};

mod date;
mod mailbox;
mod params;

pub use self::{
    date::format_date,
    params::{ParamValue, Params},
};
use crate::message::Mailboxes;

/// Maximum length of a header line, CRLF excluded
const MAX_LINE_LEN: usize = 76;

/// Raw bytes per encoded word, so that the word stays under 75 characters
const MAX_ENCODED_CHUNK: usize = 45;

/// Ordered collection of header fields
///
/// Setting a field that already exists replaces its value in place, so the
/// order of the block is the order in which fields were first set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(HeaderName, String)>,
}

impl Headers {
    /// Creates an empty header block
    #[inline]
    pub const fn new() -> Self {
        Self {
            headers: Vec::new(),
        }
    }

    /// Sets a free text field, using encoded words when the text is not
    /// plain printable ASCII
    pub fn set_text(&mut self, name: HeaderName, value: &str) {
        self.set_raw(name, encode_text(value).into_owned());
    }

    /// Sets a date field, formatted like `Tue, 15 Nov 1994 08:12:31 +0000`
    pub fn set_date(&mut self, name: HeaderName, value: SystemTime) {
        self.set_raw(name, format_date(value));
    }

    /// Sets an address list field, rendered as `a@x.com, Name <b@x.com>`
    pub fn set_addresses(&mut self, name: HeaderName, value: &Mailboxes) {
        self.set_raw(name, mailbox::encode_mailboxes(value));
    }

    /// Sets a field made of a main value followed by `; key=value` parameters
    ///
    /// ```
    /// use relaymail::message::header::{HeaderName, Headers, Params};
    ///
    /// let mut headers = Headers::new();
    /// headers.set_value(
    ///     HeaderName::CONTENT_DISPOSITION,
    ///     "attachment",
    ///     &Params::new().with("filename", "report.pdf").with("size", 4096u64),
    /// );
    /// assert_eq!(
    ///     headers.get_raw("Content-Disposition"),
    ///     Some(r#"attachment; filename="report.pdf"; size=4096"#)
    /// );
    /// ```
    pub fn set_value(&mut self, name: HeaderName, value: &str, params: &Params) {
        let mut raw = encode_text(value).into_owned();
        params.write_to(&mut raw);
        self.set_raw(name, raw);
    }

    /// Sets a field to a value that is already encoded
    pub fn set_raw(&mut self, name: HeaderName, value: String) {
        match self.find_header_mut(&name) {
            Some(current_value) => {
                *current_value = value;
            }
            None => {
                self.headers.push((name, value));
            }
        }
    }

    /// Returns the encoded value of the field called `name`, ignoring case
    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name_, _value)| name.eq_ignore_ascii_case(name_))
            .map(|(_name, value)| value.as_str())
    }

    /// Removes the field called `name` and returns it
    pub fn remove_raw(&mut self, name: &str) -> Option<(HeaderName, String)> {
        let index = self
            .headers
            .iter()
            .position(|(name_, _value)| name.eq_ignore_ascii_case(name_))?;
        Some(self.headers.remove(index))
    }

    /// Fields in the order they are written
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &str)> {
        self.headers
            .iter()
            .map(|(name, value)| (name, value.as_str()))
    }

    /// Number of fields
    #[inline]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether the block has no field
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    fn find_header_mut(&mut self, name: &str) -> Option<&mut String> {
        self.headers
            .iter_mut()
            .find(|(name_, _value)| name.eq_ignore_ascii_case(name_))
            .map(|(_name, value)| value)
    }
}

impl Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            write_folded(f, name, value)?;
            f.write_str("\r\n")?;
        }

        Ok(())
    }
}

/// Writes `name: value`, turning a space into a line break whenever the
/// next word would overflow the line. Words are never split.
fn write_folded(f: &mut fmt::Formatter<'_>, name: &str, value: &str) -> fmt::Result {
    f.write_str(name)?;
    f.write_str(":")?;

    let start = name.len() + 1;
    let mut line_len = start;
    for word in value.split(' ') {
        // a run of spaces stays on the current line, so no folded line is blank
        if !word.is_empty() && line_len > start && line_len + 1 + word.len() > MAX_LINE_LEN {
            f.write_str("\r\n")?;
            line_len = 0;
        }
        f.write_str(" ")?;
        f.write_str(word)?;
        line_len += 1 + word.len();
    }

    Ok(())
}

/// Encodes free text for a header, following RFC 2047
///
/// Printable ASCII goes through untouched. Anything else is turned into
/// `=?utf-8?b?...?=` words separated by spaces, each one short enough to
/// fit on a folded line. Characters are never split across words.
pub(crate) fn encode_text(value: &str) -> Cow<'_, str> {
    if value.chars().all(allowed_char) && !value.contains("=?") {
        return Cow::Borrowed(value);
    }

    let mut encoded = String::with_capacity(value.len() * 2);
    let mut chunk_start = 0;
    let mut chunk_end = 0;
    for (i, c) in value.char_indices() {
        if i + c.len_utf8() - chunk_start > MAX_ENCODED_CHUNK {
            push_encoded_word(&mut encoded, &value[chunk_start..chunk_end]);
            chunk_start = i;
        }
        chunk_end = i + c.len_utf8();
    }
    push_encoded_word(&mut encoded, &value[chunk_start..chunk_end]);

    Cow::Owned(encoded)
}

fn push_encoded_word(out: &mut String, chunk: &str) {
    if chunk.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str("=?utf-8?b?");
    out.push_str(&crate::base64::encode(chunk));
    out.push_str("?=");
}

fn allowed_char(c: char) -> bool {
    c == '\t' || (' '..='~').contains(&c)
}

/// Name of a header field
#[derive(Debug, Clone)]
pub struct HeaderName(Cow<'static, str>);

impl HeaderName {
    /// `MIME-Version`
    pub const MIME_VERSION: HeaderName = HeaderName::new_static("MIME-Version");
    /// `Subject`
    pub const SUBJECT: HeaderName = HeaderName::new_static("Subject");
    /// `Date`
    pub const DATE: HeaderName = HeaderName::new_static("Date");
    /// `From`
    pub const FROM: HeaderName = HeaderName::new_static("From");
    /// `To`
    pub const TO: HeaderName = HeaderName::new_static("To");
    /// `Cc`
    pub const CC: HeaderName = HeaderName::new_static("Cc");
    /// `Bcc`
    pub const BCC: HeaderName = HeaderName::new_static("Bcc");
    /// `Reply-To`
    pub const REPLY_TO: HeaderName = HeaderName::new_static("Reply-To");
    /// `Content-Type`
    pub const CONTENT_TYPE: HeaderName = HeaderName::new_static("Content-Type");
    /// `Content-Transfer-Encoding`
    pub const CONTENT_TRANSFER_ENCODING: HeaderName =
        HeaderName::new_static("Content-Transfer-Encoding");
    /// `Content-Disposition`
    pub const CONTENT_DISPOSITION: HeaderName = HeaderName::new_static("Content-Disposition");
    /// `Content-Description`
    pub const CONTENT_DESCRIPTION: HeaderName = HeaderName::new_static("Content-Description");

    /// Builds a header name, checking it is a valid RFC 5322 field name
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        valid_name(name.as_bytes()).then_some(Self(Cow::Owned(name)))
    }

    /// Const constructor for well known names
    ///
    /// # Panics
    ///
    /// If `name` is empty, longer than 76 bytes, or contains a byte that
    /// is not allowed in a field name.
    pub const fn new_static(name: &'static str) -> Self {
        assert!(valid_name(name.as_bytes()), "invalid header name");
        Self(Cow::Borrowed(name))
    }
}

const fn valid_name(bytes: &[u8]) -> bool {
    if bytes.is_empty() || bytes.len() > MAX_LINE_LEN {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        // ftext = %d33-57 / %d59-126
        if bytes[i] < 33 || bytes[i] > 126 || bytes[i] == b':' {
            return false;
        }
        i += 1;
    }
    true
}

impl Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self)
    }
}

impl Deref for HeaderName {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for HeaderName {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &HeaderName) -> bool {
        self.eq_ignore_ascii_case(other)
    }
}

impl Eq for HeaderName {}

impl PartialEq<&str> for HeaderName {
    fn eq(&self, other: &&str) -> bool {
        self.eq_ignore_ascii_case(other)
    }
}
