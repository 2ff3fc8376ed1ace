//! Builds the bytes that travel through `DATA`
//!
//! ## Usage
//!
//! An [`Envelope`] collects what the caller wants to send. Encoding it
//! produces the header block and body, plus the `MAIL FROM` and `RCPT TO`
//! addresses derived from the same fields.
//!
//! ```rust
//! use relaymail::message::{Attachment, Envelope};
//!
//! # use std::error::Error;
//! # fn main() -> Result<(), Box<dyn Error>> {
//! let mut envelope = Envelope::new("Hei <hei@domain.tld>; yuin@domain.tld", "Happy new year", "Be happy!")
//!     .from("NoBody <nobody@domain.tld>")
//!     .cc("Ann <ann@domain.tld>");
//! envelope.attach(Attachment::new("card.txt", b"Greetings".to_vec()));
//!
//! let message = envelope.encode(None)?;
//! assert_eq!(message.envelope_from().to_string(), "nobody@domain.tld");
//! assert_eq!(message.recipients().len(), 3);
//! assert_eq!(message.headers().get_raw("To"), Some("Hei <hei@domain.tld>, yuin@domain.tld"));
//! # Ok(())
//! # }
//! ```
//!
//! Without attachments the body is sent as is, with a `Content-Type`
//! sniffed from its first bytes unless one was given. With attachments the
//! message becomes `multipart/mixed`: the body first, then one base64 part
//! per attachment, in the order they were attached.

use std::time::SystemTime;

use mime::Mime;

pub use self::{
    mailbox::{Mailbox, Mailboxes},
    mimebody::{Disposition, MultiPart, SinglePart},
};
use self::{
    header::{HeaderName, Headers},
    mailbox::normalize_list,
};
use crate::{address::Address, error, Error};

pub mod header;
mod mailbox;
mod mimebody;
pub mod sniff;

/// A file carried by a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Name shown to the recipient, unique within an envelope
    pub filename: String,
    /// Raw content
    pub data: Vec<u8>,
    /// Rendered next to the body instead of as a separate file
    pub inline: bool,
}

impl Attachment {
    /// A regular attachment
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Attachment {
            filename: filename.into(),
            data,
            inline: false,
        }
    }

    /// An attachment with `Content-Disposition: inline`
    pub fn inline(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Attachment {
            inline: true,
            ..Attachment::new(filename, data)
        }
    }

    /// Rejects names that cannot be carried by a header parameter
    fn check_filename(&self) -> Result<(), Error> {
        if self.filename.trim().is_empty() {
            return Err(error::encoding("attachment without a file name"));
        }
        if self.filename.chars().any(char::is_control) {
            return Err(error::encoding(format!(
                "control character in attachment file name {:?}",
                self.filename
            )));
        }
        Ok(())
    }

    fn disposition(&self) -> Disposition {
        if self.inline {
            Disposition::Inline
        } else {
            Disposition::Attachment
        }
    }
}

/// Everything needed to compose one message
///
/// Address fields are kept as text and parsed when the envelope is
/// encoded. Each of them may hold a list separated by `,` or `;`.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    /// Sender, overrides the one configured on the client
    pub from: Option<String>,
    /// Primary recipients
    pub to: String,
    /// Carbon copy recipients
    pub cc: Vec<String>,
    /// Blind carbon copy recipients, who get a `RCPT` but no header
    pub bcc: Vec<String>,
    /// Where answers should go, when not to the sender
    pub reply_to: Option<String>,
    /// Plain text, encoded when it is not ASCII
    pub subject: String,
    /// Content of the single part, or of the first part with attachments
    pub body: Vec<u8>,
    /// Type of the body, sniffed when not set
    pub content_type: Option<Mime>,
    /// Also write the `Bcc` header, which is left out by default
    pub keep_bcc: bool,
    attachments: Vec<Attachment>,
}

impl Envelope {
    /// Creates an envelope without sender, copies or attachments
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Envelope {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            ..Envelope::default()
        }
    }

    /// Sets the sender
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Adds a carbon copy recipient list
    pub fn cc(mut self, cc: impl Into<String>) -> Self {
        self.cc.push(cc.into());
        self
    }

    /// Adds a blind carbon copy recipient list
    pub fn bcc(mut self, bcc: impl Into<String>) -> Self {
        self.bcc.push(bcc.into());
        self
    }

    /// Sets the `Reply-To` address
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the body type instead of sniffing it
    pub fn content_type(mut self, content_type: Mime) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Writes the `Bcc` header too
    pub fn keep_bcc(mut self) -> Self {
        self.keep_bcc = true;
        self
    }

    /// Adds an attachment
    ///
    /// An attachment with the same file name is replaced where it stands.
    pub fn attach(&mut self, attachment: Attachment) {
        match self
            .attachments
            .iter_mut()
            .find(|a| a.filename == attachment.filename)
        {
            Some(existing) => *existing = attachment,
            None => self.attachments.push(attachment),
        }
    }

    /// Attachments in the order they will be written
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Removes an attachment by file name
    pub fn detach(&mut self, filename: &str) -> Option<Attachment> {
        let index = self.attachments.iter().position(|a| a.filename == filename)?;
        Some(self.attachments.remove(index))
    }

    /// Encodes the message
    ///
    /// `default_from` is used when the envelope has no sender of its own.
    /// Recipients from `To`, `Cc` and `Bcc` are returned in that order,
    /// duplicates included.
    pub fn encode(&self, default_from: Option<&Mailbox>) -> Result<EncodedMessage, Error> {
        let from = match self.from.as_deref() {
            Some(from) => from.trim().parse::<Mailbox>()?,
            None => default_from
                .cloned()
                .ok_or_else(|| error::address("missing sender address"))?,
        };
        let to = parse_lists(Some(self.to.as_str()))?;
        let cc = parse_lists(self.cc.iter().map(String::as_str))?;
        let bcc = parse_lists(self.bcc.iter().map(String::as_str))?;
        let reply_to = parse_lists(self.reply_to.as_deref())?;

        let recipients: Vec<Address> = to
            .iter()
            .chain(&cc)
            .chain(&bcc)
            .map(|mailbox| mailbox.email.clone())
            .collect();
        if recipients.is_empty() {
            return Err(error::address("no recipient addresses"));
        }

        let mut headers = Headers::new();
        headers.set_raw(HeaderName::MIME_VERSION, "1.0".to_owned());
        headers.set_text(HeaderName::SUBJECT, &self.subject);
        headers.set_date(HeaderName::DATE, SystemTime::now());
        headers.set_addresses(HeaderName::FROM, &Mailboxes::from(from.clone()));
        if !to.is_empty() {
            headers.set_addresses(HeaderName::TO, &to);
        }
        if !cc.is_empty() {
            headers.set_addresses(HeaderName::CC, &cc);
        }
        if self.keep_bcc && !bcc.is_empty() {
            headers.set_addresses(HeaderName::BCC, &bcc);
        }
        if !reply_to.is_empty() {
            headers.set_addresses(HeaderName::REPLY_TO, &reply_to);
        }

        let body_type = match &self.content_type {
            Some(mime) => mime.to_string(),
            None => sniff::detect_content_type(&self.body).to_owned(),
        };

        for attachment in &self.attachments {
            attachment.check_filename()?;
        }

        let body = if self.attachments.is_empty() {
            headers.set_raw(HeaderName::CONTENT_TYPE, body_type);
            self.body.clone()
        } else {
            let multipart = self.attachments.iter().fold(
                MultiPart::mixed().part(SinglePart::base64(
                    &body_type,
                    Disposition::Inline,
                    None,
                    &self.body,
                )),
                |multipart, attachment| {
                    multipart.part(SinglePart::base64(
                        sniff::detect_content_type(&attachment.data),
                        attachment.disposition(),
                        Some(attachment.filename.as_str()),
                        &attachment.data,
                    ))
                },
            );
            headers.set_value(
                HeaderName::CONTENT_TYPE,
                "multipart/mixed",
                &multipart.content_type_params(),
            );
            multipart.formatted()
        };

        Ok(EncodedMessage {
            from: from.email,
            recipients,
            headers,
            body,
        })
    }
}

/// Parses every list and concatenates the results, skipping blank ones
fn parse_lists<'a>(lists: impl IntoIterator<Item = &'a str>) -> Result<Mailboxes, Error> {
    let mut mailboxes = Mailboxes::new();
    for list in lists {
        let normalized = normalize_list(list);
        if normalized.is_empty() {
            continue;
        }
        mailboxes.extend(normalized.parse::<Mailboxes>()?);
    }
    Ok(mailboxes)
}

/// A message ready to be sent
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    from: Address,
    recipients: Vec<Address>,
    headers: Headers,
    body: Vec<u8>,
}

impl EncodedMessage {
    /// Address for `MAIL FROM`
    pub fn envelope_from(&self) -> &Address {
        &self.from
    }

    /// Addresses for `RCPT TO`, one command each
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    /// Headers in the order they are written
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Encoded body, after the empty line
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Header block, an empty line, then the body
    pub fn formatted(&self) -> Vec<u8> {
        let headers = self.headers.to_string();
        let mut out = Vec::with_capacity(headers.len() + 2 + self.body.len());
        out.extend_from_slice(headers.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    /// Whether the body needs the 8BITMIME extension
    pub(crate) fn is_8bit(&self) -> bool {
        !self.body.is_ascii()
    }

    /// Whether some envelope address needs the SMTPUTF8 extension
    pub(crate) fn requires_smtputf8(&self) -> bool {
        !self.from.is_ascii() || self.recipients.iter().any(|r| !r.is_ascii())
    }
}
