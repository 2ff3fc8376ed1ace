use std::{
    fmt::{Display, Formatter, Result as FmtResult, Write},
    slice::Iter,
    str::FromStr,
    vec::IntoIter,
};

use chumsky::prelude::*;

use super::parsers;
use crate::address::{Address, AddressError};

/// An address with an optional display name
///
/// ```
/// use relaymail::message::Mailbox;
///
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let mailbox: Mailbox = "Postmaster <postmaster@example.org>".parse()?;
/// assert_eq!(mailbox.name.as_deref(), Some("Postmaster"));
/// assert_eq!(mailbox.email.to_string(), "postmaster@example.org");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Mailbox {
    /// The name associated with the address.
    pub name: Option<String>,

    /// The email address itself.
    pub email: Address,
}

impl Mailbox {
    /// Creates a new `Mailbox` from an address and an optional display name
    pub fn new(name: Option<String>, email: Address) -> Self {
        Mailbox { name, email }
    }

    /// The trimmed display name, if it has any content
    pub(crate) fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.display_name() {
            Some(name) => {
                write_word(f, name)?;
                write!(f, " <{}>", self.email)
            }
            None => self.email.fmt(f),
        }
    }
}

impl FromStr for Mailbox {
    type Err = AddressError;

    fn from_str(src: &str) -> Result<Mailbox, Self::Err> {
        let (name, (user, domain)) = parsers::mailbox()
            .parse(src.trim())
            .map_err(|_errs| AddressError::InvalidInput)?;

        Ok(Mailbox::new(name, Address::new(user, domain)?))
    }
}

impl From<Address> for Mailbox {
    fn from(value: Address) -> Self {
        Self::new(None, value)
    }
}

/// A sequence of [`Mailbox`] values, rendered comma separated
#[derive(Debug, Clone, Default, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Mailboxes(Vec<Mailbox>);

impl Mailboxes {
    /// An empty list
    pub fn new() -> Self {
        Mailboxes(Vec::new())
    }

    /// Parses a list that may mix `,` and `;` as separators
    ///
    /// Semicolons outside quoted strings, comments and angle brackets are
    /// read as commas, and empty entries are skipped.
    ///
    /// ```
    /// use relaymail::message::Mailboxes;
    ///
    /// # use std::error::Error;
    /// # fn main() -> Result<(), Box<dyn Error>> {
    /// let list = Mailboxes::parse_lenient("a@x.com; b@x.com,c@x.com;")?;
    /// assert_eq!(list.to_string(), "a@x.com, b@x.com, c@x.com");
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse_lenient(src: &str) -> Result<Self, AddressError> {
        normalize_list(src).parse()
    }

    /// Adds a mailbox to the end of the list
    pub fn push(&mut self, mbox: Mailbox) {
        self.0.push(mbox);
    }

    /// Number of mailboxes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the mailboxes in order
    pub fn iter(&self) -> Iter<'_, Mailbox> {
        self.0.iter()
    }
}

impl From<Mailbox> for Mailboxes {
    fn from(mailbox: Mailbox) -> Self {
        Mailboxes(vec![mailbox])
    }
}

impl FromIterator<Mailbox> for Mailboxes {
    fn from_iter<T: IntoIterator<Item = Mailbox>>(iter: T) -> Self {
        Mailboxes(Vec::from_iter(iter))
    }
}

impl Extend<Mailbox> for Mailboxes {
    fn extend<T: IntoIterator<Item = Mailbox>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Mailboxes {
    type Item = Mailbox;
    type IntoIter = IntoIter<Mailbox>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Mailboxes {
    type Item = &'a Mailbox;
    type IntoIter = Iter<'a, Mailbox>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for Mailboxes {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let mut iter = self.iter();

        if let Some(mbox) = iter.next() {
            mbox.fmt(f)?;

            for mbox in iter {
                f.write_str(", ")?;
                mbox.fmt(f)?;
            }
        }

        Ok(())
    }
}

impl FromStr for Mailboxes {
    type Err = AddressError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let parsed = parsers::mailbox_list()
            .parse(src.trim())
            .map_err(|_errs| AddressError::InvalidInput)?;

        parsed
            .into_iter()
            .map(|(name, (user, domain))| -> Result<Mailbox, AddressError> {
                Ok(Mailbox::new(name, Address::new(user, domain)?))
            })
            .collect()
    }
}

/// Rewrites a `;` or `,` separated list into the canonical `a, b` form
///
/// Separators inside quoted strings, comments or angle brackets are kept.
/// Empty entries, such as the one left by a trailing separator, are dropped.
pub(crate) fn normalize_list(src: &str) -> String {
    let mut entries = Vec::new();
    let mut current = String::new();
    let (mut quoted, mut escaped) = (false, false);
    let (mut comment_depth, mut angle_depth) = (0usize, 0usize);

    for c in src.chars() {
        if escaped {
            escaped = false;
            current.push(c);
            continue;
        }

        match c {
            '\\' if quoted || comment_depth > 0 => escaped = true,
            '"' if comment_depth == 0 => quoted = !quoted,
            '(' if !quoted => comment_depth += 1,
            ')' if !quoted => comment_depth = comment_depth.saturating_sub(1),
            '<' if !quoted && comment_depth == 0 => angle_depth += 1,
            '>' if !quoted && comment_depth == 0 => angle_depth = angle_depth.saturating_sub(1),
            ',' | ';' if !quoted && comment_depth == 0 && angle_depth == 0 => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    entries.push(current);

    let entries: Vec<&str> = entries
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .collect();
    entries.join(", ")
}

// https://datatracker.ietf.org/doc/html/rfc2822#section-3.2.6
fn write_word(f: &mut Formatter<'_>, s: &str) -> FmtResult {
    if s.bytes().all(is_atom_or_space) {
        return f.write_str(s);
    }

    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '\r' | '\n' => return Err(std::fmt::Error),
            '"' | '\\' => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

// atext plus the blanks that may separate atoms in a phrase
fn is_atom_or_space(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b' ' | b'\t'
                | b'!'
                | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'/'
                | b'='
                | b'?'
                | b'^'
                | b'_'
                | b'`'
                | b'{'
                | b'|'
                | b'}'
                | b'~'
                | 128..=255
        )
}
