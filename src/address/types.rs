//! Representation of an email address

use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    net::IpAddr,
    str::FromStr,
};

use email_address::EmailAddress;
use idna::domain_to_ascii;

/// A validated email address in canonical `user@domain` form
///
/// This is what goes into `MAIL FROM` and `RCPT TO`; display names live in
/// [`Mailbox`](crate::message::Mailbox).
///
/// ```
/// use relaymail::Address;
///
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let address = "postmaster@example.org".parse::<Address>()?;
/// assert_eq!(address.user(), "postmaster");
/// assert_eq!(address.domain(), "example.org");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Address {
    serialized: String,
    /// Byte offset of the '@'
    at: usize,
}

impl Address {
    /// Builds an address from its two halves, validating both
    pub fn new<U: AsRef<str>, D: AsRef<str>>(user: U, domain: D) -> Result<Self, AddressError> {
        let (user, domain) = (user.as_ref(), domain.as_ref());
        Address::check_user(user)?;
        Address::check_domain(domain)?;

        Ok(Address {
            serialized: format!("{user}@{domain}"),
            at: user.len(),
        })
    }

    /// The part before the last '@'
    pub fn user(&self) -> &str {
        &self.serialized[..self.at]
    }

    /// The part after the last '@'
    pub fn domain(&self) -> &str {
        &self.serialized[self.at + 1..]
    }

    /// Whether the address can travel without the SMTPUTF8 extension
    pub(crate) fn is_ascii(&self) -> bool {
        self.serialized.is_ascii()
    }

    fn check_user(user: &str) -> Result<(), AddressError> {
        if EmailAddress::is_valid_local_part(user) {
            Ok(())
        } else {
            Err(AddressError::InvalidUser)
        }
    }

    fn check_domain(domain: &str) -> Result<(), AddressError> {
        Address::check_domain_ascii(domain).or_else(|_| {
            let ascii = domain_to_ascii(domain).map_err(|_| AddressError::InvalidDomain)?;
            Address::check_domain_ascii(&ascii)
        })
    }

    fn check_domain_ascii(domain: &str) -> Result<(), AddressError> {
        if EmailAddress::is_valid_domain(domain) {
            return Ok(());
        }

        // address literal, with or without brackets
        let ip = domain
            .strip_prefix('[')
            .and_then(|ip| ip.strip_suffix(']'))
            .unwrap_or(domain);
        match ip.parse::<IpAddr>() {
            Ok(_) => Ok(()),
            Err(_) => Err(AddressError::InvalidDomain),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.serialized)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(val: &str) -> Result<Self, AddressError> {
        let (user, domain) = val.rsplit_once('@').ok_or(AddressError::MissingParts)?;
        if user.is_empty() || domain.is_empty() {
            return Err(AddressError::MissingParts);
        }
        Address::check_user(user)?;
        Address::check_domain(domain)?;

        Ok(Address {
            serialized: val.to_owned(),
            at: user.len(),
        })
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.serialized
    }
}

/// Errors in email address parsing
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum AddressError {
    /// Missing domain or user
    MissingParts,
    /// Unbalanced angle bracket
    Unbalanced,
    /// Invalid email user
    InvalidUser,
    /// Invalid email domain
    InvalidDomain,
    /// Input is not a mailbox or mailbox list
    InvalidInput,
}

impl Error for AddressError {}

impl Display for AddressError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            AddressError::MissingParts => "Missing domain or user",
            AddressError::Unbalanced => "Unbalanced angle bracket",
            AddressError::InvalidUser => "Invalid email user",
            AddressError::InvalidDomain => "Invalid email domain",
            AddressError::InvalidInput => "Invalid input",
        })
    }
}

impl From<AddressError> for crate::Error {
    fn from(err: AddressError) -> Self {
        crate::error::address(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ascii_address() {
        let addr = Address::from_str("something@example.com").unwrap();
        assert_eq!(addr, Address::new("something", "example.com").unwrap());
        assert_eq!(addr.user(), "something");
        assert_eq!(addr.domain(), "example.com");
        assert!(addr.is_ascii());
    }

    #[test]
    fn address_literals() {
        let v4 = Address::from_str("something@[1.1.1.1]").unwrap();
        assert_eq!(v4.domain(), "[1.1.1.1]");

        let v6 = Address::from_str("something@[2606:4700:4700::1111]").unwrap();
        assert_eq!(v6.domain(), "[2606:4700:4700::1111]");
    }

    #[test]
    fn idn_domain() {
        let addr = Address::from_str("user@пример.рф").unwrap();
        assert_eq!(addr.domain(), "пример.рф");
        assert!(!addr.is_ascii());
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(
            Address::from_str("nobody.example.com"),
            Err(AddressError::MissingParts)
        );
        assert_eq!(
            Address::from_str("@example.com"),
            Err(AddressError::MissingParts)
        );
        assert_eq!(
            Address::from_str("a b@example.com"),
            Err(AddressError::InvalidUser)
        );
        assert_eq!(
            Address::from_str("user@exa mple"),
            Err(AddressError::InvalidDomain)
        );
    }

    #[test]
    fn converts_into_crate_error() {
        let err: crate::Error = AddressError::InvalidUser.into();
        assert!(err.is_address());
    }
}
