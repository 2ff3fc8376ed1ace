//! ### Sending messages
//!
//! Delivery goes through an SMTP relay with [`smtp::SmtpClient`]. The relay
//! can be the local mail server, a company gateway or a third-party service;
//! the client does not look up MX records nor deliver to the destination
//! directly.

pub mod smtp;
