mod parsers;
mod types;

pub(crate) use self::types::normalize_list;
pub use self::types::{Mailbox, Mailboxes};
