use super::encode_text;
use crate::message::{Mailbox, Mailboxes};

/// Renders a mailbox for a header, encoding display names that are not
/// printable ASCII
pub(super) fn encode_mailbox(mailbox: &Mailbox) -> String {
    match mailbox.display_name() {
        Some(name) if !name.bytes().all(|b| b == b'\t' || (b' '..=b'~').contains(&b)) => {
            format!("{} <{}>", encode_text(name), mailbox.email)
        }
        _ => mailbox.to_string(),
    }
}

pub(super) fn encode_mailboxes(mailboxes: &Mailboxes) -> String {
    mailboxes
        .iter()
        .map(encode_mailbox)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::message::header::{test::decode_text, HeaderName, Headers};

    #[test]
    fn address_list() {
        let list = Mailboxes::parse_lenient("a@x.com;b@x.com").unwrap();
        let mut headers = Headers::new();
        headers.set_addresses(HeaderName::TO, &list);

        assert_eq!(headers.to_string(), "To: a@x.com, b@x.com\r\n");
    }

    #[test]
    fn non_ascii_display_name() {
        let mailbox: Mailbox = "Иван <ivan@example.org>".parse().unwrap();
        let encoded = encode_mailbox(&mailbox);

        assert_eq!(encoded, "=?utf-8?b?0JjQstCw0L0=?= <ivan@example.org>");
        assert_eq!(decode_text(&encoded), "Иван <ivan@example.org>");
    }

    #[test]
    fn control_characters_are_encoded() {
        let mailbox = Mailbox::new(
            Some("Evil\r\nBcc: victim@example.org".into()),
            "evil@example.org".parse().unwrap(),
        );
        let encoded = encode_mailbox(&mailbox);

        assert!(!encoded.contains('\n'));
        assert!(encoded.starts_with("=?utf-8?b?"));
    }

    #[test]
    fn ascii_display_name_is_quoted_when_needed() {
        let mailbox: Mailbox = r#""Doe, Jane" <jane@example.org>"#.parse().unwrap();
        assert_eq!(encode_mailbox(&mailbox), r#""Doe, Jane" <jane@example.org>"#);
    }
}
