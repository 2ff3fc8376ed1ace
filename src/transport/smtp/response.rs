//! SMTP replies: a three digit code and zero or more text lines

use std::{
    fmt::{Display, Formatter, Result},
    result,
    str::FromStr,
};

use nom::{
    bytes::streaming::{tag, take_until},
    character::streaming::anychar,
    combinator::{complete, map_opt, opt},
    multi::many0,
    sequence::preceded,
    IResult, Parser,
};

use crate::{error, Error};

/// The first digit indicates severity
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Severity {
    /// 2yx
    PositiveCompletion = 2,
    /// 3yz
    PositiveIntermediate = 3,
    /// 4yz
    TransientNegativeCompletion = 4,
    /// 5yz
    PermanentNegativeCompletion = 5,
}

impl Severity {
    fn from_digit(c: char) -> Option<Self> {
        Some(match c {
            '2' => Severity::PositiveCompletion,
            '3' => Severity::PositiveIntermediate,
            '4' => Severity::TransientNegativeCompletion,
            '5' => Severity::PermanentNegativeCompletion,
            _ => return None,
        })
    }
}

/// Second digit
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Category {
    /// x0z
    Syntax = 0,
    /// x1z
    Information = 1,
    /// x2z
    Connections = 2,
    /// x3z
    Unspecified3 = 3,
    /// x4z
    Unspecified4 = 4,
    /// x5z
    MailSystem = 5,
}

impl Category {
    fn from_digit(c: char) -> Option<Self> {
        Some(match c {
            '0' => Category::Syntax,
            '1' => Category::Information,
            '2' => Category::Connections,
            '3' => Category::Unspecified3,
            '4' => Category::Unspecified4,
            '5' => Category::MailSystem,
            _ => return None,
        })
    }
}

/// The detail digit of a response code (third digit)
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[allow(missing_docs)]
pub enum Detail {
    Zero = 0,
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
    Nine = 9,
}

impl Detail {
    const ALL: [Detail; 10] = [
        Detail::Zero,
        Detail::One,
        Detail::Two,
        Detail::Three,
        Detail::Four,
        Detail::Five,
        Detail::Six,
        Detail::Seven,
        Detail::Eight,
        Detail::Nine,
    ];

    fn from_digit(c: char) -> Option<Self> {
        c.to_digit(10).map(|d| Detail::ALL[d as usize])
    }
}

/// Represents a 3 digit SMTP response code
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Code {
    /// First digit of the response code
    pub severity: Severity,
    /// Second digit of the response code
    pub category: Category,
    /// Third digit
    pub detail: Detail,
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{}{}{}",
            self.severity as u8, self.category as u8, self.detail as u8
        )
    }
}

impl Code {
    /// Creates a new `Code` structure
    pub fn new(severity: Severity, category: Category, detail: Detail) -> Code {
        Code {
            severity,
            category,
            detail,
        }
    }

    /// Tells if the response is positive
    pub fn is_positive(self) -> bool {
        matches!(
            self.severity,
            Severity::PositiveCompletion | Severity::PositiveIntermediate
        )
    }
}

impl From<Code> for u16 {
    fn from(code: Code) -> Self {
        code.detail as u16 + 10 * code.category as u16 + 100 * code.severity as u16
    }
}

/// Contains an SMTP reply, with separated code and message
///
/// The text message is optional, only the code is mandatory
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Response {
    code: Code,
    /// One entry per reply line
    message: Vec<String>,
}

impl FromStr for Response {
    type Err = Error;

    fn from_str(s: &str) -> result::Result<Response, Error> {
        parse_response(s)
            .map(|(_, r)| r)
            .map_err(|e| error::response(e.to_owned()))
    }
}

impl Response {
    /// Creates a new `Response`
    pub fn new(code: Code, message: Vec<String>) -> Response {
        Response { code, message }
    }

    /// Tells if the response is positive
    pub fn is_positive(&self) -> bool {
        self.code.is_positive()
    }

    /// Tests code equality
    pub fn has_code(&self, code: u16) -> bool {
        u16::from(self.code) == code
    }

    /// Returns only the first word of the message if possible
    pub fn first_word(&self) -> Option<&str> {
        self.message
            .first()
            .and_then(|line| line.split_whitespace().next())
    }

    /// Returns only the line of the message if possible
    pub fn first_line(&self) -> Option<&str> {
        self.message.first().map(String::as_str)
    }

    /// Response code
    pub fn code(&self) -> Code {
        self.code
    }

    /// Server response string (array of lines)
    pub fn message(&self) -> impl Iterator<Item = &str> {
        self.message.iter().map(String::as_str)
    }

    /// All lines joined by a space, for error reports
    pub fn text(&self) -> String {
        self.message.join(" ")
    }
}

fn parse_code(i: &str) -> IResult<&str, Code> {
    (
        map_opt(anychar, Severity::from_digit),
        map_opt(anychar, Category::from_digit),
        map_opt(anychar, Detail::from_digit),
    )
        .map(|(severity, category, detail)| Code::new(severity, category, detail))
        .parse(i)
}

/// Parses a complete reply
///
/// Returns `Incomplete` until the last line, the one with a space or
/// nothing after the code, has been received. A bare `334` is accepted
/// as an empty challenge.
pub(crate) fn parse_response(i: &str) -> IResult<&str, Response> {
    let (i, lines) =
        many0((parse_code, preceded(tag("-"), take_until("\r\n")), tag("\r\n"))).parse(i)?;
    let (i, (last_code, last_line)) =
        (parse_code, opt(preceded(tag(" "), take_until("\r\n")))).parse(i)?;
    let (i, _) = complete(tag("\r\n")).parse(i)?;

    if !lines.iter().all(|&(code, _, _)| code == last_code) {
        return Err(nom::Err::Failure(nom::error::Error::new(
            "",
            nom::error::ErrorKind::Not,
        )));
    }

    let mut message: Vec<String> = lines.into_iter().map(|(_, text, _)| text.into()).collect();
    message.push(last_line.unwrap_or_default().into());

    Ok((
        i,
        Response {
            code: last_code,
            message,
        },
    ))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn code_display_and_value() {
        let code = Code::new(
            Severity::TransientNegativeCompletion,
            Category::Connections,
            Detail::One,
        );
        assert_eq!(code.to_string(), "421");
        assert_eq!(u16::from(code), 421);
        assert!(!code.is_positive());
    }

    #[test]
    fn multiline_response() {
        let response: Response = "250-me\r\n250-8BITMIME\r\n250-SIZE 42\r\n250 AUTH PLAIN CRAM-MD5\r\n"
            .parse()
            .unwrap();

        assert_eq!(
            response,
            Response::new(
                Code::new(
                    Severity::PositiveCompletion,
                    Category::MailSystem,
                    Detail::Zero,
                ),
                vec![
                    "me".to_owned(),
                    "8BITMIME".to_owned(),
                    "SIZE 42".to_owned(),
                    "AUTH PLAIN CRAM-MD5".to_owned(),
                ],
            )
        );
        assert!(response.is_positive());
        assert!(response.has_code(250));
        assert!(!response.has_code(251));
        assert_eq!(response.first_word(), Some("me"));
        assert_eq!(response.first_line(), Some("me"));
        assert_eq!(response.message().count(), 4);
    }

    #[test]
    fn empty_text() {
        let response: Response = "334\r\n".parse().unwrap();
        assert!(response.has_code(334));
        assert_eq!(response.first_line(), Some(""));
        assert_eq!(response.first_word(), None);
    }

    #[test]
    fn mismatched_codes_are_rejected() {
        assert!("250-me\r\n251 other\r\n".parse::<Response>().is_err());
        assert!("2500 nope\r\n".parse::<Response>().is_err());
        assert!("abc\r\n".parse::<Response>().is_err());
    }

    #[test]
    fn incomplete_response() {
        assert!(matches!(
            parse_response("250-smtp.example.org\r\n"),
            Err(nom::Err::Incomplete(_))
        ));
        assert!(matches!(
            parse_response("250 smtp.exa"),
            Err(nom::Err::Incomplete(_))
        ));
    }

    #[test]
    fn text_joins_lines() {
        let response: Response = "535-5.7.8 Username and Password not accepted.\r\n535 5.7.8 Learn more\r\n"
            .parse()
            .unwrap();
        assert_eq!(
            response.text(),
            "5.7.8 Username and Password not accepted. 5.7.8 Learn more"
        );
        assert_eq!(response.code().severity, Severity::PermanentNegativeCompletion);
    }
}
