//! Mailbox grammar from RFC 2822 section 3.4, with RFC 6532 UTF-8 atoms
//!
//! Obsolete forms are left out except for the relaxed display name, which
//! accepts anything up to the angle address.

use chumsky::prelude::*;

type Name = Option<String>;
type AddrSpec = (String, String);

// WSP             =       SP / HTAB
fn wsp() -> impl Parser<char, char, Error = Simple<char>> {
    one_of(" \t")
}

// FWS             =       ([*WSP CRLF] 1*WSP)
fn fws() -> impl Parser<char, (), Error = Simple<char>> {
    wsp()
        .repeated()
        .then(just("\r\n"))
        .or_not()
        .then(wsp().repeated().at_least(1))
        .ignored()
}

// quoted-pair     =       "\" text
fn quoted_pair() -> impl Parser<char, char, Error = Simple<char>> {
    just('\\').ignore_then(filter(|c: &char| *c != '\r' && *c != '\n'))
}

// comment         =       "(" *([FWS] ccontent) [FWS] ")"
fn comment() -> impl Parser<char, (), Error = Simple<char>> {
    recursive(|comment| {
        let ctext = filter(|c: &char| !matches!(c, '(' | ')' | '\\' | ' ' | '\t' | '\r' | '\n'));
        let ccontent = choice((ctext.ignored(), quoted_pair().ignored(), comment));

        fws()
            .or_not()
            .ignore_then(ccontent)
            .repeated()
            .then_ignore(fws().or_not())
            .delimited_by(just('('), just(')'))
            .ignored()
    })
}

// CFWS            =       *([FWS] comment) (([FWS] comment) / FWS)
fn cfws() -> impl Parser<char, (), Error = Simple<char>> {
    choice((fws(), comment())).repeated().at_least(1).ignored()
}

// atext, extended with any non-ASCII character
fn atext() -> impl Parser<char, char, Error = Simple<char>> {
    filter(|c: &char| {
        c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(*c) || !c.is_ascii()
    })
}

// dot-atom        =       [CFWS] 1*atext *("." 1*atext) [CFWS]
fn dot_atom() -> impl Parser<char, String, Error = Simple<char>> {
    cfws()
        .or_not()
        .ignore_then(
            atext()
                .repeated()
                .at_least(1)
                .collect::<String>()
                .separated_by(just('.'))
                .at_least(1),
        )
        .then_ignore(cfws().or_not())
        .map(|atoms| atoms.join("."))
}

// quoted-string   =       [CFWS] DQUOTE *([FWS] qcontent) [FWS] DQUOTE [CFWS]
fn quoted_string() -> impl Parser<char, String, Error = Simple<char>> {
    let qtext = filter(|c: &char| !matches!(c, '"' | '\\' | '\r' | '\n'));

    cfws()
        .or_not()
        .ignore_then(
            choice((qtext, quoted_pair()))
                .repeated()
                .collect::<String>()
                .delimited_by(just('"'), just('"')),
        )
        .then_ignore(cfws().or_not())
}

// domain-literal  =       [CFWS] "[" *([FWS] dcontent) [FWS] "]" [CFWS]
fn domain_literal() -> impl Parser<char, String, Error = Simple<char>> {
    let dtext = filter(|c: &char| !matches!(c, '[' | ']' | '\\' | ' ' | '\t' | '\r' | '\n'));

    cfws()
        .or_not()
        .ignore_then(
            dtext
                .repeated()
                .at_least(1)
                .collect::<String>()
                .delimited_by(just('['), just(']')),
        )
        .then_ignore(cfws().or_not())
        .map(|literal| format!("[{literal}]"))
}

// addr-spec       =       local-part "@" domain
fn addr_spec() -> impl Parser<char, AddrSpec, Error = Simple<char>> {
    choice((dot_atom(), quoted_string()))
        .then_ignore(just('@'))
        .then(choice((dot_atom(), domain_literal())))
}

// angle-addr      =       [CFWS] "<" addr-spec ">" [CFWS]
fn angle_addr() -> impl Parser<char, AddrSpec, Error = Simple<char>> {
    cfws()
        .or_not()
        .ignore_then(addr_spec().delimited_by(just('<'), just('>')))
        .then_ignore(cfws().or_not())
}

// name-addr       =       [display-name] angle-addr
fn name_addr() -> impl Parser<char, (Name, AddrSpec), Error = Simple<char>> {
    cfws()
        .or_not()
        .ignore_then(just('"').or_not())
        .ignore_then(take_until(just('"').or_not().ignore_then(angle_addr())))
        .map(|(name, addr)| {
            let name = String::from_iter(name);
            let name = name.trim();
            ((!name.is_empty()).then(|| name.to_owned()), addr)
        })
}

// mailbox         =       name-addr / addr-spec
pub(super) fn mailbox() -> impl Parser<char, (Name, AddrSpec), Error = Simple<char>> {
    choice((addr_spec().map(|addr| (None, addr)), name_addr())).then_ignore(end())
}

// mailbox-list    =       mailbox *("," mailbox)
pub(super) fn mailbox_list() -> impl Parser<char, Vec<(Name, AddrSpec)>, Error = Simple<char>> {
    choice((addr_spec().map(|addr| (None, addr)), name_addr()))
        .separated_by(just(','))
        .at_least(1)
        .then_ignore(end())
}
