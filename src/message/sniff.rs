//! Content type detection from the leading bytes of a payload
//!
//! Implements the signature tables of the WHATWG MIME sniffing standard
//! (<https://mimesniff.spec.whatwg.org/>) for the types that matter to mail:
//! markup, documents, images, audio/video, fonts and archives. The file name
//! is never consulted.

/// Only the first 512 bytes are considered
const SNIFF_LEN: usize = 512;

/// UTF-8 text without markup
pub const TEXT_PLAIN_UTF_8: &str = "text/plain; charset=utf-8";
/// UTF-8 text starting like an HTML document
pub const TEXT_HTML_UTF_8: &str = "text/html; charset=utf-8";
/// Anything else
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Returns the content type of `data`, with a charset parameter for text
///
/// ```
/// use relaymail::message::sniff::detect_content_type;
///
/// assert_eq!(detect_content_type(b"hello"), "text/plain; charset=utf-8");
/// assert_eq!(detect_content_type(b"<html><body></body></html>"), "text/html; charset=utf-8");
/// assert_eq!(detect_content_type(b"\x89PNG\r\n\x1a\n\0\0"), "image/png");
/// ```
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    let first_non_ws = data
        .iter()
        .position(|b| !is_whitespace(*b))
        .unwrap_or(data.len());
    let trimmed = &data[first_non_ws..];

    if HTML_TAGS.iter().any(|tag| matches_html_tag(trimmed, tag)) {
        return TEXT_HTML_UTF_8;
    }
    if starts_with_ignore_case(trimmed, b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    for sig in SIGNATURES {
        if sig.matches(data) {
            return sig.content_type;
        }
    }

    if is_mp4(data) {
        return "video/mp4";
    }

    if data.iter().any(|b| is_binary(*b)) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN_UTF_8
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

// https://mimesniff.spec.whatwg.org/#binary-data-byte
fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f)
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// The tag must be followed by a space or `>` to count
fn matches_html_tag(data: &[u8], tag: &[u8]) -> bool {
    starts_with_ignore_case(data, tag) && matches!(data.get(tag.len()), Some(b' ' | b'>'))
}

const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Byte pattern under a mask, compared from the start of the payload
struct Signature {
    pattern: &'static [u8],
    mask: Option<&'static [u8]>,
    content_type: &'static str,
}

impl Signature {
    const fn exact(pattern: &'static [u8], content_type: &'static str) -> Self {
        Signature {
            pattern,
            mask: None,
            content_type,
        }
    }

    const fn masked(
        pattern: &'static [u8],
        mask: &'static [u8],
        content_type: &'static str,
    ) -> Self {
        Signature {
            pattern,
            mask: Some(mask),
            content_type,
        }
    }

    fn matches(&self, data: &[u8]) -> bool {
        if data.len() < self.pattern.len() {
            return false;
        }
        match self.mask {
            None => data.starts_with(self.pattern),
            Some(mask) => self
                .pattern
                .iter()
                .zip(mask)
                .zip(data)
                .all(|((p, m), d)| d & m == *p),
        }
    }
}

const SIGNATURES: &[Signature] = &[
    Signature::exact(b"%PDF-", "application/pdf"),
    Signature::exact(b"%!PS-Adobe-", "application/postscript"),
    // byte order marks
    Signature::exact(b"\xFE\xFF", "text/plain; charset=utf-16be"),
    Signature::exact(b"\xFF\xFE", "text/plain; charset=utf-16le"),
    Signature::exact(b"\xEF\xBB\xBF", TEXT_PLAIN_UTF_8),
    // images
    Signature::exact(b"\x00\x00\x01\x00", "image/x-icon"),
    Signature::exact(b"\x00\x00\x02\x00", "image/x-icon"),
    Signature::exact(b"BM", "image/bmp"),
    Signature::exact(b"GIF87a", "image/gif"),
    Signature::exact(b"GIF89a", "image/gif"),
    Signature::masked(
        b"RIFF\x00\x00\x00\x00WEBPVP",
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        "image/webp",
    ),
    Signature::exact(b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    Signature::exact(b"\xFF\xD8\xFF", "image/jpeg"),
    // audio and video
    Signature::exact(b".snd", "audio/basic"),
    Signature::masked(
        b"FORM\x00\x00\x00\x00AIFF",
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        "audio/aiff",
    ),
    Signature::exact(b"ID3", "audio/mpeg"),
    Signature::exact(b"OggS\x00", "application/ogg"),
    Signature::exact(b"MThd\x00\x00\x00\x06", "audio/midi"),
    Signature::masked(
        b"RIFF\x00\x00\x00\x00AVI ",
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        "video/avi",
    ),
    Signature::masked(
        b"RIFF\x00\x00\x00\x00WAVE",
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        "audio/wave",
    ),
    Signature::exact(b"\x1A\x45\xDF\xA3", "video/webm"),
    // fonts
    Signature::exact(b"\x00\x01\x00\x00", "font/ttf"),
    Signature::exact(b"OTTO", "font/otf"),
    Signature::exact(b"ttcf", "font/collection"),
    Signature::exact(b"wOFF", "font/woff"),
    Signature::exact(b"wOF2", "font/woff2"),
    // archives
    Signature::exact(b"\x1F\x8B\x08", "application/x-gzip"),
    Signature::exact(b"PK\x03\x04", "application/zip"),
    Signature::exact(b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    Signature::exact(b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    Signature::exact(b"\x00asm", "application/wasm"),
];

// https://mimesniff.spec.whatwg.org/#signature-for-mp4
fn is_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if box_size % 4 != 0 || data.len() < box_size || &data[4..8] != b"ftyp" {
        return false;
    }
    (8..box_size)
        .step_by(4)
        .filter(|&i| i != 12)
        .any(|i| data.get(i..i + 3) == Some(b"mp4".as_slice()))
}
