use ::base64::{
    engine::{general_purpose::STANDARD, Engine},
    DecodeError,
};

/// Line width of base64 bodies, as required by RFC 2045
pub(crate) const LINE_WIDTH: usize = 76;

pub(crate) fn encode<T: AsRef<[u8]>>(input: T) -> String {
    STANDARD.encode(input)
}

pub(crate) fn decode<T: AsRef<[u8]>>(input: T) -> Result<Vec<u8>, DecodeError> {
    STANDARD.decode(input)
}

/// Base64 encodes `input` into `out`, breaking lines every 76 characters
///
/// Every line, the last one included, is terminated by CRLF.
/// Nothing is written for an empty input.
pub(crate) fn encode_wrapped(input: &[u8], out: &mut Vec<u8>) {
    // 57 raw bytes encode to exactly 76 characters
    const CHUNK: usize = LINE_WIDTH / 4 * 3;

    let mut line = String::with_capacity(LINE_WIDTH);
    for chunk in input.chunks(CHUNK) {
        line.clear();
        STANDARD.encode_string(chunk, &mut line);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}
