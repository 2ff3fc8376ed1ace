use std::{fmt::Display, time::SystemTime};

use super::{encode_text, format_date};

/// Value of a header parameter, rendered according to its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Quoted and, when needed, turned into encoded words
    Text(String),
    /// Quoted date, same format as the `Date` field
    Time(SystemTime),
    /// Written as is, for numbers and tokens
    Other(String),
}

impl ParamValue {
    /// Unquoted value built from anything printable
    pub fn other<T: Display>(value: T) -> Self {
        ParamValue::Other(value.to_string())
    }

    fn write_to(&self, out: &mut String) {
        match self {
            ParamValue::Text(text) => {
                out.push('"');
                for c in encode_text(text).chars() {
                    if matches!(c, '"' | '\\') {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
            ParamValue::Time(time) => {
                out.push('"');
                out.push_str(&format_date(*time));
                out.push('"');
            }
            ParamValue::Other(value) => out.push_str(value),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<SystemTime> for ParamValue {
    fn from(value: SystemTime) -> Self {
        ParamValue::Time(value)
    }
}

macro_rules! other_param {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    ParamValue::other(value)
                }
            }
        )*
    };
}

other_param!(u32, u64, usize, i32, i64, bool);

/// Ordered `key=value` parameters of a structured header field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    /// Creates an empty parameter list
    pub fn new() -> Self {
        Params(Vec::new())
    }

    /// Builder style [`Params::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a parameter, replacing an existing one with the same key
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let (key, value) = (key.into(), value.into());
        match self
            .0
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&key))
        {
            Some((_, current)) => *current = value,
            None => self.0.push((key, value)),
        }
    }

    /// Whether no parameter was set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends `; key=value` for every parameter
    pub(super) fn write_to(&self, out: &mut String) {
        for (key, value) in &self.0 {
            out.push_str("; ");
            out.push_str(key);
            out.push('=');
            value.write_to(out);
        }
    }
}
