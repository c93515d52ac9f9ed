//! Loosely-typed metadata values and the audited legacy decoder.
//!
//! The remote source stores metadata values in a loosely-typed text
//! serialization format (`serialize()` wire format: scalars, lists, maps,
//! and object payloads). Values are modeled as a tagged union rather than
//! a dynamic `any`, and the decoder never materializes object/class
//! payloads — anything carrying an `O:`/`C:` token anywhere in it is kept
//! as an opaque scalar string. This defends against deserialization-based
//! injection from untrusted legacy data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A metadata value: scalar text, an ordered list, or a string-keyed map.
///
/// Numbers, booleans, and nulls from the wire format are normalized to
/// their scalar text form; consumers that need typed access go through
/// [`MetaValue::as_i64`] and friends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Scalar(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Scalar constructor from anything stringy.
    pub fn scalar(s: impl Into<String>) -> Self {
        MetaValue::Scalar(s.into())
    }

    /// The scalar text, if this is a scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Parse the scalar text as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_str()?.trim().parse().ok()
    }

    /// The first scalar in a list, or the scalar itself.
    ///
    /// Repeated meta keys collapse into lists; reference fields that expect
    /// a single value read through this.
    pub fn first_scalar(&self) -> Option<&str> {
        match self {
            MetaValue::Scalar(s) => Some(s),
            MetaValue::List(items) => items.first().and_then(|v| v.as_str()),
            MetaValue::Map(_) => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, MetaValue::Scalar(_))
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Scalar(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Scalar(s)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        MetaValue::Scalar(n.to_string())
    }
}

/// Decode a raw metadata value from the legacy wire format.
///
/// Non-serialized input passes through as a scalar. Serialized scalars,
/// lists, and maps materialize into the union. Object payloads and
/// malformed input are kept verbatim as opaque scalars — never an error,
/// never a partial decode.
pub fn decode_meta(raw: &str) -> MetaValue {
    if !looks_serialized(raw) {
        return MetaValue::Scalar(raw.to_string());
    }

    let mut parser = Parser {
        buf: raw.as_bytes(),
        pos: 0,
    };

    match parser.parse_value() {
        Ok(value) if parser.pos == parser.buf.len() => value,
        _ => MetaValue::Scalar(raw.to_string()),
    }
}

/// Cheap check mirroring the legacy `is_serialized()` heuristic.
fn looks_serialized(raw: &str) -> bool {
    let t = raw.trim_start();
    if t == "N;" {
        return true;
    }
    let mut chars = t.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('a' | 's' | 'i' | 'd' | 'b' | 'O' | 'C'), Some(':'))
    )
}

/// Parse failure: object payload or malformed input. The caller falls back
/// to the opaque-scalar representation either way.
struct Refused;

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse_value(&mut self) -> Result<MetaValue, Refused> {
        match self.peek()? {
            b'N' => {
                self.expect(b"N;")?;
                Ok(MetaValue::Scalar(String::new()))
            }
            b'b' => {
                self.expect(b"b:")?;
                let v = match self.take()? {
                    b'0' => "0",
                    b'1' => "1",
                    _ => return Err(Refused),
                };
                self.expect(b";")?;
                Ok(MetaValue::Scalar(v.to_string()))
            }
            b'i' => {
                self.expect(b"i:")?;
                let digits = self.take_until(b';')?;
                self.expect(b";")?;
                Ok(MetaValue::Scalar(digits))
            }
            b'd' => {
                self.expect(b"d:")?;
                let digits = self.take_until(b';')?;
                self.expect(b";")?;
                Ok(MetaValue::Scalar(digits))
            }
            b's' => {
                let s = self.parse_string()?;
                Ok(MetaValue::Scalar(s))
            }
            b'a' => self.parse_array(),
            // O: (object) and C: (custom serializable class) are refused
            // outright; the raw text stays opaque.
            b'O' | b'C' => Err(Refused),
            _ => Err(Refused),
        }
    }

    /// `s:<byte-len>:"<bytes>";`
    fn parse_string(&mut self) -> Result<String, Refused> {
        self.expect(b"s:")?;
        let len: usize = self.take_until(b':')?.parse().map_err(|_| Refused)?;
        self.expect(b":\"")?;

        let start = self.pos;
        let end = start.checked_add(len).ok_or(Refused)?;
        if end > self.buf.len() {
            return Err(Refused);
        }
        let bytes = &self.buf[start..end];
        self.pos = end;
        self.expect(b"\";")?;

        String::from_utf8(bytes.to_vec()).map_err(|_| Refused)
    }

    /// `a:<count>:{<key><value>...}` — sequential integer keys starting at
    /// zero produce a list, anything else a map.
    fn parse_array(&mut self) -> Result<MetaValue, Refused> {
        self.expect(b"a:")?;
        let count: usize = self.take_until(b':')?.parse().map_err(|_| Refused)?;
        self.expect(b":{")?;

        let mut entries: Vec<(String, MetaValue)> = Vec::with_capacity(count);
        let mut sequential = true;

        for index in 0..count {
            let key = match self.peek()? {
                b'i' => {
                    self.expect(b"i:")?;
                    let digits = self.take_until(b';')?;
                    self.expect(b";")?;
                    if digits != index.to_string() {
                        sequential = false;
                    }
                    digits
                }
                b's' => {
                    sequential = false;
                    self.parse_string()?
                }
                _ => return Err(Refused),
            };

            let value = self.parse_value()?;
            entries.push((key, value));
        }

        self.expect(b"}")?;

        if sequential {
            Ok(MetaValue::List(entries.into_iter().map(|(_, v)| v).collect()))
        } else {
            Ok(MetaValue::Map(entries.into_iter().collect()))
        }
    }

    fn peek(&self) -> Result<u8, Refused> {
        self.buf.get(self.pos).copied().ok_or(Refused)
    }

    fn take(&mut self) -> Result<u8, Refused> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, literal: &[u8]) -> Result<(), Refused> {
        let end = self.pos + literal.len();
        if end <= self.buf.len() && &self.buf[self.pos..end] == literal {
            self.pos = end;
            Ok(())
        } else {
            Err(Refused)
        }
    }

    fn take_until(&mut self, stop: u8) -> Result<String, Refused> {
        let start = self.pos;
        while self.peek()? != stop {
            self.pos += 1;
        }
        let s = std::str::from_utf8(&self.buf[start..self.pos]).map_err(|_| Refused)?;
        Ok(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(decode_meta("hello"), MetaValue::scalar("hello"));
        assert_eq!(decode_meta(""), MetaValue::scalar(""));
        assert_eq!(decode_meta("42"), MetaValue::scalar("42"));
    }

    #[test]
    fn test_decode_string() {
        assert_eq!(decode_meta(r#"s:5:"hello";"#), MetaValue::scalar("hello"));
    }

    #[test]
    fn test_decode_string_with_multibyte_length() {
        // Byte length, not char length: "café" is 5 bytes.
        assert_eq!(decode_meta("s:5:\"caf\u{e9}\";"), MetaValue::scalar("caf\u{e9}"));
    }

    #[test]
    fn test_decode_int_and_float() {
        assert_eq!(decode_meta("i:123;"), MetaValue::scalar("123"));
        assert_eq!(decode_meta("i:-7;"), MetaValue::scalar("-7"));
        assert_eq!(decode_meta("d:1.5;"), MetaValue::scalar("1.5"));
    }

    #[test]
    fn test_decode_bool_and_null() {
        assert_eq!(decode_meta("b:1;"), MetaValue::scalar("1"));
        assert_eq!(decode_meta("b:0;"), MetaValue::scalar("0"));
        assert_eq!(decode_meta("N;"), MetaValue::scalar(""));
    }

    #[test]
    fn test_decode_sequential_array_as_list() {
        let raw = r#"a:2:{i:0;s:1:"a";i:1;s:1:"b";}"#;
        assert_eq!(
            decode_meta(raw),
            MetaValue::List(vec![MetaValue::scalar("a"), MetaValue::scalar("b")])
        );
    }

    #[test]
    fn test_decode_string_keyed_array_as_map() {
        let raw = r#"a:2:{s:5:"width";i:800;s:6:"height";i:600;}"#;
        let decoded = decode_meta(raw);
        let MetaValue::Map(map) = decoded else {
            panic!("expected map");
        };
        assert_eq!(map.get("width"), Some(&MetaValue::scalar("800")));
        assert_eq!(map.get("height"), Some(&MetaValue::scalar("600")));
    }

    #[test]
    fn test_decode_non_sequential_int_keys_as_map() {
        let raw = r#"a:1:{i:5;s:1:"x";}"#;
        let MetaValue::Map(map) = decode_meta(raw) else {
            panic!("expected map");
        };
        assert_eq!(map.get("5"), Some(&MetaValue::scalar("x")));
    }

    #[test]
    fn test_decode_nested_structures() {
        let raw = r#"a:1:{s:5:"sizes";a:1:{i:0;s:9:"thumbnail";}}"#;
        let MetaValue::Map(map) = decode_meta(raw) else {
            panic!("expected map");
        };
        assert_eq!(
            map.get("sizes"),
            Some(&MetaValue::List(vec![MetaValue::scalar("thumbnail")]))
        );
    }

    #[test]
    fn test_object_payload_kept_opaque() {
        let raw = r#"O:8:"stdClass":1:{s:3:"foo";s:3:"bar";}"#;
        assert_eq!(decode_meta(raw), MetaValue::Scalar(raw.to_string()));
    }

    #[test]
    fn test_nested_object_keeps_whole_value_opaque() {
        let raw = r#"a:1:{s:3:"obj";O:8:"stdClass":0:{}}"#;
        assert_eq!(decode_meta(raw), MetaValue::Scalar(raw.to_string()));
    }

    #[test]
    fn test_custom_class_payload_kept_opaque() {
        let raw = r#"C:3:"Foo":0:{}"#;
        assert_eq!(decode_meta(raw), MetaValue::Scalar(raw.to_string()));
    }

    #[test]
    fn test_malformed_input_kept_opaque() {
        assert_eq!(decode_meta("a:2:{i:0;"), MetaValue::scalar("a:2:{i:0;"));
        assert_eq!(decode_meta(r#"s:99:"short";"#), MetaValue::scalar(r#"s:99:"short";"#));
    }

    #[test]
    fn test_trailing_garbage_kept_opaque() {
        let raw = r#"s:1:"a";junk"#;
        assert_eq!(decode_meta(raw), MetaValue::Scalar(raw.to_string()));
    }

    #[test]
    fn test_string_containing_quote_and_brace() {
        let raw = "s:4:\"a\"b}\";";
        assert_eq!(decode_meta(raw), MetaValue::scalar("a\"b}"));
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(MetaValue::scalar("42").as_i64(), Some(42));
        assert_eq!(MetaValue::scalar(" 42 ").as_i64(), Some(42));
        assert_eq!(MetaValue::scalar("nope").as_i64(), None);
        assert_eq!(MetaValue::List(vec![]).as_i64(), None);
    }

    #[test]
    fn test_first_scalar() {
        assert_eq!(MetaValue::scalar("a").first_scalar(), Some("a"));
        let list = MetaValue::List(vec![MetaValue::scalar("x"), MetaValue::scalar("y")]);
        assert_eq!(list.first_scalar(), Some("x"));
        assert_eq!(MetaValue::Map(BTreeMap::new()).first_scalar(), None);
    }

    #[test]
    fn test_serde_round_trip() {
        let value = MetaValue::Map(BTreeMap::from([
            ("k".to_string(), MetaValue::List(vec![MetaValue::scalar("v")])),
        ]));
        let json = serde_json::to_string(&value).unwrap();
        let back: MetaValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }
}
