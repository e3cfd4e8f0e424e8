//! Runtime data bag and its line codec
//!
//! The bag is a string-to-string map that travels between the UI, the
//! immediate custom actions and the deferred ones inside a single session
//! property. Records are `key=value` lines; the characters that would break
//! that framing are replaced with escape tokens:
//!
//! | char   | token      |
//! |--------|------------|
//! | `\n`   | `{$NL}`    |
//! | `\r`   | `{$CR}`    |
//! | `=`    | `{$EQV}`   |
//! | `;`    | `{$SMCOL}` |
//! | `{`    | `{$LBR}`   |
//!
//! Escaping a literal `{` makes the encoding unambiguous, so any key or value
//! survives a round trip.

use crate::condition::PropertySource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Session property carrying the serialized bag
pub const RUNTIME_DATA_PROPERTY: &str = "WIX_MANAGED_RUNTIME_DATA";

const ESCAPES: &[(char, &str)] = &[
    ('\n', "{$NL}"),
    ('\r', "{$CR}"),
    ('=', "{$EQV}"),
    (';', "{$SMCOL}"),
    ('{', "{$LBR}"),
];

/// Malformed serialized bag
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Record {line} has no '=' separator")]
    MissingSeparator { line: usize },

    #[error("Unknown escape token '{token}' in record {line}")]
    UnknownEscape { line: usize, token: String },

    #[error("Unterminated escape token in record {line}")]
    UnterminatedEscape { line: usize },
}

/// String-keyed bag of values shared across the install session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataBag {
    entries: BTreeMap<String, String>,
}

impl DataBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Value for `key`, or the empty string
    pub fn value(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Encode the bag as escaped `key=value` lines
    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Decode a serialized bag, rejecting malformed input
    pub fn try_deserialize(data: &str) -> Result<Self, CodecError> {
        let mut bag = DataBag::new();
        for (index, record) in data.split('\n').enumerate() {
            if record.is_empty() {
                continue;
            }
            let line = index + 1;
            let (key, value) = record
                .split_once('=')
                .ok_or(CodecError::MissingSeparator { line })?;
            bag.entries
                .insert(unescape(key, line)?, unescape(value, line)?);
        }
        Ok(bag)
    }

    /// Decode a serialized bag, falling back to an empty bag on malformed input
    pub fn deserialize(data: &str) -> Self {
        match Self::try_deserialize(data) {
            Ok(bag) => bag,
            Err(e) => {
                log::warn!("Discarding malformed runtime data: {}", e);
                DataBag::new()
            }
        }
    }

    /// Overwrite entries with those of `other`
    pub fn merge_replace(&mut self, other: &DataBag) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    /// New bag with `other` layered over `self`
    pub fn combine(&self, other: &DataBag) -> DataBag {
        let mut bag = self.clone();
        bag.merge_replace(other);
        bag
    }

    /// Overwrite entries with those decoded from `data`
    pub fn merge_serialized(&mut self, data: &str) {
        let other = DataBag::deserialize(data);
        self.merge_replace(&other);
    }
}

/// Merge `updates` over a serialized bag and re-serialize the result
pub fn merge_replace(existing: &str, updates: &DataBag) -> String {
    let mut bag = DataBag::deserialize(existing);
    bag.merge_replace(updates);
    bag.serialize()
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match ESCAPES.iter().find(|(ch, _)| *ch == c) {
            Some((_, token)) => out.push_str(token),
            None => out.push(c),
        }
    }
    out
}

fn unescape(text: &str, line: usize) -> Result<String, CodecError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let end = tail
            .find('}')
            .ok_or(CodecError::UnterminatedEscape { line })?;
        let token = &tail[..=end];
        let (ch, _) = ESCAPES
            .iter()
            .find(|(_, t)| *t == token)
            .ok_or_else(|| CodecError::UnknownEscape {
                line,
                token: token.to_string(),
            })?;
        out.push(*ch);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

impl fmt::Display for DataBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

impl PropertySource for DataBag {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.is_empty()).map(str::to_string)
    }
}

impl From<BTreeMap<String, String>> for DataBag {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DataBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for DataBag {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.entries.insert(k.into(), v.into());
        }
    }
}

impl IntoIterator for DataBag {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_bag_serializes_to_empty_string() {
        assert_eq!(DataBag::new().serialize(), "");
        assert!(DataBag::try_deserialize("").unwrap().is_empty());
    }

    #[test]
    fn test_serialize_is_sorted() {
        let bag: DataBag = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(bag.serialize(), "a=1\nb=2");
    }

    #[test]
    fn test_special_characters_survive() {
        let bag: DataBag = [
            ("path", "C:\\Program Files\\My App"),
            ("conn", "Server=db;User=sa"),
            ("multi", "line1\r\nline2"),
            ("a=b", "{$NL} literally"),
        ]
        .into_iter()
        .collect();

        let text = bag.serialize();
        assert_eq!(text.lines().count(), 4);
        assert_eq!(DataBag::try_deserialize(&text).unwrap(), bag);
    }

    #[test]
    fn test_value_with_escape_lookalike() {
        let bag: DataBag = [("k", "{$EQV}")].into_iter().collect();
        assert_eq!(bag.serialize(), "k={$LBR}$EQV}");
        let back = DataBag::try_deserialize(&bag.serialize()).unwrap();
        assert_eq!(back.get("k"), Some("{$EQV}"));
    }

    #[test]
    fn test_empty_key_and_value() {
        let bag: DataBag = [("", "")].into_iter().collect();
        assert_eq!(bag.serialize(), "=");
        assert_eq!(DataBag::try_deserialize("=").unwrap(), bag);
    }

    #[test]
    fn test_missing_separator_is_error() {
        let err = DataBag::try_deserialize("a=1\nbroken").unwrap_err();
        assert_eq!(err, CodecError::MissingSeparator { line: 2 });
    }

    #[test]
    fn test_unknown_escape_is_error() {
        let err = DataBag::try_deserialize("a={$TAB}").unwrap_err();
        assert!(matches!(err, CodecError::UnknownEscape { line: 1, .. }));
    }

    #[test]
    fn test_unterminated_escape_is_error() {
        let err = DataBag::try_deserialize("a={$NL").unwrap_err();
        assert_eq!(err, CodecError::UnterminatedEscape { line: 1 });
    }

    #[test]
    fn test_deserialize_falls_back_to_empty() {
        assert!(DataBag::deserialize("not a record").is_empty());
    }

    #[test]
    fn test_blank_records_are_skipped() {
        let bag = DataBag::try_deserialize("a=1\n\nb=2\n").unwrap();
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn test_last_duplicate_wins() {
        let bag = DataBag::try_deserialize("a=1\na=2").unwrap();
        assert_eq!(bag.get("a"), Some("2"));
    }

    #[test]
    fn test_merge_replace_overwrites_and_keeps() {
        let updates: DataBag = [("b", "20"), ("c", "3")].into_iter().collect();
        let merged = merge_replace("a=1\nb=2", &updates);
        assert_eq!(merged, "a=1\nb=20\nc=3");
    }

    #[test]
    fn test_merge_replace_onto_malformed_starts_empty() {
        let updates: DataBag = [("x", "1")].into_iter().collect();
        assert_eq!(merge_replace("garbage", &updates), "x=1");
    }

    #[test]
    fn test_successive_merges_compose() {
        let u1: DataBag = [("a", "1"), ("b", "1")].into_iter().collect();
        let u2: DataBag = [("b", "2"), ("c", "2")].into_iter().collect();

        let stepwise = merge_replace(&merge_replace("z=0", &u1), &u2);

        assert_eq!(stepwise, merge_replace("z=0", &u1.combine(&u2)));
    }

    #[test]
    fn test_merge_serialized() {
        let mut bag: DataBag = [("a", "1")].into_iter().collect();
        bag.merge_serialized("a=2\nb=3");
        assert_eq!(bag.value("a"), "2");
        assert_eq!(bag.value("b"), "3");
        assert_eq!(bag.value("missing"), "");
    }

    #[test]
    fn test_bag_json_is_plain_map() {
        let bag: DataBag = [("AppName", "My App")].into_iter().collect();
        let json = serde_json::to_string(&bag).unwrap();
        assert_eq!(json, r#"{"AppName":"My App"}"#);
    }
}
