//! Ordered RTSP header storage with spelling-insensitive lookup.

use std::collections::HashMap;
use std::fmt;

/// Normalise a header or option name for lookup: lowercase, drop
/// underscores, drop a single leading dash.
///
/// `CSeq`, `cseq`, `C_Seq`, and `-cseq` all normalise to `cseq`, so callers
/// can spell names however their configuration style prefers.
pub fn normalize_name(name: &str) -> String {
    let name = name.strip_prefix('-').unwrap_or(name);
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Ordered list of RTSP headers (RFC 2326 §4.2).
///
/// Stores `(name, value)` pairs as-received, preserving original casing and
/// insertion order for serialisation, while lookups go through a normalised
/// index so that `get("CSeq")`, `get("cseq")`, and `get("C_Seq")` all match.
///
/// A header may be present with no value (`None`); it serialises as a bare
/// `Name:` line.
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    entries: Vec<(String, Option<String>)>,
    index: HashMap<String, Vec<usize>>,
}

impl HeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any earlier occurrences of the same name.
    pub fn add(&mut self, name: &str, value: &str) {
        self.push(name, Some(value.to_string()));
    }

    /// Append a header that has a name but no value.
    pub fn add_unvalued(&mut self, name: &str) {
        self.push(name, None);
    }

    fn push(&mut self, name: &str, value: Option<String>) {
        let position = self.entries.len();
        self.entries.push((name.to_string(), value));
        self.index
            .entry(normalize_name(name))
            .or_default()
            .push(position);
    }

    /// Value of the first occurrence of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_nth(name, 1)
    }

    /// Value of the `n`-th occurrence of `name` (1-based).
    pub fn get_nth(&self, name: &str, n: usize) -> Option<&str> {
        let positions = self.index.get(&normalize_name(name))?;
        let position = *positions.get(n.checked_sub(1)?)?;
        self.entries[position].1.as_deref()
    }

    /// Overwrite the first occurrence of `name`, or append if absent.
    pub fn set(&mut self, name: &str, value: &str) {
        self.set_nth(name, value, 1);
    }

    /// Overwrite the `n`-th occurrence of `name` (1-based), or append if
    /// there is no such occurrence.
    pub fn set_nth(&mut self, name: &str, value: &str, n: usize) {
        let position = n
            .checked_sub(1)
            .and_then(|i| self.index.get(&normalize_name(name))?.get(i).copied());
        match position {
            Some(position) => self.entries[position].1 = Some(value.to_string()),
            None => self.add(name, value),
        }
    }

    /// Remove the `n`-th occurrence of `name` (1-based). Returns whether an
    /// entry was removed.
    pub fn remove(&mut self, name: &str, n: usize) -> bool {
        let position = n
            .checked_sub(1)
            .and_then(|i| self.index.get(&normalize_name(name))?.get(i).copied());
        let Some(position) = position else {
            return false;
        };
        self.entries.remove(position);
        self.rebuild_index();
        true
    }

    /// Whether at least one occurrence of `name` exists.
    pub fn is_set(&self, name: &str) -> bool {
        self.index.contains_key(&normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    /// Serialise all headers in insertion order, one `Name: Value\r\n` line
    /// per entry. Entries without a value keep their `Name:` line.
    pub fn serialise(&self) -> String {
        let mut out = String::new();
        self.serialise_into(&mut out);
        out
    }

    pub fn serialise_into(&self, out: &mut String) {
        for (name, value) in &self.entries {
            match value {
                Some(value) => {
                    out.push_str(name);
                    out.push_str(": ");
                    out.push_str(value);
                }
                None => {
                    out.push_str(name);
                    out.push(':');
                }
            }
            out.push_str("\r\n");
        }
    }

    // Entry positions shift on removal; recompute the whole index rather
    // than patching offsets.
    fn rebuild_index(&mut self) {
        self.index.clear();
        for (position, (name, _)) in self.entries.iter().enumerate() {
            self.index
                .entry(normalize_name(name))
                .or_default()
                .push(position);
        }
    }
}

/// Equality is over the entry list; the index is derived state.
impl PartialEq for HeaderStore {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl fmt::Display for HeaderStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialise())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_underscores_and_leading_dash() {
        let mut headers = HeaderStore::new();
        headers.add("Content-Length", "42");

        assert_eq!(headers.get("content-length"), Some("42"));
        assert_eq!(headers.get("CONTENT-LENGTH"), Some("42"));
        assert_eq!(headers.get("Content_Length"), Some("42"));
        assert_eq!(headers.get("-content-length"), Some("42"));
        assert!(headers.is_set("-Content_Length"));
    }

    #[test]
    fn preserves_casing_and_insertion_order() {
        let mut headers = HeaderStore::new();
        headers.add("CSeq", "1");
        headers.add("Session", "ABC");
        headers.add("CSeq", "2");

        assert_eq!(
            headers.serialise(),
            "CSeq: 1\r\nSession: ABC\r\nCSeq: 2\r\n"
        );
    }

    #[test]
    fn nth_occurrence_get_set_remove() {
        let mut headers = HeaderStore::new();
        headers.add("Via", "a");
        headers.add("Via", "b");
        headers.add("Via", "c");

        assert_eq!(headers.get_nth("via", 2), Some("b"));
        assert_eq!(headers.get_nth("via", 4), None);

        headers.set_nth("Via", "B", 2);
        assert_eq!(headers.get_nth("via", 2), Some("B"));

        assert!(headers.remove("via", 1));
        assert_eq!(headers.get("via"), Some("B"));
        assert_eq!(headers.get_nth("via", 2), Some("c"));
        assert!(!headers.remove("via", 5));
    }

    #[test]
    fn set_appends_when_absent() {
        let mut headers = HeaderStore::new();
        headers.set("CSeq", "7");
        assert_eq!(headers.get("CSeq"), Some("7"));
        assert_eq!(headers.len(), 1);

        headers.set("CSeq", "8");
        assert_eq!(headers.get("CSeq"), Some("8"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn unvalued_header_keeps_its_name_line() {
        let mut headers = HeaderStore::new();
        headers.add("Require", "implicit-play");
        headers.add_unvalued("Blocksize");

        assert!(headers.is_set("blocksize"));
        assert_eq!(headers.get("blocksize"), None);
        assert_eq!(
            headers.serialise(),
            "Require: implicit-play\r\nBlocksize:\r\n"
        );
    }
}
