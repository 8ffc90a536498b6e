//! Tag multi-map shared by every stream
//!
//! Keys are upper-cased on insertion. A key may hold several values, kept in
//! the order they were encountered; iteration walks keys in sorted order.

use std::collections::BTreeMap;

pub const TITLE: &str = "TITLE";
pub const ARTIST: &str = "ARTIST";
pub const ALBUM: &str = "ALBUM";
pub const GENRE: &str = "GENRE";
pub const DATE: &str = "DATE";
pub const TRACK_NUMBER: &str = "TRACKNUMBER";

/// Ordered multi-map from upper-case tag key to values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagStore {
    entries: BTreeMap<String, Vec<String>>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key` (case-folded to upper-case)
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .entry(key.to_uppercase())
            .or_default()
            .push(value.into());
    }

    /// Replace every value of `key` with a single value
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_uppercase(), vec![value.into()]);
    }

    /// First value stored for `key`
    pub fn first(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_uppercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values for `key`, in encounter order
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_uppercase())
    }

    /// Iterate `(key, value)` pairs, keys sorted, values in encounter order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Number of `(key, value)` pairs
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for TagStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = TagStore::new();
        for (k, v) in iter {
            store.insert(k.as_ref(), v);
        }
        store
    }
}

/// Parse a `KEY=value` comment
///
/// Returns `None` when there is no `=` or the key is empty. Only the first
/// `=` separates; the value may contain further `=` signs.
pub fn parse_comment(comment: &str) -> Option<(String, String)> {
    let (key, value) = comment.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_uppercase(), value.to_string()))
}

/// Year from a date value such as `1999`, `1999-04-01` or `1999/04`
pub fn leading_year(date: &str) -> Option<u32> {
    let digits: String = date.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

/// Rewrite `ALBUM` as `"YYYY - album"` when `DATE` starts with a year
pub fn prepend_year_to_album(tags: &mut TagStore) {
    let year = match tags.first(DATE).and_then(leading_year) {
        Some(year) => year,
        None => return,
    };
    if let Some(album) = tags.first(ALBUM) {
        let album = format!("{:04} - {}", year, album);
        tags.set(ALBUM, album);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_upper_cased() {
        let mut tags = TagStore::new();
        tags.insert("Title", "Song");
        assert_eq!(tags.first("TITLE"), Some("Song"));
        assert_eq!(tags.first("title"), Some("Song"));
        assert!(tags.contains_key("TiTlE"));
    }

    #[test]
    fn test_multiple_values_keep_encounter_order() {
        let mut tags = TagStore::new();
        tags.insert("artist", "B");
        tags.insert("ARTIST", "A");
        tags.insert("Artist", "C");
        assert_eq!(tags.get_all("artist"), ["B", "A", "C"]);
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn test_iteration_sorted_by_key() {
        let tags: TagStore = [("title", "t"), ("album", "a"), ("date", "1999")]
            .into_iter()
            .collect();
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["ALBUM", "DATE", "TITLE"]);
    }

    #[test]
    fn test_set_replaces_values() {
        let mut tags = TagStore::new();
        tags.insert("genre", "Rock");
        tags.insert("genre", "Pop");
        tags.set("GENRE", "Jazz");
        assert_eq!(tags.get_all("genre"), ["Jazz"]);
    }

    #[test]
    fn test_parse_comment() {
        assert_eq!(
            parse_comment("artist=Someone"),
            Some(("ARTIST".to_string(), "Someone".to_string()))
        );
        assert_eq!(
            parse_comment("COMMENT=a=b"),
            Some(("COMMENT".to_string(), "a=b".to_string()))
        );
        assert_eq!(parse_comment("TITLE="), Some(("TITLE".to_string(), String::new())));
        assert_eq!(parse_comment("=value"), None);
        assert_eq!(parse_comment("novalue"), None);
    }

    #[test]
    fn test_leading_year() {
        assert_eq!(leading_year("1999"), Some(1999));
        assert_eq!(leading_year("2004-05-01"), Some(2004));
        assert_eq!(leading_year("99"), None);
        assert_eq!(leading_year("unknown"), None);
    }

    #[test]
    fn test_prepend_year_to_album() {
        let mut tags: TagStore = [("album", "Blue"), ("date", "1971-06-22")].into_iter().collect();
        prepend_year_to_album(&mut tags);
        assert_eq!(tags.first(ALBUM), Some("1971 - Blue"));

        let mut undated: TagStore = [("album", "Blue")].into_iter().collect();
        prepend_year_to_album(&mut undated);
        assert_eq!(undated.first(ALBUM), Some("Blue"));
    }
}
