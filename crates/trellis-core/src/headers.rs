//! Header container
//!
//! Case-insensitive mapping from header name to value. Names are stored
//! lowercased; repeated headers keep one entry whose values are joined by
//! `"\n"`, which is how multiple `set-cookie` lines travel through the
//! pipeline until the listener splits them back apart.

use smallvec::SmallVec;

/// Separator used for multi-valued headers
pub const VALUE_SEPARATOR: char = '\n';

/// Ordered, case-insensitive header map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: SmallVec<[(String, String); 8]>,
}

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Set a header, replacing any previous value
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        let value = value.into();
        match self.position(name) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((normalize(name), value)),
        }
    }

    /// Add a value, joining with any existing one
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref();
        let value = value.into();
        match self.position(name) {
            Some(idx) => {
                let existing = &mut self.entries[idx].1;
                if existing.is_empty() {
                    *existing = value;
                } else {
                    existing.push(VALUE_SEPARATOR);
                    existing.push_str(&value);
                }
            }
            None => self.entries.push((normalize(name), value)),
        }
    }

    /// Get the raw (possibly joined) value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.entries[idx].1.as_str())
    }

    /// Get every value of a multi-valued header
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .map(|v| v.split(VALUE_SEPARATOR).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove a header, returning its value
    pub fn delete(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    /// Iterate `(name, value)` in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate wire lines, splitting multi-valued entries
    pub fn each_line(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, v)| v.split(VALUE_SEPARATOR).map(move |line| (k.as_str(), line)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
