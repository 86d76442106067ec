/// Ordered, case-insensitive multi-map of header names to values.
///
/// Names keep the case they were first inserted with, and serialize in insertion order.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<HeaderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Append a value, keeping any values already present for `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();

        match self.find(&name) {
            Some(index) => self.entries[index].values.push(value.into()),
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value.into()],
            }),
        }
    }

    /// Replace all values for `name` with a single value.
    ///
    /// An existing header keeps its position and original name case.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();

        match self.find(&name) {
            Some(index) => self.entries[index].values = vec![value.into()],
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value.into()],
            }),
        }
    }

    /// Get the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        let index = self.find(name)?;
        self.entries[index].values.first().map(String::as_str)
    }

    /// Get all values for `name`, in the order they were added.
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.find(name) {
            Some(index) => &self.entries[index].values,
            None => &[],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Remove `name`, returning its values.
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        match self.find(name) {
            Some(index) => self.entries.remove(index).values,
            None => Vec::new(),
        }
    }

    /// Check if any comma-separated element of any value of `name` equals `token`.
    ///
    /// Comparison is case-insensitive, for headers like `Connection: keep-alive, Upgrade`.
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name).any(|t| t.eq_ignore_ascii_case(token))
    }

    /// Iterate the trimmed comma-separated elements of all values of `name`.
    pub fn tokens<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.get_all(name)
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Iterate `(name, value)` pairs, one per value, in serialization order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|e| {
            e.values
                .iter()
                .map(move |v| (e.name.as_str(), v.as_str()))
        })
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert!(headers.contains("Content-type"));
    }

    #[test]
    fn values_keep_insertion_order() {
        let mut headers = Headers::new();
        headers.add("Set-Cookie", "a=1");
        headers.add("Host", "example.com");
        headers.add("set-cookie", "b=2");

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("Set-Cookie", "a=1"),
                ("Set-Cookie", "b=2"),
                ("Host", "example.com"),
            ]
        );
    }

    #[test]
    fn set_replaces_in_place() {
        let mut headers = Headers::new();
        headers.add("A", "1");
        headers.add("B", "2");
        headers.add("a", "3");
        headers.set("a", "4");

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(pairs, vec![("A", "4"), ("B", "2")]);
    }

    #[test]
    fn tokens_split_on_commas() {
        let mut headers = Headers::new();
        headers.add("Connection", "keep-alive, Upgrade");

        assert!(headers.contains_token("connection", "upgrade"));
        assert!(headers.contains_token("connection", "Keep-Alive"));
        assert!(!headers.contains_token("connection", "close"));
    }
}
