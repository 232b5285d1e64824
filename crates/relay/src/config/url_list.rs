use std::fs;
use std::path::Path;

use tracing::trace;

use crate::protocol::ConfigError;

/// Ordered list of URLs eligible for interception, matched exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    urls: Vec<String>,
}

impl AllowList {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }

    /// Reads one URL per line.
    ///
    /// Both `\r\n` and `\n` terminate a line. A trailing line with no terminator and blank
    /// lines are skipped. Entries are cut to `max_url_length` bytes.
    pub fn load(path: impl AsRef<Path>, max_url_length: usize) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::url_list(path, e))?;
        Ok(Self::parse(&text, max_url_length))
    }

    pub fn parse(text: &str, max_url_length: usize) -> Self {
        let mut segments: Vec<&str> = text.split('\n').collect();
        // whatever follows the last '\n' is unterminated
        if let Some(last) = segments.pop()
            && !last.is_empty()
        {
            trace!(line = last, "skipping unterminated url line");
        }

        let urls = segments
            .into_iter()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| truncate(line, max_url_length).to_string())
            .collect();
        Self { urls }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.iter().any(|candidate| candidate == url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.urls.iter().map(String::as_str)
    }
}

fn truncate(line: &str, max: usize) -> &str {
    if line.len() <= max {
        return line;
    }
    let mut end = max;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}
