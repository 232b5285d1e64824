use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use super::{
    AllowList, UploadConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_URL_LENGTH, DEFAULT_SUBDIR_NUM, DEFAULT_THREAD_NUM, MAX_SUBDIR_NUM,
};
use crate::protocol::ConfigError;

const DELIMITERS: &[char] = &[' ', '\t', '\r', '\n'];

impl UploadConfig {
    /// Loads the configuration, falling back to defaults when the file can't be read.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(cause = %e, "failed to read upload config, using defaults");
                Self::default()
            }
        }
    }

    pub fn try_load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let mut config = Self::parse(&text);
        config.load_allow_list();
        Ok(config)
    }

    /// Parses config text and normalises the result. Does not touch the url list file.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines() {
            if line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split(DELIMITERS).filter(|t| !t.is_empty());
            let (Some(key), Some(value)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            config.apply(key, value);
        }
        config.normalize();
        config
    }

    /// Loads `url_list_file` into `allow_list`. An unreadable list is logged and treated as absent.
    pub fn load_allow_list(&mut self) {
        let Some(path) = &self.url_list_file else {
            return;
        };
        match AllowList::load(path, self.max_url_length) {
            Ok(list) => {
                debug!(path = %path.display(), urls = list.len(), "loaded url list");
                self.allow_list = Some(list);
            }
            Err(e) => {
                error!(cause = %e, "url list unavailable, no allow-list applied");
                self.allow_list = None;
            }
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "use_disk_buffer" => self.use_disk_buffer = parse_bool(value),
            "convert_url" => self.convert_url = parse_bool(value),
            "chunk_size" => set_uint(&mut self.chunk_size, key, value),
            "mem_buffer_size" => set_uint(&mut self.mem_buffer_size, key, value),
            "max_url_length" => set_uint(&mut self.max_url_length, key, value),
            "subdir_num" => set_uint(&mut self.subdir_num, key, value),
            "thread_num" => set_uint(&mut self.thread_num, key, value),
            "url_list_file" => self.url_list_file = Some(PathBuf::from(value)),
            "base_dir" => self.base_dir = PathBuf::from(value),
            "service_host" => self.service_host = Some(value.to_string()),
            _ => {
                debug!(key, "ignoring unknown config key");
                return;
            }
        }
        debug!(key, value, "parsed config value");
    }

    fn normalize(&mut self) {
        if let Some(stripped) = self.base_dir.to_str().and_then(|dir| dir.strip_suffix('/')).filter(|dir| !dir.is_empty()) {
            self.base_dir = PathBuf::from(stripped);
        }
        if self.subdir_num == 0 {
            self.subdir_num = DEFAULT_SUBDIR_NUM;
        }
        if self.subdir_num > MAX_SUBDIR_NUM {
            warn!(subdir_num = self.subdir_num, "subdir_num clamped to {MAX_SUBDIR_NUM}");
            self.subdir_num = MAX_SUBDIR_NUM;
        }
        if self.thread_num == 0 {
            self.thread_num = DEFAULT_THREAD_NUM;
        }
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.max_url_length == 0 {
            self.max_url_length = DEFAULT_MAX_URL_LENGTH;
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value.starts_with(['1', 't'])
}

fn set_uint(slot: &mut usize, key: &str, value: &str) {
    match value.parse::<usize>() {
        Ok(n) => *slot = n,
        Err(_) => warn!(key, value, "ignoring non-numeric config value"),
    }
}
