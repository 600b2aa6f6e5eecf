//! `@talk` routing annotations.
//!
//! Grammar: a line containing `@talk` followed by space-separated
//! `key=value` tokens, or one of the bare markers `skip`, `ignore`, `-`.
//! Recognised keys are `path`, `method`, `stream`, `skip` and `ignore`;
//! anything else is kept as an opaque tag. Values may be double-quoted.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::endpoint::StreamMode;

static ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@talk(?:\s+(?P<args>.*))?$").expect("annotation pattern compiles")
});

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?P<key>[A-Za-z_][\w.-]*)="(?P<quoted>[^"]*)"|(?P<pair>[A-Za-z_][\w.-]*)=(?P<plain>\S*)|(?P<bare>\S+)"#)
        .expect("token pattern compiles")
});

/// Routing overrides parsed from one or more `@talk` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub path: Option<String>,
    pub method: Option<String>,
    pub stream: Option<StreamMode>,
    pub skip: bool,
    pub tags: BTreeMap<String, String>,
}

impl Annotation {
    /// Parse a single line. `None` when the line carries no `@talk` marker.
    pub fn parse_line(line: &str) -> Option<Annotation> {
        let caps = ANNOTATION.captures(line.trim())?;
        let mut annotation = Annotation::default();
        if let Some(args) = caps.name("args") {
            annotation.apply_args(args.as_str());
        }
        Some(annotation)
    }

    /// Parse every `@talk` line out of a block of doc lines.
    ///
    /// Later lines override earlier ones field by field.
    pub fn parse_lines<I, S>(lines: I) -> Option<Annotation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        lines
            .into_iter()
            .filter_map(|line| Annotation::parse_line(line.as_ref()))
            .reduce(|mut acc, next| {
                acc.merge(next);
                acc
            })
    }

    /// Overlay `other` onto `self`; set fields in `other` win.
    pub fn merge(&mut self, other: Annotation) {
        if other.path.is_some() {
            self.path = other.path;
        }
        if other.method.is_some() {
            self.method = other.method;
        }
        if other.stream.is_some() {
            self.stream = other.stream;
        }
        self.skip |= other.skip;
        self.tags.extend(other.tags);
    }

    fn apply_args(&mut self, args: &str) {
        for caps in TOKEN.captures_iter(args) {
            if let Some(bare) = caps.name("bare") {
                match bare.as_str() {
                    "skip" | "ignore" | "-" => self.skip = true,
                    other => {
                        self.tags.insert(other.to_string(), String::new());
                    }
                }
                continue;
            }

            let (key, value) = match (caps.name("key"), caps.name("quoted")) {
                (Some(key), Some(value)) => (key.as_str(), value.as_str()),
                _ => match (caps.name("pair"), caps.name("plain")) {
                    (Some(key), Some(value)) => (key.as_str(), value.as_str()),
                    _ => continue,
                },
            };
            self.apply_pair(key, value);
        }
    }

    fn apply_pair(&mut self, key: &str, value: &str) {
        match key {
            "path" if !value.is_empty() => self.path = Some(value.to_string()),
            "method" if !value.is_empty() => self.method = Some(value.to_ascii_uppercase()),
            "stream" => match value.parse::<StreamMode>() {
                Ok(mode) => self.stream = Some(mode),
                Err(_) => {
                    tracing::warn!(value, "ignoring unknown @talk stream mode");
                }
            },
            "skip" | "ignore" => {
                if matches!(value, "true" | "1") {
                    self.skip = true;
                }
            }
            _ => {
                self.tags.insert(key.to_string(), value.to_string());
            }
        }
    }
}
