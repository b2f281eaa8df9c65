//! A small INI dialect
//!
//! ```text
//! ; comment
//! [dbInfo]
//! host = 127.0.0.1   # inline comment
//! url = http://%(host)s:6041
//! description = first line
//!     second line
//! ```
//!
//! Section and option names are case-insensitive. A `default` section always exists and is
//! consulted when a `%(name)s` reference cannot be resolved in the section of the option.

use std::{collections::HashMap, path::Path, str::FromStr, sync::LazyLock};

use regex::Regex;

use crate::{Error, Result};

pub const DEFAULT_SECTION: &str = "default";

/// Number of `%(name)s` substitutions after which a value is assumed to reference itself
pub const MAX_SUBSTITUTION_DEPTH: usize = 200;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%\(([a-zA-Z0-9_.\-]+)\)s").expect("variable pattern is a valid regex")
});

const INLINE_COMMENT_MARKERS: [&str; 4] = [" ;", "\t;", " #", "\t#"];

/// Parsed config file: sections mapping option names to raw values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniFile {
    sections: HashMap<String, HashMap<String, String>>,
}

impl Default for IniFile {
    fn default() -> Self {
        Self::new()
    }
}

impl IniFile {
    /// An empty file holding only the `default` section
    pub fn new() -> Self {
        let mut file = Self {
            sections: HashMap::new(),
        };
        file.add_section(DEFAULT_SECTION);
        file
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    /// Add `section` if it is not there yet, returns `true` if it was added
    pub fn add_section(&mut self, section: &str) -> bool {
        let section = section.to_lowercase();
        if self.sections.contains_key(&section) {
            return false;
        }
        self.sections.insert(section, HashMap::new());
        true
    }

    /// Set `option` in `section`, creating the section on demand
    ///
    /// Returns `true` if the option did not exist before.
    pub fn add_option(&mut self, section: &str, option: &str, value: impl Into<String>) -> bool {
        self.sections
            .entry(section.to_lowercase())
            .or_default()
            .insert(option.to_lowercase(), value.into())
            .is_none()
    }

    pub fn has_option(&self, section: &str, option: &str) -> bool {
        self.get_raw(section, option).is_ok()
    }

    /// The value of `option` as written in the file, without substitution
    pub fn get_raw(&self, section: &str, option: &str) -> Result<&str> {
        let section = section.to_lowercase();
        let option = option.to_lowercase();
        let options = self
            .sections
            .get(&section)
            .ok_or(Error::SectionNotFound(section))?;
        options
            .get(&option)
            .map(String::as_str)
            .ok_or(Error::OptionNotFound(option))
    }

    /// The value of `option` with every `%(name)s` reference expanded
    pub fn get(&self, section: &str, option: &str) -> Result<String> {
        let mut value = self.get_raw(section, option)?.to_owned();
        let section = section.to_lowercase();

        for _ in 0..MAX_SUBSTITUTION_DEPTH {
            let Some((range, name)) = VARIABLE
                .captures(&value)
                .and_then(|c| Some((c.get(0)?.range(), c.get(1)?.as_str().to_lowercase())))
            else {
                return Ok(value);
            };

            let replacement = self
                .sections
                .get(&section)
                .and_then(|options| options.get(&name))
                .or_else(|| {
                    self.sections
                        .get(DEFAULT_SECTION)
                        .and_then(|options| options.get(&name))
                })
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::OptionNotFound(name.clone()))?;

            value.replace_range(range, replacement);
        }

        Err(Error::SubstitutionCycle(MAX_SUBSTITUTION_DEPTH))
    }

    /// The expanded value of `option` parsed into `T`
    pub fn get_parsed<T>(&self, section: &str, option: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.get(section, option)?;
        value.parse().map_err(|e: T::Err| Error::InvalidValue {
            section: section.to_owned(),
            option: option.to_owned(),
            value: value.clone(),
            message: e.to_string(),
        })
    }
}

impl FromStr for IniFile {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut file = Self::new();
        let mut section: Option<String> = None;
        let mut option: Option<String> = None;

        for (i, line) in text.lines().enumerate() {
            let line_number = i + 1;
            let line = line.trim();

            if line.is_empty() || is_comment(line) {
                continue;
            }

            if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim();
                file.add_section(name);
                section = Some(name.to_owned());
                option = None;
                continue;
            }

            let Some(current) = section.as_deref() else {
                return Err(Error::MissingSectionHeader { line_number });
            };

            match line.find('=') {
                Some(i) if i > 0 => {
                    let name = line[..i].trim();
                    let value = strip_comments(&line[i + 1..]).trim();
                    file.add_option(current, name, value);
                    option = Some(name.to_owned());
                }
                _ => {
                    let Some(previous) = option.as_deref() else {
                        return Err(Error::ParseLine {
                            line_number,
                            line: line.to_owned(),
                        });
                    };
                    // continuation of a multi-line value
                    let value = strip_comments(line).trim();
                    let joined = format!("{}\n{value}", file.get_raw(current, previous)?);
                    file.add_option(current, previous, joined);
                }
            }
        }

        Ok(file)
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#')
        || line.starts_with(';')
        || line
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("rem"))
}

fn strip_comments(value: &str) -> &str {
    let mut value = value;
    for marker in INLINE_COMMENT_MARKERS {
        if let Some(i) = value.find(marker) {
            value = &value[..i];
        }
    }
    value
}
