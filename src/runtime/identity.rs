// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::runtime::errors::LocalError;

/// Canonical identity of an object: an optional category plus a name.
///
/// Stringified as `category/name` (bare `name` when the category is empty);
/// `/` and `\` inside either part are backslash-escaped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub category: String,
    pub name: String,
}

impl Identity {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new("", name)
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_empty() && self.name.is_empty()
    }

    pub fn parse(s: &str) -> Result<Self, LocalError> {
        let mut category = String::new();
        let mut current = String::new();
        let mut seen_slash = false;

        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(esc @ ('/' | '\\')) => current.push(esc),
                    _ => {
                        return Err(LocalError::TransportBroken(format!(
                            "bad escape in identity `{s}'"
                        )));
                    },
                },
                '/' => {
                    if seen_slash {
                        return Err(LocalError::TransportBroken(format!(
                            "too many slashes in identity `{s}'"
                        )));
                    }
                    seen_slash = true;
                    category = std::mem::take(&mut current);
                },
                other => current.push(other),
            }
        }

        Ok(Self {
            category,
            name: current,
        })
    }
}

fn escape(part: &str, out: &mut String) {
    for c in part.chars() {
        if c == '/' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::with_capacity(self.category.len() + self.name.len() + 1);
        if !self.category.is_empty() {
            escape(&self.category, &mut out);
            out.push('/');
        }
        escape(&self.name, &mut out);
        f.write_str(&out)
    }
}
