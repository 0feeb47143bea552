/// Symbol keys used for permission lookups
///
/// A key names a package, class, field or method. Class paths are either
/// dot-separated (`java.lang.System.out`) or slash-separated
/// (`java/lang/System`), and a trailing `#name` selects a method.
use std::fmt;

/// Separator between a class path and a method name
pub const METHOD_SEPARATOR: char = '#';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Separator {
    Dot,
    Slash,
}

impl Separator {
    fn as_char(self) -> char {
        match self {
            Separator::Dot => '.',
            Separator::Slash => '/',
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolKey {
    separator: Separator,
    value: String,
}

impl SymbolKey {
    /// Pick the separator from the class path (the part before `#`)
    pub fn infer(value: impl Into<String>) -> Self {
        let value = value.into();
        let class_part = match value.find(METHOD_SEPARATOR) {
            Some(index) => &value[..index],
            None => value.as_str(),
        };
        if class_part.contains('/') {
            Self::slash_separated(value)
        } else {
            Self::dot_separated(value)
        }
    }

    pub fn dot_separated(value: impl Into<String>) -> Self {
        Self {
            separator: Separator::Dot,
            value: value.into(),
        }
    }

    pub fn slash_separated(value: impl Into<String>) -> Self {
        Self {
            separator: Separator::Slash,
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn separator(&self) -> Separator {
        self.separator
    }

    /// True if the key ends in a method selector
    pub fn denotes_method(&self) -> bool {
        self.value.contains(METHOD_SEPARATOR)
    }

    /// Split into path segments. The method part after `#` is always a single
    /// trailing segment, so parameter lists never add segments.
    pub fn split(&self) -> Vec<&str> {
        let (class_part, method_part) = match self.value.split_once(METHOD_SEPARATOR) {
            Some((class_part, method_part)) => (class_part, Some(method_part)),
            None => (self.value.as_str(), None),
        };
        let mut segments: Vec<&str> = class_part
            .split(self.separator.as_char())
            .filter(|segment| !segment.is_empty())
            .collect();
        if let Some(method) = method_part.filter(|method| !method.is_empty()) {
            segments.push(method);
        }
        if segments.is_empty() && !self.value.is_empty() {
            segments.push(self.value.as_str());
        }
        segments
    }

    pub fn last_part(&self) -> &str {
        self.split().last().copied().unwrap_or(self.value.as_str())
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}
