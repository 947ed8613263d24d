//! Relabel rule definitions.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ta_labels::is_valid_label_name;

use crate::RelabelError;

pub const DEFAULT_SEPARATOR: &str = ";";
pub const DEFAULT_REGEX: &str = "(.*)";
pub const DEFAULT_REPLACEMENT: &str = "$1";

static DEFAULT_COMPILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&anchor(DEFAULT_REGEX)).expect("default relabel regex compiles"));

fn anchor(pattern: &str) -> String {
    format!("^(?s:{pattern})$")
}

/// What a rule does with the labels it matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Replace,
    Keep,
    Drop,
    KeepEqual,
    DropEqual,
    HashMod,
    LabelMap,
    LabelDrop,
    LabelKeep,
    Lowercase,
    Uppercase,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Replace => "replace",
            Action::Keep => "keep",
            Action::Drop => "drop",
            Action::KeepEqual => "keepequal",
            Action::DropEqual => "dropequal",
            Action::HashMod => "hashmod",
            Action::LabelMap => "labelmap",
            Action::LabelDrop => "labeldrop",
            Action::LabelKeep => "labelkeep",
            Action::Lowercase => "lowercase",
            Action::Uppercase => "uppercase",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = RelabelError;

    /// Action names are matched case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s.to_ascii_lowercase().as_str() {
            "replace" => Action::Replace,
            "keep" => Action::Keep,
            "drop" => Action::Drop,
            "keepequal" => Action::KeepEqual,
            "dropequal" => Action::DropEqual,
            "hashmod" => Action::HashMod,
            "labelmap" => Action::LabelMap,
            "labeldrop" => Action::LabelDrop,
            "labelkeep" => Action::LabelKeep,
            "lowercase" => Action::Lowercase,
            "uppercase" => Action::Uppercase,
            _ => return Err(RelabelError::UnknownAction(s.to_string())),
        };
        Ok(action)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// A fully anchored regular expression that remembers its source pattern.
#[derive(Clone)]
pub struct Regexp {
    pattern: String,
    regex: Regex,
}

impl Regexp {
    /// Compile `pattern`, anchored at both ends with `.` matching newlines.
    pub fn new(pattern: &str) -> Result<Self, RelabelError> {
        let regex = Regex::new(&anchor(pattern)).map_err(|e| RelabelError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_default(&self) -> bool {
        self.pattern == DEFAULT_REGEX
    }

    pub(crate) fn regex(&self) -> &Regex {
        &self.regex
    }
}

impl Default for Regexp {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_REGEX.to_string(),
            regex: DEFAULT_COMPILED.clone(),
        }
    }
}

impl PartialEq for Regexp {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Regexp {}

impl fmt::Debug for Regexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Regexp").field(&self.pattern).finish()
    }
}

impl Serialize for Regexp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for Regexp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Regexp::new(&pattern).map_err(serde::de::Error::custom)
    }
}

/// One relabel rule.
///
/// Missing fields take the Prometheus defaults: separator `;`, regex
/// `(.*)`, replacement `$1` and action `replace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelabelConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_labels: Vec<String>,
    pub separator: String,
    pub regex: Regexp,
    #[serde(skip_serializing_if = "is_zero")]
    pub modulus: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_label: String,
    pub replacement: String,
    pub action: Action,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Default for RelabelConfig {
    fn default() -> Self {
        Self {
            source_labels: Vec::new(),
            separator: DEFAULT_SEPARATOR.to_string(),
            regex: Regexp::default(),
            modulus: 0,
            target_label: String::new(),
            replacement: DEFAULT_REPLACEMENT.to_string(),
            action: Action::Replace,
        }
    }
}

impl RelabelConfig {
    /// Check the rule is well formed for its action.
    pub fn validate(&self) -> Result<(), RelabelError> {
        let action = self.action;

        if action == Action::HashMod && self.modulus == 0 {
            return Err(RelabelError::ZeroModulus);
        }

        let needs_target = matches!(
            action,
            Action::Replace
                | Action::HashMod
                | Action::Lowercase
                | Action::Uppercase
                | Action::KeepEqual
                | Action::DropEqual
        );
        if needs_target && self.target_label.is_empty() {
            return Err(RelabelError::MissingTargetLabel(action));
        }

        // `replace` may template its target label from capture groups.
        let templated = action == Action::Replace && self.target_label.contains('$');
        if needs_target && !templated && !is_valid_label_name(&self.target_label) {
            return Err(RelabelError::InvalidTargetLabel {
                action,
                label: self.target_label.clone(),
            });
        }

        match action {
            Action::KeepEqual | Action::DropEqual => {
                self.reject_custom_regex()?;
                self.reject_modulus()?;
                self.reject_custom_separator()?;
                self.reject_custom_replacement()?;
            }
            Action::LabelDrop | Action::LabelKeep => {
                if !self.source_labels.is_empty() {
                    return Err(self.unexpected("source_labels"));
                }
                if !self.target_label.is_empty() {
                    return Err(self.unexpected("target_label"));
                }
                self.reject_modulus()?;
                self.reject_custom_separator()?;
                self.reject_custom_replacement()?;
            }
            _ => {}
        }

        Ok(())
    }

    fn unexpected(&self, field: &'static str) -> RelabelError {
        RelabelError::UnexpectedField {
            action: self.action,
            field,
        }
    }

    fn reject_custom_regex(&self) -> Result<(), RelabelError> {
        match self.regex.is_default() {
            true => Ok(()),
            false => Err(self.unexpected("regex")),
        }
    }

    fn reject_modulus(&self) -> Result<(), RelabelError> {
        match self.modulus {
            0 => Ok(()),
            _ => Err(self.unexpected("modulus")),
        }
    }

    fn reject_custom_separator(&self) -> Result<(), RelabelError> {
        match self.separator == DEFAULT_SEPARATOR {
            true => Ok(()),
            false => Err(self.unexpected("separator")),
        }
    }

    fn reject_custom_replacement(&self) -> Result<(), RelabelError> {
        match self.replacement == DEFAULT_REPLACEMENT {
            true => Ok(()),
            false => Err(self.unexpected("replacement")),
        }
    }
}
