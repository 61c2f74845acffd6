// SPDX-License-Identifier: Apache-2.0

/// A setting that may be unset, explicitly empty, or set to a value.
///
/// Settings are resolved through a chain of sources ordered from highest to lowest priority
/// (command line, environment, config file, built-in default). The first source that is not
/// [`Tristate::Unset`] decides the outcome, and [`Tristate::Null`] means "explicitly empty": the
/// chain stops there and the result is `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Tristate<T> {
    /// This source says nothing; consult the next one.
    #[default]
    Unset,

    /// This source explicitly clears the setting.
    Null,

    /// This source sets a value.
    Value(T),
}

impl<T> Tristate<T> {
    /// Converts an optional value where `None` means unset.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Value(value),
            None => Self::Unset,
        }
    }

    /// Returns true if this is [`Tristate::Unset`].
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Returns `self` unless it is unset, in which case returns `next`.
    pub fn or(self, next: Self) -> Self {
        match self {
            Self::Unset => next,
            other => other,
        }
    }

    /// Returns `self` unless it is unset, in which case calls `next`.
    pub fn or_else(self, next: impl FnOnce() -> Self) -> Self {
        match self {
            Self::Unset => next(),
            other => other,
        }
    }

    /// Maps the value, if any.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tristate<U> {
        match self {
            Self::Unset => Tristate::Unset,
            Self::Null => Tristate::Null,
            Self::Value(value) => Tristate::Value(f(value)),
        }
    }

    /// Collapses to an `Option`: both unset and null become `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Unset | Self::Null => None,
        }
    }

    /// Resolves a chain ordered from highest to lowest priority.
    pub fn resolve(chain: impl IntoIterator<Item = Self>) -> Option<T> {
        chain
            .into_iter()
            .find(|source| !source.is_unset())
            .and_then(Self::into_option)
    }
}

impl Tristate<String> {
    /// Reads an environment-style value: absent is unset, empty is null.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            None => Self::Unset,
            Some(value) if value.trim().is_empty() => Self::Null,
            Some(value) => Self::Value(value.to_owned()),
        }
    }
}
