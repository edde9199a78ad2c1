//! Filter criteria accepted by scans and bulk actions

use serde::{Deserialize, Serialize};

use super::builder::quote_value;

/// Gmail inbox category tabs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Primary,
    Social,
    Promotions,
    Updates,
    Forums,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Primary => "primary",
            Category::Social => "social",
            Category::Promotions => "promotions",
            Category::Updates => "updates",
            Category::Forums => "forums",
        }
    }
}

/// Structured search criteria; every absent field imposes no constraint
///
/// Age values use Gmail's relative form (`30d`, `6m`, `1y`), size values a
/// byte count with an optional `K`/`M` suffix (`5M`). Empty strings count
/// as absent; a sender or label with nothing but whitespace or control
/// characters fails [`Filter::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filter {
    pub older_than: Option<String>,
    pub newer_than: Option<String>,
    pub larger_than: Option<String>,
    pub smaller_than: Option<String>,
    pub category: Option<Category>,
    pub label: Option<String>,
    pub sender: Option<String>,
    pub unread_only: bool,
    pub inbox_only: bool,
}

/// Rejected filter input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("invalid age '{0}': expected a number followed by d, m or y")]
    InvalidAge(String),
    #[error("invalid size '{0}': expected a number optionally followed by K or M")]
    InvalidSize(String),
    #[error("{0} must contain printable characters")]
    BlankValue(&'static str),
}

impl Filter {
    /// Filter matching everything from one sender
    pub fn from_sender(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        present(&self.older_than).is_none()
            && present(&self.newer_than).is_none()
            && present(&self.larger_than).is_none()
            && present(&self.smaller_than).is_none()
            && self.category.is_none()
            && present(&self.label).is_none()
            && present(&self.sender).is_none()
            && !self.unread_only
            && !self.inbox_only
    }

    /// Check ages and sizes, which are interpolated without quoting, and
    /// that quoted values keep something to match on
    ///
    /// Ranges are not cross-checked: a `newer_than` wider than `older_than`
    /// passes through and simply matches nothing.
    pub fn validate(&self) -> Result<(), FilterError> {
        for age in [&self.older_than, &self.newer_than].into_iter().filter_map(present) {
            if !is_valid_age(age) {
                return Err(FilterError::InvalidAge(age.to_string()));
            }
        }
        for size in [&self.larger_than, &self.smaller_than].into_iter().filter_map(present) {
            if !is_valid_size(size) {
                return Err(FilterError::InvalidSize(size.to_string()));
            }
        }
        for (field, value) in [("label", &self.label), ("sender", &self.sender)] {
            if let Some(value) = value.as_deref()
                && !value.is_empty()
                && quote_value(value).is_none()
            {
                return Err(FilterError::BlankValue(field));
            }
        }
        Ok(())
    }
}

/// Treat empty and whitespace-only values as absent
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn split_number(value: &str) -> (&str, &str) {
    let digits = value.chars().take_while(char::is_ascii_digit).count();
    value.split_at(digits)
}

fn is_valid_age(value: &str) -> bool {
    let (number, unit) = split_number(value);
    !number.is_empty() && matches!(unit, "d" | "m" | "y")
}

fn is_valid_size(value: &str) -> bool {
    let (number, unit) = split_number(value);
    !number.is_empty() && matches!(unit, "" | "K" | "k" | "M" | "m")
}
