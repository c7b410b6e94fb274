//! Index name generation for time-based organization
//!
//! Generates names of the form:
//! `[{prefix}-]{base}-{date}` for daily indices,
//! `[{prefix}-]{base}-archive` for the archive index,
//! `[{prefix}-]{base}-[archive-]write` when writing through aliases.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use thiserror::Error;

pub const SPAN_INDEX_BASE_NAME: &str = "jaeger-span";
pub const SERVICE_INDEX_BASE_NAME: &str = "jaeger-service";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexNameError {
    #[error("invalid index date layout '{layout}'")]
    InvalidDateLayout { layout: String },
}

/// Rejects chrono format strings containing unknown or malformed specifiers
pub fn validate_date_layout(layout: &str) -> Result<(), IndexNameError> {
    if StrftimeItems::new(layout).any(|item| matches!(item, Item::Error)) {
        return Err(IndexNameError::InvalidDateLayout {
            layout: layout.to_string(),
        });
    }
    Ok(())
}

/// Resolves the index a document is written to from its timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNameProvider {
    index: String,
    date_layout: String,
    no_date_suffix: bool,
}

impl IndexNameProvider {
    /// # Arguments
    /// * `base` - Base index name (e.g. `jaeger-span`)
    /// * `prefix` - Optional tenant prefix; empty for none
    /// * `date_layout` - chrono format string for the daily suffix
    /// * `use_aliases` - Write through the `write` alias instead of dated indices
    /// * `archive` - Target the archive index
    pub fn new(
        base: &str,
        prefix: &str,
        date_layout: &str,
        use_aliases: bool,
        archive: bool,
    ) -> Result<Self, IndexNameError> {
        let no_date_suffix = use_aliases || archive;
        if !no_date_suffix {
            validate_date_layout(date_layout)?;
        }

        let mut index = String::new();
        if !prefix.is_empty() {
            index.push_str(prefix);
            index.push('-');
        }
        index.push_str(base);
        index.push('-');

        if archive {
            index.push_str("archive");
        }
        if use_aliases {
            if archive {
                index.push('-');
            }
            index.push_str("write");
        }

        Ok(Self {
            index,
            date_layout: date_layout.to_string(),
            no_date_suffix,
        })
    }

    pub fn index_name(&self, date: DateTime<Utc>) -> String {
        if self.no_date_suffix {
            return self.index.clone();
        }
        let mut name = self.index.clone();
        // the layout was checked in `new`, so formatting cannot fail here
        let _ = write!(name, "{}", date.format(&self.date_layout));
        name
    }
}

/// Template name for a base index, with the tenant prefix applied
pub fn template_name(prefix: &str, base: &str) -> String {
    if prefix.is_empty() {
        base.to_string()
    } else {
        format!("{}-{}", prefix, base)
    }
}
