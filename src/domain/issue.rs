//! Issue identity: parsing a dated document out of filenames and rendering it
//! back as a storage key or a public name.
//!
//! Two grammars are understood:
//! - public names, `YYYY-MM-DD<ext>`, used by this service's own URLs;
//! - upstream names, `<random>-<random>-<M>-<D>-<YYYY><ext>`, as published by
//!   the source.
//!
//! Storage keys (`YYYY/MM/DD<ext>`) are parsed back only when scanning the
//! bucket.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::{debug, warn};

use crate::error::InvalidFilename;

static PUBLIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{4})-([0-9]{2})-([0-9]{2})$").unwrap());

static UPSTREAM_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{1,2})-([0-9]{1,2})-([0-9]{4})$").unwrap());

static STORAGE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{4})/([0-9]{2})/([0-9]{2})$").unwrap());

/// A dated document. Equality is by date and extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Issue {
    date: NaiveDate,
    extension: String,
}

impl Issue {
    pub fn from_date(date: NaiveDate, extension: impl Into<String>) -> Self {
        Self {
            date,
            extension: extension.into(),
        }
    }

    /// Parses `YYYY-MM-DD<ext>`. Directory components are ignored.
    pub fn from_public_name(name: &str) -> Result<Self, InvalidFilename> {
        let base = base_name(name);
        let (stem, ext) = split_ext(base);

        let date = PUBLIC_DATE
            .captures(stem)
            .and_then(|c| ymd(&c[1], &c[2], &c[3]))
            .ok_or_else(|| reject(InvalidFilename::BadDate { name: name.to_string() }))?;

        Ok(Self::from_date(date, ext))
    }

    /// Parses `<random>-<random>-<M>-<D>-<YYYY><ext>`. Month and day may be
    /// one or two digits, the year is always four.
    pub fn from_upstream_name(name: &str) -> Result<Self, InvalidFilename> {
        let base = base_name(name);
        let (stem, ext) = split_ext(base);

        // The date owns the last three hyphen-delimited segments, the prefix
        // is whatever precedes them.
        let mut parts = stem.rsplitn(4, '-');
        let (year, day, month) = (parts.next(), parts.next(), parts.next());
        let prefix = match parts.next() {
            Some(prefix) => prefix,
            None => {
                return Err(reject(InvalidFilename::MissingRandomPrefix {
                    name: name.to_string(),
                }))
            }
        };
        if !prefix.contains('-') {
            return Err(reject(InvalidFilename::MissingNonRandomPrefix {
                name: name.to_string(),
            }));
        }

        let date_part = match (month, day, year) {
            (Some(m), Some(d), Some(y)) => format!("{m}-{d}-{y}"),
            _ => String::new(),
        };
        let date = UPSTREAM_DATE
            .captures(&date_part)
            .and_then(|c| ymd(&c[3], &c[1], &c[2]))
            .ok_or_else(|| reject(InvalidFilename::BadDate { name: name.to_string() }))?;

        Ok(Self::from_date(date, ext))
    }

    /// Parses an object key of the form `YYYY/MM/DD<ext>`.
    pub fn from_storage_key(key: &str) -> Result<Self, InvalidFilename> {
        let (stem, ext) = split_ext(key);
        let date = STORAGE_DATE
            .captures(stem)
            .and_then(|c| ymd(&c[1], &c[2], &c[3]))
            .ok_or_else(|| {
                debug!(key, "Key is not a storage key");
                InvalidFilename::BadDate { name: key.to_string() }
            })?;

        Ok(Self::from_date(date, ext))
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// `YYYY/MM/DD<ext>`, the object key inside the bucket.
    pub fn storage_key(&self) -> String {
        format!(
            "{:04}/{:02}/{:02}{}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.extension
        )
    }

    /// `YYYY-MM-DD<ext>`, used in URLs and download filenames.
    pub fn public_name(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}{}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.extension
        )
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.public_name())
    }
}

/// Maps a request path (`2025-01-02.pdf`) to the storage key that holds it.
pub fn storage_key_for_public_path(path: &str) -> String {
    path.trim_start_matches('/').replace('-', "/")
}

fn reject(err: InvalidFilename) -> InvalidFilename {
    warn!(filename = %err.name(), reason = err.reason(), "Failed to parse filename");
    err
}

fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, base)| base)
}

/// Splits the extension off the last path segment, keeping the leading dot.
fn split_ext(path: &str) -> (&str, &str) {
    let segment_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[segment_start..].rfind('.') {
        Some(i) => path.split_at(segment_start + i),
        None => (path, ""),
    }
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}
