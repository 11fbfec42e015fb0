/*!
Select the tables a run operates on.
*/

use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, error};

use crate::context::BackupContext;
use crate::store::OP_LIST_TABLES;
use crate::{BackupError, Result};

/// Tables selected by a pattern, in the order the store listed them
#[derive(Debug, Default)]
pub struct TableMatch {
    pub tables: Vec<String>,
    /// Number of listing pages read successfully
    pub pages: usize,
    /// Set when the listing failed part-way; `tables` then holds the matches seen so far
    pub listing_error: Option<BackupError>,
}

impl TableMatch {
    pub fn is_complete(&self) -> bool {
        self.listing_error.is_none()
    }

    /// Turn a partial listing into an error
    pub fn into_complete(self) -> Result<Vec<String>> {
        match self.listing_error {
            None => Ok(self.tables),
            Some(source) => Err(BackupError::IncompleteListing {
                pages: self.pages,
                source: Box::new(source),
            }),
        }
    }
}

/// Filters the store's table listing with a regular expression
///
/// A name matches when the pattern matches anywhere in it; anchor the
/// pattern (`^orders_`, `^logs$`) to restrict it.
#[derive(Debug, Clone)]
pub struct TableMatcher {
    pattern: Regex,
}

impl TableMatcher {
    /// Compile `pattern`; an invalid pattern is rejected here, before any store call
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|source| BackupError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(TableMatcher { pattern })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn is_match(&self, table: &str) -> bool {
        self.pattern.is_match(table)
    }

    /// Read every page of the table listing and keep the matching names
    ///
    /// A listing error stops the scan; the matches gathered up to that point
    /// are returned along with the error.
    pub async fn matching_tables(&self, ctx: &BackupContext) -> TableMatch {
        let mut matched = TableMatch::default();
        let mut seen = HashSet::new();
        let mut start: Option<String> = None;

        loop {
            let page = match ctx
                .call(OP_LIST_TABLES, ctx.store().list_tables(start.take()))
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(
                        regex = %self.pattern(),
                        pages = matched.pages,
                        matched = matched.tables.len(),
                        error = %e,
                        "Table listing failed, continuing with partial match set"
                    );
                    matched.listing_error = Some(e);
                    break;
                }
            };

            matched.pages += 1;
            debug!(page = matched.pages, tables = page.names.len(), "Listed tables");

            for name in page.names {
                if self.is_match(&name) && seen.insert(name.clone()) {
                    matched.tables.push(name);
                }
            }

            match page.next {
                Some(next) => start = Some(next),
                None => break,
            }
        }

        matched
    }
}
