//! Explicit table of command-line entry points.
//!
//! Every admin command is a [`KeywordExecutable`] addressed by a fixed keyword.
//! The table is built once at startup from a hard-coded list; a keyword that
//! shows up more than once is reported instead of letting one entry silently
//! replace another.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use tracing::warn;

use crate::admin::AdminContext;
use crate::error::FateError;

/// A command reachable as `fate <keyword> [args...]`.
pub trait KeywordExecutable: Send + Sync {
    /// Stable name users type on the command line.
    fn keyword(&self) -> &'static str;

    /// One-line summary shown in the keyword listing.
    fn description(&self) -> &'static str;

    /// Run with the arguments that followed the keyword.
    fn execute(
        &self,
        ctx: &mut AdminContext,
        args: &[String],
        out: &mut dyn Write,
    ) -> anyhow::Result<()>;
}

/// Result of [`check_duplicates`].
pub struct CheckedKeywords {
    pub unique: BTreeMap<&'static str, Box<dyn KeywordExecutable>>,
    pub duplicates: BTreeSet<&'static str>,
}

/// Keep the executables whose keyword appears exactly once.
///
/// Every copy of a repeated keyword is dropped and the keyword is logged.
pub fn check_duplicates(executables: Vec<Box<dyn KeywordExecutable>>) -> CheckedKeywords {
    let mut unique: BTreeMap<&'static str, Box<dyn KeywordExecutable>> = BTreeMap::new();
    let mut duplicates = BTreeSet::new();

    for executable in executables {
        let keyword = executable.keyword();
        if duplicates.contains(keyword) {
            continue;
        }
        if unique.remove(keyword).is_some() {
            duplicates.insert(keyword);
            continue;
        }
        unique.insert(keyword, executable);
    }

    for keyword in &duplicates {
        warn!(keyword = *keyword, "keyword registered more than once; ignoring every copy");
    }

    CheckedKeywords { unique, duplicates }
}

/// Lookup table from keyword to command.
pub struct KeywordRegistry {
    executables: BTreeMap<&'static str, Box<dyn KeywordExecutable>>,
}

impl KeywordRegistry {
    /// Build the table, failing if any keyword repeats.
    pub fn from_executables(executables: Vec<Box<dyn KeywordExecutable>>) -> Result<Self, FateError> {
        let checked = check_duplicates(executables);
        if !checked.duplicates.is_empty() {
            return Err(FateError::DuplicateKeywords(
                checked.duplicates.into_iter().map(str::to_string).collect(),
            ));
        }
        Ok(Self {
            executables: checked.unique,
        })
    }

    pub fn get(&self, keyword: &str) -> Option<&dyn KeywordExecutable> {
        self.executables.get(keyword).map(|executable| executable.as_ref())
    }

    /// Registered commands in keyword order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn KeywordExecutable> {
        self.executables.values().map(|executable| executable.as_ref())
    }

    pub fn len(&self) -> usize {
        self.executables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executables.is_empty()
    }
}
