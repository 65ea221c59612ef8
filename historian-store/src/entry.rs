//! History entry structure.
//!
//! Represents one command invocation: the command text, when it ran and the
//! directory it ran in.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// A single command history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    /// Caller supplied index, e.g. the shell's own history number. Informational only.
    pub id: Option<i64>,
    /// The command text.
    pub data: String,
    /// When the command ran. Sort key inside its directory.
    pub time: DateTime<Utc>,
    /// Working directory the command ran in. Selects the partition.
    pub directory: String,
    /// Free-form note attached to the command.
    pub annotation: Option<String>,
}

impl History {
    pub fn new(
        command: impl Into<String>,
        directory: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        History {
            id: None,
            data: command.into(),
            time,
            directory: directory.into(),
            annotation: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Attach an annotation. Empty text leaves the entry unannotated.
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        let annotation = annotation.into();
        self.annotation = (!annotation.is_empty()).then_some(annotation);
        self
    }

    pub(crate) fn from_row(
        directory: &str,
        time: DateTime<Utc>,
        command: &[u8],
        annotation: Option<&[u8]>,
    ) -> Self {
        let history = History::new(String::from_utf8_lossy(command), directory, time);
        match annotation {
            Some(note) => history.with_annotation(String::from_utf8_lossy(note)),
            None => history,
        }
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({})",
            self.time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.data,
            self.directory
        )?;
        if let Some(annotation) = &self.annotation {
            write!(f, " /*{annotation}*/")?;
        }
        Ok(())
    }
}
