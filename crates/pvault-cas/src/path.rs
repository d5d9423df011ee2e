//! Addressing context for a vaulted attribute.

use std::fmt;
use std::path::PathBuf;

use crate::{Result, VaultError};

/// Where an attribute lives inside a trace: span-scoped or event-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath {
    pub trace_id: String,
    pub span_id: String,
    /// Index of the span event carrying the attribute, `None` for span attributes
    pub event_index: Option<usize>,
    pub attribute_key: String,
}

impl AttributePath {
    pub fn span(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        attribute_key: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            event_index: None,
            attribute_key: attribute_key.into(),
        }
    }

    pub fn event(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        event_index: usize,
        attribute_key: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            event_index: Some(event_index),
            attribute_key: attribute_key.into(),
        }
    }

    pub fn is_event_scoped(&self) -> bool {
        self.event_index.is_some()
    }

    /// Validated path segments: `trace/span[/event_n]/key...`.
    ///
    /// A `/` inside the attribute key introduces extra segments.
    pub fn segments(&self) -> Result<Vec<String>> {
        let mut segments = Vec::with_capacity(4);

        for (what, id) in [("trace id", &self.trace_id), ("span id", &self.span_id)] {
            if id.contains('/') || !is_valid_segment(id) {
                return Err(VaultError::InvalidPath(format!("{} {:?}", what, id)));
            }
            segments.push(id.clone());
        }

        if let Some(index) = self.event_index {
            segments.push(format!("event_{}", index));
        }

        for part in self.attribute_key.split('/') {
            if !is_valid_segment(part) {
                return Err(VaultError::InvalidPath(format!(
                    "attribute key {:?}",
                    self.attribute_key
                )));
            }
            segments.push(part.to_string());
        }

        Ok(segments)
    }

    /// Object path relative to a backend root.
    pub fn relative_path(&self) -> Result<PathBuf> {
        Ok(self.segments()?.iter().collect())
    }

    /// `/`-joined form used inside URIs.
    pub fn locator(&self) -> Result<String> {
        Ok(self.segments()?.join("/"))
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.event_index {
            Some(index) => write!(
                f,
                "{}/{}/event_{}/{}",
                self.trace_id, self.span_id, index, self.attribute_key
            ),
            None => write!(f, "{}/{}/{}", self.trace_id, self.span_id, self.attribute_key),
        }
    }
}

/// A single path component that cannot climb out of or alias its parent.
pub(crate) fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('\\')
        && !segment.contains('\0')
}
