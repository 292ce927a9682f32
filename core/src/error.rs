use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown data source '{data_source}'")]
    UnknownDataSource { data_source: String },

    #[error("Unknown column '{column}' for data source '{data_source}'")]
    UnknownColumn { data_source: String, column: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Alert '{alert_id}' has a change condition but no previous row was supplied")]
    MissingPreviousData { alert_id: String },

    #[error("Query execution failed for '{data_source}': {source}")]
    QueryExecution {
        data_source: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReportError {
    /// Wrap any backend failure as a single opaque execution error.
    pub fn query_execution<E>(data_source: &str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ReportError::QueryExecution {
            data_source: data_source.to_string(),
            source: source.into(),
        }
    }
}

pub type ReportResult<T> = Result<T, ReportError>;

/// One offending field in a report, filter or alert definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Path of the field, e.g. `filters[2].operator`.
    pub field: String,
    pub message: String,
}

/// Every violation found while validating a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.push(field, message);
        err
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// True if any violation names `field` exactly.
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    /// `Ok(())` when nothing was collected, otherwise the whole list.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed ({} violation", self.violations.len())?;
        if self.violations.len() != 1 {
            write!(f, "s")?;
        }
        write!(f, ")")?;
        for v in &self.violations {
            write!(f, "; {}: {}", v.field, v.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}
