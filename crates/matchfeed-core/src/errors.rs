/// Rejected request input.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} {reason}")]
    Field { field: &'static str, reason: String },

    #[error("{0}")]
    Invalid(String),
}

impl ValidationError {
    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Field {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the offending field, if the error is tied to one.
    pub fn field_name(&self) -> Option<&'static str> {
        match self {
            Self::Field { field, .. } => Some(field),
            Self::Invalid(_) => None,
        }
    }
}
