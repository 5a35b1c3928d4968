use async_graphql::ErrorExtensions;
use thiserror::Error;

use crate::metadata::MetadataError;

/// Errors raised while generating the schema or resolving a request
#[derive(Debug, Error)]
pub enum GraphqlError {
    /// A column kind has no GraphQL mapping. Non-fatal: the field is omitted.
    #[error("unsupported column type `{kind}` for `{column}`")]
    UnsupportedType { column: String, kind: String },
    #[error("cannot derive a GraphQL name for {0}")]
    NameMissing(String),
    #[error("duplicate GraphQL name `{0}`")]
    DuplicateName(String),
    #[error("`{column}` references table `{table}`, which has no generated type")]
    DanglingReference { column: String, table: String },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadInput(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("error generating schema: {0}")]
    Schema(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl GraphqlError {
    /// Machine readable code exposed in `extensions.code`
    pub fn code(&self) -> &'static str {
        match self {
            GraphqlError::NotFound(_) => "NOT_FOUND",
            GraphqlError::BadInput(_) => "BAD_INPUT",
            GraphqlError::NotImplemented(_) => "NOT_IMPLEMENTED",
            _ => "INTERNAL",
        }
    }

    /// Whether the message may be shown to clients verbatim
    pub fn is_client_safe(&self) -> bool {
        matches!(
            self,
            GraphqlError::NotFound(_) | GraphqlError::BadInput(_) | GraphqlError::NotImplemented(_)
        )
    }
}

impl ErrorExtensions for GraphqlError {
    fn extend(&self) -> async_graphql::Error {
        let message = if self.is_client_safe() {
            self.to_string()
        } else {
            tracing::error!(error = %self, "resolver failed");
            "Internal server error".to_string()
        };
        async_graphql::Error::new(message).extend_with(|_, e| e.set("code", self.code()))
    }
}

pub fn not_found(msg: impl Into<String>) -> GraphqlError {
    GraphqlError::NotFound(msg.into())
}

pub fn bad_input(msg: impl Into<String>) -> GraphqlError {
    GraphqlError::BadInput(msg.into())
}

pub fn schema_error(msg: impl Into<String>) -> GraphqlError {
    GraphqlError::Schema(msg.into())
}
