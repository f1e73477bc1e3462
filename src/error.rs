use axum::http::StatusCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by ingestion and preview lookup.
///
/// Every variant except [`Error::Storage`] carries a transport classification,
/// see [`Error::status`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub const ERR_NO_SINGLE_FILE: &str = "field 'file' does not contain a single item";
pub const ERR_INCORRECT_DATA: &str = "incorrect data format";
pub const ERR_NOT_IMAGE: &str = "unsupported media type";
pub const ERR_NO_CONTENT_TYPE_EXT: &str = "file extension for content type not found";
pub const ERR_BAD_LOOKUP_NAME: &str = "incorrect filename";

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::UnsupportedMediaType(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(std::io::Error::other(message.into()))
    }

    /// The status the transport should answer with, `None` meaning an
    /// unclassified internal failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::BadRequest(_) => Some(StatusCode::BAD_REQUEST),
            Self::UnsupportedMediaType(_) => Some(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            Self::ServiceUnavailable(_) => Some(StatusCode::SERVICE_UNAVAILABLE),
            Self::NotFound(_) => Some(StatusCode::NOT_FOUND),
            Self::Storage(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_variants_expose_status() {
        assert_eq!(
            Error::bad_request("x").status(),
            Some(StatusCode::BAD_REQUEST)
        );
        assert_eq!(
            Error::unsupported_media_type("x").status(),
            Some(StatusCode::UNSUPPORTED_MEDIA_TYPE)
        );
        assert_eq!(
            Error::service_unavailable("x").status(),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
        assert_eq!(Error::not_found("x").status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn storage_errors_are_unclassified() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(err.status().is_none());
        assert!(err.to_string().starts_with("storage error"));
    }
}
