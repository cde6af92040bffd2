//! Finder and status function helpers.
//!
//! A finder reads one remote object by identifier and reports "doesn't
//! exist" as [`Error::NotFound`]. A status function wraps a finder for a
//! [`Waiter`](crate::waiter::Waiter), turning not-found into `Ok(None)`.
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::{display::DisplayErrorContext, metadata::ProvideErrorMetadata};

use crate::{Error, Result};

/// Service error codes that mean the remote resource does not exist.
const NOT_FOUND_CODES: &[&str] = &["ResourceNotFoundException", "NotFoundException"];

impl<E, R> From<SdkError<E, R>> for Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: core::fmt::Debug + Send + Sync + 'static,
{
    fn from(err: SdkError<E, R>) -> Self {
        let code = err
            .as_service_error()
            .and_then(|e| e.code())
            .map(str::to_owned);
        let message = DisplayErrorContext(&err).to_string();
        if code
            .as_deref()
            .is_some_and(|code| NOT_FOUND_CODES.contains(&code))
        {
            return Error::NotFound { message };
        }
        Error::Api {
            code,
            message,
            source: Box::new(err),
        }
    }
}

/// Turns an absent payload into [`Error::EmptyResult`].
pub fn required<T>(value: Option<T>, what: impl Into<String>) -> Result<T> {
    value.ok_or_else(|| Error::EmptyResult { what: what.into() })
}

/// Picks the single object out of a batch read.
///
/// No objects means not-found, more than one is an error.
pub fn single<T>(values: Vec<T>, what: impl Into<String>) -> Result<T> {
    let mut values = values.into_iter();
    match (values.next(), values.len()) {
        (None, _) => Err(Error::NotFound {
            message: what.into(),
        }),
        (Some(value), 0) => Ok(value),
        (Some(_), rest) => Err(Error::TooManyResults {
            what: what.into(),
            count: rest + 1,
        }),
    }
}

/// Adapts the result of a finder into the result of a status function.
pub fn status<T>(
    found: Result<T>,
    status_of: impl FnOnce(&T) -> String,
) -> Result<Option<(T, String)>> {
    match found {
        Ok(value) => {
            let status = status_of(&value);
            Ok(Some((value, status)))
        }
        Err(e) if e.is_not_found() => {
            log::trace!("{e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Treats not-found as success, for deletes.
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            log::debug!("already gone: {e}");
            Ok(())
        }
        result => result,
    }
}

#[cfg(test)]
mod test {
    use aws_sdk_resourceexplorer2::{
        operation::get_index::GetIndexError,
        types::error::{ResourceNotFoundException, ThrottlingException},
    };
    use aws_smithy_runtime_api::http::{Response, StatusCode};
    use aws_smithy_types::{body::SdkBody, error::ErrorMetadata};

    use super::*;

    fn metadata(code: &str, message: &str) -> ErrorMetadata {
        ErrorMetadata::builder().code(code).message(message).build()
    }

    fn service_error(err: GetIndexError, status: u16) -> Error {
        let response = Response::new(StatusCode::try_from(status).unwrap(), SdkBody::empty());
        SdkError::service_error(err, response).into()
    }

    #[test]
    fn resource_not_found_exceptions_are_not_found() {
        let err = service_error(
            GetIndexError::ResourceNotFoundException(
                ResourceNotFoundException::builder()
                    .message("no index in us-east-1")
                    .meta(metadata("ResourceNotFoundException", "no index in us-east-1"))
                    .build(),
            ),
            404,
        );
        assert!(err.is_not_found(), "{err}");
        assert!(matches!(err, Error::NotFound { .. }), "{err:?}");
        assert!(err.to_string().contains("no index in us-east-1"), "{err}");
        ignore_not_found(Err(err)).unwrap();
    }

    #[test]
    fn not_found_exceptions_are_not_found() {
        let err = service_error(
            GetIndexError::generic(metadata("NotFoundException", "host is gone")),
            404,
        );
        assert!(err.is_not_found(), "{err}");
        assert_eq!(None, err.code());
    }

    #[test]
    fn other_service_errors_keep_their_code() {
        let err = service_error(
            GetIndexError::ThrottlingException(
                ThrottlingException::builder()
                    .message("slow down")
                    .meta(metadata("ThrottlingException", "slow down"))
                    .build(),
            ),
            429,
        );
        assert!(!err.is_not_found(), "{err}");
        assert!(err.has_code("ThrottlingException"), "{err:?}");
        assert!(err.to_string().contains("slow down"), "{err}");
        assert!(ignore_not_found(Err(err)).is_err());

        let err = service_error(GetIndexError::generic(ErrorMetadata::builder().build()), 500);
        assert!(!err.is_not_found(), "{err}");
        assert_eq!(None, err.code());
    }

    #[test]
    fn single_result() {
        assert_eq!(7, single(vec![7], "collection").unwrap());
        assert!(single(Vec::<u8>::new(), "collection")
            .unwrap_err()
            .is_not_found());
        match single(vec![1, 2, 3], "collection") {
            Err(Error::TooManyResults { count, .. }) => assert_eq!(3, count),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_maps_not_found_to_none() {
        let found = status(Ok("ws"), |_| "ACTIVE".to_owned()).unwrap();
        assert_eq!(Some(("ws", "ACTIVE".to_owned())), found);

        let missing = status::<&str>(
            Err(Error::NotFound {
                message: "gone".into(),
            }),
            |_| unreachable!(),
        )
        .unwrap();
        assert_eq!(None, missing);

        let err = status::<&str>(
            Err(Error::EmptyResult {
                what: "workspace".into(),
            }),
            |_| unreachable!(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptyResult { .. }));
    }

    #[test]
    fn empty_result_is_not_not_found() {
        let err = required::<u8>(None, "describe workspace").unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!("empty result: describe workspace", err.to_string());
    }

    #[test]
    fn deletes_ignore_not_found() {
        ignore_not_found(Err(Error::NotFound {
            message: "gone".into(),
        }))
        .unwrap();
        assert!(ignore_not_found(Err(Error::EmptyResult { what: "x".into() })).is_err());
    }
}
