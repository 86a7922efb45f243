//! Mapping of [`AppServerError`] to gRPC status codes.

use tonic::Status;

use loraapp_types::AppServerError;

/// Converts a request-time error into the status returned to the caller.
///
/// Storage failures are logged here and reported without their detail.
pub fn to_status(err: AppServerError) -> Status {
    match err {
        AppServerError::InvalidArgument { reason } => Status::invalid_argument(reason),
        AppServerError::NotFound { reason } => Status::not_found(reason),
        AppServerError::AlreadyExists { reason } => Status::already_exists(reason),
        AppServerError::StorageError { reason } => {
            tracing::error!(%reason, "storage failure while serving request");
            Status::internal("storage error")
        }
        other => {
            tracing::error!(error = %other, "unexpected error while serving request");
            Status::internal(other.to_string())
        }
    }
}

/// Parses a hex identifier from a request field.
pub(crate) fn parse_field<T>(field: &str, value: &str) -> Result<T, Status>
where
    T: std::str::FromStr<Err = AppServerError>,
{
    value.parse::<T>().map_err(|e| match e {
        AppServerError::InvalidArgument { reason } => {
            Status::invalid_argument(format!("{field}: {reason}"))
        }
        other => to_status(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use loraapp_types::Eui64;
    use tonic::Code;

    #[test]
    fn maps_codes() {
        let cases = [
            (AppServerError::InvalidArgument { reason: "x".into() }, Code::InvalidArgument),
            (AppServerError::NotFound { reason: "x".into() }, Code::NotFound),
            (AppServerError::AlreadyExists { reason: "x".into() }, Code::AlreadyExists),
            (AppServerError::StorageError { reason: "disk".into() }, Code::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(to_status(err).code(), code);
        }
    }

    #[test]
    fn storage_detail_is_hidden() {
        let status = to_status(AppServerError::StorageError {
            reason: "/var/lib/loraapp/db: io error".into(),
        });
        assert!(!status.message().contains("/var/lib"));
    }

    #[test]
    fn parse_field_names_the_field() {
        let status = match parse_field::<Eui64>("devEUI", "nothex") {
            Err(status) => status,
            Ok(_) => panic!("expected invalid argument"),
        };
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().starts_with("devEUI"));
    }
}
