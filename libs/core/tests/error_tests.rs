use http::StatusCode;
use talk_core::{is_error, to_error, Error, ErrorCode};

#[test]
fn forward_mapping_table() {
    let table = [
        (ErrorCode::Ok, 200, 1000),
        (ErrorCode::Cancelled, 408, 1001),
        (ErrorCode::Unknown, 500, 1011),
        (ErrorCode::InvalidArgument, 400, 1003),
        (ErrorCode::DeadlineExceeded, 504, 1011),
        (ErrorCode::NotFound, 404, 1011),
        (ErrorCode::AlreadyExists, 409, 1011),
        (ErrorCode::PermissionDenied, 403, 1008),
        (ErrorCode::ResourceExhausted, 429, 1011),
        (ErrorCode::FailedPrecondition, 412, 1011),
        (ErrorCode::Aborted, 409, 1011),
        (ErrorCode::OutOfRange, 400, 1003),
        (ErrorCode::Unimplemented, 501, 1011),
        (ErrorCode::Internal, 500, 1011),
        (ErrorCode::Unavailable, 503, 1013),
        (ErrorCode::DataLoss, 500, 1011),
        (ErrorCode::Unauthenticated, 401, 1008),
    ];
    assert_eq!(table.len(), ErrorCode::ALL.len());
    for (code, http, ws) in table {
        assert_eq!(code.http_status().as_u16(), http, "{code}");
        assert_eq!(code.ws_close_code(), ws, "{code}");
    }
}

#[test]
fn reverse_mappings_are_lossy_but_deterministic() {
    assert_eq!(ErrorCode::from_http_status(StatusCode::NO_CONTENT), ErrorCode::Ok);
    assert_eq!(ErrorCode::from_http_status(StatusCode::CONFLICT), ErrorCode::AlreadyExists);
    assert_eq!(ErrorCode::from_http_status(StatusCode::IM_A_TEAPOT), ErrorCode::InvalidArgument);
    assert_eq!(ErrorCode::from_http_status(StatusCode::BAD_GATEWAY), ErrorCode::Internal);
    assert_eq!(
        ErrorCode::from_http_status(ErrorCode::Aborted.http_status()),
        ErrorCode::AlreadyExists
    );

    assert_eq!(ErrorCode::from_ws_close_code(1013), ErrorCode::Unavailable);
    assert_eq!(ErrorCode::from_ws_close_code(1008), ErrorCode::PermissionDenied);
    assert_eq!(ErrorCode::from_ws_close_code(4000), ErrorCode::Unknown);
}

#[test]
fn to_error_is_idempotent() {
    let original = Error::not_found("user 42");
    let once = to_error(original.clone());
    let twice = to_error(once.clone());
    assert_eq!(once, original);
    assert_eq!(twice, once);
}

#[test]
fn to_error_wraps_foreign_errors_verbatim() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
    let err = to_error(io);
    assert_eq!(err.code, ErrorCode::Unknown);
    assert_eq!(err.message, "disk on fire");

    let err = to_error("plain string failure");
    assert_eq!(err.code, ErrorCode::Unknown);
    assert_eq!(err.message, "plain string failure");
}

#[test]
fn is_error_test() {
    assert!(is_error(None).is_none());

    let err = Error::permission_denied("nope");
    let found = is_error(Some(&err as &(dyn std::error::Error + 'static))).map(Error::code);
    assert_eq!(found, Some(ErrorCode::PermissionDenied));

    let io = std::io::Error::new(std::io::ErrorKind::Other, "x");
    assert!(is_error(Some(&io as &(dyn std::error::Error + 'static))).is_none());
}

#[test]
fn error_serializes_with_code_names() {
    let err = Error::invalid_argument("bad id").with_details(serde_json::json!({"field": "id"}));
    let value = serde_json::to_value(&err).unwrap();
    assert_eq!(value["code"], "INVALID_ARGUMENT");
    assert_eq!(value["details"]["field"], "id");

    let back: Error = serde_json::from_value(value).unwrap();
    assert_eq!(back, err);
}
