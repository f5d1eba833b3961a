use super::*;

#[test]
fn input_disconnected_is_not_a_failure() {
    assert!(!Status::Ok.is_failure());
    assert!(!Status::InputDisconnected.is_failure());
    assert!(Status::Failed.is_failure());
    assert!(Status::Aborted.is_failure());
    assert!(Status::OutOfMemory.is_failure());
}

#[test]
fn error_status_round_trip() {
    for status in [
        Status::Failed,
        Status::Aborted,
        Status::InputDisconnected,
        Status::OutOfMemory,
    ] {
        let err = RenderError::from_status(status).unwrap();
        assert_eq!(err.status(), status);
    }
    assert!(RenderError::from_status(Status::Ok).is_none());
}

#[test]
fn status_of_results() {
    assert_eq!(status_of(&Ok(())), Status::Ok);
    let r: RenderResult<()> = Err(RenderError::Aborted);
    assert_eq!(status_of(&r), Status::Aborted);
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = RenderError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
    assert_eq!(err.status(), Status::Failed);
}

#[test]
fn failed_message_is_displayed() {
    let err = RenderError::failed("no such plane");
    assert!(err.to_string().contains("no such plane"));
}
