use channel_virality::error::partial_batch;
use channel_virality::{format_float, format_number, format_percent, EngineError, ItemFailure};

#[test]
fn partial_batch_only_when_something_failed() {
    assert!(partial_batch(10, &[]).is_none());

    let cause = EngineError::InvalidInput("views must not be negative, got -1".to_string());
    let failures = vec![ItemFailure::for_post(3, 42, &cause)];
    let err = partial_batch(10, &failures).unwrap();

    match &err {
        EngineError::PartialBatch(batch) => {
            assert_eq!(batch.attempted, 10);
            assert_eq!(batch.failures[0].post, Some(42));
        }
        other => panic!("expected PartialBatch, got {:?}", other),
    }
    assert!(err.to_string().starts_with("1 of 10 batch items failed"));
    assert!(!err.is_infrastructure());
}

#[test]
fn baseline_not_ready_names_the_channel() {
    let err = EngineError::BaselineNotReady {
        channel: 77,
        posts_analyzed: 4,
    };
    assert_eq!(
        err.to_string(),
        "baseline for channel 77 is not ready (4 eligible posts)"
    );
}

#[test]
fn formatting_helpers() {
    assert_eq!(format_number(1234567.0), "1,234,567");
    assert_eq!(format_number(999.4), "999");
    assert_eq!(format_percent(0.036), "3.6%");
    assert_eq!(format_float(2.77777, 2), "2.78");
}
