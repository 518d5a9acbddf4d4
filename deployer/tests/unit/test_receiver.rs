//! Trigger receiver tests

use std::sync::Arc;

use jsonwebtoken::{encode, EncodingKey, Header};
use secrecy::SecretString;

use deployer::config::{Config, DeploymentTarget};
use deployer::errors::DeployerError;
use deployer::queue::{JobQueue, JobState, ManualClock};
use deployer::receiver::{Receiver, TriggerClaims};

const SECRET: &str = "trigger-s3cret";

fn setup() -> (Receiver, Arc<JobQueue>) {
    let mut config = Config::with_targets(vec![
        DeploymentTarget::new("staging", "app:*"),
        DeploymentTarget::new("prod", "registry.local/app:*"),
    ])
    .unwrap();
    config.trigger_secret = Some(SecretString::from(SECRET.to_string()));
    let config = Arc::new(config);

    let queue = Arc::new(JobQueue::in_memory(
        config.clone(),
        Arc::new(ManualClock::default()),
    ));
    (Receiver::new(config, queue.clone()), queue)
}

fn scoped_token(target: &str) -> String {
    let claims = TriggerClaims {
        target: Some(target.to_string()),
        sub: Some("ci".to_string()),
        exp: chrono::Utc::now().timestamp() + 600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_accepts_and_deduplicates() {
    let (receiver, queue) = setup();
    let body = br#"{"target": "staging", "image_ref": "app:1.2", "source": "ci", "commit": "abc123"}"#;

    let first = receiver.handle_trigger(body, Some(SECRET)).await.unwrap();
    assert!(!first.deduplicated);

    let second = receiver.handle_trigger(body, Some(SECRET)).await.unwrap();
    assert_eq!(first.job_id, second.job_id);
    assert!(second.deduplicated);

    let status = queue.status(&first.job_id).await.unwrap();
    assert_eq!(status.state, JobState::Pending);
    assert_eq!(status.source.commit.as_deref(), Some("abc123"));
}

#[tokio::test]
async fn test_rejects_bad_credentials_before_enqueue() {
    let (receiver, queue) = setup();
    let body = br#"{"target": "staging", "image_ref": "app:1.2"}"#;

    for credential in [None, Some(""), Some("wrong")] {
        let err = receiver.handle_trigger(body, credential).await.unwrap_err();
        assert!(matches!(err, DeployerError::AuthenticationError(_)));
    }
    assert!(queue.jobs_for_target("staging").await.is_empty());
}

#[tokio::test]
async fn test_rejects_invalid_payloads() {
    let (receiver, queue) = setup();

    let cases: [&[u8]; 5] = [
        b"",
        b"not json",
        br#"{"target": "staging"}"#,
        br#"{"target": "", "image_ref": "app:1"}"#,
        br#"{"target": "staging", "image_ref": "app"}"#,
    ];
    for body in cases {
        let err = receiver.handle_trigger(body, Some(SECRET)).await.unwrap_err();
        assert!(
            matches!(err, DeployerError::ValidationError(_)),
            "unexpected error for {:?}: {:?}",
            String::from_utf8_lossy(body),
            err
        );
    }
    assert!(queue.jobs_for_target("staging").await.is_empty());
}

#[tokio::test]
async fn test_unknown_target() {
    let (receiver, _) = setup();
    let body = br#"{"target": "Staging", "image_ref": "app:1.2"}"#;
    let err = receiver.handle_trigger(body, Some(SECRET)).await.unwrap_err();
    assert!(matches!(err, DeployerError::UnknownTarget(_)));
}

#[tokio::test]
async fn test_image_must_match_target_pattern() {
    let (receiver, _) = setup();
    let body = br#"{"target": "prod", "image_ref": "evil.example.com/app:1.2"}"#;
    let err = receiver.handle_trigger(body, Some(SECRET)).await.unwrap_err();
    assert!(matches!(err, DeployerError::ValidationError(_)));

    let body = br#"{"target": "prod", "image_ref": "registry.local/app:1.2"}"#;
    assert!(receiver.handle_trigger(body, Some(SECRET)).await.is_ok());
}

#[tokio::test]
async fn test_scoped_token() {
    let (receiver, _) = setup();
    let token = scoped_token("staging");

    let body = br#"{"target": "staging", "image_ref": "app:1.2"}"#;
    assert!(receiver.handle_trigger(body, Some(&token)).await.is_ok());

    let body = br#"{"target": "prod", "image_ref": "registry.local/app:1.2"}"#;
    let err = receiver.handle_trigger(body, Some(&token)).await.unwrap_err();
    assert!(matches!(err, DeployerError::AuthenticationError(_)));
}
