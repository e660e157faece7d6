use std::sync::Arc;

use chrono::Utc;
use integration_tests::*;
use services::Diagnostics;
use tracing_subscriber::layer::SubscriberExt;

#[tokio::test]
async fn service_events_reach_the_operator_rings() {
    let diagnostics = Arc::new(Diagnostics::new(cap(8), cap(32)));
    let subscriber = tracing_subscriber::registry().with(diagnostics.layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempfile::tempdir().unwrap();
    let forum = open_forum(dir.path()).await;
    let op = forum
        .submit(new_topic("Hello", "World", "10.0.0.1"), Utc::now())
        .await
        .unwrap();
    forum.archive_topic(op.topic()).await.unwrap();

    let reader = open_forum_with(dir.path(), b"wrong-salt", settings()).await;
    assert!(reader.resolve(op.topic()).await.is_err());

    let notices: Vec<_> = diagnostics.notices().into_iter().map(|m| m.text).collect();
    assert!(notices.iter().any(|n| n.contains("topic created")));
    assert!(notices.iter().any(|n| n.contains("topic archived")));

    let errors = diagnostics.errors();
    assert!(!errors.is_empty());
    assert!(errors[0].text.contains("archived topic unavailable"));
}
