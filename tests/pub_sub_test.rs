mod common;

use assert_matches::assert_matches;
use wamp_peer::{
    core::{
        close::CloseCode,
        publish_options::PublishOptions,
        types::{
            Dictionary,
            List,
            Value,
        },
        uri::Uri,
    },
    peer::{
        PublicationEvent,
        PublishedEvent,
        ReceivedEvent,
        SessionEvent,
        SubscriptionEvent,
    },
};

use crate::common::{
    connected_peer,
    join_realm,
};

#[tokio::test]
async fn subscribes_receives_events_and_unsubscribes() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = connected_peer("subscriber").await;
    join_realm(&peer, &mut router, "somerealm", 9129137332).await;

    let mut subscription = peer
        .subscribe(Uri::try_from("com.myapp.mytopic1").unwrap())
        .await
        .unwrap();
    assert_eq!(
        router.expect_text().await,
        r#"[32,1,{},"com.myapp.mytopic1"]"#
    );

    router.send_text("[33,1,5512315355]");
    assert_matches!(
        subscription.recv().await,
        Some(SubscriptionEvent::Established { subscription }) => {
            assert_eq!(subscription, 5512315355.try_into().unwrap());
        }
    );

    router.send_text(
        r#"[36,5512315355,4429313566,{},[],{"color":"orange","sizes":[23,42,7]}]"#,
    );
    assert_matches!(subscription.recv().await, Some(SubscriptionEvent::Event(event)) => {
        assert_eq!(event, ReceivedEvent {
            arguments: List::default(),
            arguments_keyword: Dictionary::from_iter([
                ("color".to_owned(), Value::String("orange".to_owned())),
                ("sizes".to_owned(), Value::List(List::from_iter([
                    Value::Integer(23),
                    Value::Integer(42),
                    Value::Integer(7),
                ]))),
            ]),
        });
    });

    peer.unsubscribe(5512315355.try_into().unwrap())
        .await
        .unwrap();
    assert_eq!(router.expect_text().await, "[34,2,5512315355]");

    router.send_text("[35,2]");
    assert_matches!(subscription.recv().await, Some(SubscriptionEvent::Closed));
    assert_matches!(subscription.recv().await, None);
}

#[tokio::test]
async fn unsubscribing_an_unknown_subscription_is_ignored() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = connected_peer("ignorer").await;
    join_realm(&peer, &mut router, "somerealm", 9129137332).await;

    peer.unsubscribe(424242.try_into().unwrap()).await.unwrap();
    router.expect_silence().await;
}

#[tokio::test]
async fn subscription_failure_reaches_only_its_channel() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = connected_peer("denied-subscriber").await;
    join_realm(&peer, &mut router, "somerealm", 9129137332).await;
    let mut session_event_rx = peer.session_event_rx().await.unwrap();

    let mut subscription = peer
        .subscribe(Uri::try_from("com.myapp.mytopic1").unwrap())
        .await
        .unwrap();
    router.expect_text().await;

    router.send_text(r#"[8,32,1,{"message":"denied"},"wamp.error.not_authorized"]"#);
    assert_matches!(subscription.recv().await, Some(SubscriptionEvent::Failed(error)) => {
        assert_eq!(error.reason().as_ref(), "wamp.error.not_authorized");
        assert_eq!(error.message(), "denied");
    });
    assert_matches!(subscription.recv().await, None);

    // Operation-level errors leave the session established.
    assert_matches!(peer.current_session_id().await, Ok(Some(_)));
    let error = session_event_rx.try_recv();
    assert_matches!(error, Err(tokio::sync::broadcast::error::TryRecvError::Empty));
}

#[tokio::test]
async fn publishes_without_acknowledgement() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = connected_peer("publisher").await;
    join_realm(&peer, &mut router, "somerealm", 9129137332).await;

    let mut publication = peer
        .publish_with_options(
            Uri::try_from("com.myapp.mytopic1").unwrap(),
            PublishedEvent {
                arguments: List::from_iter([Value::String("Hello, world!".to_owned())]),
                arguments_keyword: Dictionary::default(),
            },
            PublishOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        router.expect_text().await,
        r#"[16,1,{},"com.myapp.mytopic1",["Hello, world!"]]"#
    );

    // Fire-and-forget publications have an empty event stream.
    assert_matches!(publication.recv().await, None);
}

#[tokio::test]
async fn acknowledged_publication_succeeds() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = connected_peer("acked-publisher").await;
    join_realm(&peer, &mut router, "somerealm", 9129137332).await;

    let mut publication = peer
        .publish_with_options(
            Uri::try_from("com.myapp.mytopic1").unwrap(),
            PublishedEvent::default(),
            PublishOptions { acknowledge: true },
        )
        .await
        .unwrap();
    assert_eq!(
        router.expect_text().await,
        r#"[16,1,{"acknowledge":true},"com.myapp.mytopic1"]"#
    );

    router.send_text("[17,1,7126353]");
    assert_matches!(
        publication.recv().await,
        Some(PublicationEvent::Published { publication }) => {
            assert_eq!(publication, 7126353.try_into().unwrap());
        }
    );
    assert_matches!(publication.recv().await, None);
}

#[tokio::test]
async fn acknowledged_publication_fails() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = connected_peer("refused-publisher").await;
    join_realm(&peer, &mut router, "somerealm", 9129137332).await;

    let mut publication = peer
        .publish_with_options(
            Uri::try_from("com.myapp.mytopic1").unwrap(),
            PublishedEvent::default(),
            PublishOptions { acknowledge: true },
        )
        .await
        .unwrap();
    assert_eq!(
        router.expect_text().await,
        r#"[16,1,{"acknowledge":true},"com.myapp.mytopic1"]"#
    );

    router.send_text(r#"[8,16,1,{},"wamp.error.not_authorized"]"#);
    assert_matches!(publication.recv().await, Some(PublicationEvent::Failed(error)) => {
        assert_eq!(error.reason().as_ref(), "wamp.error.not_authorized");
    });
    assert_matches!(publication.recv().await, None);
}

#[tokio::test]
async fn events_racing_an_unsubscribe_are_dropped() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = connected_peer("racer").await;
    join_realm(&peer, &mut router, "somerealm", 9129137332).await;

    let mut subscription = peer
        .subscribe(Uri::try_from("com.myapp.mytopic1").unwrap())
        .await
        .unwrap();
    router.expect_text().await;
    router.send_text("[33,1,5512315355]");
    assert_matches!(
        subscription.recv().await,
        Some(SubscriptionEvent::Established { .. })
    );

    peer.unsubscribe(5512315355.try_into().unwrap())
        .await
        .unwrap();
    assert_eq!(router.expect_text().await, "[34,2,5512315355]");

    // The router routed an event before seeing our UNSUBSCRIBE. It is not a protocol violation.
    router.send_text(r#"[36,5512315355,4429313566,{},["late"]]"#);

    router.send_text("[35,2]");
    assert_matches!(subscription.recv().await, Some(SubscriptionEvent::Closed));
    assert_matches!(subscription.recv().await, None);
}

#[tokio::test]
async fn aborts_on_event_for_unknown_subscription() {
    test_utils::setup::setup_test_environment();

    let (peer, mut router) = connected_peer("surprised").await;
    join_realm(&peer, &mut router, "somerealm", 9129137332).await;
    let mut session_event_rx = peer.session_event_rx().await.unwrap();

    router.send_text(r#"[36,999,4429313566,{}]"#);

    let abort = router.expect_text().await;
    assert!(abort.ends_with(r#""wamp.error.protocol_violation"]"#), "got {abort}");
    assert_eq!(router.expect_close().await, CloseCode::ProtocolError);
    assert_matches!(session_event_rx.recv().await, Ok(SessionEvent::Aborted(_)));
}
