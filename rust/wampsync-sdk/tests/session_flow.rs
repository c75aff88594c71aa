use futures_util::StreamExt;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use wampsync_sdk::transport::{loopback, LoopbackRouter};
use wampsync_sdk::{
    ContentIdentifier, Dict, FeedMerger, MergeError, MergerConfig, Payload, ProtocolError,
    RequestError, Session, SessionConfig, SessionState, SubscriptionError, TicketAuthenticator,
    WampMessage,
};

const WAIT: Duration = Duration::from_secs(2);

async fn next_message(router: &mut LoopbackRouter) -> WampMessage {
    timeout(WAIT, router.recv())
        .await
        .expect("router waited too long")
        .expect("client hung up")
}

async fn welcome(router: &mut LoopbackRouter, session_id: u64) {
    let hello = next_message(router).await;
    assert!(matches!(hello, WampMessage::Hello { .. }), "got {:?}", hello);
    router
        .send(WampMessage::Welcome {
            session_id,
            details: Dict::new(),
        })
        .await
        .unwrap();
}

async fn established_session(session_id: u64) -> (Session, LoopbackRouter) {
    let (transport, mut router) = loopback();
    let session = Session::start(transport, SessionConfig::new("sports"));
    welcome(&mut router, session_id).await;
    assert_eq!(session.established().await.unwrap(), session_id);
    (session, router)
}

fn kwargs(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => Payload::with_kwargs(map),
        other => panic!("not an object: {}", other),
    }
}

async fn expect_subscribe(router: &mut LoopbackRouter) -> (u64, String) {
    match next_message(router).await {
        WampMessage::Subscribe {
            request_id, topic, ..
        } => (request_id, topic),
        other => panic!("expected SUBSCRIBE, got {:?}", other),
    }
}

async fn expect_call(router: &mut LoopbackRouter) -> (u64, String, Payload) {
    match next_message(router).await {
        WampMessage::Call {
            request_id,
            procedure,
            payload,
            ..
        } => (request_id, procedure, payload),
        other => panic!("expected CALL, got {:?}", other),
    }
}

/// Answers the SUBSCRIBE and the initial-dump CALL of one sports feed.
async fn serve_feed(
    router: &mut LoopbackRouter,
    subscription_id: u64,
    dump: serde_json::Value,
) -> String {
    let (request_id, topic) = expect_subscribe(router).await;
    router
        .send(WampMessage::Subscribed {
            request_id,
            subscription_id,
        })
        .await
        .unwrap();
    let (request_id, procedure, _) = expect_call(router).await;
    assert_eq!(procedure, "/sports#initialDump");
    router
        .send(WampMessage::Result {
            request_id,
            details: Dict::new(),
            payload: kwargs(dump),
        })
        .await
        .unwrap();
    topic
}

fn sports_event(
    subscription_id: u64,
    publication_id: u64,
    body: serde_json::Value,
) -> WampMessage {
    WampMessage::Event {
        subscription_id,
        publication_id,
        details: Dict::new(),
        payload: kwargs(body),
    }
}

#[tokio::test]
async fn test_ticket_challenge_handshake() {
    let (transport, mut router) = loopback();
    let session = Session::start_with_authenticator(
        transport,
        SessionConfig::new("sports").with_authmethod("ticket"),
        TicketAuthenticator::new("s3cret"),
    );

    match next_message(&mut router).await {
        WampMessage::Hello { realm, details } => {
            assert_eq!(realm, "sports");
            assert_eq!(details["authmethods"], json!(["ticket"]));
            assert!(details["roles"].get("subscriber").is_some());
        }
        other => panic!("expected HELLO, got {:?}", other),
    }

    router
        .send(WampMessage::Challenge {
            auth_method: "ticket".into(),
            extra: Dict::new(),
        })
        .await
        .unwrap();
    match next_message(&mut router).await {
        WampMessage::Authenticate { signature, .. } => assert_eq!(signature, "s3cret"),
        other => panic!("expected AUTHENTICATE, got {:?}", other),
    }

    router
        .send(WampMessage::Welcome {
            session_id: 42,
            details: Dict::new(),
        })
        .await
        .unwrap();
    assert_eq!(session.established().await.unwrap(), 42);
    assert_eq!(session.state(), SessionState::Established { session_id: 42 });
}

#[tokio::test]
async fn test_abort_during_handshake() {
    let (transport, mut router) = loopback();
    let session = Session::start(transport, SessionConfig::new("nowhere"));
    next_message(&mut router).await;

    router
        .send(WampMessage::Abort {
            details: Dict::new(),
            reason: "wamp.error.no_such_realm".into(),
        })
        .await
        .unwrap();

    match session.established().await {
        Err(ProtocolError::SessionAborted { reason, .. }) => {
            assert_eq!(reason, "wamp.error.no_such_realm")
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.state().name(), "aborted");
    assert!(matches!(
        session.call("anything", Payload::new()).await,
        Err(RequestError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_subscriptions_share_one_router_subscription() {
    let (session, mut router) = established_session(7).await;

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.subscribe(ContentIdentifier::topic("/scores")).await }
    });
    let (request_id, topic) = expect_subscribe(&mut router).await;
    assert_eq!(topic, "/scores");
    let second = tokio::spawn({
        let session = session.clone();
        async move { session.subscribe(ContentIdentifier::topic("/scores")).await }
    });

    router
        .send(WampMessage::Subscribed {
            request_id,
            subscription_id: 900,
        })
        .await
        .unwrap();
    let mut first = first.await.unwrap().unwrap();
    let mut second = second.await.unwrap().unwrap();
    assert_eq!(first.subscription_id(), 900);
    assert_eq!(second.subscription_id(), 900);
    assert_eq!(first.session_id(), 7);

    router
        .send(WampMessage::Event {
            subscription_id: 900,
            publication_id: 1,
            details: Dict::new(),
            payload: Payload::with_args(vec![json!("goal")]),
        })
        .await
        .unwrap();
    let event = timeout(WAIT, first.next_event()).await.unwrap().unwrap();
    assert_eq!(event.payload.args, vec![json!("goal")]);
    let event = timeout(WAIT, second.next_event()).await.unwrap().unwrap();
    assert_eq!(event.publication_id, 1);

    drop(first);
    let closing = tokio::spawn({
        let session = session.clone();
        async move { session.unsubscribe(second).await }
    });

    // Only the last holder reaches the router.
    let request_id = match next_message(&mut router).await {
        WampMessage::Unsubscribe {
            request_id,
            subscription_id,
        } => {
            assert_eq!(subscription_id, 900);
            request_id
        }
        other => panic!("expected UNSUBSCRIBE, got {:?}", other),
    };
    router
        .send(WampMessage::Unsubscribed {
            request_id,
            details: Dict::new(),
        })
        .await
        .unwrap();
    closing.await.unwrap().unwrap();
    assert!(router.try_recv().is_none());
}

#[tokio::test]
async fn test_cancelled_subscribe_is_torn_down() {
    let (session, mut router) = established_session(1).await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.subscribe(ContentIdentifier::topic("/odds")).await }
    });
    let (request_id, _) = expect_subscribe(&mut router).await;
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    router
        .send(WampMessage::Subscribed {
            request_id,
            subscription_id: 55,
        })
        .await
        .unwrap();
    match next_message(&mut router).await {
        WampMessage::Unsubscribe {
            subscription_id, ..
        } => assert_eq!(subscription_id, 55),
        other => panic!("expected UNSUBSCRIBE, got {:?}", other),
    }
}

#[tokio::test]
async fn test_subscribe_error_reaches_caller() {
    let (session, mut router) = established_session(1).await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.subscribe(ContentIdentifier::topic("/private")).await }
    });
    let (request_id, _) = expect_subscribe(&mut router).await;
    router
        .send(WampMessage::Error {
            request_type: 32,
            request_id,
            details: Dict::new(),
            error: "wamp.error.not_authorized".into(),
            payload: Payload::new(),
        })
        .await
        .unwrap();

    match pending.await.unwrap() {
        Err(SubscriptionError::SetupFailed { topic, reason }) => {
            assert_eq!(topic, "/private");
            assert_eq!(reason, "wamp.error.not_authorized");
        }
        other => panic!("unexpected {:?}", other.map(|s| s.topic().to_string())),
    }
}

#[tokio::test]
async fn test_call_result_and_error() {
    let (session, mut router) = established_session(3).await;

    let call = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .call("com.example.add", Payload::with_args(vec![json!(1), json!(2)]))
                .await
        }
    });
    let (request_id, procedure, payload) = expect_call(&mut router).await;
    assert_eq!(procedure, "com.example.add");
    assert_eq!(payload.args, vec![json!(1), json!(2)]);
    router
        .send(WampMessage::Result {
            request_id,
            details: Dict::new(),
            payload: Payload::with_args(vec![json!(3)]),
        })
        .await
        .unwrap();
    assert_eq!(call.await.unwrap().unwrap().payload.args, vec![json!(3)]);

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.call("com.example.missing", Payload::new()).await }
    });
    let (request_id, _, _) = expect_call(&mut router).await;
    router
        .send(WampMessage::Error {
            request_type: 48,
            request_id,
            details: Dict::new(),
            error: "wamp.error.no_such_procedure".into(),
            payload: Payload::new(),
        })
        .await
        .unwrap();
    match call.await.unwrap() {
        Err(RequestError::Remote { error, .. }) => assert_eq!(error, "wamp.error.no_such_procedure"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let (transport, mut router) = loopback();
    let config = SessionConfig::new("sports")
        .with_request_timeout(Duration::from_millis(50))
        .with_sweep_interval(Duration::from_millis(10));
    let session = Session::start(transport, config);
    welcome(&mut router, 1).await;
    session.established().await.unwrap();

    let result = timeout(WAIT, session.call("slow.procedure", Payload::new()))
        .await
        .unwrap();
    assert!(matches!(result, Err(RequestError::Timeout { .. })));
}

#[tokio::test]
async fn test_late_subscribed_after_timeout_is_unsubscribed() {
    let (transport, mut router) = loopback();
    let config = SessionConfig::new("sports")
        .with_request_timeout(Duration::from_millis(50))
        .with_sweep_interval(Duration::from_millis(10));
    let session = Session::start(transport, config);
    welcome(&mut router, 1).await;
    session.established().await.unwrap();

    let result = timeout(WAIT, session.subscribe(ContentIdentifier::topic("/slow")))
        .await
        .unwrap();
    match result {
        Err(SubscriptionError::SetupFailed { reason, .. }) => {
            assert!(reason.contains("timed out"), "reason: {}", reason)
        }
        other => panic!("unexpected {:?}", other.map(|s| s.id())),
    }

    let (request_id, topic) = expect_subscribe(&mut router).await;
    assert_eq!(topic, "/slow");
    router
        .send(WampMessage::Subscribed {
            request_id,
            subscription_id: 77,
        })
        .await
        .unwrap();

    // Nobody holds the late subscription, so the client hands it back.
    let request_id = match next_message(&mut router).await {
        WampMessage::Unsubscribe {
            request_id,
            subscription_id,
        } => {
            assert_eq!(subscription_id, 77);
            request_id
        }
        other => panic!("expected UNSUBSCRIBE, got {:?}", other),
    };
    router
        .send(WampMessage::Unsubscribed {
            request_id,
            details: Dict::new(),
        })
        .await
        .unwrap();

    // The topic is free for a fresh attempt.
    let retry = tokio::spawn({
        let session = session.clone();
        async move { session.subscribe(ContentIdentifier::topic("/slow")).await }
    });
    let (request_id, _) = expect_subscribe(&mut router).await;
    router
        .send(WampMessage::Subscribed {
            request_id,
            subscription_id: 78,
        })
        .await
        .unwrap();
    let handle = retry.await.unwrap().unwrap();
    assert_eq!(handle.subscription_id(), 78);
}

#[tokio::test]
async fn test_requests_queue_until_welcome() {
    let (transport, mut router) = loopback();
    let session = Session::start(transport, SessionConfig::new("sports"));

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.call("early.bird", Payload::new()).await }
    });
    welcome(&mut router, 11).await;

    let (request_id, procedure, _) = expect_call(&mut router).await;
    assert_eq!(procedure, "early.bird");
    router
        .send(WampMessage::Result {
            request_id,
            details: Dict::new(),
            payload: Payload::new(),
        })
        .await
        .unwrap();
    assert!(call.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_transport_loss_fails_pending_requests() {
    let (session, mut router) = established_session(2).await;

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.call("never.answered", Payload::new()).await }
    });
    expect_call(&mut router).await;
    router.drop_connection(None).await;

    assert!(matches!(call.await.unwrap(), Err(RequestError::SessionClosed)));
    let mut states = session.state_changes();
    timeout(WAIT, states.wait_for(|s| *s == SessionState::Disconnected))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_registration_receives_invocations() {
    let (session, mut router) = established_session(4).await;

    let register = tokio::spawn({
        let session = session.clone();
        async move { session.register("com.example.echo").await }
    });
    let request_id = match next_message(&mut router).await {
        WampMessage::Register {
            request_id,
            procedure,
            ..
        } => {
            assert_eq!(procedure, "com.example.echo");
            request_id
        }
        other => panic!("expected REGISTER, got {:?}", other),
    };
    router
        .send(WampMessage::Registered {
            request_id,
            registration_id: 77,
        })
        .await
        .unwrap();
    let mut registration = register.await.unwrap().unwrap();

    router
        .send(WampMessage::Invocation {
            request_id: 5000,
            registration_id: 77,
            details: Dict::new(),
            payload: Payload::with_args(vec![json!("ping")]),
        })
        .await
        .unwrap();
    let invocation = timeout(WAIT, registration.next_invocation())
        .await
        .unwrap()
        .unwrap();
    let args = invocation.payload.args.clone();
    invocation.respond(Payload::with_args(args));

    match next_message(&mut router).await {
        WampMessage::Yield {
            request_id,
            payload,
            ..
        } => {
            assert_eq!(request_id, 5000);
            assert_eq!(payload.args, vec![json!("ping")]);
        }
        other => panic!("expected YIELD, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_says_goodbye() {
    let (session, mut router) = established_session(9).await;
    session.disconnect().await;

    match next_message(&mut router).await {
        WampMessage::Goodbye { reason, .. } => assert_eq!(reason, "wamp.close.close_realm"),
        other => panic!("expected GOODBYE, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_merger_fails_without_baseline() {
    let (session, mut router) = established_session(5).await;
    let mut merged = FeedMerger::spawn(
        session.clone(),
        ContentIdentifier::all_sports("4093", "en"),
        Some(ContentIdentifier::live_sports("4093", "en")),
        MergerConfig::default(),
    );

    let (request_id, topic) = expect_subscribe(&mut router).await;
    assert_eq!(topic, "/sports/4093/en/disciplines/BOTH/BOTH");
    router
        .send(WampMessage::Error {
            request_type: 32,
            request_id,
            details: Dict::new(),
            error: "wamp.error.not_authorized".into(),
            payload: Payload::new(),
        })
        .await
        .unwrap();

    let first = timeout(WAIT, merged.next()).await.unwrap();
    assert!(matches!(
        first,
        Some(Err(MergeError::MandatoryFeedUnavailable(_)))
    ));
    assert!(timeout(WAIT, merged.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_merger_overlays_live_counters() {
    let (session, mut router) = established_session(5).await;
    let mut merged = FeedMerger::spawn(
        session.clone(),
        ContentIdentifier::all_sports("4093", "en"),
        Some(ContentIdentifier::live_sports("4093", "en")),
        MergerConfig::default(),
    );

    // Baseline: subscribe, then initial dump.
    let (request_id, _) = expect_subscribe(&mut router).await;
    router
        .send(WampMessage::Subscribed {
            request_id,
            subscription_id: 1,
        })
        .await
        .unwrap();
    let (request_id, procedure, payload) = expect_call(&mut router).await;
    assert_eq!(procedure, "/sports#initialDump");
    assert_eq!(
        payload.kwargs["topic"],
        json!("/sports/4093/en/disciplines/BOTH/BOTH")
    );
    router
        .send(WampMessage::Result {
            request_id,
            details: Dict::new(),
            payload: kwargs(json!({
                "version": 3,
                "messageType": "INITIAL_DUMP",
                "records": [
                    {"_type": "SPORT", "id": "A", "name": "Football"},
                    {"_type": "SPORT", "id": "B", "name": "Tennis"}
                ]
            })),
        })
        .await
        .unwrap();

    // Live: subscribe, then an empty initial dump.
    let (request_id, topic) = expect_subscribe(&mut router).await;
    assert_eq!(topic, "/sports/4093/en/disciplines/LIVE/BOTH");
    router
        .send(WampMessage::Subscribed {
            request_id,
            subscription_id: 2,
        })
        .await
        .unwrap();
    let (request_id, _, _) = expect_call(&mut router).await;
    router
        .send(WampMessage::Result {
            request_id,
            details: Dict::new(),
            payload: kwargs(json!({"version": 3, "records": []})),
        })
        .await
        .unwrap();

    let view = timeout(WAIT, merged.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.version, 3);
    let ids: Vec<_> = view.sports.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);

    let live_event = |publication_id, payload| WampMessage::Event {
        subscription_id: 2,
        publication_id,
        details: Dict::new(),
        payload,
    };
    router
        .send(live_event(
            10,
            kwargs(json!({"version": 4, "records": [
                {"_type": "SPORT", "id": "A", "name": "Football", "numberOfLiveEvents": 5}
            ]})),
        ))
        .await
        .unwrap();
    let view = timeout(WAIT, merged.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.version, 4);
    assert_eq!(view.sports[0].number_of_live_events, 5);

    // Older than what A already shows: discarded without an emission.
    router
        .send(live_event(
            11,
            kwargs(json!({"version": 3, "records": [
                {"_type": "SPORT", "id": "A", "name": "Football", "numberOfLiveEvents": 1}
            ]})),
        ))
        .await
        .unwrap();
    router
        .send(live_event(
            12,
            kwargs(json!({"version": 6, "records": [
                {"_type": "SPORT", "id": "B", "name": "Tennis", "numberOfLiveEvents": 2}
            ]})),
        ))
        .await
        .unwrap();
    let view = timeout(WAIT, merged.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.version, 6);
    assert_eq!(view.sports[0].number_of_live_events, 5);
    assert_eq!(view.sports[1].number_of_live_events, 2);

    // Dropping the stream releases both topics.
    drop(merged);
    let mut released = HashSet::new();
    for _ in 0..2 {
        match next_message(&mut router).await {
            WampMessage::Unsubscribe {
                subscription_id, ..
            } => {
                released.insert(subscription_id);
            }
            other => panic!("expected UNSUBSCRIBE, got {:?}", other),
        }
    }
    assert_eq!(released, HashSet::from([1, 2]));
}

#[tokio::test]
async fn test_merger_runs_on_baseline_when_live_subscribe_fails() {
    let (session, mut router) = established_session(5).await;
    let mut merged = FeedMerger::spawn(
        session.clone(),
        ContentIdentifier::all_sports("4093", "en"),
        Some(ContentIdentifier::live_sports("4093", "en")),
        MergerConfig::default(),
    );

    serve_feed(
        &mut router,
        1,
        json!({"version": 3, "records": [{"_type": "SPORT", "id": "A", "name": "Football"}]}),
    )
    .await;

    let (request_id, topic) = expect_subscribe(&mut router).await;
    assert_eq!(topic, "/sports/4093/en/disciplines/LIVE/BOTH");
    router
        .send(WampMessage::Error {
            request_type: 32,
            request_id,
            details: Dict::new(),
            error: "wamp.error.not_authorized".into(),
            payload: Payload::new(),
        })
        .await
        .unwrap();

    let view = timeout(WAIT, merged.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.version, 3);
    let ids: Vec<_> = view.sports.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["A"]);

    router
        .send(sports_event(
            1,
            20,
            json!({"version": 4, "records": [{"_type": "SPORT", "id": "B", "name": "Tennis"}]}),
        ))
        .await
        .unwrap();
    let view = timeout(WAIT, merged.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.version, 4);
    let ids: Vec<_> = view.sports.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
}

#[tokio::test]
async fn test_merger_runs_on_baseline_after_live_revoked() {
    let (session, mut router) = established_session(5).await;
    let mut merged = FeedMerger::spawn(
        session.clone(),
        ContentIdentifier::all_sports("4093", "en"),
        Some(ContentIdentifier::live_sports("4093", "en")),
        MergerConfig::default(),
    );

    serve_feed(
        &mut router,
        1,
        json!({"version": 3, "records": [{"_type": "SPORT", "id": "A", "name": "Football"}]}),
    )
    .await;
    serve_feed(&mut router, 2, json!({"version": 3, "records": []})).await;

    let view = timeout(WAIT, merged.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.version, 3);

    router
        .send(WampMessage::Unsubscribed {
            request_id: 0,
            details: json!({"subscription": 2, "reason": "wamp.error.revoked"})
                .as_object()
                .cloned()
                .unwrap(),
        })
        .await
        .unwrap();
    // Arrives after the revocation, so it never reaches the merger.
    router
        .send(sports_event(
            2,
            30,
            json!({"version": 9, "records": [
                {"_type": "SPORT", "id": "A", "name": "Football", "numberOfLiveEvents": 7}
            ]}),
        ))
        .await
        .unwrap();
    router
        .send(sports_event(
            1,
            31,
            json!({"version": 5, "records": [{"_type": "SPORT", "id": "C", "name": "Golf"}]}),
        ))
        .await
        .unwrap();

    let view = timeout(WAIT, merged.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(view.version, 5);
    let ids: Vec<_> = view.sports.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "C"]);
    assert_eq!(view.sports[0].number_of_live_events, 0);

    // Only the baseline is still held by the client.
    drop(merged);
    match next_message(&mut router).await {
        WampMessage::Unsubscribe {
            subscription_id, ..
        } => assert_eq!(subscription_id, 1),
        other => panic!("expected UNSUBSCRIBE, got {:?}", other),
    }
}
