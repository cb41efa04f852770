//! End-to-end scenarios run against real `Node`s wired to the in-process
//! fakes in `ros1_node::testutil`, standing in for a live `roscore`.

#![cfg(feature = "testutil")]

use ros1_core_types::{Name, RosValue};
use ros1_node::framing::encode_frame;
use ros1_node::node::Node;
use ros1_node::subscription::SubscriptionEvent;
use ros1_node::testutil::{FakeMasterClient, FakeParamClient, FixedDefinitionResolver};
use std::sync::Arc;
use std::time::Duration;

fn bool_value(value: bool) -> RosValue {
    RosValue::Struct(vec![("data".to_string(), RosValue::Bool(value))])
}

async fn start_node(
    name: &str,
    master: &FakeMasterClient,
    param: &FakeParamClient,
) -> Arc<Node> {
    Node::start_with_clients(
        Name::new(name).unwrap(),
        Arc::new(master.clone()),
        Arc::new(param.clone()),
        Some("127.0.0.1".to_string()),
        Arc::new(FixedDefinitionResolver::new()),
    )
    .await
    .unwrap()
}

async fn wait_for<F, Fut>(mut poll: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if poll().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was never met");
}

#[test_log::test(tokio::test)]
async fn round_trip_delivers_a_message_and_tracks_publisher_stats() {
    let master = FakeMasterClient::new();
    let param = FakeParamClient::new();
    let talker = start_node("/talker", &master, &param).await;
    let listener = start_node("/listener", &master, &param).await;

    let publication = talker
        .advertise("/x", "std_msgs/Bool", false, None, None)
        .await
        .unwrap();
    let subscription = listener.subscribe("/x", "std_msgs/Bool", None, false).await.unwrap();
    let mut events = subscription.subscribe_events();

    wait_for(|| {
        let publication = publication.clone();
        async move { publication.connection_count().await == 1 }
    })
    .await;

    publication.publish(&bool_value(true)).await.unwrap();

    let message = loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("never saw a message event")
            .unwrap()
        {
            SubscriptionEvent::Message { value, .. } => break value,
            _ => continue,
        }
    };
    assert_eq!(message.field("data"), Some(&RosValue::Bool(true)));

    let expected_bytes = encode_frame(&[0x01]).len() as u64;
    let stats = publication.connection_stats().await;
    assert_eq!(stats.len(), 1);
    let (_, stats, _, _, connected) = &stats[0];
    assert!(*connected);
    assert_eq!(stats.bytes_sent, expected_bytes);
    assert_eq!(stats.messages_sent, 1);
}

#[test_log::test(tokio::test)]
async fn a_latched_publication_replays_its_last_message_to_a_late_subscriber() {
    let master = FakeMasterClient::new();
    let param = FakeParamClient::new();
    let talker = start_node("/talker", &master, &param).await;
    let listener = start_node("/listener", &master, &param).await;

    let publication = talker
        .advertise("/x", "std_msgs/Bool", true, None, None)
        .await
        .unwrap();
    publication.publish(&bool_value(true)).await.unwrap();

    // Subscriber arrives only after the publish.
    let subscription = listener.subscribe("/x", "std_msgs/Bool", None, false).await.unwrap();
    let mut events = subscription.subscribe_events();

    let message = loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("never saw the latched replay")
            .unwrap()
        {
            SubscriptionEvent::Message { value, .. } => break value,
            _ => continue,
        }
    };
    assert_eq!(message.field("data"), Some(&RosValue::Bool(true)));
}

#[test_log::test(tokio::test)]
async fn a_severed_socket_reconnects_without_any_api_call() {
    let master = FakeMasterClient::new();
    let param = FakeParamClient::new();
    let talker = start_node("/talker", &master, &param).await;
    let listener = start_node("/listener", &master, &param).await;

    let publication = talker
        .advertise("/x", "std_msgs/Bool", false, None, None)
        .await
        .unwrap();
    let subscription = listener.subscribe("/x", "std_msgs/Bool", None, false).await.unwrap();

    wait_for(|| {
        let publication = publication.clone();
        async move { publication.connection_count().await == 1 }
    })
    .await;
    let first_id = publication.connection_stats().await[0].0;

    // Forcibly sever the socket from the publisher side: dropping the
    // last `Arc<SubscriberConnection>` aborts its task, closing the fd
    // out from under the subscriber, rather than going through either
    // side's own graceful `close()`.
    publication.detach(first_id).await;

    wait_for(|| {
        let publication = publication.clone();
        async move { publication.connection_count().await == 1 }
    })
    .await;
    let second_id = publication.connection_stats().await[0].0;
    assert_ne!(first_id, second_id, "a new connection id must replace the severed one");

    publication.publish(&bool_value(false)).await.unwrap();
    let mut events = subscription.subscribe_events();
    let message = loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("reconnected subscription never received the message")
            .unwrap()
        {
            SubscriptionEvent::Message { value, .. } => break value,
            _ => continue,
        }
    };
    assert_eq!(message.field("data"), Some(&RosValue::Bool(false)));
}

#[test_log::test(tokio::test)]
async fn publisher_update_diffs_against_the_currently_held_connections() {
    let master = FakeMasterClient::new();
    let param = FakeParamClient::new();
    let listener = start_node("/listener", &master, &param).await;
    let pub1 = start_node("/pub1", &master, &param).await;
    let pub2 = start_node("/pub2", &master, &param).await;
    let pub3 = start_node("/pub3", &master, &param).await;

    // Subscribe while the master knows of no publishers yet, so the
    // initial `registerSubscriber` reply is empty and every connection
    // in this test comes from an explicit `publisher_update` push rather
    // than the master's own bookkeeping.
    let subscription = listener.subscribe("/x", "std_msgs/Bool", None, false).await.unwrap();

    for node in [&pub1, &pub2, &pub3] {
        node.advertise("/x", "std_msgs/Bool", false, None, None).await.unwrap();
    }

    let u1 = pub1.caller_api().to_string();
    let u2 = pub2.caller_api().to_string();
    let u3 = pub3.caller_api().to_string();

    listener
        .clone()
        .publisher_update("/x", vec![u1.clone(), u2.clone()])
        .await;
    wait_for(|| {
        let subscription = subscription.clone();
        async move { subscription.connection_ids().await.len() == 2 }
    })
    .await;

    listener.clone().publisher_update("/x", vec![u2.clone(), u3.clone()]).await;
    wait_for(|| {
        let subscription = subscription.clone();
        async move {
            let urls = subscription.publisher_urls().await;
            urls.len() == 2 && urls.contains(&u2) && urls.contains(&u3)
        }
    })
    .await;
    let urls = subscription.publisher_urls().await;
    assert!(!urls.contains(&u1), "the dropped publisher must be detached");
}

#[test_log::test(tokio::test)]
async fn a_type_mismatched_handshake_is_rejected_and_never_streams() {
    let master = FakeMasterClient::new();
    let param = FakeParamClient::new();
    let talker = start_node("/talker", &master, &param).await;
    let listener = start_node("/listener", &master, &param).await;

    let publication = talker
        .advertise("/x", "std_msgs/Bool", false, None, None)
        .await
        .unwrap();
    // requestTopic itself doesn't check type compatibility -- only the
    // TCPROS handshake that follows does -- so this still
    // reaches a real socket connect before being rejected.
    let subscription = listener
        .subscribe("/x", "nav_msgs/Odometry", None, false)
        .await
        .unwrap();
    let mut events = subscription.subscribe_events();

    let rejection = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("never observed the handshake rejection")
        .unwrap();
    assert!(
        matches!(rejection, SubscriptionEvent::Error { .. }),
        "expected a rejection error, got {rejection:?}"
    );
    assert_eq!(publication.connection_count().await, 0);
}
