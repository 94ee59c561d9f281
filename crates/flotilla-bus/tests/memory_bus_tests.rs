//! The in-process broker must honour the delivery contract the protocol
//! relies on: per-topic ordering, wildcard fan-out and duplicate delivery.

use std::time::Duration;

use flotilla_bus::{MemoryBroker, MessageBus};

#[tokio::test]
async fn test_per_topic_order_preserved() {
    let broker = MemoryBroker::new();
    let (publisher, _p_rx) = broker.connect("pub").await;
    let (subscriber, mut rx) = broker.connect("sub").await;
    subscriber.subscribe("flotilla/client/status/+").await.unwrap();

    for i in 0..20u8 {
        publisher
            .publish("flotilla/client/status/a1", vec![i])
            .await
            .unwrap();
    }
    for i in 0..20u8 {
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.payload, vec![i]);
    }
}

#[tokio::test]
async fn test_fan_out_to_all_matching_clients() {
    let broker = MemoryBroker::new();
    let (controller, _c_rx) = broker.connect("controller").await;
    let (a, mut a_rx) = broker.connect("a").await;
    let (b, mut b_rx) = broker.connect("b").await;
    a.subscribe("flotilla/server/model/global").await.unwrap();
    b.subscribe("flotilla/server/#").await.unwrap();

    controller
        .publish("flotilla/server/model/global", b"{}".to_vec())
        .await
        .unwrap();

    assert_eq!(a_rx.recv().await.unwrap().topic, "flotilla/server/model/global");
    assert_eq!(b_rx.recv().await.unwrap().topic, "flotilla/server/model/global");
}

#[tokio::test]
async fn test_duplicate_subscription_delivers_once() {
    let broker = MemoryBroker::new();
    let (client, mut rx) = broker.connect("c").await;
    client.subscribe("x/+").await.unwrap();
    client.subscribe("x/+").await.unwrap();
    client.publish("x/1", vec![9]).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().payload, vec![9]);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_wait_for_returns_when_count_reached() {
    let broker = MemoryBroker::new();
    let (client, _rx) = broker.connect("c").await;
    let waiter = {
        let broker = broker.clone();
        tokio::spawn(async move {
            broker
                .wait_for("hb/+", 2, Duration::from_secs(5))
                .await
                .len()
        })
    };
    client.publish("hb/a", vec![]).await.unwrap();
    client.publish("hb/a", vec![]).await.unwrap();
    assert_eq!(waiter.await.unwrap(), 2);
}
