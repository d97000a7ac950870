use hub_transport::{
    cancel_pair, ConnectionCredential, ConsumerOptions, Envelope, GenericConsumer,
    PrincipalCredential, TransportConfig, TransportProtocol,
};
use hub_transport_kafka::KafkaBindingFactory;
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    ClientConfig,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// Requires Kafka running. If HUB_TRANSPORT_TEST_KAFKA_BROKERS is unset, the test skips.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consumes_and_reassembles_chunked_envelopes() {
    let brokers = match std::env::var("HUB_TRANSPORT_TEST_KAFKA_BROKERS") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("skipping: set HUB_TRANSPORT_TEST_KAFKA_BROKERS (e.g. 127.0.0.1:9092)");
            return;
        }
    };

    let unique_id = Uuid::new_v4().to_string();
    let topic_name = format!("status.test.{}", unique_id);
    let cluster_identity = format!("hub-transport-test-{}", unique_id);

    // --- Admin Client to create/delete topic ---
    let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .create()
        .expect("failed to create Kafka AdminClient");

    let topic = NewTopic::new(&topic_name, 1, TopicReplication::Fixed(1));
    admin_client
        .create_topics(&[topic], &AdminOptions::new())
        .await
        .expect("Failed to create topic");

    // --- Producer: one logical message split into three chunks ---
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("message.timeout.ms", "10000")
        .create()
        .expect("failed to create Kafka producer");

    let payload = b"managed cluster status bundle".to_vec();
    let chunks = Envelope::split("hub1", "status", &payload, 10);
    assert_eq!(chunks.len(), 3);
    for chunk in chunks.iter().rev() {
        let mut headers = OwnedHeaders::new();
        for (key, value) in chunk.headers() {
            headers = headers.insert(Header { key, value: Some(value.as_slice()) });
        }
        let record = FutureRecord::<(), _>::to(&topic_name).payload(chunk.payload.as_slice()).headers(headers);
        producer.send(record, Duration::from_secs(5)).await.expect("failed to produce chunk");
    }
    producer.flush(Duration::from_secs(5)).expect("Failed to flush producer");

    // --- Consumer through the generic receive loop ---
    let credential = ConnectionCredential {
        bootstrap_server: brokers.clone(),
        ca_cert: None,
        principal: PrincipalCredential::Anonymous,
    };
    let config = TransportConfig::broker(
        TransportProtocol::BringYourOwn,
        credential,
        cluster_identity,
        Arc::new(KafkaBindingFactory::new()),
    );
    let consumer = Arc::new(
        GenericConsumer::new(&config, &[topic_name.clone()], ConsumerOptions::default())
            .expect("failed to build consumer"),
    );
    let mut events = consumer.event_chan().expect("event channel");
    let (canceller, token) = cancel_pair();
    let running = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.start(&token).await })
    };

    let message = tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timeout waiting for assembled message")
        .expect("event channel closed");
    assert_eq!(message.payload, payload);
    assert_eq!(message.source, "hub1");
    assert!(consumer.pending_chunk_groups().is_empty());

    // --- Cleanup ---
    canceller.cancel();
    running.await.expect("receive task panicked").expect("receive loop failed");
    drop(producer);

    admin_client
        .delete_topics(&[&topic_name], &AdminOptions::new())
        .await
        .expect("Failed to delete topic");
}
