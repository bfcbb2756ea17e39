use std::time::Duration;

use wordcard_core::{
    CommandKind, CorrelationId, Delivery, HeaderValue, MessageQueue, PipelineError, RetryCount,
};
use wordcard_dispatcher::{RetryCoordinator, RetryOutcome, RetryPolicy};
use wordcard_testing_utils::{CommandFixtures, MessageBuilder, PipelineFixture, TestEnv};

fn coordinator(fixture: &PipelineFixture) -> RetryCoordinator {
    RetryCoordinator::new(
        fixture.queue.clone(),
        fixture.topology(CommandKind::SaveCard),
        &fixture.config.pipeline,
    )
    .with_policy(RetryPolicy {
        max_retries_count: fixture.config.pipeline.max_retries_count,
        requeue_delay: Duration::ZERO,
    })
}

/// 把消息放进重试队列并取出对应的投递
async fn retry_delivery(
    fixture: &PipelineFixture,
    builder: MessageBuilder,
) -> Delivery {
    let topology = fixture.topology(CommandKind::SaveCard);
    let message = builder.with_routing_key(&topology.retry_key).build();
    fixture
        .broker
        .publish(&topology.exchange, &message)
        .await
        .unwrap();
    fixture
        .broker
        .fetch(&topology.retry_queue)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_first_retry_without_header_sets_two() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let coordinator = coordinator(&fixture);

    let builder = MessageBuilder::command(&topology, &CommandFixtures::save_card());
    let delivery = retry_delivery(&fixture, builder).await;
    assert!(delivery.message.header("X-retry").is_none());
    let original_payload = delivery.message.payload.clone();

    let outcome = coordinator.on_retry_message(delivery).await.unwrap();
    assert_eq!(
        outcome,
        RetryOutcome::Retried {
            retry_count: RetryCount::new(2)
        }
    );

    let main = TestEnv::drain(&fixture.broker, &topology.main_queue).await;
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].header("X-retry"), Some(&HeaderValue::Int(2)));
    assert_eq!(main[0].payload, original_payload);
    assert_eq!(fixture.broker.get_queue_size(&topology.retry_queue).await.unwrap(), 0);
    assert_eq!(fixture.broker.unacked_count(&topology.retry_queue), 0);
}

#[tokio::test]
async fn test_republished_messages_drop_expiration() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let coordinator = coordinator(&fixture);

    let retried = retry_delivery(
        &fixture,
        MessageBuilder::command(&topology, &CommandFixtures::save_card())
            .with_expiration(Duration::from_secs(60)),
    )
    .await;
    assert_eq!(retried.message.expiration, Some(Duration::from_secs(60)));
    coordinator.on_retry_message(retried).await.unwrap();

    let parked = retry_delivery(
        &fixture,
        MessageBuilder::command(&topology, &CommandFixtures::save_card())
            .with_retry(4)
            .with_expiration(Duration::from_secs(60)),
    )
    .await;
    coordinator.on_retry_message(parked).await.unwrap();

    let main = TestEnv::drain(&fixture.broker, &topology.main_queue).await;
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].expiration, None);
    let error = TestEnv::drain(&fixture.broker, &topology.error_queue).await;
    assert_eq!(error.len(), 1);
    assert_eq!(error[0].expiration, None);
}

#[tokio::test]
async fn test_third_retry_goes_back_to_main_with_four() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let coordinator = coordinator(&fixture);

    let builder = MessageBuilder::command(&topology, &CommandFixtures::save_card()).with_retry(3);
    let delivery = retry_delivery(&fixture, builder).await;

    coordinator.on_retry_message(delivery).await.unwrap();

    let main = TestEnv::drain(&fixture.broker, &topology.main_queue).await;
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].header("X-retry"), Some(&HeaderValue::Int(4)));
    assert_eq!(main[0].routing_key, topology.key);
}

#[tokio::test]
async fn test_exhausted_message_is_parked_unchanged() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let coordinator = coordinator(&fixture);

    let builder = MessageBuilder::command(&topology, &CommandFixtures::save_card()).with_retry(4);
    let delivery = retry_delivery(&fixture, builder).await;
    let payload = delivery.message.payload.clone();

    let outcome = coordinator.on_retry_message(delivery).await.unwrap();
    assert_eq!(
        outcome,
        RetryOutcome::Parked {
            retry_count: RetryCount::new(4)
        }
    );

    assert_eq!(fixture.broker.get_queue_size(&topology.main_queue).await.unwrap(), 0);
    let parked = TestEnv::drain(&fixture.broker, &topology.error_queue).await;
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].payload, payload);
    assert_eq!(parked[0].header("X-retry"), Some(&HeaderValue::Int(4)));
}

#[tokio::test]
async fn test_corrupt_header_counts_as_first_attempt() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let coordinator = coordinator(&fixture);

    let builder = MessageBuilder::command(&topology, &CommandFixtures::save_card())
        .with_header("X-retry", "not-a-number");
    let delivery = retry_delivery(&fixture, builder).await;

    coordinator.on_retry_message(delivery).await.unwrap();

    let main = TestEnv::drain(&fixture.broker, &topology.main_queue).await;
    assert_eq!(main[0].header("X-retry"), Some(&HeaderValue::Int(2)));
}

#[tokio::test]
async fn test_correlation_id_preserved_across_retry() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let coordinator = coordinator(&fixture);
    let id = CorrelationId::new_random();

    let builder = MessageBuilder::command(&topology, &CommandFixtures::save_card())
        .with_correlation_id(&id)
        .with_retry(2);
    let delivery = retry_delivery(&fixture, builder).await;

    coordinator.on_retry_message(delivery).await.unwrap();

    let main = TestEnv::drain(&fixture.broker, &topology.main_queue).await;
    assert_eq!(main[0].correlation_id("X-Correlation-Id"), Some(id));
}

#[tokio::test]
async fn test_publish_failure_requeues_without_increment() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let coordinator = coordinator(&fixture);

    let builder = MessageBuilder::command(&topology, &CommandFixtures::save_card()).with_retry(2);
    let delivery = retry_delivery(&fixture, builder).await;

    fixture.broker.simulate_outage(true);
    let result = coordinator.on_retry_message(delivery).await;
    assert!(matches!(result, Err(PipelineError::Publish(_))));
    fixture.broker.simulate_outage(false);

    // 消息回到重试队列，重试次数未变
    let retry = fixture.broker.peek_messages(&topology.retry_queue);
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0].header("X-retry"), Some(&HeaderValue::Int(2)));
    assert_eq!(fixture.broker.get_queue_size(&topology.main_queue).await.unwrap(), 0);

    // 恢复后重新处理，只递增一次
    let delivery = fixture
        .broker
        .fetch(&topology.retry_queue)
        .await
        .unwrap()
        .unwrap();
    assert!(delivery.redelivered);
    coordinator.on_retry_message(delivery).await.unwrap();
    let main = TestEnv::drain(&fixture.broker, &topology.main_queue).await;
    assert_eq!(main[0].header("X-retry"), Some(&HeaderValue::Int(3)));
}
