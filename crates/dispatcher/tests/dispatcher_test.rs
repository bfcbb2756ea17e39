use wordcard_core::{
    CommandKind, CorrelationContext, CorrelationId, HeaderValue, MessageQueue, PipelineError,
    CONTENT_TYPE_JSON,
};
use wordcard_dispatcher::CommandDispatcher;
use wordcard_domain::{SaveCardCommand, SaveDeckCommand};
use wordcard_testing_utils::{CommandFixtures, PipelineFixture, TestEnv};

fn dispatcher(fixture: &PipelineFixture) -> CommandDispatcher {
    CommandDispatcher::new(
        fixture.queue.clone(),
        fixture.topologies.clone(),
        &fixture.config.pipeline,
    )
}

#[tokio::test]
async fn test_publish_unbound_mints_correlation_id() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let command = CommandFixtures::save_card();

    let id = dispatcher(&fixture)
        .publish(&CorrelationContext::new(), &command)
        .await
        .unwrap();
    assert!(id.is_uuid());

    let messages = TestEnv::drain(&fixture.broker, &topology.main_queue).await;
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.routing_key, topology.key);
    assert_eq!(message.content_type.as_deref(), Some(CONTENT_TYPE_JSON));
    assert_eq!(message.correlation_id.as_ref(), Some(&id));
    assert_eq!(
        message.header("X-Correlation-Id"),
        Some(&HeaderValue::Str(id.to_string()))
    );
    assert!(message.header("X-retry").is_none());
    assert_eq!(message.decode::<SaveCardCommand>().unwrap(), command);
}

#[tokio::test]
async fn test_publish_bound_keeps_caller_id() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveDeck);
    let bound = CorrelationId::parse("req-42").unwrap();

    let id = dispatcher(&fixture)
        .publish(&CorrelationContext::with_id(bound.clone()), &CommandFixtures::save_deck())
        .await
        .unwrap();
    assert_eq!(id, bound);

    let messages = TestEnv::drain(&fixture.broker, &topology.main_queue).await;
    assert_eq!(messages[0].correlation_id("X-Correlation-Id"), Some(bound));
    assert_eq!(
        messages[0].decode::<SaveDeckCommand>().unwrap(),
        CommandFixtures::save_deck()
    );
}

#[tokio::test]
async fn test_publish_failure_is_reported() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    fixture.broker.simulate_outage(true);

    let result = dispatcher(&fixture)
        .publish(&CorrelationContext::new(), &CommandFixtures::save_card())
        .await;
    assert!(matches!(result, Err(PipelineError::Publish(_))));

    fixture.broker.simulate_outage(false);
    assert_eq!(fixture.broker.get_queue_size(&topology.main_queue).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_command_is_not_published() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);

    let result = dispatcher(&fixture)
        .publish(&CorrelationContext::new(), &SaveCardCommand::new("", "perro", 7))
        .await;
    assert!(matches!(result, Err(PipelineError::InvalidCommand(_))));
    assert_eq!(fixture.broker.get_queue_size(&topology.main_queue).await.unwrap(), 0);
}
