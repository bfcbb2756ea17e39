//! 基于内存代理的端到端测试：发布、执行、重试、停放和重放

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use wordcard::app::{AppMode, Application};
use wordcard::handlers::{CommandHandlers, DeckStore};
use wordcard::shutdown::ShutdownManager;
use wordcard_core::{
    correlation::{CorrelationContext, CorrelationId},
    models::{CommandKind, HeaderValue},
    traits::MessageQueue,
};
use wordcard_dispatcher::CommandDispatcher;
use wordcard_domain::{SaveCardCommand, SaveDeckCommand};
use wordcard_testing_utils::{
    CommandFixtures, FailingHandler, FlakyHandler, PanickingHandler, PipelineFixture,
    RecordingHandler, TestEnv,
};

const WAIT: Duration = Duration::from_secs(5);

struct RunningApp {
    dispatcher: CommandDispatcher,
    shutdown: ShutdownManager,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningApp {
    async fn start(fixture: &PipelineFixture, handlers: CommandHandlers) -> Self {
        let app = Application::with_message_queue(
            fixture.config.clone(),
            AppMode::All,
            fixture.queue.clone(),
            handlers,
        );
        let dispatcher = app.dispatcher();
        let shutdown = ShutdownManager::with_drain_timeout(WAIT);
        let shutdown_rx = shutdown.subscribe().await;
        let handle = tokio::spawn(async move { app.run(shutdown_rx).await });

        Self {
            dispatcher,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.shutdown().await;
        assert!(self.shutdown.drain(self.handle).await);
    }
}

#[tokio::test]
async fn test_always_failing_command_is_parked_after_max_retries() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let card_handler = Arc::new(FailingHandler::<SaveCardCommand>::new("deck missing"));
    let handlers = CommandHandlers::new(
        card_handler.clone(),
        Arc::new(RecordingHandler::<SaveDeckCommand>::new()),
    );
    let app = RunningApp::start(&fixture, handlers).await;

    let command = CommandFixtures::save_card();
    let correlation_id = app
        .dispatcher
        .publish(&CorrelationContext::new(), &command)
        .await
        .unwrap();

    assert!(TestEnv::wait_for_queue_size(&fixture.broker, &topology.error_queue, 1, WAIT).await);
    let parked = TestEnv::drain(&fixture.broker, &topology.error_queue).await;
    app.stop().await;

    // 首次执行加三次重试
    assert_eq!(card_handler.attempts(), 4);
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].payload, serde_json::to_vec(&command).unwrap());
    assert_eq!(parked[0].header("X-retry"), Some(&HeaderValue::Int(4)));
    assert_eq!(
        parked[0].correlation_id("X-Correlation-Id"),
        Some(correlation_id)
    );
    assert_eq!(fixture.broker.get_queue_size(&topology.main_queue).await.unwrap(), 0);
    assert_eq!(fixture.broker.get_queue_size(&topology.retry_queue).await.unwrap(), 0);
}

#[tokio::test]
async fn test_successful_command_leaves_no_trace() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveDeck);
    let store = DeckStore::new();
    let app = RunningApp::start(&fixture, CommandHandlers::in_memory(store.clone())).await;

    app.dispatcher
        .publish(&CorrelationContext::new(), &CommandFixtures::save_deck())
        .await
        .unwrap();

    let store_ref = &store;
    let saved = TestEnv::wait_for(|| async move { store_ref.decks().await.len() == 1 }, WAIT).await;
    assert!(saved);

    let decks = store.decks().await;
    assert_eq!(decks[0].name, "Animals");
    assert_eq!(store.cards_of(decks[0].id).await.len(), 1);
    let broker = &fixture.broker;
    let main_queue = topology.main_queue.as_str();
    assert!(TestEnv::wait_for(|| async move { broker.unacked_count(main_queue) == 0 }, WAIT).await);
    assert_eq!(fixture.broker.get_queue_size(&topology.retry_queue).await.unwrap(), 0);
    assert_eq!(fixture.broker.get_queue_size(&topology.error_queue).await.unwrap(), 0);

    app.stop().await;
}

#[tokio::test]
async fn test_transient_failure_recovers_through_retry_queue() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let card_handler = Arc::new(FlakyHandler::<SaveCardCommand>::new(2));
    let handlers = CommandHandlers::new(
        card_handler.clone(),
        Arc::new(RecordingHandler::<SaveDeckCommand>::new()),
    );
    let app = RunningApp::start(&fixture, handlers).await;

    let bound = CorrelationId::new_random();
    let context = CorrelationContext::with_id(bound.clone());
    let command = CommandFixtures::save_card();
    let returned = app.dispatcher.publish(&context, &command).await.unwrap();
    assert_eq!(returned, bound);

    let handler = &card_handler;
    assert!(TestEnv::wait_for(|| async move { handler.received().len() == 1 }, WAIT).await);
    app.stop().await;

    assert_eq!(card_handler.attempts(), 3);
    assert_eq!(card_handler.received(), vec![command]);
    assert_eq!(fixture.broker.get_queue_size(&topology.error_queue).await.unwrap(), 0);
}

#[tokio::test]
async fn test_parked_card_is_replayed_once_deck_exists() {
    let fixture = PipelineFixture::new().await;
    let card_topology = fixture.topology(CommandKind::SaveCard);
    let store = DeckStore::new();
    let app = RunningApp::start(&fixture, CommandHandlers::in_memory(store.clone())).await;

    // 卡组1还不存在，卡片最终进入错误队列
    app.dispatcher
        .publish(&CorrelationContext::new(), &SaveCardCommand::new("dog", "perro", 1))
        .await
        .unwrap();
    assert!(TestEnv::wait_for_queue_size(&fixture.broker, &card_topology.error_queue, 1, WAIT).await);

    app.dispatcher
        .publish(&CorrelationContext::new(), &CommandFixtures::save_deck())
        .await
        .unwrap();
    let store_ref = &store;
    assert!(TestEnv::wait_for(|| async move { store_ref.decks().await.len() == 1 }, WAIT).await);

    let replayer = Application::with_message_queue(
        fixture.config.clone(),
        AppMode::Replay,
        fixture.queue.clone(),
        CommandHandlers::in_memory(store.clone()),
    );
    let replayed = replayer
        .replay(Some(CommandKind::SaveCard), 10, None)
        .await
        .unwrap();
    assert_eq!(replayed, 1);

    let card_saved = TestEnv::wait_for(
        || async move {
            store_ref
                .cards_of(1)
                .await
                .iter()
                .any(|card| card.name1 == "dog" && card.name2 == "perro")
        },
        WAIT,
    )
    .await;
    assert!(card_saved);
    assert_eq!(fixture.broker.get_queue_size(&card_topology.error_queue).await.unwrap(), 0);

    app.stop().await;
}

#[tokio::test]
async fn test_handler_panic_does_not_stop_consumers() {
    let fixture = PipelineFixture::new().await;
    let topology = fixture.topology(CommandKind::SaveCard);
    let card_handler = Arc::new(PanickingHandler::<SaveCardCommand>::new(1));
    let handlers = CommandHandlers::new(
        card_handler.clone(),
        Arc::new(RecordingHandler::<SaveDeckCommand>::new()),
    );
    let app = RunningApp::start(&fixture, handlers).await;

    for _ in 0..2 {
        app.dispatcher
            .publish(&CorrelationContext::new(), &CommandFixtures::save_card())
            .await
            .unwrap();
    }

    // 第一次执行 panic 后经重试成功，另一条直接成功
    let handler = &card_handler;
    assert!(TestEnv::wait_for(|| async move { handler.attempts() == 3 }, WAIT).await);
    let broker = &fixture.broker;
    let main_queue = topology.main_queue.as_str();
    assert!(TestEnv::wait_for(|| async move { broker.unacked_count(main_queue) == 0 }, WAIT).await);
    assert_eq!(fixture.broker.get_queue_size(&topology.error_queue).await.unwrap(), 0);
    assert!(!app.handle.is_finished());

    app.stop().await;
}

#[tokio::test]
async fn test_broker_loss_fails_run() {
    let fixture = PipelineFixture::new().await;
    let deck_handler = Arc::new(RecordingHandler::<SaveDeckCommand>::new());
    let handlers = CommandHandlers::new(
        Arc::new(RecordingHandler::<SaveCardCommand>::new()),
        deck_handler.clone(),
    );
    let app = RunningApp::start(&fixture, handlers).await;

    // 确认消费者已经在运行
    app.dispatcher
        .publish(&CorrelationContext::new(), &CommandFixtures::save_deck())
        .await
        .unwrap();
    let handler = &deck_handler;
    assert!(TestEnv::wait_for(|| async move { handler.received().len() == 1 }, WAIT).await);

    fixture.broker.close().await.unwrap();

    let result = tokio::time::timeout(WAIT, app.handle)
        .await
        .expect("订阅结束后应用应当退出")
        .unwrap();
    assert!(result.is_err());
    assert!(!app.shutdown.is_shutdown().await);
}
