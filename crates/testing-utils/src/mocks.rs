//! 领域处理器的测试替身
//!
//! 管道只区分处理成功和失败，这里提供几种常见的处理器行为：
//! 总是成功并记录命令、总是失败、前若干次失败、执行过慢、前若干次 panic。

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use wordcard_core::{Command, CommandHandler, PipelineError, Result};

/// 记录收到的命令并返回成功
pub struct RecordingHandler<C> {
    received: Mutex<Vec<C>>,
}

impl<C: Command + Clone> RecordingHandler<C> {
    pub fn new() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<C> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl<C: Command + Clone> Default for RecordingHandler<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: Command + Clone> CommandHandler<C> for RecordingHandler<C> {
    async fn execute(&self, command: C) -> Result<()> {
        self.received.lock().unwrap().push(command);
        Ok(())
    }
}

/// 总是失败，记录尝试次数
pub struct FailingHandler<C> {
    attempts: AtomicUsize,
    reason: String,
    _command: PhantomData<fn(C)>,
}

impl<C: Command> FailingHandler<C> {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            reason: reason.into(),
            _command: PhantomData,
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: Command> CommandHandler<C> for FailingHandler<C> {
    async fn execute(&self, _command: C) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PipelineError::Handler(self.reason.clone()))
    }
}

/// 前 `failures` 次失败，之后成功并记录命令
pub struct FlakyHandler<C> {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    recorder: RecordingHandler<C>,
}

impl<C: Command + Clone> FlakyHandler<C> {
    pub fn new(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            recorder: RecordingHandler::new(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<C> {
        self.recorder.received()
    }
}

#[async_trait]
impl<C: Command + Clone> CommandHandler<C> for FlakyHandler<C> {
    async fn execute(&self, command: C) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PipelineError::Handler("暂时失败".to_string()));
        }
        self.recorder.execute(command).await
    }
}

/// 执行前等待指定时间，用于触发处理超时
pub struct SlowHandler<C> {
    delay: Duration,
    _command: PhantomData<fn(C)>,
}

impl<C: Command> SlowHandler<C> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            _command: PhantomData,
        }
    }
}

#[async_trait]
impl<C: Command> CommandHandler<C> for SlowHandler<C> {
    async fn execute(&self, _command: C) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// 前 `panics` 次执行直接 panic，之后成功
pub struct PanickingHandler<C> {
    panics: usize,
    attempts: AtomicUsize,
    _command: PhantomData<fn(C)>,
}

impl<C: Command> PanickingHandler<C> {
    pub fn new(panics: usize) -> Self {
        Self {
            panics,
            attempts: AtomicUsize::new(0),
            _command: PhantomData,
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: Command> CommandHandler<C> for PanickingHandler<C> {
    async fn execute(&self, _command: C) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.panics {
            panic!("handler crashed on attempt {attempt}");
        }
        Ok(())
    }
}
