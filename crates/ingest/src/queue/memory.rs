//! 인메모리 FIFO 큐
//!
//! 재시작 시 내용이 사라집니다. 테스트와 단일 프로세스 데모용입니다.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use watchpost_core::error::QueueError;
use watchpost_core::pipeline::BoxFuture;
use watchpost_core::queue::DurableQueue;

/// `Mutex<VecDeque>` + `Notify` 기반 FIFO
pub struct MemoryQueue {
    name: String,
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl MemoryQueue {
    /// 빈 큐를 생성합니다.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<String>>, QueueError> {
        self.items
            .lock()
            .map_err(|_| QueueError::Storage("memory queue lock poisoned".to_owned()))
    }

    async fn pop_until(&self, deadline: Instant) -> Result<Option<String>, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // pop 확인 전에 등록해야 push 알림을 놓치지 않음
            notified.as_mut().enable();

            if let Some(item) = self.lock()?.pop_front() {
                return Ok(Some(item));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.lock()?.pop_front());
            }
        }
    }
}

impl DurableQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, item: String) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            self.lock()?.push_back(item);
            self.notify.notify_one();
            Ok(())
        })
    }

    fn blocking_pop(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<String>, QueueError>> {
        Box::pin(async move { self.pop_until(Instant::now() + timeout).await })
    }

    fn len(&self) -> BoxFuture<'_, Result<usize, QueueError>> {
        Box::pin(async move { Ok(self.lock()?.len()) })
    }
}
