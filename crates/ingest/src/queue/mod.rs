//! 큐 백엔드 -- [`DurableQueue`] 구현체
//!
//! - [`MemoryQueue`]: 인메모리 FIFO (비영속)
//! - [`JournalQueue`]: 파일 저널 기반 영속 FIFO

pub mod journal;
pub mod memory;

pub use journal::{JournalQueue, JournalQueueConfig};
pub use memory::MemoryQueue;

use std::sync::Arc;

use watchpost_core::config::QueueConfig;
use watchpost_core::error::QueueError;
use watchpost_core::queue::DurableQueue;

/// 설정에 맞는 큐 백엔드를 엽니다.
pub fn open_queue(config: &QueueConfig) -> Result<Arc<dyn DurableQueue>, QueueError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryQueue::new(config.name.clone()))),
        "journal" => Ok(Arc::new(JournalQueue::open(JournalQueueConfig::from_core(
            config,
        ))?)),
        other => Err(QueueError::Storage(format!("unknown queue backend '{other}'"))),
    }
}
