//! 파일 저널 기반 영속 FIFO 큐
//!
//! # 디스크 레이아웃
//! ```text
//! <dir>/<name>.journal   헤더 한 줄 + 레코드당 JSON 문자열 한 줄 (append-only)
//! <dir>/<name>.cursor    {"generation":G,"consumed":N} (임시 파일 + rename으로 교체)
//! ```
//!
//! pop은 커서를 먼저 기록한 뒤 항목을 반환합니다. 소비된 접두부가 남은 항목보다
//! 많아지고 `compact_threshold`를 넘으면 남은 항목만으로 저널을 다시 씁니다.
//! 압축 시 세대(generation)가 증가하며, 저널 헤더와 커서의 세대가 다르면
//! 커서는 무시됩니다 (압축 도중 중단된 경우).
//!
//! 마지막 줄이 개행 없이 끝나면 기록 도중 중단된 것으로 보고 잘라냅니다.
//! 실행 중에는 마지막으로 기록에 성공한 길이를 기억하여, push 실패로 남은
//! 부분 레코드를 다음 push 전에 잘라냅니다.
//!
//! 파일 I/O는 모두 `spawn_blocking`에서 실행됩니다.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use watchpost_core::config::QueueConfig;
use watchpost_core::error::QueueError;
use watchpost_core::pipeline::BoxFuture;
use watchpost_core::queue::DurableQueue;

/// 저널 첫 줄
#[derive(Debug, Serialize, Deserialize)]
struct JournalHeader {
    generation: u64,
}

/// 소비 커서
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct Cursor {
    generation: u64,
    consumed: u64,
}

/// 저널 큐 설정
#[derive(Debug, Clone)]
pub struct JournalQueueConfig {
    /// 저널 디렉토리
    pub dir: PathBuf,
    /// 큐 이름 (파일명 접두어)
    pub name: String,
    /// push마다 fsync 수행 여부
    pub fsync: bool,
    /// 압축을 고려하기 시작하는 소비 레코드 수
    pub compact_threshold: u64,
}

impl JournalQueueConfig {
    /// core의 `QueueConfig`에서 저널 설정을 생성합니다.
    pub fn from_core(core: &QueueConfig) -> Self {
        Self {
            dir: PathBuf::from(&core.journal_dir),
            name: core.name.clone(),
            fsync: core.fsync,
            compact_threshold: core.compact_threshold,
        }
    }
}

/// 읽어 들인 저널
struct LoadedJournal {
    generation: u64,
    records: Vec<String>,
    /// 정상 레코드까지의 바이트 길이
    len: u64,
    /// 이번에 새로 만들었는지 여부
    created: bool,
}

struct JournalState {
    writer: File,
    /// 마지막으로 기록에 성공한 저널 길이
    journal_len: u64,
    generation: u64,
    consumed: u64,
    pending: VecDeque<String>,
}

/// 동기 파일 I/O를 담당하는 저널 저장소
struct JournalStore {
    config: JournalQueueConfig,
    journal_path: PathBuf,
    cursor_path: PathBuf,
    state: Mutex<JournalState>,
}

impl JournalStore {
    fn open(config: JournalQueueConfig) -> Result<Self, QueueError> {
        fs::create_dir_all(&config.dir)?;
        let journal_path = config.dir.join(format!("{}.journal", config.name));
        let cursor_path = config.dir.join(format!("{}.cursor", config.name));

        let journal = load_journal(&journal_path)?;
        let consumed = if journal.created {
            // 이전 저널의 커서는 새 저널에 적용되지 않음
            write_cursor(&cursor_path, Cursor::default(), true)?;
            0
        } else {
            let cursor = load_cursor(&cursor_path)?;
            if cursor.generation == journal.generation {
                cursor.consumed.min(journal.records.len() as u64)
            } else {
                warn!(
                    journal_generation = journal.generation,
                    cursor_generation = cursor.generation,
                    "journal cursor generation mismatch, replaying whole journal"
                );
                0
            }
        };

        let pending: VecDeque<String> = journal
            .records
            .into_iter()
            .skip(consumed as usize)
            .collect();
        let writer = OpenOptions::new().append(true).open(&journal_path)?;

        info!(
            path = %journal_path.display(),
            pending = pending.len(),
            consumed,
            "journal queue opened"
        );

        Ok(Self {
            config,
            journal_path,
            cursor_path,
            state: Mutex::new(JournalState {
                writer,
                journal_len: journal.len,
                generation: journal.generation,
                consumed,
                pending,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, JournalState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Storage("journal lock poisoned".to_owned()))
    }

    fn append(&self, item: String) -> Result<(), QueueError> {
        let line = encode_record(&item)?;

        let mut state = self.lock()?;
        let committed = state.journal_len;
        let actual = state.writer.metadata()?.len();
        if actual > committed {
            warn!(
                path = %self.journal_path.display(),
                torn_bytes = actual - committed,
                "truncating partial record left by a failed push"
            );
            state.writer.set_len(committed)?;
        }

        if let Err(e) = write_record(&mut state.writer, line.as_bytes(), self.config.fsync) {
            if let Err(trunc) = state.writer.set_len(committed) {
                error!(
                    path = %self.journal_path.display(),
                    error = %trunc,
                    "failed to roll back partial journal record"
                );
            }
            return Err(e);
        }

        state.journal_len = committed + line.len() as u64;
        state.pending.push_back(item);
        Ok(())
    }

    fn try_pop(&self) -> Result<Option<String>, QueueError> {
        let mut state = self.lock()?;
        let Some(item) = state.pending.pop_front() else {
            return Ok(None);
        };

        let cursor = Cursor {
            generation: state.generation,
            consumed: state.consumed + 1,
        };
        if let Err(e) = write_cursor(&self.cursor_path, cursor, self.config.fsync) {
            state.pending.push_front(item);
            return Err(e);
        }
        state.consumed = cursor.consumed;
        Ok(Some(item))
    }

    /// 전달되지 못한 항목을 맨 앞으로 되돌립니다.
    fn unpop(&self, item: String) {
        let Ok(mut state) = self.lock() else {
            error!("journal lock poisoned, popped item lost");
            return;
        };
        state.pending.push_front(item);
        state.consumed = state.consumed.saturating_sub(1);
        let cursor = Cursor {
            generation: state.generation,
            consumed: state.consumed,
        };
        if let Err(e) = write_cursor(&self.cursor_path, cursor, self.config.fsync) {
            warn!(error = %e, "failed to rewind journal cursor, item kept in memory only");
        }
        debug!("undelivered item returned to journal queue");
    }

    fn maybe_compact(&self) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        if state.consumed >= self.config.compact_threshold
            && state.consumed > state.pending.len() as u64
        {
            if let Err(e) = self.compact(&mut state) {
                warn!(error = %e, "journal compaction failed, will retry on next pop");
            }
        }
    }

    fn compact(&self, state: &mut JournalState) -> Result<(), QueueError> {
        let next_generation = state.generation + 1;
        let mut body = encode_header(next_generation)?;
        for item in &state.pending {
            body.push_str(&encode_record(item)?);
        }

        replace_file(&self.journal_path, body.as_bytes(), true)?;
        state.writer = OpenOptions::new().append(true).open(&self.journal_path)?;
        state.journal_len = body.len() as u64;

        let dropped = state.consumed;
        state.generation = next_generation;
        state.consumed = 0;
        write_cursor(
            &self.cursor_path,
            Cursor {
                generation: next_generation,
                consumed: 0,
            },
            self.config.fsync,
        )?;

        debug!(
            dropped_records = dropped,
            pending = state.pending.len(),
            generation = next_generation,
            "journal compacted"
        );
        Ok(())
    }
}

/// 파일 저널 기반 영속 FIFO
pub struct JournalQueue {
    store: Arc<JournalStore>,
    notify: Notify,
}

impl JournalQueue {
    /// 디렉토리의 저널을 열거나 새로 만듭니다.
    ///
    /// 기존 저널이 있으면 커서 이후의 레코드가 대기 항목으로 복원됩니다.
    pub fn open(config: JournalQueueConfig) -> Result<Self, QueueError> {
        Ok(Self {
            store: Arc::new(JournalStore::open(config)?),
            notify: Notify::new(),
        })
    }

    /// 저널 파일 경로를 반환합니다.
    pub fn journal_path(&self) -> &Path {
        &self.store.journal_path
    }

    /// 블로킹 스레드에서 pop합니다.
    ///
    /// 호출 측 future가 먼저 취소되면 꺼낸 항목을 큐에 되돌립니다.
    async fn try_pop(&self) -> Result<Option<String>, QueueError> {
        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || match tx.send(store.try_pop()) {
            Ok(()) => store.maybe_compact(),
            Err(Ok(Some(item))) => store.unpop(item),
            Err(_) => {}
        });
        rx.await
            .map_err(|_| QueueError::Storage("journal pop task failed".to_owned()))?
    }

    async fn pop_until(&self, deadline: Instant) -> Result<Option<String>, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop().await? {
                return Ok(Some(item));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop().await;
            }
        }
    }
}

impl DurableQueue for JournalQueue {
    fn name(&self) -> &str {
        &self.store.config.name
    }

    fn push(&self, item: String) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            let store = Arc::clone(&self.store);
            tokio::task::spawn_blocking(move || store.append(item))
                .await
                .map_err(|e| QueueError::Storage(format!("spawn_blocking failed: {e}")))??;
            self.notify.notify_one();
            Ok(())
        })
    }

    fn blocking_pop(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<String>, QueueError>> {
        Box::pin(async move { self.pop_until(Instant::now() + timeout).await })
    }

    fn len(&self) -> BoxFuture<'_, Result<usize, QueueError>> {
        Box::pin(async move { Ok(self.store.lock()?.pending.len()) })
    }
}

fn encode_header(generation: u64) -> Result<String, QueueError> {
    let mut line = serde_json::to_string(&JournalHeader { generation })
        .map_err(|e| QueueError::Storage(format!("failed to encode header: {e}")))?;
    line.push('\n');
    Ok(line)
}

fn encode_record(item: &str) -> Result<String, QueueError> {
    let mut line = serde_json::to_string(item)
        .map_err(|e| QueueError::Storage(format!("failed to encode record: {e}")))?;
    line.push('\n');
    Ok(line)
}

fn write_record(writer: &mut File, line: &[u8], sync: bool) -> Result<(), QueueError> {
    writer.write_all(line)?;
    if sync {
        writer.sync_data()?;
    }
    Ok(())
}

fn write_cursor(path: &Path, cursor: Cursor, sync: bool) -> Result<(), QueueError> {
    let body = serde_json::to_vec(&cursor)
        .map_err(|e| QueueError::Storage(format!("failed to encode cursor: {e}")))?;
    replace_file(path, &body, sync)
}

/// 임시 파일에 쓰고 rename으로 교체합니다.
fn replace_file(path: &Path, body: &[u8], sync: bool) -> Result<(), QueueError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp_path)?;
    file.write_all(body)?;
    if sync {
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn load_cursor(path: &Path) -> Result<Cursor, QueueError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| QueueError::Corrupt {
            position: 0,
            reason: format!("cursor file {}: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Cursor::default()),
        Err(e) => Err(e.into()),
    }
}

/// 저널을 읽습니다. 없거나 비어 있으면 새로 만듭니다.
fn load_journal(path: &Path) -> Result<LoadedJournal, QueueError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    if bytes.is_empty() {
        let header = encode_header(0)?;
        replace_file(path, header.as_bytes(), true)?;
        return Ok(LoadedJournal {
            generation: 0,
            records: Vec::new(),
            len: header.len() as u64,
            created: true,
        });
    }

    // 개행으로 끝나지 않는 꼬리는 기록 중단된 레코드
    let valid_len = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    if valid_len < bytes.len() {
        warn!(
            path = %path.display(),
            torn_bytes = bytes.len() - valid_len,
            "truncating torn record at end of journal"
        );
        OpenOptions::new()
            .write(true)
            .open(path)?
            .set_len(valid_len as u64)?;
    }

    let mut lines = bytes[..valid_len]
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty());

    let header: JournalHeader = lines
        .next()
        .ok_or_else(|| QueueError::Corrupt {
            position: 0,
            reason: "missing journal header".to_owned(),
        })
        .and_then(|line| {
            serde_json::from_slice(line).map_err(|e| QueueError::Corrupt {
                position: 0,
                reason: format!("invalid journal header: {e}"),
            })
        })?;

    let records = lines
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_slice::<String>(line).map_err(|e| QueueError::Corrupt {
                position: idx as u64 + 1,
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LoadedJournal {
        generation: header.generation,
        records,
        len: valid_len as u64,
        created: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path, compact_threshold: u64) -> JournalQueueConfig {
        JournalQueueConfig {
            dir: dir.to_path_buf(),
            name: "security_events".to_owned(),
            fsync: false,
            compact_threshold,
        }
    }

    #[tokio::test]
    async fn items_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
            queue.push("a".to_owned()).await.unwrap();
            queue.push("b".to_owned()).await.unwrap();
            queue.push("c".to_owned()).await.unwrap();
            let first = queue.blocking_pop(Duration::from_millis(10)).await.unwrap();
            assert_eq!(first.as_deref(), Some("a"));
        }

        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
        let next = queue.blocking_pop(Duration::from_millis(10)).await.unwrap();
        assert_eq!(next.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn records_with_newlines_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        queue.push("line one\nline two".to_owned()).await.unwrap();
        drop(queue);

        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        let item = queue.blocking_pop(Duration::from_millis(10)).await.unwrap();
        assert_eq!(item.as_deref(), Some("line one\nline two"));
    }

    #[tokio::test]
    async fn compaction_keeps_pending_items() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JournalQueue::open(config(dir.path(), 3)).unwrap();
        for i in 0..6 {
            queue.push(format!("e{i}")).await.unwrap();
        }
        for i in 0..4 {
            let item = queue.blocking_pop(Duration::from_millis(10)).await.unwrap();
            assert_eq!(item, Some(format!("e{i}")));
        }

        // 4개 소비, 2개 대기 -> 압축됨
        let content = fs::read_to_string(queue.journal_path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        drop(queue);

        let queue = JournalQueue::open(config(dir.path(), 3)).unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
        let item = queue.blocking_pop(Duration::from_millis(10)).await.unwrap();
        assert_eq!(item.as_deref(), Some("e4"));
    }

    #[tokio::test]
    async fn torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
            queue.push("complete".to_owned()).await.unwrap();
        }
        let journal = dir.path().join("security_events.journal");
        let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
        file.write_all(b"\"partial").unwrap();
        drop(file);

        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
        queue.push("after".to_owned()).await.unwrap();
        drop(queue);

        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("security_events.journal");
        fs::write(&journal, "{\"generation\":0}\nnot-json\n\"ok\"\n").unwrap();

        let err = JournalQueue::open(config(dir.path(), 1024)).err().unwrap();
        assert!(matches!(err, QueueError::Corrupt { position: 1, .. }));
    }

    #[tokio::test]
    async fn stale_cursor_generation_replays_journal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("security_events.journal"),
            "{\"generation\":2}\n\"x\"\n\"y\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("security_events.cursor"),
            "{\"generation\":1,\"consumed\":5}",
        )
        .unwrap();

        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn partial_record_from_failed_push_is_cut_before_next_push() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        queue.push("a".to_owned()).await.unwrap();

        // 디스크 부족 등으로 레코드 일부만 기록된 상태
        let mut file = OpenOptions::new()
            .append(true)
            .open(queue.journal_path())
            .unwrap();
        file.write_all(b"\"half-writ").unwrap();
        drop(file);

        queue.push("b".to_owned()).await.unwrap();
        drop(queue);

        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
        let first = queue.blocking_pop(Duration::from_millis(10)).await.unwrap();
        let second = queue.blocking_pop(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.as_deref(), Some("a"));
        assert_eq!(second.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn recreated_journal_ignores_old_cursor() {
        let dir = tempfile::tempdir().unwrap();
        // 저널 없이 이전 실행의 커서만 남은 상태
        fs::write(
            dir.path().join("security_events.cursor"),
            "{\"generation\":0,\"consumed\":3}",
        )
        .unwrap();

        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        queue.push("x".to_owned()).await.unwrap();
        queue.push("y".to_owned()).await.unwrap();
        drop(queue);

        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
        let first = queue.blocking_pop(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn undelivered_item_is_returned_to_front() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::open(config(dir.path(), 1024)).unwrap();
        store.append("a".to_owned()).unwrap();
        store.append("b".to_owned()).unwrap();

        let item = store.try_pop().unwrap().unwrap();
        assert_eq!(item, "a");
        store.unpop(item);
        drop(store);

        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
        let first = queue.blocking_pop(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_journal_pop_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JournalQueue::open(config(dir.path(), 1024)).unwrap();
        let started = Instant::now();
        let item = queue.blocking_pop(Duration::from_secs(2)).await.unwrap();
        assert!(item.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
