//! 파일 기반 로그 수집기
//!
//! 로그 파일을 감시하며 새로운 라인이 추가되면 수집합니다.
//! `tail -f`와 유사한 동작을 파일시스템 알림으로 구동합니다.
//!
//! # 오프셋 규칙
//! - 시작 시 파일이 있으면 끝에서부터 읽음 (기존 내용은 다시 읽지 않음)
//! - 마지막 `\n`까지만 소비, 개행 없는 꼬리는 완성될 때까지 대기
//! - 파일 크기가 오프셋보다 작아지면 (truncation) 처음부터 다시 읽음
//! - inode가 바뀌면 (rename 로테이션) 처음부터 다시 읽음
//!
//! 오프셋은 메모리에만 있으며 재시작 시 다시 파일 끝에서 시작합니다.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use watchpost_core::config::FileAgentConfig;
use watchpost_core::error::{PipelineError, WatchpostError};
use watchpost_core::metrics as m;
use watchpost_core::pipeline::{HealthStatus, Pipeline};

use super::CollectorStatus;
use crate::error::IngestError;
use crate::normalizer::normalize_file_line;
use crate::sink::EventSink;

/// 로컬 호스트명을 반환합니다. 조회에 실패하면 "unknown".
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_owned())
}

/// 단일 파일 테일러
///
/// `poll()` 호출 사이에 추가된 완성된 라인을 파일 순서대로 반환합니다.
/// 한 번의 `poll()`은 최대 `max_read_bytes`만 읽으며, 남은 분량은
/// [`has_backlog`](Self::has_backlog)로 알립니다.
#[derive(Debug)]
pub struct FileTailer {
    path: PathBuf,
    offset: u64,
    #[cfg(unix)]
    inode: Option<u64>,
    max_line_length: usize,
    max_read_bytes: usize,
    /// 길이 제한을 넘은 라인의 나머지를 개행까지 버리는 중
    skipping: bool,
    /// 마지막 읽기가 창 크기에 막혀 파일 끝까지 가지 못함
    backlog: bool,
}

impl FileTailer {
    /// 새 테일러를 생성합니다.
    ///
    /// 파일이 있으면 현재 크기를 시작 오프셋으로 사용하고, 없으면 0부터 시작합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let defaults = FileAgentConfig::default();
        let path = path.into();
        let metadata = std::fs::metadata(&path).ok();
        Self {
            offset: metadata.as_ref().map_or(0, |meta| meta.len()),
            #[cfg(unix)]
            inode: metadata.as_ref().map(inode_of),
            path,
            max_line_length: defaults.max_line_length,
            max_read_bytes: defaults.max_read_bytes,
            skipping: false,
            backlog: false,
        }
    }

    /// 라인 길이와 읽기 창 크기를 지정합니다.
    ///
    /// 최대 길이의 라인이 항상 한 번에 들어오도록 창은 `max_line_length + 1` 이상으로 맞춥니다.
    pub fn with_limits(mut self, max_line_length: usize, max_read_bytes: usize) -> Self {
        self.max_line_length = max_line_length.max(1);
        self.max_read_bytes = max_read_bytes.max(self.max_line_length + 1);
        self
    }

    /// 감시 중인 경로를 반환합니다.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 지금까지 소비한 바이트 수를 반환합니다.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 읽기 창 제한으로 아직 읽지 않은 데이터가 남아 있는지 반환합니다.
    pub fn has_backlog(&self) -> bool {
        self.backlog
    }

    /// 새로 추가된 완성 라인을 읽습니다.
    ///
    /// I/O 에러는 로그로 남기고 빈 결과를 반환합니다. 오프셋은 바뀌지 않습니다.
    pub async fn poll(&mut self) -> Vec<String> {
        match self.read_new_lines().await {
            Ok(lines) => lines,
            Err(e) => {
                self.backlog = false;
                warn!(path = %self.path.display(), error = %e, "failed to read watched file");
                Vec::new()
            }
        }
    }

    async fn read_new_lines(&mut self) -> Result<Vec<String>, std::io::Error> {
        let mut file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;
        let size = metadata.len();
        self.backlog = false;

        #[cfg(unix)]
        {
            let inode = inode_of(&metadata);
            if self.inode.is_some_and(|prev| prev != inode) {
                info!(path = %self.path.display(), "file replaced, reading from start");
                counter!(m::FILE_AGENT_RESETS_TOTAL).increment(1);
                self.reset();
            }
            self.inode = Some(inode);
        }

        if self.offset > size {
            info!(
                path = %self.path.display(),
                offset = self.offset,
                size,
                "file truncated, reading from start"
            );
            counter!(m::FILE_AGENT_RESETS_TOTAL).increment(1);
            self.reset();
        }
        if self.offset == size {
            return Ok(Vec::new());
        }

        let available = size - self.offset;
        let window_len = available.min(self.max_read_bytes as u64);
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut window = Vec::with_capacity(window_len as usize);
        file.take(window_len).read_to_end(&mut window).await?;
        let read_len = window.len() as u64;

        // 이전 poll에서 넘친 라인의 나머지
        let mut start = 0;
        if self.skipping {
            match window.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    start = pos + 1;
                    self.skipping = false;
                }
                None => {
                    self.offset += read_len;
                    self.backlog = read_len < available;
                    return Ok(Vec::new());
                }
            }
        }

        let rest = &window[start..];
        let mut lines = Vec::new();
        match rest.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => {
                self.offset += (start + last_newline + 1) as u64;
                for line in rest[..last_newline].split(|&b| b == b'\n') {
                    if line.len() > self.max_line_length {
                        self.skip_oversized(line.len());
                        continue;
                    }
                    let line = String::from_utf8_lossy(line).trim().to_owned();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
            }
            None => {
                self.offset += start as u64;
                // 개행 없는 꼬리가 이미 제한을 넘음: 개행이 올 때까지 버림
                if rest.len() > self.max_line_length {
                    self.skip_oversized(rest.len());
                    self.offset += rest.len() as u64;
                    self.skipping = true;
                }
            }
        }

        self.backlog = read_len < available;
        Ok(lines)
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.skipping = false;
    }

    fn skip_oversized(&self, len: usize) {
        counter!(m::FILE_AGENT_LINES_SKIPPED_TOTAL).increment(1);
        warn!(
            path = %self.path.display(),
            offset = self.offset,
            line_bytes = len,
            max_line_length = self.max_line_length,
            "skipping line over maximum length"
        );
    }
}

#[cfg(unix)]
fn inode_of(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct FileCollectorConfig {
    /// 감시할 파일 경로
    pub watch_path: PathBuf,
    /// 알림 누락 대비 재확인 주기 (0이면 비활성)
    pub fallback_poll_secs: u64,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// poll 한 번에 읽는 최대 바이트 수
    pub max_read_bytes: usize,
    /// 이벤트에 기록할 호스트명
    pub hostname: String,
}

impl Default for FileCollectorConfig {
    fn default() -> Self {
        Self::from_core(&FileAgentConfig::default())
    }
}

impl FileCollectorConfig {
    /// core의 `FileAgentConfig`에서 수집기 설정을 생성합니다.
    pub fn from_core(core: &FileAgentConfig) -> Self {
        Self {
            watch_path: PathBuf::from(&core.watch_path),
            fallback_poll_secs: core.fallback_poll_secs,
            max_line_length: core.max_line_length,
            max_read_bytes: core.max_read_bytes,
            hostname: local_hostname(),
        }
    }

    /// 호스트명을 지정합니다.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }
}

/// 파일 기반 로그 수집기
///
/// 파일의 부모 디렉토리를 감시하여 수정, 재생성, 로테이션 알림을 받습니다.
/// 연속된 알림은 한 번의 `poll()`로 합쳐집니다.
pub struct FileCollector {
    config: FileCollectorConfig,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
    status: CollectorStatus,
    handle: Option<JoinHandle<()>>,
    lines_read: Arc<AtomicU64>,
}

impl FileCollector {
    /// 새 파일 수집기를 생성합니다.
    pub fn new(config: FileCollectorConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            cancel: CancellationToken::new(),
            status: CollectorStatus::Idle,
            handle: None,
            lines_read: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 현재 상태를 반환합니다.
    pub fn status(&self) -> &CollectorStatus {
        &self.status
    }

    /// 지금까지 읽은 라인 수를 반환합니다.
    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    fn spawn_watcher(&self, wake: mpsc::Sender<()>) -> Result<RecommendedWatcher, IngestError> {
        let path = &self.config.watch_path;
        let file_name = path.file_name().map(|name| name.to_owned()).ok_or_else(|| {
            IngestError::Config {
                field: "file_agent.watch_path".to_owned(),
                reason: format!("'{}' has no file name", path.display()),
            }
        })?;
        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let relevant = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if relevant {
                        // 채널이 가득 차 있으면 이미 poll이 예약된 상태
                        let _ = wake.try_send(());
                    }
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            }
        })?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    async fn run(
        watcher: RecommendedWatcher,
        mut wake: mpsc::Receiver<()>,
        mut tailer: FileTailer,
        config: FileCollectorConfig,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
        lines_read: Arc<AtomicU64>,
    ) {
        // 태스크가 끝날 때까지 감시 유지
        let _watcher = watcher;
        let filename = config.watch_path.display().to_string();
        let mut fallback = (config.fallback_poll_secs > 0).then(|| {
            let mut interval = tokio::time::interval(Duration::from_secs(config.fallback_poll_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        // 감시 등록 전에 생긴 변경분
        Self::poll_and_submit(
            &mut tailer,
            &filename,
            &config.hostname,
            sink.as_ref(),
            &lines_read,
            &cancel,
        )
        .await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                woke = wake.recv() => {
                    if woke.is_none() {
                        warn!(path = %filename, "file watcher channel closed");
                        break;
                    }
                }
                _ = async {
                    match fallback.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {}
            }
            // 대기 중 쌓인 알림은 이번 poll로 합침
            while wake.try_recv().is_ok() {}

            Self::poll_and_submit(
                &mut tailer,
                &filename,
                &config.hostname,
                sink.as_ref(),
                &lines_read,
                &cancel,
            )
            .await;
        }

        debug!(path = %filename, offset = tailer.offset(), "file collector loop exited");
    }

    /// 읽기 창에 막혀 남은 분량이 없을 때까지 읽고 전달합니다.
    async fn poll_and_submit(
        tailer: &mut FileTailer,
        filename: &str,
        hostname: &str,
        sink: &dyn EventSink,
        lines_read: &AtomicU64,
        cancel: &CancellationToken,
    ) {
        loop {
            let lines = tailer.poll().await;
            lines_read.fetch_add(lines.len() as u64, Ordering::Relaxed);
            counter!(m::FILE_AGENT_LINES_READ_TOTAL).increment(lines.len() as u64);

            for line in lines {
                let Some(event) = normalize_file_line(&line, filename, hostname, Utc::now())
                else {
                    continue;
                };
                match sink.submit(event).await {
                    Ok(receipt) => debug!(event_id = %receipt.event_id, "file event submitted"),
                    Err(e) => {
                        counter!(m::FILE_AGENT_SUBMIT_FAILURES_TOTAL).increment(1);
                        warn!(path = %filename, error = %e, "failed to submit file event");
                    }
                }
            }

            if !tailer.has_backlog() || cancel.is_cancelled() {
                break;
            }
        }
    }
}

impl Pipeline for FileCollector {
    async fn start(&mut self) -> Result<(), WatchpostError> {
        if self.status == CollectorStatus::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let (wake_tx, wake_rx) = mpsc::channel(1);
        let watcher = match self.spawn_watcher(wake_tx) {
            Ok(watcher) => watcher,
            Err(e) => {
                self.status = CollectorStatus::Error(e.to_string());
                return Err(e.into());
            }
        };

        let tailer = FileTailer::new(&self.config.watch_path)
            .with_limits(self.config.max_line_length, self.config.max_read_bytes);
        info!(
            path = %self.config.watch_path.display(),
            offset = tailer.offset(),
            fallback_poll_secs = self.config.fallback_poll_secs,
            "file collector started"
        );

        self.cancel = CancellationToken::new();
        self.handle = Some(tokio::spawn(Self::run(
            watcher,
            wake_rx,
            tailer,
            self.config.clone(),
            Arc::clone(&self.sink),
            self.cancel.clone(),
            Arc::clone(&self.lines_read),
        )));
        self.status = CollectorStatus::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), WatchpostError> {
        if self.status != CollectorStatus::Running {
            return Err(PipelineError::NotRunning.into());
        }
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "file collector task panicked");
            }
        }
        self.status = CollectorStatus::Stopped;
        info!(path = %self.config.watch_path.display(), "file collector stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match &self.handle {
            Some(handle) if handle.is_finished() => {
                HealthStatus::Unhealthy("file collector task exited".to_owned())
            }
            _ => self.status.health(),
        }
    }
}
