//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `watchpost_`
//! - 모듈명: `file_agent_`, `syslog_`, `gateway_`, `queue_`, `worker_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(watchpost_core::metrics::GATEWAY_EVENTS_ACCEPTED_TOTAL).increment(1);
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 이벤트 출처 레이블 키 (file_agent, syslog)
pub const LABEL_SOURCE: &str = "source";

/// 거절 사유 레이블 키 (validation, overloaded, queue)
pub const LABEL_REASON: &str = "reason";

// ─── File agent 메트릭 ─────────────────────────────────────────────

/// File agent: 읽은 라인 수 (counter)
pub const FILE_AGENT_LINES_READ_TOTAL: &str = "watchpost_file_agent_lines_read_total";

/// File agent: 감지된 truncation/rotation 수 (counter)
pub const FILE_AGENT_RESETS_TOTAL: &str = "watchpost_file_agent_resets_total";

/// File agent: 전달 실패 수 (counter)
pub const FILE_AGENT_SUBMIT_FAILURES_TOTAL: &str = "watchpost_file_agent_submit_failures_total";

/// File agent: 길이 제한을 넘어 건너뛴 라인 수 (counter)
pub const FILE_AGENT_LINES_SKIPPED_TOTAL: &str = "watchpost_file_agent_lines_skipped_total";

// ─── Syslog 메트릭 ─────────────────────────────────────────────────

/// Syslog: 수신한 데이터그램 수 (counter)
pub const SYSLOG_DATAGRAMS_RECEIVED_TOTAL: &str = "watchpost_syslog_datagrams_received_total";

/// Syslog: 버퍼 포화로 버린 데이터그램 수 (counter)
pub const SYSLOG_DATAGRAMS_DROPPED_TOTAL: &str = "watchpost_syslog_datagrams_dropped_total";

/// Syslog: 전달 실패 수 (counter)
pub const SYSLOG_SUBMIT_FAILURES_TOTAL: &str = "watchpost_syslog_submit_failures_total";

// ─── Gateway 메트릭 ────────────────────────────────────────────────

/// Gateway: 수락된 이벤트 수 (counter, label: source)
pub const GATEWAY_EVENTS_ACCEPTED_TOTAL: &str = "watchpost_gateway_events_accepted_total";

/// Gateway: 거절된 이벤트 수 (counter, label: reason)
pub const GATEWAY_EVENTS_REJECTED_TOTAL: &str = "watchpost_gateway_events_rejected_total";

/// Gateway: 큐 push 실패 수 (counter)
pub const GATEWAY_PUSH_FAILURES_TOTAL: &str = "watchpost_gateway_push_failures_total";

// ─── Queue 메트릭 ──────────────────────────────────────────────────

/// Queue: 현재 길이 (gauge)
pub const QUEUE_LENGTH: &str = "watchpost_queue_length";

// ─── Worker 메트릭 ─────────────────────────────────────────────────

/// Worker: 분석 완료 이벤트 수 (counter)
pub const WORKER_EVENTS_ANALYZED_TOTAL: &str = "watchpost_worker_events_analyzed_total";

/// Worker: 역직렬화 불가로 버린 항목 수 (counter)
pub const WORKER_DECODE_FAILURES_TOTAL: &str = "watchpost_worker_decode_failures_total";

/// Worker: 에러로 인한 backoff 횟수 (counter)
pub const WORKER_BACKOFFS_TOTAL: &str = "watchpost_worker_backoffs_total";

/// Worker: 이벤트 하나의 분석 소요 시간 (histogram, 초)
pub const WORKER_ANALYSIS_DURATION_SECONDS: &str = "watchpost_worker_analysis_duration_seconds";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다. 레코더가 없어도 안전합니다.
pub fn describe_all() {
    describe_counter!(
        FILE_AGENT_LINES_READ_TOTAL,
        "Total lines read from the watched file"
    );
    describe_counter!(
        FILE_AGENT_RESETS_TOTAL,
        "Total truncation or rotation resets of the watched file"
    );
    describe_counter!(
        FILE_AGENT_SUBMIT_FAILURES_TOTAL,
        "Total file events that failed to reach ingestion"
    );
    describe_counter!(
        FILE_AGENT_LINES_SKIPPED_TOTAL,
        "Total lines skipped for exceeding the maximum line length"
    );

    describe_counter!(
        SYSLOG_DATAGRAMS_RECEIVED_TOTAL,
        "Total syslog datagrams received"
    );
    describe_counter!(
        SYSLOG_DATAGRAMS_DROPPED_TOTAL,
        "Total syslog datagrams dropped because the buffer was full"
    );
    describe_counter!(
        SYSLOG_SUBMIT_FAILURES_TOTAL,
        "Total syslog events that failed to reach ingestion"
    );

    describe_counter!(
        GATEWAY_EVENTS_ACCEPTED_TOTAL,
        "Total events accepted by the ingest gateway"
    );
    describe_counter!(
        GATEWAY_EVENTS_REJECTED_TOTAL,
        "Total events rejected by the ingest gateway"
    );
    describe_counter!(
        GATEWAY_PUSH_FAILURES_TOTAL,
        "Total events that failed to be pushed to the queue"
    );

    describe_gauge!(QUEUE_LENGTH, "Current number of events waiting in the queue");

    describe_counter!(
        WORKER_EVENTS_ANALYZED_TOTAL,
        "Total events analyzed by the worker"
    );
    describe_counter!(
        WORKER_DECODE_FAILURES_TOTAL,
        "Total queue items discarded because they could not be decoded"
    );
    describe_counter!(
        WORKER_BACKOFFS_TOTAL,
        "Total times the worker backed off after an error"
    );
    describe_histogram!(
        WORKER_ANALYSIS_DURATION_SECONDS,
        "Time spent analyzing a single event"
    );
}
