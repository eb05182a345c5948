//! 이벤트 타입 -- 수집부터 분석까지 흐르는 정규화된 보안 이벤트
//!
//! [`SecurityEvent`]는 소스(파일, syslog)와 무관한 표준 이벤트 형식이며,
//! [`IngestedEvent`]는 인제스트 경계에서 식별자와 수신 시각이 부여된 형태입니다.
//! 큐에는 `IngestedEvent`가 JSON 문자열로 저장됩니다.
//!
//! # 와이어 형식
//! ```json
//! {
//!   "event_id": "evt_20240115_120000_123456_00000001",
//!   "ingested_at": "2024-01-15T12:00:00.123456Z",
//!   "source": "syslog",
//!   "source_ip": "10.0.0.5",
//!   "timestamp": "2024-01-15T12:00:00.120001Z",
//!   "raw_message": "auth failure user=root",
//!   "severity": "Unknown"
//! }
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// 파서가 심각도를 결정하지 못했을 때의 기본값
pub const DEFAULT_SEVERITY: &str = "Unknown";

/// 이벤트 출처 구분자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// 파일 테일링 에이전트
    FileAgent,
    /// UDP syslog 수신기
    Syslog,
}

impl EventSource {
    /// 와이어 형식 문자열을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileAgent => "file_agent",
            Self::Syslog => "syslog",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 정규화된 보안 이벤트
///
/// 로그 라인 하나 또는 데이터그램 하나에 대응합니다.
/// `raw_message`는 원문 그대로 보존되며 잘리거나 변형되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// 출처
    pub source: EventSource,
    /// 송신자 IP (syslog 출처에서만 설정)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    /// 이벤트 관측 시각 (UTC)
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// 원본 메시지
    pub raw_message: String,
    /// 심각도 (기본값 "Unknown")
    #[serde(
        default = "default_severity",
        deserialize_with = "severity_or_default"
    )]
    pub severity: String,
    /// 호스트명 (파일 에이전트)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// 파일 경로 (파일 에이전트)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl SecurityEvent {
    /// 기본 필드만으로 이벤트를 생성합니다.
    pub fn new(
        source: EventSource,
        raw_message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            source_ip: None,
            timestamp,
            raw_message: raw_message.into(),
            severity: DEFAULT_SEVERITY.to_owned(),
            hostname: None,
            filename: None,
        }
    }

    /// 송신자 IP를 설정합니다.
    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    /// 호스트명을 설정합니다.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// 파일 경로를 설정합니다.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// 심각도를 설정합니다.
    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SecurityEvent source={} severity={} len={}",
            self.source,
            self.severity,
            self.raw_message.len(),
        )
    }
}

/// 인제스트 경계를 통과한 이벤트
///
/// `event_id`와 `ingested_at`은 게이트웨이에서 정확히 한 번 부여되며,
/// 이후 불변입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedEvent {
    /// 전역 고유 이벤트 ID
    pub event_id: String,
    /// 게이트웨이 수신 시각 (항상 `timestamp` 이상)
    #[serde(with = "timestamp")]
    pub ingested_at: DateTime<Utc>,
    /// 원본 이벤트
    #[serde(flatten)]
    pub event: SecurityEvent,
}

impl IngestedEvent {
    /// 큐 저장용 JSON 문자열로 직렬화합니다.
    pub fn to_queue_item(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 큐에서 꺼낸 JSON 문자열을 역직렬화합니다.
    pub fn from_queue_item(item: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(item)
    }
}

impl fmt::Display for IngestedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IngestedEvent[{}] source={} severity={}",
            self.event_id, self.event.source, self.event.severity,
        )
    }
}

/// 분석 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// 분석 대상 이벤트 ID
    pub event_id: String,
    /// 요약
    pub summary: String,
    /// 위험 점수 (0.0~1.0)
    pub risk_score: f64,
    /// 권장 조치
    pub recommended_action: String,
    /// 신뢰도 (0.0~1.0)
    pub confidence: f64,
    /// 분석 완료 시각
    #[serde(with = "timestamp")]
    pub analyzed_at: DateTime<Utc>,
}

fn default_severity() -> String {
    DEFAULT_SEVERITY.to_owned()
}

/// `"severity": null`도 기본값으로 취급합니다.
fn severity_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.unwrap_or_else(default_severity))
}

/// ISO-8601 시각을 마이크로초 정밀도, `Z` 접미사로 포맷합니다.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// ISO-8601 시각 문자열을 파싱합니다.
///
/// RFC 3339(오프셋 포함)와 오프셋 없는 형식을 모두 허용하며,
/// 오프셋이 없으면 UTC로 간주합니다.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| rfc_err),
    }
}

/// `DateTime<Utc>` serde 어댑터 (`#[serde(with = "timestamp")]`)
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{raw}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    fn sample_syslog_event() -> SecurityEvent {
        SecurityEvent::new(EventSource::Syslog, "auth failure user=root", sample_time())
            .with_source_ip("10.0.0.5")
    }

    #[test]
    fn source_serializes_snake_case() {
        let json = serde_json::to_string(&EventSource::FileAgent).unwrap();
        assert_eq!(json, "\"file_agent\"");
        let json = serde_json::to_string(&EventSource::Syslog).unwrap();
        assert_eq!(json, "\"syslog\"");
    }

    #[test]
    fn unknown_source_is_rejected() {
        let json = r#"{"source":"journald","timestamp":"2024-01-15T12:00:00Z","raw_message":"x"}"#;
        assert!(serde_json::from_str::<SecurityEvent>(json).is_err());
    }

    #[test]
    fn severity_defaults_to_unknown() {
        let json = r#"{"source":"syslog","timestamp":"2024-01-15T12:00:00Z","raw_message":"x"}"#;
        let event: SecurityEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.severity, "Unknown");
        assert!(event.source_ip.is_none());
    }

    #[test]
    fn null_severity_defaults_to_unknown() {
        let json = r#"{"source":"syslog","timestamp":"2024-01-15T12:00:00Z","raw_message":"x","severity":null}"#;
        let event: SecurityEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.severity, "Unknown");
    }

    #[test]
    fn malformed_timestamp_is_rejected() {
        let json = r#"{"source":"syslog","timestamp":"yesterday","raw_message":"x"}"#;
        let err = serde_json::from_str::<SecurityEvent>(json).unwrap_err();
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn naive_timestamp_is_treated_as_utc() {
        let ts = parse_timestamp("2024-01-15T12:00:00.250000").unwrap();
        assert_eq!(ts, sample_time() + chrono::Duration::milliseconds(250));
    }

    #[test]
    fn timestamp_format_has_micros_and_z() {
        let ts = sample_time() + chrono::Duration::microseconds(123_456);
        assert_eq!(format_timestamp(&ts), "2024-01-15T12:00:00.123456Z");
    }

    #[test]
    fn ingested_event_flattens_security_event() {
        let ingested = IngestedEvent {
            event_id: "evt_20240115_120000_000000_00000001".to_owned(),
            ingested_at: sample_time(),
            event: sample_syslog_event(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&ingested.to_queue_item().unwrap()).unwrap();
        assert_eq!(value["event_id"], "evt_20240115_120000_000000_00000001");
        assert_eq!(value["source"], "syslog");
        assert_eq!(value["source_ip"], "10.0.0.5");
        assert_eq!(value["raw_message"], "auth failure user=root");
        assert!(value.get("hostname").is_none());
    }

    #[test]
    fn ingested_event_restores_from_queue_item() {
        let ingested = IngestedEvent {
            event_id: "evt_x".to_owned(),
            ingested_at: sample_time(),
            event: sample_syslog_event(),
        };
        let item = ingested.to_queue_item().unwrap();
        assert_eq!(IngestedEvent::from_queue_item(&item).unwrap(), ingested);
    }

    #[test]
    fn corrupt_queue_item_fails() {
        assert!(IngestedEvent::from_queue_item("{not json").is_err());
        assert!(IngestedEvent::from_queue_item(r#"{"event_id":"x"}"#).is_err());
    }

    #[test]
    fn display_contains_id_and_source() {
        let ingested = IngestedEvent {
            event_id: "evt_abc".to_owned(),
            ingested_at: sample_time(),
            event: sample_syslog_event(),
        };
        let display = ingested.to_string();
        assert!(display.contains("evt_abc"));
        assert!(display.contains("syslog"));
    }

    #[test]
    fn events_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<SecurityEvent>();
        assert_send_sync::<IngestedEvent>();
        assert_send_sync::<AnalysisResult>();
    }
}
