//! 이벤트 정규화 -- 원시 입력을 [`SecurityEvent`]로 변환
//!
//! 순수 함수만 제공합니다. I/O도 시계 조회도 하지 않으며, 관측 시각은
//! 호출자가 전달합니다. 같은 입력은 항상 같은 이벤트를 만듭니다.
//!
//! 공백만 있는 입력은 `None`을 반환하며 큐에 도달하지 않습니다.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use watchpost_core::event::{EventSource, SecurityEvent};

/// 파일에서 읽은 한 라인을 이벤트로 변환합니다.
pub fn normalize_file_line(
    line: &str,
    filename: &str,
    hostname: &str,
    observed_at: DateTime<Utc>,
) -> Option<SecurityEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(
        SecurityEvent::new(EventSource::FileAgent, trimmed, observed_at)
            .with_filename(filename)
            .with_hostname(hostname),
    )
}

/// UDP 데이터그램 하나를 이벤트로 변환합니다.
///
/// UTF-8이 아닌 바이트는 대체 문자로 디코딩되며 실패하지 않습니다.
pub fn normalize_datagram(
    payload: &[u8],
    sender_ip: IpAddr,
    observed_at: DateTime<Utc>,
) -> Option<SecurityEvent> {
    let decoded = String::from_utf8_lossy(payload);
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(
        SecurityEvent::new(EventSource::Syslog, trimmed, observed_at)
            .with_source_ip(sender_ip.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::net::Ipv4Addr;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn file_line_sets_origin_context() {
        let event = normalize_file_line(
            "  Failed password for root  ",
            "/var/log/auth.log",
            "web-01",
            at(),
        )
        .unwrap();
        assert_eq!(event.source, EventSource::FileAgent);
        assert_eq!(event.raw_message, "Failed password for root");
        assert_eq!(event.filename.as_deref(), Some("/var/log/auth.log"));
        assert_eq!(event.hostname.as_deref(), Some("web-01"));
        assert_eq!(event.severity, "Unknown");
        assert!(event.source_ip.is_none());
        assert_eq!(event.timestamp, at());
    }

    #[test]
    fn blank_file_line_is_dropped() {
        assert!(normalize_file_line("   \t", "/f", "h", at()).is_none());
        assert!(normalize_file_line("", "/f", "h", at()).is_none());
    }

    #[test]
    fn datagram_sets_sender_ip() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let event = normalize_datagram(b"auth failure user=root", ip, at()).unwrap();
        assert_eq!(event.source, EventSource::Syslog);
        assert_eq!(event.source_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(event.raw_message, "auth failure user=root");
        assert_eq!(event.severity, "Unknown");
        assert!(event.filename.is_none());
    }

    #[test]
    fn datagram_with_invalid_utf8_uses_replacement() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let event = normalize_datagram(b"bad \xff byte\n", ip, at()).unwrap();
        assert_eq!(event.raw_message, "bad \u{fffd} byte");
    }

    #[test]
    fn whitespace_datagram_is_dropped() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(normalize_datagram(b" \r\n ", ip, at()).is_none());
    }

    #[test]
    fn normalization_is_idempotent() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9));
        let a = normalize_datagram(b"sshd: invalid user", ip, at());
        let b = normalize_datagram(b"sshd: invalid user", ip, at());
        assert_eq!(a, b);

        let c = normalize_file_line("x", "/f", "h", at());
        let d = normalize_file_line("x", "/f", "h", at());
        assert_eq!(c, d);
    }
}
