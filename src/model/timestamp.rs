//! 事件/消息时间戳（同时也是对外分页游标）
//!
//! 内部以微秒整数存储，进程内严格单调递增：同一毫秒内连续写入的事件也不会撞戳，
//! 保证「严格大于游标」的轮询不会漏掉兄弟事件。对外（JSON / 查询参数）以浮点秒表示。

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

static LAST_ISSUED: AtomicI64 = AtomicI64::new(0);

/// Unix 时间戳（微秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// 取当前时间；若与上一次发放的值相同或更早，则顺延 1 微秒
    pub fn now() -> Self {
        let wall = chrono::Utc::now().timestamp_micros();
        let mut prev = LAST_ISSUED.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match LAST_ISSUED.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return Self(next),
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    /// 由浮点秒构造（SSE 续传的 since_timestamp 参数）
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000.0).round() as i64)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.as_secs_f64())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_secs_f64())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Self::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_strictly_increasing() {
        let mut prev = Timestamp::now();
        for _ in 0..1000 {
            let next = Timestamp::now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_secs_conversion_keeps_micros() {
        let ts = Timestamp::from_micros(1_704_067_200_123_456);
        let back = Timestamp::from_secs_f64(ts.as_secs_f64());
        assert_eq!(ts, back);
    }

    #[test]
    fn test_json_is_float_seconds() {
        let ts = Timestamp::from_micros(1_500_000);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "1.5");
        let parsed: Timestamp = serde_json::from_str("1.5").unwrap();
        assert_eq!(parsed, ts);
    }
}
