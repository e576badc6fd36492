use chrono::{Duration, Utc};
use pulse_types::Alert;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 去重窗口默认 10 分钟
const DEFAULT_WINDOW_MINUTES: i64 = 10;

/// 告警去重器：窗口内相同签名的告警折叠为一条，
/// 幸存告警的 duplicate_count 记录折叠数量。
pub struct Deduplicator {
    /// 去重窗口
    window: Duration,

    /// 签名 -> 窗口内最近一次的告警
    recent: Arc<RwLock<HashMap<String, Alert>>>,
}

impl Deduplicator {
    pub fn new(window_minutes: i64) -> Self {
        Self::with_window(Duration::minutes(window_minutes))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            recent: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 去重一批告警，返回幸存告警（保持输入顺序）。
    /// 窗口内已见过的签名：更新已存告警的 duplicate_count / last_seen_at，丢弃新告警。
    pub async fn deduplicate(&self, alerts: Vec<Alert>) -> Vec<Alert> {
        let now = Utc::now();
        let mut recent = self.recent.write().await;

        // 先淘汰窗口外的记录
        let window = self.window;
        recent.retain(|_, alert| now - alert.created_at < window);

        let mut output: Vec<Alert> = Vec::new();
        for mut alert in alerts {
            let key = alert.dedup_key();
            match recent.get_mut(&key) {
                Some(existing) => {
                    existing.duplicate_count += 1;
                    existing.last_seen_at = now;
                    debug!(
                        alert_id = %existing.id,
                        duplicate_count = existing.duplicate_count,
                        "Duplicate alert collapsed"
                    );

                    // 幸存告警在本批输出中时同步计数
                    if let Some(survivor) = output.iter_mut().find(|a| a.id == existing.id) {
                        survivor.duplicate_count = existing.duplicate_count;
                        survivor.last_seen_at = now;
                    }
                }
                None => {
                    alert.duplicate_count = 1;
                    alert.last_seen_at = now;
                    recent.insert(key, alert.clone());
                    output.push(alert);
                }
            }
        }

        output
    }

    /// 清理窗口外的记录
    pub async fn cleanup(&self) {
        let mut recent = self.recent.write().await;
        let now = Utc::now();
        let window = self.window;
        recent.retain(|_, alert| now - alert.created_at < window);

        info!(remaining = recent.len(), "Cleaned up expired dedup records");
    }

    /// 当前跟踪的签名数
    pub async fn tracked_count(&self) -> usize {
        self.recent.read().await.len()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_types::{AlertLevel, Dimension};

    fn sample_alert() -> Alert {
        Alert::new("rule-1", Dimension::Quality, AlertLevel::Warning, "t", "m")
            .with_source("rule_engine")
            .with_metric("quality_score", 0.6, 0.8)
    }

    #[tokio::test]
    async fn test_identical_alerts_collapse_to_one() {
        let dedup = Deduplicator::default();

        let alerts: Vec<Alert> = (0..5).map(|_| sample_alert()).collect();
        let survivors = dedup.deduplicate(alerts).await;

        // N 条相同签名 → 1 条幸存，duplicate_count == N
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].duplicate_count, 5);
    }

    #[tokio::test]
    async fn test_duplicates_across_calls() {
        let dedup = Deduplicator::default();

        let survivors = dedup.deduplicate(vec![sample_alert()]).await;
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].duplicate_count, 1);

        // 第二批同签名告警被吸收，不再输出
        let survivors = dedup.deduplicate(vec![sample_alert(), sample_alert()]).await;
        assert!(survivors.is_empty());
        assert_eq!(dedup.tracked_count().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_signatures_survive_in_order() {
        let dedup = Deduplicator::default();

        let a = sample_alert();
        let mut b = sample_alert();
        b.rule_id = "rule-2".to_string();
        let b = b;

        let survivors = dedup.deduplicate(vec![a.clone(), b.clone()]).await;
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].id, a.id);
        assert_eq!(survivors[1].id, b.id);
    }

    #[tokio::test]
    async fn test_expired_entries_do_not_dedup() {
        let dedup = Deduplicator::with_window(Duration::minutes(10));

        // 第一条已超出窗口
        let mut old = sample_alert();
        old.created_at = Utc::now() - Duration::minutes(11);
        dedup.deduplicate(vec![old]).await;

        let survivors = dedup.deduplicate(vec![sample_alert()]).await;
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].duplicate_count, 1);
    }

    #[tokio::test]
    async fn test_cleanup_drops_expired() {
        let dedup = Deduplicator::with_window(Duration::minutes(10));

        let mut old = sample_alert();
        old.created_at = Utc::now() - Duration::minutes(11);
        // 直接塞入过期记录再清理
        dedup
            .recent
            .write()
            .await
            .insert(old.dedup_key(), old);
        assert_eq!(dedup.tracked_count().await, 1);

        dedup.cleanup().await;
        assert_eq!(dedup.tracked_count().await, 0);
    }
}
