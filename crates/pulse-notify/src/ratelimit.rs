use chrono::{DateTime, Duration, Utc};
use pulse_types::NotificationChannel;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 渠道限流配置
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// 窗口内最大通知数
    pub max_count: u32,

    /// 滑动窗口
    pub window: Duration,
}

/// 通知限流器：按 (渠道, 接收人) 维护滑动窗口计数。
/// 每次访问先剔除窗口外的时间戳，再判断是否超限。
pub struct RateLimiter {
    limits: RwLock<HashMap<NotificationChannel, RateLimit>>,
    counters: RwLock<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limits: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// 设置渠道限流（窗口按分钟）
    pub async fn set_limit(&self, channel: NotificationChannel, max_count: u32, window_minutes: i64) {
        self.set_limit_with_window(channel, max_count, Duration::minutes(window_minutes))
            .await;
    }

    pub async fn set_limit_with_window(
        &self,
        channel: NotificationChannel,
        max_count: u32,
        window: Duration,
    ) {
        let mut limits = self.limits.write().await;
        info!(channel = %channel, max_count, "Rate limit configured");
        limits.insert(channel, RateLimit { max_count, window });
    }

    /// 检查并记账：允许则把当前时间计入窗口并返回 true。
    /// 渠道未配置限流时总是允许
    pub async fn allow(&self, channel: NotificationChannel, recipient: &str) -> bool {
        let limit = {
            let limits = self.limits.read().await;
            match limits.get(&channel) {
                Some(limit) => *limit,
                None => return true,
            }
        };

        let key = format!("{}:{}", channel, recipient);
        let now = Utc::now();
        let window_start = now - limit.window;

        let mut counters = self.counters.write().await;
        let timestamps = counters.entry(key).or_default();

        // 剔除窗口外的时间戳
        while let Some(front) = timestamps.front() {
            if *front <= window_start {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= limit.max_count as usize {
            debug!(channel = %channel, recipient = %recipient, "Rate limit exceeded");
            return false;
        }

        timestamps.push_back(now);
        true
    }

    /// 清理：剔除过期时间戳并回收空键
    pub async fn cleanup(&self) {
        let limits = self.limits.read().await.clone();
        let mut counters = self.counters.write().await;
        let now = Utc::now();

        for (key, timestamps) in counters.iter_mut() {
            let channel = key.split(':').next().unwrap_or_default();
            let window = limits
                .iter()
                .find(|(c, _)| c.to_string() == channel)
                .map(|(_, l)| l.window);
            if let Some(window) = window {
                let window_start = now - window;
                while let Some(front) = timestamps.front() {
                    if *front <= window_start {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
        counters.retain(|_, timestamps| !timestamps.is_empty());

        info!(remaining = counters.len(), "Cleaned up rate limiter counters");
    }

    /// 当前跟踪的 (渠道, 接收人) 键数
    pub async fn tracked_keys(&self) -> usize {
        self.counters.read().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
