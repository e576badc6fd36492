use crate::channel::ChannelHandler;
use crate::config::NotificationConfig;
use crate::providers::{DingTalkHandler, EmailHandler, SlackHandler, WebhookHandler};
use crate::ratelimit::RateLimiter;
use crate::template::NotificationTemplate;
use chrono::{Duration, Utc};
use pulse_types::{
    Alert, NotificationChannel, NotificationPriority, NotificationRecord, NotificationStatus,
    Result,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

/// 投递队列容量
const QUEUE_CAPACITY: usize = 1024;

/// 重试策略：失败后等 base_delay * 2^retry_count 再入队，
/// 重试次数以 max_retries 为上限
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: StdDuration::from_secs(1),
        }
    }
}

/// 通知统计
#[derive(Debug, Clone, Serialize)]
pub struct NotificationStatistics {
    /// 统计窗口内的记录总数
    pub total: u64,
    /// 按渠道计数
    pub by_channel: HashMap<String, u64>,
    /// 按状态计数
    pub by_status: HashMap<String, u64>,
    /// 发送成功率（sent/delivered/read 占比）
    pub success_rate: f64,
}

/// 记录查询过滤
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub channel: Option<NotificationChannel>,
    pub status: Option<NotificationStatus>,
    pub alert_id: Option<String>,
    /// 0 表示不限制
    pub limit: usize,
}

/// 通知系统：模板渲染、配置匹配、限流、经由渠道处理器的重试投递。
/// 投递由独立 worker 驱动，send_alert_notifications 入队即返回。
/// 需在 Tokio 运行时内创建。
pub struct NotificationSystem {
    templates: Arc<RwLock<Vec<NotificationTemplate>>>,
    configs: Arc<RwLock<Vec<NotificationConfig>>>,
    handlers: Arc<RwLock<HashMap<NotificationChannel, Arc<dyn ChannelHandler>>>>,
    rate_limiter: Arc<RateLimiter>,
    records: Arc<RwLock<HashMap<String, NotificationRecord>>>,
    queue_tx: mpsc::Sender<String>,
    retry: RetryPolicy,
}

impl NotificationSystem {
    pub fn new(retry: RetryPolicy) -> Self {
        Self::build(retry, Vec::new())
    }

    /// 创建并装载默认模板集
    pub fn with_default_templates(retry: RetryPolicy) -> Self {
        Self::build(retry, NotificationTemplate::default_set())
    }

    fn build(retry: RetryPolicy, templates: Vec<NotificationTemplate>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);

        let handlers: Arc<RwLock<HashMap<NotificationChannel, Arc<dyn ChannelHandler>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let records: Arc<RwLock<HashMap<String, NotificationRecord>>> =
            Arc::new(RwLock::new(HashMap::new()));

        // 单一 worker 独占 Receiver，天然避免同一队列的并发 drain
        let worker = DispatchWorker {
            handlers: handlers.clone(),
            records: records.clone(),
            queue_tx: queue_tx.clone(),
            retry,
        };
        tokio::spawn(worker.run(queue_rx));

        Self {
            templates: Arc::new(RwLock::new(templates)),
            configs: Arc::new(RwLock::new(Vec::new())),
            handlers,
            rate_limiter: Arc::new(RateLimiter::new()),
            records,
            queue_tx,
            retry,
        }
    }

    /// 注册渠道处理器
    pub async fn register_handler(&self, handler: Arc<dyn ChannelHandler>) {
        let channel = handler.channel();
        info!(channel = %channel, handler = handler.name(), "Channel handler registered");
        self.handlers.write().await.insert(channel, handler);
    }

    /// 按键值配置构建并注册渠道处理器。
    /// 缺必填键时返回配置错误，不影响已注册的处理器
    pub async fn configure_handler(
        &self,
        channel: NotificationChannel,
        config: &HashMap<String, String>,
    ) -> Result<()> {
        let handler: Arc<dyn ChannelHandler> = match channel {
            NotificationChannel::Email => Arc::new(EmailHandler::from_config(config)?),
            NotificationChannel::Webhook => Arc::new(WebhookHandler::from_config(config)?),
            NotificationChannel::DingTalk => Arc::new(DingTalkHandler::from_config(config)?),
            NotificationChannel::Slack => Arc::new(SlackHandler::from_config(config)?),
        };
        self.register_handler(handler).await;
        Ok(())
    }

    /// 添加通知模板
    pub async fn add_template(&self, template: NotificationTemplate) -> String {
        let id = template.id.clone();
        self.templates.write().await.push(template);
        id
    }

    /// 添加通知配置
    pub async fn add_notification_config(&self, config: NotificationConfig) {
        info!(name = %config.name, channel = %config.channel, "Notification config added");
        self.configs.write().await.push(config);
    }

    /// 设置渠道限流
    pub async fn set_rate_limit(
        &self,
        channel: NotificationChannel,
        max_count: u32,
        window_minutes: i64,
    ) {
        self.rate_limiter
            .set_limit(channel, max_count, window_minutes)
            .await;
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// 为一条告警产生通知：匹配配置 → 限流闸口 → 选模板 → 渲染 →
    /// 存 PENDING 记录并入队。入队后立即返回，投递由 worker 异步完成
    pub async fn send_alert_notifications(&self, alert: &Alert) -> Vec<NotificationRecord> {
        let configs = self.configs.read().await.clone();
        let mut created = Vec::new();

        for config in configs.iter().filter(|c| c.matches(alert)) {
            for recipient in &config.recipients {
                if !self.rate_limiter.allow(config.channel, recipient).await {
                    debug!(
                        channel = %config.channel,
                        recipient = %recipient,
                        "Notification skipped by rate limit"
                    );
                    continue;
                }

                let template = match self.select_template(config, alert).await {
                    Some(template) => template,
                    None => {
                        warn!(
                            channel = %config.channel,
                            level = %alert.level,
                            "No template available, skipping recipient"
                        );
                        continue;
                    }
                };

                let (subject, content) = template.render(alert);
                let mut record = NotificationRecord::new(
                    &alert.id,
                    config.channel,
                    recipient,
                    subject,
                    content,
                    NotificationPriority::from_level(alert.level),
                )
                .with_metadata("template_id", json!(template.id))
                .with_metadata("alert_level", json!(alert.level))
                .with_metadata("alert_dimension", json!(alert.dimension))
                .with_metadata("format", json!(template.format));
                record.max_retries = self.retry.max_retries;

                self.records
                    .write()
                    .await
                    .insert(record.id.clone(), record.clone());

                if let Err(e) = self.queue_tx.send(record.id.clone()).await {
                    error!(record_id = %record.id, error = %e, "Failed to enqueue notification");
                    if let Some(stored) = self.records.write().await.get_mut(&record.id) {
                        stored.mark_failed("dispatch queue closed");
                    }
                }
                created.push(record);
            }
        }

        created
    }

    /// 模板选择：显式指定的模板优先，否则取第一条匹配渠道+级别的启用模板
    async fn select_template(
        &self,
        config: &NotificationConfig,
        alert: &Alert,
    ) -> Option<NotificationTemplate> {
        let templates = self.templates.read().await;

        if let Some(template_id) = &config.template_id {
            match templates.iter().find(|t| &t.id == template_id && t.enabled) {
                Some(template) => return Some(template.clone()),
                None => {
                    warn!(
                        template_id = %template_id,
                        "Configured template not found, falling back to channel/level match"
                    );
                }
            }
        }

        templates
            .iter()
            .find(|t| t.enabled && t.channel == config.channel && t.level == alert.level)
            .cloned()
    }

    /// 查询单条记录
    pub async fn get_notification_record(&self, record_id: &str) -> Option<NotificationRecord> {
        self.records.read().await.get(record_id).cloned()
    }

    /// 按过滤条件列出记录，按创建时间倒序
    pub async fn list_notification_records(&self, filter: &RecordFilter) -> Vec<NotificationRecord> {
        let records = self.records.read().await;
        let mut result: Vec<NotificationRecord> = records
            .values()
            .filter(|r| filter.channel.map(|c| r.channel == c).unwrap_or(true))
            .filter(|r| filter.status.map(|s| r.status == s).unwrap_or(true))
            .filter(|r| {
                filter
                    .alert_id
                    .as_ref()
                    .map(|id| &r.alert_id == id)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if filter.limit > 0 {
            result.truncate(filter.limit);
        }
        result
    }

    /// 最近 days 天的通知统计。无数据时返回零值统计
    pub async fn get_notification_statistics(&self, days: i64) -> NotificationStatistics {
        let cutoff = Utc::now() - Duration::days(days);
        let records = self.records.read().await;

        let mut stats = NotificationStatistics {
            total: 0,
            by_channel: HashMap::new(),
            by_status: HashMap::new(),
            success_rate: 0.0,
        };
        let mut succeeded = 0u64;

        for record in records.values().filter(|r| r.created_at >= cutoff) {
            stats.total += 1;
            *stats
                .by_channel
                .entry(record.channel.to_string())
                .or_insert(0) += 1;
            *stats.by_status.entry(record.status.to_string()).or_insert(0) += 1;

            if matches!(
                record.status,
                NotificationStatus::Sent | NotificationStatus::Delivered | NotificationStatus::Read
            ) {
                succeeded += 1;
            }
        }

        if stats.total > 0 {
            stats.success_rate = succeeded as f64 / stats.total as f64;
        }
        stats
    }

    /// 回执：标记送达（仅 SENT → DELIVERED）
    pub async fn mark_delivered(&self, record_id: &str) -> bool {
        let mut records = self.records.write().await;
        records
            .get_mut(record_id)
            .map(|r| r.mark_delivered())
            .unwrap_or(false)
    }

    /// 回执：标记已读（仅 DELIVERED → READ）
    pub async fn mark_read(&self, record_id: &str) -> bool {
        let mut records = self.records.write().await;
        records
            .get_mut(record_id)
            .map(|r| r.mark_read())
            .unwrap_or(false)
    }
}

/// 投递 worker：迭代式循环消费队列；失败按指数退避重试，
/// 重试耗尽或无处理器时记录终态
struct DispatchWorker {
    handlers: Arc<RwLock<HashMap<NotificationChannel, Arc<dyn ChannelHandler>>>>,
    records: Arc<RwLock<HashMap<String, NotificationRecord>>>,
    queue_tx: mpsc::Sender<String>,
    retry: RetryPolicy,
}

impl DispatchWorker {
    async fn run(self, mut queue_rx: mpsc::Receiver<String>) {
        debug!("Notification dispatch worker started");
        while let Some(record_id) = queue_rx.recv().await {
            self.dispatch(&record_id).await;
        }
        debug!("Notification dispatch worker stopped");
    }

    async fn dispatch(&self, record_id: &str) {
        let record = match self.records.read().await.get(record_id).cloned() {
            Some(record) => record,
            None => {
                warn!(record_id = %record_id, "Record missing from store, dropping");
                return;
            }
        };

        let handler = self.handlers.read().await.get(&record.channel).cloned();
        let handler = match handler {
            Some(handler) => handler,
            None => {
                // 无处理器：直接失败，不重试
                error!(
                    record_id = %record.id,
                    channel = %record.channel,
                    "No handler registered for channel"
                );
                self.finalize(record_id, "no handler registered for channel")
                    .await;
                return;
            }
        };

        match handler.send(&record).await {
            Ok(result) if result.success => {
                if let Some(stored) = self.records.write().await.get_mut(record_id) {
                    stored.mark_sent();
                }
                info!(
                    record_id = %record.id,
                    channel = %record.channel,
                    recipient = %record.recipient,
                    "Notification sent"
                );
            }
            outcome => {
                let error_message = match outcome {
                    Ok(result) => result.message,
                    Err(e) => e.to_string(),
                };
                self.handle_failure(record_id, &error_message).await;
            }
        }
    }

    async fn handle_failure(&self, record_id: &str, error_message: &str) {
        let next_attempt = {
            let mut records = self.records.write().await;
            match records.get_mut(record_id) {
                Some(record) if record.retry_count < record.max_retries => {
                    record.retry_count += 1;
                    Some(record.retry_count)
                }
                Some(record) => {
                    record.mark_failed(error_message);
                    None
                }
                None => None,
            }
        };

        match next_attempt {
            Some(attempt) => {
                let delay = self.retry.base_delay * 2u32.saturating_pow(attempt);
                warn!(
                    record_id = %record_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error_message,
                    "Delivery failed, will retry"
                );
                tokio::time::sleep(delay).await;

                // 队列已满/关闭时放弃重试，不无限堆积
                if let Err(e) = self.queue_tx.try_send(record_id.to_string()) {
                    error!(record_id = %record_id, error = %e, "Failed to requeue notification");
                    self.finalize(record_id, "retry queue unavailable").await;
                }
            }
            None => {
                error!(
                    record_id = %record_id,
                    error = %error_message,
                    "Delivery failed permanently, retries exhausted"
                );
            }
        }
    }

    async fn finalize(&self, record_id: &str, error_message: &str) {
        if let Some(record) = self.records.write().await.get_mut(record_id) {
            record.mark_failed(error_message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DeliveryResult;
    use crate::template::TemplateFormat;
    use async_trait::async_trait;
    use pulse_types::{AlertLevel, Dimension};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 测试处理器：计数并按配置成功/失败
    struct CountingHandler {
        channel: NotificationChannel,
        succeed: bool,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ChannelHandler for CountingHandler {
        async fn send(&self, _record: &NotificationRecord) -> anyhow::Result<DeliveryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(DeliveryResult::success())
            } else {
                Ok(DeliveryResult::failure("simulated failure"))
            }
        }

        fn channel(&self) -> NotificationChannel {
            self.channel
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: StdDuration::from_millis(2),
        }
    }

    fn sample_alert() -> Alert {
        Alert::new("rule-1", Dimension::Quality, AlertLevel::Warning, "t", "m")
            .with_source("rule_engine")
    }

    async fn setup(policy: RetryPolicy, succeed: bool) -> (NotificationSystem, Arc<AtomicU32>) {
        let system = NotificationSystem::new(policy);
        let calls = Arc::new(AtomicU32::new(0));

        system
            .register_handler(Arc::new(CountingHandler {
                channel: NotificationChannel::Webhook,
                succeed,
                calls: calls.clone(),
            }))
            .await;
        system
            .add_template(NotificationTemplate::new(
                "t",
                NotificationChannel::Webhook,
                AlertLevel::Warning,
                "[{level}] {title}",
                "{message}",
                TemplateFormat::Plain,
            ))
            .await;
        system
            .add_notification_config(NotificationConfig::new(
                "ops",
                NotificationChannel::Webhook,
                vec!["ops".to_string()],
            ))
            .await;

        (system, calls)
    }

    async fn wait_for_status(
        system: &NotificationSystem,
        record_id: &str,
        status: NotificationStatus,
    ) -> NotificationRecord {
        for _ in 0..200 {
            if let Some(record) = system.get_notification_record(record_id).await {
                if record.status == status {
                    return record;
                }
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("record {} did not reach {:?}", record_id, status);
    }

    #[tokio::test]
    async fn test_happy_path_marks_sent() {
        let (system, calls) = setup(fast_retry(3), true).await;

        let records = system.send_alert_notifications(&sample_alert()).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, NotificationStatus::Pending);

        let sent = wait_for_status(&system, &records[0].id, NotificationStatus::Sent).await;
        assert!(sent.sent_at.is_some());
        assert_eq!(sent.retry_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_then_failed() {
        let (system, calls) = setup(fast_retry(2), false).await;

        let records = system.send_alert_notifications(&sample_alert()).await;
        let failed = wait_for_status(&system, &records[0].id, NotificationStatus::Failed).await;

        // 重试恰好 max_retries 次：初次 + 2 次重试 = 3 次调用
        assert_eq!(failed.retry_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failed.error.as_deref(), Some("simulated failure"));
    }

    #[tokio::test]
    async fn test_no_handler_fails_immediately() {
        let system = NotificationSystem::with_default_templates(fast_retry(3));
        system
            .add_notification_config(NotificationConfig::new(
                "ops",
                NotificationChannel::Slack,
                vec!["#alerts".to_string()],
            ))
            .await;

        let records = system.send_alert_notifications(&sample_alert()).await;
        assert_eq!(records.len(), 1);

        let failed = wait_for_status(&system, &records[0].id, NotificationStatus::Failed).await;
        // 无处理器不重试
        assert_eq!(failed.retry_count, 0);
        assert!(failed.error.as_deref().unwrap().contains("no handler"));
    }

    #[tokio::test]
    async fn test_missing_template_skips_recipient() {
        let system = NotificationSystem::new(fast_retry(3));
        system
            .add_notification_config(NotificationConfig::new(
                "ops",
                NotificationChannel::Webhook,
                vec!["ops".to_string()],
            ))
            .await;

        // 没有任何模板 → 跳过而不是报错
        let records = system.send_alert_notifications(&sample_alert()).await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_level_filter_excludes_alert() {
        let (system, calls) = setup(fast_retry(3), true).await;
        {
            let mut configs = system.configs.write().await;
            configs[0].levels = Some(vec![AlertLevel::Critical]);
        }

        let records = system.send_alert_notifications(&sample_alert()).await;
        assert!(records.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_skips_third_send() {
        let (system, _calls) = setup(fast_retry(3), true).await;
        system
            .set_rate_limit(NotificationChannel::Webhook, 2, 60)
            .await;

        let alert = sample_alert();
        assert_eq!(system.send_alert_notifications(&alert).await.len(), 1);
        assert_eq!(system.send_alert_notifications(&alert).await.len(), 1);
        // 第 3 次被限流，静默跳过
        assert!(system.send_alert_notifications(&alert).await.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_template_override() {
        let (system, _calls) = setup(fast_retry(3), true).await;
        let custom_id = system
            .add_template(NotificationTemplate::new(
                "custom",
                NotificationChannel::Webhook,
                AlertLevel::Warning,
                "custom: {title}",
                "{message}",
                TemplateFormat::Plain,
            ))
            .await;
        {
            let mut configs = system.configs.write().await;
            configs[0].template_id = Some(custom_id);
        }

        let records = system.send_alert_notifications(&sample_alert()).await;
        assert_eq!(records[0].subject, "custom: t");
    }

    #[tokio::test]
    async fn test_records_query_and_statistics() {
        let (system, _calls) = setup(fast_retry(3), true).await;

        let records = system.send_alert_notifications(&sample_alert()).await;
        wait_for_status(&system, &records[0].id, NotificationStatus::Sent).await;

        let listed = system
            .list_notification_records(&RecordFilter {
                channel: Some(NotificationChannel::Webhook),
                ..Default::default()
            })
            .await;
        assert_eq!(listed.len(), 1);

        let stats = system.get_notification_statistics(1).await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_channel.get("webhook"), Some(&1));
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);

        // 送达/已读回执
        assert!(system.mark_delivered(&records[0].id).await);
        assert!(system.mark_read(&records[0].id).await);
        assert!(!system.mark_read(&records[0].id).await);
    }

    #[tokio::test]
    async fn test_configure_handler_validates_config() {
        let system = NotificationSystem::new(RetryPolicy::default());

        let result = system
            .configure_handler(NotificationChannel::Webhook, &HashMap::new())
            .await;
        assert!(result.is_err());

        let mut config = HashMap::new();
        config.insert("url".to_string(), "https://example.com/hook".to_string());
        assert!(system
            .configure_handler(NotificationChannel::Webhook, &config)
            .await
            .is_ok());
    }
}
