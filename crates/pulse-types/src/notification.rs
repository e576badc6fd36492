use crate::alert::AlertLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// 邮件
    Email,
    /// 通用 Webhook 回调
    Webhook,
    /// 钉钉
    DingTalk,
    /// Slack
    Slack,
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Webhook => "webhook",
            NotificationChannel::DingTalk => "dingtalk",
            NotificationChannel::Slack => "slack",
        };
        write!(f, "{}", name)
    }
}

/// 通知状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// 通知优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    /// 按告警级别映射通知优先级（固定表）
    pub fn from_level(level: AlertLevel) -> Self {
        match level {
            AlertLevel::Info => NotificationPriority::Low,
            AlertLevel::Warning => NotificationPriority::Normal,
            AlertLevel::High => NotificationPriority::High,
            AlertLevel::Critical | AlertLevel::Emergency => NotificationPriority::Urgent,
        }
    }
}

/// 通知记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// 记录 ID
    pub id: String,
    /// 关联告警 ID
    pub alert_id: String,
    /// 渠道
    pub channel: NotificationChannel,
    /// 接收人
    pub recipient: String,
    /// 渲染后的主题
    pub subject: String,
    /// 渲染后的正文
    pub content: String,
    /// 状态
    pub status: NotificationStatus,
    /// 优先级
    pub priority: NotificationPriority,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 发送时间
    pub sent_at: Option<DateTime<Utc>>,
    /// 送达时间
    pub delivered_at: Option<DateTime<Utc>>,
    /// 已读时间
    pub read_at: Option<DateTime<Utc>>,
    /// 错误信息
    pub error: Option<String>,
    /// 已重试次数，不超过 max_retries
    pub retry_count: u32,
    /// 最大重试次数
    pub max_retries: u32,
    /// 额外数据（模板 ID、告警级别/维度、渲染格式等）
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NotificationRecord {
    pub fn new(
        alert_id: impl Into<String>,
        channel: NotificationChannel,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
        priority: NotificationPriority,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert_id.into(),
            channel,
            recipient: recipient.into(),
            subject: subject.into(),
            content: content.into(),
            status: NotificationStatus::Pending,
            priority,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            error: None,
            retry_count: 0,
            max_retries: 3,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 标记为已发送
    pub fn mark_sent(&mut self) {
        self.status = NotificationStatus::Sent;
        self.sent_at = Some(Utc::now());
    }

    /// 标记为失败（终态）
    pub fn mark_failed(&mut self, error: &str) {
        self.status = NotificationStatus::Failed;
        self.error = Some(error.to_string());
    }

    /// 标记为已送达，仅允许 SENT → DELIVERED
    pub fn mark_delivered(&mut self) -> bool {
        if self.status != NotificationStatus::Sent {
            return false;
        }
        self.status = NotificationStatus::Delivered;
        self.delivered_at = Some(Utc::now());
        true
    }

    /// 标记为已读，仅允许 DELIVERED → READ
    pub fn mark_read(&mut self) -> bool {
        if self.status != NotificationStatus::Delivered {
            return false;
        }
        self.status = NotificationStatus::Read;
        self.read_at = Some(Utc::now());
        true
    }
}
