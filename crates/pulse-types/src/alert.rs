use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 告警维度（业务轴）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Quality,
    Efficiency,
    Cost,
    Performance,
    Security,
    Compliance,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Quality => "quality",
            Dimension::Efficiency => "efficiency",
            Dimension::Cost => "cost",
            Dimension::Performance => "performance",
            Dimension::Security => "security",
            Dimension::Compliance => "compliance",
        };
        write!(f, "{}", name)
    }
}

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    High,
    Critical,
    Emergency,
}

impl AlertLevel {
    /// 所有级别，按严重程度升序
    pub const ALL: [AlertLevel; 5] = [
        AlertLevel::Info,
        AlertLevel::Warning,
        AlertLevel::High,
        AlertLevel::Critical,
        AlertLevel::Emergency,
    ];

    /// 固定的严重程度序（info < warning < high < critical < emergency），
    /// 与枚举声明顺序无关
    pub fn severity_rank(&self) -> u8 {
        match self {
            AlertLevel::Info => 0,
            AlertLevel::Warning => 1,
            AlertLevel::High => 2,
            AlertLevel::Critical => 3,
            AlertLevel::Emergency => 4,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::High => "high",
            AlertLevel::Critical => "critical",
            AlertLevel::Emergency => "emergency",
        };
        write!(f, "{}", name)
    }
}

/// 告警状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Silenced,
    Escalated,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Silenced => "silenced",
            AlertStatus::Escalated => "escalated",
        };
        write!(f, "{}", name)
    }
}

/// 告警实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// 告警 ID
    pub id: String,
    /// 触发规则 ID
    pub rule_id: String,
    /// 业务维度
    pub dimension: Dimension,
    /// 级别
    pub level: AlertLevel,
    /// 优先级（1-100，数字越大优先级越高）
    pub priority: i32,
    /// 标题
    pub title: String,
    /// 消息
    pub message: String,
    /// 来源
    pub source: String,
    /// 状态
    pub status: AlertStatus,
    /// 租户 ID
    pub tenant_id: Option<String>,
    /// 用户 ID
    pub user_id: Option<String>,
    /// 项目 ID
    pub project_id: Option<String>,
    /// 任务 ID
    pub task_id: Option<String>,
    /// 指标名称
    pub metric_name: Option<String>,
    /// 指标值
    pub metric_value: Option<f64>,
    /// 阈值
    pub threshold_value: Option<f64>,
    /// 上下文
    pub context: HashMap<String, serde_json::Value>,
    /// 标签
    pub tags: HashMap<String, String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最后出现时间（去重器维护）
    pub last_seen_at: DateTime<Utc>,
    /// 重复次数（去重器维护）
    pub duplicate_count: u32,
    /// 确认人
    pub acknowledged_by: Option<String>,
    /// 确认时间
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// 解决人
    pub resolved_by: Option<String>,
    /// 解决时间
    pub resolved_at: Option<DateTime<Utc>>,
    /// 解决备注
    pub resolution_notes: Option<String>,
    /// 最近一次升级时间
    pub escalated_at: Option<DateTime<Utc>>,
    /// 升级级数（只增不减）
    pub escalation_level: u32,
    /// 静默截止时间
    pub suppressed_until: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        rule_id: impl Into<String>,
        dimension: Dimension,
        level: AlertLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule_id.into(),
            dimension,
            level,
            priority: 50,
            title: title.into(),
            message: message.into(),
            source: String::new(),
            status: AlertStatus::Active,
            tenant_id: None,
            user_id: None,
            project_id: None,
            task_id: None,
            metric_name: None,
            metric_value: None,
            threshold_value: None,
            context: HashMap::new(),
            tags: HashMap::new(),
            created_at: now,
            last_seen_at: now,
            duplicate_count: 1,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
            escalated_at: None,
            escalation_level: 0,
            suppressed_until: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64, threshold: f64) -> Self {
        self.metric_name = Some(name.into());
        self.metric_value = Some(value);
        self.threshold_value = Some(threshold);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// 确认告警
    pub fn acknowledge(&mut self, actor: &str) {
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_by = Some(actor.to_string());
        self.acknowledged_at = Some(Utc::now());
    }

    /// 解决告警
    pub fn resolve(&mut self, actor: &str, notes: Option<&str>) {
        self.status = AlertStatus::Resolved;
        self.resolved_by = Some(actor.to_string());
        self.resolved_at = Some(Utc::now());
        self.resolution_notes = notes.map(|n| n.to_string());
    }

    /// 升级告警（升级级数 +1）
    pub fn escalate(&mut self) {
        self.escalation_level += 1;
        self.escalated_at = Some(Utc::now());
        self.status = AlertStatus::Escalated;
    }

    /// 告警是否仍需处理（未确认、未解决）
    pub fn is_open(&self) -> bool {
        matches!(self.status, AlertStatus::Active | AlertStatus::Escalated)
    }

    /// 去重签名：相同签名的告警在去重窗口内被折叠为一条。
    /// 仅由字段决定，缺失字段记为空串。
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.rule_id,
            self.dimension,
            self.level,
            self.source,
            self.tenant_id.as_deref().unwrap_or(""),
            self.project_id.as_deref().unwrap_or(""),
            self.metric_name.as_deref().unwrap_or(""),
        )
    }
}
