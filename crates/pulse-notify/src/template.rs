use pulse_types::{Alert, AlertLevel, NotificationChannel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// 渲染格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFormat {
    Plain,
    Markdown,
}

/// 通知模板：主题/正文中的 {placeholder} 用告警字段替换。
/// 无法解析的占位符保持原样并记一条警告，渲染永不失败。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplate {
    /// 模板 ID
    pub id: String,
    /// 模板名称
    pub name: String,
    /// 目标渠道
    pub channel: NotificationChannel,
    /// 目标级别
    pub level: AlertLevel,
    /// 主题模板
    pub subject_template: String,
    /// 正文模板
    pub content_template: String,
    /// 渲染格式
    pub format: TemplateFormat,
    /// 是否启用
    pub enabled: bool,
}

impl NotificationTemplate {
    pub fn new(
        name: impl Into<String>,
        channel: NotificationChannel,
        level: AlertLevel,
        subject_template: impl Into<String>,
        content_template: impl Into<String>,
        format: TemplateFormat,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            channel,
            level,
            subject_template: subject_template.into(),
            content_template: content_template.into(),
            format,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 渲染 (主题, 正文)
    pub fn render(&self, alert: &Alert) -> (String, String) {
        let values = placeholder_values(alert);
        (
            substitute(&self.subject_template, &values),
            substitute(&self.content_template, &values),
        )
    }

    /// 每个 (渠道, 级别) 一条的默认模板集
    pub fn default_set() -> Vec<NotificationTemplate> {
        let channels = [
            NotificationChannel::Email,
            NotificationChannel::Webhook,
            NotificationChannel::DingTalk,
            NotificationChannel::Slack,
        ];

        let mut templates = Vec::new();
        for channel in channels {
            for level in AlertLevel::ALL {
                templates.push(Self::default_for(channel, level));
            }
        }
        templates
    }

    fn default_for(channel: NotificationChannel, level: AlertLevel) -> Self {
        let format = match channel {
            NotificationChannel::DingTalk | NotificationChannel::Slack => TemplateFormat::Markdown,
            _ => TemplateFormat::Plain,
        };
        let content = match format {
            TemplateFormat::Plain => {
                "{message}\n\nDimension: {dimension}\nSource: {source}\nTime: {created_at}"
            }
            TemplateFormat::Markdown => {
                "## {title}\n\n{message}\n\n**Level**: {level}\n\n**Dimension**: {dimension}\n\n**Time**: {created_at}"
            }
        };
        Self::new(
            format!("default_{}_{}", channel, level),
            channel,
            level,
            "[{level}] {title}",
            content,
            format,
        )
    }
}

/// 从告警构建占位符取值表；缺失的可选字段不进表，
/// 引用它们的占位符按未解析处理
fn placeholder_values(alert: &Alert) -> HashMap<&'static str, String> {
    let mut values = HashMap::new();
    values.insert("alert_id", alert.id.clone());
    values.insert("rule_id", alert.rule_id.clone());
    values.insert("title", alert.title.clone());
    values.insert("message", alert.message.clone());
    values.insert("level", alert.level.to_string());
    values.insert("dimension", alert.dimension.to_string());
    values.insert("source", alert.source.clone());
    values.insert("status", alert.status.to_string());
    values.insert("created_at", alert.created_at.to_rfc3339());
    values.insert("duplicate_count", alert.duplicate_count.to_string());
    values.insert("escalation_level", alert.escalation_level.to_string());

    if let Some(metric_name) = &alert.metric_name {
        values.insert("metric_name", metric_name.clone());
    }
    if let Some(metric_value) = alert.metric_value {
        values.insert("metric_value", format!("{:.4}", metric_value));
    }
    if let Some(threshold_value) = alert.threshold_value {
        values.insert("threshold_value", format!("{:.4}", threshold_value));
    }
    if let Some(tenant_id) = &alert.tenant_id {
        values.insert("tenant_id", tenant_id.clone());
    }
    if let Some(project_id) = &alert.project_id {
        values.insert("project_id", project_id.clone());
    }
    values
}

/// 占位符替换。未知占位符保持 {name} 原样并记警告
fn substitute(pattern: &str, values: &HashMap<&'static str, String>) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        match rest.find('}') {
            Some(end) => {
                let key = &rest[1..end];
                match values.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        warn!(placeholder = %key, "Unresolved template placeholder");
                        out.push_str(&rest[..=end]);
                    }
                }
                rest = &rest[end + 1..];
            }
            None => {
                // 未闭合的花括号，原样输出
                out.push_str(rest);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}
