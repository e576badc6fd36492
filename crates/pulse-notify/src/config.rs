use pulse_types::{Alert, AlertLevel, Dimension, NotificationChannel};
use serde::{Deserialize, Serialize};

/// 通知配置：决定哪些告警发到哪个渠道的哪些接收人
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// 配置名称
    pub name: String,

    /// 渠道
    pub channel: NotificationChannel,

    /// 接收人列表
    pub recipients: Vec<String>,

    /// 级别过滤，None 表示不过滤
    pub levels: Option<Vec<AlertLevel>>,

    /// 维度过滤，None 表示不过滤
    pub dimensions: Option<Vec<Dimension>>,

    /// 指定模板 ID（覆盖按渠道/级别的默认选择）
    pub template_id: Option<String>,

    /// 是否启用
    pub enabled: bool,
}

impl NotificationConfig {
    pub fn new(
        name: impl Into<String>,
        channel: NotificationChannel,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            recipients,
            levels: None,
            dimensions: None,
            template_id: None,
            enabled: true,
        }
    }

    pub fn with_levels(mut self, levels: Vec<AlertLevel>) -> Self {
        self.levels = Some(levels);
        self
    }

    pub fn with_dimensions(mut self, dimensions: Vec<Dimension>) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// 告警是否匹配此配置
    pub fn matches(&self, alert: &Alert) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(levels) = &self.levels {
            if !levels.contains(&alert.level) {
                return false;
            }
        }
        if let Some(dimensions) = &self.dimensions {
            if !dimensions.contains(&alert.dimension) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert(level: AlertLevel, dimension: Dimension) -> Alert {
        Alert::new("rule-1", dimension, level, "t", "m")
    }

    #[test]
    fn test_no_filters_matches_everything() {
        let config = NotificationConfig::new(
            "all",
            NotificationChannel::Email,
            vec!["ops@example.com".to_string()],
        );

        assert!(config.matches(&sample_alert(AlertLevel::Info, Dimension::Cost)));
        assert!(config.matches(&sample_alert(AlertLevel::Emergency, Dimension::Security)));
    }

    #[test]
    fn test_level_filter() {
        let config = NotificationConfig::new(
            "critical_only",
            NotificationChannel::Slack,
            vec!["#alerts".to_string()],
        )
        .with_levels(vec![AlertLevel::Critical, AlertLevel::Emergency]);

        assert!(config.matches(&sample_alert(AlertLevel::Critical, Dimension::Quality)));
        assert!(!config.matches(&sample_alert(AlertLevel::Warning, Dimension::Quality)));
    }

    #[test]
    fn test_dimension_filter() {
        let config = NotificationConfig::new(
            "security",
            NotificationChannel::Email,
            vec!["security@example.com".to_string()],
        )
        .with_dimensions(vec![Dimension::Security, Dimension::Compliance]);

        assert!(config.matches(&sample_alert(AlertLevel::Warning, Dimension::Security)));
        assert!(!config.matches(&sample_alert(AlertLevel::Warning, Dimension::Cost)));
    }

    #[test]
    fn test_disabled_config_never_matches() {
        let config = NotificationConfig::new(
            "off",
            NotificationChannel::Email,
            vec!["ops@example.com".to_string()],
        )
        .disabled();

        assert!(!config.matches(&sample_alert(AlertLevel::Critical, Dimension::Quality)));
    }
}
