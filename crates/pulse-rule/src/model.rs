use chrono::{DateTime, Utc};
use pulse_types::{AlertLevel, Dimension};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
}

impl CompareOp {
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
            CompareOp::Gte => lhs >= rhs,
            CompareOp::Lte => lhs <= rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Eq => "==",
            CompareOp::Gte => ">=",
            CompareOp::Lte => "<=",
        };
        write!(f, "{}", symbol)
    }
}

/// 组合规则的子条件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// 指标名称
    pub metric: String,

    /// 比较运算符
    pub op: CompareOp,

    /// 比较值
    pub value: f64,
}

/// 组合逻辑
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeLogic {
    /// 全部条件满足
    And,

    /// 任一条件满足
    Or,
}

/// 规则类型及类型专属配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// 阈值规则
    Threshold {
        /// 指标名称
        metric: String,
        /// 比较运算符
        op: CompareOp,
        /// 阈值
        value: f64,
    },

    /// 趋势规则：窗口内最小二乘拟合，检测下降趋势
    Trend {
        /// 指标名称
        metric: String,
        /// 窗口大小（样本数）
        window_size: usize,
        /// 下降阈值（窗口内拟合下降量超过该值时触发）
        decline_threshold: f64,
    },

    /// 异常检测规则：基线 z-score
    Anomaly {
        /// 指标名称
        metric: String,
        /// 基线窗口大小（样本数）
        window_size: usize,
        /// 基线最少样本数
        min_samples: usize,
        /// 灵敏度（z-score 阈值）
        sensitivity: f64,
    },

    /// 组合规则
    Composite {
        /// 子条件列表（有序）
        conditions: Vec<Condition>,
        /// 组合逻辑
        logic: CompositeLogic,
    },
}

/// 升级策略（可选的规则级覆盖）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// 升级冷却时间（分钟），None 使用全局默认
    pub cooldown_minutes: Option<i64>,

    /// 最大升级级数，None 不限
    pub max_level: Option<u32>,
}

/// 告警规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// 规则 ID
    pub id: String,

    /// 规则名称
    pub name: String,

    /// 业务维度
    pub dimension: Dimension,

    /// 规则类型及配置
    pub kind: RuleKind,

    /// 触发告警的级别
    pub level: AlertLevel,

    /// 优先级（1-100，数字越大优先级越高）
    pub priority: i32,

    /// 是否启用
    pub enabled: bool,

    /// 升级策略
    pub escalation_policy: Option<EscalationPolicy>,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    fn build(name: impl Into<String>, dimension: Dimension, kind: RuleKind, level: AlertLevel) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            dimension,
            kind,
            level,
            priority: 50,
            enabled: true,
            escalation_policy: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 阈值规则
    pub fn threshold(
        name: impl Into<String>,
        dimension: Dimension,
        metric: impl Into<String>,
        op: CompareOp,
        value: f64,
        level: AlertLevel,
    ) -> Self {
        Self::build(
            name,
            dimension,
            RuleKind::Threshold {
                metric: metric.into(),
                op,
                value,
            },
            level,
        )
    }

    /// 趋势规则
    pub fn trend(
        name: impl Into<String>,
        dimension: Dimension,
        metric: impl Into<String>,
        window_size: usize,
        decline_threshold: f64,
        level: AlertLevel,
    ) -> Self {
        Self::build(
            name,
            dimension,
            RuleKind::Trend {
                metric: metric.into(),
                window_size,
                decline_threshold,
            },
            level,
        )
    }

    /// 异常检测规则
    pub fn anomaly(
        name: impl Into<String>,
        dimension: Dimension,
        metric: impl Into<String>,
        window_size: usize,
        min_samples: usize,
        sensitivity: f64,
        level: AlertLevel,
    ) -> Self {
        Self::build(
            name,
            dimension,
            RuleKind::Anomaly {
                metric: metric.into(),
                window_size,
                min_samples,
                sensitivity,
            },
            level,
        )
    }

    /// 组合规则
    pub fn composite(
        name: impl Into<String>,
        dimension: Dimension,
        conditions: Vec<Condition>,
        logic: CompositeLogic,
        level: AlertLevel,
    ) -> Self {
        Self::build(name, dimension, RuleKind::Composite { conditions, logic }, level)
    }

    /// 预置质量规则：quality_score < 0.8 时告警
    pub fn default_quality() -> Self {
        Self::threshold(
            "quality_score_low",
            Dimension::Quality,
            "quality_score",
            CompareOp::Lt,
            0.8,
            AlertLevel::Warning,
        )
        .with_priority(60)
    }

    /// 预置效率规则：efficiency_score < 0.7 时告警
    pub fn default_efficiency() -> Self {
        Self::threshold(
            "efficiency_score_low",
            Dimension::Efficiency,
            "efficiency_score",
            CompareOp::Lt,
            0.7,
            AlertLevel::Warning,
        )
        .with_priority(55)
    }

    /// 预置成本规则：cost_ratio > 1.2 时告警
    pub fn default_cost() -> Self {
        Self::threshold(
            "cost_ratio_high",
            Dimension::Cost,
            "cost_ratio",
            CompareOp::Gt,
            1.2,
            AlertLevel::High,
        )
        .with_priority(70)
    }

    /// 预置异常检测规则
    pub fn default_anomaly(metric: impl Into<String>) -> Self {
        let metric = metric.into();
        Self::anomaly(
            format!("{}_anomaly", metric),
            Dimension::Performance,
            metric,
            20,
            5,
            3.0,
            AlertLevel::High,
        )
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_escalation_policy(mut self, policy: EscalationPolicy) -> Self {
        self.escalation_policy = Some(policy);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 规则更新（按字段合并，未指定的字段保持不变）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub level: Option<AlertLevel>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub kind: Option<RuleKind>,
    pub escalation_policy: Option<EscalationPolicy>,
}

impl RuleUpdate {
    pub fn apply(self, rule: &mut Rule) {
        if let Some(name) = self.name {
            rule.name = name;
        }
        if let Some(level) = self.level {
            rule.level = level;
        }
        if let Some(priority) = self.priority {
            rule.priority = priority;
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
        if let Some(kind) = self.kind {
            rule.kind = kind;
        }
        if let Some(policy) = self.escalation_policy {
            rule.escalation_policy = Some(policy);
        }
        rule.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_ops() {
        assert!(CompareOp::Gt.compare(1.0, 0.5));
        assert!(!CompareOp::Gt.compare(0.5, 0.5));
        assert!(CompareOp::Lt.compare(0.4, 0.5));
        assert!(CompareOp::Eq.compare(0.5, 0.5));
        assert!(!CompareOp::Eq.compare(0.5, 0.5001));
        assert!(CompareOp::Gte.compare(0.5, 0.5));
        assert!(CompareOp::Lte.compare(0.5, 0.5));
    }

    #[test]
    fn test_rule_defaults() {
        let rule = Rule::default_quality();
        assert_eq!(rule.dimension, Dimension::Quality);
        assert_eq!(rule.level, AlertLevel::Warning);
        assert!(rule.enabled);

        match &rule.kind {
            RuleKind::Threshold { metric, op, value } => {
                assert_eq!(metric, "quality_score");
                assert_eq!(*op, CompareOp::Lt);
                assert_eq!(*value, 0.8);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_rule_update_merge() {
        let mut rule = Rule::default_quality();
        let before = rule.updated_at;

        RuleUpdate {
            name: Some("renamed".to_string()),
            enabled: Some(false),
            ..Default::default()
        }
        .apply(&mut rule);

        assert_eq!(rule.name, "renamed");
        assert!(!rule.enabled);
        // 未指定的字段保持不变
        assert_eq!(rule.level, AlertLevel::Warning);
        assert!(rule.updated_at >= before);
    }

    #[test]
    fn test_rule_kind_serialization() {
        let rule = Rule::trend("t", Dimension::Quality, "quality_score", 5, 0.1, AlertLevel::Warning);

        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"type\":\"trend\""));

        let deserialized: Rule = serde_json::from_str(&json).unwrap();
        match deserialized.kind {
            RuleKind::Trend { window_size, .. } => assert_eq!(window_size, 5),
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
