use chrono::{DateTime, Duration, Utc};
use pulse_types::Alert;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 聚合分组字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupField {
    Dimension,
    Level,
    Source,
    TenantId,
    ProjectId,
    RuleId,
    /// 按标签键分组
    Tag { key: String },
}

impl GroupField {
    /// 字段取值，缺失字段记为空串
    fn value_of(&self, alert: &Alert) -> String {
        match self {
            GroupField::Dimension => alert.dimension.to_string(),
            GroupField::Level => alert.level.to_string(),
            GroupField::Source => alert.source.clone(),
            GroupField::TenantId => alert.tenant_id.clone().unwrap_or_default(),
            GroupField::ProjectId => alert.project_id.clone().unwrap_or_default(),
            GroupField::RuleId => alert.rule_id.clone(),
            GroupField::Tag { key } => alert.tags.get(key).cloned().unwrap_or_default(),
        }
    }
}

/// 合并策略，仅影响生成的消息文本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// 只报数量
    Count,
    /// 概要（涉及的维度/级别/来源）
    Summary,
    /// 明细（列出成员标题）
    Detail,
}

/// 聚合规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationRule {
    /// 规则名称
    pub name: String,

    /// 分组字段集合
    pub group_by: Vec<GroupField>,

    /// 聚合窗口（分钟）
    pub window_minutes: i64,

    /// 上下文中保留的成员 ID 上限
    pub max_alerts: usize,

    /// 合并策略
    pub strategy: MergeStrategy,
}

impl AggregationRule {
    pub fn new(
        name: impl Into<String>,
        group_by: Vec<GroupField>,
        window_minutes: i64,
        max_alerts: usize,
        strategy: MergeStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            group_by,
            window_minutes,
            max_alerts,
            strategy,
        }
    }

    fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes)
    }

    fn group_key(&self, alert: &Alert) -> String {
        self.group_by
            .iter()
            .map(|f| f.value_of(alert))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// 告警聚合器：按注册顺序应用聚合规则，窗口内同组 ≥2 条的告警
/// 合成为一条汇总告警；每条告警至多被聚合一次。
pub struct Aggregator {
    rules: Arc<RwLock<Vec<AggregationRule>>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 注册聚合规则（追加到末尾，应用顺序即注册顺序）
    pub async fn add_rule(&self, rule: AggregationRule) {
        let mut rules = self.rules.write().await;
        info!(rule_name = %rule.name, "Aggregation rule added");
        rules.push(rule);
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    /// 聚合一批告警
    pub async fn aggregate(&self, alerts: Vec<Alert>) -> Vec<Alert> {
        let rules = self.rules.read().await.clone();
        let now = Utc::now();

        let mut consumed: HashSet<String> = HashSet::new();
        let mut synthesized: Vec<Alert> = Vec::new();

        for rule in &rules {
            // 分组：跳过已被前序规则吸收的与窗口外的告警
            let mut order: Vec<String> = Vec::new();
            let mut groups: HashMap<String, Vec<&Alert>> = HashMap::new();
            for alert in &alerts {
                if consumed.contains(&alert.id) {
                    continue;
                }
                if now - alert.created_at > rule.window() {
                    continue;
                }
                let key = rule.group_key(alert);
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                }
                groups.entry(key).or_default().push(alert);
            }

            for key in order {
                let members = &groups[&key];
                if members.len() < 2 {
                    continue;
                }

                debug!(
                    rule_name = %rule.name,
                    group_key = %key,
                    member_count = members.len(),
                    "Aggregating alert group"
                );
                synthesized.push(merge_group(rule, members, now));
                for member in members {
                    consumed.insert(member.id.clone());
                }
            }
        }

        let mut output = synthesized;
        for alert in alerts {
            if !consumed.contains(&alert.id) {
                output.push(alert);
            }
        }
        output
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// 合成一条汇总告警
fn merge_group(rule: &AggregationRule, members: &[&Alert], now: DateTime<Utc>) -> Alert {
    // 主告警：优先级最高的成员，并列时取先出现者
    let mut primary = members[0];
    for &member in members {
        if member.priority > primary.priority {
            primary = member;
        }
    }

    // 级别取成员中严重程度最高者（固定严重程度序）
    let mut level = members[0].level;
    for member in members {
        if member.level.severity_rank() > level.severity_rank() {
            level = member.level;
        }
    }
    let priority = members.iter().map(|m| m.priority).max().unwrap_or(50);

    let dimensions = distinct(members.iter().map(|m| m.dimension.to_string()));
    let levels = distinct(members.iter().map(|m| m.level.to_string()));
    let sources = distinct(members.iter().map(|m| m.source.clone()));
    let alert_ids: Vec<String> = members
        .iter()
        .take(rule.max_alerts)
        .map(|m| m.id.clone())
        .collect();

    let title = format!("Aggregated: {} related alerts", members.len());
    let message = match rule.strategy {
        MergeStrategy::Count => format!(
            "{} alerts aggregated within {} minutes",
            members.len(),
            rule.window_minutes
        ),
        MergeStrategy::Summary => format!(
            "{} alerts across dimensions [{}], levels [{}], sources [{}]",
            members.len(),
            dimensions.join(", "),
            levels.join(", "),
            sources.join(", ")
        ),
        MergeStrategy::Detail => {
            let titles: Vec<&str> = members
                .iter()
                .take(rule.max_alerts)
                .map(|m| m.title.as_str())
                .collect();
            format!("{} alerts: {}", members.len(), titles.join("; "))
        }
    };

    let mut alert = Alert::new(
        format!("aggregation:{}", rule.name),
        primary.dimension,
        level,
        title,
        message,
    )
    .with_priority(priority)
    .with_source("aggregator")
    .with_context("aggregated", json!(true))
    .with_context("alert_count", json!(members.len()))
    .with_context("dimensions", json!(dimensions))
    .with_context("levels", json!(levels))
    .with_context("sources", json!(sources))
    .with_context("alert_ids", json!(alert_ids));
    alert.created_at = now;
    alert.last_seen_at = now;
    alert
}

fn distinct(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values {
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    out
}
