use crate::aggregate::Aggregator;
use crate::dedup::Deduplicator;
use crate::escalation::{EscalationEvent, EscalationManager};
use chrono::{Duration, Utc};
use pulse_rule::RuleEngine;
use pulse_types::{Alert, AlertLevel, Dimension};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 告警统计
#[derive(Debug, Clone, Serialize)]
pub struct AlertStatistics {
    /// 统计窗口内的告警总数
    pub total: u64,
    /// 当前活跃告警数
    pub active_count: u64,
    /// 按维度计数
    pub by_dimension: HashMap<String, u64>,
    /// 按级别计数
    pub by_level: HashMap<String, u64>,
    /// 按状态计数
    pub by_status: HashMap<String, u64>,
}

/// 告警编排器：把规则引擎、去重器、聚合器、升级管理器串成流水线，
/// 持有活跃告警表与历史日志，对外提供确认/解决/查询操作。
/// 各组件显式注入，无进程级单例。
pub struct AlertManager {
    engine: Arc<RuleEngine>,
    deduplicator: Deduplicator,
    aggregator: Aggregator,
    escalation: EscalationManager,

    /// 活跃告警表（解决后移除）
    active: Arc<RwLock<HashMap<String, Alert>>>,

    /// 历史日志（只追加；确认/解决/升级时就地同步对应条目）
    history: Arc<RwLock<Vec<Alert>>>,
}

impl AlertManager {
    pub fn new(
        engine: Arc<RuleEngine>,
        deduplicator: Deduplicator,
        aggregator: Aggregator,
        escalation: EscalationManager,
    ) -> Self {
        Self {
            engine,
            deduplicator,
            aggregator,
            escalation,
            active: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// 用预置规则与默认组件构建
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(RuleEngine::with_default_rules()),
            Deduplicator::default(),
            Aggregator::new(),
            EscalationManager::new(),
        )
    }

    /// 规则引擎（规则 CRUD 经由此访问）
    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// 流水线入口：评估 → 去重 → 聚合，产出的告警写入活跃表与历史
    pub async fn process_metrics(&self, metrics: &HashMap<String, f64>) -> Vec<Alert> {
        let raw = self.engine.evaluate(metrics).await;
        let deduped = self.deduplicator.deduplicate(raw).await;
        let alerts = self.aggregator.aggregate(deduped).await;

        if alerts.is_empty() {
            return alerts;
        }

        let mut active = self.active.write().await;
        let mut history = self.history.write().await;
        for alert in &alerts {
            active.insert(alert.id.clone(), alert.clone());
            history.push(alert.clone());
        }
        info!(count = alerts.len(), "Alerts produced by pipeline");

        alerts
    }

    /// 对活跃告警运行升级检查（由外部调度器按需调用）
    pub async fn check_escalations(&self) -> Vec<EscalationEvent> {
        let mut active = self.active.write().await;
        let mut history = self.history.write().await;
        let mut events = Vec::new();

        for alert in active.values_mut() {
            // 规则级升级策略覆盖（聚合产生的告警没有对应规则）
            let policy = match self.engine.get_rule(&alert.rule_id).await {
                Ok(rule) => rule.escalation_policy,
                Err(_) => None,
            };

            if let Some(event) = self.escalation.check_alert_with(alert, policy.as_ref()) {
                sync_history(&mut history, alert);
                events.push(event);
            }
        }

        events
    }

    /// 确认告警。告警不在活跃表时返回 false
    pub async fn acknowledge(&self, alert_id: &str, actor: &str) -> bool {
        let mut active = self.active.write().await;
        match active.get_mut(alert_id) {
            Some(alert) => {
                alert.acknowledge(actor);
                info!(alert_id = %alert_id, actor = %actor, "Alert acknowledged");
                sync_history(&mut *self.history.write().await, alert);
                true
            }
            None => {
                debug!(alert_id = %alert_id, "Acknowledge skipped, alert not active");
                false
            }
        }
    }

    /// 解决告警并从活跃表移除（历史中保留）。告警不存在时返回 false
    pub async fn resolve(&self, alert_id: &str, actor: &str, notes: Option<&str>) -> bool {
        let mut active = self.active.write().await;
        match active.remove(alert_id) {
            Some(mut alert) => {
                alert.resolve(actor, notes);
                info!(alert_id = %alert_id, actor = %actor, "Alert resolved");
                sync_history(&mut *self.history.write().await, &alert);
                true
            }
            None => {
                debug!(alert_id = %alert_id, "Resolve skipped, alert not active");
                false
            }
        }
    }

    /// 查询单条活跃告警
    pub async fn get_active(&self, alert_id: &str) -> Option<Alert> {
        self.active.read().await.get(alert_id).cloned()
    }

    /// 列出活跃告警，可按维度/级别过滤，按创建时间倒序，限制数量
    pub async fn list_active(
        &self,
        dimension: Option<Dimension>,
        level: Option<AlertLevel>,
        limit: usize,
    ) -> Vec<Alert> {
        let active = self.active.read().await;
        let mut alerts: Vec<Alert> = active
            .values()
            .filter(|a| dimension.map(|d| a.dimension == d).unwrap_or(true))
            .filter(|a| level.map(|l| a.level == l).unwrap_or(true))
            .cloned()
            .collect();

        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(limit);
        alerts
    }

    /// 最近 days 天的告警统计。无数据时返回零值统计，不失败
    pub async fn statistics(&self, days: i64) -> AlertStatistics {
        let cutoff = Utc::now() - Duration::days(days);
        let history = self.history.read().await;
        let active_count = self.active.read().await.len() as u64;

        let mut stats = AlertStatistics {
            total: 0,
            active_count,
            by_dimension: HashMap::new(),
            by_level: HashMap::new(),
            by_status: HashMap::new(),
        };

        for alert in history.iter().filter(|a| a.created_at >= cutoff) {
            stats.total += 1;
            *stats
                .by_dimension
                .entry(alert.dimension.to_string())
                .or_insert(0) += 1;
            *stats.by_level.entry(alert.level.to_string()).or_insert(0) += 1;
            *stats.by_status.entry(alert.status.to_string()).or_insert(0) += 1;
        }

        stats
    }
}

/// 历史日志中按 ID 回写最新状态（从尾部找，新条目在后）
fn sync_history(history: &mut Vec<Alert>, alert: &Alert) {
    if let Some(entry) = history.iter_mut().rev().find(|a| a.id == alert.id) {
        *entry = alert.clone();
    }
}
