use chrono::{DateTime, Duration, Utc};
use pulse_rule::EscalationPolicy;
use pulse_types::{Alert, AlertLevel};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 再次升级的默认冷却时间
const DEFAULT_COOLDOWN_MINUTES: i64 = 5;

/// 升级动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    NotifySupervisor,
    IncreasePriority,
    NotifyManager,
    CreateIncident,
    NotifyExecutive,
    EmergencyResponse,
}

/// 升级事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationEvent {
    /// 告警 ID
    pub alert_id: String,

    /// 触发规则 ID
    pub rule_id: String,

    /// 升级后的级数
    pub escalation_level: u32,

    /// 升级原因
    pub reason: String,

    /// 升级动作（由升级后的级数决定）
    pub actions: Vec<EscalationAction>,

    /// 升级时间
    pub escalated_at: DateTime<Utc>,
}

/// 升级管理器：检查活跃告警，超过级别对应的时限仍未处理的告警升级一级。
/// 只做状态变更并返回事件，通知投递由调用方决定。
pub struct EscalationManager {
    cooldown: Duration,
}

impl EscalationManager {
    pub fn new() -> Self {
        Self::with_cooldown(Duration::minutes(DEFAULT_COOLDOWN_MINUTES))
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    /// 级别对应的升级时限：critical 5 分钟、high 15 分钟、warning 60 分钟，
    /// info 不升级；emergency 按 critical 处理
    fn threshold_for(level: AlertLevel) -> Option<Duration> {
        match level {
            AlertLevel::Emergency | AlertLevel::Critical => Some(Duration::minutes(5)),
            AlertLevel::High => Some(Duration::minutes(15)),
            AlertLevel::Warning => Some(Duration::minutes(60)),
            AlertLevel::Info => None,
        }
    }

    /// 升级级数对应的动作表
    pub fn actions_for(escalation_level: u32) -> Vec<EscalationAction> {
        match escalation_level {
            0 | 1 => vec![
                EscalationAction::NotifySupervisor,
                EscalationAction::IncreasePriority,
            ],
            2 => vec![
                EscalationAction::NotifyManager,
                EscalationAction::CreateIncident,
            ],
            _ => vec![
                EscalationAction::NotifyExecutive,
                EscalationAction::EmergencyResponse,
            ],
        }
    }

    /// 检查一批告警，返回产生的升级事件（告警就地变更）
    pub fn check_escalations(&self, alerts: &mut [Alert]) -> Vec<EscalationEvent> {
        let mut events = Vec::new();
        for alert in alerts.iter_mut() {
            if let Some(event) = self.check_alert(alert) {
                events.push(event);
            }
        }
        events
    }

    /// 检查单条告警
    pub fn check_alert(&self, alert: &mut Alert) -> Option<EscalationEvent> {
        self.check_alert_with(alert, None)
    }

    /// 检查单条告警，可带规则级升级策略覆盖（冷却时间、最大级数）
    pub fn check_alert_with(
        &self,
        alert: &mut Alert,
        policy: Option<&EscalationPolicy>,
    ) -> Option<EscalationEvent> {
        if !alert.is_open() {
            return None;
        }

        if let Some(max_level) = policy.and_then(|p| p.max_level) {
            if alert.escalation_level >= max_level {
                return None;
            }
        }

        let now = Utc::now();

        // 冷却期内不重复升级
        let cooldown = policy
            .and_then(|p| p.cooldown_minutes)
            .map(Duration::minutes)
            .unwrap_or(self.cooldown);
        if alert.escalation_level > 0 {
            if let Some(escalated_at) = alert.escalated_at {
                if now - escalated_at < cooldown {
                    debug!(alert_id = %alert.id, "Escalation skipped, cooldown active");
                    return None;
                }
            }
        }

        let threshold = Self::threshold_for(alert.level)?;
        let age = now - alert.created_at;
        if age < threshold {
            return None;
        }

        alert.escalate();
        let reason = format!(
            "alert unresolved for {} minutes (threshold {} minutes for level {})",
            age.num_minutes(),
            threshold.num_minutes(),
            alert.level
        );
        warn!(
            alert_id = %alert.id,
            escalation_level = alert.escalation_level,
            "Alert escalated"
        );

        Some(EscalationEvent {
            alert_id: alert.id.clone(),
            rule_id: alert.rule_id.clone(),
            escalation_level: alert.escalation_level,
            reason,
            actions: Self::actions_for(alert.escalation_level),
            escalated_at: now,
        })
    }
}

impl Default for EscalationManager {
    fn default() -> Self {
        Self::new()
    }
}
