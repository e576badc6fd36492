use crate::history::MetricHistory;
use crate::model::{CompositeLogic, Rule, RuleKind, RuleUpdate};
use pulse_types::{Alert, Dimension, PulseError, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 历史缓冲默认容量，需不小于任何规则的窗口大小
const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// 规则引擎：持有规则集合，对输入指标逐条评估，产出原始告警。
/// 规则按注册顺序评估，单条规则失败不影响其余规则。
pub struct RuleEngine {
    /// 规则列表（注册顺序）
    rules: Arc<RwLock<Vec<Rule>>>,

    /// 指标历史缓冲
    history: Arc<MetricHistory>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(RwLock::new(Vec::new())),
            history: Arc::new(MetricHistory::new(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    /// 创建引擎并注册预置规则（质量/效率/成本）
    pub fn with_default_rules() -> Self {
        let rules = vec![
            Rule::default_quality(),
            Rule::default_efficiency(),
            Rule::default_cost(),
        ];
        Self {
            rules: Arc::new(RwLock::new(rules)),
            history: Arc::new(MetricHistory::new(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    /// 添加规则，返回规则 ID
    pub async fn add_rule(&self, rule: Rule) -> Result<String> {
        Self::validate(&rule)?;

        let mut rules = self.rules.write().await;
        info!(rule_id = %rule.id, rule_name = %rule.name, "Rule added");
        let id = rule.id.clone();
        rules.push(rule);
        Ok(id)
    }

    fn validate(rule: &Rule) -> Result<()> {
        match &rule.kind {
            RuleKind::Threshold { metric, .. } => {
                if metric.is_empty() {
                    return Err(PulseError::InvalidInput("threshold metric is empty".into()));
                }
            }
            RuleKind::Trend { window_size, .. } => {
                if *window_size < 2 {
                    return Err(PulseError::InvalidInput(
                        "trend window_size must be at least 2".into(),
                    ));
                }
            }
            RuleKind::Anomaly {
                window_size,
                min_samples,
                ..
            } => {
                if *min_samples < 2 || *window_size < *min_samples {
                    return Err(PulseError::InvalidInput(
                        "anomaly requires window_size >= min_samples >= 2".into(),
                    ));
                }
            }
            RuleKind::Composite { conditions, .. } => {
                if conditions.is_empty() {
                    return Err(PulseError::InvalidInput(
                        "composite rule has no conditions".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// 获取规则
    pub async fn get_rule(&self, rule_id: &str) -> Result<Rule> {
        let rules = self.rules.read().await;
        rules
            .iter()
            .find(|r| r.id == rule_id)
            .cloned()
            .ok_or_else(|| PulseError::NotFound(format!("rule {}", rule_id)))
    }

    /// 更新规则（按字段合并），返回更新后的规则
    pub async fn update_rule(&self, rule_id: &str, update: RuleUpdate) -> Result<Rule> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| PulseError::NotFound(format!("rule {}", rule_id)))?;

        update.apply(rule);
        info!(rule_id = %rule.id, "Rule updated");
        Ok(rule.clone())
    }

    /// 删除规则
    pub async fn delete_rule(&self, rule_id: &str) -> Result<()> {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);

        if rules.len() == before {
            return Err(PulseError::NotFound(format!("rule {}", rule_id)));
        }
        info!(rule_id = %rule_id, "Rule deleted");
        Ok(())
    }

    /// 列出规则，可按维度/启用状态过滤
    pub async fn list_rules(&self, dimension: Option<Dimension>, enabled_only: bool) -> Vec<Rule> {
        let rules = self.rules.read().await;
        rules
            .iter()
            .filter(|r| dimension.map(|d| r.dimension == d).unwrap_or(true))
            .filter(|r| !enabled_only || r.enabled)
            .cloned()
            .collect()
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }

    /// 评估一批指标，返回触发的原始告警。
    /// 每个指标每轮只写入一次历史；单条规则评估失败只记日志。
    pub async fn evaluate(&self, metrics: &HashMap<String, f64>) -> Vec<Alert> {
        for (metric, value) in metrics {
            self.history.record(metric, *value).await;
        }

        let rules = self.rules.read().await.clone();
        let mut alerts = Vec::new();

        for rule in rules.iter().filter(|r| r.enabled) {
            match self.evaluate_rule(rule, metrics).await {
                Ok(Some(alert)) => {
                    debug!(rule_id = %rule.id, alert_id = %alert.id, "Rule triggered");
                    alerts.push(alert);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "Rule evaluation failed, skipping");
                }
            }
        }

        alerts
    }

    async fn evaluate_rule(&self, rule: &Rule, metrics: &HashMap<String, f64>) -> Result<Option<Alert>> {
        match &rule.kind {
            RuleKind::Threshold { metric, op, value } => {
                let current = match metrics.get(metric) {
                    Some(v) => *v,
                    None => return Ok(None),
                };
                if !op.compare(current, *value) {
                    return Ok(None);
                }

                let message = format!(
                    "{}: value={:.4}, threshold={:.4} ({})",
                    metric, current, value, op
                );
                Ok(Some(
                    Alert::new(&rule.id, rule.dimension, rule.level, &rule.name, message)
                        .with_priority(rule.priority)
                        .with_source("rule_engine")
                        .with_metric(metric, current, *value),
                ))
            }

            RuleKind::Trend {
                metric,
                window_size,
                decline_threshold,
            } => {
                let current = match metrics.get(metric) {
                    Some(v) => *v,
                    None => return Ok(None),
                };
                let values = self.history.recent(metric, *window_size).await;
                if values.len() < *window_size {
                    return Ok(None);
                }

                let slope = least_squares_slope(&values);
                // 下降量按整个窗口衡量：拟合直线在窗口首尾的差值
                let window_decline = slope * (*window_size as f64 - 1.0);
                if window_decline >= -*decline_threshold {
                    return Ok(None);
                }

                let message = format!(
                    "{}: declining trend, slope={:.4} over {} samples",
                    metric, slope, window_size
                );
                Ok(Some(
                    Alert::new(&rule.id, rule.dimension, rule.level, &rule.name, message)
                        .with_priority(rule.priority)
                        .with_source("rule_engine")
                        .with_metric(metric, current, *decline_threshold)
                        .with_context("slope", json!(slope))
                        .with_context("window_values", json!(values)),
                ))
            }

            RuleKind::Anomaly {
                metric,
                window_size,
                min_samples,
                sensitivity,
            } => {
                let current = match metrics.get(metric) {
                    Some(v) => *v,
                    None => return Ok(None),
                };
                // 当前值已入历史，基线取其之前最多 window_size 个样本
                let values = self.history.recent(metric, *window_size + 1).await;
                if values.len() < 2 {
                    return Ok(None);
                }
                let baseline = &values[..values.len() - 1];
                if baseline.len() < *min_samples {
                    return Ok(None);
                }

                let mean = baseline.iter().sum::<f64>() / baseline.len() as f64;
                let variance = baseline
                    .iter()
                    .map(|v| (v - mean).powi(2))
                    .sum::<f64>()
                    / (baseline.len() - 1) as f64;
                let stddev = variance.sqrt();

                // 平坦基线永不视为异常
                if stddev < f64::EPSILON {
                    return Ok(None);
                }

                let z_score = (current - mean).abs() / stddev;
                if z_score <= *sensitivity {
                    return Ok(None);
                }

                let message = format!(
                    "{}: value={:.4} deviates from baseline (z={:.2}, mean={:.4}, stddev={:.4})",
                    metric, current, z_score, mean, stddev
                );
                Ok(Some(
                    Alert::new(&rule.id, rule.dimension, rule.level, &rule.name, message)
                        .with_priority(rule.priority)
                        .with_source("rule_engine")
                        .with_metric(metric, current, *sensitivity)
                        .with_context("z_score", json!(z_score))
                        .with_context("baseline_mean", json!(mean))
                        .with_context("baseline_stddev", json!(stddev)),
                ))
            }

            RuleKind::Composite { conditions, logic } => {
                // 缺失指标按条件不成立处理
                let results: Vec<bool> = conditions
                    .iter()
                    .map(|c| {
                        metrics
                            .get(&c.metric)
                            .map(|v| c.op.compare(*v, c.value))
                            .unwrap_or(false)
                    })
                    .collect();

                let triggered = match logic {
                    CompositeLogic::And => results.iter().all(|r| *r),
                    CompositeLogic::Or => results.iter().any(|r| *r),
                };
                if !triggered {
                    return Ok(None);
                }

                let matched = results.iter().filter(|r| **r).count();
                let message = format!(
                    "{}: {}/{} conditions matched ({:?})",
                    rule.name,
                    matched,
                    conditions.len(),
                    logic
                );
                Ok(Some(
                    Alert::new(&rule.id, rule.dimension, rule.level, &rule.name, message)
                        .with_priority(rule.priority)
                        .with_source("rule_engine")
                        .with_context("conditions", serde_json::to_value(conditions)?)
                        .with_context("results", json!(results)),
                ))
            }
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// 最小二乘拟合斜率，x 取样本序号 0..n-1
fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, v)| i as f64 * v).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64) * (i as f64)).sum();

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompareOp, Condition};
    use pulse_types::AlertLevel;

    fn metrics(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_threshold_all_operators() {
        let cases = [
            (CompareOp::Gt, 0.9, true),
            (CompareOp::Gt, 0.8, false),
            (CompareOp::Lt, 0.7, true),
            (CompareOp::Lt, 0.8, false),
            (CompareOp::Eq, 0.8, true),
            (CompareOp::Eq, 0.81, false),
            (CompareOp::Gte, 0.8, true),
            (CompareOp::Gte, 0.79, false),
            (CompareOp::Lte, 0.8, true),
            (CompareOp::Lte, 0.81, false),
        ];

        for (op, value, expected) in cases {
            let engine = RuleEngine::new();
            engine
                .add_rule(Rule::threshold(
                    "t",
                    Dimension::Performance,
                    "m",
                    op,
                    0.8,
                    AlertLevel::Warning,
                ))
                .await
                .unwrap();

            let alerts = engine.evaluate(&metrics(&[("m", value)])).await;
            assert_eq!(alerts.len(), usize::from(expected), "op {:?} value {}", op, value);

            if expected {
                // 告警回显输入的指标值与阈值
                assert_eq!(alerts[0].metric_value, Some(value));
                assert_eq!(alerts[0].threshold_value, Some(0.8));
            }
        }
    }

    #[tokio::test]
    async fn test_threshold_missing_metric_no_alert() {
        let engine = RuleEngine::new();
        engine
            .add_rule(Rule::threshold(
                "t",
                Dimension::Cost,
                "absent",
                CompareOp::Gt,
                1.0,
                AlertLevel::High,
            ))
            .await
            .unwrap();

        let alerts = engine.evaluate(&metrics(&[("other", 5.0)])).await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_default_quality_scenario() {
        let engine = RuleEngine::with_default_rules();

        let alerts = engine.evaluate(&metrics(&[("quality_score", 0.6)])).await;

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert_eq!(alerts[0].metric_value, Some(0.6));
        assert_eq!(alerts[0].threshold_value, Some(0.8));
    }

    #[tokio::test]
    async fn test_trend_fires_on_declining_sequence() {
        let engine = RuleEngine::new();
        engine
            .add_rule(Rule::trend(
                "quality_trend",
                Dimension::Quality,
                "quality_score",
                5,
                0.1,
                AlertLevel::Warning,
            ))
            .await
            .unwrap();

        // 前 4 轮样本不足，不触发
        for v in [0.70, 0.65, 0.60, 0.55] {
            let alerts = engine.evaluate(&metrics(&[("quality_score", v)])).await;
            assert!(alerts.is_empty(), "fired early at {}", v);
        }

        // 第 5 轮触发，斜率为负
        let alerts = engine.evaluate(&metrics(&[("quality_score", 0.50)])).await;
        assert_eq!(alerts.len(), 1);
        let slope = alerts[0].context["slope"].as_f64().unwrap();
        assert!(slope < 0.0);
    }

    #[tokio::test]
    async fn test_trend_flat_and_increasing_do_not_fire() {
        for sequence in [[0.5, 0.5, 0.5, 0.5, 0.5], [0.50, 0.55, 0.60, 0.65, 0.70]] {
            let engine = RuleEngine::new();
            engine
                .add_rule(Rule::trend(
                    "t",
                    Dimension::Quality,
                    "m",
                    5,
                    0.1,
                    AlertLevel::Warning,
                ))
                .await
                .unwrap();

            let mut fired = 0;
            for v in sequence {
                fired += engine.evaluate(&metrics(&[("m", v)])).await.len();
            }
            assert_eq!(fired, 0);
        }
    }

    #[tokio::test]
    async fn test_anomaly_detection() {
        let engine = RuleEngine::new();
        engine
            .add_rule(Rule::anomaly(
                "latency_anomaly",
                Dimension::Performance,
                "latency",
                20,
                5,
                3.0,
                AlertLevel::High,
            ))
            .await
            .unwrap();

        // 建立有波动的基线
        for v in [10.0, 11.0, 9.0, 10.5, 9.5, 10.0] {
            let alerts = engine.evaluate(&metrics(&[("latency", v)])).await;
            assert!(alerts.is_empty());
        }

        // 正常范围内的值不触发
        let alerts = engine.evaluate(&metrics(&[("latency", 10.2)])).await;
        assert!(alerts.is_empty());

        // 远离基线的值触发
        let alerts = engine.evaluate(&metrics(&[("latency", 50.0)])).await;
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].context["z_score"].as_f64().unwrap() > 3.0);
        assert_eq!(alerts[0].metric_value, Some(50.0));
    }

    #[tokio::test]
    async fn test_anomaly_flat_baseline_never_fires() {
        let engine = RuleEngine::new();
        engine
            .add_rule(Rule::anomaly(
                "t",
                Dimension::Performance,
                "m",
                20,
                3,
                2.0,
                AlertLevel::High,
            ))
            .await
            .unwrap();

        for _ in 0..5 {
            engine.evaluate(&metrics(&[("m", 10.0)])).await;
        }

        // 基线标准差为 0，任何值都不算异常
        let alerts = engine.evaluate(&metrics(&[("m", 1000.0)])).await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_anomaly_requires_min_samples() {
        let engine = RuleEngine::new();
        engine
            .add_rule(Rule::anomaly(
                "t",
                Dimension::Performance,
                "m",
                20,
                5,
                1.0,
                AlertLevel::High,
            ))
            .await
            .unwrap();

        // 基线不足 5 个样本，偏离值也不触发
        for v in [10.0, 12.0, 8.0] {
            engine.evaluate(&metrics(&[("m", v)])).await;
        }
        let alerts = engine.evaluate(&metrics(&[("m", 100.0)])).await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_composite_and_or() {
        let conditions = vec![
            Condition {
                metric: "cpu".to_string(),
                op: CompareOp::Gt,
                value: 0.8,
            },
            Condition {
                metric: "memory".to_string(),
                op: CompareOp::Gt,
                value: 0.9,
            },
        ];

        let engine = RuleEngine::new();
        engine
            .add_rule(Rule::composite(
                "both_high",
                Dimension::Performance,
                conditions.clone(),
                CompositeLogic::And,
                AlertLevel::Critical,
            ))
            .await
            .unwrap();
        engine
            .add_rule(Rule::composite(
                "either_high",
                Dimension::Performance,
                conditions,
                CompositeLogic::Or,
                AlertLevel::Warning,
            ))
            .await
            .unwrap();

        // 只有 cpu 超限：OR 触发，AND 不触发
        let alerts = engine.evaluate(&metrics(&[("cpu", 0.9), ("memory", 0.5)])).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "either_high");

        // 两者都超限：各触发一条
        let alerts = engine.evaluate(&metrics(&[("cpu", 0.9), ("memory", 0.95)])).await;
        assert_eq!(alerts.len(), 2);
    }

    #[tokio::test]
    async fn test_composite_missing_metric_is_false() {
        let engine = RuleEngine::new();
        engine
            .add_rule(Rule::composite(
                "t",
                Dimension::Performance,
                vec![Condition {
                    metric: "absent".to_string(),
                    op: CompareOp::Gt,
                    value: 0.0,
                }],
                CompositeLogic::And,
                AlertLevel::Warning,
            ))
            .await
            .unwrap();

        let alerts = engine.evaluate(&metrics(&[("other", 1.0)])).await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_rule_skipped() {
        let engine = RuleEngine::new();
        engine
            .add_rule(
                Rule::threshold("t", Dimension::Cost, "m", CompareOp::Gt, 0.0, AlertLevel::High)
                    .disabled(),
            )
            .await
            .unwrap();

        let alerts = engine.evaluate(&metrics(&[("m", 1.0)])).await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let engine = RuleEngine::new();
        let id = engine.add_rule(Rule::default_quality()).await.unwrap();

        let rule = engine.get_rule(&id).await.unwrap();
        assert_eq!(rule.name, "quality_score_low");

        let updated = engine
            .update_rule(
                &id,
                RuleUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.enabled);

        assert_eq!(engine.list_rules(Some(Dimension::Quality), false).await.len(), 1);
        assert!(engine.list_rules(Some(Dimension::Quality), true).await.is_empty());
        assert!(engine.list_rules(Some(Dimension::Security), false).await.is_empty());

        engine.delete_rule(&id).await.unwrap();
        assert!(engine.get_rule(&id).await.is_err());
        assert!(engine.delete_rule(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_default_anomaly_preset_registers() {
        let engine = RuleEngine::new();
        let id = engine.add_rule(Rule::default_anomaly("latency")).await.unwrap();

        let rule = engine.get_rule(&id).await.unwrap();
        assert_eq!(rule.name, "latency_anomaly");
        match rule.kind {
            RuleKind::Anomaly {
                min_samples,
                sensitivity,
                ..
            } => {
                assert_eq!(min_samples, 5);
                assert_eq!(sensitivity, 3.0);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_rules_rejected() {
        let engine = RuleEngine::new();

        let result = engine
            .add_rule(Rule::trend("t", Dimension::Quality, "m", 1, 0.1, AlertLevel::Warning))
            .await;
        assert!(result.is_err());

        let result = engine
            .add_rule(Rule::composite(
                "t",
                Dimension::Quality,
                Vec::new(),
                CompositeLogic::And,
                AlertLevel::Warning,
            ))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_least_squares_slope() {
        // 每步下降 0.05
        let slope = least_squares_slope(&[0.70, 0.65, 0.60, 0.55, 0.50]);
        assert!((slope - (-0.05)).abs() < 1e-9);

        assert_eq!(least_squares_slope(&[1.0, 1.0, 1.0]), 0.0);
        assert!(least_squares_slope(&[1.0, 2.0, 3.0]) > 0.0);
    }
}
