use pulse_alert::{AggregationRule, AlertManager, GroupField, MergeStrategy};
use pulse_rule::Rule;
use pulse_types::Dimension;
use std::collections::HashMap;

fn metrics(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    println!("=== PULSE 告警流水线示例 ===\n");

    // 1. 创建编排器（预置质量/效率/成本规则）
    println!("1. 创建告警编排器");
    let manager = AlertManager::with_defaults();

    // 追加一条趋势规则
    manager
        .engine()
        .add_rule(Rule::trend(
            "quality_trend_decline",
            Dimension::Quality,
            "quality_score",
            5,
            0.1,
            pulse_types::AlertLevel::Warning,
        ))
        .await
        .unwrap();

    // 按维度聚合
    manager
        .aggregator()
        .add_rule(AggregationRule::new(
            "by_dimension",
            vec![GroupField::Dimension],
            5,
            10,
            MergeStrategy::Summary,
        ))
        .await;

    println!("已注册 {} 条规则\n", manager.engine().rule_count().await);

    // 2. 质量分跌破阈值
    println!("2. 上报 quality_score = 0.6");
    let alerts = manager.process_metrics(&metrics(&[("quality_score", 0.6)])).await;
    for alert in &alerts {
        println!("  ✓ 触发告警: {} (级别: {:?})", alert.title, alert.level);
    }

    // 3. 同样的指标再次上报（去重窗口内被吸收）
    println!("\n3. 再次上报 quality_score = 0.55");
    let alerts = manager.process_metrics(&metrics(&[("quality_score", 0.55)])).await;
    if alerts.is_empty() {
        println!("  ⊘ 重复告警已被去重");
    }

    // 4. 查看活跃告警并确认/解决
    println!("\n4. 当前活跃告警:");
    let active = manager.list_active(None, None, 10).await;
    for alert in &active {
        println!("  - {} | 状态: {:?}", alert.title, alert.status);
    }

    if let Some(first) = active.first() {
        manager.acknowledge(&first.id, "oncall").await;
        manager.resolve(&first.id, "oncall", Some("retrained model")).await;
        println!("  ✓ 告警已确认并解决");
    }

    // 5. 升级检查（由外部调度器按周期调用）
    println!("\n5. 升级检查");
    let events = manager.check_escalations().await;
    println!("  产生 {} 个升级事件", events.len());

    // 6. 统计
    println!("\n6. 最近 1 天统计:");
    let stats = manager.statistics(1).await;
    println!(
        "  总数: {} | 活跃: {} | 按状态: {:?}",
        stats.total, stats.active_count, stats.by_status
    );

    println!("\n=== 示例完成 ===");
}
