use pulse_notify::{NotificationConfig, NotificationSystem, RetryPolicy};
use pulse_types::{Alert, AlertLevel, Dimension, NotificationChannel};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    println!("=== PULSE 通知系统示例 ===\n");

    // 1. 创建通知系统（默认模板集）
    println!("1. 创建通知系统");
    let system = NotificationSystem::with_default_templates(RetryPolicy::default());

    // 2. 配置 Webhook 渠道
    println!("2. 配置 Webhook 渠道");
    let mut webhook = HashMap::new();
    webhook.insert("url".to_string(), "https://example.com/hook".to_string());
    system
        .configure_handler(NotificationChannel::Webhook, &webhook)
        .await
        .unwrap();

    // 3. 通知配置与限流
    system
        .add_notification_config(
            NotificationConfig::new(
                "ops_webhook",
                NotificationChannel::Webhook,
                vec!["ops".to_string()],
            )
            .with_levels(vec![AlertLevel::Warning, AlertLevel::Critical]),
        )
        .await;
    system
        .set_rate_limit(NotificationChannel::Webhook, 10, 60)
        .await;
    println!("已添加通知配置（限流 10 条/60 分钟）\n");

    // 4. 发送一条告警通知
    println!("3. 发送告警通知");
    let alert = Alert::new(
        "rule-quality",
        Dimension::Quality,
        AlertLevel::Warning,
        "Quality drop",
        "quality_score below threshold",
    )
    .with_source("rule_engine")
    .with_metric("quality_score", 0.6, 0.8);

    let records = system.send_alert_notifications(&alert).await;
    println!("  已入队 {} 条通知", records.len());

    // 等待 worker 投递
    sleep(Duration::from_secs(2)).await;

    // 5. 查看投递结果与统计
    println!("\n4. 投递结果:");
    for record in &records {
        if let Some(current) = system.get_notification_record(&record.id).await {
            println!(
                "  - {} -> {:?} (重试 {} 次)",
                current.recipient, current.status, current.retry_count
            );
        }
    }

    let stats = system.get_notification_statistics(1).await;
    println!(
        "\n5. 统计: 总数 {} | 按状态 {:?} | 成功率 {:.0}%",
        stats.total,
        stats.by_status,
        stats.success_rate * 100.0
    );

    println!("\n=== 示例完成 ===");
}
