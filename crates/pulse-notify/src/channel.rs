use anyhow::Result;
use async_trait::async_trait;
use pulse_types::{NotificationChannel, NotificationRecord};

/// 投递结果
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub success: bool,
    pub message: String,
}

impl DeliveryResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: "Notification sent successfully".to_string(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 渠道处理器 trait：每个渠道一个实现，
/// 渠道专属的报文构造/格式化是实现内部的事
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// 发送一条通知
    async fn send(&self, record: &NotificationRecord) -> Result<DeliveryResult>;

    /// 处理器服务的渠道
    fn channel(&self) -> NotificationChannel;

    /// 处理器名称
    fn name(&self) -> &str;
}
