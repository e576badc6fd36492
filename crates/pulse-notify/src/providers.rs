use crate::channel::{ChannelHandler, DeliveryResult};
use anyhow::Result;
use async_trait::async_trait;
use pulse_types::{
    NotificationChannel, NotificationPriority, NotificationRecord, PulseError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 处理器配置里的必填键，缺失即配置失败
fn required(config: &HashMap<String, String>, key: &str) -> pulse_types::Result<String> {
    config
        .get(key)
        .cloned()
        .ok_or_else(|| PulseError::Config(format!("missing required key: {}", key)))
}

// ============================================================================
// 邮件通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug)]
pub struct EmailHandler {
    config: EmailConfig,
}

impl EmailHandler {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &HashMap<String, String>) -> pulse_types::Result<Self> {
        let smtp_port = required(config, "smtp_port")?
            .parse::<u16>()
            .map_err(|_| PulseError::Config("smtp_port must be a port number".to_string()))?;

        Ok(Self::new(EmailConfig {
            smtp_host: required(config, "smtp_host")?,
            smtp_port,
            username: required(config, "username")?,
            password: required(config, "password")?,
            from: required(config, "from")?,
        }))
    }
}

#[async_trait]
impl ChannelHandler for EmailHandler {
    async fn send(&self, record: &NotificationRecord) -> Result<DeliveryResult> {
        use lettre::message::header::ContentType;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let email = Message::builder()
            .from(self.config.from.parse()?)
            .to(record.recipient.parse()?)
            .subject(&record.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(record.content.clone())?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)?
            .credentials(creds)
            .port(self.config.smtp_port)
            .build();

        match mailer.send(email).await {
            Ok(_) => Ok(DeliveryResult::success()),
            Err(e) => Ok(DeliveryResult::failure(format!("Email send failed: {}", e))),
        }
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    fn name(&self) -> &str {
        "email"
    }
}

// ============================================================================
// Webhook 通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub method: String,
    pub headers: Option<HashMap<String, String>>,
}

pub struct WebhookHandler {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &HashMap<String, String>) -> pulse_types::Result<Self> {
        Ok(Self::new(WebhookConfig {
            url: required(config, "url")?,
            method: config.get("method").cloned().unwrap_or_else(|| "post".to_string()),
            headers: None,
        }))
    }
}

#[async_trait]
impl ChannelHandler for WebhookHandler {
    async fn send(&self, record: &NotificationRecord) -> Result<DeliveryResult> {
        let mut request = match self.config.method.to_lowercase().as_str() {
            "put" => self.client.put(&self.config.url),
            _ => self.client.post(&self.config.url),
        };

        if let Some(headers) = &self.config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let response = request.json(record).send().await?;

        if response.status().is_success() {
            Ok(DeliveryResult::success())
        } else {
            Ok(DeliveryResult::failure(format!(
                "Webhook failed with status: {}",
                response.status()
            )))
        }
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Webhook
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

// ============================================================================
// 钉钉通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DingTalkConfig {
    pub webhook_url: String,
    pub secret: Option<String>,
}

pub struct DingTalkHandler {
    config: DingTalkConfig,
    client: reqwest::Client,
}

impl DingTalkHandler {
    pub fn new(config: DingTalkConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &HashMap<String, String>) -> pulse_types::Result<Self> {
        Ok(Self::new(DingTalkConfig {
            webhook_url: required(config, "webhook_url")?,
            secret: config.get("secret").cloned(),
        }))
    }

    fn build_message(&self, record: &NotificationRecord) -> serde_json::Value {
        serde_json::json!({
            "msgtype": "markdown",
            "markdown": {
                "title": record.subject,
                "text": format!(
                    "## {}\n\n{}\n\n**时间**: {}",
                    record.subject, record.content, record.created_at
                )
            }
        })
    }
}

#[async_trait]
impl ChannelHandler for DingTalkHandler {
    async fn send(&self, record: &NotificationRecord) -> Result<DeliveryResult> {
        let body = self.build_message(record);

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(DeliveryResult::success())
        } else {
            Ok(DeliveryResult::failure(format!(
                "DingTalk failed: {}",
                response.status()
            )))
        }
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::DingTalk
    }

    fn name(&self) -> &str {
        "dingtalk"
    }
}

// ============================================================================
// Slack 通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}

pub struct SlackHandler {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackHandler {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &HashMap<String, String>) -> pulse_types::Result<Self> {
        Ok(Self::new(SlackConfig {
            webhook_url: required(config, "webhook_url")?,
        }))
    }

    fn build_message(&self, record: &NotificationRecord) -> serde_json::Value {
        let color = match record.priority {
            NotificationPriority::Low => "good",
            NotificationPriority::Normal => "warning",
            NotificationPriority::High | NotificationPriority::Urgent => "danger",
        };

        serde_json::json!({
            "attachments": [{
                "color": color,
                "title": record.subject,
                "text": record.content,
                "fields": [
                    {
                        "title": "Priority",
                        "value": format!("{:?}", record.priority),
                        "short": true
                    },
                    {
                        "title": "Time",
                        "value": record.created_at.to_rfc3339(),
                        "short": true
                    }
                ]
            }]
        })
    }
}

#[async_trait]
impl ChannelHandler for SlackHandler {
    async fn send(&self, record: &NotificationRecord) -> Result<DeliveryResult> {
        let body = self.build_message(record);

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(DeliveryResult::success())
        } else {
            Ok(DeliveryResult::failure(format!(
                "Slack failed: {}",
                response.status()
            )))
        }
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Slack
    }

    fn name(&self) -> &str {
        "slack"
    }
}
