pub mod channel;
pub mod config;
pub mod providers;
pub mod ratelimit;
pub mod system;
pub mod template;

pub use channel::{ChannelHandler, DeliveryResult};
pub use config::NotificationConfig;
pub use providers::{
    DingTalkConfig, DingTalkHandler, EmailConfig, EmailHandler, SlackConfig, SlackHandler,
    WebhookConfig, WebhookHandler,
};
pub use ratelimit::{RateLimit, RateLimiter};
pub use system::{NotificationStatistics, NotificationSystem, RecordFilter, RetryPolicy};
pub use template::{NotificationTemplate, TemplateFormat};
