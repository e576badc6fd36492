pub mod alert;
pub mod error;
pub mod notification;

pub use alert::{Alert, AlertLevel, AlertStatus, Dimension};
pub use error::{PulseError, Result};
pub use notification::{
    NotificationChannel, NotificationPriority, NotificationRecord, NotificationStatus,
};
