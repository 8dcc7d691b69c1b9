pub mod notification;

pub use notification::{K8sNotificationSource, NOTIFICATION_SOURCE_TYPE, NotifyStats};
