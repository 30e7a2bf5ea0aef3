use serde::{Deserialize, Serialize};

use crate::config::S3Uri;

/// Reads metadata of the object a work item points at.
pub trait ObjectInspector {
    /// Size of the object in bytes, when the store reports one.
    fn object_size(&self, uri: &S3Uri) -> Result<Option<i64>, String>;
}

/// Chat message in incoming-webhook format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookMessage {
    pub text: String,
    pub channel: String,
}

pub trait Notifier {
    fn notify(&self, message: &WebhookMessage) -> Result<(), String>;
}
