//! Queue delivery and redrive rules.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 3;
pub const DEFAULT_DLQ_RETENTION_SECS: u32 = 14 * 24 * 60 * 60;
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u32 = 30;
/// Messages are handed to the consumer one at a time.
pub const DEFAULT_BATCH_SIZE: u32 = 1;

/// Record attribute carrying how many times a message has been received.
pub const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedrivePolicy {
    pub max_receive_count: u32,
}

impl Default for RedrivePolicy {
    fn default() -> Self {
        Self {
            max_receive_count: DEFAULT_MAX_RECEIVE_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Deliver,
    DeadLetter,
}

impl RedrivePolicy {
    /// Where a message goes on its `receive_count`-th receive. Receives past
    /// `max_receive_count` move the message to the dead-letter queue instead
    /// of handing it to the consumer.
    pub fn disposition(&self, receive_count: u32) -> Disposition {
        if receive_count > self.max_receive_count {
            Disposition::DeadLetter
        } else {
            Disposition::Deliver
        }
    }

    /// `RedrivePolicy` queue attribute value as the queue service expects it.
    pub fn to_attribute(&self, dead_letter_target_arn: &str) -> Value {
        json!({
            "deadLetterTargetArn": dead_letter_target_arn,
            "maxReceiveCount": self.max_receive_count,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterQueueConfig {
    pub retention_secs: u32,
    pub redrive: RedrivePolicy,
}

impl Default for DeadLetterQueueConfig {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_DLQ_RETENTION_SECS,
            redrive: RedrivePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub visibility_timeout_secs: u32,
    pub batch_size: u32,
    pub dead_letter: Option<DeadLetterQueueConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            dead_letter: Some(DeadLetterQueueConfig::default()),
        }
    }
}

impl QueueConfig {
    /// Without a dead-letter queue every receive is delivered.
    pub fn disposition(&self, receive_count: u32) -> Disposition {
        match self.dead_letter {
            Some(dead_letter) => dead_letter.redrive.disposition(receive_count),
            None => Disposition::Deliver,
        }
    }
}

pub fn parse_receive_count(value: &str) -> Option<u32> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourth_receive_is_dead_lettered_with_default_policy() {
        let policy = RedrivePolicy::default();

        assert_eq!(policy.disposition(1), Disposition::Deliver);
        assert_eq!(policy.disposition(3), Disposition::Deliver);
        assert_eq!(policy.disposition(4), Disposition::DeadLetter);
    }

    #[test]
    fn queue_without_dead_letter_always_delivers() {
        let config = QueueConfig {
            dead_letter: None,
            ..QueueConfig::default()
        };

        assert_eq!(config.disposition(100), Disposition::Deliver);
    }

    #[test]
    fn default_dead_letter_queue_retains_fourteen_days() {
        let config = DeadLetterQueueConfig::default();
        assert_eq!(config.retention_secs, 1_209_600);
        assert_eq!(QueueConfig::default().batch_size, 1);
    }

    #[test]
    fn redrive_attribute_names_target_and_count() {
        let attribute =
            RedrivePolicy::default().to_attribute("arn:aws:sqs:eu-west-1:123456789012:dlq");

        assert_eq!(
            attribute,
            json!({
                "deadLetterTargetArn": "arn:aws:sqs:eu-west-1:123456789012:dlq",
                "maxReceiveCount": 3
            })
        );
    }

    #[test]
    fn receive_count_parses_attribute_strings() {
        assert_eq!(parse_receive_count("2"), Some(2));
        assert_eq!(parse_receive_count(" 4 "), Some(4));
        assert_eq!(parse_receive_count("many"), None);
    }
}
