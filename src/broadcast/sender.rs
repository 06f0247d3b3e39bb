use crate::gateway::{Gateway, GatewayError};
use crate::model::{DeliveryOutcome, FailureKind, Payload, Recipient};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Performs exactly one delivery attempt and classifies the result.
///
/// Retrying is the caller's job; see [`super::dispatcher`].
#[derive(Clone)]
pub struct RateAwareSender {
    gateway: Arc<dyn Gateway>,
}

impl RateAwareSender {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn send(&self, to: Recipient, payload: &Payload) -> DeliveryOutcome {
        let res = match payload.image.as_deref() {
            Some(image) => self.gateway.send_image(to, image, payload).await,
            None => self.gateway.send_text(to, payload).await,
        };
        classify(to, res)
    }
}

pub fn classify(to: Recipient, res: Result<(), GatewayError>) -> DeliveryOutcome {
    match res {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(GatewayError::Forbidden(reason)) => {
            debug!(recipient = %to, %reason, "recipient blocked delivery");
            DeliveryOutcome::failed(FailureKind::Blocked, reason)
        }
        Err(GatewayError::NotFound(reason)) => {
            debug!(recipient = %to, %reason, "recipient not found");
            DeliveryOutcome::failed(FailureKind::NotFound, reason)
        }
        Err(GatewayError::RetryAfter(wait)) => {
            warn!(recipient = %to, wait_secs = wait.as_secs_f64(), "rate limited by gateway");
            DeliveryOutcome::Retryable { wait }
        }
        Err(GatewayError::Migrated(new_recipient)) => {
            info!(recipient = %to, %new_recipient, "chat migrated");
            DeliveryOutcome::Redirected { new_recipient }
        }
        Err(GatewayError::Other(reason)) => {
            warn!(recipient = %to, error = %reason, "unclassified gateway error");
            DeliveryOutcome::failed(FailureKind::Unclassified, reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn classify_maps_gateway_taxonomy() {
        let to = Recipient(7);
        assert_eq!(classify(to, Ok(())), DeliveryOutcome::Delivered);
        assert!(matches!(
            classify(to, Err(GatewayError::Forbidden("bot was blocked".into()))),
            DeliveryOutcome::PermanentlyFailed {
                kind: FailureKind::Blocked,
                ..
            }
        ));
        assert!(matches!(
            classify(to, Err(GatewayError::NotFound("chat not found".into()))),
            DeliveryOutcome::PermanentlyFailed {
                kind: FailureKind::NotFound,
                ..
            }
        ));
        assert_eq!(
            classify(to, Err(GatewayError::RetryAfter(Duration::from_secs(3)))),
            DeliveryOutcome::Retryable {
                wait: Duration::from_secs(3)
            }
        );
        assert_eq!(
            classify(to, Err(GatewayError::Migrated(Recipient(-100)))),
            DeliveryOutcome::Redirected {
                new_recipient: Recipient(-100)
            }
        );
        assert!(matches!(
            classify(to, Err(GatewayError::Other("boom".into()))),
            DeliveryOutcome::PermanentlyFailed {
                kind: FailureKind::Unclassified,
                ..
            }
        ));
    }
}
