//! Fire-and-forget alerts about noteworthy rotation events.

use crate::{node::Node, Error};
use reqwest::Client;
use serde::Serialize;
use std::{fmt, future::Future, time::Duration};
use tracing::{error, info, warn};

/// Event reported to the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The delegate missed more blocks than allowed.
    BlockAlert,
    /// No API endpoint was reachable, so rotation was skipped.
    ApiWarning,
    /// The active node was unhealthy and forging moved to another node.
    Warning { from: Node, to: Node },
    /// No candidate could take over forging.
    Alert,
}

impl Event {
    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BlockAlert => "BLOCK ALERT",
            Self::ApiWarning => "API WARNING",
            Self::Warning { .. } => "WARNING",
            Self::Alert => "ALERT",
        }
    }

    pub fn subject(&self) -> String {
        format!("FORGER {}!", self.kind())
    }

    pub fn message(&self) -> String {
        match self {
            Self::BlockAlert => {
                "Your delegate has missed a block! Please investigate immediately!".to_string()
            }
            Self::ApiWarning => {
                "No APIs were available. Node randomisation has been skipped. Please investigate."
                    .to_string()
            }
            Self::Warning { from, to } => format!(
                "{from} was not reachable! Forging switched over to {to}. Please investigate."
            ),
            Self::Alert => {
                "None of the forgers could be reached! Please investigate immediately!".to_string()
            }
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Channel that delivers [Event]s to the operator.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &Event) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Deliver `event`, logging (never propagating) a delivery failure.
pub async fn fire<N: Notifier>(notifier: &N, event: Event) {
    match notifier.notify(&event).await {
        Ok(()) => info!(%event, "notification sent"),
        Err(err) => error!(%event, ?err, "failed to send notification"),
    }
}

/// Payload posted to a webhook.
#[derive(Serialize)]
struct Payload {
    subject: String,
    text: String,
}

/// Delivery channel selected by configuration.
#[derive(Clone)]
pub enum Channel {
    /// Only log events.
    Log,
    /// POST events as JSON to a URL.
    Webhook { client: Client, url: String },
}

impl Channel {
    /// Select the webhook channel if `url` is set, otherwise log only.
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, Error> {
        match url {
            Some(url) => {
                let client = Client::builder().timeout(timeout).build()?;
                Ok(Self::Webhook { client, url })
            }
            None => Ok(Self::Log),
        }
    }
}

impl Notifier for Channel {
    async fn notify(&self, event: &Event) -> Result<(), Error> {
        match self {
            Self::Log => {
                warn!(subject = %event.subject(), message = %event.message(), "alert");
                Ok(())
            }
            Self::Webhook { client, url } => {
                let payload = Payload {
                    subject: event.subject(),
                    text: event.message(),
                };
                let response = client.post(url).json(&payload).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::Status(status.as_u16()));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::Recorder;

    #[test]
    fn test_catalog() {
        assert_eq!(Event::BlockAlert.subject(), "FORGER BLOCK ALERT!");
        assert_eq!(Event::ApiWarning.subject(), "FORGER API WARNING!");
        assert_eq!(Event::Alert.subject(), "FORGER ALERT!");
        let warning = Event::Warning {
            from: Node::new("http://a"),
            to: Node::new("http://b"),
        };
        assert_eq!(warning.subject(), "FORGER WARNING!");
        assert_eq!(
            warning.message(),
            "http://a was not reachable! Forging switched over to http://b. Please investigate."
        );
    }

    #[tokio::test]
    async fn test_fire_swallows_failure() {
        let recorder = Recorder::default();
        recorder.set_fail(true);
        fire(&recorder, Event::Alert).await;
        assert_eq!(recorder.events(), vec![Event::Alert]);
    }

    #[tokio::test]
    async fn test_log_channel() {
        let channel = Channel::new(None, Duration::from_secs(1)).unwrap();
        assert!(matches!(channel, Channel::Log));
        channel.notify(&Event::BlockAlert).await.unwrap();
    }
}
