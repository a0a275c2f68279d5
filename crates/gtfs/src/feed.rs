use std::time::Duration;

use tokio::sync::mpsc;

use crate::realtime::{self, FeedEvent};

/// Polls a GTFS-Realtime endpoint and forwards decoded events.
///
/// Fetch or decode failures are logged and the poller carries on; a broken
/// fetch must never stall the fleet.
pub struct FeedPoller {
    url: String,
    interval: Duration,
    client: reqwest::Client,
}

impl FeedPoller {
    pub fn new(url: String, interval: Duration) -> Self {
        Self {
            url,
            interval,
            client: reqwest::Client::new(),
        }
    }

    /// Fetch and decode the feed once.
    pub async fn fetch(&self) -> Result<Vec<FeedEvent>, Box<dyn std::error::Error + Send + Sync>> {
        let response = self.client.get(self.url.as_str()).send().await?;
        let bytes = response.error_for_status()?.bytes().await?;
        Ok(realtime::decode_feed(&bytes)?)
    }

    /// Poll until the receiver side of `events` closes.
    pub async fn run(self, events: mpsc::Sender<FeedEvent>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.fetch().await {
                Ok(decoded) => {
                    log::debug!("feed poll returned {} events", decoded.len());
                    for event in decoded {
                        if events.send(event).await.is_err() {
                            log::info!("event consumer closed, stopping feed poller");
                            return;
                        }
                    }
                }
                Err(why) => {
                    log::warn!("feed poll failed: {}", why);
                }
            }
        }
    }
}
