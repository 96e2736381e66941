use serde::Serialize;

/// 配对成功后推送给通知服务的事件体
#[derive(Debug, Serialize)]
struct MatchEvent {
    match_id: String,
    user_a: String,
    user_b: String,
}

/// 配对通知分发器。
/// 投递是尽力而为：引擎不等待送达确认，失败只记日志，
/// 补偿由通知服务自己负责。
#[derive(Clone)]
pub struct MatchNotifier {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl MatchNotifier {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn dispatch(&self, match_id: &str, user_a: &str, user_b: &str) {
        let Some(url) = self.endpoint.clone() else {
            tracing::debug!("Match notify url not configured, skip dispatch");
            return;
        };

        let client = self.client.clone();
        let event = MatchEvent {
            match_id: match_id.to_string(),
            user_a: user_a.to_string(),
            user_b: user_b.to_string(),
        };

        tokio::spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(
                        "Match notification rejected: {} - {}",
                        event.match_id,
                        resp.status()
                    );
                }
                Ok(_) => {
                    tracing::debug!("Match notification dispatched: {}", event.match_id);
                }
                Err(e) => {
                    tracing::warn!("Failed to dispatch match notification: {}", e);
                }
            }
        });
    }
}
