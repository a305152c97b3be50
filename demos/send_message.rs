use std::env;
use std::error::Error;

use foundation_sdk::collaboration::CollaborationClient;
use foundation_sdk::{ApiClient, Credentials};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

fn env_or(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let base_url = env_or("FOUNDATION_API_URL", "https://REPLACE_WITH_HOST");
    let credentials = Credentials::new(
        env_or("FOUNDATION_API_USER", "REPLACE_WITH_USERNAME"),
        SecretString::new(env_or("FOUNDATION_API_PASSWORD", "REPLACE_WITH_PASSWORD")),
        env_or("FOUNDATION_API_AGENT", "REPLACE_WITH_AGENT_ID"),
    );
    let channel_id = env::args()
        .nth(1)
        .unwrap_or_else(|| "REPLACE_WITH_CHANNEL_ID".to_string());
    let text = env::args().nth(2).unwrap_or_else(|| "hello".to_string());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let collaboration = CollaborationClient::new(ApiClient::new(base_url, credentials)?);

        for channel in collaboration.channels().await? {
            println!("channel id={} name={}", channel.id, channel.display_name);
        }

        collaboration.send_message(&channel_id, &text).await?;
        println!("sent to {channel_id}");

        Ok::<(), Box<dyn Error>>(())
    })
}
