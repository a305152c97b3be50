use std::env;
use std::error::Error;

use foundation_sdk::stream::proto::Event;
use foundation_sdk::stream::{StreamFilter, StreamStatus, StreamingClient};
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

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = StreamingClient::new(ApiClient::new(base_url, credentials)?);
        client.add_listener(|event: &Event| match event {
            Event::Message(message) => println!(
                "[{}] {} ({}): {}",
                message.channel_id,
                message.sender_alias.as_deref().unwrap_or(&message.sender_id),
                message.event_id,
                message.content,
            ),
            Event::MetaData(update) => println!(
                "metadata {}={}",
                update.key,
                update.value.as_deref().unwrap_or("<deleted>")
            ),
            Event::ChannelState(state) => {
                println!("channel {} active={}", state.channel_id, state.active)
            }
        });

        let mut status = client.status();
        client.start_streaming(StreamFilter::all_events())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                client.stop_streaming();
            }
            ended = status.wait_for(|state| matches!(state, StreamStatus::Terminated { .. })) => {
                if let Ok(state) = ended {
                    eprintln!("stream ended: {:?}", *state);
                }
            }
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
