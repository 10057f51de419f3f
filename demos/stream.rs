use std::io::Write;

use futures::StreamExt;
use unichat::{Agent, ClientConfig, Message, OpenAi, StreamDelta, StreamEventType, Thread};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY must be set");

    let client = OpenAi::create(ClientConfig::new(api_key).with_model("gpt-4o-mini"))?;
    let agent = Agent::new(client);

    let mut thread = Thread::new();
    let mut stream = agent.stream(
        &mut thread,
        vec![Message::user("Tell me a short story about a lighthouse.")],
    );

    while let Some(event) = stream.next().await {
        let event = event?;
        match event.event_type {
            StreamEventType::TextDelta => {
                if let Some(StreamDelta::Text { text }) = &event.delta {
                    print!("{}", text);
                    std::io::stdout().flush()?;
                }
            }
            StreamEventType::Stop => {
                println!();
                if let Some(response) = event.response {
                    println!(
                        "finish: {:?}, usage: {:?}",
                        response.finish_reason, response.usage
                    );
                }
            }
            _ => {}
        }
    }
    Ok(())
}
