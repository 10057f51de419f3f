use unichat::{Agent, ClientConfig, GenerationConfig, Message, OpenAi, Thread};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY must be set");

    let client = OpenAi::create(ClientConfig::new(api_key).with_model("gpt-4o-mini"))?;
    let agent = Agent::new(client).with_generation(GenerationConfig::new().with_temperature(0.7));

    let mut thread = Thread::new();
    let response = agent
        .chat(
            &mut thread,
            vec![
                Message::system("You answer in one short paragraph."),
                Message::user("Why is the sky blue?"),
            ],
        )
        .await?;

    println!("{}", response.text());
    if let Some(usage) = response.usage {
        println!(
            "tokens: {:?} in, {:?} out",
            usage.input_tokens, usage.output_tokens
        );
    }
    Ok(())
}
