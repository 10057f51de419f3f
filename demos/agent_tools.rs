use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::service::ServiceExt;
use rmcp::{schemars, tool, tool_handler, tool_router, ServerHandler};
use serde::Deserialize;
use serde_json::json;
use unichat::mcp::RmcpClient;
use unichat::{
    Agent, ClientConfig, Error, McpClient, McpServer, Message, OpenAi, Thread, Tool,
};

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ConvertArgs {
    #[schemars(description = "Amount in euros")]
    euros: f64,
}

#[derive(Clone)]
struct RateServer {
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl RateServer {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Convert an amount in euros to US dollars")]
    fn to_dollars(&self, Parameters(ConvertArgs { euros }): Parameters<ConvertArgs>) -> String {
        json!({ "dollars": euros * 1.08 }).to_string()
    }
}

#[tool_handler]
impl ServerHandler for RateServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "rate-server".into(),
                version: "1.0".into(),
                ..Default::default()
            },
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// An in-process rmcp server over a duplex pipe; the agent gets a fresh
/// server for every connection it opens.
fn rate_server() -> McpServer {
    McpServer::new("rates", || async {
        let (client_transport, server_transport) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let service = RateServer::new()
                .serve(server_transport)
                .await
                .expect("failed to start rate server");
            let _ = service.waiting().await;
        });
        let service = ()
            .serve(client_transport)
            .await
            .map_err(|e| Error::Mcp(e.to_string()))?;
        Ok(Arc::new(RmcpClient::new(service)) as Arc<dyn McpClient>)
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let api_key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY must be set");

    // A locally-executed tool next to the MCP-backed one.
    let weather = Tool::from_fn(
        "get_weather",
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "The city to look up" }
            },
            "required": ["city"]
        }),
        |arguments| async move {
            Ok(json!({ "city": arguments["city"], "condition": "sunny", "celsius": 22 }))
        },
    )
    .with_description("Get the current weather for a city");

    let client = OpenAi::create(ClientConfig::new(api_key).with_model("gpt-4o-mini"))?;
    let agent = Agent::new(client)
        .with_tool(weather)
        .with_server(rate_server());

    let mut thread = Thread::new();
    let response = agent
        .chat(
            &mut thread,
            vec![Message::user(
                "What is the weather in Oslo, and how much is 50 euros in dollars?",
            )],
        )
        .await?;

    println!("{}", response.text());
    Ok(())
}
