//! Agent loop: chat with automatic tool execution.

use std::pin::Pin;

use async_stream::try_stream;
use futures::future::join_all;
use futures::{Future, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ChatClient;
use crate::error::Error;
use crate::mcp::{close_all, McpConnection, McpServer};
use crate::model::{
    ChatRequest, ChatResponse, ContentBlock, GenerationConfig, Message, StreamEvent,
    StreamEventType, ToolCall, ToolChoice, Usage,
};
use crate::registry::{ToolOutcome, ToolRegistry};
use crate::thread::Thread;
use crate::tools::Tool;

pub const DEFAULT_MAX_TURNS: usize = 16;

/// Drives a model-call / tool-execution loop over a [`Thread`].
///
/// Unlike a raw [`ChatClient`], an `Agent` handles tool execution:
/// 1. Sends the thread with tool definitions from its registry
/// 2. Receives a response that may contain tool calls
/// 3. Executes the named tools (locally or over MCP)
/// 4. Appends the results to the thread
/// 5. Loops until the model stops calling tools
///
/// MCP connections are opened at the start of each call and closed before it
/// returns, whichever way it ends.
///
/// # Example
/// ```ignore
/// let client = OpenAi::create(ClientConfig::new(api_key).with_model("gpt-4o"))?;
/// let agent = Agent::new(client)
///     .with_tool(weather_tool)
///     .with_server(McpServer::streamable_http("search", "http://localhost:8080/mcp"));
///
/// let mut thread = Thread::new();
/// let response = agent.chat(&mut thread, vec![Message::user("Weather in Oslo?")]).await?;
/// ```
pub struct Agent<C: ChatClient> {
    client: C,
    tools: Vec<Tool>,
    servers: Vec<McpServer>,
    model: Option<String>,
    generation: Option<GenerationConfig>,
    tool_choice: Option<ToolChoice>,
    max_turns: usize,
}

impl<C: ChatClient> Agent<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            tools: Vec::new(),
            servers: Vec::new(),
            model: None,
            generation: None,
            tool_choice: None,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Register a locally-executed tool.
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Register an MCP server whose tools join the registry on each call.
    pub fn with_server(mut self, server: McpServer) -> Self {
        self.servers.push(server);
        self
    }

    /// Override the model for requests made by this agent.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    /// Cap the number of model calls in one `chat`/`stream` invocation.
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run the tool loop to completion and return the final response.
    ///
    /// `messages` are appended to the thread first; every assistant and tool
    /// message produced along the way is appended too, so the thread holds
    /// the full conversation afterwards. The returned response carries the
    /// usage accumulated across all turns.
    pub async fn chat(
        &self,
        thread: &mut Thread,
        messages: Vec<Message>,
    ) -> Result<ChatResponse, Error> {
        self.run_chat(thread, messages, None).await
    }

    /// Like [`Agent::chat`], aborting with [`Error::Cancelled`] when the
    /// token fires. MCP connections are still closed on cancellation.
    pub async fn chat_with_cancel(
        &self,
        thread: &mut Thread,
        messages: Vec<Message>,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, Error> {
        self.run_chat(thread, messages, Some(cancel)).await
    }

    async fn run_chat(
        &self,
        thread: &mut Thread,
        messages: Vec<Message>,
        cancel: Option<CancellationToken>,
    ) -> Result<ChatResponse, Error> {
        let mut connections = Vec::new();
        let result = self
            .connect_and_drive(thread, messages, &mut connections, cancel.as_ref())
            .await;
        close_all(&mut connections).await;
        result
    }

    async fn connect_and_drive(
        &self,
        thread: &mut Thread,
        messages: Vec<Message>,
        connections: &mut Vec<McpConnection>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChatResponse, Error> {
        for server in &self.servers {
            connections.push(server.connect().await?);
        }
        // Build the registry before touching the thread: a collision or MCP
        // failure must not leave half a conversation behind.
        let registry = ToolRegistry::build(&self.tools, connections).await?;
        thread.ingest(messages);
        self.drive(thread, &registry, cancel).await
    }

    async fn drive(
        &self,
        thread: &mut Thread,
        registry: &ToolRegistry,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChatResponse, Error> {
        let mut total_usage: Option<Usage> = None;

        for turn in 0..self.max_turns {
            debug!(turn = turn + 1, max_turns = self.max_turns, "agent turn");

            let request = self.build_request(thread, registry);
            let response = with_cancellation(self.client.chat(request), cancel).await??;

            merge_total(&mut total_usage, response.usage);
            thread.push(response.message.clone());

            let calls = response.message.tool_calls();
            if calls.is_empty() || registry.is_empty() {
                let mut response = response;
                response.usage = total_usage;
                return Ok(response);
            }

            let results = self.execute_calls(registry, &calls, cancel).await?;
            thread.push(Message::tool_results(results));
        }

        warn!(max_turns = self.max_turns, "agent loop hit the turn limit");
        Err(Error::MaxTurns(self.max_turns))
    }

    /// Streaming variant of [`Agent::chat`].
    ///
    /// Start and text-delta events from every turn are forwarded as they
    /// arrive. Stop events of intermediate turns are consumed; the single
    /// stop event at the end carries the final response with accumulated
    /// usage. A provider error event ends the stream with no stop after it.
    pub fn stream<'a>(
        &'a self,
        thread: &'a mut Thread,
        messages: Vec<Message>,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send + 'a>> {
        self.run_stream(thread, messages, None)
    }

    /// Like [`Agent::stream`], aborting when the token fires.
    pub fn stream_with_cancel<'a>(
        &'a self,
        thread: &'a mut Thread,
        messages: Vec<Message>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send + 'a>> {
        self.run_stream(thread, messages, Some(cancel))
    }

    fn run_stream<'a>(
        &'a self,
        thread: &'a mut Thread,
        messages: Vec<Message>,
        cancel: Option<CancellationToken>,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send + 'a>> {
        Box::pin(try_stream! {
            let mut connections: Vec<McpConnection> = Vec::new();
            let mut failure: Option<Error> = None;

            for server in &self.servers {
                match server.connect().await {
                    Ok(connection) => connections.push(connection),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            let mut registry = None;
            if failure.is_none() {
                match ToolRegistry::build(&self.tools, &connections).await {
                    Ok(built) => registry = Some(built),
                    Err(err) => failure = Some(err),
                }
            }

            if let Some(registry) = &registry {
                thread.ingest(messages);
                let mut total_usage: Option<Usage> = None;
                let mut turn = 0;

                loop {
                    if turn == self.max_turns {
                        warn!(max_turns = self.max_turns, "agent loop hit the turn limit");
                        failure = Some(Error::MaxTurns(self.max_turns));
                        break;
                    }
                    turn += 1;
                    debug!(turn, max_turns = self.max_turns, "agent turn");

                    let request = self.build_request(thread, registry);
                    let mut events = match with_cancellation(self.client.stream(request), cancel.as_ref()).await {
                        Ok(Ok(events)) => events,
                        Ok(Err(err)) | Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    };

                    let mut turn_response: Option<ChatResponse> = None;
                    let mut ended_early = false;

                    loop {
                        let event = match with_cancellation(events.next(), cancel.as_ref()).await {
                            Ok(Some(Ok(event))) => event,
                            Ok(Some(Err(err))) => {
                                failure = Some(err);
                                break;
                            }
                            Ok(None) => break,
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        };
                        match event.event_type {
                            StreamEventType::Stop => turn_response = event.response,
                            StreamEventType::Error => {
                                ended_early = true;
                                yield event;
                                break;
                            }
                            _ => yield event,
                        }
                    }
                    if ended_early || failure.is_some() {
                        break;
                    }

                    let Some(response) = turn_response else {
                        failure = Some(Error::Protocol(
                            "stream ended without a stop event".to_string(),
                        ));
                        break;
                    };

                    merge_total(&mut total_usage, response.usage);
                    thread.push(response.message.clone());

                    let calls = response.message.tool_calls();
                    if calls.is_empty() || registry.is_empty() {
                        let mut response = response;
                        response.usage = total_usage;
                        yield StreamEvent::stop(response);
                        break;
                    }

                    match self.execute_calls(registry, &calls, cancel.as_ref()).await {
                        Ok(results) => thread.push(Message::tool_results(results)),
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
            }

            close_all(&mut connections).await;
            if let Some(err) = failure {
                Err::<(), Error>(err)?;
            }
        })
    }

    fn build_request(&self, thread: &Thread, registry: &ToolRegistry) -> ChatRequest {
        let mut request = ChatRequest::new(thread.history().to_vec());
        request.model = self.model.clone();
        request.generation = self.generation.clone();
        request.tool_choice = self.tool_choice.clone();
        request.previous_response_id = thread.previous_response_id().map(str::to_string);
        if !registry.is_empty() {
            request.tools = registry.definitions();
        }
        request
    }

    async fn execute_calls(
        &self,
        registry: &ToolRegistry,
        calls: &[ToolCall],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ContentBlock>, Error> {
        // A result block without a call id cannot be paired by any provider,
        // so an id-less call is fatal rather than silently mismatched.
        for call in calls {
            if call.call_id.trim().is_empty() {
                return Err(Error::Protocol(format!(
                    "tool call `{}` arrived without a call id",
                    call.name
                )));
            }
        }

        debug!(count = calls.len(), "executing tool calls");
        let outcomes = with_cancellation(
            join_all(calls.iter().map(|call| registry.execute(call))),
            cancel,
        )
        .await?;
        Ok(outcomes.into_iter().map(ToolOutcome::into_block).collect())
    }
}

fn merge_total(total: &mut Option<Usage>, usage: Option<Usage>) {
    if let Some(usage) = usage {
        *total = Some(match total.take() {
            Some(total) => total + usage,
            None => usage,
        });
    }
}

async fn with_cancellation<F: Future>(
    future: F,
    cancel: Option<&CancellationToken>,
) -> Result<F::Output, Error> {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                output = future => Ok(output),
            }
        }
        None => Ok(future.await),
    }
}
