use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use thoughtloop_core::export::{Attachment, ConversationExport, generate_title};
use thoughtloop_core::{
    Agent, AgentRun, AssemblerConfig, Error, Memory, ModelClient, Registry,
    StreamItem, TurnAssembler, spawn_agent,
};
use thoughtloop_model::Message;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;

const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
const DEFAULT_CONVERSATIONS_DIR: &str = "conversations";

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    client: ModelClient,
    tools: Registry,
    max_tool_rounds: usize,
    conversations_dir: PathBuf,
    system_prompt: Option<String>,
    agent: Option<Box<dyn Agent>>,
}

impl SessionBuilder {
    /// Creates a session builder talking to the model through `client`.
    pub fn with_model_client(client: ModelClient) -> Self {
        Self {
            client,
            tools: Registry::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            conversations_dir: PathBuf::from(DEFAULT_CONVERSATIONS_DIR),
            system_prompt: None,
            agent: None,
        }
    }

    /// Sets the tools the model may call during a chat turn.
    #[inline]
    pub fn with_tools(mut self, tools: Registry) -> Self {
        self.tools = tools;
        self
    }

    /// Sets how many tool rounds a single chat turn may take.
    #[inline]
    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    /// Sets the directory conversations are exported to.
    #[inline]
    pub fn with_conversations_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.conversations_dir = dir.into();
        self
    }

    /// Sets the system prompt that starts every chat.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Routes every message through `agent` instead of a plain chat turn.
    #[inline]
    pub fn with_agent(mut self, agent: Box<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Session {
        let assembler = TurnAssembler::new(
            self.client,
            self.tools,
            AssemblerConfig::new(self.max_tool_rounds),
        );
        let mut session = Session {
            assembler,
            system_prompt: self.system_prompt,
            conversations_dir: self.conversations_dir,
            messages: vec![],
            attachments: vec![],
            title: None,
            agent: self.agent,
            pending: None,
        };
        session.reset();
        session
    }
}

enum Pending {
    Turn(JoinHandle<Vec<Message>>),
    Agent {
        question: String,
        handle: JoinHandle<AgentRun>,
    },
}

/// A chat session, like a window that displays messages and has a input box.
///
/// Each message runs on a background task whose output is delivered through
/// the receiver returned by [`Session::send_message`]. The session catches
/// up with the finished task on the next call that needs its state.
pub struct Session {
    assembler: TurnAssembler,
    system_prompt: Option<String>,
    conversations_dir: PathBuf,
    messages: Vec<Message>,
    attachments: Vec<Attachment>,
    title: Option<String>,
    agent: Option<Box<dyn Agent>>,
    pending: Option<Pending>,
}

impl Session {
    /// Sends a message to the session and returns the stream of its reply.
    ///
    /// The first message of a chat also names the chat.
    pub async fn send_message(
        &mut self,
        message: &str,
    ) -> Result<UnboundedReceiver<StreamItem>, Error> {
        self.prepare(message).await;

        if let Some(agent) = self.agent.take() {
            let (handle, rx) = spawn_agent(agent, message.to_owned());
            self.pending = Some(Pending::Agent {
                question: message.to_owned(),
                handle,
            });
            return Ok(rx);
        }

        self.messages.push(Message::user(message));
        let (handle, rx) = self.assembler.spawn_turn(self.messages.clone());
        self.pending = Some(Pending::Turn(handle));
        Ok(rx)
    }

    /// Sends a message and waits for the final answer.
    pub async fn ask(&mut self, message: &str) -> Result<String, Error> {
        self.prepare(message).await;

        if let Some(agent) = self.agent.as_mut() {
            let mut transcript = String::new();
            let mut answer = String::new();
            {
                let mut steps = agent.run_iter(message);
                while let Some(step) = steps.next().await {
                    answer = step?;
                    transcript.push_str(&answer);
                    transcript.push('\n');
                }
            }
            self.record_agent_run(message.to_owned(), transcript);
            return Ok(answer);
        }

        self.messages.push(Message::user(message));
        let (tx, _rx) = unbounded_channel();
        self.assembler.run_turn(&mut self.messages, &tx).await?;
        Ok(self
            .messages
            .last()
            .map(|message| message.text().into_owned())
            .unwrap_or_default())
    }

    async fn prepare(&mut self, message: &str) {
        self.sync().await;
        if self.title.is_none() {
            let title = generate_title(self.assembler.client(), message).await;
            debug!("chat titled {title:?}");
            self.title = Some(title);
        }
    }

    /// Waits for the running reply, if any, and takes over its results.
    pub async fn sync(&mut self) {
        match self.pending.take() {
            None => {}
            Some(Pending::Turn(handle)) => match handle.await {
                Ok(messages) => self.messages = messages,
                Err(err) => error!("chat turn aborted: {err}"),
            },
            Some(Pending::Agent { question, handle }) => match handle.await {
                Ok(run) => {
                    self.agent = Some(run.agent);
                    if let Some(transcript) = run.transcript {
                        self.record_agent_run(question, transcript);
                    }
                }
                Err(err) => error!("agent run aborted: {err}"),
            },
        }
    }

    /// Agent runs are kept as the question and every step, one per line.
    fn record_agent_run(&mut self, question: String, transcript: String) {
        self.messages.push(Message::user(question));
        self.messages.push(Message::assistant(transcript));
    }

    /// Exports the chat into the conversations directory.
    ///
    /// Returns `None` if nothing has been said yet.
    pub async fn save_conversation(&mut self) -> Result<Option<PathBuf>, Error> {
        self.sync().await;
        let Some(title) = &self.title else {
            return Ok(None);
        };
        let export = ConversationExport::new(
            title,
            self.assembler.client().model_id(),
            self.messages.clone(),
            &self.attachments,
        );
        export.save_in(&self.conversations_dir).map(Some)
    }

    /// Replaces the chat with one read from an export file.
    ///
    /// Attachments come back with their names and types only.
    pub async fn load_conversation(&mut self, path: &Path) -> Result<(), Error> {
        let export = ConversationExport::load(path)?;
        self.sync().await;
        self.title = (!export.title.is_empty()).then_some(export.title);
        self.messages = export.messages;
        self.attachments = export
            .uploaded_files_metadata
            .into_iter()
            .map(Attachment::from)
            .collect();
        info!("loaded conversation from {}", path.display());
        Ok(())
    }

    /// Starts over with an empty chat and an empty agent memory.
    ///
    /// A reply that is still running is waited for first.
    pub async fn new_chat(&mut self) {
        self.sync().await;
        self.reset();
        if let Some(memory) = self.agent.as_mut().and_then(|agent| agent.memory_mut()) {
            debug!("clearing {} messages of agent memory", memory.len());
            memory.clear();
        }
    }

    fn reset(&mut self) {
        self.messages.clear();
        if let Some(prompt) = &self.system_prompt {
            self.messages.push(Message::system(prompt.as_str()));
        }
        self.attachments.clear();
        self.title = None;
    }

    /// Attaches a file to the chat. Only its name and type are exported.
    pub fn attach(&mut self, attachment: Attachment) {
        info!("attached {} ({})", attachment.name, attachment.kind);
        self.attachments.push(attachment);
    }

    /// Returns the messages of the chat, as of the last sync.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the title of the chat, if it has been named.
    #[inline]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Returns the directory conversations are exported to.
    #[inline]
    pub fn conversations_dir(&self) -> &Path {
        &self.conversations_dir
    }

    /// Returns the memory of the agent, if the session has an agent that is
    /// not answering right now.
    pub fn agent_memory(&self) -> Option<&dyn Memory> {
        self.agent.as_deref().and_then(|agent| agent.memory())
    }
}

#[cfg(test)]
mod tests {
    use thoughtloop_core::agent::{ReActAgent, ReActConfig};
    use thoughtloop_core::memory::ConversationMemory;
    use thoughtloop_core::ASSISTANT_PREFIX;
    use thoughtloop_model::Role;
    use thoughtloop_test_model::TestModelProvider;

    use super::*;

    fn session(responses: &[&str]) -> (TestModelProvider, SessionBuilder) {
        let mut provider = TestModelProvider::default();
        for response in responses {
            provider.add_text_response(*response);
        }
        let client = ModelClient::new(provider.clone());
        (provider, SessionBuilder::with_model_client(client))
    }

    async fn drain(mut rx: UnboundedReceiver<StreamItem>) -> Vec<StreamItem> {
        let mut items = vec![];
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_chat_turn() {
        let dir = tempfile::tempdir().unwrap();
        let (provider, builder) = session(&["Greetings", "Hello!"]);
        let mut session = builder
            .with_system_prompt("Be nice.")
            .with_conversations_dir(dir.path())
            .build();

        let rx = session.send_message("Hi").await.unwrap();
        let items = drain(rx).await;
        assert_eq!(items[0], StreamItem::Text(ASSISTANT_PREFIX.to_owned()));
        assert_eq!(items.last(), Some(&StreamItem::Persist));

        session.sync().await;
        assert_eq!(session.title(), Some("Greetings"));
        let roles: Vec<_> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Assistant]);
        assert_eq!(session.messages()[2].text(), "Hello!");
        assert_eq!(provider.requests().len(), 2);

        let path = session.save_conversation().await.unwrap().unwrap();
        assert!(path.starts_with(dir.path()));
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved["title"], "Greetings");
        assert_eq!(saved["model"], "test-model");
        assert_eq!(saved["messages"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_new_chat() {
        let (_, builder) = session(&["Title", "Answer"]);
        let mut session = builder.build();
        session.attach(Attachment {
            name: "notes.txt".to_owned(),
            kind: "text/plain".to_owned(),
            content: b"secret".to_vec(),
        });
        assert_eq!(session.ask("Question").await.unwrap(), "Answer");
        assert_eq!(session.messages().len(), 2);

        session.new_chat().await;
        assert!(session.messages().is_empty());
        assert_eq!(session.title(), None);
        assert_eq!(session.save_conversation().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_turn() {
        let (_, builder) = session(&["Title"]);
        let mut session = builder.build();
        let items = drain(session.send_message("Hi").await.unwrap()).await;
        assert!(matches!(items.last(), Some(StreamItem::Failed(_))));
        assert!(!items.contains(&StreamItem::Persist));

        session.sync().await;
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_agent_session() {
        let (provider, builder) = session(&[
            "Title",
            "最終的な答え: 42",
            "最終的な答え: 43",
        ]);
        let client = ModelClient::new(provider.clone());
        let agent = ReActAgent::new(client, Registry::new(), ReActConfig::default())
            .with_memory(Box::new(ConversationMemory::default()));
        let mut session = builder.with_agent(Box::new(agent)).build();

        let items = drain(session.send_message("question").await.unwrap()).await;
        assert_eq!(
            items,
            [
                StreamItem::Text(ASSISTANT_PREFIX.to_owned()),
                StreamItem::Text("最終的な答え: 42\n".to_owned()),
                StreamItem::Text("42\n".to_owned()),
                StreamItem::Persist,
            ]
        );
        assert!(session.agent_memory().is_none());

        session.sync().await;
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.agent_memory().map(|memory| memory.len()), Some(2));

        assert_eq!(session.ask("again").await.unwrap(), "43");
        let texts: Vec<_> = session.messages().iter().map(|m| m.text()).collect();
        assert_eq!(
            texts,
            [
                "question",
                "最終的な答え: 42\n42\n",
                "again",
                "最終的な答え: 43\n43\n",
            ]
        );
    }

    fn agent_session(responses: &[&str]) -> Session {
        let (provider, builder) = session(responses);
        let client = ModelClient::new(provider);
        let agent = ReActAgent::new(client, Registry::new(), ReActConfig::default())
            .with_memory(Box::new(ConversationMemory::default()));
        builder.with_agent(Box::new(agent)).build()
    }

    #[tokio::test]
    async fn test_agent_kept_across_new_chat() {
        let mut session = agent_session(&[
            "Title",
            "最終的な答え: 42",
            "Second title",
            "最終的な答え: 43",
        ]);
        drain(session.send_message("q1").await.unwrap()).await;

        session.new_chat().await;
        assert!(session.messages().is_empty());
        assert_eq!(session.agent_memory().map(|memory| memory.len()), Some(0));

        let items = drain(session.send_message("q2").await.unwrap()).await;
        assert_eq!(
            items,
            [
                StreamItem::Text(ASSISTANT_PREFIX.to_owned()),
                StreamItem::Text("最終的な答え: 43\n".to_owned()),
                StreamItem::Text("43\n".to_owned()),
                StreamItem::Persist,
            ]
        );
        session.sync().await;
        assert_eq!(session.title(), Some("Second title"));
        let memory = session.agent_memory().unwrap();
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.messages()[0].text(), "q2");
    }

    #[tokio::test]
    async fn test_new_chat_clears_agent_memory() {
        let mut session = agent_session(&["Title", "最終的な答え: 42"]);
        assert_eq!(session.ask("q1").await.unwrap(), "42");
        assert_eq!(session.agent_memory().map(|memory| memory.len()), Some(2));

        session.new_chat().await;
        assert_eq!(session.agent_memory().map(|memory| memory.len()), Some(0));
    }

    #[tokio::test]
    async fn test_load_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let (_, builder) = session(&["旅行の計画", "いいですね"]);
        let mut session = builder.with_conversations_dir(dir.path()).build();
        session.attach(Attachment {
            name: "map.png".to_owned(),
            kind: "image/png".to_owned(),
            content: vec![0x89, 0x50],
        });
        session.ask("京都へ行きたい").await.unwrap();
        let path = session.save_conversation().await.unwrap().unwrap();
        let saved = session.messages().to_vec();

        session.new_chat().await;
        session.load_conversation(&path).await.unwrap();
        assert_eq!(session.title(), Some("旅行の計画"));
        assert_eq!(session.messages(), saved.as_slice());

        let path = session.save_conversation().await.unwrap().unwrap();
        let resaved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(
            resaved["uploaded_files_metadata"],
            serde_json::json!([{"name": "map.png", "type": "image/png"}])
        );

        let err = session.load_conversation(&dir.path().join("none.json")).await;
        assert!(matches!(err, Err(Error::Io(_))));
        assert_eq!(session.title(), Some("旅行の計画"));
    }
}
