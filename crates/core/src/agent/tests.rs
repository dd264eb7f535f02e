use std::future::ready;

use futures_util::TryStreamExt;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use thoughtloop_model::Role;
use thoughtloop_test_model::TestModelProvider;

use super::tot::Node;
use super::*;
use crate::memory::ConversationMemory;
use crate::tool::{Registry, Tool, ToolResult};
use crate::{Error, ModelClient};

#[derive(Deserialize, JsonSchema)]
struct EchoInput {
    url: String,
}

struct EchoTool {
    schema: Value,
}

impl Tool for EchoTool {
    type Input = EchoInput;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Returns the url as is."
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: EchoInput,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok(input.url))
    }
}

fn tools() -> Registry {
    let mut tools = Registry::new();
    tools
        .register(EchoTool {
            schema: schema_for!(EchoInput).to_value(),
        })
        .unwrap();
    tools
}

fn scripted(responses: &[&str]) -> (TestModelProvider, ModelClient) {
    let mut provider = TestModelProvider::default();
    for response in responses {
        provider.add_text_response(*response);
    }
    let client = ModelClient::new(provider.clone());
    (provider, client)
}

fn prompts(provider: &TestModelProvider) -> Vec<String> {
    provider
        .requests()
        .iter()
        .map(|req| req.messages[0].text().into_owned())
        .collect()
}

#[tokio::test]
async fn test_react_answers_after_action() {
    let (provider, client) =
        scripted(&["行動: echo: http://x", "最終的な答え: http://x"]);
    let mut agent = ReActAgent::new(client, tools(), ReActConfig::default())
        .with_memory(Box::new(ConversationMemory::new()));

    assert_eq!(agent.run("what is x?").await.unwrap(), "http://x");

    let memory = agent.memory().unwrap();
    let roles: Vec<Role> = memory.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [Role::User, Role::Assistant, Role::System, Role::Assistant]
    );
    assert_eq!(memory.messages()[2].text(), "http://x");

    let prompts = prompts(&provider);
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("利用可能な行動:\n- echo: Returns the url as is."));
    assert!(prompts[0].ends_with("質問: what is x?\n"));
    assert!(prompts[1].ends_with("行動: echo: http://x\n観察: http://x\n"));
}

#[tokio::test]
async fn test_react_without_step_recording() {
    let (_, client) = scripted(&["行動: echo: http://x", "最終的な答え: http://x"]);
    let config = ReActConfig {
        record_steps: false,
        ..Default::default()
    };
    let mut agent = ReActAgent::new(client, tools(), config)
        .with_memory(Box::new(ConversationMemory::new()));
    agent.run("q").await.unwrap();
    assert_eq!(agent.memory().unwrap().len(), 2);
}

#[tokio::test]
async fn test_react_run_iter_steps() {
    let (_, client) = scripted(&["行動: echo: http://x", "最終的な答え: done"]);
    let mut agent = ReActAgent::new(client, tools(), ReActConfig::default());
    let steps: Vec<String> = agent.run_iter("q").try_collect().await.unwrap();
    assert_eq!(
        steps,
        ["行動: echo: http://x", "http://x", "最終的な答え: done", "done"]
    );
}

/// A grammar where actions are `CALL <tool> <input>` lines and answers are
/// `DONE <answer>` lines.
struct CommandParser;

impl parser::OutputParser for CommandParser {
    fn parse(&self, output: &str) -> parser::Step {
        let line = output.trim();
        if let Some(answer) = line.strip_prefix("DONE ") {
            return parser::Step::Final(answer.to_owned());
        }
        match line.strip_prefix("CALL ").and_then(|rest| rest.split_once(' ')) {
            Some((tool, input)) => parser::Step::Action {
                tool: tool.to_owned(),
                input: input.to_owned(),
            },
            None => parser::Step::Unrecognized,
        }
    }
}

#[tokio::test]
async fn test_react_with_custom_parser() {
    let (provider, client) = scripted(&[
        "CALL echo http://y",
        "最終的な答え: ignored",
        "DONE http://y",
    ]);
    let mut agent = ReActAgent::new(client, tools(), ReActConfig::default())
        .with_parser(CommandParser)
        .with_memory(Box::new(ConversationMemory::new()));

    let steps: Vec<String> = agent.run_iter("q").try_collect().await.unwrap();
    assert_eq!(
        steps,
        [
            "CALL echo http://y",
            "http://y",
            "最終的な答え: ignored",
            NO_ACTION_IDENTIFIED,
        ]
    );
    assert_eq!(provider.remaining(), 1);

    let (_, client) = scripted(&["CALL echo http://z", "DONE http://z"]);
    let mut agent = ReActAgent::new(client, tools(), ReActConfig::default())
        .with_parser(CommandParser);
    assert_eq!(agent.run("q").await.unwrap(), "http://z");
}

#[tokio::test]
async fn test_memory_mut_clears_agent_memory() {
    let (_, client) = scripted(&["最終的な答え: a"]);
    let mut agent: Box<dyn Agent> = Box::new(
        ReActAgent::new(client, tools(), ReActConfig::default())
            .with_memory(Box::new(ConversationMemory::new())),
    );
    agent.run("q").await.unwrap();
    assert_eq!(agent.memory().map(|memory| memory.len()), Some(2));

    agent.memory_mut().unwrap().clear();
    assert_eq!(agent.memory().map(|memory| memory.len()), Some(0));

    let (_, client) = scripted(&[]);
    let mut agent = CotAgent::new(client, CotConfig::default());
    assert!(agent.memory_mut().is_none());
}

#[tokio::test]
async fn test_react_turn_budget() {
    for max_turns in [1, 3] {
        let responses = vec!["行動: echo: again"; max_turns + 1];
        let (provider, client) = scripted(&responses);
        let config = ReActConfig {
            max_turns,
            ..Default::default()
        };
        let mut agent = ReActAgent::new(client, tools(), config);
        assert_eq!(agent.run("q").await.unwrap(), MAX_TURNS_REACHED);
        assert_eq!(provider.requests().len(), max_turns);
    }
}

#[tokio::test]
async fn test_react_unrecognized_output() {
    let (provider, client) = scripted(&["I don't know", "最終的な答え: late"]);
    let mut agent = ReActAgent::new(client, tools(), ReActConfig::default());
    assert_eq!(agent.run("q").await.unwrap(), NO_ACTION_IDENTIFIED);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn test_react_tool_failures_are_observations() {
    let (provider, client) =
        scripted(&["行動: missing: whatever", "最終的な答え: gave up"]);
    let mut agent = ReActAgent::new(client, tools(), ReActConfig::default());
    assert_eq!(agent.run("q").await.unwrap(), "gave up");
    assert!(prompts(&provider)[1].contains("観察: Unknown tool: missing"));
}

#[tokio::test]
async fn test_react_history_prefix() {
    let (provider, client) = scripted(&["最終的な答え: again"]);
    let mut memory = ConversationMemory::new();
    memory.add(Role::User, "earlier question");
    memory.add(Role::Assistant, "earlier answer");
    let config = ReActConfig {
        history_limit: 1,
        ..Default::default()
    };
    let mut agent =
        ReActAgent::new(client, tools(), config).with_memory(Box::new(memory));
    agent.run("q").await.unwrap();
    let prompt = &prompts(&provider)[0];
    assert!(prompt.starts_with("これまでの会話:\nassistant: earlier answer\n\n"));
    assert!(!prompt.contains("earlier question"));
}

#[tokio::test]
async fn test_react_transport_error() {
    let (_, client) = scripted(&[]);
    let mut agent = ReActAgent::new(client, tools(), ReActConfig::default());
    let err = agent.run("q").await.unwrap_err();
    assert!(matches!(err, Error::Gateway(_)));
}

#[tokio::test]
async fn test_tot_zero_depth() {
    let (provider, client) = scripted(&["最終的な答え: 42"]);
    let config = TotConfig {
        max_depth: 0,
        breadth: 2,
    };
    let mut agent = TotAgent::new(client, |_: &str| 1.0, config);
    assert_eq!(agent.run("q").await.unwrap(), "42");
    assert_eq!(prompts(&provider), ["質問: q\n思考過程:\n\n最終的な答え:"]);
}

#[tokio::test]
async fn test_tot_follows_best_thought() {
    let (provider, client) = scripted(&["- A\n- B", "  B wins  "]);
    let config = TotConfig {
        max_depth: 1,
        breadth: 2,
    };
    let evaluate = |history: &str| if history.contains('B') { 1.0 } else { 0.5 };
    let mut agent = TotAgent::new(client, evaluate, config);
    let steps: Vec<String> = agent.run_iter("q").try_collect().await.unwrap();
    assert_eq!(steps, ["B", "B wins"]);

    let prompts = prompts(&provider);
    assert!(prompts[0].contains("2個の次の思考候補を箇条書きで提案してください。"));
    assert_eq!(prompts[1], "質問: q\n思考過程:\nB\n最終的な答え:");
}

#[tokio::test]
async fn test_tot_stops_without_candidates() {
    let (provider, client) = scripted(&["no bullets here", "最終的な答え: fine"]);
    let config = TotConfig {
        max_depth: 3,
        breadth: 2,
    };
    let mut agent = TotAgent::new(client, |_: &str| 1.0, config);
    assert_eq!(agent.run("q").await.unwrap(), "fine");
    assert_eq!(provider.requests().len(), 2);
}

#[tokio::test]
async fn test_tot_frontier_is_bounded_and_sorted() {
    let (_, client) = scripted(&["- a\n- bb\n- ccc", "- dddd\n- e\n- ff"]);
    let config = TotConfig {
        max_depth: 1,
        breadth: 2,
    };
    let agent = TotAgent::new(client, |h: &str| h.len() as f64, config);
    let frontier = [
        Node {
            history: String::new(),
            score: 0.0,
        },
        Node {
            history: "x".to_owned(),
            score: 0.0,
        },
    ];
    let next = agent.expand("q", &frontier).await.unwrap();
    assert_eq!(next.len(), 2);
    assert!(next.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(next[0].history, "x\ndddd");
    assert_eq!(next[1].history, "x\nff");
}

#[tokio::test]
async fn test_model_evaluator_tolerates_text() {
    let (_, client) = scripted(&["0.75", "promising!"]);
    let evaluator = ModelEvaluator::new(client);
    assert_eq!(evaluator.evaluate("h").await.unwrap(), 0.75);
    assert_eq!(evaluator.evaluate("h").await.unwrap(), 0.0);
}

#[tokio::test]
async fn test_cot_yields_steps() {
    let (_, client) = scripted(&["思考: step", "最終的な答え: ok"]);
    let mut agent = CotAgent::new(client, CotConfig::default());
    let steps: Vec<String> = agent.run_iter("q").try_collect().await.unwrap();
    assert_eq!(steps, ["思考: step", "最終的な答え: ok", "ok"]);
}

#[tokio::test]
async fn test_cot_step_budget() {
    let (provider, client) = scripted(&["思考: a", "思考: b"]);
    let mut agent = CotAgent::new(client, CotConfig { max_steps: 2 });
    assert_eq!(agent.run("q").await.unwrap(), MAX_TURNS_REACHED);
    assert!(prompts(&provider)[1].ends_with("質問: q\n思考: a\n"));
}

#[tokio::test]
async fn test_factory() {
    let cases = [
        (AgentKind::React, vec!["最終的な答え: r"], "r"),
        (AgentKind::Cot, vec!["最終的な答え: c"], "c"),
        (AgentKind::Tot, vec!["- t", "0.5", "最終的な答え: t", "x"], "t"),
    ];
    for (kind, responses, expected) in cases {
        let (_, client) = scripted(&responses);
        let mut context = AgentContext::new(client)
            .with_tools(tools())
            .with_memory(Box::new(ConversationMemory::new()));
        context.tot = TotConfig {
            max_depth: 1,
            breadth: 1,
        };
        let mut agent = build_agent(kind, context);
        assert_eq!(agent.run("q").await.unwrap(), expected, "{kind}");
        assert_eq!(agent.memory().unwrap().len(), 2, "{kind}");
    }
    assert_eq!("ToT".parse::<AgentKind>().unwrap(), AgentKind::Tot);
    assert!("presentation".parse::<AgentKind>().is_err());
}
