//! Retrieval-augmented assistant replies.
//!
//! Stages, in order:
//! 1. `shortcut` - deterministic price answers, no model call
//! 2. `entities` - pronoun follow-ups get recent names appended to the query
//! 3. `retrieval` - title-scoped and bare searches, deduplicated
//! 4. `rerank` - model-judged narrowing when there are many candidates
//! 5. `context` - room line, entry lines, market snapshot
//! 6. `detail` - "tell me more" pulls the full linked content
//! 7. generation with the last few turns of room history
//!
//! Replies run on their own task; failures are logged and the room simply
//! gets no reply.

pub mod context;
pub mod detail;
pub mod entities;
pub mod rerank;
pub mod retrieval;
pub mod shortcut;

use shared_types::RoomMessage;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::actors::room::{RoomContext, RoomHandle};
use crate::collaborators::{
    ChatTurn, GenerationRequest, LanguageModel, ModelError, PageFetcher, SearchIndex, TurnRole,
};

/// Prior messages handed to the model as conversation history.
pub const HISTORY_TURNS: usize = 3;

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    /// Reserved author name and `@` mention handle.
    pub identity: String,
    /// Links on this host resolve through the index instead of HTTP.
    pub internal_host: Option<String>,
}

/// One question to answer.
#[derive(Debug, Clone, Default)]
pub struct ReplyRequest {
    /// Room (or topic) context the question is asked in.
    pub room: RoomContext,
    /// Index entry never offered as a candidate (the room's own subject).
    pub exclude_id: String,
    pub question: String,
    /// Earlier room messages, oldest first, not including the question.
    pub recent: Vec<RoomMessage>,
    /// Caller-supplied context placed ahead of retrieved context.
    pub extra_context: Vec<String>,
}

pub struct AssistantPipeline {
    index: Arc<dyn SearchIndex>,
    model: Arc<dyn LanguageModel>,
    fetcher: Arc<dyn PageFetcher>,
    settings: AssistantSettings,
}

impl AssistantPipeline {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        model: Arc<dyn LanguageModel>,
        fetcher: Arc<dyn PageFetcher>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            index,
            model,
            fetcher,
            settings,
        }
    }

    pub fn identity(&self) -> &str {
        &self.settings.identity
    }

    fn is_mention(&self, token: &str) -> bool {
        token
            .trim_end_matches(|c: char| !c.is_alphanumeric())
            .strip_prefix('@')
            .is_some_and(|name| name.eq_ignore_ascii_case(&self.settings.identity))
    }

    /// True when the text addresses the assistant as `@identity`.
    pub fn mentions_assistant(&self, text: &str) -> bool {
        text.split_whitespace().any(|token| self.is_mention(token))
    }

    pub fn strip_mention(&self, text: &str) -> String {
        text.split_whitespace()
            .filter(|token| !self.is_mention(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn system_prompt(&self, room: &RoomContext) -> String {
        let about = if room.title.trim().is_empty() {
            String::new()
        } else {
            format!(" about \"{}\"", room.title.trim())
        };
        format!(
            "You are {}, an assistant taking part in a group discussion{}. \
             Answer the latest question in a few sentences, grounded in the provided context, \
             and cite source URLs when you use them. If the context does not cover the \
             question, say so briefly instead of guessing.",
            self.settings.identity, about
        )
    }

    /// Run the full pipeline for one question.
    ///
    /// `on_progress` is called at most once, before a slow full-content fetch.
    pub async fn respond<F>(&self, request: ReplyRequest, on_progress: F) -> Result<String, ModelError>
    where
        F: FnOnce(&str) + Send,
    {
        let question = self.strip_mention(&request.question);

        if let Some(answer) = shortcut::try_answer(self.index.as_ref(), &question).await {
            tracing::debug!(question = %question, "Answered from price shortcut");
            return Ok(answer);
        }

        let query = entities::resolve_query(&question, &request.recent);
        let candidates = retrieval::retrieve_candidates(
            self.index.as_ref(),
            &request.room.title,
            &query,
            &request.exclude_id,
        )
        .await;
        let selected = rerank::rerank(self.model.as_ref(), &question, candidates).await;

        let mut context = request.extra_context.clone();
        context.extend(context::assemble(&request.room, &selected));
        context::inject_market_data(
            self.index.as_ref(),
            &question,
            &request.room.topic,
            &mut context,
        )
        .await;

        let mut prompt_question = question.clone();
        if detail::is_more_detail_request(&question) {
            if let Some(url) = detail::pick_detail_url(&request.room, &context, &request.recent) {
                on_progress(detail::PROGRESS_NOTICE);
                if let Some(full) = detail::fetch_detail(
                    self.index.as_ref(),
                    self.fetcher.as_ref(),
                    &url,
                    self.settings.internal_host.as_deref(),
                )
                .await
                {
                    context.insert(0, full);
                }
                prompt_question = format!("{question}\n\n{}", detail::PROGRESS_ANNOTATION);
            }
        }

        let generation = GenerationRequest {
            system: self.system_prompt(&request.room),
            history: history_turns(&request.recent),
            context,
            question: prompt_question,
        };
        tracing::debug!(
            context_items = generation.context.len(),
            history = generation.history.len(),
            "Generating assistant reply"
        );
        self.model.generate(&generation).await
    }

    /// Non-room variant used by `POST /room`.
    pub async fn answer_single_shot(
        &self,
        prompt: &str,
        extra_context: Option<&str>,
        topic: &str,
    ) -> Result<String, ModelError> {
        let request = ReplyRequest {
            room: RoomContext {
                title: topic.to_string(),
                topic: topic.to_string(),
                ..Default::default()
            },
            question: prompt.to_string(),
            extra_context: extra_context
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|c| vec![c.to_string()])
                .unwrap_or_default(),
            ..Default::default()
        };
        self.respond(request, |_| {}).await
    }

    /// Opening message for a quiet topic room.
    pub async fn greet(&self, room: &RoomContext) -> Result<String, ModelError> {
        let topic = if room.topic.is_empty() {
            room.title.as_str()
        } else {
            room.topic.as_str()
        };
        let generation = GenerationRequest {
            system: self.system_prompt(room),
            history: Vec::new(),
            context: context::room_line(room).into_iter().collect(),
            question: format!(
                "Nobody has said anything yet in the {topic} room. Write one or two friendly \
                 sentences that open the conversation with a question or observation about {topic}."
            ),
        };
        self.model.generate(&generation).await
    }

    /// Answer `question` in `room` on a separate task and broadcast the result.
    ///
    /// `on_reply` runs only once a reply has been broadcast; the task yields
    /// whether that happened.
    pub fn spawn_room_reply(
        self: &Arc<Self>,
        room: RoomHandle,
        question: String,
        asked_by: String,
        on_reply: impl FnOnce() + Send + 'static,
    ) -> JoinHandle<bool> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let mut recent = match room.history().await {
                Ok(history) => history,
                Err(e) => {
                    tracing::warn!(room_id = %room.id(), error = %e, "History unavailable for reply");
                    Vec::new()
                }
            };
            if recent
                .last()
                .is_some_and(|m| !m.is_assistant && m.author == asked_by && m.content == question)
            {
                recent.pop();
            }

            let request = ReplyRequest {
                room: room.context(),
                exclude_id: room.id().subject().to_string(),
                question,
                recent,
                extra_context: Vec::new(),
            };

            let identity = pipeline.identity().to_string();
            let progress_room = room.clone();
            let progress = move |notice: &str| {
                if let Err(e) = progress_room.broadcast(RoomMessage::assistant(identity, notice)) {
                    tracing::debug!(error = %e, "Progress notice dropped");
                }
            };

            match pipeline.respond(request, progress).await {
                Ok(reply) => {
                    let message = RoomMessage::assistant(pipeline.identity(), reply);
                    match room.broadcast(message) {
                        Ok(()) => {
                            on_reply();
                            true
                        }
                        Err(e) => {
                            tracing::debug!(room_id = %room.id(), error = %e, "Assistant reply dropped");
                            false
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(room_id = %room.id(), error = %e, "Assistant reply failed");
                    false
                }
            }
        })
    }
}

fn history_turns(recent: &[RoomMessage]) -> Vec<ChatTurn> {
    let skip = recent.len().saturating_sub(HISTORY_TURNS);
    recent[skip..]
        .iter()
        .map(|m| ChatTurn {
            role: if m.is_assistant {
                TurnRole::Assistant
            } else {
                TurnRole::User
            },
            author: m.author.clone(),
            content: m.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::room::RoomArguments;
    use crate::collaborators::{FetchError, IndexEntry, InMemoryIndex};
    use async_trait::async_trait;
    use chrono::Utc;
    use shared_types::PriceQuote;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        replies: Mutex<Vec<String>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl RecordingModel {
        fn with_replies(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(ToString::to_string).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or(ModelError::EmptyResponse)
        }
    }

    struct StaticFetcher;

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch_text(&self, _url: &str, _max_chars: usize) -> Result<String, FetchError> {
            Ok("full external text".to_string())
        }
    }

    fn pipeline(index: InMemoryIndex, model: Arc<RecordingModel>) -> AssistantPipeline {
        AssistantPipeline::new(
            Arc::new(index),
            model,
            Arc::new(StaticFetcher),
            AssistantSettings {
                identity: "micro".to_string(),
                internal_host: None,
            },
        )
    }

    fn entry(id: &str, title: &str, content: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            title: title.to_string(),
            summary: String::new(),
            content: content.to_string(),
            url: format!("https://news.example/{id}"),
            topic: None,
        }
    }

    #[test]
    fn test_mentions() {
        let p = pipeline(InMemoryIndex::new(), Arc::new(RecordingModel::default()));
        assert!(p.mentions_assistant("@micro what is up"));
        assert!(p.mentions_assistant("hey @Micro, thoughts?"));
        assert!(!p.mentions_assistant("micro is a word"));
        assert!(!p.mentions_assistant("@microsoft news"));
        assert_eq!(p.strip_mention("hey @micro, thoughts?"), "hey thoughts?");
    }

    #[test]
    fn test_history_keeps_last_three_turns() {
        let recent: Vec<RoomMessage> = (0..6)
            .map(|i| RoomMessage::user("ada", format!("m{i}")))
            .chain(std::iter::once(RoomMessage::assistant("micro", "reply")))
            .collect();
        let turns = history_turns(&recent);
        assert_eq!(turns.len(), HISTORY_TURNS);
        assert_eq!(turns[0].content, "m4");
        assert_eq!(turns[2].role, TurnRole::Assistant);
    }

    // ============================================================================
    // Test: Price shortcut never reaches the model
    // ============================================================================

    #[tokio::test]
    async fn test_price_shortcut_skips_model() {
        let index = InMemoryIndex::new();
        index.set_price(PriceQuote {
            symbol: "BTC".to_string(),
            name: "Bitcoin".to_string(),
            price_usd: 64_000.0,
            change_24h_pct: None,
            as_of: Utc::now(),
        });
        let model = Arc::new(RecordingModel::default());
        let p = pipeline(index, model.clone());

        let reply = p
            .respond(
                ReplyRequest {
                    question: "@micro btc price".to_string(),
                    ..Default::default()
                },
                |_| {},
            )
            .await
            .unwrap();
        assert!(reply.starts_with("Bitcoin (BTC) is trading at $64,000.00"));
        assert!(model.requests().is_empty());
    }

    // ============================================================================
    // Test: Full pipeline assembles context and history
    // ============================================================================

    #[tokio::test]
    async fn test_respond_builds_context_from_retrieval() {
        let index = InMemoryIndex::new();
        index.insert(entry("42", "Fed holds rates", "The Fed held rates steady."));
        index.insert(entry("7", "Rates and housing", "Mortgage rates stay high."));
        let model = Arc::new(RecordingModel::with_replies(&["Rates are unchanged."]));
        let p = pipeline(index, model.clone());

        let reply = p
            .respond(
                ReplyRequest {
                    room: RoomContext {
                        title: "Fed holds rates".to_string(),
                        ..Default::default()
                    },
                    exclude_id: "42".to_string(),
                    question: "@micro what about mortgage rates?".to_string(),
                    recent: vec![RoomMessage::user("ada", "interesting news")],
                    extra_context: Vec::new(),
                },
                |_| panic!("no progress notice expected"),
            )
            .await
            .unwrap();
        assert_eq!(reply, "Rates are unchanged.");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        let generation = &requests[0];
        assert_eq!(generation.question, "what about mortgage rates?");
        assert_eq!(generation.context[0], "Current discussion: Fed holds rates");
        assert!(generation.context[1].starts_with("Rates and housing: Mortgage rates stay high."));
        assert!(generation.context.iter().all(|c| !c.contains("/42)")));
        assert_eq!(generation.history.len(), 1);
        assert!(generation.system.contains("You are micro"));
    }

    // ============================================================================
    // Test: "Tell me more" sends a progress notice and fetches the source
    // ============================================================================

    #[tokio::test]
    async fn test_more_detail_fetches_source_and_annotates() {
        let model = Arc::new(RecordingModel::with_replies(&["Here is more."]));
        let p = pipeline(InMemoryIndex::new(), model.clone());
        let notices = Mutex::new(Vec::new());

        let reply = p
            .respond(
                ReplyRequest {
                    room: RoomContext {
                        title: "Story".to_string(),
                        source_url: "https://ext.example/story".to_string(),
                        ..Default::default()
                    },
                    question: "@micro tell me more".to_string(),
                    ..Default::default()
                },
                |notice| notices.lock().unwrap().push(notice.to_string()),
            )
            .await
            .unwrap();
        assert_eq!(reply, "Here is more.");
        assert_eq!(*notices.lock().unwrap(), vec![detail::PROGRESS_NOTICE.to_string()]);

        let generation = &model.requests()[0];
        assert_eq!(
            generation.context[0],
            "Full content of https://ext.example/story:\nfull external text"
        );
        assert!(generation.question.ends_with(detail::PROGRESS_ANNOTATION));
    }

    // ============================================================================
    // Test: Model failure surfaces as an error, never as text
    // ============================================================================

    #[tokio::test]
    async fn test_model_failure_is_an_error() {
        let model = Arc::new(RecordingModel::default());
        let p = pipeline(InMemoryIndex::new(), model);
        let result = p.answer_single_shot("what is new?", Some("ctx"), "General").await;
        assert!(matches!(result, Err(ModelError::EmptyResponse)));
    }

    // ============================================================================
    // Test: A failed room reply broadcasts nothing and reports no reply
    // ============================================================================

    async fn test_room() -> RoomHandle {
        RoomHandle::spawn(RoomArguments {
            id: shared_types::RoomId::parse("news_1").unwrap(),
            context: RoomContext::default(),
            history: Vec::new(),
            history_store: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_failed_room_reply_stays_silent() {
        let p = Arc::new(pipeline(InMemoryIndex::new(), Arc::new(RecordingModel::default())));
        let room = test_room().await;
        room.broadcast(RoomMessage::user("ada", "@micro anyone?")).unwrap();

        let replied = Arc::new(AtomicBool::new(false));
        let flag = replied.clone();
        let delivered = p
            .spawn_room_reply(room.clone(), "@micro anyone?".to_string(), "ada".to_string(), move || {
                flag.store(true, Ordering::SeqCst)
            })
            .await
            .unwrap();

        assert!(!delivered);
        assert!(!replied.load(Ordering::SeqCst));
        let history = room.history().await.unwrap();
        assert!(history.iter().all(|m| !m.is_assistant));
    }

    #[tokio::test]
    async fn test_room_reply_runs_callback_after_broadcast() {
        let model = Arc::new(RecordingModel::with_replies(&["Hi ada."]));
        let p = Arc::new(pipeline(InMemoryIndex::new(), model));
        let room = test_room().await;

        let replied = Arc::new(AtomicBool::new(false));
        let flag = replied.clone();
        let delivered = p
            .spawn_room_reply(room.clone(), "@micro hello".to_string(), "ada".to_string(), move || {
                flag.store(true, Ordering::SeqCst)
            })
            .await
            .unwrap();

        assert!(delivered);
        assert!(replied.load(Ordering::SeqCst));
        let history = room.history().await.unwrap();
        assert_eq!(history.last().unwrap().content, "Hi ada.");
    }

    #[tokio::test]
    async fn test_single_shot_carries_caller_context() {
        let model = Arc::new(RecordingModel::with_replies(&["ok"]));
        let p = pipeline(InMemoryIndex::new(), model.clone());
        p.answer_single_shot("summarize", Some("  page text  "), "Dev")
            .await
            .unwrap();
        let generation = &model.requests()[0];
        assert_eq!(generation.context[0], "page text");
        assert_eq!(generation.context[1], "Current discussion: Dev");
    }
}
