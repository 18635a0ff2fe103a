//! # Lookbook composition
//!
//! The generative step turns a filtered, ranked candidate list into a
//! [`Lookbook`]: a ranked subset of the given product ids with a short reason
//! for each, plus styling notes, complementary suggestions and a checkout
//! hint.
//!
//! [`OpenAiComposer`] asks a chat-completions model for a JSON object. Its
//! reply is treated as untrusted:
//!
//! - the whole body is parsed as JSON, else the span from the first `{` to the
//!   last `}`;
//! - ids may arrive as numbers or strings;
//! - items whose id is not one of the candidates are dropped;
//! - no surviving items for a non-empty candidate set is a
//!   [`Error::CompositionFailure`].
//!
//! Callers never surface that failure: they substitute [`fallback_lookbook`],
//! a purely local composition over the top candidates.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ComposerConfig;
use crate::dedup::HasProductId;
use crate::error::{Error, Result};
use crate::history::{ConversationWindow, Turn};
use crate::product::ScoredProduct;
use crate::template::{FallbackCopy, LookbookTemplate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookbookSource {
    /// Written by the generative model.
    #[default]
    Generated,
    /// Composed locally after the model failed or was disabled.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookbookItem {
    pub product_id: u32,
    pub title: String,
    pub reason: String,
    pub occasion: Option<String>,
    pub price: f64,
}

impl HasProductId for LookbookItem {
    fn product_id(&self) -> u32 {
        self.product_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplementaryItem {
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lookbook {
    #[serde(rename = "lookbook")]
    pub items: Vec<LookbookItem>,
    pub styling_notes: String,
    pub complementary_items: Vec<ComplementaryItem>,
    pub checkout_instructions: String,
    pub chat_response: String,
    pub source: LookbookSource,
}

impl Lookbook {
    pub fn product_ids(&self) -> Vec<u32> {
        self.items.iter().map(|i| i.product_id).collect()
    }
}

/// The generative collaborator.
#[async_trait]
pub trait Composer: Send + Sync {
    /// Compose a lookbook from `candidates`, which are already filtered and
    /// ranked. Implementations must only reference ids from `candidates`.
    async fn compose(
        &self,
        request: &str,
        candidates: &[ScoredProduct],
        history: &[Turn],
    ) -> Result<Lookbook>;
}

pub struct OpenAiComposer {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    window: ConversationWindow,
    template: LookbookTemplate,
}

impl OpenAiComposer {
    pub fn new(config: &ComposerConfig, template: LookbookTemplate) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            Error::Config("composer needs composer.api_key or OPENAI_API_KEY".into())
        })?;
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(config.api_base.clone());
        debug!("Composer client for {} at {}", config.model, config.api_base);

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
            window: ConversationWindow::from_config(config),
            template,
        })
    }

    fn messages(
        &self,
        request: &str,
        candidates: &[ScoredProduct],
        history: &[Turn],
    ) -> Vec<ChatCompletionRequestMessage> {
        let user_prompt = self
            .template
            .decorate(&build_prompt(request, candidates, history, &self.window));
        vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(
                    self.template.system_prompt.clone(),
                ),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(user_prompt),
                name: None,
            }),
        ]
    }
}

#[async_trait]
impl Composer for OpenAiComposer {
    #[allow(deprecated)]
    async fn compose(
        &self,
        request: &str,
        candidates: &[ScoredProduct],
        history: &[Turn],
    ) -> Result<Lookbook> {
        let chat_request = CreateChatCompletionRequestArgs::default()
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .model(self.model.clone())
            .messages(self.messages(request, candidates, history))
            .build()
            .map_err(|e| Error::CompositionFailure(format!("invalid request: {e}")))?;

        debug!("Sending lookbook request with {} candidates", candidates.len());
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(chat_request))
            .await
            .map_err(|_| {
                Error::CompositionFailure(format!("no reply within {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| Error::CompositionFailure(e.to_string()))?;

        let mut content = String::new();
        for choice in &response.choices {
            if let Some(text) = &choice.message.content {
                content.push_str(text);
            }
        }
        parse_lookbook(&content, candidates)
    }
}

/// User prompt: the request, each candidate, and the bounded history.
pub fn build_prompt(
    request: &str,
    candidates: &[ScoredProduct],
    history: &[Turn],
    window: &ConversationWindow,
) -> String {
    let mut prompt = format!("User request: {request}\n\nCatalog products:\n");
    for c in candidates {
        let p = &c.product;
        prompt.push_str(&format!(
            "- id {}: {}. Price: ${:.2}. Category: {}.",
            p.id, p.title, p.price, p.category
        ));
        if !p.attributes.is_empty() {
            prompt.push_str(&format!(" Attributes: {}.", p.attributes));
        }
        prompt.push('\n');
    }

    let turns = window.render(history);
    if !turns.is_empty() {
        prompt.push_str(&format!("\nConversation so far:\n{turns}\n"));
    }
    prompt
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(u64),
    Float(f64),
    Text(String),
}

impl RawId {
    fn resolve(&self) -> Option<u32> {
        match self {
            RawId::Int(n) => u32::try_from(*n).ok(),
            RawId::Float(f) if f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64 => {
                Some(*f as u32)
            }
            RawId::Float(_) => None,
            RawId::Text(s) => s.trim().trim_start_matches('#').parse().ok(),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum RawText {
    #[default]
    Missing,
    One(String),
    Many(Vec<String>),
}

impl RawText {
    fn into_text(self) -> String {
        match self {
            RawText::Missing => String::new(),
            RawText::One(s) => s,
            RawText::Many(v) => v.join(" "),
        }
    }
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(alias = "id")]
    product_id: Option<RawId>,
    #[serde(default)]
    reason: RawText,
    #[serde(default)]
    occasion: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawComplementary {
    Named {
        title: String,
        #[serde(default)]
        reason: String,
    },
    Plain(String),
}

#[derive(Deserialize)]
struct RawLookbook {
    #[serde(default)]
    lookbook: Vec<serde_json::Value>,
    #[serde(default)]
    styling_notes: RawText,
    #[serde(default)]
    complementary_items: Vec<serde_json::Value>,
    #[serde(default)]
    checkout_instructions: RawText,
    #[serde(default)]
    chat_response: RawText,
}

fn parse_json_object(content: &str) -> Result<RawLookbook> {
    if let Ok(raw) = serde_json::from_str(content.trim()) {
        return Ok(raw);
    }
    let span = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => {
            return Err(Error::CompositionFailure(
                "reply contains no JSON object".into(),
            ));
        }
    };
    serde_json::from_str(span).map_err(|e| Error::CompositionFailure(format!("bad JSON: {e}")))
}

/// Parse a model reply against the candidate set it was given.
///
/// Title and price always come from the catalog record, never from the model.
pub fn parse_lookbook(content: &str, candidates: &[ScoredProduct]) -> Result<Lookbook> {
    let raw = parse_json_object(content)?;
    let by_id: HashMap<u32, &ScoredProduct> = candidates.iter().map(|c| (c.id(), c)).collect();

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for value in raw.lookbook {
        let Ok(item) = serde_json::from_value::<RawItem>(value) else {
            continue;
        };
        let Some(id) = item.product_id.as_ref().and_then(RawId::resolve) else {
            continue;
        };
        let Some(candidate) = by_id.get(&id) else {
            warn!("Model referenced product {id} outside the candidate set; dropped");
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        items.push(LookbookItem {
            product_id: id,
            title: candidate.product.title.clone(),
            reason: item.reason.into_text(),
            occasion: item.occasion.filter(|o| !o.trim().is_empty()),
            price: candidate.product.price,
        });
    }

    if items.is_empty() && !candidates.is_empty() {
        return Err(Error::CompositionFailure(
            "reply referenced none of the candidates".into(),
        ));
    }

    let complementary_items = raw
        .complementary_items
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawComplementary>(v).ok())
        .map(|c| match c {
            RawComplementary::Named { title, reason } => ComplementaryItem { title, reason },
            RawComplementary::Plain(title) => ComplementaryItem {
                title,
                reason: String::new(),
            },
        })
        .collect();

    Ok(Lookbook {
        items,
        styling_notes: raw.styling_notes.into_text(),
        complementary_items,
        checkout_instructions: raw.checkout_instructions.into_text(),
        chat_response: raw.chat_response.into_text(),
        source: LookbookSource::Generated,
    })
}

/// Local composition over the first `max_items` candidates, in rank order.
pub fn fallback_lookbook(
    candidates: &[ScoredProduct],
    max_items: usize,
    copy: &FallbackCopy,
) -> Lookbook {
    let items: Vec<LookbookItem> = candidates
        .iter()
        .take(max_items)
        .map(|c| LookbookItem {
            product_id: c.id(),
            title: c.product.title.clone(),
            reason: copy.reason.clone(),
            occasion: None,
            price: c.product.price,
        })
        .collect();

    Lookbook {
        styling_notes: copy.styling_notes.clone(),
        complementary_items: vec![ComplementaryItem {
            title: copy.complementary_title.clone(),
            reason: copy.complementary_reason.clone(),
        }],
        checkout_instructions: copy.checkout_instructions.clone(),
        chat_response: if items.is_empty() {
            copy.no_matches.clone()
        } else {
            copy.chat_response.clone()
        },
        source: LookbookSource::Fallback,
        items,
    }
}
