//! # Lookbook prompt templates
//!
//! A template is a small YAML document holding the composer's system prompt,
//! optional text wrapped around every user prompt, and the wording used by
//! the local fallback lookbook. A built-in template is used unless the
//! config names one, in which case it is read from
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "You are a personal shopper. Reply with JSON only."
//! post_user_message_content: "Keep every reason under 20 words."
//! ```
//!
//! Missing fields take their built-in values.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::info;

use crate::error::{Error, Result};

pub const DEFAULT_TEMPLATE_NAME: &str = "lookbook";

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert personal shopper. Given the shopper's request and a short list of catalog products, \
return a JSON object with keys: lookbook, styling_notes, complementary_items, checkout_instructions, chat_response. \
lookbook is a list of 4 to 8 items; each item must reference a product_id from the list and include title, a short reason, a matching occasion and the price. \
Never invent products or ids.";

/// Wording of the locally composed lookbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackCopy {
    pub reason: String,
    pub styling_notes: String,
    pub complementary_title: String,
    pub complementary_reason: String,
    pub checkout_instructions: String,
    pub chat_response: String,
    /// Reply when nothing survives retrieval and filtering.
    pub no_matches: String,
}

impl Default for FallbackCopy {
    fn default() -> Self {
        Self {
            reason: "Well matched to the requested style and occasion.".into(),
            styling_notes:
                "Mix textures and pick neutral shoes. Consider a lightweight coat for chilly evenings."
                    .into(),
            complementary_title: "Travel steamer".into(),
            complementary_reason: "Keep garments crease-free".into(),
            checkout_instructions: "Add items to cart and proceed to checkout.".into(),
            chat_response: "Here are a few pieces from the catalog that fit your request.".into(),
            no_matches: "Nothing in the catalog matches that request and budget yet.".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookbookTemplate {
    /// Instruction sent as the system message.
    pub system_prompt: String,

    /// Added before the generated user prompt.
    pub pre_user_message_content: Option<String>,

    /// Added after the generated user prompt.
    pub post_user_message_content: Option<String>,

    pub fallback: FallbackCopy,
}

impl Default for LookbookTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            pre_user_message_content: None,
            post_user_message_content: Some("Return only JSON parsable output.".into()),
            fallback: FallbackCopy::default(),
        }
    }
}

impl LookbookTemplate {
    /// Wrap `prompt` with the optional pre/post content.
    pub fn decorate(&self, prompt: &str) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(pre) = self.pre_user_message_content.as_deref() {
            parts.push(pre);
        }
        parts.push(prompt);
        if let Some(post) = self.post_user_message_content.as_deref() {
            parts.push(post);
        }
        parts.join("\n\n")
    }
}

/// Load `<config_dir>/templates/<name>.yaml`.
pub fn load_template(name: &str) -> Result<LookbookTemplate> {
    let path = crate::config_dir()?
        .join("templates")
        .join(format!("{name}.yaml"));
    load_template_from(path)
}

pub fn load_template_from(path: impl AsRef<Path>) -> Result<LookbookTemplate> {
    let path = path.as_ref();
    info!("Loading template: {}", path.display());
    let content = fs::read_to_string(path)?;
    let template: LookbookTemplate = serde_yaml::from_str(&content)?;
    if template.system_prompt.trim().is_empty() {
        return Err(Error::Config(format!(
            "template {} has an empty system_prompt",
            path.display()
        )));
    }
    Ok(template)
}

/// The configured template, or the built-in one when `name` is `None`.
pub fn resolve_template(name: Option<&str>) -> Result<LookbookTemplate> {
    match name {
        Some(name) => load_template(name),
        None => Ok(LookbookTemplate::default()),
    }
}
