use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Id;

/// Hard cap on post body length, matching the column bound.
pub const POST_TEXT_MAX: usize = 400;

/// Per-field validation messages, keyed by field name. An empty map means
/// the submission is valid.
#[derive(Debug, Default, Serialize)]
pub struct FormErrors(BTreeMap<&'static str, String>);

impl FormErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }
}

/// Submission payload for creating or editing a post. The image is
/// referenced by the hash returned from the upload endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PostForm {
    pub text: String,
    pub group_id: Option<Id>,
    pub image_hash: Option<String>,
    pub image_mime: Option<String>,
}

impl PostForm {
    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        let text = self.text.trim();
        if text.is_empty() {
            errors.add("text", "this field is required");
        } else if text.chars().count() > POST_TEXT_MAX {
            errors.add("text", format!("ensure this value has at most {POST_TEXT_MAX} characters"));
        }
        if self.image_hash.is_some() != self.image_mime.is_some() {
            errors.add("image", "image hash and mime must be supplied together");
        }
        errors
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CommentForm {
    pub text: String,
}

impl CommentForm {
    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        if self.text.trim().is_empty() {
            errors.add("text", "this field is required");
        }
        errors
    }
}
