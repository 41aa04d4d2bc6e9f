//! Prompt construction for review replies.

use reviewpilot_core::types::{Message, StarRating};

/// Everything the model needs to write one owner reply.
#[derive(Debug, Clone)]
pub struct ReplyContext<'a> {
    pub business_name: &'a str,
    pub reviewer_name: &'a str,
    pub rating: StarRating,
    pub review_text: &'a str,
    /// e.g. "friendly", "formal"
    pub tone: &'a str,
    pub signature: Option<&'a str>,
}

/// Marker line the mock provider reads the rating back from.
pub(crate) const RATING_PREFIX: &str = "Rating: ";

pub fn build_reply_messages(ctx: &ReplyContext<'_>) -> Vec<Message> {
    let mut system = format!(
        "You write public owner replies to Google reviews for \"{}\". \
         Keep the reply under 120 words, use a {} tone, address the reviewer by first name, \
         never invent facts, offers or discounts, and do not include a subject line.",
        ctx.business_name, ctx.tone
    );
    if ctx.rating.stars() <= 2 {
        system.push_str(
            " The review is negative: apologise sincerely and invite the reviewer to get in touch directly.",
        );
    }
    if let Some(sig) = ctx.signature.filter(|s| !s.trim().is_empty()) {
        system.push_str(&format!(" End the reply with the signature: {sig}"));
    }

    let text = if ctx.review_text.trim().is_empty() {
        "(no written comment, rating only)"
    } else {
        ctx.review_text
    };
    let user = format!(
        "Reviewer: {}\n{}{}/5\nReview:\n{}",
        ctx.reviewer_name,
        RATING_PREFIX,
        ctx.rating.stars(),
        text
    );

    vec![Message::system(system), Message::user(user)]
}

/// Trim model output and strip wrapping quotes the model sometimes adds.
pub fn clean_reply(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}
