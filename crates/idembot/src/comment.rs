//! Comment identity markers.
//!
//! Comments the bot writes carry an invisible HTML header naming a slug:
//!
//! ```text
//! <!--header {"slug":"welcome"} headerend-->
//! Thanks for the report!
//! <!--footer {} footerend-->
//! ```
//!
//! On the next run the bot finds its own comment by slug and edits it instead
//! of posting a duplicate.

use serde::{Deserialize, Serialize};

use crate::entity::Comment;
use crate::pool::Handle;

const HEADER_OPEN: &str = "<!--header ";
const HEADER_CLOSE: &str = " headerend-->";
const FOOTER_OPEN: &str = "<!--footer ";
const FOOTER_CLOSE: &str = " footerend-->";
const LINE_BREAK: &str = "\r\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentHeader {
    pub slug: String,
}

/// A comment body split into its marker and the user-visible text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedComment {
    pub header: CommentHeader,
    pub body: String,
}

/// Wrap `body` in the header and footer for `slug`.
#[must_use]
pub fn render(slug: &str, body: &str) -> String {
    let header = serde_json::json!({ "slug": slug });
    format!("{HEADER_OPEN}{header}{HEADER_CLOSE}{LINE_BREAK}{body}{LINE_BREAK}{FOOTER_OPEN}{{}}{FOOTER_CLOSE}")
}

/// Split a comment written by [`render`]. Returns `None` for anything else.
///
/// Editors and the web UI sometimes normalise `\r\n` to `\n`, so either line
/// ending is accepted around the body.
#[must_use]
pub fn parse(text: &str) -> Option<ParsedComment> {
    let rest = text.strip_prefix(HEADER_OPEN)?;
    let close = rest.find(HEADER_CLOSE)?;
    let header: CommentHeader = serde_json::from_str(&rest[..close]).ok()?;
    let rest = &rest[close + HEADER_CLOSE.len()..];
    let rest = rest
        .strip_prefix(LINE_BREAK)
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);

    let body = match rest.rfind(FOOTER_OPEN) {
        Some(at) if rest[at..].trim_end().ends_with(FOOTER_CLOSE) => {
            let body = &rest[..at];
            body.strip_suffix(LINE_BREAK)
                .or_else(|| body.strip_suffix('\n'))
                .unwrap_or(body)
        }
        _ => rest,
    };

    Some(ParsedComment {
        header,
        body: body.to_string(),
    })
}

/// What an upsert for a slug has to do.
#[derive(Debug, Clone)]
pub enum UpsertPlan {
    /// An own comment with this slug already says exactly this.
    Unchanged(Handle<Comment>),
    /// An own comment with this slug exists but says something else.
    Edit(Handle<Comment>),
    Create,
}

impl UpsertPlan {
    #[must_use]
    pub fn needs_write(&self) -> bool {
        !matches!(self, UpsertPlan::Unchanged(_))
    }
}

/// Decide how to bring the comment for `slug` to `body`.
///
/// Only comments authored by `me` are considered; markers for other slugs
/// are ignored. The first matching comment wins.
#[must_use]
pub fn plan_upsert(comments: &[Handle<Comment>], me: &str, slug: &str, body: &str) -> UpsertPlan {
    for handle in comments {
        let comment = handle.read();
        if comment.author.read().login != me {
            continue;
        }
        let Some(parsed) = parse(&comment.body) else {
            continue;
        };
        if parsed.header.slug != slug {
            continue;
        }
        return if parsed.body == body {
            UpsertPlan::Unchanged(handle.clone())
        } else {
            UpsertPlan::Edit(handle.clone())
        };
    }
    UpsertPlan::Create
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::RepoRef;
    use crate::github::types::RawComment;
    use crate::pool::Pools;

    fn comment(pools: &Pools, id: u64, login: &str, body: &str) -> Handle<Comment> {
        let raw: RawComment = serde_json::from_value(serde_json::json!({
            "id": id,
            "body": body,
            "user": {"login": login},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .expect("raw comment");
        pools.comments.ingest(&RepoRef::new("o", "r"), &raw, pools)
    }

    #[test]
    fn render_produces_exact_wire_format() {
        assert_eq!(
            render("welcome", "Hi!"),
            "<!--header {\"slug\":\"welcome\"} headerend-->\r\nHi!\r\n<!--footer {} footerend-->"
        );
    }

    #[test]
    fn parse_inverts_render() {
        let body = "Line one\r\n\r\nLine two";
        let parsed = parse(&render("triage", body)).expect("parsed");
        assert_eq!(parsed.header.slug, "triage");
        assert_eq!(parsed.body, body);
    }

    #[test]
    fn parse_accepts_normalised_line_endings() {
        let text = "<!--header {\"slug\":\"x\"} headerend-->\nbody\n<!--footer {} footerend-->\n";
        let parsed = parse(text).expect("parsed");
        assert_eq!(parsed.body, "body");
    }

    #[test]
    fn parse_rejects_unmarked_or_malformed_comments() {
        assert!(parse("just a human comment").is_none());
        assert!(parse("<!--header not json headerend-->\r\nx").is_none());
        assert!(parse("<!--header {\"slug\":\"x\"}").is_none());
    }

    #[test]
    fn plan_edits_own_comment_with_matching_slug_only() {
        let pools = Pools::new();
        let comments = vec![
            comment(&pools, 1, "someone", &render("welcome", "spoofed")),
            comment(&pools, 2, "idembot", &render("other", "different slug")),
            comment(&pools, 3, "idembot", &render("welcome", "old text")),
        ];

        match plan_upsert(&comments, "idembot", "welcome", "new text") {
            UpsertPlan::Edit(handle) => assert_eq!(handle.read().id, 3),
            other => panic!("expected edit, got {other:?}"),
        }
        assert!(matches!(
            plan_upsert(&comments, "idembot", "welcome", "old text"),
            UpsertPlan::Unchanged(_)
        ));
        assert!(matches!(
            plan_upsert(&comments, "idembot", "missing", "x"),
            UpsertPlan::Create
        ));
    }
}
