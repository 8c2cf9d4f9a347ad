//! Project board placement.

use crate::entity::Issue;
use crate::error::{PreconditionError, Result};
use crate::github::types::CardContentType;
use crate::pool::Handle;
use crate::session::Session;

/// The card change that puts an item where it was asked to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardPlan {
    Create { column_id: u64 },
    Move { card_id: u64, column_id: u64 },
    Delete { card_id: u64 },
}

/// Compare the item's card (if any) with the target column.
///
/// Cards are matched by `content_url`, which for both issues and pull
/// requests is the issue API URL.
pub(crate) async fn plan(
    session: &Session,
    issue: &Handle<Issue>,
    project_id: u64,
    target: Option<&str>,
) -> Result<Option<BoardPlan>> {
    let columns = session.project_columns(project_id).await?;
    let target_id = match target {
        Some(name) => Some(
            columns
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.id)
                .ok_or_else(|| PreconditionError::UnknownColumn {
                    project_id,
                    column: name.to_string(),
                })?,
        ),
        None => None,
    };

    let content_url = issue.read().url.clone();
    let mut found = None;
    for column in &columns {
        let cards = session.client().list_column_cards(column.id).await?;
        if let Some(card) = cards
            .iter()
            .find(|c| c.content_url.as_deref() == Some(content_url.as_str()))
        {
            found = Some((card.id, column.id));
            break;
        }
    }

    Ok(match (found, target_id) {
        (None, None) => None,
        (None, Some(column_id)) => Some(BoardPlan::Create { column_id }),
        (Some((card_id, _)), None) => Some(BoardPlan::Delete { card_id }),
        (Some((_, current)), Some(column_id)) if current == column_id => None,
        (Some((card_id, _)), Some(column_id)) => Some(BoardPlan::Move { card_id, column_id }),
    })
}

pub(crate) async fn execute(session: &Session, issue: &Handle<Issue>, plan: BoardPlan) -> Result<()> {
    let client = session.client();
    match plan {
        BoardPlan::Create { column_id } => {
            let (content_id, content_type) = {
                let issue = issue.read();
                match issue.pull_request() {
                    Some(details) => (details.id, CardContentType::PullRequest),
                    None => (issue.id, CardContentType::Issue),
                }
            };
            let card = client.create_card(column_id, content_id, content_type).await?;
            tracing::debug!(card = card.id, column = column_id, "Created project card");
        }
        BoardPlan::Move { card_id, column_id } => client.move_card(card_id, column_id).await?,
        BoardPlan::Delete { card_id } => client.delete_card(card_id).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind};
    use crate::error::Error;
    use crate::http::HttpMethod;
    use crate::testing::{Fixture, issue_json, pull_json};
    use serde_json::json;

    const COLUMNS: &str = "https://api.test/projects/7/columns?per_page=100&page=1";

    fn cards(column: u64) -> String {
        format!("https://api.test/projects/columns/{column}/cards?per_page=100&page=1")
    }

    fn board(fx: &Fixture, todo: serde_json::Value, done: serde_json::Value) {
        fx.transport.push_json(
            HttpMethod::Get,
            COLUMNS,
            200,
            json!([{"id": 70, "name": "To do"}, {"id": 71, "name": "Done"}]),
        );
        fx.transport.push_json(HttpMethod::Get, cards(70), 200, todo);
        fx.transport.push_json(HttpMethod::Get, cards(71), 200, done);
    }

    fn move_to(issue: &Handle<Issue>, column: Option<&str>) -> Action {
        Action::new(
            issue,
            ActionKind::SetColumn {
                project_id: 7,
                column: column.map(str::to_string),
            },
        )
    }

    #[tokio::test]
    async fn moves_existing_card_to_target_column() {
        let fx = Fixture::new();
        let issue = fx.issue(issue_json(3, "2024-01-01T00:00:00Z"));
        board(
            &fx,
            json!([{"id": 900, "content_url": "https://api.test/repos/octo/bot/issues/3"}]),
            json!([]),
        );
        fx.transport.push_json(
            HttpMethod::Post,
            "https://api.test/projects/columns/cards/900/moves",
            201,
            json!({}),
        );

        assert!(move_to(&issue, Some("Done")).apply(&fx.session).await.expect("move"));
        let writes = fx.transport.writes();
        assert_eq!(writes.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&writes[0].body).expect("body");
        assert_eq!(body, json!({"position": "bottom", "column_id": 71}));
    }

    #[tokio::test]
    async fn card_already_in_place_needs_nothing() {
        let fx = Fixture::new();
        let issue = fx.issue(issue_json(3, "2024-01-01T00:00:00Z"));
        fx.transport.push_json(
            HttpMethod::Get,
            COLUMNS,
            200,
            json!([{"id": 70, "name": "To do"}]),
        );
        fx.transport.push_json(
            HttpMethod::Get,
            cards(70),
            200,
            json!([{"id": 900, "content_url": "https://api.test/repos/octo/bot/issues/3"}]),
        );

        assert!(!move_to(&issue, Some("To do"))
            .should_apply(&fx.session)
            .await
            .expect("check"));
        assert!(fx.transport.writes().is_empty());
    }

    #[tokio::test]
    async fn pull_request_card_is_created_with_pull_id() {
        let fx = Fixture::new();
        let pr = fx.pull(pull_json(5, "2024-01-01T00:00:00Z", Some(true)));
        board(&fx, json!([]), json!([]));
        fx.transport.push_json(
            HttpMethod::Post,
            "https://api.test/projects/columns/70/cards",
            201,
            json!({"id": 901, "content_url": "https://api.test/repos/octo/bot/issues/5"}),
        );

        assert!(move_to(&pr, Some("To do")).apply(&fx.session).await.expect("create"));
        let body: serde_json::Value =
            serde_json::from_slice(&fx.transport.writes()[0].body).expect("body");
        assert_eq!(body, json!({"content_id": 5005, "content_type": "PullRequest"}));
    }

    #[tokio::test]
    async fn clearing_column_deletes_the_card() {
        let fx = Fixture::new();
        let issue = fx.issue(issue_json(3, "2024-01-01T00:00:00Z"));
        board(
            &fx,
            json!([]),
            json!([{"id": 902, "content_url": "https://api.test/repos/octo/bot/issues/3"}]),
        );
        fx.transport.push_json(
            HttpMethod::Delete,
            "https://api.test/projects/columns/cards/902",
            204,
            json!(null),
        );

        assert!(move_to(&issue, None).apply(&fx.session).await.expect("delete"));
        assert_eq!(fx.transport.writes()[0].method, HttpMethod::Delete);
    }

    #[tokio::test]
    async fn unknown_column_is_a_precondition_error() {
        let fx = Fixture::new();
        let issue = fx.issue(issue_json(3, "2024-01-01T00:00:00Z"));
        fx.transport.push_json(
            HttpMethod::Get,
            COLUMNS,
            200,
            json!([{"id": 70, "name": "To do"}]),
        );

        let err = move_to(&issue, Some("Shipped"))
            .should_apply(&fx.session)
            .await
            .expect_err("unknown column");
        assert!(matches!(
            err,
            Error::Precondition(PreconditionError::UnknownColumn { project_id: 7, .. })
        ));
    }
}
