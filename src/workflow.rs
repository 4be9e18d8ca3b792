//! The ordered sequence of API calls behind the action: look up the issue
//! author, check their permission on the target repository, install the app,
//! and report back on the issue.

use std::fmt::Display;

use tracing::{error, info};

use crate::github::api::{ApiError, GitHub, PermissionLevel};

/// The six required inputs, already trimmed and validated non-empty.
pub struct Inputs {
    pub app_id: String,
    pub issue_number: String,
    pub org: String,
    pub repo: String,
    pub target_repo: String,
    pub token: String,
}

#[derive(Debug)]
pub enum RunError {
    /// The run was marked failed with a human-readable message.
    Failed(String),
    /// The failure-path comment itself could not be posted. This one is not
    /// converted into a marked failure; it propagates as-is.
    Comment(ApiError),
}

impl Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Failed(msg) => f.write_str(msg),
            RunError::Comment(e) => write!(f, "failed to post a failure comment: {}", e),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Failed(_) => None,
            RunError::Comment(e) => Some(e),
        }
    }
}

enum Install {
    Completed,
    /// The permission gate matched. The run fails with this message, without
    /// posting a comment.
    Refused(String),
}

pub async fn run(api: &GitHub, inputs: &Inputs) -> Result<(), RunError> {
    let Inputs {
        app_id,
        issue_number,
        org,
        repo,
        target_repo,
        ..
    } = inputs;

    match install(api, inputs).await {
        Ok(Install::Completed) => {}
        Ok(Install::Refused(message)) => return Err(RunError::Failed(message)),
        Err(e) => {
            error!("Failed to install app {app_id} on {org}/{target_repo}");
            let body =
                format!("Failed to install app {app_id} on {org}/{target_repo} with error: {e}");
            api.create_comment(org, repo, issue_number, &body)
                .await
                .map_err(RunError::Comment)?;
            return Err(RunError::Failed(e.to_string()));
        }
    }

    info!("Installed app {app_id} on {org}/{target_repo}");
    let body = format!("Successfully installed app {app_id} on {org}/{target_repo}");
    if api
        .create_comment(org, repo, issue_number, &body)
        .await
        .is_err()
    {
        return Err(RunError::Failed(format!(
            "Failed to comment on issue {issue_number}"
        )));
    }

    Ok(())
}

async fn install(api: &GitHub, inputs: &Inputs) -> Result<Install, ApiError> {
    let Inputs {
        app_id,
        issue_number,
        org,
        repo,
        target_repo,
        ..
    } = inputs;

    info!("Retrieving issue {issue_number} from {org}/{repo}");
    let issue = api.issue(org, repo, issue_number).await?;
    let author = issue.user.login;

    info!("Checking if {author} is a collaborator on {org}/{target_repo}");
    let permission = api
        .collaborator_permission(org, target_repo, &author)
        .await?;
    if let PermissionLevel::Admin | PermissionLevel::Write = permission {
        return Ok(Install::Refused(format!(
            "{author} does not have write or admin permissions on {org}/{target_repo}"
        )));
    }
    info!("{author} is a collaborator on {org}/{target_repo}");

    info!("Retrieving repository ID for {org}/{target_repo}");
    let repository = api.repository(org, target_repo).await?;

    info!(
        "Installing app {app_id} on {org}/{target_repo} with repository ID {}",
        repository.id
    );
    api.install_app(app_id, repository.id).await?;

    Ok(Install::Completed)
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Mock, Server};
    use serde_json::json;

    use super::*;

    fn inputs() -> Inputs {
        Inputs {
            app_id: "123".to_owned(),
            issue_number: "7".to_owned(),
            org: "acme".to_owned(),
            repo: "meta".to_owned(),
            target_repo: "widgets".to_owned(),
            token: "t0ken".to_owned(),
        }
    }

    fn api(server: &Server) -> GitHub {
        GitHub::with_base("t0ken", server.url())
    }

    async fn mock_issue(server: &mut Server, author: &str) -> Mock {
        server
            .mock("GET", "/repos/acme/meta/issues/7")
            .with_status(200)
            .with_body(json!({"user": {"login": author}}).to_string())
            .create_async()
            .await
    }

    async fn mock_permission(server: &mut Server, level: &str) -> Mock {
        server
            .mock("GET", "/repos/acme/widgets/collaborators/alice/permission")
            .with_status(200)
            .with_body(json!({"permissions": level}).to_string())
            .create_async()
            .await
    }

    async fn mock_repository(server: &mut Server) -> Mock {
        server
            .mock("GET", "/repos/acme/widgets")
            .with_status(200)
            .with_body(json!({"id": 999}).to_string())
            .create_async()
            .await
    }

    async fn mock_install(server: &mut Server, hits: usize) -> Mock {
        server
            .mock("PUT", "/user/installations/123/repositories/999")
            .with_status(204)
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn installs_and_comments_when_author_has_no_permission() {
        let mut server = Server::new_async().await;
        mock_issue(&mut server, "alice").await;
        mock_permission(&mut server, "none").await;
        mock_repository(&mut server).await;
        let install = mock_install(&mut server, 1).await;
        let comment = server
            .mock("POST", "/repos/acme/meta/issues/7/comments")
            .match_body(Matcher::Json(
                json!({"body": "Successfully installed app 123 on acme/widgets"}),
            ))
            .with_status(201)
            .with_body(json!({"id": 1}).to_string())
            .expect(1)
            .create_async()
            .await;

        run(&api(&server), &inputs()).await.unwrap();
        install.assert_async().await;
        comment.assert_async().await;
    }

    #[tokio::test]
    async fn read_permission_still_installs() {
        let mut server = Server::new_async().await;
        mock_issue(&mut server, "alice").await;
        mock_permission(&mut server, "read").await;
        mock_repository(&mut server).await;
        let install = mock_install(&mut server, 1).await;
        server
            .mock("POST", "/repos/acme/meta/issues/7/comments")
            .with_status(201)
            .with_body(json!({"id": 1}).to_string())
            .create_async()
            .await;

        run(&api(&server), &inputs()).await.unwrap();
        install.assert_async().await;
    }

    #[tokio::test]
    async fn write_permission_blocks_the_install() {
        let mut server = Server::new_async().await;
        mock_issue(&mut server, "alice").await;
        mock_permission(&mut server, "write").await;
        let repository = server
            .mock("GET", "/repos/acme/widgets")
            .expect(0)
            .create_async()
            .await;
        let install = mock_install(&mut server, 0).await;
        let comment = server
            .mock("POST", "/repos/acme/meta/issues/7/comments")
            .expect(0)
            .create_async()
            .await;

        let err = run(&api(&server), &inputs()).await.unwrap_err();
        let RunError::Failed(message) = err else {
            panic!("expected a marked failure, got {err:?}");
        };
        assert_eq!(
            message,
            "alice does not have write or admin permissions on acme/widgets"
        );
        repository.assert_async().await;
        install.assert_async().await;
        comment.assert_async().await;
    }

    #[tokio::test]
    async fn admin_permission_blocks_the_install() {
        let mut server = Server::new_async().await;
        mock_issue(&mut server, "alice").await;
        mock_permission(&mut server, "admin").await;
        let install = mock_install(&mut server, 0).await;

        let err = run(&api(&server), &inputs()).await.unwrap_err();
        assert!(matches!(err, RunError::Failed(_)));
        install.assert_async().await;
    }

    #[tokio::test]
    async fn missing_issue_posts_a_failure_comment_and_stops() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/acme/meta/issues/7")
            .with_status(404)
            .with_body(json!({"message": "Not Found"}).to_string())
            .create_async()
            .await;
        let permission = server
            .mock("GET", "/repos/acme/widgets/collaborators/alice/permission")
            .expect(0)
            .create_async()
            .await;
        let install = mock_install(&mut server, 0).await;
        let comment = server
            .mock("POST", "/repos/acme/meta/issues/7/comments")
            .match_body(Matcher::Regex(
                "Failed to install app 123 on acme/widgets with error: .*Not Found".to_owned(),
            ))
            .with_status(201)
            .with_body(json!({"id": 2}).to_string())
            .expect(1)
            .create_async()
            .await;

        let err = run(&api(&server), &inputs()).await.unwrap_err();
        let RunError::Failed(message) = err else {
            panic!("expected a marked failure, got {err:?}");
        };
        assert!(message.contains("Not Found"));
        permission.assert_async().await;
        install.assert_async().await;
        comment.assert_async().await;
    }

    #[tokio::test]
    async fn failed_success_comment_marks_the_run_failed() {
        let mut server = Server::new_async().await;
        mock_issue(&mut server, "alice").await;
        mock_permission(&mut server, "none").await;
        mock_repository(&mut server).await;
        let install = mock_install(&mut server, 1).await;
        server
            .mock("POST", "/repos/acme/meta/issues/7/comments")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let err = run(&api(&server), &inputs()).await.unwrap_err();
        let RunError::Failed(message) = err else {
            panic!("expected a marked failure, got {err:?}");
        };
        // The install went through; only the report failed.
        assert_eq!(message, "Failed to comment on issue 7");
        install.assert_async().await;
    }

    #[tokio::test]
    async fn failed_failure_comment_propagates_raw() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/repos/acme/meta/issues/7")
            .with_status(404)
            .with_body(json!({"message": "Not Found"}).to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/repos/acme/meta/issues/7/comments")
            .with_status(500)
            .create_async()
            .await;

        let err = run(&api(&server), &inputs()).await.unwrap_err();
        assert!(matches!(err, RunError::Comment(_)));
    }
}
