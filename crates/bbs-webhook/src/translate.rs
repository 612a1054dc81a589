//! Vendor event subtypes to normalized change types and heads.
//!
//! One delivery always becomes at most one event: ref changes of a push are
//! reduced with [`ChangeType::reduce`] and carried as several heads.

use bbs_client::PullRequest;
use bbs_core::{ChangeType, Head, HeadRevision, Revision};

/// Cloud and plugin pull request event keys.
pub fn cloud_pull_request_change(event_key: &str) -> Option<ChangeType> {
    match event_key {
        "pullrequest:created" => Some(ChangeType::Created),
        "pullrequest:updated" | "pullrequest:rescoped_from" | "pullrequest:rescoped_to" => {
            Some(ChangeType::Updated)
        }
        "pullrequest:fulfilled"
        | "pullrequest:rejected"
        | "pullrequest:merged"
        | "pullrequest:declined"
        | "pullrequest:deleted" => Some(ChangeType::Removed),
        _ => None,
    }
}

/// Native server pull request event keys.
pub fn native_pull_request_change(event_key: &str) -> Option<ChangeType> {
    match event_key {
        "pr:opened" => Some(ChangeType::Created),
        "pr:from_ref_updated" | "pr:modified" => Some(ChangeType::Updated),
        "pr:merged" | "pr:declined" | "pr:deleted" => Some(ChangeType::Removed),
        _ => None,
    }
}

/// Native ref change `type` (`ADD`, `UPDATE`, `DELETE`).
pub fn native_ref_change(kind: &str) -> ChangeType {
    match kind.to_ascii_uppercase().as_str() {
        "ADD" => ChangeType::Created,
        "DELETE" => ChangeType::Removed,
        _ => ChangeType::Updated,
    }
}

/// Cloud-shaped ref change flags.
pub fn cloud_ref_change(created: bool, closed: bool) -> ChangeType {
    if created {
        ChangeType::Created
    } else if closed {
        ChangeType::Removed
    } else {
        ChangeType::Updated
    }
}

/// Branch or tag head; a missing hash means the ref is gone.
pub fn ref_head(is_tag: bool, name: &str, hash: Option<&str>) -> HeadRevision {
    let head = if is_tag {
        Head::Tag {
            name: name.to_string(),
        }
    } else {
        Head::Branch {
            name: name.to_string(),
        }
    };
    HeadRevision {
        head,
        revision: hash.map(|hash| Revision::Commit {
            hash: hash.to_string(),
        }),
    }
}

/// Pull request head; removed pull requests carry no revision.
pub fn pull_request_head(pull_request: &PullRequest, change: ChangeType) -> HeadRevision {
    let source_repository = pull_request
        .is_fork()
        .then(|| pull_request.source.repository.clone());
    let revision = (change != ChangeType::Removed).then(|| Revision::PullRequest {
        source_hash: pull_request.source.commit_hash.clone(),
        target_hash: pull_request.destination.commit_hash.clone(),
    });

    HeadRevision {
        head: Head::PullRequest {
            id: pull_request.id.clone(),
            title: pull_request.title.clone(),
            source_branch: pull_request.source.branch.clone(),
            target_branch: pull_request.destination.branch.clone(),
            source_repository,
        },
        revision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbs_client::{PullRequestRef, PullRequestState};

    fn pull_request(source_repository: &str) -> PullRequest {
        PullRequest {
            id: "5".to_string(),
            title: "Add feature".to_string(),
            state: PullRequestState::Open,
            author: None,
            source: PullRequestRef {
                branch: "feature".to_string(),
                commit_hash: "aaa".to_string(),
                repository: source_repository.to_string(),
            },
            destination: PullRequestRef {
                branch: "main".to_string(),
                commit_hash: "bbb".to_string(),
                repository: "acme/widgets".to_string(),
            },
            html_url: None,
            updated_on: None,
            can_merge: None,
            has_changes: None,
        }
    }

    #[test]
    fn test_pull_request_event_keys() {
        assert_eq!(cloud_pull_request_change("pullrequest:created"), Some(ChangeType::Created));
        assert_eq!(cloud_pull_request_change("pullrequest:rejected"), Some(ChangeType::Removed));
        assert_eq!(cloud_pull_request_change("pullrequest:comment_created"), None);

        assert_eq!(native_pull_request_change("pr:opened"), Some(ChangeType::Created));
        assert_eq!(native_pull_request_change("pr:from_ref_updated"), Some(ChangeType::Updated));
        assert_eq!(native_pull_request_change("pr:declined"), Some(ChangeType::Removed));
        assert_eq!(native_pull_request_change("pr:reviewer:approved"), None);
    }

    #[test]
    fn test_ref_changes() {
        assert_eq!(native_ref_change("ADD"), ChangeType::Created);
        assert_eq!(native_ref_change("delete"), ChangeType::Removed);
        assert_eq!(native_ref_change("UPDATE"), ChangeType::Updated);

        assert_eq!(cloud_ref_change(true, false), ChangeType::Created);
        assert_eq!(cloud_ref_change(false, true), ChangeType::Removed);
        assert_eq!(cloud_ref_change(false, false), ChangeType::Updated);
    }

    #[test]
    fn test_pull_request_heads() {
        let open = pull_request_head(&pull_request("acme/widgets"), ChangeType::Updated);
        match &open.head {
            Head::PullRequest {
                source_repository, ..
            } => assert!(source_repository.is_none()),
            other => panic!("unexpected head: {:?}", other),
        }
        assert_eq!(
            open.revision,
            Some(Revision::PullRequest {
                source_hash: "aaa".to_string(),
                target_hash: "bbb".to_string(),
            })
        );

        let fork = pull_request_head(&pull_request("fork/widgets"), ChangeType::Removed);
        match &fork.head {
            Head::PullRequest {
                source_repository, ..
            } => assert_eq!(source_repository.as_deref(), Some("fork/widgets")),
            other => panic!("unexpected head: {:?}", other),
        }
        assert!(fork.revision.is_none());
    }
}
