//! Article lifecycle, review outcomes and comment visibility tiers.
//!
//! Rows keep these values as plain `TEXT` columns; the enums here are the
//! typed view used by handlers when a decision depends on them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::auth::Role;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl From<UnknownValue> for crate::error::AppError {
    fn from(err: UnknownValue) -> Self {
        crate::error::AppError::BadRequest(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleState {
    Submitted,
    InReview,
    MinorRevision,
    MajorRevision,
    Approved,
    Rejected,
    Published,
    Withdrawn,
}

impl ArticleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleState::Submitted => "submitted",
            ArticleState::InReview => "in_review",
            ArticleState::MinorRevision => "minor_revision",
            ArticleState::MajorRevision => "major_revision",
            ArticleState::Approved => "approved",
            ArticleState::Rejected => "rejected",
            ArticleState::Published => "published",
            ArticleState::Withdrawn => "withdrawn",
        }
    }

    /// The author may edit content and replace the file.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            ArticleState::Submitted | ArticleState::MinorRevision | ArticleState::MajorRevision
        )
    }

    /// No further reviewers can be assigned.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ArticleState::Published | ArticleState::Rejected | ArticleState::Withdrawn
        )
    }

    /// Editorial moves allowed through the state endpoint.
    pub fn can_transition_to(&self, next: ArticleState) -> bool {
        use ArticleState::*;
        match (self, next) {
            (Submitted, InReview | Rejected | Withdrawn) => true,
            (InReview, MinorRevision | MajorRevision | Approved | Rejected) => true,
            (MinorRevision | MajorRevision, Submitted | InReview | Rejected) => true,
            (Approved, Published | InReview) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ArticleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(ArticleState::Submitted),
            "in_review" => Ok(ArticleState::InReview),
            "minor_revision" => Ok(ArticleState::MinorRevision),
            "major_revision" => Ok(ArticleState::MajorRevision),
            "approved" => Ok(ArticleState::Approved),
            "rejected" => Ok(ArticleState::Rejected),
            "published" => Ok(ArticleState::Published),
            "withdrawn" => Ok(ArticleState::Withdrawn),
            other => Err(UnknownValue {
                kind: "article state",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Pending,
    Completed,
    Cancelled,
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Pending => "pending",
            ReviewState::Completed => "completed",
            ReviewState::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ReviewState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewState::Pending),
            "completed" => Ok(ReviewState::Completed),
            "cancelled" => Ok(ReviewState::Cancelled),
            other => Err(UnknownValue {
                kind: "review state",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    /// `revise` is the short form clients may send; it is stored as
    /// `minor_revision`.
    #[serde(alias = "revise")]
    MinorRevision,
    MajorRevision,
    Reject,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Accept => "accept",
            Recommendation::MinorRevision => "minor_revision",
            Recommendation::MajorRevision => "major_revision",
            Recommendation::Reject => "reject",
        }
    }
}

impl FromStr for Recommendation {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Recommendation::Accept),
            "minor_revision" | "revise" => Ok(Recommendation::MinorRevision),
            "major_revision" => Ok(Recommendation::MajorRevision),
            "reject" => Ok(Recommendation::Reject),
            other => Err(UnknownValue {
                kind: "recommendation",
                value: other.to_string(),
            }),
        }
    }
}

/// Article outcome once every assigned review is in.
///
/// A single reject decides the article. Approval needs at least two
/// reviews, all of them accepting. A major revision request outweighs
/// minor ones.
pub fn aggregate_recommendations(recommendations: &[Recommendation]) -> ArticleState {
    if recommendations.contains(&Recommendation::Reject) {
        ArticleState::Rejected
    } else if recommendations.len() >= 2
        && recommendations.iter().all(|r| *r == Recommendation::Accept)
    {
        ArticleState::Approved
    } else if recommendations.contains(&Recommendation::MajorRevision) {
        ArticleState::MajorRevision
    } else {
        ArticleState::MinorRevision
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Internal,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Internal => "internal",
        }
    }

    /// Tiers a participant with `role` is allowed to read.
    pub fn readable_by(role: Role) -> &'static [Visibility] {
        match role {
            Role::Author => &[Visibility::Public],
            Role::Reviewer => &[Visibility::Public, Visibility::Private],
            Role::Editor | Role::Admin => {
                &[Visibility::Public, Visibility::Private, Visibility::Internal]
            }
        }
    }

    pub fn is_readable_by(&self, role: Role) -> bool {
        Visibility::readable_by(role).contains(self)
    }
}

impl FromStr for Visibility {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "internal" => Ok(Visibility::Internal),
            other => Err(UnknownValue {
                kind: "visibility",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentState {
    Active,
    Resolved,
    Deleted,
}

impl CommentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentState::Active => "active",
            CommentState::Resolved => "resolved",
            CommentState::Deleted => "deleted",
        }
    }
}

impl FromStr for CommentState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CommentState::Active),
            "resolved" => Ok(CommentState::Resolved),
            "deleted" => Ok(CommentState::Deleted),
            other => Err(UnknownValue {
                kind: "comment state",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Assignment,
    ReviewCompleted,
    ArticleState,
    Comment,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Assignment => "assignment",
            NotificationKind::ReviewCompleted => "review_completed",
            NotificationKind::ArticleState => "article_state",
            NotificationKind::Comment => "comment",
            NotificationKind::System => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use Recommendation::*;

    #[rstest]
    #[case(&[Accept, Accept], ArticleState::Approved)]
    #[case(&[Accept, Accept, Accept], ArticleState::Approved)]
    #[case(&[Accept], ArticleState::MinorRevision)]
    #[case(&[Accept, Reject], ArticleState::Rejected)]
    #[case(&[Reject], ArticleState::Rejected)]
    #[case(&[Accept, MinorRevision], ArticleState::MinorRevision)]
    #[case(&[Accept, MajorRevision, MinorRevision], ArticleState::MajorRevision)]
    #[case(&[MajorRevision, Reject], ArticleState::Rejected)]
    #[case(&[], ArticleState::MinorRevision)]
    fn aggregates_recommendations(
        #[case] recs: &[Recommendation],
        #[case] expected: ArticleState,
    ) {
        assert_eq!(aggregate_recommendations(recs), expected);
    }

    #[rstest]
    #[case(ArticleState::Submitted, ArticleState::InReview, true)]
    #[case(ArticleState::Submitted, ArticleState::Published, false)]
    #[case(ArticleState::InReview, ArticleState::Approved, true)]
    #[case(ArticleState::Approved, ArticleState::Published, true)]
    #[case(ArticleState::MinorRevision, ArticleState::Submitted, true)]
    #[case(ArticleState::Published, ArticleState::InReview, false)]
    #[case(ArticleState::Rejected, ArticleState::Submitted, false)]
    #[case(ArticleState::InReview, ArticleState::InReview, false)]
    fn article_transitions(
        #[case] from: ArticleState,
        #[case] to: ArticleState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn article_state_text_matches_serde() {
        for state in [
            ArticleState::Submitted,
            ArticleState::InReview,
            ArticleState::MinorRevision,
            ArticleState::Published,
            ArticleState::Withdrawn,
        ] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, state.as_str());
            assert_eq!(state.as_str().parse::<ArticleState>().unwrap(), state);
        }
    }

    #[rstest]
    #[case("accept", Accept)]
    #[case("revise", MinorRevision)]
    #[case("minor_revision", MinorRevision)]
    #[case("major_revision", MajorRevision)]
    #[case("reject", Reject)]
    fn parses_recommendations(#[case] text: &str, #[case] expected: Recommendation) {
        assert_eq!(text.parse::<Recommendation>().unwrap(), expected);
        let from_json: Recommendation =
            serde_json::from_value(serde_json::Value::String(text.to_string())).unwrap();
        assert_eq!(from_json, expected);
    }

    #[test]
    fn revise_is_stored_as_minor_revision() {
        let rec: Recommendation = "revise".parse().unwrap();
        assert_eq!(rec.as_str(), "minor_revision");
        assert_eq!(
            aggregate_recommendations(&[Accept, rec]),
            ArticleState::MinorRevision
        );
    }

    #[test]
    fn unknown_state_is_reported() {
        let err = "draft".parse::<ArticleState>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown article state: draft");
    }

    #[rstest]
    #[case(Role::Author, Visibility::Public, true)]
    #[case(Role::Author, Visibility::Private, false)]
    #[case(Role::Author, Visibility::Internal, false)]
    #[case(Role::Reviewer, Visibility::Private, true)]
    #[case(Role::Reviewer, Visibility::Internal, false)]
    #[case(Role::Editor, Visibility::Internal, true)]
    #[case(Role::Admin, Visibility::Private, true)]
    fn visibility_by_role(#[case] role: Role, #[case] tier: Visibility, #[case] visible: bool) {
        assert_eq!(tier.is_readable_by(role), visible);
    }

    #[test]
    fn tiers_order_by_restriction() {
        assert!(Visibility::Public < Visibility::Private);
        assert!(Visibility::Private < Visibility::Internal);
    }
}
