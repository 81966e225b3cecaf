//! Display-ready shapes handed to templates.

use askama::Template;
use chrono::{DateTime, Utc};

use crate::accounts::profile::gravatar_url;
use crate::auth::Principal;
use crate::db::models::{Comment, Post};
use crate::follows::FollowEntry;
use crate::pagination::Page;
use crate::roles::Permission;
use crate::routes::home::Html;

/// What the navigation bar needs to know about the caller.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub can_follow: bool,
    pub can_comment: bool,
    pub can_write: bool,
    pub can_moderate: bool,
    pub is_admin: bool,
}

impl Viewer {
    pub fn new(principal: &Principal) -> Self {
        let user = principal.user();
        Self {
            user_id: user.map(|u| u.id.clone()),
            username: user.map(|u| u.username.clone()),
            can_follow: principal.can(Permission::FOLLOW),
            can_comment: principal.can(Permission::COMMENT),
            can_write: principal.can(Permission::WRITE_ARTICLES),
            can_moderate: principal.can(Permission::MODERATE_COMMENTS),
            is_admin: principal.is_administrator(),
        }
    }

    pub fn is(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

/// Previous/next links for a paginated listing.
#[derive(Debug, Clone)]
pub struct Pager {
    pub page: u32,
    pub pages: u32,
    pub prev: Option<String>,
    pub next: Option<String>,
}

impl Pager {
    pub fn new<T>(page: &Page<T>, path: &str) -> Self {
        let link = |n: u32| {
            let sep = if path.contains('?') { '&' } else { '?' };
            format!("{path}{sep}page={n}")
        };
        Self {
            page: page.page,
            pages: page.pages().max(1),
            prev: page.has_prev().then(|| link(page.prev_num())),
            next: page.has_next().then(|| link(page.next_num())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostView {
    pub id: String,
    pub author_username: String,
    pub avatar_url: String,
    pub body_html: String,
    pub created_at: String,
    pub comment_count: i64,
    pub can_edit: bool,
}

impl PostView {
    pub fn new(post: Post, viewer: &Viewer) -> Self {
        Self {
            can_edit: viewer.is(&post.author_id) || viewer.is_admin,
            avatar_url: gravatar_url(&post.author_avatar_hash, 40),
            created_at: timestamp(&post.created_at),
            id: post.id,
            author_username: post.author_username,
            body_html: post.body_html,
            comment_count: post.comment_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommentView {
    pub id: String,
    pub author_username: String,
    pub avatar_url: String,
    pub body_html: String,
    pub created_at: String,
    pub disabled: bool,
}

impl From<Comment> for CommentView {
    fn from(comment: Comment) -> Self {
        Self {
            avatar_url: gravatar_url(&comment.author_avatar_hash, 40),
            created_at: timestamp(&comment.created_at),
            id: comment.id,
            author_username: comment.author_username,
            body_html: comment.body_html,
            disabled: comment.disabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FollowView {
    pub username: String,
    pub avatar_url: String,
    pub since: String,
}

impl From<FollowEntry> for FollowView {
    fn from(entry: FollowEntry) -> Self {
        Self {
            avatar_url: gravatar_url(&entry.avatar_hash, 32),
            since: timestamp(&entry.since),
            username: entry.username,
        }
    }
}

pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Outcome page: a heading, a sentence and an optional link onward.
#[derive(Template)]
#[template(path = "pages/message.html")]
pub struct MessageTemplate {
    pub viewer: Viewer,
    pub title: String,
    pub message: String,
    pub link: Option<Link>,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub href: String,
    pub label: String,
}

pub fn message(viewer: Viewer, title: &str, message: &str) -> Html<MessageTemplate> {
    Html(MessageTemplate {
        viewer,
        title: title.to_string(),
        message: message.to_string(),
        link: None,
    })
}

pub fn message_with_link(
    viewer: Viewer,
    title: &str,
    message: &str,
    href: &str,
    label: &str,
) -> Html<MessageTemplate> {
    Html(MessageTemplate {
        viewer,
        title: title.to_string(),
        message: message.to_string(),
        link: Some(Link {
            href: href.to_string(),
            label: label.to_string(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pager_links_neighbours() {
        let page: Page<()> = Page {
            items: Vec::new(),
            page: 2,
            per_page: 10,
            total: 25,
        };
        let pager = Pager::new(&page, "/user/john");
        assert_eq!(pager.prev.as_deref(), Some("/user/john?page=1"));
        assert_eq!(pager.next.as_deref(), Some("/user/john?page=3"));
        assert_eq!(pager.pages, 3);
    }

    #[test]
    fn anonymous_viewer_can_nothing() {
        let viewer = Viewer::new(&Principal::Anonymous);
        assert!(viewer.username.is_none());
        assert!(!viewer.can_write);
        assert!(!viewer.is("anyone"));
    }
}
