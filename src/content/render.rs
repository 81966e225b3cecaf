//! body -> body_html: Markdown, then auto-linking, then sanitizing.
//!
//! The output is a pure function of the input; nothing outside the allow-list
//! survives.

use std::collections::HashSet;

use linkify::{LinkFinder, LinkKind};
use pulldown_cmark::{html, CowStr, Event, LinkType, Parser, Tag, TagEnd};

pub const POST_TAGS: &[&str] = &[
    "a",
    "abbr",
    "acronym",
    "b",
    "blockquote",
    "code",
    "em",
    "i",
    "li",
    "ol",
    "pre",
    "strong",
    "ul",
    "h1",
    "h2",
    "h3",
    "p",
];

pub const COMMENT_TAGS: &[&str] = &["a", "abbr", "acronym", "b", "code", "em", "i", "strong"];

pub fn render_post(body: &str) -> String {
    render(body, POST_TAGS)
}

pub fn render_comment(body: &str) -> String {
    render(body, COMMENT_TAGS)
}

fn render(body: &str, allowed: &[&'static str]) -> String {
    let events = autolink(Parser::new(body));

    let mut markup = String::with_capacity(body.len() * 3 / 2);
    html::push_html(&mut markup, events.into_iter());

    sanitize(&markup, allowed)
}

fn sanitize(markup: &str, allowed: &[&'static str]) -> String {
    let tags: HashSet<&str> = allowed.iter().copied().collect();
    ammonia::Builder::default()
        .tags(tags)
        .clean(markup)
        .to_string()
}

/// Turn bare URLs in text into links, leaving existing links and code alone.
fn autolink<'a>(events: impl Iterator<Item = Event<'a>>) -> Vec<Event<'a>> {
    let mut finder = LinkFinder::new();
    finder.kinds(&[LinkKind::Url]);

    let mut out = Vec::new();
    let mut link_depth = 0usize;
    let mut in_code_block = false;
    // The parser splits text at delimiter characters such as `_`; URLs may span pieces.
    let mut pending = String::new();

    for event in events {
        match &event {
            Event::Start(Tag::Link { .. }) => link_depth += 1,
            Event::End(TagEnd::Link) => link_depth = link_depth.saturating_sub(1),
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => in_code_block = false,
            Event::InlineHtml(html) if opens_anchor(html) => link_depth += 1,
            Event::InlineHtml(html) if closes_anchor(html) => {
                link_depth = link_depth.saturating_sub(1)
            }
            _ => {}
        }

        match event {
            Event::Text(text) if link_depth == 0 && !in_code_block => pending.push_str(&text),
            other => {
                if !pending.is_empty() {
                    push_linkified(&finder, &pending, &mut out);
                    pending.clear();
                }
                out.push(other);
            }
        }
    }
    if !pending.is_empty() {
        push_linkified(&finder, &pending, &mut out);
    }

    out
}

/// `<a ...>` as raw inline HTML. `<abbr>` and friends do not count.
fn opens_anchor(html: &str) -> bool {
    tag_follows(html.as_bytes(), b"<a")
}

fn closes_anchor(html: &str) -> bool {
    tag_follows(html.as_bytes(), b"</a")
}

fn tag_follows(html: &[u8], prefix: &[u8]) -> bool {
    html.len() > prefix.len()
        && html[..prefix.len()].eq_ignore_ascii_case(prefix)
        && (html[prefix.len()].is_ascii_whitespace() || html[prefix.len()] == b'>')
}

fn push_linkified<'a>(finder: &LinkFinder, text: &str, out: &mut Vec<Event<'a>>) {
    for span in finder.spans(text) {
        let piece = span.as_str().to_string();
        match span.kind() {
            Some(LinkKind::Url) => {
                out.push(Event::Start(Tag::Link {
                    link_type: LinkType::Autolink,
                    dest_url: CowStr::from(piece.clone()),
                    title: CowStr::from(""),
                    id: CowStr::from(""),
                }));
                out.push(Event::Text(CowStr::from(piece)));
                out.push(Event::End(TagEnd::Link));
            }
            _ => out.push(Event::Text(CowStr::from(piece))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_is_stripped_and_markdown_kept() {
        let html = render_post("**hi** <script>alert(1)</script>");
        assert!(html.contains("<strong>hi</strong>"), "{html}");
        assert!(!html.contains("<script"), "{html}");
        assert!(!html.contains("alert(1)"), "{html}");
    }

    #[test]
    fn rendering_is_deterministic() {
        let body = "# Title\n\nSee https://example.com and *this*.\n\n- a\n- b\n";
        assert_eq!(render_post(body), render_post(body));
    }

    #[test]
    fn bare_urls_become_links() {
        let html = render_post("visit https://example.com/page today");
        assert!(html.contains("<a href=\"https://example.com/page\""), "{html}");
        assert!(html.contains(">https://example.com/page</a>"), "{html}");
    }

    #[test]
    fn urls_with_underscores_link_whole() {
        let html = render_post("see https://example.com/a_b_c now");
        assert!(html.contains("href=\"https://example.com/a_b_c\""), "{html}");
    }

    #[test]
    fn existing_links_are_not_double_wrapped() {
        let html = render_post("[site](https://example.com)");
        assert_eq!(html.matches("<a ").count(), 1, "{html}");
        assert!(html.contains(">site</a>"), "{html}");
    }

    #[test]
    fn urls_inside_raw_anchors_are_not_wrapped_again() {
        let html = render_post("<a href=\"https://a.com\">https://a.com</a> and https://b.com");
        assert_eq!(html.matches("<a ").count(), 2, "{html}");
        assert!(html.contains(">https://a.com</a>"), "{html}");
        assert!(html.contains("href=\"https://b.com\""), "{html}");
    }

    #[test]
    fn raw_abbr_does_not_suppress_autolinking() {
        let html = render_post("<abbr>see</abbr> https://b.com");
        assert!(html.contains("href=\"https://b.com\""), "{html}");
    }

    #[test]
    fn urls_in_code_blocks_stay_text() {
        let html = render_post("```\ncurl https://example.com\n```");
        assert!(!html.contains("<a "), "{html}");
        assert!(html.contains("<pre>"), "{html}");
    }

    #[test]
    fn disallowed_tags_are_removed_but_text_kept() {
        let html = render_post("<div onclick=\"x()\">inside</div>\n\n<img src=x onerror=alert(1)>");
        assert!(!html.contains("<div"), "{html}");
        assert!(!html.contains("onclick"), "{html}");
        assert!(!html.contains("<img"), "{html}");
        assert!(html.contains("inside"), "{html}");
    }

    #[test]
    fn javascript_urls_are_dropped() {
        let html = render_post("[x](javascript:alert(1))");
        assert!(!html.contains("javascript:"), "{html}");
    }

    #[test]
    fn comments_use_the_narrow_allow_list() {
        let html = render_comment("# Heading\n\n**bold** and `code`");
        assert!(!html.contains("<h1>"), "{html}");
        assert!(!html.contains("<p>"), "{html}");
        assert!(html.contains("<strong>bold</strong>"), "{html}");
        assert!(html.contains("<code>code</code>"), "{html}");
    }

    #[test]
    fn headings_and_lists_survive_in_posts() {
        let html = render_post("## Sub\n\n1. one\n2. two\n\n> quoted");
        assert!(html.contains("<h2>Sub</h2>"), "{html}");
        assert!(html.contains("<ol>"), "{html}");
        assert!(html.contains("<blockquote>"), "{html}");
    }
}
