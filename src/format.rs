//! render-time formatting of transcript text.
//!
//! stored text is always raw; this turns it into markup:
//! - text is html-escaped exactly once, up front
//! - ```` ```lang\n...``` ```` fenced blocks -> `<pre><code class="language-lang">`
//! - `` `inline` `` spans -> `<code>` (never inside a fenced block)
//! - remaining newlines -> `<br>`

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

static FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(\w+)?\n(.*?)```").expect("fenced code pattern"));

static INLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("inline code pattern"));

/// escape the five html-significant characters.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

/// format raw transcript text for display.
pub fn render_text(raw: &str) -> String {
    let escaped = escape_html(raw);
    let mut out = String::with_capacity(escaped.len() + 32);
    let mut last = 0;
    for caps in FENCED.captures_iter(&escaped) {
        let Some(whole) = caps.get(0) else { continue };
        render_inline(&escaped[last..whole.start()], &mut out);
        let lang = caps.get(1).map_or("", |m| m.as_str());
        let code = caps.get(2).map_or("", |m| m.as_str()).trim();
        let _ = write!(out, "<pre><code class=\"language-{lang}\">{code}</code></pre>");
        last = whole.end();
    }
    render_inline(&escaped[last..], &mut out);
    out
}

fn render_inline(text: &str, out: &mut String) {
    let mut last = 0;
    for caps in INLINE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        line_breaks(&text[last..whole.start()], out);
        let code = caps.get(1).map_or("", |m| m.as_str());
        let _ = write!(out, "<code>{code}</code>");
        last = whole.end();
    }
    line_breaks(&text[last..], out);
}

fn line_breaks(text: &str, out: &mut String) {
    let mut lines = text.split('\n');
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push_str("<br>");
        out.push_str(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fenced_block_with_language() {
        assert_eq!(
            render_text("```python\nx = 1\n```"),
            r#"<pre><code class="language-python">x = 1</code></pre>"#
        );
    }

    #[test]
    fn fenced_block_without_language_keeps_interior() {
        assert_eq!(
            render_text("see:\n```\n  if a < b {\n    go();\n  }\n\n```\ndone"),
            "see:<br><pre><code class=\"language-\">if a &lt; b {\n    go();\n  }</code></pre><br>done"
        );
    }

    #[test]
    fn code_content_cannot_break_markup() {
        let html = render_text("```html\n<script>alert(\"x\")</script>\n```");
        assert_eq!(
            html,
            "<pre><code class=\"language-html\">&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;</code></pre>"
        );
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn backticks_inside_fenced_block_are_not_inline_code() {
        assert_eq!(
            render_text("```\nuse `x` here\n```"),
            "<pre><code class=\"language-\">use `x` here</code></pre>"
        );
    }

    #[test]
    fn inline_code_spans() {
        assert_eq!(
            render_text("call `f(a<b)` then `g`"),
            "call <code>f(a&lt;b)</code> then <code>g</code>"
        );
        // unmatched backtick stays literal
        assert_eq!(render_text("it`s"), "it`s");
    }

    #[test]
    fn ampersand_escaped_once() {
        assert_eq!(render_text("a & b"), "a &amp; b");
        assert_eq!(render_text("&amp;"), "&amp;amp;");
        assert_eq!(render_text("`&`"), "<code>&amp;</code>");
    }

    #[test]
    fn escapes_all_five() {
        assert_eq!(escape_html(r#"&<>"'"#), "&amp;&lt;&gt;&quot;&#039;");
    }

    #[test]
    fn newlines_become_breaks() {
        assert_eq!(render_text("one\ntwo\n"), "one<br>two<br>");
        assert_eq!(render_text(""), "");
    }

    #[test]
    fn unterminated_fence_renders_as_text() {
        // mid-stream: the closing fence hasn't arrived yet
        assert_eq!(render_text("```rust\nfn main"), "```rust<br>fn main");
    }
}
