//! Rich-text rendering of Telegram message entities.
//!
//! Entities are half-open intervals over the UTF-16 code units of a message.
//! [`render`] sweeps the text once, keeping a stack of open intervals, and
//! emits either plain Markdown ([`RenderMode::Standard`]) or Telegram
//! MarkdownV2 ([`RenderMode::PlatformMarkup`]).

use crate::telegram::MessageEntity;

/// Characters MarkdownV2 requires to be escaped outside code and links.
const ESCAPED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Markdown with a few HTML tags; never escapes.
    Standard,
    /// Telegram MarkdownV2.
    PlatformMarkup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationKind {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Spoiler,
    Code,
    Pre { language: Option<String> },
    TextLink { url: String },
    TextMention { user_id: i64 },
    Blockquote,
    ExpandableBlockquote,
    /// Entities with no markup of their own (hashtags, bare urls, mentions...).
    Unstyled,
}

impl AnnotationKind {
    fn is_code(&self) -> bool {
        matches!(self, AnnotationKind::Code | AnnotationKind::Pre { .. })
    }

    fn is_quote(&self) -> bool {
        matches!(
            self,
            AnnotationKind::Blockquote | AnnotationKind::ExpandableBlockquote
        )
    }
}

/// A styled span `[start, end)` in UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub start: usize,
    pub end: usize,
}

impl Annotation {
    pub fn new(kind: AnnotationKind, start: usize, end: usize) -> Self {
        Self { kind, start, end }
    }
}

impl From<&MessageEntity> for Annotation {
    fn from(entity: &MessageEntity) -> Self {
        let kind = match entity.kind.as_str() {
            "bold" => AnnotationKind::Bold,
            "italic" => AnnotationKind::Italic,
            "underline" => AnnotationKind::Underline,
            "strikethrough" => AnnotationKind::Strikethrough,
            "spoiler" => AnnotationKind::Spoiler,
            "code" => AnnotationKind::Code,
            "pre" => AnnotationKind::Pre {
                language: entity.language.clone(),
            },
            "text_link" => match &entity.url {
                Some(url) => AnnotationKind::TextLink { url: url.clone() },
                None => AnnotationKind::Unstyled,
            },
            "text_mention" => match &entity.user {
                Some(user) => AnnotationKind::TextMention { user_id: user.id },
                None => AnnotationKind::Unstyled,
            },
            "blockquote" => AnnotationKind::Blockquote,
            "expandable_blockquote" => AnnotationKind::ExpandableBlockquote,
            _ => AnnotationKind::Unstyled,
        };
        Self {
            kind,
            start: entity.offset,
            end: entity.offset.saturating_add(entity.length),
        }
    }
}

/// Renders Telegram entities over `text`.
pub fn render_entities(text: &str, entities: &[MessageEntity], mode: RenderMode) -> String {
    let annotations: Vec<Annotation> = entities.iter().map(Annotation::from).collect();
    render(text, &annotations, mode)
}

/// Prefixes every MarkdownV2 special character with `\`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        push_escaped(&mut out, ch, ESCAPED);
    }
    out
}

fn push_escaped(out: &mut String, ch: char, special: &[char]) {
    if special.contains(&ch) {
        out.push('\\');
    }
    out.push(ch);
}

fn escape_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for ch in url.chars() {
        push_escaped(&mut out, ch, &[')', '\\']);
    }
    out
}

/// Renders `annotations` over `text`.
///
/// Co-starting spans open longest first. A span that closes while spans
/// opened after it are still active closes those too and reopens them
/// afterwards, so output is always balanced. Zero-length spans are dropped,
/// offsets past the end are clamped, and a boundary inside a surrogate pair
/// moves past the whole character.
pub fn render(text: &str, annotations: &[Annotation], mode: RenderMode) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut unit_starts = Vec::with_capacity(chars.len());
    let mut units = 0;
    for ch in &chars {
        unit_starts.push(units);
        units += ch.len_utf16();
    }
    let to_char_index = |offset: usize| {
        let offset = offset.min(units);
        unit_starts.partition_point(|&start| start < offset)
    };

    let spans: Vec<Span<'_>> = annotations
        .iter()
        .filter(|annotation| annotation.kind != AnnotationKind::Unstyled)
        .map(|annotation| Span {
            kind: &annotation.kind,
            start: to_char_index(annotation.start),
            end: to_char_index(annotation.end),
        })
        .filter(|span| span.start < span.end)
        .collect();

    if spans.is_empty() {
        return match mode {
            RenderMode::Standard => text.to_string(),
            RenderMode::PlatformMarkup => escape(text),
        };
    }

    let mut opens_at: Vec<Vec<usize>> = vec![Vec::new(); chars.len() + 1];
    let mut closes_at: Vec<Vec<usize>> = vec![Vec::new(); chars.len() + 1];
    for (idx, span) in spans.iter().enumerate() {
        opens_at[span.start].push(idx);
        closes_at[span.end].push(idx);
    }
    for opening in &mut opens_at {
        // Stable: equal lengths keep input order.
        opening.sort_by(|a, b| spans[*b].len().cmp(&spans[*a].len()));
    }

    let mut renderer = Renderer {
        mode,
        spans: &spans,
        stack: Vec::new(),
        out: String::with_capacity(text.len() + spans.len() * 4),
    };
    let mut line_start = false;
    for position in 0..=chars.len() {
        renderer.close(&closes_at[position]);
        if line_start && mode == RenderMode::PlatformMarkup && renderer.in_quote() {
            renderer.out.push('>');
        }
        for &idx in &opens_at[position] {
            renderer.open(idx);
        }
        if let Some(&ch) = chars.get(position) {
            renderer.push_char(ch);
            line_start = ch == '\n';
        }
    }
    renderer.out
}

struct Span<'a> {
    kind: &'a AnnotationKind,
    start: usize,
    end: usize,
}

impl Span<'_> {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

struct Renderer<'a> {
    mode: RenderMode,
    spans: &'a [Span<'a>],
    stack: Vec<usize>,
    out: String,
}

impl Renderer<'_> {
    fn in_code(&self) -> bool {
        self.stack.iter().any(|&idx| self.spans[idx].kind.is_code())
    }

    fn in_quote(&self) -> bool {
        self.stack.iter().any(|&idx| self.spans[idx].kind.is_quote())
    }

    fn push_char(&mut self, ch: char) {
        match self.mode {
            RenderMode::Standard => self.out.push(ch),
            RenderMode::PlatformMarkup if self.in_code() => {
                push_escaped(&mut self.out, ch, &['`', '\\']);
            }
            RenderMode::PlatformMarkup => push_escaped(&mut self.out, ch, ESCAPED),
        }
    }

    fn open(&mut self, idx: usize) {
        self.stack.push(idx);
        let tag = open_tag(self.spans[idx].kind, self.mode);
        self.out.push_str(&tag);
    }

    /// Closes every span in `closing`, reopening spans that were opened
    /// above the lowest of them but do not end here.
    fn close(&mut self, closing: &[usize]) {
        let Some(lowest) = self
            .stack
            .iter()
            .position(|idx| closing.contains(idx))
        else {
            return;
        };

        let mut reopen = Vec::new();
        while self.stack.len() > lowest {
            let Some(idx) = self.stack.pop() else { break };
            let tag = close_tag(self.spans[idx].kind, self.mode);
            self.out.push_str(&tag);
            if !closing.contains(&idx) {
                reopen.push(idx);
            }
        }
        for idx in reopen.into_iter().rev() {
            self.open(idx);
        }
    }
}

fn open_tag(kind: &AnnotationKind, mode: RenderMode) -> String {
    let (standard, platform) = match kind {
        AnnotationKind::Bold => ("**", "*"),
        AnnotationKind::Italic => ("*", "_"),
        AnnotationKind::Underline => ("<u>", "__"),
        AnnotationKind::Strikethrough => ("~~", "~"),
        AnnotationKind::Spoiler => ("<mark>", "||"),
        AnnotationKind::Code => ("`", "`"),
        AnnotationKind::Pre { language } => {
            return format!("```{}\n", language.as_deref().unwrap_or_default());
        }
        AnnotationKind::TextLink { .. } | AnnotationKind::TextMention { .. } => ("[", "["),
        AnnotationKind::Blockquote | AnnotationKind::ExpandableBlockquote => ("> ", ">"),
        AnnotationKind::Unstyled => ("", ""),
    };
    pick(mode, standard, platform)
}

fn close_tag(kind: &AnnotationKind, mode: RenderMode) -> String {
    let (standard, platform) = match kind {
        AnnotationKind::Bold => ("**", "*"),
        AnnotationKind::Italic => ("*", "_"),
        AnnotationKind::Underline => ("</u>", "__"),
        AnnotationKind::Strikethrough => ("~~", "~"),
        AnnotationKind::Spoiler => ("</mark>", "||"),
        AnnotationKind::Code => ("`", "`"),
        AnnotationKind::Pre { .. } => ("\n```", "\n```"),
        AnnotationKind::TextLink { url } => {
            return match mode {
                RenderMode::Standard => format!("]({url})"),
                RenderMode::PlatformMarkup => format!("]({})", escape_url(url)),
            };
        }
        AnnotationKind::TextMention { user_id } => return format!("](tg://user?id={user_id})"),
        // MarkdownV2 quotes end with the line; nothing to close.
        AnnotationKind::Blockquote | AnnotationKind::ExpandableBlockquote => ("\n", ""),
        AnnotationKind::Unstyled => ("", ""),
    };
    pick(mode, standard, platform)
}

fn pick(mode: RenderMode, standard: &str, platform: &str) -> String {
    match mode {
        RenderMode::Standard => standard.to_string(),
        RenderMode::PlatformMarkup => platform.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::User;

    fn bold(start: usize, end: usize) -> Annotation {
        Annotation::new(AnnotationKind::Bold, start, end)
    }

    fn italic(start: usize, end: usize) -> Annotation {
        Annotation::new(AnnotationKind::Italic, start, end)
    }

    #[test]
    fn no_annotations_standard_is_identity() {
        let text = "Hello (world) #tag!";
        assert_eq!(render(text, &[], RenderMode::Standard), text);
    }

    #[test]
    fn no_annotations_platform_escapes_only_special_characters() {
        assert_eq!(
            render("a_b.c! ok? [x]", &[], RenderMode::PlatformMarkup),
            r"a\_b\.c\! ok? \[x\]"
        );
        assert_eq!(escape(r"1+1=2 \o/"), r"1\+1\=2 \\o/");
    }

    #[test]
    fn outer_opens_before_inner_and_closes_after() {
        let out = render("0123456789", &[bold(0, 10), italic(2, 5)], RenderMode::Standard);
        assert_eq!(out, "**01*234*56789**");
    }

    #[test]
    fn co_starting_spans_open_longest_first() {
        let out = render("abcde", &[italic(0, 2), bold(0, 5)], RenderMode::PlatformMarkup);
        assert_eq!(out, "*_ab_cde*");
    }

    #[test]
    fn overlapping_spans_stay_balanced() {
        let out = render("abcdef", &[bold(0, 4), italic(2, 6)], RenderMode::PlatformMarkup);
        assert_eq!(out, "*ab_cd_*_ef_");
    }

    #[test]
    fn links_and_mentions_close_with_destination() {
        let link = Annotation::new(
            AnnotationKind::TextLink {
                url: "https://x.y/(a)".to_string(),
            },
            4,
            8,
        );
        assert_eq!(
            render("see docs", std::slice::from_ref(&link), RenderMode::Standard),
            "see [docs](https://x.y/(a))"
        );
        assert_eq!(
            render("see docs", &[link], RenderMode::PlatformMarkup),
            r"see [docs](https://x.y/(a\))"
        );

        let mention = Annotation::new(AnnotationKind::TextMention { user_id: 42 }, 0, 3);
        assert_eq!(
            render("Ann!", &[mention], RenderMode::PlatformMarkup),
            r"[Ann](tg://user?id=42)\!"
        );
    }

    #[test]
    fn code_only_escapes_backticks_and_backslashes() {
        let code = Annotation::new(AnnotationKind::Code, 2, 7);
        assert_eq!(
            render("x a_b`c.", &[code], RenderMode::PlatformMarkup),
            r"x `a_b\`c`\."
        );

        let pre = Annotation::new(
            AnnotationKind::Pre {
                language: Some("rust".to_string()),
            },
            0,
            5,
        );
        assert_eq!(
            render("fn(){", &[pre], RenderMode::Standard),
            "```rust\nfn(){\n```"
        );
    }

    #[test]
    fn quotes_differ_by_mode() {
        let quote = Annotation::new(AnnotationKind::Blockquote, 0, 7);
        assert_eq!(
            render("one\ntwo", std::slice::from_ref(&quote), RenderMode::PlatformMarkup),
            ">one\n>two"
        );
        assert_eq!(
            render("one\ntwo", &[quote], RenderMode::Standard),
            "> one\ntwo\n"
        );
    }

    #[test]
    fn utf16_offsets_skip_whole_surrogate_pairs() {
        // The emoji occupies two UTF-16 units.
        assert_eq!(
            render("😀 bold", &[bold(3, 7)], RenderMode::Standard),
            "😀 **bold**"
        );
        // A boundary inside the pair lands after the emoji.
        assert_eq!(
            render("😀ab", &[italic(1, 4)], RenderMode::Standard),
            "😀*ab*"
        );
    }

    #[test]
    fn degenerate_spans_are_dropped_or_clamped() {
        assert_eq!(
            render("abcd", &[bold(2, 2), italic(2, 100)], RenderMode::Standard),
            "ab*cd*"
        );
        assert_eq!(render("abcd", &[bold(9, 12)], RenderMode::Standard), "abcd");
    }

    #[test]
    fn entities_map_to_annotations() {
        let entities = vec![
            MessageEntity {
                kind: "hashtag".to_string(),
                offset: 0,
                length: 4,
                url: None,
                user: None,
                language: None,
            },
            MessageEntity {
                kind: "text_mention".to_string(),
                offset: 5,
                length: 3,
                url: None,
                user: Some(User {
                    id: 9,
                    is_bot: false,
                    first_name: "Bob".to_string(),
                    username: None,
                }),
                language: None,
            },
            MessageEntity {
                kind: "underline".to_string(),
                offset: 9,
                length: 2,
                url: None,
                user: None,
                language: None,
            },
        ];

        assert_eq!(
            Annotation::from(&entities[0]).kind,
            AnnotationKind::Unstyled
        );
        assert_eq!(
            render_entities("#tag Bob ok", &entities, RenderMode::Standard),
            "#tag [Bob](tg://user?id=9) <u>ok</u>"
        );
        assert_eq!(
            render_entities("#tag Bob ok", &entities, RenderMode::PlatformMarkup),
            r"\#tag [Bob](tg://user?id=9) __ok__"
        );
    }
}
