//! Normalizes chat markup into plain prompt text.
//!
//! Total and pure: anything not recognized passes through untouched.

use regex::Regex;
use std::sync::LazyLock;

static CUSTOM_EMOJI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<a?:(\w+):\d+>").expect("custom emoji regex"));
static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:@[!&]?|#)\d+>").expect("mention regex"));
static SLASH_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</([\w -]+):\d+>").expect("slash command regex"));
static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]\n]+)\]\(<?(https?://[^)\s>]+)>?\)").expect("markdown link regex")
});
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+-]*").expect("code fence regex"));
static LINE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:#{1,3}|-#|>{1,3})[ \t]+").expect("line prefix regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

const EMPHASIS_MARKERS: [&str; 4] = ["**", "__", "~~", "||"];

pub fn clean(raw: &str) -> String {
    let text = CODE_FENCE.replace_all(raw, " ");
    let text = LINE_PREFIX.replace_all(&text, "");
    let text = CUSTOM_EMOJI.replace_all(&text, ":$1:");
    let text = SLASH_COMMAND.replace_all(&text, "/$1");
    let text = MENTION.replace_all(&text, " ");
    let text = MARKDOWN_LINK.replace_all(&text, "$1 ($2)");

    let mut text = text.into_owned();
    for marker in EMPHASIS_MARKERS {
        text = text.replace(marker, "");
    }
    text = text.replace('`', "");

    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::clean;

    #[test]
    fn strips_mentions_and_emphasis() {
        let got = clean("Hey <@123456> check **this** out <#998877>");
        assert_eq!(got, "Hey check this out");
    }

    #[test]
    fn keeps_custom_emoji_name_and_link_target() {
        let got = clean("shipped <:ergo:1234> see [the PR](https://github.com/x/y/pull/1)");
        assert_eq!(got, "shipped :ergo: see the PR (https://github.com/x/y/pull/1)");
    }

    #[test]
    fn removes_quote_heading_and_fence_noise() {
        let raw = "## Release\n> quoted line\n```rust\nfn main() {}\n```\n\n\nend";
        assert_eq!(clean(raw), "Release quoted line fn main() {} end");
    }

    #[test]
    fn role_mentions_and_slash_commands() {
        assert_eq!(clean("<@&42> run </deploy:77> now"), "run /deploy now");
    }

    #[test]
    fn unrecognized_markup_passes_through() {
        assert_eq!(clean("a <b> *c* {d}"), "a <b> *c* {d}");
    }

    #[test]
    fn empty_and_whitespace_input_is_total() {
        assert_eq!(clean(""), "");
        assert_eq!(clean(" \n\t "), "");
    }
}
