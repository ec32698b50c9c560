//! Human-facing address syntax.
//!
//! `@name rest` sends `rest` as a direct message to the peer whose display
//! name is `name`; `#room rest` sends to a room, except the reserved global
//! channel name which maps to [`ChannelAddress::Global`]. Anything else is a
//! global message with the whole line as content.

use std::sync::LazyLock;

use regex::Regex;

use crate::common::{ChannelAddress, Recipients, UserId};
use crate::error::{ChatError, Result};
use crate::presence::PresenceRegistry;

pub const DEFAULT_GLOBAL_CHANNEL: &str = "global";

static ADDRESSED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([^ ]+) (.+)$").expect("static regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInput {
    pub content: String,
    pub channel: ChannelAddress,
}

#[derive(Debug, Clone)]
pub struct ChannelParser {
    global_channel_name: String,
}

impl Default for ChannelParser {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_CHANNEL)
    }
}

impl ChannelParser {
    pub fn new(global_channel_name: impl Into<String>) -> Self {
        Self {
            global_channel_name: global_channel_name.into(),
        }
    }

    pub fn global_channel_name(&self) -> &str {
        &self.global_channel_name
    }

    /// Parses a single address token.
    ///
    /// `Ok(None)` means the token was an `@name` that matches no known peer.
    /// A token with neither prefix yields [`ChatError::UnknownChannelPrefix`].
    pub fn parse_channel(
        &self,
        token: &str,
        registry: &PresenceRegistry,
    ) -> Result<Option<ChannelAddress>> {
        if let Some(name) = token.strip_prefix('@') {
            Ok(registry
                .find_by_display_name(name)
                .map(|presence| ChannelAddress::direct(Recipients::single(presence.user.id))))
        } else if let Some(name) = token.strip_prefix('#') {
            if name == self.global_channel_name {
                Ok(Some(ChannelAddress::Global))
            } else {
                Ok(Some(ChannelAddress::room(name)))
            }
        } else {
            Err(ChatError::UnknownChannelPrefix(token.to_string()))
        }
    }

    /// Splits a typed line into content and channel. Never fails: anything
    /// that does not address a known channel goes to global unchanged.
    pub fn parse_message(&self, raw: &str, registry: &PresenceRegistry) -> ParsedInput {
        let fallback = || ParsedInput {
            content: raw.to_string(),
            channel: ChannelAddress::Global,
        };

        let Some(captures) = ADDRESSED_LINE.captures(raw) else {
            return fallback();
        };

        match self.parse_channel(&captures[1], registry) {
            Ok(Some(channel)) => ParsedInput {
                content: captures[2].to_string(),
                channel,
            },
            Ok(None) => {
                log::debug!("No online peer named `{}`; sending to global", &captures[1][1..]);
                fallback()
            }
            Err(_) => fallback(),
        }
    }

    /// Label for a channel as shown to the user. `me` is left out of direct
    /// message labels when other recipients exist.
    pub fn display_name(
        &self,
        channel: &ChannelAddress,
        registry: &PresenceRegistry,
        me: Option<&UserId>,
    ) -> String {
        match channel {
            ChannelAddress::Global => format!("#{}", self.global_channel_name),
            ChannelAddress::Room { name } => format!("#{name}"),
            ChannelAddress::DirectMessage { recipients } => {
                let others: Vec<&UserId> = recipients
                    .iter()
                    .filter(|id| Some(*id) != me)
                    .collect();
                let shown: Vec<&UserId> = if others.is_empty() {
                    recipients.iter().collect()
                } else {
                    others
                };
                shown
                    .into_iter()
                    .map(|id| {
                        let name = registry
                            .get(id)
                            .map(|presence| presence.user.display_name)
                            .unwrap_or_else(|| id.to_string());
                        format!("@{name}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ChatUser, Presence, PresenceStatus};

    fn registry_with(name: &str) -> (PresenceRegistry, UserId) {
        let registry = PresenceRegistry::new();
        let id = UserId::new();
        registry.register(Presence::new(ChatUser::new(id, name), PresenceStatus::Online));
        (registry, id)
    }

    #[test]
    fn room_prefix_selects_room() {
        let parsed = ChannelParser::default().parse_message("#general hello", &PresenceRegistry::new());
        assert_eq!(
            parsed,
            ParsedInput {
                content: "hello".to_string(),
                channel: ChannelAddress::room("general"),
            }
        );
    }

    #[test]
    fn at_prefix_resolves_known_peer() {
        let (registry, alice) = registry_with("Alice");
        let parsed = ChannelParser::default().parse_message("@Alice hi", &registry);
        assert_eq!(parsed.content, "hi");
        assert_eq!(parsed.channel, ChannelAddress::direct(Recipients::single(alice)));
    }

    #[test]
    fn plain_text_goes_to_global() {
        let parsed = ChannelParser::default().parse_message("hello", &PresenceRegistry::new());
        assert_eq!(parsed.content, "hello");
        assert_eq!(parsed.channel, ChannelAddress::Global);
    }

    #[test]
    fn reserved_name_maps_to_global() {
        let parser = ChannelParser::default();
        let parsed = parser.parse_message("#global hey all", &PresenceRegistry::new());
        assert_eq!(parsed.content, "hey all");
        assert_eq!(parsed.channel, ChannelAddress::Global);

        let custom = ChannelParser::new("lobby");
        assert_eq!(
            custom.parse_message("#lobby x", &PresenceRegistry::new()).channel,
            ChannelAddress::Global
        );
    }

    #[test]
    fn unknown_peer_falls_back_to_global_with_full_line() {
        let (registry, _) = registry_with("Alice");
        let parsed = ChannelParser::default().parse_message("@Bob are you there", &registry);
        assert_eq!(parsed.content, "@Bob are you there");
        assert_eq!(parsed.channel, ChannelAddress::Global);
    }

    #[test]
    fn address_without_content_is_plain_text() {
        let parsed = ChannelParser::default().parse_message("#general", &PresenceRegistry::new());
        assert_eq!(parsed.content, "#general");
        assert_eq!(parsed.channel, ChannelAddress::Global);
    }

    #[test]
    fn only_the_first_space_separates_the_address() {
        let parser = ChannelParser::default();
        let registry = PresenceRegistry::new();

        let parsed = parser.parse_message("#dev   indented", &registry);
        assert_eq!(parsed.channel, ChannelAddress::room("dev"));
        assert_eq!(parsed.content, "  indented");

        let parsed = parser.parse_message("#dev\tsolo", &registry);
        assert_eq!(parsed.channel, ChannelAddress::Global);
        assert_eq!(parsed.content, "#dev\tsolo");
    }

    #[test]
    fn token_without_prefix_is_reported() {
        let result = ChannelParser::default().parse_channel("general", &PresenceRegistry::new());
        assert!(matches!(result, Err(ChatError::UnknownChannelPrefix(token)) if token == "general"));
    }

    #[test]
    fn display_names() {
        let (registry, alice) = registry_with("Alice");
        let me = UserId::new();
        let parser = ChannelParser::default();

        assert_eq!(parser.display_name(&ChannelAddress::Global, &registry, None), "#global");
        assert_eq!(parser.display_name(&ChannelAddress::room("dev"), &registry, None), "#dev");

        let dm = ChannelAddress::direct(Recipients::new([alice, me]).unwrap());
        assert_eq!(parser.display_name(&dm, &registry, Some(&me)), "@Alice");

        let stranger = UserId::new();
        let dm = ChannelAddress::direct(Recipients::single(stranger));
        assert_eq!(parser.display_name(&dm, &registry, None), format!("@{stranger}"));
    }
}
