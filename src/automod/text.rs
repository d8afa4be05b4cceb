//! Text helpers shared by content triggers

use regex::Regex;
use std::sync::LazyLock;

static LINK_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(https?://.)?(www\.)?[-a-z0-9@:%._+~#=]{2,256}\.[a-z]{2,6}\b([-a-z0-9@:%_+.~#?&/=]*)",
    )
    .ok()
});

static INVITE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:discord(?:app)?\.com/invite|discord\.gg(?:/#)?(?:/invite)?)/([a-z0-9-]+)",
    )
    .ok()
});

/// Invite sites that proxy to Discord servers
const THIRD_PARTY_INVITE_HOSTS: &[&str] = &[
    "discord.me",
    "discord.io",
    "invite.gg",
    "dsc.gg",
    "discord.link",
    "discordservers.com",
];

/// All link-like substrings in `text`
pub fn find_links(text: &str) -> Vec<&str> {
    LINK_RE
        .as_ref()
        .map(|re| re.find_iter(text).map(|m| m.as_str()).collect())
        .unwrap_or_default()
}

pub fn contains_link(text: &str) -> bool {
    LINK_RE.as_ref().is_some_and(|re| re.is_match(text))
}

/// Lowercased host of a link, without scheme, credentials or port
pub fn link_host(link: &str) -> Option<String> {
    let without_scheme = link
        .split_once("://")
        .map_or(link, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches('.').to_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Whether `host` is `domain` or one of its subdomains
pub fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches('.').to_lowercase();
    !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
}

/// Discord invite codes found in `text`
pub fn invite_codes(text: &str) -> Vec<String> {
    INVITE_RE
        .as_ref()
        .map(|re| {
            re.captures_iter(text)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Whether `text` links to a third-party invite proxy
pub fn contains_third_party_invite(text: &str) -> bool {
    find_links(text)
        .into_iter()
        .filter_map(link_host)
        .any(|host| THIRD_PARTY_INVITE_HOSTS.iter().any(|d| host_matches(&host, d)))
}

pub fn contains_invite(text: &str) -> bool {
    !invite_codes(text).is_empty() || contains_third_party_invite(text)
}

/// Split text into lowercase words, treating every non-alphanumeric character as a separator
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_links() {
        let links = find_links("see https://Example.com/path?q=1 and www.rust-lang.org");
        assert_eq!(links.len(), 2);
        assert!(contains_link("go to foo.io now"));
        assert!(!contains_link("nothing to see here"));
    }

    #[test]
    fn test_link_host() {
        assert_eq!(link_host("https://user:pw@Sub.Example.com:8080/x").as_deref(), Some("sub.example.com"));
        assert_eq!(link_host("example.org?x=1").as_deref(), Some("example.org"));
        assert_eq!(link_host("").as_deref(), None);
    }

    #[test]
    fn test_host_matches() {
        assert!(host_matches("example.com", "example.com"));
        assert!(host_matches("cdn.example.com", "example.com"));
        assert!(!host_matches("notexample.com", "example.com"));
        assert!(!host_matches("example.com", ""));
    }

    #[test]
    fn test_invites() {
        assert_eq!(invite_codes("join discord.gg/abc-123 now"), vec!["abc-123"]);
        assert_eq!(invite_codes("https://discord.com/invite/XyZ"), vec!["XyZ"]);
        assert!(contains_invite("https://discord.me/server"));
        assert!(!contains_invite("https://discord.com/channels/1/2"));
    }

    #[test]
    fn test_words() {
        let words: Vec<String> = words("This is not SPAM!!").collect();
        assert_eq!(words, vec!["this", "is", "not", "spam"]);
    }
}
