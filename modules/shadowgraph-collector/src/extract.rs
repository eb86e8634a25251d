//! Pure HTML extraction. Everything here takes a rendered document string
//! and returns records; the browser session never leaks in, so these run
//! against fixtures in tests.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use shadowgraph_common::parse_approx_count;

use crate::selectors;
use crate::types::{CollectedProfile, MemberRecord};

/// Interstitial pages that replace the requested content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Login wall: the session cookies are no longer valid.
    Login,
    /// Rate-limit / anti-automation gate.
    Blocked,
    /// The account does not exist (or is suspended).
    NotFound,
}

/// Classify gate interstitials. `None` means the page holds real content.
pub fn detect_gate(html: &str) -> Option<Gate> {
    let lowered = html.to_lowercase();

    if selectors::NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Some(Gate::NotFound);
    }
    if selectors::LOGIN_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Some(Gate::Login);
    }
    if selectors::BLOCKED_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Some(Gate::Blocked);
    }

    let document = Html::parse_document(html);
    let login = Selector::parse(selectors::LOGIN_FORM).unwrap();
    if document.select(&login).next().is_some() {
        return Some(Gate::Login);
    }

    None
}

/// Extract a profile record. Prefers the embedded ld+json schema; any field
/// it doesn't cover is filled from the DOM selectors. One missing attribute
/// never fails the record.
pub fn parse_profile(html: &str, username: &str) -> CollectedProfile {
    let mut profile = CollectedProfile {
        username: username.to_string(),
        ..Default::default()
    };

    let document = Html::parse_document(html);

    if let Some(schema) = embedded_profile_schema(&document) {
        apply_schema(&mut profile, &schema);
    }
    fill_from_dom(&mut profile, &document);

    profile
}

/// Extract all currently rendered list entries. Cells without an extractable
/// account id are skipped (the id is the record's identity, not an optional
/// attribute).
pub fn parse_list_cells(html: &str) -> Vec<MemberRecord> {
    let document = Html::parse_document(html);
    let cell_sel = Selector::parse(selectors::USER_CELL).unwrap();
    let button_sel = Selector::parse(selectors::FOLLOW_BUTTON).unwrap();
    let link_sel = Selector::parse(selectors::CELL_LINK).unwrap();
    let bio_sel = Selector::parse(selectors::USER_DESCRIPTION).unwrap();

    let mut records = Vec::new();
    for cell in document.select(&cell_sel) {
        let account_id = cell
            .select(&button_sel)
            .next()
            .and_then(|b| b.value().attr("data-testid"))
            .and_then(account_id_from_testid);
        let Some(account_id) = account_id else {
            debug!("List cell without follow button, skipping");
            continue;
        };

        let Some(username) = cell
            .select(&link_sel)
            .filter_map(|a| a.value().attr("href"))
            .find_map(handle_from_href)
        else {
            debug!(account_id, "List cell without handle link, skipping");
            continue;
        };

        let display_name = cell
            .select(&link_sel)
            .flat_map(|a| a.text())
            .map(str::trim)
            .find(|t| !t.is_empty() && !t.starts_with('@'))
            .map(str::to_string);

        let bio = cell
            .select(&bio_sel)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty());

        records.push(MemberRecord {
            account_id,
            username,
            display_name,
            bio,
        });
    }
    records
}

/// `{account_id}-follow` / `{account_id}-unfollow` → account id.
pub(crate) fn account_id_from_testid(testid: &str) -> Option<String> {
    let id = testid
        .strip_suffix("-unfollow")
        .or_else(|| testid.strip_suffix("-follow"))?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(id.to_string())
}

/// `/alice` → `alice`; rejects nested paths and platform routes.
fn handle_from_href(href: &str) -> Option<String> {
    let handle = href.strip_prefix('/')?;
    if handle.is_empty()
        || handle.contains('/')
        || handle.contains('?')
        || handle == "i"
        || handle == "home"
        || handle == "explore"
        || handle == "search"
    {
        return None;
    }
    Some(handle.to_string())
}

fn embedded_profile_schema(document: &Html) -> Option<serde_json::Value> {
    let schema_sel = Selector::parse(selectors::PROFILE_SCHEMA).unwrap();
    for script in document.select(&schema_sel) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        if value["@type"] == "ProfilePage" || value["author"].is_object() {
            return Some(value);
        }
    }
    None
}

fn apply_schema(profile: &mut CollectedProfile, schema: &serde_json::Value) {
    let author = &schema["author"];

    if let Some(id) = author["identifier"].as_str() {
        profile.account_id = Some(id.to_string());
    }
    if let Some(handle) = author["additionalName"].as_str() {
        profile.username = handle.to_string();
    }
    profile.display_name = author["givenName"].as_str().map(str::to_string);
    profile.bio = author["description"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    profile.location = author["homeLocation"]["name"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    profile.profile_image_url = author["image"]["contentUrl"].as_str().map(str::to_string);
    profile.website = schema["relatedLink"]
        .as_array()
        .and_then(|links| links.iter().find_map(|l| l.as_str()))
        .map(str::to_string);

    if let Some(stats) = author["interactionStatistic"].as_array() {
        for stat in stats {
            let count = stat["userInteractionCount"].as_i64();
            match stat["name"].as_str() {
                Some("Follows") => profile.claimed_followers = count,
                Some("Friends") => profile.claimed_following = count,
                Some("Tweets") | Some("Posts") => profile.claimed_tweets = count,
                _ => {}
            }
        }
    }
}

/// Fill any still-missing fields from the DOM selector set.
fn fill_from_dom(profile: &mut CollectedProfile, document: &Html) {
    if profile.display_name.is_none() {
        let sel = Selector::parse(selectors::USER_NAME).unwrap();
        profile.display_name = document
            .select(&sel)
            .next()
            .and_then(|el| {
                el.text()
                    .map(str::trim)
                    .find(|t| !t.is_empty() && !t.starts_with('@'))
            })
            .map(str::to_string);
    }
    if profile.bio.is_none() {
        let sel = Selector::parse(selectors::USER_DESCRIPTION).unwrap();
        profile.bio = document
            .select(&sel)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty());
    }
    if profile.location.is_none() {
        let sel = Selector::parse(selectors::USER_LOCATION).unwrap();
        profile.location = document
            .select(&sel)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty());
    }
    if profile.website.is_none() {
        let sel = Selector::parse(selectors::USER_URL).unwrap();
        profile.website = document
            .select(&sel)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty());
    }
    if profile.profile_image_url.is_none() {
        let sel = Selector::parse(selectors::PROFILE_IMAGE).unwrap();
        profile.profile_image_url = document
            .select(&sel)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);
    }
    if profile.claimed_following.is_none() {
        let sel = Selector::parse(selectors::FOLLOWING_LINK).unwrap();
        profile.claimed_following = document
            .select(&sel)
            .next()
            .and_then(|el| first_count_in_text(&element_text(el)));
    }
    if profile.claimed_followers.is_none() {
        let sel = Selector::parse(selectors::FOLLOWERS_LINK).unwrap();
        profile.claimed_followers = document
            .select(&sel)
            .next()
            .and_then(|el| first_count_in_text(&element_text(el)));
    }
    if profile.account_id.is_none() {
        let sel = Selector::parse(selectors::FOLLOW_BUTTON).unwrap();
        profile.account_id = document
            .select(&sel)
            .next()
            .and_then(|el| el.value().attr("data-testid"))
            .and_then(account_id_from_testid);
    }
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// First whitespace-separated token that parses as a count ("1,234
/// Following" → 1234).
fn first_count_in_text(text: &str) -> Option<i64> {
    text.split_whitespace().find_map(parse_approx_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_WITH_SCHEMA: &str = r#"
        <html><head>
        <script type="application/ld+json">
        {
            "@context": "https://schema.org",
            "@type": "ProfilePage",
            "author": {
                "@type": "Person",
                "identifier": "12345",
                "additionalName": "alice",
                "givenName": "Alice A.",
                "description": "graphs all the way down",
                "homeLocation": {"@type": "Place", "name": "NYC"},
                "image": {"contentUrl": "https://pbs.example/profile_images/alice.jpg"},
                "interactionStatistic": [
                    {"@type": "InteractionCounter", "name": "Follows", "userInteractionCount": 100},
                    {"@type": "InteractionCounter", "name": "Friends", "userInteractionCount": 50}
                ]
            },
            "relatedLink": ["https://alice.example"]
        }
        </script>
        </head><body></body></html>
    "#;

    const PROFILE_DOM_ONLY: &str = r#"
        <html><body>
            <div data-testid="UserName"><span>Bob Builder</span><span>@bob</span></div>
            <div data-testid="UserDescription">fixes things</div>
            <span data-testid="UserLocation">Toronto</span>
            <a data-testid="UserUrl" href="https://t.co/xyz">bob.example</a>
            <img src="https://pbs.example/profile_images/bob.jpg">
            <a href="/bob/following"><span>1,234</span> <span>Following</span></a>
            <a href="/bob/followers"><span>5.6K</span> <span>Followers</span></a>
            <div data-testid="987654-follow">Follow</div>
        </body></html>
    "#;

    #[test]
    fn schema_profile_preferred() {
        let p = parse_profile(PROFILE_WITH_SCHEMA, "alice");
        assert_eq!(p.account_id.as_deref(), Some("12345"));
        assert_eq!(p.username, "alice");
        assert_eq!(p.display_name.as_deref(), Some("Alice A."));
        assert_eq!(p.bio.as_deref(), Some("graphs all the way down"));
        assert_eq!(p.location.as_deref(), Some("NYC"));
        assert_eq!(p.website.as_deref(), Some("https://alice.example"));
        assert_eq!(p.claimed_followers, Some(100));
        assert_eq!(p.claimed_following, Some(50));
    }

    #[test]
    fn dom_fallback_when_schema_absent() {
        let p = parse_profile(PROFILE_DOM_ONLY, "bob");
        assert_eq!(p.account_id.as_deref(), Some("987654"));
        assert_eq!(p.display_name.as_deref(), Some("Bob Builder"));
        assert_eq!(p.bio.as_deref(), Some("fixes things"));
        assert_eq!(p.location.as_deref(), Some("Toronto"));
        assert_eq!(p.claimed_following, Some(1234));
        assert_eq!(p.claimed_followers, Some(5600));
    }

    #[test]
    fn missing_optional_fields_do_not_fail_record() {
        let html = r#"<html><body><div data-testid="UserName"><span>Eve</span></div></body></html>"#;
        let p = parse_profile(html, "eve");
        assert_eq!(p.username, "eve");
        assert_eq!(p.display_name.as_deref(), Some("Eve"));
        assert!(p.bio.is_none());
        assert!(p.location.is_none());
        assert!(p.claimed_followers.is_none());
    }

    fn cell(id: &str, handle: &str, name: &str) -> String {
        format!(
            r#"<div data-testid="UserCell">
                <a role="link" href="/{handle}"><span>{name}</span><span>@{handle}</span></a>
                <div data-testid="{id}-follow">Follow</div>
            </div>"#
        )
    }

    #[test]
    fn list_cells_extract_id_handle_and_name() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            cell("111", "alice", "Alice"),
            cell("222", "bob", "Bob")
        );
        let records = parse_list_cells(&html);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].account_id, "111");
        assert_eq!(records[0].username, "alice");
        assert_eq!(records[0].display_name.as_deref(), Some("Alice"));
        assert_eq!(records[1].account_id, "222");
    }

    #[test]
    fn cell_without_follow_button_is_skipped() {
        let html = r#"<html><body>
            <div data-testid="UserCell">
                <a role="link" href="/ghost"><span>Ghost</span></a>
            </div>
        </body></html>"#;
        assert!(parse_list_cells(html).is_empty());
    }

    #[test]
    fn unfollow_button_also_yields_id() {
        let html = r#"<html><body>
            <div data-testid="UserCell">
                <a role="link" href="/carol"><span>Carol</span></a>
                <div data-testid="333-unfollow">Following</div>
            </div>
        </body></html>"#;
        let records = parse_list_cells(html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].account_id, "333");
    }

    #[test]
    fn testid_parsing_rejects_non_numeric() {
        assert_eq!(account_id_from_testid("123-follow").as_deref(), Some("123"));
        assert_eq!(account_id_from_testid("456-unfollow").as_deref(), Some("456"));
        assert!(account_id_from_testid("placementTracking-follow").is_none());
        assert!(account_id_from_testid("-follow").is_none());
        assert!(account_id_from_testid("123-block").is_none());
    }

    #[test]
    fn handle_link_rejects_platform_routes() {
        assert_eq!(handle_from_href("/alice").as_deref(), Some("alice"));
        assert!(handle_from_href("/alice/status/123").is_none());
        assert!(handle_from_href("/i").is_none());
        assert!(handle_from_href("/search?q=x").is_none());
    }

    #[test]
    fn gate_detection() {
        assert_eq!(
            detect_gate("<html><body>Rate limit exceeded</body></html>"),
            Some(Gate::Blocked)
        );
        assert_eq!(
            detect_gate("<html><body>Sign in to X</body></html>"),
            Some(Gate::Login)
        );
        assert_eq!(
            detect_gate("<html><body>This account doesn\u{2019}t exist</body></html>"),
            Some(Gate::NotFound)
        );
        assert_eq!(
            detect_gate(r#"<html><body><a href="/login">Log in</a></body></html>"#),
            Some(Gate::Login)
        );
        assert_eq!(detect_gate("<html><body>hello</body></html>"), None);
    }

    #[test]
    fn count_text_parsing() {
        assert_eq!(first_count_in_text("1,234 Following"), Some(1234));
        assert_eq!(first_count_in_text("5.6K Followers"), Some(5600));
        assert_eq!(first_count_in_text("Followers"), None);
    }
}
