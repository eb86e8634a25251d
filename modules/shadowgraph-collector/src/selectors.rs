//! Documented DOM selector set, current as of mid-2026 markup.
//!
//! Extraction prefers the embedded ld+json profile schema and only falls
//! back to these. Tracking upstream markup changes beyond this set is out of
//! scope; update here when the frontend ships a new layout.

/// Embedded structured profile payload on profile pages.
pub const PROFILE_SCHEMA: &str = r#"script[type="application/ld+json"]"#;

/// Profile header: display name block.
pub const USER_NAME: &str = r#"div[data-testid="UserName"]"#;

pub const USER_DESCRIPTION: &str = r#"div[data-testid="UserDescription"]"#;

pub const USER_LOCATION: &str = r#"span[data-testid="UserLocation"]"#;

pub const USER_URL: &str = r#"a[data-testid="UserUrl"]"#;

pub const PROFILE_IMAGE: &str = r#"img[src*="profile_images"]"#;

/// Claimed-count links in the profile header.
pub const FOLLOWING_LINK: &str = r#"a[href$="/following"]"#;
pub const FOLLOWERS_LINK: &str = r#"a[href$="/followers"], a[href$="/verified_followers"]"#;

/// One rendered entry in a follow list.
pub const USER_CELL: &str = r#"div[data-testid="UserCell"]"#;

/// Follow/unfollow button inside a cell or profile header; its testid is
/// `{account_id}-follow` / `{account_id}-unfollow`, the only place the
/// numeric account id appears in rendered markup.
pub const FOLLOW_BUTTON: &str = r#"[data-testid$="-follow"], [data-testid$="-unfollow"]"#;

/// Anchor links inside a cell; the first same-origin one is the handle link.
pub const CELL_LINK: &str = r#"a[role="link"]"#;

/// Header shown on empty/error list states ("rate limit exceeded", ...).
pub const EMPTY_STATE: &str = r#"div[data-testid="empty_state_header_text"]"#;

/// Login wall markers: redirect form or sign-in CTA.
pub const LOGIN_FORM: &str = r#"form[action="/sessions"], a[data-testid="login"], a[href="/login"]"#;

/// Text markers classifying gate pages.
pub const BLOCKED_MARKERS: &[&str] = &[
    "rate limit exceeded",
    "unusual activity",
    "something went wrong. try reloading",
];

pub const NOT_FOUND_MARKERS: &[&str] = &["this account doesn\u{2019}t exist", "account suspended"];

pub const LOGIN_MARKERS: &[&str] = &["sign in to x", "log in to x"];
