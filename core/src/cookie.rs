//! Browser-style cookie storage shared by requests on one simulated client.
//!
//! # Design
//! `CookieJar` is a cheap handle (`Clone` shares the same store). Every
//! `FakeRequest` built from the same jar attaches the same cookies, and every
//! `Set-Cookie` it receives lands in the same place, which is what makes the
//! session cookie set at login visible to later task requests.
//!
//! Entries expire lazily: nothing is swept in the background, an expired
//! entry is simply invisible to `get`/`get_all` and is removed when one of
//! them runs. Names and values are stored verbatim; escaping is a wire
//! concern of whoever formats the header.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Cookie carrying the authenticated user's id.
pub const USER_ID_COOKIE: &str = "study_planner_user_id";
/// Cookie carrying the authenticated user's email.
pub const EMAIL_COOKIE: &str = "study_planner_email";

/// Lifetime given to every cookie accepted from a `Set-Cookie` header.
///
/// The header's own `Max-Age` / `Expires` attributes are not consulted.
pub const SET_COOKIE_TTL_DAYS: i64 = 7;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

/// Attributes accepted by `CookieJar::set` besides name, value and lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    /// Defaults to `/`.
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Lives until the jar is dropped or cleared.
    Session,
    At(Instant),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieEntry {
    pub name: String,
    pub value: String,
    pub expires: Expiry,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookieEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.expires {
            Expiry::Session => false,
            Expiry::At(at) => at <= now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    entries: Arc<Mutex<BTreeMap<String, CookieEntry>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, CookieEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `name=value`, replacing any entry with the same name.
    ///
    /// `ttl_days` of `None` makes a session cookie. Zero or negative values
    /// store an already-expired entry, which is how `delete` works. A lifetime
    /// too long for the clock to represent is kept as a session cookie.
    pub fn set(&self, name: &str, value: &str, ttl_days: Option<i64>, options: CookieOptions) {
        let now = Instant::now();
        let expires = match ttl_days {
            None => Expiry::Session,
            Some(days) if days <= 0 => Expiry::At(now),
            Some(days) => u64::try_from(days)
                .ok()
                .and_then(|days| days.checked_mul(SECONDS_PER_DAY))
                .and_then(|secs| now.checked_add(Duration::from_secs(secs)))
                .map_or(Expiry::Session, Expiry::At),
        };
        let entry = CookieEntry {
            name: name.to_string(),
            value: value.to_string(),
            expires,
            path: options.path.unwrap_or_else(|| "/".to_string()),
            domain: options.domain,
            secure: options.secure,
            same_site: options.same_site,
        };
        debug!(cookie = name, ?ttl_days, "cookie set");
        self.lock().insert(name.to_string(), entry);
    }

    /// Value of a live cookie, `None` if absent or expired.
    pub fn get(&self, name: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(name) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(name);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Full entry of a live cookie.
    pub fn entry(&self, name: &str) -> Option<CookieEntry> {
        let now = Instant::now();
        self.lock()
            .get(name)
            .filter(|entry| !entry.is_expired(now))
            .cloned()
    }

    /// Expire `name` immediately. `options` mirrors what was used to set it.
    pub fn delete(&self, name: &str, options: CookieOptions) {
        self.set(name, "", Some(-1), options);
        debug!(cookie = name, "cookie deleted");
    }

    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All live cookies, ordered by name.
    pub fn get_all(&self) -> BTreeMap<String, String> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.value.clone()))
            .collect()
    }

    pub fn clear_all(&self) {
        let names: Vec<String> = self.get_all().into_keys().collect();
        for name in &names {
            self.delete(name, CookieOptions::default());
        }
        debug!(count = names.len(), "all cookies cleared");
    }

    /// Request-side `Cookie` header value, `None` when the jar is empty.
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = self.get_all();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Accept one `Set-Cookie` header value. Returns the stored name.
    ///
    /// Only the leading `name=value` is read; the entry always gets
    /// `SET_COOKIE_TTL_DAYS`.
    pub fn store_set_cookie(&self, header: &str) -> Option<String> {
        let (name, value) = parse_set_cookie(header)?;
        self.set(&name, &value, Some(SET_COOKIE_TTL_DAYS), CookieOptions::default());
        Some(name)
    }
}

/// Leading `name=value` of a `Set-Cookie` header, both parts non-empty.
pub fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let first = header.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

/// Split a request `Cookie` header into its pairs. Pairs missing a name or a
/// value are skipped.
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            if name.is_empty() || value.is_empty() {
                return None;
            }
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// Format a response-side `Set-Cookie` value.
pub fn format_set_cookie(name: &str, value: &str, max_age: Duration, options: &CookieOptions) -> String {
    let mut header = format!(
        "{name}={value}; Path={}; Max-Age={}",
        options.path.as_deref().unwrap_or("/"),
        max_age.as_secs()
    );
    if let Some(domain) = &options.domain {
        header.push_str(&format!("; Domain={domain}"));
    }
    if options.secure {
        header.push_str("; Secure");
    }
    header.push_str(&format!("; SameSite={}", options.same_site.as_str()));
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_value() {
        let jar = CookieJar::new();
        jar.set("sid", "abc", Some(7), CookieOptions::default());
        assert_eq!(jar.get("sid").as_deref(), Some("abc"));
        assert!(jar.exists("sid"));
    }

    #[test]
    fn get_missing_is_none() {
        let jar = CookieJar::new();
        assert!(jar.get("nope").is_none());
        assert!(!jar.exists("nope"));
    }

    #[test]
    fn set_overwrites_by_name() {
        let jar = CookieJar::new();
        jar.set("theme", "light", Some(7), CookieOptions::default());
        jar.set("theme", "dark", Some(7), CookieOptions::default());
        assert_eq!(jar.get_all().len(), 1);
        assert_eq!(jar.get("theme").as_deref(), Some("dark"));
    }

    #[test]
    fn non_positive_ttl_is_immediately_unreadable() {
        let jar = CookieJar::new();
        jar.set("a", "1", Some(0), CookieOptions::default());
        jar.set("b", "2", Some(-3), CookieOptions::default());
        assert!(jar.get("a").is_none());
        assert!(jar.get("b").is_none());
        assert!(jar.get_all().is_empty());
    }

    #[test]
    fn delete_hides_cookie_immediately() {
        let jar = CookieJar::new();
        jar.set("sid", "abc", Some(7), CookieOptions::default());
        jar.delete("sid", CookieOptions::default());
        assert!(jar.get("sid").is_none());
        assert!(jar.cookie_header().is_none());
    }

    #[test]
    fn session_cookie_has_no_expiry() {
        let jar = CookieJar::new();
        jar.set("tab", "1", None, CookieOptions::default());
        let entry = jar.entry("tab").unwrap();
        assert_eq!(entry.expires, Expiry::Session);
        assert_eq!(entry.path, "/");
    }

    #[test]
    fn huge_ttl_never_expires_and_does_not_panic() {
        let jar = CookieJar::new();
        jar.set("a", "1", Some(i64::MAX), CookieOptions::default());
        jar.set("b", "2", Some(200_000_000_000_000), CookieOptions::default());
        assert_eq!(jar.entry("a").map(|e| e.expires), Some(Expiry::Session));
        assert_eq!(jar.get("b").as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn cookie_expires_after_ttl_elapses() {
        let jar = CookieJar::new();
        jar.set("sid", "abc", Some(7), CookieOptions::default());

        tokio::time::advance(Duration::from_secs(6 * SECONDS_PER_DAY)).await;
        assert_eq!(jar.get("sid").as_deref(), Some("abc"));

        tokio::time::advance(Duration::from_secs(SECONDS_PER_DAY)).await;
        assert!(jar.get("sid").is_none());
    }

    #[test]
    fn clones_share_storage() {
        let jar = CookieJar::new();
        let other = jar.clone();
        other.set("shared", "yes", Some(1), CookieOptions::default());
        assert_eq!(jar.get("shared").as_deref(), Some("yes"));
        jar.clear_all();
        assert!(other.get_all().is_empty());
    }

    #[test]
    fn cookie_header_joins_pairs_in_name_order() {
        let jar = CookieJar::new();
        jar.set("b", "2", Some(1), CookieOptions::default());
        jar.set("a", "1", Some(1), CookieOptions::default());
        assert_eq!(jar.cookie_header().as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn set_cookie_header_round_trips_into_jar() {
        let jar = CookieJar::new();
        let name = jar.store_set_cookie("sid=abc123; Path=/; Max-Age=604800");
        assert_eq!(name.as_deref(), Some("sid"));
        assert_eq!(jar.get("sid").as_deref(), Some("abc123"));
    }

    #[test]
    fn set_cookie_without_value_is_ignored() {
        assert!(parse_set_cookie("sid=; Path=/").is_none());
        assert!(parse_set_cookie("garbage").is_none());
        assert_eq!(
            parse_set_cookie("  token = a=b ; Path=/"),
            Some(("token".to_string(), "a=b".to_string()))
        );
    }

    #[test]
    fn cookie_header_parsing_skips_incomplete_pairs() {
        let cookies = parse_cookie_header("a=1; broken; b=; c=3");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies["a"], "1");
        assert_eq!(cookies["c"], "3");
    }

    #[test]
    fn format_set_cookie_includes_attributes() {
        let header = format_set_cookie(
            USER_ID_COOKIE,
            "42",
            Duration::from_secs(604_800),
            &CookieOptions::default(),
        );
        assert_eq!(
            header,
            "study_planner_user_id=42; Path=/; Max-Age=604800; SameSite=Lax"
        );

        let secure = CookieOptions {
            path: Some("/api".into()),
            domain: Some("planner.local".into()),
            secure: true,
            same_site: SameSite::Strict,
        };
        assert_eq!(
            format_set_cookie("x", "y", Duration::from_secs(60), &secure),
            "x=y; Path=/api; Max-Age=60; Domain=planner.local; Secure; SameSite=Strict"
        );
    }

    mod proptest_jar {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn set_then_get_returns_value_verbatim(name in "[a-zA-Z0-9_]{1,16}", value in "\\PC*") {
                let jar = CookieJar::new();
                jar.set(&name, &value, Some(SET_COOKIE_TTL_DAYS), CookieOptions::default());
                prop_assert_eq!(jar.get(&name), Some(value));
            }

            #[test]
            fn any_ttl_is_accepted(ttl in any::<i64>()) {
                let jar = CookieJar::new();
                jar.set("sid", "abc", Some(ttl), CookieOptions::default());
                prop_assert_eq!(jar.exists("sid"), ttl > 0);
            }

            #[test]
            fn formatted_set_cookie_lands_in_jar(
                name in "[a-zA-Z0-9_]{1,16}",
                value in "[a-zA-Z0-9%._=-]{1,32}",
                max_age in 0u64..10_000_000,
            ) {
                let header = format_set_cookie(&name, &value, Duration::from_secs(max_age), &CookieOptions::default());
                let jar = CookieJar::new();
                prop_assert_eq!(jar.store_set_cookie(&header), Some(name.clone()));
                prop_assert_eq!(jar.get(&name), Some(value));
            }
        }
    }
}
