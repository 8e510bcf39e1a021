//! USER SEARCH HARVESTER
//! Drives a browser through a user search, watches the search timeline API
//! traffic and stores every user entry it surfaces until the scroll budget runs out.

mod error;
mod macros;

pub mod config;
pub mod driver;
pub mod extract;
pub mod filter;
pub mod pagination;
pub mod process;
pub mod session;
pub mod store;

pub use error::{Error, Result};

/// Only responses whose URL starts with this are looked at.
pub const SEARCH_TIMELINE_PREFIX: &str =
    "https://twitter.com/i/api/graphql/Aj1nGkALq99Xg3XI0OZBtw/SearchTimeline?";
/// Entry ids starting with this are the top/bottom pagination markers, not users.
pub const CURSOR_ENTRY_PREFIX: &str = "cursor-";
const ADD_ENTRIES_INSTRUCTION: &str = "TimelineAddEntries";
const SEARCH_PAGE_URL: &str = "https://twitter.com/search";
const AUTH_COOKIE_NAME: &str = "auth_token";
const AUTH_COOKIE_DOMAIN: &str = ".twitter.com";
const AUTH_TOKEN_ENV: &str = "TWITTER_AUTH_TOKEN";
/// Capacity of the channel between the interception task and the session.
const RESPONSE_CHANNEL_CAPACITY: usize = 256;
/// There are usually around 20 users per search page.
const EXPECTED_ENTRIES_PER_RESPONSE: usize = 20;
