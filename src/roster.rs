//! Roster document loading and login validation.
//!
//! The roster is a YAML document mapping group names to member logins. It is
//! the source of truth for the warehouse roster table; every run reloads it
//! from scratch, validates its shape and drops entries whose GitHub account
//! no longer exists.

use std::{collections::BTreeSet, fmt, fs, path::Path};

use octocrab::Octocrab;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{self, Error},
    github::{self, Actor}
};

/// Longest login GitHub accepts.
const MAX_LOGIN_LEN: usize = 39;

/// One desired `(group, username)` membership pair.
///
/// Identity is the full pair; the same username may belong to several
/// groups. Ordering is lexicographic by group, then username, which keeps
/// sync plans deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Group the membership belongs to. Serialized as `group_name` to match
    /// the warehouse column.
    #[serde(rename = "group_name")]
    pub group:    String,
    /// GitHub login of the member.
    pub username: String
}

impl fmt::Display for RosterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.username)
    }
}

#[derive(Debug, Deserialize)]
struct RosterDocument {
    #[serde(default)]
    groups: Vec<GroupEntry>
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    name:    String,
    #[serde(default)]
    members: Vec<String>
}

/// Loads and validates the roster document at `path`.
///
/// # Errors
///
/// Returns [`Error::Io`](Error::Io) when the file cannot be read, and the
/// errors of [`parse_roster`] otherwise.
pub fn load_roster(path: &Path) -> Result<BTreeSet<RosterEntry>, Error> {
    let contents = fs::read_to_string(path).map_err(|source| error::io_error(path, source))?;
    parse_roster(&contents)
}

/// Parses and validates a roster from a YAML document string.
///
/// Group names and logins have surrounding whitespace trimmed. Duplicate
/// memberships collapse into one entry with a debug log.
///
/// # Errors
///
/// Propagates [`Error::Parse`](Error::Parse) when the YAML cannot be decoded
/// and [`Error::Validation`](Error::Validation) when a group name is empty or
/// a login does not have the GitHub login shape.
pub fn parse_roster(contents: &str) -> Result<BTreeSet<RosterEntry>, Error> {
    let document: RosterDocument = serde_yaml::from_str(contents)?;
    let login_pattern = Regex::new(r"^[A-Za-z0-9]+(?:-[A-Za-z0-9]+)*$")
        .map_err(|e| Error::validation(format!("invalid regex: {e}")))?;

    let mut entries = BTreeSet::new();
    for group in document.groups {
        let name = group.name.trim();
        if name.is_empty() {
            return Err(Error::validation("roster group name must not be empty"));
        }
        for member in group.members {
            let login = member.trim();
            if login.len() > MAX_LOGIN_LEN || !login_pattern.is_match(login) {
                return Err(Error::validation(format!(
                    "invalid GitHub login '{login}' in group '{name}'"
                )));
            }
            let entry = RosterEntry {
                group:    name.to_owned(),
                username: login.to_owned()
            };
            if !entries.insert(entry) {
                debug!("Dropping duplicate roster entry {}/{}", name, login);
            }
        }
    }

    Ok(entries)
}

/// Drops roster entries whose GitHub account does not exist.
///
/// Each distinct username is looked up once via `GET /users/{login}`. A 404
/// answer drops every entry of that username with a warning; the warehouse
/// only ever references real accounts.
///
/// # Errors
///
/// Any lookup failure other than 404 is a service error and aborts the run.
pub async fn filter_known_logins(
    octocrab: &Octocrab,
    entries: BTreeSet<RosterEntry>,
) -> Result<BTreeSet<RosterEntry>, Error> {
    let usernames: BTreeSet<&str> = entries.iter().map(|entry| entry.username.as_str()).collect();

    let mut unknown: BTreeSet<String> = BTreeSet::new();
    for username in usernames {
        let route = format!("/users/{username}");
        match octocrab.get::<Actor, _, ()>(route, None).await {
            Ok(_) => {}
            Err(error) if github::is_not_found(&error) => {
                warn!("GitHub user {} not found, dropping its roster entries", username);
                unknown.insert(username.to_owned());
            }
            Err(error) => {
                return Err(Error::service(format!(
                    "failed to look up GitHub user {username}: {error}"
                )));
            }
        }
    }

    Ok(entries
        .into_iter()
        .filter(|entry| !unknown.contains(&entry.username))
        .collect())
}
