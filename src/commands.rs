use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::favorites::{Favorites, Removal};
use crate::models::Snapshot;
use crate::refresh::{Refresh, RefreshCoordinator, RefreshOutcome};

/// Replies longer than this many characters are refused; Telegram caps
/// messages at 4096
pub const MAX_REPLY_LEN: usize = 4000;

pub const COMMANDS_LIST: &str = "You can use the following commands:\n\
/help - Get a list of available commands and their descriptions.\n\n\
/search <NAME> - Search for a subject by name or keyword.\n\n\
/get <ID> - Gets all the sections info about a subject.\n\
/get <ID> <SECTION> - Gets the specified section only.\n\n\
/fav show - Shows your favorite sections.\n\
/fav add <ID> <SECTION> - Adds a section to your favorites.\n\
/fav delete <ID> <SECTION> - Removes a section from your favorites.\n\
/fav clear - Clears all of your favorites.\n";

const BUSY: &str = "Wait for your request! ♥";
const UNAVAILABLE: &str = "The timetable is unavailable right now, please try again in a minute.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Search(String),
    Get {
        subject_id: String,
        section: Option<String>,
    },
    FavShow,
    FavAdd {
        subject_id: String,
        section: String,
    },
    FavDelete {
        subject_id: String,
        section: String,
    },
    FavClear,
}

/// A command that could not be parsed; the message is the reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("Please enter a subject name to search\n\nExample:\n/search Programming")]
    SearchMissing,

    #[error("Subject name has to be more than 2 letters\n\nExample:\n/search Programming")]
    SearchTooShort,

    #[error(
        "Please enter a subject ID to get its info\n/get ID SECTION\n\n\
         ID is a 6 digit number!\nSECTION is optional.\n\n\
         Example:\n/get 185103 or /get 185103 1"
    )]
    GetMissing,

    #[error("'{0}' must be a number with 6 digits!\n\nExample:\n/get 185103")]
    InvalidSubjectId(String),

    #[error("'{0}' must be a number!\n\nExample:\n/get 185103 1")]
    InvalidSection(String),

    #[error(
        "How to use /fav\n\
         /fav show - Shows your favorite list\n\
         /fav add ID SECTION - Adds the SECTION of an ID to your favorites\n\
         /fav delete ID SECTION - Deletes the SECTION of an ID from your favorites\n\
         /fav clear - Clears all of your favorites\n\n\
         ID is a 6 digit number!\nSECTION is at most a 2 digit number\n\n\
         Example:\n/fav add 185103 1"
    )]
    FavUsage,

    #[error("'{0}' argument error!\n\nCorrect arguments are:\nshow, add, delete, clear\n\ncall /fav for a detailed explanation")]
    FavUnknownAction(String),

    #[error("'{0}' must be a number with 6 digits!\n\nExample:\n/fav add 185103 1")]
    FavInvalidSubjectId(String),

    #[error("'{0}' must be a number with at most 2 digits!\n\nExample:\n/fav add 185103 1")]
    FavInvalidSection(String),

    #[error("Unknown command '{0}'\n\n{list}", list = COMMANDS_LIST)]
    Unknown(String),
}

fn is_subject_id(s: &str) -> bool {
    s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

impl Command {
    /// Parse a chat message such as `/get 185103 2` or `/search@bot Physics`
    pub fn parse(text: &str) -> Result<Self, UsageError> {
        let mut words = text.split_whitespace();
        let head = words.next().unwrap_or("");
        let name = head.split('@').next().unwrap_or(head);
        let args: Vec<&str> = words.collect();

        match name {
            "/start" => Ok(Command::Start),
            "/help" => Ok(Command::Help),
            "/search" => {
                if args.is_empty() {
                    return Err(UsageError::SearchMissing);
                }
                let needle = args.join(" ");
                if needle.chars().count() <= 2 {
                    return Err(UsageError::SearchTooShort);
                }
                Ok(Command::Search(needle))
            }
            "/get" => {
                let subject_id = args.first().ok_or(UsageError::GetMissing)?;
                if !is_subject_id(subject_id) {
                    return Err(UsageError::InvalidSubjectId(subject_id.to_string()));
                }
                let section = match args.get(1) {
                    Some(s) if !is_number(s) => {
                        return Err(UsageError::InvalidSection(s.to_string()))
                    }
                    other => other.map(|s| s.to_string()),
                };
                Ok(Command::Get {
                    subject_id: subject_id.to_string(),
                    section,
                })
            }
            "/fav" => Self::parse_fav(&args),
            _ => Err(UsageError::Unknown(head.to_string())),
        }
    }

    fn parse_fav(args: &[&str]) -> Result<Self, UsageError> {
        let action = args.first().ok_or(UsageError::FavUsage)?;
        match *action {
            "show" => return Ok(Command::FavShow),
            "clear" => return Ok(Command::FavClear),
            "add" | "delete" => {}
            other => return Err(UsageError::FavUnknownAction(other.to_string())),
        }

        let subject_id = args.get(1).copied().unwrap_or("ID");
        if !is_subject_id(subject_id) {
            return Err(UsageError::FavInvalidSubjectId(subject_id.to_string()));
        }
        let section = args.get(2).copied().unwrap_or("SECTION");
        if !is_number(section) || section.len() > 2 {
            return Err(UsageError::FavInvalidSection(section.to_string()));
        }

        let (subject_id, section) = (subject_id.to_string(), section.to_string());
        Ok(if *action == "add" {
            Command::FavAdd {
                subject_id,
                section,
            }
        } else {
            Command::FavDelete {
                subject_id,
                section,
            }
        })
    }
}

/// Marks a user as busy until dropped
struct BusyGuard<'a> {
    users: &'a Mutex<HashSet<String>>,
    user_id: String,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.users.lock().remove(&self.user_id);
    }
}

/// Executes chat commands against the timetable and the favorites store
pub struct CommandHandler {
    coordinator: Arc<RefreshCoordinator>,
    favorites: Mutex<Favorites>,
    busy: Mutex<HashSet<String>>,
}

impl CommandHandler {
    pub fn new(coordinator: Arc<RefreshCoordinator>, favorites: Favorites) -> Self {
        Self {
            coordinator,
            favorites: Mutex::new(favorites),
            busy: Mutex::new(HashSet::new()),
        }
    }

    fn mark_busy(&self, user_id: &str) -> Option<BusyGuard<'_>> {
        if !self.busy.lock().insert(user_id.to_string()) {
            return None;
        }
        Some(BusyGuard {
            users: &self.busy,
            user_id: user_id.to_string(),
        })
    }

    /// Reply to one message from `user_id`
    pub async fn handle(&self, user_id: &str, first_name: &str, text: &str) -> String {
        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(usage) => {
                debug!(user_id = %user_id, text = %text, "Rejected command");
                return usage.to_string();
            }
        };

        let Some(_guard) = self.mark_busy(user_id) else {
            debug!(user_id = %user_id, "User already has a request in flight");
            return BUSY.to_string();
        };

        info!(user_id = %user_id, command = ?command, "Handling command");

        match command {
            Command::Start => format!("Hello {}!\n\n{}", first_name, COMMANDS_LIST),
            Command::Help => COMMANDS_LIST.to_string(),
            Command::Search(needle) => self.search(&needle).await,
            Command::Get {
                subject_id,
                section,
            } => self.get(&subject_id, section.as_deref()).await,
            Command::FavShow => self.fav_show(user_id).await,
            Command::FavAdd {
                subject_id,
                section,
            } => self.fav_add(user_id, &subject_id, &section),
            Command::FavDelete {
                subject_id,
                section,
            } => self.fav_delete(user_id, &subject_id, &section),
            Command::FavClear => self.fav_clear(user_id),
        }
    }

    /// Searches run on whatever is published; only an empty cache fetches
    async fn search(&self, needle: &str) -> String {
        let snapshot = match self.coordinator.snapshot() {
            Some(snapshot) => snapshot,
            None => match self.coordinator.ensure_fresh(false).await.snapshot {
                Some(snapshot) => snapshot,
                None => return UNAVAILABLE.to_string(),
            },
        };

        let results = snapshot.search_by_name(needle);
        if results.is_empty() {
            return format!("No match found for '{}'!", needle);
        }

        let mut reply = String::from("ID: Name\n");
        for (id, name) in &results {
            reply.push_str(&format!("{}: {}\n", id, name));
        }
        if reply.chars().count() > MAX_REPLY_LEN {
            return "Results are too long, please search with a more specific subject name."
                .to_string();
        }
        reply
    }

    async fn fresh_snapshot(&self) -> Option<Arc<Snapshot>> {
        let Refresh { snapshot, outcome } = self.coordinator.ensure_fresh(false).await;
        if snapshot.is_some() && matches!(outcome, RefreshOutcome::Failed(_)) {
            warn!("Serving stale timetable after failed refresh");
        }
        snapshot
    }

    async fn get(&self, subject_id: &str, section: Option<&str>) -> String {
        let Some(snapshot) = self.fresh_snapshot().await else {
            return UNAVAILABLE.to_string();
        };

        match section {
            None => match snapshot.all_sections_of(subject_id) {
                Some(info) if info.is_empty() => {
                    format!("'{}' has no sections listed!", subject_id)
                }
                Some(info) => info,
                None => format!("'{}' doesn't match any subject!", subject_id),
            },
            Some(section) => snapshot
                .one_section(subject_id, section)
                .unwrap_or_else(|| {
                    format!(
                        "'{}' doesn't match any subject with '{}' as section!",
                        subject_id, section
                    )
                }),
        }
    }

    async fn fav_show(&self, user_id: &str) -> String {
        let entries = self.favorites.lock().list(user_id);
        if entries.is_empty() {
            return "No favorites to show!".to_string();
        }

        let Some(snapshot) = self.fresh_snapshot().await else {
            return UNAVAILABLE.to_string();
        };

        let mut reply = String::new();
        for (subject_id, section) in entries {
            let info = snapshot
                .one_section(&subject_id, &section)
                .unwrap_or_else(|| "no longer offered\n".to_string());
            reply.push_str(&format!("{} | {} | {}", section, subject_id, info));
        }
        reply
    }

    fn fav_add(&self, user_id: &str, subject_id: &str, section: &str) -> String {
        match self.favorites.lock().add(user_id, subject_id, section) {
            Ok(true) => format!("{} {} added successfully!", subject_id, section),
            Ok(false) => format!("{} {} already in favorites!", subject_id, section),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to save favorites");
                "Could not save your favorites, please try again.".to_string()
            }
        }
    }

    fn fav_delete(&self, user_id: &str, subject_id: &str, section: &str) -> String {
        match self.favorites.lock().remove(user_id, subject_id, section) {
            Ok(Removal::Removed) => format!("{} {} deleted successfully!", subject_id, section),
            Ok(Removal::SubjectNotFound) => format!("{} not found in favorites!", subject_id),
            Ok(Removal::SectionNotFound) => {
                format!("{} {} not found in favorites!", subject_id, section)
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to save favorites");
                "Could not save your favorites, please try again.".to_string()
            }
        }
    }

    fn fav_clear(&self, user_id: &str) -> String {
        match self.favorites.lock().clear(user_id) {
            Ok(true) => "Favorites cleared successfully!".to_string(),
            Ok(false) => "No favorites to clear!".to_string(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to save favorites");
                "Could not save your favorites, please try again.".to_string()
            }
        }
    }
}
