use std::path::PathBuf;

use treetrade_types::models::{CATEGORIES, ListingDraft};

pub const HELP: &str = "\
commands:
  list [query]              show listings, optionally filtered
  show <n>                  listing details
  post <title> | <price> | <category> | <condition> | <description>
  edit <n> <title> | <price> | <category> | <condition> | <description>
  delete <n>                remove a listing
  upload <path>             attach an image to the next post or edit
  message <n>               message the seller of a listing
  inbox                     open your conversations
  open <n>                  open a conversation from the inbox
  send <text>               send to the open conversation
  back                      return to the conversation list
  admin <key> | unadmin     enter or leave admin mode
  signout | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List(Option<String>),
    Show(usize),
    Post(ListingDraft),
    /// Raw fields; blanks keep the listing's current values
    Edit(usize, String),
    Delete(usize),
    Upload(PathBuf),
    Message(usize),
    Inbox,
    Open(usize),
    Send(String),
    Back,
    Admin(String),
    Unadmin,
    SignOut,
    Help,
    Quit,
}

/// `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "list" | "ls" => Command::List((!rest.is_empty()).then(|| rest.to_string())),
        "show" => Command::Show(index(rest)?),
        "post" => Command::Post(parse_draft(rest)?),
        "edit" => {
            let (n, fields) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            // Catch bad fields now rather than after a fetch.
            parse_draft(fields)?;
            Command::Edit(index(n)?, fields.trim().to_string())
        }
        "delete" | "rm" => Command::Delete(index(rest)?),
        "upload" => {
            if rest.is_empty() {
                return Err("usage: upload <path>".into());
            }
            Command::Upload(PathBuf::from(rest))
        }
        "message" | "msg" => Command::Message(index(rest)?),
        "inbox" => Command::Inbox,
        "open" => Command::Open(index(rest)?),
        // The inbox decides what counts as blank.
        "send" => Command::Send(rest.to_string()),
        "back" => Command::Back,
        "admin" => Command::Admin(rest.to_string()),
        "unadmin" => Command::Unadmin,
        "signout" | "logout" => Command::SignOut,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(Some(command))
}

/// 1-based position in the last printed list.
fn index(raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(format!("expected a number from the list, got '{}'", raw)),
    }
}

/// `title | price | category | condition | description`; trailing fields
/// may be left out and take the form defaults.
fn parse_draft(raw: &str) -> Result<ListingDraft, String> {
    let mut draft = ListingDraft::default();
    apply_fields(&mut draft, raw)?;
    Ok(draft)
}

/// Overwrite the fields given in `raw`; blank or missing ones are kept.
pub fn apply_fields(draft: &mut ListingDraft, raw: &str) -> Result<(), String> {
    let fields: Vec<&str> = raw.split('|').map(str::trim).collect();
    let field = |i: usize| fields.get(i).copied().filter(|f| !f.is_empty());

    if let Some(title) = field(0) {
        draft.title = title.to_string();
    }
    if let Some(price) = field(1) {
        draft.price = price.trim_start_matches('$').to_string();
    }
    if let Some(category) = field(2) {
        draft.category = CATEGORIES
            .iter()
            .find(|c| c.eq_ignore_ascii_case(category))
            .ok_or_else(|| format!("unknown category '{}' (one of {})", category, CATEGORIES.join(", ")))?
            .to_string();
    }
    if let Some(condition) = field(3) {
        draft.condition = condition.parse()?;
    }
    // The description may itself contain '|'.
    if fields.len() > 4 {
        let description = fields[4..].join(" | ");
        if !description.trim().is_empty() {
            draft.description = description;
        }
    }
    Ok(())
}
