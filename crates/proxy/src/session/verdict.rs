//! Judging whether a buffered mirror response may be shown to the client.

use std::collections::HashMap;

use protocol::{Command, Response, ResponseKind, Terminal};

/// Outcome of a complete local attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum LocalVerdict {
    /// The mirror's answer stands.
    Serve,
    /// The mirror is behind the master.
    Stale(String),
    /// The mirror lacks what was asked for.
    NotFound(String),
}

const STALE_MARKERS: &[&str] = &[
    "no such tag",
    "could not find desired version",
    "is no longer in the repository",
    "is not (any longer) pertinent",
];

const NOT_FOUND_MARKERS: &[&str] = &[
    "cannot find module",
    "nothing known about",
    "there is no repository",
    "no such directory",
    "does not exist",
];

/// Responses whose third header line is an entry line.
const ENTRY_RESPONSES: &[&str] = &[
    "Updated",
    "Created",
    "Update-existing",
    "Merged",
    "Patched",
    "Rcs-diff",
    "Checked-in",
    "New-entry",
];

/// Judges a complete response stream from the mirror.
pub(crate) fn assess(command: &Command, responses: &[Response]) -> LocalVerdict {
    let diagnostics: Vec<String> = responses
        .iter()
        .filter(|response| response.kind() == ResponseKind::Stderr)
        .map(|response| response.text().into_owned())
        .collect();

    if let Some(line) = find_marker(&diagnostics, NOT_FOUND_MARKERS) {
        return LocalVerdict::NotFound(line);
    }
    if let Some(line) = find_marker(&diagnostics, STALE_MARKERS) {
        return LocalVerdict::Stale(line);
    }

    match responses.last().and_then(Response::terminal) {
        Some(Terminal::Error { code, text }) => {
            if text.is_empty() && matches!(command.name(), "diff" | "rdiff") {
                return LocalVerdict::Serve;
            }
            let detail = diagnostics
                .last()
                .cloned()
                .unwrap_or_else(|| format!("error {code} {text}").trim_end().to_owned());
            LocalVerdict::Stale(detail)
        }
        Some(Terminal::Ok) => revision_regression(command, responses).map_or(LocalVerdict::Serve, LocalVerdict::Stale),
        None => LocalVerdict::Stale("response ended without a terminator".to_owned()),
    }
}

fn find_marker(diagnostics: &[String], markers: &[&str]) -> Option<String> {
    diagnostics
        .iter()
        .find(|line| {
            let lower = line.to_ascii_lowercase();
            markers.iter().any(|marker| lower.contains(marker))
        })
        .cloned()
}

/// Finds a file the mirror would move backwards from the client's revision.
fn revision_regression(command: &Command, responses: &[Response]) -> Option<String> {
    if command.name() != "update" {
        return None;
    }
    let pinned = command
        .arguments()
        .iter()
        .any(|argument| ["-r", "-D", "-j"].iter().any(|flag| argument.starts_with(flag)));
    if pinned {
        return None;
    }

    let mut held = HashMap::new();
    let mut directory = String::from(".");
    for request in command.requests() {
        match request.name() {
            "Directory" => directory = normalize_directory(&request.argument_text()),
            "Entry" => {
                let text = request.argument_text();
                if let Some(entry) = EntryLine::parse(&text).filter(|entry| !entry.sticky) {
                    held.insert((directory.clone(), entry.name.to_owned()), entry.revision.to_owned());
                }
            }
            _ => {}
        }
    }
    if held.is_empty() {
        return None;
    }

    responses
        .iter()
        .filter(|response| ENTRY_RESPONSES.contains(&response.name()))
        .find_map(|response| {
            let line = String::from_utf8_lossy(response.line(2)?);
            let offered = EntryLine::parse(&line)?;
            let key = (normalize_directory(&response.text()), offered.name.to_owned());
            let client = held.get(&key)?;
            is_older(offered.revision, client).then(|| {
                format!(
                    "mirror offers {}/{} {}, client has {client}",
                    key.0, offered.name, offered.revision
                )
            })
        })
}

struct EntryLine<'a> {
    name: &'a str,
    revision: &'a str,
    sticky: bool,
}

impl<'a> EntryLine<'a> {
    /// Parses `/name/revision/timestamp/options/tagdate`.
    fn parse(line: &'a str) -> Option<Self> {
        let mut fields = line.strip_prefix('/')?.split('/');
        let name = fields.next().filter(|name| !name.is_empty())?;
        let revision = fields.next()?;
        let sticky = fields.nth(2).is_some_and(|tagdate| !tagdate.is_empty());
        Some(Self { name, revision, sticky })
    }
}

fn normalize_directory(directory: &str) -> String {
    let trimmed = directory.trim_end_matches('/');
    let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
    if trimmed.is_empty() {
        ".".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// `offered < held` on the same branch. Unparseable revisions, such as
/// `0` for an added file or `-1.2` for a removed one, never compare.
fn is_older(offered: &str, held: &str) -> bool {
    let parse = |revision: &str| -> Option<Vec<u32>> {
        revision.split('.').map(|part| part.parse().ok()).collect()
    };
    let (Some(offered), Some(held)) = (parse(offered), parse(held)) else {
        return false;
    };
    if offered.len() != held.len() || offered.len() < 2 {
        return false;
    }
    let last = offered.len() - 1;
    offered[..last] == held[..last] && offered[last] < held[last]
}
