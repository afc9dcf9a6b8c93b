//! Input line parsing.
//!
//! A line starting with `/` is a command; anything else is sent to the
//! focused room. Parsing is pure: attachments are returned as paths and
//! read by the driver.

use std::path::PathBuf;

use quadchat_app::Command;
use thiserror::Error;

/// Help text for `/help`.
pub const HELP: &str = "\
/focus <room>                  open a room
/leave <room>                  leave a room
/dm <user> [name]              open a direct chat
/group <name> <user>...        create a group chat
/reply <message> <text>        reply to a message
/attach <file>... [-- text]    send files with an optional caption
/resend <temp-id>              retry a failed message
/discard <temp-id>             drop a failed message
/forward <message> <room>...   copy a message into other rooms
/fav <message>                 toggle favorite
/reload <room>                 fetch a room's history again
/save <message> [index]        download an attachment
/quit                          sign out and exit
anything else                  send to the focused room";

/// Parse failures, shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// `/something` that is not a command.
    #[error("unknown command /{0} (try /help)")]
    UnknownCommand(String),

    /// A required argument is missing.
    #[error("/{command} needs {argument}")]
    MissingArgument {
        /// Command name.
        command: &'static str,
        /// What was expected.
        argument: &'static str,
    },

    /// Attachment index is not a number.
    #[error("not an attachment index: {0}")]
    BadIndex(String),
}

/// What a line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Nothing to do (blank line).
    Empty,
    /// Print the command list.
    Help,
    /// A runtime command.
    Command(Command),
    /// Send files, read from disk by the caller.
    Attach {
        /// Files to upload.
        paths: Vec<PathBuf>,
        /// Message text, possibly empty.
        caption: String,
    },
}

/// Parse one input line.
pub fn parse_line(line: &str) -> Result<Line, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Line::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(send(line));
    };

    let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let args = args.trim();
    let mut words = args.split_whitespace();

    let command = match name {
        "help" => return Ok(Line::Help),
        "quit" | "exit" => Command::Quit,
        "focus" => Command::Focus { room_id: required(words.next(), "focus", "a room id")? },
        "leave" => Command::Leave { room_id: required(words.next(), "leave", "a room id")? },
        "reload" => Command::Reload { room_id: required(words.next(), "reload", "a room id")? },
        "resend" => Command::Resend { temp_id: required(words.next(), "resend", "a temp id")? },
        "discard" => {
            Command::Discard { temp_id: required(words.next(), "discard", "a temp id")? }
        },
        "fav" => {
            Command::ToggleFavorite { message_id: required(words.next(), "fav", "a message id")? }
        },
        "dm" => {
            let peer_id = required(words.next(), "dm", "a user id")?;
            let name: Vec<&str> = words.collect();
            let peer_name = if name.is_empty() { peer_id.clone() } else { name.join(" ") };
            Command::DirectChat { peer_id, peer_name }
        },
        "group" => {
            let name = required(words.next(), "group", "a name")?;
            let member_ids: Vec<String> = words.map(str::to_string).collect();
            if member_ids.is_empty() {
                return Err(ParseError::MissingArgument { command: "group", argument: "members" });
            }
            Command::CreateGroup { name, member_ids }
        },
        "forward" => {
            let message_id = required(words.next(), "forward", "a message id")?;
            let targets: Vec<String> = words.map(str::to_string).collect();
            if targets.is_empty() {
                return Err(ParseError::MissingArgument {
                    command: "forward",
                    argument: "target rooms",
                });
            }
            Command::Forward { message_id, targets }
        },
        "reply" => {
            let (id, text) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
            let reply_to = required(Some(id).filter(|id| !id.is_empty()), "reply", "a message id")?;
            let content = text.trim();
            if content.is_empty() {
                return Err(ParseError::MissingArgument { command: "reply", argument: "text" });
            }
            Command::Send {
                content: content.to_string(),
                files: Vec::new(),
                reply_to: Some(reply_to),
            }
        },
        "save" => {
            let message_id = required(words.next(), "save", "a message id")?;
            let index = match words.next() {
                Some(raw) => raw.parse().map_err(|_| ParseError::BadIndex(raw.to_string()))?,
                None => 0,
            };
            Command::Download { message_id, index }
        },
        "attach" => {
            let (files, caption) = args.split_once("--").unwrap_or((args, ""));
            let paths: Vec<PathBuf> = files.split_whitespace().map(PathBuf::from).collect();
            if paths.is_empty() {
                return Err(ParseError::MissingArgument { command: "attach", argument: "files" });
            }
            return Ok(Line::Attach { paths, caption: caption.trim().to_string() });
        },
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(Line::Command(command))
}

fn send(text: &str) -> Line {
    Line::Command(Command::Send { content: text.to_string(), files: Vec::new(), reply_to: None })
}

fn required(
    word: Option<&str>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, ParseError> {
    word.map(str::to_string).ok_or(ParseError::MissingArgument { command, argument })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(parse_line("  see you at 5 "), Ok(send("see you at 5")));
        assert_eq!(parse_line("   "), Ok(Line::Empty));
    }

    #[test]
    fn room_commands() {
        assert_eq!(
            parse_line("/focus r1"),
            Ok(Line::Command(Command::Focus { room_id: "r1".into() }))
        );
        assert_eq!(
            parse_line("/focus"),
            Err(ParseError::MissingArgument { command: "focus", argument: "a room id" })
        );
        assert_eq!(parse_line("/quit"), Ok(Line::Command(Command::Quit)));
    }

    #[test]
    fn direct_chat_name_defaults_to_id() {
        assert_eq!(
            parse_line("/dm bo"),
            Ok(Line::Command(Command::DirectChat { peer_id: "bo".into(), peer_name: "bo".into() }))
        );
        assert_eq!(
            parse_line("/dm bo Bo Lee"),
            Ok(Line::Command(Command::DirectChat {
                peer_id: "bo".into(),
                peer_name: "Bo Lee".into()
            }))
        );
    }

    #[test]
    fn reply_keeps_inner_spacing() {
        let Ok(Line::Command(Command::Send { content, reply_to, .. })) =
            parse_line("/reply msg-4 yes,  room 204")
        else {
            panic!("not a send");
        };
        assert_eq!(content, "yes,  room 204");
        assert_eq!(reply_to.as_deref(), Some("msg-4"));
        assert!(parse_line("/reply msg-4").is_err());
    }

    #[test]
    fn attach_splits_caption() {
        assert_eq!(
            parse_line("/attach a.pdf b.png -- week 3 notes"),
            Ok(Line::Attach {
                paths: vec![PathBuf::from("a.pdf"), PathBuf::from("b.png")],
                caption: "week 3 notes".into(),
            })
        );
        assert!(matches!(parse_line("/attach -- hi"), Err(ParseError::MissingArgument { .. })));
    }

    #[test]
    fn save_index() {
        assert_eq!(
            parse_line("/save m1 2"),
            Ok(Line::Command(Command::Download { message_id: "m1".into(), index: 2 }))
        );
        assert_eq!(
            parse_line("/save m1"),
            Ok(Line::Command(Command::Download { message_id: "m1".into(), index: 0 }))
        );
        assert_eq!(parse_line("/save m1 two"), Err(ParseError::BadIndex("two".into())));
    }

    #[test]
    fn unknown_command() {
        assert_eq!(parse_line("/shrug"), Err(ParseError::UnknownCommand("shrug".into())));
    }
}
