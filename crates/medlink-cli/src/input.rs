use medlink_client::Command;

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Session(Command),
    /// `/open` by list position (1-based) or conversation id
    Open(String),
    /// Applies to the open conversation when no id is given
    Accept(Option<String>),
    Ignore(Option<String>),
    /// Retries the most recent failed message when no ref is given
    Retry(Option<String>),
    List,
    Help,
    Quit,
    Nothing,
    Unknown(String),
}

pub fn parse(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Nothing;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Input::Session(Command::Send(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let arg_opt = (!arg.is_empty()).then(|| arg.to_string());

    match (name, arg_opt) {
        ("list" | "ls", _) => Input::List,
        ("open", Some(target)) => Input::Open(target),
        ("new", Some(user_id)) => Input::Session(Command::StartConversation(user_id)),
        ("find", query) => Input::Session(Command::Filter(query.unwrap_or_default())),
        ("accept", id) => Input::Accept(id),
        ("ignore", id) => Input::Ignore(id),
        ("retry", client_ref) => Input::Retry(client_ref),
        ("close", _) => Input::Session(Command::Close),
        ("reload", _) => Input::Session(Command::Reload),
        ("reconnect", _) => Input::Session(Command::Reconnect),
        ("help" | "?", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

pub const HELP: &str = "\
  /list                 show conversations (filtered by /find)
  /find [text]          filter by participant name; empty clears
  /open <n|id>          open a conversation
  /new <user id>        start a conversation with a user
  /accept [id]          accept a pending request
  /ignore [id]          ignore a pending request
  /retry [ref]          resend a failed message
  /close                close the open conversation
  /reload               refresh conversations
  /reconnect            retry the connection after going offline
  /quit                 log out and exit
  anything else         send it to the open conversation";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(parse("  hello there "), Input::Session(Command::Send("hello there".into())));
        assert_eq!(parse("   "), Input::Nothing);
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(parse("/open 2"), Input::Open("2".into()));
        assert_eq!(parse("/new  u-42 "), Input::Session(Command::StartConversation("u-42".into())));
        assert_eq!(parse("/find Grey"), Input::Session(Command::Filter("Grey".into())));
        assert_eq!(parse("/find"), Input::Session(Command::Filter(String::new())));
        assert_eq!(parse("/accept c1"), Input::Accept(Some("c1".into())));
        assert_eq!(parse("/ignore"), Input::Ignore(None));
        assert_eq!(parse("/retry"), Input::Retry(None));
    }

    #[test]
    fn missing_required_argument_is_unknown() {
        assert_eq!(parse("/open"), Input::Unknown("/open".into()));
        assert_eq!(parse("/new"), Input::Unknown("/new".into()));
        assert_eq!(parse("/frobnicate"), Input::Unknown("/frobnicate".into()));
    }
}
