//! Commands typed at the terminal prompt.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Login(String),
    Select(String),
    Send(String),
    Users,
    ToggleSound,
    ToggleDesktop,
    Focus,
    Blur,
    ClearUnread,
    Leave,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
/login <id>     connect as <id>
/select <id>    open the conversation with <id>
/users          list online users and unread counts
/sound          toggle the message tone
/desktop        toggle desktop notifications
/focus, /blur   simulate the window gaining or losing focus
/clear          mark everything read
/status         show connection and alert state
/leave          leave the room
/quit           leave and exit
anything else is sent to the selected user";

/// `None` for blank lines. Unknown slash commands are an error message.
pub fn parse(line: &str) -> Option<Result<HostCommand, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Ok(HostCommand::Send(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let needs_arg = |build: fn(String) -> HostCommand| {
        if arg.is_empty() {
            Err(format!("/{name} needs an argument"))
        } else {
            Ok(build(arg.to_string()))
        }
    };

    Some(match name {
        "login" => needs_arg(HostCommand::Login),
        "select" | "s" => needs_arg(HostCommand::Select),
        "users" | "u" => Ok(HostCommand::Users),
        "sound" => Ok(HostCommand::ToggleSound),
        "desktop" => Ok(HostCommand::ToggleDesktop),
        "focus" => Ok(HostCommand::Focus),
        "blur" => Ok(HostCommand::Blur),
        "clear" => Ok(HostCommand::ClearUnread),
        "leave" => Ok(HostCommand::Leave),
        "status" => Ok(HostCommand::Status),
        "help" | "?" => Ok(HostCommand::Help),
        "quit" | "q" | "exit" => Ok(HostCommand::Quit),
        other => Err(format!("unknown command /{other}, try /help")),
    })
}
