//! Line commands read from stdin.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reload,
    Reanalyze,
    Cancel,
    Status,
    /// Re-read the config file and apply it.
    Config,
    /// A document with this language id was opened.
    Open(String),
    Help,
    Quit,
}

pub const HELP: &str = "commands: reload | reanalyze | cancel | status | config | open <language> | help | quit";

impl Command {
    /// Parse one input line. `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let command = match head.to_ascii_lowercase().as_str() {
            "reload" => Command::Reload,
            "reanalyze" => Command::Reanalyze,
            "cancel" => Command::Cancel,
            "status" => Command::Status,
            "config" => Command::Config,
            "open" => match words.next() {
                Some(language) => Command::Open(language.to_string()),
                None => return Err("usage: open <language>".to_string()),
            },
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command: {other}")),
        };
        Ok(Some(command))
    }
}

/// Turn one stdin read into a command. End of input and read errors both
/// quit, so shutdown always runs. `None` means skip the line.
pub fn from_input(line: std::io::Result<Option<String>>) -> Option<Command> {
    match line {
        Ok(Some(line)) => match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                None
            }
        },
        Ok(None) => Some(Command::Quit),
        Err(e) => {
            tracing::warn!("Reading stdin failed: {e}");
            eprintln!("reading stdin failed: {e}; shutting down");
            Some(Command::Quit)
        }
    }
}
