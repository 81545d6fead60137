//! Command interpreter: textual commands to rate controller transitions

use crate::error::CommandError;
use crate::rate::RateController;

/// Reply sent for anything that is not a known command
pub const INVALID_COMMAND_REPLY: &str = "INVALID COMMAND! (Try HELP)";

/// Usage text returned by HELP
pub const HELP_REPLY: &str = "\
HELP             - this text
PAUSE            - pause the clock at the current tick
UNPAUSE          - resume the clock
DECREASE         - halve the real delay per tick (run faster)
INCREASE         - double the real delay per tick (run slower)
RUN <seconds>    - run for the given simulated seconds, then pause
UNTIL <abs time> - run until the given absolute time, then pause";

/// A parsed control command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Pause,
    Unpause,
    /// Console-only: pause if playing, otherwise unpause
    Toggle,
    /// Halve the real delay per tick
    Decrease,
    /// Double the real delay per tick
    Increase,
    Run { seconds: f64 },
    Until { time: f64 },
    Invalid,
}

/// Input accepted by the tick scheduler's control channel
#[derive(Debug, Clone, PartialEq)]
pub enum ControlInput {
    /// Raw text, parsed by the interpreter
    Text(String),
    /// Already-parsed command
    Command(Command),
}

impl Command {
    /// Parse a command, case-insensitively, by prefix.
    ///
    /// Unknown text parses to [`Command::Invalid`]; only a bad numeric argument is an error.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let upper = text.trim().to_ascii_uppercase();

        if upper.starts_with("HELP") {
            Ok(Command::Help)
        } else if upper.starts_with("PAUSE") {
            Ok(Command::Pause)
        } else if upper.starts_with("UNPAUSE") {
            Ok(Command::Unpause)
        } else if upper.starts_with("DECREASE") {
            Ok(Command::Decrease)
        } else if upper.starts_with("INCREASE") {
            Ok(Command::Increase)
        } else if let Some(argument) = upper.strip_prefix("RUN ") {
            let seconds = parse_argument("RUN", argument)?;
            if seconds < 0.0 {
                return Err(CommandError::Negative {
                    verb: "RUN",
                    argument: argument.trim().to_string(),
                });
            }
            Ok(Command::Run { seconds })
        } else if let Some(argument) = upper.strip_prefix("UNTIL ") {
            Ok(Command::Until { time: parse_argument("UNTIL", argument)? })
        } else {
            Ok(Command::Invalid)
        }
    }
}

fn parse_argument(verb: &'static str, argument: &str) -> Result<f64, CommandError> {
    let argument = argument.trim();
    let value: f64 = argument
        .parse()
        .map_err(|_| CommandError::Malformed { verb, argument: argument.to_string() })?;
    if !value.is_finite() {
        return Err(CommandError::NonFinite { verb, argument: argument.to_string() });
    }
    Ok(value)
}

/// Parse and apply raw command text, returning the reply
pub fn execute(rate: &mut RateController, text: &str) -> String {
    match Command::parse(text) {
        Ok(command) => apply(rate, &command),
        Err(e) => {
            tracing::debug!("Rejected command '{}': {}", text.trim(), e);
            e.reply()
        }
    }
}

/// Apply a parsed command to the rate controller, returning the reply
pub fn apply(rate: &mut RateController, command: &Command) -> String {
    match *command {
        Command::Help => HELP_REPLY.to_string(),
        Command::Pause => {
            rate.pause();
            "PAUSE".to_string()
        }
        Command::Unpause => {
            rate.unpause();
            "UNPAUSE".to_string()
        }
        Command::Toggle => {
            if rate.toggle() {
                "PAUSE".to_string()
            } else {
                "UNPAUSE".to_string()
            }
        }
        Command::Decrease => {
            rate.speed_up();
            "DECREASE".to_string()
        }
        Command::Increase => {
            rate.slow_down();
            "INCREASE".to_string()
        }
        Command::Run { seconds } => {
            rate.run_for(seconds);
            "RUN".to_string()
        }
        Command::Until { time } => {
            rate.run_until(time);
            "RUN".to_string()
        }
        Command::Invalid => INVALID_COMMAND_REPLY.to_string(),
    }
}
