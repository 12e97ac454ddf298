//! Operator console on stdin

use std::io::{self, BufRead, Write};

use flume::Sender;
use tracing::{info, warn};

use crate::lifecycle::StopSignal;

const PROMPT: &str = "Enter 'exit' to quit, 'speed <seconds>' to set the redraw delay: ";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Exit,
    Speed(f64),
    Refresh,
    /// `speed` with a value that is not a finite, non-negative number
    Invalid(String),
}

/// Commands are case-insensitive
pub fn parse_command(line: &str) -> ConsoleCommand {
    let line = line.trim().to_lowercase();
    let line = line.as_str();
    if line == "exit" {
        return ConsoleCommand::Exit;
    }
    match line.split_once(char::is_whitespace) {
        Some(("speed", arg)) => match arg.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => ConsoleCommand::Speed(value),
            _ => ConsoleCommand::Invalid(arg.trim().to_string()),
        },
        _ if line == "speed" => ConsoleCommand::Invalid(String::new()),
        _ => ConsoleCommand::Refresh,
    }
}

/// Read commands until `exit`, end of input, or stop.
///
/// `exit` sets the stop signal; end of input only ends the console.
pub fn run<R: BufRead, W: Write>(
    reader: R,
    mut out: W,
    stop: StopSignal,
    throttle: Sender<f64>,
) -> io::Result<()> {
    let mut lines = reader.lines();
    while !stop.is_stopped() {
        write!(out, "{PROMPT}")?;
        out.flush()?;
        let Some(line) = lines.next() else {
            info!("Console input closed");
            break;
        };
        match parse_command(&line?) {
            ConsoleCommand::Exit => {
                info!("Exit requested from console");
                stop.trigger();
            }
            ConsoleCommand::Speed(value) => {
                if throttle.send(value).is_err() {
                    warn!("Throttle persister is gone, delay {} not saved", value);
                }
                writeln!(out, "Redraw delay set to {value}s")?;
            }
            ConsoleCommand::Invalid(arg) => writeln!(out, "Invalid speed value {arg:?}")?,
            ConsoleCommand::Refresh => writeln!(out, "Refreshing...")?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("exit\n"), ConsoleCommand::Exit);
        assert_eq!(parse_command("speed 0.5"), ConsoleCommand::Speed(0.5));
        assert_eq!(parse_command("  speed   2 "), ConsoleCommand::Speed(2.0));
        assert_eq!(parse_command("speed fast"), ConsoleCommand::Invalid("fast".into()));
        assert_eq!(parse_command("speed -1"), ConsoleCommand::Invalid("-1".into()));
        assert_eq!(parse_command("speed"), ConsoleCommand::Invalid(String::new()));
        assert_eq!(parse_command(""), ConsoleCommand::Refresh);
        assert_eq!(parse_command("redraw"), ConsoleCommand::Refresh);
    }

    #[test]
    fn commands_ignore_case() {
        assert_eq!(parse_command("EXIT"), ConsoleCommand::Exit);
        assert_eq!(parse_command("Exit\n"), ConsoleCommand::Exit);
        assert_eq!(parse_command("Speed 2"), ConsoleCommand::Speed(2.0));
        assert_eq!(parse_command("SPEED 1E-1"), ConsoleCommand::Speed(0.1));
        assert_eq!(parse_command("SPEED"), ConsoleCommand::Invalid(String::new()));
    }

    #[test]
    fn exit_sets_stop() {
        let stop = StopSignal::new();
        let (tx, rx) = flume::unbounded();
        let mut out = Vec::new();
        let input = Cursor::new("speed 1.5\nspeed x\nexit\nspeed 9\n");
        run(input, &mut out, stop.clone(), tx).unwrap();

        assert!(stop.is_stopped());
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1.5]);
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Invalid speed value \"x\""));
    }

    #[test]
    fn end_of_input_keeps_running() {
        let stop = StopSignal::new();
        let (tx, _rx) = flume::unbounded();
        let mut out = Vec::new();
        run(Cursor::new("hello\n"), &mut out, stop.clone(), tx).unwrap();

        assert!(!stop.is_stopped());
        assert!(String::from_utf8(out).unwrap().contains("Refreshing..."));
    }
}
