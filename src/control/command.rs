//! Command grammar for the control channel.
//!
//! Each line is `COMMAND[ ARGUMENT]`. Tokens are whitespace separated and
//! matched case-sensitively, as the board firmware did.
//!
//! | Command      | Argument        | Effect                                  |
//! |--------------|-----------------|-----------------------------------------|
//! | `READ`       | `NOW`           | most recent record                      |
//! | `READBUFFER` | integer N       | records `[0, N)`; N < 0 means all       |
//! | `SETT`       | seconds (float) | sample period, 0.1 to 30 s              |
//! | `STATE`      | `ON` / `OFF`    | open / close the sampling gate          |
//! | `LOGGING`    | `ON` / `OFF`    | echo routine events to the transport    |
//! | `SD`         | `F` / `E` / `M` | flush / flush and eject / re-mount      |

use std::fmt;
use std::time::Duration;

use crate::coordination::SamplePeriod;
use crate::error::CommandError;

/// `ON` / `OFF` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// `ON`
    On,
    /// `OFF`
    Off,
}

impl Switch {
    fn parse(command: &str, argument: &str) -> Result<Self, CommandError> {
        match argument {
            "ON" => Ok(Switch::On),
            "OFF" => Ok(Switch::Off),
            _ => Err(CommandError::InvalidSwitch {
                command: command.to_string(),
                expected: "ON or OFF",
            }),
        }
    }
}

/// Storage action requested with `SD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdAction {
    /// `SD F`: drain the buffer to the card.
    Flush,
    /// `SD E`: final drain, then unmount.
    Eject,
    /// `SD M`: mount again after an eject or failure.
    Mount,
}

/// A fully validated control command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `READ NOW`: newest record.
    ReadNow,
    /// `READBUFFER n`: buffered records without clearing.
    ReadBuffer {
        /// Exclusive end index; `None` reads the whole buffer.
        end: Option<usize>,
    },
    /// `SETT s`: new sampling period.
    SetPeriod(Duration),
    /// `STATE ON|OFF`: open or close the admission gate.
    State(Switch),
    /// `LOGGING ON|OFF`: command trace lines.
    Logging(Switch),
    /// `SD F|E|M`.
    Sd(SdAction),
}

/// A line split into its command and argument tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCommand<'a> {
    /// First token.
    pub name: &'a str,
    /// Second token, empty if absent.
    pub argument: &'a str,
}

impl<'a> RawCommand<'a> {
    /// Split a line. Returns `None` for a blank line.
    pub fn split(line: &'a str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next()?;
        let argument = tokens.next().unwrap_or("");
        Some(Self { name, argument })
    }

    /// Validate the tokens.
    ///
    /// `Ok(None)` means the line is not a command this device acts on and
    /// should be ignored.
    pub fn parse(&self) -> Result<Option<Command>, CommandError> {
        let command = match self.name {
            "READ" => match self.argument {
                "NOW" => Command::ReadNow,
                _ => return Ok(None),
            },
            "READBUFFER" => Command::ReadBuffer {
                end: self.parse_end()?,
            },
            "SETT" => Command::SetPeriod(self.parse_period()?),
            "STATE" => Command::State(Switch::parse(self.name, self.argument)?),
            "LOGGING" => Command::Logging(Switch::parse(self.name, self.argument)?),
            "SD" => Command::Sd(match self.argument {
                "F" => SdAction::Flush,
                "E" => SdAction::Eject,
                "M" => SdAction::Mount,
                _ => {
                    return Err(CommandError::InvalidSwitch {
                        command: self.name.to_string(),
                        expected: "E, F or M",
                    })
                }
            }),
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    fn require_argument(&self) -> Result<&'a str, CommandError> {
        if self.argument.is_empty() {
            return Err(CommandError::MissingArgument {
                command: self.name.to_string(),
            });
        }
        Ok(self.argument)
    }

    fn invalid_number(&self) -> CommandError {
        CommandError::InvalidNumber {
            command: self.name.to_string(),
            value: self.argument.to_string(),
        }
    }

    fn parse_end(&self) -> Result<Option<usize>, CommandError> {
        let n: i64 = self
            .require_argument()?
            .parse()
            .map_err(|_| self.invalid_number())?;
        Ok(usize::try_from(n).ok())
    }

    fn parse_period(&self) -> Result<Duration, CommandError> {
        let seconds: f64 = self
            .require_argument()?
            .parse()
            .map_err(|_| self.invalid_number())?;
        let min = SamplePeriod::MIN.as_secs_f64();
        let max = SamplePeriod::MAX.as_secs_f64();
        // NaN fails the range check too.
        if !(min..=max).contains(&seconds) {
            return Err(CommandError::OutOfRange {
                command: self.name.to_string(),
                value: seconds,
            });
        }
        Ok(Duration::from_millis((seconds * 1000.0).round() as u64))
    }
}

impl fmt::Display for RawCommand<'_> {
    /// Command and argument run together, as echoed in trace logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.argument)
    }
}

/// Split and validate a line in one step.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    match RawCommand::split(line) {
        Some(raw) => raw.parse(),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        assert_eq!(parse("READ NOW").unwrap(), Some(Command::ReadNow));
        assert_eq!(
            parse("READBUFFER 5").unwrap(),
            Some(Command::ReadBuffer { end: Some(5) })
        );
        assert_eq!(
            parse("READBUFFER -1").unwrap(),
            Some(Command::ReadBuffer { end: None })
        );
        assert_eq!(
            parse("SETT 1.5").unwrap(),
            Some(Command::SetPeriod(Duration::from_millis(1500)))
        );
        assert_eq!(parse("STATE OFF").unwrap(), Some(Command::State(Switch::Off)));
        assert_eq!(parse("LOGGING ON").unwrap(), Some(Command::Logging(Switch::On)));
        assert_eq!(parse("SD F").unwrap(), Some(Command::Sd(SdAction::Flush)));
        assert_eq!(parse("SD E").unwrap(), Some(Command::Sd(SdAction::Eject)));
        assert_eq!(parse("SD M").unwrap(), Some(Command::Sd(SdAction::Mount)));
    }

    #[test]
    fn extra_whitespace_is_tolerated() {
        assert_eq!(parse("  SD   E  ").unwrap(), Some(Command::Sd(SdAction::Eject)));
        assert_eq!(parse("SETT 0.1\r").unwrap(), Some(Command::SetPeriod(Duration::from_millis(100))));
    }

    #[test]
    fn period_bounds() {
        assert!(matches!(
            parse("SETT 0.05"),
            Err(CommandError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse("SETT 30.5"),
            Err(CommandError::OutOfRange { .. })
        ));
        assert!(matches!(parse("SETT NaN"), Err(CommandError::OutOfRange { .. })));
        assert_eq!(
            parse("SETT 30").unwrap(),
            Some(Command::SetPeriod(Duration::from_secs(30)))
        );
        assert_eq!(
            parse("SETT 0.05").unwrap_err().to_string(),
            "SETT variable out of range."
        );
    }

    #[test]
    fn malformed_arguments() {
        assert!(matches!(
            parse("READBUFFER abc"),
            Err(CommandError::InvalidNumber { .. })
        ));
        assert!(matches!(
            parse("READBUFFER"),
            Err(CommandError::MissingArgument { .. })
        ));
        assert!(matches!(parse("SETT fast"), Err(CommandError::InvalidNumber { .. })));
        assert_eq!(
            parse("STATE MAYBE").unwrap_err().to_string(),
            "STATE variable must be ON or OFF."
        );
        assert_eq!(
            parse("LOGGING").unwrap_err().to_string(),
            "LOGGING variable must be ON or OFF."
        );
        assert_eq!(
            parse("SD X").unwrap_err().to_string(),
            "SD variable must be E, F or M."
        );
    }

    #[test]
    fn unknown_lines_are_ignored() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("READ LATER").unwrap(), None);
        assert_eq!(parse("HELLO").unwrap(), None);
        assert_eq!(parse("read now").unwrap(), None);
    }

    #[test]
    fn raw_display_concatenates_tokens() {
        let raw = RawCommand::split("SETT 2").unwrap();
        assert_eq!(raw.to_string(), "SETT2");
    }
}
