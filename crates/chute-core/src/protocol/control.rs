//! Control-plane line protocol.
//!
//! One command per line, one response per line. Parsing lives here so the
//! command set has a single definition; response rendering belongs to the
//! session handler.

/// A parsed control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Resize the data-listener pool to the given count (must be > 0).
    ScaleData(u32),
    /// Replace the retention TTL, in seconds (must be > 0).
    SetTtl(u64),
    /// Liveness probe; also triggers a metrics flush.
    Ping,
    /// Report listener count and current TTL.
    Status,
    /// End this control session.
    Quit,
}

/// Parse one command line.
///
/// On failure the returned message is sent back verbatim after `ERR `.
/// Invalid arguments never mutate state.
pub fn parse_command(line: &str) -> Result<ControlCommand, String> {
    let mut parts = line.split_whitespace();
    let verb = match parts.next() {
        Some(v) => v,
        None => return Err("unknown command".into()),
    };

    let command = match verb {
        "SCALE_DATA" => {
            let arg = parts.next().ok_or("missing listener count")?;
            let n: u32 = arg
                .parse()
                .map_err(|_| format!("invalid listener count {:?}", arg))?;
            if n == 0 {
                return Err("listener count must be greater than zero".into());
            }
            ControlCommand::ScaleData(n)
        }
        "SET_TTL" => {
            let arg = parts.next().ok_or("missing ttl")?;
            let secs: u64 = arg.parse().map_err(|_| format!("invalid ttl {:?}", arg))?;
            if secs == 0 {
                return Err("ttl must be greater than zero".into());
            }
            ControlCommand::SetTtl(secs)
        }
        "PING" => ControlCommand::Ping,
        "STATUS" => ControlCommand::Status,
        "QUIT" | "EXIT" => ControlCommand::Quit,
        _ => return Err("unknown command".into()),
    };

    if parts.next().is_some() {
        return Err("trailing arguments".into());
    }
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_data_parses() {
        assert_eq!(parse_command("SCALE_DATA 5"), Ok(ControlCommand::ScaleData(5)));
        assert_eq!(
            parse_command("  SCALE_DATA   12  "),
            Ok(ControlCommand::ScaleData(12))
        );
    }

    #[test]
    fn scale_data_rejects_bad_args() {
        assert!(parse_command("SCALE_DATA").is_err());
        assert!(parse_command("SCALE_DATA 0").is_err());
        assert!(parse_command("SCALE_DATA -1").is_err());
        assert!(parse_command("SCALE_DATA five").is_err());
        assert!(parse_command("SCALE_DATA 5 6").is_err());
    }

    #[test]
    fn set_ttl_parses() {
        assert_eq!(parse_command("SET_TTL 600"), Ok(ControlCommand::SetTtl(600)));
        assert!(parse_command("SET_TTL 0").is_err());
        assert!(parse_command("SET_TTL soon").is_err());
    }

    #[test]
    fn bare_commands() {
        assert_eq!(parse_command("PING"), Ok(ControlCommand::Ping));
        assert_eq!(parse_command("STATUS"), Ok(ControlCommand::Status));
        assert_eq!(parse_command("QUIT"), Ok(ControlCommand::Quit));
        assert_eq!(parse_command("EXIT"), Ok(ControlCommand::Quit));
    }

    #[test]
    fn unknown_and_empty_lines() {
        assert_eq!(parse_command(""), Err("unknown command".into()));
        assert_eq!(parse_command("REBOOT"), Err("unknown command".into()));
        // Commands are case-sensitive.
        assert_eq!(parse_command("ping"), Err("unknown command".into()));
    }
}
