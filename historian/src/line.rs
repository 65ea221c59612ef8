//! Parsing of the shell's own history output.
//!
//! `history 1` prints the shell's history number followed by the command,
//! e.g. `  1234  ls /tmp`.

use anyhow::{Context as _, Result, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLine {
    pub id: i64,
    pub command: String,
}

pub fn parse(input: &str) -> Result<HistoryLine> {
    let trimmed = input.trim();
    let Some((number, command)) = trimmed.split_once(char::is_whitespace) else {
        bail!("incorrect number of elements, expected [2], found [1]: {trimmed:?}");
    };
    let id = number
        .parse::<i64>()
        .with_context(|| format!("could not parse history number {number:?}"))?;
    let command = command.trim();
    if command.is_empty() {
        bail!("incorrect number of elements, expected [2], found [1]: {trimmed:?}");
    }
    Ok(HistoryLine {
        id,
        command: command.to_string(),
    })
}
