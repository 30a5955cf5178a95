//! Shared helper functions for CLI commands.

use std::io::{self, BufRead, Write};

use console::style;

/// Shorten `s` to at most `max` characters, marking the cut with `…`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

/// Ask a y/N question on stdin. Anything but `y`/`yes` is a no.
pub fn confirm(prompt: &str) -> io::Result<bool> {
    confirm_from(prompt, &mut io::stdin().lock())
}

fn confirm_from(prompt: &str, input: &mut impl BufRead) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

/// Ask for a line of free text on stdin, trimmed.
pub fn prompt(label: &str) -> io::Result<String> {
    prompt_from(label, &mut io::stdin().lock())
}

fn prompt_from(label: &str, input: &mut impl BufRead) -> io::Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Split a comma-separated answer into non-empty terms.
pub fn split_terms(line: &str) -> Vec<String> {
    line.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Require the user to accept responsibility for the sources' terms.
///
/// Returns `true` when the run may proceed.
pub fn acknowledge_terms(sources: &[&str], assume_yes: bool) -> io::Result<bool> {
    if assume_yes {
        return Ok(true);
    }

    println!(
        "\n{} You are about to download images from: {}",
        style("!").yellow(),
        sources.join(", ")
    );
    println!("  Check that your use complies with each site's terms of service");
    println!("  and with the rights of the people who made the images.");
    confirm("\nContinue?")
}
