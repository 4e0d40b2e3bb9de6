//! Assembly of the URL list from positional arguments and/or stdin.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result};

/// URLs to enqueue, plus whether stdin was piped but held nothing.
pub(crate) struct CollectedInput {
    pub(crate) urls: Vec<String>,
    pub(crate) piped_stdin_was_empty: bool,
}

/// Collects URLs from `args_urls` and, when stdin is not a terminal, from
/// stdin (one per line).
pub(crate) fn collect_urls(args_urls: &[String]) -> Result<CollectedInput> {
    let mut urls = split_lines(&args_urls.join("\n"));

    let mut piped_stdin_was_empty = false;
    if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read URLs from stdin")?;
        let piped = split_lines(&buffer);
        piped_stdin_was_empty = piped.is_empty();
        urls.extend(piped);
    }

    Ok(CollectedInput {
        urls,
        piped_stdin_was_empty,
    })
}

/// One URL per non-blank line; `#` starts a comment line.
fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::split_lines;

    #[test]
    fn test_split_lines_skips_blank_and_comment_lines() {
        let urls = split_lines(
            "https://youtu.be/dQw4w9WgXcQ\n\n  # later\n  https://vimeo.com/76979871  \n",
        );
        assert_eq!(
            urls,
            vec![
                "https://youtu.be/dQw4w9WgXcQ".to_string(),
                "https://vimeo.com/76979871".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_lines_empty_input() {
        assert!(split_lines("").is_empty());
        assert!(split_lines("\n \n").is_empty());
    }
}
