//! Terminal confirmation for destructive steps.

use async_trait::async_trait;
use colored::Colorize;
use std::io::{BufRead, Write};
use tracing::warn;
use ts_policy::{parse_selection, ConfirmationDecision, Confirmer, ProposedRemoval};

/// Attempts allowed for an unparsable selection before giving up.
const MAX_SELECTION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    All,
    Select,
    Abort,
}

fn parse_choice(input: &str) -> Option<Choice> {
    match input.trim().to_ascii_lowercase().as_str() {
        "a" | "all" | "y" | "yes" => Some(Choice::All),
        "s" | "select" => Some(Choice::Select),
        "" | "n" | "no" | "q" | "quit" | "abort" => Some(Choice::Abort),
        _ => None,
    }
}

/// Asks the operator on stdin. End of input counts as abort.
pub struct InteractiveConfirmer;

#[async_trait]
impl Confirmer for InteractiveConfirmer {
    async fn decide(&self, proposals: &[ProposedRemoval]) -> ConfirmationDecision {
        print_proposals(proposals);

        let count = proposals.len();
        match tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            let mut input = stdin.lock();
            prompt_decision(&mut input, &mut std::io::stderr(), count)
        })
        .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Prompt task failed, aborting");
                ConfirmationDecision::Abort
            }
        }
    }
}

fn print_proposals(proposals: &[ProposedRemoval]) {
    let mut out = std::io::stderr();
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "Proposed changes".bold());
    let _ = writeln!(out, "────────────────");
    for p in proposals {
        let _ = writeln!(
            out,
            "  {:>4}  {}  {}",
            (p.index + 1).to_string().cyan(),
            p.target,
            p.description.yellow()
        );
    }
    let _ = writeln!(out);
}

fn read_line<R: BufRead>(input: &mut R) -> Option<String> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

/// Reads the operator's decision from `input`, writing prompts to `out`.
fn prompt_decision<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    count: usize,
) -> ConfirmationDecision {
    loop {
        let _ = write!(
            out,
            "Apply {} change(s)? [{}]ll / [{}]elect / [{}]bort: ",
            count,
            "a".green(),
            "s".cyan(),
            "N".red()
        );
        let _ = out.flush();

        let Some(line) = read_line(input) else {
            return ConfirmationDecision::Abort;
        };
        match parse_choice(&line) {
            Some(Choice::All) => return ConfirmationDecision::RemoveAll,
            Some(Choice::Abort) => return ConfirmationDecision::Abort,
            Some(Choice::Select) => return prompt_selection(input, out, count),
            None => {
                let _ = writeln!(out, "{}", "Please answer a, s or n.".yellow());
            }
        }
    }
}

fn prompt_selection<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    count: usize,
) -> ConfirmationDecision {
    for _ in 0..MAX_SELECTION_ATTEMPTS {
        let _ = write!(out, "Numbers to apply (e.g. 1,3,5-7) of 1-{}: ", count);
        let _ = out.flush();

        let Some(line) = read_line(input) else {
            return ConfirmationDecision::Abort;
        };
        match parse_selection(&line, count) {
            Ok(selected) => return ConfirmationDecision::RemoveSelected(selected),
            Err(e) => {
                let _ = writeln!(out, "{}: {}", "Invalid selection".red(), e);
            }
        }
    }
    let _ = writeln!(out, "{}", "Too many invalid selections, aborting.".red());
    ConfirmationDecision::Abort
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decide(input: &str, count: usize) -> ConfirmationDecision {
        let mut out = Vec::new();
        prompt_decision(&mut Cursor::new(input.as_bytes()), &mut out, count)
    }

    #[test]
    fn test_all_and_abort() {
        assert_eq!(decide("a\n", 3), ConfirmationDecision::RemoveAll);
        assert_eq!(decide("\n", 3), ConfirmationDecision::Abort);
        assert_eq!(decide("", 3), ConfirmationDecision::Abort);
    }

    #[test]
    fn test_reprompts_on_unknown_answer() {
        assert_eq!(decide("maybe\nyes\n", 2), ConfirmationDecision::RemoveAll);
    }

    #[test]
    fn test_select_subset() {
        let decision = decide("s\n1, 3-4\n", 5);
        assert_eq!(
            decision,
            ConfirmationDecision::RemoveSelected([0, 2, 3].into_iter().collect())
        );
    }

    #[test]
    fn test_select_out_of_range_becomes_abort() {
        assert_eq!(decide("s\n9\n", 2), ConfirmationDecision::Abort);
    }

    #[test]
    fn test_select_huge_range_is_clamped() {
        assert_eq!(
            decide("s\n2-4000000000\n", 3),
            ConfirmationDecision::RemoveSelected([1, 2].into_iter().collect())
        );
    }

    #[test]
    fn test_invalid_selections_abort() {
        assert_eq!(decide("s\nx\n0\n3-1\n", 5), ConfirmationDecision::Abort);
    }
}
