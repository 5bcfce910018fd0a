use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};

use tracing::{info, warn};

use crate::error::{Error, Result};

/// Human approval in front of the only irreversible action of the tool.
///
/// Whether a human is present is decided by the caller, the gate never inspects
/// the terminal. Without one, only an explicit auto approval lets a job through.
pub struct ConfirmationGate<R, W> {
    interactive: bool,
    input: R,
    output: W,
}

impl ConfirmationGate<BufReader<Stdin>, Stdout> {
    pub fn stdio(interactive: bool) -> Self {
        Self::new(interactive, BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConfirmationGate<R, W> {
    pub fn new(interactive: bool, input: R, output: W) -> Self {
        Self {
            interactive,
            input,
            output,
        }
    }

    /// Returns true only for an explicit or automatic yes
    pub fn confirm(&mut self, description: &str, auto_approve: bool) -> Result<bool> {
        if auto_approve {
            info!("Auto-approved, skipping confirmation");
            return Ok(true);
        }
        if !self.interactive {
            return Err(Error::validation(
                "running non-interactively, pass --yes to approve the submission",
            ));
        }

        writeln!(self.output, "{}", description).map_err(prompt_error)?;
        let mut prompt = "Continue? [Y/N]: ";
        loop {
            write!(self.output, "{}", prompt).map_err(prompt_error)?;
            self.output.flush().map_err(prompt_error)?;

            let mut line = String::new();
            if self.input.read_line(&mut line).map_err(prompt_error)? == 0 {
                warn!("Input closed before an answer was given, treating as no");
                return Ok(false);
            }

            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => prompt = "Please answer Y/N: ",
            }
        }
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }
}

fn prompt_error(e: io::Error) -> Error {
    Error::configuration(format!("unable to prompt for confirmation: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ask(interactive: bool, answers: &str, auto_approve: bool) -> (Result<bool>, String) {
        let mut out = Vec::new();
        let result = ConfirmationGate::new(interactive, Cursor::new(answers.to_string()), &mut out)
            .confirm("the job", auto_approve);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_auto_approve_skips_prompt() {
        for interactive in [true, false] {
            let (result, out) = ask(interactive, "", true);
            assert!(result.unwrap());
            assert!(out.is_empty());
        }
    }

    #[test]
    fn test_non_interactive_requires_auto_approve() {
        let (result, out) = ask(false, "yes\n", false);
        assert!(matches!(result, Err(Error::Validation(msg)) if msg.contains("--yes")));
        assert!(out.is_empty());
    }

    #[test]
    fn test_accepts_yes_and_no_case_insensitively() {
        for answer in ["y\n", "Y\n", "yes\n", " YeS \n"] {
            assert!(ask(true, answer, false).0.unwrap(), "{answer:?}");
        }
        for answer in ["n\n", "N\n", "no\n", "No"] {
            assert!(!ask(true, answer, false).0.unwrap(), "{answer:?}");
        }
    }

    #[test]
    fn test_reprompts_until_valid_answer() {
        let (result, out) = ask(true, "maybe\n\nsure\nok\nyes\n", false);
        assert!(result.unwrap());
        assert!(out.starts_with("the job\nContinue? [Y/N]: "));
        assert_eq!(out.matches("Please answer Y/N: ").count(), 4);
    }

    #[test]
    fn test_closed_input_declines() {
        let (result, _) = ask(true, "what\n", false);
        assert!(!result.unwrap());
    }
}
