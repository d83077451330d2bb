use std::io::{BufRead, Write};

use adbridge_agent::{AgentError, ChatAgent};

const HELP: &str = "\
Commands:
  help              show this text
  clear             forget the conversation so far
  quit, exit, q     leave the shell

Anything else is sent to the agent. It can:
  - fetch pull request details, diffs and listings from GitHub
  - analyze a code snippet for common problems
  - format a review summary
  - read a local file
  - run adb commands against connected devices
  - install the latest successful Azure DevOps build

Examples:
  review PR 42 in octocat/hello-world
  list open PRs for https://github.com/octocat/hello-world
  which devices are connected?";

enum Line {
    Quit,
    Help,
    Clear,
    Empty,
    Message(String),
}

/// Control words match on the trimmed line; messages go out as typed.
fn classify(raw: String) -> Line {
    match raw.trim().to_ascii_lowercase().as_str() {
        "quit" | "exit" | "q" => Line::Quit,
        "help" => Line::Help,
        "clear" => Line::Clear,
        "" => Line::Empty,
        _ => Line::Message(raw),
    }
}

fn print_error<W: Write>(output: &mut W, error: &AgentError) -> std::io::Result<()> {
    writeln!(output, "Error: {}", error)?;
    if let AgentError::Provider(provider_error) = error {
        if let Some(hint) = provider_error.hint() {
            writeln!(output, "Hint: {}", hint)?;
        }
    }
    Ok(())
}

/// Read lines until `quit` or end of input. Agent failures are reported and
/// the loop keeps going.
pub(crate) async fn run_repl<A, R, W>(agent: &mut A, input: R, mut output: W) -> anyhow::Result<()>
where
    A: ChatAgent + ?Sized,
    R: BufRead,
    W: Write,
{
    writeln!(output, "Type 'help' for commands, 'quit' to exit.")?;
    let mut lines = input.lines();

    loop {
        write!(output, "\nYou: ")?;
        output.flush()?;

        let Some(line) = lines.next() else {
            writeln!(output)?;
            break;
        };

        match classify(line?) {
            Line::Quit => {
                writeln!(output, "Goodbye!")?;
                break;
            }
            Line::Help => writeln!(output, "{}", HELP)?,
            Line::Clear => {
                agent.reset();
                writeln!(output, "Conversation cleared.")?;
            }
            Line::Empty => continue,
            Line::Message(message) => {
                tracing::debug!(chars = message.len(), "user message");
                match agent.chat(&message).await {
                    Ok(reply) => writeln!(output, "\nAgent: {}", reply)?,
                    Err(error) => {
                        tracing::warn!(%error, "agent turn failed");
                        print_error(&mut output, &error)?;
                    }
                }
            }
        }
    }

    Ok(())
}
