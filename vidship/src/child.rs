//! Child-process stream plumbing shared by the pipeline stages.
//!
//! External tools block writing to one output stream when the other is not
//! drained, so both streams are read by independent tasks feeding a single
//! bounded channel that the stage's control loop consumes.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Capacity of the shared line channel.
const CHANNEL_CAPACITY: usize = 64;

/// How many recent stderr lines a stage keeps for its failure message.
pub const STDERR_TAIL_LINES: usize = 12;

/// One line of child output, tagged with its source stream.
#[derive(Debug)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// A spawned child whose output streams are being drained concurrently.
pub struct ChildStream {
    child: Child,
    lines: mpsc::Receiver<OutputLine>,
}

/// Spawn `cmd` with both output streams piped into a [`ChildStream`].
pub fn spawn(cmd: &mut Command) -> std::io::Result<ChildStream> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, tx.clone(), OutputLine::Stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, tx, OutputLine::Stderr);
    }

    Ok(ChildStream { child, lines: rx })
}

fn spawn_reader<R>(reader: R, tx: mpsc::Sender<OutputLine>, tag: fn(String) -> OutputLine)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(tag(line)).await.is_err() {
                break;
            }
        }
    });
}

impl ChildStream {
    /// Next line from either stream; `None` once both streams hit EOF.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    /// Kill the child process. Closes its pipes, which ends the reader tasks.
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }

    /// Wait for the child to exit.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }
}

/// Push a line onto a bounded tail buffer, evicting the oldest entry.
pub fn push_tail(tail: &mut std::collections::VecDeque<String>, line: String) {
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Render a stderr tail into a single failure-message fragment.
pub fn render_tail(tail: &std::collections::VecDeque<String>) -> String {
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail.iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_tail_is_bounded() {
        let mut tail = VecDeque::new();
        for i in 0..STDERR_TAIL_LINES + 5 {
            push_tail(&mut tail, format!("line {i}"));
        }
        assert_eq!(tail.len(), STDERR_TAIL_LINES);
        assert_eq!(tail.front().map(String::as_str), Some("line 5"));
    }

    #[test]
    fn test_render_tail_empty() {
        assert_eq!(render_tail(&VecDeque::new()), "no diagnostic output");
    }

    #[tokio::test]
    async fn test_stream_drains_both_outputs() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2"]);
        let mut stream = spawn(&mut cmd).expect("spawn sh");

        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();
        while let Some(line) = stream.next_line().await {
            match line {
                OutputLine::Stdout(l) => stdout_lines.push(l),
                OutputLine::Stderr(l) => stderr_lines.push(l),
            }
        }

        assert_eq!(stdout_lines, vec!["out"]);
        assert_eq!(stderr_lines, vec!["err"]);
        assert!(stream.wait().await.expect("wait").success());
    }
}
