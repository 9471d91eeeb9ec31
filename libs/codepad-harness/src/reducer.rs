// Output reducer: folds a chunk stream into whole strings
use futures_util::{Stream, StreamExt};

use crate::environment::{OutputChunk, OutputKind};
use crate::error::HarnessResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReducedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ReducedOutput {
    /// Last non-empty stderr line, the usual place interpreters put the error
    pub fn error_summary(&self) -> Option<&str> {
        self.stderr.lines().map(str::trim).filter(|l| !l.is_empty()).last()
    }
}

/// Drain the stream, concatenating chunks of each kind in arrival order.
///
/// An empty stream reduces to empty strings. The first read error aborts the
/// reduction; whatever was gathered so far is dropped with it.
pub async fn reduce<S>(stream: S) -> HarnessResult<ReducedOutput>
where
    S: Stream<Item = HarnessResult<OutputChunk>> + Unpin,
{
    let mut stream = stream;
    let mut reduced = ReducedOutput::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        match chunk.kind {
            OutputKind::Stdout => reduced.stdout.push_str(&chunk.text),
            OutputKind::Stderr => reduced.stderr.push_str(&chunk.text),
        }
    }

    Ok(reduced)
}

/// Last line of the trimmed output, the line a judged script prints its answer on
pub fn last_line(output: &str) -> &str {
    output.trim().lines().last().unwrap_or("")
}
