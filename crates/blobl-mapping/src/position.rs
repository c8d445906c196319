//! Line/column resolution for mapping source text

/// A resolved source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Line number (1-indexed)
    pub line: usize,

    /// Column as a character distance from the start of the line (0-indexed)
    pub column: usize,
}

/// Precomputed character offsets at which each line of a source text begins.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    /// Index the line starts of a source text
    #[must_use]
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .chars()
                .enumerate()
                .filter(|(_, c)| *c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    /// Number of lines in the indexed text
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Resolve a character offset. Offsets past the end clamp to the last line.
    #[must_use]
    pub fn locate(&self, offset: usize) -> Location {
        let index = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        Location {
            line: index + 1,
            column: offset - self.line_starts[index],
        }
    }
}
