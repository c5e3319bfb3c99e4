//! Line-level diff via longest common subsequence

use serde::{Deserialize, Serialize};

/// One line-level edit operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "line")]
pub enum DiffOp {
    /// Line present in both versions
    Equal(String),
    /// Line only in the new version
    Insert(String),
    /// Line only in the old version
    Delete(String),
}

/// A contiguous run of changes with its position in both versions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hunk {
    /// 1-based first line of the hunk in the old version
    pub old_start: usize,
    /// Number of old lines covered
    pub old_lines: usize,
    /// 1-based first line of the hunk in the new version
    pub new_start: usize,
    /// Number of new lines covered
    pub new_lines: usize,
    /// Operations within the hunk (changes only, no context)
    pub ops: Vec<DiffOp>,
}

/// Line-diff summary between two file versions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResult {
    /// Count of inserted lines
    pub added: usize,
    /// Count of deleted lines
    pub deleted: usize,
    /// Changed regions
    pub hunks: Vec<Hunk>,
}

impl DiffResult {
    /// Whether the two versions are identical
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.deleted == 0
    }
}

/// Compute the line diff from `old` to `new`
pub fn diff_lines(old: &str, new: &str) -> DiffResult {
    let old_lines: Vec<&str> = if old.is_empty() { vec![] } else { old.lines().collect() };
    let new_lines: Vec<&str> = if new.is_empty() { vec![] } else { new.lines().collect() };

    let ops = lcs_ops(&old_lines, &new_lines);
    build_result(&ops)
}

/// Edit script from an LCS table over the two line slices
fn lcs_ops(old: &[&str], new: &[&str]) -> Vec<DiffOp> {
    let n = old.len();
    let m = new.len();

    // lengths[i][j] = LCS length of old[i..] and new[j..]
    let mut lengths = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lengths[i][j] = if old[i] == new[j] {
                lengths[i + 1][j + 1] + 1
            } else {
                lengths[i + 1][j].max(lengths[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(DiffOp::Equal(old[i].to_string()));
            i += 1;
            j += 1;
        } else if lengths[i + 1][j] >= lengths[i][j + 1] {
            ops.push(DiffOp::Delete(old[i].to_string()));
            i += 1;
        } else {
            ops.push(DiffOp::Insert(new[j].to_string()));
            j += 1;
        }
    }
    while i < n {
        ops.push(DiffOp::Delete(old[i].to_string()));
        i += 1;
    }
    while j < m {
        ops.push(DiffOp::Insert(new[j].to_string()));
        j += 1;
    }

    ops
}

fn build_result(ops: &[DiffOp]) -> DiffResult {
    let mut added = 0;
    let mut deleted = 0;
    let mut hunks = Vec::new();

    let mut old_line = 1usize;
    let mut new_line = 1usize;
    let mut current: Option<Hunk> = None;

    for op in ops {
        match op {
            DiffOp::Equal(_) => {
                if let Some(hunk) = current.take() {
                    hunks.push(hunk);
                }
                old_line += 1;
                new_line += 1;
            }
            DiffOp::Insert(line) => {
                added += 1;
                let hunk = current.get_or_insert_with(|| Hunk {
                    old_start: old_line,
                    old_lines: 0,
                    new_start: new_line,
                    new_lines: 0,
                    ops: Vec::new(),
                });
                hunk.new_lines += 1;
                hunk.ops.push(DiffOp::Insert(line.clone()));
                new_line += 1;
            }
            DiffOp::Delete(line) => {
                deleted += 1;
                let hunk = current.get_or_insert_with(|| Hunk {
                    old_start: old_line,
                    old_lines: 0,
                    new_start: new_line,
                    new_lines: 0,
                    ops: Vec::new(),
                });
                hunk.old_lines += 1;
                hunk.ops.push(DiffOp::Delete(line.clone()));
                old_line += 1;
            }
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }

    DiffResult {
        added,
        deleted,
        hunks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_content() {
        let diff = diff_lines("a\nb\nc", "a\nb\nc");
        assert!(diff.is_empty());
        assert!(diff.hunks.is_empty());
    }

    #[test]
    fn test_single_insert() {
        let diff = diff_lines("a\nc", "a\nb\nc");
        assert_eq!(diff.added, 1);
        assert_eq!(diff.deleted, 0);
        assert_eq!(diff.hunks.len(), 1);
        assert_eq!(diff.hunks[0].new_start, 2);
        assert_eq!(diff.hunks[0].ops, vec![DiffOp::Insert("b".to_string())]);
    }

    #[test]
    fn test_single_delete() {
        let diff = diff_lines("a\nb\nc", "a\nc");
        assert_eq!(diff.added, 0);
        assert_eq!(diff.deleted, 1);
        assert_eq!(diff.hunks[0].old_start, 2);
    }

    #[test]
    fn test_replace_is_delete_plus_insert() {
        let diff = diff_lines("a\nold\nc", "a\nnew\nc");
        assert_eq!(diff.added, 1);
        assert_eq!(diff.deleted, 1);
        assert_eq!(diff.hunks.len(), 1);
    }

    #[test]
    fn test_empty_old_counts_all_added() {
        let diff = diff_lines("", "a\nb\nc");
        assert_eq!(diff.added, 3);
        assert_eq!(diff.deleted, 0);
    }

    #[test]
    fn test_empty_new_counts_all_deleted() {
        let diff = diff_lines("a\nb", "");
        assert_eq!(diff.added, 0);
        assert_eq!(diff.deleted, 2);
    }

    #[test]
    fn test_disjoint_changes_make_separate_hunks() {
        let old = "a\nb\nc\nd\ne";
        let new = "a\nB\nc\nd\nE";
        let diff = diff_lines(old, new);
        assert_eq!(diff.hunks.len(), 2);
        assert_eq!(diff.added, 2);
        assert_eq!(diff.deleted, 2);
    }

    #[test]
    fn test_hunk_positions() {
        let diff = diff_lines("x\ny\nz", "x\ny\nz\nw");
        assert_eq!(diff.hunks.len(), 1);
        let hunk = &diff.hunks[0];
        assert_eq!(hunk.new_start, 4);
        assert_eq!(hunk.new_lines, 1);
        assert_eq!(hunk.old_lines, 0);
    }
}
