//! Git repository access for the commit, comments and PR review tools.
//!
//! Every helper opens the repository itself and drops it before returning,
//! so no handle outlives a call or crosses an `.await`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Diff, DiffFormat, DiffStatsFormat, ErrorCode, IndexAddOption, Oid, Repository,
    Signature, StashFlags, StatusOptions,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Open the repository containing `workspace`.
pub fn open(workspace: &Path) -> Result<Repository> {
    Repository::discover(workspace)
        .with_context(|| format!("Not a git repository: {}", workspace.display()))
}

pub fn is_repository(workspace: &Path) -> bool {
    Repository::discover(workspace).is_ok()
}

fn workdir(repo: &Repository) -> Result<PathBuf> {
    repo.workdir()
        .map(Path::to_path_buf)
        .context("Repository has no working directory")
}

/// Files with uncommitted changes, including untracked ones.
pub fn changed_files(workspace: &Path) -> Result<Vec<String>> {
    let repo = open(workspace)?;
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);

    let statuses = repo
        .statuses(Some(&mut options))
        .context("Failed to read repository status")?;

    let mut files: Vec<String> = statuses
        .iter()
        .filter(|entry| {
            let status = entry.status();
            !status.is_empty() && !status.is_ignored()
        })
        .filter_map(|entry| entry.path().map(String::from))
        .collect();
    files.sort();
    files.dedup();
    Ok(files)
}

/// Stage every change in the working tree, deletions included.
pub fn stage_all(workspace: &Path) -> Result<()> {
    let repo = open(workspace)?;
    let mut index = repo.index().context("Failed to open index")?;
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .context("Failed to stage changes")?;
    index
        .update_all(["*"].iter(), None)
        .context("Failed to stage deletions")?;
    index.write().context("Failed to write index")?;
    debug!("Staged all changes");
    Ok(())
}

/// Rendered diff with its stat summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub files: Vec<String>,
    pub stat: String,
    pub patch: String,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Diff between `HEAD` and the index.
pub fn staged_diff(workspace: &Path) -> Result<DiffSummary> {
    let repo = open(workspace)?;
    let head_tree = match repo.head() {
        Ok(head) => Some(head.peel_to_tree().context("Failed to read HEAD tree")?),
        // Unborn branch: everything in the index is new.
        Err(_) => None,
    };

    let diff = repo
        .diff_tree_to_index(head_tree.as_ref(), None, None)
        .context("Failed to diff index")?;
    summarize(&diff)
}

fn summarize(diff: &Diff) -> Result<DiffSummary> {
    let files = diff
        .deltas()
        .filter_map(|delta| {
            delta
                .new_file()
                .path()
                .or_else(|| delta.old_file().path())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();

    let stat = diff
        .stats()
        .and_then(|stats| stats.to_buf(DiffStatsFormat::FULL, 80))
        .map(|buf| buf.as_str().unwrap_or_default().to_string())
        .context("Failed to compute diff stat")?;

    let mut patch = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            patch.push(line.origin());
        }
        patch.push_str(&String::from_utf8_lossy(line.content()));
        true
    })
    .context("Failed to render diff")?;

    Ok(DiffSummary { files, stat, patch })
}

/// Short name of the checked-out branch, `None` when detached or unborn.
pub fn current_branch(workspace: &Path) -> Result<Option<String>> {
    let repo = open(workspace)?;
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(None),
        Err(e) => return Err(e).context("Failed to read HEAD"),
    };
    if !head.is_branch() {
        return Ok(None);
    }
    Ok(head.shorthand().map(String::from))
}

fn branch_tip(repo: &Repository, name: &str) -> Result<Oid> {
    let branch = repo
        .find_branch(name, BranchType::Local)
        .with_context(|| format!("Branch not found: {}", name))?;
    branch
        .get()
        .target()
        .with_context(|| format!("Branch has no target: {}", name))
}

/// Local branch names, sorted.
pub fn local_branches(workspace: &Path) -> Result<Vec<String>> {
    let repo = open(workspace)?;
    let mut names = Vec::new();
    for branch in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()? {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// A branch with commits its target branch does not have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AheadBranch {
    pub branch: String,
    pub target: String,
    pub ahead: usize,
}

/// Whether `branch` is ahead of the first existing target; `None` otherwise.
pub fn ahead_of(workspace: &Path, branch: &str, targets: &[String]) -> Result<Option<AheadBranch>> {
    let repo = open(workspace)?;
    let tip = branch_tip(&repo, branch)?;

    for target in targets.iter().filter(|t| t.as_str() != branch) {
        let Ok(base) = branch_tip(&repo, target) else {
            continue;
        };
        let (ahead, _behind) = repo.graph_ahead_behind(tip, base)?;
        if ahead > 0 {
            return Ok(Some(AheadBranch {
                branch: branch.to_string(),
                target: target.clone(),
                ahead,
            }));
        }
    }
    Ok(None)
}

/// First local branch ahead of one of `targets`, trying the current branch first.
pub fn find_branch_ahead(workspace: &Path, targets: &[String]) -> Result<Option<AheadBranch>> {
    let mut candidates = local_branches(workspace)?;
    candidates.retain(|name| !targets.contains(name));
    if let Some(current) = current_branch(workspace)? {
        if let Some(pos) = candidates.iter().position(|n| *n == current) {
            let name = candidates.remove(pos);
            candidates.insert(0, name);
        }
    }

    for candidate in candidates {
        if let Some(found) = ahead_of(workspace, &candidate, targets)? {
            debug!("{} is {} commit(s) ahead of {}", found.branch, found.ahead, found.target);
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Diff of `branch` against its merge base with `target`.
pub fn branch_diff(workspace: &Path, branch: &str, target: &str) -> Result<DiffSummary> {
    let repo = open(workspace)?;
    let tip = branch_tip(&repo, branch)?;
    let base = repo
        .merge_base(tip, branch_tip(&repo, target)?)
        .with_context(|| format!("No common ancestor between {} and {}", branch, target))?;

    let old_tree = repo.find_commit(base)?.tree()?;
    let new_tree = repo.find_commit(tip)?.tree()?;
    let diff = repo
        .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)
        .context("Failed to diff branches")?;
    summarize(&diff)
}

/// One-line summaries of commits on `branch` that `target` lacks, newest first.
pub fn commit_log(workspace: &Path, branch: &str, target: &str, limit: usize) -> Result<Vec<String>> {
    let repo = open(workspace)?;
    let mut walk = repo.revwalk()?;
    walk.push(branch_tip(&repo, branch)?)?;
    walk.hide(branch_tip(&repo, target)?)?;

    let mut lines = Vec::new();
    for oid in walk.take(limit) {
        let commit = repo.find_commit(oid?)?;
        let id = commit.id().to_string();
        lines.push(format!(
            "{} {}",
            &id[..7.min(id.len())],
            commit.summary().unwrap_or_default()
        ));
    }
    Ok(lines)
}

/// Check out a local branch and point `HEAD` at it.
pub fn checkout_branch(workspace: &Path, branch: &str) -> Result<()> {
    let repo = open(workspace)?;
    let refname = format!("refs/heads/{}", branch);
    let target = repo
        .revparse_single(&refname)
        .with_context(|| format!("Branch not found: {}", branch))?;

    repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))
        .with_context(|| format!("Failed to check out {}", branch))?;
    repo.set_head(&refname)
        .with_context(|| format!("Failed to move HEAD to {}", branch))?;
    info!("Checked out {}", branch);
    Ok(())
}

/// Stash uncommitted changes including untracked files. Returns `false` when
/// there was nothing to stash.
pub fn stash_save(workspace: &Path, message: &str) -> Result<bool> {
    let mut repo = open(workspace)?;
    let signature = repo
        .signature()
        .or_else(|_| Signature::now("aidev", "aidev@localhost"))?;

    match repo.stash_save(&signature, message, Some(StashFlags::INCLUDE_UNTRACKED)) {
        Ok(oid) => {
            debug!("Stashed changes as {}", oid);
            Ok(true)
        }
        Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
        Err(e) => Err(e).context("Failed to stash changes"),
    }
}

/// Restore the most recent stash entry.
pub fn stash_pop(workspace: &Path) -> Result<()> {
    let mut repo = open(workspace)?;
    repo.stash_pop(0, None).context("Failed to pop stash")?;
    debug!("Restored stashed changes");
    Ok(())
}

/// Path of a hook script in the repository's hooks directory. The script may not exist.
pub fn hook_path(workspace: &Path, name: &str) -> Result<PathBuf> {
    let repo = open(workspace)?;
    Ok(repo.path().join("hooks").join(name))
}

/// Repository working directory.
pub fn root(workspace: &Path) -> Result<PathBuf> {
    workdir(&open(workspace)?)
}

/// Commit time of every line of `content`, the working-tree text of `file`
/// (relative to `workspace`). Lines not committed yet are `None`.
pub fn blame_lines(workspace: &Path, file: &str, content: &str) -> Result<Vec<Option<DateTime<Utc>>>> {
    let line_count = content.lines().count();
    let repo = open(workspace)?;
    let root = fs::canonicalize(workdir(&repo)?)?;
    let full = fs::canonicalize(workspace.join(file))
        .with_context(|| format!("File not found: {}", file))?;
    let relative = full
        .strip_prefix(&root)
        .with_context(|| format!("{} is outside the repository", file))?;

    let head_tree = match repo.head() {
        Ok(head) => head.peel_to_tree()?,
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            debug!("No commits yet, {} is all new", file);
            return Ok(vec![None; line_count]);
        }
        Err(e) => return Err(e).context("Failed to read HEAD"),
    };
    if head_tree.get_path(relative).is_err() {
        debug!("{} is not committed", file);
        return Ok(vec![None; line_count]);
    }

    let committed = repo
        .blame_file(relative, None)
        .with_context(|| format!("Failed to blame {}", file))?;
    let blame = committed
        .blame_buffer(content.as_bytes())
        .with_context(|| format!("Failed to blame working copy of {}", file))?;

    Ok((1..=line_count)
        .map(|line| {
            let hunk = blame.get_line(line)?;
            if hunk.final_commit_id().is_zero() {
                return None;
            }
            let secs = hunk.final_signature().when().seconds();
            let time = DateTime::<Utc>::from_timestamp(secs, 0);
            if time.is_none() {
                warn!("Ignoring out-of-range commit time {} in {}", secs, file);
            }
            time
        })
        .collect())
}


#[cfg(test)]
mod tests {
    use super::testing::{branch, commit_all, commit_all_at, init};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_changed_files_and_staged_diff() {
        let dir = TempDir::new().unwrap();
        let repo = init(dir.path());
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        commit_all(&repo, "initial");

        fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        fs::write(dir.path().join("b.txt"), "new\n").unwrap();

        assert_eq!(changed_files(dir.path()).unwrap(), vec!["a.txt", "b.txt"]);
        assert!(staged_diff(dir.path()).unwrap().is_empty());

        stage_all(dir.path()).unwrap();
        let diff = staged_diff(dir.path()).unwrap();
        assert_eq!(diff.files, vec!["a.txt", "b.txt"]);
        assert!(diff.patch.contains("+two"));
        assert!(diff.stat.contains("2 files changed"));
    }

    #[test]
    fn test_not_a_repository() {
        let dir = TempDir::new().unwrap();
        assert!(!is_repository(dir.path()));
        assert!(changed_files(dir.path()).is_err());
    }

    #[test]
    fn test_branch_ahead_diff_and_log() {
        let dir = TempDir::new().unwrap();
        let repo = init(dir.path());
        fs::write(dir.path().join("lib.rs"), "fn a() {}\n").unwrap();
        commit_all(&repo, "initial");
        branch(&repo, "feature");

        checkout_branch(dir.path(), "feature").unwrap();
        assert_eq!(current_branch(dir.path()).unwrap().as_deref(), Some("feature"));
        fs::write(dir.path().join("lib.rs"), "fn a() {}\nfn b() {}\n").unwrap();
        commit_all(&repo, "Add b");
        checkout_branch(dir.path(), "main").unwrap();

        let targets = vec!["develop".to_string(), "main".to_string()];
        let found = find_branch_ahead(dir.path(), &targets).unwrap().unwrap();
        assert_eq!(found.branch, "feature");
        assert_eq!(found.target, "main");
        assert_eq!(found.ahead, 1);

        let diff = branch_diff(dir.path(), "feature", "main").unwrap();
        assert!(diff.patch.contains("+fn b() {}"));

        let log = commit_log(dir.path(), "feature", "main", 10).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].ends_with("Add b"));

        assert!(ahead_of(dir.path(), "main", &targets).unwrap().is_none());
    }

    #[test]
    fn test_stash_round_trip() {
        let dir = TempDir::new().unwrap();
        let repo = init(dir.path());
        fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        commit_all(&repo, "initial");

        assert!(!stash_save(dir.path(), "nothing").unwrap());

        fs::write(dir.path().join("a.txt"), "dirty\n").unwrap();
        assert!(stash_save(dir.path(), "work in progress").unwrap());
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\n");

        stash_pop(dir.path()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "dirty\n");
    }

    #[test]
    fn test_blame_lines_follows_working_tree() {
        let dir = TempDir::new().unwrap();
        let repo = init(dir.path());
        fs::write(dir.path().join("a.rs"), "// old\nfn a() {}\n").unwrap();
        commit_all_at(&repo, "initial", 1_000_000_000);

        // Insert an uncommitted line above the committed ones
        let dirty = "// new\n// old\nfn a() {}\n";
        fs::write(dir.path().join("a.rs"), dirty).unwrap();

        let times = blame_lines(dir.path(), "a.rs", dirty).unwrap();
        assert_eq!(times.len(), 3);
        assert_eq!(times[0], None);
        assert_eq!(times[1].unwrap().timestamp(), 1_000_000_000);
        assert_eq!(times[2].unwrap().timestamp(), 1_000_000_000);
    }

    #[test]
    fn test_blame_lines_untracked_file() {
        let dir = TempDir::new().unwrap();
        let repo = init(dir.path());
        fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        commit_all_at(&repo, "initial", 1_000_000_000);

        fs::write(dir.path().join("new.rs"), "// untracked\nfn b() {}\n").unwrap();
        let times = blame_lines(dir.path(), "new.rs", "// untracked\nfn b() {}\n").unwrap();
        assert_eq!(times, vec![None, None]);

        assert!(blame_lines(dir.path(), "missing.rs", "").is_err());
    }
}
