//! Human-readable rendering of a change set

use crate::diff::ChangeSet;
use crate::resource::Resource;
use crate::Error;

/// Render a change set the way `trellis diff` prints it.
///
/// One line per action; `verbose` additionally prints the body of
/// created resources and a line diff for updated ones, indented under
/// the action line.
pub fn render(changes: &ChangeSet, verbose: bool) -> Result<String, Error> {
    if changes.is_empty() {
        return Ok("no changes\n".to_string());
    }

    let mut out = String::new();

    for resource in &changes.create {
        out.push_str(&format!("* creating {resource}\n"));
        if verbose {
            for line in body(resource)?.lines() {
                out.push_str(&format!("    + {line}\n"));
            }
        }
    }

    for pair in &changes.update {
        out.push_str(&format!("* updating {}\n", pair.new));
        if verbose {
            for line in line_diff(&body(&pair.old)?, &body(&pair.new)?) {
                out.push_str(&format!("    {line}\n"));
            }
        }
    }

    let phases = changes.destroy.len();
    for (index, phase) in changes.destroy.iter().enumerate() {
        for resource in phase {
            out.push_str(&format!(
                "* destroying (phase {}/{phases}) {resource}\n",
                index + 1
            ));
        }
    }

    Ok(out)
}

fn body(resource: &Resource) -> Result<String, Error> {
    Ok(serde_yaml::to_string(resource)?)
}

/// Minimal line diff: unchanged lines are elided, removed lines get a
/// `-` prefix and added lines a `+`. Longest-common-subsequence keeps
/// the output stable for the small documents resources serialize to.
fn line_diff(old: &str, new: &str) -> Vec<String> {
    let old: Vec<&str> = old.lines().collect();
    let new: Vec<&str> = new.lines().collect();

    let mut lcs = vec![vec![0usize; new.len() + 1]; old.len() + 1];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut lines = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            lines.push(format!("- {}", old[i]));
            i += 1;
        } else {
            lines.push(format!("+ {}", new[j]));
            j += 1;
        }
    }
    for line in &old[i..] {
        lines.push(format!("- {line}"));
    }
    for line in &new[j..] {
        lines.push(format!("+ {line}"));
    }
    lines
}
