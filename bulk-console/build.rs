use std::{env, path::PathBuf, process::Command};

/// Build metadata embedded into `--version`: (env key, git query, fallback).
const GIT_METADATA: [(&str, GitQuery, &str); 3] = [
    ("BULK_BUILD_GIT_TAG", GitQuery::ExactTag, "untagged"),
    ("BULK_BUILD_GIT_COMMIT", GitQuery::ShortCommit, "unknown"),
    ("BULK_BUILD_GIT_DIRTY", GitQuery::Dirty, "false"),
];

#[derive(Clone, Copy)]
enum GitQuery {
    ExactTag,
    ShortCommit,
    Dirty,
}

impl GitQuery {
    fn resolve(self) -> Option<String> {
        match self {
            GitQuery::ExactTag => git(&["describe", "--tags", "--exact-match"]),
            GitQuery::ShortCommit => git(&["rev-parse", "--short=12", "HEAD"]),
            GitQuery::Dirty => git(&["status", "--porcelain", "--untracked-files=no"])
                .map(|output| (!output.is_empty()).to_string()),
        }
    }
}

fn main() {
    for (key, query, fallback) in GIT_METADATA {
        println!("cargo:rerun-if-env-changed={key}");
        let value = env::var(key)
            .ok()
            .or_else(|| query.resolve())
            .unwrap_or_else(|| fallback.to_string());
        println!("cargo:rustc-env={key}={value}");
    }

    if let Some(git_dir) = git(&["rev-parse", "--git-dir"]) {
        let head = PathBuf::from(git_dir).join("HEAD");
        if head.exists() {
            println!("cargo:rerun-if-changed={}", head.display());
        }
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
