use std::sync::Arc;
use std::time::Duration;

use builder_core::errors::MissingSource;
use builder_core::{BuilderError, CommandOutput, LogStatus};
use builder_source::git::GitSource;
use builder_source::oss::OssSource;
use builder_source::svn::SvnSource;
use builder_source::{DefaultSourceAcquirer, RepoBuildInfo, SourceAcquirer};
use builder_testing_utils::{write_files, RecordingLogger, ScriptedCommandRunner};

const SVN_LOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<log>
<logentry revision="42">
<author>alice</author>
<date>2023-01-01T12:00:00.000000Z</date>
<msg>initial import</msg>
</logentry>
</log>"#;

fn acquirer(runner: &ScriptedCommandRunner, ssh_dir: &std::path::Path) -> DefaultSourceAcquirer {
    let runner: Arc<ScriptedCommandRunner> = Arc::new(runner.clone());
    let timeout = Duration::from_secs(10);
    DefaultSourceAcquirer::new(
        GitSource::new(runner.clone(), ssh_dir.to_path_buf(), None, timeout),
        SvnSource::new(runner, timeout),
        OssSource::new(reqwest::Client::new(), timeout),
    )
}

/// Last argument of a clone/checkout is the target directory
fn populate_target(spec: &builder_core::CommandSpec, files: &[(&str, &str)], marker: &str) {
    let target = std::path::PathBuf::from(spec.args.last().unwrap());
    std::fs::create_dir_all(target.join(marker)).unwrap();
    write_files(&target, files);
}

#[tokio::test]
async fn test_git_clone_produces_work_tree() {
    let root = tempfile::tempdir().unwrap();
    let runner = ScriptedCommandRunner::new();
    runner
        .respond_with("git", "clone", |spec| {
            populate_target(spec, &[("go.mod", "module example.com/app\n")], ".git");
            Ok(CommandOutput::success(""))
        })
        .respond(
            "git",
            "log -1",
            CommandOutput::success("0123abcd\nbob\nfix: handle empty input"),
        );

    let info = RepoBuildInfo::new(
        root.path(),
        "https://git.example.com/team/app.git?dir=./",
        "",
        "git",
        "tenant-1",
        "component-1",
        None,
        None,
    )
    .unwrap();
    let logger = RecordingLogger::new("event-1");
    let (tree, commit) = acquirer(&runner, root.path())
        .acquire(&info, &logger)
        .await
        .unwrap();

    assert_eq!(commit.hash, "0123abcd");
    assert_eq!(commit.author, "bob");
    assert_eq!(commit.message, "fix: handle empty input");
    assert!(tree.path().join("go.mod").is_file());

    let clone = &runner.calls_for("git")[0];
    assert!(clone.contains("--depth 1 --single-branch --branch master"));

    let statuses: Vec<LogStatus> = logger.lines().iter().map(|l| l.status).collect();
    assert_eq!(statuses, vec![LogStatus::Starting, LogStatus::Success]);

    let path = tree.path().to_path_buf();
    drop(tree);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_git_missing_branch() {
    let root = tempfile::tempdir().unwrap();
    let runner = ScriptedCommandRunner::new();
    runner.respond(
        "git",
        "clone",
        CommandOutput::failure(128, "warning: Could not find remote branch dev to clone.\nfatal: Remote branch dev not found in upstream origin"),
    );
    let info = RepoBuildInfo::new(
        root.path(),
        "https://git.example.com/team/app.git",
        "dev",
        "git",
        "tenant-1",
        "component-1",
        None,
        None,
    )
    .unwrap();
    let logger = RecordingLogger::new("event-1");
    let err = acquirer(&runner, root.path())
        .acquire(&info, &logger)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BuilderError::SourceNotFound(MissingSource::Branch(ref b)) if b == "dev"
    ));
    assert_eq!(logger.errors().len(), 1);
}

#[tokio::test]
async fn test_svn_trunk_falls_back_to_root() {
    let root = tempfile::tempdir().unwrap();
    let runner = ScriptedCommandRunner::new();
    runner
        .respond_with("svn", "checkout", |_| {
            Ok(CommandOutput::failure(
                1,
                "svn: E170000: URL 'http://svn.example.com/repo/trunk' doesn't exist",
            ))
        })
        .respond_with("svn", "checkout", |spec| {
            populate_target(spec, &[("index.php", "<?php echo 1;")], ".svn");
            Ok(CommandOutput::success("Checked out revision 42."))
        })
        .respond("svn", "log --xml", CommandOutput::success(SVN_LOG));

    let info = RepoBuildInfo::new(
        root.path(),
        "http://svn.example.com/repo",
        "",
        "svn",
        "tenant-1",
        "component-1",
        Some("alice".to_string()),
        Some("secret".to_string()),
    )
    .unwrap();
    let logger = RecordingLogger::new("event-1");
    let (tree, commit) = acquirer(&runner, root.path())
        .acquire(&info, &logger)
        .await
        .unwrap();

    assert_eq!(commit.hash, "42");
    assert_eq!(commit.author, "alice");
    assert!(tree.path().join("index.php").is_file());

    let checkouts: Vec<String> = runner
        .calls_for("svn")
        .into_iter()
        .filter(|c| c.contains("checkout"))
        .collect();
    assert_eq!(checkouts.len(), 2);
    assert!(checkouts[0].contains("http://svn.example.com/repo/trunk "));
    assert!(checkouts[1].contains("http://svn.example.com/repo "));
    assert!(checkouts[1].contains("--username alice"));
}
