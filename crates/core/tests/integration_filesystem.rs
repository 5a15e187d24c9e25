//! Integration tests for the filesystem snapshot backend

mod common;

use benchenv_core::config::{FilesystemSettings, FixtureSettings};
use benchenv_core::filesystem::FilesystemBackend;
use benchenv_core::fixture::FixtureFetcher;
use benchenv_core::lifecycle::LifecycleController;
use benchenv_core::retry::RetryConfig;
use benchenv_core::task::Task;
use common::{corrupt_papers_archive, snapshot, zip_archive, StaticHttpClient};
use std::fs;
use std::path::Path;

fn controller(
    root: &Path,
    client: StaticHttpClient,
) -> LifecycleController<FilesystemBackend<StaticHttpClient>> {
    let settings = FilesystemSettings {
        test_root: root.join("test_environments"),
        work_root: Some(root.join("work")),
        ..FilesystemSettings::default()
    };
    let fixtures = FixtureSettings {
        base_url: "http://fixtures.local".to_string(),
        data_root: root.join("data"),
        ..FixtureSettings::default()
    };
    let fetcher = FixtureFetcher::new(client, fixtures).with_retry(RetryConfig::none());
    LifecycleController::new(FilesystemBackend::new(settings, fetcher))
}

#[tokio::test]
async fn test_papers_fixture_fetched_when_missing() {
    let temp = tempfile::tempdir().unwrap();
    let archive = zip_archive(&[
        ("papers/attention.pdf", "%PDF-1.4 attention"),
        ("papers/bert.pdf", "%PDF-1.4 bert"),
        ("papers/notes/summary.md", "# Summary"),
        ("__MACOSX/papers/._bert.pdf", "resource fork"),
    ]);
    let client = StaticHttpClient::new([(
        "http://fixtures.local/filesystem/papers.zip".to_string(),
        archive,
    )]);
    let mut controller = controller(temp.path(), client.clone());
    let mut task = Task::new("filesystem", "papers", "find_author", temp.path().join("tasks/1"));

    assert!(controller.set_up(&mut task).await);

    assert_eq!(
        client.requests(),
        vec!["http://fixtures.local/filesystem/papers.zip"]
    );
    let work = task.environment.test_directory.clone().unwrap();
    assert_eq!(work, temp.path().join("work/papers"));
    assert_eq!(snapshot(&work).len(), 3);
    assert!(!temp.path().join("test_environments/__MACOSX").exists());
    assert_eq!(
        controller.agent_config()["test_directory"],
        work.display().to_string()
    );

    assert!(controller.clean_up(Some(&task)).await.success());
    assert!(!work.exists());
}

#[tokio::test]
async fn test_working_copy_matches_baseline_and_baseline_survives() {
    let temp = tempfile::tempdir().unwrap();
    let baseline = temp.path().join("test_environments/desktop");
    fs::create_dir_all(baseline.join("projects/app")).unwrap();
    fs::write(baseline.join("todo.txt"), "buy milk\n").unwrap();
    fs::write(baseline.join("projects/app/main.rs"), "fn main() {}\n").unwrap();
    fs::write(baseline.join("binary.bin"), [0u8, 159, 146, 150]).unwrap();
    let before = snapshot(&baseline);

    let mut controller = controller(temp.path(), StaticHttpClient::default());
    let mut task = Task::new("filesystem", "desktop", "organize", temp.path().join("tasks/2"));
    assert!(controller.set_up(&mut task).await);

    let work = task.environment.test_directory.clone().unwrap();
    assert_eq!(snapshot(&work), before);

    // The agent edits its copy
    fs::write(work.join("todo.txt"), "done\n").unwrap();
    fs::remove_file(work.join("binary.bin")).unwrap();
    fs::create_dir_all(work.join("organized")).unwrap();

    let report = controller.clean_up(Some(&task)).await;
    assert!(report.success());
    assert!(controller.tracker().is_empty());
    assert_eq!(snapshot(&baseline), before);

    // Nothing left to clean
    let again = controller.clean_up(None).await;
    assert!(again.success());
    assert!(again.outcomes.is_empty());
}

#[tokio::test]
async fn test_unavailable_fixture_fails_setup() {
    let temp = tempfile::tempdir().unwrap();
    let mut controller = controller(temp.path(), StaticHttpClient::default());
    let mut task = Task::new("filesystem", "votenet", "t", temp.path().join("tasks/3"));

    assert!(!controller.set_up(&mut task).await);
    assert!(task.environment.test_directory.is_none());
    assert!(controller.tracker().is_empty());
    assert!(!temp.path().join("work/votenet").exists());
}

#[tokio::test]
async fn test_unknown_category_fails_setup() {
    let temp = tempfile::tempdir().unwrap();
    let mut controller = controller(temp.path(), StaticHttpClient::default());
    let mut task = Task::new("filesystem", "not_a_fixture", "t", temp.path().join("tasks/4"));
    assert!(!controller.set_up(&mut task).await);
}

#[tokio::test]
async fn test_corrupt_fixture_is_never_used_as_baseline() {
    let temp = tempfile::tempdir().unwrap();
    let url = "http://fixtures.local/filesystem/papers.zip".to_string();
    let client = StaticHttpClient::new([(url.clone(), corrupt_papers_archive())]);
    let mut controller = controller(temp.path(), client.clone());

    let mut first = Task::new("filesystem", "papers", "a", temp.path().join("tasks/5"));
    assert!(!controller.set_up(&mut first).await);
    assert!(!temp.path().join("test_environments/papers").exists());

    // The retry downloads again instead of trusting a half-extracted tree
    let mut second = Task::new("filesystem", "papers", "b", temp.path().join("tasks/6"));
    assert!(!controller.set_up(&mut second).await);
    assert_eq!(client.requests(), vec![url.clone(), url]);
    assert!(second.environment.test_directory.is_none());
    assert!(!temp.path().join("work/papers").exists());
    assert_eq!(
        fs::read_dir(temp.path().join("test_environments")).unwrap().count(),
        0
    );
}

#[tokio::test]
async fn test_working_root_overlapping_fixture_root_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let fixtures = temp.path().join("fx");
    fs::create_dir_all(fixtures.join("papers")).unwrap();
    fs::write(fixtures.join("papers/a.txt"), "precious").unwrap();
    let fetcher = FixtureFetcher::new(StaticHttpClient::default(), FixtureSettings::default())
        .with_retry(RetryConfig::none());

    for work_root in [fixtures.clone(), fixtures.join("papers/scratch")] {
        let settings = FilesystemSettings {
            test_root: fixtures.clone(),
            work_root: Some(work_root),
            ..FilesystemSettings::default()
        };
        let mut controller =
            LifecycleController::new(FilesystemBackend::new(settings, fetcher.clone()));
        let mut task = Task::new("filesystem", "papers", "t", temp.path().join("tasks/7"));

        assert!(!controller.set_up(&mut task).await);
        assert!(controller.tracker().is_empty());
        assert_eq!(
            fs::read_to_string(fixtures.join("papers/a.txt")).unwrap(),
            "precious"
        );
        assert!(!fixtures.join("papers/scratch").exists());
    }
}
