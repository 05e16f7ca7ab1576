use lantern_cli::FsContentAccessor;
use lantern_core::SpaceKey;
use lantern_scanner::ContentAccessor;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, contents).expect("write file");
}

fn content_tree() -> TempDir {
    let tmp = TempDir::new().expect("create temp dir");
    let root = tmp.path();

    write(&root.join("DOCS/b-payroll.txt"), "ssn 123-45-6789");
    write(&root.join("DOCS/a-intro.md"), "# Welcome aboard\nmail jane@example.com");
    write(&root.join("DOCS/diagram.png"), "not a page");
    write(&root.join("DOCS/a-intro.attachments/z-notes.txt"), "call 555-123-4567");
    write(&root.join("DOCS/a-intro.attachments/contract.pdf"), "%PDF-1.4");
    write(&root.join("HR/team.md"), "no heading here");
    write(&root.join(".git/config"), "[core]");
    write(&root.join("bad key!/page.md"), "ignored");
    write(&root.join("README.md"), "root file, not a space");

    tmp
}

fn key(k: &str) -> SpaceKey {
    SpaceKey::new(k).expect("valid space key")
}

#[tokio::test]
async fn test_lists_valid_space_directories() {
    let tmp = content_tree();
    let accessor = FsContentAccessor::new(tmp.path());

    let spaces: Vec<String> = accessor
        .get_all_spaces()
        .await
        .expect("list spaces")
        .into_iter()
        .map(|space| space.key.to_string())
        .collect();
    assert_eq!(spaces, vec!["DOCS", "HR"]);

    assert!(accessor.get_space(&key("DOCS")).await.expect("get space").is_some());
    assert!(accessor.get_space(&key("MISSING")).await.expect("get space").is_none());
    assert!(accessor
        .get_space(&SpaceKey::scan_level())
        .await
        .expect("get space")
        .is_none());
}

#[tokio::test]
async fn test_pages_are_sorted_and_titled() {
    let tmp = content_tree();
    let accessor = FsContentAccessor::new(tmp.path());

    let pages = accessor
        .get_all_pages_in_space(&key("DOCS"))
        .await
        .expect("list pages");
    let ids: Vec<&str> = pages.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["DOCS/a-intro", "DOCS/b-payroll"]);
    assert_eq!(pages[0].title, "Welcome aboard");
    assert_eq!(pages[1].title, "b-payroll");
    assert_eq!(pages[1].body, "ssn 123-45-6789");

    let hr = accessor
        .get_all_pages_in_space(&key("HR"))
        .await
        .expect("list pages");
    assert_eq!(hr[0].title, "team");
}

#[tokio::test]
async fn test_attachments_of_a_page() {
    let tmp = content_tree();
    let accessor = FsContentAccessor::new(tmp.path());

    let attachments = accessor
        .get_page_attachments("DOCS/a-intro")
        .await
        .expect("list attachments");
    let names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["contract.pdf", "z-notes.txt"]);
    assert_eq!(attachments[0].media_type.as_deref(), Some("application/pdf"));
    assert_eq!(attachments[1].content, "call 555-123-4567");

    assert!(accessor
        .get_page_attachments("DOCS/b-payroll")
        .await
        .expect("list attachments")
        .is_empty());
    assert!(accessor
        .get_page_attachments("DOCS/../../etc")
        .await
        .expect("list attachments")
        .is_empty());
}

#[tokio::test]
async fn test_missing_root_is_an_error() {
    let tmp = TempDir::new().expect("create temp dir");
    let accessor = FsContentAccessor::new(tmp.path().join("absent"));
    assert!(accessor.get_all_spaces().await.is_err());
}
