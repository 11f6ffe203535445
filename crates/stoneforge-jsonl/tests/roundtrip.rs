//! Round-trip and resilience tests over real files.

use serde::{Deserialize, Serialize};
use stoneforge_jsonl::{Warning, read_resilient, write_atomic};
use tempfile::tempdir;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Element {
    id: String,
    title: String,
    tags: Vec<String>,
}

fn sample(n: usize) -> Vec<Element> {
    (0..n)
        .map(|i| Element {
            id: format!("el-{i:03}"),
            title: format!("element {i}"),
            tags: vec!["alpha".to_string(), format!("group-{}", i % 3)],
        })
        .collect()
}

#[tokio::test]
async fn write_then_read_preserves_every_field() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("elements.jsonl");
    let elements = sample(50);

    write_atomic(&path, elements.iter()).await.unwrap();
    let (loaded, warnings) = read_resilient::<Element, _>(&path).await.unwrap();

    assert!(warnings.is_empty());
    assert_eq!(loaded, elements);
}

#[tokio::test]
async fn corrupted_middle_line_loses_only_that_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("elements.jsonl");
    let elements = sample(3);
    write_atomic(&path, elements.iter()).await.unwrap();

    // Damage the second line in place.
    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    lines[1] = "{\"id\": truncated";
    std::fs::write(&path, lines.join("\n")).unwrap();

    let (loaded, warnings) = read_resilient::<Element, _>(&path).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(warnings.len(), 1);
    assert!(matches!(warnings[0], Warning::MalformedLine { line: 2, .. }));
    assert_eq!(loaded[0], elements[0]);
    assert_eq!(loaded[1], elements[2]);
}

#[tokio::test]
async fn empty_file_reads_as_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.jsonl");
    std::fs::write(&path, "").unwrap();

    let (loaded, warnings) = read_resilient::<Element, _>(&path).await.unwrap();
    assert!(loaded.is_empty());
    assert!(warnings.is_empty());
}
