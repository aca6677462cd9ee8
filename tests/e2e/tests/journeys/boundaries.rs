//! Boundary behaviors: the fail-soft contract at the edges.

use anchor_e2e_tests::{ts, NoteOptions, NotebookFixture};
use anchor_core::{
    AnchorConfig, AnchorEngine, QueryParser, SearchRequest, EMPTY_CONTEXT, HEADER_OVERHEAD,
    PACK_FILL,
};

#[test]
fn empty_query_is_an_empty_success() {
    let fixture = NotebookFixture::new();
    let response = fixture.engine.search(&SearchRequest::new("   \t "));
    assert_eq!(response.context, EMPTY_CONTEXT);
    assert!(response.results.is_empty());
    assert_eq!(response.metadata.stage_errors, vec!["empty_query".to_string()]);
}

#[test]
fn stopword_only_query_degrades_gracefully() {
    let fixture = NotebookFixture::new();
    fixture.ingest_note(NoteOptions::new(
        "notes/anything.md",
        "Ordinary note content that no stopword query should reach.",
        ts(2024, 1, 1),
    ));

    let response = fixture.engine.search(&SearchRequest::new("is it the and of"));
    // Falls back to the sanitized raw, then to the fuzzy pass; with nothing
    // matching it ends as an empty success rather than an error.
    assert!(response.metadata.fuzzy);
    assert_eq!(response.context, EMPTY_CONTEXT);
}

#[test]
fn missing_file_and_missing_body_keeps_result_uninflated() {
    let fixture = NotebookFixture::new();
    fixture.ingest_note(
        NoteOptions::new(
            "notes/vanishing.md",
            "The orchard inventory lists forty apple trees and two stubborn quinces.",
            ts(2024, 1, 2),
        )
        .disk_only(),
    );
    std::fs::remove_file(fixture.root().join("notes/vanishing.md")).unwrap();

    let response = fixture.engine.search(&SearchRequest::new("orchard inventory"));
    assert_eq!(response.results.len(), 1);
    let result = &response.results[0];
    assert!(!result.is_inflated);
    assert!(result.content.contains("orchard"));
    assert!(response
        .metadata
        .stage_errors
        .iter()
        .any(|e| e.contains("inflate_missing")));
}

#[test]
fn zero_byte_file_drops_the_result() {
    let fixture = NotebookFixture::new();
    fixture.ingest_note(
        NoteOptions::new(
            "notes/truncated.md",
            "The original text that was later truncated away entirely.",
            ts(2024, 1, 3),
        )
        .disk_only(),
    );
    std::fs::write(fixture.root().join("notes/truncated.md"), b"").unwrap();

    let response = fixture.engine.search(&SearchRequest::new("truncated text"));
    assert!(response.results.is_empty());
    assert_eq!(response.context, EMPTY_CONTEXT);
}

#[test]
fn inverted_year_range_normalizes() {
    let parser = QueryParser::new(&AnchorConfig::default());
    let parsed = parser.parse("from 2030 to 2020 field notes", &[]);
    assert!(parsed.temporal_tags.contains("2020"));
    assert!(parsed.temporal_tags.contains("2025"));
    assert!(parsed.temporal_tags.contains("2030"));
    assert_eq!(parsed.temporal_tags.len(), 11);
}

#[test]
fn budget_discipline_holds_under_pressure() {
    let fixture = NotebookFixture::new();
    for i in 0..8 {
        let body = format!(
            "Entry {i} on the aurora migration. {}",
            "Detail sentence with enough length to matter for packing. ".repeat(20)
        );
        fixture.ingest_note(NoteOptions::new(
            &format!("notes/pack-{i}.md"),
            &body,
            ts(2024, 2, 1 + i as u32),
        ));
    }

    let mut request = SearchRequest::new("aurora migration");
    request.max_chars = 3_000;
    let response = fixture.engine.search(&request);

    assert!(!response.results.is_empty());
    let allowance =
        (request.max_chars as f64 * PACK_FILL) as usize + HEADER_OVERHEAD * response.results.len();
    assert!(
        response.context.len() <= allowance,
        "context {} exceeds allowance {allowance}",
        response.context.len()
    );
}

#[test]
fn tabula_rasa_recovers_a_corrupt_store() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("anchor.db"), b"definitely not a sqlite file").unwrap();

    let config = AnchorConfig {
        data_dir: Some(dir.path().to_path_buf()),
        notebook_root: dir.path().to_path_buf(),
        ..Default::default()
    };
    let engine = AnchorEngine::new(config).expect("wipe and recreate");
    let response = engine.search(&SearchRequest::new("anything at all"));
    assert_eq!(response.context, EMPTY_CONTEXT);
}

#[test]
fn oversized_budget_is_clamped() {
    let fixture = NotebookFixture::new();
    let mut request = SearchRequest::new("whatever");
    request.max_chars = 10_000_000;
    let response = fixture.engine.search(&request);
    // The configured limit caps the effective budget; token budget reflects it.
    assert!(response.metadata.token_budget <= 100_000 / 4);
}
