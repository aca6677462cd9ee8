//! Retrieval journeys: the full pipeline against seeded notebooks.

use anchor_e2e_tests::{ts, NoteOptions, NotebookFixture};
use anchor_core::{
    engram_key, hamming, simhash64, ConnectionType, QueryParser, SearchRequest, EMPTY_CONTEXT,
};

#[test]
fn single_exact_term_inflates_real_windows() {
    let fixture = NotebookFixture::new();
    let bodies = [
        "Limerance is the involuntary state of intense romantic desire that Dorothy \
         Tennov described in the seventies, a fixation that colonizes attention and \
         rereads every small gesture as evidence. The notebook entry goes on to \
         compare the state with ordinary infatuation, lists the somatic symptoms \
         that accompanied it that spring, and closes with a long quote from the \
         original study about intrusive thinking and the terror of rejection.",
        "The reading group spent the evening on limerance again, though this time \
         the conversation drifted toward attachment research, the avoidant and \
         anxious patterns everyone recognized in themselves, and the way the term \
         gets flattened on social media into something much smaller than the \
         obsessive, involuntary machinery the coinage was meant to capture.",
        "A year later the journal mentions limerance only once, in passing, while \
         describing how the garden finally came together: the raised beds, the \
         irrigation timers rescued from the shed, the tomatoes that outgrew their \
         cages, and the appetite for quiet competence that had replaced the old \
         spiraling preoccupation entirely.",
    ];
    for (i, body) in bodies.iter().enumerate() {
        fixture.ingest_note(NoteOptions::new(
            &format!("notes/limerance-{i}.md"),
            body,
            ts(2024, 3, 10 + i as u32),
        ));
    }

    let mut request = SearchRequest::new("limerance");
    request.max_chars = 4_000;
    let response = fixture.engine.search(&request);

    assert!(!response.results.is_empty(), "anchors expected");
    assert!(response.metadata.stage_errors.is_empty());
    assert!(response
        .results
        .iter()
        .any(|r| r.is_inflated && r.content.len() >= 200));
    // Distinct signatures: no merges.
    assert!(response.results.iter().all(|r| r.frequency == Some(1)));
}

#[test]
fn near_duplicate_files_merge_with_tag_union() {
    let fixture = NotebookFixture::new();
    // The bodies differ only in a token shorter than three chars, which the
    // fingerprint tokenizer drops, so their signatures are identical.
    let body_a = "The committee agreed that the limerance essay should open the \
                  spring anthology, pending one more round of edits on day 4.";
    let body_b = "The committee agreed that the limerance essay should open the \
                  spring anthology, pending one more round of edits on day 9.";
    assert!(
        hamming(&simhash64(body_a), &simhash64(body_b)) < 3,
        "fixture texts must be near-duplicates"
    );

    let compound_a = fixture.ingest_note(NoteOptions::new("notes/a.md", body_a, ts(2024, 4, 1)));
    let compound_b = fixture.ingest_note(NoteOptions::new("notes/b.md", body_b, ts(2024, 4, 2)));
    // Each file bears its own tags through a positioned atom.
    fixture.ingest_atom(
        "atom-a",
        "marker-anthology",
        "anthology marker",
        &["#writing"],
        ts(2024, 4, 1),
        Some((&compound_a, 4)),
    );
    fixture.ingest_atom(
        "atom-b",
        "marker-essay",
        "essay marker",
        &["#editing"],
        ts(2024, 4, 2),
        Some((&compound_b, 4)),
    );

    let mut request = SearchRequest::new("limerance anthology");
    request.max_chars = 2_000;
    let response = fixture.engine.search(&request);

    assert_eq!(response.results.len(), 1, "near-duplicates must merge");
    let merged = &response.results[0];
    assert_eq!(merged.frequency, Some(2));
    assert!(merged.tags.contains(&"#writing".to_string()));
    assert!(merged.tags.contains(&"#editing".to_string()));
}

#[test]
fn year_range_filters_and_orders_chronologically() {
    let fixture = NotebookFixture::new();
    let fillers = [
        (2021, "the first exploratory sketches nobody kept"),
        (2022, "the kickoff meeting and the first prototype milestones"),
        (2023, "the storage rewrite and the long argument about schemas"),
        (2024, "the launch review and the postmortem action items"),
        (2025, "the maintenance era and the slow steady bugfix cadence"),
    ];
    for (year, filler) in fillers {
        fixture.ingest_note(NoteOptions::new(
            &format!("notes/aurora-{year}.md"),
            &format!("Project aurora in {year}: {filler}."),
            ts(year, 6, 1),
        ));
    }

    let response = fixture
        .engine
        .search(&SearchRequest::new("between 2022 and 2024 project aurora"));

    assert!(!response.results.is_empty());
    let years: Vec<i32> = response
        .results
        .iter()
        .map(|r| {
            chrono::DateTime::from_timestamp_millis(r.timestamp)
                .unwrap()
                .format("%Y")
                .to_string()
                .parse()
                .unwrap()
        })
        .collect();
    assert!(years.iter().all(|y| (2022..=2024).contains(y)), "{years:?}");
    let mut sorted = years.clone();
    sorted.sort_unstable();
    assert_eq!(years, sorted, "chronological order expected");
}

#[test]
fn fuzzy_fallback_recovers_misspelled_terms() {
    let fixture = NotebookFixture::new();
    fixture.ingest_note(NoteOptions::new(
        "notes/ambergris.md",
        "The ambergris chapter finally came back from the editor with notes.",
        ts(2024, 2, 2),
    ));

    let response = fixture
        .engine
        .search(&SearchRequest::new("ambergris chaptre"));

    assert!(response.metadata.fuzzy, "second pass expected");
    assert!(!response.results.is_empty());
    assert_ne!(response.context, EMPTY_CONTEXT);
}

#[test]
fn walk_discovers_tag_neighbor_across_compounds() {
    let fixture = NotebookFixture::new();
    // Compound A contains the query term; compound B only shares #aurora.
    let compound_a = fixture.ingest_note(NoteOptions::new(
        "notes/a.md",
        "The aurora planning doc covers the rollout and the staffing asks.",
        ts(2024, 5, 1),
    ));
    let compound_b = fixture.ingest_note(NoteOptions::new(
        "notes/b.md",
        "Glacier fieldwork diary, day twelve: mostly wind measurements.",
        ts(2024, 5, 3),
    ));
    fixture.ingest_atom(
        "atom-a",
        "aurora",
        "the aurora planning effort",
        &["#aurora", "#planning"],
        ts(2024, 5, 1),
        Some((&compound_a, 4)),
    );
    fixture.ingest_atom(
        "atom-b",
        "glacier",
        "glacier fieldwork diary",
        &["#aurora"],
        ts(2024, 5, 3),
        Some((&compound_b, 0)),
    );

    let response = fixture.engine.search(&SearchRequest::new("aurora"));

    let walked = response
        .results
        .iter()
        .find(|r| r.id == "atom-b")
        .expect("tag neighbor should surface");
    assert_eq!(walked.connection_type, Some(ConnectionType::TagWalkNeighbor));
    assert_eq!(walked.best_anchor_id.as_deref(), Some("atom-a"));
    assert!(walked.gravity_score.unwrap() > 0.1);
    assert_eq!(walked.compound_id.as_deref(), Some(compound_b.as_str()));
}

#[test]
fn successful_search_binds_an_engram() {
    let fixture = NotebookFixture::new();
    let compound = fixture.ingest_note(NoteOptions::new(
        "notes/aurora.md",
        "Project aurora shipped the storage prototype in March.",
        ts(2024, 3, 15),
    ));
    fixture.ingest_atom(
        "atom-aurora",
        "aurora",
        "the aurora project",
        &["#aurora"],
        ts(2024, 3, 15),
        Some((&compound, 8)),
    );

    let first = fixture.engine.search(&SearchRequest::new("aurora prototype"));
    assert!(!first.results.is_empty());

    let parser = QueryParser::new(fixture.engine.config());
    let parsed = parser.parse("aurora prototype", &[]);
    let engram = fixture
        .engine
        .storage()
        .get_engram(&engram_key(&parsed.sanitized))
        .unwrap()
        .expect("engram written after success");
    assert!(engram.atom_ids.contains(&"atom-aurora".to_string()));

    // Warm path: the engram-seeded second run still answers.
    let second = fixture.engine.search(&SearchRequest::new("aurora prototype"));
    assert!(!second.results.is_empty());
}

#[test]
fn identical_requests_are_deterministic() {
    let fixture = NotebookFixture::new();
    for i in 0..5 {
        fixture.ingest_note(NoteOptions::new(
            &format!("notes/n{i}.md"),
            &format!(
                "Entry {i} about the aurora storage design, covering {} details.",
                ["cache", "schema", "rollout", "testing", "naming"][i]
            ),
            ts(2024, 1, 10 + i as u32),
        ));
    }

    let request = SearchRequest::new("aurora storage design");
    let a = fixture.engine.search(&request);
    let b = fixture.engine.search(&request);

    assert_eq!(a.context, b.context);
    let ids_a: Vec<_> = a.results.iter().map(|r| r.id.as_str()).collect();
    let ids_b: Vec<_> = b.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids_a, ids_b);
}
