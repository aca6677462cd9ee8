//! Inflation journeys: byte-exact radial windows against real files.

use anchor_e2e_tests::{ts, NoteOptions, NotebookFixture};
use anchor_core::{SearchRequest, HEADER_OVERHEAD, PACK_FILL};

/// Build a ~1 MB body with `#rob` markers spread evenly, returning the body
/// and the marker byte offsets.
fn rob_body(markers: usize) -> (String, Vec<u64>) {
    let filler = "The long seam of ordinary notebook prose keeps going, sentence \
                  after sentence, errands and weather and half-finished thoughts. ";
    let mut body = String::new();
    let mut offsets = Vec::new();
    for _ in 0..markers {
        for _ in 0..800 {
            body.push_str(filler);
        }
        offsets.push(body.len() as u64);
        body.push_str("#rob stopped by and we talked about the boat engine. ");
    }
    (body, offsets)
}

#[test]
fn elastic_radius_windows_are_reproducible_from_disk() {
    let fixture = NotebookFixture::new();
    let (body, offsets) = rob_body(10);
    assert!(body.len() > 1_000_000);

    let compound = fixture.ingest_note(
        NoteOptions::new("notes/big.md", &body, ts(2024, 7, 1)).disk_only(),
    );
    for offset in &offsets {
        fixture.ingest_atom(
            &format!("atom-rob-{offset}"),
            "#rob",
            "",
            &[],
            ts(2024, 7, 1),
            Some((&compound, *offset)),
        );
    }

    let mut request = SearchRequest::new("#rob");
    request.max_chars = 20_000;
    let response = fixture.engine.search(&request);

    assert!(!response.results.is_empty());
    let radius = response.metadata.elastic_radius;
    assert!((200..=32_000).contains(&radius));

    let raw = std::fs::read(fixture.root().join("notes/big.md")).unwrap();
    for result in response.results.iter().filter(|r| r.is_inflated) {
        let start = result.start_byte.unwrap() as usize;
        let end = result.end_byte.unwrap() as usize;
        assert!(end <= raw.len());
        assert!((end - start) as u64 <= 3 * radius, "window exceeds merge cap");

        // The emitted content, minus the truncation markers, must sit
        // verbatim inside the recorded byte window.
        let inner = result
            .content
            .trim_start_matches("...")
            .trim_end_matches("...");
        let window = String::from_utf8_lossy(&raw[start..end]);
        assert!(
            window.contains(inner),
            "content not reproducible from [{start}, {end})"
        );
    }

    // Budget discipline on the assembled context.
    let allowance = (request.max_chars as f64 * PACK_FILL) as usize
        + HEADER_OVERHEAD * response.results.len();
    assert!(response.context.len() <= allowance);
}

#[test]
fn overlapping_hits_share_one_window() {
    let fixture = NotebookFixture::new();
    let body = "Morning pages: rowed out early with the thermos, watched the \
                herons work the shallows, and drafted the toast for the wedding \
                on the back of a receipt before the wind picked up.";
    let compound = fixture.ingest_note(
        NoteOptions::new("notes/morning.md", body, ts(2024, 7, 2)).disk_only(),
    );
    let herons_at = body.find("herons").unwrap() as u64;
    let thermos_at = body.find("thermos").unwrap() as u64;
    fixture.ingest_atom("atom-h", "herons", "", &[], ts(2024, 7, 2), Some((&compound, herons_at)));
    fixture.ingest_atom("atom-t", "thermos", "", &[], ts(2024, 7, 2), Some((&compound, thermos_at)));

    let response = fixture.engine.search(&SearchRequest::new("herons thermos"));
    let inflated: Vec<_> = response.results.iter().filter(|r| r.is_inflated).collect();
    assert!(inflated.len() >= 2);
    // Neighboring offsets with a generous radius collapse into one window.
    assert_eq!(inflated[0].content, inflated[1].content);
    assert_eq!(inflated[0].start_byte, inflated[1].start_byte);
}

#[test]
fn multibyte_text_survives_edge_trimming() {
    let fixture = NotebookFixture::new();
    let body = "Trip notes from Tōkyō: the café near the station served naïve \
                little pastries, and the señora at the counter explained the \
                neighborhood shrine schedule in patient, slow Spanish.";
    let compound = fixture.ingest_note(
        NoteOptions::new("notes/trip.md", body, ts(2024, 7, 3)).disk_only(),
    );
    let offset = body.find("café").unwrap() as u64;
    fixture.ingest_atom("atom-cafe", "café", "", &[], ts(2024, 7, 3), Some((&compound, offset)));

    let response = fixture.engine.search(&SearchRequest::new("shrine schedule"));
    assert!(!response.results.is_empty());
    for result in &response.results {
        assert!(!result.content.contains('\u{FFFD}'), "broken UTF-8 edge");
    }
}

#[test]
fn stored_body_backstops_a_vanished_file() {
    let fixture = NotebookFixture::new();
    fixture.ingest_note(
        NoteOptions::new(
            "notes/gone.md",
            "The ferry schedule changed again; the early boat now leaves at six.",
            ts(2024, 7, 4),
        )
        .body_only(),
    );

    let response = fixture.engine.search(&SearchRequest::new("ferry schedule"));
    assert!(!response.results.is_empty());
    assert!(response.results[0].is_inflated);
    assert!(response.results[0].content.contains("ferry"));
}
