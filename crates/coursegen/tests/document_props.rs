//! Property tests for the lesson section parser and merger.

use coursegen::regeneration::document::section_ids;
use coursegen::regeneration::parse_document;
use proptest::prelude::*;

fn paragraph() -> impl Strategy<Value = String> {
    "[a-z][a-z ]{0,24}[a-z]"
}

fn section_body() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(paragraph(), 1..4)
}

/// `# Title`, optional intro text, then `## Topic N` sections.
fn lesson() -> impl Strategy<Value = String> {
    (
        prop::option::of(paragraph()),
        prop::collection::vec(section_body(), 0..6),
        any::<bool>(),
    )
        .prop_map(|(intro, sections, trailing_newline)| {
            let mut doc = String::from("# Lesson title\n\n");
            if let Some(intro) = intro {
                doc.push_str(&intro);
                doc.push_str("\n\n");
            }
            for (i, body) in sections.iter().enumerate() {
                doc.push_str(&format!("## Topic {}\n\n", i + 1));
                doc.push_str(&body.join("\n\n"));
                doc.push_str("\n\n");
            }
            if !trailing_newline {
                while doc.ends_with('\n') {
                    doc.pop();
                }
            }
            doc
        })
}

proptest! {
    #[test]
    fn parse_is_lossless(doc in lesson()) {
        let parsed = parse_document(&doc);
        let rebuilt = parsed.to_markdown();
        prop_assert_eq!(rebuilt, doc);
    }

    #[test]
    fn ids_follow_section_count(doc in lesson()) {
        let parsed = parse_document(&doc);
        let expected = section_ids(parsed.sections.len());
        let ids: Vec<String> = parsed.sections.iter().map(|s| s.id.clone()).collect();
        prop_assert_eq!(ids, expected);
        prop_assert_eq!(parsed.lesson_title, "Lesson title");
    }

    #[test]
    fn merge_touches_only_target(
        doc in lesson().prop_filter("needs sections", |d| d.contains("## ")),
        pick in any::<prop::sample::Index>(),
        replacement in prop::collection::vec(paragraph(), 1..3),
    ) {
        let parsed = parse_document(&doc);
        let target = pick.index(parsed.sections.len());
        let target_id = parsed.sections[target].id.clone();
        let new_body = format!("new {}", replacement.join("\n\n"));

        let merged = parsed.merge(&target_id, &new_body).unwrap();
        let reparsed = parse_document(&merged);

        prop_assert_eq!(reparsed.preamble, parsed.preamble.clone());
        prop_assert_eq!(reparsed.sections.len(), parsed.sections.len());
        for (old, new) in parsed.sections.iter().zip(&reparsed.sections) {
            prop_assert_eq!(&new.id, &old.id);
            prop_assert_eq!(&new.heading, &old.heading);
            if old.id == target_id {
                prop_assert_eq!(new.content.trim(), new_body.trim());
            } else {
                prop_assert_eq!(&new.content, &old.content);
            }
        }
    }

    #[test]
    fn merge_with_same_content_is_identity(doc in lesson().prop_filter("needs sections", |d| d.contains("## "))) {
        let parsed = parse_document(&doc);
        for section in &parsed.sections {
            let merged = parsed.merge(&section.id, &section.content).unwrap();
            prop_assert_eq!(&merged, &doc);
        }
    }
}
