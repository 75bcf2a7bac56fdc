//! Property-based tests for catalog validation and workspace path scoping.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use crate::catalog::{parse, validate, LabEntry, Manifest};
    use crate::error::ValidationError;
    use crate::workspace::scoped_join;
    use proptest::prelude::*;
    use std::path::Path;

    fn entry_strategy() -> impl Strategy<Value = LabEntry> {
        ("[a-z][a-z0-9-]{0,15}", "[a-z]{1,8}/[a-z0-9-]{1,12}\\.yaml", "[ -~]{0,30}")
            .prop_map(|(name, path, description)| LabEntry {
                name,
                path,
                description,
            })
    }

    fn manifest_strategy() -> impl Strategy<Value = Manifest> {
        (
            "[A-Za-z][A-Za-z0-9 ]{0,20}",
            prop::collection::vec(entry_strategy(), 1..8),
        )
            .prop_map(|(name, entries)| Manifest {
                name,
                description: String::new(),
                entries,
            })
    }

    // ============================================================================
    // validate property tests
    // ============================================================================

    proptest! {
        /// Property: every manifest with a name and N>=1 complete entries is accepted
        #[test]
        fn validate_accepts_complete_manifests(manifest in manifest_strategy()) {
            prop_assert_eq!(validate(&manifest), Ok(()));
        }

        /// Property: a blank manifest name is always rejected as MissingName
        #[test]
        fn validate_rejects_blank_name(manifest in manifest_strategy(), blank in "[ \t]{0,4}") {
            let manifest = Manifest { name: blank, ..manifest };
            prop_assert_eq!(validate(&manifest), Err(ValidationError::MissingName));
        }

        /// Property: a blank path on any entry is reported against that entry
        #[test]
        fn validate_names_entry_without_path(
            manifest in manifest_strategy(),
            pick in any::<prop::sample::Index>(),
        ) {
            let mut manifest = manifest;
            let i = pick.index(manifest.entries.len());
            // Earlier entries stay valid, so the first failure is the picked one.
            manifest.entries[i].path = String::new();
            let name = manifest.entries[i].name.clone();
            prop_assert_eq!(
                validate(&manifest),
                Err(ValidationError::EntryMissingPath { name })
            );
        }

        /// Property: entry order survives serialization and parsing
        #[test]
        fn parse_preserves_entry_order(manifest in manifest_strategy()) {
            let yaml = serde_yaml::to_string(&manifest).unwrap();
            let parsed = parse(yaml.as_bytes()).unwrap();
            let expected: Vec<_> = manifest.entries.iter().map(|e| &e.name).collect();
            let actual: Vec<_> = parsed.entries.iter().map(|e| &e.name).collect();
            prop_assert_eq!(actual, expected);
        }
    }

    // ============================================================================
    // scoped_join property tests
    // ============================================================================

    proptest! {
        /// Property: a scoped path never lands outside the root
        #[test]
        fn scoped_join_never_escapes(segments in prop::collection::vec(
            prop_oneof![Just("..".to_string()), Just(".".to_string()), "[a-z]{1,6}"],
            0..10,
        )) {
            let root = Path::new("/workspace/root");
            let relative = segments.join("/");
            if let Some(joined) = scoped_join(root, &relative) {
                prop_assert!(joined.starts_with(root), "{} escaped to {}", relative, joined.display());
            }
        }

        /// Property: plain relative paths are always accepted
        #[test]
        fn scoped_join_accepts_plain_paths(relative in "[a-z]{1,6}(/[a-z]{1,6}){0,4}") {
            let root = Path::new("/workspace/root");
            prop_assert_eq!(scoped_join(root, &relative), Some(root.join(&relative)));
        }
    }
}
