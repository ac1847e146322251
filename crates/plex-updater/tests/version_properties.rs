use std::cmp::Ordering;

use plex_updater::{compare, InstalledVersion, UpdateDecision, VersionIdentifier};
use proptest::prelude::*;

fn plex_version() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(0u32..2000, 1..5),
        prop::option::of("[0-9a-f]{9}"),
    )
        .prop_map(|(numbers, hash)| {
            let mut version = numbers
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(".");
            if let Some(hash) = hash {
                version.push('-');
                version.push_str(&hash);
            }
            version
        })
}

fn any_identifier() -> impl Strategy<Value = String> {
    prop_oneof![plex_version(), "[0-9A-Za-z._+~-]{0,16}"]
}

proptest! {
    #[test]
    fn ordering_is_reflexive(raw in any_identifier()) {
        let version = VersionIdentifier::parse(&raw);
        prop_assert_eq!(version.cmp(&version.clone()), Ordering::Equal);
    }

    #[test]
    fn ordering_is_antisymmetric(a in any_identifier(), b in any_identifier()) {
        let a = VersionIdentifier::parse(&a);
        let b = VersionIdentifier::parse(&b);
        prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn ordering_is_transitive(
        a in any_identifier(),
        b in any_identifier(),
        c in any_identifier(),
    ) {
        let mut sorted = [
            VersionIdentifier::parse(&a),
            VersionIdentifier::parse(&b),
            VersionIdentifier::parse(&c),
        ];
        sorted.sort();
        prop_assert!(sorted[0] <= sorted[1]);
        prop_assert!(sorted[1] <= sorted[2]);
        prop_assert!(sorted[0] <= sorted[2]);
    }

    #[test]
    fn nothing_installed_always_updates(raw in any_identifier()) {
        let latest = VersionIdentifier::parse(&raw);
        prop_assert_eq!(
            compare(&InstalledVersion::NotInstalled, &latest),
            UpdateDecision::UpdateAvailable { latest: latest.clone() }
        );
    }

    #[test]
    fn same_version_is_up_to_date(raw in plex_version()) {
        let version = VersionIdentifier::parse(&raw);
        prop_assert_eq!(
            compare(&InstalledVersion::Installed(version.clone()), &version),
            UpdateDecision::UpToDate
        );
    }

    #[test]
    fn bumping_a_component_is_newer(
        numbers in prop::collection::vec(0u32..2000, 1..5),
        index in any::<prop::sample::Index>(),
    ) {
        let position = index.index(numbers.len());
        let mut bumped = numbers.clone();
        bumped[position] += 1;
        let join = |parts: &[u32]| parts.iter().map(u32::to_string).collect::<Vec<_>>().join(".");

        let installed = VersionIdentifier::parse(&join(&numbers));
        let latest = VersionIdentifier::parse(&join(&bumped));
        prop_assert!(installed < latest);
        prop_assert_eq!(
            compare(&InstalledVersion::Installed(installed), &latest),
            UpdateDecision::UpdateAvailable { latest: latest.clone() }
        );
    }

    #[test]
    fn leading_zeros_do_not_matter(numbers in prop::collection::vec(0u32..2000, 1..5)) {
        let plain = numbers.iter().map(u32::to_string).collect::<Vec<_>>().join(".");
        let padded = numbers.iter().map(|n| format!("00{n}")).collect::<Vec<_>>().join(".");
        prop_assert_eq!(
            VersionIdentifier::parse(&plain).cmp(&VersionIdentifier::parse(&padded)),
            Ordering::Equal
        );
    }
}

#[test]
fn plex_build_suffix_is_ordered_after_numbers() {
    let older = VersionIdentifier::parse("1.40.1.8227-c0dd5a73e");
    let newer = VersionIdentifier::parse("1.40.2.8395-c67dce28e");
    assert!(older < newer);
}
