// Property checks for the dialect classifier over generated listings

use proptest::prelude::*;
use proptest::sample::subsequence;

use iac_conductor::classifier::{
    ClassifierSettings, Dialect, IacDialect, InfraClassifier, RepositoryListing,
};

const PATH_POOL: &[&str] = &[
    "main.tf",
    "variables.tf",
    "outputs.tf",
    "modules/network/main.tf",
    "envs/prod/terraform.tfvars",
    ".terraform.lock.hcl",
    "main.bicep",
    "modules/storage.bicep",
    "main.parameters.json",
    "bicepconfig.json",
    "README.md",
    "src/lib.rs",
    "docs/architecture.md",
    "scripts/deploy.sh",
    "package.json",
];

const TERRAFORM_ONLY: &[&str] = &[
    "main.tf",
    "variables.tf",
    "outputs.tf",
    "modules/network/main.tf",
    "envs/prod/terraform.tfvars",
    ".terraform.lock.hcl",
    "infra/state/prod.tfstate",
];

const BICEP_ONLY: &[&str] = &[
    "main.bicep",
    "modules/storage.bicep",
    "bicepconfig.json",
    "params/prod.bicepparam",
    "infra/network.bicep",
];

const UNRELATED: &[&str] = &["README.md", "src/lib.rs", "package.json", "docs/guide.md"];

fn listing_paths() -> impl Strategy<Value = Vec<&'static str>> {
    subsequence(PATH_POOL.to_vec(), 0..=PATH_POOL.len())
}

fn with_unrelated(paths: &'static [&'static str]) -> impl Strategy<Value = Vec<&'static str>> {
    (
        subsequence(paths.to_vec(), 1..=paths.len()),
        subsequence(UNRELATED.to_vec(), 0..=UNRELATED.len()),
    )
        .prop_map(|(mut iac, noise)| {
            iac.extend(noise);
            iac
        })
}

proptest! {
    #[test]
    fn classification_ignores_listing_order_and_duplicates(paths in listing_paths()) {
        let classifier = InfraClassifier::default();
        let forward = classifier
            .classify(&RepositoryListing::from_paths(paths.iter().copied()))
            .unwrap();

        let mut shuffled: Vec<&str> = paths.iter().rev().copied().collect();
        shuffled.extend(paths.iter().step_by(2).copied());
        let reordered = classifier.classify(&RepositoryListing::from_paths(shuffled)).unwrap();

        prop_assert_eq!(forward, reordered);
    }

    #[test]
    fn confidence_stays_within_unit_interval(paths in listing_paths()) {
        let result = InfraClassifier::default()
            .classify(&RepositoryListing::from_paths(paths))
            .unwrap();

        prop_assert!((0.0..=1.0).contains(&result.confidence));
        for candidate in &result.candidates {
            prop_assert!((0.0..=1.0).contains(&candidate.confidence));
        }
    }

    #[test]
    fn decided_dialect_meets_the_threshold(
        paths in listing_paths(),
        threshold in 0.3f64..0.95,
    ) {
        let settings = ClassifierSettings { threshold, ..ClassifierSettings::default() };
        let result = InfraClassifier::new(settings)
            .unwrap()
            .classify(&RepositoryListing::from_paths(paths))
            .unwrap();

        match result.dialect {
            Dialect::Terraform | Dialect::Bicep => prop_assert!(result.confidence >= threshold),
            Dialect::None => prop_assert!(result.evidence.is_empty()),
            Dialect::Ambiguous => prop_assert!(!result.evidence.is_empty()),
        }
    }

    #[test]
    fn evidence_only_cites_listed_paths(paths in listing_paths()) {
        let result = InfraClassifier::default()
            .classify(&RepositoryListing::from_paths(paths.iter().copied()))
            .unwrap();

        for evidence in &result.evidence {
            prop_assert!(
                paths.contains(&evidence.path.as_str()),
                "unexpected path {}",
                evidence.path
            );
        }
    }

    #[test]
    fn single_dialect_listing_is_decided(
        (paths, expected) in prop_oneof![
            with_unrelated(TERRAFORM_ONLY).prop_map(|p| (p, Dialect::Terraform)),
            with_unrelated(BICEP_ONLY).prop_map(|p| (p, Dialect::Bicep)),
        ],
    ) {
        let classifier = InfraClassifier::default();
        let result = classifier.classify(&RepositoryListing::from_paths(paths)).unwrap();

        prop_assert_eq!(result.dialect, expected);
        prop_assert!(result.confidence >= classifier.settings().threshold);
    }

    #[test]
    fn balanced_two_dialect_listing_is_ambiguous(
        stacks in 1usize..=8,
        noise in subsequence(UNRELATED.to_vec(), 0..=UNRELATED.len()),
    ) {
        let mut paths: Vec<String> = (0..stacks)
            .flat_map(|i| [format!("stacks/s{i}.tf"), format!("stacks/s{i}.bicep")])
            .collect();
        paths.extend(noise.iter().map(|p| p.to_string()));

        let result = InfraClassifier::default()
            .classify(&RepositoryListing::from_paths(paths))
            .unwrap();

        prop_assert_eq!(result.dialect, Dialect::Ambiguous);
        prop_assert!(result.evidence.iter().any(|e| e.dialect == IacDialect::Terraform));
        prop_assert!(result.evidence.iter().any(|e| e.dialect == IacDialect::Bicep));
    }
}
