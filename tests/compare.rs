use csv_reconcile::compare::{
    Analysis, Category, ComparisonEngine, Side, duplicate_key_frequency, duplicate_rows,
    incomplete_rows, missing_rows, null_column_stats,
};
use csv_reconcile::config::{CompareConfig, InvalidKeyPolicy};
use csv_reconcile::dataset::Dataset;
use proptest::prelude::*;

fn keyed(origin: &str, columns: &[&str], rows: &[Vec<&str>]) -> Dataset {
    let mut dataset = Dataset::from_rows(origin, columns, rows);
    dataset.attach_keys(vec![0]);
    dataset
}

fn ids(origin: &str, keys: &[&str]) -> Dataset {
    let rows = keys.iter().map(|key| vec![*key, "v"]).collect::<Vec<_>>();
    keyed(origin, &["id", "value"], &rows)
}

#[test]
fn missing_rows_and_precision_for_overlapping_sources() {
    let a = keyed("a.csv", &["id", "v"], &[vec!["1", "x"], vec!["2", "y"]]);
    let b = keyed("b.csv", &["id", "v"], &[vec!["2", "y"], vec!["3", "z"]]);
    let config = CompareConfig::default();
    let comparison = ComparisonEngine::new(&config).compare(&a, &b, &[Analysis::Missing]);

    let in_b = comparison.result(Category::MissingInB).expect("missing in b");
    assert_eq!(in_b.rows_for(Side::A), vec![0]);
    assert!(in_b.rows_for(Side::B).is_empty());
    let in_a = comparison.result(Category::MissingInA).expect("missing in a");
    assert_eq!(in_a.rows_for(Side::B), vec![1]);

    let stats = &comparison.precision;
    assert_eq!(stats.common, 1);
    assert_eq!(stats.missing_in_b, 1);
    assert_eq!(stats.missing_in_a, 1);
    assert!((stats.percent_missing_in_b - 50.0).abs() < 1e-9);
    assert!((stats.percent_missing_in_a - 50.0).abs() < 1e-9);
}

#[test]
fn identical_sources_have_no_missing_rows() {
    let a = ids("a.csv", &["1", "2", "3"]);
    let b = ids("b.csv", &["3", "2", "1"]);
    assert!(missing_rows(&a, &b).is_empty());
    assert!(missing_rows(&b, &a).is_empty());
}

#[test]
fn invalid_keys_never_count_as_missing() {
    let a = ids("a.csv", &["1", ""]);
    let b = ids("b.csv", &["1"]);
    assert!(missing_rows(&a, &b).is_empty());
}

#[test]
fn duplicates_include_every_row_of_a_repeated_key() {
    let dataset = ids("a.csv", &["1", "1", "2", "3", "3", "3"]);
    assert_eq!(duplicate_rows(&dataset), vec![0, 1, 3, 4, 5]);
}

#[test]
fn duplicates_are_grouped_by_key_and_stable_within_a_key() {
    let dataset = ids("a.csv", &["3", "1", "3", "2", "1", "3"]);
    assert_eq!(duplicate_rows(&dataset), vec![1, 4, 0, 2, 5]);

    let top = duplicate_key_frequency(&dataset, 20);
    let top = top
        .iter()
        .map(|entry| (entry.key.as_str(), entry.count))
        .collect::<Vec<_>>();
    assert_eq!(top, vec![("3", 3), ("1", 2)]);
}

#[test]
fn duplicate_summary_is_truncated() {
    let dataset = ids("a.csv", &["1", "1", "2", "2", "3", "3"]);
    assert_eq!(duplicate_key_frequency(&dataset, 2).len(), 2);
}

#[test]
fn row_with_only_a_key_is_incomplete() {
    let dataset = keyed(
        "a.csv",
        &["id", "name", "city"],
        &[vec!["1", "Ana", "Macul"], vec!["2", "", ""], vec!["3", "Eva", ""]],
    );
    let skip = dataset.key_columns().to_vec();
    assert_eq!(incomplete_rows(&dataset, &skip, InvalidKeyPolicy::Flag), vec![1, 2]);
}

#[test]
fn invalid_key_rows_follow_the_configured_policy() {
    let dataset = keyed(
        "a.csv",
        &["id", "name"],
        &[vec!["1", "Ana"], vec!["", "Luis"], vec!["", ""]],
    );
    let skip = dataset.key_columns().to_vec();
    assert_eq!(incomplete_rows(&dataset, &skip, InvalidKeyPolicy::Flag), vec![1, 2]);
    assert!(incomplete_rows(&dataset, &skip, InvalidKeyPolicy::Exclude).is_empty());
    assert_eq!(incomplete_rows(&dataset, &skip, InvalidKeyPolicy::Scan), vec![2]);
}

#[test]
fn technical_columns_are_not_scanned() {
    let a = keyed(
        "a.csv",
        &["id", "name", "loaded_at"],
        &[vec!["1", "Ana", ""], vec!["2", "Luis", ""]],
    );
    let b = keyed("b.csv", &["id", "name"], &[vec!["1", "Ana"]]);
    let config = CompareConfig {
        technical_columns: vec!["LOADED_AT".to_string()],
        ..CompareConfig::default()
    };
    let comparison = ComparisonEngine::new(&config).compare(&a, &b, &[Analysis::Incomplete]);
    let incomplete = comparison.result(Category::Incomplete).expect("incomplete");
    assert!(incomplete.is_empty());
    assert!(comparison.null_columns_a.is_empty());
}

#[test]
fn nullity_ranking_puts_emptiest_rows_first() {
    let a = keyed(
        "a.csv",
        &["id", "name", "city", "phone"],
        &[vec!["1", "Ana", "", "555"], vec!["2", "", "", ""]],
    );
    let b = keyed(
        "b.csv",
        &["id", "name", "city", "phone"],
        &[vec!["7", "", "", "555"]],
    );
    let config = CompareConfig::default();
    let comparison = ComparisonEngine::new(&config).compare(&a, &b, &[Analysis::Incomplete]);
    let ranking = comparison
        .nullity_ranking
        .iter()
        .map(|entry| (entry.side, entry.row, entry.null_columns.len()))
        .collect::<Vec<_>>();
    assert_eq!(
        ranking,
        vec![(Side::A, 1, 3), (Side::B, 0, 2), (Side::A, 0, 1)]
    );
    assert_eq!(comparison.nullity_ranking[0].null_columns, vec!["name", "city", "phone"]);
}

#[test]
fn consolidated_results_list_a_rows_before_b_rows() {
    let a = ids("a.csv", &["1", "1"]);
    let b = ids("b.csv", &["2", "2"]);
    let config = CompareConfig::default();
    let comparison = ComparisonEngine::new(&config).compare(&a, &b, &[Analysis::Duplicates]);
    let duplicates = comparison.result(Category::Duplicate).expect("duplicates");
    let sides = duplicates
        .consolidated
        .iter()
        .map(|entry| entry.side)
        .collect::<Vec<_>>();
    assert_eq!(sides, vec![Side::A, Side::A, Side::B, Side::B]);
    assert_eq!(comparison.total_rows(), 4);
}

#[test]
fn disjoint_sources_raise_critical_diagnostics() {
    let a = ids("a.csv", &["1", "2"]);
    let b = ids("b.csv", &["3", "4"]);
    let config = CompareConfig::default();
    let comparison = ComparisonEngine::new(&config).compare(&a, &b, &[Analysis::Missing]);
    let critical = comparison
        .diagnostics
        .iter()
        .map(|diagnostic| (diagnostic.category, diagnostic.side))
        .collect::<Vec<_>>();
    assert_eq!(
        critical,
        vec![(Category::MissingInB, Side::A), (Category::MissingInA, Side::B)]
    );
    assert!(comparison.diagnostics.iter().all(|d| (d.percent - 100.0).abs() < 1e-9));
}

#[test]
fn requested_analyses_are_deduplicated_and_ordered() {
    let a = ids("a.csv", &["1"]);
    let b = ids("b.csv", &["1"]);
    let config = CompareConfig::default();
    let comparison = ComparisonEngine::new(&config).compare(
        &a,
        &b,
        &[Analysis::Missing, Analysis::Duplicates, Analysis::Missing],
    );
    assert_eq!(comparison.analyses, vec![Analysis::Duplicates, Analysis::Missing]);
}

#[test]
fn null_column_stats_are_sorted_by_share() {
    let dataset = keyed(
        "a.csv",
        &["id", "name", "city"],
        &[vec!["1", "", ""], vec!["2", "Luis", ""], vec!["3", "Eva", "Macul"], vec!["4", "Ana", ""]],
    );
    let stats = null_column_stats(&dataset, &[0]);
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].column, "city");
    assert_eq!(stats[0].nulls, 3);
    assert!((stats[0].percent - 75.0).abs() < 1e-9);
    assert_eq!(stats[1].column, "name");
}

proptest! {
    #[test]
    fn missing_and_common_partition_each_side(
        keys_a in prop::collection::vec("[0-9]", 0..24),
        keys_b in prop::collection::vec("[0-9]", 0..24),
    ) {
        let keys_a = keys_a.iter().map(String::as_str).collect::<Vec<_>>();
        let keys_b = keys_b.iter().map(String::as_str).collect::<Vec<_>>();
        let a = ids("a.csv", &keys_a);
        let b = ids("b.csv", &keys_b);

        let missing = missing_rows(&a, &b);
        let shared = (0..a.len())
            .filter(|row| keys_b.contains(&keys_a[*row]))
            .count();
        prop_assert_eq!(missing.len() + shared, a.len());

        let missing = missing_rows(&b, &a);
        let shared = (0..b.len())
            .filter(|row| keys_a.contains(&keys_b[*row]))
            .count();
        prop_assert_eq!(missing.len() + shared, b.len());
    }
}
