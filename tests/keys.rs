use csv_reconcile::config::KeyConfig;
use csv_reconcile::dataset::Dataset;
use csv_reconcile::error::ReconcileError;
use csv_reconcile::keys::{KeyMethod, KeyStrategy, attach_key, pair_keys, resolve_key_columns};
use csv_reconcile::normalize::KeyForm;

fn patients() -> Dataset {
    Dataset::from_rows(
        "patients.csv",
        &["ID", "Nombre", "RUT", "Comuna"],
        &[
            vec!["1", "Ana", "11111111-1", "Macul"],
            vec!["2", "Luis", "22222222-2", "Macul"],
            vec!["3", "Eva", "33333333-3", "Ñuñoa"],
        ],
    )
}

#[test]
fn priority_list_order_beats_column_order() {
    let dataset = patients();
    let (columns, method) =
        resolve_key_columns(&dataset, &KeyStrategy::Auto, &KeyConfig::default()).expect("key");
    assert_eq!(columns, vec![2]);
    assert_eq!(method, KeyMethod::NamePriority);
}

#[test]
fn priority_names_match_case_insensitively() {
    let dataset = Dataset::from_rows("x.csv", &["comuna", " rut "], &[vec!["Macul", "1-9"]]);
    let (columns, _) =
        resolve_key_columns(&dataset, &KeyStrategy::Auto, &KeyConfig::default()).expect("key");
    assert_eq!(columns, vec![1]);
}

#[test]
fn most_unique_column_is_used_without_a_known_name() {
    let dataset = Dataset::from_rows(
        "orders.csv",
        &["grupo", "codigo"],
        &[
            vec!["a", "P-1"],
            vec!["a", "P-2"],
            vec!["b", "P-3"],
            vec!["b", "P-4"],
        ],
    );
    let (columns, method) =
        resolve_key_columns(&dataset, &KeyStrategy::Auto, &KeyConfig::default()).expect("key");
    assert_eq!(columns, vec![1]);
    assert_eq!(method, KeyMethod::Uniqueness);
}

#[test]
fn low_uniqueness_everywhere_means_no_key() {
    let dataset = Dataset::from_rows(
        "flat.csv",
        &["a", "b"],
        &[
            vec!["x", "1"],
            vec!["x", "1"],
            vec!["y", "1"],
            vec!["y", "2"],
        ],
    );
    let err = resolve_key_columns(&dataset, &KeyStrategy::Auto, &KeyConfig::default())
        .expect_err("no key expected");
    assert!(matches!(err, ReconcileError::NoKeyColumn { origin } if origin == "flat.csv"));
}

#[test]
fn explicit_unknown_column_is_rejected() {
    let err = resolve_key_columns(
        &patients(),
        &KeyStrategy::Column("FOLIO".to_string()),
        &KeyConfig::default(),
    )
    .expect_err("unknown column");
    assert!(matches!(err, ReconcileError::UnknownColumn { column, .. } if column == "FOLIO"));
}

#[test]
fn attach_key_canonicalizes_every_record() {
    let mut dataset = Dataset::from_rows(
        "ids.csv",
        &["RUT", "monto"],
        &[vec![" 12345.0 ", "1"], vec!["abc", "2"], vec!["", "3"]],
    );
    let resolution =
        attach_key(&mut dataset, &KeyStrategy::Auto, &KeyConfig::default()).expect("key");
    assert_eq!(resolution.columns, vec!["RUT".to_string()]);
    let keys = dataset
        .records()
        .iter()
        .map(|record| record.key().as_str().to_string())
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["12345", "ABC", ""]);
    assert_eq!(dataset.record(0).value(0).as_display(), " 12345.0 ");
}

#[test]
fn composite_key_joins_columns() {
    let mut dataset = Dataset::from_rows(
        "people.csv",
        &["nombre", "paterno", "edad"],
        &[vec!["ana", "perez", "30"], vec!["Ana ", "Perez", "31"]],
    );
    let strategy = KeyStrategy::Composite(vec!["nombre".to_string(), "PATERNO".to_string()]);
    let resolution = attach_key(&mut dataset, &strategy, &KeyConfig::default()).expect("key");
    assert_eq!(resolution.method, KeyMethod::Composite);
    assert_eq!(dataset.record(0).key().as_str(), "ANA|PEREZ");
    assert_eq!(dataset.record(0).key(), dataset.record(1).key());
    assert!(resolution.uniqueness < 1.0);
    assert_eq!(dataset.key_label().as_deref(), Some("nombre + paterno"));
}

#[test]
fn person_key_prefers_name_and_surnames() {
    let dataset = Dataset::from_rows(
        "people.xlsx",
        &["Edad", "Nombres", "Apellido Paterno", "Apellido_Materno"],
        &[vec!["30", "Ana", "Perez", "Soto"]],
    );
    let (columns, method) =
        resolve_key_columns(&dataset, &KeyStrategy::PersonName, &KeyConfig::default())
            .expect("person key");
    assert_eq!(columns, vec![1, 2, 3]);
    assert_eq!(method, KeyMethod::PersonName);
}

#[test]
fn person_key_falls_back_to_full_name() {
    let dataset = Dataset::from_rows(
        "people.csv",
        &["Edad", "Nombre Completo"],
        &[vec!["30", "Ana Perez Soto"]],
    );
    let (columns, _) =
        resolve_key_columns(&dataset, &KeyStrategy::PersonName, &KeyConfig::default())
            .expect("person key");
    assert_eq!(columns, vec![1]);
}

#[test]
fn person_key_without_name_columns_fails() {
    let err = resolve_key_columns(&patients(), &KeyStrategy::PersonName, &KeyConfig::default());
    assert!(matches!(err, Err(ReconcileError::NoKeyColumn { .. })));
}

fn keys_of(dataset: &Dataset) -> Vec<&str> {
    dataset.records().iter().map(|record| record.key().as_str()).collect()
}

#[test]
fn split_number_and_check_digit_form_one_identifier() {
    let mut dataset = Dataset::from_rows(
        "fonasa.csv",
        &["Nombre", "RUN", "DV"],
        &[
            vec!["Ana", "11.111.111", "1"],
            vec!["Luis", "22222222.0", "k"],
            vec!["Eva", "", ""],
        ],
    );
    let key = attach_key(&mut dataset, &KeyStrategy::CheckDigitId, &KeyConfig::default())
        .expect("id key");
    assert_eq!(key.columns, vec!["RUN".to_string(), "DV".to_string()]);
    assert_eq!(key.method, KeyMethod::CheckDigitId);
    assert_eq!(dataset.key_form(), KeyForm::CheckDigitId);
    assert_eq!(keys_of(&dataset), vec!["111111111", "22222222K", ""]);
    assert!(!dataset.record(2).key().is_valid());
}

#[test]
fn single_identifier_column_drops_formatting() {
    let mut dataset = patients();
    let key = attach_key(&mut dataset, &KeyStrategy::CheckDigitId, &KeyConfig::default())
        .expect("id key");
    assert_eq!(key.columns, vec!["RUT".to_string()]);
    assert_eq!(keys_of(&dataset), vec!["111111111", "222222222", "333333333"]);
}

#[test]
fn id_key_without_identifier_column_fails() {
    let dataset = Dataset::from_rows("x.csv", &["Nombre", "DV"], &[vec!["Ana", "1"]]);
    let err = resolve_key_columns(&dataset, &KeyStrategy::CheckDigitId, &KeyConfig::default());
    assert!(matches!(err, Err(ReconcileError::NoKeyColumn { .. })));
}

fn visits(origin: &str, folios: &[&str]) -> Dataset {
    let rows = folios
        .iter()
        .enumerate()
        .map(|(idx, folio)| vec![if idx % 2 == 0 { "A" } else { "B" }, *folio])
        .collect::<Vec<_>>();
    Dataset::from_rows(origin, &["ID", "Folio"], &rows)
}

#[test]
fn weak_keys_are_paired_on_a_shared_unique_column() {
    let config = KeyConfig::default();
    let mut a = visits("a.csv", &["F1", "F2", "F3", "F4"]);
    let mut b = visits("b.csv", &["F2", "F3", "F4", "F5"]);
    attach_key(&mut a, &KeyStrategy::Auto, &config).expect("key a");
    attach_key(&mut b, &KeyStrategy::Auto, &config).expect("key b");
    assert_eq!(a.key_columns(), [0]);

    let (key_a, key_b) = pair_keys(&mut a, &mut b, &config).expect("re-paired");
    assert_eq!(key_a.columns, vec!["Folio".to_string()]);
    assert_eq!(key_b.columns, vec!["Folio".to_string()]);
    assert_eq!(key_a.method, KeyMethod::Paired);
    assert!((key_a.uniqueness - 1.0).abs() < 1e-9);
    assert_eq!(keys_of(&b), vec!["F2", "F3", "F4", "F5"]);
}

#[test]
fn unique_keys_are_not_re_paired() {
    let config = KeyConfig::default();
    let mut a = patients();
    let mut b = patients();
    attach_key(&mut a, &KeyStrategy::Auto, &config).expect("key a");
    attach_key(&mut b, &KeyStrategy::Auto, &config).expect("key b");
    assert!(pair_keys(&mut a, &mut b, &config).is_none());
    assert_eq!(a.key_columns(), [2]);
}

#[test]
fn pairing_needs_a_shared_column_name() {
    let config = KeyConfig::default();
    let mut a = visits("a.csv", &["F1", "F2", "F3", "F4"]);
    let mut b = Dataset::from_rows(
        "b.csv",
        &["ID", "Numero"],
        &[vec!["A", "F1"], vec!["B", "F2"], vec!["A", "F3"]],
    );
    attach_key(&mut a, &KeyStrategy::Auto, &config).expect("key a");
    attach_key(&mut b, &KeyStrategy::Auto, &config).expect("key b");
    assert!(pair_keys(&mut a, &mut b, &config).is_none());
    assert_eq!(b.key_columns(), [0]);
}
